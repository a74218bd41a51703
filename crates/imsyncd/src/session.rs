use crate::router::Signal;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zbus::zvariant::OwnedObjectPath;
use zbus::{Connection, Proxy};

pub const BUS_NAME: &str = "org.imsync.Daemon";
pub const OBJECT_PATH: &str = "/org/imsync/Daemon";

const LOGIND_BUS_NAME: &str = "org.freedesktop.login1";
const LOGIND_MANAGER_PATH: &str = "/org/freedesktop/login1";
const LOGIND_MANAGER_INTERFACE: &str = "org.freedesktop.login1.Manager";
const LOGIND_SESSION_INTERFACE: &str = "org.freedesktop.login1.Session";

/// Latest focused app, written by the D-Bus service and IPC, read by the engine.
pub type Frontmost = Arc<watch::Sender<Option<String>>>;

/// Normalize an app id reported by a compositor hook. Blank means unknown.
fn app_from_id(app_id: &str) -> Option<String> {
    let app_id = app_id.trim();
    (!app_id.is_empty()).then(|| app_id.to_string())
}

/// `PrepareForSleep(false)` marks the resume; `true` is the way down.
fn is_resume(prepare_for_sleep: bool) -> bool {
    !prepare_for_sleep
}

/// Session-bus endpoint that compositor extensions and scripts call on
/// every window activation.
struct FocusService {
    frontmost: Frontmost,
    signals: mpsc::UnboundedSender<Signal>,
}

impl FocusService {
    fn record(&self, app_id: &str) {
        if let Some(app) = app_from_id(app_id) {
            self.frontmost.send_replace(Some(app));
        }
        let _ = self.signals.send(Signal::FocusChanged);
    }
}

#[zbus::interface(name = "org.imsync.Daemon")]
impl FocusService {
    async fn window_focus(&self, app_id: &str) {
        debug!(app_id, "window focus reported over D-Bus");
        self.record(app_id);
    }
}

async fn serve_focus(frontmost: Frontmost, signals: mpsc::UnboundedSender<Signal>) -> zbus::Result<()> {
    let connection = Connection::session().await?;
    connection
        .object_server()
        .at(OBJECT_PATH, FocusService { frontmost, signals })
        .await?;
    connection.request_name(BUS_NAME).await?;
    info!(name = BUS_NAME, path = OBJECT_PATH, "focus service listening on the session bus");
    // The connection lives as long as this task.
    std::future::pending::<()>().await;
    Ok(())
}

async fn resolve_session(manager: &Proxy<'_>) -> zbus::Result<OwnedObjectPath> {
    // logind resolves "auto" to the caller's session.
    let id = std::env::var("XDG_SESSION_ID").unwrap_or_else(|_| "auto".to_string());
    manager.call("GetSession", &(id.as_str(),)).await
}

async fn watch_logind(signals: mpsc::UnboundedSender<Signal>) -> zbus::Result<()> {
    let connection = Connection::system().await?;
    let manager = Proxy::new(&connection, LOGIND_BUS_NAME, LOGIND_MANAGER_PATH, LOGIND_MANAGER_INTERFACE).await?;
    let mut sleep = manager.receive_signal("PrepareForSleep").await?;

    let session_path = resolve_session(&manager).await?;
    let session = Proxy::new(&connection, LOGIND_BUS_NAME, session_path.clone(), LOGIND_SESSION_INTERFACE).await?;
    let mut unlock = session.receive_signal("Unlock").await?;
    info!(session = %session_path.as_str(), "watching logind for resume and unlock");

    loop {
        let reason = tokio::select! {
            Some(msg) = sleep.next() => match msg.body().deserialize::<bool>() {
                Ok(start) if is_resume(start) => "resume",
                Ok(_) => continue,
                Err(e) => {
                    debug!(error = %e, "malformed PrepareForSleep signal");
                    continue;
                }
            },
            Some(_) = unlock.next() => "unlock",
            else => break,
        };
        info!(reason, "session woke");
        if signals.send(Signal::Wake).is_err() {
            break;
        }
    }
    Ok(())
}

/// Owned D-Bus subscriptions feeding focus and wake signals. Each runs in
/// its own task; `stop` drops the connections with them.
pub struct SessionWatch {
    frontmost: Frontmost,
    signals: mpsc::UnboundedSender<Signal>,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionWatch {
    pub fn new(frontmost: Frontmost, signals: mpsc::UnboundedSender<Signal>) -> Self {
        Self {
            frontmost,
            signals,
            tasks: Vec::new(),
        }
    }

    pub fn start(&mut self) {
        self.stop();
        let (frontmost, signals) = (Arc::clone(&self.frontmost), self.signals.clone());
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = serve_focus(frontmost, signals).await {
                warn!(error = %e, "focus service unavailable, relying on IPC focus reports");
            }
        }));
        let signals = self.signals.clone();
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = watch_logind(signals).await {
                warn!(error = %e, "logind unavailable, relying on IPC wake reports");
            }
        }));
    }

    pub fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for SessionWatch {
    fn drop(&mut self) {
        self.stop();
    }
}
