mod engine;
mod grabber;
mod hotkey;
mod ibus;
mod keyemu;
mod linux;
mod platform;
mod router;
mod session;
mod synchronizer;
mod timers;
mod uinput_emitter;
mod watcher;
mod watchdog;

use anyhow::{Context, Result};
use engine::Engine;
use imsync_core::config::{self, Config};
use imsync_core::ipc::{self, ClientMsg, DaemonMsg};
use linux::LinuxPlatform;
use router::Signal;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, info, warn};

/// Shared between the event loop and IPC handlers.
struct Shared {
    engine: Engine<LinuxPlatform>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("imsyncd=info".parse()?))
        .init();

    info!("imsyncd starting");

    let config = Config::load().context("loading config")?;

    // Hotkeys, the source watcher and IPC all feed this channel.
    let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
    let platform = LinuxPlatform::new(&config, signal_tx).context("initializing platform")?;
    let mut engine = Engine::new(config, platform);
    engine.start(Instant::now());

    let shared = Arc::new(Mutex::new(Shared { engine }));
    // IPC handlers poke this after touching the engine so the loop
    // recomputes its deadline.
    let rearm = Arc::new(Notify::new());

    let socket_path = config::socket_path();
    let _ = std::fs::remove_file(&socket_path);
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let listener =
        UnixListener::bind(&socket_path).with_context(|| format!("binding socket {}", socket_path.display()))?;
    info!(path = %socket_path.display(), "IPC socket listening");

    let shared_ipc = Arc::clone(&shared);
    let rearm_ipc = Arc::clone(&rearm);
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    tokio::spawn(handle_ipc_client(stream, Arc::clone(&shared_ipc), Arc::clone(&rearm_ipc)));
                }
                Err(e) => {
                    warn!(error = %e, "IPC accept error");
                }
            }
        }
    });

    let mut sigterm = unix_signal(SignalKind::terminate()).context("installing SIGTERM handler")?;

    // Event-driven timer loop: sleep until the earliest deadline, no idle wakeups.
    loop {
        let deadline = shared.lock().await.engine.next_deadline();
        let sleep_fut = match deadline {
            Some(dl) => tokio::time::sleep_until(tokio::time::Instant::from_std(dl)),
            None => tokio::time::sleep(Duration::from_secs(86400)),
        };
        let has_deadline = deadline.is_some();

        tokio::select! {
            Some(signal) = signal_rx.recv() => {
                shared.lock().await.engine.handle(signal, Instant::now());
            }
            _ = sleep_fut, if has_deadline => {
                shared.lock().await.engine.check_timer(Instant::now());
            }
            _ = rearm.notified() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("SIGINT received");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received");
                break;
            }
        }
    }

    info!("imsyncd shutting down");
    shared.lock().await.engine.stop();
    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}

fn ack(ok: bool, message: impl Into<String>) -> String {
    ipc::encode(&DaemonMsg::Ack {
        ok,
        message: message.into(),
    })
}

async fn handle_ipc_client(stream: UnixStream, shared: Arc<Mutex<Shared>>, rearm: Arc<Notify>) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    // Replies and (for popups) alerts go out through this channel.
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let write_handle = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if writer.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let mut is_popup = false;

    while let Ok(Some(line)) = lines.next_line().await {
        let Some(msg) = ipc::decode_client(&line) else {
            continue;
        };

        let mut shared = shared.lock().await;
        let engine = &mut shared.engine;
        let now = Instant::now();

        let reply = match msg {
            ClientMsg::RegisterPopup => {
                is_popup = true;
                engine.platform_mut().register_popup(tx.clone());
                ack(true, "popup registered")
            }
            ClientMsg::Toggle => {
                info!("toggle via IPC");
                engine.toggle(now);
                ack(true, "toggled")
            }
            ClientMsg::Apply { source, force } => {
                info!(source = %source, force, "apply via IPC");
                engine.apply_target(&source, force, now);
                ack(true, format!("applying {}", source))
            }
            // Fallback for hosts without a compositor hook on D-Bus.
            ClientMsg::FocusChanged { app } => {
                engine.platform_mut().set_frontmost(app);
                engine.handle(Signal::FocusChanged, now);
                ack(true, "focus change noted")
            }
            // Fallback for hosts without logind.
            ClientMsg::Wake => {
                engine.handle(Signal::Wake, now);
                ack(true, "woken")
            }
            ClientMsg::SourceChanged { source } => {
                engine.handle(Signal::SourceChanged(source), now);
                ack(true, "source change noted")
            }
            ClientMsg::GetStatus => {
                let status = engine.status();
                debug!(live = ?status.live_timers, pending_releases = status.pending_releases, "status requested");
                let sources = &engine.config().sources;
                ipc::encode(&DaemonMsg::Status {
                    desired: status.desired,
                    observed: status.observed,
                    primary: sources.primary.clone(),
                    secondary: sources.secondary.clone(),
                    hotkeys_enabled: status.hotkeys_enabled,
                    version: env!("CARGO_PKG_VERSION").to_string(),
                })
            }
        };
        drop(shared);
        rearm.notify_one();
        let _ = tx.send(reply);
    }

    if is_popup {
        shared.lock().await.engine.platform_mut().prune_popups();
    }

    write_handle.abort();
}
