use crate::hotkey::{self, HotkeyTap};
use crate::ibus;
use crate::platform::{AlertId, Platform};
use crate::router::Signal;
use crate::session::{Frontmost, SessionWatch};
use crate::uinput_emitter;
use crate::watcher;
use anyhow::{Context, Result};
use evdev::uinput::VirtualDevice;
use imsync_core::config::{BehaviorConfig, Config};
use imsync_core::ipc::{self, DaemonMsg};
use imsync_core::keys::Chord;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// IBus sources, uinput keys, evdev hotkeys, alerts over IPC.
pub struct LinuxPlatform {
    vdev: VirtualDevice,
    hotkeys: HotkeyTap,
    watcher: Option<JoinHandle<()>>,
    poll_interval: Duration,
    signals: mpsc::UnboundedSender<Signal>,
    frontmost: Frontmost,
    session: SessionWatch,
    /// Channels to connected popup clients.
    popup_txs: Vec<mpsc::UnboundedSender<String>>,
    next_alert: AlertId,
}

impl LinuxPlatform {
    pub fn new(config: &Config, signals: mpsc::UnboundedSender<Signal>) -> Result<Self> {
        let vdev = uinput_emitter::create_virtual_device().context("creating virtual device")?;
        let frontmost = Arc::new(watch::channel(None).0);
        Ok(Self {
            vdev,
            hotkeys: HotkeyTap::new(hotkey::parse_bindings(config), signals.clone()),
            watcher: None,
            poll_interval: BehaviorConfig::ms(config.behavior.source_poll_interval_ms),
            session: SessionWatch::new(Arc::clone(&frontmost), signals.clone()),
            signals,
            frontmost,
            popup_txs: Vec::new(),
            next_alert: 0,
        })
    }

    /// Remember the app reported by the latest focus signal.
    pub fn set_frontmost(&mut self, app: Option<String>) {
        if app.is_some() {
            self.frontmost.send_replace(app);
        }
    }

    pub fn register_popup(&mut self, tx: mpsc::UnboundedSender<String>) {
        self.popup_txs.push(tx);
        info!(popups = self.popup_txs.len(), "popup registered");
    }

    pub fn prune_popups(&mut self) {
        self.popup_txs.retain(|t| !t.is_closed());
    }

    fn broadcast(&mut self, msg: &DaemonMsg) {
        let line = ipc::encode(msg);
        self.popup_txs.retain(|tx| tx.send(line.clone()).is_ok());
    }
}

/// Run a blocking host call from the event loop. The worker thread is
/// handed off first so IPC and hotkey tasks keep running meanwhile.
/// Needs the multi-threaded runtime.
fn off_loop<T>(f: impl FnOnce() -> T) -> T {
    tokio::task::block_in_place(f)
}

impl Platform for LinuxPlatform {
    fn current_source(&self) -> Result<String> {
        off_loop(ibus::current_engine)
    }

    fn select_source(&mut self, id: &str) -> Result<()> {
        off_loop(|| ibus::set_engine(id))
    }

    fn available_sources(&self) -> Result<Vec<String>> {
        off_loop(ibus::list_engines)
    }

    fn post_key(&mut self, code: u16, pressed: bool, app: Option<&str>) -> Result<()> {
        if let Some(app) = app {
            debug!(app, code, "app-scoped key posted globally");
        }
        uinput_emitter::post_key(&mut self.vdev, code, pressed)
    }

    fn post_chord(&mut self, chord: &Chord, press_delay: Duration) -> Result<()> {
        uinput_emitter::post_chord(&mut self.vdev, chord, press_delay)
    }

    fn frontmost_app(&self) -> Option<String> {
        self.frontmost.borrow().clone()
    }

    fn start_hotkeys(&mut self) -> Result<()> {
        self.hotkeys.start()
    }

    fn stop_hotkeys(&mut self) {
        self.hotkeys.stop();
    }

    fn hotkeys_enabled(&self) -> bool {
        self.hotkeys.is_enabled()
    }

    fn start_source_watch(&mut self) -> Result<()> {
        self.stop_source_watch();
        self.watcher = Some(watcher::spawn(self.poll_interval, self.signals.clone()));
        Ok(())
    }

    fn stop_source_watch(&mut self) {
        if let Some(task) = self.watcher.take() {
            task.abort();
        }
    }

    fn start_session_watch(&mut self) -> Result<()> {
        self.session.start();
        Ok(())
    }

    fn stop_session_watch(&mut self) {
        self.session.stop();
    }

    fn show_alert(&mut self, text: &str, duration: Duration) -> AlertId {
        self.next_alert += 1;
        let id = self.next_alert;
        if self.popup_txs.is_empty() {
            debug!(text, "no popup connected, label not shown");
        }
        self.broadcast(&DaemonMsg::ShowAlert {
            id,
            text: text.to_string(),
            duration_ms: duration.as_millis() as u64,
        });
        id
    }

    fn close_alert(&mut self, id: AlertId) {
        self.broadcast(&DaemonMsg::CloseAlert { id });
    }
}
