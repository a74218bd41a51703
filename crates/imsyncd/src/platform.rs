use anyhow::Result;
use imsync_core::keys::Chord;
use std::time::Duration;

pub type AlertId = u64;

/// Host primitives the engine drives. The engine owns one instance and
/// calls it only from the event loop.
pub trait Platform {
    // Input sources
    fn current_source(&self) -> Result<String>;
    fn select_source(&mut self, id: &str) -> Result<()>;
    fn available_sources(&self) -> Result<Vec<String>>;

    // Key synthesis. `app` scopes the event to one application where the
    // host supports it.
    fn post_key(&mut self, code: u16, pressed: bool, app: Option<&str>) -> Result<()>;
    fn post_chord(&mut self, chord: &Chord, press_delay: Duration) -> Result<()>;

    fn frontmost_app(&self) -> Option<String>;

    // Hotkey interception
    fn start_hotkeys(&mut self) -> Result<()>;
    fn stop_hotkeys(&mut self);
    fn hotkeys_enabled(&self) -> bool;

    // Source-changed notifications
    fn start_source_watch(&mut self) -> Result<()>;
    fn stop_source_watch(&mut self);

    // Focus and resume/unlock notifications from the session
    fn start_session_watch(&mut self) -> Result<()>;
    fn stop_session_watch(&mut self);

    // On-screen label
    fn show_alert(&mut self, text: &str, duration: Duration) -> AlertId;
    fn close_alert(&mut self, id: AlertId);
}
