use crate::keyemu;
use crate::platform::Platform;
use crate::router::Signal;
use crate::synchronizer::Core;
use crate::timers::{Slot, Task, TimerRegistry};
use crate::watchdog;
use anyhow::Result;
use imsync_core::config::{BehaviorConfig, Config};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Work scheduled on the timer registry.
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    Toggle,
    Confirm { target: String },
    Enforce { target: String, attempts: u32 },
    BounceRevert { target: String },
    BounceCheck { target: String },
    Shortcut { target: String, presses: u32 },
    Nudge { target: String, app: String },
    FocusRefresh,
    ShowAlert { text: String },
    Watchdog,
    KeyUp { code: u16, app: Option<String> },
}

impl<P: Platform> Task<Core<P>> for Job {
    fn holds(&self, core: &Core<P>) -> bool {
        match self {
            Job::Enforce { target, attempts } => core.enforcement_holds(target, *attempts),
            Job::Shortcut { target, presses } => core.shortcut_holds(target, *presses),
            _ => true,
        }
    }

    fn run(&mut self, core: &mut Core<P>, timers: &mut TimerRegistry<Self>, now: Instant) -> Result<()> {
        match self {
            Job::Toggle => core.toggle(timers, now),
            Job::Confirm { target } => core.confirm(timers, target, now),
            Job::Enforce { target, attempts } => {
                *attempts += 1;
                core.enforce(timers, target, *attempts, now);
            }
            Job::BounceRevert { target } => core.bounce_revert(timers, target, now)?,
            Job::BounceCheck { target } => core.bounce_check(timers, target, now),
            Job::Shortcut { presses, .. } => {
                *presses += 1;
                core.press_fallback_chord(now)?;
            }
            Job::Nudge { target, app } => core.nudge(timers, target, app, now)?,
            Job::FocusRefresh => core.refresh(timers, now),
            Job::ShowAlert { text } => core.show_alert(text),
            Job::Watchdog => watchdog::check(core)?,
            Job::KeyUp { code, app } => core.platform.post_key(*code, false, app.as_deref())?,
        }
        Ok(())
    }

    fn finished(&mut self, core: &mut Core<P>, timers: &mut TimerRegistry<Self>, now: Instant) -> Result<()> {
        match self {
            Job::Enforce { target, attempts } => core.enforcement_finished(timers, target, *attempts, now),
            Job::Shortcut { target, presses } => core.shortcut_finished(target, *presses),
            _ => {}
        }
        Ok(())
    }
}

/// Snapshot for status queries.
#[derive(Debug, Clone)]
pub struct Status {
    pub desired: Option<String>,
    pub observed: Option<String>,
    pub hotkeys_enabled: bool,
    pub live_timers: Vec<Slot>,
    pub pending_releases: usize,
}

/// One synchronization engine: all state lives here, nothing is global.
pub struct Engine<P> {
    core: Core<P>,
    timers: TimerRegistry<Job>,
    running: bool,
}

impl<P: Platform> Engine<P> {
    pub fn new(config: Config, platform: P) -> Self {
        Self {
            core: Core::new(config, platform),
            timers: TimerRegistry::new(),
            running: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn start(&mut self, now: Instant) {
        if self.running {
            return;
        }
        self.running = true;
        self.validate_sources();

        if let Err(e) = self.core.platform.start_hotkeys() {
            warn!(error = %format!("{e:#}"), "hotkey interception failed to start");
        }
        if self.core.config.behavior.use_source_changed_watcher {
            if let Err(e) = self.core.platform.start_source_watch() {
                warn!(error = %format!("{e:#}"), "source watcher failed to start");
            }
        }
        if let Err(e) = self.core.platform.start_session_watch() {
            warn!(error = %format!("{e:#}"), "session watch failed to start");
        }
        watchdog::arm(&self.core, &mut self.timers, now);

        let observed = self.core.observe();
        info!(
            primary = %self.core.config.sources.primary,
            secondary = %self.core.config.sources.secondary,
            observed = ?observed,
            "engine started"
        );
    }

    /// Misconfigured sources are reported, never fatal.
    fn validate_sources(&mut self) {
        let installed = match self.core.platform.available_sources() {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "could not list installed input sources");
                return;
            }
        };
        let sources = &self.core.config.sources;
        let missing: Vec<String> = [&sources.primary, &sources.secondary]
            .into_iter()
            .filter(|id| !installed.contains(*id))
            .cloned()
            .collect();
        for id in missing {
            warn!(source = %id, "configured input source is not installed");
            let duration = BehaviorConfig::ms(self.core.config.behavior.alert_duration_ms * 3);
            self.core
                .platform
                .show_alert(&format!("input source not installed: {}", id), duration);
        }
    }

    /// Cancel everything and release every configured key. Safe to call
    /// repeatedly or before `start`.
    pub fn stop(&mut self) {
        let cancelled = self.timers.cancel_all();
        if let Some(alert) = self.core.state.alert.take() {
            self.core.platform.close_alert(alert);
        }
        let codes = self.core.config.keycodes.all();
        keyemu::release_all(&mut self.core.platform, &codes);
        if self.running {
            self.core.platform.stop_session_watch();
            self.core.platform.stop_source_watch();
            self.core.platform.stop_hotkeys();
            info!(cancelled, "engine stopped");
        }
        self.running = false;
    }

    pub fn handle(&mut self, signal: Signal, now: Instant) {
        if !self.running {
            debug!(?signal, "engine not running, signal dropped");
            return;
        }
        self.core.route(&mut self.timers, signal, now);
    }

    pub fn toggle(&mut self, now: Instant) {
        self.core.toggle(&mut self.timers, now);
    }

    pub fn apply_target(&mut self, target: &str, force: bool, now: Instant) {
        self.core.apply_target(&mut self.timers, target, force, now);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn check_timer(&mut self, now: Instant) {
        self.timers.fire_due(&mut self.core, now);
    }

    pub fn status(&self) -> Status {
        Status {
            desired: self.core.desired_target().map(str::to_owned),
            observed: self.core.state.observed.clone(),
            hotkeys_enabled: self.core.platform.hotkeys_enabled(),
            live_timers: self.timers.live_slots(),
            pending_releases: self.timers.pending_releases(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.core.config
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.core.platform
    }

    #[cfg(test)]
    fn platform(&self) -> &P {
        &self.core.platform
    }
}
