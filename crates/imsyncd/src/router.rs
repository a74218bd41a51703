use crate::engine::Job;
use crate::platform::Platform;
use crate::synchronizer::Core;
use crate::timers::{Slot, TimerRegistry};
use imsync_core::config::BehaviorConfig;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hotkey {
    Toggle,
    Debug,
}

/// External signals that can change or observe the active source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Hotkey(Hotkey),
    SourceChanged(String),
    FocusChanged,
    Wake,
}

impl<P: Platform> Core<P> {
    pub fn route(&mut self, timers: &mut TimerRegistry<Job>, signal: Signal, now: Instant) {
        match signal {
            // Single zero-delay slot: a second toggle in the same tick replaces the first.
            Signal::Hotkey(Hotkey::Toggle) => timers.schedule(Slot::Hotkey, now, Duration::ZERO, Job::Toggle),
            Signal::Hotkey(Hotkey::Debug) => self.log_snapshot(timers, now),
            Signal::SourceChanged(id) => self.source_changed(timers, id, now),
            Signal::FocusChanged => timers.schedule(
                Slot::Focus,
                now,
                BehaviorConfig::ms(self.config.behavior.focus_delay_ms),
                Job::FocusRefresh,
            ),
            Signal::Wake => self.wake(timers, now),
        }
    }

    fn source_changed(&mut self, timers: &mut TimerRegistry<Job>, id: String, now: Instant) {
        if self.desired_target() == Some(id.as_str()) {
            debug!(source = %id, "source change matches desired state");
            self.state.observed = Some(id);
            return;
        }

        // Echoes are judged against the last apply, not the last write:
        // enforcement and escalation keep writing, and must not mask a
        // switch made by the user meanwhile.
        let window = BehaviorConfig::ms(self.config.behavior.echo_window_ms);
        let echo = self
            .state
            .desired
            .as_ref()
            .is_some_and(|d| now.saturating_duration_since(d.last_applied_at) <= window);
        if echo {
            debug!(source = %id, "ignoring echo of our own write");
            return;
        }

        info!(source = %id, desired = ?self.desired_target(), "external source change, standing down");
        self.cancel_apply_work(timers);
        if let Some(desired) = self.state.desired.as_mut() {
            desired.target = id.clone();
        }
        self.state.observed = Some(id);
    }

    /// Re-assert whatever is active without forcing a switch.
    pub fn refresh(&mut self, timers: &mut TimerRegistry<Job>, now: Instant) {
        match self.observe() {
            Some(current) => self.apply_target(timers, &current, false, now),
            None => debug!("refresh skipped, current source unknown"),
        }
    }

    fn wake(&mut self, timers: &mut TimerRegistry<Job>, now: Instant) {
        info!("wake or unlock, restarting hotkey interception");
        self.platform.stop_hotkeys();
        if let Err(e) = self.platform.start_hotkeys() {
            warn!(error = %format!("{e:#}"), "restarting hotkey interception failed");
        }
        self.refresh(timers, now);
    }

    fn log_snapshot(&self, timers: &TimerRegistry<Job>, now: Instant) {
        let live: Vec<&str> = timers.live_slots().into_iter().map(|s| s.name()).collect();
        info!(
            desired = ?self.desired_target(),
            observed = ?self.state.observed,
            last_write_ms_ago = ?self.state.last_write_at.map(|t| now.saturating_duration_since(t).as_millis()),
            live = ?live,
            pending_releases = timers.pending_releases(),
            hotkeys_enabled = self.platform.hotkeys_enabled(),
            "state snapshot"
        );
    }
}
