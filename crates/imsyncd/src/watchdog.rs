use crate::engine::Job;
use crate::platform::Platform;
use crate::synchronizer::Core;
use crate::timers::{Slot, TimerRegistry};
use anyhow::{Context, Result};
use imsync_core::config::BehaviorConfig;
use std::time::Instant;
use tracing::{debug, warn};

pub fn arm<P: Platform>(core: &Core<P>, timers: &mut TimerRegistry<Job>, now: Instant) {
    let interval = BehaviorConfig::ms(core.config.behavior.watchdog_interval_ms);
    timers.schedule_repeating(Slot::Watchdog, now, interval, Job::Watchdog);
}

/// Restart hotkey interception if the host disabled it behind our back.
pub fn check<P: Platform>(core: &mut Core<P>) -> Result<()> {
    if core.platform.hotkeys_enabled() {
        debug!("hotkey interception alive");
        return Ok(());
    }
    warn!("hotkey interception inactive, restarting");
    core.platform.stop_hotkeys();
    core.platform
        .start_hotkeys()
        .context("restarting hotkey interception")
}
