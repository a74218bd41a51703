use crate::engine::Job;
use crate::keyemu;
use crate::platform::{AlertId, Platform};
use crate::timers::{Slot, TimerRegistry};
use anyhow::{Context, Result};
use imsync_core::config::{BehaviorConfig, Config, Role};
use imsync_core::keys::{self, Chord};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The source the engine intends to be active.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredState {
    pub target: String,
    pub last_applied_at: Instant,
}

#[derive(Debug, Default)]
pub struct SyncState {
    pub desired: Option<DesiredState>,
    /// Last source the host reported.
    pub observed: Option<String>,
    /// Time of our most recent OS-visible write of any kind.
    pub last_write_at: Option<Instant>,
    pub alert: Option<AlertId>,
}

/// Everything timer callbacks run against: configuration, host, state.
pub struct Core<P> {
    pub config: Config,
    pub platform: P,
    pub state: SyncState,
    fallback_chord: Option<Chord>,
}

fn ms(value: u64) -> Duration {
    BehaviorConfig::ms(value)
}

impl<P: Platform> Core<P> {
    pub fn new(config: Config, platform: P) -> Self {
        let fallback_chord = match keys::parse_chord(&config.behavior.shortcut_fallback.binding()) {
            Ok(chord) => Some(chord),
            Err(e) => {
                warn!(error = %e, "invalid shortcut fallback binding, fallback disabled");
                None
            }
        };
        Self {
            config,
            platform,
            state: SyncState::default(),
            fallback_chord,
        }
    }

    /// Read the host's current source, falling back to the last known one.
    pub fn observe(&mut self) -> Option<String> {
        match self.platform.current_source() {
            Ok(id) => {
                self.state.observed = Some(id.clone());
                Some(id)
            }
            Err(e) => {
                debug!(error = %e, "reading current source failed");
                self.state.observed.clone()
            }
        }
    }

    pub fn converged(&self, target: &str) -> bool {
        self.platform
            .current_source()
            .map(|id| id == target)
            .unwrap_or(false)
    }

    pub fn desired_target(&self) -> Option<&str> {
        self.state.desired.as_ref().map(|d| d.target.as_str())
    }

    pub fn cancel_apply_work(&self, timers: &mut TimerRegistry<Job>) {
        for slot in Slot::APPLY_SCOPED {
            timers.cancel(slot);
        }
    }

    /// Make the observed source match `target`: write, force the mapped
    /// key, then confirm and enforce on timers.
    pub fn apply_target(&mut self, timers: &mut TimerRegistry<Job>, target: &str, force: bool, now: Instant) {
        if !force {
            let threshold = ms(self.config.behavior.debounce_threshold_ms);
            let recent = self
                .state
                .desired
                .as_ref()
                .is_some_and(|d| now.saturating_duration_since(d.last_applied_at) < threshold);
            if recent && self.observe().as_deref() == Some(target) {
                debug!(source = %target, "apply debounced");
                return;
            }
        }

        self.cancel_apply_work(timers);
        self.state.desired = Some(DesiredState {
            target: target.to_owned(),
            last_applied_at: now,
        });
        info!(source = %target, force, "applying input source");

        self.write_source(target, now);
        self.force_key(timers, target, now);
        if self.config.behavior.use_foreign_app_nudge {
            self.schedule_nudge(timers, target, now);
        }

        timers.schedule(
            Slot::Apply,
            now,
            ms(self.config.behavior.apply_delay_ms),
            Job::Confirm {
                target: target.to_owned(),
            },
        );
    }

    fn write_source(&mut self, id: &str, now: Instant) {
        self.state.last_write_at = Some(now);
        if let Err(e) = self.platform.select_source(id) {
            warn!(source = id, error = %format!("{e:#}"), "select source failed");
        }
    }

    /// Emit the physical key mapped to `target`. Foreign targets emit nothing.
    fn force_key(&mut self, timers: &mut TimerRegistry<Job>, target: &str, now: Instant) {
        let Some(role) = self.config.sources.role_of(target) else {
            return;
        };
        let code = self.config.keycodes.for_role(role);
        let up_delay = ms(self.config.behavior.key_up_delay_ms);
        if let Err(e) = keyemu::emit_key(&mut self.platform, timers, code, None, up_delay, now) {
            warn!(code, error = %format!("{e:#}"), "forced key failed");
        }
    }

    fn schedule_nudge(&mut self, timers: &mut TimerRegistry<Job>, target: &str, now: Instant) {
        let Some(app) = self.platform.frontmost_app() else {
            return;
        };
        let matches = self
            .config
            .behavior
            .nudge_apps
            .iter()
            .any(|allowed| app.eq_ignore_ascii_case(allowed));
        if !matches {
            return;
        }
        debug!(app = %app, "scheduling foreign app nudge");
        timers.schedule(
            Slot::Nudge,
            now,
            ms(self.config.behavior.nudge_delay_ms),
            Job::Nudge {
                target: target.to_owned(),
                app,
            },
        );
    }

    pub fn nudge(&mut self, timers: &mut TimerRegistry<Job>, target: &str, app: &str, now: Instant) -> Result<()> {
        let code = match self.config.sources.role_of(target) {
            Some(role) => self.config.keycodes.for_role(role),
            None => self.config.keycodes.refresh_dummy,
        };
        let up_delay = ms(self.config.behavior.key_up_delay_ms);
        keyemu::emit_key(&mut self.platform, timers, code, Some(app), up_delay, now)
            .with_context(|| format!("nudging {}", app))?;
        debug!(app, code, "foreign app nudged");
        Ok(())
    }

    /// First check after an apply. Anything but a match starts enforcement.
    pub fn confirm(&mut self, timers: &mut TimerRegistry<Job>, target: &str, now: Instant) {
        if self.observe().as_deref() == Some(target) {
            debug!(source = %target, "input source converged");
            return;
        }
        debug!(source = %target, observed = ?self.state.observed, "not converged, enforcing");
        timers.schedule_while(
            Slot::Enforcement,
            now,
            ms(self.config.behavior.retry_interval_ms),
            Job::Enforce {
                target: target.to_owned(),
                attempts: 0,
            },
        );
    }

    pub fn enforcement_holds(&self, target: &str, attempts: u32) -> bool {
        attempts < self.config.behavior.retry_count && !self.converged(target)
    }

    pub fn enforce(&mut self, timers: &mut TimerRegistry<Job>, target: &str, attempt: u32, now: Instant) {
        debug!(source = %target, attempt, "enforcing input source");
        self.write_source(target, now);
        self.force_key(timers, target, now);
    }

    pub fn enforcement_finished(&mut self, timers: &mut TimerRegistry<Job>, target: &str, attempts: u32, now: Instant) {
        if self.observe().as_deref() == Some(target) {
            info!(source = %target, attempts, "input source converged after enforcement");
            return;
        }
        warn!(source = %target, attempts, observed = ?self.state.observed, "enforcement exhausted");
        self.escalate(timers, target, now);
    }

    /// Last-resort strategies after the retry budget is spent.
    fn escalate(&mut self, timers: &mut TimerRegistry<Job>, target: &str, now: Instant) {
        let behavior = &self.config.behavior;
        let role = self.config.sources.role_of(target);
        if behavior.use_bounce_fallback && role == Some(behavior.bounce_target) {
            self.start_bounce(timers, target, now);
        } else {
            self.start_shortcut_fallback(timers, target, now);
        }
    }

    /// Bounce: switch to the other source, wait, then one previous-source
    /// keystroke to dislodge a stuck host cache.
    fn start_bounce(&mut self, timers: &mut TimerRegistry<Job>, target: &str, now: Instant) {
        let Some(role) = self.config.sources.role_of(target) else {
            return;
        };
        let other = self.config.sources.id(role.other()).to_owned();
        info!(source = %target, via = %other, "bounce fallback");
        self.write_source(&other, now);
        timers.schedule(
            Slot::Escalation,
            now,
            ms(self.config.behavior.bounce_delay_ms),
            Job::BounceRevert {
                target: target.to_owned(),
            },
        );
    }

    pub fn bounce_revert(&mut self, timers: &mut TimerRegistry<Job>, target: &str, now: Instant) -> Result<()> {
        timers.schedule(
            Slot::Escalation,
            now,
            ms(self.config.behavior.shortcut_fallback.interval_ms),
            Job::BounceCheck {
                target: target.to_owned(),
            },
        );
        self.press_fallback_chord(now)
    }

    pub fn bounce_check(&mut self, timers: &mut TimerRegistry<Job>, target: &str, now: Instant) {
        if self.observe().as_deref() == Some(target) {
            info!(source = %target, "bounce fallback converged");
            return;
        }
        warn!(source = %target, observed = ?self.state.observed, "bounce fallback failed");
        self.start_shortcut_fallback(timers, target, now);
    }

    fn start_shortcut_fallback(&mut self, timers: &mut TimerRegistry<Job>, target: &str, now: Instant) {
        if !self.config.behavior.use_shortcut_fallback || self.fallback_chord.is_none() {
            debug!(source = %target, "no shortcut fallback configured");
            return;
        }
        info!(source = %target, "shortcut fallback");
        timers.schedule_while(
            Slot::Escalation,
            now,
            ms(self.config.behavior.shortcut_fallback.interval_ms),
            Job::Shortcut {
                target: target.to_owned(),
                presses: 0,
            },
        );
    }

    pub fn shortcut_holds(&self, target: &str, presses: u32) -> bool {
        presses < self.config.behavior.shortcut_fallback.max_presses && !self.converged(target)
    }

    pub fn press_fallback_chord(&mut self, now: Instant) -> Result<()> {
        let Some(chord) = self.fallback_chord else {
            return Ok(());
        };
        self.state.last_write_at = Some(now);
        let press_delay = Duration::from_micros(self.config.behavior.shortcut_fallback.press_delay_us);
        self.platform
            .post_chord(&chord, press_delay)
            .context("posting source-switch shortcut")
    }

    pub fn shortcut_finished(&mut self, target: &str, presses: u32) {
        if self.observe().as_deref() == Some(target) {
            info!(source = %target, presses, "shortcut fallback converged");
        } else {
            warn!(source = %target, presses, observed = ?self.state.observed, "shortcut fallback exhausted");
        }
    }

    /// Switch to the other configured source and queue the label.
    pub fn toggle(&mut self, timers: &mut TimerRegistry<Job>, now: Instant) {
        let observed = self.observe();
        let current = observed.as_deref().and_then(|id| self.config.sources.role_of(id));
        let next = match current {
            Some(role) => role.other(),
            None => Role::Primary,
        };
        let target = self.config.sources.id(next).to_owned();
        info!(from = ?observed, to = %target, "toggle");
        self.apply_target(timers, &target, true, now);

        if self.config.behavior.show_alert {
            let text = self.config.sources.label(next).to_owned();
            timers.schedule(Slot::Alert, now, ms(self.config.behavior.alert_delay_ms), Job::ShowAlert { text });
        }
    }

    pub fn show_alert(&mut self, text: &str) {
        if let Some(previous) = self.state.alert.take() {
            self.platform.close_alert(previous);
        }
        let duration = ms(self.config.behavior.alert_duration_ms);
        self.state.alert = Some(self.platform.show_alert(text, duration));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::MockPlatform;

    const ABC: &str = "xkb:us::eng";
    const JPN: &str = "mozc-jp";
    const PRIMARY_KEY: u16 = 94;
    const SECONDARY_KEY: u16 = 92;

    fn make_core(current: &str) -> Core<MockPlatform> {
        Core::new(Config::default(), MockPlatform::with_current(current))
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// Fire timers every millisecond from `from` to `from + span`.
    fn run_for(core: &mut Core<MockPlatform>, timers: &mut TimerRegistry<Job>, from: Instant, span: Duration) {
        let mut t = from;
        while t <= from + span {
            timers.fire_due(core, t);
            t += ms(1);
        }
    }

    // --- debounce ---

    #[test]
    fn apply_twice_within_threshold_writes_once() {
        let t0 = Instant::now();
        let mut core = make_core(ABC);
        let mut timers = TimerRegistry::new();
        core.apply_target(&mut timers, JPN, false, t0);
        core.apply_target(&mut timers, JPN, false, t0 + ms(50));
        assert_eq!(core.platform.selects.len(), 1);
        assert_eq!(core.platform.downs(SECONDARY_KEY), 1);
    }

    #[test]
    fn apply_after_threshold_writes_again() {
        let t0 = Instant::now();
        let mut core = make_core(ABC);
        let mut timers = TimerRegistry::new();
        core.apply_target(&mut timers, JPN, false, t0);
        core.apply_target(&mut timers, JPN, false, t0 + ms(250));
        assert_eq!(core.platform.selects.len(), 2);
    }

    #[test]
    fn forced_apply_ignores_debounce() {
        let t0 = Instant::now();
        let mut core = make_core(ABC);
        let mut timers = TimerRegistry::new();
        core.apply_target(&mut timers, JPN, false, t0);
        core.apply_target(&mut timers, JPN, true, t0 + ms(10));
        assert_eq!(core.platform.selects.len(), 2);
        assert_eq!(core.platform.downs(SECONDARY_KEY), 2);
    }

    #[test]
    fn desired_state_is_committed_before_confirmation() {
        let t0 = Instant::now();
        let mut core = make_core(ABC);
        core.platform.frozen = true;
        let mut timers = TimerRegistry::new();
        core.apply_target(&mut timers, JPN, true, t0);
        assert_eq!(
            core.state.desired,
            Some(DesiredState {
                target: JPN.into(),
                last_applied_at: t0
            })
        );
        assert!(timers.is_live(Slot::Apply));
    }

    // --- primary write and forced key ---

    #[test]
    fn select_failure_does_not_abort_apply() {
        let t0 = Instant::now();
        let mut core = make_core(ABC);
        core.platform.fail_select = true;
        let mut timers = TimerRegistry::new();
        core.apply_target(&mut timers, JPN, true, t0);
        assert_eq!(core.platform.downs(SECONDARY_KEY), 1);
        assert!(timers.is_live(Slot::Apply));
    }

    #[test]
    fn foreign_target_emits_no_key() {
        let t0 = Instant::now();
        let mut core = make_core(ABC);
        let mut timers = TimerRegistry::new();
        core.apply_target(&mut timers, "xkb:de::ger", true, t0);
        assert_eq!(core.platform.selects, vec!["xkb:de::ger"]);
        assert!(core.platform.keys.is_empty());
    }

    #[test]
    fn primary_target_uses_primary_keycode() {
        let t0 = Instant::now();
        let mut core = make_core(JPN);
        let mut timers = TimerRegistry::new();
        core.apply_target(&mut timers, ABC, true, t0);
        assert_eq!(core.platform.downs(PRIMARY_KEY), 1);
        assert_eq!(core.platform.downs(SECONDARY_KEY), 0);
    }

    // --- confirmation and enforcement ---

    #[test]
    fn immediate_convergence_skips_enforcement() {
        let t0 = Instant::now();
        let mut core = make_core(ABC);
        let mut timers = TimerRegistry::new();
        core.apply_target(&mut timers, JPN, true, t0);
        timers.fire_due(&mut core, t0 + ms(100));
        assert!(!timers.is_live(Slot::Apply));
        assert!(!timers.is_live(Slot::Enforcement));
        assert_eq!(core.state.observed.as_deref(), Some(JPN));
    }

    #[test]
    fn enforcement_stops_on_first_converged_tick() {
        let t0 = Instant::now();
        let mut core = make_core(ABC);
        // Initial write and first two enforcement writes are ignored.
        core.platform.stuck_writes = 3;
        let mut timers = TimerRegistry::new();
        core.apply_target(&mut timers, JPN, true, t0);
        run_for(&mut core, &mut timers, t0, ms(2000));

        assert_eq!(core.platform.current, JPN);
        // Apply write and two enforcement writes stick; the third lands.
        assert_eq!(core.platform.selects.len(), 4);
        assert!(!timers.is_live(Slot::Enforcement));
        assert!(!timers.is_live(Slot::Escalation));
        assert!(core.platform.chords.is_empty());
    }

    #[test]
    fn enforcement_budget_is_bounded_then_escalates() {
        let t0 = Instant::now();
        let mut core = make_core(ABC);
        core.platform.frozen = true;
        let mut timers = TimerRegistry::new();
        core.apply_target(&mut timers, JPN, true, t0);
        run_for(&mut core, &mut timers, t0, ms(3000));

        // 1 apply write + 5 enforcement writes
        assert_eq!(core.platform.selects_of(JPN), 6);
        assert_eq!(core.platform.downs(SECONDARY_KEY), 6);
        assert_eq!(core.platform.ups(SECONDARY_KEY), 6);
        // Shortcut fallback pressed max_presses times
        assert_eq!(core.platform.chords.len(), 3);
        assert!(timers.is_empty());
    }

    #[test]
    fn shortcut_fallback_stops_when_converged() {
        let t0 = Instant::now();
        let mut core = make_core(ABC);
        core.platform.frozen = true;
        let mut timers = TimerRegistry::new();
        core.apply_target(&mut timers, JPN, true, t0);
        // Apply at 100ms, five enforcement ticks, sixth tick finishes at 700ms.
        run_for(&mut core, &mut timers, t0, ms(700));
        assert!(timers.is_live(Slot::Escalation));
        // First press at 850ms; the host then catches up.
        run_for(&mut core, &mut timers, t0 + ms(701), ms(150));
        assert_eq!(core.platform.chords.len(), 1);
        core.platform.current = JPN.into();
        run_for(&mut core, &mut timers, t0 + ms(852), ms(1000));
        assert_eq!(core.platform.chords.len(), 1);
        assert!(!timers.is_live(Slot::Escalation));
    }

    #[test]
    fn no_fallback_when_disabled() {
        let t0 = Instant::now();
        let mut config = Config::default();
        config.behavior.use_shortcut_fallback = false;
        let mut core = Core::new(config, MockPlatform::with_current(ABC));
        core.platform.frozen = true;
        let mut timers = TimerRegistry::new();
        core.apply_target(&mut timers, JPN, true, t0);
        run_for(&mut core, &mut timers, t0, ms(3000));
        assert!(core.platform.chords.is_empty());
        assert!(timers.is_empty());
    }

    // --- escalation: bounce then shortcut ---

    #[test]
    fn exhausted_retries_bounce_once_then_shortcut_once() {
        let t0 = Instant::now();
        let mut config = Config::default();
        config.behavior.use_bounce_fallback = true;
        let mut core = Core::new(config, MockPlatform::with_current(ABC));
        core.platform.frozen = true;
        let mut timers = TimerRegistry::new();
        core.apply_target(&mut timers, JPN, true, t0);
        run_for(&mut core, &mut timers, t0, ms(5000));

        // Bounce writes the other source exactly once.
        assert_eq!(core.platform.selects_of(ABC), 1);
        assert_eq!(core.platform.selects_of(JPN), 6);
        // One bounce keystroke plus one full shortcut run.
        assert_eq!(core.platform.chords.len(), 1 + 3);
        assert!(timers.is_empty());
    }

    #[test]
    fn bounce_only_applies_to_configured_target() {
        let t0 = Instant::now();
        let mut config = Config::default();
        config.behavior.use_bounce_fallback = true;
        let mut core = Core::new(config, MockPlatform::with_current(JPN));
        core.platform.frozen = true;
        let mut timers = TimerRegistry::new();
        core.apply_target(&mut timers, ABC, true, t0);
        run_for(&mut core, &mut timers, t0, ms(5000));
        assert_eq!(core.platform.selects_of(JPN), 0);
        assert_eq!(core.platform.chords.len(), 3);
    }

    #[test]
    fn bounce_that_converges_skips_shortcut() {
        let t0 = Instant::now();
        let mut config = Config::default();
        config.behavior.use_bounce_fallback = true;
        let mut core = Core::new(config, MockPlatform::with_current(ABC));
        core.platform.stuck_writes = 6;
        let mut timers = TimerRegistry::new();
        core.apply_target(&mut timers, JPN, true, t0);
        // The bounce write to ABC goes through; pretend the chord flips back.
        run_for(&mut core, &mut timers, t0, ms(790));
        assert_eq!(core.platform.current, ABC);
        assert_eq!(core.platform.chords.len(), 1);
        core.platform.current = JPN.into();
        run_for(&mut core, &mut timers, t0 + ms(791), ms(2000));
        assert_eq!(core.platform.chords.len(), 1);
        assert!(timers.is_empty());
    }

    // --- supersession ---

    #[test]
    fn new_target_cancels_previous_attempt() {
        let t0 = Instant::now();
        let mut core = make_core(ABC);
        core.platform.frozen = true;
        let mut timers = TimerRegistry::new();
        core.apply_target(&mut timers, JPN, true, t0);
        run_for(&mut core, &mut timers, t0, ms(250));
        assert!(timers.is_live(Slot::Enforcement));

        core.platform.frozen = false;
        let cut = t0 + ms(251);
        core.apply_target(&mut timers, ABC, true, cut);
        let secondary_downs = core.platform.downs(SECONDARY_KEY);
        run_for(&mut core, &mut timers, cut, ms(2000));

        assert_eq!(core.desired_target(), Some(ABC));
        assert_eq!(core.platform.downs(SECONDARY_KEY), secondary_downs);
        assert_eq!(core.platform.current, ABC);
        assert!(timers.is_empty());
    }

    // --- nudge ---

    #[test]
    fn nudge_targets_allowlisted_frontmost_app() {
        let t0 = Instant::now();
        let mut config = Config::default();
        config.behavior.use_foreign_app_nudge = true;
        let mut core = Core::new(config, MockPlatform::with_current(ABC));
        core.platform.frontmost = Some("Firefox".into());
        let mut timers = TimerRegistry::new();
        core.apply_target(&mut timers, JPN, true, t0);
        assert!(timers.is_live(Slot::Nudge));
        run_for(&mut core, &mut timers, t0, ms(30));
        assert!(core
            .platform
            .keys
            .contains(&(SECONDARY_KEY, true, Some("Firefox".into()))));
        assert!(core
            .platform
            .keys
            .contains(&(SECONDARY_KEY, false, Some("Firefox".into()))));
    }

    #[test]
    fn nudge_skips_other_apps() {
        let t0 = Instant::now();
        let mut config = Config::default();
        config.behavior.use_foreign_app_nudge = true;
        let mut core = Core::new(config, MockPlatform::with_current(ABC));
        core.platform.frontmost = Some("org.gnome.Terminal".into());
        let mut timers = TimerRegistry::new();
        core.apply_target(&mut timers, JPN, true, t0);
        assert!(!timers.is_live(Slot::Nudge));
    }

    // --- toggle ---

    #[test]
    fn toggle_from_primary_selects_secondary_and_queues_label() {
        let t0 = Instant::now();
        let mut core = make_core(ABC);
        let mut timers = TimerRegistry::new();
        core.toggle(&mut timers, t0);
        run_for(&mut core, &mut timers, t0, ms(200));

        assert_eq!(core.platform.selects, vec![JPN]);
        assert_eq!(core.platform.downs(SECONDARY_KEY), 1);
        assert_eq!(core.platform.ups(SECONDARY_KEY), 1);
        assert_eq!(core.platform.alerts.len(), 1);
        assert_eq!(core.platform.alerts[0].1, "secondary");
        assert!(timers.is_empty());
    }

    #[test]
    fn toggle_from_foreign_source_goes_primary() {
        let t0 = Instant::now();
        let mut core = make_core("xkb:fr::fra");
        let mut timers = TimerRegistry::new();
        core.toggle(&mut timers, t0);
        assert_eq!(core.platform.selects, vec![ABC]);
    }

    #[test]
    fn rapid_toggles_close_previous_label() {
        let t0 = Instant::now();
        let mut core = make_core(ABC);
        let mut timers = TimerRegistry::new();
        core.toggle(&mut timers, t0);
        run_for(&mut core, &mut timers, t0, ms(40));
        core.toggle(&mut timers, t0 + ms(41));
        core.toggle(&mut timers, t0 + ms(45));
        run_for(&mut core, &mut timers, t0 + ms(41), ms(300));

        // The third toggle superseded the second's pending label.
        assert_eq!(core.platform.alerts.len(), 2);
        assert_eq!(core.platform.closed, vec![core.platform.alerts[0].0]);
        assert_eq!(core.platform.alerts[1].1, "secondary");
    }

    #[test]
    fn toggle_without_alert_when_disabled() {
        let t0 = Instant::now();
        let mut config = Config::default();
        config.behavior.show_alert = false;
        let mut core = Core::new(config, MockPlatform::with_current(ABC));
        let mut timers = TimerRegistry::new();
        core.toggle(&mut timers, t0);
        assert!(!timers.is_live(Slot::Alert));
    }
}
