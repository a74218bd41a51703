use anyhow::Result;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Named timer slots. Each holds at most one live timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Apply,
    Enforcement,
    Escalation,
    Nudge,
    Focus,
    Hotkey,
    Alert,
    Watchdog,
}

const SLOT_COUNT: usize = 8;

impl Slot {
    pub const ALL: [Slot; SLOT_COUNT] = [
        Slot::Apply,
        Slot::Enforcement,
        Slot::Escalation,
        Slot::Nudge,
        Slot::Focus,
        Slot::Hotkey,
        Slot::Alert,
        Slot::Watchdog,
    ];

    /// Slots owned by an in-flight apply attempt.
    pub const APPLY_SCOPED: [Slot; 4] = [Slot::Apply, Slot::Enforcement, Slot::Escalation, Slot::Nudge];

    fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Slot::Apply => "apply",
            Slot::Enforcement => "enforcement",
            Slot::Escalation => "escalation",
            Slot::Nudge => "nudge",
            Slot::Focus => "focus",
            Slot::Hotkey => "hotkey",
            Slot::Alert => "alert",
            Slot::Watchdog => "watchdog",
        }
    }
}

/// Work carried by a timer. `C` is the context the work runs against.
pub trait Task<C>: Sized {
    /// Predicate for `schedule_while` timers, evaluated before every run.
    fn holds(&self, _ctx: &C) -> bool {
        true
    }

    fn run(&mut self, ctx: &mut C, timers: &mut TimerRegistry<Self>, now: Instant) -> Result<()>;

    /// Called once when a `schedule_while` predicate first returns false.
    fn finished(&mut self, _ctx: &mut C, _timers: &mut TimerRegistry<Self>, _now: Instant) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Cadence {
    Once,
    Every(Duration),
    While(Duration),
}

struct Entry<T> {
    due: Instant,
    /// Arming order; entries armed during a firing pass wait for the next pass.
    seq: u64,
    cadence: Cadence,
    task: T,
}

/// Handle of a pending key release in the unnamed pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReleaseId(u64);

enum Origin {
    Slot(Slot),
    Release(ReleaseId),
}

/// Deadline-ordered timers: a fixed arena of named slots plus an unnamed
/// pool of fire-and-forget key releases. Nothing fires on its own; the
/// owner polls `next_deadline()` and calls `fire_due()`.
pub struct TimerRegistry<T> {
    slots: [Option<Entry<T>>; SLOT_COUNT],
    /// Bumped on every schedule/cancel so a running repeating timer knows
    /// whether it was superseded while its callback ran.
    generations: [u64; SLOT_COUNT],
    releases: HashMap<ReleaseId, Entry<T>>,
    next_release: u64,
    seq: u64,
}

impl<T> Default for TimerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerRegistry<T> {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
            generations: [0; SLOT_COUNT],
            releases: HashMap::new(),
            next_release: 0,
            seq: 0,
        }
    }

    /// Run `task` once after `delay`, replacing whatever occupied `slot`.
    pub fn schedule(&mut self, slot: Slot, now: Instant, delay: Duration, task: T) {
        self.arm(slot, now + delay, Cadence::Once, task);
    }

    /// Run `task` every `interval` until cancelled.
    pub fn schedule_repeating(&mut self, slot: Slot, now: Instant, interval: Duration, task: T) {
        self.arm(slot, now + interval, Cadence::Every(interval), task);
    }

    /// Run `task` every `interval` while its predicate holds; the slot
    /// clears itself the first time it does not.
    pub fn schedule_while(&mut self, slot: Slot, now: Instant, interval: Duration, task: T) {
        self.arm(slot, now + interval, Cadence::While(interval), task);
    }

    fn arm(&mut self, slot: Slot, due: Instant, cadence: Cadence, task: T) {
        self.cancel(slot);
        let seq = self.next_seq();
        self.slots[slot.index()] = Some(Entry { due, seq, cadence, task });
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Cancel the timer in `slot`. No-op if empty.
    pub fn cancel(&mut self, slot: Slot) {
        self.generations[slot.index()] += 1;
        if self.slots[slot.index()].take().is_some() {
            debug!(slot = slot.name(), "timer cancelled");
        }
    }

    pub fn is_live(&self, slot: Slot) -> bool {
        self.slots[slot.index()].is_some()
    }

    pub fn live_slots(&self) -> Vec<Slot> {
        Slot::ALL.into_iter().filter(|s| self.is_live(*s)).collect()
    }

    /// Track a pending key release. Releases never replace each other.
    pub fn schedule_release(&mut self, now: Instant, delay: Duration, task: T) -> ReleaseId {
        let id = ReleaseId(self.next_release);
        self.next_release += 1;
        let seq = self.next_seq();
        self.releases.insert(
            id,
            Entry {
                due: now + delay,
                seq,
                cadence: Cadence::Once,
                task,
            },
        );
        id
    }

    pub fn cancel_release(&mut self, id: ReleaseId) -> bool {
        self.releases.remove(&id).is_some()
    }

    pub fn pending_releases(&self) -> usize {
        self.releases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none) && self.releases.is_empty()
    }

    /// Snapshot and clear every slot and the release pool, then drop the
    /// snapshot. Returns how many timers were cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let slots = std::mem::replace(&mut self.slots, std::array::from_fn(|_| None));
        let releases = std::mem::take(&mut self.releases);
        for generation in &mut self.generations {
            *generation += 1;
        }
        let count = slots.iter().flatten().count() + releases.len();
        drop(slots);
        drop(releases);
        if count > 0 {
            debug!(count, "all timers cancelled");
        }
        count
    }

    /// Earliest instant at which `fire_due` has work, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots
            .iter()
            .flatten()
            .chain(self.releases.values())
            .map(|e| e.due)
            .min()
    }

    /// Remove the earliest due entry armed before `horizon`. Releases win ties.
    fn pop_due(&mut self, now: Instant, horizon: u64) -> Option<(Origin, Entry<T>)> {
        let release = self
            .releases
            .iter()
            .filter(|(_, e)| e.due <= now && e.seq <= horizon)
            .min_by_key(|(_, e)| (e.due, e.seq))
            .map(|(id, e)| (*id, e.due));
        let slot = Slot::ALL
            .into_iter()
            .filter_map(|s| self.slots[s.index()].as_ref().map(|e| (s, e)))
            .filter(|(_, e)| e.due <= now && e.seq <= horizon)
            .min_by_key(|(_, e)| (e.due, e.seq))
            .map(|(s, e)| (s, e.due));

        match (release, slot) {
            (Some((id, rdue)), Some((_, sdue))) if rdue <= sdue => {
                self.releases.remove(&id).map(|e| (Origin::Release(id), e))
            }
            (Some((id, _)), None) => self.releases.remove(&id).map(|e| (Origin::Release(id), e)),
            (_, Some((s, _))) => self.slots[s.index()].take().map(|e| (Origin::Slot(s), e)),
            (None, None) => None,
        }
    }

    /// Fire every timer due at `now`. Each callback runs guarded: an error
    /// is logged and swallowed. Timers armed by a callback wait for the
    /// next call, so a zero-delay timer can still be superseded.
    pub fn fire_due<C>(&mut self, ctx: &mut C, now: Instant) -> usize
    where
        T: Task<C>,
    {
        let horizon = self.seq;
        let mut fired = 0;
        while let Some((origin, mut entry)) = self.pop_due(now, horizon) {
            fired += 1;
            let slot = match origin {
                Origin::Release(_) => {
                    guarded("key-release", entry.task.run(ctx, self, now));
                    continue;
                }
                Origin::Slot(slot) => slot,
            };
            let generation = self.generations[slot.index()];

            if let Cadence::While(_) = entry.cadence {
                if !entry.task.holds(ctx) {
                    guarded(slot.name(), entry.task.finished(ctx, self, now));
                    continue;
                }
            }

            guarded(slot.name(), entry.task.run(ctx, self, now));

            let interval = match entry.cadence {
                Cadence::Once => continue,
                Cadence::Every(interval) | Cadence::While(interval) => interval,
            };
            // A callback that cancelled or replaced its own slot wins.
            if self.generations[slot.index()] == generation {
                entry.due = now + interval;
                entry.seq = self.next_seq();
                self.slots[slot.index()] = Some(entry);
            }
        }
        fired
    }
}

fn guarded(label: &str, result: Result<()>) {
    if let Err(e) = result {
        warn!(timer = label, error = %format!("{e:#}"), "timer callback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    /// Test task: records its label into the context log.
    enum TestJob {
        Log(&'static str),
        Fail,
        /// Runs while `remaining > 0`, decrementing each run.
        Countdown { remaining: u32 },
        /// Schedules a zero-delay follow-up into the Hotkey slot.
        Chain,
        /// Cancels its own slot while running.
        SelfCancel(Slot),
    }

    #[derive(Default)]
    struct Ctx {
        log: Vec<String>,
        finished: u32,
    }

    impl Task<Ctx> for TestJob {
        fn holds(&self, _ctx: &Ctx) -> bool {
            match self {
                TestJob::Countdown { remaining } => *remaining > 0,
                _ => true,
            }
        }

        fn run(&mut self, ctx: &mut Ctx, timers: &mut TimerRegistry<Self>, now: Instant) -> Result<()> {
            match self {
                TestJob::Log(label) => ctx.log.push(label.to_string()),
                TestJob::Fail => bail!("boom"),
                TestJob::Countdown { remaining } => {
                    *remaining -= 1;
                    ctx.log.push(format!("tick{}", remaining));
                }
                TestJob::Chain => {
                    ctx.log.push("chain".into());
                    timers.schedule(Slot::Hotkey, now, Duration::ZERO, TestJob::Log("followup"));
                }
                TestJob::SelfCancel(slot) => {
                    ctx.log.push("self-cancel".into());
                    timers.cancel(*slot);
                }
            }
            Ok(())
        }

        fn finished(&mut self, ctx: &mut Ctx, _timers: &mut TimerRegistry<Self>, _now: Instant) -> Result<()> {
            ctx.finished += 1;
            Ok(())
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn schedule_replaces_existing_occupant() {
        let t0 = Instant::now();
        let mut timers = TimerRegistry::new();
        let mut ctx = Ctx::default();
        timers.schedule(Slot::Apply, t0, ms(10), TestJob::Log("first"));
        timers.schedule(Slot::Apply, t0, ms(10), TestJob::Log("second"));
        timers.fire_due(&mut ctx, t0 + ms(20));
        assert_eq!(ctx.log, vec!["second"]);
        assert!(timers.is_empty());
    }

    #[test]
    fn nothing_fires_before_deadline() {
        let t0 = Instant::now();
        let mut timers = TimerRegistry::new();
        let mut ctx = Ctx::default();
        timers.schedule(Slot::Focus, t0, ms(50), TestJob::Log("focus"));
        assert_eq!(timers.fire_due(&mut ctx, t0 + ms(49)), 0);
        assert_eq!(timers.next_deadline(), Some(t0 + ms(50)));
        assert_eq!(timers.fire_due(&mut ctx, t0 + ms(50)), 1);
    }

    #[test]
    fn cancel_on_empty_slot_is_noop() {
        let mut timers: TimerRegistry<TestJob> = TimerRegistry::new();
        timers.cancel(Slot::Watchdog);
        assert!(timers.is_empty());
        assert!(timers.next_deadline().is_none());
    }

    #[test]
    fn repeating_timer_rearms_until_cancelled() {
        let t0 = Instant::now();
        let mut timers = TimerRegistry::new();
        let mut ctx = Ctx::default();
        timers.schedule_repeating(Slot::Watchdog, t0, ms(100), TestJob::Log("tick"));
        timers.fire_due(&mut ctx, t0 + ms(100));
        timers.fire_due(&mut ctx, t0 + ms(200));
        assert_eq!(ctx.log.len(), 2);
        assert!(timers.is_live(Slot::Watchdog));
        timers.cancel(Slot::Watchdog);
        timers.fire_due(&mut ctx, t0 + ms(300));
        assert_eq!(ctx.log.len(), 2);
    }

    #[test]
    fn while_timer_stops_and_clears_when_predicate_fails() {
        let t0 = Instant::now();
        let mut timers = TimerRegistry::new();
        let mut ctx = Ctx::default();
        timers.schedule_while(Slot::Enforcement, t0, ms(10), TestJob::Countdown { remaining: 2 });
        for i in 1..=5 {
            timers.fire_due(&mut ctx, t0 + ms(10 * i));
        }
        assert_eq!(ctx.log, vec!["tick1", "tick0"]);
        assert_eq!(ctx.finished, 1);
        assert!(!timers.is_live(Slot::Enforcement));
    }

    #[test]
    fn failing_callback_is_swallowed() {
        let t0 = Instant::now();
        let mut timers = TimerRegistry::new();
        let mut ctx = Ctx::default();
        timers.schedule(Slot::Nudge, t0, ms(1), TestJob::Fail);
        timers.schedule(Slot::Alert, t0, ms(2), TestJob::Log("after"));
        assert_eq!(timers.fire_due(&mut ctx, t0 + ms(5)), 2);
        assert_eq!(ctx.log, vec!["after"]);
        assert!(timers.is_empty());
    }

    #[test]
    fn zero_delay_timer_armed_during_fire_waits_for_next_pass() {
        let t0 = Instant::now();
        let mut timers = TimerRegistry::new();
        let mut ctx = Ctx::default();
        timers.schedule(Slot::Apply, t0, ms(1), TestJob::Chain);
        timers.fire_due(&mut ctx, t0 + ms(1));
        assert_eq!(ctx.log, vec!["chain"]);
        assert!(timers.is_live(Slot::Hotkey));
        timers.fire_due(&mut ctx, t0 + ms(1));
        assert_eq!(ctx.log, vec!["chain", "followup"]);
    }

    #[test]
    fn repeating_timer_that_cancels_itself_is_not_rearmed() {
        let t0 = Instant::now();
        let mut timers = TimerRegistry::new();
        let mut ctx = Ctx::default();
        timers.schedule_repeating(Slot::Watchdog, t0, ms(10), TestJob::SelfCancel(Slot::Watchdog));
        timers.fire_due(&mut ctx, t0 + ms(10));
        assert!(!timers.is_live(Slot::Watchdog));
    }

    #[test]
    fn releases_do_not_replace_each_other() {
        let t0 = Instant::now();
        let mut timers = TimerRegistry::new();
        let mut ctx = Ctx::default();
        timers.schedule_release(t0, ms(3), TestJob::Log("up-a"));
        let b = timers.schedule_release(t0, ms(3), TestJob::Log("up-b"));
        timers.schedule_release(t0, ms(4), TestJob::Log("up-c"));
        assert_eq!(timers.pending_releases(), 3);
        assert!(timers.cancel_release(b));
        assert!(!timers.cancel_release(b));
        timers.fire_due(&mut ctx, t0 + ms(5));
        assert_eq!(ctx.log, vec!["up-a", "up-c"]);
        assert_eq!(timers.pending_releases(), 0);
    }

    #[test]
    fn cancel_all_clears_slots_and_release_pool() {
        let t0 = Instant::now();
        let mut timers = TimerRegistry::new();
        let mut ctx = Ctx::default();
        timers.schedule(Slot::Apply, t0, ms(5), TestJob::Log("apply"));
        timers.schedule_repeating(Slot::Watchdog, t0, ms(5), TestJob::Log("watchdog"));
        timers.schedule_release(t0, ms(5), TestJob::Log("up"));
        assert_eq!(timers.cancel_all(), 3);
        assert!(timers.is_empty());
        assert_eq!(timers.fire_due(&mut ctx, t0 + ms(10)), 0);
        assert!(ctx.log.is_empty());
    }

    #[test]
    fn live_slots_lists_occupied_slots_in_order() {
        let t0 = Instant::now();
        let mut timers = TimerRegistry::new();
        timers.schedule(Slot::Focus, t0, ms(5), TestJob::Log("f"));
        timers.schedule(Slot::Apply, t0, ms(5), TestJob::Log("a"));
        assert_eq!(timers.live_slots(), vec![Slot::Apply, Slot::Focus]);
    }
}
