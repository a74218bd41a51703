use crate::engine::Job;
use crate::platform::Platform;
use crate::timers::{ReleaseId, TimerRegistry};
use anyhow::{Context, Result};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Press `code` now and defer its release by `up_delay`. Each release is
/// tracked separately so overlapping presses all get their key-up.
pub fn emit_key<P: Platform>(
    platform: &mut P,
    timers: &mut TimerRegistry<Job>,
    code: u16,
    app: Option<&str>,
    up_delay: Duration,
    now: Instant,
) -> Result<ReleaseId> {
    platform
        .post_key(code, true, app)
        .with_context(|| format!("posting key-down {}", code))?;
    let id = timers.schedule_release(
        now,
        up_delay,
        Job::KeyUp {
            code,
            app: app.map(str::to_owned),
        },
    );
    debug!(code, app = ?app, "key emitted");
    Ok(id)
}

/// Unconditional key-up for every code, for shutdown.
pub fn release_all<P: Platform>(platform: &mut P, codes: &[u16]) {
    for &code in codes {
        if let Err(e) = platform.post_key(code, false, None) {
            warn!(code, error = %e, "fail-safe key-up failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::MockPlatform;

    struct Harness {
        platform: MockPlatform,
    }

    // Releases only need the platform; this stands in for the engine core.
    impl crate::timers::Task<Harness> for Job {
        fn run(&mut self, ctx: &mut Harness, _timers: &mut TimerRegistry<Self>, _now: Instant) -> Result<()> {
            if let Job::KeyUp { code, app } = self {
                ctx.platform.post_key(*code, false, app.as_deref())?;
            }
            Ok(())
        }
    }

    #[test]
    fn key_down_is_immediate_and_up_is_deferred() {
        let t0 = Instant::now();
        let mut h = Harness { platform: MockPlatform::with_current("a") };
        let mut timers = TimerRegistry::new();
        emit_key(&mut h.platform, &mut timers, 92, None, Duration::from_millis(3), t0).unwrap();
        assert_eq!(h.platform.keys, vec![(92, true, None)]);
        assert_eq!(timers.pending_releases(), 1);

        timers.fire_due(&mut h, t0 + Duration::from_millis(3));
        assert_eq!(h.platform.keys, vec![(92, true, None), (92, false, None)]);
        assert_eq!(timers.pending_releases(), 0);
    }

    #[test]
    fn overlapping_emits_each_get_their_release() {
        let t0 = Instant::now();
        let mut h = Harness { platform: MockPlatform::with_current("a") };
        let mut timers = TimerRegistry::new();
        let up = Duration::from_millis(3);
        emit_key(&mut h.platform, &mut timers, 92, None, up, t0).unwrap();
        emit_key(&mut h.platform, &mut timers, 92, None, up, t0 + Duration::from_millis(1)).unwrap();
        emit_key(&mut h.platform, &mut timers, 94, Some("firefox"), up, t0 + Duration::from_millis(1)).unwrap();
        assert_eq!(timers.pending_releases(), 3);

        timers.fire_due(&mut h, t0 + Duration::from_millis(10));
        assert_eq!(h.platform.ups(92), 2);
        assert_eq!(h.platform.ups(94), 1);
        assert!(h.platform.keys.contains(&(94, false, Some("firefox".into()))));
    }

    #[test]
    fn release_all_posts_one_up_per_code() {
        let mut platform = MockPlatform::with_current("a");
        release_all(&mut platform, &[92, 94, 190]);
        assert_eq!(platform.keys.len(), 3);
        assert!(platform.keys.iter().all(|(_, pressed, _)| !pressed));
    }
}
