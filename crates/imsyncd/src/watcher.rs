use crate::ibus;
use crate::router::Signal;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Record `current` and return it if it differs from a previously seen
/// source. The first reading only sets the baseline.
fn detect_change(last: &mut Option<String>, current: String) -> Option<String> {
    let changed = last.as_ref().is_some_and(|prev| *prev != current);
    *last = Some(current.clone());
    changed.then_some(current)
}

/// Poll `ibus engine` and report changes as `SourceChanged` signals.
pub fn spawn(interval: Duration, tx: mpsc::UnboundedSender<Signal>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "source watcher started");
        let mut last = None;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let current = match tokio::task::spawn_blocking(ibus::current_engine).await {
                Ok(Ok(id)) => id,
                Ok(Err(e)) => {
                    debug!(error = %format!("{e:#}"), "polling current source failed");
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "source poll task panicked");
                    break;
                }
            };
            if let Some(id) = detect_change(&mut last, current) {
                if tx.send(Signal::SourceChanged(id)).is_err() {
                    break;
                }
            }
        }
    })
}
