use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use super::shutdown::Shutdown;
use crate::error::Result;
use crate::models::RunSummary;

/// Turn a requested interval in hours into a schedule period, raising it to
/// `min_hours` when it is shorter.
pub fn interval_from_hours(hours: f64, min_hours: f64) -> Duration {
    let effective = if hours.is_finite() && hours >= min_hours {
        hours
    } else {
        tracing::warn!(
            "Schedule of {}h is below the {}h minimum, using {}h",
            hours,
            min_hours,
            min_hours
        );
        min_hours
    };
    Duration::from_secs_f64(effective * 3600.0)
}

/// Re-runs a job on a fixed period, one run at a time.
///
/// Periods are measured from the start of each run. A run that outlasts the
/// period delays the next one until it finishes.
pub struct Scheduler {
    interval: Duration,
    shutdown: Shutdown,
}

impl Scheduler {
    pub fn new(interval: Duration, shutdown: Shutdown) -> Self {
        Self { interval, shutdown }
    }

    pub async fn run<F, Fut>(&mut self, mut job: F) -> Result<u32>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<RunSummary>>,
    {
        let mut runs = 0;
        loop {
            let started = Instant::now();
            runs += 1;
            match job().await {
                Ok(summary) => {
                    tracing::debug!("Scheduled run {} attempted {} pairs", runs, summary.attempted())
                }
                Err(e) if !e.is_fatal() => {
                    tracing::warn!("Scheduled run {} failed, will retry next period: {}", runs, e)
                }
                Err(e) => return Err(e),
            }

            if self.shutdown.is_triggered() {
                break;
            }

            let next = started + self.interval;
            let now = Instant::now();
            if now >= next {
                tracing::warn!("Run outlasted the schedule period, starting the next one now");
                continue;
            }
            tracing::info!(
                "Next run in {} minutes",
                (next - now).as_secs().div_ceil(60)
            );
            if self.shutdown.sleep(next - now).await {
                break;
            }
        }
        tracing::info!("Scheduler stopped after {} runs", runs);
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RedeemError;
    use crate::redeem::shutdown;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn short_intervals_are_raised_to_the_floor() {
        assert_eq!(interval_from_hours(1.0, 2.0), Duration::from_secs(7200));
        assert_eq!(interval_from_hours(3.5, 2.0), Duration::from_secs(12600));
        assert_eq!(interval_from_hours(f64::NAN, 2.0), Duration::from_secs(7200));
    }

    #[tokio::test]
    async fn runs_never_overlap_and_stop_on_interrupt() {
        let (trigger, shutdown) = shutdown::channel();
        let trigger = Arc::new(trigger);
        let running = Arc::new(AtomicBool::new(false));
        let count = Arc::new(AtomicU32::new(0));

        let mut scheduler = Scheduler::new(Duration::from_millis(1), shutdown);
        let runs = scheduler
            .run(|| {
                let (running, count, trigger) = (running.clone(), count.clone(), trigger.clone());
                async move {
                    assert!(!running.swap(true, Ordering::SeqCst), "runs overlapped");
                    // Outlast the period so the next run is deferred, not stacked.
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    if count.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                        trigger.trigger();
                    }
                    running.store(false, Ordering::SeqCst);
                    Ok(RunSummary::default())
                }
            })
            .await
            .unwrap();

        assert_eq!(runs, 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn transient_failures_keep_the_schedule_alive() {
        let (trigger, shutdown) = shutdown::channel();
        let trigger = Arc::new(trigger);
        let count = Arc::new(AtomicU32::new(0));

        let runs = Scheduler::new(Duration::from_millis(1), shutdown)
            .run(|| {
                let (count, trigger) = (count.clone(), trigger.clone());
                async move {
                    if count.fetch_add(1, Ordering::SeqCst) == 0 {
                        return Err(RedeemError::Feed("feed offline".into()));
                    }
                    trigger.trigger();
                    Ok(RunSummary::default())
                }
            })
            .await
            .unwrap();
        assert_eq!(runs, 2);

        let (_trigger, shutdown) = shutdown::channel();
        let fatal = Scheduler::new(Duration::from_millis(1), shutdown)
            .run(|| async { Err::<RunSummary, _>(RedeemError::StoreCorrupt("bad".into())) })
            .await;
        assert!(matches!(fatal, Err(RedeemError::StoreCorrupt(_))));
    }
}
