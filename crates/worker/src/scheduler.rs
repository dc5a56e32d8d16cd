//! The periodic control loop.
//!
//! [`Scheduler`] is the seam between "what one tick does" and "when ticks
//! happen". [`run`] drives any scheduler on a fixed interval until the
//! cancellation token fires.

use std::time::Duration;

use async_trait::async_trait;
use cadence_core::types::Timestamp;
use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::TickReport;
use crate::error::OrchestratorError;

#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Run one reap-and-dispatch pass as of `now`.
    async fn tick(&self, now: Timestamp) -> Result<TickReport, OrchestratorError>;
}

/// Tick `scheduler` every `interval` until `cancel` is triggered.
///
/// The first tick fires immediately. A failed tick is logged and the loop
/// carries on; a slow tick delays the next one instead of bunching them.
pub async fn run<S: Scheduler + ?Sized>(scheduler: &S, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        tick_interval_ms = interval.as_millis() as u64,
        "Dispatcher loop started",
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Dispatcher loop stopping");
                break;
            }
            _ = ticker.tick() => {
                match scheduler.tick(Utc::now()).await {
                    Ok(report) if report.is_idle() => {
                        tracing::trace!("Tick: nothing to do");
                    }
                    Ok(report) => {
                        tracing::debug!(
                            reaped = report.reaped.len(),
                            dispatched = report.dispatched.len(),
                            skipped = report.skipped.len(),
                            provider_errors = report.provider_errors,
                            "Tick complete",
                        );
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Tick failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use cadence_db::StoreError;

    use super::*;

    #[derive(Default)]
    struct Counting {
        ticks: AtomicUsize,
    }

    #[async_trait]
    impl Scheduler for Counting {
        async fn tick(&self, _now: Timestamp) -> Result<TickReport, OrchestratorError> {
            let n = self.ticks.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 1 {
                return Err(StoreError::NotFound(n as i64).into());
            }
            Ok(TickReport::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_ticking_through_errors_until_cancelled() {
        let scheduler = Arc::new(Counting::default());
        let cancel = CancellationToken::new();

        let handle = {
            let scheduler = Arc::clone(&scheduler);
            let cancel = cancel.clone();
            tokio::spawn(async move { run(scheduler.as_ref(), Duration::from_secs(1), cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(3500)).await;
        cancel.cancel();
        handle.await.unwrap();

        // Immediate tick plus one per elapsed second.
        assert_eq!(scheduler.ticks.load(Ordering::SeqCst), 4);
    }
}
