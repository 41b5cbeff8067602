use std::time::Duration;

use reseller_quota_ledger::{QuotaLedger, SweepReport};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::SweeperConfig;

use super::error::SweepError;

/// Drives [`QuotaLedger::sweep`] on a fixed period.
#[derive(Clone)]
pub struct SweepScheduler {
    ledger: QuotaLedger,
    interval: Duration,
    sweep_on_startup: bool,
}

impl SweepScheduler {
    pub fn new(ledger: QuotaLedger, config: &SweeperConfig) -> Self {
        Self {
            ledger,
            interval: config.sweep_interval(),
            sweep_on_startup: config.sweep_on_startup,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs one sweep on the blocking pool; the store is synchronous.
    pub async fn run_once(&self) -> Result<SweepReport, SweepError> {
        let ledger = self.ledger.clone();
        let report = tokio::task::spawn_blocking(move || ledger.sweep()).await??;
        Ok(report)
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let first_tick = if self.sweep_on_startup {
                Instant::now()
            } else {
                Instant::now() + self.interval
            };
            let mut ticker = interval_at(first_tick, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(
                interval_secs = self.interval.as_secs(),
                sweep_on_startup = self.sweep_on_startup,
                "enforcement sweep scheduled"
            );

            loop {
                ticker.tick().await;
                match self.run_once().await {
                    Ok(report) if !report.is_clean() => {
                        warn!(
                            failures = report.failures.len(),
                            disabled_children = report.disabled_children,
                            "enforcement sweep finished with failures"
                        );
                    }
                    Ok(report) if report.disabled_children > 0 => {
                        info!(
                            exceeded_resellers = report.exceeded_resellers,
                            disabled_children = report.disabled_children,
                            "enforcement sweep suspended children"
                        );
                    }
                    Ok(report) => {
                        debug!(
                            checked_resellers = report.checked_resellers,
                            "enforcement sweep found no violations"
                        );
                    }
                    Err(err) => {
                        error!(error = %err, "enforcement sweep failed");
                    }
                }
            }
        })
    }
}
