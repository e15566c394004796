//! Background session reconciliation on a cron schedule.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::scheduling::ReconciliationReport;
use crate::Clinic;

/// Runs [`Clinic::reconcile_sessions`] at every schedule fire time until
/// shutdown is signalled.
pub struct ReconciliationWorker {
    clinic: Arc<Clinic>,
    schedule: Schedule,
}

impl ReconciliationWorker {
    pub fn new(clinic: Arc<Clinic>, schedule: Schedule) -> Self {
        Self { clinic, schedule }
    }

    /// Build from the clinic's own settings. `None` when reconciliation is
    /// disabled.
    pub fn from_settings(clinic: Arc<Clinic>) -> anyhow::Result<Option<Self>> {
        if !clinic.settings().reconciliation.enabled {
            info!("Session reconciliation disabled");
            return Ok(None);
        }
        let schedule = clinic
            .settings()
            .reconciliation_schedule()
            .context("cannot start reconciliation worker")?;
        Ok(Some(Self::new(clinic, schedule)))
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<anyhow::Result<()>> {
        tokio::spawn(self.run(shutdown))
    }

    /// Loop until `shutdown` flips to `true` or its sender is dropped. A failed
    /// pass is logged and the next fire time is awaited as usual.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!(schedule = %self.schedule, "Reconciliation worker started");
        loop {
            let Some(delay) = next_delay(&self.schedule, self.clinic.now()) else {
                info!("Reconciliation schedule has no further fire times");
                return Ok(());
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Reconciliation worker stopping");
                        return Ok(());
                    }
                    continue;
                }
            }

            if let Err(e) = self.tick().await {
                error!(error = ?e, "Reconciliation pass failed");
            }
        }
    }

    /// One pass, off the async threads.
    pub async fn tick(&self) -> anyhow::Result<ReconciliationReport> {
        let clinic = Arc::clone(&self.clinic);
        let report = tokio::task::spawn_blocking(move || clinic.reconcile_sessions())
            .await
            .context("reconciliation task aborted")?
            .context("reconciliation pass")?;
        Ok(report)
    }
}

/// Time until the next fire strictly after `now`.
pub fn next_delay(schedule: &Schedule, now: DateTime<Utc>) -> Option<Duration> {
    schedule
        .after(&now)
        .next()
        .map(|at| (at - now).to_std().unwrap_or_default())
}
