//! Retroactive session consumption.
//!
//! Once a plan-linked appointment has ended, one session is taken from its
//! plan item and the appointment is marked as consumed so that it is never
//! processed again. Each appointment is handled in its own unit of work.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::db::{Database, DbError};

/// Outcome of a single reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    /// Candidates found by the scan
    pub scanned: usize,
    /// Sessions taken from a plan item
    pub consumed: usize,
    /// Marked consumed without taking a session (item exhausted or not live)
    pub skipped: usize,
    /// Left untouched because of an error; retried on the next run
    pub failed: usize,
}

enum Outcome {
    Consumed,
    Skipped,
    AlreadyDone,
}

pub struct Reconciler<'a> {
    db: &'a Database,
}

impl<'a> Reconciler<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Process every plan-linked appointment that ended at or before `now`.
    pub fn run(&self, now: DateTime<Utc>) -> Result<ReconciliationReport, DbError> {
        let ids = self.db.list_unreconciled_appointment_ids(&now)?;
        let mut report = ReconciliationReport {
            scanned: ids.len(),
            ..Default::default()
        };

        for id in &ids {
            match self.db.unit_of_work(|db| reconcile_one(db, id)) {
                Ok(Outcome::Consumed) => report.consumed += 1,
                Ok(Outcome::Skipped) => report.skipped += 1,
                Ok(Outcome::AlreadyDone) => {}
                Err(e) => {
                    error!(appointment_id = %id, error = %e, "Reconciliation failed");
                    report.failed += 1;
                }
            }
        }

        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                consumed = report.consumed,
                skipped = report.skipped,
                failed = report.failed,
                "Reconciliation finished"
            );
        } else {
            debug!("Nothing to reconcile");
        }
        Ok(report)
    }
}

fn reconcile_one(db: &Database, id: &str) -> Result<Outcome, DbError> {
    // Re-read inside the transaction; another worker may have got here first.
    let Some(appt) = db.get_appointment(id)? else {
        return Ok(Outcome::AlreadyDone);
    };
    let Some(item_id) = appt.plan_item_id.as_deref() else {
        return Ok(Outcome::AlreadyDone);
    };
    if appt.session_consumed || !appt.status.occupies_slot() {
        return Ok(Outcome::AlreadyDone);
    }

    if db.consume_plan_session(item_id)? {
        db.mark_session_consumed(&appt.id, true)?;
        debug!(appointment_id = %appt.id, item_id, "Session consumed");
        Ok(Outcome::Consumed)
    } else {
        warn!(
            appointment_id = %appt.id,
            item_id,
            "Plan item exhausted or not live; marking appointment consumed without a session"
        );
        db.mark_session_consumed(&appt.id, false)?;
        Ok(Outcome::Skipped)
    }
}
