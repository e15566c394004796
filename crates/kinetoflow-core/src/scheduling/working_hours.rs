use chrono::{NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::Scheduler;
use crate::auth::Actor;
use crate::error::{ClinicError, ClinicResult};
use crate::models::{Role, WorkingHours};

/// Hours for one day of the week.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingHoursRequest {
    pub day_of_week: Weekday,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

/// Hours are stored with second precision.
fn whole_seconds(t: NaiveTime) -> NaiveTime {
    t.with_nanosecond(0).unwrap_or(t)
}

impl WorkingHoursRequest {
    /// Truncate both times to whole seconds, then check their order.
    fn validated(self) -> ClinicResult<Self> {
        let req = Self {
            start_time: whole_seconds(self.start_time),
            end_time: whole_seconds(self.end_time),
            ..self
        };
        if req.start_time < req.end_time {
            Ok(req)
        } else {
            Err(ClinicError::invalid(
                "end_time",
                format!("End time must be after start time for {}", req.day_of_week),
            ))
        }
    }
}

impl Scheduler<'_> {
    /// Set the hours of one day, replacing any previous value.
    pub fn set_working_hours_day(
        &self,
        actor: &Actor,
        req: WorkingHoursRequest,
    ) -> ClinicResult<WorkingHours> {
        actor.require_role(&[Role::Medic])?;
        let req = req.validated()?;

        self.db.upsert_working_hours(&WorkingHours::new(
            actor.id.clone(),
            req.day_of_week,
            req.start_time,
            req.end_time,
        ))?;
        info!(medic_id = %actor.id, day = %req.day_of_week, "Working hours set");

        self.db
            .list_working_hours(&actor.id)?
            .into_iter()
            .find(|h| h.day_of_week == req.day_of_week)
            .ok_or_else(|| ClinicError::not_found("Working hours"))
    }

    /// Replace the whole week. Days absent from `days` end up without hours.
    pub fn set_working_hours_bulk(
        &self,
        actor: &Actor,
        days: Vec<WorkingHoursRequest>,
    ) -> ClinicResult<Vec<WorkingHours>> {
        actor.require_role(&[Role::Medic])?;
        let days = days
            .into_iter()
            .map(WorkingHoursRequest::validated)
            .collect::<ClinicResult<Vec<_>>>()?;

        let cleared = self.db.clear_working_hours(&actor.id)?;
        for day in &days {
            self.db.upsert_working_hours(&WorkingHours::new(
                actor.id.clone(),
                day.day_of_week,
                day.start_time,
                day.end_time,
            ))?;
        }
        info!(medic_id = %actor.id, cleared, days = days.len(), "Working hours replaced");
        Ok(self.db.list_working_hours(&actor.id)?)
    }

    pub fn get_working_hours(&self, actor: &Actor) -> ClinicResult<Vec<WorkingHours>> {
        actor.require_role(&[Role::Medic])?;
        Ok(self.db.list_working_hours(&actor.id)?)
    }

    pub fn delete_working_hours_day(&self, actor: &Actor, day: Weekday) -> ClinicResult<()> {
        actor.require_role(&[Role::Medic])?;
        if !self.db.delete_working_hours_day(&actor.id, day)? {
            return Err(ClinicError::not_found("Working hours"));
        }
        info!(medic_id = %actor.id, day = %day, "Working hours removed");
        Ok(())
    }

    /// Remove every day. Returns how many days were cleared.
    pub fn clear_working_hours(&self, actor: &Actor) -> ClinicResult<usize> {
        actor.require_role(&[Role::Medic])?;
        let cleared = self.db.clear_working_hours(&actor.id)?;
        info!(medic_id = %actor.id, cleared, "Working hours cleared");
        Ok(cleared)
    }
}
