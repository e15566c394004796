use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::Scheduler;
use crate::auth::{require_owner, visible, Actor};
use crate::error::{ClinicError, ClinicResult};
use crate::models::{CalendarEvent, Role, TimeBlock};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeBlockRequest {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl Scheduler<'_> {
    /// Block out time in the medic's own calendar.
    ///
    /// Existing appointments are not checked; blocks only constrain later
    /// bookings. Blocks may overlap each other.
    pub fn create_time_block(&self, actor: &Actor, req: TimeBlockRequest) -> ClinicResult<TimeBlock> {
        actor.require_role(&[Role::Medic])?;
        let tenant = actor.tenant()?;
        if req.end <= req.start {
            return Err(ClinicError::invalid("end", "End time must be after start time"));
        }
        let reason = req.reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
        let block = TimeBlock::new(actor.id.clone(), tenant.to_string(), req.start, req.end, reason);
        self.db.insert_time_block(&block)?;

        info!(block_id = %block.id, medic_id = %block.medic_id, start = %block.start, "Time block created");
        Ok(block)
    }

    pub fn delete_time_block(&self, actor: &Actor, id: &str) -> ClinicResult<()> {
        actor.require_role(&[Role::Medic])?;
        let block = visible(actor, self.db.get_time_block(id)?, "Time block")?;
        require_owner(actor, &block.medic_id, "time blocks")?;

        self.db.delete_time_block(&block.id)?;
        info!(block_id = %block.id, "Time block deleted");
        Ok(())
    }

    /// Appointments and time blocks of the medic touching `[from, to]`,
    /// ordered by start.
    pub fn calendar_events(
        &self,
        actor: &Actor,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ClinicResult<Vec<CalendarEvent>> {
        actor.require_role(&[Role::Medic])?;
        actor.tenant()?;
        if from > to {
            return Err(ClinicError::bad_request("Invalid date range provided."));
        }

        let appointments = self.db.list_medic_appointments(&actor.id, &from, &to)?;
        let blocks = self.db.list_time_blocks(&actor.id, &from, &to)?;
        debug!(
            medic_id = %actor.id,
            appointments = appointments.len(),
            blocks = blocks.len(),
            "Calendar loaded"
        );

        let mut events: Vec<CalendarEvent> = appointments
            .into_iter()
            .map(CalendarEvent::Appointment)
            .chain(blocks.into_iter().map(CalendarEvent::Block))
            .collect();
        events.sort_by_key(|e| e.start());
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{Appointment, AppointmentStatus, Company, User};
    use chrono::TimeZone;

    fn monday(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 3, hour, 0, 0).unwrap()
    }

    fn setup_db() -> (Database, Actor, Actor, String) {
        let db = Database::open_in_memory().unwrap();
        let company = Company::new("Kineto".into(), None, monday(0));
        db.insert_company(&company).unwrap();

        let mut actors = Vec::new();
        for email in ["m@x.org", "o@x.org"] {
            let mut u = User::new_invited(
                email.into(),
                Role::Medic,
                Some(company.id.clone()),
                "h".into(),
                monday(0),
            );
            u.active = true;
            db.insert_user(&u).unwrap();
            actors.push(Actor::from(&u));
        }
        let other = actors.pop().unwrap();
        let medic = actors.pop().unwrap();
        (db, medic, other, company.id)
    }

    fn block_req(start: u32, end: u32) -> TimeBlockRequest {
        TimeBlockRequest {
            start: monday(start),
            end: monday(end),
            reason: Some("  lunch ".into()),
        }
    }

    fn seed_appointment(db: &Database, medic: &Actor, tenant: &str, start: u32, end: u32) -> Appointment {
        let mut patient = User::new_invited(
            format!("p{}@x.org", start),
            Role::Patient,
            Some(tenant.into()),
            "h".into(),
            monday(0),
        );
        patient.active = true;
        patient.assigned_medic_id = Some(medic.id.clone());
        db.insert_user(&patient).unwrap();
        let service = crate::models::Service::new(tenant.into(), format!("S{}", start), 60);
        db.insert_service(&service).unwrap();

        let appt = Appointment::new(
            patient.id,
            medic.id.clone(),
            service.id,
            tenant.into(),
            monday(start),
            monday(end),
        );
        db.insert_appointment(&appt).unwrap();
        appt
    }

    #[test]
    fn test_create_and_delete_block() {
        let (db, medic, other, _) = setup_db();
        let s = Scheduler::new(&db);

        let block = s.create_time_block(&medic, block_req(12, 13)).unwrap();
        assert_eq!(block.reason.as_deref(), Some("lunch"));

        // Blocks may overlap each other
        assert!(s.create_time_block(&medic, block_req(12, 14)).is_ok());

        assert_eq!(
            s.delete_time_block(&other, &block.id),
            Err(ClinicError::forbidden("You can only manage your own time blocks"))
        );
        s.delete_time_block(&medic, &block.id).unwrap();
        assert_eq!(
            s.delete_time_block(&medic, &block.id),
            Err(ClinicError::not_found("Time block"))
        );
    }

    #[test]
    fn test_block_over_scheduled_appointment_is_accepted() {
        let (db, medic, _, tenant) = setup_db();
        let appt = seed_appointment(&db, &medic, &tenant, 10, 11);
        let s = Scheduler::new(&db);

        let block = s.create_time_block(&medic, block_req(10, 12)).unwrap();
        assert_eq!((block.start, block.end), (monday(10), monday(12)));

        // The appointment is untouched and both show up in the calendar.
        let events = s.calendar_events(&medic, monday(9), monday(13)).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], CalendarEvent::Appointment(a) if a.id == appt.id));
        assert!(matches!(&events[1], CalendarEvent::Block(b) if b.id == block.id));
        let kept = db.get_appointment(&appt.id).unwrap().unwrap();
        assert_eq!(kept.status, AppointmentStatus::Scheduled);
    }

    #[test]
    fn test_calendar_merges_and_sorts() {
        let (db, medic, other, tenant) = setup_db();
        seed_appointment(&db, &medic, &tenant, 10, 11);
        seed_appointment(&db, &other, &tenant, 9, 10);
        let s = Scheduler::new(&db);
        s.create_time_block(&medic, block_req(8, 9)).unwrap();
        s.create_time_block(&medic, block_req(14, 15)).unwrap();

        let events = s.calendar_events(&medic, monday(8), monday(12)).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], CalendarEvent::Block(_)));
        assert!(matches!(events[1], CalendarEvent::Appointment(_)));
        assert!(events.windows(2).all(|w| w[0].start() <= w[1].start()));

        let json = serde_json::to_value(&events[0]).unwrap();
        assert_eq!(json["kind"], "block");

        assert_eq!(
            s.calendar_events(&medic, monday(12), monday(8)),
            Err(ClinicError::bad_request("Invalid date range provided."))
        );
    }
}
