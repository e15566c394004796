use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::Scheduler;
use crate::auth::{require_assigned_medic, require_owner, visible, Actor};
use crate::error::{ClinicError, ClinicResult};
use crate::models::{Appointment, AppointmentStatus, Role, Service, User};

/// Booking request from a medic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub patient_id: String,
    pub service_id: String,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Plan line to draw the session from
    #[serde(default)]
    pub plan_item_id: Option<String>,
}

impl Scheduler<'_> {
    /// Book an appointment.
    ///
    /// Checks run in a fixed order and the first failure aborts: interval,
    /// patient, service, plan item, then conflicts with time blocks, the
    /// patient's appointments and the medic's appointments. No session is
    /// consumed here; that happens in reconciliation once the slot has passed.
    pub fn create_appointment(
        &self,
        actor: &Actor,
        req: CreateAppointmentRequest,
        now: DateTime<Utc>,
    ) -> ClinicResult<Appointment> {
        let (start, end) = (req.scheduled_start, req.scheduled_end);
        if end <= start {
            return Err(ClinicError::invalid(
                "scheduled_end",
                "End time must be after start time",
            ));
        }
        if start < now {
            return Err(ClinicError::invalid(
                "scheduled_start",
                "Appointment cannot start in the past",
            ));
        }

        actor.require_role(&[Role::Medic])?;
        let tenant = actor.tenant()?;
        let patient = self.bookable_patient(actor, &req.patient_id)?;
        let service = self.bookable_service(actor, &req.service_id)?;
        if let Some(item_id) = req.plan_item_id.as_deref() {
            self.check_plan_item(actor, item_id, &patient, &service)?;
        }

        if self.db.medic_has_time_block(&actor.id, &start, &end)? {
            return Err(ClinicError::bad_request(
                "Selected time overlaps with a blocked period for the medic.",
            ));
        }
        if self.db.patient_has_overlap(&patient.id, &start, &end)? {
            return Err(ClinicError::bad_request(
                "Selected time overlaps with an existing appointment for the patient.",
            ));
        }
        if self.db.medic_has_overlap(&actor.id, &start, &end)? {
            return Err(ClinicError::bad_request(
                "Selected time overlaps with an existing appointment for the medic.",
            ));
        }

        let mut appt = Appointment::new(
            patient.id,
            actor.id.clone(),
            service.id,
            tenant.to_string(),
            start,
            end,
        );
        appt.notes = req.notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        appt.plan_item_id = req.plan_item_id;
        self.db.insert_appointment(&appt)?;

        info!(
            appointment_id = %appt.id,
            medic_id = %appt.medic_id,
            patient_id = %appt.patient_id,
            plan_item_id = ?appt.plan_item_id,
            start = %appt.scheduled_start,
            "Appointment scheduled"
        );
        Ok(appt)
    }

    fn bookable_patient(&self, actor: &Actor, patient_id: &str) -> ClinicResult<User> {
        let patient = visible(actor, self.db.get_user(patient_id)?, "Patient")?;
        if patient.role != Role::Patient {
            return Err(ClinicError::bad_request("Selected user is not a patient."));
        }
        if !patient.active {
            return Err(ClinicError::bad_request(
                "Cannot schedule appointment for inactive patient.",
            ));
        }
        require_assigned_medic(actor, &patient)?;
        Ok(patient)
    }

    fn bookable_service(&self, actor: &Actor, service_id: &str) -> ClinicResult<Service> {
        let service = visible(actor, self.db.get_service(service_id)?, "Service")?;
        if !service.active {
            return Err(ClinicError::bad_request(format!(
                "Cannot schedule appointment for inactive service: {}",
                service.name
            )));
        }
        Ok(service)
    }

    fn check_plan_item(
        &self,
        actor: &Actor,
        item_id: &str,
        patient: &User,
        service: &Service,
    ) -> ClinicResult<()> {
        let item = self
            .db
            .get_plan_item(item_id)?
            .ok_or_else(|| ClinicError::not_found("Plan item"))?;
        let plan = visible(actor, self.db.get_plan(&item.plan_id)?, "Plan item")?;

        if plan.patient_id != patient.id {
            return Err(ClinicError::bad_request(
                "Selected plan item does not belong to this patient.",
            ));
        }
        if !plan.is_live() {
            return Err(ClinicError::bad_request(
                "Cannot use item from an inactive or archived plan.",
            ));
        }
        if !item.is_live() {
            return Err(ClinicError::bad_request(
                "Selected plan item is inactive or archived.",
            ));
        }
        if item.service_id != service.id {
            return Err(ClinicError::bad_request(
                "Selected plan item service does not match the requested appointment service.",
            ));
        }
        if item.remaining_quantity == 0 {
            return Err(ClinicError::bad_request(format!(
                "No remaining sessions for the selected plan item: {}",
                service.name
            )));
        }
        Ok(())
    }

    /// Cancel a scheduled appointment on behalf of the medic or the patient.
    pub fn cancel_appointment(
        &self,
        actor: &Actor,
        id: &str,
        new_status: AppointmentStatus,
        reason: Option<&str>,
    ) -> ClinicResult<Appointment> {
        actor.require_role(&[Role::Medic])?;
        if !new_status.is_cancellation() {
            return Err(ClinicError::bad_request(
                "Invalid cancellation status provided. Must be CANCELLED_BY_MEDIC or CANCELLED_BY_PATIENT.",
            ));
        }
        let mut appt = visible(actor, self.db.get_appointment(id)?, "Appointment")?;
        require_owner(actor, &appt.medic_id, "appointments")?;
        if appt.status != AppointmentStatus::Scheduled {
            warn!(appointment_id = %appt.id, status = %appt.status, "Cancellation of a closed appointment");
            return Err(ClinicError::bad_request(format!(
                "Cannot cancel appointment: Current status is {}. Only SCHEDULED appointments can be cancelled.",
                appt.status
            )));
        }

        appt.status = new_status;
        if let Some(reason) = reason.filter(|r| !r.trim().is_empty()) {
            appt.append_cancellation_reason(new_status, reason);
        }
        self.db.update_appointment(&appt)?;

        info!(appointment_id = %appt.id, status = %appt.status, "Appointment cancelled");
        Ok(appt)
    }

    /// Remove a future appointment entirely.
    pub fn delete_appointment(&self, actor: &Actor, id: &str, now: DateTime<Utc>) -> ClinicResult<()> {
        actor.require_role(&[Role::Medic])?;
        let appt = visible(actor, self.db.get_appointment(id)?, "Appointment")?;
        require_owner(actor, &appt.medic_id, "appointments")?;
        if appt.scheduled_start <= now {
            return Err(ClinicError::bad_request("Cannot delete past appointments."));
        }

        self.db.delete_appointment(&appt.id)?;
        info!(appointment_id = %appt.id, "Appointment deleted");
        Ok(())
    }
}
