//! Appointments, time blocks, working hours and the merged calendar view.

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Appointment lifecycle. Every state except `Scheduled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    CancelledByPatient,
    CancelledByMedic,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "SCHEDULED",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::CancelledByPatient => "CANCELLED_BY_PATIENT",
            AppointmentStatus::CancelledByMedic => "CANCELLED_BY_MEDIC",
            AppointmentStatus::NoShow => "NO_SHOW",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SCHEDULED" => Some(AppointmentStatus::Scheduled),
            "COMPLETED" => Some(AppointmentStatus::Completed),
            "CANCELLED_BY_PATIENT" => Some(AppointmentStatus::CancelledByPatient),
            "CANCELLED_BY_MEDIC" => Some(AppointmentStatus::CancelledByMedic),
            "NO_SHOW" => Some(AppointmentStatus::NoShow),
            _ => None,
        }
    }

    /// Statuses that occupy the calendar slot.
    pub fn occupies_slot(&self) -> bool {
        matches!(self, AppointmentStatus::Scheduled | AppointmentStatus::Completed)
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::CancelledByPatient | AppointmentStatus::CancelledByMedic
        )
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AppointmentStatus::Scheduled)
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scheduled delivery of one service by a medic to a patient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: String,
    pub patient_id: String,
    pub medic_id: String,
    pub service_id: String,
    pub tenant_id: String,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub actual_start: Option<DateTime<Utc>>,
    pub actual_end: Option<DateTime<Utc>>,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    /// Plan line drawn down once the appointment has taken place
    pub plan_item_id: Option<String>,
    pub session_consumed: bool,
}

impl Appointment {
    pub fn new(
        patient_id: String,
        medic_id: String,
        service_id: String,
        tenant_id: String,
        scheduled_start: DateTime<Utc>,
        scheduled_end: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            patient_id,
            medic_id,
            service_id,
            tenant_id,
            scheduled_start,
            scheduled_end,
            actual_start: None,
            actual_end: None,
            status: AppointmentStatus::Scheduled,
            notes: None,
            plan_item_id: None,
            session_consumed: false,
        }
    }

    /// Append a cancellation reason to the notes, tagged with the new status.
    pub fn append_cancellation_reason(&mut self, status: AppointmentStatus, reason: &str) {
        let line = format!("Cancellation Reason ({}): {}", status, reason.trim());
        self.notes = Some(match self.notes.take().filter(|n| !n.trim().is_empty()) {
            Some(existing) => format!("{}\n{}", existing, line),
            None => line,
        });
    }
}

/// A medic-owned unavailable interval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeBlock {
    pub id: String,
    pub medic_id: String,
    pub tenant_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub reason: Option<String>,
}

impl TimeBlock {
    pub fn new(
        medic_id: String,
        tenant_id: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        reason: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            medic_id,
            tenant_id,
            start,
            end,
            reason,
        }
    }
}

/// Weekly working hours of a medic for one day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkingHours {
    pub id: String,
    pub medic_id: String,
    pub day_of_week: Weekday,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl WorkingHours {
    pub fn new(medic_id: String, day_of_week: Weekday, start_time: NaiveTime, end_time: NaiveTime) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            medic_id,
            day_of_week,
            start_time,
            end_time,
        }
    }
}

/// Calendar entry as exposed to the medic's calendar view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalendarEvent {
    Appointment(Appointment),
    Block(TimeBlock),
}

impl CalendarEvent {
    pub fn start(&self) -> DateTime<Utc> {
        match self {
            CalendarEvent::Appointment(a) => a.scheduled_start,
            CalendarEvent::Block(b) => b.start,
        }
    }

    pub fn end(&self) -> DateTime<Utc> {
        match self {
            CalendarEvent::Appointment(a) => a.scheduled_end,
            CalendarEvent::Block(b) => b.end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn appointment() -> Appointment {
        let start = Utc.with_ymd_and_hms(2025, 3, 3, 10, 0, 0).unwrap();
        Appointment::new(
            "p".into(),
            "m".into(),
            "s".into(),
            "t".into(),
            start,
            start + chrono::Duration::hours(1),
        )
    }

    #[test]
    fn test_status_classification() {
        assert!(AppointmentStatus::Scheduled.occupies_slot());
        assert!(AppointmentStatus::Completed.occupies_slot());
        assert!(!AppointmentStatus::NoShow.occupies_slot());
        assert!(AppointmentStatus::CancelledByMedic.is_cancellation());
        assert!(!AppointmentStatus::Completed.is_cancellation());
        assert!(!AppointmentStatus::Scheduled.is_terminal());
        assert!(AppointmentStatus::NoShow.is_terminal());
        assert_eq!(
            AppointmentStatus::parse("CANCELLED_BY_PATIENT"),
            Some(AppointmentStatus::CancelledByPatient)
        );
    }

    #[test]
    fn test_cancellation_reason_appended() {
        let mut appt = appointment();
        appt.append_cancellation_reason(AppointmentStatus::CancelledByMedic, "sick");
        assert_eq!(
            appt.notes.as_deref(),
            Some("Cancellation Reason (CANCELLED_BY_MEDIC): sick")
        );

        let mut appt = appointment();
        appt.notes = Some("Bring referral".into());
        appt.append_cancellation_reason(AppointmentStatus::CancelledByPatient, " travel ");
        assert_eq!(
            appt.notes.as_deref(),
            Some("Bring referral\nCancellation Reason (CANCELLED_BY_PATIENT): travel")
        );
    }

    #[test]
    fn test_calendar_event_tagging() {
        let event = CalendarEvent::Appointment(appointment());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "appointment");
        assert_eq!(json["status"], "SCHEDULED");

        let block = TimeBlock::new(
            "m".into(),
            "t".into(),
            event.start(),
            event.end(),
            Some("Lunch".into()),
        );
        let json = serde_json::to_value(CalendarEvent::Block(block)).unwrap();
        assert_eq!(json["kind"], "block");
        assert_eq!(json["reason"], "Lunch");
    }
}
