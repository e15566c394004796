//! Appointment database operations.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{parse_optional_timestamp, parse_timestamp, timestamp, Database, DbError, DbResult};
use crate::models::{Appointment, AppointmentStatus};

const APPOINTMENT_COLUMNS: &str = "id, patient_id, medic_id, service_id, tenant_id, \
     scheduled_start, scheduled_end, actual_start, actual_end, status, notes, \
     plan_item_id, session_consumed";

impl Database {
    /// Insert a new appointment.
    pub fn insert_appointment(&self, appt: &Appointment) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO appointments (
                id, patient_id, medic_id, service_id, tenant_id,
                scheduled_start, scheduled_end, actual_start, actual_end,
                status, notes, plan_item_id, session_consumed
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                appt.id,
                appt.patient_id,
                appt.medic_id,
                appt.service_id,
                appt.tenant_id,
                timestamp(&appt.scheduled_start),
                timestamp(&appt.scheduled_end),
                appt.actual_start.as_ref().map(timestamp),
                appt.actual_end.as_ref().map(timestamp),
                appt.status.as_str(),
                appt.notes,
                appt.plan_item_id,
                appt.session_consumed,
            ],
        )?;
        Ok(())
    }

    /// Persist status, notes and actual times of an appointment.
    pub fn update_appointment(&self, appt: &Appointment) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE appointments SET
                status = ?2,
                notes = ?3,
                actual_start = ?4,
                actual_end = ?5,
                session_consumed = ?6
            WHERE id = ?1
            "#,
            params![
                appt.id,
                appt.status.as_str(),
                appt.notes,
                appt.actual_start.as_ref().map(timestamp),
                appt.actual_end.as_ref().map(timestamp),
                appt.session_consumed,
            ],
        )?;
        Ok(rows_affected > 0)
    }

    /// Get an appointment by ID.
    pub fn get_appointment(&self, id: &str) -> DbResult<Option<Appointment>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM appointments WHERE id = ?", APPOINTMENT_COLUMNS),
                [id],
                appointment_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Hard-delete an appointment.
    pub fn delete_appointment(&self, id: &str) -> DbResult<bool> {
        let rows_affected = self
            .conn
            .execute("DELETE FROM appointments WHERE id = ?", [id])?;
        Ok(rows_affected > 0)
    }

    /// Whether the patient has a scheduled or completed appointment overlapping
    /// `[start, end)`.
    pub fn patient_has_overlap(
        &self,
        patient_id: &str,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
    ) -> DbResult<bool> {
        self.slot_taken("patient_id", patient_id, start, end)
    }

    /// Whether the medic has a scheduled or completed appointment overlapping
    /// `[start, end)`.
    pub fn medic_has_overlap(
        &self,
        medic_id: &str,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
    ) -> DbResult<bool> {
        self.slot_taken("medic_id", medic_id, start, end)
    }

    fn slot_taken(
        &self,
        column: &str,
        owner_id: &str,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
    ) -> DbResult<bool> {
        let sql = format!(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM appointments
                WHERE {} = ?1 AND status IN ('SCHEDULED', 'COMPLETED')
                  AND scheduled_start < ?3 AND scheduled_end > ?2
            )
            "#,
            column
        );
        let taken: bool = self.conn.query_row(
            &sql,
            params![owner_id, timestamp(start), timestamp(end)],
            |row| row.get(0),
        )?;
        Ok(taken)
    }

    /// Appointments of a medic overlapping `[from, to]`, ordered by start.
    pub fn list_medic_appointments(
        &self,
        medic_id: &str,
        from: &DateTime<Utc>,
        to: &DateTime<Utc>,
    ) -> DbResult<Vec<Appointment>> {
        self.query_appointments(
            &format!(
                "SELECT {} FROM appointments
                 WHERE medic_id = ?1 AND scheduled_start <= ?3 AND scheduled_end >= ?2
                 ORDER BY scheduled_start",
                APPOINTMENT_COLUMNS
            ),
            params![medic_id, timestamp(from), timestamp(to)],
        )
    }

    /// All appointments of a patient, ordered by start.
    pub fn list_patient_appointments(&self, patient_id: &str) -> DbResult<Vec<Appointment>> {
        self.query_appointments(
            &format!(
                "SELECT {} FROM appointments WHERE patient_id = ?1 ORDER BY scheduled_start",
                APPOINTMENT_COLUMNS
            ),
            params![patient_id],
        )
    }

    /// IDs of plan-linked appointments that ended by `now` and have not drawn
    /// down their session yet.
    pub fn list_unreconciled_appointment_ids(&self, now: &DateTime<Utc>) -> DbResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id FROM appointments
            WHERE scheduled_end <= ?1
              AND session_consumed = 0
              AND status IN ('SCHEDULED', 'COMPLETED')
              AND plan_item_id IS NOT NULL
            ORDER BY scheduled_end, id
            "#,
        )?;
        let rows = stmt.query_map([timestamp(now)], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Flag an appointment's session as consumed, optionally advancing a
    /// `SCHEDULED` appointment to `COMPLETED`.
    ///
    /// Guarded on `session_consumed = 0`, so a second call is a no-op and
    /// returns `false`.
    pub fn mark_session_consumed(&self, id: &str, complete: bool) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE appointments SET
                session_consumed = 1,
                status = CASE WHEN ?2 = 1 AND status = 'SCHEDULED' THEN 'COMPLETED' ELSE status END
            WHERE id = ?1 AND session_consumed = 0
            "#,
            params![id, complete],
        )?;
        Ok(rows_affected > 0)
    }

    fn query_appointments<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> DbResult<Vec<Appointment>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, appointment_row)?;

        let mut appointments = Vec::new();
        for row in rows {
            appointments.push(row?.try_into()?);
        }
        Ok(appointments)
    }
}

/// Intermediate row struct for database mapping.
struct AppointmentRow {
    id: String,
    patient_id: String,
    medic_id: String,
    service_id: String,
    tenant_id: String,
    scheduled_start: String,
    scheduled_end: String,
    actual_start: Option<String>,
    actual_end: Option<String>,
    status: String,
    notes: Option<String>,
    plan_item_id: Option<String>,
    session_consumed: bool,
}

fn appointment_row(row: &Row<'_>) -> rusqlite::Result<AppointmentRow> {
    Ok(AppointmentRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        medic_id: row.get(2)?,
        service_id: row.get(3)?,
        tenant_id: row.get(4)?,
        scheduled_start: row.get(5)?,
        scheduled_end: row.get(6)?,
        actual_start: row.get(7)?,
        actual_end: row.get(8)?,
        status: row.get(9)?,
        notes: row.get(10)?,
        plan_item_id: row.get(11)?,
        session_consumed: row.get(12)?,
    })
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = DbError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        let status = AppointmentStatus::parse(&row.status).ok_or_else(|| {
            DbError::Constraint(format!("Unknown appointment status: {}", row.status))
        })?;

        Ok(Appointment {
            id: row.id,
            patient_id: row.patient_id,
            medic_id: row.medic_id,
            service_id: row.service_id,
            tenant_id: row.tenant_id,
            scheduled_start: parse_timestamp(&row.scheduled_start)?,
            scheduled_end: parse_timestamp(&row.scheduled_end)?,
            actual_start: parse_optional_timestamp(row.actual_start)?,
            actual_end: parse_optional_timestamp(row.actual_end)?,
            status,
            notes: row.notes,
            plan_item_id: row.plan_item_id,
            session_consumed: row.session_consumed,
        })
    }
}
