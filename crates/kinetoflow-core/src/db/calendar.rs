//! Time block and working hours database operations.

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use rusqlite::{params, OptionalExtension, Row};

use super::{parse_timestamp, timestamp, Database, DbError, DbResult};
use crate::models::{TimeBlock, WorkingHours};

const TIME_OF_DAY: &str = "%H:%M:%S";

impl Database {
    // =========================================================================
    // Time blocks
    // =========================================================================

    /// Insert a new time block.
    pub fn insert_time_block(&self, block: &TimeBlock) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO time_blocks (id, medic_id, tenant_id, start_time, end_time, reason)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                block.id,
                block.medic_id,
                block.tenant_id,
                timestamp(&block.start),
                timestamp(&block.end),
                block.reason,
            ],
        )?;
        Ok(())
    }

    /// Get a time block by ID.
    pub fn get_time_block(&self, id: &str) -> DbResult<Option<TimeBlock>> {
        self.conn
            .query_row(
                "SELECT id, medic_id, tenant_id, start_time, end_time, reason FROM time_blocks WHERE id = ?",
                [id],
                time_block_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Delete a time block.
    pub fn delete_time_block(&self, id: &str) -> DbResult<bool> {
        let rows_affected = self
            .conn
            .execute("DELETE FROM time_blocks WHERE id = ?", [id])?;
        Ok(rows_affected > 0)
    }

    /// Whether any time block of the medic overlaps `[start, end)`.
    pub fn medic_has_time_block(
        &self,
        medic_id: &str,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
    ) -> DbResult<bool> {
        let blocked: bool = self.conn.query_row(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM time_blocks
                WHERE medic_id = ?1 AND start_time < ?3 AND end_time > ?2
            )
            "#,
            params![medic_id, timestamp(start), timestamp(end)],
            |row| row.get(0),
        )?;
        Ok(blocked)
    }

    /// Time blocks of a medic overlapping `[from, to]`, ordered by start.
    pub fn list_time_blocks(
        &self,
        medic_id: &str,
        from: &DateTime<Utc>,
        to: &DateTime<Utc>,
    ) -> DbResult<Vec<TimeBlock>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, medic_id, tenant_id, start_time, end_time, reason FROM time_blocks
            WHERE medic_id = ?1 AND start_time <= ?3 AND end_time >= ?2
            ORDER BY start_time
            "#,
        )?;
        let rows = stmt.query_map(
            params![medic_id, timestamp(from), timestamp(to)],
            time_block_row,
        )?;

        let mut blocks = Vec::new();
        for row in rows {
            blocks.push(row?.try_into()?);
        }
        Ok(blocks)
    }

    // =========================================================================
    // Working hours
    // =========================================================================

    /// Insert or replace the working hours of a medic for one day.
    pub fn upsert_working_hours(&self, hours: &WorkingHours) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO working_hours (id, medic_id, day_of_week, start_time, end_time)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (medic_id, day_of_week) DO UPDATE SET
                start_time = excluded.start_time,
                end_time = excluded.end_time
            "#,
            params![
                hours.id,
                hours.medic_id,
                weekday_to_str(hours.day_of_week),
                hours.start_time.format(TIME_OF_DAY).to_string(),
                hours.end_time.format(TIME_OF_DAY).to_string(),
            ],
        )?;
        Ok(())
    }

    /// Working hours of a medic, Monday first.
    pub fn list_working_hours(&self, medic_id: &str) -> DbResult<Vec<WorkingHours>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, medic_id, day_of_week, start_time, end_time FROM working_hours WHERE medic_id = ?",
        )?;
        let rows = stmt.query_map([medic_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut hours = Vec::new();
        for row in rows {
            let (id, medic_id, day, start, end) = row?;
            hours.push(WorkingHours {
                id,
                medic_id,
                day_of_week: str_to_weekday(&day)?,
                start_time: parse_time_of_day(&start)?,
                end_time: parse_time_of_day(&end)?,
            });
        }
        hours.sort_by_key(|h| h.day_of_week.num_days_from_monday());
        Ok(hours)
    }

    /// Remove the working hours of one day.
    pub fn delete_working_hours_day(&self, medic_id: &str, day: Weekday) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "DELETE FROM working_hours WHERE medic_id = ?1 AND day_of_week = ?2",
            params![medic_id, weekday_to_str(day)],
        )?;
        Ok(rows_affected > 0)
    }

    /// Remove every working hours row of a medic.
    pub fn clear_working_hours(&self, medic_id: &str) -> DbResult<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM working_hours WHERE medic_id = ?", [medic_id])?)
    }
}

/// Intermediate row struct for database mapping.
struct TimeBlockRow {
    id: String,
    medic_id: String,
    tenant_id: String,
    start: String,
    end: String,
    reason: Option<String>,
}

fn time_block_row(row: &Row<'_>) -> rusqlite::Result<TimeBlockRow> {
    Ok(TimeBlockRow {
        id: row.get(0)?,
        medic_id: row.get(1)?,
        tenant_id: row.get(2)?,
        start: row.get(3)?,
        end: row.get(4)?,
        reason: row.get(5)?,
    })
}

impl TryFrom<TimeBlockRow> for TimeBlock {
    type Error = DbError;

    fn try_from(row: TimeBlockRow) -> Result<Self, Self::Error> {
        Ok(TimeBlock {
            id: row.id,
            medic_id: row.medic_id,
            tenant_id: row.tenant_id,
            start: parse_timestamp(&row.start)?,
            end: parse_timestamp(&row.end)?,
            reason: row.reason,
        })
    }
}

fn weekday_to_str(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MONDAY",
        Weekday::Tue => "TUESDAY",
        Weekday::Wed => "WEDNESDAY",
        Weekday::Thu => "THURSDAY",
        Weekday::Fri => "FRIDAY",
        Weekday::Sat => "SATURDAY",
        Weekday::Sun => "SUNDAY",
    }
}

fn str_to_weekday(s: &str) -> Result<Weekday, DbError> {
    match s {
        "MONDAY" => Ok(Weekday::Mon),
        "TUESDAY" => Ok(Weekday::Tue),
        "WEDNESDAY" => Ok(Weekday::Wed),
        "THURSDAY" => Ok(Weekday::Thu),
        "FRIDAY" => Ok(Weekday::Fri),
        "SATURDAY" => Ok(Weekday::Sat),
        "SUNDAY" => Ok(Weekday::Sun),
        _ => Err(DbError::Constraint(format!("Unknown day of week: {}", s))),
    }
}

fn parse_time_of_day(s: &str) -> DbResult<NaiveTime> {
    Ok(NaiveTime::parse_from_str(s, TIME_OF_DAY)?)
}
