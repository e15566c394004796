//! Patient plan database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{parse_optional_timestamp, parse_timestamp, timestamp, Database, DbError, DbResult};
use crate::models::{Plan, PlanItem};

const PLAN_COLUMNS: &str = "id, patient_id, assigned_by_id, tenant_id, originating_package_id, \
     active, archived, assigned_at, expiry, notes";

const PLAN_ITEM_COLUMNS: &str = "id, plan_id, service_id, total_quantity, remaining_quantity, \
     price_per_unit, item_active, archived";

impl Database {
    /// Insert a new plan together with its items.
    pub fn insert_plan(&self, plan: &Plan) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO plans (
                id, patient_id, assigned_by_id, tenant_id, originating_package_id,
                active, archived, assigned_at, expiry, notes
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                plan.id,
                plan.patient_id,
                plan.assigned_by_id,
                plan.tenant_id,
                plan.originating_package_id,
                plan.active,
                plan.archived,
                timestamp(&plan.assigned_at),
                plan.expiry.as_ref().map(timestamp),
                plan.notes,
            ],
        )?;
        for item in &plan.items {
            self.insert_plan_item(item)?;
        }
        Ok(())
    }

    /// Persist the active/archived flags of a plan and every one of its items.
    pub fn save_plan_state(&self, plan: &Plan) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE plans SET active = ?2, archived = ?3 WHERE id = ?1",
            params![plan.id, plan.active, plan.archived],
        )?;
        for item in &plan.items {
            self.update_plan_item(item)?;
        }
        Ok(rows_affected > 0)
    }

    /// Get a plan with its items.
    pub fn get_plan(&self, id: &str) -> DbResult<Option<Plan>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM plans WHERE id = ?", PLAN_COLUMNS),
                [id],
                plan_row,
            )
            .optional()?;

        match row {
            Some(row) => {
                let mut plan: Plan = row.try_into()?;
                plan.items = self.list_plan_items(&plan.id)?;
                Ok(Some(plan))
            }
            None => Ok(None),
        }
    }

    /// Plans of a patient, newest first.
    pub fn list_plans_for_patient(
        &self,
        patient_id: &str,
        include_archived: bool,
    ) -> DbResult<Vec<Plan>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM plans WHERE patient_id = ?1 AND (?2 = 1 OR archived = 0)
             ORDER BY assigned_at DESC, rowid DESC",
            PLAN_COLUMNS
        ))?;
        let rows = stmt.query_map(params![patient_id, include_archived], plan_row)?;

        let mut plans = Vec::new();
        for row in rows {
            let mut plan: Plan = row?.try_into()?;
            plan.items = self.list_plan_items(&plan.id)?;
            plans.push(plan);
        }
        Ok(plans)
    }

    /// Insert one plan item.
    pub fn insert_plan_item(&self, item: &PlanItem) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO plan_items (
                id, plan_id, service_id, total_quantity, remaining_quantity,
                price_per_unit, item_active, archived
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                item.id,
                item.plan_id,
                item.service_id,
                item.total_quantity,
                item.remaining_quantity,
                item.price_per_unit,
                item.item_active,
                item.archived,
            ],
        )?;
        Ok(())
    }

    /// Persist quantities and flags of a plan item.
    pub fn update_plan_item(&self, item: &PlanItem) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE plan_items SET
                total_quantity = ?2,
                remaining_quantity = ?3,
                item_active = ?4,
                archived = ?5
            WHERE id = ?1
            "#,
            params![
                item.id,
                item.total_quantity,
                item.remaining_quantity,
                item.item_active,
                item.archived,
            ],
        )?;
        Ok(rows_affected > 0)
    }

    /// Get a plan item by ID.
    pub fn get_plan_item(&self, id: &str) -> DbResult<Option<PlanItem>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM plan_items WHERE id = ?", PLAN_ITEM_COLUMNS),
                [id],
                plan_item_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Items of a plan, in insertion order.
    pub fn list_plan_items(&self, plan_id: &str) -> DbResult<Vec<PlanItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM plan_items WHERE plan_id = ? ORDER BY rowid",
            PLAN_ITEM_COLUMNS
        ))?;
        let rows = stmt.query_map([plan_id], plan_item_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Take one session from a plan item.
    ///
    /// Only succeeds while the item and its plan are active, not archived and
    /// the item has sessions left. Returns whether a session was taken.
    pub fn consume_plan_session(&self, item_id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE plan_items SET remaining_quantity = remaining_quantity - 1
            WHERE id = ?1
              AND remaining_quantity > 0
              AND item_active = 1
              AND archived = 0
              AND EXISTS (
                  SELECT 1 FROM plans p
                  WHERE p.id = plan_items.plan_id AND p.active = 1 AND p.archived = 0
              )
            "#,
            [item_id],
        )?;
        Ok(rows_affected > 0)
    }

    /// Subset of `service_ids` that are inactive or no longer exist.
    pub fn inactive_service_ids(&self, service_ids: &[String]) -> DbResult<Vec<String>> {
        let mut inactive = Vec::new();
        let mut stmt = self
            .conn
            .prepare("SELECT active FROM services WHERE id = ?")?;
        for id in service_ids {
            let active: Option<bool> = stmt.query_row([id], |row| row.get(0)).optional()?;
            if active != Some(true) {
                inactive.push(id.clone());
            }
        }
        Ok(inactive)
    }
}

/// Intermediate row struct for database mapping.
struct PlanRow {
    id: String,
    patient_id: String,
    assigned_by_id: String,
    tenant_id: String,
    originating_package_id: Option<String>,
    active: bool,
    archived: bool,
    assigned_at: String,
    expiry: Option<String>,
    notes: Option<String>,
}

fn plan_row(row: &Row<'_>) -> rusqlite::Result<PlanRow> {
    Ok(PlanRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        assigned_by_id: row.get(2)?,
        tenant_id: row.get(3)?,
        originating_package_id: row.get(4)?,
        active: row.get(5)?,
        archived: row.get(6)?,
        assigned_at: row.get(7)?,
        expiry: row.get(8)?,
        notes: row.get(9)?,
    })
}

fn plan_item_row(row: &Row<'_>) -> rusqlite::Result<PlanItem> {
    Ok(PlanItem {
        id: row.get(0)?,
        plan_id: row.get(1)?,
        service_id: row.get(2)?,
        total_quantity: row.get(3)?,
        remaining_quantity: row.get(4)?,
        price_per_unit: row.get(5)?,
        item_active: row.get(6)?,
        archived: row.get(7)?,
    })
}

impl TryFrom<PlanRow> for Plan {
    type Error = DbError;

    fn try_from(row: PlanRow) -> Result<Self, Self::Error> {
        Ok(Plan {
            id: row.id,
            patient_id: row.patient_id,
            assigned_by_id: row.assigned_by_id,
            tenant_id: row.tenant_id,
            originating_package_id: row.originating_package_id,
            active: row.active,
            archived: row.archived,
            assigned_at: parse_timestamp(&row.assigned_at)?,
            expiry: parse_optional_timestamp(row.expiry)?,
            notes: row.notes,
            items: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Company, Role, Service, User};
    use chrono::{Duration, Utc};

    struct Fixture {
        db: Database,
        patient: User,
        service: Service,
    }

    fn setup_db() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let company = Company::new("Kineto".into(), None, Utc::now());
        db.insert_company(&company).unwrap();

        let mut patient = User::new_invited(
            "p@x.org".into(),
            Role::Patient,
            Some(company.id.clone()),
            "h".into(),
            Utc::now(),
        );
        patient.active = true;
        db.insert_user(&patient).unwrap();

        let service = Service::new(company.id.clone(), "Massage".into(), 60);
        db.insert_service(&service).unwrap();

        Fixture {
            db,
            patient,
            service,
        }
    }

    fn plan(f: &Fixture, quantity: u32) -> Plan {
        let mut plan = Plan::new(
            f.patient.id.clone(),
            f.patient.id.clone(),
            f.service.tenant_id.clone(),
            Utc::now(),
        );
        plan.add_item(f.service.id.clone(), quantity, Some(120.0));
        plan
    }

    #[test]
    fn test_insert_and_get_plan() {
        let f = setup_db();
        let mut p = plan(&f, 3);
        p.expiry = Some(Utc::now() + Duration::days(30));
        p.notes = Some("Post-op knee".into());
        f.db.insert_plan(&p).unwrap();

        let loaded = f.db.get_plan(&p.id).unwrap().unwrap();
        assert_eq!(loaded.items.len(), 1);
        assert_eq!(loaded.items[0].remaining_quantity, 3);
        assert_eq!(loaded.notes.as_deref(), Some("Post-op knee"));
        assert!(loaded.expiry.is_some());
    }

    #[test]
    fn test_consume_session_until_exhausted() {
        let f = setup_db();
        let p = plan(&f, 2);
        f.db.insert_plan(&p).unwrap();
        let item_id = &p.items[0].id;

        assert!(f.db.consume_plan_session(item_id).unwrap());
        assert!(f.db.consume_plan_session(item_id).unwrap());
        assert!(!f.db.consume_plan_session(item_id).unwrap());
        assert_eq!(
            f.db.get_plan_item(item_id).unwrap().unwrap().remaining_quantity,
            0
        );
    }

    #[test]
    fn test_consume_session_requires_live_plan() {
        let f = setup_db();
        let mut p = plan(&f, 2);
        f.db.insert_plan(&p).unwrap();

        p.active = false;
        f.db.save_plan_state(&p).unwrap();
        assert!(!f.db.consume_plan_session(&p.items[0].id).unwrap());

        p.archive();
        f.db.save_plan_state(&p).unwrap();
        let item = f.db.get_plan_item(&p.items[0].id).unwrap().unwrap();
        assert!(item.archived && !item.item_active);
        assert!(!f.db.consume_plan_session(&item.id).unwrap());
        assert_eq!(item.remaining_quantity, 2);
    }

    #[test]
    fn test_list_plans_hides_archived() {
        let f = setup_db();
        let first = plan(&f, 1);
        f.db.insert_plan(&first).unwrap();
        let mut second = plan(&f, 1);
        second.assigned_at = first.assigned_at + Duration::minutes(1);
        f.db.insert_plan(&second).unwrap();

        let plans = f.db.list_plans_for_patient(&f.patient.id, false).unwrap();
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].id, second.id);

        second.archive();
        f.db.save_plan_state(&second).unwrap();
        assert_eq!(
            f.db.list_plans_for_patient(&f.patient.id, false).unwrap().len(),
            1
        );
        assert_eq!(
            f.db.list_plans_for_patient(&f.patient.id, true).unwrap().len(),
            2
        );
    }

    #[test]
    fn test_inactive_service_ids() {
        let f = setup_db();
        f.db.set_service_active(&f.service.id, false).unwrap();
        let ids = vec![f.service.id.clone(), "missing".to_string()];
        assert_eq!(f.db.inactive_service_ids(&ids).unwrap(), ids);
    }
}
