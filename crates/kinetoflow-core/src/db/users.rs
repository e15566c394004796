//! User database operations.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{parse_optional_timestamp, parse_timestamp, timestamp, Database, DbError, DbResult};
use crate::models::{Role, User};

const USER_COLUMNS: &str = "id, name, email, password_hash, role, active, tenant_id, \
     assigned_medic_id, invitation_token, invitation_expiry, created_at, updated_at";

impl Database {
    /// Insert a new user.
    pub fn insert_user(&self, user: &User) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO users (
                id, name, email, password_hash, role, active, tenant_id,
                assigned_medic_id, invitation_token, invitation_expiry,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                user.id,
                user.name,
                user.email,
                user.password_hash,
                user.role.as_str(),
                user.active,
                user.tenant_id,
                user.assigned_medic_id,
                user.invitation_token,
                user.invitation_expiry.as_ref().map(timestamp),
                timestamp(&user.created_at),
                timestamp(&user.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Update every mutable column of an existing user.
    pub fn update_user(&self, user: &User) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE users SET
                name = ?2,
                password_hash = ?3,
                role = ?4,
                active = ?5,
                tenant_id = ?6,
                assigned_medic_id = ?7,
                invitation_token = ?8,
                invitation_expiry = ?9,
                updated_at = ?10
            WHERE id = ?1
            "#,
            params![
                user.id,
                user.name,
                user.password_hash,
                user.role.as_str(),
                user.active,
                user.tenant_id,
                user.assigned_medic_id,
                user.invitation_token,
                user.invitation_expiry.as_ref().map(timestamp),
                timestamp(&user.updated_at),
            ],
        )?;
        Ok(rows_affected > 0)
    }

    /// Get a user by ID.
    pub fn get_user(&self, id: &str) -> DbResult<Option<User>> {
        self.query_user(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS), id)
    }

    /// Get a user by (normalized) email.
    pub fn get_user_by_email(&self, email: &str) -> DbResult<Option<User>> {
        self.query_user(
            &format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS),
            email,
        )
    }

    /// Get the user holding an invitation token.
    pub fn get_user_by_invitation_token(&self, token: &str) -> DbResult<Option<User>> {
        self.query_user(
            &format!("SELECT {} FROM users WHERE invitation_token = ?", USER_COLUMNS),
            token,
        )
    }

    /// List users of a company with a given role, ordered by name.
    pub fn list_users_by_role(&self, tenant_id: &str, role: Role) -> DbResult<Vec<User>> {
        self.query_users(
            &format!(
                "SELECT {} FROM users WHERE tenant_id = ?1 AND role = ?2 ORDER BY name, email",
                USER_COLUMNS
            ),
            params![tenant_id, role.as_str()],
        )
    }

    /// Active patients assigned to a medic, ordered by name.
    pub fn list_assigned_patients(&self, medic_id: &str) -> DbResult<Vec<User>> {
        self.query_users(
            &format!(
                "SELECT {} FROM users
                 WHERE assigned_medic_id = ?1 AND role = 'PATIENT' AND active = 1
                 ORDER BY name, email",
                USER_COLUMNS
            ),
            params![medic_id],
        )
    }

    /// Patients invited by a medic who have not accepted yet.
    pub fn list_pending_invites(&self, medic_id: &str) -> DbResult<Vec<User>> {
        self.query_users(
            &format!(
                "SELECT {} FROM users
                 WHERE assigned_medic_id = ?1 AND role = 'PATIENT' AND active = 0
                   AND invitation_token IS NOT NULL
                 ORDER BY name, email",
                USER_COLUMNS
            ),
            params![medic_id],
        )
    }

    /// Count users of a company by role and active flag.
    pub fn count_users(&self, tenant_id: &str, role: Role, active: bool) -> DbResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM users WHERE tenant_id = ?1 AND role = ?2 AND active = ?3",
            params![tenant_id, role.as_str(), active],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Active patients of a company with no assigned medic.
    pub fn count_unassigned_patients(&self, tenant_id: &str) -> DbResult<u64> {
        let count: i64 = self.conn.query_row(
            r#"
            SELECT COUNT(*) FROM users
            WHERE tenant_id = ?1 AND role = 'PATIENT' AND active = 1
              AND assigned_medic_id IS NULL
            "#,
            [tenant_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Clear an invitation token without touching anything else.
    pub fn clear_invitation(&self, user_id: &str, now: DateTime<Utc>) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE users SET invitation_token = NULL, invitation_expiry = NULL, updated_at = ?2
            WHERE id = ?1
            "#,
            params![user_id, timestamp(&now)],
        )?;
        Ok(rows_affected > 0)
    }

    fn query_user(&self, sql: &str, key: &str) -> DbResult<Option<User>> {
        self.conn
            .query_row(sql, [key], user_row)
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    fn query_users<P: rusqlite::Params>(&self, sql: &str, params: P) -> DbResult<Vec<User>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, user_row)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?.try_into()?);
        }
        Ok(users)
    }
}

/// Intermediate row struct for database mapping.
struct UserRow {
    id: String,
    name: String,
    email: String,
    password_hash: String,
    role: String,
    active: bool,
    tenant_id: Option<String>,
    assigned_medic_id: Option<String>,
    invitation_token: Option<String>,
    invitation_expiry: Option<String>,
    created_at: String,
    updated_at: String,
}

fn user_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        role: row.get(4)?,
        active: row.get(5)?,
        tenant_id: row.get(6)?,
        assigned_medic_id: row.get(7)?,
        invitation_token: row.get(8)?,
        invitation_expiry: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

impl TryFrom<UserRow> for User {
    type Error = DbError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = Role::parse(&row.role)
            .ok_or_else(|| DbError::Constraint(format!("Unknown role: {}", row.role)))?;

        Ok(User {
            id: row.id,
            name: row.name,
            email: row.email,
            password_hash: row.password_hash,
            role,
            active: row.active,
            tenant_id: row.tenant_id,
            assigned_medic_id: row.assigned_medic_id,
            invitation_token: row.invitation_token,
            invitation_expiry: parse_optional_timestamp(row.invitation_expiry)?,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Company;
    use chrono::Duration;

    fn setup_db() -> (Database, Company) {
        let db = Database::open_in_memory().unwrap();
        let company = Company::new("Kineto".into(), None, Utc::now());
        db.insert_company(&company).unwrap();
        (db, company)
    }

    fn user(email: &str, role: Role, tenant: &Company, active: bool) -> User {
        let mut user = User::new_invited(
            email.into(),
            role,
            Some(tenant.id.clone()),
            "hash".into(),
            Utc::now(),
        );
        user.active = active;
        user
    }

    #[test]
    fn test_insert_and_get_user() {
        let (db, company) = setup_db();
        let mut u = user("a@x.org", Role::Medic, &company, false);
        u.invitation_token = Some("tok".into());
        u.invitation_expiry = Some(Utc::now() + Duration::hours(1));
        db.insert_user(&u).unwrap();

        let by_id = db.get_user(&u.id).unwrap().unwrap();
        assert_eq!(by_id.email, "a@x.org");
        assert_eq!(by_id.role, Role::Medic);
        assert_eq!(by_id.password_hash, "hash");

        let by_email = db.get_user_by_email("a@x.org").unwrap().unwrap();
        assert_eq!(by_email.id, u.id);

        let by_token = db.get_user_by_invitation_token("tok").unwrap().unwrap();
        assert_eq!(by_token.id, u.id);

        assert!(db.get_user("missing").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let (db, company) = setup_db();
        db.insert_user(&user("a@x.org", Role::Medic, &company, true))
            .unwrap();
        assert!(db
            .insert_user(&user("a@x.org", Role::Patient, &company, true))
            .is_err());
    }

    #[test]
    fn test_update_user_and_clear_invitation() {
        let (db, company) = setup_db();
        let mut u = user("a@x.org", Role::Patient, &company, false);
        u.invitation_token = Some("tok".into());
        u.invitation_expiry = Some(Utc::now());
        db.insert_user(&u).unwrap();

        u.name = "Alice".into();
        assert!(db.update_user(&u).unwrap());
        assert_eq!(db.get_user(&u.id).unwrap().unwrap().name, "Alice");

        assert!(db.clear_invitation(&u.id, Utc::now()).unwrap());
        let cleared = db.get_user(&u.id).unwrap().unwrap();
        assert!(cleared.invitation_token.is_none());
        assert!(cleared.invitation_expiry.is_none());
        assert_eq!(cleared.name, "Alice");
    }

    #[test]
    fn test_medic_patient_lists_and_counts() {
        let (db, company) = setup_db();
        let medic = user("m@x.org", Role::Medic, &company, true);
        db.insert_user(&medic).unwrap();

        let mut bob = user("bob@x.org", Role::Patient, &company, true);
        bob.name = "Bob".into();
        bob.assigned_medic_id = Some(medic.id.clone());
        let mut ana = user("ana@x.org", Role::Patient, &company, true);
        ana.name = "Ana".into();
        ana.assigned_medic_id = Some(medic.id.clone());
        let mut pending = user("new@x.org", Role::Patient, &company, false);
        pending.assigned_medic_id = Some(medic.id.clone());
        pending.invitation_token = Some("tok".into());
        pending.invitation_expiry = Some(Utc::now());
        let loner = user("solo@x.org", Role::Patient, &company, true);

        for u in [&bob, &ana, &pending, &loner] {
            db.insert_user(u).unwrap();
        }

        let assigned = db.list_assigned_patients(&medic.id).unwrap();
        let names: Vec<_> = assigned.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["Ana", "Bob"]);

        let invites = db.list_pending_invites(&medic.id).unwrap();
        assert_eq!(invites.len(), 1);
        assert_eq!(invites[0].email, "new@x.org");

        assert_eq!(db.count_users(&company.id, Role::Patient, true).unwrap(), 3);
        assert_eq!(db.count_users(&company.id, Role::Patient, false).unwrap(), 1);
        assert_eq!(db.count_users(&company.id, Role::Medic, true).unwrap(), 1);
        assert_eq!(db.count_unassigned_patients(&company.id).unwrap(), 1);
        assert_eq!(db.list_users_by_role(&company.id, Role::Patient).unwrap().len(), 4);
    }
}
