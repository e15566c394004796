//! Identity store: sign-in, companies and user administration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::{visible, Actor, PasswordHasher, TokenSigner};
use crate::db::Database;
use crate::error::{ClinicError, ClinicResult, Violations};
use crate::models::{Company, Role, User};

const INVALID_CREDENTIALS: &str = "Invalid email or password";
const INVALID_TOKEN: &str = "Invalid or expired token";

/// Result of a successful sign-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyRequest {
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
}

pub struct Directory<'a> {
    db: &'a Database,
    hasher: &'a dyn PasswordHasher,
}

impl<'a> Directory<'a> {
    pub fn new(db: &'a Database, hasher: &'a dyn PasswordHasher) -> Self {
        Self { db, hasher }
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    /// Check credentials and issue a bearer token.
    pub fn login(
        &self,
        signer: &TokenSigner,
        email: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> ClinicResult<LoginResponse> {
        let email = email.trim().to_lowercase();
        let user = match self.db.get_user_by_email(&email)? {
            Some(user) if user.active && self.hasher.verify(password, &user.password_hash) => user,
            _ => {
                warn!(email = %email, "Failed sign-in");
                return Err(ClinicError::Unauthenticated(INVALID_CREDENTIALS.into()));
            }
        };

        let token = signer.issue(&user, now).map_err(|e| {
            warn!(error = %e, "Token issuance failed");
            ClinicError::Internal("An unexpected error occurred".into())
        })?;
        info!(user_id = %user.id, role = %user.role, "Signed in");
        Ok(LoginResponse {
            token,
            user_id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            tenant_id: user.tenant_id,
        })
    }

    /// Resolve a bearer token to the current state of its user.
    pub fn authenticate(&self, signer: &TokenSigner, bearer: &str, now: DateTime<Utc>) -> ClinicResult<Actor> {
        let token = bearer.strip_prefix("Bearer ").unwrap_or(bearer).trim();
        let claims = signer.verify(token, now).map_err(|e| {
            warn!(error = %e, "Rejected bearer token");
            ClinicError::Unauthenticated(INVALID_TOKEN.into())
        })?;

        match self.db.get_user(&claims.user_id)? {
            Some(user) if user.active && user.email == claims.sub => Ok(Actor::from(&user)),
            _ => {
                warn!(user_id = %claims.user_id, "Token subject no longer valid");
                Err(ClinicError::Unauthenticated(INVALID_TOKEN.into()))
            }
        }
    }

    /// Create the first platform administrator.
    pub fn create_platform_admin(
        &self,
        name: &str,
        email: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> ClinicResult<User> {
        let mut v = Violations::new();
        v.check(name.trim().is_empty(), "name", "Name is required")
            .check(!email.contains('@'), "email", "A valid email address is required")
            .check(
                password.chars().count() < 8,
                "password",
                "Password must be at least 8 characters",
            );
        v.into_result()?;

        let email = email.trim().to_lowercase();
        if self.db.get_user_by_email(&email)?.is_some() {
            return Err(ClinicError::bad_request("A user with this email already exists."));
        }
        let user = User::new_platform_admin(name.trim().to_string(), email, self.hasher.hash(password), now);
        self.db.insert_user(&user)?;
        info!(user_id = %user.id, "Platform admin created");
        Ok(user)
    }

    // =========================================================================
    // Companies
    // =========================================================================

    pub fn create_company(&self, actor: &Actor, req: CompanyRequest, now: DateTime<Utc>) -> ClinicResult<Company> {
        actor.require_role(&[Role::PlatformAdmin])?;
        let name = req.name.trim();
        if name.is_empty() {
            return Err(ClinicError::invalid("name", "Company name is required"));
        }
        if self.db.get_company_by_name(name)?.is_some() {
            return Err(ClinicError::bad_request(format!(
                "Company name '{}' already exists",
                name
            )));
        }

        let address = req.address.map(|a| a.trim().to_string()).filter(|a| !a.is_empty());
        let company = Company::new(name.to_string(), address, now);
        self.db.insert_company(&company)?;
        info!(company_id = %company.id, name = %company.name, "Company created");
        Ok(company)
    }

    pub fn list_companies(&self, actor: &Actor) -> ClinicResult<Vec<Company>> {
        actor.require_role(&[Role::PlatformAdmin])?;
        Ok(self.db.list_companies()?)
    }

    pub fn get_my_company(&self, actor: &Actor) -> ClinicResult<Company> {
        actor.require_role(&[Role::TenantAdmin])?;
        self.db
            .get_company(actor.tenant()?)?
            .ok_or_else(|| ClinicError::not_found("Company"))
    }

    /// Only the address of a company can be changed by its admins.
    pub fn update_my_company(&self, actor: &Actor, address: Option<&str>) -> ClinicResult<Company> {
        let mut company = self.get_my_company(actor)?;
        let address = address.map(str::trim).filter(|a| !a.is_empty());
        self.db.update_company_address(&company.id, address)?;
        company.address = address.map(String::from);
        info!(company_id = %company.id, "Company updated");
        Ok(company)
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Medics or patients of the admin's company.
    pub fn list_users_by_role(&self, actor: &Actor, role: Role) -> ClinicResult<Vec<User>> {
        actor.require_role(&[Role::TenantAdmin])?;
        if !matches!(role, Role::Medic | Role::Patient) {
            return Err(ClinicError::bad_request("Only medics and patients can be listed."));
        }
        Ok(self.db.list_users_by_role(actor.tenant()?, role)?)
    }

    /// Enable or disable a medic or patient account.
    pub fn set_user_active(
        &self,
        actor: &Actor,
        user_id: &str,
        active: bool,
        now: DateTime<Utc>,
    ) -> ClinicResult<User> {
        actor.require_role(&[Role::TenantAdmin])?;
        actor.tenant()?;
        let mut user = visible(actor, self.db.get_user(user_id)?, "User")?;
        if user.role.is_admin() {
            warn!(actor = %actor.email, target = %user.id, "Attempt to toggle an admin account");
            return Err(ClinicError::forbidden(
                "Cannot change the status of administrative accounts",
            ));
        }
        if active && user.has_pending_invitation() {
            return Err(ClinicError::bad_request(
                "Cannot activate a user with a pending invitation.",
            ));
        }

        user.active = active;
        user.updated_at = now;
        self.db.update_user(&user)?;
        info!(user_id = %user.id, active, "User status changed");
        Ok(user)
    }

    /// Assign a patient to a medic, or unassign with `None`.
    pub fn assign_medic(
        &self,
        actor: &Actor,
        patient_id: &str,
        medic_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> ClinicResult<User> {
        actor.require_role(&[Role::TenantAdmin])?;
        actor.tenant()?;
        let mut patient = visible(actor, self.db.get_user(patient_id)?, "Patient")?;
        if patient.role != Role::Patient {
            return Err(ClinicError::bad_request("Selected user is not a patient."));
        }

        if let Some(medic_id) = medic_id {
            let medic = visible(actor, self.db.get_user(medic_id)?, "Medic")?;
            if medic.role != Role::Medic {
                return Err(ClinicError::bad_request("Selected user is not a medic."));
            }
            if !medic.active {
                return Err(ClinicError::bad_request("Cannot assign an inactive medic."));
            }
        }

        patient.assigned_medic_id = medic_id.map(String::from);
        patient.updated_at = now;
        self.db.update_user(&patient)?;
        info!(patient_id = %patient.id, medic_id = ?patient.assigned_medic_id, "Medic assignment changed");
        Ok(patient)
    }

    /// Change the actor's own display name.
    pub fn update_profile(&self, actor: &Actor, name: &str, now: DateTime<Utc>) -> ClinicResult<User> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ClinicError::invalid("name", "Name is required"));
        }
        let mut user = self
            .db
            .get_user(&actor.id)?
            .ok_or_else(|| ClinicError::not_found("User"))?;
        user.name = name.to_string();
        user.updated_at = now;
        self.db.update_user(&user)?;
        Ok(user)
    }

    pub fn list_assigned_patients(&self, actor: &Actor) -> ClinicResult<Vec<User>> {
        actor.require_role(&[Role::Medic])?;
        Ok(self.db.list_assigned_patients(&actor.id)?)
    }

    pub fn list_pending_invites(&self, actor: &Actor) -> ClinicResult<Vec<User>> {
        actor.require_role(&[Role::Medic])?;
        Ok(self.db.list_pending_invites(&actor.id)?)
    }
}
