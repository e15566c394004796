//! Users, roles and companies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of an actor on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    PlatformAdmin,
    TenantAdmin,
    Medic,
    Patient,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::PlatformAdmin => "PLATFORM_ADMIN",
            Role::TenantAdmin => "TENANT_ADMIN",
            Role::Medic => "MEDIC",
            Role::Patient => "PATIENT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PLATFORM_ADMIN" => Some(Role::PlatformAdmin),
            "TENANT_ADMIN" => Some(Role::TenantAdmin),
            "MEDIC" => Some(Role::Medic),
            "PATIENT" => Some(Role::Patient),
            _ => None,
        }
    }

    /// Label used in emails ("TENANT ADMIN").
    pub fn label(&self) -> String {
        self.as_str().replace('_', " ")
    }

    /// Administrative accounts cannot be toggled by tenant admins.
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::PlatformAdmin | Role::TenantAdmin)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A platform user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub role: Role,
    pub active: bool,
    /// Company the user belongs to; `None` for platform admins
    pub tenant_id: Option<String>,
    /// Medic responsible for this patient
    pub assigned_medic_id: Option<String>,
    #[serde(skip)]
    pub invitation_token: Option<String>,
    pub invitation_expiry: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create an inactive user awaiting invitation acceptance.
    pub fn new_invited(
        email: String,
        role: Role,
        tenant_id: Option<String>,
        password_hash: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: format!("Invited: {}", email),
            email,
            password_hash,
            role,
            active: false,
            tenant_id,
            assigned_medic_id: None,
            invitation_token: None,
            invitation_expiry: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create an active platform administrator.
    pub fn new_platform_admin(
        name: String,
        email: String,
        password_hash: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            email,
            password_hash,
            role: Role::PlatformAdmin,
            active: true,
            tenant_id: None,
            assigned_medic_id: None,
            invitation_token: None,
            invitation_expiry: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Inactive with an outstanding invitation token.
    pub fn has_pending_invitation(&self) -> bool {
        !self.active && self.invitation_token.is_some()
    }

    /// Invitation token present and not yet expired.
    pub fn invitation_valid_at(&self, now: DateTime<Utc>) -> bool {
        match (&self.invitation_token, self.invitation_expiry) {
            (Some(_), Some(expiry)) => !self.active && now < expiry,
            _ => false,
        }
    }

    pub fn clear_invitation(&mut self) {
        self.invitation_token = None;
        self.invitation_expiry = None;
    }
}

/// A therapy practice (tenant).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Company {
    pub id: String,
    pub name: String,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Company {
    pub fn new(name: String, address: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            address,
            created_at: now,
        }
    }
}
