//! Authorization kernel.
//!
//! Every operation receives the authenticated [`Actor`] and checks it against
//! the entities it touches with the helpers below. Cross-tenant references are
//! reported as "not found" so that ids from other practices cannot be probed;
//! role and ownership failures inside the actor's own practice are "forbidden".

mod password;
mod token;

pub use password::*;
pub use token::*;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ClinicError, ClinicResult};
use crate::models::{Appointment, Company, Package, Plan, Role, Service, TimeBlock, User};

/// The authenticated caller of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub tenant_id: Option<String>,
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
            tenant_id: user.tenant_id.clone(),
        }
    }
}

impl Actor {
    /// Fail with `Forbidden` unless the actor has one of `roles`.
    pub fn require_role(&self, roles: &[Role]) -> ClinicResult<()> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            warn!(actor = %self.email, role = %self.role, "Role not permitted");
            Err(ClinicError::forbidden("Access denied for this role"))
        }
    }

    /// The actor's company, or `BadRequest` for accounts outside any company.
    pub fn tenant(&self) -> ClinicResult<&str> {
        self.tenant_id
            .as_deref()
            .ok_or_else(|| ClinicError::bad_request("User is not associated with a company"))
    }

    pub fn is_platform_admin(&self) -> bool {
        self.role == Role::PlatformAdmin
    }
}

/// Anything owned by exactly one company.
pub trait TenantScoped {
    fn tenant_id(&self) -> Option<&str>;
}

impl TenantScoped for User {
    fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }
}

impl TenantScoped for Company {
    fn tenant_id(&self) -> Option<&str> {
        Some(&self.id)
    }
}

impl TenantScoped for Service {
    fn tenant_id(&self) -> Option<&str> {
        Some(&self.tenant_id)
    }
}

impl TenantScoped for Package {
    fn tenant_id(&self) -> Option<&str> {
        Some(&self.tenant_id)
    }
}

impl TenantScoped for Plan {
    fn tenant_id(&self) -> Option<&str> {
        Some(&self.tenant_id)
    }
}

impl TenantScoped for Appointment {
    fn tenant_id(&self) -> Option<&str> {
        Some(&self.tenant_id)
    }
}

impl TenantScoped for TimeBlock {
    fn tenant_id(&self) -> Option<&str> {
        Some(&self.tenant_id)
    }
}

/// Visibility predicate: platform admins see everything, everybody else only
/// what belongs to their own company.
pub fn can_see<T: TenantScoped + ?Sized>(actor: &Actor, entity: &T) -> bool {
    if actor.is_platform_admin() {
        return true;
    }
    match (actor.tenant_id.as_deref(), entity.tenant_id()) {
        (Some(mine), Some(theirs)) => mine == theirs,
        _ => false,
    }
}

/// Unwrap a lookup, turning "missing" and "not visible" into the same
/// `NotFound(noun)`.
pub fn visible<T: TenantScoped>(actor: &Actor, entity: Option<T>, noun: &str) -> ClinicResult<T> {
    match entity {
        Some(entity) if can_see(actor, &entity) => Ok(entity),
        Some(_) => {
            warn!(actor = %actor.email, noun, "Cross-tenant reference");
            Err(ClinicError::not_found(noun))
        }
        None => Err(ClinicError::not_found(noun)),
    }
}

/// A medic may only act on patients assigned to them.
pub fn require_assigned_medic(actor: &Actor, patient: &User) -> ClinicResult<()> {
    if actor.role != Role::Medic {
        return Ok(());
    }
    if patient.assigned_medic_id.as_deref() == Some(actor.id.as_str()) {
        Ok(())
    } else {
        warn!(actor = %actor.email, patient = %patient.id, "Patient not assigned to medic");
        Err(ClinicError::forbidden(
            "You can only manage patients assigned to you",
        ))
    }
}

/// Calendar entities may only be touched by the medic who owns them.
pub fn require_owner(actor: &Actor, owner_id: &str, what: &str) -> ClinicResult<()> {
    if actor.id == owner_id {
        Ok(())
    } else {
        warn!(actor = %actor.email, what, "Not the owner");
        Err(ClinicError::forbidden(format!("You can only manage your own {}", what)))
    }
}
