//! Per-company head counts for the admin dashboard.

use serde::{Deserialize, Serialize};

use crate::auth::Actor;
use crate::db::Database;
use crate::error::ClinicResult;
use crate::models::Role;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyStats {
    pub active_medics: u64,
    /// Invited or deactivated medics
    pub pending_medics: u64,
    pub active_patients: u64,
    pub pending_patients: u64,
    /// Active patients without an assigned medic
    pub unassigned_patients: u64,
}

pub fn company_stats(db: &Database, actor: &Actor) -> ClinicResult<CompanyStats> {
    actor.require_role(&[Role::TenantAdmin])?;
    let tenant = actor.tenant()?;
    Ok(CompanyStats {
        active_medics: db.count_users(tenant, Role::Medic, true)?,
        pending_medics: db.count_users(tenant, Role::Medic, false)?,
        active_patients: db.count_users(tenant, Role::Patient, true)?,
        pending_patients: db.count_users(tenant, Role::Patient, false)?,
        unassigned_patients: db.count_unassigned_patients(tenant)?,
    })
}
