//! Patient plans and their session counters.
//!
//! A plan is created either from a package template or from an explicit list
//! of services. Its items carry the session counters that appointments draw
//! down. Archiving is terminal and cascades to every item.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::auth::{require_assigned_medic, visible, Actor};
use crate::db::Database;
use crate::error::{ClinicError, ClinicResult, Violations};
use crate::models::{Plan, PlanItem, Role, User};

/// One explicit `(service, quantity)` line of a plan assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanServiceItem {
    pub service_id: String,
    pub quantity: u32,
}

/// Plan assignment: exactly one of `package_id` or `service_items`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignPlanRequest {
    #[serde(default)]
    pub package_id: Option<String>,
    #[serde(default)]
    pub service_items: Vec<PlanServiceItem>,
    #[serde(default)]
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Plan engine over one database handle.
pub struct PlanEngine<'a> {
    db: &'a Database,
}

impl<'a> PlanEngine<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    fn load_patient(&self, actor: &Actor, patient_id: &str) -> ClinicResult<User> {
        let patient = visible(actor, self.db.get_user(patient_id)?, "Patient")?;
        if patient.role != Role::Patient {
            return Err(ClinicError::bad_request("Selected user is not a patient."));
        }
        Ok(patient)
    }

    /// Create a plan for a patient.
    pub fn assign_plan(
        &self,
        actor: &Actor,
        patient_id: &str,
        req: AssignPlanRequest,
        now: DateTime<Utc>,
    ) -> ClinicResult<Plan> {
        actor.require_role(&[Role::TenantAdmin, Role::Medic])?;
        let tenant = actor.tenant()?;

        if req.package_id.is_some() == !req.service_items.is_empty() {
            return Err(ClinicError::bad_request(
                "Provide either a package or a list of service items, not both.",
            ));
        }

        let assigned_at = req.assigned_at.unwrap_or(now);
        let mut v = Violations::new();
        v.check(
            req.service_items.iter().any(|i| i.quantity < 1),
            "service_items",
            "Quantity must be at least 1",
        )
        .check(
            req.expiry.is_some_and(|e| e <= assigned_at),
            "expiry",
            "Expiry must be after the assignment date",
        );
        v.into_result()?;

        let patient = self.load_patient(actor, patient_id)?;
        require_assigned_medic(actor, &patient)?;
        if !patient.active {
            return Err(ClinicError::bad_request(
                "Cannot assign plan to inactive patient.",
            ));
        }

        let mut plan = Plan::new(
            patient.id.clone(),
            actor.id.clone(),
            tenant.to_string(),
            assigned_at,
        );
        plan.expiry = req.expiry;
        plan.notes = req.notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());

        match req.package_id {
            Some(package_id) => self.expand_package(actor, &mut plan, &package_id)?,
            None => self.add_service_items(actor, &mut plan, &req.service_items)?,
        }
        self.db.insert_plan(&plan)?;

        info!(
            plan_id = %plan.id,
            patient_id = %plan.patient_id,
            package_id = ?plan.originating_package_id,
            items = plan.items.len(),
            "Plan assigned"
        );
        Ok(plan)
    }

    fn expand_package(&self, actor: &Actor, plan: &mut Plan, package_id: &str) -> ClinicResult<()> {
        let package = visible(actor, self.db.get_package(package_id)?, "Package")?;
        if !package.active {
            return Err(ClinicError::bad_request("Cannot assign inactive package."));
        }
        if package.items.is_empty() {
            return Err(ClinicError::bad_request("Package template has no items."));
        }

        for item in &package.items {
            let service = visible(actor, self.db.get_service(&item.service_id)?, "Service")?;
            if !service.active {
                return Err(ClinicError::bad_request(format!(
                    "Package '{}' contains inactive service: {}",
                    package.name, service.name
                )));
            }
            plan.add_item(service.id, item.quantity, service.price);
        }
        plan.originating_package_id = Some(package.id);
        Ok(())
    }

    fn add_service_items(
        &self,
        actor: &Actor,
        plan: &mut Plan,
        items: &[PlanServiceItem],
    ) -> ClinicResult<()> {
        let distinct: HashSet<&str> = items.iter().map(|i| i.service_id.as_str()).collect();
        if distinct.len() != items.len() {
            return Err(ClinicError::bad_request("Duplicate services in request."));
        }

        let mut services = Vec::with_capacity(items.len());
        for item in items {
            let service = visible(actor, self.db.get_service(&item.service_id)?, "Service")?;
            services.push((service, item.quantity));
        }

        let inactive: Vec<&str> = services
            .iter()
            .filter(|(s, _)| !s.active)
            .map(|(s, _)| s.name.as_str())
            .collect();
        if !inactive.is_empty() {
            return Err(ClinicError::bad_request(format!(
                "Cannot add inactive services: {}",
                inactive.join(", ")
            )));
        }

        for (service, quantity) in services {
            plan.add_item(service.id, quantity, service.price);
        }
        if plan.items.is_empty() {
            return Err(ClinicError::bad_request("Plan needs at least one item."));
        }
        Ok(())
    }

    /// Plans of a patient that are not archived, newest first.
    pub fn list_plans_for_patient(&self, actor: &Actor, patient_id: &str) -> ClinicResult<Vec<Plan>> {
        let patient = self.load_patient(actor, patient_id)?;
        match actor.role {
            Role::Patient if actor.id != patient.id => {
                return Err(ClinicError::forbidden("You can only view your own plans"));
            }
            Role::Medic => require_assigned_medic(actor, &patient)?,
            _ => {}
        }
        Ok(self.db.list_plans_for_patient(&patient.id, false)?)
    }

    /// A single plan with its items. Patients only see their own plans.
    pub fn get_plan(&self, actor: &Actor, plan_id: &str) -> ClinicResult<Plan> {
        let plan = visible(actor, self.db.get_plan(plan_id)?, "Plan")?;
        match actor.role {
            Role::Patient if plan.patient_id != actor.id => Err(ClinicError::not_found("Plan")),
            Role::Medic => {
                let patient = self.load_patient(actor, &plan.patient_id)?;
                require_assigned_medic(actor, &patient)?;
                Ok(plan)
            }
            _ => Ok(plan),
        }
    }

    // =========================================================================
    // Plan lifecycle
    // =========================================================================

    fn plan_for_update(&self, actor: &Actor, plan_id: &str) -> ClinicResult<Plan> {
        actor.require_role(&[Role::TenantAdmin, Role::Medic])?;
        actor.tenant()?;
        let plan = visible(actor, self.db.get_plan(plan_id)?, "Plan")?;
        let patient = self.load_patient(actor, &plan.patient_id)?;
        require_assigned_medic(actor, &patient)?;
        Ok(plan)
    }

    /// Activate or deactivate a plan.
    ///
    /// Deactivation switches off every item. Reactivation switches non-archived
    /// items back on, except those whose service has since been deactivated.
    pub fn set_plan_active(&self, actor: &Actor, plan_id: &str, active: bool) -> ClinicResult<Plan> {
        let mut plan = self.plan_for_update(actor, plan_id)?;
        if plan.archived {
            return Err(ClinicError::bad_request(
                "Cannot update status of an archived plan.",
            ));
        }

        plan.active = active;
        if active {
            let service_ids: Vec<String> = plan
                .items
                .iter()
                .filter(|i| !i.archived)
                .map(|i| i.service_id.clone())
                .collect();
            let inactive: HashSet<String> =
                self.db.inactive_service_ids(&service_ids)?.into_iter().collect();
            for item in plan.items.iter_mut().filter(|i| !i.archived) {
                item.item_active = !inactive.contains(&item.service_id);
            }
            debug!(plan_id = %plan.id, held_back = inactive.len(), "Items reactivated");
        } else {
            for item in plan.items.iter_mut().filter(|i| !i.archived) {
                item.item_active = false;
            }
        }
        self.db.save_plan_state(&plan)?;

        info!(plan_id = %plan.id, active, "Plan status changed");
        Ok(plan)
    }

    /// Archive a plan and all of its items. Archiving twice is a no-op.
    pub fn archive_plan(&self, actor: &Actor, plan_id: &str) -> ClinicResult<Plan> {
        let mut plan = self.plan_for_update(actor, plan_id)?;
        if plan.archived {
            debug!(plan_id = %plan.id, "Plan already archived");
            return Ok(plan);
        }
        plan.archive();
        self.db.save_plan_state(&plan)?;

        info!(plan_id = %plan.id, "Plan archived");
        Ok(plan)
    }

    // =========================================================================
    // Plan items
    // =========================================================================

    fn item_for_update(&self, actor: &Actor, item_id: &str) -> ClinicResult<(Plan, PlanItem)> {
        actor.require_role(&[Role::Medic])?;
        actor.tenant()?;
        let item = self
            .db
            .get_plan_item(item_id)?
            .ok_or_else(|| ClinicError::not_found("Plan item"))?;
        let plan = visible(actor, self.db.get_plan(&item.plan_id)?, "Plan item")?;
        let patient = self.load_patient(actor, &plan.patient_id)?;
        require_assigned_medic(actor, &patient)?;
        Ok((plan, item))
    }

    /// Switch a single item on or off.
    pub fn set_item_active(&self, actor: &Actor, item_id: &str, active: bool) -> ClinicResult<PlanItem> {
        let (plan, mut item) = self.item_for_update(actor, item_id)?;
        if plan.archived || item.archived {
            return Err(ClinicError::bad_request(
                "Cannot change status of an archived plan item.",
            ));
        }
        if active {
            if !plan.active {
                return Err(ClinicError::bad_request("Parent plan inactive."));
            }
            let service = self
                .db
                .get_service(&item.service_id)?
                .ok_or_else(|| ClinicError::not_found("Service"))?;
            if !service.active {
                return Err(ClinicError::bad_request(format!(
                    "Cannot activate item: Service '{}' inactive.",
                    service.name
                )));
            }
        }

        item.item_active = active;
        self.db.update_plan_item(&item)?;
        info!(item_id = %item.id, active, "Plan item status changed");
        Ok(item)
    }

    /// Archive a single item. Archiving an archived item is a no-op.
    pub fn archive_item(&self, actor: &Actor, item_id: &str) -> ClinicResult<PlanItem> {
        let (_, mut item) = self.item_for_update(actor, item_id)?;
        if item.archived {
            return Ok(item);
        }
        item.archive();
        self.db.update_plan_item(&item)?;
        info!(item_id = %item.id, "Plan item archived");
        Ok(item)
    }

    /// Manual correction of an item's counters. Only live items of live plans.
    pub fn update_item_quantities(
        &self,
        actor: &Actor,
        item_id: &str,
        total: u32,
        remaining: u32,
    ) -> ClinicResult<PlanItem> {
        let mut v = Violations::new();
        v.check(total < 1, "total_quantity", "Total quantity must be at least 1")
            .check(
                remaining > total,
                "remaining_quantity",
                "Remaining quantity cannot exceed total.",
            );
        v.into_result()?;

        let (plan, mut item) = self.item_for_update(actor, item_id)?;
        if !plan.is_live() || !item.is_live() {
            return Err(ClinicError::bad_request(
                "Cannot modify quantities of an inactive or archived plan item.",
            ));
        }

        let before = (item.total_quantity, item.remaining_quantity);
        item.total_quantity = total;
        item.remaining_quantity = remaining;
        self.db.update_plan_item(&item)?;

        info!(item_id = %item.id, ?before, total, remaining, "Plan item quantities corrected");
        Ok(item)
    }
}
