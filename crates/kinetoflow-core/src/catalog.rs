//! Service and package management.
//!
//! Services and packages belong to one company and are managed by its tenant
//! admins. Two cross-entity rules are enforced here:
//!
//! - a service cannot be deactivated while an active package includes it
//! - a package can only be active while every service it includes is active

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::{visible, Actor};
use crate::db::Database;
use crate::error::{ClinicError, ClinicResult, Violations};
use crate::models::{Package, PackageItem, Role, Service};

const MAX_NAME_LEN: usize = 100;

fn default_true() -> bool {
    true
}

/// Create/update payload for a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub duration_minutes: u32,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// One `(service, quantity)` line of a package request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageItemRequest {
    pub service_id: String,
    pub quantity: u32,
}

/// Create/update payload for a package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub total_price: Option<f64>,
    #[serde(default = "default_true")]
    pub active: bool,
    pub items: Vec<PackageItemRequest>,
}

fn validate_service(req: &ServiceRequest) -> ClinicResult<()> {
    let name = req.name.trim();
    let mut v = Violations::new();
    v.check(name.is_empty(), "name", "Service name is required")
        .check(
            name.chars().count() > MAX_NAME_LEN,
            "name",
            "Service name is too long",
        )
        .check(
            req.duration_minutes < 1,
            "duration_minutes",
            "Duration must be at least 1 minute",
        )
        .check(
            req.price.is_some_and(|p| !p.is_finite() || p < 0.0),
            "price",
            "Price cannot be negative",
        );
    v.into_result()
}

fn validate_package(req: &PackageRequest) -> ClinicResult<()> {
    let name = req.name.trim();
    let mut v = Violations::new();
    v.check(name.is_empty(), "name", "Package name is required")
        .check(
            name.chars().count() > MAX_NAME_LEN,
            "name",
            "Package name is too long",
        )
        .check(
            req.total_price.is_some_and(|p| !p.is_finite() || p < 0.0),
            "total_price",
            "Price cannot be negative",
        )
        .check(
            req.items.iter().any(|i| i.quantity < 1),
            "items",
            "Quantity must be at least 1",
        );
    v.into_result()?;

    if req.items.is_empty() {
        return Err(ClinicError::bad_request(
            "Package must contain at least one service",
        ));
    }
    let distinct: HashSet<&str> = req.items.iter().map(|i| i.service_id.as_str()).collect();
    if distinct.len() != req.items.len() {
        return Err(ClinicError::bad_request(
            "Duplicate services in package request",
        ));
    }
    Ok(())
}

fn blank_to_none(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Catalog engine over one database handle.
pub struct Catalog<'a> {
    db: &'a Database,
}

impl<'a> Catalog<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    fn admin_tenant<'b>(&self, actor: &'b Actor) -> ClinicResult<&'b str> {
        actor.require_role(&[Role::TenantAdmin])?;
        actor.tenant()
    }

    // =========================================================================
    // Services
    // =========================================================================

    /// Create a service in the admin's company.
    pub fn create_service(&self, actor: &Actor, req: ServiceRequest) -> ClinicResult<Service> {
        let tenant = self.admin_tenant(actor)?;
        validate_service(&req)?;

        let name = req.name.trim().to_string();
        if self.db.service_name_taken(tenant, &name, None)? {
            return Err(ClinicError::bad_request(format!(
                "Service name '{}' already exists",
                name
            )));
        }

        let mut service = Service::new(tenant.to_string(), name, req.duration_minutes);
        service.description = blank_to_none(req.description);
        service.price = req.price;
        service.category = blank_to_none(req.category);
        service.active = req.active;
        self.db.insert_service(&service)?;

        info!(service_id = %service.id, tenant = %tenant, name = %service.name, "Service created");
        Ok(service)
    }

    /// Replace the fields of a service. A requested deactivation goes through
    /// the active-package check.
    pub fn update_service(
        &self,
        actor: &Actor,
        id: &str,
        req: ServiceRequest,
    ) -> ClinicResult<Service> {
        let tenant = self.admin_tenant(actor)?;
        let mut service = visible(actor, self.db.get_service(id)?, "Service")?;
        validate_service(&req)?;

        let name = req.name.trim().to_string();
        if self.db.service_name_taken(tenant, &name, Some(id))? {
            return Err(ClinicError::bad_request(format!(
                "Service name '{}' already exists",
                name
            )));
        }
        if service.active && !req.active {
            self.ensure_not_in_active_package(&service)?;
        }

        service.name = name;
        service.description = blank_to_none(req.description);
        service.duration_minutes = req.duration_minutes;
        service.price = req.price;
        service.category = blank_to_none(req.category);
        service.active = req.active;
        self.db.update_service(&service)?;

        info!(service_id = %service.id, "Service updated");
        Ok(service)
    }

    /// Toggle a service.
    pub fn set_service_active(&self, actor: &Actor, id: &str, active: bool) -> ClinicResult<Service> {
        self.admin_tenant(actor)?;
        let mut service = visible(actor, self.db.get_service(id)?, "Service")?;
        if service.active == active {
            return Ok(service);
        }
        if !active {
            self.ensure_not_in_active_package(&service)?;
        }

        self.db.set_service_active(&service.id, active)?;
        service.active = active;
        info!(service_id = %service.id, active, "Service status changed");
        Ok(service)
    }

    fn ensure_not_in_active_package(&self, service: &Service) -> ClinicResult<()> {
        let packages = self.db.active_packages_with_service(&service.id)?;
        if packages.is_empty() {
            return Ok(());
        }
        warn!(service_id = %service.id, packages = ?packages, "Deactivation blocked by active packages");
        Err(ClinicError::bad_request(format!(
            "Cannot deactivate service '{}': it is included in active packages: {}",
            service.name,
            packages.join(", ")
        )))
    }

    pub fn get_service(&self, actor: &Actor, id: &str) -> ClinicResult<Service> {
        actor.require_role(&[Role::TenantAdmin, Role::Medic])?;
        actor.tenant()?;
        visible(actor, self.db.get_service(id)?, "Service")
    }

    /// Every service of the admin's company, by name.
    pub fn list_services(&self, actor: &Actor) -> ClinicResult<Vec<Service>> {
        let tenant = self.admin_tenant(actor)?;
        Ok(self.db.list_services(tenant, false)?)
    }

    /// Active services of the actor's company, for booking and plan assignment.
    pub fn list_active_services(&self, actor: &Actor) -> ClinicResult<Vec<Service>> {
        actor.require_role(&[Role::Medic, Role::TenantAdmin])?;
        Ok(self.db.list_services(actor.tenant()?, true)?)
    }

    // =========================================================================
    // Packages
    // =========================================================================

    /// Load and check every service a package request refers to.
    fn requested_services(
        &self,
        actor: &Actor,
        req: &PackageRequest,
    ) -> ClinicResult<HashMap<String, Service>> {
        let mut services = HashMap::new();
        for item in &req.items {
            let service = visible(actor, self.db.get_service(&item.service_id)?, "Service")?;
            services.insert(service.id.clone(), service);
        }
        Ok(services)
    }

    /// Create a package in the admin's company.
    pub fn create_package(&self, actor: &Actor, req: PackageRequest) -> ClinicResult<Package> {
        let tenant = self.admin_tenant(actor)?;
        validate_package(&req)?;

        let services = self.requested_services(actor, &req)?;
        let mut inactive: Vec<&str> = services
            .values()
            .filter(|s| !s.active)
            .map(|s| s.name.as_str())
            .collect();
        if !inactive.is_empty() {
            inactive.sort_unstable();
            return Err(ClinicError::bad_request(format!(
                "Cannot add inactive services: {}",
                inactive.join(", ")
            )));
        }

        let name = req.name.trim().to_string();
        if self.db.package_name_taken(tenant, &name, None)? {
            return Err(ClinicError::bad_request(format!(
                "Package name '{}' already exists",
                name
            )));
        }

        let mut package = Package::new(tenant.to_string(), name);
        package.description = blank_to_none(req.description);
        package.total_price = req.total_price;
        package.active = req.active;
        for item in req.items {
            package.add_item(item.service_id, item.quantity);
        }
        self.db.insert_package(&package)?;

        info!(package_id = %package.id, items = package.items.len(), "Package created");
        Ok(package)
    }

    /// Update a package and reconcile its items with the request: matching
    /// services keep their row (quantity updated), new ones are added and
    /// services no longer listed are removed.
    pub fn update_package(
        &self,
        actor: &Actor,
        id: &str,
        req: PackageRequest,
    ) -> ClinicResult<Package> {
        let tenant = self.admin_tenant(actor)?;
        let mut package = visible(actor, self.db.get_package(id)?, "Package")?;
        validate_package(&req)?;
        self.requested_services(actor, &req)?;

        let name = req.name.trim().to_string();
        if self.db.package_name_taken(tenant, &name, Some(id))? {
            return Err(ClinicError::bad_request(format!(
                "Package name '{}' already exists",
                name
            )));
        }

        let (mut added, mut changed, mut removed) = (0, 0, 0);
        let current: HashMap<&str, _> = package
            .items
            .iter()
            .map(|i| (i.service_id.as_str(), i))
            .collect();

        for wanted in &req.items {
            match current.get(wanted.service_id.as_str()) {
                Some(existing) if existing.quantity != wanted.quantity => {
                    self.db
                        .update_package_item_quantity(&existing.id, wanted.quantity)?;
                    changed += 1;
                }
                Some(_) => {}
                None => {
                    self.db.insert_package_item(&PackageItem {
                        id: uuid::Uuid::new_v4().to_string(),
                        package_id: package.id.clone(),
                        service_id: wanted.service_id.clone(),
                        quantity: wanted.quantity,
                    })?;
                    added += 1;
                }
            }
        }
        let wanted: HashSet<&str> = req.items.iter().map(|i| i.service_id.as_str()).collect();
        for existing in &package.items {
            if !wanted.contains(existing.service_id.as_str()) {
                self.db.delete_package_item(&existing.id)?;
                removed += 1;
            }
        }

        package.name = name;
        package.description = blank_to_none(req.description);
        package.total_price = req.total_price;
        package.active = req.active;
        if package.active {
            self.ensure_services_active(&package)?;
        }
        self.db.update_package(&package)?;
        package.items = self.db.list_package_items(&package.id)?;

        info!(package_id = %package.id, added, changed, removed, "Package updated");
        Ok(package)
    }

    /// Toggle a package. Activation requires every included service to be active.
    pub fn set_package_active(&self, actor: &Actor, id: &str, active: bool) -> ClinicResult<Package> {
        self.admin_tenant(actor)?;
        let mut package = visible(actor, self.db.get_package(id)?, "Package")?;
        if package.active == active {
            return Ok(package);
        }
        if active {
            self.ensure_services_active(&package)?;
        }

        self.db.set_package_active(&package.id, active)?;
        package.active = active;
        info!(package_id = %package.id, active, "Package status changed");
        Ok(package)
    }

    fn ensure_services_active(&self, package: &Package) -> ClinicResult<()> {
        let inactive = self.db.inactive_services_in_package(&package.id)?;
        if inactive.is_empty() {
            Ok(())
        } else {
            Err(ClinicError::bad_request(format!(
                "Cannot activate package '{}': inactive services: {}",
                package.name,
                inactive.join(", ")
            )))
        }
    }

    pub fn get_package(&self, actor: &Actor, id: &str) -> ClinicResult<Package> {
        actor.require_role(&[Role::TenantAdmin, Role::Medic])?;
        actor.tenant()?;
        visible(actor, self.db.get_package(id)?, "Package")
    }

    /// Every package of the admin's company, by name.
    pub fn list_packages(&self, actor: &Actor) -> ClinicResult<Vec<Package>> {
        let tenant = self.admin_tenant(actor)?;
        Ok(self.db.list_packages(tenant, false)?)
    }

    /// Active packages of the actor's company.
    pub fn list_active_packages(&self, actor: &Actor) -> ClinicResult<Vec<Package>> {
        actor.require_role(&[Role::Medic, Role::TenantAdmin])?;
        Ok(self.db.list_packages(actor.tenant()?, true)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Company;
    use chrono::Utc;

    struct Fixture {
        db: Database,
        admin: Actor,
        other_admin: Actor,
    }

    fn setup_db() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let t1 = Company::new("Kineto".into(), None, Utc::now());
        let t2 = Company::new("Other".into(), None, Utc::now());
        db.insert_company(&t1).unwrap();
        db.insert_company(&t2).unwrap();

        let admin = Actor {
            id: "admin1".into(),
            name: "Admin".into(),
            email: "admin@t1.org".into(),
            role: Role::TenantAdmin,
            tenant_id: Some(t1.id),
        };
        let other_admin = Actor {
            id: "admin2".into(),
            name: "Other".into(),
            email: "admin@t2.org".into(),
            role: Role::TenantAdmin,
            tenant_id: Some(t2.id),
        };
        Fixture {
            db,
            admin,
            other_admin,
        }
    }

    fn service_req(name: &str) -> ServiceRequest {
        ServiceRequest {
            name: name.into(),
            description: None,
            duration_minutes: 60,
            price: Some(100.0),
            category: None,
            active: true,
        }
    }

    fn package_req(name: &str, items: &[(&str, u32)]) -> PackageRequest {
        PackageRequest {
            name: name.into(),
            description: None,
            total_price: None,
            active: true,
            items: items
                .iter()
                .map(|(id, q)| PackageItemRequest {
                    service_id: id.to_string(),
                    quantity: *q,
                })
                .collect(),
        }
    }

    #[test]
    fn test_create_service_and_name_collision() {
        let f = setup_db();
        let catalog = Catalog::new(&f.db);
        let s = catalog.create_service(&f.admin, service_req(" Massage ")).unwrap();
        assert_eq!(s.name, "Massage");

        let err = catalog
            .create_service(&f.admin, service_req("Massage"))
            .unwrap_err();
        assert_eq!(err.kind(), "BAD_REQUEST");

        // Same name in another company is fine
        assert!(catalog
            .create_service(&f.other_admin, service_req("Massage"))
            .is_ok());
    }

    #[test]
    fn test_service_validation() {
        let f = setup_db();
        let mut req = service_req("");
        req.duration_minutes = 0;
        req.price = Some(-1.0);
        match Catalog::new(&f.db).create_service(&f.admin, req) {
            Err(ClinicError::Validation { details, .. }) => {
                assert!(details.contains_key("name"));
                assert!(details.contains_key("duration_minutes"));
                assert!(details.contains_key("price"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_update_service_excludes_self_from_collision() {
        let f = setup_db();
        let catalog = Catalog::new(&f.db);
        let s = catalog.create_service(&f.admin, service_req("Massage")).unwrap();
        catalog.create_service(&f.admin, service_req("Laser")).unwrap();

        let mut req = service_req("Massage");
        req.duration_minutes = 45;
        let updated = catalog.update_service(&f.admin, &s.id, req).unwrap();
        assert_eq!(updated.duration_minutes, 45);

        let err = catalog
            .update_service(&f.admin, &s.id, service_req("Laser"))
            .unwrap_err();
        assert_eq!(err.kind(), "BAD_REQUEST");
    }

    #[test]
    fn test_cross_tenant_service_is_not_found() {
        let f = setup_db();
        let catalog = Catalog::new(&f.db);
        let s = catalog
            .create_service(&f.other_admin, service_req("Massage"))
            .unwrap();

        assert_eq!(
            catalog.get_service(&f.admin, &s.id),
            Err(ClinicError::not_found("Service"))
        );
        assert_eq!(
            catalog.set_service_active(&f.admin, &s.id, false),
            Err(ClinicError::not_found("Service"))
        );
    }

    #[test]
    fn test_medic_cannot_manage_catalog() {
        let f = setup_db();
        let medic = Actor {
            role: Role::Medic,
            ..f.admin.clone()
        };
        let err = Catalog::new(&f.db)
            .create_service(&medic, service_req("Massage"))
            .unwrap_err();
        assert_eq!(err.kind(), "FORBIDDEN");
    }

    #[test]
    fn test_package_rejects_bad_items() {
        let f = setup_db();
        let catalog = Catalog::new(&f.db);
        let s = catalog.create_service(&f.admin, service_req("Massage")).unwrap();
        let mut inactive = service_req("Laser");
        inactive.active = false;
        let off = catalog.create_service(&f.admin, inactive).unwrap();
        let foreign = catalog
            .create_service(&f.other_admin, service_req("Foreign"))
            .unwrap();

        let empty = catalog.create_package(&f.admin, package_req("P", &[]));
        assert_eq!(empty.unwrap_err().kind(), "BAD_REQUEST");

        let dup = catalog.create_package(&f.admin, package_req("P", &[(&s.id, 1), (&s.id, 2)]));
        assert_eq!(dup.unwrap_err().kind(), "BAD_REQUEST");

        let with_off = catalog.create_package(&f.admin, package_req("P", &[(&off.id, 1)]));
        assert_eq!(with_off.unwrap_err().kind(), "BAD_REQUEST");

        let with_foreign =
            catalog.create_package(&f.admin, package_req("P", &[(&foreign.id, 1)]));
        assert_eq!(with_foreign, Err(ClinicError::not_found("Service")));

        let zero = catalog.create_package(&f.admin, package_req("P", &[(&s.id, 0)]));
        assert_eq!(zero.unwrap_err().kind(), "VALIDATION");
    }

    #[test]
    fn test_update_package_reconciles_items() {
        let f = setup_db();
        let catalog = Catalog::new(&f.db);
        let a = catalog.create_service(&f.admin, service_req("A")).unwrap();
        let b = catalog.create_service(&f.admin, service_req("B")).unwrap();
        let c = catalog.create_service(&f.admin, service_req("C")).unwrap();

        let pkg = catalog
            .create_package(&f.admin, package_req("Rehab", &[(&a.id, 4), (&b.id, 2)]))
            .unwrap();
        let a_item_id = pkg.items[0].id.clone();

        let updated = catalog
            .update_package(&f.admin, &pkg.id, package_req("Rehab", &[(&a.id, 6), (&c.id, 1)]))
            .unwrap();

        assert_eq!(updated.items.len(), 2);
        let a_item = updated.items.iter().find(|i| i.service_id == a.id).unwrap();
        assert_eq!(a_item.id, a_item_id);
        assert_eq!(a_item.quantity, 6);
        assert!(updated.contains_service(&c.id));
        assert!(!updated.contains_service(&b.id));
    }

    #[test]
    fn test_deactivation_rules() {
        let f = setup_db();
        let catalog = Catalog::new(&f.db);
        let s = catalog.create_service(&f.admin, service_req("Massage")).unwrap();
        let pkg = catalog
            .create_package(&f.admin, package_req("Rehab", &[(&s.id, 4)]))
            .unwrap();

        let err = catalog.set_service_active(&f.admin, &s.id, false).unwrap_err();
        assert_eq!(err.kind(), "BAD_REQUEST");

        let mut req = service_req("Massage");
        req.active = false;
        assert!(catalog.update_service(&f.admin, &s.id, req).is_err());

        catalog.set_package_active(&f.admin, &pkg.id, false).unwrap();
        catalog.set_service_active(&f.admin, &s.id, false).unwrap();

        // Reactivating the package now fails until the service is back
        let err = catalog.set_package_active(&f.admin, &pkg.id, true).unwrap_err();
        assert_eq!(err.kind(), "BAD_REQUEST");
        catalog.set_service_active(&f.admin, &s.id, true).unwrap();
        assert!(catalog.set_package_active(&f.admin, &pkg.id, true).unwrap().active);
    }

    #[test]
    fn test_lists() {
        let f = setup_db();
        let catalog = Catalog::new(&f.db);
        catalog.create_service(&f.admin, service_req("B")).unwrap();
        let mut off = service_req("A");
        off.active = false;
        catalog.create_service(&f.admin, off).unwrap();

        assert_eq!(catalog.list_services(&f.admin).unwrap().len(), 2);
        let active = catalog.list_active_services(&f.admin).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "B");
        assert!(catalog.list_packages(&f.admin).unwrap().is_empty());
    }
}
