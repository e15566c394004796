//! Service catalog models.

use serde::{Deserialize, Serialize};

/// A single timed, optionally priced treatment offered by a company.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Service {
    pub id: String,
    pub tenant_id: String,
    /// Unique within the company
    pub name: String,
    pub description: Option<String>,
    pub duration_minutes: u32,
    pub price: Option<f64>,
    pub category: Option<String>,
    pub active: bool,
}

impl Service {
    /// Create a new active service with required fields.
    pub fn new(tenant_id: String, name: String, duration_minutes: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id,
            name,
            description: None,
            duration_minutes,
            price: None,
            category: None,
            active: true,
        }
    }
}

/// A bundle of services sold as a unit; template for patient plans.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Package {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub description: Option<String>,
    pub total_price: Option<f64>,
    pub active: bool,
    pub items: Vec<PackageItem>,
}

/// One service line of a package.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageItem {
    pub id: String,
    pub package_id: String,
    pub service_id: String,
    pub quantity: u32,
}

impl Package {
    pub fn new(tenant_id: String, name: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id,
            name,
            description: None,
            total_price: None,
            active: true,
            items: Vec::new(),
        }
    }

    /// Add a service line. Returns `false` if the service is already included.
    pub fn add_item(&mut self, service_id: String, quantity: u32) -> bool {
        if self.contains_service(&service_id) {
            return false;
        }
        self.items.push(PackageItem {
            id: uuid::Uuid::new_v4().to_string(),
            package_id: self.id.clone(),
            service_id,
            quantity,
        });
        true
    }

    pub fn contains_service(&self, service_id: &str) -> bool {
        self.items.iter().any(|i| i.service_id == service_id)
    }
}
