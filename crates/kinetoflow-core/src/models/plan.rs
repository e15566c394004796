//! Patient plans and their session counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A per-patient instantiation of services with finite session counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub id: String,
    pub patient_id: String,
    pub assigned_by_id: String,
    pub tenant_id: String,
    /// Package the plan was expanded from, if any
    pub originating_package_id: Option<String>,
    pub active: bool,
    pub archived: bool,
    pub assigned_at: DateTime<Utc>,
    pub expiry: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub items: Vec<PlanItem>,
}

/// One service line of a plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanItem {
    pub id: String,
    pub plan_id: String,
    pub service_id: String,
    pub total_quantity: u32,
    pub remaining_quantity: u32,
    pub price_per_unit: Option<f64>,
    pub item_active: bool,
    pub archived: bool,
}

impl Plan {
    /// Create a new active plan with no items.
    pub fn new(
        patient_id: String,
        assigned_by_id: String,
        tenant_id: String,
        assigned_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            patient_id,
            assigned_by_id,
            tenant_id,
            originating_package_id: None,
            active: true,
            archived: false,
            assigned_at,
            expiry: None,
            notes: None,
            items: Vec::new(),
        }
    }

    /// Add a fresh line with `remaining = total`.
    pub fn add_item(&mut self, service_id: String, quantity: u32, price_per_unit: Option<f64>) {
        self.items.push(PlanItem {
            id: uuid::Uuid::new_v4().to_string(),
            plan_id: self.id.clone(),
            service_id,
            total_quantity: quantity,
            remaining_quantity: quantity,
            price_per_unit,
            item_active: true,
            archived: false,
        });
    }

    /// Active and not archived.
    pub fn is_live(&self) -> bool {
        self.active && !self.archived
    }

    /// Archive the plan and every item. Terminal.
    pub fn archive(&mut self) {
        self.archived = true;
        self.active = false;
        for item in &mut self.items {
            item.archive();
        }
    }
}

impl PlanItem {
    /// Active and not archived.
    pub fn is_live(&self) -> bool {
        self.item_active && !self.archived
    }

    /// Live with at least one session left.
    pub fn can_consume(&self) -> bool {
        self.is_live() && self.remaining_quantity > 0
    }

    pub fn archive(&mut self) {
        self.archived = true;
        self.item_active = false;
    }
}
