use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    WaitingForPayment,
    Pending,
    Preparing,
    Completed,
    Cancelled,
    FailedPayment,
}

impl OrderStatus {
    /// Orders in these states still hold (freeze) inventory.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            OrderStatus::WaitingForPayment | OrderStatus::Pending | OrderStatus::Preparing
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "suborder_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuborderStatus {
    Pending,
    Preparing,
    Completed,
    Cancelled,
}

impl SuborderStatus {
    pub fn is_active(self) -> bool {
        matches!(self, SuborderStatus::Pending | SuborderStatus::Preparing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "store_provision_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StoreProvisionStatus {
    Preparing,
    Completed,
    Empty,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct StoreStock {
    pub id: Uuid,
    pub store_id: Uuid,
    pub ingredient_id: Uuid,
    pub quantity: f64,
    pub low_stock_threshold: f64,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct StoreProvision {
    pub id: Uuid,
    pub store_id: Uuid,
    pub provision_id: Uuid,
    pub volume: f64,
    pub initial_volume: f64,
    pub status: StoreProvisionStatus,
    pub expiration_minutes: i32,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl StoreProvision {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// One recipe line loaded from the database: `resource_id` is an ingredient
/// or provision ID depending on the query that produced it.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UsageLine {
    pub resource_id: Uuid,
    pub required: f64,
}

/// One per-unit recipe line used by the recalculator; `unit_id` is a store
/// product or store additive ID.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UnitUsageLine {
    pub unit_id: Uuid,
    pub resource_id: Uuid,
    pub required: f64,
}

/// Resolved consumption of one or more sellable units: ingredient quantities
/// and provision volumes, keyed by resource ID. BTreeMap keeps iteration
/// (and therefore error reporting) deterministic.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequiredUsage {
    pub ingredients: BTreeMap<Uuid, f64>,
    pub provisions: BTreeMap<Uuid, f64>,
}

impl RequiredUsage {
    pub fn is_empty(&self) -> bool {
        self.ingredients.is_empty() && self.provisions.is_empty()
    }

    pub fn add_ingredient(&mut self, id: Uuid, quantity: f64) {
        *self.ingredients.entry(id).or_insert(0.0) += quantity;
    }

    pub fn add_provision(&mut self, id: Uuid, volume: f64) {
        *self.provisions.entry(id).or_insert(0.0) += volume;
    }

    pub fn merge(&mut self, other: &RequiredUsage) {
        for (id, qty) in &other.ingredients {
            self.add_ingredient(*id, *qty);
        }
        for (id, vol) in &other.provisions {
            self.add_provision(*id, *vol);
        }
    }
}

/// Quantities already promised to active, not-yet-fulfilled orders.
/// Ephemeral: recomputed from the order tables on every call, never stored.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FrozenInventory {
    pub ingredients: BTreeMap<Uuid, f64>,
    pub provisions: BTreeMap<Uuid, f64>,
}

impl FrozenInventory {
    pub fn frozen_ingredient(&self, id: Uuid) -> f64 {
        self.ingredients.get(&id).copied().unwrap_or(0.0)
    }

    pub fn frozen_provision(&self, id: Uuid) -> f64 {
        self.provisions.get(&id).copied().unwrap_or(0.0)
    }

    pub fn reserve_ingredient(&mut self, id: Uuid, quantity: f64) {
        *self.ingredients.entry(id).or_insert(0.0) += quantity;
    }

    pub fn reserve_provision(&mut self, id: Uuid, volume: f64) {
        *self.provisions.entry(id).or_insert(0.0) += volume;
    }
}

/// Restricts a frozen-inventory computation to the resources a caller cares
/// about. An empty ID list places no restriction on that resource class.
#[derive(Debug, Clone, Default)]
pub struct FrozenInventoryFilter {
    pub ingredient_ids: Vec<Uuid>,
    pub provision_ids: Vec<Uuid>,
}

impl FrozenInventoryFilter {
    pub fn allows_ingredient(&self, id: Uuid) -> bool {
        self.ingredient_ids.is_empty() || self.ingredient_ids.contains(&id)
    }

    pub fn allows_provision(&self, id: Uuid) -> bool {
        self.provision_ids.is_empty() || self.provision_ids.contains(&id)
    }
}

/// Changed-resource input for the out-of-stock recalculator. Any combination
/// of ID classes may be set; an entirely empty input is a no-op.
#[derive(Debug, Clone, Default)]
pub struct RecalculateInput {
    pub ingredient_ids: Vec<Uuid>,
    pub provision_ids: Vec<Uuid>,
    pub product_size_ids: Vec<Uuid>,
    pub additive_ids: Vec<Uuid>,
}

impl RecalculateInput {
    pub fn is_empty(&self) -> bool {
        self.ingredient_ids.is_empty()
            && self.provision_ids.is_empty()
            && self.product_size_ids.is_empty()
            && self.additive_ids.is_empty()
    }

    pub fn ingredients(ids: Vec<Uuid>) -> Self {
        Self { ingredient_ids: ids, ..Self::default() }
    }

    pub fn provisions(ids: Vec<Uuid>) -> Self {
        Self { provision_ids: ids, ..Self::default() }
    }

    pub fn product_sizes(ids: Vec<Uuid>) -> Self {
        Self { product_size_ids: ids, ..Self::default() }
    }

    pub fn additives(ids: Vec<Uuid>) -> Self {
        Self { additive_ids: ids, ..Self::default() }
    }
}

/// Rows actually touched by a committed deduction, returned so callers can
/// detect threshold crossings and know what to recalculate.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeductedInventory {
    pub stocks: Vec<StoreStock>,
    pub provisions: Vec<StoreProvision>,
}

impl DeductedInventory {
    pub fn extend(&mut self, other: DeductedInventory) {
        self.stocks.extend(other.stocks);
        self.provisions.extend(other.provisions);
    }

    pub fn touched_ingredient_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.stocks.iter().map(|s| s.ingredient_id).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn touched_provision_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.provisions.iter().map(|p| p.provision_id).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// One line of an inbound order: a store product plus the add-ons the
/// customer selected for it.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderLine {
    pub store_product_id: Uuid,
    pub store_additive_ids: Vec<Uuid>,
}
