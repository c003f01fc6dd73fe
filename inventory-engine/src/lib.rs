pub mod availability;
pub mod config;
pub mod deduction;
pub mod error;
pub mod frozen;
pub mod models;
pub mod notifier;
pub mod orders;
pub mod provisions;
pub mod recalc;
pub mod recipe;
pub mod sweep;

pub use error::{InventoryError, InventoryResult};

/// Threshold assigned to stock rows the engine creates on its own (zero-
/// quantity seeding when a batch references an untracked ingredient).
pub const DEFAULT_LOW_STOCK_THRESHOLD: f64 = 5.0;

use std::sync::Arc;

use common_observability::EngineMetrics;
use sqlx::PgPool;

use crate::config::EngineConfig;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: EngineConfig,
    pub metrics: Arc<EngineMetrics>,
}
