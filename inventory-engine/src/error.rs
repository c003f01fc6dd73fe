use thiserror::Error;
use uuid::Uuid;

pub type InventoryResult<T> = Result<T, InventoryError>;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("insufficient stock for ingredient {ingredient_id}: requested {requested}, available {available}")]
    InsufficientStock {
        ingredient_id: Uuid,
        requested: f64,
        available: f64,
    },
    #[error("insufficient provision volume for provision {provision_id}: requested {requested}, available {available}")]
    InsufficientProvision {
        provision_id: Uuid,
        requested: f64,
        available: f64,
    },
    #[error("stock not found for ingredient {0}")]
    StockNotFound(Uuid),
    #[error("provision {0} not found")]
    ProvisionNotFound(Uuid),
    #[error("store product {0} not found")]
    StoreProductNotFound(Uuid),
    #[error("store additive {0} not found")]
    StoreAdditiveNotFound(Uuid),
    #[error("store provision batch {0} not found")]
    StoreProvisionNotFound(Uuid),
    #[error("store provision batch {0} is not in PREPARING state")]
    ProvisionNotPreparing(Uuid),
    #[error("store provision batch {0} still holds volume and has not expired")]
    ProvisionStillHoldsVolume(Uuid),
    #[error("supplied ingredient lines do not match the recipe of provision {0}")]
    ProvisionIngredientMismatch(Uuid),
    #[error("daily preparation limit reached for provision {provision_id} ({limit} per day)")]
    DailyLimitReached { provision_id: Uuid, limit: i32 },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl InventoryError {
    /// True for the errors an order-placement caller should surface as a
    /// structured "cannot fulfill" response rather than an internal failure.
    pub fn is_insufficiency(&self) -> bool {
        matches!(
            self,
            InventoryError::InsufficientStock { .. } | InventoryError::InsufficientProvision { .. }
        )
    }

    /// Metric label used by callers that count aborted deductions.
    pub fn reason_label(&self) -> &'static str {
        match self {
            InventoryError::InsufficientStock { .. }
            | InventoryError::InsufficientProvision { .. } => "insufficient",
            InventoryError::Database(_) => "db",
            _ => "not_found",
        }
    }
}
