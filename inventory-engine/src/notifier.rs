//! Outbound notification contract. The engine only decides *that* something
//! is alert-worthy and with which context; recipient resolution and delivery
//! belong to the notification collaborator behind the [`Notifier`] trait.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::DeductedInventory;

/// Alert payloads, one variant per known detail shape. A new variant breaks
/// every `match` until it is handled.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StockAlert {
    LowStock {
        store_id: Uuid,
        ingredient_id: Uuid,
        quantity: f64,
        threshold: f64,
    },
    ProvisionExpiresSoon {
        store_id: Uuid,
        store_provision_id: Uuid,
        provision_id: Uuid,
        expires_at: DateTime<Utc>,
    },
    ProvisionExpired {
        store_id: Uuid,
        store_provision_id: Uuid,
        provision_id: Uuid,
        expired_at: DateTime<Utc>,
    },
}

impl StockAlert {
    /// Stable label used as the metrics dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            StockAlert::LowStock { .. } => "low_stock",
            StockAlert::ProvisionExpiresSoon { .. } => "provision_expires_soon",
            StockAlert::ProvisionExpired { .. } => "provision_expired",
        }
    }
}

pub trait Notifier: Send + Sync {
    fn dispatch(&self, alert: &StockAlert);
}

/// Default notifier: structured log lines only. Production wiring swaps in
/// the real dispatch implementation.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn dispatch(&self, alert: &StockAlert) {
        match alert {
            StockAlert::LowStock { store_id, ingredient_id, quantity, threshold } => {
                tracing::warn!(
                    store_id = %store_id,
                    ingredient_id = %ingredient_id,
                    quantity,
                    threshold,
                    "stock at or below low-stock threshold"
                );
            }
            StockAlert::ProvisionExpiresSoon { store_id, store_provision_id, expires_at, .. } => {
                tracing::warn!(
                    store_id = %store_id,
                    store_provision_id = %store_provision_id,
                    expires_at = %expires_at,
                    "provision batch nears expiry"
                );
            }
            StockAlert::ProvisionExpired { store_id, store_provision_id, expired_at, .. } => {
                tracing::warn!(
                    store_id = %store_id,
                    store_provision_id = %store_provision_id,
                    expired_at = %expired_at,
                    "provision batch expired"
                );
            }
        }
    }
}

/// Low-stock alerts for the rows a committed deduction touched.
pub fn alerts_for_deduction(store_id: Uuid, deducted: &DeductedInventory) -> Vec<StockAlert> {
    deducted
        .stocks
        .iter()
        .filter(|stock| stock.quantity <= stock.low_stock_threshold)
        .map(|stock| StockAlert::LowStock {
            store_id,
            ingredient_id: stock.ingredient_id,
            quantity: stock.quantity,
            threshold: stock.low_stock_threshold,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StoreStock;

    fn stock(quantity: f64, threshold: f64) -> StoreStock {
        StoreStock {
            id: Uuid::new_v4(),
            store_id: Uuid::new_v4(),
            ingredient_id: Uuid::new_v4(),
            quantity,
            low_stock_threshold: threshold,
        }
    }

    #[test]
    fn alerts_only_for_threshold_crossings() {
        let store_id = Uuid::new_v4();
        let deducted = DeductedInventory {
            stocks: vec![stock(10.0, 5.0), stock(5.0, 5.0), stock(0.0, 5.0)],
            provisions: vec![],
        };

        let alerts = alerts_for_deduction(store_id, &deducted);
        assert_eq!(alerts.len(), 2);
        assert!(alerts.iter().all(|a| a.kind() == "low_stock"));
    }

    #[test]
    fn alert_serializes_with_type_tag() {
        let alert = StockAlert::LowStock {
            store_id: Uuid::new_v4(),
            ingredient_id: Uuid::new_v4(),
            quantity: 1.0,
            threshold: 5.0,
        };
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["type"], "low_stock");
    }
}
