//! Periodic sweep: walks every store with stocks or batches, re-triggers
//! low-stock and expiry notifications, and recalculates availability for
//! provisions whose batches passed their expiry. Alerts are re-issued on
//! every sweep; deduplication is the notification collaborator's concern.

use common_observability::EngineMetrics;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::InventoryResult;
use crate::models::{RecalculateInput, StoreProvision, StoreStock};
use crate::notifier::{Notifier, StockAlert};
use crate::recalc::recalculate_out_of_stock;

const SWEPT_STORE_IDS_SQL: &str =
    "SELECT DISTINCT store_id FROM store_stocks \
     UNION \
     SELECT DISTINCT store_id FROM store_provisions WHERE deleted_at IS NULL";

const LOW_STOCKS_SQL: &str =
    "SELECT id, store_id, ingredient_id, quantity, low_stock_threshold \
     FROM store_stocks WHERE store_id = $1 AND quantity <= low_stock_threshold";

const EXPIRING_BATCHES_SQL: &str =
    "SELECT id, store_id, provision_id, volume, initial_volume, status, expiration_minutes, \
            completed_at, expires_at, created_at \
     FROM store_provisions \
     WHERE store_id = $1 AND status = 'COMPLETED' AND deleted_at IS NULL \
       AND expires_at > NOW() \
       AND expires_at <= NOW() + make_interval(mins => $2)";

// Volume still on hand when the batch expired is what makes this
// alert-worthy; fully drained batches just age out.
const EXPIRED_BATCHES_SQL: &str =
    "SELECT id, store_id, provision_id, volume, initial_volume, status, expiration_minutes, \
            completed_at, expires_at, created_at \
     FROM store_provisions \
     WHERE store_id = $1 AND status = 'COMPLETED' AND deleted_at IS NULL \
       AND expires_at <= NOW() AND volume > 0";

#[derive(Debug, Default)]
pub struct SweepSummary {
    pub stores: usize,
    pub low_stock_alerts: usize,
    pub expiring_alerts: usize,
    pub expired_alerts: usize,
}

pub async fn run_inventory_sweep(
    pool: &PgPool,
    notifier: &dyn Notifier,
    metrics: &EngineMetrics,
    expiry_warning_window_minutes: i32,
) -> InventoryResult<SweepSummary> {
    let store_ids = sqlx::query_scalar::<_, Uuid>(SWEPT_STORE_IDS_SQL)
        .fetch_all(pool)
        .await?;

    let mut summary = SweepSummary { stores: store_ids.len(), ..SweepSummary::default() };
    for store_id in store_ids {
        sweep_store(pool, notifier, metrics, store_id, expiry_warning_window_minutes, &mut summary)
            .await?;
    }
    Ok(summary)
}

async fn sweep_store(
    pool: &PgPool,
    notifier: &dyn Notifier,
    metrics: &EngineMetrics,
    store_id: Uuid,
    expiry_warning_window_minutes: i32,
    summary: &mut SweepSummary,
) -> InventoryResult<()> {
    let low_stocks = sqlx::query_as::<_, StoreStock>(LOW_STOCKS_SQL)
        .bind(store_id)
        .fetch_all(pool)
        .await?;
    for stock in &low_stocks {
        dispatch(
            notifier,
            metrics,
            &StockAlert::LowStock {
                store_id,
                ingredient_id: stock.ingredient_id,
                quantity: stock.quantity,
                threshold: stock.low_stock_threshold,
            },
        );
    }
    summary.low_stock_alerts += low_stocks.len();

    let expiring = sqlx::query_as::<_, StoreProvision>(EXPIRING_BATCHES_SQL)
        .bind(store_id)
        .bind(expiry_warning_window_minutes)
        .fetch_all(pool)
        .await?;
    for batch in &expiring {
        if let Some(expires_at) = batch.expires_at {
            dispatch(
                notifier,
                metrics,
                &StockAlert::ProvisionExpiresSoon {
                    store_id,
                    store_provision_id: batch.id,
                    provision_id: batch.provision_id,
                    expires_at,
                },
            );
        }
    }
    summary.expiring_alerts += expiring.len();

    let expired = sqlx::query_as::<_, StoreProvision>(EXPIRED_BATCHES_SQL)
        .bind(store_id)
        .fetch_all(pool)
        .await?;
    let mut expired_provision_ids: Vec<Uuid> = Vec::with_capacity(expired.len());
    for batch in &expired {
        if let Some(expired_at) = batch.expires_at {
            dispatch(
                notifier,
                metrics,
                &StockAlert::ProvisionExpired {
                    store_id,
                    store_provision_id: batch.id,
                    provision_id: batch.provision_id,
                    expired_at,
                },
            );
        }
        expired_provision_ids.push(batch.provision_id);
    }
    summary.expired_alerts += expired.len();

    expired_provision_ids.sort();
    expired_provision_ids.dedup();
    if !expired_provision_ids.is_empty() {
        // Expired volume just left the availability pool; refresh the flags.
        let input = RecalculateInput::provisions(expired_provision_ids);
        if let Err(err) = recalculate_out_of_stock(pool, store_id, &input).await {
            metrics.recalc_failures_total.inc();
            tracing::error!(
                store_id = %store_id,
                error = %err,
                "out-of-stock recalculation during sweep failed; continuing with next store"
            );
        }
    }

    Ok(())
}

fn dispatch(notifier: &dyn Notifier, metrics: &EngineMetrics, alert: &StockAlert) {
    metrics.stock_alerts_total.with_label_values(&[alert.kind()]).inc();
    notifier.dispatch(alert);
}
