//! Order integration: the read-path availability check for a set of order
//! lines and the write-path commit that deducts a whole order atomically.

use common_observability::EngineMetrics;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::availability;
use crate::deduction;
use crate::error::{InventoryError, InventoryResult};
use crate::frozen::calculate_frozen_inventory;
use crate::models::{DeductedInventory, OrderLine, RecalculateInput, RequiredUsage};
use crate::recalc::recalculate_out_of_stock;
use crate::recipe;

const STORE_PRODUCT_SIZE_SQL: &str =
    "SELECT product_size_id FROM store_products WHERE id = $1 AND store_id = $2";

const STORE_ADDITIVE_ID_SQL: &str =
    "SELECT additive_id FROM store_additives WHERE id = $1 AND store_id = $2";

const ACTIVE_SUBORDER_USAGE_SOURCES_SQL: &str =
    "SELECT sub.id AS suborder_id, sp.product_size_id \
     FROM suborders sub \
     JOIN orders o ON o.id = sub.order_id \
     JOIN store_products sp ON sp.id = sub.store_product_id \
     WHERE sub.order_id = $1 AND o.store_id = $2 \
       AND sub.status IN ('PENDING', 'PREPARING')";

const SUBORDER_SELECTED_ADDITIVES_SQL: &str =
    "SELECT sta.additive_id \
     FROM suborder_additives sa \
     JOIN store_additives sta ON sta.id = sa.store_additive_id \
     WHERE sa.suborder_id = $1";

#[derive(sqlx::FromRow)]
struct SuborderUsageSource {
    suborder_id: Uuid,
    product_size_id: Uuid,
}

/// Consumption of one order line: the product size's direct lines plus the
/// direct lines of every *selected* additive. Default add-ons reach this
/// path as selected ones; the order module materializes them on creation.
async fn resolve_line_usage(
    conn: &mut PgConnection,
    store_id: Uuid,
    line: &OrderLine,
) -> InventoryResult<RequiredUsage> {
    let product_size_id = sqlx::query_scalar::<_, Uuid>(STORE_PRODUCT_SIZE_SQL)
        .bind(line.store_product_id)
        .bind(store_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(InventoryError::StoreProductNotFound(line.store_product_id))?;

    let mut additive_ids = Vec::with_capacity(line.store_additive_ids.len());
    for &store_additive_id in &line.store_additive_ids {
        let additive_id = sqlx::query_scalar::<_, Uuid>(STORE_ADDITIVE_ID_SQL)
            .bind(store_additive_id)
            .bind(store_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(InventoryError::StoreAdditiveNotFound(store_additive_id))?;
        additive_ids.push(additive_id);
    }

    let mut usage = recipe::resolve_product_sizes_direct(conn, &[product_size_id]).await?;
    // resolve per additive so a doubly-selected add-on counts twice
    for additive_id in additive_ids {
        let additive_usage = recipe::resolve_additives(conn, &[additive_id]).await?;
        usage.merge(&additive_usage);
    }
    Ok(usage)
}

/// Read-path validation: checks every line against one shared frozen
/// snapshot, so the lines of this request cannot starve each other. Success
/// here is advisory; the commit path re-verifies under row locks.
pub async fn check_order_lines(
    conn: &mut PgConnection,
    store_id: Uuid,
    lines: &[OrderLine],
) -> InventoryResult<()> {
    let mut frozen = calculate_frozen_inventory(conn, store_id, None).await?;
    for line in lines {
        let usage = resolve_line_usage(conn, store_id, line).await?;
        availability::check_store_stocks(conn, store_id, &usage.ingredients, &mut frozen).await?;
        availability::check_store_provisions(conn, store_id, &usage.provisions, &mut frozen)
            .await?;
    }
    Ok(())
}

/// Commits an order's inventory: resolves the usage of every active suborder
/// (product size plus selected additives), deducts it, and marks the order
/// fulfilled, all in ONE transaction. Verification happens on the locked
/// rows inside that transaction, so a concurrent commit against the same
/// store serializes instead of overselling. Afterward the out-of-stock
/// recalculator runs best-effort for the touched resources; its failure
/// never un-commits the order.
pub async fn commit_order(
    pool: &PgPool,
    metrics: &EngineMetrics,
    store_id: Uuid,
    order_id: Uuid,
) -> InventoryResult<DeductedInventory> {
    let mut tx = pool.begin().await?;

    let sources = sqlx::query_as::<_, SuborderUsageSource>(ACTIVE_SUBORDER_USAGE_SOURCES_SQL)
        .bind(order_id)
        .bind(store_id)
        .fetch_all(&mut *tx)
        .await?;

    let mut usage = RequiredUsage::default();
    for source in &sources {
        let direct =
            recipe::resolve_product_sizes_direct(&mut tx, &[source.product_size_id]).await?;
        usage.merge(&direct);

        let additive_ids = sqlx::query_scalar::<_, Uuid>(SUBORDER_SELECTED_ADDITIVES_SQL)
            .bind(source.suborder_id)
            .fetch_all(&mut *tx)
            .await?;
        for additive_id in additive_ids {
            let additive_usage = recipe::resolve_additives(&mut tx, &[additive_id]).await?;
            usage.merge(&additive_usage);
        }
    }

    let deducted = match deduction::deduct_usage(&mut tx, store_id, &usage).await {
        Ok(deducted) => deducted,
        Err(err) => {
            metrics
                .deduction_failures_total
                .with_label_values(&[err.reason_label()])
                .inc();
            return Err(err);
        }
    };

    // The order leaves the active set in the same transaction; otherwise its
    // suborders would still count as frozen on top of the deducted stock.
    sqlx::query(
        "UPDATE suborders SET status = 'COMPLETED' \
         WHERE order_id = $1 AND status IN ('PENDING', 'PREPARING')",
    )
    .bind(order_id)
    .execute(&mut *tx)
    .await?;
    sqlx::query("UPDATE orders SET status = 'COMPLETED' WHERE id = $1")
        .bind(order_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    metrics.deductions_total.with_label_values(&["order"]).inc();

    let recalc_input = RecalculateInput {
        ingredient_ids: deducted.touched_ingredient_ids(),
        provision_ids: deducted.touched_provision_ids(),
        ..RecalculateInput::default()
    };
    if let Err(err) = recalculate_out_of_stock(pool, store_id, &recalc_input).await {
        metrics.recalc_failures_total.inc();
        tracing::error!(
            store_id = %store_id,
            order_id = %order_id,
            error = %err,
            "out-of-stock recalculation after order commit failed; flags may be stale"
        );
    }

    Ok(deducted)
}
