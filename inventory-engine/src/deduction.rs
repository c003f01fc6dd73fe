//! Deduction Engine: subtracts required quantities from physical stock and
//! from provision batches inside the caller's transaction. Every function
//! here must run on a transaction connection; any returned error is expected
//! to abort that transaction, leaving no partial decrement behind.

use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{InventoryError, InventoryResult};
use crate::models::{DeductedInventory, RequiredUsage, StoreProvision, StoreStock, UsageLine};
use crate::recipe;

const STOCK_FOR_UPDATE_SQL: &str =
    "SELECT id, store_id, ingredient_id, quantity, low_stock_threshold \
     FROM store_stocks WHERE store_id = $1 AND ingredient_id = $2 FOR UPDATE";

const DECREMENT_STOCK_SQL: &str =
    "UPDATE store_stocks SET quantity = quantity - $3 \
     WHERE store_id = $1 AND ingredient_id = $2 \
     RETURNING id, store_id, ingredient_id, quantity, low_stock_threshold";

// Oldest COMPLETED batch first; expired and deleted batches never take part.
const BATCHES_FOR_UPDATE_SQL: &str =
    "SELECT id, store_id, provision_id, volume, initial_volume, status, expiration_minutes, \
            completed_at, expires_at, created_at \
     FROM store_provisions \
     WHERE store_id = $1 AND provision_id = $2 \
       AND status = 'COMPLETED' \
       AND (expires_at IS NULL OR expires_at > NOW()) \
       AND deleted_at IS NULL \
     ORDER BY created_at ASC \
     FOR UPDATE";

const DRAIN_BATCH_SQL: &str =
    "UPDATE store_provisions \
     SET volume = volume - $2, \
         status = CASE WHEN volume - $2 <= 0 THEN 'EMPTY'::store_provision_status ELSE status END \
     WHERE id = $1 \
     RETURNING id, store_id, provision_id, volume, initial_volume, status, expiration_minutes, \
               completed_at, expires_at, created_at";

/// Verifies and decrements the stock row of every required ingredient. Rows
/// are locked `FOR UPDATE` before the verification so two concurrent
/// deductions against the same store serialize here instead of overdrawing.
pub async fn deduct_ingredients(
    tx: &mut PgConnection,
    store_id: Uuid,
    required: &std::collections::BTreeMap<Uuid, f64>,
) -> InventoryResult<Vec<StoreStock>> {
    let mut updated = Vec::with_capacity(required.len());
    for (&ingredient_id, &requested) in required {
        if requested <= 0.0 {
            continue;
        }
        let stock = sqlx::query_as::<_, StoreStock>(STOCK_FOR_UPDATE_SQL)
            .bind(store_id)
            .bind(ingredient_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(InventoryError::StockNotFound(ingredient_id))?;
        if stock.quantity < requested {
            return Err(InventoryError::InsufficientStock {
                ingredient_id,
                requested,
                available: stock.quantity,
            });
        }
        let after = sqlx::query_as::<_, StoreStock>(DECREMENT_STOCK_SQL)
            .bind(store_id)
            .bind(ingredient_id)
            .bind(requested)
            .fetch_one(&mut *tx)
            .await?;
        updated.push(after);
    }
    Ok(updated)
}

/// Drains `required_volume` from the store's COMPLETED, non-expired batches
/// of one provision, oldest first. A batch drained to zero transitions to
/// EMPTY. If the batches together cannot cover the requirement, nothing is
/// written and the whole transaction is expected to roll back.
pub async fn deduct_provisions(
    tx: &mut PgConnection,
    store_id: Uuid,
    provision_id: Uuid,
    required_volume: f64,
) -> InventoryResult<Vec<StoreProvision>> {
    if required_volume <= 0.0 {
        return Ok(Vec::new());
    }
    let batches = sqlx::query_as::<_, StoreProvision>(BATCHES_FOR_UPDATE_SQL)
        .bind(store_id)
        .bind(provision_id)
        .fetch_all(&mut *tx)
        .await?;

    let volumes: Vec<(Uuid, f64)> = batches.iter().map(|b| (b.id, b.volume)).collect();
    let draws = plan_batch_draws(&volumes, required_volume).map_err(|shortfall| {
        InventoryError::InsufficientProvision {
            provision_id,
            requested: required_volume,
            available: required_volume - shortfall,
        }
    })?;

    let mut updated = Vec::with_capacity(draws.len());
    for (batch_id, draw) in draws {
        let after = sqlx::query_as::<_, StoreProvision>(DRAIN_BATCH_SQL)
            .bind(batch_id)
            .bind(draw)
            .fetch_one(&mut *tx)
            .await?;
        updated.push(after);
    }
    Ok(updated)
}

/// FIFO draw plan over `(batch_id, volume)` pairs already ordered
/// oldest-first. Returns the per-batch draws, or `Err(shortfall)` when the
/// combined volume cannot cover the requirement.
fn plan_batch_draws(batches: &[(Uuid, f64)], required: f64) -> Result<Vec<(Uuid, f64)>, f64> {
    let mut remaining = required;
    let mut draws = Vec::new();
    for &(id, volume) in batches {
        if remaining <= 0.0 {
            break;
        }
        let draw = volume.min(remaining);
        if draw <= 0.0 {
            continue;
        }
        remaining -= draw;
        draws.push((id, draw));
    }
    if remaining > 0.0 {
        return Err(remaining);
    }
    Ok(draws)
}

/// Applies both deduction steps for an already-resolved usage map under the
/// caller's transaction.
pub async fn deduct_usage(
    tx: &mut PgConnection,
    store_id: Uuid,
    usage: &RequiredUsage,
) -> InventoryResult<DeductedInventory> {
    let mut deducted = DeductedInventory::default();
    deducted.stocks = deduct_ingredients(tx, store_id, &usage.ingredients).await?;
    for (&provision_id, &volume) in &usage.provisions {
        let batches = deduct_provisions(tx, store_id, provision_id, volume).await?;
        deducted.provisions.extend(batches);
    }
    Ok(deducted)
}

/// Deducts the direct recipe lines of one product size.
pub async fn deduct_for_product_size(
    tx: &mut PgConnection,
    store_id: Uuid,
    product_size_id: Uuid,
) -> InventoryResult<DeductedInventory> {
    let usage = recipe::resolve_product_sizes_direct(tx, &[product_size_id]).await?;
    deduct_usage(tx, store_id, &usage).await
}

/// Deducts the direct recipe lines of one additive.
pub async fn deduct_for_additive(
    tx: &mut PgConnection,
    store_id: Uuid,
    additive_id: Uuid,
) -> InventoryResult<DeductedInventory> {
    let usage = recipe::resolve_additives(tx, &[additive_id]).await?;
    deduct_usage(tx, store_id, &usage).await
}

/// Realizes a preparation batch: deducts the batch's own ingredient lines
/// from store stock. Part of the PREPARING → COMPLETED transition and must
/// share its transaction.
pub async fn deduct_for_store_provision(
    tx: &mut PgConnection,
    batch: &StoreProvision,
) -> InventoryResult<Vec<StoreStock>> {
    let lines = sqlx::query_as::<_, UsageLine>(
        "SELECT ingredient_id AS resource_id, quantity AS required \
         FROM store_provision_ingredients WHERE store_provision_id = $1",
    )
    .bind(batch.id)
    .fetch_all(&mut *tx)
    .await?;

    let mut required = std::collections::BTreeMap::new();
    for line in &lines {
        *required.entry(line.resource_id).or_insert(0.0) += line.required;
    }
    deduct_ingredients(tx, batch.store_id, &required).await
}
