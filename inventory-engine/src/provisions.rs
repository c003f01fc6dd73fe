//! Store provision batch lifecycle: record a preparation batch, realize it
//! (deducting ingredient stock), and delete it under the allowed conditions.
//!
//! Batch states: PREPARING -> COMPLETED (stock deducted) -> EMPTY (drained by
//! consumption). A COMPLETED or EMPTY batch past `expires_at` is treated as
//! expired by every availability/deduction query without a stored state
//! change.

use std::collections::BTreeSet;

use common_observability::EngineMetrics;
use sqlx::PgPool;
use uuid::Uuid;

use crate::deduction::deduct_for_store_provision;
use crate::error::{InventoryError, InventoryResult};
use crate::models::{RecalculateInput, StoreProvision, StoreProvisionStatus, StoreStock};
use crate::recalc::recalculate_out_of_stock;
use crate::DEFAULT_LOW_STOCK_THRESHOLD;

const STORE_PROVISION_COLUMNS: &str =
    "id, store_id, provision_id, volume, initial_volume, status, expiration_minutes, \
     completed_at, expires_at, created_at";

#[derive(Debug, Clone)]
pub struct ProvisionIngredientLine {
    pub ingredient_id: Uuid,
    pub quantity: f64,
}

/// Creation input for one preparation batch. The ingredient lines are the
/// batch's own (quantities may differ from the catalog recipe), but the set
/// of ingredient IDs must match the catalog provision exactly.
#[derive(Debug, Clone)]
pub struct NewStoreProvision {
    pub provision_id: Uuid,
    pub volume: f64,
    pub expiration_minutes: i32,
    pub ingredients: Vec<ProvisionIngredientLine>,
}

#[derive(sqlx::FromRow)]
struct ProvisionLimitRow {
    limit_per_day: i32,
}

/// Records a new PREPARING batch. Enforces the provision's daily limit,
/// validates the supplied ingredient lines against the catalog recipe, and
/// auto-creates zero-quantity stock rows for ingredients this store does not
/// track yet, all in one transaction. No stock is deducted here.
pub async fn create_store_provision(
    pool: &PgPool,
    store_id: Uuid,
    input: &NewStoreProvision,
) -> InventoryResult<StoreProvision> {
    let mut tx = pool.begin().await?;

    let provision = sqlx::query_as::<_, ProvisionLimitRow>(
        "SELECT limit_per_day FROM provisions WHERE id = $1",
    )
    .bind(input.provision_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(InventoryError::ProvisionNotFound(input.provision_id))?;

    let recipe_ingredient_ids = sqlx::query_scalar::<_, Uuid>(
        "SELECT DISTINCT ingredient_id FROM provision_ingredients WHERE provision_id = $1",
    )
    .bind(input.provision_id)
    .fetch_all(&mut *tx)
    .await?;
    validate_ingredient_lines(input, &recipe_ingredient_ids)?;

    if provision.limit_per_day > 0 {
        let prepared_today = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM store_provisions \
             WHERE store_id = $1 AND provision_id = $2 \
               AND created_at >= date_trunc('day', NOW()) \
               AND deleted_at IS NULL",
        )
        .bind(store_id)
        .bind(input.provision_id)
        .fetch_one(&mut *tx)
        .await?;
        if prepared_today >= provision.limit_per_day as i64 {
            return Err(InventoryError::DailyLimitReached {
                provision_id: input.provision_id,
                limit: provision.limit_per_day,
            });
        }
    }

    let batch_id = Uuid::new_v4();
    let batch = sqlx::query_as::<_, StoreProvision>(&format!(
        "INSERT INTO store_provisions \
         (id, store_id, provision_id, volume, initial_volume, status, expiration_minutes) \
         VALUES ($1, $2, $3, $4, $4, 'PREPARING', $5) \
         RETURNING {STORE_PROVISION_COLUMNS}"
    ))
    .bind(batch_id)
    .bind(store_id)
    .bind(input.provision_id)
    .bind(input.volume)
    .bind(input.expiration_minutes)
    .fetch_one(&mut *tx)
    .await?;

    for line in &input.ingredients {
        sqlx::query(
            "INSERT INTO store_provision_ingredients (id, store_provision_id, ingredient_id, quantity) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4())
        .bind(batch_id)
        .bind(line.ingredient_id)
        .bind(line.quantity)
        .execute(&mut *tx)
        .await?;
    }

    // A store may receive a batch recipe before it ever stocked one of the
    // ingredients; seed those rows at zero so later deductions find them.
    let line_ids: Vec<Uuid> = input.ingredients.iter().map(|l| l.ingredient_id).collect();
    let missing = sqlx::query_scalar::<_, Uuid>(
        "SELECT i.id FROM ingredients i \
         WHERE i.id = ANY($2) \
           AND NOT EXISTS (SELECT 1 FROM store_stocks ss \
                           WHERE ss.store_id = $1 AND ss.ingredient_id = i.id)",
    )
    .bind(store_id)
    .bind(&line_ids)
    .fetch_all(&mut *tx)
    .await?;
    for ingredient_id in missing {
        sqlx::query(
            "INSERT INTO store_stocks (id, store_id, ingredient_id, quantity, low_stock_threshold) \
             VALUES ($1, $2, $3, 0, $4) \
             ON CONFLICT (store_id, ingredient_id) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(store_id)
        .bind(ingredient_id)
        .bind(DEFAULT_LOW_STOCK_THRESHOLD)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(batch)
}

fn validate_ingredient_lines(
    input: &NewStoreProvision,
    recipe_ingredient_ids: &[Uuid],
) -> InventoryResult<()> {
    let expected: BTreeSet<Uuid> = recipe_ingredient_ids.iter().copied().collect();
    let supplied: BTreeSet<Uuid> = input.ingredients.iter().map(|l| l.ingredient_id).collect();
    if expected != supplied {
        return Err(InventoryError::ProvisionIngredientMismatch(input.provision_id));
    }
    Ok(())
}

/// Realizes a batch: PREPARING -> COMPLETED. The batch's own ingredient
/// lines are deducted from store stock in the same transaction that stamps
/// `completed_at` and `expires_at`; an insufficiency rolls everything back
/// and the batch stays PREPARING. On success the recalculator runs
/// best-effort for the touched ingredients and the batch's provision.
pub async fn complete_store_provision(
    pool: &PgPool,
    metrics: &EngineMetrics,
    store_id: Uuid,
    store_provision_id: Uuid,
) -> InventoryResult<(StoreProvision, Vec<StoreStock>)> {
    let mut tx = pool.begin().await?;

    let batch = sqlx::query_as::<_, StoreProvision>(&format!(
        "SELECT {STORE_PROVISION_COLUMNS} FROM store_provisions \
         WHERE id = $1 AND store_id = $2 AND deleted_at IS NULL FOR UPDATE"
    ))
    .bind(store_provision_id)
    .bind(store_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(InventoryError::StoreProvisionNotFound(store_provision_id))?;

    if batch.status != StoreProvisionStatus::Preparing {
        return Err(InventoryError::ProvisionNotPreparing(store_provision_id));
    }

    let deducted_stocks = match deduct_for_store_provision(&mut tx, &batch).await {
        Ok(stocks) => stocks,
        Err(err) => {
            metrics
                .deduction_failures_total
                .with_label_values(&[err.reason_label()])
                .inc();
            return Err(err);
        }
    };

    let completed = sqlx::query_as::<_, StoreProvision>(&format!(
        "UPDATE store_provisions \
         SET status = 'COMPLETED', \
             completed_at = NOW(), \
             expires_at = CASE WHEN expiration_minutes > 0 \
                               THEN NOW() + make_interval(mins => expiration_minutes) \
                               ELSE NULL END \
         WHERE id = $1 \
         RETURNING {STORE_PROVISION_COLUMNS}"
    ))
    .bind(store_provision_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    metrics.deductions_total.with_label_values(&["provision"]).inc();

    let recalc_input = RecalculateInput {
        ingredient_ids: deducted_stocks.iter().map(|s| s.ingredient_id).collect(),
        provision_ids: vec![completed.provision_id],
        ..RecalculateInput::default()
    };
    if let Err(err) = recalculate_out_of_stock(pool, store_id, &recalc_input).await {
        metrics.recalc_failures_total.inc();
        tracing::error!(
            store_id = %store_id,
            store_provision_id = %store_provision_id,
            error = %err,
            "out-of-stock recalculation after batch completion failed; flags may be stale"
        );
    }

    Ok((completed, deducted_stocks))
}

/// Deletes a batch. A PREPARING batch never deducted stock and is removed
/// outright. A COMPLETED batch may only be soft-deleted once it is drained
/// or expired; a live batch still counts toward availability and is
/// protected.
pub async fn delete_store_provision(
    pool: &PgPool,
    store_id: Uuid,
    store_provision_id: Uuid,
) -> InventoryResult<()> {
    let mut tx = pool.begin().await?;

    let batch = sqlx::query_as::<_, StoreProvision>(&format!(
        "SELECT {STORE_PROVISION_COLUMNS} FROM store_provisions \
         WHERE id = $1 AND store_id = $2 AND deleted_at IS NULL FOR UPDATE"
    ))
    .bind(store_provision_id)
    .bind(store_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(InventoryError::StoreProvisionNotFound(store_provision_id))?;

    match batch.status {
        StoreProvisionStatus::Preparing => {
            sqlx::query("DELETE FROM store_provisions WHERE id = $1")
                .bind(store_provision_id)
                .execute(&mut *tx)
                .await?;
        }
        StoreProvisionStatus::Empty => {
            soft_delete(&mut tx, store_provision_id).await?;
        }
        StoreProvisionStatus::Completed => {
            let drained = batch.volume <= 0.0;
            if !drained && !batch.is_expired(chrono::Utc::now()) {
                return Err(InventoryError::ProvisionStillHoldsVolume(store_provision_id));
            }
            soft_delete(&mut tx, store_provision_id).await?;
        }
    }

    tx.commit().await?;
    Ok(())
}

async fn soft_delete(tx: &mut sqlx::PgConnection, id: Uuid) -> InventoryResult<()> {
    sqlx::query("UPDATE store_provisions SET deleted_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    Ok(())
}
