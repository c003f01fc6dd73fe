//! Out-of-Stock Recalculator: given a set of changed resource IDs, finds
//! every store product and store additive that could be affected, recomputes
//! required-vs-available with frozen amounts applied, and persists the flag
//! changes as two bulk updates. Batch recomputation only; there is no
//! per-unit round trip.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::availability::{load_provision_volumes, load_stock_quantities};
use crate::error::InventoryResult;
use crate::frozen::calculate_frozen_inventory;
use crate::models::{FrozenInventory, FrozenInventoryFilter, RecalculateInput, UnitUsageLine};
use crate::recipe;

const STORE_PRODUCTS_BY_PRODUCT_SIZES_SQL: &str =
    "SELECT DISTINCT id FROM store_products WHERE store_id = $1 AND product_size_id = ANY($2)";

const STORE_PRODUCTS_BY_INGREDIENT_USAGE_SQL: &str =
    "SELECT DISTINCT sp.id FROM store_products sp \
     JOIN product_size_ingredients psi ON psi.product_size_id = sp.product_size_id \
     WHERE sp.store_id = $1 AND psi.ingredient_id = ANY($2)";

const STORE_PRODUCTS_BY_DEFAULT_ADDITIVE_INGREDIENT_USAGE_SQL: &str =
    "SELECT DISTINCT sp.id FROM store_products sp \
     JOIN product_size_additives psa ON psa.product_size_id = sp.product_size_id AND psa.is_default \
     JOIN additive_ingredients ai ON ai.additive_id = psa.additive_id \
     WHERE sp.store_id = $1 AND ai.ingredient_id = ANY($2)";

const STORE_PRODUCTS_BY_PROVISION_USAGE_SQL: &str =
    "SELECT DISTINCT sp.id FROM store_products sp \
     JOIN product_size_provisions psp ON psp.product_size_id = sp.product_size_id \
     WHERE sp.store_id = $1 AND psp.provision_id = ANY($2)";

const STORE_PRODUCTS_BY_DEFAULT_ADDITIVE_PROVISION_USAGE_SQL: &str =
    "SELECT DISTINCT sp.id FROM store_products sp \
     JOIN product_size_additives psa ON psa.product_size_id = sp.product_size_id AND psa.is_default \
     JOIN additive_provisions ap ON ap.additive_id = psa.additive_id \
     WHERE sp.store_id = $1 AND ap.provision_id = ANY($2)";

const STORE_ADDITIVES_BY_ADDITIVES_SQL: &str =
    "SELECT DISTINCT id FROM store_additives WHERE store_id = $1 AND additive_id = ANY($2)";

const STORE_ADDITIVES_BY_INGREDIENT_USAGE_SQL: &str =
    "SELECT DISTINCT sa.id FROM store_additives sa \
     JOIN additive_ingredients ai ON ai.additive_id = sa.additive_id \
     WHERE sa.store_id = $1 AND ai.ingredient_id = ANY($2)";

const STORE_ADDITIVES_BY_PROVISION_USAGE_SQL: &str =
    "SELECT DISTINCT sa.id FROM store_additives sa \
     JOIN additive_provisions ap ON ap.additive_id = sa.additive_id \
     WHERE sa.store_id = $1 AND ap.provision_id = ANY($2)";

const PRODUCT_UNIT_INGREDIENT_USAGE_SQL: &str =
    "SELECT sp.id AS unit_id, psi.ingredient_id AS resource_id, psi.quantity AS required \
     FROM store_products sp \
     JOIN product_size_ingredients psi ON psi.product_size_id = sp.product_size_id \
     WHERE sp.id = ANY($1)";

const PRODUCT_UNIT_DEFAULT_ADDITIVE_INGREDIENT_USAGE_SQL: &str =
    "SELECT sp.id AS unit_id, ai.ingredient_id AS resource_id, ai.quantity AS required \
     FROM store_products sp \
     JOIN product_size_additives psa ON psa.product_size_id = sp.product_size_id AND psa.is_default \
     JOIN additive_ingredients ai ON ai.additive_id = psa.additive_id \
     WHERE sp.id = ANY($1)";

const PRODUCT_UNIT_PROVISION_USAGE_SQL: &str =
    "SELECT sp.id AS unit_id, psp.provision_id AS resource_id, psp.volume AS required \
     FROM store_products sp \
     JOIN product_size_provisions psp ON psp.product_size_id = sp.product_size_id \
     WHERE sp.id = ANY($1)";

const PRODUCT_UNIT_DEFAULT_ADDITIVE_PROVISION_USAGE_SQL: &str =
    "SELECT sp.id AS unit_id, ap.provision_id AS resource_id, ap.volume AS required \
     FROM store_products sp \
     JOIN product_size_additives psa ON psa.product_size_id = sp.product_size_id AND psa.is_default \
     JOIN additive_provisions ap ON ap.additive_id = psa.additive_id \
     WHERE sp.id = ANY($1)";

const ADDITIVE_UNIT_INGREDIENT_USAGE_SQL: &str =
    "SELECT sa.id AS unit_id, ai.ingredient_id AS resource_id, ai.quantity AS required \
     FROM store_additives sa \
     JOIN additive_ingredients ai ON ai.additive_id = sa.additive_id \
     WHERE sa.id = ANY($1)";

const ADDITIVE_UNIT_PROVISION_USAGE_SQL: &str =
    "SELECT sa.id AS unit_id, ap.provision_id AS resource_id, ap.volume AS required \
     FROM store_additives sa \
     JOIN additive_provisions ap ON ap.additive_id = sa.additive_id \
     WHERE sa.id = ANY($1)";

const UPDATE_PRODUCT_FLAGS_SQL: &str =
    "UPDATE store_products SET is_out_of_stock = $2 WHERE id = ANY($1)";

const UPDATE_ADDITIVE_FLAGS_SQL: &str =
    "UPDATE store_additives SET is_out_of_stock = $2 WHERE id = ANY($1)";

/// Flag assignments one recalculation produced. Units outside the four sets
/// were not considered affected and were left untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecalculationOutcome {
    pub out_of_stock_products: Vec<Uuid>,
    pub in_stock_products: Vec<Uuid>,
    pub out_of_stock_additives: Vec<Uuid>,
    pub in_stock_additives: Vec<Uuid>,
}

/// Recomputes availability flags for everything the input touches.
/// A fully empty input is a no-op.
pub async fn recalculate_out_of_stock(
    pool: &PgPool,
    store_id: Uuid,
    input: &RecalculateInput,
) -> InventoryResult<RecalculationOutcome> {
    if input.is_empty() {
        return Ok(RecalculationOutcome::default());
    }

    let mut conn = pool.acquire().await?;

    // Expand changed items/additives into the resource IDs they touch and
    // union with the directly-passed ones.
    let mut ingredient_ids = input.ingredient_ids.clone();
    let mut provision_ids = input.provision_ids.clone();
    if !input.product_size_ids.is_empty() {
        ingredient_ids
            .extend(recipe::ingredient_ids_for_product_sizes(&mut conn, &input.product_size_ids).await?);
        provision_ids
            .extend(recipe::provision_ids_for_product_sizes(&mut conn, &input.product_size_ids).await?);
    }
    if !input.additive_ids.is_empty() {
        ingredient_ids
            .extend(recipe::ingredient_ids_for_additives(&mut conn, &input.additive_ids).await?);
        provision_ids
            .extend(recipe::provision_ids_for_additives(&mut conn, &input.additive_ids).await?);
    }
    dedup_ids(&mut ingredient_ids);
    dedup_ids(&mut provision_ids);

    let frozen = if ingredient_ids.is_empty() && provision_ids.is_empty() {
        FrozenInventory::default()
    } else {
        let filter = FrozenInventoryFilter {
            ingredient_ids: ingredient_ids.clone(),
            provision_ids: provision_ids.clone(),
        };
        calculate_frozen_inventory(&mut conn, store_id, Some(&filter)).await?
    };

    // Discover every store-level unit consuming any touched resource,
    // directly or through a default additive.
    let mut product_unit_ids =
        fetch_unit_ids(&mut conn, STORE_PRODUCTS_BY_PRODUCT_SIZES_SQL, store_id, &input.product_size_ids)
            .await?;
    product_unit_ids.extend(
        fetch_unit_ids(&mut conn, STORE_PRODUCTS_BY_INGREDIENT_USAGE_SQL, store_id, &ingredient_ids)
            .await?,
    );
    product_unit_ids.extend(
        fetch_unit_ids(
            &mut conn,
            STORE_PRODUCTS_BY_DEFAULT_ADDITIVE_INGREDIENT_USAGE_SQL,
            store_id,
            &ingredient_ids,
        )
        .await?,
    );
    product_unit_ids.extend(
        fetch_unit_ids(&mut conn, STORE_PRODUCTS_BY_PROVISION_USAGE_SQL, store_id, &provision_ids)
            .await?,
    );
    product_unit_ids.extend(
        fetch_unit_ids(
            &mut conn,
            STORE_PRODUCTS_BY_DEFAULT_ADDITIVE_PROVISION_USAGE_SQL,
            store_id,
            &provision_ids,
        )
        .await?,
    );
    dedup_ids(&mut product_unit_ids);

    let mut additive_unit_ids =
        fetch_unit_ids(&mut conn, STORE_ADDITIVES_BY_ADDITIVES_SQL, store_id, &input.additive_ids)
            .await?;
    additive_unit_ids.extend(
        fetch_unit_ids(&mut conn, STORE_ADDITIVES_BY_INGREDIENT_USAGE_SQL, store_id, &ingredient_ids)
            .await?,
    );
    additive_unit_ids.extend(
        fetch_unit_ids(&mut conn, STORE_ADDITIVES_BY_PROVISION_USAGE_SQL, store_id, &provision_ids)
            .await?,
    );
    dedup_ids(&mut additive_unit_ids);
    drop(conn);

    // Evaluate and persist under one transaction so the two bulk updates
    // cannot be observed half-applied.
    let mut tx = pool.begin().await?;
    let (out_products, in_products) =
        recalculate_store_products(&mut tx, store_id, &product_unit_ids, &frozen).await?;
    let (out_additives, in_additives) =
        recalculate_store_additives(&mut tx, store_id, &additive_unit_ids, &frozen).await?;
    tx.commit().await?;


    Ok(RecalculationOutcome {
        out_of_stock_products: out_products,
        in_stock_products: in_products,
        out_of_stock_additives: out_additives,
        in_stock_additives: in_additives,
    })
}

async fn fetch_unit_ids(
    conn: &mut PgConnection,
    sql: &str,
    store_id: Uuid,
    ids: &[Uuid],
) -> InventoryResult<Vec<Uuid>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query_scalar::<_, Uuid>(sql)
        .bind(store_id)
        .bind(ids)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}

async fn fetch_unit_usage(
    conn: &mut PgConnection,
    sql: &str,
    unit_ids: &[Uuid],
) -> InventoryResult<Vec<UnitUsageLine>> {
    let rows = sqlx::query_as::<_, UnitUsageLine>(sql)
        .bind(unit_ids)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}

async fn recalculate_store_products(
    tx: &mut PgConnection,
    store_id: Uuid,
    unit_ids: &[Uuid],
    frozen: &FrozenInventory,
) -> InventoryResult<(Vec<Uuid>, Vec<Uuid>)> {
    if unit_ids.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }

    let mut ingredient_lines =
        fetch_unit_usage(tx, PRODUCT_UNIT_INGREDIENT_USAGE_SQL, unit_ids).await?;
    ingredient_lines.extend(
        fetch_unit_usage(tx, PRODUCT_UNIT_DEFAULT_ADDITIVE_INGREDIENT_USAGE_SQL, unit_ids).await?,
    );
    let mut provision_lines =
        fetch_unit_usage(tx, PRODUCT_UNIT_PROVISION_USAGE_SQL, unit_ids).await?;
    provision_lines.extend(
        fetch_unit_usage(tx, PRODUCT_UNIT_DEFAULT_ADDITIVE_PROVISION_USAGE_SQL, unit_ids).await?,
    );

    let out = evaluate_units(tx, store_id, &ingredient_lines, &provision_lines, frozen).await?;
    persist_flags(tx, UPDATE_PRODUCT_FLAGS_SQL, unit_ids, &out).await
}

async fn recalculate_store_additives(
    tx: &mut PgConnection,
    store_id: Uuid,
    unit_ids: &[Uuid],
    frozen: &FrozenInventory,
) -> InventoryResult<(Vec<Uuid>, Vec<Uuid>)> {
    if unit_ids.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }

    let ingredient_lines = fetch_unit_usage(tx, ADDITIVE_UNIT_INGREDIENT_USAGE_SQL, unit_ids).await?;
    let provision_lines = fetch_unit_usage(tx, ADDITIVE_UNIT_PROVISION_USAGE_SQL, unit_ids).await?;

    let out = evaluate_units(tx, store_id, &ingredient_lines, &provision_lines, frozen).await?;
    persist_flags(tx, UPDATE_ADDITIVE_FLAGS_SQL, unit_ids, &out).await
}

async fn evaluate_units(
    tx: &mut PgConnection,
    store_id: Uuid,
    ingredient_lines: &[UnitUsageLine],
    provision_lines: &[UnitUsageLine],
    frozen: &FrozenInventory,
) -> InventoryResult<HashSet<Uuid>> {
    let mut needed_ingredients: Vec<Uuid> =
        ingredient_lines.iter().map(|l| l.resource_id).collect();
    dedup_ids(&mut needed_ingredients);
    let mut needed_provisions: Vec<Uuid> = provision_lines.iter().map(|l| l.resource_id).collect();
    dedup_ids(&mut needed_provisions);

    let stock = load_stock_quantities(tx, store_id, &needed_ingredients).await?;
    let mut available_ingredients: HashMap<Uuid, f64> = HashMap::with_capacity(stock.len());
    for (id, quantity) in stock {
        available_ingredients.insert(id, quantity - frozen.frozen_ingredient(id));
    }

    let volumes = load_provision_volumes(tx, store_id, &needed_provisions).await?;
    let mut available_provisions: HashMap<Uuid, f64> = HashMap::with_capacity(volumes.len());
    for (id, volume) in volumes {
        available_provisions.insert(id, (volume - frozen.frozen_provision(id)).max(0.0));
    }

    let mut out = detect_short_units(ingredient_lines, &available_ingredients);
    out.extend(detect_short_units(provision_lines, &available_provisions));
    Ok(out)
}

async fn persist_flags(
    tx: &mut PgConnection,
    sql: &str,
    unit_ids: &[Uuid],
    out: &HashSet<Uuid>,
) -> InventoryResult<(Vec<Uuid>, Vec<Uuid>)> {
    let mut out_ids: Vec<Uuid> = out.iter().copied().collect();
    out_ids.sort();
    let mut in_ids: Vec<Uuid> = unit_ids.iter().copied().filter(|id| !out.contains(id)).collect();
    in_ids.sort();

    if !out_ids.is_empty() {
        sqlx::query(sql).bind(&out_ids).bind(true).execute(&mut *tx).await?;
    }
    if !in_ids.is_empty() {
        sqlx::query(sql).bind(&in_ids).bind(false).execute(&mut *tx).await?;
    }
    Ok((out_ids, in_ids))
}

/// A unit is short when the summed requirement of any single resource
/// exceeds what is effectively available. Resources without an availability
/// entry count as zero here: a unit that needs an untracked ingredient
/// cannot be made.
fn detect_short_units(
    lines: &[UnitUsageLine],
    available: &HashMap<Uuid, f64>,
) -> HashSet<Uuid> {
    let mut required: HashMap<(Uuid, Uuid), f64> = HashMap::new();
    for line in lines {
        *required.entry((line.unit_id, line.resource_id)).or_insert(0.0) += line.required;
    }

    let mut out = HashSet::new();
    for ((unit_id, resource_id), needed) in required {
        if available.get(&resource_id).copied().unwrap_or(0.0) < needed {
            out.insert(unit_id);
        }
    }
    out
}

fn dedup_ids(ids: &mut Vec<Uuid>) {
    ids.sort();
    ids.dedup();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(unit_id: Uuid, resource_id: Uuid, required: f64) -> UnitUsageLine {
        UnitUsageLine { unit_id, resource_id, required }
    }

    #[test]
    fn unit_is_short_when_any_resource_is_short() {
        let unit = Uuid::new_v4();
        let plenty = Uuid::new_v4();
        let scarce = Uuid::new_v4();
        let available = HashMap::from([(plenty, 100.0), (scarce, 1.0)]);

        let out = detect_short_units(
            &[line(unit, plenty, 5.0), line(unit, scarce, 2.0)],
            &available,
        );
        assert!(out.contains(&unit));
    }

    #[test]
    fn duplicate_lines_are_summed_before_comparison() {
        let unit = Uuid::new_v4();
        let ing = Uuid::new_v4();
        let available = HashMap::from([(ing, 3.0)]);

        // two lines of 2 need 4 in total even though each alone would fit
        let out = detect_short_units(&[line(unit, ing, 2.0), line(unit, ing, 2.0)], &available);
        assert!(out.contains(&unit));
    }

    #[test]
    fn untracked_resource_counts_as_zero() {
        let unit = Uuid::new_v4();
        let out = detect_short_units(&[line(unit, Uuid::new_v4(), 0.5)], &HashMap::new());
        assert!(out.contains(&unit));
    }

    #[test]
    fn detection_is_idempotent_for_unchanged_inputs() {
        let unit_ok = Uuid::new_v4();
        let unit_short = Uuid::new_v4();
        let ing = Uuid::new_v4();
        let available = HashMap::from([(ing, 4.0)]);
        let lines = vec![line(unit_ok, ing, 4.0), line(unit_short, ing, 5.0)];

        let first = detect_short_units(&lines, &available);
        let second = detect_short_units(&lines, &available);
        assert_eq!(first, second);
        assert!(first.contains(&unit_short));
        assert!(!first.contains(&unit_ok));
    }
}
