//! Availability Checker: verifies that physical stock minus already-frozen
//! amounts covers a requirement. Each satisfied line is added into the
//! caller's frozen snapshot before the next line is evaluated, so checking
//! several lines in one pass behaves like sequential reservation: an
//! earlier line cannot be double-counted as available for a later one.

use std::collections::{BTreeMap, HashMap};

use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{InventoryError, InventoryResult};
use crate::models::FrozenInventory;

pub(crate) const RELEVANT_STOCKS_SQL: &str =
    "SELECT ingredient_id, quantity FROM store_stocks \
     WHERE store_id = $1 AND ingredient_id = ANY($2)";

// "Available" provision volume ignores batch boundaries; batch-level detail
// only matters at deduction time.
pub(crate) const RELEVANT_PROVISION_VOLUMES_SQL: &str =
    "SELECT provision_id, COALESCE(SUM(volume), 0)::float8 AS volume \
     FROM store_provisions \
     WHERE store_id = $1 AND provision_id = ANY($2) \
       AND status = 'COMPLETED' \
       AND (expires_at IS NULL OR expires_at > NOW()) \
       AND deleted_at IS NULL \
     GROUP BY provision_id";

#[derive(sqlx::FromRow)]
struct StockQuantityRow {
    ingredient_id: Uuid,
    quantity: f64,
}

#[derive(sqlx::FromRow)]
struct ProvisionVolumeRow {
    provision_id: Uuid,
    volume: f64,
}

/// Physical quantity per ingredient ID. Absent rows stay absent; callers
/// decide whether that is an error or zero availability.
pub(crate) async fn load_stock_quantities(
    conn: &mut PgConnection,
    store_id: Uuid,
    ingredient_ids: &[Uuid],
) -> InventoryResult<HashMap<Uuid, f64>> {
    if ingredient_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = sqlx::query_as::<_, StockQuantityRow>(RELEVANT_STOCKS_SQL)
        .bind(store_id)
        .bind(ingredient_ids)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().map(|r| (r.ingredient_id, r.quantity)).collect())
}

/// Summed live batch volume per provision ID.
pub(crate) async fn load_provision_volumes(
    conn: &mut PgConnection,
    store_id: Uuid,
    provision_ids: &[Uuid],
) -> InventoryResult<HashMap<Uuid, f64>> {
    if provision_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = sqlx::query_as::<_, ProvisionVolumeRow>(RELEVANT_PROVISION_VOLUMES_SQL)
        .bind(store_id)
        .bind(provision_ids)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().map(|r| (r.provision_id, r.volume)).collect())
}

/// Fails with [`InventoryError::InsufficientStock`] if any required
/// ingredient is not covered by `quantity - frozen`. A missing stock row is
/// a hard [`InventoryError::StockNotFound`], never an implicit zero.
pub async fn check_store_stocks(
    conn: &mut PgConnection,
    store_id: Uuid,
    required: &BTreeMap<Uuid, f64>,
    frozen: &mut FrozenInventory,
) -> InventoryResult<()> {
    if required.is_empty() {
        return Ok(());
    }
    let ids: Vec<Uuid> = required.keys().copied().collect();
    let on_hand = load_stock_quantities(conn, store_id, &ids).await?;
    check_and_reserve_ingredients(required, &on_hand, frozen)
}

/// Same as [`check_store_stocks`] for provisions; "available" is the summed
/// volume of COMPLETED, non-expired batches. A provision with no live
/// batches has zero available volume.
pub async fn check_store_provisions(
    conn: &mut PgConnection,
    store_id: Uuid,
    required: &BTreeMap<Uuid, f64>,
    frozen: &mut FrozenInventory,
) -> InventoryResult<()> {
    if required.is_empty() {
        return Ok(());
    }
    let ids: Vec<Uuid> = required.keys().copied().collect();
    let on_hand = load_provision_volumes(conn, store_id, &ids).await?;
    check_and_reserve_provisions(required, &on_hand, frozen)
}

fn check_and_reserve_ingredients(
    required: &BTreeMap<Uuid, f64>,
    on_hand: &HashMap<Uuid, f64>,
    frozen: &mut FrozenInventory,
) -> InventoryResult<()> {
    for (&ingredient_id, &requested) in required {
        let stock = *on_hand
            .get(&ingredient_id)
            .ok_or(InventoryError::StockNotFound(ingredient_id))?;
        let available = stock - frozen.frozen_ingredient(ingredient_id);
        if available < requested {
            return Err(InventoryError::InsufficientStock {
                ingredient_id,
                requested,
                available,
            });
        }
        frozen.reserve_ingredient(ingredient_id, requested);
    }
    Ok(())
}

fn check_and_reserve_provisions(
    required: &BTreeMap<Uuid, f64>,
    on_hand: &HashMap<Uuid, f64>,
    frozen: &mut FrozenInventory,
) -> InventoryResult<()> {
    for (&provision_id, &requested) in required {
        let stock = on_hand.get(&provision_id).copied().unwrap_or(0.0);
        let available = stock - frozen.frozen_provision(provision_id);
        if available < requested {
            return Err(InventoryError::InsufficientProvision {
                provision_id,
                requested,
                available,
            });
        }
        frozen.reserve_provision(provision_id, requested);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_respects_frozen_amounts() {
        let ing = Uuid::new_v4();
        let on_hand = HashMap::from([(ing, 10.0)]);

        // stock 10, frozen 7: a requirement of 4 must fail (3 effectively left)
        let mut frozen = FrozenInventory::default();
        frozen.reserve_ingredient(ing, 7.0);
        let required = BTreeMap::from([(ing, 4.0)]);
        let err = check_and_reserve_ingredients(&required, &on_hand, &mut frozen).unwrap_err();
        match err {
            InventoryError::InsufficientStock { ingredient_id, requested, available } => {
                assert_eq!(ingredient_id, ing);
                assert_eq!(requested, 4.0);
                assert_eq!(available, 3.0);
            }
            other => panic!("unexpected error: {other}"),
        }
        // a failed check must not advance the snapshot
        assert_eq!(frozen.frozen_ingredient(ing), 7.0);

        // a requirement of 3 succeeds and advances the snapshot to 10
        let required = BTreeMap::from([(ing, 3.0)]);
        check_and_reserve_ingredients(&required, &on_hand, &mut frozen).unwrap();
        assert_eq!(frozen.frozen_ingredient(ing), 10.0);
    }

    #[test]
    fn one_pass_behaves_like_sequential_reservation() {
        let ing = Uuid::new_v4();
        let on_hand = HashMap::from([(ing, 5.0)]);
        let mut frozen = FrozenInventory::default();

        // first line takes 3, second line of 3 must then starve
        check_and_reserve_ingredients(&BTreeMap::from([(ing, 3.0)]), &on_hand, &mut frozen)
            .unwrap();
        let err = check_and_reserve_ingredients(&BTreeMap::from([(ing, 3.0)]), &on_hand, &mut frozen)
            .unwrap_err();
        assert!(err.is_insufficiency());
    }

    #[test]
    fn missing_stock_row_is_a_hard_error() {
        let ing = Uuid::new_v4();
        let mut frozen = FrozenInventory::default();
        let err = check_and_reserve_ingredients(
            &BTreeMap::from([(ing, 1.0)]),
            &HashMap::new(),
            &mut frozen,
        )
        .unwrap_err();
        assert!(matches!(err, InventoryError::StockNotFound(id) if id == ing));
    }

    #[test]
    fn provision_without_batches_is_insufficient_not_missing() {
        let prov = Uuid::new_v4();
        let mut frozen = FrozenInventory::default();
        let err = check_and_reserve_provisions(
            &BTreeMap::from([(prov, 0.5)]),
            &HashMap::new(),
            &mut frozen,
        )
        .unwrap_err();
        assert!(matches!(err, InventoryError::InsufficientProvision { available, .. } if available == 0.0));
    }
}
