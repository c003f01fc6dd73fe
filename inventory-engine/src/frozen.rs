//! Frozen Inventory Calculator: sums the quantities already promised to
//! active, not-yet-fulfilled orders at a store. The result is a read-time
//! snapshot over the order tables, recomputed on every call.

use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::InventoryResult;
use crate::models::{FrozenInventory, FrozenInventoryFilter, UsageLine};

// An order freezes inventory while WAITING_FOR_PAYMENT / PENDING / PREPARING,
// and within it only suborders still PENDING or PREPARING count.

pub(crate) const ACTIVE_PRODUCT_INGREDIENT_USAGE_SQL: &str =
    "SELECT psi.ingredient_id AS resource_id, psi.quantity AS required \
     FROM suborders sub \
     JOIN orders o ON o.id = sub.order_id \
     JOIN store_products sp ON sp.id = sub.store_product_id \
     JOIN product_size_ingredients psi ON psi.product_size_id = sp.product_size_id \
     WHERE o.store_id = $1 \
       AND o.status IN ('WAITING_FOR_PAYMENT', 'PENDING', 'PREPARING') \
       AND sub.status IN ('PENDING', 'PREPARING')";

pub(crate) const ACTIVE_PRODUCT_PROVISION_USAGE_SQL: &str =
    "SELECT psp.provision_id AS resource_id, psp.volume AS required \
     FROM suborders sub \
     JOIN orders o ON o.id = sub.order_id \
     JOIN store_products sp ON sp.id = sub.store_product_id \
     JOIN product_size_provisions psp ON psp.product_size_id = sp.product_size_id \
     WHERE o.store_id = $1 \
       AND o.status IN ('WAITING_FOR_PAYMENT', 'PENDING', 'PREPARING') \
       AND sub.status IN ('PENDING', 'PREPARING')";

pub(crate) const ACTIVE_ADDITIVE_INGREDIENT_USAGE_SQL: &str =
    "SELECT ai.ingredient_id AS resource_id, ai.quantity AS required \
     FROM suborder_additives sa \
     JOIN suborders sub ON sub.id = sa.suborder_id \
     JOIN orders o ON o.id = sub.order_id \
     JOIN store_additives sta ON sta.id = sa.store_additive_id \
     JOIN additive_ingredients ai ON ai.additive_id = sta.additive_id \
     WHERE o.store_id = $1 \
       AND o.status IN ('WAITING_FOR_PAYMENT', 'PENDING', 'PREPARING') \
       AND sub.status IN ('PENDING', 'PREPARING')";

pub(crate) const ACTIVE_ADDITIVE_PROVISION_USAGE_SQL: &str =
    "SELECT ap.provision_id AS resource_id, ap.volume AS required \
     FROM suborder_additives sa \
     JOIN suborders sub ON sub.id = sa.suborder_id \
     JOIN orders o ON o.id = sub.order_id \
     JOIN store_additives sta ON sta.id = sa.store_additive_id \
     JOIN additive_provisions ap ON ap.additive_id = sta.additive_id \
     WHERE o.store_id = $1 \
       AND o.status IN ('WAITING_FOR_PAYMENT', 'PENDING', 'PREPARING') \
       AND sub.status IN ('PENDING', 'PREPARING')";

/// Builds the frozen snapshot for a store. The optional filter restricts
/// accumulation to the listed resource IDs; usage rows outside the filter
/// are discarded.
pub async fn calculate_frozen_inventory(
    conn: &mut PgConnection,
    store_id: Uuid,
    filter: Option<&FrozenInventoryFilter>,
) -> InventoryResult<FrozenInventory> {
    let product_ing = fetch_usage(conn, ACTIVE_PRODUCT_INGREDIENT_USAGE_SQL, store_id).await?;
    let product_prov = fetch_usage(conn, ACTIVE_PRODUCT_PROVISION_USAGE_SQL, store_id).await?;
    let additive_ing = fetch_usage(conn, ACTIVE_ADDITIVE_INGREDIENT_USAGE_SQL, store_id).await?;
    let additive_prov = fetch_usage(conn, ACTIVE_ADDITIVE_PROVISION_USAGE_SQL, store_id).await?;

    let mut frozen = FrozenInventory::default();
    accumulate_ingredient_usage(&mut frozen, &product_ing, filter);
    accumulate_ingredient_usage(&mut frozen, &additive_ing, filter);
    accumulate_provision_usage(&mut frozen, &product_prov, filter);
    accumulate_provision_usage(&mut frozen, &additive_prov, filter);
    Ok(frozen)
}

async fn fetch_usage(
    conn: &mut PgConnection,
    sql: &str,
    store_id: Uuid,
) -> InventoryResult<Vec<UsageLine>> {
    let rows = sqlx::query_as::<_, UsageLine>(sql)
        .bind(store_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}

fn accumulate_ingredient_usage(
    frozen: &mut FrozenInventory,
    lines: &[UsageLine],
    filter: Option<&FrozenInventoryFilter>,
) {
    for line in lines {
        if filter.map_or(true, |f| f.allows_ingredient(line.resource_id)) {
            frozen.reserve_ingredient(line.resource_id, line.required);
        }
    }
}

fn accumulate_provision_usage(
    frozen: &mut FrozenInventory,
    lines: &[UsageLine],
    filter: Option<&FrozenInventoryFilter>,
) {
    for line in lines {
        if filter.map_or(true, |f| f.allows_provision(line.resource_id)) {
            frozen.reserve_provision(line.resource_id, line.required);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(resource_id: Uuid, required: f64) -> UsageLine {
        UsageLine { resource_id, required }
    }

    #[test]
    fn accumulation_is_additive_per_resource() {
        let ing = Uuid::new_v4();
        let mut frozen = FrozenInventory::default();

        // two active suborders each promising 2 units of the same ingredient
        accumulate_ingredient_usage(&mut frozen, &[line(ing, 2.0)], None);
        accumulate_ingredient_usage(&mut frozen, &[line(ing, 2.0)], None);
        assert_eq!(frozen.frozen_ingredient(ing), 4.0);

        // one suborder leaving the active set means one fewer accumulation
        let mut frozen = FrozenInventory::default();
        accumulate_ingredient_usage(&mut frozen, &[line(ing, 2.0)], None);
        assert_eq!(frozen.frozen_ingredient(ing), 2.0);
    }

    #[test]
    fn filter_drops_unlisted_resources_at_accumulation_time() {
        let wanted = Uuid::new_v4();
        let other = Uuid::new_v4();
        let filter = FrozenInventoryFilter { ingredient_ids: vec![wanted], provision_ids: vec![] };

        let mut frozen = FrozenInventory::default();
        accumulate_ingredient_usage(
            &mut frozen,
            &[line(wanted, 1.5), line(other, 9.0)],
            Some(&filter),
        );
        assert_eq!(frozen.frozen_ingredient(wanted), 1.5);
        assert_eq!(frozen.frozen_ingredient(other), 0.0);

        // the provision class is unrestricted by this filter
        let prov = Uuid::new_v4();
        accumulate_provision_usage(&mut frozen, &[line(prov, 3.0)], Some(&filter));
        assert_eq!(frozen.frozen_provision(prov), 3.0);
    }
}
