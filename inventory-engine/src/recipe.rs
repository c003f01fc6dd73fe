//! Recipe Resolver: the single place that answers "what do these sellable
//! units consume". Every other module composes these queries instead of
//! re-deriving the joins.

use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::InventoryResult;
use crate::models::{RequiredUsage, UsageLine};

pub(crate) const PRODUCT_SIZE_INGREDIENT_LINES_SQL: &str =
    "SELECT ingredient_id AS resource_id, quantity AS required \
     FROM product_size_ingredients WHERE product_size_id = ANY($1)";

pub(crate) const PRODUCT_SIZE_PROVISION_LINES_SQL: &str =
    "SELECT provision_id AS resource_id, volume AS required \
     FROM product_size_provisions WHERE product_size_id = ANY($1)";

pub(crate) const DEFAULT_ADDITIVE_INGREDIENT_LINES_SQL: &str =
    "SELECT ai.ingredient_id AS resource_id, ai.quantity AS required \
     FROM product_size_additives psa \
     JOIN additive_ingredients ai ON ai.additive_id = psa.additive_id \
     WHERE psa.is_default AND psa.product_size_id = ANY($1)";

pub(crate) const DEFAULT_ADDITIVE_PROVISION_LINES_SQL: &str =
    "SELECT ap.provision_id AS resource_id, ap.volume AS required \
     FROM product_size_additives psa \
     JOIN additive_provisions ap ON ap.additive_id = psa.additive_id \
     WHERE psa.is_default AND psa.product_size_id = ANY($1)";

pub(crate) const ADDITIVE_INGREDIENT_LINES_SQL: &str =
    "SELECT ingredient_id AS resource_id, quantity AS required \
     FROM additive_ingredients WHERE additive_id = ANY($1)";

pub(crate) const ADDITIVE_PROVISION_LINES_SQL: &str =
    "SELECT provision_id AS resource_id, volume AS required \
     FROM additive_provisions WHERE additive_id = ANY($1)";

async fn fetch_lines(
    conn: &mut PgConnection,
    sql: &str,
    ids: &[Uuid],
) -> InventoryResult<Vec<UsageLine>> {
    let lines = sqlx::query_as::<_, UsageLine>(sql)
        .bind(ids)
        .fetch_all(&mut *conn)
        .await?;
    Ok(lines)
}

fn merge_ingredient_lines(usage: &mut RequiredUsage, lines: &[UsageLine]) {
    for line in lines {
        usage.add_ingredient(line.resource_id, line.required);
    }
}

fn merge_provision_lines(usage: &mut RequiredUsage, lines: &[UsageLine]) {
    for line in lines {
        usage.add_provision(line.resource_id, line.required);
    }
}

/// Full consumption of the given product sizes: their direct ingredient and
/// provision lines plus the lines of every additive attached as a default.
/// Unknown IDs and sizes without recipe lines contribute nothing.
pub async fn resolve_product_sizes(
    conn: &mut PgConnection,
    product_size_ids: &[Uuid],
) -> InventoryResult<RequiredUsage> {
    let mut usage = resolve_product_sizes_direct(conn, product_size_ids).await?;
    if product_size_ids.is_empty() {
        return Ok(usage);
    }
    let ing = fetch_lines(conn, DEFAULT_ADDITIVE_INGREDIENT_LINES_SQL, product_size_ids).await?;
    merge_ingredient_lines(&mut usage, &ing);
    let prov = fetch_lines(conn, DEFAULT_ADDITIVE_PROVISION_LINES_SQL, product_size_ids).await?;
    merge_provision_lines(&mut usage, &prov);
    Ok(usage)
}

/// Direct recipe lines only, without default additives. Order paths use this
/// because the order module materializes default add-ons as selected ones.
pub async fn resolve_product_sizes_direct(
    conn: &mut PgConnection,
    product_size_ids: &[Uuid],
) -> InventoryResult<RequiredUsage> {
    let mut usage = RequiredUsage::default();
    if product_size_ids.is_empty() {
        return Ok(usage);
    }
    let ing = fetch_lines(conn, PRODUCT_SIZE_INGREDIENT_LINES_SQL, product_size_ids).await?;
    merge_ingredient_lines(&mut usage, &ing);
    let prov = fetch_lines(conn, PRODUCT_SIZE_PROVISION_LINES_SQL, product_size_ids).await?;
    merge_provision_lines(&mut usage, &prov);
    Ok(usage)
}

/// Direct consumption of the given additives.
pub async fn resolve_additives(
    conn: &mut PgConnection,
    additive_ids: &[Uuid],
) -> InventoryResult<RequiredUsage> {
    let mut usage = RequiredUsage::default();
    if additive_ids.is_empty() {
        return Ok(usage);
    }
    let ing = fetch_lines(conn, ADDITIVE_INGREDIENT_LINES_SQL, additive_ids).await?;
    merge_ingredient_lines(&mut usage, &ing);
    let prov = fetch_lines(conn, ADDITIVE_PROVISION_LINES_SQL, additive_ids).await?;
    merge_provision_lines(&mut usage, &prov);
    Ok(usage)
}

/// Distinct ingredient IDs the given product sizes touch, directly or through
/// a default additive.
pub async fn ingredient_ids_for_product_sizes(
    conn: &mut PgConnection,
    product_size_ids: &[Uuid],
) -> InventoryResult<Vec<Uuid>> {
    if product_size_ids.is_empty() {
        return Ok(Vec::new());
    }
    let ids = sqlx::query_scalar::<_, Uuid>(
        "SELECT ingredient_id FROM product_size_ingredients WHERE product_size_id = ANY($1) \
         UNION \
         SELECT ai.ingredient_id \
         FROM product_size_additives psa \
         JOIN additive_ingredients ai ON ai.additive_id = psa.additive_id \
         WHERE psa.is_default AND psa.product_size_id = ANY($1)",
    )
    .bind(product_size_ids)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

/// Distinct provision IDs the given product sizes touch, directly or through
/// a default additive.
pub async fn provision_ids_for_product_sizes(
    conn: &mut PgConnection,
    product_size_ids: &[Uuid],
) -> InventoryResult<Vec<Uuid>> {
    if product_size_ids.is_empty() {
        return Ok(Vec::new());
    }
    let ids = sqlx::query_scalar::<_, Uuid>(
        "SELECT provision_id FROM product_size_provisions WHERE product_size_id = ANY($1) \
         UNION \
         SELECT ap.provision_id \
         FROM product_size_additives psa \
         JOIN additive_provisions ap ON ap.additive_id = psa.additive_id \
         WHERE psa.is_default AND psa.product_size_id = ANY($1)",
    )
    .bind(product_size_ids)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

/// Distinct ingredient IDs consumed directly by the given additives.
pub async fn ingredient_ids_for_additives(
    conn: &mut PgConnection,
    additive_ids: &[Uuid],
) -> InventoryResult<Vec<Uuid>> {
    if additive_ids.is_empty() {
        return Ok(Vec::new());
    }
    let ids = sqlx::query_scalar::<_, Uuid>(
        "SELECT DISTINCT ingredient_id FROM additive_ingredients WHERE additive_id = ANY($1)",
    )
    .bind(additive_ids)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

/// Distinct provision IDs consumed directly by the given additives.
pub async fn provision_ids_for_additives(
    conn: &mut PgConnection,
    additive_ids: &[Uuid],
) -> InventoryResult<Vec<Uuid>> {
    if additive_ids.is_empty() {
        return Ok(Vec::new());
    }
    let ids = sqlx::query_scalar::<_, Uuid>(
        "SELECT DISTINCT provision_id FROM additive_provisions WHERE additive_id = ANY($1)",
    )
    .bind(additive_ids)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(resource_id: Uuid, required: f64) -> UsageLine {
        UsageLine { resource_id, required }
    }

    #[test]
    fn merging_accumulates_across_line_sources() {
        let shared = Uuid::new_v4();
        let only_direct = Uuid::new_v4();
        let mut usage = RequiredUsage::default();

        // direct lines of the size
        merge_ingredient_lines(&mut usage, &[line(shared, 2.0), line(only_direct, 1.0)]);
        // lines contributed by a default additive
        merge_ingredient_lines(&mut usage, &[line(shared, 5.0)]);

        assert_eq!(usage.ingredients[&shared], 7.0);
        assert_eq!(usage.ingredients[&only_direct], 1.0);
    }

    #[test]
    fn no_lines_yield_empty_maps() {
        let mut usage = RequiredUsage::default();
        merge_ingredient_lines(&mut usage, &[]);
        merge_provision_lines(&mut usage, &[]);
        assert!(usage.is_empty());
    }
}
