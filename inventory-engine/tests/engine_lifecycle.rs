//! End-to-end scenarios over a real Postgres: order commit never drives stock
//! negative, frozen inventory tracks active orders, and availability flags
//! follow committed deductions.
//! NOTE: spins up ephemeral Postgres with testcontainers; requires Docker and
//! ENABLE_ITESTS=1.

mod support;

use common_observability::EngineMetrics;
use inventory_engine::models::{FrozenInventoryFilter, OrderLine, RecalculateInput};
use inventory_engine::notifier::alerts_for_deduction;
use inventory_engine::{frozen, orders, recalc, InventoryError};
use uuid::Uuid;

#[tokio::test]
async fn order_commit_never_oversells_and_flags_follow() {
    if !support::itests_enabled() {
        return;
    }
    let (_container, pool) = support::setup_database().await;
    let metrics = EngineMetrics::new();

    let store_id = Uuid::new_v4();
    let flat_white = support::insert_product_size(&pool, "flat white 250").await;
    let milk = support::insert_ingredient(&pool, "milk").await;
    support::insert_product_size_ingredient(&pool, flat_white, milk, 4.0).await;
    support::insert_stock(&pool, store_id, milk, 10.0, 5.0).await;
    let store_product = support::insert_store_product(&pool, store_id, flat_white).await;

    // with 10 on hand a 4-per-unit item starts in stock
    recalc::recalculate_out_of_stock(&pool, store_id, &RecalculateInput::ingredients(vec![milk]))
        .await
        .expect("initial recalculation");
    assert!(!support::is_out_of_stock(&pool, store_product).await);

    // 3 units need 12: the whole commit must fail and change nothing
    let big_order = support::insert_active_order(&pool, store_id, store_product, 3, &[]).await;
    let err = orders::commit_order(&pool, &metrics, store_id, big_order)
        .await
        .expect_err("12 > 10 must fail");
    assert!(matches!(
        err,
        InventoryError::InsufficientStock { ingredient_id, .. } if ingredient_id == milk
    ));
    assert_eq!(support::stock_quantity(&pool, store_id, milk).await, 10.0);
    assert!(!support::is_out_of_stock(&pool, store_product).await);
    support::set_order_status(&pool, big_order, "CANCELLED").await;

    // 2 units need 8: commit succeeds, stock drops to 2 and the per-unit
    // requirement of 4 flips the item out of stock
    let order = support::insert_active_order(&pool, store_id, store_product, 2, &[]).await;
    let deducted = orders::commit_order(&pool, &metrics, store_id, order)
        .await
        .expect("8 <= 10 must commit");
    assert_eq!(support::stock_quantity(&pool, store_id, milk).await, 2.0);
    assert!(support::is_out_of_stock(&pool, store_product).await);

    // 2 on hand is below the threshold of 5
    let alerts = alerts_for_deduction(store_id, &deducted);
    assert_eq!(alerts.len(), 1);
}

#[tokio::test]
async fn frozen_inventory_tracks_active_orders() {
    if !support::itests_enabled() {
        return;
    }
    let (_container, pool) = support::setup_database().await;

    let store_id = Uuid::new_v4();
    let latte = support::insert_product_size(&pool, "latte 300").await;
    let beans = support::insert_ingredient(&pool, "beans").await;
    support::insert_product_size_ingredient(&pool, latte, beans, 4.0).await;
    support::insert_stock(&pool, store_id, beans, 10.0, 2.0).await;
    let store_product = support::insert_store_product(&pool, store_id, latte).await;

    let first = support::insert_active_order(&pool, store_id, store_product, 1, &[]).await;
    support::insert_active_order(&pool, store_id, store_product, 1, &[]).await;

    let mut conn = pool.acquire().await.unwrap();
    let snapshot = frozen::calculate_frozen_inventory(&mut conn, store_id, None)
        .await
        .expect("frozen snapshot");
    assert_eq!(snapshot.frozen_ingredient(beans), 8.0);

    // 10 on hand minus 8 frozen leaves 2: a third unit (4) cannot be promised
    let line = OrderLine { store_product_id: store_product, store_additive_ids: vec![] };
    let err = orders::check_order_lines(&mut conn, store_id, std::slice::from_ref(&line))
        .await
        .expect_err("third unit must not fit");
    assert!(err.is_insufficiency());

    // once an order leaves the active set its promise is released
    support::set_order_status(&pool, first, "CANCELLED").await;
    let snapshot = frozen::calculate_frozen_inventory(&mut conn, store_id, None)
        .await
        .expect("frozen snapshot after cancel");
    assert_eq!(snapshot.frozen_ingredient(beans), 4.0);
    orders::check_order_lines(&mut conn, store_id, std::slice::from_ref(&line))
        .await
        .expect("unit fits after cancellation");
}

#[tokio::test]
async fn frozen_filter_restricts_accumulation() {
    if !support::itests_enabled() {
        return;
    }
    let (_container, pool) = support::setup_database().await;

    let store_id = Uuid::new_v4();
    let mocha = support::insert_product_size(&pool, "mocha 300").await;
    let cocoa = support::insert_ingredient(&pool, "cocoa").await;
    let cream = support::insert_ingredient(&pool, "cream").await;
    support::insert_product_size_ingredient(&pool, mocha, cocoa, 1.0).await;
    support::insert_product_size_ingredient(&pool, mocha, cream, 2.0).await;
    support::insert_stock(&pool, store_id, cocoa, 10.0, 1.0).await;
    support::insert_stock(&pool, store_id, cream, 10.0, 1.0).await;
    let store_product = support::insert_store_product(&pool, store_id, mocha).await;
    support::insert_active_order(&pool, store_id, store_product, 1, &[]).await;

    let mut conn = pool.acquire().await.unwrap();
    let filter = FrozenInventoryFilter { ingredient_ids: vec![cocoa], provision_ids: vec![] };
    let snapshot = frozen::calculate_frozen_inventory(&mut conn, store_id, Some(&filter))
        .await
        .expect("filtered snapshot");
    assert_eq!(snapshot.frozen_ingredient(cocoa), 1.0);
    assert_eq!(snapshot.frozen_ingredient(cream), 0.0);
}
