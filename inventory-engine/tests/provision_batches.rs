//! Batch-level behavior against real rows: FIFO consumption, all-or-nothing
//! failure, and the PREPARING -> COMPLETED -> EMPTY lifecycle.
//! NOTE: spins up ephemeral Postgres with testcontainers; requires Docker and
//! ENABLE_ITESTS=1.

mod support;

use common_observability::EngineMetrics;
use inventory_engine::provisions::{
    complete_store_provision, create_store_provision, delete_store_provision, NewStoreProvision,
    ProvisionIngredientLine,
};
use inventory_engine::{deduction, InventoryError};
use uuid::Uuid;

#[tokio::test]
async fn consumption_drains_oldest_batch_first() {
    if !support::itests_enabled() {
        return;
    }
    let (_container, pool) = support::setup_database().await;

    let store_id = Uuid::new_v4();
    let syrup = support::insert_provision(&pool, "vanilla syrup", 0).await;
    let b1 = support::insert_completed_batch(&pool, store_id, syrup, 3.0, 120.0).await;
    let b2 = support::insert_completed_batch(&pool, store_id, syrup, 5.0, 60.0).await;

    let mut tx = pool.begin().await.unwrap();
    let updated = deduction::deduct_provisions(&mut tx, store_id, syrup, 4.0)
        .await
        .expect("4 of 8 available");
    tx.commit().await.unwrap();
    assert_eq!(updated.len(), 2);

    let (b1_volume, b1_status) = support::batch_state(&pool, b1).await;
    let (b2_volume, b2_status) = support::batch_state(&pool, b2).await;
    assert_eq!(b1_volume, 0.0);
    assert_eq!(b1_status, "EMPTY");
    assert_eq!(b2_volume, 4.0);
    assert_eq!(b2_status, "COMPLETED");
}

#[tokio::test]
async fn shortfall_leaves_every_batch_untouched() {
    if !support::itests_enabled() {
        return;
    }
    let (_container, pool) = support::setup_database().await;

    let store_id = Uuid::new_v4();
    let syrup = support::insert_provision(&pool, "caramel syrup", 0).await;
    let b1 = support::insert_completed_batch(&pool, store_id, syrup, 3.0, 120.0).await;
    let b2 = support::insert_completed_batch(&pool, store_id, syrup, 5.0, 60.0).await;

    let mut tx = pool.begin().await.unwrap();
    let err = deduction::deduct_provisions(&mut tx, store_id, syrup, 10.0)
        .await
        .expect_err("10 > 8 must fail");
    drop(tx); // rollback
    assert!(matches!(
        err,
        InventoryError::InsufficientProvision { requested, available, .. }
            if requested == 10.0 && available == 8.0
    ));

    assert_eq!(support::batch_state(&pool, b1).await, (3.0, "COMPLETED".to_string()));
    assert_eq!(support::batch_state(&pool, b2).await, (5.0, "COMPLETED".to_string()));
}

#[tokio::test]
async fn batch_lifecycle_create_complete_delete() {
    if !support::itests_enabled() {
        return;
    }
    let (_container, pool) = support::setup_database().await;
    let metrics = EngineMetrics::new();

    let store_id = Uuid::new_v4();
    let base = support::insert_provision(&pool, "cold brew base", 0).await;
    let coffee = support::insert_ingredient(&pool, "ground coffee").await;
    support::insert_provision_ingredient(&pool, base, coffee, 2.0).await;

    // the store does not track ground coffee yet; creation must seed the row
    let input = NewStoreProvision {
        provision_id: base,
        volume: 10.0,
        expiration_minutes: 60,
        ingredients: vec![ProvisionIngredientLine { ingredient_id: coffee, quantity: 2.0 }],
    };
    let batch = create_store_provision(&pool, store_id, &input)
        .await
        .expect("record batch");
    assert_eq!(support::stock_quantity(&pool, store_id, coffee).await, 0.0);

    // realizing the batch needs 2 units of coffee but the store has none
    let err = complete_store_provision(&pool, &metrics, store_id, batch.id)
        .await
        .expect_err("no stock to realize the batch");
    assert!(err.is_insufficiency());

    support::set_stock_quantity(&pool, store_id, coffee, 5.0).await;
    let (completed, deducted) = complete_store_provision(&pool, &metrics, store_id, batch.id)
        .await
        .expect("complete batch");
    assert!(completed.expires_at.is_some());
    assert_eq!(deducted.len(), 1);
    assert_eq!(support::stock_quantity(&pool, store_id, coffee).await, 3.0);

    // completing twice is rejected
    let err = complete_store_provision(&pool, &metrics, store_id, batch.id)
        .await
        .expect_err("already completed");
    assert!(matches!(err, InventoryError::ProvisionNotPreparing(_)));

    // a live batch still counts toward availability and cannot be deleted
    let err = delete_store_provision(&pool, store_id, batch.id)
        .await
        .expect_err("live batch is protected");
    assert!(matches!(err, InventoryError::ProvisionStillHoldsVolume(_)));

    // drain it, then deletion (soft) is allowed
    let mut tx = pool.begin().await.unwrap();
    deduction::deduct_provisions(&mut tx, store_id, base, 10.0)
        .await
        .expect("drain batch");
    tx.commit().await.unwrap();
    delete_store_provision(&pool, store_id, batch.id)
        .await
        .expect("delete drained batch");
    let deleted_at: Option<chrono::DateTime<chrono::Utc>> =
        sqlx::query_scalar("SELECT deleted_at FROM store_provisions WHERE id = $1")
            .bind(batch.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(deleted_at.is_some());
}

#[tokio::test]
async fn daily_limit_and_recipe_set_are_enforced() {
    if !support::itests_enabled() {
        return;
    }
    let (_container, pool) = support::setup_database().await;

    let store_id = Uuid::new_v4();
    let matcha = support::insert_provision(&pool, "matcha base", 1).await;
    let powder = support::insert_ingredient(&pool, "matcha powder").await;
    support::insert_provision_ingredient(&pool, matcha, powder, 1.0).await;

    let good = NewStoreProvision {
        provision_id: matcha,
        volume: 5.0,
        expiration_minutes: 0,
        ingredients: vec![ProvisionIngredientLine { ingredient_id: powder, quantity: 1.0 }],
    };
    create_store_provision(&pool, store_id, &good).await.expect("first batch of the day");

    let err = create_store_provision(&pool, store_id, &good)
        .await
        .expect_err("limit is one per day");
    assert!(matches!(err, InventoryError::DailyLimitReached { limit: 1, .. }));

    let wrong_set = NewStoreProvision {
        ingredients: vec![ProvisionIngredientLine {
            ingredient_id: Uuid::new_v4(),
            quantity: 1.0,
        }],
        ..good.clone()
    };
    let other_store = Uuid::new_v4();
    let err = create_store_provision(&pool, other_store, &wrong_set)
        .await
        .expect_err("lines must match the recipe set");
    assert!(matches!(err, InventoryError::ProvisionIngredientMismatch(_)));
}
