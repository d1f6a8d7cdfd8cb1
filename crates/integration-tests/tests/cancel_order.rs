//! Order cancellation: compensating restock and aggregate rewind.

#![allow(clippy::unwrap_used)]

use driftwood_core::{DocumentId, Money, OrderStatus};
use driftwood_integration_tests::{
    coordinator, get_order, get_product, get_user, init_tracing, money, seed_product, seed_user,
};
use driftwood_store::{DocumentStore, MemoryStore, Repo, Update};
use driftwood_workflows::{
    ItemRequest, Order, OrderRequest, StockChangeReason, WorkflowCoordinator, WorkflowError,
};
use uuid::Uuid;

/// Seed a buyer with a pending order of 2 widgets; returns (buyer id,
/// product id, order id).
async fn placed_order(
    store: &MemoryStore,
    wf: &WorkflowCoordinator<MemoryStore>,
) -> (DocumentId, DocumentId, DocumentId) {
    let buyer = seed_user(store, "Ada", "ada@example.com", Money::ZERO).await;
    let widget = seed_product(store, "Widget", "tools", money("10"), 7).await;
    let receipt = wf
        .process_order(
            &OrderRequest {
                user_id: buyer.meta.id.to_string(),
            },
            &[ItemRequest {
                product_id: widget.meta.id.to_string(),
                quantity: 2,
            }],
        )
        .await
        .unwrap();
    (buyer.meta.id, widget.meta.id, receipt.order_id)
}

#[tokio::test]
async fn cancelling_restocks_and_rewinds_aggregates() {
    init_tracing();
    let store = MemoryStore::new();
    let wf = coordinator(&store);
    let (buyer_id, product_id, order_id) = placed_order(&store, &wf).await;
    assert_eq!(get_product(&store, product_id).await.stock, 5);

    let receipt = wf
        .cancel_order(&order_id.to_string(), "changed my mind")
        .await
        .unwrap();
    assert_eq!(receipt.refunded, money("20"));
    assert_eq!(receipt.units_restocked, 2);

    let product = get_product(&store, product_id).await;
    assert_eq!(product.stock, 7);
    let movement = product.stock_history.last().unwrap();
    assert_eq!(movement.reason, StockChangeReason::OrderCancelled);
    assert_eq!(movement.quantity, 2);

    let order = get_order(&store, order_id).await;
    assert_eq!(order.status, OrderStatus::Cancelled);
    let cancellation = order.cancellation.unwrap();
    assert_eq!(cancellation.reason, "changed my mind");
    // The item list and total survive cancellation untouched.
    assert_eq!(order.total, money("20"));
    assert_eq!(order.items.len(), 1);

    let buyer = get_user(&store, buyer_id).await;
    assert_eq!(buyer.total_orders, 0);
    assert_eq!(buyer.total_spent, Money::ZERO);
    assert_eq!(buyer.cancelled_orders, 1);
}

#[tokio::test]
async fn second_cancellation_fails_and_changes_nothing() {
    init_tracing();
    let store = MemoryStore::new();
    let wf = coordinator(&store);
    let (buyer_id, product_id, order_id) = placed_order(&store, &wf).await;

    wf.cancel_order(&order_id.to_string(), "first").await.unwrap();
    let err = wf
        .cancel_order(&order_id.to_string(), "second")
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::AlreadyCancelled(_)));

    // State after the failed second call is identical to after the first.
    let product = get_product(&store, product_id).await;
    assert_eq!(product.stock, 7);
    assert_eq!(product.stock_history.len(), 2);
    let buyer = get_user(&store, buyer_id).await;
    assert_eq!(buyer.cancelled_orders, 1);
    assert_eq!(
        get_order(&store, order_id).await.cancellation.unwrap().reason,
        "first"
    );
}

#[tokio::test]
async fn shipped_orders_cannot_be_cancelled() {
    init_tracing();
    let store = MemoryStore::new();
    let wf = coordinator(&store);
    let (buyer_id, product_id, order_id) = placed_order(&store, &wf).await;

    // Move the order past the point of no return.
    let mut conn = store.conn().await.unwrap();
    Repo::<Order, _>::new(&mut conn)
        .update_by_id(order_id, Update::new().set("status", "shipped"))
        .await
        .unwrap()
        .unwrap();

    let err = wf
        .cancel_order(&order_id.to_string(), "too late")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::NotCancellable {
            status: OrderStatus::Shipped,
            ..
        }
    ));

    assert_eq!(get_product(&store, product_id).await.stock, 5);
    assert_eq!(get_user(&store, buyer_id).await.cancelled_orders, 0);
    assert_eq!(get_order(&store, order_id).await.status, OrderStatus::Shipped);
}

#[tokio::test]
async fn missing_order_fails_with_not_found() {
    init_tracing();
    let store = MemoryStore::new();
    let wf = coordinator(&store);

    let err = wf
        .cancel_order(&Uuid::new_v4().to_string(), "whatever")
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound { kind: "order", .. }));
}
