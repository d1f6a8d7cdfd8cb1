//! Order placement: stock accounting and all-or-nothing semantics.

#![allow(clippy::unwrap_used)]

use driftwood_core::{Money, OrderStatus};
use driftwood_integration_tests::{
    coordinator, get_order, get_product, get_user, init_tracing, money, seed_product, seed_user,
};
use driftwood_store::{DocumentStore, Filter, MemoryStore, Repo};
use driftwood_workflows::{ItemRequest, Order, OrderRequest, StockChangeReason, WorkflowError};
use uuid::Uuid;

async fn order_count(store: &MemoryStore) -> u64 {
    let mut conn = store.conn().await.unwrap();
    Repo::<Order, _>::new(&mut conn)
        .count(&Filter::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn placing_an_order_updates_stock_and_buyer_aggregates() {
    init_tracing();
    let store = MemoryStore::new();
    let buyer = seed_user(&store, "Ada", "ada@example.com", Money::ZERO).await;
    let widget = seed_product(&store, "Widget", "tools", money("10"), 8).await;
    let gadget = seed_product(&store, "Gadget", "tools", money("25.50"), 3).await;
    let wf = coordinator(&store);

    let receipt = wf
        .process_order(
            &OrderRequest {
                user_id: buyer.meta.id.to_string(),
            },
            &[
                ItemRequest {
                    product_id: widget.meta.id.to_string(),
                    quantity: 2,
                },
                ItemRequest {
                    product_id: gadget.meta.id.to_string(),
                    quantity: 1,
                },
            ],
        )
        .await
        .unwrap();

    // 2 * 10 + 1 * 25.50
    assert_eq!(receipt.total, money("45.50"));
    assert_eq!(receipt.items.len(), 2);

    let order = get_order(&store, receipt.order_id).await;
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.total, money("45.50"));
    assert_eq!(order.user_id, buyer.meta.id);
    assert_eq!(order.items[0].line_total, money("20"));

    let widget_after = get_product(&store, widget.meta.id).await;
    assert_eq!(widget_after.stock, 6);
    let movement = widget_after.stock_history.last().unwrap();
    assert_eq!(movement.reason, StockChangeReason::OrderPlaced);
    assert_eq!(movement.quantity, -2);
    assert_eq!(movement.order_id, receipt.order_id);

    let buyer_after = get_user(&store, buyer.meta.id).await;
    assert_eq!(buyer_after.total_orders, 1);
    assert_eq!(buyer_after.total_spent, money("45.50"));
    assert_eq!(buyer_after.order_history, vec![receipt.order_id]);
}

#[tokio::test]
async fn oversold_item_aborts_without_touching_stock() {
    init_tracing();
    let store = MemoryStore::new();
    let buyer = seed_user(&store, "Ada", "ada@example.com", Money::ZERO).await;
    let scarce = seed_product(&store, "Scarce", "tools", money("10"), 5).await;
    let wf = coordinator(&store);

    let err = wf
        .process_order(
            &OrderRequest {
                user_id: buyer.meta.id.to_string(),
            },
            &[ItemRequest {
                product_id: scarce.meta.id.to_string(),
                quantity: 6,
            }],
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        WorkflowError::OutOfStock {
            requested: 6,
            available: 5,
            ..
        }
    ));
    assert_eq!(get_product(&store, scarce.meta.id).await.stock, 5);
    assert_eq!(order_count(&store).await, 0);
    assert_eq!(get_user(&store, buyer.meta.id).await.total_orders, 0);
}

#[tokio::test]
async fn duplicate_lines_are_checked_against_combined_quantity() {
    init_tracing();
    let store = MemoryStore::new();
    let buyer = seed_user(&store, "Ada", "ada@example.com", Money::ZERO).await;
    let scarce = seed_product(&store, "Scarce", "tools", money("10"), 5).await;
    let wf = coordinator(&store);
    let request = OrderRequest {
        user_id: buyer.meta.id.to_string(),
    };
    let line = |quantity| ItemRequest {
        product_id: scarce.meta.id.to_string(),
        quantity,
    };

    // Each line fits on its own, but together they oversell.
    let err = wf
        .process_order(&request, &[line(3), line(3)])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::OutOfStock {
            requested: 6,
            available: 5,
            ..
        }
    ));
    assert_eq!(get_product(&store, scarce.meta.id).await.stock, 5);
    assert_eq!(order_count(&store).await, 0);

    // A combined quantity within stock still goes through line by line.
    let receipt = wf
        .process_order(&request, &[line(2), line(3)])
        .await
        .unwrap();
    assert_eq!(receipt.items.len(), 2);
    assert_eq!(receipt.total, money("50"));
    assert_eq!(get_product(&store, scarce.meta.id).await.stock, 0);
}

#[tokio::test]
async fn one_bad_line_rolls_back_the_whole_order() {
    init_tracing();
    let store = MemoryStore::new();
    let buyer = seed_user(&store, "Ada", "ada@example.com", Money::ZERO).await;
    let plenty = seed_product(&store, "Plenty", "tools", money("5"), 100).await;
    let scarce = seed_product(&store, "Scarce", "tools", money("10"), 1).await;
    let wf = coordinator(&store);

    let err = wf
        .process_order(
            &OrderRequest {
                user_id: buyer.meta.id.to_string(),
            },
            &[
                ItemRequest {
                    product_id: plenty.meta.id.to_string(),
                    quantity: 10,
                },
                ItemRequest {
                    product_id: scarce.meta.id.to_string(),
                    quantity: 2,
                },
            ],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, WorkflowError::OutOfStock { .. }));
    // The valid first line must not survive the failed second one.
    let plenty_after = get_product(&store, plenty.meta.id).await;
    assert_eq!(plenty_after.stock, 100);
    assert!(plenty_after.stock_history.is_empty());
    assert_eq!(order_count(&store).await, 0);
}

#[tokio::test]
async fn order_total_past_decimal_range_is_rejected() {
    init_tracing();
    let store = MemoryStore::new();
    let buyer = seed_user(&store, "Ada", "ada@example.com", Money::ZERO).await;
    // Largest representable amount; two of them cannot be totalled.
    let priceless = seed_product(
        &store,
        "Priceless",
        "art",
        money("79228162514264337593543950335"),
        10,
    )
    .await;
    let wf = coordinator(&store);

    let err = wf
        .process_order(
            &OrderRequest {
                user_id: buyer.meta.id.to_string(),
            },
            &[ItemRequest {
                product_id: priceless.meta.id.to_string(),
                quantity: 2,
            }],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, WorkflowError::AmountOverflow(_)));
    assert_eq!(get_product(&store, priceless.meta.id).await.stock, 10);
    assert_eq!(order_count(&store).await, 0);
}

#[tokio::test]
async fn missing_buyer_fails_with_not_found() {
    init_tracing();
    let store = MemoryStore::new();
    let widget = seed_product(&store, "Widget", "tools", money("10"), 8).await;
    let wf = coordinator(&store);

    let err = wf
        .process_order(
            &OrderRequest {
                user_id: Uuid::new_v4().to_string(),
            },
            &[ItemRequest {
                product_id: widget.meta.id.to_string(),
                quantity: 1,
            }],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, WorkflowError::NotFound { kind: "user", .. }));
    assert_eq!(get_product(&store, widget.meta.id).await.stock, 8);
}

#[tokio::test]
async fn malformed_product_id_is_rejected_up_front() {
    init_tracing();
    let store = MemoryStore::new();
    let buyer = seed_user(&store, "Ada", "ada@example.com", Money::ZERO).await;
    let wf = coordinator(&store);

    let err = wf
        .process_order(
            &OrderRequest {
                user_id: buyer.meta.id.to_string(),
            },
            &[ItemRequest {
                product_id: "garbage".to_owned(),
                quantity: 1,
            }],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidIdentifier(_)));
}
