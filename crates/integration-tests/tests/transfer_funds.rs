//! Fund transfers: balance conservation and the ledger pair contract.

#![allow(clippy::unwrap_used)]

use driftwood_core::{EntryType, Money};
use driftwood_integration_tests::{coordinator, get_user, init_tracing, money, seed_user};
use driftwood_store::MemoryStore;
use driftwood_workflows::WorkflowError;
use uuid::Uuid;

#[tokio::test]
async fn transfer_moves_exactly_the_amount() {
    init_tracing();
    let store = MemoryStore::new();
    let alice = seed_user(&store, "Alice", "alice@example.com", money("500")).await;
    let bob = seed_user(&store, "Bob", "bob@example.com", money("50")).await;
    let wf = coordinator(&store);

    let receipt = wf
        .transfer_funds(
            &alice.meta.id.to_string(),
            &bob.meta.id.to_string(),
            money("100"),
            Some("rent"),
        )
        .await
        .unwrap();

    let alice_after = get_user(&store, alice.meta.id).await;
    let bob_after = get_user(&store, bob.meta.id).await;
    assert_eq!(alice_after.balance, money("400"));
    assert_eq!(bob_after.balance, money("150"));
    assert_eq!(receipt.amount, money("100"));
    assert_eq!(receipt.source_balance, money("400"));
    assert_eq!(receipt.dest_balance, money("150"));
}

#[tokio::test]
async fn ledger_entries_share_correlation_and_sum_to_zero() {
    init_tracing();
    let store = MemoryStore::new();
    let alice = seed_user(&store, "Alice", "alice@example.com", money("500")).await;
    let bob = seed_user(&store, "Bob", "bob@example.com", Money::ZERO).await;
    let wf = coordinator(&store);

    let receipt = wf
        .transfer_funds(
            &alice.meta.id.to_string(),
            &bob.meta.id.to_string(),
            money("100"),
            None,
        )
        .await
        .unwrap();

    let alice_after = get_user(&store, alice.meta.id).await;
    let bob_after = get_user(&store, bob.meta.id).await;
    let debit = alice_after.transactions.last().unwrap();
    let credit = bob_after.transactions.last().unwrap();

    assert_eq!(debit.correlation_id, receipt.correlation_id);
    assert_eq!(credit.correlation_id, receipt.correlation_id);
    assert_eq!(debit.entry_type, EntryType::Debit);
    assert_eq!(credit.entry_type, EntryType::Credit);
    assert_eq!(debit.amount, money("-100"));
    assert_eq!(credit.amount, money("100"));
    assert_eq!(debit.amount + credit.amount, Money::ZERO);
    assert_eq!(debit.counterparty, Some(bob.meta.id));
    assert_eq!(credit.counterparty, Some(alice.meta.id));
}

#[tokio::test]
async fn non_positive_amount_is_rejected_before_any_store_access() {
    init_tracing();
    let store = MemoryStore::new();
    let alice = seed_user(&store, "Alice", "alice@example.com", money("500")).await;
    let bob = seed_user(&store, "Bob", "bob@example.com", money("50")).await;
    let wf = coordinator(&store);

    for bad in [Money::ZERO, money("-10")] {
        let err = wf
            .transfer_funds(
                &alice.meta.id.to_string(),
                &bob.meta.id.to_string(),
                bad,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidAmount(a) if a == bad));
    }

    let alice_after = get_user(&store, alice.meta.id).await;
    let bob_after = get_user(&store, bob.meta.id).await;
    assert_eq!(alice_after.balance, money("500"));
    assert_eq!(bob_after.balance, money("50"));
    assert!(alice_after.transactions.is_empty());
    assert!(bob_after.transactions.is_empty());
}

#[tokio::test]
async fn insufficient_funds_leaves_both_accounts_untouched() {
    init_tracing();
    let store = MemoryStore::new();
    let alice = seed_user(&store, "Alice", "alice@example.com", money("30")).await;
    let bob = seed_user(&store, "Bob", "bob@example.com", Money::ZERO).await;
    let wf = coordinator(&store);

    let err = wf
        .transfer_funds(
            &alice.meta.id.to_string(),
            &bob.meta.id.to_string(),
            money("100"),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::InsufficientFunds { required, available }
            if required == money("100") && available == money("30")
    ));

    assert_eq!(get_user(&store, alice.meta.id).await.balance, money("30"));
    assert_eq!(get_user(&store, bob.meta.id).await.balance, Money::ZERO);
}

#[tokio::test]
async fn missing_account_fails_with_not_found() {
    init_tracing();
    let store = MemoryStore::new();
    let alice = seed_user(&store, "Alice", "alice@example.com", money("500")).await;
    let wf = coordinator(&store);

    let ghost = Uuid::new_v4().to_string();
    let err = wf
        .transfer_funds(&alice.meta.id.to_string(), &ghost, money("10"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound { kind: "user", .. }));
    assert_eq!(get_user(&store, alice.meta.id).await.balance, money("500"));
}

#[tokio::test]
async fn malformed_identifier_is_rejected() {
    init_tracing();
    let store = MemoryStore::new();
    let wf = coordinator(&store);

    let err = wf
        .transfer_funds("not-a-uuid", "also-not-a-uuid", money("10"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidIdentifier(_)));
}
