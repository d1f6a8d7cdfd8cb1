//! Shared fixtures for Driftwood integration tests.
//!
//! Tests run against the in-memory store, which implements the same
//! [`DocumentStore`] contract as the Postgres backend, including snapshot
//! sessions and first-committer-wins conflict detection. Fixtures seed
//! documents through the same repositories the workflows use.

use driftwood_core::{DocumentId, Email, Money};
use driftwood_store::{DocumentStore, MemoryStore, Repo};
use driftwood_workflows::{Order, Product, User, WorkflowCoordinator};

/// Install a test-friendly tracing subscriber. Safe to call from every test;
/// only the first call wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A coordinator with the default (no-retry) policy over the given store.
#[must_use]
pub fn coordinator(store: &MemoryStore) -> WorkflowCoordinator<MemoryStore> {
    WorkflowCoordinator::new(store.clone())
}

/// Parse a decimal literal into [`Money`].
#[must_use]
pub fn money(s: &str) -> Money {
    Money::new(s.parse().expect("valid decimal literal"))
}

/// Create an active user with the given opening balance.
pub async fn seed_user(store: &MemoryStore, name: &str, email: &str, balance: Money) -> User {
    let mut conn = store.conn().await.expect("store connection");
    Repo::<User, _>::new(&mut conn)
        .create(User::new(
            name,
            Email::parse(email).expect("valid fixture email"),
            balance,
        ))
        .await
        .expect("seed user")
}

/// Create a product with the given price and stock level.
pub async fn seed_product(
    store: &MemoryStore,
    name: &str,
    category: &str,
    price: Money,
    stock: i64,
) -> Product {
    let mut conn = store.conn().await.expect("store connection");
    Repo::<Product, _>::new(&mut conn)
        .create(Product::new(name, category, price, stock))
        .await
        .expect("seed product")
}

/// Reload a user by id, panicking if it vanished.
pub async fn get_user(store: &MemoryStore, id: DocumentId) -> User {
    let mut conn = store.conn().await.expect("store connection");
    Repo::<User, _>::new(&mut conn)
        .find_by_id(id)
        .await
        .expect("find user")
        .expect("user exists")
}

/// Reload a product by id, panicking if it vanished.
pub async fn get_product(store: &MemoryStore, id: DocumentId) -> Product {
    let mut conn = store.conn().await.expect("store connection");
    Repo::<Product, _>::new(&mut conn)
        .find_by_id(id)
        .await
        .expect("find product")
        .expect("product exists")
}

/// Reload an order by id, panicking if it vanished.
pub async fn get_order(store: &MemoryStore, id: DocumentId) -> Order {
    let mut conn = store.conn().await.expect("store connection");
    Repo::<Order, _>::new(&mut conn)
        .find_by_id(id)
        .await
        .expect("find order")
        .expect("order exists")
}
