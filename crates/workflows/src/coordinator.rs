//! The workflow coordinator: five atomic business operations.
//!
//! Each workflow validates its plain inputs with zero store access, then
//! opens exactly one transactional session and threads it through every
//! nested repository call. The session is the only executor in scope inside
//! a workflow body, so forgetting to propagate it is a compile error, not a
//! latent atomicity bug.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use driftwood_core::{DocumentId, Email, Money, OrderStatus};
use driftwood_store::{
    Document, DocumentMeta, DocumentStore, IndexSpec, Repo, StoreError, StoreExecutor, Update,
};
use futures::FutureExt;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

use crate::documents::{
    Cancellation, LedgerEntry, Order, OrderItem, PriceChange, Product, Profile, StockChange,
    StockChangeReason, User,
};
use crate::error::WorkflowError;

/// How the coordinator reacts to store-level write conflicts.
///
/// The default does not retry: a [`StoreError::TransactionAborted`] reaches
/// the caller on the first occurrence. Callers that prefer transparency over
/// latency can allow a bounded number of re-runs with a fixed backoff; only
/// aborted transactions are retried, never business-rule violations.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Minimum 1.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::from_millis(50),
        }
    }
}

/// Composes repositories into atomic business workflows.
#[derive(Debug, Clone)]
pub struct WorkflowCoordinator<S: DocumentStore> {
    store: S,
    retry: RetryPolicy,
}

impl<S: DocumentStore> WorkflowCoordinator<S> {
    #[must_use]
    pub fn new(store: S) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The underlying store, for read-only consumers.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Create the unique indexes the workflows rely on.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn prepare(&self) -> Result<(), WorkflowError> {
        let mut conn = self.store.conn().await?;
        Repo::<User, _>::new(&mut conn)
            .ensure_indexes(&[IndexSpec::unique("users_email", "email")])
            .await?;
        Ok(())
    }

    /// Place an order: verify the buyer and stock for every item, create the
    /// order, decrement stock, and update the buyer's aggregates — all or
    /// nothing.
    ///
    /// # Errors
    ///
    /// `InvalidIdentifier` before any store access; `NotFound` for a missing
    /// buyer or product; `OutOfStock` if any requested quantity exceeds
    /// availability, in which case no stock mutation survives.
    #[tracing::instrument(skip(self, request, items), fields(user_id = %request.user_id))]
    pub async fn process_order(
        &self,
        request: &OrderRequest,
        items: &[ItemRequest],
    ) -> Result<OrderReceipt, WorkflowError> {
        let user_id = DocumentId::parse(&request.user_id)?;
        let mut wanted = Vec::with_capacity(items.len());
        for item in items {
            wanted.push((DocumentId::parse(&item.product_id)?, item.quantity));
        }
        self.run(|| {
            let wanted = wanted.clone();
            self.store.with_transaction(move |session| {
                async move { place_order(session, user_id, &wanted).await }.boxed_local()
            })
        })
        .await
    }

    /// Move funds between two accounts, writing a matched pair of ledger
    /// entries that share one correlation id and sum to zero.
    ///
    /// # Errors
    ///
    /// `InvalidAmount` for a non-positive amount (before any store access);
    /// `NotFound` if either account is absent; `InsufficientFunds` if the
    /// source balance cannot cover the amount.
    #[tracing::instrument(skip(self, note), fields(%amount))]
    pub async fn transfer_funds(
        &self,
        source_id: &str,
        dest_id: &str,
        amount: Money,
        note: Option<&str>,
    ) -> Result<TransferReceipt, WorkflowError> {
        if !amount.is_positive() {
            return Err(WorkflowError::InvalidAmount(amount));
        }
        let source = DocumentId::parse(source_id)?;
        let dest = DocumentId::parse(dest_id)?;
        let note = note.map(str::to_owned);
        self.run(|| {
            let note = note.clone();
            self.store.with_transaction(move |session| {
                async move { transfer(session, source, dest, amount, note.as_deref()).await }
                    .boxed_local()
            })
        })
        .await
    }

    /// Cancel an order by compensation: restock every item, mark the order
    /// cancelled, and rewind the buyer's aggregates.
    ///
    /// # Errors
    ///
    /// `NotFound` if the order is absent; `AlreadyCancelled` if it is
    /// already cancelled; `NotCancellable` once it has shipped or been
    /// delivered. None of these mutate anything.
    #[tracing::instrument(skip(self, reason))]
    pub async fn cancel_order(
        &self,
        order_id: &str,
        reason: &str,
    ) -> Result<CancellationReceipt, WorkflowError> {
        let order_id = DocumentId::parse(order_id)?;
        self.run(|| {
            let reason = reason.to_owned();
            self.store.with_transaction(move |session| {
                async move { cancel(session, order_id, &reason).await }.boxed_local()
            })
        })
        .await
    }

    /// Revise prices for a batch of products, recording a history entry per
    /// product. The whole batch is validated before anything is written: one
    /// bad entry rejects all of them.
    ///
    /// # Errors
    ///
    /// `InvalidIdentifier`/`InvalidPrice` before any store access;
    /// `NotFound` (aborting the batch) if any product is absent.
    #[tracing::instrument(skip(self, updates), fields(batch = updates.len()))]
    pub async fn bulk_update_prices(
        &self,
        updates: &[PriceUpdate],
    ) -> Result<Vec<PriceDelta>, WorkflowError> {
        let mut parsed = Vec::with_capacity(updates.len());
        for update in updates {
            if !update.new_price.is_positive() {
                return Err(WorkflowError::InvalidPrice {
                    product_id: update.product_id.clone(),
                    price: update.new_price,
                });
            }
            parsed.push((
                DocumentId::parse(&update.product_id)?,
                update.new_price,
                update.reason.clone(),
            ));
        }
        self.run(|| {
            let parsed = parsed.clone();
            self.store.with_transaction(move |session| {
                async move { revise_prices(session, &parsed).await }.boxed_local()
            })
        })
        .await
    }

    /// Provision a user: create the account (optionally with an opening
    /// balance and its synthetic credit entry) and, if requested, a linked
    /// profile in the same session.
    ///
    /// # Errors
    ///
    /// `InvalidEmail`/`InvalidAmount` before any store access; a failure in
    /// the profile step rolls back the user creation too.
    #[tracing::instrument(skip(self, new_user, options), fields(email = %new_user.email))]
    pub async fn create_user_with_setup(
        &self,
        new_user: &NewUser,
        options: &SetupOptions,
    ) -> Result<ProvisionedUser, WorkflowError> {
        let email = Email::parse(&new_user.email)?;
        let balance = options.initial_balance.unwrap_or(Money::ZERO);
        if balance < Money::ZERO {
            return Err(WorkflowError::InvalidAmount(balance));
        }
        self.run(|| {
            let name = new_user.name.clone();
            let email = email.clone();
            let options = options.clone();
            self.store.with_transaction(move |session| {
                async move { provision(session, &name, email, balance, &options).await }
                    .boxed_local()
            })
        })
        .await
    }

    /// Run a workflow attempt, re-running it on aborted transactions up to
    /// the policy's attempt budget.
    async fn run<R, F, Fut>(&self, mut attempt: F) -> Result<R, WorkflowError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, WorkflowError>>,
    {
        let mut tries = 1;
        loop {
            match attempt().await {
                Err(e) if e.is_retryable() && tries < self.retry.max_attempts.max(1) => {
                    tracing::warn!(tries, "workflow aborted on write conflict, retrying");
                    tries += 1;
                    tokio::time::sleep(self.retry.backoff).await;
                }
                outcome => return outcome,
            }
        }
    }
}

// =============================================================================
// Workflow inputs and receipts
// =============================================================================

/// Order intent: who is buying.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub user_id: String,
}

/// One requested order line.
#[derive(Debug, Clone)]
pub struct ItemRequest {
    pub product_id: String,
    pub quantity: u32,
}

/// What a successful `process_order` committed.
#[derive(Debug, Clone)]
pub struct OrderReceipt {
    pub order_id: DocumentId,
    pub user_id: DocumentId,
    pub total: Money,
    pub items: Vec<OrderItem>,
}

/// What a successful `transfer_funds` committed, with both balances as of
/// the commit.
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub correlation_id: DocumentId,
    pub amount: Money,
    pub source_balance: Money,
    pub dest_balance: Money,
}

/// What a successful `cancel_order` compensated.
#[derive(Debug, Clone)]
pub struct CancellationReceipt {
    pub order_id: DocumentId,
    pub refunded: Money,
    pub units_restocked: u64,
}

/// One entry in a price revision batch.
#[derive(Debug, Clone)]
pub struct PriceUpdate {
    pub product_id: String,
    pub new_price: Money,
    pub reason: Option<String>,
}

/// Before/after view of one product's price revision.
#[derive(Debug, Clone)]
pub struct PriceDelta {
    pub product_id: DocumentId,
    pub old_price: Money,
    pub new_price: Money,
    pub change: Money,
    /// `None` when the old price was zero.
    pub percent_change: Option<Decimal>,
}

/// Input to user provisioning.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
}

/// Optional provisioning extras.
#[derive(Debug, Clone, Default)]
pub struct SetupOptions {
    pub initial_balance: Option<Money>,
    pub profile: Option<ProfileSeed>,
}

/// Fields for the linked profile created during provisioning.
#[derive(Debug, Clone, Default)]
pub struct ProfileSeed {
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
}

/// What a successful `create_user_with_setup` committed.
#[derive(Debug, Clone)]
pub struct ProvisionedUser {
    pub user: User,
    pub profile: Option<Profile>,
}

// =============================================================================
// Workflow bodies (only reachable with a session in hand)
// =============================================================================

async fn place_order<E: StoreExecutor>(
    session: &mut E,
    user_id: DocumentId,
    wanted: &[(DocumentId, u32)],
) -> Result<OrderReceipt, WorkflowError> {
    let now = Utc::now();
    if Repo::<User, E>::new(&mut *session)
        .find_by_id(user_id)
        .await?
        .is_none()
    {
        return Err(not_found("user", user_id));
    }

    // Resolve every line against current stock before writing anything. A
    // product may appear on several lines, so each line is checked against
    // the running total requested for that product, not just its own.
    let mut items = Vec::with_capacity(wanted.len());
    let mut total = Money::ZERO;
    let mut requested: HashMap<DocumentId, i64> = HashMap::new();
    for &(product_id, quantity) in wanted {
        let product = Repo::<Product, E>::new(&mut *session)
            .find_by_id(product_id)
            .await?
            .ok_or_else(|| not_found("product", product_id))?;
        let so_far = requested.entry(product_id).or_insert(0);
        *so_far += i64::from(quantity);
        if *so_far > product.stock {
            return Err(WorkflowError::OutOfStock {
                product_id: product_id.to_string(),
                requested: u32::try_from(*so_far).unwrap_or(u32::MAX),
                available: product.stock,
            });
        }
        let line_total = product
            .price
            .checked_mul(quantity)
            .ok_or(WorkflowError::AmountOverflow("line total"))?;
        total = total
            .checked_add(line_total)
            .ok_or(WorkflowError::AmountOverflow("order total"))?;
        items.push(OrderItem {
            product_id,
            quantity,
            price: product.price,
            line_total,
        });
    }

    let order = Repo::<Order, E>::new(&mut *session)
        .create(Order {
            meta: DocumentMeta::unsaved(),
            user_id,
            items,
            total,
            status: OrderStatus::Pending,
            cancellation: None,
        })
        .await?;

    for item in &order.items {
        let delta = -i64::from(item.quantity);
        let change = StockChange {
            reason: StockChangeReason::OrderPlaced,
            order_id: order.id(),
            quantity: delta,
            timestamp: now,
        };
        Repo::<Product, E>::new(&mut *session)
            .update_by_id(
                item.product_id,
                Update::new()
                    .inc("stock", delta)
                    .push("stockHistory", encode(&change)?),
            )
            .await?
            .ok_or_else(|| not_found("product", item.product_id))?;
    }

    Repo::<User, E>::new(&mut *session)
        .update_by_id(
            user_id,
            Update::new()
                .push("orderHistory", encode(&order.id())?)
                .inc("totalOrders", 1)
                .inc("totalSpent", encode(&total)?),
        )
        .await?
        .ok_or_else(|| not_found("user", user_id))?;

    Ok(OrderReceipt {
        order_id: order.id(),
        user_id,
        total,
        items: order.items,
    })
}

async fn transfer<E: StoreExecutor>(
    session: &mut E,
    source_id: DocumentId,
    dest_id: DocumentId,
    amount: Money,
    note: Option<&str>,
) -> Result<TransferReceipt, WorkflowError> {
    let mut users = Repo::<User, E>::new(&mut *session);
    let source = users
        .find_by_id(source_id)
        .await?
        .ok_or_else(|| not_found("user", source_id))?;
    let dest = users
        .find_by_id(dest_id)
        .await?
        .ok_or_else(|| not_found("user", dest_id))?;
    if source.balance < amount {
        return Err(WorkflowError::InsufficientFunds {
            required: amount,
            available: source.balance,
        });
    }
    let dest_balance = dest
        .balance
        .checked_add(amount)
        .ok_or(WorkflowError::AmountOverflow("destination balance"))?;

    let correlation = DocumentId::new();
    let now = Utc::now();
    let note = note.map(str::to_owned);
    let debit = LedgerEntry::debit(correlation, amount, dest_id, now, note.clone());
    let credit = LedgerEntry::credit(correlation, amount, source_id, now, note);

    users
        .update_by_id(
            source_id,
            Update::new()
                .inc("balance", encode(&-amount)?)
                .push("transactions", encode(&debit)?),
        )
        .await?
        .ok_or_else(|| not_found("user", source_id))?;
    users
        .update_by_id(
            dest_id,
            Update::new()
                .inc("balance", encode(&amount)?)
                .push("transactions", encode(&credit)?),
        )
        .await?
        .ok_or_else(|| not_found("user", dest_id))?;

    Ok(TransferReceipt {
        correlation_id: correlation,
        amount,
        source_balance: source.balance - amount,
        dest_balance,
    })
}

async fn cancel<E: StoreExecutor>(
    session: &mut E,
    order_id: DocumentId,
    reason: &str,
) -> Result<CancellationReceipt, WorkflowError> {
    let order = Repo::<Order, E>::new(&mut *session)
        .find_by_id(order_id)
        .await?
        .ok_or_else(|| not_found("order", order_id))?;
    if order.status == OrderStatus::Cancelled {
        return Err(WorkflowError::AlreadyCancelled(order_id.to_string()));
    }
    if !order.status.is_cancellable() {
        return Err(WorkflowError::NotCancellable {
            id: order_id.to_string(),
            status: order.status,
        });
    }

    let now = Utc::now();
    let mut units: u64 = 0;
    for item in &order.items {
        let restored = i64::from(item.quantity);
        units += u64::from(item.quantity);
        let change = StockChange {
            reason: StockChangeReason::OrderCancelled,
            order_id,
            quantity: restored,
            timestamp: now,
        };
        Repo::<Product, E>::new(&mut *session)
            .update_by_id(
                item.product_id,
                Update::new()
                    .inc("stock", restored)
                    .push("stockHistory", encode(&change)?),
            )
            .await?
            .ok_or_else(|| not_found("product", item.product_id))?;
    }

    let cancellation = Cancellation {
        cancelled_at: now,
        reason: reason.to_owned(),
    };
    Repo::<Order, E>::new(&mut *session)
        .update_by_id(
            order_id,
            Update::new()
                .set("status", encode(&OrderStatus::Cancelled)?)
                .set("cancellation", encode(&cancellation)?),
        )
        .await?
        .ok_or_else(|| not_found("order", order_id))?;

    Repo::<User, E>::new(&mut *session)
        .update_by_id(
            order.user_id,
            Update::new()
                .inc("totalOrders", -1)
                .inc("totalSpent", encode(&-order.total)?)
                .inc("cancelledOrders", 1),
        )
        .await?
        .ok_or_else(|| not_found("user", order.user_id))?;

    Ok(CancellationReceipt {
        order_id,
        refunded: order.total,
        units_restocked: units,
    })
}

async fn revise_prices<E: StoreExecutor>(
    session: &mut E,
    updates: &[(DocumentId, Money, Option<String>)],
) -> Result<Vec<PriceDelta>, WorkflowError> {
    let now = Utc::now();
    let mut deltas = Vec::with_capacity(updates.len());
    for (product_id, new_price, reason) in updates {
        let mut products = Repo::<Product, E>::new(&mut *session);
        let product = products
            .find_by_id(*product_id)
            .await?
            .ok_or_else(|| not_found("product", *product_id))?;
        let old_price = product.price;
        let change = *new_price - old_price;
        let percent_change = if old_price.is_zero() {
            None
        } else {
            Some(change.amount() / old_price.amount() * Decimal::ONE_HUNDRED)
        };
        let record = PriceChange {
            old_price,
            new_price: *new_price,
            change,
            percent_change,
            reason: reason.clone(),
            timestamp: now,
        };
        products
            .update_by_id(
                *product_id,
                Update::new()
                    .set("price", encode(new_price)?)
                    .push("priceHistory", encode(&record)?),
            )
            .await?
            .ok_or_else(|| not_found("product", *product_id))?;
        deltas.push(PriceDelta {
            product_id: *product_id,
            old_price,
            new_price: *new_price,
            change,
            percent_change,
        });
    }
    Ok(deltas)
}

async fn provision<E: StoreExecutor>(
    session: &mut E,
    name: &str,
    email: Email,
    balance: Money,
    options: &SetupOptions,
) -> Result<ProvisionedUser, WorkflowError> {
    let now = Utc::now();
    let mut user = User::new(name, email, balance);
    if balance.is_positive() {
        user.transactions
            .push(LedgerEntry::initial_balance(balance, now));
    }
    let user = Repo::<User, E>::new(&mut *session).create(user).await?;

    let profile = match &options.profile {
        Some(seed) => Some(
            Repo::<Profile, E>::new(&mut *session)
                .create(Profile {
                    meta: DocumentMeta::unsaved(),
                    user_id: user.id(),
                    bio: seed.bio.clone(),
                    avatar_url: seed.avatar_url.clone(),
                })
                .await?,
        ),
        None => None,
    };

    Ok(ProvisionedUser { user, profile })
}

fn not_found(kind: &'static str, id: DocumentId) -> WorkflowError {
    WorkflowError::NotFound {
        kind,
        id: id.to_string(),
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Value, WorkflowError> {
    serde_json::to_value(value).map_err(|e| {
        WorkflowError::Store(StoreError::Corruption(format!(
            "failed to encode update payload: {e}"
        )))
    })
}
