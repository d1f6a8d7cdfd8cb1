//! Document shapes for the four business collections.
//!
//! All documents flatten a [`DocumentMeta`] so `id`, `createdAt`, and
//! `updatedAt` sit at the top level of the stored JSON, with the remaining
//! fields in camelCase. Audit lists (`stockHistory`, `priceHistory`,
//! `transactions`) are append-only embedded arrays.

use chrono::{DateTime, Utc};
use driftwood_core::{DocumentId, Email, EntryType, Money, OrderStatus, UserStatus};
use driftwood_store::{Document, DocumentMeta};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A customer account with an embedded transaction ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(flatten)]
    pub meta: DocumentMeta,
    pub name: String,
    pub email: Email,
    pub balance: Money,
    pub status: UserStatus,
    /// Identifiers of orders this user placed, in placement order.
    pub order_history: Vec<DocumentId>,
    /// Append-only balance-change ledger.
    pub transactions: Vec<LedgerEntry>,
    pub total_orders: u64,
    pub total_spent: Money,
    pub cancelled_orders: u64,
}

impl User {
    /// A fresh account with zeroed counters and an empty ledger.
    #[must_use]
    pub fn new(name: &str, email: Email, balance: Money) -> Self {
        Self {
            meta: DocumentMeta::unsaved(),
            name: name.to_owned(),
            email,
            balance,
            status: UserStatus::Active,
            order_history: Vec::new(),
            transactions: Vec::new(),
            total_orders: 0,
            total_spent: Money::ZERO,
            cancelled_orders: 0,
        }
    }
}

impl Document for User {
    const COLLECTION: &'static str = "users";

    fn meta(&self) -> &DocumentMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut DocumentMeta {
        &mut self.meta
    }
}

/// One immutable record of a balance change.
///
/// Transfers produce these in matched pairs: equal magnitude, opposite sign,
/// one shared correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    /// Links the two entries produced by one transfer.
    pub correlation_id: DocumentId,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    /// Signed amount: negative for debits, positive for credits.
    pub amount: Money,
    /// The other account in a transfer; absent for synthetic entries.
    pub counterparty: Option<DocumentId>,
    pub timestamp: DateTime<Utc>,
    pub status: LedgerEntryStatus,
    pub note: Option<String>,
}

impl LedgerEntry {
    /// Funds leaving the account. `amount` is the positive magnitude.
    #[must_use]
    pub fn debit(
        correlation_id: DocumentId,
        amount: Money,
        counterparty: DocumentId,
        timestamp: DateTime<Utc>,
        note: Option<String>,
    ) -> Self {
        Self {
            correlation_id,
            entry_type: EntryType::Debit,
            amount: -amount,
            counterparty: Some(counterparty),
            timestamp,
            status: LedgerEntryStatus::Completed,
            note,
        }
    }

    /// Funds entering the account. `amount` is the positive magnitude.
    #[must_use]
    pub fn credit(
        correlation_id: DocumentId,
        amount: Money,
        counterparty: DocumentId,
        timestamp: DateTime<Utc>,
        note: Option<String>,
    ) -> Self {
        Self {
            correlation_id,
            entry_type: EntryType::Credit,
            amount,
            counterparty: Some(counterparty),
            timestamp,
            status: LedgerEntryStatus::Completed,
            note,
        }
    }

    /// Synthetic opening credit written during provisioning.
    #[must_use]
    pub fn initial_balance(amount: Money, timestamp: DateTime<Utc>) -> Self {
        Self {
            correlation_id: DocumentId::new(),
            entry_type: EntryType::Credit,
            amount,
            counterparty: None,
            timestamp,
            status: LedgerEntryStatus::Completed,
            note: Some("Initial balance".to_owned()),
        }
    }
}

/// Settlement state of a ledger entry. Every entry the coordinator writes is
/// settled at write time, inside the workflow's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryStatus {
    #[default]
    Completed,
}

/// A sellable item with embedded stock and price audit trails.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(flatten)]
    pub meta: DocumentMeta,
    pub name: String,
    pub category: String,
    pub price: Money,
    pub stock: i64,
    pub stock_history: Vec<StockChange>,
    pub price_history: Vec<PriceChange>,
}

impl Product {
    #[must_use]
    pub fn new(name: &str, category: &str, price: Money, stock: i64) -> Self {
        Self {
            meta: DocumentMeta::unsaved(),
            name: name.to_owned(),
            category: category.to_owned(),
            price,
            stock,
            stock_history: Vec::new(),
            price_history: Vec::new(),
        }
    }
}

impl Document for Product {
    const COLLECTION: &'static str = "products";

    fn meta(&self) -> &DocumentMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut DocumentMeta {
        &mut self.meta
    }
}

/// One stock movement, tagged with the workflow that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockChange {
    pub reason: StockChangeReason,
    pub order_id: DocumentId,
    /// Signed delta applied to `stock`.
    pub quantity: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockChangeReason {
    OrderPlaced,
    OrderCancelled,
}

/// One price revision with before/after values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceChange {
    pub old_price: Money,
    pub new_price: Money,
    /// Absolute change, `new - old`.
    pub change: Money,
    /// Percentage change relative to the old price; `None` when the old
    /// price was zero and the ratio is undefined.
    pub percent_change: Option<Decimal>,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A placed order. The item list and total are immutable after creation;
/// only status and cancellation metadata change afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(flatten)]
    pub meta: DocumentMeta,
    pub user_id: DocumentId,
    pub items: Vec<OrderItem>,
    /// Sum of the items' line totals.
    pub total: Money,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation: Option<Cancellation>,
}

impl Document for Order {
    const COLLECTION: &'static str = "orders";

    fn meta(&self) -> &DocumentMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut DocumentMeta {
        &mut self.meta
    }
}

/// One order line with the price resolved at placement time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: DocumentId,
    pub quantity: u32,
    /// Unit price at the time the order was placed.
    pub price: Money,
    pub line_total: Money,
}

/// Why and when an order was cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cancellation {
    pub cancelled_at: DateTime<Utc>,
    pub reason: String,
}

/// Optional per-user profile, linked 1:1 by `userId` and created only during
/// provisioning when requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(flatten)]
    pub meta: DocumentMeta,
    pub user_id: DocumentId,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
}

impl Document for Profile {
    const COLLECTION: &'static str = "profiles";

    fn meta(&self) -> &DocumentMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut DocumentMeta {
        &mut self.meta
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_pair_sums_to_zero() {
        let correlation = DocumentId::new();
        let now = Utc::now();
        let amount = Money::from_units(75);
        let debit = LedgerEntry::debit(correlation, amount, DocumentId::new(), now, None);
        let credit = LedgerEntry::credit(correlation, amount, DocumentId::new(), now, None);
        assert_eq!(debit.amount + credit.amount, Money::ZERO);
        assert_eq!(debit.correlation_id, credit.correlation_id);
        assert_eq!(debit.entry_type, EntryType::Debit);
        assert_eq!(credit.entry_type, EntryType::Credit);
    }

    #[test]
    fn test_user_serializes_camel_case() {
        let user = User::new("Ada", Email::parse("ada@example.com").unwrap(), Money::ZERO);
        let value = serde_json::to_value(&user).unwrap();
        assert!(value.get("id").is_some());
        assert!(value.get("createdAt").is_some());
        assert!(value.get("totalSpent").is_some());
        assert!(value.get("orderHistory").is_some());
        assert_eq!(value["status"], "active");
        assert_eq!(value["balance"], "0");
    }

    #[test]
    fn test_order_round_trips() {
        let order = Order {
            meta: DocumentMeta::unsaved(),
            user_id: DocumentId::new(),
            items: vec![OrderItem {
                product_id: DocumentId::new(),
                quantity: 2,
                price: Money::from_units(10),
                line_total: Money::from_units(20),
            }],
            total: Money::from_units(20),
            status: OrderStatus::Pending,
            cancellation: None,
        };
        let value = serde_json::to_value(&order).unwrap();
        assert_eq!(value["status"], "pending");
        assert!(value.get("cancellation").is_none());
        assert_eq!(value["items"][0]["lineTotal"], "20");
        let back: Order = serde_json::from_value(value).unwrap();
        assert_eq!(back.total, order.total);
    }

    #[test]
    fn test_initial_balance_entry() {
        let entry = LedgerEntry::initial_balance(Money::from_units(100), Utc::now());
        assert_eq!(entry.entry_type, EntryType::Credit);
        assert_eq!(entry.counterparty, None);
        assert_eq!(entry.note.as_deref(), Some("Initial balance"));
    }
}
