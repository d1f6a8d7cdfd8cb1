//! Read-only reporting over the business collections.
//!
//! Everything here runs on auto-commit connections and never writes; reports
//! are derived views with no invariants of their own.

use chrono::NaiveDate;
use driftwood_core::{DocumentId, Money, OrderStatus};
use driftwood_store::{DocumentStore, Filter, FindOptions, Repo, SortOrder};
use rust_decimal::Decimal;

use crate::coordinator::encode;
use crate::documents::{Order, Product, User};
use crate::error::WorkflowError;

const ALL_STATUSES: [OrderStatus; 5] = [
    OrderStatus::Pending,
    OrderStatus::Completed,
    OrderStatus::Shipped,
    OrderStatus::Delivered,
    OrderStatus::Cancelled,
];

/// Read-only reports over users, orders, and products.
#[derive(Debug, Clone)]
pub struct Analytics<S: DocumentStore> {
    store: S,
}

/// Per-status order volume and revenue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderStats {
    pub status: OrderStatus,
    pub orders: u64,
    pub revenue: Money,
    pub average: Money,
}

/// One row of the spend leaderboard.
#[derive(Debug, Clone)]
pub struct TopCustomer {
    pub user_id: DocumentId,
    pub name: String,
    pub total_spent: Money,
    pub total_orders: u64,
}

/// Stock posture across the catalogue.
#[derive(Debug, Clone)]
pub struct InventoryReport {
    pub out_of_stock: Vec<ProductSummary>,
    pub low_stock: Vec<ProductSummary>,
    pub healthy_count: u64,
}

/// Just enough of a product to name it in a report.
#[derive(Debug, Clone)]
pub struct ProductSummary {
    pub product_id: DocumentId,
    pub name: String,
    pub stock: i64,
}

/// Orders and revenue folded by creation day. Cancelled orders are excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailySales {
    pub day: NaiveDate,
    pub orders: u64,
    pub revenue: Money,
}

impl<S: DocumentStore> Analytics<S> {
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Order count, total revenue, and average order value per status.
    /// Statuses with no orders are omitted.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn order_stats(&self) -> Result<Vec<OrderStats>, WorkflowError> {
        let mut conn = self.store.conn().await?;
        let mut stats = Vec::new();
        for status in ALL_STATUSES {
            let filter = Filter::new().eq("status", encode(&status)?);
            let orders = Repo::<Order, _>::new(&mut conn)
                .find(&filter, &FindOptions::new())
                .await?;
            if orders.is_empty() {
                continue;
            }
            let count = u64::try_from(orders.len()).unwrap_or(u64::MAX);
            let revenue: Money = orders.iter().map(|o| o.total).sum();
            let average = Money::new(revenue.amount() / Decimal::from(count));
            stats.push(OrderStats {
                status,
                orders: count,
                revenue,
                average,
            });
        }
        Ok(stats)
    }

    /// The `limit` highest-spending users, descending.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn top_customers(&self, limit: u64) -> Result<Vec<TopCustomer>, WorkflowError> {
        let mut conn = self.store.conn().await?;
        let options = FindOptions::new()
            .sort_by("totalSpent", SortOrder::Desc)
            .limit(limit);
        let users = Repo::<User, _>::new(&mut conn)
            .find(&Filter::new(), &options)
            .await?;
        Ok(users
            .into_iter()
            .map(|u| TopCustomer {
                user_id: u.meta.id,
                name: u.name,
                total_spent: u.total_spent,
                total_orders: u.total_orders,
            })
            .collect())
    }

    /// Classify the catalogue by stock level: out (zero), low (at or below
    /// `low_threshold`), healthy (the rest).
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn inventory_report(
        &self,
        low_threshold: i64,
    ) -> Result<InventoryReport, WorkflowError> {
        let mut conn = self.store.conn().await?;
        let mut products = Repo::<Product, _>::new(&mut conn);

        let out = products
            .find(&Filter::new().lte("stock", 0), &FindOptions::new())
            .await?;
        let low = products
            .find(
                &Filter::new().gt("stock", 0).lte("stock", low_threshold),
                &FindOptions::new(),
            )
            .await?;
        let healthy_count = products
            .count(&Filter::new().gt("stock", low_threshold))
            .await?;

        Ok(InventoryReport {
            out_of_stock: out.into_iter().map(summarize).collect(),
            low_stock: low.into_iter().map(summarize).collect(),
            healthy_count,
        })
    }

    /// Orders and revenue per creation day, ascending, cancelled orders
    /// excluded.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn daily_sales(&self) -> Result<Vec<DailySales>, WorkflowError> {
        let mut conn = self.store.conn().await?;
        let filter = Filter::new().ne("status", encode(&OrderStatus::Cancelled)?);
        let orders = Repo::<Order, _>::new(&mut conn)
            .find(&filter, &FindOptions::new())
            .await?;

        let mut by_day: std::collections::BTreeMap<NaiveDate, (u64, Money)> =
            std::collections::BTreeMap::new();
        for order in &orders {
            let day = order.meta.created_at.date_naive();
            let slot = by_day.entry(day).or_insert((0, Money::ZERO));
            slot.0 += 1;
            slot.1 += order.total;
        }
        Ok(by_day
            .into_iter()
            .map(|(day, (orders, revenue))| DailySales {
                day,
                orders,
                revenue,
            })
            .collect())
    }
}

fn summarize(product: Product) -> ProductSummary {
    ProductSummary {
        product_id: product.meta.id,
        name: product.name,
        stock: product.stock,
    }
}
