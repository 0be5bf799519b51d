//! Storage ports consumed by the fulfillment engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CredentialId, OrderId, UserId};
use domain::{CredentialLink, CredentialRecord, Order, OrderItem, Points, ProductId, ProductSummary};

use crate::Result;

/// Port over a product's credential pools.
///
/// Claiming and releasing are conditional updates: `claim` only flips
/// records that are still unsold and reports how many it actually took,
/// and `release` only touches records owned by the given order. That
/// makes a lost race a detectable partial-claim failure and makes
/// rollback idempotent and unable to un-sell another order's records.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Adds a credential to its product's pool.
    async fn insert_credential(&self, credential: CredentialRecord) -> Result<()>;

    /// Fetches a credential by ID.
    async fn get_credential(&self, id: CredentialId) -> Result<Option<CredentialRecord>>;

    /// Counts unsold credentials for a product.
    async fn count_unsold(&self, product_id: &ProductId) -> Result<u32>;

    /// Returns up to `limit` unsold credentials for a product, oldest
    /// first (FIFO: earliest-added inventory is sold first).
    async fn unsold_oldest_first(
        &self,
        product_id: &ProductId,
        limit: u32,
    ) -> Result<Vec<CredentialRecord>>;

    /// Marks the given credentials sold by `order_id`, but only those
    /// still unsold. Returns the number of records actually claimed;
    /// a count lower than `ids.len()` means a concurrent claim won.
    async fn claim(
        &self,
        ids: &[CredentialId],
        order_id: OrderId,
        sold_at: DateTime<Utc>,
    ) -> Result<usize>;

    /// Releases credentials claimed by `order_id` back to the pool.
    /// Records not owned by that order are left untouched. Returns the
    /// number of records released.
    async fn release(&self, ids: &[CredentialId], order_id: OrderId) -> Result<usize>;
}

/// Port over order and order-item records.
///
/// Pure record keeping: the only rule enforced here is that terminal
/// statuses are never overwritten, which makes `mark_completed` and
/// `cancel_order` idempotent.
#[async_trait]
pub trait OrderLedger: Send + Sync {
    /// Inserts a new order.
    async fn insert_order(&self, order: &Order) -> Result<()>;

    /// Inserts the line items of an order.
    async fn insert_items(&self, items: &[OrderItem]) -> Result<()>;

    /// Deletes an order outright. Only used when item insertion fails
    /// immediately after order creation, before any credential is touched.
    async fn delete_order(&self, order_id: OrderId) -> Result<()>;

    /// Records item↔credential assignments.
    async fn link_credentials(&self, links: &[CredentialLink]) -> Result<()>;

    /// Moves a pending order into `Processing`. No-op once the order has
    /// left `Pending`.
    async fn mark_processing(&self, order_id: OrderId) -> Result<()>;

    /// Marks an order completed. No-op if the order is already terminal.
    async fn mark_completed(&self, order_id: OrderId, at: DateTime<Utc>) -> Result<()>;

    /// Marks an order cancelled with a reason. No-op if already terminal.
    async fn cancel_order(&self, order_id: OrderId, reason: &str, at: DateTime<Utc>)
    -> Result<()>;

    /// Fetches an order by ID.
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Fetches the line items of an order.
    async fn get_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>>;
}

/// Port over per-user points balances.
#[async_trait]
pub trait BalanceLedger: Send + Sync {
    /// Returns a user's current balance. Unknown users hold zero.
    async fn balance(&self, user_id: UserId) -> Result<Points>;

    /// Adds points to a user's balance.
    async fn credit(&self, user_id: UserId, amount: Points) -> Result<()>;

    /// Debits `amount` only if the balance covers it, as one conditional
    /// decrement. Returns whether the debit was applied. This is the
    /// enforcement point for sufficiency, not the earlier read.
    async fn try_debit(&self, user_id: UserId, amount: Points) -> Result<bool>;
}

/// Port over the product catalog.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Registers or renames a product.
    async fn upsert_product(&self, product_id: &ProductId, name: &str) -> Result<()>;

    /// Fetches a product summary, with its unsold-credential count if the
    /// product has a pool. Returns `None` for unknown products.
    async fn get_product(&self, product_id: &ProductId) -> Result<Option<ProductSummary>>;
}
