//! In-memory storage adapter for tests and demos.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CredentialId, OrderId, OrderItemId, UserId};
use domain::{
    CredentialLink, CredentialRecord, Order, OrderItem, OrderStatus, Points, ProductId,
    ProductSummary,
};

use crate::error::StoreError;
use crate::ports::{BalanceLedger, CredentialStore, OrderLedger, ProductCatalog};
use crate::Result;

/// Per-operation failure switches for exercising rollback paths.
#[derive(Debug, Default)]
struct FailureFlags {
    insert_order: bool,
    insert_items: bool,
    claim: bool,
    release: bool,
    link: bool,
    processing: bool,
    debit: bool,
    complete: bool,
    cancel: bool,
    count: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    products: HashMap<ProductId, String>,
    credentials: HashMap<CredentialId, CredentialRecord>,
    orders: HashMap<OrderId, Order>,
    items: HashMap<OrderItemId, OrderItem>,
    balances: HashMap<UserId, Points>,
    fail: FailureFlags,
}

/// In-memory implementation of all storage ports.
///
/// Each trait method takes the state lock once, so a batch claim or
/// release is atomic with respect to concurrent callers, matching the
/// row-level atomicity the PostgreSQL adapter gets from conditional
/// updates.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the store to fail order inserts.
    pub fn set_fail_on_insert_order(&self, fail: bool) {
        self.state.write().unwrap().fail.insert_order = fail;
    }

    /// Configures the store to fail order-item inserts.
    pub fn set_fail_on_insert_items(&self, fail: bool) {
        self.state.write().unwrap().fail.insert_items = fail;
    }

    /// Configures the store to fail credential claims.
    pub fn set_fail_on_claim(&self, fail: bool) {
        self.state.write().unwrap().fail.claim = fail;
    }

    /// Configures the store to fail credential releases.
    pub fn set_fail_on_release(&self, fail: bool) {
        self.state.write().unwrap().fail.release = fail;
    }

    /// Configures the store to fail credential linking.
    pub fn set_fail_on_link(&self, fail: bool) {
        self.state.write().unwrap().fail.link = fail;
    }

    /// Configures the store to fail processing transitions.
    pub fn set_fail_on_mark_processing(&self, fail: bool) {
        self.state.write().unwrap().fail.processing = fail;
    }

    /// Configures the store to fail balance debits.
    pub fn set_fail_on_debit(&self, fail: bool) {
        self.state.write().unwrap().fail.debit = fail;
    }

    /// Configures the store to fail order completion writes.
    pub fn set_fail_on_complete(&self, fail: bool) {
        self.state.write().unwrap().fail.complete = fail;
    }

    /// Configures the store to fail order cancellation writes.
    pub fn set_fail_on_cancel(&self, fail: bool) {
        self.state.write().unwrap().fail.cancel = fail;
    }

    /// Configures the store to fail unsold-count reads.
    pub fn set_fail_on_count(&self, fail: bool) {
        self.state.write().unwrap().fail.count = fail;
    }

    /// Returns the number of sold credentials across all products.
    pub fn sold_count(&self) -> usize {
        self.state
            .read()
            .unwrap()
            .credentials
            .values()
            .filter(|c| c.is_sold)
            .count()
    }

    /// Returns the number of orders in the ledger.
    pub fn order_count(&self) -> usize {
        self.state.read().unwrap().orders.len()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn insert_credential(&self, credential: CredentialRecord) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.credentials.insert(credential.id, credential);
        Ok(())
    }

    async fn get_credential(&self, id: CredentialId) -> Result<Option<CredentialRecord>> {
        let state = self.state.read().unwrap();
        Ok(state.credentials.get(&id).cloned())
    }

    async fn count_unsold(&self, product_id: &ProductId) -> Result<u32> {
        let state = self.state.read().unwrap();
        if state.fail.count {
            return Err(StoreError::backend("injected count failure"));
        }
        let count = state
            .credentials
            .values()
            .filter(|c| &c.product_id == product_id && !c.is_sold)
            .count();
        Ok(count as u32)
    }

    async fn unsold_oldest_first(
        &self,
        product_id: &ProductId,
        limit: u32,
    ) -> Result<Vec<CredentialRecord>> {
        let state = self.state.read().unwrap();
        let mut unsold: Vec<_> = state
            .credentials
            .values()
            .filter(|c| &c.product_id == product_id && !c.is_sold)
            .cloned()
            .collect();
        // ID as tiebreak keeps the order stable when timestamps collide.
        unsold.sort_by_key(|c| (c.created_at, c.id.as_uuid()));
        unsold.truncate(limit as usize);
        Ok(unsold)
    }

    async fn claim(
        &self,
        ids: &[CredentialId],
        order_id: OrderId,
        sold_at: DateTime<Utc>,
    ) -> Result<usize> {
        let mut state = self.state.write().unwrap();
        if state.fail.claim {
            return Err(StoreError::backend("injected claim failure"));
        }
        let mut claimed = 0;
        for id in ids {
            if let Some(cred) = state.credentials.get_mut(id)
                && !cred.is_sold
            {
                cred.is_sold = true;
                cred.order_id = Some(order_id);
                cred.sold_at = Some(sold_at);
                claimed += 1;
            }
        }
        Ok(claimed)
    }

    async fn release(&self, ids: &[CredentialId], order_id: OrderId) -> Result<usize> {
        let mut state = self.state.write().unwrap();
        if state.fail.release {
            return Err(StoreError::backend("injected release failure"));
        }
        let mut released = 0;
        for id in ids {
            if let Some(cred) = state.credentials.get_mut(id)
                && cred.order_id == Some(order_id)
            {
                cred.is_sold = false;
                cred.order_id = None;
                cred.sold_at = None;
                released += 1;
            }
        }
        Ok(released)
    }
}

#[async_trait]
impl OrderLedger for MemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if state.fail.insert_order {
            return Err(StoreError::backend("injected insert_order failure"));
        }
        if state.orders.contains_key(&order.id) {
            return Err(StoreError::backend(format!("duplicate order {}", order.id)));
        }
        state.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn insert_items(&self, items: &[OrderItem]) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if state.fail.insert_items {
            return Err(StoreError::backend("injected insert_items failure"));
        }
        for item in items {
            state.items.insert(item.id, item.clone());
        }
        Ok(())
    }

    async fn delete_order(&self, order_id: OrderId) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.orders.remove(&order_id);
        state.items.retain(|_, item| item.order_id != order_id);
        Ok(())
    }

    async fn link_credentials(&self, links: &[CredentialLink]) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if state.fail.link {
            return Err(StoreError::backend("injected link failure"));
        }
        for link in links {
            let item = state
                .items
                .get_mut(&link.order_item_id)
                .ok_or_else(|| StoreError::not_found("order item", link.order_item_id))?;
            if !item.credential_ids.contains(&link.credential_id) {
                item.credential_ids.push(link.credential_id);
            }
        }
        Ok(())
    }

    async fn mark_processing(&self, order_id: OrderId) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if state.fail.processing {
            return Err(StoreError::backend("injected mark_processing failure"));
        }
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| StoreError::not_found("order", order_id))?;
        if order.status == OrderStatus::Pending {
            order.status = OrderStatus::Processing;
        }
        Ok(())
    }

    async fn mark_completed(&self, order_id: OrderId, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if state.fail.complete {
            return Err(StoreError::backend("injected complete failure"));
        }
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| StoreError::not_found("order", order_id))?;
        if order.status.can_complete() {
            order.status = OrderStatus::Completed;
            order.completed_at = Some(at);
        }
        Ok(())
    }

    async fn cancel_order(
        &self,
        order_id: OrderId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if state.fail.cancel {
            return Err(StoreError::backend("injected cancel failure"));
        }
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| StoreError::not_found("order", order_id))?;
        if order.status.can_cancel() {
            order.status = OrderStatus::Cancelled;
            order.cancelled_at = Some(at);
            order.cancelled_reason = Some(reason.to_string());
        }
        Ok(())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let state = self.state.read().unwrap();
        Ok(state.orders.get(&order_id).cloned())
    }

    async fn get_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>> {
        let state = self.state.read().unwrap();
        let mut items: Vec<_> = state
            .items
            .values()
            .filter(|item| item.order_id == order_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.product_id.cmp(&b.product_id));
        Ok(items)
    }
}

#[async_trait]
impl BalanceLedger for MemoryStore {
    async fn balance(&self, user_id: UserId) -> Result<Points> {
        let state = self.state.read().unwrap();
        Ok(state.balances.get(&user_id).copied().unwrap_or_default())
    }

    async fn credit(&self, user_id: UserId, amount: Points) -> Result<()> {
        let mut state = self.state.write().unwrap();
        *state.balances.entry(user_id).or_default() += amount;
        Ok(())
    }

    async fn try_debit(&self, user_id: UserId, amount: Points) -> Result<bool> {
        let mut state = self.state.write().unwrap();
        if state.fail.debit {
            return Err(StoreError::backend("injected debit failure"));
        }
        let balance = state.balances.entry(user_id).or_default();
        if *balance >= amount {
            *balance -= amount;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[async_trait]
impl ProductCatalog for MemoryStore {
    async fn upsert_product(&self, product_id: &ProductId, name: &str) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.products.insert(product_id.clone(), name.to_string());
        Ok(())
    }

    async fn get_product(&self, product_id: &ProductId) -> Result<Option<ProductSummary>> {
        let state = self.state.read().unwrap();
        let Some(name) = state.products.get(product_id) else {
            return Ok(None);
        };

        // A product with no credential rows at all has no pool and is
        // reported as unconstrained rather than sold out.
        let mut has_pool = false;
        let mut unsold = 0u32;
        for cred in state.credentials.values() {
            if &cred.product_id == product_id {
                has_pool = true;
                if !cred.is_sold {
                    unsold += 1;
                }
            }
        }

        Ok(Some(ProductSummary {
            id: product_id.clone(),
            name: name.clone(),
            stock: has_pool.then_some(unsold),
        }))
    }
}
