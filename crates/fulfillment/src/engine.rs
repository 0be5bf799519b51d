//! The fulfillment engine: turns a cart into a completed order.

use chrono::Utc;
use common::{CredentialId, OrderId, UserId};
use domain::{
    CartItem, CredentialLink, CredentialRecord, Order, OrderItem, OrderStatus, Points,
};
use store::{BalanceLedger, CredentialStore, OrderLedger, ProductCatalog};

use crate::error::FulfillmentError;
use crate::validator::StockValidator;

/// A checkout request: who is buying and what.
#[derive(Debug, Clone)]
pub struct TransactionRequest {
    /// The buyer.
    pub user_id: UserId,

    /// Buyer email for the order record and receipt.
    pub user_email: String,

    /// Cart lines with name/price snapshots.
    pub items: Vec<CartItem>,
}

/// One fulfilled cart line with the credentials assigned to it.
#[derive(Debug, Clone)]
pub struct ProcessedItem {
    /// The order line.
    pub item: OrderItem,

    /// The credentials (email/password) delivered to the buyer.
    pub credentials: Vec<CredentialRecord>,
}

/// The payload handed back to the caller after a successful transaction.
#[derive(Debug, Clone)]
pub struct TransactionReceipt {
    /// The completed order.
    pub order: Order,

    /// Fulfilled lines in cart order.
    pub processed_items: Vec<ProcessedItem>,
}

/// Orchestrates the order-fulfillment transaction.
///
/// The engine drives validation → order creation → credential claiming →
/// linking → balance debit → completion, with compensating rollback
/// (release claimed credentials, cancel the order) on any failure along
/// the way. The debit runs strictly after claiming and linking so a
/// buyer's points are never taken without durably assigned goods.
pub struct FulfillmentEngine<C, O, B>
where
    C: CredentialStore + ProductCatalog,
    O: OrderLedger,
    B: BalanceLedger,
{
    credentials: C,
    orders: O,
    balances: B,
    validator: StockValidator<C>,
}

impl<C, O, B> FulfillmentEngine<C, O, B>
where
    C: CredentialStore + ProductCatalog + Clone,
    O: OrderLedger,
    B: BalanceLedger,
{
    /// Creates a new fulfillment engine over the given storage ports.
    pub fn new(credentials: C, orders: O, balances: B) -> Self {
        let validator = StockValidator::new(credentials.clone());
        Self {
            credentials,
            orders,
            balances,
            validator,
        }
    }

    /// Executes one checkout transaction.
    ///
    /// On success the order is `Completed`, every line has its credentials
    /// assigned, and the balance is debited by exactly the order total.
    /// On failure nothing is left half-done: either no order exists, or it
    /// is `Cancelled` with all claimed credentials released. The single
    /// documented exception is [`FulfillmentError::CompletionFailed`],
    /// where goods and debit are durable and only the final status write
    /// is missing.
    #[tracing::instrument(
        skip(self, request),
        fields(user_id = %request.user_id, lines = request.items.len())
    )]
    pub async fn process_transaction(
        &self,
        request: TransactionRequest,
    ) -> Result<TransactionReceipt, FulfillmentError> {
        metrics::counter!("fulfillment_transactions_total").increment(1);
        let started = std::time::Instant::now();

        // 1. Preconditions. Nothing has been written yet, so failures
        //    here return without any compensation.
        if request.items.is_empty() {
            return Err(self.reject(FulfillmentError::EmptyCart));
        }
        if request.user_email.trim().is_empty() {
            return Err(self.reject(FulfillmentError::InvalidUser));
        }
        if let Some(line) = request.items.iter().find(|line| line.quantity == 0) {
            return Err(self.reject(FulfillmentError::InvalidQuantity {
                product_name: line.name.clone(),
            }));
        }

        let total: Points = request.items.iter().map(CartItem::line_total).sum();
        if !total.is_positive() {
            return Err(self.reject(FulfillmentError::InvalidTotal));
        }

        let report = self.validator.validate(&request.items).await;
        if !report.is_valid {
            return Err(self.reject(FulfillmentError::InsufficientStock {
                issues: report.issues,
            }));
        }

        // Snapshot balance check for an early, user-remediable error.
        // The debit below re-checks atomically; this read can go stale.
        let balance = self.balances.balance(request.user_id).await?;
        if balance < total {
            return Err(self.reject(FulfillmentError::InsufficientBalance {
                deficit: total - balance,
            }));
        }

        // 2. Create the pending order.
        let mut order = Order::pending(request.user_id, &request.user_email, &request.items);
        self.orders
            .insert_order(&order)
            .await
            .map_err(FulfillmentError::OrderCreationFailed)?;
        tracing::info!(order_id = %order.id, %total, "order created");

        // 3. Create the line items. On failure the bare order is deleted
        //    outright; no credential has been touched yet.
        let mut items: Vec<OrderItem> = request
            .items
            .iter()
            .map(|line| OrderItem::from_cart_line(order.id, line))
            .collect();
        if let Err(e) = self.orders.insert_items(&items).await {
            if let Err(del) = self.orders.delete_order(order.id).await {
                tracing::warn!(order_id = %order.id, error = %del, "order cleanup failed");
            }
            return Err(self.fail(FulfillmentError::ItemCreationFailed(e)));
        }

        // 4. Flag the order in-flight, then claim credentials per line,
        //    oldest first. The claim is a conditional update, so a
        //    concurrent checkout that took the same rows shows up as a
        //    short claim count, not a double-sale.
        if let Err(e) = self.orders.mark_processing(order.id).await {
            self.roll_back(order.id, &[], "processing transition failed")
                .await;
            return Err(self.fail(FulfillmentError::Store(e)));
        }
        order.status = OrderStatus::Processing;

        let mut claimed: Vec<CredentialId> = Vec::new();
        let mut assigned: Vec<Vec<CredentialRecord>> = Vec::with_capacity(items.len());
        let sold_at = Utc::now();

        for item in &items {
            let picks = match self
                .credentials
                .unsold_oldest_first(&item.product_id, item.quantity)
                .await
            {
                Ok(picks) => picks,
                Err(e) => {
                    self.roll_back(order.id, &claimed, "credential lookup failed")
                        .await;
                    return Err(self.fail(FulfillmentError::Store(e)));
                }
            };

            if (picks.len() as u32) < item.quantity {
                let available = picks.len() as u32;
                self.roll_back(order.id, &claimed, "insufficient stock")
                    .await;
                return Err(self.fail(FulfillmentError::AccountAssignmentFailed {
                    product_name: item.name.clone(),
                    requested: item.quantity,
                    available,
                }));
            }

            let ids: Vec<CredentialId> = picks.iter().map(|c| c.id).collect();
            let won = match self.credentials.claim(&ids, order.id, sold_at).await {
                Ok(won) => won,
                Err(e) => {
                    // The claim may have partially applied before the
                    // error; rollback releases whatever this order owns.
                    claimed.extend(ids);
                    self.roll_back(order.id, &claimed, "credential claim failed")
                        .await;
                    return Err(self.fail(FulfillmentError::SoldMarkingFailed(e)));
                }
            };

            claimed.extend(ids);
            if won < picks.len() {
                // Lost a race between the select and the claim.
                self.roll_back(order.id, &claimed, "stock claimed concurrently")
                    .await;
                return Err(self.fail(FulfillmentError::AccountAssignmentFailed {
                    product_name: item.name.clone(),
                    requested: item.quantity,
                    available: won as u32,
                }));
            }

            let sold: Vec<CredentialRecord> = picks
                .into_iter()
                .map(|mut c| {
                    c.is_sold = true;
                    c.order_id = Some(order.id);
                    c.sold_at = Some(sold_at);
                    c
                })
                .collect();
            assigned.push(sold);
        }

        // 5. Record the item↔credential links as one batch.
        let links: Vec<CredentialLink> = items
            .iter()
            .zip(&assigned)
            .flat_map(|(item, sold)| {
                sold.iter().map(|c| CredentialLink {
                    order_item_id: item.id,
                    credential_id: c.id,
                })
            })
            .collect();
        if let Err(e) = self.orders.link_credentials(&links).await {
            self.roll_back(order.id, &claimed, "credential linking failed")
                .await;
            return Err(self.fail(FulfillmentError::LinkingFailed(e)));
        }

        // 6. Debit the balance. The conditional decrement is the real
        //    sufficiency check; the earlier read was only advisory.
        match self.balances.try_debit(request.user_id, total).await {
            Ok(true) => {}
            Ok(false) => {
                self.roll_back(order.id, &claimed, "insufficient balance")
                    .await;
                // Re-read for the exact deficit; a failed read surfaces
                // as a store error rather than a made-up amount.
                let balance = match self.balances.balance(request.user_id).await {
                    Ok(balance) => balance,
                    Err(e) => return Err(self.fail(FulfillmentError::Store(e))),
                };
                return Err(self.fail(FulfillmentError::InsufficientBalance {
                    deficit: total.saturating_sub(balance),
                }));
            }
            Err(e) => {
                self.roll_back(order.id, &claimed, "balance debit failed")
                    .await;
                return Err(self.fail(FulfillmentError::BalanceDebitFailed(e)));
            }
        }

        // 7. Complete. Past this point the goods are claimed and linked
        //    and the points are taken; a failed status write must NOT be
        //    rolled back, only surfaced for reconciliation.
        let completed_at = Utc::now();
        if let Err(e) = self.orders.mark_completed(order.id, completed_at).await {
            metrics::counter!("fulfillment_failed").increment(1);
            tracing::error!(
                order_id = %order.id,
                error = %e,
                "completion write failed after debit; order needs reconciliation"
            );
            return Err(FulfillmentError::CompletionFailed {
                order_id: order.id,
                source: e,
            });
        }

        order.status = OrderStatus::Completed;
        order.completed_at = Some(completed_at);

        for (item, sold) in items.iter_mut().zip(&assigned) {
            item.credential_ids = sold.iter().map(|c| c.id).collect();
        }

        let duration = started.elapsed().as_secs_f64();
        metrics::histogram!("fulfillment_duration_seconds").record(duration);
        metrics::counter!("fulfillment_completed").increment(1);
        tracing::info!(order_id = %order.id, %total, duration, "transaction completed");

        let processed_items = items
            .into_iter()
            .zip(assigned)
            .map(|(item, credentials)| ProcessedItem { item, credentials })
            .collect();

        Ok(TransactionReceipt {
            order,
            processed_items,
        })
    }

    /// Compensates a failed attempt: releases this order's claimed
    /// credentials and cancels the order, concurrently. Both are
    /// attempted even if one fails; failures are logged and counted but
    /// never propagated over the error that triggered the rollback.
    async fn roll_back(&self, order_id: OrderId, claimed: &[CredentialId], reason: &str) {
        metrics::counter!("fulfillment_rollbacks").increment(1);
        tracing::warn!(%order_id, reason, credentials = claimed.len(), "rolling back transaction");

        let (released, cancelled) = tokio::join!(
            self.credentials.release(claimed, order_id),
            self.orders.cancel_order(order_id, reason, Utc::now()),
        );

        if let Err(e) = released {
            metrics::counter!("fulfillment_rollback_failures").increment(1);
            tracing::error!(%order_id, error = %e, "credential release failed during rollback");
        }
        if let Err(e) = cancelled {
            metrics::counter!("fulfillment_rollback_failures").increment(1);
            tracing::error!(%order_id, error = %e, "order cancellation failed during rollback");
        }
    }

    fn reject(&self, error: FulfillmentError) -> FulfillmentError {
        metrics::counter!("fulfillment_rejected").increment(1);
        tracing::info!(error = %error, "transaction rejected before any mutation");
        error
    }

    fn fail(&self, error: FulfillmentError) -> FulfillmentError {
        metrics::counter!("fulfillment_failed").increment(1);
        tracing::warn!(error = %error, "transaction failed and was rolled back");
        error
    }
}
