//! Fulfillment error types.

use common::OrderId;
use domain::Points;
use store::StoreError;
use thiserror::Error;

use crate::validator::StockIssue;

/// Errors surfaced by the fulfillment engine.
///
/// Input errors and precondition failures are raised before any mutation.
/// Mid-transaction failures are raised after best-effort compensation has
/// run; rollback failures themselves are logged, never thrown over the
/// original error.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// The cart has no items.
    #[error("cart is empty")]
    EmptyCart,

    /// The buyer's identity is missing or malformed.
    #[error("user id and email are required")]
    InvalidUser,

    /// The computed order total is not positive.
    #[error("order total must be positive")]
    InvalidTotal,

    /// A cart line requests zero units.
    #[error("cart line '{product_name}' requests zero units")]
    InvalidQuantity { product_name: String },

    /// One or more products lack sufficient unsold credentials.
    #[error("insufficient stock for {} product(s)", issues.len())]
    InsufficientStock { issues: Vec<StockIssue> },

    /// The buyer's balance does not cover the order total.
    #[error("insufficient balance: {deficit} short")]
    InsufficientBalance { deficit: Points },

    /// Inserting the order record failed. Nothing was created.
    #[error("order creation failed")]
    OrderCreationFailed(#[source] StoreError),

    /// Inserting the line items failed. The order was deleted again.
    #[error("order item creation failed")]
    ItemCreationFailed(#[source] StoreError),

    /// Too few credentials could be claimed for a product, either at
    /// selection time or because a concurrent checkout won the claim.
    #[error("could not assign {requested} credential(s) for '{product_name}': only {available} available")]
    AccountAssignmentFailed {
        product_name: String,
        requested: u32,
        available: u32,
    },

    /// The claim update itself failed at the store.
    #[error("marking credentials sold failed")]
    SoldMarkingFailed(#[source] StoreError),

    /// Recording the item↔credential links failed.
    #[error("linking credentials to order items failed")]
    LinkingFailed(#[source] StoreError),

    /// The balance debit failed at the store.
    #[error("balance debit failed")]
    BalanceDebitFailed(#[source] StoreError),

    /// The completion write failed after the debit succeeded. The order
    /// keeps its claimed, linked credentials and needs reconciliation;
    /// it is NOT rolled back.
    #[error("completing order {order_id} failed after debit; needs reconciliation")]
    CompletionFailed {
        order_id: OrderId,
        #[source]
        source: StoreError,
    },

    /// A storage read failed outside a compensable step.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl FulfillmentError {
    /// Returns true if the caller can remedy this error by adjusting the
    /// cart or topping up the balance, as opposed to retrying later.
    pub fn is_user_remediable(&self) -> bool {
        matches!(
            self,
            FulfillmentError::EmptyCart
                | FulfillmentError::InvalidUser
                | FulfillmentError::InvalidTotal
                | FulfillmentError::InvalidQuantity { .. }
                | FulfillmentError::InsufficientStock { .. }
                | FulfillmentError::InsufficientBalance { .. }
        )
    }
}
