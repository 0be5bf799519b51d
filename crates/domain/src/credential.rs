//! Credential records, the sellable inventory unit.

use chrono::{DateTime, Utc};
use common::{CredentialId, OrderId};
use serde::{Deserialize, Serialize};

use crate::ProductId;

/// One login (email + password) in a product's inventory pool.
///
/// A credential is sellable exactly once: `is_sold` transitions
/// false → true when an order claims it, and only an explicit release
/// (rollback of a failed transaction) moves it back.
///
/// Invariant: `is_sold` is true iff `order_id` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Unique record identifier.
    pub id: CredentialId,

    /// The product this credential fulfills.
    pub product_id: ProductId,

    /// Login email delivered to the buyer.
    pub email: String,

    /// Login password delivered to the buyer.
    pub password: String,

    /// Whether this credential has been sold.
    pub is_sold: bool,

    /// The order that consumed this credential, if sold.
    pub order_id: Option<OrderId>,

    /// When the record was added to the pool. Drives FIFO claiming.
    pub created_at: DateTime<Utc>,

    /// When the record was sold, if sold.
    pub sold_at: Option<DateTime<Utc>>,
}

impl CredentialRecord {
    /// Creates a fresh unsold credential for a product's pool.
    pub fn new(
        product_id: impl Into<ProductId>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            id: CredentialId::new(),
            product_id: product_id.into(),
            email: email.into(),
            password: password.into(),
            is_sold: false,
            order_id: None,
            created_at: Utc::now(),
            sold_at: None,
        }
    }

    /// Returns true if the credential is still available for sale.
    pub fn is_available(&self) -> bool {
        !self.is_sold
    }

    /// Returns true if the sold flag and order back-reference agree.
    pub fn is_consistent(&self) -> bool {
        self.is_sold == self.order_id.is_some()
    }
}
