//! Order and order item records.

use chrono::{DateTime, Utc};
use common::{CredentialId, OrderId, OrderItemId, UserId};
use serde::{Deserialize, Serialize};

use crate::{CartItem, OrderStatus, Points, ProductId};

/// How an order was paid for.
///
/// The storefront only accepts the internal points balance; the variant
/// exists so persisted orders state their tender explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Debited from the user's points balance.
    #[default]
    Balance,
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentMethod::Balance => write!(f, "balance"),
        }
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "balance" => Ok(PaymentMethod::Balance),
            other => Err(format!("unknown payment method: {other}")),
        }
    }
}

/// One checkout transaction.
///
/// Created in `Pending` status before any credential is touched; moves to
/// `Completed` only once every item has its credentials assigned and the
/// balance debit succeeded, or to `Cancelled` with full compensation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Unique order identifier.
    pub id: OrderId,

    /// The buyer.
    pub user_id: UserId,

    /// Buyer email snapshot for receipts.
    pub user_email: String,

    /// Sum of line prices × quantities at creation time.
    pub total: Points,

    /// Current lifecycle status.
    pub status: OrderStatus,

    /// Tender used for this order.
    pub payment_method: PaymentMethod,

    /// When the order was created.
    pub created_at: DateTime<Utc>,

    /// When the order completed, if it did.
    pub completed_at: Option<DateTime<Utc>>,

    /// When the order was cancelled, if it was.
    pub cancelled_at: Option<DateTime<Utc>>,

    /// Why the order was cancelled, if it was.
    pub cancelled_reason: Option<String>,
}

impl Order {
    /// Creates a new pending order for a cart.
    ///
    /// The total is computed from the cart lines here and never
    /// recomputed afterwards.
    pub fn pending(user_id: UserId, user_email: impl Into<String>, items: &[CartItem]) -> Self {
        Self {
            id: OrderId::new(),
            user_id,
            user_email: user_email.into(),
            total: items.iter().map(CartItem::line_total).sum(),
            status: OrderStatus::Pending,
            payment_method: PaymentMethod::Balance,
            created_at: Utc::now(),
            completed_at: None,
            cancelled_at: None,
            cancelled_reason: None,
        }
    }
}

/// One line within an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    /// Unique line identifier.
    pub id: OrderItemId,

    /// The order this line belongs to.
    pub order_id: OrderId,

    /// The product purchased.
    pub product_id: ProductId,

    /// Product name snapshot at purchase time.
    pub name: String,

    /// Unit price snapshot at purchase time.
    pub price: Points,

    /// Quantity purchased.
    pub quantity: u32,

    /// Credentials assigned to this line. Equals `quantity` entries once
    /// the order reaches `Completed`.
    pub credential_ids: Vec<CredentialId>,
}

impl OrderItem {
    /// Creates an order line from a cart line.
    pub fn from_cart_line(order_id: OrderId, line: &CartItem) -> Self {
        Self {
            id: OrderItemId::new(),
            order_id,
            product_id: line.product_id.clone(),
            name: line.name.clone(),
            price: line.unit_price,
            quantity: line.quantity,
            credential_ids: Vec::new(),
        }
    }

    /// Returns the total price for this line.
    pub fn line_total(&self) -> Points {
        self.price.multiply(self.quantity)
    }

    /// Returns true if every unit has an assigned credential.
    pub fn is_fully_assigned(&self) -> bool {
        self.credential_ids.len() == self.quantity as usize
    }
}

/// Link between an order line and a credential it consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialLink {
    /// The order line.
    pub order_item_id: OrderItemId,

    /// The credential assigned to it.
    pub credential_id: CredentialId,
}
