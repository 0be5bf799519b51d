//! Cart line items at the checkout boundary.

use serde::{Deserialize, Serialize};

use crate::{Points, ProductId};

/// One line of a shopper's cart as submitted to checkout.
///
/// Name and unit price are snapshots taken at add-to-cart time; the order
/// echoes them so later catalog edits don't rewrite purchase history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    /// The product being purchased.
    pub product_id: ProductId,

    /// Product name snapshot.
    pub name: String,

    /// Unit price snapshot.
    pub unit_price: Points,

    /// Quantity requested.
    pub quantity: u32,
}

impl CartItem {
    /// Creates a new cart line.
    pub fn new(
        product_id: impl Into<ProductId>,
        name: impl Into<String>,
        unit_price: Points,
        quantity: u32,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            name: name.into(),
            unit_price,
            quantity,
        }
    }

    /// Returns the total price for this line (unit price × quantity).
    pub fn line_total(&self) -> Points {
        self.unit_price.multiply(self.quantity)
    }
}
