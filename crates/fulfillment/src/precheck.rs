//! Client-facing cart pre-check against embedded product stock counts.
//!
//! A cheaper sibling of [`crate::StockValidator`]: it works off the stock
//! counts already embedded in catalog summaries instead of querying the
//! credential pools, so the UI can enable or disable checkout and show
//! per-line messages without a storage round-trip.

use domain::{CartItem, ProductId, ProductSummary};
use serde::Serialize;

/// Verdict for one cart line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LineStatus {
    /// Enough stock, or the product has no credential pool at all.
    /// Products without a pool are deliberately unconstrained: not every
    /// product is inventory-backed.
    Available,

    /// Some stock, but less than requested.
    OnlyLeft(u32),

    /// The pool exists but is empty.
    SoldOut,

    /// The product is not in the catalog.
    Unavailable,
}

impl LineStatus {
    /// Returns the message to surface on the line, if any.
    pub fn message(&self) -> Option<String> {
        match self {
            LineStatus::Available => None,
            LineStatus::OnlyLeft(n) => Some(format!("only {n} left")),
            LineStatus::SoldOut => Some("sold out".to_string()),
            LineStatus::Unavailable => Some("no longer available".to_string()),
        }
    }
}

/// Pre-check result for one cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineCheck {
    pub product_id: ProductId,
    pub requested: u32,
    pub status: LineStatus,
}

/// Pre-check result for a whole cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartCheck {
    /// True iff every line is available; gates the checkout action.
    pub is_valid: bool,

    /// One check per cart line, in cart order.
    pub lines: Vec<LineCheck>,
}

/// Checks cart lines against catalog stock summaries.
///
/// Quantities are aggregated per product, so two lines of the same
/// product contend for the same embedded count.
pub fn precheck_cart(items: &[CartItem], products: &[ProductSummary]) -> CartCheck {
    let mut lines = Vec::with_capacity(items.len());

    for item in items {
        let requested: u32 = items
            .iter()
            .filter(|other| other.product_id == item.product_id)
            .map(|other| other.quantity)
            .sum();

        let status = match products.iter().find(|p| p.id == item.product_id) {
            None => LineStatus::Unavailable,
            Some(product) => match product.stock {
                None => LineStatus::Available,
                Some(0) => LineStatus::SoldOut,
                Some(stock) if stock < requested => LineStatus::OnlyLeft(stock),
                Some(_) => LineStatus::Available,
            },
        };

        lines.push(LineCheck {
            product_id: item.product_id.clone(),
            requested: item.quantity,
            status,
        });
    }

    CartCheck {
        is_valid: lines.iter().all(|l| l.status == LineStatus::Available),
        lines,
    }
}
