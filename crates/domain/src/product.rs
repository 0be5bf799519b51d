//! Product identity and the catalog summary used by stock checks.

use serde::{Deserialize, Serialize};

/// Product identifier (SKU).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    /// Creates a new product ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the product ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ProductId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProductId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ProductId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Catalog view of a product, as seen by stock checks.
///
/// `stock` carries the product's unsold-credential count. `None` means the
/// product has no credential pool defined at all, which the cart pre-check
/// treats as unconstrained: not every product is inventory-backed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSummary {
    /// The product identifier.
    pub id: ProductId,

    /// Human-readable product name.
    pub name: String,

    /// Unsold credential count, or `None` if the product has no pool.
    pub stock: Option<u32>,
}

impl ProductSummary {
    /// Creates a summary for an inventory-backed product.
    pub fn with_stock(id: impl Into<ProductId>, name: impl Into<String>, stock: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            stock: Some(stock),
        }
    }

    /// Creates a summary for a product without a credential pool.
    pub fn unconstrained(id: impl Into<ProductId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            stock: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_id_string_conversion() {
        let id = ProductId::new("netflix-1m");
        assert_eq!(id.as_str(), "netflix-1m");

        let id2: ProductId = "spotify-1m".into();
        assert_eq!(id2.as_str(), "spotify-1m");
    }

    #[test]
    fn test_summary_constructors() {
        let backed = ProductSummary::with_stock("netflix-1m", "Netflix 1 Month", 5);
        assert_eq!(backed.stock, Some(5));

        let open = ProductSummary::unconstrained("donation", "Donation");
        assert_eq!(open.stock, None);
    }
}
