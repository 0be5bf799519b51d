//! Snapshot stock validation against the credential pools.

use domain::{CartItem, ProductId};
use serde::Serialize;
use store::{CredentialStore, ProductCatalog};

/// One problem found while validating a cart against stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StockIssue {
    /// Requested more units than the unsold pool holds.
    Shortfall {
        product_id: ProductId,
        product_name: String,
        requested: u32,
        available: u32,
    },

    /// The referenced product no longer exists in the catalog.
    UnknownProduct { product_id: ProductId, requested: u32 },

    /// A storage read failed; availability could not be determined.
    System { message: String },
}

impl StockIssue {
    /// Units still available for the product this issue concerns.
    pub fn available(&self) -> u32 {
        match self {
            StockIssue::Shortfall { available, .. } => *available,
            StockIssue::UnknownProduct { .. } | StockIssue::System { .. } => 0,
        }
    }
}

impl std::fmt::Display for StockIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StockIssue::Shortfall {
                product_name,
                requested,
                available,
                ..
            } => write!(
                f,
                "'{product_name}': requested {requested}, only {available} available"
            ),
            StockIssue::UnknownProduct { product_id, .. } => {
                write!(f, "product '{product_id}' is no longer available")
            }
            StockIssue::System { message } => {
                write!(f, "stock check failed: {message}")
            }
        }
    }
}

/// Result of validating a cart against current stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockReport {
    /// True iff no issues were found.
    pub is_valid: bool,

    /// The problems found, empty when valid.
    pub issues: Vec<StockIssue>,
}

impl StockReport {
    fn from_issues(issues: Vec<StockIssue>) -> Self {
        Self {
            is_valid: issues.is_empty(),
            issues,
        }
    }
}

/// Read-only validator over the credential pools.
///
/// The validation is a snapshot: a positive report can still race with a
/// concurrent purchase, which the engine detects later at claim time.
pub struct StockValidator<S> {
    store: S,
}

impl<S: CredentialStore + ProductCatalog> StockValidator<S> {
    /// Creates a validator over the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Validates the cart's requested quantities against unsold stock.
    ///
    /// Quantities are aggregated per product across duplicate lines.
    /// Never fails: a storage error yields an invalid report with a
    /// single system issue.
    #[tracing::instrument(skip_all, fields(lines = items.len()))]
    pub async fn validate(&self, items: &[CartItem]) -> StockReport {
        let mut requests: Vec<(ProductId, u32)> = Vec::new();
        for item in items {
            match requests.iter_mut().find(|(id, _)| id == &item.product_id) {
                Some((_, qty)) => *qty += item.quantity,
                None => requests.push((item.product_id.clone(), item.quantity)),
            }
        }

        let mut issues = Vec::new();
        for (product_id, requested) in requests {
            let product = match self.store.get_product(&product_id).await {
                Ok(product) => product,
                Err(e) => {
                    tracing::warn!(%product_id, error = %e, "stock validation read failed");
                    return StockReport::from_issues(vec![StockIssue::System {
                        message: e.to_string(),
                    }]);
                }
            };

            let Some(product) = product else {
                issues.push(StockIssue::UnknownProduct {
                    product_id,
                    requested,
                });
                continue;
            };

            let available = match self.store.count_unsold(&product_id).await {
                Ok(count) => count,
                Err(e) => {
                    tracing::warn!(%product_id, error = %e, "stock validation read failed");
                    return StockReport::from_issues(vec![StockIssue::System {
                        message: e.to_string(),
                    }]);
                }
            };

            if available < requested {
                issues.push(StockIssue::Shortfall {
                    product_id,
                    product_name: product.name,
                    requested,
                    available,
                });
            }
        }

        StockReport::from_issues(issues)
    }
}
