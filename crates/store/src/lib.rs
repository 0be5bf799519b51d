//! Persistence layer for the storefront fulfillment system.
//!
//! The fulfillment engine talks to storage through four ports:
//! - [`CredentialStore`] — the per-product credential pools
//! - [`OrderLedger`] — order and order-item record keeping
//! - [`BalanceLedger`] — per-user points balances
//! - [`ProductCatalog`] — product existence and stock summaries
//!
//! Two adapters are provided: [`MemoryStore`] for tests and demos, and
//! [`PostgresStore`] backed by `sqlx`. Both express credential claiming
//! and balance debiting as conditional updates so that concurrent
//! checkouts surface as detectable partial failures instead of
//! double-sales.

pub mod config;
pub mod error;
pub mod memory;
pub mod ports;
pub mod postgres;

pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use ports::{BalanceLedger, CredentialStore, OrderLedger, ProductCatalog};
pub use postgres::PostgresStore;
