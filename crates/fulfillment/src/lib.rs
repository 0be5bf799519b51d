//! Order fulfillment engine for the storefront.
//!
//! This crate turns a validated cart into a completed order:
//! 1. Validate stock and balance preconditions
//! 2. Create the pending order and its line items
//! 3. Move the order to processing and claim credentials FIFO with a
//!    conditional update per product
//! 4. Link claimed credentials to their order items
//! 5. Debit the buyer's balance with a conditional decrement
//! 6. Mark the order completed
//!
//! Any failure after order creation triggers compensating rollback:
//! release the claimed credentials and cancel the order. The debit only
//! happens after credentials are durably claimed and linked, so a failed
//! completion write never strands a buyer's points without goods.

pub mod engine;
pub mod error;
pub mod precheck;
pub mod validator;

pub use engine::{FulfillmentEngine, ProcessedItem, TransactionReceipt, TransactionRequest};
pub use error::FulfillmentError;
pub use precheck::{CartCheck, LineCheck, LineStatus, precheck_cart};
pub use validator::{StockIssue, StockReport, StockValidator};
