//! Domain layer for the storefront fulfillment system.
//!
//! This crate provides the records and value objects the fulfillment
//! engine operates on:
//! - `CredentialRecord` — one sellable login in a product's pool
//! - `Order` / `OrderItem` with the `OrderStatus` state machine
//! - `CartItem` and `ProductSummary` at the checkout boundary
//! - `Points` — the internal currency debited at checkout

mod cart;
mod credential;
mod order;
mod points;
mod product;
mod status;

pub use cart::CartItem;
pub use credential::CredentialRecord;
pub use order::{CredentialLink, Order, OrderItem, PaymentMethod};
pub use points::Points;
pub use product::{ProductId, ProductSummary};
pub use status::OrderStatus;
