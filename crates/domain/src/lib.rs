//! Domain layer for the storefront backend.
//!
//! This crate provides the catalog and order model:
//! - Product records and the sample catalog
//! - Validated checkout input (`PlaceOrder` -> `ValidatedCart`)
//! - The `Order` record with its status/payment state machine
//! - Payment events reported by the gateway

pub mod order;
pub mod product;

pub use order::{
    CartLine, CartLineInput, Order, OrderError, OrderLine, OrderStatus, PaymentEvent,
    PaymentMethod, PaymentOutcome, PaymentStatus, PaymentTransition, PlaceOrder, ShippingAddress,
    ValidatedCart,
};
pub use order::{Money, ProductId};
pub use product::{Product, sample_catalog};
