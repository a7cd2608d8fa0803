//! Shared identifier types for the storefront backend.

pub mod types;

pub use types::{IdParseError, OrderId, UserId};
