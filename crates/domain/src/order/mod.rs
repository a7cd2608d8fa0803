//! Order record, checkout input and related types.

mod events;
mod record;
mod request;
mod state;
mod value_objects;

pub use events::{PaymentEvent, PaymentOutcome, PaymentTransition};
pub use record::Order;
pub use request::{CartLine, CartLineInput, MAX_NOTES_LEN, PlaceOrder, ValidatedCart};
pub use state::{OrderStatus, PaymentStatus};
pub use value_objects::{Money, OrderLine, PaymentMethod, ProductId, ShippingAddress};

use thiserror::Error;

/// Errors raised by order validation and lifecycle transitions.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The cart has no items.
    #[error("No order items")]
    EmptyCart,

    #[error("Every order item needs a product id")]
    MissingProductId,

    #[error("Invalid quantity {quantity} for product {product_id} (must be a positive integer)")]
    InvalidQuantity {
        product_id: ProductId,
        quantity: i64,
    },

    #[error("Invalid price {price_cents} for product {product_id}")]
    InvalidPrice {
        product_id: ProductId,
        price_cents: i64,
    },

    #[error("Invalid total amount: {cents}")]
    InvalidTotal { cents: i64 },

    /// The submitted total disagrees with the submitted line prices.
    #[error("Total amount mismatch: submitted {submitted}, computed {computed}")]
    TotalMismatch { submitted: Money, computed: Money },

    #[error("Order amount is too large")]
    AmountOverflow,

    #[error("A payment method is required")]
    MissingPaymentMethod,

    #[error("Notes must be at most {max} characters")]
    NotesTooLong { max: usize },

    /// Order is not in a state that allows the action.
    #[error("Invalid state transition: cannot {action} from {current_state} state")]
    InvalidStateTransition {
        current_state: OrderStatus,
        action: &'static str,
    },

    #[error("Order cannot move from {from} to {to}")]
    InvalidFulfilmentStep { from: OrderStatus, to: OrderStatus },

    #[error("Order is already paid (transaction {transaction_id})")]
    PaymentAlreadyCompleted { transaction_id: String },

    #[error("Unknown status: {0}")]
    UnknownStatus(String),
}
