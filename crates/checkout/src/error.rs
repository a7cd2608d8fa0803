//! Checkout error types.

use common::OrderId;
use domain::{OrderError, PaymentStatus, ProductId};
use store::StoreError;
use thiserror::Error;

/// A cart line the catalog cannot cover.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StockError {
    #[error("Product not found: {product_id}")]
    ProductNotFound { product_id: ProductId },

    #[error(
        "Insufficient stock for product {product_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },
}

impl StockError {
    pub fn product_id(&self) -> &ProductId {
        match self {
            StockError::ProductNotFound { product_id }
            | StockError::InsufficientStock { product_id, .. } => product_id,
        }
    }
}

/// Errors reported by the payment gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("Payment intent not found: {0}")]
    IntentNotFound(String),

    #[error("Payment gateway rejected the request: {0}")]
    Rejected(String),

    #[error("Payment gateway unavailable: {0}")]
    Unavailable(String),
}

/// Errors that can occur during checkout and the order lifecycle.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Request validation or an order lifecycle rule failed.
    #[error(transparent)]
    Order(#[from] OrderError),

    /// A cart line could not be reserved.
    #[error(transparent)]
    Stock(#[from] StockError),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The order changed concurrently and retries ran out.
    #[error("Order {0} was modified concurrently, please retry")]
    Conflict(OrderId),

    /// Payment is no longer accepted for this order.
    #[error("Order {order_id} does not accept payment (payment status {payment_status})")]
    PaymentNotAccepted {
        order_id: OrderId,
        payment_status: PaymentStatus,
    },

    #[error("Order total must be positive to start a payment")]
    InvalidPaymentAmount,

    /// The gateway reports the intent as not (yet) paid.
    #[error("Payment not completed (status {status})")]
    PaymentNotCompleted { status: String },

    /// The intent belongs to another order.
    #[error("Payment intent {intent_id} does not belong to order {order_id}")]
    PaymentMismatch { intent_id: String, order_id: OrderId },

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The store failed while a unit of work was open. Nothing was kept.
    #[error("Persistence failure: {0}")]
    PersistenceFailure(#[source] StoreError),

    /// The store kept failing transiently. Nothing was kept; retrying is safe.
    #[error("Store temporarily unavailable: {0}")]
    TransientStore(#[source] StoreError),

    /// The background task running a unit of work died.
    #[error("Checkout task failed: {0}")]
    Internal(String),
}

impl CheckoutError {
    /// Returns true if running the whole operation again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CheckoutError::TransientStore(_) | CheckoutError::Conflict(_)
        )
    }

    /// Returns true if the caller can fix the request.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            CheckoutError::PersistenceFailure(_)
                | CheckoutError::TransientStore(_)
                | CheckoutError::Internal(_)
                | CheckoutError::Gateway(GatewayError::Unavailable(_))
        )
    }

    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            CheckoutError::Order(OrderError::EmptyCart) => "empty_cart",
            CheckoutError::Order(OrderError::TotalMismatch { .. }) => "total_mismatch",
            CheckoutError::Order(_) => "invalid_request",
            CheckoutError::Stock(StockError::ProductNotFound { .. }) => "product_not_found",
            CheckoutError::Stock(StockError::InsufficientStock { .. }) => "insufficient_stock",
            CheckoutError::OrderNotFound(_) => "order_not_found",
            CheckoutError::Conflict(_) => "conflict",
            CheckoutError::PaymentNotAccepted { .. }
            | CheckoutError::InvalidPaymentAmount
            | CheckoutError::PaymentNotCompleted { .. }
            | CheckoutError::PaymentMismatch { .. } => "payment_rejected",
            CheckoutError::Gateway(_) => "gateway",
            CheckoutError::PersistenceFailure(_) => "persistence_failure",
            CheckoutError::TransientStore(_) => "transient_store",
            CheckoutError::Internal(_) => "internal",
        }
    }
}

impl From<StoreError> for CheckoutError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConcurrencyConflict { order_id, .. } => CheckoutError::Conflict(order_id),
            StoreError::OrderNotFound(order_id) => CheckoutError::OrderNotFound(order_id),
            StoreError::ProductNotFound(product_id) => {
                CheckoutError::Stock(StockError::ProductNotFound { product_id })
            }
            err if err.is_transient() => CheckoutError::TransientStore(err),
            err => CheckoutError::PersistenceFailure(err),
        }
    }
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;
