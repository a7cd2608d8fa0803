//! Checkout for the storefront backend.
//!
//! Placing an order runs as one unit of work against the store:
//! 1. Reserve stock for every cart line (conditional decrements)
//! 2. Build the order from the reserved catalog snapshot
//! 3. Insert the order and commit
//!
//! If any step fails, the unit is rolled back and no stock moves. Payment
//! happens afterwards, out of band, through a [`PaymentGateway`].

pub mod coordinator;
pub mod error;
pub mod payment;
pub mod reservation;

pub use coordinator::{
    Access, CheckoutCoordinator, CheckoutMode, RetryPolicy, UnknownCheckoutMode,
};
pub use error::{CheckoutError, GatewayError, Result, StockError};
pub use payment::{
    INTENT_PAYMENT_FAILED, INTENT_SUCCEEDED, InMemoryPaymentGateway, IntentStatus,
    NotificationData, NotificationOutcome, PaymentGateway, PaymentIntent, PaymentNotification,
};
pub use reservation::{ReservationEngine, ReservedLine, ReservedSet};
