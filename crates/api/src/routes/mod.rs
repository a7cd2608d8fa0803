//! HTTP route handlers.

pub mod health;
pub mod metrics;
pub mod orders;
pub mod payments;

use checkout::{CheckoutCoordinator, PaymentGateway};
use store::Store;

/// Shared application state accessible from all handlers.
pub struct AppState<S: Store, G: PaymentGateway> {
    pub checkout: CheckoutCoordinator<S, G>,
}
