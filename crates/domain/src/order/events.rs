//! Payment events reported back by the payment gateway.

use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};

/// Final outcome of a charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Succeeded,
    Failed,
}

/// A gateway confirmation for one order.
///
/// Applying it moves `payment_status`/`status` of an existing order and never
/// touches stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub order_id: OrderId,

    /// Gateway transaction (payment intent) id.
    pub transaction_id: String,

    pub outcome: PaymentOutcome,

    pub occurred_at: DateTime<Utc>,
}

impl PaymentEvent {
    /// Creates a success event stamped with the current time.
    pub fn succeeded(order_id: OrderId, transaction_id: impl Into<String>) -> Self {
        Self {
            order_id,
            transaction_id: transaction_id.into(),
            outcome: PaymentOutcome::Succeeded,
            occurred_at: Utc::now(),
        }
    }

    /// Creates a failure event stamped with the current time.
    pub fn failed(order_id: OrderId, transaction_id: impl Into<String>) -> Self {
        Self {
            order_id,
            transaction_id: transaction_id.into(),
            outcome: PaymentOutcome::Failed,
            occurred_at: Utc::now(),
        }
    }
}

/// What applying a payment event did to the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentTransition {
    /// The order changed.
    Applied,

    /// The same outcome for the same transaction was already recorded.
    AlreadyApplied,
}
