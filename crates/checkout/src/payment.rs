//! Payment gateway trait, in-memory gateway and gateway notifications.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::OrderId;
use domain::{Money, PaymentEvent};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GatewayError;

/// Status of a payment intent as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    Processing,
    Succeeded,
    Failed,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::RequiresPaymentMethod => "requires_payment_method",
            IntentStatus::Processing => "processing",
            IntentStatus::Succeeded => "succeeded",
            IntentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payment intent created for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
    pub order_id: OrderId,
    pub amount: Money,
    pub status: IntentStatus,
}

/// Trait for the external payment provider.
///
/// The gateway never touches stock. It only learns an order id and an
/// amount and later reports how the charge went.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates an intent to charge `amount` for `order_id`.
    async fn create_intent(
        &self,
        order_id: OrderId,
        amount: Money,
    ) -> Result<PaymentIntent, GatewayError>;

    /// Fetches the current state of an intent.
    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError>;
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    intents: HashMap<String, PaymentIntent>,
    unavailable: bool,
}

/// In-memory payment gateway for tests and local runs.
///
/// Intents start as `requires_payment_method`; tests settle them with
/// [`succeed`](Self::succeed) or [`fail`](Self::fail).
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    /// Creates a new in-memory gateway.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following call fail as if the provider were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .unavailable = unavailable;
    }

    /// Marks an intent as paid.
    pub fn succeed(&self, intent_id: &str) -> bool {
        self.settle(intent_id, IntentStatus::Succeeded)
    }

    /// Marks an intent as declined.
    pub fn fail(&self, intent_id: &str) -> bool {
        self.settle(intent_id, IntentStatus::Failed)
    }

    /// Returns the number of intents created so far.
    pub fn intent_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .intents
            .len()
    }

    fn settle(&self, intent_id: &str, status: IntentStatus) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match state.intents.get_mut(intent_id) {
            Some(intent) => {
                intent.status = status;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn create_intent(
        &self,
        order_id: OrderId,
        amount: Money,
    ) -> Result<PaymentIntent, GatewayError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.unavailable {
            return Err(GatewayError::Unavailable("connection refused".to_string()));
        }
        if !amount.is_positive() {
            return Err(GatewayError::Rejected(format!("invalid amount {amount}")));
        }

        let token = Uuid::new_v4().simple();
        let id = format!("pi_{token}");
        let intent = PaymentIntent {
            client_secret: format!("{id}_secret"),
            id: id.clone(),
            order_id,
            amount,
            status: IntentStatus::RequiresPaymentMethod,
        };
        state.intents.insert(id, intent.clone());
        Ok(intent)
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if state.unavailable {
            return Err(GatewayError::Unavailable("connection refused".to_string()));
        }
        state
            .intents
            .get(intent_id)
            .cloned()
            .ok_or_else(|| GatewayError::IntentNotFound(intent_id.to_string()))
    }
}

/// What handling a gateway notification did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// The order's payment state changed.
    Applied,
    /// The same outcome was already recorded.
    Duplicate,
    /// Not a notification type we act on.
    Ignored,
}

/// Notification type for a settled charge.
pub const INTENT_SUCCEEDED: &str = "payment_intent.succeeded";
/// Notification type for a declined charge.
pub const INTENT_PAYMENT_FAILED: &str = "payment_intent.payment_failed";

/// A webhook-style notification pushed by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentNotification {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: NotificationData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    /// Gateway transaction (intent) id.
    pub id: String,
    #[serde(default)]
    pub order_id: Option<OrderId>,
}

impl PaymentNotification {
    pub fn new(kind: impl Into<String>, intent_id: impl Into<String>, order_id: OrderId) -> Self {
        Self {
            kind: kind.into(),
            data: NotificationData {
                id: intent_id.into(),
                order_id: Some(order_id),
            },
        }
    }

    /// Maps the notification to a payment event, if it is one we act on.
    pub fn to_event(&self) -> Option<PaymentEvent> {
        let order_id = self.data.order_id?;
        match self.kind.as_str() {
            INTENT_SUCCEEDED => Some(PaymentEvent::succeeded(order_id, self.data.id.clone())),
            INTENT_PAYMENT_FAILED => Some(PaymentEvent::failed(order_id, self.data.id.clone())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use domain::PaymentOutcome;

    use super::*;

    #[tokio::test]
    async fn test_create_and_settle_intent() {
        let gateway = InMemoryPaymentGateway::new();
        let order_id = OrderId::new();

        let intent = gateway
            .create_intent(order_id, Money::from_cents(2748))
            .await
            .unwrap();
        assert!(intent.id.starts_with("pi_"));
        assert!(intent.client_secret.starts_with(&intent.id));
        assert_eq!(intent.status, IntentStatus::RequiresPaymentMethod);
        assert_eq!(gateway.intent_count(), 1);

        assert!(gateway.succeed(&intent.id));
        let fetched = gateway.retrieve_intent(&intent.id).await.unwrap();
        assert_eq!(fetched.status, IntentStatus::Succeeded);
        assert_eq!(fetched.order_id, order_id);
    }

    #[tokio::test]
    async fn test_zero_amount_is_rejected() {
        let gateway = InMemoryPaymentGateway::new();
        let result = gateway.create_intent(OrderId::new(), Money::zero()).await;
        assert!(matches!(result, Err(GatewayError::Rejected(_))));
        assert_eq!(gateway.intent_count(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_gateway() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.set_unavailable(true);
        let result = gateway
            .create_intent(OrderId::new(), Money::from_cents(100))
            .await;
        assert!(matches!(result, Err(GatewayError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_unknown_intent() {
        let gateway = InMemoryPaymentGateway::new();
        let result = gateway.retrieve_intent("pi_missing").await;
        assert!(matches!(result, Err(GatewayError::IntentNotFound(_))));
        assert!(!gateway.fail("pi_missing"));
    }

    #[test]
    fn test_notification_mapping() {
        let order_id = OrderId::new();

        let paid = PaymentNotification::new(INTENT_SUCCEEDED, "pi_1", order_id);
        let event = paid.to_event().unwrap();
        assert_eq!(event.outcome, PaymentOutcome::Succeeded);
        assert_eq!(event.transaction_id, "pi_1");

        let declined = PaymentNotification::new(INTENT_PAYMENT_FAILED, "pi_1", order_id);
        assert_eq!(declined.to_event().unwrap().outcome, PaymentOutcome::Failed);

        let other = PaymentNotification::new("charge.refunded", "ch_1", order_id);
        assert!(other.to_event().is_none());
    }

    #[test]
    fn test_notification_wire_format() {
        let order_id = OrderId::new();
        let json = serde_json::json!({
            "type": "payment_intent.succeeded",
            "data": { "id": "pi_9", "order_id": order_id.to_string() }
        });
        let notification: PaymentNotification = serde_json::from_value(json).unwrap();
        assert_eq!(notification.data.order_id, Some(order_id));

        let without_order: PaymentNotification = serde_json::from_value(serde_json::json!({
            "type": "payment_intent.succeeded",
            "data": { "id": "pi_9" }
        }))
        .unwrap();
        assert!(without_order.to_event().is_none());
    }
}
