//! Payment intent, confirmation and gateway notification endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use checkout::{CheckoutError, NotificationOutcome, PaymentGateway, PaymentNotification};
use common::OrderId;
use serde::{Deserialize, Serialize};
use store::Store;

use super::AppState;
use super::orders::OrderResponse;
use crate::auth::Identity;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct CreateIntentRequest {
    pub order_id: OrderId,
}

#[derive(Debug, Serialize)]
pub struct CreateIntentResponse {
    pub client_secret: String,
    pub payment_intent_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmPaymentRequest {
    pub order_id: OrderId,
    pub payment_intent_id: String,
}

#[derive(Debug, Serialize)]
pub struct ConfirmPaymentResponse {
    pub success: bool,
    pub order: OrderResponse,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub received: bool,
}

/// POST /payments/intent: Start a charge for the stored order total.
#[tracing::instrument(skip(state, payload), fields(user_id = %identity.user_id))]
pub async fn create_intent<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    identity: Identity,
    payload: Result<Json<CreateIntentRequest>, JsonRejection>,
) -> Result<Json<CreateIntentResponse>, ApiError>
where
    S: Store + Clone + 'static,
    G: PaymentGateway + 'static,
{
    let Json(request) = payload?;
    let intent = state
        .checkout
        .create_payment_intent(identity.user_id, request.order_id)
        .await?;

    Ok(Json(CreateIntentResponse {
        client_secret: intent.client_secret,
        payment_intent_id: intent.id,
    }))
}

/// POST /payments/confirm: Record the payment once the gateway reports it settled.
#[tracing::instrument(skip(state, payload), fields(user_id = %identity.user_id))]
pub async fn confirm<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    identity: Identity,
    payload: Result<Json<ConfirmPaymentRequest>, JsonRejection>,
) -> Result<Json<ConfirmPaymentResponse>, ApiError>
where
    S: Store + Clone + 'static,
    G: PaymentGateway + 'static,
{
    let Json(request) = payload?;
    let order = state
        .checkout
        .confirm_payment(
            identity.user_id,
            request.order_id,
            &request.payment_intent_id,
        )
        .await?;

    Ok(Json(ConfirmPaymentResponse {
        success: true,
        order: OrderResponse::from(&order),
    }))
}

/// POST /payments/webhook: Payment outcome pushed by the gateway.
///
/// Anything the gateway cannot fix by redelivering (unknown order, a
/// transition the order refuses) is logged and acknowledged. Server-side
/// failures answer 500 so the gateway tries again.
#[tracing::instrument(skip(state, payload))]
pub async fn webhook<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    payload: Result<Json<PaymentNotification>, JsonRejection>,
) -> Result<(StatusCode, Json<WebhookResponse>), ApiError>
where
    S: Store + Clone + 'static,
    G: PaymentGateway + 'static,
{
    let Json(notification) = payload?;

    let outcome = match state.checkout.handle_notification(&notification).await {
        Ok(NotificationOutcome::Applied) => "applied",
        Ok(NotificationOutcome::Duplicate) => "duplicate",
        Ok(NotificationOutcome::Ignored) => "ignored",
        Err(err) if is_acknowledged(&err) => {
            tracing::warn!(
                error = %err,
                kind = %notification.kind,
                intent_id = %notification.data.id,
                "gateway notification refused"
            );
            "refused"
        }
        Err(err) => return Err(err.into()),
    };

    metrics::counter!("payment_notifications_total", "outcome" => outcome).increment(1);
    Ok((StatusCode::OK, Json(WebhookResponse { received: true })))
}

fn is_acknowledged(err: &CheckoutError) -> bool {
    err.is_client_error() && !err.is_retryable()
}
