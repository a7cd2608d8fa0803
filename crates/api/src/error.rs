//! API error types with HTTP response mapping.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use checkout::{CheckoutError, GatewayError, StockError};
use domain::OrderError;

/// Message returned for failures the client cannot fix.
const SERVER_ERROR_MESSAGE: &str = "Something went wrong while processing the request";

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// No caller identity on the request.
    Unauthorized(String),
    /// Caller identity lacks the required role.
    Forbidden(String),
    /// Checkout or order lifecycle error.
    Checkout(CheckoutError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, error_body(msg)),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, error_body(msg)),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, error_body(msg)),
            ApiError::Checkout(err) => checkout_error_to_response(err),
        };

        (status, axum::Json(body)).into_response()
    }
}

fn error_body(message: impl Into<String>) -> serde_json::Value {
    serde_json::json!({ "error": message.into() })
}

fn checkout_error_to_response(err: CheckoutError) -> (StatusCode, serde_json::Value) {
    let status = match &err {
        CheckoutError::Order(order_err) => match order_err {
            OrderError::InvalidStateTransition { .. }
            | OrderError::InvalidFulfilmentStep { .. }
            | OrderError::PaymentAlreadyCompleted { .. } => StatusCode::CONFLICT,
            OrderError::EmptyCart
            | OrderError::MissingProductId
            | OrderError::InvalidQuantity { .. }
            | OrderError::InvalidPrice { .. }
            | OrderError::InvalidTotal { .. }
            | OrderError::TotalMismatch { .. }
            | OrderError::AmountOverflow
            | OrderError::MissingPaymentMethod
            | OrderError::NotesTooLong { .. }
            | OrderError::UnknownStatus(_) => StatusCode::BAD_REQUEST,
        },
        CheckoutError::Stock(StockError::ProductNotFound { .. }) => StatusCode::NOT_FOUND,
        CheckoutError::Stock(StockError::InsufficientStock { .. }) => StatusCode::CONFLICT,
        CheckoutError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        CheckoutError::Conflict(_) => StatusCode::CONFLICT,
        CheckoutError::PaymentNotAccepted { .. }
        | CheckoutError::InvalidPaymentAmount
        | CheckoutError::PaymentNotCompleted { .. }
        | CheckoutError::PaymentMismatch { .. } => StatusCode::BAD_REQUEST,
        CheckoutError::Gateway(GatewayError::IntentNotFound(_)) => StatusCode::NOT_FOUND,
        CheckoutError::Gateway(GatewayError::Rejected(_)) => StatusCode::BAD_REQUEST,
        CheckoutError::Gateway(GatewayError::Unavailable(_)) => StatusCode::BAD_GATEWAY,
        CheckoutError::PersistenceFailure(_)
        | CheckoutError::TransientStore(_)
        | CheckoutError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if !err.is_client_error() {
        tracing::error!(error = %err, reason = err.reason(), "request failed on the server side");
        let message = match status {
            StatusCode::BAD_GATEWAY => "Payment provider is unavailable, please retry",
            _ => SERVER_ERROR_MESSAGE,
        };
        return (status, error_body(message));
    }

    let mut body = error_body(err.to_string());
    if let CheckoutError::Stock(stock_err) = &err {
        body["product_id"] = serde_json::json!(stock_err.product_id());
        if let StockError::InsufficientStock {
            requested,
            available,
            ..
        } = stock_err
        {
            body["requested"] = serde_json::json!(requested);
            body["available"] = serde_json::json!(available);
        }
    }
    (status, body)
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        ApiError::Checkout(err)
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        ApiError::Checkout(CheckoutError::Order(err))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(format!("Invalid request body: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(format!("Invalid query: {}", rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(format!("Invalid path: {}", rejection.body_text()))
    }
}
