//! Order placement, lookup, cancellation and fulfilment endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use checkout::PaymentGateway;
use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{Order, OrderLine, OrderStatus, PaymentStatus, PlaceOrder, ShippingAddress};
use serde::{Deserialize, Serialize};
use store::{Page, PageRequest, Store};

use super::AppState;
use crate::auth::Identity;
use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl PageQuery {
    fn to_request(&self) -> PageRequest {
        PageRequest::new(
            self.page.unwrap_or(1),
            self.limit.unwrap_or(PageRequest::DEFAULT_LIMIT),
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct OrderItemResponse {
    pub product_id: String,
    pub name: String,
    pub image: String,
    pub price_cents: i64,
    pub quantity: u32,
}

impl From<&OrderLine> for OrderItemResponse {
    fn from(line: &OrderLine) -> Self {
        Self {
            product_id: line.product_id.to_string(),
            name: line.name.clone(),
            image: line.image.clone(),
            price_cents: line.unit_price.cents(),
            quantity: line.quantity,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub user_id: String,
    pub items: Vec<OrderItemResponse>,
    pub shipping_address: ShippingAddress,
    pub payment_method: String,
    pub notes: Option<String>,
    pub total_price_cents: i64,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_transaction_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id().to_string(),
            user_id: order.user_id().to_string(),
            items: order.lines().iter().map(OrderItemResponse::from).collect(),
            shipping_address: order.shipping_address().clone(),
            payment_method: order.payment_method().as_str().to_string(),
            notes: order.notes().map(String::from),
            total_price_cents: order.total_price().cents(),
            status: order.status(),
            payment_status: order.payment_status(),
            payment_transaction_id: order.payment_transaction_id().map(String::from),
            paid_at: order.paid_at(),
            created_at: order.created_at(),
            updated_at: order.updated_at(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaginationResponse {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

#[derive(Debug, Serialize)]
pub struct OrderPageResponse {
    pub orders: Vec<OrderResponse>,
    pub pagination: PaginationResponse,
}

impl From<&Page<Order>> for OrderPageResponse {
    fn from(page: &Page<Order>) -> Self {
        Self {
            orders: page.items.iter().map(OrderResponse::from).collect(),
            pagination: PaginationResponse {
                page: page.request.page(),
                limit: page.request.limit(),
                total: page.total,
                pages: page.total_pages(),
                has_next: page.has_next(),
                has_prev: page.has_prev(),
            },
        }
    }
}

// -- Handlers --

/// POST /orders: Reserve stock and place an order for the caller.
#[tracing::instrument(skip(state, payload), fields(user_id = %identity.user_id))]
pub async fn create<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    identity: Identity,
    payload: Result<Json<PlaceOrder>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError>
where
    S: Store + Clone + 'static,
    G: PaymentGateway + 'static,
{
    let Json(request) = payload?;
    let order = state
        .checkout
        .place_order(identity.user_id, request)
        .await?;

    Ok((StatusCode::CREATED, Json(OrderResponse::from(&order))))
}

/// GET /orders: Every order, newest first (admin only).
#[tracing::instrument(skip(state), fields(user_id = %identity.user_id))]
pub async fn list<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    identity: Identity,
) -> Result<Json<Vec<OrderResponse>>, ApiError>
where
    S: Store + Clone + 'static,
    G: PaymentGateway + 'static,
{
    identity.require_admin()?;
    let orders = state.checkout.list_orders().await?;
    Ok(Json(orders.iter().map(OrderResponse::from).collect()))
}

/// GET /orders/mine: The caller's orders, one page at a time.
#[tracing::instrument(skip(state, query), fields(user_id = %identity.user_id))]
pub async fn list_mine<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    identity: Identity,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<Json<OrderPageResponse>, ApiError>
where
    S: Store + Clone + 'static,
    G: PaymentGateway + 'static,
{
    let Query(query) = query?;
    let page = state
        .checkout
        .list_orders_for_user(identity.user_id, query.to_request())
        .await?;
    Ok(Json(OrderPageResponse::from(&page)))
}

/// GET /orders/{id}: One order, visible to its owner and admins.
#[tracing::instrument(skip(state, id), fields(user_id = %identity.user_id))]
pub async fn get<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    identity: Identity,
    id: Result<Path<String>, PathRejection>,
) -> Result<Json<OrderResponse>, ApiError>
where
    S: Store + Clone + 'static,
    G: PaymentGateway + 'static,
{
    let order_id = parse_order_id(id?)?;
    let order = state.checkout.get_order(identity.access(), order_id).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// PATCH /orders/{id}/cancel: Cancel an unpaid order and restore its stock.
#[tracing::instrument(skip(state, id), fields(user_id = %identity.user_id))]
pub async fn cancel<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    identity: Identity,
    id: Result<Path<String>, PathRejection>,
) -> Result<Json<OrderResponse>, ApiError>
where
    S: Store + Clone + 'static,
    G: PaymentGateway + 'static,
{
    let order_id = parse_order_id(id?)?;
    let order = state
        .checkout
        .cancel_order(identity.user_id, order_id)
        .await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// PATCH /orders/{id}/status: Move a paid order one fulfilment step (admin only).
#[tracing::instrument(skip(state, id, payload), fields(user_id = %identity.user_id))]
pub async fn update_status<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    identity: Identity,
    id: Result<Path<String>, PathRejection>,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<OrderResponse>, ApiError>
where
    S: Store + Clone + 'static,
    G: PaymentGateway + 'static,
{
    identity.require_admin()?;
    let order_id = parse_order_id(id?)?;
    let Json(request) = payload?;
    let target: OrderStatus = request.status.parse()?;

    let order = state.checkout.advance_fulfilment(order_id, target).await?;
    Ok(Json(OrderResponse::from(&order)))
}

pub(crate) fn parse_order_id(Path(id): Path<String>) -> Result<OrderId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
