//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use api::AppState;
use api::config::Config;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use checkout::InMemoryPaymentGateway;
use common::UserId;
use domain::{Money, Product, ProductId};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use store::InMemoryStore;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

type TestState = Arc<AppState<InMemoryStore, InMemoryPaymentGateway>>;

fn test_config() -> Config {
    Config {
        checkout_retry_backoff_ms: 0,
        ..Config::default()
    }
}

fn setup() -> (Router, TestState) {
    let store = InMemoryStore::with_products([
        Product::new("fudge", "Chocolate Fudge", Money::from_cents(999), 5),
        Product::new("macarons", "Strawberry Macarons", Money::from_cents(1550), 2),
    ]);
    let state = api::create_state(store, InMemoryPaymentGateway::new(), &test_config());
    let app = api::create_app(state.clone(), get_metrics_handle());
    (app, state)
}

/// Caller identity attached to a test request.
#[derive(Clone, Copy)]
enum Caller {
    Anonymous,
    User(UserId),
    Admin(UserId),
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    caller: Caller,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    match caller {
        Caller::Anonymous => {}
        Caller::User(id) => builder = builder.header("x-user-id", id.to_string()),
        Caller::Admin(id) => {
            builder = builder
                .header("x-user-id", id.to_string())
                .header("x-user-role", "admin");
        }
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

async fn get(app: &Router, uri: &str, caller: Caller) -> (StatusCode, Value) {
    send(app, "GET", uri, caller, None).await
}

async fn post(app: &Router, uri: &str, caller: Caller, body: Value) -> (StatusCode, Value) {
    send(app, "POST", uri, caller, Some(body)).await
}

async fn patch(app: &Router, uri: &str, caller: Caller) -> (StatusCode, Value) {
    send(app, "PATCH", uri, caller, None).await
}

async fn set_status(app: &Router, uri: &str, caller: Caller, status: &str) -> (StatusCode, Value) {
    send(app, "PATCH", uri, caller, Some(json!({ "status": status }))).await
}

async fn place(app: &Router, user: UserId, items: Value) -> (StatusCode, Value) {
    send(
        app,
        "POST",
        "/orders",
        Caller::User(user),
        Some(json!({
            "items": items,
            "shipping_address": {
                "street": "1 Baker Street",
                "city": "London",
                "state": "Greater London",
                "zip_code": "NW1 6XE"
            },
            "payment_method": "card"
        })),
    )
    .await
}

fn line(product: &str, quantity: i64) -> Value {
    json!([{ "product_id": product, "quantity": quantity }])
}

fn stock(state: &TestState, product: &str) -> u32 {
    state
        .checkout
        .store()
        .stock(&ProductId::new(product))
        .unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = setup();

    let (status, json) = get(&app, "/health", Caller::Anonymous).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _) = setup();
    let user = UserId::new();
    place(&app, user, line("fudge", 1)).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_place_order() {
    let (app, state) = setup();
    let user = UserId::new();

    let (status, json) = place(&app, user, line("fudge", 3)).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["status"], "pending");
    assert_eq!(json["payment_status"], "pending");
    assert_eq!(json["user_id"], user.to_string());
    assert_eq!(json["total_price_cents"], 2997);
    assert_eq!(json["items"][0]["name"], "Chocolate Fudge");
    assert_eq!(json["items"][0]["price_cents"], 999);
    assert_eq!(json["shipping_address"]["city"], "London");
    assert!(json["id"].as_str().is_some());
    assert_eq!(stock(&state, "fudge"), 2);
}

#[tokio::test]
async fn test_place_order_accepts_qty_alias() {
    let (app, state) = setup();

    let items = json!([{ "product_id": "macarons", "qty": 2 }]);
    let (status, json) = place(&app, UserId::new(), items).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["total_price_cents"], 3100);
    assert_eq!(stock(&state, "macarons"), 0);
}

#[tokio::test]
async fn test_place_order_requires_identity() {
    let (app, state) = setup();

    let (status, json) = send(
        &app,
        "POST",
        "/orders",
        Caller::Anonymous,
        Some(json!({ "items": [{ "product_id": "fudge", "quantity": 1 }] })),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(json["error"].as_str().is_some());
    assert_eq!(stock(&state, "fudge"), 5);
}

#[tokio::test]
async fn test_empty_cart_is_rejected() {
    let (app, _) = setup();

    let (status, json) = place(&app, UserId::new(), json!([])).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "No order items");
}

#[tokio::test]
async fn test_invalid_quantities_are_rejected() {
    let (app, state) = setup();

    let (status, _) = place(&app, UserId::new(), line("fudge", 0)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = place(
        &app,
        UserId::new(),
        json!([{ "product_id": "fudge", "quantity": "three" }]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().starts_with("Invalid request body"));

    assert_eq!(stock(&state, "fudge"), 5);
}

#[tokio::test]
async fn test_total_mismatch_is_rejected() {
    let (app, state) = setup();

    let (status, json) = send(
        &app,
        "POST",
        "/orders",
        Caller::User(UserId::new()),
        Some(json!({
            "items": [{ "product_id": "fudge", "quantity": 2, "price_cents": 999 }],
            "total_price_cents": 100
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("mismatch"));
    assert_eq!(stock(&state, "fudge"), 5);
}

#[tokio::test]
async fn test_insufficient_stock_is_conflict() {
    let (app, state) = setup();

    let (status, json) = place(&app, UserId::new(), line("macarons", 3)).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["product_id"], "macarons");
    assert_eq!(json["requested"], 3);
    assert_eq!(json["available"], 2);
    assert_eq!(stock(&state, "macarons"), 2);
    assert_eq!(state.checkout.store().order_count(), 0);
}

#[tokio::test]
async fn test_unknown_product_restores_earlier_lines() {
    let (app, state) = setup();

    let (status, json) = place(
        &app,
        UserId::new(),
        json!([
            { "product_id": "fudge", "quantity": 2 },
            { "product_id": "eclairs", "quantity": 1 }
        ]),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["product_id"], "eclairs");
    assert_eq!(stock(&state, "fudge"), 5);
    assert_eq!(state.checkout.store().order_count(), 0);
}

#[tokio::test]
async fn test_store_failure_returns_generic_error() {
    let (app, state) = setup();
    state.checkout.store().set_fail_on_insert(true);

    let (status, json) = place(&app, UserId::new(), line("fudge", 1)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let message = json["error"].as_str().unwrap();
    assert!(!message.contains("insert"));
    assert_eq!(stock(&state, "fudge"), 5);
}

#[tokio::test]
async fn test_get_order_visibility() {
    let (app, _) = setup();
    let owner = UserId::new();
    let (_, created) = place(&app, owner, line("fudge", 1)).await;
    let uri = format!("/orders/{}", created["id"].as_str().unwrap());

    let (status, json) = get(&app, &uri, Caller::User(owner)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], created["id"]);

    let (status, _) = get(&app, &uri, Caller::User(UserId::new())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get(&app, &uri, Caller::Admin(UserId::new())).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_get_order_invalid_id() {
    let (app, _) = setup();

    let (status, _) = get(&app, "/orders/not-a-uuid", Caller::User(UserId::new())).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_my_orders_is_paginated() {
    let (app, _) = setup();
    let user = UserId::new();
    for _ in 0..3 {
        let (status, _) = place(&app, user, line("fudge", 1)).await;
        assert_eq!(status, StatusCode::CREATED);
    }
    place(&app, UserId::new(), line("fudge", 1)).await;

    let (status, json) = get(&app, "/orders/mine?page=1&limit=2", Caller::User(user)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["orders"].as_array().unwrap().len(), 2);
    assert_eq!(json["pagination"]["total"], 3);
    assert_eq!(json["pagination"]["pages"], 2);
    assert_eq!(json["pagination"]["has_next"], true);
    assert_eq!(json["pagination"]["has_prev"], false);

    let (_, json) = get(&app, "/orders/mine?page=2&limit=2", Caller::User(user)).await;
    assert_eq!(json["orders"].as_array().unwrap().len(), 1);
    assert_eq!(json["pagination"]["has_next"], false);

    let (status, _) = get(&app, "/orders/mine?page=abc", Caller::User(user)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_all_orders_requires_admin() {
    let (app, _) = setup();
    let user = UserId::new();
    place(&app, user, line("fudge", 1)).await;
    place(&app, UserId::new(), line("fudge", 1)).await;

    let (status, _) = get(&app, "/orders", Caller::User(user)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, json) = get(&app, "/orders", Caller::Admin(UserId::new())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_cancel_order_restores_stock() {
    let (app, state) = setup();
    let user = UserId::new();
    let (_, created) = place(&app, user, line("fudge", 4)).await;
    assert_eq!(stock(&state, "fudge"), 1);
    let uri = format!("/orders/{}/cancel", created["id"].as_str().unwrap());

    let (status, _) = patch(&app, &uri, Caller::User(UserId::new())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, json) = patch(&app, &uri, Caller::User(user)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "cancelled");
    assert_eq!(stock(&state, "fudge"), 5);

    let (status, _) = patch(&app, &uri, Caller::User(user)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(stock(&state, "fudge"), 5);
}

#[tokio::test]
async fn test_payment_confirmation_flow() {
    let (app, state) = setup();
    let user = UserId::new();
    let (_, created) = place(&app, user, line("fudge", 2)).await;
    let order_id = created["id"].as_str().unwrap().to_string();

    let (status, intent) = post(
        &app,
        "/payments/intent",
        Caller::User(user),
        json!({ "order_id": order_id }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let intent_id = intent["payment_intent_id"].as_str().unwrap().to_string();
    assert!(intent["client_secret"].as_str().unwrap().starts_with(&intent_id));

    let confirm = json!({ "order_id": order_id, "payment_intent_id": intent_id });

    let (status, json) = post(&app, "/payments/confirm", Caller::User(user), confirm.clone()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("Payment not completed"));

    assert!(state.checkout.gateway().succeed(&intent_id));
    let (status, json) = post(&app, "/payments/confirm", Caller::User(user), confirm).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["order"]["status"], "confirmed");
    assert_eq!(json["order"]["payment_status"], "completed");
    assert_eq!(json["order"]["payment_transaction_id"], intent_id.as_str());
    assert!(json["order"]["paid_at"].as_str().is_some());
    assert_eq!(stock(&state, "fudge"), 3);

    let (status, _) = post(
        &app,
        "/payments/intent",
        Caller::User(user),
        json!({ "order_id": order_id }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_payment_intent_for_someone_elses_order() {
    let (app, state) = setup();
    let (_, created) = place(&app, UserId::new(), line("fudge", 1)).await;

    let (status, _) = post(
        &app,
        "/payments/intent",
        Caller::User(UserId::new()),
        json!({ "order_id": created["id"].clone() }),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(state.checkout.gateway().intent_count(), 0);
}

#[tokio::test]
async fn test_gateway_outage_is_bad_gateway() {
    let (app, state) = setup();
    let user = UserId::new();
    let (_, created) = place(&app, user, line("fudge", 1)).await;
    state.checkout.gateway().set_unavailable(true);

    let (status, _) = post(
        &app,
        "/payments/intent",
        Caller::User(user),
        json!({ "order_id": created["id"].clone() }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_webhook_applies_payment_outcomes() {
    let (app, _) = setup();
    let user = UserId::new();
    let (_, created) = place(&app, user, line("fudge", 1)).await;
    let order_id = created["id"].as_str().unwrap().to_string();
    let order_uri = format!("/orders/{order_id}");

    let failed = json!({
        "type": "payment_intent.payment_failed",
        "data": { "id": "pi_declined", "order_id": order_id }
    });
    let (status, json) = post(&app, "/payments/webhook", Caller::Anonymous, failed).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["received"], true);

    let (_, order) = get(&app, &order_uri, Caller::User(user)).await;
    assert_eq!(order["status"], "payment_failed");
    assert_eq!(order["payment_status"], "failed");

    let succeeded = json!({
        "type": "payment_intent.succeeded",
        "data": { "id": "pi_retry", "order_id": order_id }
    });
    for _ in 0..2 {
        let notification = succeeded.clone();
        let (status, json) = post(&app, "/payments/webhook", Caller::Anonymous, notification).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["received"], true);
    }

    let (_, order) = get(&app, &order_uri, Caller::User(user)).await;
    assert_eq!(order["status"], "confirmed");
    assert_eq!(order["payment_status"], "completed");
    assert_eq!(order["payment_transaction_id"], "pi_retry");
}

#[tokio::test]
async fn test_webhook_acknowledges_what_it_cannot_apply() {
    let (app, _) = setup();

    let unknown_type = json!({
        "type": "charge.refunded",
        "data": { "id": "ch_1", "order_id": uuid::Uuid::new_v4().to_string() }
    });
    let (status, json) = post(&app, "/payments/webhook", Caller::Anonymous, unknown_type).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["received"], true);

    let unknown_order = json!({
        "type": "payment_intent.succeeded",
        "data": { "id": "pi_1", "order_id": uuid::Uuid::new_v4().to_string() }
    });
    let (status, json) = post(&app, "/payments/webhook", Caller::Anonymous, unknown_order).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["received"], true);

    let (status, _) = post(
        &app,
        "/payments/webhook",
        Caller::Anonymous,
        json!({ "data": {} }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_fulfilment_status_updates() {
    let (app, state) = setup();
    let user = UserId::new();
    let admin = Caller::Admin(UserId::new());
    let (_, created) = place(&app, user, line("fudge", 1)).await;
    let order_id = created["id"].as_str().unwrap().to_string();
    let status_uri = format!("/orders/{order_id}/status");

    let (status, _) = set_status(&app, &status_uri, admin, "processing").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, intent) = post(
        &app,
        "/payments/intent",
        Caller::User(user),
        json!({ "order_id": order_id }),
    )
    .await;
    let intent_id = intent["payment_intent_id"].as_str().unwrap().to_string();
    state.checkout.gateway().succeed(&intent_id);
    let (status, _) = post(
        &app,
        "/payments/confirm",
        Caller::User(user),
        json!({ "order_id": order_id, "payment_intent_id": intent_id }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = set_status(&app, &status_uri, Caller::User(user), "processing").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = set_status(&app, &status_uri, admin, "teleported").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = set_status(&app, &status_uri, admin, "shipped").await;
    assert_eq!(status, StatusCode::CONFLICT);

    for step in ["processing", "shipped", "delivered"] {
        let (status, json) = set_status(&app, &status_uri, admin, step).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], step);
    }

    let cancel_uri = format!("/orders/{order_id}/cancel");
    let (status, _) = patch(&app, &cancel_uri, Caller::User(user)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}
