//! HTTP API server with observability for the storefront checkout.
//!
//! Provides REST endpoints for placing and managing orders and for payment
//! confirmation, with structured logging (tracing) and Prometheus metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post};
use checkout::{CheckoutCoordinator, CheckoutMode, InMemoryPaymentGateway, PaymentGateway};
use domain::sample_catalog;
use metrics_exporter_prometheus::PrometheusHandle;
use store::{InMemoryStore, PostgresStore, Store, StoreError};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
pub use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, G>(state: Arc<AppState<S, G>>, metrics_handle: PrometheusHandle) -> Router
where
    S: Store + Clone + 'static,
    G: PaymentGateway + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/orders",
            post(routes::orders::create::<S, G>).get(routes::orders::list::<S, G>),
        )
        .route("/orders/mine", get(routes::orders::list_mine::<S, G>))
        .route("/orders/{id}", get(routes::orders::get::<S, G>))
        .route("/orders/{id}/cancel", patch(routes::orders::cancel::<S, G>))
        .route(
            "/orders/{id}/status",
            patch(routes::orders::update_status::<S, G>),
        )
        .route(
            "/payments/intent",
            post(routes::payments::create_intent::<S, G>),
        )
        .route("/payments/confirm", post(routes::payments::confirm::<S, G>))
        .route("/payments/webhook", post(routes::payments::webhook::<S, G>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wraps a store and gateway in application state configured from `config`.
pub fn create_state<S, G>(store: S, gateway: G, config: &Config) -> Arc<AppState<S, G>>
where
    S: Store + Clone + 'static,
    G: PaymentGateway + 'static,
{
    if config.checkout_mode == CheckoutMode::ImmediatePaid {
        tracing::warn!(
            mode = %config.checkout_mode,
            "orders are marked paid at checkout without asking the payment gateway"
        );
    }

    let checkout = CheckoutCoordinator::new(store, gateway)
        .with_retry_policy(config.retry_policy())
        .with_mode(config.checkout_mode);
    Arc::new(AppState { checkout })
}

/// Creates state backed by the in-memory store and gateway, seeded with
/// the sample catalog unless `SEED_CATALOG` is off.
pub fn create_default_state(
    config: &Config,
) -> Arc<AppState<InMemoryStore, InMemoryPaymentGateway>> {
    let store = if config.seed_catalog {
        InMemoryStore::with_products(sample_catalog())
    } else {
        InMemoryStore::new()
    };
    create_state(store, InMemoryPaymentGateway::new(), config)
}

/// Connects to PostgreSQL, runs migrations and seeds the sample catalog
/// into an empty catalog when `SEED_CATALOG` is on.
pub async fn create_postgres_state(
    config: &Config,
    database_url: &str,
) -> Result<Arc<AppState<PostgresStore, InMemoryPaymentGateway>>, StoreError> {
    let store = PostgresStore::connect(database_url, config.database_max_connections).await?;
    store.run_migrations().await?;

    if config.seed_catalog && store.list_products().await?.is_empty() {
        let catalog = sample_catalog();
        for product in &catalog {
            store.upsert_product(product).await?;
        }
        tracing::info!(products = catalog.len(), "seeded sample catalog");
    }

    Ok(create_state(store, InMemoryPaymentGateway::new(), config))
}
