//! PostgreSQL integration tests
//!
//! These tests share one PostgreSQL container and need a Docker daemon.
//! Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration -- --ignored
//! ```

use std::sync::Arc;

use chrono::Utc;
use common::{OrderId, UserId};
use domain::{CartLineInput, Money, Order, OrderLine, PaymentEvent, PlaceOrder, Product, ProductId};
use serial_test::serial;
use sqlx::PgPool;
use store::{PageRequest, PostgresStore, StockDecrement, Store, StoreError, StoreExt, UnitOfWork};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_catalog_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool, cleared tables and one product.
async fn get_test_store(stock: u32) -> PostgresStore {
    let info = get_container_info().await;
    let store = PostgresStore::connect(&info.connection_string, 10)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE orders, products")
        .execute(store.pool())
        .await
        .unwrap();

    store
        .upsert_product(&Product::new(
            "fudge",
            "Chocolate Fudge",
            Money::from_cents(999),
            stock,
        ))
        .await
        .unwrap();

    store
}

fn fudge() -> ProductId {
    ProductId::new("fudge")
}

fn create_test_order(user_id: UserId, quantity: u32) -> Order {
    let cart = PlaceOrder::new(vec![CartLineInput::new("fudge", i64::from(quantity))])
        .validate()
        .unwrap();
    Order::place(
        OrderId::new(),
        user_id,
        vec![OrderLine {
            product_id: fudge(),
            name: "Chocolate Fudge".to_string(),
            image: String::new(),
            unit_price: Money::from_cents(999),
            quantity,
        }],
        &cart,
        Utc::now(),
    )
    .unwrap()
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn decrement_and_insert_commit_together() {
    let store = get_test_store(5).await;
    let order = create_test_order(UserId::new(), 2);

    let mut unit = store.begin().await.unwrap();
    let outcome = unit.decrement_stock(&fudge(), 2).await.unwrap();
    assert!(matches!(outcome, StockDecrement::Reserved { remaining: 3, .. }));
    unit.insert_order(&order).await.unwrap();

    // Not visible before commit.
    assert_eq!(store.stock_of(&fudge()).await.unwrap(), 5);
    assert!(store.get_order(order.id()).await.unwrap().is_none());

    unit.commit().await.unwrap();

    assert_eq!(store.stock_of(&fudge()).await.unwrap(), 3);
    let stored = store.get_order(order.id()).await.unwrap().unwrap();
    assert_eq!(stored, order);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn dropped_unit_rolls_back() {
    let store = get_test_store(5).await;
    let order = create_test_order(UserId::new(), 5);

    {
        let mut unit = store.begin().await.unwrap();
        unit.decrement_stock(&fudge(), 5).await.unwrap();
        unit.insert_order(&order).await.unwrap();
    }

    assert_eq!(store.stock_of(&fudge()).await.unwrap(), 5);
    assert!(store.get_order(order.id()).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn insufficient_and_missing_products_are_distinguished() {
    let store = get_test_store(1).await;

    let mut unit = store.begin().await.unwrap();
    assert_eq!(
        unit.decrement_stock(&fudge(), 2).await.unwrap(),
        StockDecrement::Insufficient { available: 1 }
    );
    assert_eq!(
        unit.decrement_stock(&ProductId::new("ghost"), 1)
            .await
            .unwrap(),
        StockDecrement::NotFound
    );
    unit.rollback().await.unwrap();
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn concurrent_buyers_of_last_unit() {
    let store = get_test_store(1).await;

    let attempts = (0..8).map(|_| {
        let store = store.clone();
        async move {
            let mut unit = store.begin().await.unwrap();
            let outcome = unit.decrement_stock(&fudge(), 1).await.unwrap();
            if matches!(outcome, StockDecrement::Reserved { .. }) {
                unit.insert_order(&create_test_order(UserId::new(), 1))
                    .await
                    .unwrap();
                unit.commit().await.unwrap();
                true
            } else {
                unit.rollback().await.unwrap();
                false
            }
        }
    });
    let results = futures_util::future::join_all(attempts).await;

    assert_eq!(results.iter().filter(|won| **won).count(), 1);
    assert_eq!(store.stock_of(&fudge()).await.unwrap(), 0);
    assert_eq!(store.list_orders().await.unwrap().len(), 1);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn duplicate_order_is_rejected() {
    let store = get_test_store(5).await;
    let order = create_test_order(UserId::new(), 1);

    let mut unit = store.begin().await.unwrap();
    unit.insert_order(&order).await.unwrap();
    unit.commit().await.unwrap();

    let mut unit = store.begin().await.unwrap();
    let err = unit.insert_order(&order).await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicateOrder(id) if id == order.id()));
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn stale_update_is_a_conflict() {
    let store = get_test_store(5).await;
    let order = create_test_order(UserId::new(), 1);

    let mut unit = store.begin().await.unwrap();
    unit.insert_order(&order).await.unwrap();
    unit.commit().await.unwrap();

    let mut paid = order.clone();
    paid.apply_payment(&PaymentEvent::succeeded(order.id(), "pi_1"))
        .unwrap();
    store.update_order(&paid, order.version()).await.unwrap();

    let err = store
        .update_order(&paid, order.version())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::ConcurrencyConflict {
            expected: 1,
            actual: 2,
            ..
        }
    ));

    let stored = store.get_order(order.id()).await.unwrap().unwrap();
    assert_eq!(stored.version(), 2);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn release_stock_restocks_on_commit() {
    let store = get_test_store(2).await;

    let mut unit = store.begin().await.unwrap();
    unit.release_stock(&fudge(), 3).await.unwrap();
    unit.commit().await.unwrap();
    assert_eq!(store.stock_of(&fudge()).await.unwrap(), 5);

    let mut unit = store.begin().await.unwrap();
    let err = unit
        .release_stock(&ProductId::new("ghost"), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ProductNotFound(_)));
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn user_orders_are_paged() {
    let store = get_test_store(50).await;
    let user = UserId::new();

    for _ in 0..3 {
        let mut unit = store.begin().await.unwrap();
        unit.insert_order(&create_test_order(user, 1))
            .await
            .unwrap();
        unit.commit().await.unwrap();
    }

    let first = store
        .list_orders_for_user(user, PageRequest::new(1, 2))
        .await
        .unwrap();
    assert_eq!(first.total, 3);
    assert_eq!(first.items.len(), 2);
    assert!(first.has_next());

    let second = store
        .list_orders_for_user(user, PageRequest::new(2, 2))
        .await
        .unwrap();
    assert_eq!(second.items.len(), 1);
    assert!(!second.has_next());

    let other = store
        .list_orders_for_user(UserId::new(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(other.total, 0);
}
