use async_trait::async_trait;
use common::{OrderId, UserId};
use domain::{Money, Order, Product, ProductId};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgPoolOptions, postgres::PgRow};

use crate::{
    Result, StoreError,
    store::{Page, PageRequest, StockDecrement, Store, UnitOfWork},
};

const PRODUCT_COLUMNS: &str =
    "id, name, image, description, category, price_cents, count_in_stock";

/// PostgreSQL-backed store.
///
/// A unit of work is one database transaction at READ COMMITTED. Stock is
/// only changed by a conditional `UPDATE`, whose row lock makes a second
/// buyer of the same product wait and then re-check the condition against
/// the committed value.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool of at most `max_connections` connections.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_product(row: &PgRow) -> Result<Product> {
        let count: i32 = row.try_get("count_in_stock")?;
        let count_in_stock = u32::try_from(count)
            .map_err(|_| StoreError::Corrupt(format!("negative stock {count}")))?;

        Ok(Product {
            id: ProductId::new(row.try_get::<String, _>("id")?),
            name: row.try_get("name")?,
            image: row.try_get("image")?,
            description: row.try_get("description")?,
            category: row.try_get("category")?,
            price: Money::from_cents(row.try_get("price_cents")?),
            count_in_stock,
        })
    }

    fn row_to_order(row: &PgRow) -> Result<Order> {
        let document: serde_json::Value = row.try_get("document")?;
        Ok(serde_json::from_value(document)?)
    }
}

fn to_db_count(quantity: u32) -> Result<i32> {
    i32::try_from(quantity)
        .map_err(|_| StoreError::WriteRejected(format!("quantity {quantity} is out of range")))
}

fn to_db_version(version: u64) -> Result<i64> {
    i64::try_from(version)
        .map_err(|_| StoreError::Corrupt(format!("order version {version} is out of range")))
}

#[async_trait]
impl Store for PostgresStore {
    type Unit = PostgresUnit;

    async fn begin(&self) -> Result<PostgresUnit> {
        let tx = self.pool.begin().await?;
        Ok(PostgresUnit { tx })
    }

    async fn get_product(&self, product_id: &ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
        ))
        .bind(product_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_product).transpose()
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_product).collect()
    }

    async fn upsert_product(&self, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, image, description, category, price_cents, count_in_stock)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                image = EXCLUDED.image,
                description = EXCLUDED.description,
                category = EXCLUDED.category,
                price_cents = EXCLUDED.price_cents,
                count_in_stock = EXCLUDED.count_in_stock,
                updated_at = NOW()
            "#,
        )
        .bind(product.id.as_str())
        .bind(&product.name)
        .bind(&product.image)
        .bind(&product.description)
        .bind(&product.category)
        .bind(product.price.cents())
        .bind(to_db_count(product.count_in_stock)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT document FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_order).transpose()
    }

    async fn list_orders_for_user(
        &self,
        user_id: UserId,
        page: PageRequest,
    ) -> Result<Page<Order>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(
            r#"
            SELECT document FROM orders
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(i64::from(page.limit()))
        .bind(i64::try_from(page.offset()).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            items: rows.iter().map(Self::row_to_order).collect::<Result<_>>()?,
            total: u64::try_from(total).unwrap_or(0),
            request: page,
        })
    }

    async fn list_orders(&self) -> Result<Vec<Order>> {
        let rows = sqlx::query("SELECT document FROM orders ORDER BY created_at DESC, id DESC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_order).collect()
    }
}

/// Unit of work over a [`PostgresStore`]: one open transaction.
///
/// Dropping it without committing rolls the transaction back.
pub struct PostgresUnit {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PostgresUnit {
    async fn decrement_stock(
        &mut self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<StockDecrement> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE products
            SET count_in_stock = count_in_stock - $2, updated_at = NOW()
            WHERE id = $1 AND count_in_stock >= $2
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(product_id.as_str())
        .bind(to_db_count(quantity)?)
        .fetch_optional(&mut *self.tx)
        .await?;

        if let Some(row) = row {
            let product = PostgresStore::row_to_product(&row)?;
            return Ok(StockDecrement::Reserved {
                remaining: product.count_in_stock,
                product,
            });
        }

        // Nothing matched: tell a missing product from a short one.
        let available: Option<i32> =
            sqlx::query_scalar("SELECT count_in_stock FROM products WHERE id = $1")
                .bind(product_id.as_str())
                .fetch_optional(&mut *self.tx)
                .await?;

        Ok(match available {
            Some(count) => StockDecrement::Insufficient {
                available: u32::try_from(count).unwrap_or(0),
            },
            None => StockDecrement::NotFound,
        })
    }

    async fn release_stock(&mut self, product_id: &ProductId, quantity: u32) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET count_in_stock = count_in_stock + $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(product_id.as_str())
        .bind(to_db_count(quantity)?)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ProductNotFound(product_id.clone()));
        }
        Ok(())
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        let document = serde_json::to_value(order)?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, status, payment_status, total_price_cents, version, created_at, updated_at, document)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.user_id().as_uuid())
        .bind(order.status().as_str())
        .bind(order.payment_status().as_str())
        .bind(order.total_price().cents())
        .bind(to_db_version(order.version())?)
        .bind(order.created_at())
        .bind(order.updated_at())
        .bind(document)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StoreError::DuplicateOrder(order.id());
            }
            StoreError::from(e)
        })?;

        Ok(())
    }

    async fn update_order(&mut self, order: &Order, expected_version: u64) -> Result<()> {
        let document = serde_json::to_value(order)?;

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3, payment_status = $4, version = $5, updated_at = $6, document = $7
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(to_db_version(expected_version)?)
        .bind(order.status().as_str())
        .bind(order.payment_status().as_str())
        .bind(to_db_version(order.version())?)
        .bind(order.updated_at())
        .bind(document)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let actual: Option<i64> = sqlx::query_scalar("SELECT version FROM orders WHERE id = $1")
            .bind(order.id().as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;

        Err(match actual {
            Some(actual) => StoreError::ConcurrencyConflict {
                order_id: order.id(),
                expected: expected_version,
                actual: u64::try_from(actual).unwrap_or(0),
            },
            None => StoreError::OrderNotFound(order.id()),
        })
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        metrics::counter!("store_units_committed_total").increment(1);
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        metrics::counter!("store_units_rolled_back_total").increment(1);
        tracing::debug!("Rolled back unit of work");
        Ok(())
    }
}
