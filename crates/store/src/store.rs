use async_trait::async_trait;
use common::{OrderId, UserId};
use domain::{Order, Product, ProductId};

use crate::{Result, StoreError};

/// Outcome of a conditional stock decrement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StockDecrement {
    /// The stock covered the request and was decremented.
    ///
    /// `product` is the catalog record as seen by this unit after the
    /// decrement, so its `count_in_stock` equals `remaining`.
    Reserved { product: Product, remaining: u32 },

    /// Nothing was changed; `available` is what the product had.
    Insufficient { available: u32 },

    NotFound,
}

/// One atomic unit of work against the store.
///
/// Writes made through a unit are invisible to every other reader until
/// [`commit`](UnitOfWork::commit) succeeds. [`rollback`](UnitOfWork::rollback)
/// or dropping the unit discards all of them.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Decrements `product_id` by `quantity` if and only if the stock covers
    /// it, as a single atomic check-and-write.
    async fn decrement_stock(
        &mut self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<StockDecrement>;

    /// Adds `quantity` back to a product.
    async fn release_stock(&mut self, product_id: &ProductId, quantity: u32) -> Result<()>;

    /// Inserts a new order.
    async fn insert_order(&mut self, order: &Order) -> Result<()>;

    /// Replaces an order, failing with `ConcurrencyConflict` if its stored
    /// version is no longer `expected_version`.
    async fn update_order(&mut self, order: &Order, expected_version: u64) -> Result<()>;

    /// Makes every write of this unit visible at once.
    async fn commit(self) -> Result<()>;

    /// Discards every write of this unit.
    async fn rollback(self) -> Result<()>;
}

/// Paging parameters, `page` is 1-based.
///
/// Only [`PageRequest::new`] builds one, so `page >= 1` and
/// `1 <= limit <= MAX_LIMIT` always hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    limit: u32,
}

impl PageRequest {
    pub const DEFAULT_LIMIT: u32 = 10;
    pub const MAX_LIMIT: u32 = 100;

    /// Clamps `page` to at least 1 and `limit` to `1..=MAX_LIMIT`.
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, Self::MAX_LIMIT),
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, Self::DEFAULT_LIMIT)
    }
}

/// One page of results.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub request: PageRequest,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        self.total.div_ceil(u64::from(self.request.limit.max(1)))
    }

    pub fn has_next(&self) -> bool {
        u64::from(self.request.page) < self.total_pages()
    }

    pub fn has_prev(&self) -> bool {
        self.request.page > 1
    }
}

/// Catalog and order storage.
///
/// Reads outside a unit of work only ever see committed data.
#[async_trait]
pub trait Store: Send + Sync {
    type Unit: UnitOfWork + 'static;

    /// Starts a new unit of work.
    async fn begin(&self) -> Result<Self::Unit>;

    async fn get_product(&self, product_id: &ProductId) -> Result<Option<Product>>;

    async fn list_products(&self) -> Result<Vec<Product>>;

    /// Inserts or replaces a catalog product.
    async fn upsert_product(&self, product: &Product) -> Result<()>;

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Orders of one user, newest first.
    async fn list_orders_for_user(&self, user_id: UserId, page: PageRequest)
    -> Result<Page<Order>>;

    /// Every order, newest first.
    async fn list_orders(&self) -> Result<Vec<Order>>;
}

/// Extension trait providing convenience methods for stores.
#[async_trait]
pub trait StoreExt: Store {
    /// Replaces an order in a unit of its own.
    async fn update_order(&self, order: &Order, expected_version: u64) -> Result<()> {
        let mut unit = self.begin().await?;
        unit.update_order(order, expected_version).await?;
        unit.commit().await
    }

    /// Committed stock of a product.
    async fn stock_of(&self, product_id: &ProductId) -> Result<u32> {
        self.get_product(product_id)
            .await?
            .map(|p| p.count_in_stock)
            .ok_or_else(|| StoreError::ProductNotFound(product_id.clone()))
    }
}

// Blanket implementation for all Store implementations
impl<T: Store + ?Sized> StoreExt for T {}
