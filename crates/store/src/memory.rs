use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use common::{OrderId, UserId};
use domain::{Order, Product, ProductId};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::{
    Result, StoreError,
    store::{Page, PageRequest, StockDecrement, Store, UnitOfWork},
};

/// A catalog product plus the quantity held by uncommitted units.
#[derive(Debug)]
struct ProductEntry {
    product: Product,
    held: u32,
}

impl ProductEntry {
    /// Stock no open unit holds.
    fn unheld(&self) -> u32 {
        self.product.count_in_stock.saturating_sub(self.held)
    }
}

/// Failure injection for exercising rollback paths.
#[derive(Debug, Default)]
struct Faults {
    fail_on_insert: bool,
    fail_on_commit: bool,
    transient_failures: u32,
}

#[derive(Debug, Default)]
struct InMemoryState {
    products: HashMap<ProductId, ProductEntry>,
    orders: HashMap<OrderId, Order>,
    faults: Faults,
}

impl InMemoryState {
    fn take_transient_failure(&mut self) -> Result<()> {
        if self.faults.transient_failures > 0 {
            self.faults.transient_failures -= 1;
            return Err(StoreError::Transient("connection reset by peer".to_string()));
        }
        Ok(())
    }

    fn release_holds(&mut self, holds: &HashMap<ProductId, u32>) {
        for (product_id, quantity) in holds {
            if let Some(entry) = self.products.get_mut(product_id) {
                entry.held = entry.held.saturating_sub(*quantity);
            }
        }
    }
}

/// How long a decrement waits for other units to let go of held stock.
const DEFAULT_HOLD_WAIT: Duration = Duration::from_secs(2);

/// In-memory store for tests and single-process deployments.
///
/// A stock decrement made inside a unit is recorded as a *hold*. Readers
/// and other units keep seeing the committed `count_in_stock` until the unit
/// commits. A unit whose request is covered by committed stock but blocked
/// by other units' holds waits for them to commit or roll back, like a row
/// lock, and gives up with [`StoreError::Transient`] after the hold wait.
/// The mutex is internal to the store and is never held across an await
/// point.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<InMemoryState>>,
    released: Arc<Notify>,
    hold_wait: Duration,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            released: Arc::new(Notify::new()),
            hold_wait: DEFAULT_HOLD_WAIT,
        }
    }
}

impl InMemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long a decrement waits on stock held by other units.
    pub fn with_hold_wait(mut self, hold_wait: Duration) -> Self {
        self.hold_wait = hold_wait;
        self
    }

    /// Creates a store holding the given products.
    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let store = Self::new();
        {
            let mut state = store.lock();
            for product in products {
                state.products.insert(
                    product.id.clone(),
                    ProductEntry { product, held: 0 },
                );
            }
        }
        store
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryState> {
        lock_state(&self.state)
    }

    /// Makes every following `insert_order` fail.
    pub fn set_fail_on_insert(&self, fail: bool) {
        self.lock().faults.fail_on_insert = fail;
    }

    /// Makes every following `commit` fail with a transient error.
    pub fn set_fail_on_commit(&self, fail: bool) {
        self.lock().faults.fail_on_commit = fail;
    }

    /// Makes the next `count` stock decrements fail with a transient error.
    pub fn inject_transient_failures(&self, count: u32) {
        self.lock().faults.transient_failures = count;
    }

    /// Returns the committed stock of a product.
    pub fn stock(&self, product_id: &ProductId) -> Option<u32> {
        self.lock()
            .products
            .get(product_id)
            .map(|e| e.product.count_in_stock)
    }

    /// Returns the quantity currently held by uncommitted units.
    pub fn held(&self, product_id: &ProductId) -> u32 {
        self.lock().products.get(product_id).map_or(0, |e| e.held)
    }

    /// Returns the number of committed orders.
    pub fn order_count(&self) -> usize {
        self.lock().orders.len()
    }
}

fn lock_state(state: &Mutex<InMemoryState>) -> MutexGuard<'_, InMemoryState> {
    // A panic elsewhere cannot leave a half-applied unit behind: every unit
    // mutates the state in one critical section.
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn newest_first(orders: &mut [Order]) {
    orders.sort_by(|a, b| {
        b.created_at()
            .cmp(&a.created_at())
            .then(b.id().cmp(&a.id()))
    });
}

#[async_trait]
impl Store for InMemoryStore {
    type Unit = InMemoryUnit;

    async fn begin(&self) -> Result<InMemoryUnit> {
        Ok(InMemoryUnit {
            state: self.state.clone(),
            released: self.released.clone(),
            hold_wait: self.hold_wait,
            holds: HashMap::new(),
            restocks: HashMap::new(),
            inserts: Vec::new(),
            updates: Vec::new(),
            finished: false,
        })
    }

    async fn get_product(&self, product_id: &ProductId) -> Result<Option<Product>> {
        Ok(self
            .lock()
            .products
            .get(product_id)
            .map(|e| e.product.clone()))
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        let mut products: Vec<_> = self
            .lock()
            .products
            .values()
            .map(|e| e.product.clone())
            .collect();
        products.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(products)
    }

    async fn upsert_product(&self, product: &Product) -> Result<()> {
        let mut state = self.lock();
        match state.products.get_mut(&product.id) {
            Some(entry) => {
                if product.count_in_stock < entry.held {
                    return Err(StoreError::WriteRejected(format!(
                        "stock of {} cannot drop below the {} units held by open checkouts",
                        product.id, entry.held
                    )));
                }
                entry.product = product.clone();
            }
            None => {
                state.products.insert(
                    product.id.clone(),
                    ProductEntry {
                        product: product.clone(),
                        held: 0,
                    },
                );
            }
        }
        drop(state);
        self.released.notify_waiters();
        Ok(())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.lock().orders.get(&order_id).cloned())
    }

    async fn list_orders_for_user(
        &self,
        user_id: UserId,
        page: PageRequest,
    ) -> Result<Page<Order>> {
        let mut orders: Vec<_> = self
            .lock()
            .orders
            .values()
            .filter(|o| o.is_owned_by(user_id))
            .cloned()
            .collect();
        newest_first(&mut orders);

        let total = orders.len() as u64;
        let items = orders
            .into_iter()
            .skip(usize::try_from(page.offset()).unwrap_or(usize::MAX))
            .take(page.limit() as usize)
            .collect();

        Ok(Page {
            items,
            total,
            request: page,
        })
    }

    async fn list_orders(&self) -> Result<Vec<Order>> {
        let mut orders: Vec<_> = self.lock().orders.values().cloned().collect();
        newest_first(&mut orders);
        Ok(orders)
    }
}

/// Unit of work over an [`InMemoryStore`].
#[derive(Debug)]
pub struct InMemoryUnit {
    state: Arc<Mutex<InMemoryState>>,
    released: Arc<Notify>,
    hold_wait: Duration,
    holds: HashMap<ProductId, u32>,
    restocks: HashMap<ProductId, u32>,
    inserts: Vec<Order>,
    updates: Vec<(Order, u64)>,
    finished: bool,
}

impl InMemoryUnit {
    /// Checks every pending write against the committed state.
    fn conflict(&self, state: &InMemoryState) -> Option<StoreError> {
        if let Some(order) = self.inserts.iter().find(|o| state.orders.contains_key(&o.id())) {
            return Some(StoreError::DuplicateOrder(order.id()));
        }
        for (order, expected) in &self.updates {
            match state.orders.get(&order.id()).map(Order::version) {
                Some(actual) if actual == *expected => {}
                Some(actual) => {
                    return Some(StoreError::ConcurrencyConflict {
                        order_id: order.id(),
                        expected: *expected,
                        actual,
                    });
                }
                None => return Some(StoreError::OrderNotFound(order.id())),
            }
        }
        self.restocks
            .keys()
            .find(|id| !state.products.contains_key(*id))
            .map(|id| StoreError::ProductNotFound(id.clone()))
    }

    fn discard(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        lock_state(&self.state).release_holds(&self.holds);
        self.holds.clear();
        self.released.notify_waiters();
        metrics::counter!("store_units_rolled_back_total").increment(1);
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnit {
    async fn decrement_stock(
        &mut self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<StockDecrement> {
        lock_state(&self.state).take_transient_failure()?;

        let released = Arc::clone(&self.released);
        let deadline = Instant::now() + self.hold_wait;
        let own = self.holds.get(product_id).copied().unwrap_or(0);

        loop {
            // Registered before the check so a release in between still wakes us.
            let notified = released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = lock_state(&self.state);
                let Some(entry) = state.products.get_mut(product_id) else {
                    return Ok(StockDecrement::NotFound);
                };

                // What this unit sees: committed stock minus its own holds.
                let available = entry.product.count_in_stock.saturating_sub(own);
                if available < quantity {
                    return Ok(StockDecrement::Insufficient { available });
                }

                if entry.unheld() >= quantity {
                    entry.held += quantity;
                    let remaining = available - quantity;
                    let product = Product {
                        count_in_stock: remaining,
                        ..entry.product.clone()
                    };
                    drop(state);

                    *self.holds.entry(product_id.clone()).or_default() += quantity;
                    return Ok(StockDecrement::Reserved { product, remaining });
                }
            }

            tracing::debug!(%product_id, quantity, "waiting for stock held by another unit");
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                metrics::counter!("store_hold_wait_timeouts_total").increment(1);
                return Err(StoreError::Transient(format!(
                    "stock of {product_id} is held by another checkout"
                )));
            }
        }
    }

    async fn release_stock(&mut self, product_id: &ProductId, quantity: u32) -> Result<()> {
        let mut state = lock_state(&self.state);
        let Some(entry) = state.products.get_mut(product_id) else {
            return Err(StoreError::ProductNotFound(product_id.clone()));
        };

        // Undo this unit's own hold first, restock whatever is left at commit.
        let held_here = self.holds.get(product_id).copied().unwrap_or(0);
        let from_hold = held_here.min(quantity);
        entry.held = entry.held.saturating_sub(from_hold);
        drop(state);

        if from_hold > 0 {
            if from_hold == held_here {
                self.holds.remove(product_id);
            } else if let Some(h) = self.holds.get_mut(product_id) {
                *h -= from_hold;
            }
            self.released.notify_waiters();
        }
        let rest = quantity - from_hold;
        if rest > 0 {
            *self.restocks.entry(product_id.clone()).or_default() += rest;
        }
        Ok(())
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        let state = lock_state(&self.state);
        if state.faults.fail_on_insert {
            return Err(StoreError::WriteRejected(
                "order collection refused the write".to_string(),
            ));
        }
        if state.orders.contains_key(&order.id()) {
            return Err(StoreError::DuplicateOrder(order.id()));
        }
        drop(state);

        self.inserts.push(order.clone());
        Ok(())
    }

    async fn update_order(&mut self, order: &Order, expected_version: u64) -> Result<()> {
        let state = lock_state(&self.state);
        match state.orders.get(&order.id()) {
            None => return Err(StoreError::OrderNotFound(order.id())),
            Some(current) if current.version() != expected_version => {
                return Err(StoreError::ConcurrencyConflict {
                    order_id: order.id(),
                    expected: expected_version,
                    actual: current.version(),
                });
            }
            Some(_) => {}
        }
        drop(state);

        self.updates.push((order.clone(), expected_version));
        Ok(())
    }

    async fn commit(mut self) -> Result<()> {
        let mut state = lock_state(&self.state);

        if state.faults.fail_on_commit {
            drop(state);
            self.discard();
            return Err(StoreError::Transient("commit interrupted".to_string()));
        }

        if let Some(err) = self.conflict(&state) {
            drop(state);
            self.discard();
            return Err(err);
        }

        for (product_id, quantity) in &self.holds {
            if let Some(entry) = state.products.get_mut(product_id) {
                entry.held = entry.held.saturating_sub(*quantity);
                entry.product.count_in_stock =
                    entry.product.count_in_stock.saturating_sub(*quantity);
            }
        }
        for (product_id, quantity) in &self.restocks {
            if let Some(entry) = state.products.get_mut(product_id) {
                entry.product.count_in_stock =
                    entry.product.count_in_stock.saturating_add(*quantity);
            }
        }
        for order in self.inserts.drain(..) {
            state.orders.insert(order.id(), order);
        }
        for (order, _) in self.updates.drain(..) {
            state.orders.insert(order.id(), order);
        }

        self.finished = true;
        drop(state);
        self.released.notify_waiters();
        metrics::counter!("store_units_committed_total").increment(1);
        Ok(())
    }

    async fn rollback(mut self) -> Result<()> {
        self.discard();
        Ok(())
    }
}

impl Drop for InMemoryUnit {
    fn drop(&mut self) {
        self.discard();
    }
}
