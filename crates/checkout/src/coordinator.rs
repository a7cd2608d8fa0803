//! Order commit coordinator.

use std::future::Future;
use std::str::FromStr;
use std::time::{Duration, Instant};

use chrono::Utc;
use common::{OrderId, UserId};
use domain::{
    Order, OrderStatus, PaymentEvent, PaymentOutcome, PaymentStatus, PaymentTransition,
    PlaceOrder, ValidatedCart,
};
use store::{Page, PageRequest, Store, StoreExt, UnitOfWork};
use thiserror::Error;
use tracing::Instrument;

use crate::error::{CheckoutError, Result};
use crate::payment::{
    IntentStatus, NotificationOutcome, PaymentGateway, PaymentIntent, PaymentNotification,
};
use crate::reservation::ReservationEngine;

/// Bounded retry of a whole unit of work.
///
/// Every attempt starts from a fresh unit; the failed one has already been
/// rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(25);

    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// A single attempt.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Linear backoff before attempt `failed_attempts + 1`.
    fn delay_after(&self, failed_attempts: u32) -> Duration {
        self.backoff.saturating_mul(failed_attempts)
    }

    /// Called after attempt number `failed` ended in `err`. Waits and returns
    /// true if another attempt should be made.
    async fn retry_after(
        &self,
        operation: &'static str,
        failed: u32,
        err: &CheckoutError,
    ) -> bool {
        if !err.is_retryable() || failed >= self.max_attempts {
            return false;
        }
        metrics::counter!("checkout_retries_total", "operation" => operation).increment(1);
        tracing::warn!(operation, attempt = failed, error = %err, "retrying unit of work");
        tokio::time::sleep(self.delay_after(failed)).await;
        true
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS, Self::DEFAULT_BACKOFF)
    }
}

/// What a freshly placed order looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckoutMode {
    /// Orders start unpaid and wait for the gateway.
    #[default]
    AwaitGateway,

    /// Orders are marked paid at placement. Test/bypass setups only.
    ImmediatePaid,
}

impl CheckoutMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutMode::AwaitGateway => "await-gateway",
            CheckoutMode::ImmediatePaid => "immediate-paid",
        }
    }
}

impl std::fmt::Display for CheckoutMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown checkout mode: {0} (expected await-gateway or immediate-paid)")]
pub struct UnknownCheckoutMode(pub String);

impl FromStr for CheckoutMode {
    type Err = UnknownCheckoutMode;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "await-gateway" => Ok(CheckoutMode::AwaitGateway),
            "immediate-paid" => Ok(CheckoutMode::ImmediatePaid),
            _ => Err(UnknownCheckoutMode(s.to_string())),
        }
    }
}

/// Who is asking for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Owner(UserId),
    Admin,
}

impl Access {
    pub fn can_view(&self, order: &Order) -> bool {
        match self {
            Access::Owner(user_id) => order.is_owned_by(*user_id),
            Access::Admin => true,
        }
    }
}

/// Places, cancels and settles orders.
///
/// Every stock-touching operation runs as one unit of work: the stock
/// decrements (or restocks) and the order write commit together or not at
/// all. Those units run on a spawned task, so a caller that goes away
/// mid-checkout cannot leave one half-finished.
pub struct CheckoutCoordinator<S, G>
where
    S: Store,
    G: PaymentGateway,
{
    store: S,
    gateway: G,
    reservations: ReservationEngine,
    retry: RetryPolicy,
    mode: CheckoutMode,
}

impl<S, G> CheckoutCoordinator<S, G>
where
    S: Store + Clone + 'static,
    G: PaymentGateway,
{
    /// Creates a coordinator with the default retry policy and mode.
    pub fn new(store: S, gateway: G) -> Self {
        Self {
            store,
            gateway,
            reservations: ReservationEngine,
            retry: RetryPolicy::default(),
            mode: CheckoutMode::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_mode(mut self, mode: CheckoutMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn mode(&self) -> CheckoutMode {
        self.mode
    }

    /// Validates a cart, reserves its stock and stores the order.
    ///
    /// The billed total is always recomputed from catalog prices. Exactly
    /// one order is created on success; on any failure no stock moves and
    /// no order exists.
    #[tracing::instrument(skip(self, request), fields(%user_id, items = request.items.len()))]
    pub async fn place_order(&self, user_id: UserId, request: PlaceOrder) -> Result<Order> {
        metrics::counter!("checkout_attempts_total").increment(1);
        let started = Instant::now();

        let result = match request.validate() {
            Ok(cart) => {
                let store = self.store.clone();
                let engine = self.reservations;
                let retry = self.retry;
                let mode = self.mode;
                run_detached(async move {
                    let mut failed = 0;
                    loop {
                        match commit_checkout(&store, engine, mode, user_id, &cart).await {
                            Err(err) => {
                                failed += 1;
                                if !retry.retry_after("place_order", failed, &err).await {
                                    return Err(err);
                                }
                            }
                            placed => return placed,
                        }
                    }
                })
                .await
            }
            Err(err) => Err(err.into()),
        };

        metrics::histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());
        match &result {
            Ok(order) => {
                metrics::counter!("checkout_committed_total").increment(1);
                tracing::info!(
                    order_id = %order.id(),
                    total = %order.total_price(),
                    lines = order.lines().len(),
                    "order placed"
                );
            }
            Err(err) => record_rejection("place_order", err),
        }
        result
    }

    /// Loads an order visible to `access`; anything else is not found.
    pub async fn get_order(&self, access: Access, order_id: OrderId) -> Result<Order> {
        load_order(&self.store, access, order_id).await
    }

    /// Orders of one user, newest first.
    pub async fn list_orders_for_user(
        &self,
        user_id: UserId,
        page: PageRequest,
    ) -> Result<Page<Order>> {
        Ok(self.store.list_orders_for_user(user_id, page).await?)
    }

    /// Every order, newest first.
    pub async fn list_orders(&self) -> Result<Vec<Order>> {
        Ok(self.store.list_orders().await?)
    }

    /// Cancels an unpaid order of `user_id` and gives its stock back.
    #[tracing::instrument(skip(self), fields(%user_id, %order_id))]
    pub async fn cancel_order(&self, user_id: UserId, order_id: OrderId) -> Result<Order> {
        let store = self.store.clone();
        let engine = self.reservations;
        let retry = self.retry;

        let result = run_detached(async move {
            let mut failed = 0;
            loop {
                match commit_cancellation(&store, engine, user_id, order_id).await {
                    Err(err) => {
                        failed += 1;
                        if !retry.retry_after("cancel_order", failed, &err).await {
                            return Err(err);
                        }
                    }
                    cancelled => return cancelled,
                }
            }
        })
        .await;

        match &result {
            Ok(_) => tracing::info!("order cancelled, stock restored"),
            Err(err) => record_rejection("cancel_order", err),
        }
        result
    }

    /// Moves a paid order one fulfilment step forward.
    #[tracing::instrument(skip(self), fields(%order_id, target = %target))]
    pub async fn advance_fulfilment(&self, order_id: OrderId, target: OrderStatus) -> Result<Order> {
        let mut failed = 0;
        let result = loop {
            match advance(&self.store, order_id, target).await {
                Err(err) => {
                    failed += 1;
                    if !self.retry.retry_after("advance_fulfilment", failed, &err).await {
                        break Err(err);
                    }
                }
                advanced => break advanced,
            }
        };

        match &result {
            Ok(order) => tracing::info!(status = %order.status(), "fulfilment advanced"),
            Err(err) => record_rejection("advance_fulfilment", err),
        }
        result
    }

    /// Asks the gateway for an intent over the stored order total.
    #[tracing::instrument(skip(self), fields(%user_id, %order_id))]
    pub async fn create_payment_intent(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<PaymentIntent> {
        let order = load_order(&self.store, Access::Owner(user_id), order_id).await?;

        if order.payment_status() == PaymentStatus::Completed || !order.status().accepts_payment()
        {
            return Err(CheckoutError::PaymentNotAccepted {
                order_id,
                payment_status: order.payment_status(),
            });
        }
        if !order.total_price().is_positive() {
            return Err(CheckoutError::InvalidPaymentAmount);
        }

        let intent = self
            .gateway
            .create_intent(order_id, order.total_price())
            .await?;
        tracing::info!(intent_id = %intent.id, amount = %intent.amount, "payment intent created");
        Ok(intent)
    }

    /// Checks an intent with the gateway and records the payment if it
    /// went through.
    #[tracing::instrument(skip(self), fields(%user_id, %order_id))]
    pub async fn confirm_payment(
        &self,
        user_id: UserId,
        order_id: OrderId,
        intent_id: &str,
    ) -> Result<Order> {
        let order = load_order(&self.store, Access::Owner(user_id), order_id).await?;
        let intent = self.gateway.retrieve_intent(intent_id).await?;

        if intent.order_id != order.id() {
            return Err(CheckoutError::PaymentMismatch {
                intent_id: intent.id,
                order_id,
            });
        }
        if intent.status != IntentStatus::Succeeded {
            return Err(CheckoutError::PaymentNotCompleted {
                status: intent.status.to_string(),
            });
        }

        let (order, _) = self
            .apply_payment_event(&PaymentEvent::succeeded(order_id, intent.id))
            .await?;
        Ok(order)
    }

    /// Applies a gateway notification. Types other than a settled or
    /// declined charge are acknowledged and ignored.
    #[tracing::instrument(skip(self, notification), fields(kind = %notification.kind, intent_id = %notification.data.id))]
    pub async fn handle_notification(
        &self,
        notification: &PaymentNotification,
    ) -> Result<NotificationOutcome> {
        let Some(event) = notification.to_event() else {
            tracing::info!("ignoring gateway notification");
            return Ok(NotificationOutcome::Ignored);
        };

        let (_, transition) = self.apply_payment_event(&event).await?;
        Ok(match transition {
            PaymentTransition::Applied => NotificationOutcome::Applied,
            PaymentTransition::AlreadyApplied => NotificationOutcome::Duplicate,
        })
    }

    /// Records a payment outcome on an existing order. Never touches stock.
    #[tracing::instrument(
        skip(self, event),
        fields(order_id = %event.order_id, transaction_id = %event.transaction_id, outcome = ?event.outcome)
    )]
    pub async fn apply_payment_event(
        &self,
        event: &PaymentEvent,
    ) -> Result<(Order, PaymentTransition)> {
        let mut failed = 0;
        let result = loop {
            match record_payment(&self.store, event).await {
                Err(err) => {
                    failed += 1;
                    if !self.retry.retry_after("apply_payment", failed, &err).await {
                        break Err(err);
                    }
                }
                recorded => break recorded,
            }
        };

        let outcome = match event.outcome {
            PaymentOutcome::Succeeded => "succeeded",
            PaymentOutcome::Failed => "failed",
        };
        match &result {
            Ok((order, PaymentTransition::Applied)) => {
                metrics::counter!("payment_events_total", "outcome" => outcome, "result" => "applied")
                    .increment(1);
                tracing::info!(
                    status = %order.status(),
                    payment_status = %order.payment_status(),
                    "payment recorded"
                );
            }
            Ok((_, PaymentTransition::AlreadyApplied)) => {
                metrics::counter!("payment_events_total", "outcome" => outcome, "result" => "duplicate")
                    .increment(1);
                tracing::debug!("payment already recorded");
            }
            Err(err) => {
                metrics::counter!("payment_events_total", "outcome" => outcome, "result" => "rejected")
                    .increment(1);
                record_rejection("apply_payment", err);
            }
        }
        result
    }
}

/// Runs `fut` to completion on its own task, even if the caller is dropped.
async fn run_detached<T, F>(fut: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(fut.in_current_span())
        .await
        .map_err(|err| CheckoutError::Internal(err.to_string()))?
}

fn record_rejection(operation: &'static str, err: &CheckoutError) {
    metrics::counter!("checkout_rejected_total", "operation" => operation, "reason" => err.reason())
        .increment(1);
    if err.is_client_error() {
        tracing::warn!(operation, reason = err.reason(), error = %err, "request rejected");
    } else {
        tracing::error!(operation, reason = err.reason(), error = %err, "request failed");
    }
}

async fn load_order<S: Store>(store: &S, access: Access, order_id: OrderId) -> Result<Order> {
    store
        .get_order(order_id)
        .await?
        .filter(|order| access.can_view(order))
        .ok_or(CheckoutError::OrderNotFound(order_id))
}

async fn rollback<U: UnitOfWork>(unit: U) {
    if let Err(err) = unit.rollback().await {
        // The store discards the unit anyway once the connection drops it.
        tracing::warn!(error = %err, "rollback failed");
    }
}

async fn commit_checkout<S: Store>(
    store: &S,
    engine: ReservationEngine,
    mode: CheckoutMode,
    user_id: UserId,
    cart: &ValidatedCart,
) -> Result<Order> {
    let mut unit = store.begin().await?;
    match stage_checkout(&mut unit, engine, mode, user_id, cart).await {
        Ok(order) => {
            unit.commit().await?;
            Ok(order)
        }
        Err(err) => {
            rollback(unit).await;
            Err(err)
        }
    }
}

async fn stage_checkout<U: UnitOfWork>(
    unit: &mut U,
    engine: ReservationEngine,
    mode: CheckoutMode,
    user_id: UserId,
    cart: &ValidatedCart,
) -> Result<Order> {
    let reserved = engine.reserve(unit, cart.lines()).await?;
    let mut order = Order::place(
        OrderId::new(),
        user_id,
        reserved.order_lines(),
        cart,
        Utc::now(),
    )?;

    if let Some(submitted) = cart.client_total()
        && submitted != order.total_price()
    {
        tracing::warn!(
            %submitted,
            billed = %order.total_price(),
            "client total differs from catalog total"
        );
    }

    if mode == CheckoutMode::ImmediatePaid {
        let transaction_id = format!("immediate_{}", order.id());
        order.apply_payment(&PaymentEvent::succeeded(order.id(), transaction_id))?;
    }

    unit.insert_order(&order).await?;
    Ok(order)
}

async fn commit_cancellation<S: Store>(
    store: &S,
    engine: ReservationEngine,
    user_id: UserId,
    order_id: OrderId,
) -> Result<Order> {
    let mut order = load_order(store, Access::Owner(user_id), order_id).await?;
    let expected_version = order.version();
    order.cancel(Utc::now())?;

    let mut unit = store.begin().await?;
    match stage_cancellation(&mut unit, engine, &order, expected_version).await {
        Ok(()) => {
            unit.commit().await?;
            Ok(order)
        }
        Err(err) => {
            rollback(unit).await;
            Err(err)
        }
    }
}

async fn stage_cancellation<U: UnitOfWork>(
    unit: &mut U,
    engine: ReservationEngine,
    order: &Order,
    expected_version: u64,
) -> Result<()> {
    engine.restock(unit, order.lines()).await?;
    unit.update_order(order, expected_version).await?;
    Ok(())
}

async fn advance<S: Store>(store: &S, order_id: OrderId, target: OrderStatus) -> Result<Order> {
    let mut order = load_order(store, Access::Admin, order_id).await?;
    let expected_version = order.version();
    order.advance_fulfilment(target, Utc::now())?;
    store.update_order(&order, expected_version).await?;
    Ok(order)
}

async fn record_payment<S: Store>(
    store: &S,
    event: &PaymentEvent,
) -> Result<(Order, PaymentTransition)> {
    let mut order = load_order(store, Access::Admin, event.order_id).await?;
    let expected_version = order.version();

    let transition = order.apply_payment(event)?;
    if transition == PaymentTransition::Applied {
        store.update_order(&order, expected_version).await?;
    }
    Ok((order, transition))
}
