//! The placed-order record.

use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use serde::{Deserialize, Serialize};

use super::{
    Money, OrderError, OrderLine, OrderStatus, PaymentEvent, PaymentMethod, PaymentOutcome,
    PaymentStatus, PaymentTransition, ShippingAddress, ValidatedCart,
};

/// A placed order.
///
/// Only built by [`Order::place`] from lines whose stock has been reserved.
/// Lines and total never change afterwards; `status` and `payment_status`
/// move through the transition methods, each of which bumps `version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    user_id: UserId,
    lines: Vec<OrderLine>,
    total_price: Money,
    shipping_address: ShippingAddress,
    payment_method: PaymentMethod,
    notes: Option<String>,
    status: OrderStatus,
    payment_status: PaymentStatus,
    payment_transaction_id: Option<String>,
    paid_at: Option<DateTime<Utc>>,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds a new pending order from reserved lines.
    ///
    /// The total is always recomputed here from `unit_price * quantity`.
    pub fn place(
        id: OrderId,
        user_id: UserId,
        lines: Vec<OrderLine>,
        cart: &ValidatedCart,
        now: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        if lines.is_empty() {
            return Err(OrderError::EmptyCart);
        }

        let total_price = lines
            .iter()
            .try_fold(Money::zero(), |acc, line| {
                line.line_total().and_then(|t| acc.checked_add(t))
            })
            .ok_or(OrderError::AmountOverflow)?;

        Ok(Self {
            id,
            user_id,
            lines,
            total_price,
            shipping_address: cart.shipping_address().clone(),
            payment_method: cart.payment_method().clone(),
            notes: cart.notes().map(str::to_string),
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_transaction_id: None,
            paid_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn total_price(&self) -> Money {
        self.total_price
    }

    pub fn shipping_address(&self) -> &ShippingAddress {
        &self.shipping_address
    }

    pub fn payment_method(&self) -> &PaymentMethod {
        &self.payment_method
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn payment_transaction_id(&self) -> Option<&str> {
        self.payment_transaction_id.as_deref()
    }

    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        self.paid_at
    }

    /// Store revision, starting at 1 and bumped by every transition.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }

    /// Records a gateway outcome.
    ///
    /// Redelivery of an already recorded outcome for the same transaction is
    /// reported as [`PaymentTransition::AlreadyApplied`] and changes nothing.
    pub fn apply_payment(&mut self, event: &PaymentEvent) -> Result<PaymentTransition, OrderError> {
        let same_transaction =
            self.payment_transaction_id.as_deref() == Some(event.transaction_id.as_str());

        match event.outcome {
            PaymentOutcome::Succeeded => {
                if self.payment_status == PaymentStatus::Completed {
                    if same_transaction {
                        return Ok(PaymentTransition::AlreadyApplied);
                    }
                    return Err(OrderError::PaymentAlreadyCompleted {
                        transaction_id: self.payment_transaction_id.clone().unwrap_or_default(),
                    });
                }
                if !self.status.accepts_payment() {
                    return Err(OrderError::InvalidStateTransition {
                        current_state: self.status,
                        action: "record a payment",
                    });
                }
                self.payment_status = PaymentStatus::Completed;
                self.status = OrderStatus::Confirmed;
                self.paid_at = Some(event.occurred_at);
            }
            PaymentOutcome::Failed => {
                if self.payment_status == PaymentStatus::Failed && same_transaction {
                    return Ok(PaymentTransition::AlreadyApplied);
                }
                if self.payment_status == PaymentStatus::Completed
                    || !self.status.accepts_payment()
                {
                    return Err(OrderError::InvalidStateTransition {
                        current_state: self.status,
                        action: "record a failed payment",
                    });
                }
                self.payment_status = PaymentStatus::Failed;
                self.status = OrderStatus::PaymentFailed;
            }
        }

        self.payment_transaction_id = Some(event.transaction_id.clone());
        self.touch(event.occurred_at);
        Ok(PaymentTransition::Applied)
    }

    /// Cancels an unpaid order. The caller returns the stock.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), OrderError> {
        if !self.status.can_cancel() {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action: "cancel",
            });
        }
        self.status = OrderStatus::Cancelled;
        self.touch(now);
        Ok(())
    }

    /// Moves a paid order one fulfilment step forward.
    pub fn advance_fulfilment(
        &mut self,
        target: OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        if self.status.next_fulfilment_step() != Some(target) {
            return Err(OrderError::InvalidFulfilmentStep {
                from: self.status,
                to: target,
            });
        }
        self.status = target;
        self.touch(now);
        Ok(())
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = now;
    }
}
