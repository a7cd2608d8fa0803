//! Inventory reservation engine.

use domain::{CartLine, OrderLine, Product};
use store::{StockDecrement, UnitOfWork};

use crate::error::{Result, StockError};

/// One reserved cart line with the catalog snapshot taken at reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedLine {
    pub product: Product,
    pub quantity: u32,
}

impl ReservedLine {
    /// Freezes the snapshot into an order line. The catalog price is billed.
    pub fn to_order_line(&self) -> OrderLine {
        OrderLine {
            product_id: self.product.id.clone(),
            name: self.product.name.clone(),
            image: self.product.image.clone(),
            unit_price: self.product.price,
            quantity: self.quantity,
        }
    }
}

/// Every line of a cart, reserved in cart order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservedSet {
    lines: Vec<ReservedLine>,
}

impl ReservedSet {
    pub fn lines(&self) -> &[ReservedLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn order_lines(&self) -> Vec<OrderLine> {
        self.lines.iter().map(ReservedLine::to_order_line).collect()
    }
}

/// Reserves stock for cart lines inside a unit of work.
///
/// Each line is one conditional decrement in the store. No stock value is
/// ever read and written back.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReservationEngine;

impl ReservationEngine {
    /// Reserves every line or none.
    ///
    /// On the first line that cannot be covered, the lines reserved so far
    /// are released in reverse order before the [`StockError`] is returned.
    /// A failing release is logged and never masks that error.
    #[tracing::instrument(skip(self, unit, lines), fields(lines = lines.len()))]
    pub async fn reserve<U>(&self, unit: &mut U, lines: &[CartLine]) -> Result<ReservedSet>
    where
        U: UnitOfWork + ?Sized,
    {
        let mut reserved = ReservedSet {
            lines: Vec::with_capacity(lines.len()),
        };

        for line in lines {
            let outcome = match unit.decrement_stock(&line.product_id, line.quantity).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    self.unwind(unit, &reserved).await;
                    return Err(err.into());
                }
            };

            let failure = match outcome {
                StockDecrement::Reserved { product, remaining } => {
                    tracing::debug!(
                        product_id = %line.product_id,
                        quantity = line.quantity,
                        remaining,
                        "stock reserved"
                    );
                    reserved.lines.push(ReservedLine {
                        product,
                        quantity: line.quantity,
                    });
                    continue;
                }
                StockDecrement::Insufficient { available } => StockError::InsufficientStock {
                    product_id: line.product_id.clone(),
                    requested: line.quantity,
                    available,
                },
                StockDecrement::NotFound => StockError::ProductNotFound {
                    product_id: line.product_id.clone(),
                },
            };

            tracing::warn!(
                product_id = %failure.product_id(),
                released = reserved.len(),
                error = %failure,
                "reservation failed, releasing earlier lines"
            );
            self.unwind(unit, &reserved).await;
            return Err(failure.into());
        }

        Ok(reserved)
    }

    /// Gives back every line of `reserved`, newest first.
    pub async fn release<U>(&self, unit: &mut U, reserved: &ReservedSet) -> Result<()>
    where
        U: UnitOfWork + ?Sized,
    {
        for line in reserved.lines.iter().rev() {
            unit.release_stock(&line.product.id, line.quantity).await?;
        }
        Ok(())
    }

    /// Best-effort release on a failure path. The caller rolls the unit back
    /// on error, so a release failure here only needs reporting.
    async fn unwind<U>(&self, unit: &mut U, reserved: &ReservedSet)
    where
        U: UnitOfWork + ?Sized,
    {
        if let Err(err) = self.release(unit, reserved).await {
            tracing::error!(
                error = %err,
                lines = reserved.len(),
                "failed to release reserved lines"
            );
        }
    }

    /// Returns the stock of order lines, e.g. for a cancelled order.
    pub async fn restock<U>(&self, unit: &mut U, lines: &[OrderLine]) -> Result<()>
    where
        U: UnitOfWork + ?Sized,
    {
        for line in lines.iter().rev() {
            unit.release_stock(&line.product_id, line.quantity).await?;
        }
        Ok(())
    }
}
