//! Checkout input: the raw request shape and its validated form.

use serde::{Deserialize, Serialize};

use super::{Money, OrderError, PaymentMethod, ProductId, ShippingAddress};

/// Maximum length of the free-form order notes.
pub const MAX_NOTES_LEN: usize = 500;

/// One requested cart line as submitted by the client.
///
/// `price_cents` is what the client believes the unit price is. It is only
/// used to cross-check the submitted total; the catalog price is billed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLineInput {
    pub product_id: String,

    #[serde(alias = "qty")]
    pub quantity: i64,

    #[serde(default)]
    pub price_cents: Option<i64>,
}

impl CartLineInput {
    pub fn new(product_id: impl Into<String>, quantity: i64) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            price_cents: None,
        }
    }

    /// Attaches the client-side unit price.
    pub fn with_price(mut self, price_cents: i64) -> Self {
        self.price_cents = Some(price_cents);
        self
    }
}

/// Body of a checkout request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    #[serde(default)]
    pub items: Vec<CartLineInput>,

    #[serde(default)]
    pub shipping_address: ShippingAddress,

    #[serde(default)]
    pub payment_method: PaymentMethod,

    /// Client-computed total, advisory only.
    #[serde(default)]
    pub total_price_cents: Option<i64>,

    #[serde(default)]
    pub notes: Option<String>,
}

impl PlaceOrder {
    /// Creates a request with default shipping and payment method.
    pub fn new(items: Vec<CartLineInput>) -> Self {
        Self {
            items,
            shipping_address: ShippingAddress::default(),
            payment_method: PaymentMethod::default(),
            total_price_cents: None,
            notes: None,
        }
    }

    pub fn with_total(mut self, total_cents: i64) -> Self {
        self.total_price_cents = Some(total_cents);
        self
    }

    pub fn with_shipping_address(mut self, address: ShippingAddress) -> Self {
        self.shipping_address = address;
        self
    }

    /// Checks the request shape before anything touches the store.
    ///
    /// Rejects an empty cart, non-positive quantities, negative prices and a
    /// submitted total that disagrees with the submitted line prices.
    pub fn validate(self) -> Result<ValidatedCart, OrderError> {
        if self.items.is_empty() {
            return Err(OrderError::EmptyCart);
        }

        let mut lines = Vec::with_capacity(self.items.len());
        // Only known when every line carries a client price.
        let mut submitted_subtotal = Some(Money::zero());

        for item in self.items {
            let product_id = item.product_id.trim();
            if product_id.is_empty() {
                return Err(OrderError::MissingProductId);
            }
            let product_id = ProductId::new(product_id);

            let quantity = u32::try_from(item.quantity)
                .ok()
                .filter(|q| *q > 0)
                .ok_or_else(|| OrderError::InvalidQuantity {
                    product_id: product_id.clone(),
                    quantity: item.quantity,
                })?;

            let client_price = match item.price_cents {
                Some(cents) if cents < 0 => {
                    return Err(OrderError::InvalidPrice {
                        product_id,
                        price_cents: cents,
                    });
                }
                Some(cents) => Some(Money::from_cents(cents)),
                None => None,
            };

            submitted_subtotal = match (submitted_subtotal, client_price) {
                (Some(acc), Some(price)) => Some(
                    price
                        .checked_multiply(quantity)
                        .and_then(|line| acc.checked_add(line))
                        .ok_or(OrderError::AmountOverflow)?,
                ),
                _ => None,
            };

            lines.push(CartLine {
                product_id,
                quantity,
                client_price,
            });
        }

        let client_total = match self.total_price_cents {
            Some(cents) if cents < 0 => return Err(OrderError::InvalidTotal { cents }),
            Some(cents) => Some(Money::from_cents(cents)),
            None => None,
        };

        if let (Some(submitted), Some(computed)) = (client_total, submitted_subtotal)
            && submitted != computed
        {
            return Err(OrderError::TotalMismatch {
                submitted,
                computed,
            });
        }

        if self.payment_method.as_str().trim().is_empty() {
            return Err(OrderError::MissingPaymentMethod);
        }

        if let Some(notes) = &self.notes
            && notes.chars().count() > MAX_NOTES_LEN
        {
            return Err(OrderError::NotesTooLong {
                max: MAX_NOTES_LEN,
            });
        }

        Ok(ValidatedCart {
            lines,
            shipping_address: self.shipping_address,
            payment_method: self.payment_method,
            client_total,
            notes: self.notes,
        })
    }
}

/// A requested line that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: u32,
    pub client_price: Option<Money>,
}

impl CartLine {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            client_price: None,
        }
    }
}

/// A checkout request that passed validation. Only `PlaceOrder::validate`
/// builds one, so holders can rely on a non-empty cart with positive
/// quantities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCart {
    lines: Vec<CartLine>,
    shipping_address: ShippingAddress,
    payment_method: PaymentMethod,
    client_total: Option<Money>,
    notes: Option<String>,
}

impl ValidatedCart {
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn shipping_address(&self) -> &ShippingAddress {
        &self.shipping_address
    }

    pub fn payment_method(&self) -> &PaymentMethod {
        &self.payment_method
    }

    /// The total the client submitted, if any.
    pub fn client_total(&self) -> Option<Money> {
        self.client_total
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }
}
