//! Catalog products.

use serde::{Deserialize, Serialize};

use crate::order::{Money, ProductId};

/// A catalog product.
///
/// `count_in_stock` is the contended resource: checkout is the only writer
/// and it only ever changes it through the store's conditional update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    pub price: Money,
    pub count_in_stock: u32,
}

impl Product {
    pub fn new(
        id: impl Into<ProductId>,
        name: impl Into<String>,
        price: Money,
        count_in_stock: u32,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            image: String::new(),
            description: String::new(),
            category: String::new(),
            price,
            count_in_stock,
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn with_category(
        mut self,
        category: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.category = category.into();
        self.description = description.into();
        self
    }
}

/// The sample catalog loaded into a fresh in-memory store.
pub fn sample_catalog() -> Vec<Product> {
    vec![
        Product::new(
            "chocolate-fudge",
            "Chocolate Fudge",
            Money::from_cents(999),
            10,
        )
        .with_image("/uploads/Chocolate-fudge.png")
        .with_category(
            "Fudge",
            "Rich, dense, and moist chocolate fudge, perfect for a treat.",
        ),
        Product::new(
            "strawberry-macarons",
            "Strawberry Macarons",
            Money::from_cents(1550),
            5,
        )
        .with_image("/uploads/Strawberry-Macarons.png")
        .with_category(
            "Macarons",
            "Delicate and light macarons with a sweet strawberry filling.",
        ),
        Product::new("classic-donuts", "Classic Donuts", Money::from_cents(250), 25)
            .with_image("/uploads/Classic-Donuts.png")
            .with_category("Donuts", "Fluffy, classic donuts with a simple glaze."),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_catalog_has_unique_ids() {
        let catalog = sample_catalog();
        assert_eq!(catalog.len(), 3);
        let mut ids: Vec<_> = catalog.iter().map(|p| p.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_sample_catalog_prices_are_positive() {
        assert!(sample_catalog().iter().all(|p| p.price.is_positive()));
    }
}
