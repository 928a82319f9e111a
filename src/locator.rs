//! Product locator: resolve a product identifier inside a fetched catalog
//!
//! Absence is a valid, reportable result, never an error; the scan engine
//! skips items it cannot locate for a cycle.

use crate::types::{Catalog, ProductRecord};

/// Search order: a top-level category match first (synthesized record with
/// zero quantity and no price), then the first product match across all
/// category product lists.
pub fn locate(catalog: &Catalog, product_id: &str) -> Option<ProductRecord> {
    for category in &catalog.categories {
        if category.id == product_id {
            return Some(ProductRecord {
                id: category.id.clone(),
                name: category.name.clone(),
                price: None,
                amount: 0,
            });
        }
    }

    for category in &catalog.categories {
        for product in &category.products {
            if product.id == product_id {
                return Some(ProductRecord {
                    id: product.id.clone(),
                    name: product.name.clone(),
                    price: product.price,
                    amount: product.amount,
                });
            }
        }
    }

    None
}
