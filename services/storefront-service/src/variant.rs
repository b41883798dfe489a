// =============================================================================
// VARIANT & IMAGE SELECTION
// =============================================================================
// Each product card has exactly one active variant per session: the one the
// customer last picked, or the first variant, or (no variants) the product
// itself. `VariantSelections` is the only place that mapping lives, and every
// read goes through `active`, so the images, stock and index handed out
// always come from the same variant.
// =============================================================================

use std::collections::HashMap;

use crate::error::{AppError, AppResult};
use crate::models::{CartLineItem, DisplayUnit, Product};

/// Per-session "selected variant index" keyed by product id
#[derive(Debug, Clone, Default)]
pub struct VariantSelections {
    selected: HashMap<String, usize>,
}

impl VariantSelections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve what the product card shows right now.
    ///
    /// A stored index beyond the product's current variant list (the product
    /// was edited since) resolves to the first variant.
    pub fn active(&self, product: &Product) -> DisplayUnit {
        if !product.has_color_variants || product.color_variants.is_empty() {
            return DisplayUnit {
                product_id: product.id.clone(),
                variant_index: None,
                color_name: None,
                color_hex: None,
                images: product.images.clone(),
                stock: product.stock,
            };
        }

        let index = self
            .selected
            .get(&product.id)
            .copied()
            .filter(|&i| i < product.color_variants.len())
            .unwrap_or(0);
        let variant = &product.color_variants[index];

        // A variant without its own images shows the product's
        let images = if variant.images.is_empty() {
            product.images.clone()
        } else {
            variant.images.clone()
        };

        DisplayUnit {
            product_id: product.id.clone(),
            variant_index: Some(index),
            color_name: Some(variant.color_name.clone()),
            color_hex: Some(variant.color_hex.clone()),
            images,
            stock: variant.stock,
        }
    }

    /// Make variant `index` the active one and return its display unit.
    /// An out-of-range index leaves the current selection untouched.
    pub fn select(&mut self, product: &Product, index: usize) -> AppResult<DisplayUnit> {
        if !product.has_color_variants || index >= product.color_variants.len() {
            return Err(AppError::Validation(format!(
                "Product {} has no color variant #{}",
                product.id, index
            )));
        }

        self.selected.insert(product.id.clone(), index);
        Ok(self.active(product))
    }

    /// Snapshot the product, as currently displayed, into a cart line with
    /// quantity 1. Refused when the active variant (or product) has no stock.
    pub fn line_item_for(&self, product: &Product) -> AppResult<CartLineItem> {
        let unit = self.active(product);

        if unit.stock == 0 {
            let what = match &unit.color_name {
                Some(color) => format!("{} ({})", product.name, color),
                None => product.name.clone(),
            };
            return Err(AppError::OutOfStock(what));
        }

        let image = unit
            .images
            .first()
            .cloned()
            .or_else(|| product.primary_image().map(str::to_owned))
            .unwrap_or_default();

        Ok(CartLineItem {
            product_id: product.id.clone(),
            sku: product.sku.clone(),
            name: product.name.clone(),
            category: product.category.clone(),
            size: product.size.clone(),
            price: product.price,
            image,
            quantity: 1,
            selected_color: unit.color_name,
            selected_color_hex: unit.color_hex,
        })
    }
}
