// =============================================================================
// PRODUCT CATALOG
// =============================================================================
// Admin-managed products, read-only to the storefront.
//
// Single-product reads go through the Redis cache when one is configured;
// updates and deletes invalidate the cached entry. Deleting a product never
// touches orders or carts, which carry their own snapshot of it.
// =============================================================================

use std::collections::HashSet;

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::cache::ProductCache;
use crate::error::{AppError, AppResult};
use crate::models::{ColorVariant, Product, ProductInput};
use crate::sync::{collections, Filter, SyncLayer};
use crate::validation::is_valid_color_hex;

/// Category filter value that matches every product
pub const ALL_CATEGORIES: &str = "all";

#[derive(Clone)]
pub struct ProductCatalog {
    sync: SyncLayer,
    cache: ProductCache,
}

impl ProductCatalog {
    pub fn new(sync: SyncLayer, cache: ProductCache) -> Self {
        Self { sync, cache }
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Products, newest first. `None` or `"all"` lists everything.
    pub async fn list_products(&self, category: Option<&str>) -> AppResult<Vec<Product>> {
        let filter = category
            .map(str::trim)
            .filter(|c| !c.is_empty() && *c != ALL_CATEGORIES)
            .map(|c| Filter::eq("category", c));

        let mut products: Vec<Product> = self
            .sync
            .query(collections::PRODUCTS, filter.as_ref())
            .await?;

        products.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(products)
    }

    pub async fn get_product(&self, id: &str) -> AppResult<Product> {
        if let Some(product) = self.cache.get(id).await {
            tracing::debug!(product_id = %id, "Cache hit");
            return Ok(product);
        }

        let product = self.load(id).await?;
        self.cache.put(&product).await;

        Ok(product)
    }

    /// Uncached read
    async fn load(&self, id: &str) -> AppResult<Product> {
        self.sync
            .get::<Product>(collections::PRODUCTS, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Product {} not found", id)))
    }

    pub async fn count_in_category(&self, category: &str) -> AppResult<usize> {
        Ok(self.list_products(Some(category)).await?.len())
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    pub async fn create_product(&self, input: ProductInput) -> AppResult<Product> {
        validate_input(&input)?;
        self.ensure_sku_free(input.sku.trim(), None).await?;

        let id = Uuid::new_v4().simple().to_string();
        let now = Utc::now();
        let product = build_product(id, input, &[], now, now);

        self.sync
            .put(collections::PRODUCTS, Some(&product.id), &product)
            .await?;

        tracing::info!(product_id = %product.id, sku = %product.sku, "Product created");
        Ok(product)
    }

    /// Replace a product's fields. `createdAt` is kept, and so are the ids of
    /// variants the input still refers to.
    pub async fn update_product(&self, id: &str, input: ProductInput) -> AppResult<Product> {
        validate_input(&input)?;
        let existing = self.load(id).await?;

        let sku = input.sku.trim();
        if sku != existing.sku {
            self.ensure_sku_free(sku, Some(id)).await?;
        }

        let product = build_product(
            existing.id.clone(),
            input,
            &existing.color_variants,
            existing.created_at,
            Utc::now(),
        );

        self.sync
            .put(collections::PRODUCTS, Some(id), &product)
            .await?;
        self.cache.invalidate(id).await;

        tracing::info!(product_id = %id, "Product updated");
        Ok(product)
    }

    pub async fn delete_product(&self, id: &str) -> AppResult<()> {
        self.load(id).await?;

        self.sync.delete(collections::PRODUCTS, id).await?;
        self.cache.invalidate(id).await;

        tracing::info!(product_id = %id, "Product deleted");
        Ok(())
    }

    async fn ensure_sku_free(&self, sku: &str, except_id: Option<&str>) -> AppResult<()> {
        let holders: Vec<Product> = self
            .sync
            .query(collections::PRODUCTS, Some(&Filter::eq("sku", sku)))
            .await?;

        if holders.iter().any(|p| Some(p.id.as_str()) != except_id) {
            return Err(AppError::Validation(format!("SKU {} already exists", sku)));
        }
        Ok(())
    }
}

// =============================================================================
// INPUT HANDLING
// =============================================================================

fn validate_input(input: &ProductInput) -> AppResult<()> {
    for (field, value) in [("sku", &input.sku), ("name", &input.name), ("category", &input.category)] {
        if value.trim().is_empty() {
            return Err(AppError::Validation(format!("Product {} is required", field)));
        }
    }

    if input.price < Decimal::ZERO {
        return Err(AppError::Validation("Price cannot be negative".into()));
    }

    for variant in &input.color_variants {
        if variant.color_name.trim().is_empty() {
            return Err(AppError::Validation("Every color variant needs a name".into()));
        }
        if !is_valid_color_hex(variant.color_hex.trim()) {
            return Err(AppError::Validation(format!(
                "Invalid color hex {} for {}",
                variant.color_hex, variant.color_name
            )));
        }
    }

    let has_image = input.images.iter().any(|url| !url.trim().is_empty())
        || input
            .color_variants
            .iter()
            .flat_map(|v| &v.images)
            .any(|url| !url.trim().is_empty());

    if !has_image {
        return Err(AppError::Validation("At least one product image is required".into()));
    }

    Ok(())
}

/// Assemble the stored record from validated input.
///
/// `images` is the product's own images followed by every variant image not
/// already listed. With variants, the top-level stock is their sum.
fn build_product(
    id: String,
    input: ProductInput,
    previous_variants: &[ColorVariant],
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
) -> Product {
    let known_ids: HashSet<&str> = previous_variants.iter().map(|v| v.id.as_str()).collect();

    let color_variants: Vec<ColorVariant> = input
        .color_variants
        .into_iter()
        .map(|v| ColorVariant {
            id: v
                .id
                .filter(|id| known_ids.contains(id.as_str()))
                .unwrap_or_else(|| Uuid::new_v4().simple().to_string()),
            color_name: v.color_name.trim().to_owned(),
            color_hex: v.color_hex.trim().to_owned(),
            images: clean_urls(v.images),
            stock: v.stock,
        })
        .collect();

    let mut images = clean_urls(input.images);
    for url in color_variants.iter().flat_map(|v| &v.images) {
        if !images.contains(url) {
            images.push(url.clone());
        }
    }

    let has_color_variants = !color_variants.is_empty();
    let stock = if has_color_variants {
        color_variants.iter().map(|v| v.stock).sum()
    } else {
        input.stock
    };

    Product {
        id,
        sku: input.sku.trim().to_owned(),
        name: input.name.trim().to_owned(),
        category: input.category.trim().to_owned(),
        size: input.size.filter(|s| !s.trim().is_empty()),
        price: input.price,
        stock,
        images,
        description: input.description.filter(|d| !d.trim().is_empty()),
        has_color_variants,
        color_variants,
        created_at,
        updated_at,
    }
}

fn clean_urls(urls: Vec<String>) -> Vec<String> {
    urls.into_iter()
        .map(|url| url.trim().to_owned())
        .filter(|url| !url.is_empty())
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_store::LocalStore;
    use crate::models::ColorVariantInput;
    use std::sync::Arc;
    use std::time::Duration;

    fn catalog() -> ProductCatalog {
        ProductCatalog::new(
            SyncLayer::new(Arc::new(LocalStore::in_memory()), Duration::from_secs(5)),
            ProductCache::disabled(),
        )
    }

    fn input(sku: &str, category: &str) -> ProductInput {
        ProductInput {
            sku: sku.to_string(),
            name: format!("Item {}", sku),
            category: category.to_string(),
            size: Some("L".to_string()),
            price: Decimal::from(499),
            stock: 10,
            images: vec!["https://img.example/front.jpg".to_string()],
            description: None,
            color_variants: vec![],
        }
    }

    fn color(name: &str, hex: &str, stock: u32) -> ColorVariantInput {
        ColorVariantInput {
            id: None,
            color_name: name.to_string(),
            color_hex: hex.to_string(),
            images: vec![format!("https://img.example/{}.jpg", name)],
            stock,
        }
    }

    #[tokio::test]
    async fn test_create_and_filter_by_category() {
        let catalog = catalog();
        catalog.create_product(input("A-1", "shirt")).await.unwrap();
        catalog.create_product(input("A-2", "jeans")).await.unwrap();
        catalog.create_product(input("A-3", "shirt")).await.unwrap();

        assert_eq!(catalog.list_products(None).await.unwrap().len(), 3);
        assert_eq!(catalog.list_products(Some("all")).await.unwrap().len(), 3);
        assert_eq!(catalog.count_in_category("shirt").await.unwrap(), 2);
        assert_eq!(catalog.count_in_category("hoodies").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejects_invalid_input() {
        let catalog = catalog();

        let mut no_image = input("A-1", "shirt");
        no_image.images.clear();
        assert!(matches!(catalog.create_product(no_image).await, Err(AppError::Validation(_))));

        let mut negative = input("A-1", "shirt");
        negative.price = Decimal::from(-1);
        assert!(catalog.create_product(negative).await.is_err());

        let mut bad_hex = input("A-1", "shirt");
        bad_hex.color_variants = vec![color("Red", "red", 1)];
        assert!(catalog.create_product(bad_hex).await.is_err());

        assert!(catalog.list_products(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sku_must_be_unique() {
        let catalog = catalog();
        let first = catalog.create_product(input("A-1", "shirt")).await.unwrap();
        let second = catalog.create_product(input("A-2", "shirt")).await.unwrap();

        let duplicate = catalog.create_product(input("A-1", "jeans")).await;
        assert!(matches!(duplicate, Err(AppError::Validation(_))));

        // Keeping its own SKU is fine; taking another product's is not
        catalog.update_product(&first.id, input("A-1", "jeans")).await.unwrap();
        assert!(catalog.update_product(&second.id, input("A-1", "shirt")).await.is_err());
    }

    #[tokio::test]
    async fn test_variants_flatten_images_and_sum_stock() {
        let catalog = catalog();
        let mut with_colors = input("V-1", "tshirt");
        with_colors.color_variants = vec![color("Red", "#f00", 2), color("Blue", "#0000ff", 5)];

        let product = catalog.create_product(with_colors).await.unwrap();

        assert!(product.has_color_variants);
        assert_eq!(product.stock, 7);
        assert_eq!(product.images.len(), 3);
        assert_eq!(product.primary_image(), Some("https://img.example/front.jpg"));
    }

    #[tokio::test]
    async fn test_update_keeps_identity() {
        let catalog = catalog();
        let mut with_colors = input("V-1", "tshirt");
        with_colors.color_variants = vec![color("Red", "#f00", 2)];
        let created = catalog.create_product(with_colors).await.unwrap();
        let red_id = created.color_variants[0].id.clone();

        let mut edit = input("V-1", "tshirt");
        edit.price = Decimal::from(599);
        edit.color_variants = vec![
            ColorVariantInput {
                id: Some(red_id.clone()),
                ..color("Red", "#f00", 1)
            },
            color("Green", "#0f0", 4),
        ];

        let updated = catalog.update_product(&created.id, edit).await.unwrap();
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.color_variants[0].id, red_id);
        assert_ne!(updated.color_variants[1].id, red_id);
        assert_eq!(catalog.get_product(&created.id).await.unwrap().price, Decimal::from(599));
    }

    #[tokio::test]
    async fn test_delete_product() {
        let catalog = catalog();
        let product = catalog.create_product(input("A-1", "shirt")).await.unwrap();

        catalog.delete_product(&product.id).await.unwrap();
        assert!(matches!(catalog.get_product(&product.id).await, Err(AppError::NotFound(_))));
        assert!(matches!(catalog.delete_product(&product.id).await, Err(AppError::NotFound(_))));
    }
}
