// =============================================================================
// CATEGORY REGISTRY
// =============================================================================
// The valid category slugs, stored as one `settings/categories` document.
// Until an admin edits the list the built-in defaults are served.
//
// Removing a category leaves products that still reference it alone: they
// keep showing under "all" and simply match no category filter.
// =============================================================================

use std::collections::HashMap;

use chrono::Utc;

use crate::catalog::ProductCatalog;
use crate::error::{AppError, AppResult};
use crate::models::{CategoryList, CategorySummary};
use crate::sync::{collections, SyncLayer};

const CATEGORIES_DOC: &str = "categories";

pub const DEFAULT_CATEGORIES: [&str; 11] = [
    "all",
    "men",
    "jeans",
    "shirt",
    "tshirt",
    "lower",
    "hoodies",
    "sweaters",
    "summer-wear",
    "winter-wear",
    "others",
];

/// Never deletable
pub const RESERVED_CATEGORIES: [&str; 3] = ["all", "men", "others"];

/// Lowercase, with each run of whitespace turned into a single `-`.
pub fn slugify(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

/// `summer-wear` -> `Summer Wear`
pub fn display_name(slug: &str) -> String {
    slug.split('-')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

pub fn is_reserved(slug: &str) -> bool {
    RESERVED_CATEGORIES.contains(&slug)
}

#[derive(Clone)]
pub struct CategoryRegistry {
    sync: SyncLayer,
}

impl CategoryRegistry {
    pub fn new(sync: SyncLayer) -> Self {
        Self { sync }
    }

    pub async fn get_categories(&self) -> AppResult<Vec<String>> {
        let stored = self
            .sync
            .get::<CategoryList>(collections::SETTINGS, CATEGORIES_DOC)
            .await?;

        Ok(match stored {
            Some(doc) if !doc.list.is_empty() => doc.list,
            _ => DEFAULT_CATEGORIES.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Add a category by display name; returns the new slug.
    pub async fn add_category(&self, name: &str) -> AppResult<String> {
        let slug = slugify(name);
        if slug.is_empty() {
            return Err(AppError::Validation("Category name is required".into()));
        }

        let mut list = self.get_categories().await?;
        if list.contains(&slug) {
            return Err(AppError::Validation(format!("Category {} already exists", slug)));
        }

        list.push(slug.clone());
        self.save(list).await?;

        tracing::info!(category = %slug, "Category added");
        Ok(slug)
    }

    pub async fn delete_category(&self, slug: &str) -> AppResult<()> {
        if is_reserved(slug) {
            return Err(AppError::Validation(format!(
                "Category {} is built in and cannot be deleted",
                slug
            )));
        }

        let mut list = self.get_categories().await?;
        let before = list.len();
        list.retain(|existing| existing != slug);

        if list.len() == before {
            return Err(AppError::NotFound(format!("Category {} not found", slug)));
        }

        self.save(list).await?;

        tracing::info!(category = %slug, "Category deleted");
        Ok(())
    }

    /// Admin cards: every category with its product count. `all` counts
    /// every product.
    pub async fn summaries(&self, catalog: &ProductCatalog) -> AppResult<Vec<CategorySummary>> {
        let categories = self.get_categories().await?;
        let products = catalog.list_products(None).await?;

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for product in &products {
            *counts.entry(product.category.as_str()).or_default() += 1;
        }

        Ok(categories
            .into_iter()
            .map(|slug| {
                let product_count = if slug == "all" {
                    products.len()
                } else {
                    counts.get(slug.as_str()).copied().unwrap_or(0)
                };

                CategorySummary {
                    display_name: display_name(&slug),
                    reserved: is_reserved(&slug),
                    product_count,
                    slug,
                }
            })
            .collect())
    }

    async fn save(&self, list: Vec<String>) -> AppResult<()> {
        let doc = CategoryList {
            list,
            updated_at: Some(Utc::now()),
        };

        self.sync
            .put(collections::SETTINGS, Some(CATEGORIES_DOC), &doc)
            .await?;
        Ok(())
    }
}
