// =============================================================================
// CART
// =============================================================================
// `Cart` is the pure line-item list; `CartManager` loads and saves it.
//
// Carts are per-session scratch state and live only in the local store
// (collection `carts`, one document per session), whichever backend serves
// the catalog and orders. Loading never fails: a missing or corrupt document
// is an empty cart. Saving never fails the caller either: the in-memory cart
// stays authoritative and a failed write is only logged.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::local_store::LocalStore;
use crate::models::{line_total, CartLineItem, CartView};
use crate::sync::{collections, SyncLayer};

/// Upper bound for a single line's quantity
pub const MAX_LINE_QUANTITY: u32 = 999;

// =============================================================================
// CART
// =============================================================================
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cart {
    items: Vec<CartLineItem>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from stored items; quantities are clamped to
    /// `1..=MAX_LINE_QUANTITY`.
    pub fn from_items(items: Vec<CartLineItem>) -> Self {
        let items = items
            .into_iter()
            .map(|mut item| {
                item.quantity = item.quantity.clamp(1, MAX_LINE_QUANTITY);
                item
            })
            .collect();
        Self { items }
    }

    pub fn items(&self) -> &[CartLineItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Merge on `(product id, selected color)`: bump the existing line by
    /// one, or append the snapshot as a new line with quantity 1.
    /// Returns the index of the affected line.
    ///
    /// A line already at `MAX_LINE_QUANTITY` is refused, as is any change
    /// whose total no longer fits in a `Decimal`; the cart is left as it was.
    pub fn add(&mut self, snapshot: CartLineItem) -> AppResult<usize> {
        let mut items = self.items.clone();

        let index = match items.iter().position(|item| item.same_line(&snapshot)) {
            Some(index) => {
                let line = &mut items[index];
                if line.quantity >= MAX_LINE_QUANTITY {
                    return Err(AppError::Validation(format!(
                        "At most {} of one item per order",
                        MAX_LINE_QUANTITY
                    )));
                }
                line.quantity += 1;
                index
            }
            None => {
                items.push(CartLineItem {
                    quantity: 1,
                    ..snapshot
                });
                items.len() - 1
            }
        };

        self.commit(items)?;
        Ok(index)
    }

    /// Remove by display position.
    pub fn remove(&mut self, index: usize) -> AppResult<CartLineItem> {
        if index >= self.items.len() {
            return Err(Self::no_line(index));
        }
        Ok(self.items.remove(index))
    }

    /// Set a line's quantity, clamped to `1..=MAX_LINE_QUANTITY`.
    pub fn update_quantity(&mut self, index: usize, quantity: i64) -> AppResult<u32> {
        if index >= self.items.len() {
            return Err(Self::no_line(index));
        }

        let quantity = quantity.clamp(1, i64::from(MAX_LINE_QUANTITY)) as u32;
        let mut items = self.items.clone();
        items[index].quantity = quantity;

        self.commit(items)?;
        Ok(quantity)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// `Σ price × quantity`
    pub fn total(&self) -> AppResult<Decimal> {
        line_total(&self.items)
    }

    /// `Σ quantity`
    pub fn count(&self) -> u64 {
        self.items.iter().map(|item| u64::from(item.quantity)).sum()
    }

    pub fn view(&self) -> AppResult<CartView> {
        Ok(CartView {
            items: self.items.clone(),
            total: self.total()?,
            count: self.count(),
        })
    }

    /// Replace the lines, unless their total cannot be represented.
    fn commit(&mut self, items: Vec<CartLineItem>) -> AppResult<()> {
        line_total(&items)?;
        self.items = items;
        Ok(())
    }

    fn no_line(index: usize) -> AppError {
        AppError::NotFound(format!("No cart item at position {}", index))
    }
}

// =============================================================================
// PERSISTENCE
// =============================================================================

/// Stored cart document: `{ "items": [...] }`
#[derive(Debug, Serialize, Deserialize)]
struct StoredCart {
    #[serde(default)]
    items: Vec<CartLineItem>,
}

#[derive(Clone)]
pub struct CartManager {
    store: SyncLayer,
}

impl CartManager {
    /// Carts are always kept in the local store.
    pub fn new(local: Arc<LocalStore>, timeout: Duration) -> Self {
        Self {
            store: SyncLayer::new(local, timeout),
        }
    }

    pub async fn load(&self, session_id: &str) -> Cart {
        match self.store.get::<StoredCart>(collections::CARTS, session_id).await {
            Ok(Some(stored)) => Cart::from_items(stored.items),
            Ok(None) => Cart::new(),
            Err(e) => {
                tracing::warn!(session_id, error = %e, "Stored cart unreadable, starting empty");
                Cart::new()
            }
        }
    }

    /// Persist the whole list.
    pub async fn save(&self, session_id: &str, cart: &Cart) {
        let stored = StoredCart {
            items: cart.items.clone(),
        };

        if let Err(e) = self
            .store
            .put(collections::CARTS, Some(session_id), &stored)
            .await
        {
            tracing::warn!(session_id, error = %e, "Failed to persist cart");
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::DocumentStore;
    use serde_json::json;

    fn item(product_id: &str, price: i64, color: Option<&str>) -> CartLineItem {
        CartLineItem {
            product_id: product_id.to_string(),
            sku: format!("SKU-{}", product_id),
            name: format!("Product {}", product_id),
            category: "shirt".to_string(),
            size: None,
            price: Decimal::from(price),
            image: String::new(),
            quantity: 1,
            selected_color: color.map(str::to_string),
            selected_color_hex: None,
        }
    }

    #[test]
    fn test_same_product_and_color_merges() {
        let mut cart = Cart::new();
        for _ in 0..4 {
            cart.add(item("p1", 100, Some("Red"))).unwrap();
        }

        assert_eq!(cart.items().len(), 1);
        assert_eq!(cart.items()[0].quantity, 4);
    }

    #[test]
    fn test_different_colors_are_separate_lines() {
        let mut cart = Cart::new();
        cart.add(item("p1", 100, Some("Red"))).unwrap();
        cart.add(item("p1", 100, Some("Blue"))).unwrap();
        cart.add(item("p1", 100, None)).unwrap();
        cart.add(item("p1", 100, Some("Red"))).unwrap();

        assert_eq!(cart.items().len(), 3);
        assert_eq!(cart.items()[0].quantity, 2);
        assert_eq!(cart.items()[1].selected_color.as_deref(), Some("Blue"));
        assert_eq!(cart.items()[2].selected_color, None);
    }

    #[test]
    fn test_new_line_starts_at_one_whatever_the_snapshot_says() {
        let mut cart = Cart::new();
        let mut snapshot = item("p1", 100, None);
        snapshot.quantity = 9;

        cart.add(snapshot).unwrap();
        assert_eq!(cart.items()[0].quantity, 1);
    }

    #[test]
    fn test_total_and_count_follow_mutations() {
        let mut cart = Cart::new();
        cart.add(item("p1", 100, None)).unwrap();
        cart.add(item("p1", 100, None)).unwrap();
        cart.add(item("p2", 250, Some("Black"))).unwrap();
        assert_eq!(cart.total().unwrap(), Decimal::from(450));
        assert_eq!(cart.count(), 3);

        cart.update_quantity(1, 4).unwrap();
        assert_eq!(cart.total().unwrap(), Decimal::from(1200));
        assert_eq!(cart.count(), 6);

        cart.remove(0).unwrap();
        assert_eq!(cart.total().unwrap(), Decimal::from(1000));
        assert_eq!(cart.count(), 4);

        let view = cart.view().unwrap();
        assert_eq!(view.total, cart.total().unwrap());
        assert_eq!(view.count, cart.count());
    }

    #[test]
    fn test_quantity_floor_is_one() {
        let mut cart = Cart::new();
        cart.add(item("p1", 100, None)).unwrap();

        for n in [0, -1, -50, i64::MIN] {
            assert_eq!(cart.update_quantity(0, n).unwrap(), 1);
            assert_eq!(cart.items()[0].quantity, 1);
        }
    }

    #[test]
    fn test_quantity_ceiling() {
        let mut cart = Cart::new();
        cart.add(item("p1", 100, None)).unwrap();

        assert_eq!(cart.update_quantity(0, 99_999_999_999).unwrap(), MAX_LINE_QUANTITY);
        assert!(matches!(cart.add(item("p1", 100, None)), Err(AppError::Validation(_))));
        assert_eq!(cart.items()[0].quantity, MAX_LINE_QUANTITY);
        assert_eq!(cart.total().unwrap(), Decimal::from(99_900));

        let restored = Cart::from_items(vec![CartLineItem {
            quantity: u32::MAX,
            ..item("p2", 1, None)
        }]);
        assert_eq!(restored.items()[0].quantity, MAX_LINE_QUANTITY);
    }

    #[test]
    fn test_unrepresentable_total_is_refused() {
        let huge = Decimal::from_i128_with_scale(10_i128.pow(27), 0);
        let mut cart = Cart::new();
        cart.add(item("p1", 0, None)).unwrap();
        cart.items[0].price = huge;

        assert!(matches!(cart.update_quantity(0, 500), Err(AppError::Validation(_))));
        assert_eq!(cart.items()[0].quantity, 1);
        assert_eq!(cart.view().unwrap().total, huge);

        let mut big = item("p2", 0, None);
        big.price = Decimal::MAX;
        assert!(matches!(cart.add(big), Err(AppError::Validation(_))));
        assert_eq!(cart.items().len(), 1);
    }

    #[test]
    fn test_index_out_of_range() {
        let mut cart = Cart::new();
        cart.add(item("p1", 100, None)).unwrap();

        assert!(matches!(cart.remove(1), Err(AppError::NotFound(_))));
        assert!(matches!(cart.update_quantity(3, 2), Err(AppError::NotFound(_))));
        assert_eq!(cart.items().len(), 1);
    }

    #[test]
    fn test_remove_is_positional() {
        let mut cart = Cart::new();
        cart.add(item("p1", 100, Some("Red"))).unwrap();
        cart.add(item("p1", 100, Some("Blue"))).unwrap();

        let removed = cart.remove(1).unwrap();
        assert_eq!(removed.selected_color.as_deref(), Some("Blue"));
        assert_eq!(cart.items()[0].selected_color.as_deref(), Some("Red"));
    }

    #[tokio::test]
    async fn test_manager_round_trip() {
        let manager = CartManager::new(Arc::new(LocalStore::in_memory()), Duration::from_secs(5));

        let mut cart = Cart::new();
        cart.add(item("p1", 100, Some("Red"))).unwrap();
        cart.add(item("p1", 100, Some("Red"))).unwrap();
        manager.save("session-a", &cart).await;

        assert_eq!(manager.load("session-a").await, cart);
        assert!(manager.load("session-b").await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_stored_cart_is_empty() {
        let local = Arc::new(LocalStore::in_memory());
        local
            .put(collections::CARTS, "session-a", json!({"items": "garbage"}))
            .await
            .unwrap();

        let manager = CartManager::new(local, Duration::from_secs(5));
        assert!(manager.load("session-a").await.is_empty());
    }
}
