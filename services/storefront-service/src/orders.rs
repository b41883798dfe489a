// =============================================================================
// ORDER STORE
// =============================================================================
// Orders are written once from a cart snapshot and afterwards only change
// `status` / `updatedAt`. Status changes go through
// `OrderStatus::can_transition_to`; anything else is `InvalidTransition`.
//
// WRITE SERIALIZATION:
// The document backends have no compare-and-set, so every read-check-write
// here (status changes, deletes, keyed creates) runs under one store-wide
// write lock. Two concurrent status changes are therefore decided one after
// the other against the stored status, and two submits with the same
// idempotency key produce one order. The lock is per process: the service
// assumes a single instance owns order writes.
//
// LISTING:
// Backends return orders in insertion order and cannot sort a filtered
// query, so every listing is sorted here by `createdAt` descending. When the
// filtered customer query itself fails, the customer's orders are found by
// scanning the whole collection instead.
// =============================================================================

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::Stream;
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{line_total, CartLineItem, NewOrder, Order, OrderStats, OrderStatus, StatusCount};
use crate::sync::{collections, Filter, Subscription, SyncLayer};

/// Attempts at finding an unused order id before giving up
const MAX_ID_ATTEMPTS: usize = 5;

// =============================================================================
// ORDER ID GENERATOR
// =============================================================================
/// `ORD-<unix millis>`, strictly increasing within the process even when two
/// orders land in the same millisecond.
#[derive(Debug, Default)]
pub struct OrderIdGenerator {
    last: AtomicI64,
}

impl OrderIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        let now = Utc::now().timestamp_millis();
        let mut previous = self.last.load(Ordering::SeqCst);

        loop {
            let candidate = now.max(previous + 1);
            match self.last.compare_exchange(previous, candidate, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return format!("ORD-{}", candidate),
                Err(actual) => previous = actual,
            }
        }
    }
}

// =============================================================================
// ORDER STORE
// =============================================================================
#[derive(Clone)]
pub struct OrderStore {
    sync: SyncLayer,
    ids: Arc<OrderIdGenerator>,
    /// Held across every read-check-write on the collection
    writes: Arc<Mutex<()>>,
}

impl OrderStore {
    pub fn new(sync: SyncLayer) -> Self {
        Self {
            sync,
            ids: Arc::new(OrderIdGenerator::new()),
            writes: Arc::new(Mutex::new(())),
        }
    }

    // -------------------------------------------------------------------------
    // CREATE
    // -------------------------------------------------------------------------

    /// Write a new `pending` order in a single put.
    ///
    /// With an idempotency key that an earlier order already carries, that
    /// order is returned and nothing is written.
    pub async fn create_order(&self, new_order: NewOrder) -> AppResult<Order> {
        let total_amount = order_total(&new_order.items)?;

        if let Some(claimed) = new_order.total_amount {
            if claimed != total_amount {
                return Err(AppError::Validation(format!(
                    "totalAmount {} does not match item total {}",
                    claimed, total_amount
                )));
            }
        }

        if new_order.customer.customer_email.trim().is_empty() {
            return Err(AppError::Validation("customerEmail is required".into()));
        }

        let idempotency_key = new_order
            .idempotency_key
            .map(|key| key.trim().to_owned())
            .filter(|key| !key.is_empty());

        // Keyed creates are check-then-write; unkeyed ones get fresh ids
        let _write = match &idempotency_key {
            Some(_) => Some(self.writes.lock().await),
            None => None,
        };

        if let Some(key) = &idempotency_key {
            if let Some(existing) = self.find_by_idempotency_key(key).await? {
                tracing::info!(order_id = %existing.order_id, "Duplicate submission, returning existing order");
                return Ok(existing);
            }
        }

        let order_id = self.unused_order_id().await?;
        let now = Utc::now();

        let order = Order {
            order_id,
            customer: new_order.customer,
            items: new_order.items,
            total_amount,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
            idempotency_key,
        };

        self.sync
            .put(collections::ORDERS, Some(&order.order_id), &order)
            .await?;

        metrics::record_order_created();
        tracing::info!(
            order_id = %order.order_id,
            items = order.items.len(),
            total = %order.total_amount,
            "Order created"
        );

        Ok(order)
    }

    async fn unused_order_id(&self) -> AppResult<String> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let candidate = self.ids.next_id();
            let taken = self
                .sync
                .get::<Value>(collections::ORDERS, &candidate)
                .await?
                .is_some();

            if !taken {
                return Ok(candidate);
            }
            tracing::warn!(order_id = %candidate, "Order id already taken, regenerating");
        }

        Err(AppError::Internal("Could not allocate an order id".into()))
    }

    async fn find_by_idempotency_key(&self, key: &str) -> AppResult<Option<Order>> {
        let filter = Filter::eq("idempotencyKey", key);
        let mut matches: Vec<Order> = self
            .sync
            .query(collections::ORDERS, Some(&filter))
            .await?;

        sort_newest_first(&mut matches);
        Ok(matches.into_iter().next())
    }

    // -------------------------------------------------------------------------
    // READ
    // -------------------------------------------------------------------------

    pub async fn get_order(&self, order_id: &str) -> AppResult<Order> {
        self.sync
            .get::<Order>(collections::ORDERS, order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {} not found", order_id)))
    }

    /// All orders, or those in one status, newest first.
    pub async fn list_orders(&self, status: Option<OrderStatus>) -> AppResult<Vec<Order>> {
        let filter = status.map(status_filter);
        let mut orders: Vec<Order> = self
            .sync
            .query(collections::ORDERS, filter.as_ref())
            .await?;

        sort_newest_first(&mut orders);
        Ok(orders)
    }

    /// A customer's orders, newest first.
    pub async fn list_orders_for_customer(&self, email: &str) -> AppResult<Vec<Order>> {
        let email = email.trim();

        match self
            .sync
            .query::<Order>(collections::ORDERS, Some(&customer_filter(email)))
            .await
        {
            Ok(mut orders) => {
                sort_newest_first(&mut orders);
                Ok(orders)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Customer order query failed, scanning all orders");
                self.scan_for_customer(email).await
            }
        }
    }

    /// Fallback path: read every order and filter by email here.
    async fn scan_for_customer(&self, email: &str) -> AppResult<Vec<Order>> {
        let mut orders: Vec<Order> = self.sync.query(collections::ORDERS, None).await?;

        orders.retain(|order| order.customer.customer_email == email);
        sort_newest_first(&mut orders);
        Ok(orders)
    }

    /// Order count per status, in lifecycle order.
    pub async fn stats(&self) -> AppResult<OrderStats> {
        let orders: Vec<Order> = self.sync.query(collections::ORDERS, None).await?;

        let by_status = OrderStatus::ALL
            .into_iter()
            .map(|status| StatusCount {
                status,
                count: orders.iter().filter(|order| order.status == status).count(),
            })
            .collect();

        Ok(OrderStats {
            total: orders.len(),
            by_status,
        })
    }

    // -------------------------------------------------------------------------
    // UPDATE / DELETE
    // -------------------------------------------------------------------------

    /// Move an order to `status`. Only the next step in the lifecycle or
    /// `cancelled` (from a non-terminal state) is accepted.
    pub async fn set_status(&self, order_id: &str, status: OrderStatus) -> AppResult<Order> {
        let _write = self.writes.lock().await;

        let mut order = self.get_order(order_id).await?;
        let previous = order.status;

        if !previous.can_transition_to(status) {
            return Err(AppError::InvalidTransition {
                from: previous,
                to: status,
            });
        }

        order.status = status;
        order.updated_at = Utc::now();

        self.sync
            .put(collections::ORDERS, Some(order_id), &order)
            .await?;

        metrics::record_status_transition(previous.as_str(), status.as_str());
        tracing::info!(order_id, from = %previous, to = %status, "Order status updated");

        Ok(order)
    }

    /// Hard delete.
    pub async fn delete_order(&self, order_id: &str) -> AppResult<()> {
        let _write = self.writes.lock().await;

        self.get_order(order_id).await?;
        self.sync.delete(collections::ORDERS, order_id).await?;

        tracing::info!(order_id, "Order deleted");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // LISTEN
    // -------------------------------------------------------------------------

    pub fn listen_orders(&self, status: Option<OrderStatus>) -> OrderFeed {
        OrderFeed {
            subscription: self.sync.listen(collections::ORDERS, status.map(status_filter)),
            fallback: None,
        }
    }

    pub fn listen_orders_for_customer(&self, email: &str) -> OrderFeed {
        let email = email.trim().to_owned();

        OrderFeed {
            subscription: self
                .sync
                .listen(collections::ORDERS, Some(customer_filter(&email))),
            fallback: Some((self.clone(), email)),
        }
    }
}

fn status_filter(status: OrderStatus) -> Filter {
    Filter::eq("status", status.as_str())
}

fn customer_filter(email: &str) -> Filter {
    Filter::eq("customerEmail", email)
}

fn sort_newest_first(orders: &mut [Order]) {
    orders.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.order_id.cmp(&a.order_id))
    });
}

/// `Σ price × quantity`; every line must have quantity >= 1 and a
/// non-negative price.
fn order_total(items: &[CartLineItem]) -> AppResult<Decimal> {
    if items.is_empty() {
        return Err(AppError::Validation("An order needs at least one item".into()));
    }

    for item in items {
        if item.quantity == 0 {
            return Err(AppError::Validation(format!(
                "Item {} has quantity 0",
                item.product_id
            )));
        }
        if item.price < Decimal::ZERO {
            return Err(AppError::Validation(format!(
                "Item {} has a negative price",
                item.product_id
            )));
        }
    }

    line_total(items)
}

// =============================================================================
// ORDER FEED
// =============================================================================
/// Sorted real-time order snapshots.
pub struct OrderFeed {
    subscription: Subscription<Order>,
    /// Customer feeds rescan by email when the filtered re-query fails
    fallback: Option<(OrderStore, String)>,
}

impl OrderFeed {
    pub async fn next(&mut self) -> Option<AppResult<Vec<Order>>> {
        match self.subscription.next().await? {
            Ok(mut orders) => {
                sort_newest_first(&mut orders);
                Some(Ok(orders))
            }
            Err(e) => match &self.fallback {
                Some((store, email)) => {
                    tracing::warn!(error = %e, "Customer order feed query failed, scanning all orders");
                    Some(store.scan_for_customer(email).await)
                }
                None => Some(Err(e.into())),
            },
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = AppResult<Vec<Order>>> {
        futures::stream::unfold(self, |mut feed| async move {
            let snapshot = feed.next().await?;
            Some((snapshot, feed))
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_store::LocalStore;
    use crate::models::CustomerDetails;
    use std::time::Duration;

    fn store() -> OrderStore {
        OrderStore::new(SyncLayer::new(
            Arc::new(LocalStore::in_memory()),
            Duration::from_secs(5),
        ))
    }

    fn customer(email: &str) -> CustomerDetails {
        CustomerDetails {
            user_id: None,
            customer_name: "Asha".to_string(),
            customer_email: email.to_string(),
            customer_phone: "9876543210".to_string(),
            customer_address: "12 Lake Road, Pune".to_string(),
        }
    }

    fn new_order(email: &str, items: serde_json::Value) -> NewOrder {
        NewOrder {
            customer: customer(email),
            items: serde_json::from_value(items).unwrap(),
            total_amount: None,
            idempotency_key: None,
        }
    }

    #[test]
    fn test_order_ids_are_strictly_increasing() {
        let ids = OrderIdGenerator::new();

        let mut previous = 0;
        for _ in 0..1000 {
            let id = ids.next_id();
            let millis: i64 = id.strip_prefix("ORD-").unwrap().parse().unwrap();
            assert!(millis > previous);
            previous = millis;
        }
    }

    #[tokio::test]
    async fn test_create_and_list_for_customer() {
        let orders = store();

        let created = orders
            .create_order(NewOrder {
                total_amount: Some(Decimal::from(200)),
                ..new_order("a@b.com", serde_json::json!([{"id": 1, "price": 100, "quantity": 2}]))
            })
            .await
            .unwrap();
        assert!(created.order_id.starts_with("ORD-"));

        let listed = orders.list_orders_for_customer("a@b.com").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].total_amount, Decimal::from(200));
        assert_eq!(listed[0].status, OrderStatus::Pending);

        assert!(orders.list_orders_for_customer("c@d.com").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let orders = store();

        let empty = orders.create_order(new_order("a@b.com", serde_json::json!([]))).await;
        assert!(matches!(empty, Err(AppError::Validation(_))));

        let mismatched = orders
            .create_order(NewOrder {
                total_amount: Some(Decimal::from(150)),
                ..new_order("a@b.com", serde_json::json!([{"id": "p1", "price": 100, "quantity": 2}]))
            })
            .await;
        assert!(matches!(mismatched, Err(AppError::Validation(_))));

        let negative = orders
            .create_order(new_order("a@b.com", serde_json::json!([{"id": "p1", "price": -500, "quantity": 2}])))
            .await;
        assert!(matches!(negative, Err(AppError::Validation(_))));

        let overflowing = orders
            .create_order(new_order(
                "a@b.com",
                serde_json::json!([{"id": "p1", "price": "70000000000000000000000000000", "quantity": 2}]),
            ))
            .await;
        assert!(matches!(overflowing, Err(AppError::Validation(_))));

        assert!(orders.list_orders(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_order_snapshot_survives_product_changes() {
        let sync = SyncLayer::new(Arc::new(LocalStore::in_memory()), Duration::from_secs(5));
        let orders = OrderStore::new(sync.clone());

        sync.put(
            collections::PRODUCTS,
            Some("p1"),
            &serde_json::json!({"id": "p1", "price": "100", "stock": 4}),
        )
        .await
        .unwrap();

        let created = orders
            .create_order(new_order(
                "a@b.com",
                serde_json::json!([{"id": "p1", "name": "Tee", "price": "100", "quantity": 2}]),
            ))
            .await
            .unwrap();

        sync.put(
            collections::PRODUCTS,
            Some("p1"),
            &serde_json::json!({"id": "p1", "price": "999", "stock": 0}),
        )
        .await
        .unwrap();

        let reread = orders.get_order(&created.order_id).await.unwrap();
        assert_eq!(reread.items, created.items);
        assert_eq!(reread.total_amount, Decimal::from(200));
    }

    #[tokio::test]
    async fn test_status_moves_forward_only() {
        let orders = store();
        let order = orders
            .create_order(new_order("a@b.com", serde_json::json!([{"id": "p1", "price": 10, "quantity": 1}])))
            .await
            .unwrap();
        let id = order.order_id.as_str();

        let skipped = orders.set_status(id, OrderStatus::Delivered).await;
        assert!(matches!(skipped, Err(AppError::InvalidTransition { .. })));

        for status in [
            OrderStatus::Accepted,
            OrderStatus::Processing,
            OrderStatus::OutForDelivery,
            OrderStatus::Delivered,
        ] {
            let updated = orders.set_status(id, status).await.unwrap();
            assert_eq!(updated.status, status);
            assert!(updated.updated_at >= updated.created_at);
        }

        let reopened = orders.set_status(id, OrderStatus::Cancelled).await;
        assert!(matches!(reopened, Err(AppError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_is_permanent() {
        let orders = store();

        for steps in 0..4 {
            let order = orders
                .create_order(new_order("a@b.com", serde_json::json!([{"id": "p1", "price": 10, "quantity": 1}])))
                .await
                .unwrap();
            let id = order.order_id.as_str();

            let mut status = OrderStatus::Pending;
            for _ in 0..steps {
                status = status.next().unwrap();
                orders.set_status(id, status).await.unwrap();
            }

            orders.set_status(id, OrderStatus::Cancelled).await.unwrap();
            for target in OrderStatus::ALL {
                assert!(orders.set_status(id, target).await.is_err());
            }
            assert_eq!(orders.get_order(id).await.unwrap().status, OrderStatus::Cancelled);
        }
    }

    #[tokio::test]
    async fn test_idempotency_key_dedupes() {
        let orders = store();
        let submit = || NewOrder {
            idempotency_key: Some("checkout-42".to_string()),
            ..new_order("a@b.com", serde_json::json!([{"id": "p1", "price": 10, "quantity": 1}]))
        };

        let first = orders.create_order(submit()).await.unwrap();
        let second = orders.create_order(submit()).await.unwrap();

        assert_eq!(first.order_id, second.order_id);
        assert_eq!(orders.list_orders(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_keyed_submits_create_one_order() {
        let orders = store();
        let submit = || NewOrder {
            idempotency_key: Some("checkout-7".to_string()),
            ..new_order("a@b.com", serde_json::json!([{"id": "p1", "price": 10, "quantity": 1}]))
        };

        let (first, second) = tokio::join!(
            orders.create_order(submit()),
            orders.create_order(submit())
        );

        assert_eq!(first.unwrap().order_id, second.unwrap().order_id);
        assert_eq!(orders.list_orders(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_transitions_are_decided_in_turn() {
        let orders = store();
        let order = orders
            .create_order(new_order("a@b.com", serde_json::json!([{"id": "p1", "price": 10, "quantity": 1}])))
            .await
            .unwrap();
        let id = order.order_id.as_str();

        for status in [
            OrderStatus::Accepted,
            OrderStatus::Processing,
            OrderStatus::OutForDelivery,
        ] {
            orders.set_status(id, status).await.unwrap();
        }

        let (delivered, cancelled) = tokio::join!(
            orders.set_status(id, OrderStatus::Delivered),
            orders.set_status(id, OrderStatus::Cancelled)
        );

        // Exactly one wins, and the stored status is the winner's
        let stored = orders.get_order(id).await.unwrap().status;
        match (delivered, cancelled) {
            (Ok(_), Err(AppError::InvalidTransition { .. })) => assert_eq!(stored, OrderStatus::Delivered),
            (Err(AppError::InvalidTransition { .. }), Ok(_)) => assert_eq!(stored, OrderStatus::Cancelled),
            other => panic!("expected exactly one transition to succeed: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_listing_is_newest_first_and_filterable() {
        let orders = store();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let order = orders
                .create_order(new_order("a@b.com", serde_json::json!([{"id": "p1", "price": 10, "quantity": 1}])))
                .await
                .unwrap();
            ids.push(order.order_id);
        }
        orders.set_status(&ids[1], OrderStatus::Accepted).await.unwrap();

        let all = orders.list_orders(None).await.unwrap();
        let listed: Vec<_> = all.iter().map(|o| o.order_id.clone()).collect();
        assert_eq!(listed, vec![ids[2].clone(), ids[1].clone(), ids[0].clone()]);

        let accepted = orders.list_orders(Some(OrderStatus::Accepted)).await.unwrap();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].order_id, ids[1]);

        let stats = orders.stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_status[0].count, 2);
        assert_eq!(stats.by_status[1].count, 1);
    }

    #[tokio::test]
    async fn test_delete_order() {
        let orders = store();
        let order = orders
            .create_order(new_order("a@b.com", serde_json::json!([{"id": "p1", "price": 10, "quantity": 1}])))
            .await
            .unwrap();

        orders.delete_order(&order.order_id).await.unwrap();
        assert!(matches!(orders.get_order(&order.order_id).await, Err(AppError::NotFound(_))));
        assert!(matches!(orders.delete_order(&order.order_id).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_customer_feed_observes_status_changes() {
        let orders = store();
        let order = orders
            .create_order(new_order("a@b.com", serde_json::json!([{"id": "p1", "price": 10, "quantity": 1}])))
            .await
            .unwrap();

        let mut feed = orders.listen_orders_for_customer("a@b.com");
        let first = feed.next().await.unwrap().unwrap();
        assert_eq!(first[0].status, OrderStatus::Pending);

        orders.set_status(&order.order_id, OrderStatus::Accepted).await.unwrap();
        let second = feed.next().await.unwrap().unwrap();
        assert_eq!(second[0].status, OrderStatus::Accepted);
    }
}
