// =============================================================================
// CHECKOUT
// =============================================================================
// Cart -> order. The session's submit lock is held while the order is being
// written, so a second submit (or any cart edit) in the meantime is a
// `Conflict` instead of a duplicate order. The cart is cleared only once the
// order write has succeeded; if the process dies in between, the order
// exists and the cart is merely stale.
//
// The lock is owned by a `SubmitLock` guard rather than released by hand:
// when the client disconnects, hyper drops the handler future wherever it
// is suspended, and the guard's `Drop` is the only code guaranteed to run.
// =============================================================================

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::AppResult;
use crate::models::{CheckoutRequest, NewOrder, Order};
use crate::orders::OrderStore;
use crate::session::{SessionContext, SessionRegistry};
use crate::validation::{normalize_customer, validate_customer};

pub async fn checkout(
    sessions: &SessionRegistry,
    orders: &OrderStore,
    session_id: &str,
    request: CheckoutRequest,
) -> AppResult<Order> {
    validate_customer(&request.customer)?;
    let customer = normalize_customer(request.customer);

    let context = sessions.context(session_id).await;

    // Take the lock and snapshot the cart, then release the mutex for the write
    let (mut lock, items, total) = {
        let mut session = context.lock().await;
        let total = session.cart().total()?;
        let items = session.begin_checkout()?;
        (SubmitLock::new(context.clone()), items, total)
    };

    let result = orders
        .create_order(NewOrder {
            customer,
            items,
            total_amount: Some(total),
            idempotency_key: request.idempotency_key,
        })
        .await;
    lock.order_written = result.is_ok();

    let mut session = context.lock().await;
    lock.release(&mut session);

    match &result {
        Ok(order) => {
            sessions.persist_cart(session_id, &session).await;
            tracing::info!(session_id, order_id = %order.order_id, "Checkout complete");
        }
        Err(e) => {
            tracing::warn!(session_id, error = %e, "Checkout failed, cart kept");
        }
    }

    result
}

// -----------------------------------------------------------------------------
// SUBMIT LOCK GUARD
// -----------------------------------------------------------------------------

/// Holds a session's submit lock between `begin_checkout` and the end of the
/// order write. Dropped without `release` (the request was cancelled), it
/// releases the lock itself: directly if the session mutex is free,
/// otherwise from a spawned task.
struct SubmitLock {
    context: Option<Arc<Mutex<SessionContext>>>,
    order_written: bool,
}

impl SubmitLock {
    fn new(context: Arc<Mutex<SessionContext>>) -> Self {
        Self {
            context: Some(context),
            order_written: false,
        }
    }

    /// Release through a session the caller has already locked.
    fn release(&mut self, session: &mut SessionContext) {
        if self.context.take().is_some() {
            session.finish_checkout(self.order_written);
        }
    }
}

impl Drop for SubmitLock {
    fn drop(&mut self) {
        let Some(context) = self.context.take() else {
            return;
        };
        let order_written = self.order_written;

        tracing::warn!(order_written, "Checkout cancelled mid-write, releasing submit lock");

        if let Ok(mut session) = context.try_lock() {
            session.finish_checkout(order_written);
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    context.lock().await.finish_checkout(order_written);
                });
            }
            Err(_) => tracing::error!("No runtime to release submit lock"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::CartManager;
    use crate::error::AppError;
    use crate::local_store::LocalStore;
    use crate::models::CustomerDetails;
    use crate::sync::{BackendKind, Document, DocumentStore, Filter, StoreResult, SyncLayer};
    use crate::variant::tests::product;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::broadcast;

    /// Local store whose writes take `delay` to land.
    struct SlowWrites {
        inner: LocalStore,
        delay: Duration,
    }

    #[async_trait]
    impl DocumentStore for SlowWrites {
        fn kind(&self) -> BackendKind {
            BackendKind::Remote
        }

        async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
            self.inner.get(collection, id).await
        }

        async fn query(&self, collection: &str, filter: Option<&Filter>) -> StoreResult<Vec<Document>> {
            self.inner.query(collection, filter).await
        }

        async fn put(&self, collection: &str, id: &str, data: Document) -> StoreResult<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.put(collection, id, data).await
        }

        async fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
            self.inner.delete(collection, id).await
        }

        fn subscribe(&self) -> broadcast::Receiver<String> {
            self.inner.subscribe()
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    struct Fixture {
        sessions: SessionRegistry,
        orders: OrderStore,
    }

    fn fixture() -> Fixture {
        let local = Arc::new(LocalStore::in_memory());
        let timeout = Duration::from_secs(5);

        Fixture {
            sessions: SessionRegistry::new(CartManager::new(local.clone(), timeout)),
            orders: OrderStore::new(SyncLayer::new(local, timeout)),
        }
    }

    fn request(email: &str) -> CheckoutRequest {
        CheckoutRequest {
            customer: CustomerDetails {
                user_id: None,
                customer_name: " Asha ".to_string(),
                customer_email: email.to_string(),
                customer_phone: "9876543210".to_string(),
                customer_address: "12 Lake Road, Pune".to_string(),
            },
            idempotency_key: None,
        }
    }

    async fn fill_cart(fx: &Fixture, session_id: &str) {
        let context = fx.sessions.context(session_id).await;
        let mut session = context.lock().await;
        session.add_product(&product("p1", 100, vec![])).unwrap();
        session.add_product(&product("p1", 100, vec![])).unwrap();
        session.add_product(&product("p2", 50, vec![])).unwrap();
    }

    #[tokio::test]
    async fn test_checkout_writes_order_and_clears_cart() {
        let fx = fixture();
        fill_cart(&fx, "s1").await;

        let order = checkout(&fx.sessions, &fx.orders, "s1", request("a@b.com"))
            .await
            .unwrap();

        assert_eq!(order.total_amount, rust_decimal::Decimal::from(250));
        assert_eq!(order.items.len(), 2);
        assert_eq!(order.customer.customer_name, "Asha");

        let context = fx.sessions.context("s1").await;
        assert!(context.lock().await.cart().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_customer_writes_nothing() {
        let fx = fixture();
        fill_cart(&fx, "s1").await;

        let result = checkout(&fx.sessions, &fx.orders, "s1", request("not-an-email")).await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        assert!(fx.orders.list_orders(None).await.unwrap().is_empty());
        let context = fx.sessions.context("s1").await;
        assert_eq!(context.lock().await.cart().items().len(), 2);
    }

    #[tokio::test]
    async fn test_submit_while_in_flight_is_rejected() {
        let fx = fixture();
        fill_cart(&fx, "s1").await;

        let context = fx.sessions.context("s1").await;
        context.lock().await.begin_checkout().unwrap();

        let second = checkout(&fx.sessions, &fx.orders, "s1", request("a@b.com")).await;
        assert!(matches!(second, Err(AppError::Conflict(_))));
        assert!(fx.orders.list_orders(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_cart_is_rejected() {
        let fx = fixture();

        let result = checkout(&fx.sessions, &fx.orders, "s1", request("a@b.com")).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
    #[tokio::test]
    async fn test_cancelled_checkout_releases_submit_lock() {
        let slow = Arc::new(SlowWrites {
            inner: LocalStore::in_memory(),
            delay: Duration::from_secs(2),
        });
        let fx = Fixture {
            sessions: SessionRegistry::new(CartManager::new(
                Arc::new(LocalStore::in_memory()),
                Duration::from_secs(5),
            )),
            orders: OrderStore::new(SyncLayer::new(slow, Duration::from_secs(5))),
        };
        fill_cart(&fx, "s1").await;

        let submit = checkout(&fx.sessions, &fx.orders, "s1", request("a@b.com"));
        assert!(tokio::time::timeout(Duration::from_millis(50), submit).await.is_err());

        let context = fx.sessions.context("s1").await;
        let mut session = context.lock().await;
        assert_eq!(session.cart().items().len(), 2);
        session.add_product(&product("p3", 10, vec![])).unwrap();
        assert_eq!(session.begin_checkout().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_guard_released_while_session_busy() {
        let fx = fixture();
        fill_cart(&fx, "s1").await;

        let context = fx.sessions.context("s1").await;
        let mut busy = context.lock().await;
        busy.begin_checkout().unwrap();
        drop(SubmitLock::new(context.clone()));
        drop(busy);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut session = context.lock().await;
        assert!(session.begin_checkout().is_ok());
    }
}
