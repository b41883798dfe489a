// =============================================================================
// SESSION CONTEXT
// =============================================================================
// Everything a single shopper owns between requests: the cart, the selected
// color per product, and the checkout submit lock. Sessions are identified
// by the `x-session-id` header and held in memory; only the cart is
// persisted (see cart.rs).
//
// Each context sits behind its own async mutex, so requests for one session
// are applied one at a time while different sessions never contend.
//
// Contexts unused for a while are evicted by a periodic sweep. The cart is
// already persisted on every change, so an evicted shopper who comes back
// gets their cart restored; only the color selections are forgotten.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
};
use tokio::sync::Mutex;

use crate::cart::{Cart, CartManager};
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{CartLineItem, CartView, DisplayUnit, Product};
use crate::variant::VariantSelections;

pub const SESSION_HEADER: &str = "x-session-id";

const MAX_SESSION_ID_LEN: usize = 128;

// =============================================================================
// CONTEXT
// =============================================================================
#[derive(Debug, Default)]
pub struct SessionContext {
    cart: Cart,
    selections: VariantSelections,
    checkout_in_flight: bool,
}

impl SessionContext {
    pub fn with_cart(cart: Cart) -> Self {
        Self {
            cart,
            ..Self::default()
        }
    }

    pub fn cart(&self) -> &Cart {
        &self.cart
    }

    /// Cart edits are refused while an order is being written from it.
    fn ensure_idle(&self) -> AppResult<()> {
        if self.checkout_in_flight {
            return Err(AppError::Conflict("Checkout in progress for this session".into()));
        }
        Ok(())
    }

    /// Add the product, as currently displayed for this session, to the cart.
    pub fn add_product(&mut self, product: &Product) -> AppResult<CartView> {
        self.ensure_idle()?;

        let snapshot = self.selections.line_item_for(product)?;
        self.cart.add(snapshot)?;
        metrics::record_cart_mutation("add");

        self.cart.view()
    }

    pub fn update_quantity(&mut self, index: usize, quantity: i64) -> AppResult<CartView> {
        self.ensure_idle()?;

        self.cart.update_quantity(index, quantity)?;
        metrics::record_cart_mutation("update");

        self.cart.view()
    }

    pub fn remove(&mut self, index: usize) -> AppResult<CartView> {
        self.ensure_idle()?;

        self.cart.remove(index)?;
        metrics::record_cart_mutation("remove");

        self.cart.view()
    }

    pub fn clear(&mut self) -> AppResult<CartView> {
        self.ensure_idle()?;

        self.cart.clear();
        metrics::record_cart_mutation("clear");

        self.cart.view()
    }

    pub fn select_variant(&mut self, product: &Product, index: usize) -> AppResult<DisplayUnit> {
        self.selections.select(product, index)
    }

    pub fn display(&self, product: &Product) -> DisplayUnit {
        self.selections.active(product)
    }

    // -------------------------------------------------------------------------
    // CHECKOUT LOCK
    // -------------------------------------------------------------------------

    /// Take the submit lock and snapshot the cart lines to order.
    pub fn begin_checkout(&mut self) -> AppResult<Vec<CartLineItem>> {
        if self.checkout_in_flight {
            return Err(AppError::Conflict("An order is already being placed".into()));
        }
        if self.cart.is_empty() {
            return Err(AppError::Validation("Your cart is empty".into()));
        }

        self.checkout_in_flight = true;
        Ok(self.cart.items().to_vec())
    }

    /// Release the submit lock. The cart is emptied only when the order was
    /// written.
    pub fn finish_checkout(&mut self, order_written: bool) {
        self.checkout_in_flight = false;
        if order_written {
            self.cart.clear();
        }
    }
}

// =============================================================================
// REGISTRY
// =============================================================================
struct SessionEntry {
    context: Arc<Mutex<SessionContext>>,
    last_seen: Instant,
}

pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    carts: CartManager,
}

impl SessionRegistry {
    pub fn new(carts: CartManager) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            carts,
        }
    }

    /// Context for `session_id`, restoring its stored cart on first use.
    pub async fn context(&self, session_id: &str) -> Arc<Mutex<SessionContext>> {
        let mut sessions = self.sessions.lock().await;

        if let Some(entry) = sessions.get_mut(session_id) {
            entry.last_seen = Instant::now();
            return entry.context.clone();
        }

        let cart = self.carts.load(session_id).await;
        tracing::debug!(session_id, lines = cart.items().len(), "Session started");

        let context = Arc::new(Mutex::new(SessionContext::with_cart(cart)));
        sessions.insert(
            session_id.to_owned(),
            SessionEntry {
                context: context.clone(),
                last_seen: Instant::now(),
            },
        );
        context
    }

    /// Drop contexts not used for `max_idle`. A context that a request still
    /// holds, or that has a checkout in flight, is kept.
    /// Returns how many were evicted.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();

        sessions.retain(|_, entry| {
            if entry.last_seen.elapsed() < max_idle || Arc::strong_count(&entry.context) > 1 {
                return true;
            }
            match entry.context.try_lock() {
                Ok(session) => session.checkout_in_flight,
                Err(_) => true,
            }
        });

        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = sessions.len(), "Idle sessions evicted");
        }
        evicted
    }

    /// Write the session's whole cart back to the local store.
    pub async fn persist_cart(&self, session_id: &str, context: &SessionContext) {
        self.carts.save(session_id, context.cart()).await;
    }
}

// =============================================================================
// SESSION ID EXTRACTOR
// =============================================================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn parse(raw: &str) -> AppResult<Self> {
        let raw = raw.trim();

        let well_formed = !raw.is_empty()
            && raw.len() <= MAX_SESSION_ID_LEN
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

        if !well_formed {
            return Err(AppError::Validation(format!(
                "{} must be 1-{} letters, digits, '-' or '_'",
                SESSION_HEADER, MAX_SESSION_ID_LEN
            )));
        }

        Ok(Self(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for SessionId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(SESSION_HEADER)
            .ok_or_else(|| AppError::Validation(format!("Missing {} header", SESSION_HEADER)))?;

        let value = value
            .to_str()
            .map_err(|_| AppError::Validation(format!("{} is not valid text", SESSION_HEADER)))?;

        SessionId::parse(value)
    }
}
