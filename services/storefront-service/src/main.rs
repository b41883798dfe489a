// =============================================================================
// STOREFRONT SERVICE - Main Entry Point
// =============================================================================
// Catalog, cart, checkout and order tracking for the storefront and its
// admin panel.
//
// WHAT THIS SERVICE DOES:
// - Serves products and categories, managed through the admin endpoints
// - Keeps a per-session cart and color selection, and turns the cart into
//   an order at checkout
// - Moves orders through their status lifecycle and streams changes live
// - Exposes Prometheus metrics
//
// BACKENDS:
// PostgreSQL (DATABASE_URL) is the shared document store. When it is not
// configured or cannot be reached at startup, the service runs on the local
// JSON store instead for the whole process lifetime. Carts always use the
// local store. Redis (REDIS_URL) is an optional product read cache.
//
// LEARNING NOTES:
// - `#[tokio::main]` builds the multi-threaded runtime every handler,
//   listener task and sweeper runs on
// - `AppState` is shared as `Arc<AppState>`; handlers receive it through the
//   `State` extractor without cloning the stores themselves
// - Layers wrap the whole router: `TraceLayer` opens a span per request and
//   `CorsLayer` answers browser preflights for the storefront pages
// =============================================================================

mod cache;       // Redis product read cache (cache.rs)
mod cart;        // Cart line items and persistence (cart.rs)
mod catalog;     // Product catalog (catalog.rs)
mod categories;  // Category registry (categories.rs)
mod checkout;    // Cart -> order (checkout.rs)
mod config;      // Configuration loading (config.rs)
mod db;          // PostgreSQL document backend (db.rs)
mod error;       // Error types (error.rs)
mod handlers;    // HTTP request handlers (handlers.rs)
mod local_store; // Local JSON document backend (local_store.rs)
mod metrics;     // Prometheus metrics setup (metrics.rs)
mod models;      // Data structures (models.rs)
mod orders;      // Order store and status lifecycle (orders.rs)
mod session;     // Per-session state (session.rs)
mod sync;        // Backend-agnostic document access (sync.rs)
mod validation;  // Input checks (validation.rs)
mod variant;     // Color variant selection (variant.rs)

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cache::ProductCache;
use crate::cart::CartManager;
use crate::catalog::ProductCatalog;
use crate::categories::CategoryRegistry;
use crate::config::Config;
use crate::db::Database;
use crate::local_store::LocalStore;
use crate::metrics::setup_metrics;
use crate::orders::OrderStore;
use crate::session::SessionRegistry;
use crate::sync::{DocumentStore, SyncLayer};

/// How often idle sessions are swept out of memory
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

// -----------------------------------------------------------------------------
// APPLICATION STATE
// -----------------------------------------------------------------------------
pub struct AppState {
    /// Active document backend (remote or local)
    pub sync: SyncLayer,

    pub cache: ProductCache,

    pub catalog: ProductCatalog,

    pub categories: CategoryRegistry,

    pub orders: OrderStore,

    /// Per-session carts and variant selections
    pub sessions: SessionRegistry,

    /// Used to render metrics in Prometheus format
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -------------------------------------------------------------------------
    // STEP 1: Environment and logging
    // -------------------------------------------------------------------------
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,storefront_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting Storefront Service...");

    // -------------------------------------------------------------------------
    // STEP 2: Configuration and metrics
    // -------------------------------------------------------------------------
    let config = Config::from_env()?;
    info!(port = config.port, "Configuration loaded");

    let metrics_handle = setup_metrics()?;
    info!("Prometheus metrics initialized");

    // -------------------------------------------------------------------------
    // STEP 3: Document backends
    // -------------------------------------------------------------------------
    // The local store is always opened: it holds carts, and it is the
    // fallback backend for everything else.
    let local = Arc::new(LocalStore::open(&config.local_store_path).await);
    info!(path = %config.local_store_path.display(), "Local store opened");

    let backend = select_backend(&config, local.clone()).await;
    let sync = SyncLayer::new(backend, config.backend_timeout);

    metrics::set_active_backend(sync.backend().as_str());
    info!(backend = sync.backend().as_str(), "Document backend selected");

    // -------------------------------------------------------------------------
    // STEP 4: Product cache (optional)
    // -------------------------------------------------------------------------
    let cache = match &config.redis_url {
        Some(url) => match ProductCache::connect(url, config.cache_ttl_secs, config.backend_timeout).await {
            Ok(cache) => {
                info!("Connected to Redis");
                cache
            }
            Err(e) => {
                warn!(error = %e, "Redis unavailable, product cache disabled");
                ProductCache::disabled()
            }
        },
        None => ProductCache::disabled(),
    };

    // -------------------------------------------------------------------------
    // STEP 5: Application state
    // -------------------------------------------------------------------------
    let state = Arc::new(AppState {
        catalog: ProductCatalog::new(sync.clone(), cache.clone()),
        categories: CategoryRegistry::new(sync.clone()),
        orders: OrderStore::new(sync.clone()),
        sessions: SessionRegistry::new(CartManager::new(local, config.backend_timeout)),
        sync,
        cache,
        metrics_handle,
    });

    // Forget idle shoppers; their carts stay in the local store
    let sweeper = state.clone();
    let session_idle = config.session_idle;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            sweeper.sessions.evict_idle(session_idle).await;
        }
    });

    // -------------------------------------------------------------------------
    // STEP 6: Routes
    // -------------------------------------------------------------------------
    let app = Router::new()
        // ----- Health, Readiness & Metrics -----
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_handler))
        // ----- Catalog -----
        .route(
            "/api/v1/products",
            get(handlers::list_products).post(handlers::create_product),
        )
        .route(
            "/api/v1/products/:id",
            get(handlers::get_product)
                .put(handlers::update_product)
                .delete(handlers::delete_product),
        )
        .route("/api/v1/products/:id/display", get(handlers::product_display))
        .route("/api/v1/products/:id/variant", post(handlers::select_variant))
        // ----- Categories -----
        .route(
            "/api/v1/categories",
            get(handlers::list_categories).post(handlers::add_category),
        )
        .route("/api/v1/categories/summary", get(handlers::category_summaries))
        .route("/api/v1/categories/:slug", delete(handlers::delete_category))
        // ----- Cart & Checkout -----
        .route(
            "/api/v1/cart",
            get(handlers::get_cart).delete(handlers::clear_cart),
        )
        .route("/api/v1/cart/items", post(handlers::add_to_cart))
        .route(
            "/api/v1/cart/items/:index",
            put(handlers::update_cart_item).delete(handlers::remove_cart_item),
        )
        .route("/api/v1/checkout", post(handlers::submit_checkout))
        // ----- Orders -----
        .route(
            "/api/v1/orders",
            get(handlers::list_orders).post(handlers::create_order),
        )
        .route("/api/v1/orders/stream", get(handlers::stream_orders))
        .route("/api/v1/orders/stats", get(handlers::order_stats))
        .route("/api/v1/orders/statuses", get(handlers::order_statuses))
        .route(
            "/api/v1/orders/:id",
            get(handlers::get_order).delete(handlers::delete_order),
        )
        .route("/api/v1/orders/:id/status", put(handlers::set_order_status))
        .route("/api/v1/customers/:email/orders", get(handlers::customer_orders))
        .route(
            "/api/v1/customers/:email/orders/stream",
            get(handlers::stream_customer_orders),
        )
        // ----- Middleware Layers -----
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // -------------------------------------------------------------------------
    // STEP 7: Start the HTTP server
    // -------------------------------------------------------------------------
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(address = %addr, "Storefront Service is listening");

    axum::serve(listener, app).await?;

    Ok(())
}

/// PostgreSQL when configured and reachable, otherwise the local store.
/// Decided once; the process never switches backends afterwards.
///
/// # Arguments
/// * `config` - Supplies the optional `DATABASE_URL`
/// * `local` - The already opened local store, returned as the fallback
///
/// # Returns
/// The backend every non-cart collection will use for the process lifetime.
async fn select_backend(config: &Config, local: Arc<LocalStore>) -> Arc<dyn DocumentStore> {
    let Some(url) = &config.database_url else {
        info!("DATABASE_URL not set, using local store");
        return local;
    };

    match connect_remote(url).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            warn!(error = %e, "Remote backend unavailable, falling back to local store");
            local
        }
    }
}

async fn connect_remote(url: &str) -> anyhow::Result<Database> {
    let db = Database::connect(url).await?;
    info!("Connected to PostgreSQL");

    db.run_migrations().await?;
    info!("Database migrations completed");

    db.spawn_change_listener().await?;
    Ok(db)
}
