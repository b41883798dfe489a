// =============================================================================
// HANDLERS MODULE
// =============================================================================
// HTTP request handlers (controller layer). Each handler extracts its inputs,
// calls one store operation, records the request metric and returns JSON.
// Failures are `AppError`s and become `{ success: false, error, code }`.
//
// Cart, variant and checkout endpoints are per shopper and require the
// `x-session-id` header (see session.rs).
//
// LEARNING NOTES:
// - Extractors (`State`, `Path`, `Query`, `Json`, `SessionId`) run before the
//   handler body; a rejection never reaches it
// - Returning `AppResult<T>` lets `?` turn any store error into the JSON
//   error response through `AppError::into_response`
// - Each body runs inside `timed`, which records the request metric with the
//   final status code, failures included
// - SSE handlers return a `Stream`; axum keeps the connection open and drops
//   the stream (and its backend subscription) when the client goes away
// =============================================================================

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;

use crate::checkout;
use crate::error::AppResult;
use crate::metrics;
use crate::models::*;
use crate::orders::OrderFeed;
use crate::session::SessionId;
use crate::AppState;

/// Run a handler body and record the request metric with the status the
/// request actually ends in.
///
/// # Arguments
/// * `method` / `endpoint` - Metric labels (route template, not the raw path)
/// * `success` - Status reported when the body returns `Ok`
/// * `body` - The handler's work
///
/// # Returns
/// The body's result, unchanged. An `Err` is recorded with the status its
/// `AppError` maps to.
async fn timed<T>(
    method: &str,
    endpoint: &str,
    success: StatusCode,
    body: impl Future<Output = AppResult<T>>,
) -> AppResult<T> {
    let start = Instant::now();
    let result = body.await;

    let status = outcome_status(&result, success);
    metrics::record_http_request(method, endpoint, status.as_u16(), start.elapsed().as_secs_f64());

    result
}

fn outcome_status<T>(result: &AppResult<T>, success: StatusCode) -> StatusCode {
    match result {
        Ok(_) => success,
        Err(e) => e.status_code(),
    }
}

// =============================================================================
// HEALTH CHECK ENDPOINTS
// =============================================================================

/// Liveness probe
///
/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "storefront-service".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness probe. Reports which document backend is serving and whether
/// it (and the product cache, when configured) answers.
///
/// GET /ready
pub async fn readiness_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let backend_healthy = state.sync.health_check().await;
    let redis = state.cache.health_check().await;

    let ready = backend_healthy && redis != Some(false);
    let (code, status) = if ready {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
    };

    (
        code,
        Json(ReadinessResponse {
            status: status.to_string(),
            checks: ReadinessChecks {
                backend: state.sync.backend().as_str().to_string(),
                backend_healthy,
                redis,
            },
        }),
    )
}

// =============================================================================
// METRICS ENDPOINT
// =============================================================================
/// GET /metrics
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}

// =============================================================================
// PRODUCT ENDPOINTS
// =============================================================================

/// Query parameters for the product list
///
/// GET /api/v1/products?category=jeans
#[derive(Debug, Deserialize)]
pub struct ProductListParams {
    /// Category slug; absent or `all` lists everything
    pub category: Option<String>,
}

/// GET /api/v1/products
pub async fn list_products(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ProductListParams>,
) -> AppResult<Json<Vec<Product>>> {
    timed("GET", "/api/v1/products", StatusCode::OK, async move {
        let products = state.catalog.list_products(params.category.as_deref()).await?;

        Ok(Json(products))
    })
    .await
}

/// GET /api/v1/products/:id
pub async fn get_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Product>> {
    timed("GET", "/api/v1/products/:id", StatusCode::OK, async move {
        let product = state.catalog.get_product(&id).await?;

        Ok(Json(product))
    })
    .await
}

/// POST /api/v1/products
pub async fn create_product(
    State(state): State<Arc<AppState>>,
    Json(input): Json<ProductInput>,
) -> AppResult<(StatusCode, Json<Product>)> {
    timed("POST", "/api/v1/products", StatusCode::CREATED, async move {
        let product = state.catalog.create_product(input).await?;

        Ok((StatusCode::CREATED, Json(product)))
    })
    .await
}

/// PUT /api/v1/products/:id
pub async fn update_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(input): Json<ProductInput>,
) -> AppResult<Json<Product>> {
    timed("PUT", "/api/v1/products/:id", StatusCode::OK, async move {
        let product = state.catalog.update_product(&id, input).await?;

        Ok(Json(product))
    })
    .await
}

/// Existing orders and carts keep their own copy of the product.
///
/// DELETE /api/v1/products/:id
pub async fn delete_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<SuccessResponse>> {
    timed("DELETE", "/api/v1/products/:id", StatusCode::OK, async move {
        state.catalog.delete_product(&id).await?;

        Ok(Json(SuccessResponse::ok()))
    })
    .await
}

// -----------------------------------------------------------------------------
// VARIANT SELECTION
// -----------------------------------------------------------------------------

/// What the product card shows for this session
///
/// GET /api/v1/products/:id/display
pub async fn product_display(
    State(state): State<Arc<AppState>>,
    session_id: SessionId,
    Path(id): Path<String>,
) -> AppResult<Json<DisplayUnit>> {
    timed("GET", "/api/v1/products/:id/display", StatusCode::OK, async move {
        let product = state.catalog.get_product(&id).await?;
        let context = state.sessions.context(session_id.as_str()).await;
        let unit = context.lock().await.display(&product);

        Ok(Json(unit))
    })
    .await
}

/// Switch the active color variant; images, stock and index change together.
///
/// POST /api/v1/products/:id/variant
///
/// # Request Body
/// ```json
/// { "index": 1 }
/// ```
pub async fn select_variant(
    State(state): State<Arc<AppState>>,
    session_id: SessionId,
    Path(id): Path<String>,
    Json(request): Json<SelectVariantRequest>,
) -> AppResult<Json<DisplayUnit>> {
    timed("POST", "/api/v1/products/:id/variant", StatusCode::OK, async move {
        let product = state.catalog.get_product(&id).await?;
        let context = state.sessions.context(session_id.as_str()).await;
        let unit = context.lock().await.select_variant(&product, request.index)?;

        Ok(Json(unit))
    })
    .await
}

// =============================================================================
// CATEGORY ENDPOINTS
// =============================================================================

/// GET /api/v1/categories
pub async fn list_categories(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<String>>> {
    timed("GET", "/api/v1/categories", StatusCode::OK, async move {
        let categories = state.categories.get_categories().await?;

        Ok(Json(categories))
    })
    .await
}

/// POST /api/v1/categories
///
/// # Request Body
/// ```json
/// { "name": "Summer Wear" }
/// ```
pub async fn add_category(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AddCategoryRequest>,
) -> AppResult<(StatusCode, Json<CreatedResponse>)> {
    timed("POST", "/api/v1/categories", StatusCode::CREATED, async move {
        let slug = state.categories.add_category(&request.name).await?;

        Ok((
            StatusCode::CREATED,
            Json(CreatedResponse {
                success: true,
                id: slug,
            }),
        ))
    })
    .await
}

/// DELETE /api/v1/categories/:slug
pub async fn delete_category(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> AppResult<Json<SuccessResponse>> {
    timed("DELETE", "/api/v1/categories/:slug", StatusCode::OK, async move {
        state.categories.delete_category(&slug).await?;

        Ok(Json(SuccessResponse::ok()))
    })
    .await
}

/// GET /api/v1/categories/summary
pub async fn category_summaries(
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<Vec<CategorySummary>>> {
    timed("GET", "/api/v1/categories/summary", StatusCode::OK, async move {
        let summaries = state.categories.summaries(&state.catalog).await?;

        Ok(Json(summaries))
    })
    .await
}

// =============================================================================
// CART ENDPOINTS
// =============================================================================
// Every mutation persists the whole cart while the session lock is held, so
// stored snapshots follow the order the mutations were applied in.

/// GET /api/v1/cart
pub async fn get_cart(
    State(state): State<Arc<AppState>>,
    session_id: SessionId,
) -> AppResult<Json<CartView>> {
    timed("GET", "/api/v1/cart", StatusCode::OK, async move {
        let context = state.sessions.context(session_id.as_str()).await;
        let view = context.lock().await.cart().view()?;

        Ok(Json(view))
    })
    .await
}

/// Add the product in its currently selected color.
///
/// POST /api/v1/cart/items
///
/// # Request Body
/// ```json
/// { "productId": "8f14e45fceea167a5a36dedd4bea2543" }
/// ```
///
/// # Response
/// - 200 OK: updated cart
/// - 404 Not Found: product no longer exists
/// - 409 Conflict: selected variant out of stock, or checkout in progress
pub async fn add_to_cart(
    State(state): State<Arc<AppState>>,
    session_id: SessionId,
    Json(request): Json<AddToCartRequest>,
) -> AppResult<Json<CartView>> {
    timed("POST", "/api/v1/cart/items", StatusCode::OK, async move {
        let product = state.catalog.get_product(&request.product_id).await?;

        let context = state.sessions.context(session_id.as_str()).await;
        let mut session = context.lock().await;
        let view = session.add_product(&product)?;
        state.sessions.persist_cart(session_id.as_str(), &session).await;

        tracing::debug!(
            session_id = %session_id.as_str(),
            product_id = %product.id,
            count = view.count,
            "Added to cart"
        );

        Ok(Json(view))
    })
    .await
}

/// PUT /api/v1/cart/items/:index
///
/// Quantities below 1 are stored as 1.
pub async fn update_cart_item(
    State(state): State<Arc<AppState>>,
    session_id: SessionId,
    Path(index): Path<usize>,
    Json(request): Json<UpdateQuantityRequest>,
) -> AppResult<Json<CartView>> {
    timed("PUT", "/api/v1/cart/items/:index", StatusCode::OK, async move {
        let context = state.sessions.context(session_id.as_str()).await;
        let mut session = context.lock().await;
        let view = session.update_quantity(index, request.quantity)?;
        state.sessions.persist_cart(session_id.as_str(), &session).await;

        Ok(Json(view))
    })
    .await
}

/// DELETE /api/v1/cart/items/:index
pub async fn remove_cart_item(
    State(state): State<Arc<AppState>>,
    session_id: SessionId,
    Path(index): Path<usize>,
) -> AppResult<Json<CartView>> {
    timed("DELETE", "/api/v1/cart/items/:index", StatusCode::OK, async move {
        let context = state.sessions.context(session_id.as_str()).await;
        let mut session = context.lock().await;
        let view = session.remove(index)?;
        state.sessions.persist_cart(session_id.as_str(), &session).await;

        Ok(Json(view))
    })
    .await
}

/// DELETE /api/v1/cart
pub async fn clear_cart(
    State(state): State<Arc<AppState>>,
    session_id: SessionId,
) -> AppResult<Json<CartView>> {
    timed("DELETE", "/api/v1/cart", StatusCode::OK, async move {
        let context = state.sessions.context(session_id.as_str()).await;
        let mut session = context.lock().await;
        let view = session.clear()?;
        state.sessions.persist_cart(session_id.as_str(), &session).await;

        Ok(Json(view))
    })
    .await
}

// =============================================================================
// CHECKOUT
// =============================================================================
/// Place an order from the session's cart.
///
/// POST /api/v1/checkout
///
/// # Request Body
/// ```json
/// {
///   "customerName": "Asha Verma",
///   "customerEmail": "asha@example.com",
///   "customerPhone": "9876543210",
///   "customerAddress": "14 MG Road, Indore",
///   "idempotencyKey": "b7c1e0"
/// }
/// ```
pub async fn submit_checkout(
    State(state): State<Arc<AppState>>,
    session_id: SessionId,
    Json(request): Json<CheckoutRequest>,
) -> AppResult<(StatusCode, Json<OrderCreatedResponse>)> {
    timed("POST", "/api/v1/checkout", StatusCode::CREATED, async move {
        let order = checkout::checkout(&state.sessions, &state.orders, session_id.as_str(), request).await?;

        Ok((
            StatusCode::CREATED,
            Json(OrderCreatedResponse {
                success: true,
                order_id: order.order_id,
            }),
        ))
    })
    .await
}

// =============================================================================
// ORDER ENDPOINTS
// =============================================================================

/// GET /api/v1/orders?status=pending
#[derive(Debug, Deserialize)]
pub struct OrderListParams {
    pub status: Option<OrderStatus>,
}

/// GET /api/v1/orders
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    Query(params): Query<OrderListParams>,
) -> AppResult<Json<Vec<Order>>> {
    timed("GET", "/api/v1/orders", StatusCode::OK, async move {
        let orders = state.orders.list_orders(params.status).await?;

        Ok(Json(orders))
    })
    .await
}

/// Create an order directly from items (no session cart involved).
///
/// POST /api/v1/orders
///
/// # Request Body
/// ```json
/// {
///   "customerName": "Asha",
///   "customerEmail": "a@b.com",
///   "customerPhone": "9876543210",
///   "customerAddress": "12 Lake Road, Pune",
///   "items": [{ "id": "p1", "name": "Tee", "price": 100, "quantity": 2 }],
///   "totalAmount": 200
/// }
/// ```
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NewOrder>,
) -> AppResult<(StatusCode, Json<OrderCreatedResponse>)> {
    timed("POST", "/api/v1/orders", StatusCode::CREATED, async move {
        let order = state.orders.create_order(request).await?;

        Ok((
            StatusCode::CREATED,
            Json(OrderCreatedResponse {
                success: true,
                order_id: order.order_id,
            }),
        ))
    })
    .await
}

/// GET /api/v1/orders/:id
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Order>> {
    timed("GET", "/api/v1/orders/:id", StatusCode::OK, async move {
        let order = state.orders.get_order(&id).await?;

        Ok(Json(order))
    })
    .await
}

/// PUT /api/v1/orders/:id/status
///
/// # Response
/// - 200 OK: updated order
/// - 409 Conflict: `INVALID_TRANSITION` (e.g. pending -> delivered)
pub async fn set_order_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<SetStatusRequest>,
) -> AppResult<Json<Order>> {
    timed("PUT", "/api/v1/orders/:id/status", StatusCode::OK, async move {
        let order = state.orders.set_status(&id, request.status).await?;

        Ok(Json(order))
    })
    .await
}

/// DELETE /api/v1/orders/:id
pub async fn delete_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<SuccessResponse>> {
    timed("DELETE", "/api/v1/orders/:id", StatusCode::OK, async move {
        state.orders.delete_order(&id).await?;

        Ok(Json(SuccessResponse::ok()))
    })
    .await
}

/// GET /api/v1/orders/stats
pub async fn order_stats(State(state): State<Arc<AppState>>) -> AppResult<Json<OrderStats>> {
    timed("GET", "/api/v1/orders/stats", StatusCode::OK, async move {
        let stats = state.orders.stats().await?;

        Ok(Json(stats))
    })
    .await
}

/// Label and description for every status, in lifecycle order
///
/// GET /api/v1/orders/statuses
pub async fn order_statuses() -> Json<Vec<StatusInfo>> {
    Json(OrderStatus::ALL.iter().map(OrderStatus::info).collect())
}

/// GET /api/v1/customers/:email/orders
pub async fn customer_orders(
    State(state): State<Arc<AppState>>,
    Path(email): Path<String>,
) -> AppResult<Json<Vec<Order>>> {
    timed("GET", "/api/v1/customers/:email/orders", StatusCode::OK, async move {
        let orders = state.orders.list_orders_for_customer(&email).await?;

        Ok(Json(orders))
    })
    .await
}

// -----------------------------------------------------------------------------
// LIVE ORDER FEEDS (Server-Sent Events)
// -----------------------------------------------------------------------------
// Each event is a full, sorted snapshot (`event: orders`). A failed re-query
// is sent as `event: error` and the stream stays open.

/// GET /api/v1/orders/stream?status=pending
pub async fn stream_orders(
    State(state): State<Arc<AppState>>,
    Query(params): Query<OrderListParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    Sse::new(order_events(state.orders.listen_orders(params.status))).keep_alive(KeepAlive::default())
}

/// GET /api/v1/customers/:email/orders/stream
pub async fn stream_customer_orders(
    State(state): State<Arc<AppState>>,
    Path(email): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    Sse::new(order_events(state.orders.listen_orders_for_customer(&email)))
        .keep_alive(KeepAlive::default())
}

fn order_events(feed: OrderFeed) -> impl Stream<Item = Result<Event, Infallible>> {
    feed.into_stream().map(|snapshot| {
        let event = match snapshot {
            Ok(orders) => Event::default()
                .event("orders")
                .json_data(&orders)
                .unwrap_or_else(|e| Event::default().event("error").data(e.to_string())),
            Err(e) => Event::default().event("error").data(e.to_string()),
        };
        Ok(event)
    })
}

// =============================================================================
// TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[test]
    fn test_failures_are_recorded_with_their_status() {
        let ok: AppResult<()> = Ok(());
        assert_eq!(outcome_status(&ok, StatusCode::CREATED), StatusCode::CREATED);

        let conflict: AppResult<()> = Err(AppError::Conflict("busy".into()));
        assert_eq!(outcome_status(&conflict, StatusCode::CREATED), StatusCode::CONFLICT);

        let missing: AppResult<()> = Err(AppError::NotFound("ORD-1".into()));
        assert_eq!(outcome_status(&missing, StatusCode::OK), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_timed_passes_the_result_through() {
        let result = timed("GET", "/test", StatusCode::OK, async {
            Err::<(), _>(AppError::Validation("bad".into()))
        })
        .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
