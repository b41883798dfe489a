// =============================================================================
// METRICS MODULE
// =============================================================================
// Prometheus metrics for the storefront service.
//
// METRIC TYPES USED:
// - Counter: requests, orders created, status transitions, cart mutations
// - Gauge: which backend is active
// - Histogram: HTTP, backend and cache latency
// =============================================================================

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// METRIC NAMES
// =============================================================================

/// Labels: method, endpoint, status
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";

/// Labels: method, endpoint
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

/// Labels: backend (remote/local), operation (get/query/put/delete), outcome
pub const BACKEND_OPERATION_DURATION_SECONDS: &str = "backend_operation_duration_seconds";

/// 1 for the backend selected at startup. Labels: backend
pub const BACKEND_ACTIVE: &str = "storefront_backend_active";

/// Labels: operation (get/set/delete)
pub const REDIS_OPERATION_DURATION_SECONDS: &str = "redis_operation_duration_seconds";

pub const ORDERS_CREATED_TOTAL: &str = "storefront_orders_created_total";

/// Labels: from, to
pub const ORDER_STATUS_TRANSITIONS_TOTAL: &str = "storefront_order_status_transitions_total";

/// Labels: action (add/update/remove/clear)
pub const CART_MUTATIONS_TOTAL: &str = "storefront_cart_mutations_total";

// =============================================================================
// SETUP FUNCTION
// =============================================================================
/// Install the global Prometheus recorder and describe every metric.
pub fn setup_metrics() -> Result<PrometheusHandle> {
    // 1ms .. 15s; the top bucket matches the backend call timeout
    let latency_buckets = &[
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0,
    ];

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(HTTP_REQUEST_DURATION_SECONDS.to_string()),
            latency_buckets,
        )?
        .set_buckets_for_metric(
            Matcher::Full(BACKEND_OPERATION_DURATION_SECONDS.to_string()),
            latency_buckets,
        )?
        .set_buckets_for_metric(
            Matcher::Full(REDIS_OPERATION_DURATION_SECONDS.to_string()),
            latency_buckets,
        )?
        .install_recorder()?;

    describe_counter!(HTTP_REQUESTS_TOTAL, "Total number of HTTP requests received");
    describe_histogram!(HTTP_REQUEST_DURATION_SECONDS, "HTTP request latency in seconds");
    describe_histogram!(
        BACKEND_OPERATION_DURATION_SECONDS,
        "Document backend call latency in seconds"
    );
    describe_gauge!(BACKEND_ACTIVE, "Document backend selected at startup");
    describe_histogram!(
        REDIS_OPERATION_DURATION_SECONDS,
        "Redis cache operation latency in seconds"
    );
    describe_counter!(ORDERS_CREATED_TOTAL, "Orders written at checkout or by admin");
    describe_counter!(
        ORDER_STATUS_TRANSITIONS_TOTAL,
        "Accepted order status transitions"
    );
    describe_counter!(CART_MUTATIONS_TOTAL, "Cart add/update/remove/clear operations");

    Ok(handle)
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

pub fn record_http_request(method: &str, endpoint: &str, status: u16, duration_secs: f64) {
    counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string()
    )
    .record(duration_secs);
}

pub fn record_backend_operation(backend: &str, operation: &str, success: bool, duration_secs: f64) {
    let outcome = if success { "success" } else { "failed" };
    histogram!(
        BACKEND_OPERATION_DURATION_SECONDS,
        "backend" => backend.to_string(),
        "operation" => operation.to_string(),
        "outcome" => outcome
    )
    .record(duration_secs);
}

pub fn set_active_backend(backend: &str) {
    gauge!(BACKEND_ACTIVE, "backend" => backend.to_string()).set(1.0);
}

pub fn record_redis_operation(operation: &str, duration_secs: f64) {
    histogram!(
        REDIS_OPERATION_DURATION_SECONDS,
        "operation" => operation.to_string()
    )
    .record(duration_secs);
}

pub fn record_order_created() {
    counter!(ORDERS_CREATED_TOTAL).increment(1);
}

pub fn record_status_transition(from: &str, to: &str) {
    counter!(
        ORDER_STATUS_TRANSITIONS_TOTAL,
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

pub fn record_cart_mutation(action: &'static str) {
    counter!(CART_MUTATIONS_TOTAL, "action" => action).increment(1);
}
