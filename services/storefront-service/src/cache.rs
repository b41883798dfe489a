// =============================================================================
// PRODUCT CACHE (Redis)
// =============================================================================
// Read-through cache for single product documents, keyed `product:<id>`.
// Cache failures never fail a request: a miss or a Redis error falls through
// to the document backend, and write/invalidate errors are ignored.
//
// Every Redis call is bounded by the backend timeout. A call that runs out
// of time counts as a miss (or an unhealthy PING), never as a hang.
// =============================================================================

use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::RedisResult;

use crate::metrics;
use crate::models::Product;

#[derive(Clone)]
pub struct ProductCache {
    /// `None` when no REDIS_URL is configured
    conn: Option<ConnectionManager>,
    ttl_secs: u64,
    timeout: Duration,
}

impl ProductCache {
    pub fn disabled() -> Self {
        Self {
            conn: None,
            ttl_secs: 0,
            timeout: Duration::ZERO,
        }
    }

    pub async fn connect(redis_url: &str, ttl_secs: u64, timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Invalid REDIS_URL")?;
        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .context("Timed out connecting to Redis")?
            .context("Failed to connect to Redis")?;

        Ok(Self {
            conn: Some(conn),
            ttl_secs,
            timeout,
        })
    }

    fn key(id: &str) -> String {
        format!("product:{}", id)
    }

    /// Run one Redis call under the timeout and record its latency.
    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = RedisResult<T>>,
    ) -> Option<T> {
        let start = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, call).await;
        metrics::record_redis_operation(operation, start.elapsed().as_secs_f64());

        match outcome {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                tracing::debug!(operation, error = %e, "Redis call failed");
                None
            }
            Err(_) => {
                tracing::warn!(operation, timeout_ms = self.timeout.as_millis() as u64, "Redis call timed out");
                None
            }
        }
    }

    pub async fn get(&self, id: &str) -> Option<Product> {
        let mut conn = self.conn.clone()?;

        let cached = self
            .bounded(
                "get",
                redis::cmd("GET")
                    .arg(Self::key(id))
                    .query_async::<_, Option<String>>(&mut conn),
            )
            .await
            .flatten();

        cached.and_then(|json| serde_json::from_str(&json).ok())
    }

    pub async fn put(&self, product: &Product) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };
        let Ok(json) = serde_json::to_string(product) else {
            return;
        };

        self.bounded(
            "set",
            redis::cmd("SETEX")
                .arg(Self::key(&product.id))
                .arg(self.ttl_secs)
                .arg(json)
                .query_async::<_, ()>(&mut conn),
        )
        .await;
    }

    pub async fn invalidate(&self, id: &str) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };

        self.bounded(
            "delete",
            redis::cmd("DEL")
                .arg(Self::key(id))
                .query_async::<_, ()>(&mut conn),
        )
        .await;
    }

    /// `None` when the cache is disabled
    pub async fn health_check(&self) -> Option<bool> {
        let mut conn = self.conn.clone()?;

        Some(
            self.bounded("ping", redis::cmd("PING").query_async::<_, String>(&mut conn))
                .await
                .is_some(),
        )
    }
}
