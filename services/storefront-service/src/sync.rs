// =============================================================================
// SYNC LAYER
// =============================================================================
// One read/write/listen interface over the two document backends:
//
//   - remote: PostgreSQL documents table + LISTEN/NOTIFY   (db.rs)
//   - local:  in-process map persisted to a JSON file       (local_store.rs)
//
// The backend is picked once in main.rs and injected as `Arc<dyn
// DocumentStore>`; nothing above this module knows which one is active.
//
// Documents are plain JSON objects. The typed stores (catalog, cart, orders,
// categories) serialize their records through `SyncLayer`, which also owns
// the per-call timeout and the backend latency metrics.
//
// LISTEN MODEL:
// Both backends publish the name of every collection they commit a write to
// on a broadcast channel. A listener re-runs its query after each
// notification for its collection and emits the fresh snapshot, so per
// collection the snapshots follow commit order.
// =============================================================================

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::metrics;

/// Logical collection names shared by both backends
pub mod collections {
    pub const PRODUCTS: &str = "products";
    pub const ORDERS: &str = "orders";
    pub const SETTINGS: &str = "settings";
    /// Local backend only
    pub const CARTS: &str = "carts";

    pub const ALL: [&str; 4] = [PRODUCTS, ORDERS, SETTINGS, CARTS];
}

/// A stored record
pub type Document = Value;

// =============================================================================
// ERRORS
// =============================================================================
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Read failed: {0}")]
    Read(String),

    #[error("Write failed: {0}")]
    Write(String),

    #[error("Backend did not respond within {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Malformed document: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// BACKEND KIND
// =============================================================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Remote,
    Local,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Remote => "remote",
            BackendKind::Local => "local",
        }
    }
}

// =============================================================================
// FILTER
// =============================================================================
/// Single-field equality predicate; the only query shape the stores use.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, document: &Document) -> bool {
        document.get(&self.field) == Some(&self.value)
    }
}

// =============================================================================
// BACKEND TRAIT
// =============================================================================
/// Raw document operations implemented by each backend.
///
/// `query` returns documents in insertion order. `put` overwrites an
/// existing id in place.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    async fn query(&self, collection: &str, filter: Option<&Filter>) -> StoreResult<Vec<Document>>;

    async fn put(&self, collection: &str, id: &str, data: Document) -> StoreResult<()>;

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()>;

    /// Receiver of collection names, one message per committed write
    fn subscribe(&self) -> broadcast::Receiver<String>;

    async fn health_check(&self) -> bool;
}

// =============================================================================
// SYNC LAYER
// =============================================================================
#[derive(Clone)]
pub struct SyncLayer {
    store: Arc<dyn DocumentStore>,
    timeout: Duration,
}

impl SyncLayer {
    pub fn new(store: Arc<dyn DocumentStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub fn backend(&self) -> BackendKind {
        self.store.kind()
    }

    pub async fn health_check(&self) -> bool {
        tokio::time::timeout(self.timeout, self.store.health_check())
            .await
            .unwrap_or(false)
    }

    /// Apply the call timeout and record latency for one backend operation.
    async fn guarded<T, F>(&self, operation: &'static str, call: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        let start = Instant::now();

        let result = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        };

        metrics::record_backend_operation(
            self.backend().as_str(),
            operation,
            result.is_ok(),
            start.elapsed().as_secs_f64(),
        );

        result
    }

    // -------------------------------------------------------------------------
    // READ OPERATIONS
    // -------------------------------------------------------------------------

    pub async fn get<T: DeserializeOwned>(&self, collection: &str, id: &str) -> StoreResult<Option<T>> {
        let document = self.guarded("get", self.store.get(collection, id)).await?;

        Ok(document.map(serde_json::from_value::<T>).transpose()?)
    }

    /// Documents that fail to decode are skipped (and logged) rather than
    /// failing the whole listing.
    pub async fn query<T: DeserializeOwned>(
        &self,
        collection: &str,
        filter: Option<&Filter>,
    ) -> StoreResult<Vec<T>> {
        let documents = self.guarded("query", self.store.query(collection, filter)).await?;

        let records = documents
            .into_iter()
            .filter_map(|document| match serde_json::from_value(document) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(collection, error = %e, "Skipping malformed document");
                    None
                }
            })
            .collect();

        Ok(records)
    }

    // -------------------------------------------------------------------------
    // WRITE OPERATIONS
    // -------------------------------------------------------------------------

    /// Create or overwrite a document. Without an id a random key is
    /// generated. Returns the key written.
    pub async fn put<T: Serialize>(
        &self,
        collection: &str,
        id: Option<&str>,
        data: &T,
    ) -> StoreResult<String> {
        let id = match id {
            Some(id) => id.to_owned(),
            None => Uuid::new_v4().simple().to_string(),
        };
        let document = serde_json::to_value(data)?;

        self.guarded("put", self.store.put(collection, &id, document))
            .await?;

        Ok(id)
    }

    pub async fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        self.guarded("delete", self.store.delete(collection, id)).await
    }

    // -------------------------------------------------------------------------
    // LISTEN
    // -------------------------------------------------------------------------
    /// Real-time view of a collection.
    ///
    /// The subscription yields the current snapshot immediately, then a new
    /// snapshot after every write to `collection`. A failed re-query is
    /// delivered as an `Err` item and the subscription keeps running.
    /// Dropping the subscription stops the background task.
    pub fn listen<T>(&self, collection: &str, filter: Option<Filter>) -> Subscription<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(16);
        let layer = self.clone();
        let collection = collection.to_owned();

        // Subscribe before the first query so no write slips in between
        let mut changes = self.store.subscribe();

        tokio::spawn(async move {
            loop {
                let snapshot = layer.query::<T>(&collection, filter.as_ref()).await;
                if tx.send(snapshot).await.is_err() {
                    break;
                }

                tokio::select! {
                    _ = tx.closed() => break,
                    more = wait_for_change(&mut changes, &collection) => {
                        if !more {
                            break;
                        }
                    }
                }
            }

            tracing::debug!(collection = %collection, "Listener closed");
        });

        Subscription { rx }
    }
}

/// Wait for the next write to `collection`. Returns false once the backend
/// stops publishing.
async fn wait_for_change(changes: &mut broadcast::Receiver<String>, collection: &str) -> bool {
    loop {
        match changes.recv().await {
            Ok(changed) if changed == collection => return true,
            Ok(_) => continue,
            // Missed notifications collapse into one re-query
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(collection, skipped, "Change feed lagged");
                return true;
            }
            Err(broadcast::error::RecvError::Closed) => return false,
        }
    }
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================
pub struct Subscription<T> {
    rx: mpsc::Receiver<StoreResult<Vec<T>>>,
}

impl<T> Subscription<T> {
    /// Next snapshot, or `None` once the feed has shut down.
    pub async fn next(&mut self) -> Option<StoreResult<Vec<T>>> {
        self.rx.recv().await
    }
}
