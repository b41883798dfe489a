// =============================================================================
// LOCAL DOCUMENT STORE
// =============================================================================
// Single-node fallback backend: every collection is an ordered list of
// documents held in memory and written out as one JSON file after each
// mutation (the server-side analog of browser local storage).
//
// - A missing or unreadable file loads as an empty store.
// - A mutation whose file write fails is rolled back in memory, so a caller
//   never observes a write that was not persisted.
// - Each committed mutation is published on the change channel, which is
//   what lets `SyncLayer::listen` work without the remote backend.
// - A mutation runs to completion on its own task. A caller that stops
//   waiting (the `SyncLayer` timeout, a dropped request) cannot leave memory
//   changed but unsaved or saved but unannounced.
// =============================================================================

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};

use crate::sync::{BackendKind, Document, DocumentStore, Filter, StoreError, StoreResult};

/// On-disk layout: `{ "collections": { "<name>": [ {id, data}, ... ] } }`
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct LocalState {
    #[serde(default)]
    collections: BTreeMap<String, Vec<StoredDocument>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredDocument {
    id: String,
    data: Document,
}

pub struct LocalStore {
    inner: Arc<Shared>,
}

struct Shared {
    /// `None` keeps everything in memory (tests)
    path: Option<PathBuf>,
    state: RwLock<LocalState>,
    changes: broadcast::Sender<String>,
}

impl LocalStore {
    // -------------------------------------------------------------------------
    // CONSTRUCTION
    // -------------------------------------------------------------------------

    /// Open (or start) the store backed by `path`.
    pub async fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();

        let state = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => match serde_json::from_str::<LocalState>(&contents) {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Local store file is corrupt, starting empty");
                    LocalState::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LocalState::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Local store file unreadable, starting empty");
                LocalState::default()
            }
        };

        Self::with_state(Some(path), state)
    }

    pub fn in_memory() -> Self {
        Self::with_state(None, LocalState::default())
    }

    fn with_state(path: Option<PathBuf>, state: LocalState) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Shared {
                path,
                state: RwLock::new(state),
                changes,
            }),
        }
    }

    /// Apply `mutate` to one collection on a task of its own and wait for
    /// the outcome.
    async fn mutate<F>(&self, collection: &str, mutate: F) -> StoreResult<()>
    where
        F: FnOnce(&mut Vec<StoredDocument>) + Send + 'static,
    {
        let shared = self.inner.clone();
        let collection = collection.to_owned();

        tokio::spawn(async move { shared.mutate(&collection, mutate).await })
            .await
            .map_err(|e| StoreError::Write(format!("local write task failed: {}", e)))?
    }
}

impl Shared {
    // -------------------------------------------------------------------------
    // PERSISTENCE
    // -------------------------------------------------------------------------

    /// Write the whole state to disk via a temp file + rename.
    async fn persist(&self, state: &LocalState) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let contents = serde_json::to_vec_pretty(state)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Write(e.to_string()))?;
        }

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| StoreError::Write(e.to_string()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| StoreError::Write(e.to_string()))?;

        Ok(())
    }

    /// Apply `mutate` to one collection, persist, and publish the change.
    /// On persist failure the collection is restored.
    async fn mutate<F>(&self, collection: &str, mutate: F) -> StoreResult<()>
    where
        F: FnOnce(&mut Vec<StoredDocument>),
    {
        let mut state = self.state.write().await;
        let previous = state.collections.get(collection).cloned();

        mutate(state.collections.entry(collection.to_owned()).or_default());

        if let Err(e) = self.persist(&state).await {
            match previous {
                Some(documents) => {
                    state.collections.insert(collection.to_owned(), documents);
                }
                None => {
                    state.collections.remove(collection);
                }
            }
            return Err(e);
        }
        drop(state);

        // No receivers is fine
        let _ = self.changes.send(collection.to_owned());
        Ok(())
    }
}

// =============================================================================
// DOCUMENT STORE IMPLEMENTATION
// =============================================================================
#[async_trait]
impl DocumentStore for LocalStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let state = self.inner.state.read().await;

        Ok(state
            .collections
            .get(collection)
            .and_then(|documents| documents.iter().find(|d| d.id == id))
            .map(|d| d.data.clone()))
    }

    async fn query(&self, collection: &str, filter: Option<&Filter>) -> StoreResult<Vec<Document>> {
        let state = self.inner.state.read().await;

        Ok(state
            .collections
            .get(collection)
            .map(|documents| {
                documents
                    .iter()
                    .filter(|d| filter.map_or(true, |f| f.matches(&d.data)))
                    .map(|d| d.data.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn put(&self, collection: &str, id: &str, data: Document) -> StoreResult<()> {
        let id = id.to_owned();
        self.mutate(collection, move |documents| {
            match documents.iter_mut().find(|d| d.id == id) {
                Some(existing) => existing.data = data,
                None => documents.push(StoredDocument { id, data }),
            }
        })
        .await
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        let id = id.to_owned();
        self.mutate(collection, move |documents| documents.retain(|d| d.id != id))
            .await
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.inner.changes.subscribe()
    }

    async fn health_check(&self) -> bool {
        true
    }
}

// =============================================================================
// TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "storefront-local-{}-{}.json",
            name,
            uuid::Uuid::new_v4().simple()
        ))
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let path = temp_path("reopen");

        let store = LocalStore::open(&path).await;
        store.put("orders", "ORD-1", json!({"orderId": "ORD-1"})).await.unwrap();
        store.put("orders", "ORD-2", json!({"orderId": "ORD-2"})).await.unwrap();
        store.delete("orders", "ORD-1").await.unwrap();
        drop(store);

        let reopened = LocalStore::open(&path).await;
        let orders = reopened.query("orders", None).await.unwrap();
        assert_eq!(orders, vec![json!({"orderId": "ORD-2"})]);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_corrupt_file_loads_empty() {
        let path = temp_path("corrupt");
        std::fs::write(&path, b"{not json").unwrap();

        let store = LocalStore::open(&path).await;
        assert!(store.query("carts", None).await.unwrap().is_empty());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_put_keeps_insertion_position() {
        let store = LocalStore::in_memory();
        store.put("c", "a", json!({"v": 1})).await.unwrap();
        store.put("c", "b", json!({"v": 2})).await.unwrap();
        store.put("c", "a", json!({"v": 3})).await.unwrap();

        let docs = store.query("c", None).await.unwrap();
        assert_eq!(docs, vec![json!({"v": 3}), json!({"v": 2})]);
    }

    #[tokio::test]
    async fn test_mutations_publish_collection_name() {
        let store = LocalStore::in_memory();
        let mut changes = store.subscribe();

        store.put("orders", "ORD-1", json!({})).await.unwrap();
        store.delete("orders", "ORD-1").await.unwrap();

        assert_eq!(changes.recv().await.unwrap(), "orders");
        assert_eq!(changes.recv().await.unwrap(), "orders");
    }

    #[tokio::test]
    async fn test_abandoned_write_still_commits_and_publishes() {
        let path = temp_path("abandoned");
        let store = LocalStore::open(&path).await;
        let mut changes = store.subscribe();

        let write = store.put("orders", "ORD-1", json!({"orderId": "ORD-1"}));
        assert!(tokio::time::timeout(Duration::ZERO, write).await.is_err());

        assert_eq!(changes.recv().await.unwrap(), "orders");
        assert!(store.get("orders", "ORD-1").await.unwrap().is_some());

        let reopened = LocalStore::open(&path).await;
        assert!(reopened.get("orders", "ORD-1").await.unwrap().is_some());

        let _ = std::fs::remove_file(&path);
    }
}
