//! C5: transaction registry. Lifecycle, per-client quotas, and idle
//! expiry for explicit transactions (spec.md §4.4). All mutations are
//! serialised by a single lock, satisfying invariant I2 without torn
//! state between the idle sweep and foreground operations.

use crate::engine::EngineTxHandle;
use crate::error::{ApiError, ApiResult};
use parking_lot::Mutex;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct TxHandle {
    pub id: String,
    pub client_id: String,
    pub created_at: Instant,
    last_used_at: Mutex<Instant>,
    pub cancel: CancellationToken,
    pub engine_tx: EngineTxHandle,
}

impl TxHandle {
    fn touch(&self) {
        *self.last_used_at.lock() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_used_at.lock().elapsed()
    }
}

struct Inner {
    by_id: HashMap<String, Arc<TxHandle>>,
    by_client: HashMap<String, Vec<String>>,
}

pub struct TransactionRegistry {
    inner: Mutex<Inner>,
    max_open: usize,
    max_per_client: usize,
    idle_timeout: Duration,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug, Clone, Copy)]
pub struct Stats {
    pub total: usize,
    pub clients: usize,
}

impl TransactionRegistry {
    pub fn new(max_open: usize, max_per_client: usize, idle_timeout: Duration) -> Arc<Self> {
        let registry = Arc::new(TransactionRegistry {
            inner: Mutex::new(Inner { by_id: HashMap::new(), by_client: HashMap::new() }),
            max_open,
            max_per_client,
            idle_timeout,
            sweep_task: Mutex::new(None),
        });
        registry.clone().spawn_sweeper();
        registry
    }

    fn spawn_sweeper(self: Arc<Self>) {
        let period = self.idle_timeout / 2;
        let period = if period.is_zero() { Duration::from_secs(1) } else { period };
        let registry = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                registry.sweep_idle();
            }
        });
        *self.sweep_task.lock() = Some(handle);
    }

    fn sweep_idle(&self) {
        let expired: Vec<String> = {
            let inner = self.inner.lock();
            inner
                .by_id
                .values()
                .filter(|h| h.idle_for() >= self.idle_timeout)
                .map(|h| h.id.clone())
                .collect()
        };
        for id in expired {
            tracing::info!(tx_id = %id, "sweeping idle transaction");
            self.remove(&id);
        }
    }

    pub fn begin(&self, client_id: &str, engine_tx: EngineTxHandle) -> ApiResult<Arc<TxHandle>> {
        let mut inner = self.inner.lock();
        if inner.by_id.len() >= self.max_open {
            return Err(ApiError::TooManyTransactions);
        }
        let per_client = inner.by_client.get(client_id).map(|v| v.len()).unwrap_or(0);
        if per_client >= self.max_per_client {
            return Err(ApiError::TooManyTransactions);
        }

        let id = generate_tx_id();
        let handle = Arc::new(TxHandle {
            id: id.clone(),
            client_id: client_id.to_string(),
            created_at: Instant::now(),
            last_used_at: Mutex::new(Instant::now()),
            cancel: CancellationToken::new(),
            engine_tx,
        });

        inner.by_id.insert(id.clone(), handle.clone());
        inner.by_client.entry(client_id.to_string()).or_default().push(id);
        Ok(handle)
    }

    pub fn get(&self, id: &str) -> ApiResult<Arc<TxHandle>> {
        self.inner
            .lock()
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("transaction {id} not found")))
    }

    pub fn touch(&self, id: &str) {
        if let Some(handle) = self.inner.lock().by_id.get(id) {
            handle.touch();
        }
    }

    /// Idempotent: removing an unknown id is not an error.
    pub fn remove(&self, id: &str) {
        let mut inner = self.inner.lock();
        if let Some(handle) = inner.by_id.remove(id) {
            handle.cancel.cancel();
            if let Some(bucket) = inner.by_client.get_mut(&handle.client_id) {
                bucket.retain(|existing| existing != id);
                if bucket.is_empty() {
                    inner.by_client.remove(&handle.client_id);
                }
            }
        }
    }

    pub fn stats(&self) -> Stats {
        let inner = self.inner.lock();
        Stats { total: inner.by_id.len(), clients: inner.by_client.len() }
    }

    /// Stop the sweep, cancel every handle, and empty both indexes.
    pub fn close(&self) {
        if let Some(task) = self.sweep_task.lock().take() {
            task.abort();
        }
        let mut inner = self.inner.lock();
        for handle in inner.by_id.values() {
            handle.cancel.cancel();
        }
        inner.by_id.clear();
        inner.by_client.clear();
    }
}

fn generate_tx_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sqlite::SqliteEngine;
    use crate::engine::SqlEngine;

    fn fixture_tx(engine: &SqliteEngine) -> EngineTxHandle {
        engine.begin("default").unwrap()
    }

    #[tokio::test]
    async fn begin_then_get_then_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let engine = SqliteEngine::open(&path).unwrap();

        let registry = TransactionRegistry::new(10, 10, Duration::from_secs(60));
        let handle = registry.begin("client-a", fixture_tx(&engine)).unwrap();
        let id = handle.id.clone();

        assert!(registry.get(&id).is_ok());
        registry.remove(&id);
        assert!(matches!(registry.get(&id), Err(ApiError::NotFound(_))));

        // idempotent
        registry.remove(&id);
        registry.close();
    }

    #[tokio::test]
    async fn enforces_per_client_and_global_quota() {
        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let engine = SqliteEngine::open(&path).unwrap();

        let registry = TransactionRegistry::new(3, 2, Duration::from_secs(60));
        registry.begin("client-a", fixture_tx(&engine)).unwrap();
        registry.begin("client-a", fixture_tx(&engine)).unwrap();
        let err = registry.begin("client-a", fixture_tx(&engine)).unwrap_err();
        assert!(matches!(err, ApiError::TooManyTransactions));

        registry.begin("client-b", fixture_tx(&engine)).unwrap();
        let err = registry.begin("client-b", fixture_tx(&engine)).unwrap_err();
        assert!(matches!(err, ApiError::TooManyTransactions));

        assert_eq!(registry.stats().total, 3);
        registry.close();
    }

    #[tokio::test]
    async fn idle_sweep_removes_stale_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let engine = SqliteEngine::open(&path).unwrap();

        let registry = TransactionRegistry::new(10, 10, Duration::from_millis(20));
        let handle = registry.begin("client-a", fixture_tx(&engine)).unwrap();
        let id = handle.id.clone();
        drop(handle);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(registry.get(&id), Err(ApiError::NotFound(_))));
        registry.close();
    }
}
