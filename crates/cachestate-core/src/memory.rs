//! In-process remote cache.
//!
//! `InMemoryCacheClient` implements [`RemoteCacheClient`] over a shared hash
//! map. It counts every call and can inject per-key failures or latency,
//! which makes it the stand-in for a real cache server in tests and in
//! single-process deployments.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hashbrown::{HashMap, HashSet};
use parking_lot::{Mutex, RwLock};

use crate::client::{ClientConnector, ClientError, ClientResult, RemoteCacheClient};

/// Shared in-memory cache with call counters and fault injection.
#[derive(Default)]
pub struct InMemoryCacheClient {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    bulk_get: bool,
    latency: Mutex<Option<Duration>>,
    failing_keys: Mutex<HashSet<String>>,
    point_reads: AtomicU64,
    bulk_reads: AtomicU64,
    writes: AtomicU64,
}

impl InMemoryCacheClient {
    /// Client without a native bulk read; stores fan out point reads.
    pub fn new() -> Self {
        Self::default()
    }

    /// Client that answers bulk reads in one call.
    pub fn with_bulk_get() -> Self {
        Self {
            bulk_get: true,
            ..Self::default()
        }
    }

    /// Delay every operation by `latency` (None to disable).
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Make every read and write of `key` fail with a connection error.
    pub fn fail_key(&self, key: &str) {
        self.failing_keys.lock().insert(key.to_string());
    }

    /// Undo [`fail_key`](Self::fail_key).
    pub fn heal_key(&self, key: &str) {
        self.failing_keys.lock().remove(key);
    }

    /// Stored bytes for `key`, bypassing counters and faults.
    pub fn raw_get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.read().get(key).cloned()
    }

    /// Overwrite stored bytes for `key`, bypassing counters and faults.
    pub fn raw_set(&self, key: &str, value: Vec<u8>) {
        self.entries.write().insert(key.to_string(), value);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Point reads served, one per key.
    pub fn point_reads(&self) -> u64 {
        self.point_reads.load(Ordering::Relaxed)
    }

    /// Bulk read calls served.
    pub fn bulk_reads(&self) -> u64 {
        self.bulk_reads.load(Ordering::Relaxed)
    }

    /// Every remote read call, point or bulk.
    pub fn reads(&self) -> u64 {
        self.point_reads() + self.bulk_reads()
    }

    /// Writes attempted, including injected failures.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    async fn simulate(&self, key: &str) -> ClientResult<()> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing_keys.lock().contains(key) {
            return Err(ClientError::Connection(format!("injected failure for {}", key)));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteCacheClient for InMemoryCacheClient {
    async fn get(&self, key: &str) -> ClientResult<Option<Vec<u8>>> {
        self.point_reads.fetch_add(1, Ordering::Relaxed);
        self.simulate(key).await?;
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> ClientResult<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.simulate(key).await?;
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    fn supports_bulk_get(&self) -> bool {
        self.bulk_get
    }

    async fn get_bulk(&self, keys: &[String]) -> ClientResult<HashMap<String, Vec<u8>>> {
        self.bulk_reads.fetch_add(1, Ordering::Relaxed);
        for key in keys {
            self.simulate(key).await?;
        }
        let entries = self.entries.read();
        Ok(keys
            .iter()
            .filter_map(|k| entries.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }
}

/// Connector handing out one shared [`InMemoryCacheClient`].
pub struct InMemoryConnector {
    client: Arc<InMemoryCacheClient>,
    connects: AtomicU64,
    refuse: bool,
}

impl InMemoryConnector {
    pub fn new(client: Arc<InMemoryCacheClient>) -> Self {
        Self {
            client,
            connects: AtomicU64::new(0),
            refuse: false,
        }
    }

    /// Connector whose every connection attempt fails.
    pub fn refusing() -> Self {
        Self {
            client: Arc::new(InMemoryCacheClient::new()),
            connects: AtomicU64::new(0),
            refuse: true,
        }
    }

    pub fn client(&self) -> &Arc<InMemoryCacheClient> {
        &self.client
    }

    /// Number of successful connections opened.
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }
}

impl ClientConnector for InMemoryConnector {
    fn connect(&self, servers: &[String]) -> ClientResult<Arc<dyn RemoteCacheClient>> {
        if servers.is_empty() {
            return Err(ClientError::Connection("no servers configured".to_string()));
        }
        if self.refuse {
            return Err(ClientError::Connection(format!(
                "connection refused by {}",
                servers.join(",")
            )));
        }
        self.connects.fetch_add(1, Ordering::Relaxed);
        Ok(self.client.clone())
    }
}
