//! Assembles stores: connection, runtime, backing store, local cache and
//! consistency variant.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info, warn};

use cachestate_core::{
    BatchedBackingStore, BoundedLocalCache, ClientConnector, CompoundKey, JsonSerializer, Options,
    RemoteCacheClient, Serializer, StateError, StateResult, StoredValue,
};

use crate::map::{Consistency, ConsistentMap};
use crate::snapshot::SnapshotView;

/// Connection and I/O runtime shared by every store a factory builds.
struct Shared {
    client: Arc<dyn RemoteCacheClient>,
    runtime: Arc<Runtime>,
}

/// Builds partition stores for one configured state.
///
/// The remote connection and I/O runtime are opened on the first `build` and
/// reused by later calls, so every partition of a store shares them. A
/// failed connection is reported as `StoreInitFailed` and not retried; the
/// next `build` call tries again.
pub struct StoreFactory<V> {
    servers: Vec<String>,
    consistency: Consistency,
    serializer: Arc<dyn Serializer<StoredValue<V>>>,
    options: Options,
    connector: Arc<dyn ClientConnector>,
    shared: Mutex<Option<Shared>>,
}

impl<V> StoreFactory<V>
where
    V: Clone + Send + Serialize + DeserializeOwned + 'static,
{
    /// Factory with default options and the JSON serializer.
    pub fn new(
        servers: Vec<String>,
        consistency: Consistency,
        connector: Arc<dyn ClientConnector>,
    ) -> Self {
        Self {
            servers,
            consistency,
            serializer: Arc::new(JsonSerializer::<StoredValue<V>>::new()),
            options: Options::default(),
            connector,
            shared: Mutex::new(None),
        }
    }

    pub fn opaque(servers: Vec<String>, connector: Arc<dyn ClientConnector>) -> Self {
        Self::new(servers, Consistency::Opaque, connector)
    }

    pub fn transactional(servers: Vec<String>, connector: Arc<dyn ClientConnector>) -> Self {
        Self::new(servers, Consistency::Transactional, connector)
    }

    pub fn non_transactional(servers: Vec<String>, connector: Arc<dyn ClientConnector>) -> Self {
        Self::new(servers, Consistency::NonTransactional, connector)
    }
}

impl<V> StoreFactory<V>
where
    V: Clone + Send + 'static,
{
    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn with_serializer(
        mut self,
        serializer: impl Serializer<StoredValue<V>> + 'static,
    ) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }

    pub fn consistency(&self) -> Consistency {
        self.consistency
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Build the store serving partition `partition_index` of `num_partitions`.
    pub fn build(
        &self,
        partition_index: usize,
        num_partitions: usize,
    ) -> StateResult<ConsistentMap<V>> {
        self.options.validate()?;
        if partition_index >= num_partitions {
            return Err(StateError::StoreInitFailed {
                reason: format!(
                    "partition {} out of range for {} partitions",
                    partition_index, num_partitions
                ),
            });
        }
        let (client, runtime) = self.connection()?;

        let store = BatchedBackingStore::new(
            client,
            Arc::clone(&self.serializer),
            runtime,
            &self.options,
        );
        let cache = BoundedLocalCache::new(store, self.options.local_cache_size);
        info!(
            partition_index,
            num_partitions,
            consistency = %self.consistency,
            local_cache_size = self.options.local_cache_size,
            "Store built"
        );
        Ok(ConsistentMap::new(self.consistency, Box::new(cache)))
    }

    /// Build the partition store and view it under the global key.
    pub fn make_state(
        &self,
        partition_index: usize,
        num_partitions: usize,
    ) -> StateResult<SnapshotView<V>> {
        let map = self.build(partition_index, num_partitions)?;
        let global_key = CompoundKey::single(self.options.global_key.clone());
        Ok(SnapshotView::new(Arc::new(map), global_key))
    }

    /// Pooled connection, opened on first use.
    fn connection(&self) -> StateResult<(Arc<dyn RemoteCacheClient>, Arc<Runtime>)> {
        let mut shared = self.shared.lock();
        if let Some(shared) = shared.as_ref() {
            debug!("Reusing pooled connection");
            return Ok((Arc::clone(&shared.client), Arc::clone(&shared.runtime)));
        }

        let client = self.connector.connect(&self.servers).map_err(|e| {
            warn!(servers = ?self.servers, error = %e, "Remote cache connection failed");
            StateError::StoreInitFailed {
                reason: format!("connect to {:?}: {}", self.servers, e),
            }
        })?;
        let runtime = Builder::new_multi_thread()
            .worker_threads(self.options.io_threads)
            .thread_name("cachestate-io")
            .enable_all()
            .build()
            .map_err(|e| StateError::StoreInitFailed {
                reason: format!("I/O runtime: {}", e),
            })?;
        let runtime = Arc::new(runtime);

        info!(
            servers = ?self.servers,
            io_threads = self.options.io_threads,
            "Remote cache connected"
        );
        *shared = Some(Shared {
            client: Arc::clone(&client),
            runtime: Arc::clone(&runtime),
        });
        Ok((client, runtime))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use cachestate_core::{ChecksummedSerializer, InMemoryCacheClient, InMemoryConnector};

    fn servers() -> Vec<String> {
        vec!["localhost:11211".to_string()]
    }

    fn add(existing: Option<&u64>, delta: &u64) -> u64 {
        existing.copied().unwrap_or(0) + delta
    }

    #[test]
    fn test_connection_pooled_across_partitions() {
        let connector = Arc::new(InMemoryConnector::new(Arc::new(InMemoryCacheClient::new())));
        let factory = StoreFactory::<u64>::opaque(servers(), connector.clone());

        let first = factory.build(0, 2).unwrap();
        let second = factory.build(1, 2).unwrap();
        assert_eq!(connector.connects(), 1);

        let key = CompoundKey::single("shared");
        first.multi_update(1, &[key.clone()], &[4], add).unwrap();
        // second partition has its own local cache but the same remote
        assert_eq!(second.multi_get(&[key]).unwrap(), vec![Some(4)]);
    }

    #[test]
    fn test_refused_connection() {
        let connector = Arc::new(InMemoryConnector::refusing());
        let factory = StoreFactory::<u64>::transactional(servers(), connector);
        match factory.build(0, 1) {
            Err(StateError::StoreInitFailed { reason }) => assert!(reason.contains("refused")),
            Err(other) => panic!("Expected StoreInitFailed, got {:?}", other),
            Ok(_) => panic!("Expected StoreInitFailed, got a store"),
        }
    }

    #[test]
    fn test_no_servers() {
        let connector = Arc::new(InMemoryConnector::new(Arc::new(InMemoryCacheClient::new())));
        let factory = StoreFactory::<u64>::opaque(Vec::new(), connector);
        assert!(matches!(factory.build(0, 1), Err(StateError::StoreInitFailed { .. })));
    }

    #[test]
    fn test_partition_out_of_range() {
        let connector = Arc::new(InMemoryConnector::new(Arc::new(InMemoryCacheClient::new())));
        let factory = StoreFactory::<u64>::opaque(servers(), connector.clone());
        assert!(matches!(factory.build(2, 2), Err(StateError::StoreInitFailed { .. })));
        assert_eq!(connector.connects(), 0);
    }

    #[test]
    fn test_invalid_options() {
        let connector = Arc::new(InMemoryConnector::new(Arc::new(InMemoryCacheClient::new())));
        let factory = StoreFactory::<u64>::non_transactional(servers(), connector)
            .with_options(Options::default().with_local_cache_size(0));
        assert!(matches!(factory.build(0, 1), Err(StateError::InvalidOptions { .. })));
    }

    #[test]
    fn test_make_state_uses_global_key() {
        let client = Arc::new(InMemoryCacheClient::new());
        let connector = Arc::new(InMemoryConnector::new(client.clone()));
        let factory = StoreFactory::<u64>::opaque(servers(), connector)
            .with_options(Options::default().with_global_key("totals"));

        let state = factory.make_state(0, 1).unwrap();
        state.update(1, 10, add).unwrap();
        assert_eq!(state.global_key(), &CompoundKey::single("totals"));
        assert!(client.raw_get("totals").is_some());
    }

    #[test]
    fn test_checksummed_serializer() {
        let client = Arc::new(InMemoryCacheClient::new());
        let connector = Arc::new(InMemoryConnector::new(client.clone()));
        let factory = StoreFactory::<u64>::transactional(servers(), connector)
            .with_serializer(ChecksummedSerializer::new(JsonSerializer::<StoredValue<u64>>::new()));

        let map = factory.build(0, 1).unwrap();
        let key = CompoundKey::single("framed");
        map.multi_update(1, &[key.clone()], &[2], add).unwrap();

        let mut raw = client.raw_get("framed").unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        client.raw_set("framed", raw);

        let fresh = factory.build(0, 1).unwrap();
        assert!(matches!(fresh.multi_get(&[key]), Err(StateError::Codec { .. })));
    }
}
