//! Contract for the remote cache client.
//!
//! The wire protocol lives outside this crate. A client only has to offer
//! async point reads and writes of raw bytes; stores built on top of it add
//! batching, timeouts, and serialization.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use hashbrown::HashMap;
use thiserror::Error;

/// Failure reported by a remote cache client
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The operation did not complete in time
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The connection to the cache server failed
    #[error("connection failure: {0}")]
    Connection(String),

    /// The server answered but refused the operation
    #[error("server rejected operation: {0}")]
    Rejected(String),
}

/// Result type alias for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Async point operations against the remote cache.
///
/// Implementations must be safe for concurrent use: one client is shared by
/// every partition and thread of a store.
#[async_trait]
pub trait RemoteCacheClient: Send + Sync {
    /// Read one key. Absent keys are `Ok(None)`, not errors.
    async fn get(&self, key: &str) -> ClientResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, overwriting any previous value.
    async fn set(&self, key: &str, value: Vec<u8>) -> ClientResult<()>;

    /// Whether [`get_bulk`](Self::get_bulk) is a native single round trip.
    ///
    /// Stores fall back to concurrent point reads when this is false.
    fn supports_bulk_get(&self) -> bool {
        false
    }

    /// Read many keys at once. Absent keys are missing from the map.
    async fn get_bulk(&self, keys: &[String]) -> ClientResult<HashMap<String, Vec<u8>>> {
        let results = join_all(keys.iter().map(|key| self.get(key))).await;
        let mut found = HashMap::with_capacity(keys.len());
        for (key, result) in keys.iter().zip(results) {
            if let Some(bytes) = result? {
                found.insert(key.clone(), bytes);
            }
        }
        Ok(found)
    }
}

/// Opens a client for a list of server addresses.
///
/// Any `Fn(&[String]) -> ClientResult<Arc<dyn RemoteCacheClient>>` closure is a
/// connector.
pub trait ClientConnector: Send + Sync {
    fn connect(&self, servers: &[String]) -> ClientResult<Arc<dyn RemoteCacheClient>>;
}

impl<F> ClientConnector for F
where
    F: Fn(&[String]) -> ClientResult<Arc<dyn RemoteCacheClient>> + Send + Sync,
{
    fn connect(&self, servers: &[String]) -> ClientResult<Arc<dyn RemoteCacheClient>> {
        self(servers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Client implementing only the required methods.
    #[derive(Default)]
    struct PointOnly {
        entries: Mutex<HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl RemoteCacheClient for PointOnly {
        async fn get(&self, key: &str) -> ClientResult<Option<Vec<u8>>> {
            if key == "broken" {
                return Err(ClientError::Rejected("bad key".to_string()));
            }
            Ok(self.entries.lock().get(key).cloned())
        }

        async fn set(&self, key: &str, value: Vec<u8>) -> ClientResult<()> {
            self.entries.lock().insert(key.to_string(), value);
            Ok(())
        }
    }

    fn block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(fut)
    }

    #[test]
    fn test_default_bulk_get_skips_absent() {
        let client = PointOnly::default();
        assert!(!client.supports_bulk_get());
        block_on(client.set("a", vec![1])).unwrap();

        let keys = vec!["a".to_string(), "b".to_string()];
        let found = block_on(client.get_bulk(&keys)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found.get("a"), Some(&vec![1]));
    }

    #[test]
    fn test_default_bulk_get_propagates_failure() {
        let client = PointOnly::default();
        let keys = vec!["a".to_string(), "broken".to_string()];
        assert!(matches!(block_on(client.get_bulk(&keys)), Err(ClientError::Rejected(_))));
    }

    #[test]
    fn test_closure_connector() {
        let connector = |servers: &[String]| -> ClientResult<Arc<dyn RemoteCacheClient>> {
            if servers.is_empty() {
                return Err(ClientError::Connection("no servers".to_string()));
            }
            Ok(Arc::new(PointOnly::default()))
        };
        assert!(connector.connect(&["localhost:11211".to_string()]).is_ok());
        assert!(matches!(connector.connect(&[]), Err(ClientError::Connection(_))));
    }
}
