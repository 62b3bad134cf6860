//! Batched backing store: multi-key reads and writes over a remote cache.
//!
//! BatchedBackingStore turns one `multi_get`/`multi_put` call into concurrent
//! remote operations and joins them before returning.
//!
//! **Read path**: flatten keys, one bulk read (or N concurrent point reads),
//! absent entries map to `None`
//! **Write path**: flatten keys, serialize, N concurrent point writes, wait for all
//! **Failure**: any remote failure or timeout fails the whole call; nothing is retried

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::runtime::Runtime;
use tracing::{debug, warn};

use crate::client::{ClientError, ClientResult, RemoteCacheClient};
use crate::codec::Serializer;
use crate::config::Options;
use crate::error::{StateError, StateResult};
use crate::keys::{validate_remote_key, CompoundKey, KeyBuilder};

/// Multi-key get/put surface shared by the backing store and the local cache.
///
/// `multi_get` returns one entry per input key, in input order. `multi_put`
/// is acknowledged only after every write of the batch is confirmed.
pub trait BackingMap<T>: Send + Sync {
    fn multi_get(&self, keys: &[CompoundKey]) -> StateResult<Vec<Option<T>>>;
    fn multi_put(&self, keys: &[CompoundKey], values: &[T]) -> StateResult<()>;
}

impl<T, B: BackingMap<T> + ?Sized> BackingMap<T> for Box<B> {
    fn multi_get(&self, keys: &[CompoundKey]) -> StateResult<Vec<Option<T>>> {
        (**self).multi_get(keys)
    }

    fn multi_put(&self, keys: &[CompoundKey], values: &[T]) -> StateResult<()> {
        (**self).multi_put(keys, values)
    }
}

/// Adapter from [`BackingMap`] to a [`RemoteCacheClient`].
///
/// Public methods block the calling thread on the shared runtime, so they
/// must not be called from inside an async task of that runtime.
pub struct BatchedBackingStore<T> {
    client: Arc<dyn RemoteCacheClient>,
    serializer: Arc<dyn Serializer<T>>,
    key_builder: Arc<dyn KeyBuilder>,
    runtime: Arc<Runtime>,
    op_timeout: Duration,
}

impl<T> BatchedBackingStore<T> {
    /// Build a store taking the key builder and timeout from `options`.
    pub fn new(
        client: Arc<dyn RemoteCacheClient>,
        serializer: Arc<dyn Serializer<T>>,
        runtime: Arc<Runtime>,
        options: &Options,
    ) -> Self {
        Self {
            client,
            serializer,
            key_builder: Arc::clone(&options.key_builder),
            runtime,
            op_timeout: options.op_timeout,
        }
    }

    pub fn client(&self) -> &Arc<dyn RemoteCacheClient> {
        &self.client
    }

    /// Flatten and validate every key before any I/O is issued.
    fn single_keys(&self, keys: &[CompoundKey]) -> StateResult<Vec<String>> {
        keys.iter()
            .map(|key| {
                let single = self.key_builder.build_single_key(key)?;
                validate_remote_key(key, &single)?;
                Ok(single)
            })
            .collect()
    }

    async fn timed<F, X>(&self, op: F) -> ClientResult<X>
    where
        F: Future<Output = ClientResult<X>>,
    {
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(self.op_timeout)),
        }
    }

    async fn fetch(&self, single_keys: &[String]) -> StateResult<Vec<Option<Vec<u8>>>> {
        if self.client.supports_bulk_get() {
            let found = self
                .timed(self.client.get_bulk(single_keys))
                .await
                .map_err(|source| StateError::StoreUnavailable {
                    operation: "get",
                    key: summarize(single_keys),
                    source,
                })?;
            return Ok(single_keys.iter().map(|k| found.get(k).cloned()).collect());
        }

        let reads = single_keys.iter().map(|key| self.timed(self.client.get(key)));
        let results = join_all(reads).await;
        let mut fetched = Vec::with_capacity(results.len());
        for (key, result) in single_keys.iter().zip(results) {
            match result {
                Ok(bytes) => fetched.push(bytes),
                Err(source) => {
                    return Err(StateError::StoreUnavailable {
                        operation: "get",
                        key: key.clone(),
                        source,
                    })
                }
            }
        }
        Ok(fetched)
    }

    async fn store(&self, single_keys: &[String], encoded: Vec<Vec<u8>>) -> StateResult<()> {
        let writes = single_keys
            .iter()
            .zip(encoded)
            .map(|(key, bytes)| self.timed(self.client.set(key, bytes)));
        // join_all drives every write to completion before any error is reported
        let results = join_all(writes).await;

        let mut first_failure = None;
        let mut failed = 0usize;
        for (key, result) in single_keys.iter().zip(results) {
            if let Err(source) = result {
                failed += 1;
                if first_failure.is_none() {
                    first_failure = Some((key.clone(), source));
                }
            }
        }
        match first_failure {
            None => Ok(()),
            Some((key, source)) => {
                warn!(
                    failed,
                    total = single_keys.len(),
                    key = %key,
                    error = %source,
                    "Batch write failed"
                );
                Err(StateError::StoreUnavailable {
                    operation: "set",
                    key,
                    source,
                })
            }
        }
    }
}

impl<T> BackingMap<T> for BatchedBackingStore<T> {
    fn multi_get(&self, keys: &[CompoundKey]) -> StateResult<Vec<Option<T>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let single_keys = self.single_keys(keys)?;
        let fetched = self.runtime.block_on(self.fetch(&single_keys))?;

        let mut values = Vec::with_capacity(fetched.len());
        let mut present = 0usize;
        for (key, bytes) in keys.iter().zip(fetched) {
            match bytes {
                Some(bytes) => {
                    let value = self
                        .serializer
                        .deserialize(&bytes)
                        .map_err(|source| StateError::Codec { key: key.to_string(), source })?;
                    present += 1;
                    values.push(Some(value));
                }
                None => values.push(None),
            }
        }
        debug!(keys = keys.len(), present, "Remote multi_get");
        Ok(values)
    }

    fn multi_put(&self, keys: &[CompoundKey], values: &[T]) -> StateResult<()> {
        if keys.len() != values.len() {
            return Err(StateError::MismatchedBatch {
                keys: keys.len(),
                values: values.len(),
            });
        }
        if keys.is_empty() {
            return Ok(());
        }
        let single_keys = self.single_keys(keys)?;
        let encoded = keys
            .iter()
            .zip(values)
            .map(|(key, value)| {
                self.serializer
                    .serialize(value)
                    .map_err(|source| StateError::Codec { key: key.to_string(), source })
            })
            .collect::<StateResult<Vec<_>>>()?;

        self.runtime.block_on(self.store(&single_keys, encoded))?;
        debug!(keys = keys.len(), "Remote multi_put");
        Ok(())
    }
}

/// Short description of a bulk read's key set for error context.
fn summarize(keys: &[String]) -> String {
    match keys {
        [] => String::new(),
        [only] => only.clone(),
        [first, rest @ ..] => format!("{} and {} more", first, rest.len()),
    }
}
