//! cachestate Core: batched key-value state over a remote cache
//!
//! Turns a remote cache that only offers point get/set into multi-key state
//! with concurrent I/O and a bounded local cache in front of it.
//!
//! # Architecture
//!
//! - **Keys**: compound keys flattened to remote keys by an injected `KeyBuilder`
//! - **Backing store**: `multi_get`/`multi_put` fan out concurrent remote operations
//!   and join them; one failure fails the whole batch
//! - **Local cache**: LRU-bounded, write-through, shields the remote store from
//!   repeated access within a batch
//!
//! # Zero Stream-Engine Dependencies
//!
//! This crate knows nothing about transactions or batch replays.
//! Consistency variants live in a separate crate (cachestate-stream).

pub mod backing;
pub mod cache;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod keys;
pub mod memory;
pub mod value;

// Re-export key types for convenience
pub use backing::{BackingMap, BatchedBackingStore};
pub use cache::{BoundedLocalCache, CacheStats};
pub use client::{ClientConnector, ClientError, ClientResult, RemoteCacheClient};
pub use codec::{ChecksummedSerializer, CodecError, JsonSerializer, Serializer};
pub use config::Options;
pub use error::{StateError, StateResult};
pub use keys::{CompoundKey, ConcatKeyBuilder, KeyBuilder, KeyField, SingleFieldKeyBuilder};
pub use memory::{InMemoryCacheClient, InMemoryConnector};
pub use value::{OpaqueValue, StoredValue, TransactionalValue};
