//! cachestate stream layer: exactly-once map state for a batch stream engine
//!
//! Wraps cachestate-core's cached backing map with the replay rules a
//! micro-batch engine needs when it re-delivers a batch after a failure.
//!
//! # Architecture
//!
//! The engine hands every batch a monotonically increasing transaction id.
//! Each key's stored value remembers the txid that last wrote it:
//! - **NonTransactional** keeps only the value; replays apply twice
//! - **Transactional** keeps `(txid, value)`; a replayed txid is a no-op
//! - **Opaque** keeps `(txid, prev, curr)`; a replayed txid is a no-op and
//!   txids must advance one at a time
//!
//! `StoreFactory` wires a remote connection, `BatchedBackingStore`,
//! `BoundedLocalCache` and one of the variants above per partition.
//! `SnapshotView` exposes a single global key of such a store.

pub mod factory;
pub mod map;
pub mod snapshot;

pub use factory::StoreFactory;
pub use map::{Consistency, ConsistentMap};
pub use snapshot::SnapshotView;
