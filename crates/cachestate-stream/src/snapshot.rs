//! Single-key view over a consistent map.

use std::sync::Arc;

use cachestate_core::{CompoundKey, StateError, StateResult};

use crate::map::ConsistentMap;

/// Aggregate state stored under one fixed global key.
///
/// Every read and write goes to the same key of the wrapped map, with the
/// wrapped map's consistency rules. The view does not own the map: other
/// handles to it stay usable.
pub struct SnapshotView<V> {
    map: Arc<ConsistentMap<V>>,
    global_key: CompoundKey,
}

impl<V> SnapshotView<V>
where
    V: Clone + Send + 'static,
{
    pub fn new(map: Arc<ConsistentMap<V>>, global_key: CompoundKey) -> Self {
        Self { map, global_key }
    }

    pub fn map(&self) -> &Arc<ConsistentMap<V>> {
        &self.map
    }

    pub fn global_key(&self) -> &CompoundKey {
        &self.global_key
    }

    pub fn get(&self) -> StateResult<Option<V>> {
        let mut values = self.map.multi_get(std::slice::from_ref(&self.global_key))?;
        Ok(values.pop().flatten())
    }

    /// Fold `delta` into the global value under transaction `txid`.
    pub fn update<D, F>(&self, txid: u64, delta: D, combine: F) -> StateResult<V>
    where
        F: Fn(Option<&V>, &D) -> V,
    {
        let keys = std::slice::from_ref(&self.global_key);
        let values = self
            .map
            .multi_update(txid, keys, std::slice::from_ref(&delta), combine)?;
        match <[V; 1]>::try_from(values) {
            Ok([value]) => Ok(value),
            Err(values) => Err(StateError::MismatchedBatch {
                keys: 1,
                values: values.len(),
            }),
        }
    }

    pub fn set(&self, txid: u64, value: V) -> StateResult<()> {
        let keys = std::slice::from_ref(&self.global_key);
        self.map.multi_put(txid, keys, std::slice::from_ref(&value))
    }
}
