//! Property tests: ordering and cache transparency of the batched store.

use std::sync::Arc;

use proptest::prelude::*;

use cachestate_core::{
    BackingMap, BatchedBackingStore, BoundedLocalCache, CompoundKey, InMemoryCacheClient,
    JsonSerializer, Options,
};

fn runtime() -> Arc<tokio::runtime::Runtime> {
    Arc::new(
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap(),
    )
}

fn store(client: &Arc<InMemoryCacheClient>) -> BatchedBackingStore<i64> {
    BatchedBackingStore::new(
        client.clone(),
        Arc::new(JsonSerializer::<i64>::new()),
        runtime(),
        &Options::default(),
    )
}

fn key(n: u8) -> CompoundKey {
    CompoundKey::from(format!("k{}", n))
}

proptest! {
    #[test]
    fn multi_get_preserves_input_order(
        stored in proptest::collection::btree_map(0u8..32, any::<i64>(), 0..16),
        requested in proptest::collection::vec(0u8..32, 0..24),
    ) {
        let client = Arc::new(InMemoryCacheClient::new());
        let store = store(&client);
        let keys: Vec<CompoundKey> = stored.keys().map(|n| key(*n)).collect();
        let values: Vec<i64> = stored.values().copied().collect();
        store.multi_put(&keys, &values).unwrap();

        let request: Vec<CompoundKey> = requested.iter().map(|n| key(*n)).collect();
        let got = store.multi_get(&request).unwrap();

        prop_assert_eq!(got.len(), requested.len());
        for (n, value) in requested.iter().zip(got) {
            prop_assert_eq!(value, stored.get(n).copied());
        }
    }

    #[test]
    fn writes_within_capacity_read_locally(
        batch in proptest::collection::btree_map(0u8..64, any::<i64>(), 1..32),
    ) {
        let client = Arc::new(InMemoryCacheClient::new());
        let cache = BoundedLocalCache::new(store(&client), 64);
        let keys: Vec<CompoundKey> = batch.keys().map(|n| key(*n)).collect();
        let values: Vec<i64> = batch.values().copied().collect();

        cache.multi_put(&keys, &values).unwrap();
        let reads_before = client.reads();
        let got = cache.multi_get(&keys).unwrap();

        prop_assert_eq!(client.reads(), reads_before);
        prop_assert_eq!(got, values.into_iter().map(Some).collect::<Vec<_>>());
    }
}
