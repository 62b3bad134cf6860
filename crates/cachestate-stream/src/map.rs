//! Consistency variants over a cached backing map.
//!
//! `ConsistentMap` is what the stream engine talks to. Each batch arrives
//! with a transaction id; the variant decides whether re-delivering a batch
//! is absorbed or applied again.
//!
//! | variant          | stored                  | replay of txid t        |
//! |------------------|-------------------------|-------------------------|
//! | NonTransactional | `value`                 | applied again           |
//! | Transactional    | `(txid, value)`         | returns stored value    |
//! | Opaque           | `(txid, prev, curr)`    | returns `curr`          |
//!
//! Opaque additionally requires every new txid to be the stored txid + 1.

use std::fmt;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use cachestate_core::{
    BackingMap, CompoundKey, OpaqueValue, StateError, StateResult, StoredValue,
    TransactionalValue,
};

/// Replay semantics of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Consistency {
    NonTransactional,
    Transactional,
    Opaque,
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Consistency::NonTransactional => "non_transactional",
            Consistency::Transactional => "transactional",
            Consistency::Opaque => "opaque",
        };
        f.write_str(name)
    }
}

/// What to do with one key of a batch.
enum Step<V> {
    /// Batch already applied: report this value, write nothing
    Replay(V),
    /// Fold deltas into `base`, then persist
    Apply {
        base: Option<V>,
        stored: Option<StoredValue<V>>,
    },
}

/// Map state with per-key replay protection.
pub struct ConsistentMap<V> {
    consistency: Consistency,
    backing: Box<dyn BackingMap<StoredValue<V>>>,
}

impl<V> ConsistentMap<V>
where
    V: Clone + Send + 'static,
{
    pub fn new(consistency: Consistency, backing: Box<dyn BackingMap<StoredValue<V>>>) -> Self {
        Self { consistency, backing }
    }

    pub fn consistency(&self) -> Consistency {
        self.consistency
    }

    /// Current values, in key order.
    pub fn multi_get(&self, keys: &[CompoundKey]) -> StateResult<Vec<Option<V>>> {
        let stored = self.backing.multi_get(keys)?;
        keys.iter()
            .zip(stored)
            .map(|(key, stored)| match stored {
                None => Ok(None),
                Some(stored) => self.check_shape(key, stored).map(|s| Some(s.into_current())),
            })
            .collect()
    }

    /// Combine each key's stored value with its delta under transaction `txid`.
    ///
    /// `combine(existing, delta)` produces the value to persist; `existing` is
    /// `None` for keys never written. A key named several times folds its
    /// deltas in order and is written once. Returns, per position, the value
    /// after that position's delta was applied (or the stored value on replay).
    ///
    /// The batch is validated in full before anything is written: an
    /// `InconsistentTransition` on any key leaves every key untouched.
    pub fn multi_update<D, F>(
        &self,
        txid: u64,
        keys: &[CompoundKey],
        deltas: &[D],
        combine: F,
    ) -> StateResult<Vec<V>>
    where
        F: Fn(Option<&V>, &D) -> V,
    {
        if keys.len() != deltas.len() {
            return Err(StateError::MismatchedBatch {
                keys: keys.len(),
                values: deltas.len(),
            });
        }
        let (unique, positions) = group_positions(keys);
        let stored = self.backing.multi_get(&unique)?;

        let mut steps = Vec::with_capacity(unique.len());
        for (key, stored) in unique.iter().zip(stored) {
            steps.push(self.plan(txid, key, stored)?);
        }

        let mut results: Vec<Option<V>> = vec![None; keys.len()];
        let mut write_keys = Vec::new();
        let mut write_values = Vec::new();
        let mut replays = 0usize;
        for ((key, step), slots) in unique.into_iter().zip(steps).zip(positions) {
            match step {
                Step::Replay(value) => {
                    replays += 1;
                    for slot in slots {
                        results[slot] = Some(value.clone());
                    }
                }
                Step::Apply { base, stored } => {
                    let mut acc = base;
                    for slot in slots {
                        let next = combine(acc.as_ref(), &deltas[slot]);
                        results[slot] = Some(next.clone());
                        acc = Some(next);
                    }
                    if let Some(next) = acc {
                        write_values.push(self.wrap(txid, stored, next));
                        write_keys.push(key);
                    }
                }
            }
        }

        if replays > 0 {
            debug!(txid, replays, consistency = %self.consistency, "Replayed keys skipped");
        }
        if let Err(err) = self.backing.multi_put(&write_keys, &write_values) {
            warn!(txid, keys = write_keys.len(), error = %err, "Batch update failed");
            return Err(err);
        }
        debug!(txid, keys = keys.len(), written = write_keys.len(), "Batch update applied");
        Ok(results.into_iter().flatten().collect())
    }

    /// Overwrite each key with an explicit value under transaction `txid`.
    ///
    /// Non-transactional and transactional state write unconditionally. Opaque
    /// state follows the same txid rules as updates: re-putting the stored
    /// txid keeps `prev`, the next txid shifts `curr` into `prev`, anything
    /// else is an `InconsistentTransition`.
    pub fn multi_put(&self, txid: u64, keys: &[CompoundKey], values: &[V]) -> StateResult<()> {
        if keys.len() != values.len() {
            return Err(StateError::MismatchedBatch {
                keys: keys.len(),
                values: values.len(),
            });
        }
        let wrapped = match self.consistency {
            Consistency::NonTransactional => {
                values.iter().cloned().map(StoredValue::Plain).collect()
            }
            Consistency::Transactional => values
                .iter()
                .map(|value| {
                    StoredValue::Transactional(TransactionalValue {
                        txid,
                        value: value.clone(),
                    })
                })
                .collect(),
            Consistency::Opaque => {
                let stored = self.backing.multi_get(keys)?;
                let mut wrapped = Vec::with_capacity(keys.len());
                for ((key, stored), value) in keys.iter().zip(stored).zip(values) {
                    let current = match stored {
                        None => None,
                        Some(stored) => {
                            let opaque = self.check_shape(key, stored)?.into_opaque().map_err(
                                |source| StateError::Codec { key: key.to_string(), source },
                            )?;
                            check_adjacent(key, opaque.txid, txid)?;
                            Some(opaque)
                        }
                    };
                    wrapped.push(StoredValue::Opaque(match current {
                        Some(opaque) => opaque.advance(txid, value.clone()),
                        None => OpaqueValue {
                            txid,
                            prev: None,
                            curr: value.clone(),
                        },
                    }));
                }
                wrapped
            }
        };
        self.backing.multi_put(keys, &wrapped)
    }

    fn check_shape(
        &self,
        key: &CompoundKey,
        stored: StoredValue<V>,
    ) -> StateResult<StoredValue<V>> {
        let expected = match self.consistency {
            Consistency::NonTransactional => "plain",
            Consistency::Transactional => "transactional",
            Consistency::Opaque => "opaque",
        };
        if stored.shape() == expected {
            Ok(stored)
        } else {
            Err(StateError::Codec {
                key: key.to_string(),
                source: cachestate_core::CodecError::UnexpectedShape {
                    expected,
                    found: stored.shape(),
                },
            })
        }
    }

    fn plan(
        &self,
        txid: u64,
        key: &CompoundKey,
        stored: Option<StoredValue<V>>,
    ) -> StateResult<Step<V>> {
        let stored = match stored {
            None => return Ok(Step::Apply { base: None, stored: None }),
            Some(stored) => self.check_shape(key, stored)?,
        };
        let current = stored.current().clone();
        let step = match (self.consistency, stored.txid()) {
            (Consistency::Transactional | Consistency::Opaque, Some(stored_txid))
                if stored_txid == txid =>
            {
                Step::Replay(current)
            }
            (Consistency::Opaque, Some(stored_txid)) => {
                check_adjacent(key, stored_txid, txid)?;
                Step::Apply { base: Some(current), stored: Some(stored) }
            }
            (Consistency::Transactional, Some(stored_txid)) => {
                if txid < stored_txid {
                    warn!(key = %key, stored_txid, txid, "Transaction id went backwards");
                }
                Step::Apply { base: Some(current), stored: Some(stored) }
            }
            _ => Step::Apply { base: Some(current), stored: Some(stored) },
        };
        Ok(step)
    }

    fn wrap(&self, txid: u64, stored: Option<StoredValue<V>>, next: V) -> StoredValue<V> {
        match self.consistency {
            Consistency::NonTransactional => StoredValue::Plain(next),
            Consistency::Transactional => {
                StoredValue::Transactional(TransactionalValue { txid, value: next })
            }
            Consistency::Opaque => StoredValue::Opaque(match stored {
                Some(StoredValue::Opaque(o)) => o.advance(txid, next),
                _ => OpaqueValue { txid, prev: None, curr: next },
            }),
        }
    }
}

/// Opaque state only moves from txid t to t + 1.
fn check_adjacent(key: &CompoundKey, stored_txid: u64, incoming_txid: u64) -> StateResult<()> {
    if incoming_txid == stored_txid || Some(incoming_txid) == stored_txid.checked_add(1) {
        return Ok(());
    }
    Err(StateError::InconsistentTransition {
        key: key.to_string(),
        stored_txid,
        incoming_txid,
    })
}

/// Unique keys in first-seen order, with the input positions of each.
fn group_positions(keys: &[CompoundKey]) -> (Vec<CompoundKey>, Vec<Vec<usize>>) {
    let mut unique = Vec::with_capacity(keys.len());
    let mut positions: Vec<Vec<usize>> = Vec::with_capacity(keys.len());
    let mut index: HashMap<&CompoundKey, usize> = HashMap::with_capacity(keys.len());
    for (i, key) in keys.iter().enumerate() {
        match index.get(key) {
            Some(&slot) => positions[slot].push(i),
            None => {
                index.insert(key, unique.len());
                unique.push(key.clone());
                positions.push(vec![i]);
            }
        }
    }
    (unique, positions)
}
