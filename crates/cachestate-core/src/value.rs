//! Shapes of the values persisted under each key.
//!
//! The consistency variant decides what is stored next to the user value:
//! nothing, the last transaction id, or the last transaction id plus the
//! value that preceded it. All three live in one tagged enum so a single
//! backing store and local cache serve every variant.

use serde::{Deserialize, Serialize};

use crate::codec::CodecError;

/// `(txid, value)` kept by transactional state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionalValue<V> {
    /// Transaction that last wrote `value`
    pub txid: u64,
    pub value: V,
}

/// `(txid, previous, current)` kept by opaque state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpaqueValue<V> {
    /// Transaction that produced `curr`
    pub txid: u64,
    /// Value committed before `txid`; absent for a key's first transaction
    pub prev: Option<V>,
    pub curr: V,
}

impl<V: Clone> OpaqueValue<V> {
    /// Record `next` as the result of `txid`.
    ///
    /// Rewriting the same transaction keeps `prev`; a new transaction shifts
    /// `curr` into `prev`.
    pub fn advance(&self, txid: u64, next: V) -> Self {
        let prev = if txid == self.txid {
            self.prev.clone()
        } else {
            Some(self.curr.clone())
        };
        Self { txid, prev, curr: next }
    }
}

/// Value stored under one remote key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoredValue<V> {
    Plain(V),
    Transactional(TransactionalValue<V>),
    Opaque(OpaqueValue<V>),
}

impl<V> StoredValue<V> {
    pub fn shape(&self) -> &'static str {
        match self {
            StoredValue::Plain(_) => "plain",
            StoredValue::Transactional(_) => "transactional",
            StoredValue::Opaque(_) => "opaque",
        }
    }

    /// Transaction that wrote this value; `None` for plain values.
    pub fn txid(&self) -> Option<u64> {
        match self {
            StoredValue::Plain(_) => None,
            StoredValue::Transactional(t) => Some(t.txid),
            StoredValue::Opaque(o) => Some(o.txid),
        }
    }

    /// The user-visible value, whatever the shape.
    pub fn current(&self) -> &V {
        match self {
            StoredValue::Plain(v) => v,
            StoredValue::Transactional(t) => &t.value,
            StoredValue::Opaque(o) => &o.curr,
        }
    }

    pub fn into_current(self) -> V {
        match self {
            StoredValue::Plain(v) => v,
            StoredValue::Transactional(t) => t.value,
            StoredValue::Opaque(o) => o.curr,
        }
    }

    pub fn into_plain(self) -> Result<V, CodecError> {
        match self {
            StoredValue::Plain(v) => Ok(v),
            other => Err(other.shape_error("plain")),
        }
    }

    pub fn into_transactional(self) -> Result<TransactionalValue<V>, CodecError> {
        match self {
            StoredValue::Transactional(t) => Ok(t),
            other => Err(other.shape_error("transactional")),
        }
    }

    pub fn into_opaque(self) -> Result<OpaqueValue<V>, CodecError> {
        match self {
            StoredValue::Opaque(o) => Ok(o),
            other => Err(other.shape_error("opaque")),
        }
    }

    fn shape_error(&self, expected: &'static str) -> CodecError {
        CodecError::UnexpectedShape {
            expected,
            found: self.shape(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opaque_advance_new_txid() {
        let v = OpaqueValue { txid: 3, prev: Some(1), curr: 4 };
        let next = v.advance(4, 9);
        assert_eq!(next, OpaqueValue { txid: 4, prev: Some(4), curr: 9 });
    }

    #[test]
    fn test_opaque_advance_same_txid_keeps_prev() {
        let v = OpaqueValue { txid: 3, prev: Some(1), curr: 4 };
        let next = v.advance(3, 7);
        assert_eq!(next, OpaqueValue { txid: 3, prev: Some(1), curr: 7 });
    }

    #[test]
    fn test_shape_mismatch() {
        let stored = StoredValue::Plain(5u64);
        assert_eq!(*stored.current(), 5);
        assert_eq!(stored.txid(), None);
        match stored.into_opaque() {
            Err(CodecError::UnexpectedShape { expected, found }) => {
                assert_eq!(expected, "opaque");
                assert_eq!(found, "plain");
            }
            other => panic!("Expected UnexpectedShape, got {:?}", other),
        }
    }

    #[test]
    fn test_json_shape_tagged() {
        let stored = StoredValue::Transactional(TransactionalValue { txid: 5, value: 3u64 });
        let json = serde_json::to_string(&stored).unwrap();
        assert_eq!(json, r#"{"Transactional":{"txid":5,"value":3}}"#);
    }
}
