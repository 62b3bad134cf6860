//! Error types for cachestate operations
//!
//! All state-layer errors are represented by the StateError enum. Remote I/O
//! and consistency violations carry the offending key so the stream engine
//! can log and replay the batch deterministically.

use thiserror::Error;

use crate::client::ClientError;
use crate::codec::CodecError;

/// cachestate error types with detailed context
#[derive(Debug, Error)]
pub enum StateError {
    /// A compound key cannot be flattened into a remote key
    #[error("Unsupported key shape {key}: {reason}")]
    UnsupportedKeyShape {
        /// Display form of the violating key
        key: String,
        /// Why the key was rejected
        reason: String,
    },

    /// Keys and values of a write batch differ in length
    #[error("Mismatched batch: {keys} keys but {values} values")]
    MismatchedBatch {
        /// Number of keys in the batch
        keys: usize,
        /// Number of values in the batch
        values: usize,
    },

    /// Remote communication failed for at least one member of a batch
    #[error("Store unavailable during {operation} of {key}: {source}")]
    StoreUnavailable {
        /// "get" or "set"
        operation: &'static str,
        /// Remote key (or key summary for bulk reads) that failed
        key: String,
        /// The underlying client failure
        #[source]
        source: ClientError,
    },

    /// Opaque state saw a transaction id that is neither a replay nor the successor
    #[error("Inconsistent transition for {key}: stored txid {stored_txid}, incoming txid {incoming_txid}")]
    InconsistentTransition {
        /// Display form of the key
        key: String,
        /// Transaction id currently persisted for the key
        stored_txid: u64,
        /// Transaction id of the batch being applied
        incoming_txid: u64,
    },

    /// Connection or runtime construction failed while building a store
    #[error("Store initialization failed: {reason}")]
    StoreInitFailed {
        /// Human-readable description
        reason: String,
    },

    /// Options rejected at build time
    #[error("Invalid options: {reason}")]
    InvalidOptions {
        /// Which option is out of range
        reason: String,
    },

    /// A value could not be encoded, decoded, or had the wrong shape
    #[error("Codec failure for {key}: {source}")]
    Codec {
        /// Display form of the key
        key: String,
        /// The underlying codec failure
        #[source]
        source: CodecError,
    },
}

impl StateError {
    /// True when replaying the whole batch may succeed.
    ///
    /// Only remote communication failures qualify. Replays are idempotent for
    /// transactional and opaque state; non-transactional state may double-count.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StateError::StoreUnavailable { .. })
    }
}

/// Result type alias for cachestate operations
pub type StateResult<T> = Result<T, StateError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_display() {
        let err = StateError::InconsistentTransition {
            key: "[words]".to_string(),
            stored_txid: 4,
            incoming_txid: 7,
        };

        let display = format!("{}", err);
        assert!(display.contains("Inconsistent transition"));
        assert!(display.contains("stored txid 4"));
        assert!(display.contains("incoming txid 7"));
    }

    #[test]
    fn test_store_unavailable_keeps_source() {
        let err = StateError::StoreUnavailable {
            operation: "set",
            key: "words".to_string(),
            source: ClientError::Timeout(Duration::from_millis(250)),
        };

        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert!(source.unwrap().contains("250ms"));
        assert!(err.to_string().contains("set of words"));
    }

    #[test]
    fn test_only_remote_failures_retryable() {
        let unavailable = StateError::StoreUnavailable {
            operation: "get",
            key: "k".to_string(),
            source: ClientError::Connection("reset".to_string()),
        };
        assert!(unavailable.is_retryable());

        let mismatched = StateError::MismatchedBatch { keys: 2, values: 1 };
        assert!(!mismatched.is_retryable());

        let skipped = StateError::InconsistentTransition {
            key: "k".to_string(),
            stored_txid: 1,
            incoming_txid: 3,
        };
        assert!(!skipped.is_retryable());
    }
}
