//! Store options
//!
//! Options are fixed when a store is built. Defaults match a single local
//! cache of 1000 entries, the `$GLOBAL$` snapshot key, and single-field keys.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{StateError, StateResult};
use crate::keys::{KeyBuilder, SingleFieldKeyBuilder};

/// Reserved key under which snapshot state is stored
pub const DEFAULT_GLOBAL_KEY: &str = "$GLOBAL$";

/// Default number of entries in the local cache
pub const DEFAULT_LOCAL_CACHE_SIZE: usize = 1000;

/// cachestate store options
#[derive(Clone)]
pub struct Options {
    /// Maximum entries held by the bounded local cache
    pub local_cache_size: usize,
    /// Key used by snapshot views
    pub global_key: String,
    /// Flattens compound keys into remote keys
    pub key_builder: Arc<dyn KeyBuilder>,
    /// Deadline for every single remote operation
    pub op_timeout: Duration,
    /// Worker threads of the shared I/O runtime
    pub io_threads: usize,
}

impl Options {
    pub fn new() -> Self {
        Self {
            local_cache_size: DEFAULT_LOCAL_CACHE_SIZE,
            global_key: DEFAULT_GLOBAL_KEY.to_string(),
            key_builder: Arc::new(SingleFieldKeyBuilder),
            op_timeout: Duration::from_millis(2500),
            io_threads: 2,
        }
    }

    pub fn with_local_cache_size(mut self, size: usize) -> Self {
        self.local_cache_size = size;
        self
    }

    pub fn with_global_key(mut self, key: impl Into<String>) -> Self {
        self.global_key = key.into();
        self
    }

    pub fn with_key_builder(mut self, builder: impl KeyBuilder + 'static) -> Self {
        self.key_builder = Arc::new(builder);
        self
    }

    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    pub fn with_io_threads(mut self, threads: usize) -> Self {
        self.io_threads = threads;
        self
    }

    /// Validate all option values
    pub fn validate(&self) -> StateResult<()> {
        let invalid = |reason: &str| StateError::InvalidOptions { reason: reason.to_string() };
        if self.local_cache_size == 0 {
            return Err(invalid("local_cache_size must be > 0"));
        }
        if self.global_key.is_empty() {
            return Err(invalid("global_key must not be empty"));
        }
        if self.op_timeout.is_zero() {
            return Err(invalid("op_timeout must be > 0"));
        }
        if self.io_threads == 0 {
            return Err(invalid("io_threads must be > 0"));
        }
        Ok(())
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("local_cache_size", &self.local_cache_size)
            .field("global_key", &self.global_key)
            .field("op_timeout", &self.op_timeout)
            .field("io_threads", &self.io_threads)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{CompoundKey, ConcatKeyBuilder};

    #[test]
    fn test_defaults_valid() {
        let opts = Options::default();
        assert!(opts.validate().is_ok());
        assert_eq!(opts.local_cache_size, 1000);
        assert_eq!(opts.global_key, "$GLOBAL$");
    }

    #[test]
    fn test_default_key_builder_is_single_field() {
        let opts = Options::default();
        let key: CompoundKey = vec!["a", "b"].into_iter().collect();
        assert!(opts.key_builder.build_single_key(&key).is_err());
        assert_eq!(opts.key_builder.build_single_key(&CompoundKey::from("a")).unwrap(), "a");
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        assert!(Options::new().with_local_cache_size(0).validate().is_err());
        assert!(Options::new().with_global_key("").validate().is_err());
        assert!(Options::new().with_op_timeout(Duration::ZERO).validate().is_err());
        assert!(Options::new().with_io_threads(0).validate().is_err());
    }

    #[test]
    fn test_builder_setters() {
        let opts = Options::new()
            .with_local_cache_size(2)
            .with_global_key("ALL")
            .with_key_builder(ConcatKeyBuilder::new("p:", '|'));
        let key: CompoundKey = vec!["a", "b"].into_iter().collect();
        assert_eq!(opts.key_builder.build_single_key(&key).unwrap(), "p:a|b");
        assert!(format!("{:?}", opts).contains("local_cache_size: 2"));
    }
}
