//! Value serializers.
//!
//! The remote cache stores opaque bytes. A [`Serializer`] turns stored values
//! into those bytes and back. [`ChecksummedSerializer`] frames any inner
//! serializer's payload so corrupted cache entries are detected on read.
//!
//! Checksummed layout:
//!   [0..4]  checksum: u32 LE - CRC32C of payload bytes
//!   [4..]   payload:  inner serializer output

use std::marker::PhantomData;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Checksum frame header size in bytes
pub const CHECKSUM_SIZE: usize = 4;

/// Failure to encode or decode a stored value
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON encoding or decoding failed
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// Fewer bytes than the frame header requires
    #[error("truncated value: {len} bytes, need at least {needed}")]
    Truncated {
        /// Bytes available
        len: usize,
        /// Bytes required
        needed: usize,
    },

    /// Payload does not match its checksum
    #[error("checksum mismatch: expected 0x{expected:08x}, got 0x{actual:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the frame
        expected: u32,
        /// Checksum computed over the payload
        actual: u32,
    },

    /// Decoded value has a different shape than the store expects
    #[error("unexpected value shape: expected {expected}, found {found}")]
    UnexpectedShape {
        expected: &'static str,
        found: &'static str,
    },
}

/// Converts values to and from the bytes kept in the remote cache.
pub trait Serializer<T>: Send + Sync {
    fn serialize(&self, value: &T) -> Result<Vec<u8>, CodecError>;
    fn deserialize(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// JSON serializer for any serde type.
pub struct JsonSerializer<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonSerializer<T> {
    pub fn new() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<T> Default for JsonSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Serializer<T> for JsonSerializer<T>
where
    T: Serialize + DeserializeOwned,
{
    fn serialize(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Wraps a serializer with a CRC32C frame.
pub struct ChecksummedSerializer<S> {
    inner: S,
}

impl<S> ChecksummedSerializer<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<T, S> Serializer<T> for ChecksummedSerializer<S>
where
    S: Serializer<T>,
{
    fn serialize(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        let payload = self.inner.serialize(value)?;
        let checksum = crc32c::crc32c(&payload);
        let mut framed = Vec::with_capacity(CHECKSUM_SIZE + payload.len());
        framed.extend_from_slice(&checksum.to_le_bytes());
        framed.extend_from_slice(&payload);
        Ok(framed)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T, CodecError> {
        if bytes.len() < CHECKSUM_SIZE {
            return Err(CodecError::Truncated {
                len: bytes.len(),
                needed: CHECKSUM_SIZE,
            });
        }
        let expected = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let payload = &bytes[CHECKSUM_SIZE..];
        let actual = crc32c::crc32c(payload);
        if expected != actual {
            return Err(CodecError::ChecksumMismatch { expected, actual });
        }
        self.inner.deserialize(payload)
    }
}
