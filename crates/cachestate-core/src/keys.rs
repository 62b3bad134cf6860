//! Compound keys and the strategies that flatten them.
//!
//! The stream engine groups by an ordered tuple of fields. The remote cache
//! only understands flat string keys, so every read and write passes its
//! [`CompoundKey`] through a [`KeyBuilder`] first.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};

/// Longest key the remote cache accepts, in bytes
pub const MAX_REMOTE_KEY_LEN: usize = 250;

/// One field of a compound key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyField {
    Str(String),
    Int(i64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl KeyField {
    /// The field as a string slice, if it is a string field.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            KeyField::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for KeyField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyField::Str(s) => f.write_str(s),
            KeyField::Int(n) => write!(f, "{}", n),
            KeyField::Bool(b) => write!(f, "{}", b),
            KeyField::Bytes(bytes) => {
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for KeyField {
    fn from(s: &str) -> Self {
        KeyField::Str(s.to_string())
    }
}

impl From<String> for KeyField {
    fn from(s: String) -> Self {
        KeyField::Str(s)
    }
}

impl From<i64> for KeyField {
    fn from(n: i64) -> Self {
        KeyField::Int(n)
    }
}

impl From<i32> for KeyField {
    fn from(n: i32) -> Self {
        KeyField::Int(n as i64)
    }
}

impl From<bool> for KeyField {
    fn from(b: bool) -> Self {
        KeyField::Bool(b)
    }
}

impl From<Vec<u8>> for KeyField {
    fn from(bytes: Vec<u8>) -> Self {
        KeyField::Bytes(bytes)
    }
}

/// Ordered sequence of fields identifying one logical record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompoundKey(Vec<KeyField>);

impl CompoundKey {
    pub fn new(fields: Vec<KeyField>) -> Self {
        Self(fields)
    }

    /// Key made of a single field.
    pub fn single(field: impl Into<KeyField>) -> Self {
        Self(vec![field.into()])
    }

    pub fn fields(&self) -> &[KeyField] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CompoundKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, field) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", field)?;
        }
        f.write_str("]")
    }
}

impl From<&str> for CompoundKey {
    fn from(s: &str) -> Self {
        Self::single(s)
    }
}

impl From<String> for CompoundKey {
    fn from(s: String) -> Self {
        Self::single(s)
    }
}

impl<F: Into<KeyField>> FromIterator<F> for CompoundKey {
    fn from_iter<I: IntoIterator<Item = F>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Flattens a compound key into the single string key stored remotely.
///
/// Implementations must be deterministic, side-effect free, and must not map
/// two distinct keys of the deployment's key space to the same string.
/// Any `Fn(&CompoundKey) -> StateResult<String>` closure is a builder.
pub trait KeyBuilder: Send + Sync {
    fn build_single_key(&self, key: &CompoundKey) -> StateResult<String>;
}

impl<F> KeyBuilder for F
where
    F: Fn(&CompoundKey) -> StateResult<String> + Send + Sync,
{
    fn build_single_key(&self, key: &CompoundKey) -> StateResult<String> {
        self(key)
    }
}

/// Default builder: accepts only keys made of exactly one string field.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleFieldKeyBuilder;

impl KeyBuilder for SingleFieldKeyBuilder {
    fn build_single_key(&self, key: &CompoundKey) -> StateResult<String> {
        if key.len() != 1 {
            return Err(StateError::UnsupportedKeyShape {
                key: key.to_string(),
                reason: format!(
                    "compound keys need a key builder ({} fields, expected 1)",
                    key.len()
                ),
            });
        }
        match key.fields()[0].as_str() {
            Some(s) => Ok(s.to_string()),
            None => Err(StateError::UnsupportedKeyShape {
                key: key.to_string(),
                reason: "single field is not a string".to_string(),
            }),
        }
    }
}

/// Marks a non-string field in a concatenated key
const TYPE_MARKER: char = '~';

/// Joins fields behind a prefix, separated by a single-character delimiter.
///
/// String fields are written as-is; other fields carry a type tag
/// (`~i3`, `~btrue`, `~xdead`) so `Str("3")` and `Int(3)` stay distinct.
/// Keys are rejected when a field contains the delimiter or a string field
/// starts with `~`, since either would let two keys join to the same string.
#[derive(Debug, Clone)]
pub struct ConcatKeyBuilder {
    prefix: String,
    delimiter: char,
}

impl ConcatKeyBuilder {
    pub fn new(prefix: impl Into<String>, delimiter: char) -> Self {
        Self {
            prefix: prefix.into(),
            delimiter,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    fn render(&self, key: &CompoundKey, field: &KeyField) -> StateResult<String> {
        let part = match field {
            KeyField::Str(s) => {
                if s.starts_with(TYPE_MARKER) {
                    return Err(StateError::UnsupportedKeyShape {
                        key: key.to_string(),
                        reason: format!("string field {:?} starts with {:?}", s, TYPE_MARKER),
                    });
                }
                s.clone()
            }
            KeyField::Int(n) => format!("{}i{}", TYPE_MARKER, n),
            KeyField::Bool(b) => format!("{}b{}", TYPE_MARKER, b),
            KeyField::Bytes(_) => format!("{}x{}", TYPE_MARKER, field),
        };
        if part.contains(self.delimiter) {
            return Err(StateError::UnsupportedKeyShape {
                key: key.to_string(),
                reason: format!("field {:?} contains delimiter {:?}", part, self.delimiter),
            });
        }
        Ok(part)
    }
}

impl Default for ConcatKeyBuilder {
    fn default() -> Self {
        Self::new("", ':')
    }
}

impl KeyBuilder for ConcatKeyBuilder {
    fn build_single_key(&self, key: &CompoundKey) -> StateResult<String> {
        if key.is_empty() {
            return Err(StateError::UnsupportedKeyShape {
                key: key.to_string(),
                reason: "key has no fields".to_string(),
            });
        }
        let mut out = self.prefix.clone();
        for (i, field) in key.fields().iter().enumerate() {
            if i > 0 {
                out.push(self.delimiter);
            }
            out.push_str(&self.render(key, field)?);
        }
        Ok(out)
    }
}

/// Check a flattened key against what the remote cache accepts.
///
/// Runs before any I/O: keys must be non-empty, at most
/// [`MAX_REMOTE_KEY_LEN`] bytes, and free of whitespace and control characters.
pub fn validate_remote_key(key: &CompoundKey, single: &str) -> StateResult<()> {
    if single.is_empty() {
        return Err(StateError::UnsupportedKeyShape {
            key: key.to_string(),
            reason: "flattened key is empty".to_string(),
        });
    }
    if single.len() > MAX_REMOTE_KEY_LEN {
        return Err(StateError::UnsupportedKeyShape {
            key: key.to_string(),
            reason: format!(
                "flattened key is {} bytes, limit is {}",
                single.len(),
                MAX_REMOTE_KEY_LEN
            ),
        });
    }
    if single.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(StateError::UnsupportedKeyShape {
            key: key.to_string(),
            reason: "flattened key contains whitespace or control characters".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_field_identity() {
        let key = CompoundKey::from("apple");
        assert_eq!(SingleFieldKeyBuilder.build_single_key(&key).unwrap(), "apple");
    }

    #[test]
    fn test_single_field_rejects_compound() {
        let key: CompoundKey = vec!["a", "b"].into_iter().collect();
        match SingleFieldKeyBuilder.build_single_key(&key) {
            Err(StateError::UnsupportedKeyShape { key, .. }) => assert_eq!(key, "[a, b]"),
            other => panic!("Expected UnsupportedKeyShape, got {:?}", other),
        }
    }

    #[test]
    fn test_single_field_rejects_non_string() {
        let key = CompoundKey::single(42i64);
        assert!(matches!(
            SingleFieldKeyBuilder.build_single_key(&key),
            Err(StateError::UnsupportedKeyShape { .. })
        ));
    }

    #[test]
    fn test_concat_builder() {
        let builder = ConcatKeyBuilder::new("wc:", '|');
        let key = CompoundKey::new(vec![KeyField::from("t"), KeyField::from(3i64)]);
        assert_eq!(builder.build_single_key(&key).unwrap(), "wc:t|~i3");
    }

    #[test]
    fn test_concat_rejects_delimiter_in_field() {
        let builder = ConcatKeyBuilder::default();
        let key: CompoundKey = vec!["a:b", "c"].into_iter().collect();
        assert!(matches!(
            builder.build_single_key(&key),
            Err(StateError::UnsupportedKeyShape { .. })
        ));
    }

    #[test]
    fn test_concat_bytes_field_hex() {
        let builder = ConcatKeyBuilder::new("", '/');
        let key = CompoundKey::new(vec![KeyField::from(vec![0xde, 0xad]), KeyField::from(true)]);
        assert_eq!(builder.build_single_key(&key).unwrap(), "~xdead/~btrue");
    }

    #[test]
    fn test_concat_field_types_stay_distinct() {
        let builder = ConcatKeyBuilder::new("", ':');
        let pairs = [
            (KeyField::from("3"), KeyField::from(3i64)),
            (KeyField::from("true"), KeyField::from(true)),
            (KeyField::from("dead"), KeyField::from(vec![0xde, 0xad])),
        ];
        for (text, typed) in pairs {
            let a = CompoundKey::new(vec![KeyField::from("x"), text]);
            let b = CompoundKey::new(vec![KeyField::from("x"), typed]);
            assert_ne!(
                builder.build_single_key(&a).unwrap(),
                builder.build_single_key(&b).unwrap()
            );
        }
    }

    #[test]
    fn test_concat_field_boundaries_stay_distinct() {
        let builder = ConcatKeyBuilder::new("", '-');
        let a: CompoundKey = vec!["ab", "c"].into_iter().collect();
        let b: CompoundKey = vec!["a", "bc"].into_iter().collect();
        assert_eq!(builder.build_single_key(&a).unwrap(), "ab-c");
        assert_eq!(builder.build_single_key(&b).unwrap(), "a-bc");
    }

    #[test]
    fn test_concat_rejects_tag_marker_in_string() {
        let builder = ConcatKeyBuilder::default();
        let spoofed: CompoundKey = vec!["~i3"].into_iter().collect();
        assert!(matches!(
            builder.build_single_key(&spoofed),
            Err(StateError::UnsupportedKeyShape { .. })
        ));
        let real = CompoundKey::single(3i64);
        assert_eq!(builder.build_single_key(&real).unwrap(), "~i3");
    }

    #[test]
    fn test_closure_builder() {
        let builder = |key: &CompoundKey| -> StateResult<String> { Ok(format!("n{}", key.len())) };
        let key: CompoundKey = vec![1i64, 2, 3].into_iter().collect();
        assert_eq!(builder.build_single_key(&key).unwrap(), "n3");
    }

    #[test]
    fn test_validate_remote_key() {
        let key = CompoundKey::from("x");
        assert!(validate_remote_key(&key, "words:apple").is_ok());
        assert!(validate_remote_key(&key, "").is_err());
        assert!(validate_remote_key(&key, "two words").is_err());
        assert!(validate_remote_key(&key, "tab\tkey").is_err());
        assert!(validate_remote_key(&key, &"k".repeat(MAX_REMOTE_KEY_LEN)).is_ok());
        assert!(validate_remote_key(&key, &"k".repeat(MAX_REMOTE_KEY_LEN + 1)).is_err());
    }
}
