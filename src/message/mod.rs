//! VICI message tree
//!
//! A [`Message`] is the recursive key/value structure carried in command
//! requests, replies, and event payloads. Values come in three kinds:
//!
//! - **Scalar**: an opaque byte string (up to 64 KiB)
//! - **List**: an ordered sequence of scalars
//! - **Section**: a nested message
//!
//! Keys within one message are unique; re-inserting a key replaces its
//! value. Scalar bytes are not validated as UTF-8 by the codec; the string
//! accessors are a convenience for the common case of textual values.
//!
//! # Example
//!
//! ```
//! use rust_vici::{Message, Value};
//!
//! let child = Message::new()
//!     .with("local_ts", vec!["10.0.0.0/24"])
//!     .with("remote_ts", vec!["10.0.1.0/24"]);
//!
//! let conn = Message::new()
//!     .with("version", "2")
//!     .with("children", child);
//!
//! assert_eq!(conn.get_str("version"), Some("2"));
//! assert!(matches!(conn.get("children"), Some(Value::Section(_))));
//! ```

mod codec;

use std::collections::HashMap;

use crate::error::Result;

/// Maximum key length in bytes (single-byte length prefix on the wire)
pub const MAX_KEY_LEN: usize = 255;

/// Maximum scalar or list item length in bytes (two-byte length prefix)
pub const MAX_VALUE_LEN: usize = 65535;

/// Maximum section nesting depth accepted by the decoder
pub const MAX_SECTION_DEPTH: usize = 32;

/// A value held under a key in a [`Message`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// An opaque byte string
    Scalar(Vec<u8>),

    /// An ordered list of opaque byte strings
    List(Vec<Vec<u8>>),

    /// A nested message
    Section(Message),
}

impl Value {
    /// View a scalar value as UTF-8 text
    ///
    /// Returns `None` for non-scalar values or scalars that are not valid
    /// UTF-8.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Scalar(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    /// View a scalar value as raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Scalar(bytes) => Some(bytes.as_slice()),
            _ => None,
        }
    }

    /// View a list value's items
    #[must_use]
    pub fn as_list(&self) -> Option<&[Vec<u8>]> {
        match self {
            Self::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// View a section value's nested message
    #[must_use]
    pub fn as_section(&self) -> Option<&Message> {
        match self {
            Self::Section(message) => Some(message),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Scalar(value.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Scalar(value.into_bytes())
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Self::Scalar(value.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Scalar(value)
    }
}

/// Booleans encode as the daemon's `yes`/`no` convention
impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Scalar(if value { b"yes".to_vec() } else { b"no".to_vec() })
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Self::List(items.into_iter().map(String::into_bytes).collect())
    }
}

impl From<Vec<&str>> for Value {
    fn from(items: Vec<&str>) -> Self {
        Self::List(items.into_iter().map(|s| s.as_bytes().to_vec()).collect())
    }
}

impl From<&[&str]> for Value {
    fn from(items: &[&str]) -> Self {
        Self::List(items.iter().map(|s| s.as_bytes().to_vec()).collect())
    }
}

impl From<Message> for Value {
    fn from(message: Message) -> Self {
        Self::Section(message)
    }
}

/// The recursive key/value tree carried in VICI payloads
///
/// Iteration order over keys is unspecified; the daemon must not rely on
/// element order within a container, and neither should callers. List item
/// order is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    entries: HashMap<String, Value>,
}

impl Message {
    /// Create an empty message
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys in this message
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether this message has no keys
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a value under a key, replacing any existing value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Builder-style [`set`](Self::set)
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Look up a value by key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Look up a scalar value as UTF-8 text
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(Value::as_str)
    }

    /// Look up a list value's items
    #[must_use]
    pub fn get_list(&self, key: &str) -> Option<&[Vec<u8>]> {
        self.entries.get(key).and_then(Value::as_list)
    }

    /// Look up a nested section
    #[must_use]
    pub fn get_section(&self, key: &str) -> Option<&Message> {
        self.entries.get(key).and_then(Value::as_section)
    }

    /// Check whether a key is present
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove a key, returning its value if it was present
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    /// Iterate over the keys of this message in unspecified order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Iterate over (key, value) entries in unspecified order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Serialize this message into the VICI binary format
    ///
    /// The top-level message is emitted as bare elements without section
    /// framing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encode`](crate::Error::Encode) if a key exceeds
    /// [`MAX_KEY_LEN`] or a scalar or list item exceeds [`MAX_VALUE_LEN`].
    pub fn encode(&self) -> Result<Vec<u8>> {
        codec::encode(self)
    }

    /// Parse a message from the VICI binary format
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`](crate::Error::Protocol) on truncated
    /// elements, unexpected element tags, malformed UTF-8 keys, or section
    /// nesting deeper than [`MAX_SECTION_DEPTH`]. Scalar bytes are never
    /// validated as UTF-8.
    pub fn decode(data: &[u8]) -> Result<Self> {
        codec::decode(data)
    }
}
