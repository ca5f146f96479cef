//! Common types used throughout the library

use crate::error::{RedisError, RedisResult};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A transformed command result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedisValue {
    /// Null reply (null bulk or null array)
    Nil,
    /// The command succeeded and its payload is not wanted
    Unit,
    /// Text value
    String(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// Integer value
    Int(i64),
    /// Ordered list of values
    Array(Vec<RedisValue>),
    /// Key/value map (HGETALL, INFO)
    Map(HashMap<String, RedisValue>),
}

impl RedisValue {
    /// Check if this is a nil value
    #[must_use]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Borrow the text of a string value
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the elements of an array value
    #[must_use]
    pub fn as_array(&self) -> Option<&[RedisValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow the entries of a map value
    #[must_use]
    pub const fn as_map(&self) -> Option<&HashMap<String, RedisValue>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Look up `key` in a map value
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&RedisValue> {
        self.as_map().and_then(|map| map.get(key))
    }
}

impl From<String> for RedisValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for RedisValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<Vec<u8>> for RedisValue {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl From<i64> for RedisValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<Vec<Self>> for RedisValue {
    fn from(arr: Vec<Self>) -> Self {
        Self::Array(arr)
    }
}

impl TryFrom<RedisValue> for String {
    type Error = RedisError;

    fn try_from(value: RedisValue) -> RedisResult<Self> {
        match value {
            RedisValue::String(s) => Ok(s),
            RedisValue::Int(i) => Ok(i.to_string()),
            RedisValue::Bytes(b) => {
                Self::from_utf8(b).map_err(|e| RedisError::Type(format!("Invalid UTF-8: {e}")))
            }
            other => Err(RedisError::Type(format!("Cannot convert {other:?} to string"))),
        }
    }
}

impl TryFrom<RedisValue> for Option<String> {
    type Error = RedisError;

    fn try_from(value: RedisValue) -> RedisResult<Self> {
        match value {
            RedisValue::Nil => Ok(None),
            other => String::try_from(other).map(Some),
        }
    }
}

impl TryFrom<RedisValue> for i64 {
    type Error = RedisError;

    fn try_from(value: RedisValue) -> RedisResult<Self> {
        match value {
            RedisValue::Int(i) => Ok(i),
            RedisValue::String(s) => s
                .parse()
                .map_err(|e| RedisError::Type(format!("Cannot parse integer: {e}"))),
            other => Err(RedisError::Type(format!("Cannot convert {other:?} to integer"))),
        }
    }
}

impl TryFrom<RedisValue> for Vec<RedisValue> {
    type Error = RedisError;

    fn try_from(value: RedisValue) -> RedisResult<Self> {
        match value {
            RedisValue::Array(items) => Ok(items),
            RedisValue::Nil => Ok(Vec::new()),
            other => Err(RedisError::Type(format!("Cannot convert {other:?} to array"))),
        }
    }
}

impl TryFrom<RedisValue> for HashMap<String, RedisValue> {
    type Error = RedisError;

    fn try_from(value: RedisValue) -> RedisResult<Self> {
        match value {
            RedisValue::Map(map) => Ok(map),
            RedisValue::Nil => Ok(Self::new()),
            other => Err(RedisError::Type(format!("Cannot convert {other:?} to map"))),
        }
    }
}

/// The shape a caller wants a scalar reply decoded into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnType {
    /// Discard the payload
    Unit,
    /// Decode text with the connection encoding
    #[default]
    String,
    /// Keep raw bytes
    Bytes,
    /// 64-bit integer
    Integer,
    /// Ordered list
    List,
    /// Key/value map
    Map,
}

/// Post-processing applied to a reply before it reaches the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseTransform {
    /// Decode verbatim
    #[default]
    None,
    /// Wrap scalar replies in a single-element list
    Array,
    /// Fold a flat multi-bulk into a key/value map
    Hash,
    /// Parse INFO text into (sectioned) maps
    Info,
}

/// Text encoding used for textual arguments and bulk replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextEncoding {
    /// UTF-8 (malformed input decodes lossily)
    #[default]
    Utf8,
    /// ISO-8859-1, one byte per char
    Latin1,
}

impl TextEncoding {
    /// Encode text into wire bytes
    #[must_use]
    pub fn encode(self, text: &str) -> Bytes {
        match self {
            Self::Utf8 => Bytes::copy_from_slice(text.as_bytes()),
            Self::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect::<Vec<u8>>()
                .into(),
        }
    }

    /// Decode wire bytes into text
    #[must_use]
    pub fn decode(self, data: &[u8]) -> String {
        match self {
            Self::Utf8 => String::from_utf8_lossy(data).into_owned(),
            Self::Latin1 => data.iter().map(|&b| char::from(b)).collect(),
        }
    }

    /// Look up an encoding by its common name
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unsupported encodings.
    pub fn from_name(name: &str) -> RedisResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Self::Utf8),
            "iso-8859-1" | "latin1" | "latin-1" => Ok(Self::Latin1),
            _ => Err(RedisError::Config(format!("Unsupported encoding: {name}"))),
        }
    }
}
