//! RESP (`REdis` Serialization Protocol) value types

use crate::error::{RedisError, RedisResult};
use bytes::Bytes;

/// A parsed RESP reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Simple string: +OK\r\n
    SimpleString(String),
    /// Error: -ERR message\r\n
    Error(String),
    /// Integer: :1000\r\n
    Integer(i64),
    /// Bulk string: $6\r\nfoobar\r\n
    BulkString(Bytes),
    /// Null bulk string: $-1\r\n
    Null,
    /// Array: *2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n
    Array(Vec<RespValue>),
    /// Null array: *-1\r\n
    NullArray,
}

impl RespValue {
    /// The RESP prefix byte this value was (or would be) encoded with
    #[must_use]
    pub const fn type_byte(&self) -> u8 {
        match self {
            Self::SimpleString(_) => b'+',
            Self::Error(_) => b'-',
            Self::Integer(_) => b':',
            Self::BulkString(_) | Self::Null => b'$',
            Self::Array(_) | Self::NullArray => b'*',
        }
    }

    /// Convert to a string if possible
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be converted to a string.
    pub fn as_string(&self) -> RedisResult<String> {
        match self {
            Self::SimpleString(s) => Ok(s.clone()),
            Self::BulkString(b) => String::from_utf8(b.to_vec())
                .map_err(|e| RedisError::Type(format!("Invalid UTF-8: {e}"))),
            Self::Integer(i) => Ok(i.to_string()),
            Self::Null | Self::NullArray => Err(RedisError::Type("Value is null".to_string())),
            _ => Err(RedisError::Type(format!(
                "Cannot convert {self:?} to string"
            ))),
        }
    }

    /// Convert to an integer if possible
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be converted to an integer.
    pub fn as_int(&self) -> RedisResult<i64> {
        match self {
            Self::Integer(i) => Ok(*i),
            Self::SimpleString(_) | Self::BulkString(_) => self
                .as_string()?
                .parse::<i64>()
                .map_err(|e| RedisError::Type(format!("Cannot parse integer: {e}"))),
            _ => Err(RedisError::Type(format!(
                "Cannot convert {self:?} to integer"
            ))),
        }
    }

    /// Whether this bulk string holds exactly `literal`
    #[must_use]
    pub fn is_bulk(&self, literal: &str) -> bool {
        matches!(self, Self::BulkString(b) if b.as_ref() == literal.as_bytes())
    }
}

impl From<&str> for RespValue {
    fn from(s: &str) -> Self {
        Self::BulkString(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for RespValue {
    fn from(s: String) -> Self {
        Self::BulkString(Bytes::from(s.into_bytes()))
    }
}

impl From<i64> for RespValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_bytes() {
        assert_eq!(RespValue::SimpleString("OK".into()).type_byte(), b'+');
        assert_eq!(RespValue::Error("ERR".into()).type_byte(), b'-');
        assert_eq!(RespValue::Integer(1).type_byte(), b':');
        assert_eq!(RespValue::Null.type_byte(), b'$');
        assert_eq!(RespValue::NullArray.type_byte(), b'*');
    }

    #[test]
    fn test_is_bulk_literal() {
        assert!(RespValue::from("message").is_bulk("message"));
        assert!(!RespValue::SimpleString("message".into()).is_bulk("message"));
        assert!(!RespValue::from("pmessage").is_bulk("message"));
    }

    #[test]
    fn test_as_int_from_bulk() {
        assert_eq!(RespValue::from("42").as_int().unwrap(), 42);
        assert!(RespValue::from("forty").as_int().is_err());
        assert!(RespValue::Null.as_string().is_err());
    }
}
