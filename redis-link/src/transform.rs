//! Response transformation
//!
//! Turns a raw [`RespValue`] into the [`RedisValue`] shape a caller asked for.
//! The result depends only on the reply type, the command's
//! [`ResponseTransform`] and its [`ReturnType`].

use crate::core::{
    error::{RedisError, RedisResult},
    types::{RedisValue, ResponseTransform, ReturnType, TextEncoding},
    value::RespValue,
};
use std::collections::HashMap;

/// The transform applied to replies of `verb`
#[must_use]
pub fn transform_for(verb: &str) -> ResponseTransform {
    if verb.eq_ignore_ascii_case("HGETALL") {
        ResponseTransform::Hash
    } else if verb.eq_ignore_ascii_case("INFO") {
        ResponseTransform::Info
    } else if verb.eq_ignore_ascii_case("EVAL") || verb.eq_ignore_ascii_case("EVALSHA") {
        ResponseTransform::Array
    } else {
        ResponseTransform::None
    }
}

/// Transform one reply
///
/// # Errors
///
/// Error replies always fail with [`RedisError::Server`]; casts that make no
/// sense for the reply fail with [`RedisError::Type`].
pub fn transform(
    reply: RespValue,
    transform: ResponseTransform,
    return_type: ReturnType,
    encoding: TextEncoding,
) -> RedisResult<RedisValue> {
    match reply {
        RespValue::Error(msg) => Err(RedisError::Server(msg)),
        RespValue::SimpleString(s) => match transform {
            ResponseTransform::Array => Ok(RedisValue::Array(vec![RedisValue::String(s)])),
            _ => cast_text(s, return_type),
        },
        RespValue::Integer(i) => match transform {
            ResponseTransform::Array => Ok(RedisValue::Array(vec![RedisValue::Int(i)])),
            _ => cast_integer(i, return_type),
        },
        RespValue::Null => match transform {
            ResponseTransform::Array => Ok(RedisValue::Array(vec![RedisValue::Nil])),
            ResponseTransform::Info => Ok(RedisValue::Map(HashMap::new())),
            _ if return_type == ReturnType::Unit => Ok(RedisValue::Unit),
            _ => Ok(RedisValue::Nil),
        },
        RespValue::BulkString(data) => match transform {
            ResponseTransform::Array => Ok(RedisValue::Array(vec![decode_bulk(
                &data,
                return_type,
                encoding,
            )])),
            ResponseTransform::Info => Ok(RedisValue::Map(parse_info(&encoding.decode(&data)))),
            _ => match return_type {
                ReturnType::Unit => Ok(RedisValue::Unit),
                ReturnType::Bytes => Ok(RedisValue::Bytes(data.to_vec())),
                ReturnType::Integer => cast_text(encoding.decode(&data), ReturnType::Integer),
                ReturnType::Map => Err(RedisError::Type(
                    "Cannot convert bulk string to map".to_string(),
                )),
                ReturnType::String | ReturnType::List => {
                    Ok(RedisValue::String(encoding.decode(&data)))
                }
            },
        },
        RespValue::NullArray => match transform {
            ResponseTransform::Hash => Ok(RedisValue::Map(HashMap::new())),
            _ if return_type == ReturnType::Unit => Ok(RedisValue::Unit),
            _ => Ok(RedisValue::Nil),
        },
        RespValue::Array(items) => match transform {
            ResponseTransform::Hash => decode_hash(items, return_type, encoding),
            _ if return_type == ReturnType::Unit => Ok(RedisValue::Unit),
            _ => Ok(RedisValue::Array(
                items
                    .into_iter()
                    .map(|item| decode_element(item, return_type, encoding))
                    .collect(),
            )),
        },
    }
}

fn cast_text(s: String, return_type: ReturnType) -> RedisResult<RedisValue> {
    match return_type {
        ReturnType::Unit => Ok(RedisValue::Unit),
        ReturnType::String | ReturnType::List => Ok(RedisValue::String(s)),
        ReturnType::Bytes => Ok(RedisValue::Bytes(s.into_bytes())),
        ReturnType::Integer => s
            .parse::<i64>()
            .map(RedisValue::Int)
            .map_err(|e| RedisError::Type(format!("Cannot parse integer from {:?}: {}", s, e))),
        ReturnType::Map => Err(RedisError::Type(format!("Cannot convert {:?} to map", s))),
    }
}

fn cast_integer(i: i64, return_type: ReturnType) -> RedisResult<RedisValue> {
    match return_type {
        ReturnType::Unit => Ok(RedisValue::Unit),
        ReturnType::Integer | ReturnType::List => Ok(RedisValue::Int(i)),
        ReturnType::String => Ok(RedisValue::String(i.to_string())),
        ReturnType::Bytes => Ok(RedisValue::Bytes(i.to_string().into_bytes())),
        ReturnType::Map => Err(RedisError::Type(format!("Cannot convert {} to map", i))),
    }
}

fn decode_bulk(data: &[u8], return_type: ReturnType, encoding: TextEncoding) -> RedisValue {
    if return_type == ReturnType::Bytes {
        RedisValue::Bytes(data.to_vec())
    } else {
        RedisValue::String(encoding.decode(data))
    }
}

fn decode_element(item: RespValue, return_type: ReturnType, encoding: TextEncoding) -> RedisValue {
    match item {
        RespValue::SimpleString(s) | RespValue::Error(s) => RedisValue::String(s),
        RespValue::Integer(i) => RedisValue::Int(i),
        RespValue::BulkString(data) => decode_bulk(&data, return_type, encoding),
        RespValue::Null | RespValue::NullArray => RedisValue::Nil,
        RespValue::Array(items) => RedisValue::Array(
            items
                .into_iter()
                .map(|i| decode_element(i, return_type, encoding))
                .collect(),
        ),
    }
}

fn decode_hash(
    items: Vec<RespValue>,
    return_type: ReturnType,
    encoding: TextEncoding,
) -> RedisResult<RedisValue> {
    if items.len() % 2 != 0 {
        return Err(RedisError::Type(format!(
            "Cannot build a map from {} elements",
            items.len()
        )));
    }

    let mut map = HashMap::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
        let key = match decode_element(key, ReturnType::String, encoding) {
            RedisValue::String(k) => k,
            RedisValue::Int(i) => i.to_string(),
            other => {
                return Err(RedisError::Type(format!(
                    "Invalid map key: {:?}",
                    other
                )))
            }
        };
        map.insert(key, decode_element(value, return_type, encoding));
    }

    Ok(RedisValue::Map(map))
}

/// Parse INFO text into nested maps
///
/// `# Name` lines open a section stored under the lowercased name; `key:value`
/// lines fill the open section, or the top level when none is open. A blank
/// line closes the section.
#[must_use]
pub fn parse_info(text: &str) -> HashMap<String, RedisValue> {
    let mut value = HashMap::new();
    let mut section: Option<String> = None;

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            section = None;
            continue;
        }

        if let Some(name) = line.strip_prefix('#') {
            let name = name.trim().to_lowercase();
            value.insert(name.clone(), RedisValue::Map(HashMap::new()));
            section = Some(name);
            continue;
        }

        let Some((key, entry)) = line.split_once(':') else {
            continue;
        };
        let entry = RedisValue::String(entry.to_string());

        match section.as_ref().and_then(|name| value.get_mut(name)) {
            Some(RedisValue::Map(fields)) => {
                fields.insert(key.to_string(), entry);
            }
            _ => {
                value.insert(key.to_string(), entry);
            }
        }
    }

    value
}
