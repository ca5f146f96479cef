//! Core types and traits for the redis-link Redis client
//!
//! This crate provides the fundamental types, configuration and error
//! definitions shared by the connection engine in `redis-link`.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod types;
pub mod value;

pub use config::{ConnectionConfig, SentinelEndpoint};
pub use error::{RedisError, RedisResult};
pub use types::{RedisValue, ResponseTransform, ReturnType, TextEncoding};
pub use value::RespValue;
