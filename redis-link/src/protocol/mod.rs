//! Redis protocol implementation
//!
//! Request encoding and incremental reply parsing for RESP2, the wire format
//! every connection speaks.

pub mod parser;
pub mod resp2;

pub use parser::ReplyParser;
pub use resp2::{RespDecoder, RespEncoder, MAX_DEPTH};
