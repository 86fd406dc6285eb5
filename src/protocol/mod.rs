//! Wire protocol shared by both sides of a connection.
//!
//! - `Command`: the initial-line token of every message
//! - `Headers`: ordered, case-insensitive multimap with pluggable validation
//! - `Message`: one request or response, optionally backed by a content buffer
//! - `MessageCodec`: byte stream to `MessageFrame`s and back
//! - `ResourceUri`: `agent://` and bare resource references with their options

pub use codec::{CodecLimits, DecoderState, Inbound, MessageCodec, MessageFrame};
pub use command::Command;
pub use headers::Headers;
pub use message::{DecodeResult, Message};
pub use response_code::{ResponseCode, ResponseGroup};
pub use uri::{is_glob_pattern, AfterTransfer, AgentAddr, OnExist, ResourceUri, UriOptions};

mod codec;
mod command;
pub mod headers;
mod message;
mod response_code;
mod uri;
