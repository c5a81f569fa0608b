//! pylon-core — value codec, wire framing, and envelope codecs shared by
//! every Pylon crate.

pub mod codec;
pub mod config;
pub mod frame;
pub mod request;
pub mod response;
pub mod value;

pub use config::ClusterConfig;
pub use request::{Address, PackedRequest, Request, RequestFrame};
pub use response::{PackedResponse, Padding, Response};
pub use value::{Key, Table, Value};

/// Fragmentation threshold shared by the request and response codecs:
/// any message of at least this many bytes travels as a header frame
/// plus continuation frames of exactly this size (bar the last).
pub const MULTI_PART: usize = 0x8000;

/// Errors from the request/response envelope codecs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtoError {
    #[error("session must be non-zero")]
    ZeroSession,

    #[error("message must not be empty")]
    EmptyMessage,

    #[error("service name length {0} outside 1..=255")]
    NameLength(usize),

    #[error("unknown request type 0x{0:02x}")]
    UnknownRequestType(u8),

    #[error("unknown response type 0x{0:02x}")]
    UnknownResponseType(u8),

    #[error("request or response frame truncated")]
    Truncated,
}
