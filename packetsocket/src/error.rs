use std::{sync::Arc, time::Duration};

/// Result type for packetsocket.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for packetsocket.
///
/// Registry, codec and per-frame errors are recoverable on a connection: they are
/// reported and the receive loop moves on. Framing errors that lose the frame
/// boundary close the connection.
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    /// A packet type with this alias is already registered
    #[error("packet alias {0:?} is already registered")]
    DuplicateAlias(String),
    /// No packet type is registered under this alias
    #[error("unknown packet alias {0:?}")]
    UnknownAlias(String),
    /// A packet type declaration was rejected
    #[error("invalid packet type: {0}")]
    InvalidDescriptor(String),
    /// A packet could not be constructed from the given values
    #[error("invalid packet: {0}")]
    InvalidPacket(String),
    /// A packet's values do not conform to its schema
    #[error("encode failed: {0}")]
    Encode(String),
    /// A payload could not be decoded
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),
    /// A frame payload is larger than the configured maximum
    #[error("frame payload of {length}b exceeds the maximum of {max}b")]
    FrameTooLarge {
        /// Declared or attempted payload length
        length: usize,
        /// Configured maximum
        max: usize,
    },
    /// A frame was read completely but can not be used
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    /// The frame boundary was lost; the stream can not be resynchronized
    #[error("corrupt frame: {0}")]
    CorruptFrame(String),
    /// The connection is closed, or closed before a response arrived
    #[error("Connection is closed")]
    ConnectionClosed,
    /// Writing to the transport failed
    #[error("send failed: {0}")]
    SendError(Arc<std::io::Error>),
    /// Reading from the transport failed
    #[error("IO failure: {0}")]
    IoFailure(Arc<std::io::Error>),
    /// `respond` was called for a packet that did not arrive as a request
    #[error("packet {0:?} was not sent as a request")]
    NotARequest(String),
    /// No response arrived within the caller's deadline
    #[error("no response within {0:?}")]
    ResponseTimeout(Duration),
    /// A schema document could not be rendered or parsed
    #[error("schema export failed: {0}")]
    Export(Arc<serde_json::Error>),
}

/// Why a payload failed to decode.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The payload ended before the schema was satisfied
    #[error("truncated input: needed {needed}b, {available}b available")]
    TruncatedInput {
        /// Bytes the next read required
        needed: usize,
        /// Bytes that were left
        available: usize,
    },
    /// A tag, presence or boolean byte was out of range
    #[error("invalid {what} tag {tag}")]
    InvalidTag {
        /// What was being decoded
        what: &'static str,
        /// The offending value
        tag: u64,
    },
    /// A string field was not valid UTF-8
    #[error("string field is not valid utf-8")]
    InvalidUtf8,
    /// Bytes were left over after the last field
    #[error("{0}b left over after the last field")]
    TrailingBytes(usize),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::IoFailure(Arc::new(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Export(Arc::new(e))
    }
}

impl Error {
    /// True when the receive loop can not continue after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::FrameTooLarge { .. }
                | Error::CorruptFrame(_)
                | Error::ConnectionClosed
                | Error::SendError(_)
                | Error::IoFailure(_)
        )
    }
}
