//! Error types for the OSC client

use thiserror::Error;

/// Result type for OSC operations
pub type Result<T> = std::result::Result<T, OscError>;

/// OSC transport and decoding errors
#[derive(Error, Debug)]
pub enum OscError {
    /// Socket bind/send/receive failure
    #[error("OSC socket error: {0}")]
    Io(#[from] std::io::Error),

    /// Outgoing message could not be encoded
    #[error("OSC encode error for {address}: {detail}")]
    Encode { address: String, detail: String },

    /// No correlated reply arrived in time
    #[error("Timed out after {waited_ms}ms waiting for reply to {address} on port {reply_port} ({attempts} attempts)")]
    Timeout {
        address: String,
        reply_port: u16,
        waited_ms: u64,
        attempts: u32,
    },

    /// Reply arrived but its arguments do not have the expected shape
    #[error("Unexpected reply to {address}: {detail}")]
    UnexpectedReply { address: String, detail: String },
}

impl OscError {
    /// Whether the error is a reply timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, OscError::Timeout { .. })
    }
}
