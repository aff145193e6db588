//! FINS link error types

use thiserror::Error;

/// Result type for fins-comlink operations
pub type Result<T> = std::result::Result<T, FinsError>;

/// FINS link errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FinsError {
    /// Address text could not be parsed. Always a configuration defect.
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// TCP connect did not complete within the connect timeout
    #[error("Connect timeout: {0}")]
    ConnectTimeout(String),

    /// Node address handshake was rejected or malformed
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Operation attempted while the session is disconnected
    #[error("Not connected")]
    NotConnected,

    /// Socket failure mid-exchange; the session is dropped
    #[error("IO error: {0}")]
    Io(String),

    /// Response too short or structurally wrong
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// PLC answered with a non-zero end code
    #[error("PLC end code {main:02X}{sub:02X}")]
    PlcError { main: u8, sub: u8 },

    /// Non-zero error code in the FINS/TCP envelope
    #[error("FINS/TCP error code {0:#010X}")]
    TransportError(u32),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for FinsError {
    fn from(err: std::io::Error) -> Self {
        FinsError::Io(err.to_string())
    }
}

// Helper methods for creating errors
impl FinsError {
    pub fn invalid_address(address: impl Into<String>, reason: impl Into<String>) -> Self {
        FinsError::InvalidAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }

    pub fn handshake(msg: impl Into<String>) -> Self {
        FinsError::HandshakeFailed(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        FinsError::Io(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        FinsError::MalformedResponse(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        FinsError::Config(msg.into())
    }

    /// Whether this error leaves the stream in an unknown state.
    /// Only socket failures do; the rest are reported to the caller as-is.
    pub fn forces_disconnect(&self) -> bool {
        matches!(self, FinsError::Io(_))
    }
}
