//! Serial session error types.

use thiserror::Error;

/// Serial session errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SerialError {
    /// Transport could not be constructed or opened
    #[error("transport open failed: {0}")]
    TransportOpen(String),

    /// Transport reported a failed connection attempt
    #[error("connection failed: {0}")]
    Connect(String),

    /// Read or write failure on an established link
    #[error("i/o error: {0}")]
    Io(String),

    /// Transport status notification (marginal link noise)
    #[error("gatt status {0}")]
    Status(u8),

    /// Write attempted without an active session
    #[error("not connected")]
    NotConnected,
}

impl SerialError {
    /// Whether this error belongs to the transient transport-status class.
    ///
    /// Such statuses can fire many times per second while the link is
    /// marginal, so they are swallowed whenever a reconnect is attempted.
    pub fn is_transient_status(&self) -> bool {
        matches!(self, SerialError::Status(_))
    }
}

impl From<std::io::Error> for SerialError {
    fn from(e: std::io::Error) -> Self {
        SerialError::Io(e.to_string())
    }
}
