//! Transport layer abstraction.
//!
//! Defines the `Transport` trait for the byte channel to the device,
//! allowing different implementations (tcp, mock, etc.).

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to connect to {host}:{port}: {message}")]
    ConnectFailed {
        host: String,
        port: u16,
        message: String,
    },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    RecvFailed(String),

    #[error("Connection closed by peer")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract byte transport to an Ember+ provider.
///
/// This trait enables:
/// - Production implementation over TCP
/// - Mock implementation for unit testing
pub trait Transport {
    /// Write raw bytes to the device. The whole buffer is sent or the
    /// call fails; there is no partial-send reporting.
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Read one chunk of bytes, blocking up to `timeout`. Chunks carry
    /// arbitrary splits of the stream; framing is the codec's problem.
    fn recv(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Check if the channel is still usable.
    fn is_connected(&self) -> bool;

    /// Release the underlying channel. Idempotent.
    fn close(&mut self);
}
