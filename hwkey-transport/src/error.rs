//! Transport layer error types

use thiserror::Error;

/// Transport layer result type
pub type Result<T> = std::result::Result<T, Error>;

/// Transport layer errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Invalid packet format
    #[error("Invalid packet format")]
    InvalidPacket,

    /// Packet arrived on a channel other than the one that opened the message
    #[error("Invalid channel ID: expected {expected:08x}, got {actual:08x}")]
    InvalidChannel { expected: u32, actual: u32 },

    /// Invalid command
    #[error("Invalid command")]
    InvalidCommand,

    /// Continuation packet out of order
    #[error("Invalid sequence number: expected {expected}, got {actual}")]
    InvalidSequence { expected: u8, actual: u8 },

    /// Message too large
    #[error("Message too large")]
    MessageTooLarge,

    /// Message fragmentation error
    #[error("Message fragmentation error")]
    FragmentationError,

    /// INIT response did not echo our nonce
    #[error("Channel initialization nonce mismatch")]
    NonceMismatch,

    /// Response bytes could not be parsed
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// APDU data exceeds what the selected length form can carry
    #[error("APDU data too long: {len} bytes (max {max})")]
    DataTooLong { len: usize, max: usize },

    /// Device answered a chained APDU with a non-success status word
    #[error("Failed to chain APDU {index}/{total}, status word {sw:04x}")]
    ChainingFailed { index: usize, total: usize, sw: u16 },

    /// Timeout waiting for message
    #[error("Timeout waiting for message")]
    Timeout,

    /// Channel busy
    #[error("Channel busy")]
    ChannelBusy,

    /// Device reported a CTAPHID error code
    #[error("Device reported CTAPHID error 0x{0:02x}")]
    Device(u8),

    /// The device refused to accept a write
    #[error("Failed to enqueue data: {0}")]
    Enqueue(String),

    /// Link was released or never connected
    #[error("Transport not connected")]
    NotConnected,

    /// Device not found
    #[error("Device not found")]
    DeviceNotFound,

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(String),
}

impl Error {
    /// Whether the link layer may retry the exchange that produced this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout | Error::ChannelBusy)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err.to_string())
    }
}
