//! Error taxonomy for security key operations
//!
//! Every failure surfaced by this crate falls into one of six categories
//! (see [`ErrorCategory`]). Some categories have refined variants so callers
//! can react to the common cases without inspecting status words.

use hwkey_crypto::CryptoError;
use hwkey_ctap::{CborError, StatusCode};

/// Result type for security key operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for security key operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Physical I/O failure or disconnect
    #[error("transport error: {0}")]
    Transport(hwkey_transport::Error),

    /// Malformed or unexpected response from the device
    #[error("protocol error: {0}")]
    Protocol(String),

    /// PIN or administrative verification failed
    #[error("security status not satisfied (retries remaining: {})", fmt_retries(.retries))]
    SecurityStatus { retries: Option<u8> },

    /// The authentication method is locked
    #[error("authentication method blocked")]
    Blocked,

    /// The command, applet or protocol version is not supported
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Superseded or cancelled before delivery
    #[error("operation cancelled")]
    Cancelled,

    /// Link retries exhausted or the operation deadline expired
    #[error("operation timed out")]
    Timeout,

    /// The device waits for a touch (SW 6985)
    #[error("user presence required")]
    PresenceRequired,

    #[error("PIN required")]
    PinRequired,

    #[error("no PIN set on the device")]
    PinNotSet,

    /// Only one PIN attempt is left and the caller did not allow using it
    #[error("only one PIN attempt left")]
    LastAttempt,

    #[error("PIN too short")]
    PinTooShort,

    #[error("PIN too long")]
    PinTooLong,

    /// No credential on the device matches the request
    #[error("no matching credentials")]
    NoCredentials,

    /// CTAP2 status without a dedicated variant
    #[error("authenticator error: {0}")]
    Ctap(StatusCode),
}

fn fmt_retries(retries: &Option<u8>) -> String {
    retries.map_or_else(|| "unknown".to_owned(), |r| r.to_string())
}

/// The six top-level error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Transport,
    Protocol,
    SecurityStatus,
    Blocked,
    Unsupported,
    Cancelled,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Transport(_) | Error::Timeout | Error::PresenceRequired => ErrorCategory::Transport,
            Error::Protocol(_) | Error::NoCredentials | Error::Ctap(_) => ErrorCategory::Protocol,
            Error::SecurityStatus { .. }
            | Error::PinRequired
            | Error::PinNotSet
            | Error::LastAttempt
            | Error::PinTooShort
            | Error::PinTooLong => ErrorCategory::SecurityStatus,
            Error::Blocked => ErrorCategory::Blocked,
            Error::Unsupported(_) => ErrorCategory::Unsupported,
            Error::Cancelled => ErrorCategory::Cancelled,
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(message.into())
    }

    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        Error::Unsupported(message.into())
    }

    /// Whether the link to the device is gone
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Error::Transport(hwkey_transport::Error::NotConnected | hwkey_transport::Error::DeviceNotFound)
        )
    }
}

impl From<hwkey_transport::Error> for Error {
    fn from(err: hwkey_transport::Error) -> Self {
        use hwkey_transport::Error as T;

        match err {
            T::Timeout => Error::Timeout,
            T::InvalidPacket
            | T::InvalidChannel { .. }
            | T::InvalidSequence { .. }
            | T::FragmentationError
            | T::NonceMismatch
            | T::MalformedResponse(_) => Error::Protocol(err.to_string()),
            other => Error::Transport(other),
        }
    }
}

impl From<CryptoError> for Error {
    fn from(err: CryptoError) -> Self {
        Error::Protocol(err.to_string())
    }
}

impl From<CborError> for Error {
    fn from(err: CborError) -> Self {
        Error::Protocol(err.to_string())
    }
}

impl From<StatusCode> for Error {
    fn from(status: StatusCode) -> Self {
        match status {
            StatusCode::PinRequired => Error::PinRequired,
            StatusCode::PinNotSet => Error::PinNotSet,
            StatusCode::PinBlocked | StatusCode::PinAuthBlocked => Error::Blocked,
            StatusCode::NoCredentials | StatusCode::InvalidCredential => Error::NoCredentials,
            StatusCode::UserActionTimeout | StatusCode::ActionTimeout => Error::Timeout,
            StatusCode::KeepaliveCancel => Error::Cancelled,
            StatusCode::PinInvalid => Error::SecurityStatus { retries: None },
            other => Error::Ctap(other),
        }
    }
}

impl From<hwkey_ctap::Error> for Error {
    fn from(err: hwkey_ctap::Error) -> Self {
        match err {
            hwkey_ctap::Error::Status(status) => status.into(),
            hwkey_ctap::Error::Cbor(err) => err.into(),
            hwkey_ctap::Error::Crypto(err) => err.into(),
            hwkey_ctap::Error::InvalidResponse(message) => Error::Protocol(message),
        }
    }
}
