//! CTAP2 status codes and the crate error type
//!
//! Status codes defined in FIDO2 specification:
//! <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#error-responses>

use crate::cbor::CborError;

use hwkey_crypto::CryptoError;

macro_rules! status_codes {
    ($($name:ident = $code:literal => $msg:literal,)*) => {
        /// Status byte leading every CTAP2 response
        ///
        /// Codes this crate does not name are kept as `Unknown` so the raw
        /// byte is never lost.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
        pub enum StatusCode {
            $(
                #[error($msg)]
                $name,
            )*
            #[error("unknown CTAP status 0x{0:02x}")]
            Unknown(u8),
        }

        impl StatusCode {
            pub fn from_u8(value: u8) -> Self {
                match value {
                    $($code => Self::$name,)*
                    other => Self::Unknown(other),
                }
            }

            pub fn to_u8(self) -> u8 {
                match self {
                    $(Self::$name => $code,)*
                    Self::Unknown(value) => value,
                }
            }
        }
    };
}

status_codes! {
    Success = 0x00 => "success",
    InvalidCommand = 0x01 => "invalid command",
    InvalidParameter = 0x02 => "invalid parameter",
    InvalidLength = 0x03 => "invalid length",
    InvalidSeq = 0x04 => "invalid message sequencing",
    Timeout = 0x05 => "message timed out",
    ChannelBusy = 0x06 => "channel busy",
    LockRequired = 0x0A => "command requires channel lock",
    InvalidChannel = 0x0B => "invalid channel",
    CborUnexpectedType = 0x11 => "unexpected CBOR type",
    InvalidCbor = 0x12 => "invalid CBOR",
    MissingParameter = 0x14 => "missing parameter",
    LimitExceeded = 0x15 => "limit exceeded",
    UnsupportedExtension = 0x16 => "unsupported extension",
    CredentialExcluded = 0x19 => "credential excluded",
    Processing = 0x21 => "processing",
    InvalidCredential = 0x22 => "invalid credential",
    UserActionPending = 0x23 => "user action pending",
    OperationPending = 0x24 => "operation pending",
    NoOperations = 0x25 => "no operations",
    UnsupportedAlgorithm = 0x26 => "unsupported algorithm",
    OperationDenied = 0x27 => "operation denied",
    KeyStoreFull = 0x28 => "key store full",
    NoOperationPending = 0x2A => "no operation pending",
    UnsupportedOption = 0x2B => "unsupported option",
    InvalidOption = 0x2C => "invalid option",
    KeepaliveCancel = 0x2D => "cancelled by keepalive",
    NoCredentials = 0x2E => "no credentials",
    UserActionTimeout = 0x2F => "user action timed out",
    NotAllowed = 0x30 => "not allowed",
    PinInvalid = 0x31 => "PIN invalid",
    PinBlocked = 0x32 => "PIN blocked",
    PinAuthInvalid = 0x33 => "PIN auth invalid",
    PinAuthBlocked = 0x34 => "PIN auth blocked",
    PinNotSet = 0x35 => "PIN not set",
    PinRequired = 0x36 => "PIN required",
    PinPolicyViolation = 0x37 => "PIN policy violation",
    PinTokenExpired = 0x38 => "PIN token expired",
    RequestTooLarge = 0x39 => "request too large",
    ActionTimeout = 0x3A => "action timed out",
    UpRequired = 0x3B => "user presence required",
    Other = 0x7F => "other error",
}

impl StatusCode {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// Turn a response status byte into `Ok(())` or the failing code
    pub fn check(value: u8) -> core::result::Result<(), Self> {
        match Self::from_u8(value) {
            Self::Success => Ok(()),
            code => Err(code),
        }
    }
}

impl From<u8> for StatusCode {
    fn from(value: u8) -> Self {
        Self::from_u8(value)
    }
}

impl From<StatusCode> for u8 {
    fn from(status: StatusCode) -> u8 {
        status.to_u8()
    }
}

/// Errors raised while building requests or reading responses
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The authenticator answered with a non-zero status
    #[error("authenticator returned {0}")]
    Status(StatusCode),

    #[error(transparent)]
    Cbor(#[from] CborError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The response parsed as CBOR but its content is unusable
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<StatusCode> for Error {
    fn from(status: StatusCode) -> Self {
        Self::Status(status)
    }
}

/// Result type for CTAP operations
pub type Result<T> = core::result::Result<T, Error>;
