//! Error types for cryptographic operations

use thiserror::Error;

/// Cryptographic operation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Peer public key is not a valid P-256 point
    #[error("Invalid public key")]
    InvalidPublicKey,

    /// Secret scalar out of range
    #[error("Invalid private key")]
    InvalidPrivateKey,

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Unpadded CBC input must be a whole number of blocks
    #[error("Data length {0} is not a multiple of the AES block size")]
    InvalidBlockLength(usize),

    /// PIN does not fit the 64-byte padded block
    #[error("PIN is {0} bytes, at most 63 are allowed")]
    PinTooLong(usize),
}

/// Result type alias for cryptographic operations
pub type Result<T> = core::result::Result<T, CryptoError>;
