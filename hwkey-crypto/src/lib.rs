//! Cryptographic primitives for the CTAP2 client PIN protocol
//!
//! - **ECDH**: P-256 key agreement with the authenticator
//! - **PIN protocol one**: AES-256-CBC with a zero IV, truncated HMAC-SHA-256,
//!   PIN hashing and padding
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#authenticatorClientPIN>

pub mod ecdh;
pub mod error;
pub mod pin_protocol;

pub use error::{CryptoError, Result};
