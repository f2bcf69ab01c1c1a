//! PIN protocol one, platform side
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#authenticatorClientPIN>
//!
//! - sharedSecret = SHA-256(x-coordinate of the ECDH point)
//! - encryption is AES-256-CBC with an all-zero IV and no padding
//! - authentication is the first 16 bytes of HMAC-SHA-256

use crate::error::{CryptoError, Result};

use aes::Aes256;
use cbc::{
    Decryptor, Encryptor,
    cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding},
};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

type HmacSha256 = Hmac<Sha256>;
type Aes256CbcEnc = Encryptor<Aes256>;
type Aes256CbcDec = Decryptor<Aes256>;

/// PIN protocol one
pub mod v1 {
    use super::*;

    /// Protocol number sent as `pinProtocol`
    pub const PROTOCOL_VERSION: u8 = 1;

    /// AES block size
    pub const BLOCK_SIZE: usize = 16;

    /// Length of a truncated HMAC (pinAuth)
    pub const PIN_AUTH_LEN: usize = 16;

    /// Size of the padded PIN block carried in newPinEnc
    pub const PADDED_PIN_LEN: usize = 64;

    /// Derive the session key from the raw ECDH x-coordinate
    pub fn shared_secret(ecdh_x: &[u8; 32]) -> Zeroizing<[u8; 32]> {
        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(&Sha256::digest(ecdh_x));
        key
    }

    /// AES-256-CBC encrypt with a zero IV
    ///
    /// # Errors
    ///
    /// `InvalidBlockLength` unless `plaintext` is a whole number of blocks.
    ///
    /// # Examples
    ///
    /// ```
    /// use hwkey_crypto::pin_protocol::v1;
    ///
    /// let key = [0x42u8; 32];
    /// let ciphertext = v1::encrypt(&key, &[0u8; 32]).unwrap();
    /// assert_eq!(v1::decrypt(&key, &ciphertext).unwrap(), vec![0u8; 32]);
    /// assert!(v1::encrypt(&key, b"not a block").is_err());
    /// ```
    pub fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
        check_blocks(plaintext.len())?;

        let iv = [0u8; BLOCK_SIZE];
        let mut buffer = plaintext.to_vec();
        let len = buffer.len();
        Aes256CbcEnc::new(key.into(), &iv.into())
            .encrypt_padded_mut::<NoPadding>(&mut buffer, len)
            .map_err(|_| CryptoError::EncryptionFailed)?;
        Ok(buffer)
    }

    /// AES-256-CBC decrypt with a zero IV
    pub fn decrypt(key: &[u8; 32], ciphertext: &[u8]) -> Result<Vec<u8>> {
        check_blocks(ciphertext.len())?;

        let iv = [0u8; BLOCK_SIZE];
        let mut buffer = ciphertext.to_vec();
        Aes256CbcDec::new(key.into(), &iv.into())
            .decrypt_padded_mut::<NoPadding>(&mut buffer)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        Ok(buffer)
    }

    /// First 16 bytes of HMAC-SHA-256
    ///
    /// # Arguments
    ///
    /// * `key` - shared secret or PIN token
    /// * `data` - message to authenticate
    pub fn authenticate(key: &[u8], data: &[u8]) -> Result<[u8; PIN_AUTH_LEN]> {
        let mut mac = HmacSha256::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
            expected: 32,
            actual: key.len(),
        })?;
        mac.update(data);
        let result = mac.finalize().into_bytes();

        let mut out = [0u8; PIN_AUTH_LEN];
        out.copy_from_slice(&result[..PIN_AUTH_LEN]);
        Ok(out)
    }

    /// Constant-time check of a truncated HMAC
    pub fn verify(key: &[u8], data: &[u8], expected: &[u8]) -> bool {
        match authenticate(key, data) {
            Ok(computed) => computed.as_slice().ct_eq(expected).into(),
            Err(_) => false,
        }
    }

    /// LEFT(SHA-256(pin), 16)
    pub fn hash_pin(pin: &str) -> Zeroizing<[u8; 16]> {
        let mut digest = Sha256::digest(pin.as_bytes());
        let mut out = Zeroizing::new([0u8; 16]);
        out.copy_from_slice(&digest[..16]);
        digest.as_mut_slice().zeroize();
        out
    }

    /// PIN bytes right-padded with zeros to 64 bytes
    ///
    /// # Errors
    ///
    /// `PinTooLong` if the UTF-8 encoding is longer than 63 bytes.
    pub fn pad_pin(pin: &str) -> Result<Zeroizing<[u8; PADDED_PIN_LEN]>> {
        let bytes = pin.as_bytes();
        if bytes.len() >= PADDED_PIN_LEN {
            return Err(CryptoError::PinTooLong(bytes.len()));
        }
        let mut padded = Zeroizing::new([0u8; PADDED_PIN_LEN]);
        padded[..bytes.len()].copy_from_slice(bytes);
        Ok(padded)
    }

    /// pinHashEnc for getPINToken and changePIN
    pub fn pin_hash_enc(shared_secret: &[u8; 32], pin: &str) -> Result<Vec<u8>> {
        encrypt(shared_secret, hash_pin(pin).as_slice())
    }

    /// newPinEnc for setPIN and changePIN
    pub fn new_pin_enc(shared_secret: &[u8; 32], pin: &str) -> Result<Vec<u8>> {
        encrypt(shared_secret, pad_pin(pin)?.as_slice())
    }

    fn check_blocks(len: usize) -> Result<()> {
        if len % BLOCK_SIZE != 0 {
            return Err(CryptoError::InvalidBlockLength(len));
        }
        Ok(())
    }
}
