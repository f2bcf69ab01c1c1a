//! Decrypted PIN token held for one authentication session
//!
//! The token authorizes makeCredential and getAssertion through `pinAuth`.
//! It lives in [`SecBytes`] and is zeroed when dropped.
//!
//! Reference: FIDO2 CTAP 2.0 specification, Section 5.5.8

use crate::sec_bytes::SecBytes;
use crate::status::Result;

use hwkey_crypto::pin_protocol::v1;

/// PIN token obtained from getPINToken
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinToken {
    token: SecBytes,
}

impl PinToken {
    /// Decrypt `pinTokenEnc` with the session shared secret
    ///
    /// # Arguments
    ///
    /// * `shared_secret` - output of PIN protocol one key agreement
    /// * `encrypted` - the `pinToken` field of the clientPin response
    pub fn decrypt(shared_secret: &[u8; 32], encrypted: &[u8]) -> Result<Self> {
        let token = v1::decrypt(shared_secret, encrypted)?;
        Ok(Self {
            token: SecBytes::new(token),
        })
    }

    /// Wrap an already decrypted token
    pub fn from_bytes(token: Vec<u8>) -> Self {
        Self {
            token: SecBytes::new(token),
        }
    }

    /// `pinAuth` for a client data hash: LEFT(HMAC-SHA-256(token, cdh), 16)
    pub fn authenticate(&self, client_data_hash: &[u8]) -> Result<[u8; v1::PIN_AUTH_LEN]> {
        Ok(v1::authenticate(self.token.as_slice(), client_data_hash)?)
    }

    pub fn len(&self) -> usize {
        self.token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.token.is_empty()
    }
}
