//! P-256 ECDH for CTAP PIN protocol key agreement
//!
//! The platform generates an ephemeral key pair per PIN session, sends its
//! public key to the authenticator as a COSE key and combines it with the
//! authenticator's key agreement key.
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#gettingSharedSecret>

use crate::error::{CryptoError, Result};

use p256::{PublicKey, SecretKey, elliptic_curve::sec1::ToEncodedPoint};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

/// Length of an uncompressed SEC1 point
pub const UNCOMPRESSED_POINT_LEN: usize = 65;

/// P-256 key pair for ECDH key agreement
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate an ephemeral key pair
    ///
    /// # Examples
    ///
    /// ```
    /// use hwkey_crypto::ecdh::KeyPair;
    ///
    /// let keypair = KeyPair::generate();
    /// assert_eq!(keypair.public_key_bytes()[0], 0x04);
    /// ```
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Build a key pair from a fixed secret scalar
    ///
    /// # Arguments
    ///
    /// * `secret_bytes` - 32-byte big-endian scalar in `[1, n)`
    pub fn from_bytes(secret_bytes: &[u8; 32]) -> Result<Self> {
        let secret = SecretKey::from_bytes(secret_bytes.into())
            .map_err(|_| CryptoError::InvalidPrivateKey)?;
        let public = secret.public_key();
        Ok(Self { secret, public })
    }

    /// Public key as affine (x, y) coordinates, as carried in a COSE_Key
    ///
    /// # Examples
    ///
    /// ```
    /// use hwkey_crypto::ecdh::KeyPair;
    ///
    /// let keypair = KeyPair::generate();
    /// let (x, y) = keypair.public_key_cose();
    /// assert_eq!(&keypair.public_key_bytes()[1..33], &x);
    /// assert_eq!(&keypair.public_key_bytes()[33..], &y);
    /// ```
    pub fn public_key_cose(&self) -> ([u8; 32], [u8; 32]) {
        split_point(self.public.to_encoded_point(false).as_bytes())
    }

    /// Public key in uncompressed SEC1 form (`04 || x || y`)
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public.to_encoded_point(false).as_bytes().to_vec()
    }

    /// Raw ECDH with a SEC1 encoded peer key
    ///
    /// # Returns
    ///
    /// The x-coordinate of the shared point. PIN protocol one hashes it before use.
    pub fn shared_secret(&self, peer_public_key: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
        let peer = PublicKey::from_sec1_bytes(peer_public_key)
            .map_err(|_| CryptoError::InvalidPublicKey)?;

        let shared = p256::ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), peer.as_affine());

        let mut secret = Zeroizing::new([0u8; 32]);
        secret.copy_from_slice(shared.raw_secret_bytes());
        Ok(secret)
    }

    /// Raw ECDH with a peer key given as COSE coordinates
    pub fn shared_secret_from_coordinates(
        &self,
        x: &[u8],
        y: &[u8],
    ) -> Result<Zeroizing<[u8; 32]>> {
        if x.len() != 32 {
            return Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: x.len(),
            });
        }
        if y.len() != 32 {
            return Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: y.len(),
            });
        }

        let mut point = [0u8; UNCOMPRESSED_POINT_LEN];
        point[0] = 0x04;
        point[1..33].copy_from_slice(x);
        point[33..].copy_from_slice(y);
        self.shared_secret(&point)
    }
}

/// Check that `point` is an uncompressed P-256 point and split it into coordinates
pub fn point_coordinates(point: &[u8]) -> Result<([u8; 32], [u8; 32])> {
    if point.len() != UNCOMPRESSED_POINT_LEN || point[0] != 0x04 {
        return Err(CryptoError::InvalidPublicKey);
    }
    PublicKey::from_sec1_bytes(point).map_err(|_| CryptoError::InvalidPublicKey)?;
    Ok(split_point(point))
}

fn split_point(point: &[u8]) -> ([u8; 32], [u8; 32]) {
    let mut x = [0u8; 32];
    let mut y = [0u8; 32];
    x.copy_from_slice(&point[1..33]);
    y.copy_from_slice(&point[33..65]);
    (x, y)
}
