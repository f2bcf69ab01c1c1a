//! COSE_Key for EC2 P-256 public keys
//!
//! Used both for credential public keys inside attested credential data and
//! for the PIN protocol key agreement key.
//!
//! Spec: <https://www.rfc-editor.org/rfc/rfc8152#section-13.1.1>

use crate::cbor::{CborError, CborValue, MapBuilder, Result};
use crate::types::CoseAlgorithm;

mod keys {
    pub const KTY: i64 = 1;
    pub const ALG: i64 = 3;
    pub const CRV: i64 = -1;
    pub const X: i64 = -2;
    pub const Y: i64 = -3;
}

const KTY_EC2: u64 = 2;
const CRV_P256: u64 = 1;

/// EC2 public key on P-256
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoseKey {
    pub alg: CoseAlgorithm,
    pub x: [u8; 32],
    pub y: [u8; 32],
}

impl CoseKey {
    pub fn new(alg: CoseAlgorithm, x: [u8; 32], y: [u8; 32]) -> Self {
        Self { alg, x, y }
    }

    /// Build from an uncompressed SEC1 point (`04 || x || y`)
    pub fn from_uncompressed(alg: CoseAlgorithm, point: &[u8]) -> Result<Self> {
        if point.len() != 65 || point[0] != 0x04 {
            return Err(CborError::UnexpectedType {
                field: "public key".into(),
                expected: "uncompressed P-256 point",
            });
        }
        let mut x = [0u8; 32];
        let mut y = [0u8; 32];
        x.copy_from_slice(&point[1..33]);
        y.copy_from_slice(&point[33..]);
        Ok(Self { alg, x, y })
    }

    pub fn to_uncompressed(&self) -> [u8; 65] {
        let mut point = [0u8; 65];
        point[0] = 0x04;
        point[1..33].copy_from_slice(&self.x);
        point[33..].copy_from_slice(&self.y);
        point
    }

    /// `{1: 2, 3: alg, -1: 1, -2: x, -3: y}`
    pub fn to_cbor(&self) -> CborValue {
        MapBuilder::new()
            .insert(keys::KTY, KTY_EC2)
            .insert(keys::ALG, self.alg.to_i32())
            .insert(keys::CRV, CRV_P256)
            .insert(keys::X, self.x.to_vec())
            .insert(keys::Y, self.y.to_vec())
            .build()
    }

    pub fn from_cbor(value: &CborValue) -> Result<Self> {
        let field = |key: i64| {
            value
                .get_int(key)
                .ok_or_else(|| CborError::MissingField(format!("COSE key {key}")))
        };
        let mismatch = |key: i64, expected: &'static str| CborError::UnexpectedType {
            field: format!("COSE key {key}"),
            expected,
        };

        if field(keys::KTY)?.as_u64() != Some(KTY_EC2) {
            return Err(mismatch(keys::KTY, "EC2 key type"));
        }
        if field(keys::CRV)?.as_u64() != Some(CRV_P256) {
            return Err(mismatch(keys::CRV, "P-256 curve"));
        }
        let alg = field(keys::ALG)?
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .and_then(CoseAlgorithm::from_i32)
            .ok_or_else(|| mismatch(keys::ALG, "known COSE algorithm"))?;
        let coordinate = |key: i64| -> Result<[u8; 32]> {
            field(key)?
                .as_bytes()
                .and_then(|b| <[u8; 32]>::try_from(b).ok())
                .ok_or_else(|| mismatch(key, "32-byte coordinate"))
        };

        Ok(Self {
            alg,
            x: coordinate(keys::X)?,
            y: coordinate(keys::Y)?,
        })
    }
}
