//! Attestation objects
//!
//! CTAP2 returns `{1: fmt, 2: authData, 3: attStmt}`; WebAuthn exposes the same
//! content under text keys. U2F registrations are converted into the
//! `fido-u2f` format.
//!
//! Spec: <https://www.w3.org/TR/webauthn-2/#sctn-attestation>

use crate::cbor::{CborValue, MapBuilder, MapParser, Result};

pub const FORMAT_NONE: &str = "none";
pub const FORMAT_FIDO_U2F: &str = "fido-u2f";
pub const FORMAT_PACKED: &str = "packed";

mod keys {
    pub const FMT: i64 = 0x01;
    pub const AUTH_DATA: i64 = 0x02;
    pub const ATT_STMT: i64 = 0x03;
}

/// Attestation format, authenticator data and attestation statement
#[derive(Debug, Clone, PartialEq)]
pub struct AttestationObject {
    pub fmt: String,
    pub auth_data: Vec<u8>,
    pub att_stmt: CborValue,
}

impl AttestationObject {
    /// "none" attestation with an empty statement
    pub fn none(auth_data: Vec<u8>) -> Self {
        Self {
            fmt: FORMAT_NONE.to_owned(),
            auth_data,
            att_stmt: CborValue::Map(Vec::new()),
        }
    }

    /// `fido-u2f` attestation: `{sig, x5c: [cert]}`
    pub fn fido_u2f(auth_data: Vec<u8>, certificate: Vec<u8>, signature: Vec<u8>) -> Self {
        let att_stmt = MapBuilder::new()
            .insert("sig", signature)
            .insert("x5c", CborValue::Array(vec![CborValue::Bytes(certificate)]))
            .build();
        Self {
            fmt: FORMAT_FIDO_U2F.to_owned(),
            auth_data,
            att_stmt,
        }
    }

    /// Read the integer-keyed map of a makeCredential response
    pub fn from_ctap2(value: &CborValue) -> Result<Self> {
        let map = MapParser::new(value)?;
        Ok(Self {
            fmt: map.text(keys::FMT)?.to_owned(),
            auth_data: map.bytes(keys::AUTH_DATA)?.to_vec(),
            att_stmt: map.get(keys::ATT_STMT)?.clone(),
        })
    }

    /// Integer-keyed CTAP2 form
    pub fn to_ctap2(&self) -> CborValue {
        MapBuilder::new()
            .insert(keys::FMT, self.fmt.as_str())
            .insert(keys::AUTH_DATA, self.auth_data.clone())
            .insert(keys::ATT_STMT, self.att_stmt.clone())
            .build()
    }

    /// Text-keyed WebAuthn form
    pub fn to_webauthn(&self) -> CborValue {
        MapBuilder::new()
            .insert("fmt", self.fmt.as_str())
            .insert("attStmt", self.att_stmt.clone())
            .insert("authData", self.auth_data.clone())
            .build()
    }

    /// Encoded WebAuthn attestation object
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        crate::cbor::encode(&self.to_webauthn())
    }
}
