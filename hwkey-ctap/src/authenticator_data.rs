//! Authenticator data parsing and serialization
//!
//! Layout:
//! - rpIdHash (32)
//! - flags (1)
//! - signCount (4, big-endian)
//! - attestedCredentialData, when AT is set: aaguid (16) || credIdLen (2) || credId || COSE key
//! - extensions CBOR, when ED is set
//!
//! Spec: <https://www.w3.org/TR/webauthn-2/#sctn-authenticator-data>

use crate::cbor::{self, CborError, Result};

pub mod flags {
    /// User present
    pub const UP: u8 = 0x01;
    /// User verified
    pub const UV: u8 = 0x04;
    /// Attested credential data included
    pub const AT: u8 = 0x40;
    /// Extension data included
    pub const ED: u8 = 0x80;
}

const RP_ID_HASH_LEN: usize = 32;
const HEADER_LEN: usize = RP_ID_HASH_LEN + 1 + 4;
const AAGUID_LEN: usize = 16;

/// Credential data attached to a registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedCredentialData {
    pub aaguid: [u8; AAGUID_LEN],
    pub credential_id: Vec<u8>,
    /// COSE_Key exactly as the authenticator encoded it
    pub credential_public_key: Vec<u8>,
}

/// Parsed authenticator data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; RP_ID_HASH_LEN],
    pub flags: u8,
    pub sign_count: u32,
    pub attested_credential_data: Option<AttestedCredentialData>,
    /// Raw extensions CBOR
    pub extensions: Option<Vec<u8>>,
}

impl AuthenticatorData {
    /// Parse authenticator data bytes
    ///
    /// The COSE key length is not carried on the wire, so the key is measured
    /// by decoding one CBOR item.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(truncated("header"));
        }

        let mut rp_id_hash = [0u8; RP_ID_HASH_LEN];
        rp_id_hash.copy_from_slice(&bytes[..RP_ID_HASH_LEN]);
        let flags = bytes[RP_ID_HASH_LEN];
        let sign_count = u32::from_be_bytes([bytes[33], bytes[34], bytes[35], bytes[36]]);
        let mut rest = &bytes[HEADER_LEN..];

        let attested_credential_data = if flags & flags::AT != 0 {
            if rest.len() < AAGUID_LEN + 2 {
                return Err(truncated("attested credential data"));
            }
            let mut aaguid = [0u8; AAGUID_LEN];
            aaguid.copy_from_slice(&rest[..AAGUID_LEN]);
            let id_len = u16::from_be_bytes([rest[16], rest[17]]) as usize;
            rest = &rest[AAGUID_LEN + 2..];
            if rest.len() < id_len {
                return Err(truncated("credential id"));
            }
            let credential_id = rest[..id_len].to_vec();
            rest = &rest[id_len..];

            let (_, key_len) = cbor::decode_prefix(rest)?;
            let credential_public_key = rest[..key_len].to_vec();
            rest = &rest[key_len..];

            Some(AttestedCredentialData {
                aaguid,
                credential_id,
                credential_public_key,
            })
        } else {
            None
        };

        let extensions = if flags & flags::ED != 0 {
            Some(rest.to_vec())
        } else if !rest.is_empty() {
            return Err(CborError::TrailingBytes(rest.len()));
        } else {
            None
        };

        Ok(Self {
            rp_id_hash,
            flags,
            sign_count,
            attested_credential_data,
            extensions,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN);
        out.extend_from_slice(&self.rp_id_hash);
        out.push(self.flags);
        out.extend_from_slice(&self.sign_count.to_be_bytes());

        if let Some(acd) = &self.attested_credential_data {
            out.extend_from_slice(&acd.aaguid);
            out.extend_from_slice(&(acd.credential_id.len() as u16).to_be_bytes());
            out.extend_from_slice(&acd.credential_id);
            out.extend_from_slice(&acd.credential_public_key);
        }
        if let Some(extensions) = &self.extensions {
            out.extend_from_slice(extensions);
        }
        out
    }

    pub fn user_present(&self) -> bool {
        self.flags & flags::UP != 0
    }

    pub fn user_verified(&self) -> bool {
        self.flags & flags::UV != 0
    }

    pub fn credential_id(&self) -> Option<&[u8]> {
        self.attested_credential_data
            .as_ref()
            .map(|acd| acd.credential_id.as_slice())
    }

    /// Clear the AAGUID, as done when attestation is not conveyed
    pub fn zero_aaguid(&mut self) {
        if let Some(acd) = &mut self.attested_credential_data {
            acd.aaguid = [0u8; AAGUID_LEN];
        }
    }
}

fn truncated(what: &str) -> CborError {
    CborError::Malformed(format!("authenticator data truncated in {what}"))
}
