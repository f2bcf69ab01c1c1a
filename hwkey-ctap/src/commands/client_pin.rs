//! authenticatorClientPIN request and response
//!
//! Subcommands used by the platform side of PIN protocol one:
//! - getRetries
//! - getKeyAgreement
//! - setPIN
//! - changePIN
//! - getPINToken
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#authenticatorClientPIN>

use crate::cbor::{CborValue, MapBuilder, MapParser};
use crate::commands::{CommandCode, encode_request};
use crate::cose::CoseKey;
use crate::status::Result;

/// ClientPIN subcommand codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Subcommand {
    GetRetries = 0x01,
    GetKeyAgreement = 0x02,
    SetPin = 0x03,
    ChangePin = 0x04,
    GetPinToken = 0x05,
}

impl Subcommand {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::GetRetries),
            0x02 => Some(Self::GetKeyAgreement),
            0x03 => Some(Self::SetPin),
            0x04 => Some(Self::ChangePin),
            0x05 => Some(Self::GetPinToken),
            _ => None,
        }
    }
}

/// Request keys
mod req_keys {
    pub const PIN_PROTOCOL: i64 = 0x01;
    pub const SUBCOMMAND: i64 = 0x02;
    pub const KEY_AGREEMENT: i64 = 0x03;
    pub const PIN_AUTH: i64 = 0x04;
    pub const NEW_PIN_ENC: i64 = 0x05;
    pub const PIN_HASH_ENC: i64 = 0x06;
}

/// Response keys
mod resp_keys {
    pub const KEY_AGREEMENT: i64 = 0x01;
    pub const PIN_TOKEN: i64 = 0x02;
    pub const RETRIES: i64 = 0x03;
}

/// authenticatorClientPIN parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientPinRequest {
    pub pin_protocol: u8,
    pub subcommand: Subcommand,
    pub key_agreement: Option<CoseKey>,
    pub pin_auth: Option<Vec<u8>>,
    pub new_pin_enc: Option<Vec<u8>>,
    pub pin_hash_enc: Option<Vec<u8>>,
}

impl ClientPinRequest {
    fn bare(pin_protocol: u8, subcommand: Subcommand) -> Self {
        Self {
            pin_protocol,
            subcommand,
            key_agreement: None,
            pin_auth: None,
            new_pin_enc: None,
            pin_hash_enc: None,
        }
    }

    pub fn get_retries(pin_protocol: u8) -> Self {
        Self::bare(pin_protocol, Subcommand::GetRetries)
    }

    pub fn get_key_agreement(pin_protocol: u8) -> Self {
        Self::bare(pin_protocol, Subcommand::GetKeyAgreement)
    }

    pub fn set_pin(pin_protocol: u8, key_agreement: CoseKey, new_pin_enc: Vec<u8>, pin_auth: Vec<u8>) -> Self {
        Self {
            key_agreement: Some(key_agreement),
            new_pin_enc: Some(new_pin_enc),
            pin_auth: Some(pin_auth),
            ..Self::bare(pin_protocol, Subcommand::SetPin)
        }
    }

    pub fn change_pin(
        pin_protocol: u8,
        key_agreement: CoseKey,
        new_pin_enc: Vec<u8>,
        pin_hash_enc: Vec<u8>,
        pin_auth: Vec<u8>,
    ) -> Self {
        Self {
            key_agreement: Some(key_agreement),
            new_pin_enc: Some(new_pin_enc),
            pin_hash_enc: Some(pin_hash_enc),
            pin_auth: Some(pin_auth),
            ..Self::bare(pin_protocol, Subcommand::ChangePin)
        }
    }

    pub fn get_pin_token(pin_protocol: u8, key_agreement: CoseKey, pin_hash_enc: Vec<u8>) -> Self {
        Self {
            key_agreement: Some(key_agreement),
            pin_hash_enc: Some(pin_hash_enc),
            ..Self::bare(pin_protocol, Subcommand::GetPinToken)
        }
    }

    pub fn to_cbor(&self) -> CborValue {
        MapBuilder::new()
            .insert(req_keys::PIN_PROTOCOL, self.pin_protocol)
            .insert(req_keys::SUBCOMMAND, self.subcommand as u8)
            .insert_opt(req_keys::KEY_AGREEMENT, self.key_agreement.as_ref().map(CoseKey::to_cbor))
            .insert_opt(req_keys::PIN_AUTH, self.pin_auth.clone())
            .insert_opt(req_keys::NEW_PIN_ENC, self.new_pin_enc.clone())
            .insert_opt(req_keys::PIN_HASH_ENC, self.pin_hash_enc.clone())
            .build()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encode_request(CommandCode::ClientPin, Some(&self.to_cbor()))
    }
}

/// authenticatorClientPIN response; which fields are present depends on the subcommand
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientPinResponse {
    pub key_agreement: Option<CoseKey>,
    /// Encrypted PIN token
    pub pin_token: Option<Vec<u8>>,
    pub retries: Option<u64>,
}

impl ClientPinResponse {
    /// An absent body reads as an empty response (setPIN, changePIN)
    pub fn from_cbor(value: Option<&CborValue>) -> Result<Self> {
        let Some(value) = value else {
            return Ok(Self::default());
        };
        let map = MapParser::new(value)?;

        Ok(Self {
            key_agreement: map
                .get_opt(resp_keys::KEY_AGREEMENT)
                .map(CoseKey::from_cbor)
                .transpose()?,
            pin_token: map.bytes_opt(resp_keys::PIN_TOKEN)?.map(<[u8]>::to_vec),
            retries: map.unsigned_opt(resp_keys::RETRIES)?,
        })
    }

    pub fn to_cbor(&self) -> CborValue {
        MapBuilder::new()
            .insert_opt(resp_keys::KEY_AGREEMENT, self.key_agreement.as_ref().map(CoseKey::to_cbor))
            .insert_opt(resp_keys::PIN_TOKEN, self.pin_token.clone())
            .insert_opt(resp_keys::RETRIES, self.retries)
            .build()
    }
}
