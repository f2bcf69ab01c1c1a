//! authenticatorGetInfo response
//!
//! Reports:
//! - Supported versions
//! - Extensions
//! - AAGUID
//! - Options (plat, rk, clientPin, up, uv)
//! - Maximum message size and PIN protocols
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#authenticatorGetInfo>

use crate::cbor::{CborError, CborValue, MapBuilder, MapParser};
use crate::status::Result;

/// GetInfo response keys
mod keys {
    pub const VERSIONS: i64 = 0x01;
    pub const EXTENSIONS: i64 = 0x02;
    pub const AAGUID: i64 = 0x03;
    pub const OPTIONS: i64 = 0x04;
    pub const MAX_MSG_SIZE: i64 = 0x05;
    pub const PIN_PROTOCOLS: i64 = 0x06;
}

pub const VERSION_FIDO_2_0: &str = "FIDO_2_0";
pub const VERSION_U2F_V2: &str = "U2F_V2";

/// Authenticator options reported by getInfo
///
/// `None` means the authenticator did not list the option.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoOptions {
    pub plat: Option<bool>,
    pub rk: Option<bool>,
    /// `Some(true)` PIN set, `Some(false)` supported but not set, `None` unsupported
    pub client_pin: Option<bool>,
    pub up: Option<bool>,
    pub uv: Option<bool>,
}

/// Parsed getInfo response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthenticatorInfo {
    pub versions: Vec<String>,
    pub extensions: Vec<String>,
    pub aaguid: [u8; 16],
    pub options: InfoOptions,
    pub max_msg_size: Option<u64>,
    pub pin_protocols: Vec<u64>,
}

impl AuthenticatorInfo {
    pub fn from_cbor(value: &CborValue) -> Result<Self> {
        let map = MapParser::new(value)?;

        let versions = text_list(map.get(keys::VERSIONS)?);
        let extensions = map.get_opt(keys::EXTENSIONS).map(text_list).unwrap_or_default();
        let aaguid = <[u8; 16]>::try_from(map.bytes(keys::AAGUID)?).map_err(|_| {
            CborError::UnexpectedType {
                field: keys::AAGUID.to_string(),
                expected: "16-byte AAGUID",
            }
        })?;

        let options = match map.get_opt(keys::OPTIONS) {
            Some(opts) => {
                let flag = |name: &str| opts.get_text(name).and_then(CborValue::as_bool);
                InfoOptions {
                    plat: flag("plat"),
                    rk: flag("rk"),
                    client_pin: flag("clientPin"),
                    up: flag("up"),
                    uv: flag("uv"),
                }
            }
            None => InfoOptions::default(),
        };

        let pin_protocols = map
            .array_opt(keys::PIN_PROTOCOLS)?
            .map(|items| items.iter().filter_map(CborValue::as_u64).collect())
            .unwrap_or_default();

        Ok(Self {
            versions,
            extensions,
            aaguid,
            options,
            max_msg_size: map.unsigned_opt(keys::MAX_MSG_SIZE)?,
            pin_protocols,
        })
    }

    pub fn to_cbor(&self) -> CborValue {
        let list = |items: &[String]| {
            CborValue::Array(items.iter().map(|s| CborValue::from(s.as_str())).collect())
        };
        let options = MapBuilder::new()
            .insert_opt("plat", self.options.plat)
            .insert_opt("rk", self.options.rk)
            .insert_opt("clientPin", self.options.client_pin)
            .insert_opt("up", self.options.up)
            .insert_opt("uv", self.options.uv);
        let options = (!options.is_empty()).then(|| options.build());
        let pin_protocols = (!self.pin_protocols.is_empty()).then(|| {
            CborValue::Array(self.pin_protocols.iter().map(|&p| CborValue::from(p)).collect())
        });

        MapBuilder::new()
            .insert(keys::VERSIONS, list(&self.versions))
            .insert_opt(
                keys::EXTENSIONS,
                (!self.extensions.is_empty()).then(|| list(&self.extensions)),
            )
            .insert(keys::AAGUID, self.aaguid.to_vec())
            .insert_opt(keys::OPTIONS, options)
            .insert_opt(keys::MAX_MSG_SIZE, self.max_msg_size)
            .insert_opt(keys::PIN_PROTOCOLS, pin_protocols)
            .build()
    }

    /// True if the authenticator implements clientPin
    pub fn supports_client_pin(&self) -> bool {
        self.options.client_pin.is_some()
    }

    /// True if a PIN has been set
    pub fn is_pin_set(&self) -> bool {
        self.options.client_pin == Some(true)
    }

    pub fn supports_pin_protocol(&self, version: u8) -> bool {
        self.pin_protocols.contains(&u64::from(version))
    }

    pub fn supports_version(&self, version: &str) -> bool {
        self.versions.iter().any(|v| v == version)
    }
}

fn text_list(value: &CborValue) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(CborValue::as_text)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}
