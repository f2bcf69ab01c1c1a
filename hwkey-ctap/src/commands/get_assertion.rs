//! authenticatorGetAssertion request and response
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#authenticatorGetAssertion>

use crate::cbor::{CborValue, MapBuilder, MapParser};
use crate::commands::{CommandCode, encode_request};
use crate::status::Result;
use crate::types::{PublicKeyCredentialDescriptor, User, descriptor_list};

/// Request keys
mod req_keys {
    pub const RP_ID: i64 = 0x01;
    pub const CLIENT_DATA_HASH: i64 = 0x02;
    pub const ALLOW_LIST: i64 = 0x03;
    pub const PIN_AUTH: i64 = 0x06;
    pub const PIN_PROTOCOL: i64 = 0x07;
}

/// Response keys
mod resp_keys {
    pub const CREDENTIAL: i64 = 0x01;
    pub const AUTH_DATA: i64 = 0x02;
    pub const SIGNATURE: i64 = 0x03;
    pub const USER: i64 = 0x04;
    pub const NUMBER_OF_CREDENTIALS: i64 = 0x05;
}

/// authenticatorGetAssertion parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetAssertionRequest {
    pub rp_id: String,
    pub client_data_hash: [u8; 32],
    pub allow_list: Vec<PublicKeyCredentialDescriptor>,
    pub pin_auth: Option<Vec<u8>>,
    pub pin_protocol: Option<u8>,
}

impl GetAssertionRequest {
    pub fn new(rp_id: impl Into<String>, client_data_hash: [u8; 32]) -> Self {
        Self {
            rp_id: rp_id.into(),
            client_data_hash,
            allow_list: Vec::new(),
            pin_auth: None,
            pin_protocol: None,
        }
    }

    pub fn with_allow_list(mut self, allow_list: Vec<PublicKeyCredentialDescriptor>) -> Self {
        self.allow_list = allow_list;
        self
    }

    pub fn with_pin_auth(mut self, pin_auth: Vec<u8>, pin_protocol: u8) -> Self {
        self.pin_auth = Some(pin_auth);
        self.pin_protocol = Some(pin_protocol);
        self
    }

    pub fn to_cbor(&self) -> CborValue {
        let allow_list = (!self.allow_list.is_empty()).then(|| descriptor_list(&self.allow_list));

        MapBuilder::new()
            .insert(req_keys::RP_ID, self.rp_id.as_str())
            .insert(req_keys::CLIENT_DATA_HASH, self.client_data_hash.to_vec())
            .insert_opt(req_keys::ALLOW_LIST, allow_list)
            .insert_opt(req_keys::PIN_AUTH, self.pin_auth.clone())
            .insert_opt(req_keys::PIN_PROTOCOL, self.pin_protocol)
            .build()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encode_request(CommandCode::GetAssertion, Some(&self.to_cbor()))
    }
}

/// authenticatorGetAssertion response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetAssertionResponse {
    /// May be omitted when the allow list had exactly one entry
    pub credential: Option<PublicKeyCredentialDescriptor>,
    pub auth_data: Vec<u8>,
    pub signature: Vec<u8>,
    pub user: Option<User>,
    pub number_of_credentials: Option<u64>,
}

impl GetAssertionResponse {
    pub fn from_cbor(value: &CborValue) -> Result<Self> {
        let map = MapParser::new(value)?;
        let credential = map
            .get_opt(resp_keys::CREDENTIAL)
            .map(PublicKeyCredentialDescriptor::from_cbor)
            .transpose()?;
        let user = map
            .get_opt(resp_keys::USER)
            .map(User::from_cbor)
            .transpose()?;

        Ok(Self {
            credential,
            auth_data: map.bytes(resp_keys::AUTH_DATA)?.to_vec(),
            signature: map.bytes(resp_keys::SIGNATURE)?.to_vec(),
            user,
            number_of_credentials: map.unsigned_opt(resp_keys::NUMBER_OF_CREDENTIALS)?,
        })
    }

    pub fn to_cbor(&self) -> CborValue {
        MapBuilder::new()
            .insert_opt(
                resp_keys::CREDENTIAL,
                self.credential.as_ref().map(PublicKeyCredentialDescriptor::to_cbor),
            )
            .insert(resp_keys::AUTH_DATA, self.auth_data.clone())
            .insert(resp_keys::SIGNATURE, self.signature.clone())
            .insert_opt(resp_keys::USER, self.user.as_ref().map(User::to_cbor))
            .insert_opt(resp_keys::NUMBER_OF_CREDENTIALS, self.number_of_credentials)
            .build()
    }
}
