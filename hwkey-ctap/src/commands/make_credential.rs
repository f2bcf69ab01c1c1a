//! authenticatorMakeCredential request and response
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#authenticatorMakeCredential>

use crate::attestation::AttestationObject;
use crate::cbor::{CborValue, MapBuilder};
use crate::commands::{CommandCode, encode_request};
use crate::status::Result;
use crate::types::{
    PublicKeyCredentialDescriptor, PublicKeyCredentialParameters, RelyingParty, User,
    descriptor_list,
};

/// Request keys
mod keys {
    pub const CLIENT_DATA_HASH: i64 = 0x01;
    pub const RP: i64 = 0x02;
    pub const USER: i64 = 0x03;
    pub const PUB_KEY_CRED_PARAMS: i64 = 0x04;
    pub const EXCLUDE_LIST: i64 = 0x05;
    pub const OPTIONS: i64 = 0x07;
    pub const PIN_AUTH: i64 = 0x08;
    pub const PIN_PROTOCOL: i64 = 0x09;
}

/// authenticatorMakeCredential parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MakeCredentialRequest {
    pub client_data_hash: [u8; 32],
    pub rp: RelyingParty,
    pub user: User,
    pub pub_key_cred_params: Vec<PublicKeyCredentialParameters>,
    pub exclude_list: Vec<PublicKeyCredentialDescriptor>,
    /// Resident key option, omitted when `None`
    pub rk: Option<bool>,
    pub pin_auth: Option<Vec<u8>>,
    pub pin_protocol: Option<u8>,
}

impl MakeCredentialRequest {
    pub fn new(
        client_data_hash: [u8; 32],
        rp: RelyingParty,
        user: User,
        pub_key_cred_params: Vec<PublicKeyCredentialParameters>,
    ) -> Self {
        Self {
            client_data_hash,
            rp,
            user,
            pub_key_cred_params,
            exclude_list: Vec::new(),
            rk: None,
            pin_auth: None,
            pin_protocol: None,
        }
    }

    /// Attach `pinAuth` and `pinProtocol`
    pub fn with_pin_auth(mut self, pin_auth: Vec<u8>, pin_protocol: u8) -> Self {
        self.pin_auth = Some(pin_auth);
        self.pin_protocol = Some(pin_protocol);
        self
    }

    pub fn to_cbor(&self) -> CborValue {
        let params = CborValue::Array(
            self.pub_key_cred_params
                .iter()
                .map(PublicKeyCredentialParameters::to_cbor)
                .collect(),
        );
        let exclude_list =
            (!self.exclude_list.is_empty()).then(|| descriptor_list(&self.exclude_list));
        let options = self
            .rk
            .map(|rk| MapBuilder::new().insert("rk", rk).build());

        MapBuilder::new()
            .insert(keys::CLIENT_DATA_HASH, self.client_data_hash.to_vec())
            .insert(keys::RP, self.rp.to_cbor())
            .insert(keys::USER, self.user.to_cbor())
            .insert(keys::PUB_KEY_CRED_PARAMS, params)
            .insert_opt(keys::EXCLUDE_LIST, exclude_list)
            .insert_opt(keys::OPTIONS, options)
            .insert_opt(keys::PIN_AUTH, self.pin_auth.clone())
            .insert_opt(keys::PIN_PROTOCOL, self.pin_protocol)
            .build()
    }

    /// Command byte followed by the CBOR parameters
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encode_request(CommandCode::MakeCredential, Some(&self.to_cbor()))
    }
}

/// The response is the attestation object in CTAP2 form
pub type MakeCredentialResponse = AttestationObject;
