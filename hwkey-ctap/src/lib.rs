//! CTAP2 message layer for talking to FIDO2 authenticators
//!
//! This crate holds the client side of the CTAP 2.0 protocol:
//! - a CBOR value model with canonical encoding
//! - request builders and response parsers for makeCredential, getAssertion,
//!   getInfo and clientPin
//! - authenticator data, COSE keys and attestation objects
//! - the decrypted PIN token used to compute `pinAuth`
//!
//! Implements the FIDO2 specification:
//! <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html>

pub mod attestation;
pub mod authenticator_data;
pub mod cbor;
pub mod commands;
pub mod cose;
pub mod pin_token;
pub mod sec_bytes;
pub mod status;
pub mod types;

pub use attestation::AttestationObject;
pub use authenticator_data::{AttestedCredentialData, AuthenticatorData};
pub use cbor::{CborError, CborValue, MapBuilder, MapParser};
pub use commands::client_pin::{ClientPinRequest, ClientPinResponse, Subcommand};
pub use commands::get_assertion::{GetAssertionRequest, GetAssertionResponse};
pub use commands::get_info::{AuthenticatorInfo, InfoOptions};
pub use commands::make_credential::{MakeCredentialRequest, MakeCredentialResponse};
pub use commands::{CommandCode, parse_response, parse_response_map};
pub use cose::CoseKey;
pub use pin_token::PinToken;
pub use sec_bytes::SecBytes;
pub use status::{Error, Result, StatusCode};
pub use types::{
    AttestationConveyance, CoseAlgorithm, PublicKeyCredentialDescriptor,
    PublicKeyCredentialParameters, RelyingParty, User, UserVerification,
};
