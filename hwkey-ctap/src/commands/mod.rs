//! CTAP2 request and response messages
//!
//! A request on the wire is the command byte followed by an optional CBOR map.
//! A response is a status byte followed by an optional CBOR map.
//!
//! See FIDO2 spec section 5 for command definitions:
//! <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#authenticator-api>

pub mod client_pin;
pub mod get_assertion;
pub mod get_info;
pub mod make_credential;

use crate::cbor::{self, CborValue};
use crate::status::{Error, Result, StatusCode};

/// CTAP command codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandCode {
    MakeCredential = 0x01,
    GetAssertion = 0x02,
    GetInfo = 0x04,
    ClientPin = 0x06,
    Reset = 0x07,
    GetNextAssertion = 0x08,
}

impl CommandCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::MakeCredential),
            0x02 => Some(Self::GetAssertion),
            0x04 => Some(Self::GetInfo),
            0x06 => Some(Self::ClientPin),
            0x07 => Some(Self::Reset),
            0x08 => Some(Self::GetNextAssertion),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Serialize `command || cbor(params)`
pub fn encode_request(command: CommandCode, params: Option<&CborValue>) -> Result<Vec<u8>> {
    let mut out = vec![command.to_u8()];
    if let Some(params) = params {
        out.extend_from_slice(&cbor::encode(params)?);
    }
    Ok(out)
}

/// Check the status byte and decode the CBOR body, if any
///
/// # Errors
///
/// `Error::Status` for a non-zero status, `Error::InvalidResponse` for an
/// empty response, CBOR errors for a malformed body.
pub fn parse_response(data: &[u8]) -> Result<Option<CborValue>> {
    let (&status, body) = data
        .split_first()
        .ok_or_else(|| Error::InvalidResponse("empty CTAP2 response".into()))?;
    StatusCode::check(status)?;

    if body.is_empty() {
        return Ok(None);
    }
    Ok(Some(cbor::decode(body)?))
}

/// Like [`parse_response`], for commands whose success always carries a map
pub fn parse_response_map(data: &[u8]) -> Result<CborValue> {
    parse_response(data)?.ok_or_else(|| Error::InvalidResponse("missing response body".into()))
}

/// Serialize a successful response, as an authenticator would
pub fn encode_response(body: Option<&CborValue>) -> Result<Vec<u8>> {
    let mut out = vec![StatusCode::Success.to_u8()];
    if let Some(body) = body {
        out.extend_from_slice(&cbor::encode(body)?);
    }
    Ok(out)
}
