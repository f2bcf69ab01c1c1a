//! CTAP2 operations over a [`FidoConnection`]
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#authenticator-api>

use hwkey_crypto::pin_protocol::v1;
use hwkey_ctap::commands::encode_request;
use hwkey_ctap::{
    AttestationObject, AuthenticatorInfo, CborValue, CommandCode, GetAssertionRequest,
    GetAssertionResponse, MakeCredentialRequest, StatusCode, UserVerification,
};
use hwkey_transport::Transport;
use tracing::debug;

use crate::connection::FidoConnection;
use crate::credential::{construct_assertion, construct_credential};
use crate::error::{Error, Result};
use crate::pin::{Pin, PinProtocolOne};
use crate::webauthn::{GetAssertionCommand, MakeCredentialCommand, PublicKeyCredential};

/// Read the authenticator's capabilities
pub fn get_info<T: Transport>(connection: &mut FidoConnection<T>) -> Result<AuthenticatorInfo> {
    let body = connection.ctap2_request_map(encode_request(CommandCode::GetInfo, None)?)?;
    Ok(AuthenticatorInfo::from_cbor(&body)?)
}

/// Compute `pinAuth` for a privileged command, obtaining a PIN token first if
/// needed
///
/// Returns `None` when the command goes out without PIN authentication.
fn pin_auth<T: Transport>(
    connection: &mut FidoConnection<T>,
    user_verification: UserVerification,
    pin: Option<&Pin>,
    last_attempt_ok: bool,
    client_data_hash: &[u8; 32],
) -> Result<Option<Vec<u8>>> {
    if user_verification == UserVerification::Discouraged {
        return Ok(None);
    }

    if let Some(token) = connection.pin_token() {
        debug!("Using cached PIN token");
        return Ok(Some(token.authenticate(client_data_hash)?.to_vec()));
    }

    let (supported, set) = connection
        .info()
        .map(|info| (info.supports_client_pin(), info.is_pin_set()))
        .unwrap_or_default();

    if user_verification == UserVerification::Required {
        if !supported {
            return Err(Error::unsupported("user verification requires clientPin"));
        }
        if !set {
            return Err(Error::PinNotSet);
        }
        if pin.is_none() {
            return Err(Error::PinRequired);
        }
    }

    let Some(pin) = pin.filter(|_| supported && set) else {
        return Ok(None);
    };

    let token = PinProtocolOne::new().get_pin_token(connection, pin, last_attempt_ok)?;
    let auth = token.authenticate(client_data_hash)?.to_vec();
    connection.cache_pin_token(token);
    Ok(Some(auth))
}

/// Whether a failed privileged command ended the PIN token's session
fn ends_pin_session(err: &Error) -> bool {
    matches!(
        err,
        Error::Ctap(StatusCode::PinAuthInvalid)
            | Error::SecurityStatus { .. }
            | Error::Blocked
            | Error::PinRequired
            | Error::Cancelled
    )
}

/// Send a command that may carry `pinAuth`, dropping the cached token when the
/// device rejects it so the next call asks for a fresh one
fn privileged_request<T: Transport>(
    connection: &mut FidoConnection<T>,
    request: Vec<u8>,
) -> Result<CborValue> {
    let result = connection.ctap2_request_map(request);
    if let Err(err) = &result {
        if ends_pin_session(err) && connection.pin_token().is_some() {
            debug!(error = %err, "Dropping cached PIN token");
            connection.clear_pin_token();
        }
    }
    result
}

/// authenticatorMakeCredential
pub fn make_credential<T: Transport>(
    connection: &mut FidoConnection<T>,
    command: &MakeCredentialCommand,
) -> Result<PublicKeyCredential> {
    let pin_auth = pin_auth(
        connection,
        command.user_verification,
        command.pin.as_ref(),
        command.last_attempt_ok,
        &command.client_data_hash,
    )?;

    let mut request = MakeCredentialRequest::new(
        command.client_data_hash,
        command.rp.clone(),
        command.user.clone(),
        command.pub_key_cred_params.clone(),
    );
    request.exclude_list = command.exclude_list.clone();
    request.rk = command.resident_key.then_some(true);
    if let Some(pin_auth) = pin_auth {
        request = request.with_pin_auth(pin_auth, v1::PROTOCOL_VERSION);
    }

    debug!(rp = %command.rp.id, "Sending authenticatorMakeCredential");
    let body = privileged_request(connection, request.to_bytes()?)?;
    let attestation = AttestationObject::from_ctap2(&body)?;
    debug!(fmt = %attestation.fmt, "Credential created");

    construct_credential(attestation, command.attestation)
}

/// authenticatorGetAssertion
pub fn get_assertion<T: Transport>(
    connection: &mut FidoConnection<T>,
    command: &GetAssertionCommand,
) -> Result<PublicKeyCredential> {
    if command.allow_list.is_empty() {
        let rk = connection.info().and_then(|info| info.options.rk).unwrap_or(false);
        if !rk {
            return Err(Error::unsupported("authenticator does not support resident keys"));
        }
    }

    let pin_auth = pin_auth(
        connection,
        command.user_verification,
        command.pin.as_ref(),
        command.last_attempt_ok,
        &command.client_data_hash,
    )?;

    let mut request = GetAssertionRequest::new(command.rp_id.as_str(), command.client_data_hash)
        .with_allow_list(command.allow_list.clone());
    if let Some(pin_auth) = pin_auth {
        request = request.with_pin_auth(pin_auth, v1::PROTOCOL_VERSION);
    }

    debug!(rp = %command.rp_id, allowed = command.allow_list.len(), "Sending authenticatorGetAssertion");
    let body = privileged_request(connection, request.to_bytes()?)?;
    let response = GetAssertionResponse::from_cbor(&body)?;
    if let Some(count) = response.number_of_credentials.filter(|&n| n > 1) {
        debug!(count, "Authenticator has more credentials, using the first");
    }

    construct_assertion(
        &command.allow_list,
        response.credential.as_ref(),
        response.auth_data,
        response.signature,
        response.user.map(|user| user.id),
    )
}
