//! CTAP1/U2F translation of make-credential and get-assertion
//!
//! U2F register and authenticate responses are rewritten into CTAP2
//! authenticator data and handed to the same credential construction as the
//! CTAP2 path.
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#u2f-interoperability>

use hwkey_ctap::authenticator_data::flags;
use hwkey_ctap::{
    AttestationObject, AttestedCredentialData, AuthenticatorData, CoseAlgorithm, CoseKey,
    PublicKeyCredentialDescriptor, StatusCode, UserVerification, cbor,
};
use hwkey_transport::apdu::MAX_EXTENDED_NE;
use hwkey_transport::{CommandApdu, StatusWord, Transport};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::connection::{FidoConnection, SW_WRONG_KEY_HANDLE, fido_status_error};
use crate::credential::{construct_assertion, construct_credential};
use crate::error::{Error, Result};
use crate::webauthn::{GetAssertionCommand, MakeCredentialCommand, PublicKeyCredential};

const INS_REGISTER: u8 = 0x01;
const INS_AUTHENTICATE: u8 = 0x02;

/// P1 of register and authenticate: enforce user presence and sign
const P1_ENFORCE_PRESENCE: u8 = 0x03;

/// P1 of authenticate: only check whether the key handle belongs to the device
const P1_CHECK_ONLY: u8 = 0x07;

/// Reserved first byte of a register response
const REGISTER_ID: u8 = 0x05;

const PUBLIC_KEY_LEN: usize = 65;

/// DER ECDSA signature lengths accepted in a register response
const SIGNATURE_LEN: std::ops::RangeInclusive<usize> = 70..=73;

/// Parsed U2F register response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterResponse {
    pub public_key: Vec<u8>,
    pub key_handle: Vec<u8>,
    pub certificate: Vec<u8>,
    pub signature: Vec<u8>,
}

impl RegisterResponse {
    /// `05 || pubkey(65) || L || key handle || cert || signature`
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (&id, rest) = data
            .split_first()
            .ok_or_else(|| Error::protocol("empty register response"))?;
        if id != REGISTER_ID {
            return Err(Error::protocol(format!("register response starts with {id:02x}")));
        }
        if rest.len() < PUBLIC_KEY_LEN + 1 {
            return Err(Error::protocol("register response truncated in public key"));
        }
        let (public_key, rest) = rest.split_at(PUBLIC_KEY_LEN);
        let (&handle_len, rest) = rest
            .split_first()
            .ok_or_else(|| Error::protocol("register response truncated in key handle"))?;
        let handle_len = usize::from(handle_len);
        if rest.len() < handle_len {
            return Err(Error::protocol("register response truncated in key handle"));
        }
        let (key_handle, rest) = rest.split_at(handle_len);

        let cert_len = der_length(rest)?;
        if rest.len() < cert_len {
            return Err(Error::protocol("register response truncated in certificate"));
        }
        let (certificate, signature) = rest.split_at(cert_len);
        if !SIGNATURE_LEN.contains(&signature.len()) {
            return Err(Error::protocol(format!(
                "register signature has unexpected length {}",
                signature.len()
            )));
        }

        Ok(Self {
            public_key: public_key.to_vec(),
            key_handle: key_handle.to_vec(),
            certificate: certificate.to_vec(),
            signature: signature.to_vec(),
        })
    }
}

/// Total length of the DER SEQUENCE at the start of `data`, header included
fn der_length(data: &[u8]) -> Result<usize> {
    let truncated = || Error::protocol("attestation certificate header truncated");
    if data.first() != Some(&0x30) {
        return Err(Error::protocol("attestation certificate is not a DER sequence"));
    }
    let first = *data.get(1).ok_or_else(truncated)?;
    match first {
        0x00..=0x7F => Ok(2 + usize::from(first)),
        0x81 => Ok(3 + usize::from(*data.get(2).ok_or_else(truncated)?)),
        0x82 => {
            let bytes = data.get(2..4).ok_or_else(truncated)?;
            Ok(4 + usize::from(u16::from_be_bytes([bytes[0], bytes[1]])))
        }
        other => Err(Error::protocol(format!(
            "unsupported DER length form {other:02x}"
        ))),
    }
}

fn rp_id_hash(rp_id: &str) -> [u8; 32] {
    Sha256::digest(rp_id.as_bytes()).into()
}

fn authenticate_apdu(p1: u8, client_data_hash: &[u8; 32], app_id: &[u8; 32], key_handle: &[u8]) -> Result<CommandApdu> {
    let handle_len = u8::try_from(key_handle.len())
        .map_err(|_| Error::protocol("key handle longer than 255 bytes"))?;
    let mut data = Vec::with_capacity(65 + key_handle.len());
    data.extend_from_slice(client_data_hash);
    data.extend_from_slice(app_id);
    data.push(handle_len);
    data.extend_from_slice(key_handle);
    Ok(CommandApdu::new(0x00, INS_AUTHENTICATE, p1, 0x00)
        .with_data(data)
        .with_ne(MAX_EXTENDED_NE))
}

fn reject_user_verification(user_verification: UserVerification) -> Result<()> {
    if user_verification == UserVerification::Required {
        return Err(Error::unsupported("CTAP1 authenticators cannot verify the user"));
    }
    Ok(())
}

/// Fail if the device already holds one of the excluded key handles
fn check_exclude_list<T: Transport>(
    connection: &mut FidoConnection<T>,
    command: &MakeCredentialCommand,
    app_id: &[u8; 32],
) -> Result<()> {
    for descriptor in &command.exclude_list {
        let Ok(apdu) = authenticate_apdu(P1_CHECK_ONLY, &command.client_data_hash, app_id, &descriptor.id) else {
            continue;
        };
        let response = connection.transmit(&apdu)?;
        match response.sw() {
            // The key handle is valid; the device wants a touch to sign
            StatusWord::CONDITIONS_NOT_SATISFIED => {
                debug!("Excluded credential present on the device");
                return Err(Error::Ctap(StatusCode::CredentialExcluded));
            }
            SW_WRONG_KEY_HANDLE => continue,
            other => return Err(fido_status_error(other)),
        }
    }
    Ok(())
}

/// U2F register, returned as a WebAuthn credential
pub fn make_credential<T: Transport>(
    connection: &mut FidoConnection<T>,
    command: &MakeCredentialCommand,
) -> Result<PublicKeyCredential> {
    reject_user_verification(command.user_verification)?;
    let app_id = rp_id_hash(&command.rp.id);
    check_exclude_list(connection, command, &app_id)?;

    let mut data = Vec::with_capacity(64);
    data.extend_from_slice(&command.client_data_hash);
    data.extend_from_slice(&app_id);
    let apdu = CommandApdu::new(0x00, INS_REGISTER, P1_ENFORCE_PRESENCE, 0x00)
        .with_data(data)
        .with_ne(MAX_EXTENDED_NE);

    debug!(rp = %command.rp.id, "Sending U2F register");
    let response = connection.communicate(&apdu)?;
    let register = RegisterResponse::parse(response.data())?;

    let public_key = CoseKey::from_uncompressed(CoseAlgorithm::Es256, &register.public_key)?;
    let auth_data = AuthenticatorData {
        rp_id_hash: app_id,
        flags: flags::UP | flags::AT,
        sign_count: 0,
        attested_credential_data: Some(AttestedCredentialData {
            aaguid: [0u8; 16],
            credential_id: register.key_handle,
            credential_public_key: cbor::encode(&public_key.to_cbor())?,
        }),
        extensions: None,
    };
    let attestation =
        AttestationObject::fido_u2f(auth_data.to_bytes(), register.certificate, register.signature);

    construct_credential(attestation, command.attestation)
}

/// U2F authenticate against each allowed key handle in turn
pub fn get_assertion<T: Transport>(
    connection: &mut FidoConnection<T>,
    command: &GetAssertionCommand,
) -> Result<PublicKeyCredential> {
    reject_user_verification(command.user_verification)?;
    if command.allow_list.is_empty() {
        return Err(Error::unsupported("CTAP1 has no resident keys"));
    }

    let app_id = rp_id_hash(&command.rp_id);
    for descriptor in &command.allow_list {
        let apdu = match authenticate_apdu(P1_ENFORCE_PRESENCE, &command.client_data_hash, &app_id, &descriptor.id) {
            Ok(apdu) => apdu,
            Err(e) => {
                debug!(error = %e, "Skipping key handle");
                continue;
            }
        };

        let response = connection.transmit(&apdu)?;
        if response.sw() == SW_WRONG_KEY_HANDLE {
            debug!("Key handle not recognised, trying the next one");
            continue;
        }
        if !response.is_success() {
            return Err(fido_status_error(response.sw()));
        }

        return assertion(&app_id, descriptor, response.data());
    }

    Err(Error::NoCredentials)
}

/// `UP(1) || counter(4) || signature` into authData and signature
fn assertion(
    app_id: &[u8; 32],
    descriptor: &PublicKeyCredentialDescriptor,
    data: &[u8],
) -> Result<PublicKeyCredential> {
    if data.len() <= 5 {
        return Err(Error::protocol("authenticate response truncated"));
    }
    let (header, signature) = data.split_at(5);

    let mut authenticator_data = Vec::with_capacity(37);
    authenticator_data.extend_from_slice(app_id);
    authenticator_data.extend_from_slice(header);

    construct_assertion(
        std::slice::from_ref(descriptor),
        None,
        authenticator_data,
        signature.to_vec(),
        None,
    )
}
