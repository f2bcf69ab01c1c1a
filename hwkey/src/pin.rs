//! CTAP2 client PIN, platform side
//!
//! Provides PIN protocol one over a [`FidoConnection`]: reading the retry
//! counter, obtaining a PIN token, setting and changing the PIN.
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#authenticatorClientPIN>

use std::fmt;

use hwkey_crypto::ecdh::KeyPair;
use hwkey_crypto::pin_protocol::v1;
use hwkey_ctap::{ClientPinRequest, ClientPinResponse, CoseAlgorithm, CoseKey, PinToken, StatusCode};
use hwkey_transport::Transport;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::connection::FidoConnection;
use crate::error::{Error, Result};

/// Minimum PIN length in Unicode characters
pub const MIN_PIN_CHARS: usize = 4;

/// Maximum PIN length in UTF-8 bytes
pub const MAX_PIN_BYTES: usize = 63;

/// A user PIN, wiped from memory on drop
#[derive(Clone)]
pub struct Pin(Zeroizing<String>);

impl Pin {
    pub fn new(pin: impl Into<String>) -> Self {
        Self(Zeroizing::new(pin.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pin(<redacted>)")
    }
}

impl From<&str> for Pin {
    fn from(pin: &str) -> Self {
        Self::new(pin)
    }
}

/// Check a new PIN against the CTAP2 length policy
pub fn check_pin_policy(pin: &str) -> Result<()> {
    if pin.chars().count() < MIN_PIN_CHARS {
        return Err(Error::PinTooShort);
    }
    if pin.len() > MAX_PIN_BYTES {
        return Err(Error::PinTooLong);
    }
    Ok(())
}

/// PIN protocol one
///
/// Every operation runs a fresh key agreement. The platform key is
/// ephemeral unless a fixed secret is configured.
#[derive(Default)]
pub struct PinProtocolOne {
    platform_secret: Option<Zeroizing<[u8; 32]>>,
}

/// Result of a key agreement: the platform key to send and the session key
struct Agreement {
    platform_key: CoseKey,
    shared_secret: Zeroizing<[u8; 32]>,
}

impl PinProtocolOne {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a fixed platform key instead of a fresh one per agreement
    pub fn with_platform_secret(secret: [u8; 32]) -> Self {
        Self {
            platform_secret: Some(Zeroizing::new(secret)),
        }
    }

    fn platform_key(&self) -> Result<KeyPair> {
        match &self.platform_secret {
            Some(secret) => Ok(KeyPair::from_bytes(secret)?),
            None => Ok(KeyPair::generate()),
        }
    }

    fn client_pin<T: Transport>(
        connection: &mut FidoConnection<T>,
        request: &ClientPinRequest,
    ) -> Result<ClientPinResponse> {
        let body = connection.ctap2_request(request.to_bytes()?)?;
        Ok(ClientPinResponse::from_cbor(body.as_ref())?)
    }

    fn key_agreement<T: Transport>(&self, connection: &mut FidoConnection<T>) -> Result<Agreement> {
        let response = Self::client_pin(
            connection,
            &ClientPinRequest::get_key_agreement(v1::PROTOCOL_VERSION),
        )?;
        let device_key = response
            .key_agreement
            .ok_or_else(|| Error::protocol("getKeyAgreement response without key"))?;

        let platform = self.platform_key()?;
        let ecdh_x = platform.shared_secret_from_coordinates(&device_key.x, &device_key.y)?;
        let (x, y) = platform.public_key_cose();

        Ok(Agreement {
            platform_key: CoseKey::new(CoseAlgorithm::EcdhEsHkdf256, x, y),
            shared_secret: v1::shared_secret(&ecdh_x),
        })
    }

    /// Remaining PIN attempts
    pub fn get_retries<T: Transport>(&self, connection: &mut FidoConnection<T>) -> Result<u8> {
        let response = Self::client_pin(
            connection,
            &ClientPinRequest::get_retries(v1::PROTOCOL_VERSION),
        )?;
        let retries = response
            .retries
            .ok_or_else(|| Error::protocol("getRetries response without retries"))?;
        debug!(retries, "PIN retries");
        Ok(u8::try_from(retries).unwrap_or(u8::MAX))
    }

    /// Check the retry counter before spending an attempt
    fn check_retries<T: Transport>(
        &self,
        connection: &mut FidoConnection<T>,
        last_attempt_ok: bool,
    ) -> Result<u8> {
        let retries = self.get_retries(connection)?;
        match retries {
            0 => Err(Error::Blocked),
            1 if !last_attempt_ok => {
                warn!("One PIN attempt left, refusing to use it");
                Err(Error::LastAttempt)
            }
            n => Ok(n),
        }
    }

    /// Exchange the PIN for a PIN token
    ///
    /// With one attempt left the PIN is only tried when `last_attempt_ok`.
    pub fn get_pin_token<T: Transport>(
        &self,
        connection: &mut FidoConnection<T>,
        pin: &Pin,
        last_attempt_ok: bool,
    ) -> Result<PinToken> {
        debug!("Authenticating with PIN");
        let retries = self.check_retries(connection, last_attempt_ok)?;
        let agreement = self.key_agreement(connection)?;

        let pin_hash_enc = v1::pin_hash_enc(&agreement.shared_secret, pin.as_str())?;
        let request = ClientPinRequest::get_pin_token(
            v1::PROTOCOL_VERSION,
            agreement.platform_key,
            pin_hash_enc,
        );
        let response =
            Self::client_pin(connection, &request).map_err(|e| wrong_pin_error(e, retries))?;
        let encrypted = response
            .pin_token
            .ok_or_else(|| Error::protocol("getPINToken response without token"))?;

        let token = PinToken::decrypt(&agreement.shared_secret, &encrypted)?;
        debug!("PIN accepted");
        Ok(token)
    }

    /// Set the first PIN of a device that has none
    pub fn set_pin<T: Transport>(&self, connection: &mut FidoConnection<T>, new_pin: &Pin) -> Result<()> {
        check_pin_policy(new_pin.as_str())?;
        let agreement = self.key_agreement(connection)?;

        let new_pin_enc = v1::new_pin_enc(&agreement.shared_secret, new_pin.as_str())?;
        let pin_auth = v1::authenticate(agreement.shared_secret.as_slice(), &new_pin_enc)?;
        let request = ClientPinRequest::set_pin(
            v1::PROTOCOL_VERSION,
            agreement.platform_key,
            new_pin_enc,
            pin_auth.to_vec(),
        );
        Self::client_pin(connection, &request)?;
        debug!("PIN set");
        Ok(())
    }

    /// Replace the current PIN
    ///
    /// A cached PIN token is dropped since the device invalidates it.
    pub fn change_pin<T: Transport>(
        &self,
        connection: &mut FidoConnection<T>,
        current_pin: &Pin,
        new_pin: &Pin,
        last_attempt_ok: bool,
    ) -> Result<()> {
        check_pin_policy(new_pin.as_str())?;
        let retries = self.check_retries(connection, last_attempt_ok)?;
        let agreement = self.key_agreement(connection)?;

        let new_pin_enc = v1::new_pin_enc(&agreement.shared_secret, new_pin.as_str())?;
        let pin_hash_enc = v1::pin_hash_enc(&agreement.shared_secret, current_pin.as_str())?;
        let mut auth_data = Zeroizing::new(Vec::with_capacity(new_pin_enc.len() + pin_hash_enc.len()));
        auth_data.extend_from_slice(&new_pin_enc);
        auth_data.extend_from_slice(&pin_hash_enc);
        let pin_auth = v1::authenticate(agreement.shared_secret.as_slice(), &auth_data)?;

        let request = ClientPinRequest::change_pin(
            v1::PROTOCOL_VERSION,
            agreement.platform_key,
            new_pin_enc,
            pin_hash_enc,
            pin_auth.to_vec(),
        );
        connection.clear_pin_token();
        Self::client_pin(connection, &request).map_err(|e| wrong_pin_error(e, retries))?;
        debug!("PIN changed");
        Ok(())
    }
}

/// Refine a failed PIN submission with the retry counter read before it
fn wrong_pin_error(error: Error, retries_before: u8) -> Error {
    match error {
        Error::SecurityStatus { retries: None } => match retries_before.saturating_sub(1) {
            0 => Error::Blocked,
            left => Error::SecurityStatus { retries: Some(left) },
        },
        Error::Ctap(StatusCode::PinPolicyViolation) => Error::PinTooShort,
        other => other,
    }
}
