//! Connection to the FIDO applet of a security key
//!
//! Selecting the applet, probing for CTAP2 and carrying CTAP2 messages inside
//! APDUs happens here; the operations in [`crate::ctap1`] and
//! [`crate::ctap2`] build on it.
//!
//! References:
//! - FIDO U2F NFC protocol, applet selection: <https://fidoalliance.org/specs/fido-u2f-v1.2-ps-20170411/fido-u2f-nfc-protocol-v1.2-ps-20170411.html>
//! - CTAP2 NFC framing: <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#nfc-framing>

use hwkey_ctap::commands::encode_request;
use hwkey_ctap::{AuthenticatorInfo, CborValue, CommandCode, PinToken, parse_response};
use hwkey_transport::apdu::MAX_EXTENDED_NE;
use hwkey_transport::transport::{CTAP2_CLA, CTAP2_INS};
use hwkey_transport::{CommandApdu, ResponseApdu, StatusWord, Transport};
use tracing::{debug, warn};

use crate::config::ConnectionConfig;
use crate::diagnostics::{self, SharedDiagnostics};
use crate::error::{Error, Result};
use crate::exchange;

/// FIDO applet AIDs, tried in order
pub const FIDO_AIDS: [&[u8]; 3] = [
    // FIDO U2F NFC protocol
    &[0xA0, 0x00, 0x00, 0x06, 0x47, 0x2F, 0x00, 0x01],
    // Same AID with a trailing byte, required by some older firmware
    &[0xA0, 0x00, 0x00, 0x06, 0x47, 0x2F, 0x00, 0x01, 0x00],
    // Yubico demo applet
    &[0xA0, 0x00, 0x00, 0x05, 0x27, 0x10, 0x02],
];

/// Version string of U2F capable applets
pub const VERSION_U2F_V2: &str = "U2F_V2";

/// Version string of FIDO2-only applets
pub const VERSION_FIDO_2_0: &str = "FIDO_2_0";

/// U2F VERSION instruction, used instead of SELECT over USB HID
const INS_U2F_VERSION: u8 = 0x03;

/// Status word a U2F applet returns for an unknown key handle
pub const SW_WRONG_KEY_HANDLE: StatusWord = StatusWord::WRONG_DATA;

/// Connection to a FIDO applet
pub struct FidoConnection<T> {
    transport: T,
    config: ConnectionConfig,
    diagnostics: SharedDiagnostics,
    connected: bool,
    version: Option<String>,
    info: Option<AuthenticatorInfo>,
    pin_token: Option<PinToken>,
}

impl<T: Transport> FidoConnection<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, ConnectionConfig::default())
    }

    pub fn with_config(transport: T, config: ConnectionConfig) -> Self {
        Self {
            transport,
            config,
            diagnostics: diagnostics::noop(),
            connected: false,
            version: None,
            info: None,
            pin_token: None,
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: SharedDiagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Select the applet and probe for CTAP2, unless already done
    ///
    /// On failure the transport is released.
    pub fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        if !self.transport.is_connected() {
            self.transport.connect()?;
        }

        match self.connect_to_applet() {
            Ok(()) => {
                self.connected = true;
                Ok(())
            }
            Err(e) => {
                self.release();
                Err(e)
            }
        }
    }

    fn connect_to_applet(&mut self) -> Result<()> {
        let version = if self.config.select_applet {
            self.select_applet()?
        } else {
            debug!("Reading U2F version instead of selecting an applet");
            let command = CommandApdu::new(0x00, INS_U2F_VERSION, 0x00, 0x00).with_ne(256);
            let response = self.communicate(&command)?;
            check_version(response.data())?
        };
        self.diagnostics.set_tag("fido_version", &version);
        self.version = Some(version);

        self.info = None;
        if self.config.force_ctap1 {
            debug!("CTAP1 forced by configuration");
            return Ok(());
        }

        match self.ctap2_request(encode_request(CommandCode::GetInfo, None)?) {
            Ok(Some(body)) => {
                let info = AuthenticatorInfo::from_cbor(&body)?;
                debug!(versions = ?info.versions, options = ?info.options, "Authenticator supports CTAP2");
                self.diagnostics.breadcrumb("authenticatorGetInfo succeeded, using CTAP2");
                self.info = Some(info);
            }
            Ok(None) => {
                warn!("Empty authenticatorGetInfo response, using CTAP1");
            }
            Err(e) if e.is_disconnect() => return Err(e),
            Err(e) => {
                debug!(error = %e, "No valid authenticatorGetInfo response, using CTAP1");
            }
        }
        Ok(())
    }

    fn select_applet(&mut self) -> Result<String> {
        for aid in FIDO_AIDS {
            let response = self.transmit(&CommandApdu::select(aid))?;
            if response.sw() == StatusWord::FILE_NOT_FOUND {
                debug!(aid = %hex::encode(aid), "FIDO applet not found under AID");
                continue;
            }
            if !response.is_success() {
                return Err(fido_status_error(response.sw()));
            }

            let version = check_version(response.data())?;
            debug!(aid = %hex::encode(aid), version = %version, "Selected FIDO applet");
            self.diagnostics.breadcrumb("selected FIDO applet");
            return Ok(version);
        }

        Err(Error::unsupported("no FIDO U2F or CTAP2 applet on the device"))
    }

    pub fn is_connected(&self) -> bool {
        self.connected && self.transport.is_connected()
    }

    /// Whether CTAP2 is in use for this connection
    pub fn is_ctap2_capable(&self) -> bool {
        self.info.is_some()
    }

    /// getInfo result, when CTAP2 is in use
    pub fn info(&self) -> Option<&AuthenticatorInfo> {
        self.info.as_ref()
    }

    /// Version string reported at selection
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Drop the session: cached PIN token, applet state and link
    pub fn release(&mut self) {
        self.clear_pin_token();
        self.connected = false;
        self.info = None;
        self.transport.release();
    }

    pub fn pin_token(&self) -> Option<&PinToken> {
        self.pin_token.as_ref()
    }

    pub(crate) fn cache_pin_token(&mut self, token: PinToken) {
        self.pin_token = Some(token);
    }

    /// Forget the cached PIN token; its memory is wiped on drop
    pub fn clear_pin_token(&mut self) {
        self.pin_token = None;
    }

    /// Exchange one command, leaving the status word to the caller
    pub fn transmit(&mut self, command: &CommandApdu) -> Result<ResponseApdu> {
        exchange::transmit(&mut self.transport, command, self.config.chain_chunk_size)
    }

    /// Exchange one command and map non-success status words to errors
    pub fn communicate(&mut self, command: &CommandApdu) -> Result<ResponseApdu> {
        let response = self.transmit(command)?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(fido_status_error(response.sw()))
        }
    }

    /// Send an encoded CTAP2 request (`command || cbor`) and check its status
    pub fn ctap2_request(&mut self, request: Vec<u8>) -> Result<Option<CborValue>> {
        let command = CommandApdu::new(CTAP2_CLA, CTAP2_INS, 0x00, 0x00)
            .with_data(request)
            .with_ne(MAX_EXTENDED_NE);
        let response = self.communicate(&command)?;
        Ok(parse_response(response.data())?)
    }

    /// Like [`Self::ctap2_request`] for commands that always answer with a map
    pub fn ctap2_request_map(&mut self, request: Vec<u8>) -> Result<CborValue> {
        self.ctap2_request(request)?
            .ok_or_else(|| Error::protocol("missing CTAP2 response body"))
    }
}

fn check_version(data: &[u8]) -> Result<String> {
    match std::str::from_utf8(data) {
        Ok(version @ (VERSION_U2F_V2 | VERSION_FIDO_2_0)) => Ok(version.to_owned()),
        _ => Err(Error::protocol(format!(
            "applet replied with unexpected version {}",
            hex::encode(data)
        ))),
    }
}

/// FIDO status word table
///
/// See "FIDO U2F Raw Message Formats", section 3.3.
pub fn fido_status_error(sw: StatusWord) -> Error {
    match sw {
        StatusWord::CONDITIONS_NOT_SATISFIED => Error::PresenceRequired,
        SW_WRONG_KEY_HANDLE => Error::NoCredentials,
        StatusWord::FILE_NOT_FOUND => Error::unsupported("FIDO applet not found"),
        StatusWord::CLA_NOT_SUPPORTED => Error::unsupported("class not supported"),
        StatusWord::INS_NOT_SUPPORTED => Error::unsupported("instruction not supported"),
        StatusWord::WRONG_LENGTH => Error::protocol("wrong request length"),
        other => Error::protocol(format!("unexpected status word {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_version() {
        assert_eq!(check_version(b"U2F_V2").unwrap(), "U2F_V2");
        assert_eq!(check_version(b"FIDO_2_0").unwrap(), "FIDO_2_0");
        assert!(matches!(check_version(b"U2F_V3"), Err(Error::Protocol(_))));
        assert!(check_version(&[0xFF, 0xFE]).is_err());
    }

    #[test]
    fn test_status_table() {
        assert_eq!(fido_status_error(StatusWord::from_u16(0x6985)), Error::PresenceRequired);
        assert_eq!(fido_status_error(StatusWord::from_u16(0x6A80)), Error::NoCredentials);
        assert!(matches!(
            fido_status_error(StatusWord::from_u16(0x6D00)),
            Error::Unsupported(_)
        ));
        assert!(matches!(
            fido_status_error(StatusWord::from_u16(0x6F00)),
            Error::Protocol(_)
        ));
    }
}
