//! OpenPGP card applet: PIN management and key fingerprints
//!
//! Spec: <https://gnupg.org/ftp/specs/OpenPGP-smart-card-application-3.4.1.pdf>

pub mod fingerprint;

pub use fingerprint::{Curve, PublicKey, fingerprint};

use hwkey_transport::{CommandApdu, ResponseApdu, StatusWord, Transport};
use tracing::{debug, warn};

use crate::config::OPENPGP_CHAIN_CHUNK;
use crate::error::{Error, Result};
use crate::exchange;
use crate::pin::Pin;

/// OpenPGP application identifier, without version and serial
pub const AID: [u8; 6] = [0xD2, 0x76, 0x00, 0x01, 0x24, 0x01];

/// Minimum PW1 (user PIN) length
pub const MIN_PW1_LENGTH: usize = 4;

/// Minimum PW3 (admin PIN) length
pub const MIN_PW3_LENGTH: usize = 8;

const INS_VERIFY: u8 = 0x20;
const INS_CHANGE_REFERENCE_DATA: u8 = 0x24;
const INS_RESET_RETRY_COUNTER: u8 = 0x2C;
const INS_GET_DATA: u8 = 0xCA;

/// Data object holding the PW status bytes
const DO_PW_STATUS: u16 = 0x00C4;

/// Reset retry counter after PW3 verification
const P1_RESET_BY_ADMIN: u8 = 0x02;

/// PIN reference used in P2 of VERIFY
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinReference {
    /// PW1 for PSO:CDS
    Pw1Signing = 0x81,
    /// PW1 for decipher and internal authenticate
    Pw1Other = 0x82,
    /// PW3, the admin PIN
    Pw3 = 0x83,
}

/// Decoded PW status bytes (DO C4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwStatus {
    /// PW1 stays valid for several signatures
    pub pw1_valid_for_multiple_signatures: bool,
    pub pw1_max_length: u8,
    pub rc_max_length: u8,
    pub pw3_max_length: u8,
    pub pw1_retries: u8,
    pub rc_retries: u8,
    pub pw3_retries: u8,
}

impl PwStatus {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let [validity, pw1_max, rc_max, pw3_max, pw1_retries, rc_retries, pw3_retries, ..] = *data
        else {
            return Err(Error::protocol(format!(
                "PW status has {} bytes, expected 7",
                data.len()
            )));
        };
        Ok(Self {
            pw1_valid_for_multiple_signatures: validity != 0,
            // Bit 7 flags the PIN format, not the length
            pw1_max_length: pw1_max & 0x7F,
            rc_max_length: rc_max,
            pw3_max_length: pw3_max & 0x7F,
            pw1_retries,
            rc_retries,
            pw3_retries,
        })
    }

    fn retries_for(&self, reference: PinReference) -> u8 {
        match reference {
            PinReference::Pw1Signing | PinReference::Pw1Other => self.pw1_retries,
            PinReference::Pw3 => self.pw3_retries,
        }
    }
}

/// Verified PIN references in the current session
#[derive(Debug, Default, Clone, Copy)]
struct Verified {
    pw1_signing: bool,
    pw1_other: bool,
    pw3: bool,
}

impl Verified {
    fn get(&self, reference: PinReference) -> bool {
        match reference {
            PinReference::Pw1Signing => self.pw1_signing,
            PinReference::Pw1Other => self.pw1_other,
            PinReference::Pw3 => self.pw3,
        }
    }

    fn set(&mut self, reference: PinReference, value: bool) {
        match reference {
            PinReference::Pw1Signing => self.pw1_signing = value,
            PinReference::Pw1Other => self.pw1_other = value,
            PinReference::Pw3 => self.pw3 = value,
        }
    }
}

/// Session with the OpenPGP applet of a card
pub struct OpenPgpApplet<T> {
    transport: T,
    pw_status: Option<PwStatus>,
    verified: Verified,
}

impl<T: Transport> OpenPgpApplet<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            pw_status: None,
            verified: Verified::default(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Connect if needed, select the applet and read the PW status
    pub fn select(&mut self) -> Result<PwStatus> {
        if !self.transport.is_connected() {
            self.transport.connect()?;
        }
        self.verified = Verified::default();
        self.communicate(&CommandApdu::select(&AID), None)?;
        debug!("Selected OpenPGP applet");
        self.refresh_pw_status()
    }

    /// Read DO C4 again
    pub fn refresh_pw_status(&mut self) -> Result<PwStatus> {
        let [p1, p2] = DO_PW_STATUS.to_be_bytes();
        let command = CommandApdu::new(0x00, INS_GET_DATA, p1, p2).with_ne(256);
        let response = self.communicate(&command, None)?;
        let status = PwStatus::parse(response.data())?;
        debug!(
            pw1_retries = status.pw1_retries,
            pw3_retries = status.pw3_retries,
            "PW status"
        );
        self.pw_status = Some(status);
        Ok(status)
    }

    /// Last PW status read from the card
    pub fn pw_status(&self) -> Option<&PwStatus> {
        self.pw_status.as_ref()
    }

    fn cached_pw_status(&mut self) -> Result<PwStatus> {
        match self.pw_status {
            Some(status) => Ok(status),
            None => self.refresh_pw_status(),
        }
    }

    pub fn is_verified(&self, reference: PinReference) -> bool {
        self.verified.get(reference)
    }

    /// VERIFY, skipped when `reference` is already verified this session
    pub fn verify(&mut self, reference: PinReference, pin: &Pin) -> Result<()> {
        if self.verified.get(reference) {
            debug!(reference = ?reference, "PIN already verified");
            return Ok(());
        }

        let command = CommandApdu::new(0x00, INS_VERIFY, 0x00, reference as u8)
            .with_data(pin.as_str().as_bytes().to_vec());
        self.communicate(&command, Some(reference))?;
        self.verified.set(reference, true);
        debug!(reference = ?reference, "PIN verified");
        Ok(())
    }

    /// A single-use PW1 signing verification is consumed by one signature
    pub fn invalidate_single_use_pw1(&mut self) {
        let multiple = self
            .pw_status
            .is_some_and(|status| status.pw1_valid_for_multiple_signatures);
        if !multiple {
            self.verified.set(PinReference::Pw1Signing, false);
        }
    }

    /// Forget all verifications, as after a card reset
    pub fn reset_verification(&mut self) {
        self.verified = Verified::default();
    }

    /// CHANGE REFERENCE DATA for PW3
    pub fn change_pw3(&mut self, current: &Pin, new: &Pin) -> Result<()> {
        let status = self.cached_pw_status()?;
        check_length(new, MIN_PW3_LENGTH, status.pw3_max_length)?;

        let data = [current.as_str().as_bytes(), new.as_str().as_bytes()].concat();
        let command = CommandApdu::new(0x00, INS_CHANGE_REFERENCE_DATA, 0x00, PinReference::Pw3 as u8)
            .with_data(data);
        self.communicate(&command, Some(PinReference::Pw3))?;
        self.verified.set(PinReference::Pw3, false);
        debug!("PW3 changed");
        Ok(())
    }

    /// RESET RETRY COUNTER for PW1, authorized by PW3
    pub fn reset_pw1(&mut self, admin: &Pin, new_pin: &Pin) -> Result<()> {
        self.verify(PinReference::Pw3, admin)?;
        let status = self.cached_pw_status()?;
        check_length(new_pin, MIN_PW1_LENGTH, status.pw1_max_length)?;

        let command = CommandApdu::new(
            0x00,
            INS_RESET_RETRY_COUNTER,
            P1_RESET_BY_ADMIN,
            PinReference::Pw1Signing as u8,
        )
        .with_data(new_pin.as_str().as_bytes().to_vec());
        self.communicate(&command, Some(PinReference::Pw1Signing))?;
        self.reset_verification();
        debug!("PW1 reset");
        Ok(())
    }

    /// Set a new admin PIN and then a new user PIN
    ///
    /// PW3 goes first; Gnuk enters admin-less mode otherwise.
    pub fn modify_pw1_and_pw3(&mut self, admin: &Pin, new_admin: &Pin, new_pin: &Pin) -> Result<()> {
        let status = self.cached_pw_status()?;
        check_length(new_admin, MIN_PW3_LENGTH, status.pw3_max_length)?;
        check_length(new_pin, MIN_PW1_LENGTH, status.pw1_max_length)?;

        self.change_pw3(admin, new_admin)?;
        self.reset_pw1(new_admin, new_pin)
    }

    fn communicate(&mut self, command: &CommandApdu, reference: Option<PinReference>) -> Result<ResponseApdu> {
        let response = exchange::transmit(&mut self.transport, command, OPENPGP_CHAIN_CHUNK)?;
        if response.is_success() {
            return Ok(response);
        }
        Err(self.status_error(response.sw(), reference))
    }

    /// OpenPGP status word table
    ///
    /// `63 Cx` carries the retry counter; a bare `69 82` is completed by
    /// reading the PW status again.
    fn status_error(&mut self, sw: StatusWord, reference: Option<PinReference>) -> Error {
        if let Some(retries) = sw.retries_remaining() {
            return match retries {
                0 => Error::Blocked,
                n => Error::SecurityStatus { retries: Some(n) },
            };
        }

        match sw {
            StatusWord::SECURITY_STATUS_NOT_SATISFIED => {
                let retries = reference.and_then(|reference| {
                    match self.refresh_pw_status() {
                        Ok(status) => Some(status.retries_for(reference)),
                        Err(e) => {
                            warn!(error = %e, "Failed to refresh PW status");
                            None
                        }
                    }
                });
                match retries {
                    Some(0) => Error::Blocked,
                    retries => Error::SecurityStatus { retries },
                }
            }
            StatusWord::AUTH_METHOD_BLOCKED => Error::Blocked,
            StatusWord::WRONG_DATA | StatusWord::WRONG_LENGTH => Error::PinTooShort,
            StatusWord::FILE_NOT_FOUND => Error::unsupported("OpenPGP applet not found"),
            StatusWord::CLA_NOT_SUPPORTED => Error::unsupported("class not supported"),
            StatusWord::INS_NOT_SUPPORTED => Error::unsupported("instruction not supported"),
            StatusWord::TERMINATION_STATE => Error::protocol("OpenPGP applet is terminated"),
            StatusWord::CONDITIONS_NOT_SATISFIED => Error::protocol("conditions of use not satisfied"),
            other => Error::protocol(format!("unexpected status word {other}")),
        }
    }
}

fn check_length(pin: &Pin, min: usize, max: u8) -> Result<()> {
    let len = pin.as_str().len();
    if len < min {
        return Err(Error::PinTooShort);
    }
    if max > 0 && len > usize::from(max) {
        return Err(Error::PinTooLong);
    }
    Ok(())
}
