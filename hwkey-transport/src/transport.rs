//! APDU transports
//!
//! [`Transport`] is the boundary between the protocol engine and whatever
//! physical link carries APDUs (USB HID, NFC, a PC/SC reader). Platform code
//! supplies implementations; [`HidTransport`] is the one shipped here.

use crate::apdu::{CommandApdu, LengthForm, ResponseApdu};
use crate::ctaphid::{Cmd, InitResponse};
use crate::error::{Error, Result};
use crate::hid::{CtapHidLink, HidDevice, LinkConfig};

use tracing::trace;

/// CLA of the CTAP2 encapsulation command
pub const CTAP2_CLA: u8 = 0x80;

/// INS of the CTAP2 encapsulation command
pub const CTAP2_INS: u8 = 0x10;

/// A link that exchanges command and response APDUs
pub trait Transport: Send {
    /// Open the link
    fn connect(&mut self) -> Result<()>;

    /// Send one command APDU and wait for its response
    fn transceive(&mut self, command: &CommandApdu) -> Result<ResponseApdu>;

    /// Close the link
    fn release(&mut self);

    fn is_connected(&self) -> bool;

    /// Whether the link accepts extended-length APDUs
    fn is_extended_length_supported(&self) -> bool;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn transceive(&mut self, command: &CommandApdu) -> Result<ResponseApdu> {
        (**self).transceive(command)
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn is_extended_length_supported(&self) -> bool {
        (**self).is_extended_length_supported()
    }
}

/// APDU transport over CTAPHID
///
/// CTAP2 encapsulation commands (`80 10`) travel as CTAPHID_CBOR carrying only
/// the data field, and their response is reported with status `90 00`.
/// Every other command is sent as an extended-length APDU inside CTAPHID_MSG.
pub struct HidTransport<D> {
    link: CtapHidLink<D>,
}

impl<D: HidDevice> HidTransport<D> {
    pub fn new(device: D) -> Self {
        Self {
            link: CtapHidLink::new(device),
        }
    }

    pub fn with_config(device: D, config: LinkConfig) -> Self {
        Self {
            link: CtapHidLink::with_config(device, config),
        }
    }

    /// Underlying link
    pub fn link(&self) -> &CtapHidLink<D> {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut CtapHidLink<D> {
        &mut self.link
    }

    /// INIT response of the current channel
    pub fn info(&self) -> Option<&InitResponse> {
        self.link.info()
    }
}

impl<D: HidDevice> Transport for HidTransport<D> {
    fn connect(&mut self) -> Result<()> {
        self.link.init().map(drop)
    }

    fn transceive(&mut self, command: &CommandApdu) -> Result<ResponseApdu> {
        if !self.link.is_open() {
            return Err(Error::NotConnected);
        }

        if command.cla == CTAP2_CLA && command.ins == CTAP2_INS {
            trace!(len = command.data().len(), "CTAPHID_CBOR request");
            let data = self.link.transact(Cmd::Cbor, command.data())?;
            return Ok(ResponseApdu::success(data));
        }

        let bytes = command.encode(LengthForm::Extended)?;
        trace!(apdu = %hex::encode(&bytes), "CTAPHID_MSG request");
        let response = self.link.transact(Cmd::Msg, &bytes)?;
        ResponseApdu::from_bytes(&response)
    }

    fn release(&mut self) {
        self.link.release();
    }

    fn is_connected(&self) -> bool {
        self.link.is_open()
    }

    fn is_extended_length_supported(&self) -> bool {
        true
    }
}
