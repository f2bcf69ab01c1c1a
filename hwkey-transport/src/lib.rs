//! Link layer for hardware security keys
//!
//! This crate moves bytes between the host and a token:
//! - ISO 7816-4 APDU encoding, decoding and command chaining
//! - CTAPHID framing, reassembly and the channel handshake
//! - A retrying HID link and the [`Transport`] abstraction used by the applet layers
//! - USB HID devices via hidapi - requires "usb" feature
//!
//! # Features
//!
//! - `usb`: Enable the hidapi-backed device (requires libudev on Linux)
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#usb>

pub mod apdu;
pub mod channel;
pub mod ctaphid;
pub mod error;
pub mod hid;
pub mod transport;
#[cfg(feature = "usb")]
pub mod usb;

pub use apdu::{CommandApdu, LengthForm, ResponseApdu, StatusWord};
pub use channel::Reassembler;
pub use ctaphid::{Capabilities, Cmd, InitResponse, Message, Packet};
pub use error::{Error, Result};
pub use hid::{CtapHidLink, HidDevice, LinkConfig};
pub use transport::{HidTransport, Transport};
#[cfg(feature = "usb")]
pub use usb::{UsbDeviceInfo, UsbHidDevice, enumerate_devices, init_usb};
