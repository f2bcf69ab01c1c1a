//! USB HID device access
//!
//! [`UsbHidDevice`] implements [`HidDevice`] on top of hidapi. Discovery helpers
//! list the FIDO interfaces (usage page 0xF1D0, usage 0x01) present on the host.

use std::ffi::CString;
use std::time::Duration;

use crate::ctaphid::{PACKET_SIZE, Packet};
use crate::error::{Error, Result};
use crate::hid::HidDevice;

use hidapi::HidApi;
use tracing::debug;

/// FIDO HID usage page
const FIDO_USAGE_PAGE: u16 = 0xF1D0;

/// CTAPHID usage
const FIDO_USAGE: u16 = 0x01;

/// A FIDO HID interface found during enumeration
#[derive(Debug, Clone)]
pub struct UsbDeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Platform-specific device path
    pub path: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

/// hidapi-backed FIDO HID device
pub struct UsbHidDevice {
    device: hidapi::HidDevice,
    info: UsbDeviceInfo,
}

impl UsbHidDevice {
    /// Open an enumerated device
    pub fn open(api: &HidApi, info: &UsbDeviceInfo) -> Result<Self> {
        let path = CString::new(info.path.as_str())
            .map_err(|e| Error::IoError(format!("Invalid device path: {e}")))?;
        let device = api
            .open_path(&path)
            .map_err(|e| Error::IoError(format!("Failed to open device: {e}")))?;

        debug!(
            vendor_id = format_args!("{:04x}", info.vendor_id),
            product_id = format_args!("{:04x}", info.product_id),
            "Opened FIDO HID device"
        );
        Ok(Self {
            device,
            info: info.clone(),
        })
    }

    pub fn device_info(&self) -> &UsbDeviceInfo {
        &self.info
    }
}

impl HidDevice for UsbHidDevice {
    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        // Report id 0 prefix
        let mut report = [0u8; PACKET_SIZE + 1];
        report[1..].copy_from_slice(packet.as_bytes());

        let written = self
            .device
            .write(&report)
            .map_err(|e| Error::Enqueue(e.to_string()))?;
        if written < PACKET_SIZE {
            return Err(Error::Enqueue(format!(
                "short write: {written} of {} bytes",
                report.len()
            )));
        }
        Ok(())
    }

    fn read_packet(&mut self, timeout: Duration) -> Result<Option<Packet>> {
        let mut buf = [0u8; PACKET_SIZE];
        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let read = self
            .device
            .read_timeout(&mut buf, timeout_ms)
            .map_err(|e| Error::IoError(format!("Failed to read packet: {e}")))?;

        match read {
            0 => Ok(None),
            PACKET_SIZE => Packet::from_slice(&buf).map(Some),
            n => Err(Error::IoError(format!(
                "Incomplete read: {n} bytes (expected {PACKET_SIZE})"
            ))),
        }
    }
}

/// List FIDO HID interfaces
pub fn enumerate_devices(api: &HidApi) -> Vec<UsbDeviceInfo> {
    api.device_list()
        .filter(|d| d.usage_page() == FIDO_USAGE_PAGE && d.usage() == FIDO_USAGE)
        .map(|d| UsbDeviceInfo {
            vendor_id: d.vendor_id(),
            product_id: d.product_id(),
            path: d.path().to_string_lossy().into_owned(),
            manufacturer: d.manufacturer_string().map(str::to_owned),
            product: d.product_string().map(str::to_owned),
            serial_number: d.serial_number().map(str::to_owned),
        })
        .collect()
}

/// Initialize hidapi
pub fn init_usb() -> Result<HidApi> {
    HidApi::new().map_err(|e| Error::IoError(format!("Failed to initialize HID API: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{HidTransport, Transport};

    #[test]
    #[ignore] // Requires a physical authenticator
    fn test_enumerate_and_handshake() {
        let api = init_usb().unwrap();
        let devices = enumerate_devices(&api);
        let Some(info) = devices.first() else {
            return;
        };

        let device = UsbHidDevice::open(&api, info).unwrap();
        let mut transport = HidTransport::new(device);
        transport.connect().unwrap();
        assert!(transport.info().is_some());
    }
}
