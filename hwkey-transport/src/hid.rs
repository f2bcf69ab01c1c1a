//! CTAPHID link
//!
//! Drives a [`HidDevice`] through the channel handshake and request/response
//! transactions. Busy and timeout conditions are retried a bounded number of
//! times; anything that leaves the channel in an unknown state drops it so the
//! next transaction re-handshakes.

use std::time::{Duration, Instant};

use crate::channel::Reassembler;
use crate::ctaphid::{
    BROADCAST_CID, Cmd, INIT_NONCE_SIZE, InitResponse, KeepaliveStatus, Message, Packet,
    error_from_payload,
};
use crate::error::{Error, Result};

use tracing::{debug, trace, warn};

/// Number of consecutive keepalives after which a warning is logged
const KEEPALIVE_WARN_INTERVAL: u32 = 100;

/// Packet-level access to a HID authenticator
pub trait HidDevice: Send {
    /// Write one 64-byte report
    ///
    /// A failure here means the device did not accept the data and is reported
    /// as [`Error::Enqueue`].
    fn write_packet(&mut self, packet: &Packet) -> Result<()>;

    /// Read one report, waiting at most `timeout`
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    fn read_packet(&mut self, timeout: Duration) -> Result<Option<Packet>>;
}

impl<D: HidDevice + ?Sized> HidDevice for Box<D> {
    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        (**self).write_packet(packet)
    }

    fn read_packet(&mut self, timeout: Duration) -> Result<Option<Packet>> {
        (**self).read_packet(timeout)
    }
}

/// Link timing and retry policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// How long to wait for the INIT response
    pub init_timeout: Duration,
    /// How long to wait for each response packet
    pub read_timeout: Duration,
    /// No further report of a message is written once this much time has passed
    pub write_timeout: Duration,
    /// Attempts per transaction, including the first
    pub max_attempts: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_millis(850),
            read_timeout: Duration::from_millis(2000),
            write_timeout: Duration::from_millis(1000),
            max_attempts: 3,
        }
    }
}

impl LinkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }
}

#[derive(Debug, Clone, Copy)]
enum LinkState {
    /// Never initialized or explicitly released
    Closed,
    /// Channel dropped after a protocol error, re-handshake on next use
    Stale,
    Open(InitResponse),
}

/// Host side of a CTAPHID connection
pub struct CtapHidLink<D> {
    device: D,
    config: LinkConfig,
    state: LinkState,
}

impl<D: HidDevice> CtapHidLink<D> {
    /// Wrap a device with the default link configuration
    pub fn new(device: D) -> Self {
        Self::with_config(device, LinkConfig::default())
    }

    pub fn with_config(device: D, config: LinkConfig) -> Self {
        Self {
            device,
            config,
            state: LinkState::Closed,
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// INIT response of the current channel
    pub fn info(&self) -> Option<&InitResponse> {
        match &self.state {
            LinkState::Open(info) => Some(info),
            _ => None,
        }
    }

    /// Whether a channel is allocated or can be re-allocated transparently
    pub fn is_open(&self) -> bool {
        !matches!(self.state, LinkState::Closed)
    }

    /// Allocate a channel
    ///
    /// # Errors
    ///
    /// [`Error::NonceMismatch`] if the device answers with a different nonce.
    /// This is fatal and leaves the link closed.
    /// [`Error::Timeout`] if no INIT response arrives within `init_timeout`.
    pub fn init(&mut self) -> Result<InitResponse> {
        self.state = LinkState::Closed;

        let nonce: [u8; INIT_NONCE_SIZE] = rand::random();
        self.send(&Message::new(BROADCAST_CID, Cmd::Init, nonce.to_vec()))?;

        let deadline = Instant::now() + self.config.init_timeout;
        let mut reassembler = Reassembler::new(BROADCAST_CID);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!("No CTAPHID_INIT response before timeout");
                return Err(Error::Timeout);
            }

            let Some(packet) = self.device.read_packet(remaining)? else {
                continue;
            };
            trace!(frame = %hex::encode(packet.as_bytes()), "HID <<");

            let Some(message) = reassembler.feed(&packet)? else {
                continue;
            };
            if message.cmd != Cmd::Init {
                trace!(cmd = ?message.cmd, "Ignoring non-INIT frame during handshake");
                continue;
            }

            let info = InitResponse::parse(&nonce, &message.data)?;
            debug!(
                cid = format_args!("{:08x}", info.cid),
                version = format_args!("{}.{}.{}", info.major, info.minor, info.build),
                capabilities = format_args!("{:#04x}", info.capabilities.bits()),
                "CTAPHID channel allocated"
            );
            self.state = LinkState::Open(info);
            return Ok(info);
        }
    }

    /// Release the channel; further transactions fail until [`init`](Self::init)
    pub fn release(&mut self) {
        if let LinkState::Open(info) = self.state {
            debug!(cid = format_args!("{:08x}", info.cid), "CTAPHID channel released");
        }
        self.state = LinkState::Closed;
    }

    /// Send `payload` as `cmd` and return the response payload
    ///
    /// Keepalive frames are skipped. ERROR frames become transport errors.
    /// Busy and timeout conditions are retried up to `max_attempts` times, after
    /// which [`Error::Timeout`] is returned.
    pub fn transact(&mut self, cmd: Cmd, payload: &[u8]) -> Result<Vec<u8>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self.ensure_channel().and_then(|cid| self.exchange(cid, cmd, payload));

            match result {
                Ok(data) => return Ok(data),
                Err(e) if e.is_retryable() && attempt < self.config.max_attempts => {
                    warn!(attempt, error = %e, "Retrying CTAPHID transaction");
                }
                Err(e) if e.is_retryable() => {
                    warn!(attempts = attempt, error = %e, "CTAPHID retries exhausted");
                    return Err(Error::Timeout);
                }
                Err(e) => {
                    if drops_channel(&e) && matches!(self.state, LinkState::Open(_)) {
                        debug!(error = %e, "Dropping CTAPHID channel after protocol error");
                        self.state = LinkState::Stale;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// CTAPHID_PING; the device must echo `data`
    pub fn ping(&mut self, data: &[u8]) -> Result<()> {
        let echoed = self.transact(Cmd::Ping, data)?;
        if echoed != data {
            return Err(Error::MalformedResponse("PING echo mismatch".into()));
        }
        Ok(())
    }

    /// CTAPHID_WINK
    pub fn wink(&mut self) -> Result<()> {
        self.transact(Cmd::Wink, &[]).map(drop)
    }

    /// CTAPHID_CANCEL for the request outstanding on this channel
    ///
    /// The device sends no response to a cancel, so this only writes.
    pub fn cancel(&mut self) -> Result<()> {
        let LinkState::Open(info) = self.state else {
            return Ok(());
        };
        debug!(cid = format_args!("{:08x}", info.cid), "Sending CTAPHID_CANCEL");
        self.send(&Message::new(info.cid, Cmd::Cancel, Vec::new()))
    }

    fn ensure_channel(&mut self) -> Result<u32> {
        match self.state {
            LinkState::Open(info) => Ok(info.cid),
            LinkState::Stale => self.init().map(|info| info.cid),
            LinkState::Closed => Err(Error::NotConnected),
        }
    }

    fn exchange(&mut self, cid: u32, cmd: Cmd, payload: &[u8]) -> Result<Vec<u8>> {
        self.send(&Message::new(cid, cmd, payload.to_vec()))?;

        let mut reassembler = Reassembler::new(cid);
        let mut keepalives = 0u32;
        loop {
            let packet = self
                .device
                .read_packet(self.config.read_timeout)?
                .ok_or(Error::Timeout)?;
            trace!(frame = %hex::encode(packet.as_bytes()), "HID <<");

            let Some(message) = reassembler.feed(&packet)? else {
                continue;
            };

            match message.cmd {
                Cmd::Keepalive => {
                    keepalives += 1;
                    let status = KeepaliveStatus::from_u8(message.data.first().copied().unwrap_or(0));
                    trace!(?status, "CTAPHID keepalive");
                    if keepalives % KEEPALIVE_WARN_INTERVAL == 0 {
                        warn!(keepalives, ?status, "Device keeps sending keepalives");
                    }
                }
                Cmd::Error => return Err(error_from_payload(&message.data)),
                response if response == cmd => return Ok(message.data),
                other => {
                    debug!(expected = ?cmd, actual = ?other, "Unexpected CTAPHID response command");
                    return Err(Error::InvalidCommand);
                }
            }
        }
    }

    fn send(&mut self, message: &Message) -> Result<()> {
        let packets = message.to_packets()?;
        let started = Instant::now();
        for (written, packet) in packets.iter().enumerate() {
            if started.elapsed() > self.config.write_timeout {
                return Err(Error::Enqueue(format!(
                    "wrote {written} of {} packets within {:?}",
                    packets.len(),
                    self.config.write_timeout
                )));
            }
            trace!(frame = %hex::encode(packet.as_bytes()), "HID >>");
            self.device
                .write_packet(packet)
                .map_err(|e| match e {
                    Error::Enqueue(reason) => Error::Enqueue(reason),
                    other => Error::Enqueue(other.to_string()),
                })?;
        }
        Ok(())
    }
}

fn drops_channel(error: &Error) -> bool {
    matches!(
        error,
        Error::InvalidChannel { .. }
            | Error::InvalidSequence { .. }
            | Error::InvalidCommand
            | Error::FragmentationError
            | Error::MessageTooLarge
            | Error::MalformedResponse(_)
            | Error::Device(0x0B)
    )
}
