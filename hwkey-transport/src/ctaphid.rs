//! CTAPHID framing
//!
//! Host-side view of the U2F/CTAP USB HID framing: 64-byte reports, split into an
//! initialization packet followed by up to 128 continuation packets.
//!
//! Packet Format:
//! - Initialization packet: CID(4) + CMD(1) + BCNT(2) + DATA(57)
//! - Continuation packet: CID(4) + SEQ(1) + DATA(59)
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#usb>

use crate::error::{Error, Result};

use subtle::ConstantTimeEq;

/// HID report size
pub const PACKET_SIZE: usize = 64;

/// Payload bytes carried by an initialization packet
pub const INIT_PAYLOAD_SIZE: usize = PACKET_SIZE - 7;

/// Payload bytes carried by a continuation packet
pub const CONT_PAYLOAD_SIZE: usize = PACKET_SIZE - 5;

/// Highest continuation sequence number
pub const MAX_SEQ: u8 = 0x7F;

/// Largest message that fits one init packet plus 128 continuations (7609 bytes)
pub const MAX_MESSAGE_SIZE: usize = INIT_PAYLOAD_SIZE + (MAX_SEQ as usize + 1) * CONT_PAYLOAD_SIZE;

/// Channel used for INIT before a channel has been allocated
pub const BROADCAST_CID: u32 = 0xFFFF_FFFF;

/// Length of the INIT nonce
pub const INIT_NONCE_SIZE: usize = 8;

/// TYPE bit distinguishing initialization packets
const TYPE_INIT: u8 = 0x80;

/// CTAPHID commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cmd {
    /// Echo
    Ping = 0x01,

    /// Encapsulated U2F APDU
    Msg = 0x03,

    /// Exclusive channel lock
    Lock = 0x04,

    /// Channel allocation / resynchronization
    Init = 0x06,

    /// Identify the device
    Wink = 0x08,

    /// Encapsulated CTAP2 CBOR request
    Cbor = 0x10,

    /// Abort the outstanding request on a channel
    Cancel = 0x11,

    /// Device is still working
    Keepalive = 0x3B,

    /// Error response
    Error = 0x3F,
}

impl Cmd {
    /// Parse a command byte, ignoring the TYPE bit
    pub fn from_u8(value: u8) -> Option<Self> {
        match value & !TYPE_INIT {
            0x01 => Some(Cmd::Ping),
            0x03 => Some(Cmd::Msg),
            0x04 => Some(Cmd::Lock),
            0x06 => Some(Cmd::Init),
            0x08 => Some(Cmd::Wink),
            0x10 => Some(Cmd::Cbor),
            0x11 => Some(Cmd::Cancel),
            0x3B => Some(Cmd::Keepalive),
            0x3F => Some(Cmd::Error),
            _ => None,
        }
    }

    /// Command byte as written in an initialization packet
    pub fn to_u8_init(self) -> u8 {
        (self as u8) | TYPE_INIT
    }

    /// Bare command byte
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Error codes carried by CTAPHID_ERROR frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    InvalidCmd = 0x01,
    InvalidPar = 0x02,
    InvalidLen = 0x03,
    InvalidSeq = 0x04,
    MsgTimeout = 0x05,
    ChannelBusy = 0x06,
    LockRequired = 0x0A,
    InvalidChannel = 0x0B,
    Other = 0x7F,
}

impl ErrorCode {
    /// Parse an error code byte
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(ErrorCode::InvalidCmd),
            0x02 => Some(ErrorCode::InvalidPar),
            0x03 => Some(ErrorCode::InvalidLen),
            0x04 => Some(ErrorCode::InvalidSeq),
            0x05 => Some(ErrorCode::MsgTimeout),
            0x06 => Some(ErrorCode::ChannelBusy),
            0x0A => Some(ErrorCode::LockRequired),
            0x0B => Some(ErrorCode::InvalidChannel),
            0x7F => Some(ErrorCode::Other),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl From<ErrorCode> for Error {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::MsgTimeout => Error::Timeout,
            ErrorCode::ChannelBusy => Error::ChannelBusy,
            other => Error::Device(other.to_u8()),
        }
    }
}

/// Map the payload of an ERROR frame to a transport error
pub fn error_from_payload(payload: &[u8]) -> Error {
    match payload.first() {
        Some(&byte) => ErrorCode::from_u8(byte).map_or(Error::Device(byte), Error::from),
        None => Error::MalformedResponse("empty CTAPHID_ERROR payload".into()),
    }
}

/// Status carried by a KEEPALIVE frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveStatus {
    /// Request is being processed
    Processing,
    /// Waiting for the user to touch the device
    UpNeeded,
    /// Reserved value
    Unknown(u8),
}

impl KeepaliveStatus {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => KeepaliveStatus::Processing,
            2 => KeepaliveStatus::UpNeeded,
            other => KeepaliveStatus::Unknown(other),
        }
    }
}

/// Capability flags advertised in the INIT response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const WINK: u8 = 0x01;
    pub const LOCK: u8 = 0x02;
    pub const CBOR: u8 = 0x04;
    pub const NMSG: u8 = 0x08;

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn has_wink(self) -> bool {
        self.0 & Self::WINK != 0
    }

    pub const fn has_lock(self) -> bool {
        self.0 & Self::LOCK != 0
    }

    pub const fn has_cbor(self) -> bool {
        self.0 & Self::CBOR != 0
    }

    /// Device does not implement CTAPHID_MSG
    pub const fn lacks_msg(self) -> bool {
        self.0 & Self::NMSG != 0
    }
}

/// Parsed CTAPHID_INIT response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitResponse {
    /// Nonce echoed by the device
    pub nonce: [u8; INIT_NONCE_SIZE],
    /// Newly allocated channel id
    pub cid: u32,
    /// CTAPHID protocol version
    pub protocol_version: u8,
    /// Device major version
    pub major: u8,
    /// Device minor version
    pub minor: u8,
    /// Device build version
    pub build: u8,
    /// Capability flags
    pub capabilities: Capabilities,
}

impl InitResponse {
    /// Length of an INIT response payload
    pub const SIZE: usize = INIT_NONCE_SIZE + 9;

    /// Parse an INIT response and check that it echoes `nonce`
    ///
    /// # Errors
    ///
    /// `NonceMismatch` if the first 8 bytes differ from `nonce`,
    /// `MalformedResponse` if the payload is shorter than 17 bytes.
    pub fn parse(nonce: &[u8; INIT_NONCE_SIZE], data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::MalformedResponse(format!(
                "INIT response of {} bytes, expected {}",
                data.len(),
                Self::SIZE
            )));
        }

        if !bool::from(data[..INIT_NONCE_SIZE].ct_eq(&nonce[..])) {
            return Err(Error::NonceMismatch);
        }
        let mut echoed = [0u8; INIT_NONCE_SIZE];
        echoed.copy_from_slice(&data[..INIT_NONCE_SIZE]);

        Ok(Self {
            nonce: echoed,
            cid: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            protocol_version: data[12],
            major: data[13],
            minor: data[14],
            build: data[15],
            capabilities: Capabilities::from_bits(data[16]),
        })
    }

    /// Serialize the response payload, as a device would send it
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[..INIT_NONCE_SIZE].copy_from_slice(&self.nonce);
        out[8..12].copy_from_slice(&self.cid.to_be_bytes());
        out[12] = self.protocol_version;
        out[13] = self.major;
        out[14] = self.minor;
        out[15] = self.build;
        out[16] = self.capabilities.bits();
        out
    }
}

/// A single 64-byte HID report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    data: [u8; PACKET_SIZE],
}

impl Packet {
    pub fn from_bytes(data: [u8; PACKET_SIZE]) -> Self {
        Self { data }
    }

    /// Build a packet from a slice of exactly 64 bytes
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let data: [u8; PACKET_SIZE] = data.try_into().map_err(|_| Error::InvalidPacket)?;
        Ok(Self { data })
    }

    pub fn as_bytes(&self) -> &[u8; PACKET_SIZE] {
        &self.data
    }

    /// Channel id
    pub fn cid(&self) -> u32 {
        u32::from_be_bytes([self.data[0], self.data[1], self.data[2], self.data[3]])
    }

    pub fn is_init(&self) -> bool {
        (self.data[4] & TYPE_INIT) != 0
    }

    /// Raw command byte without the TYPE bit (initialization packets only)
    pub fn cmd_byte(&self) -> Option<u8> {
        self.is_init().then_some(self.data[4] & !TYPE_INIT)
    }

    /// Command (initialization packets only)
    pub fn cmd(&self) -> Option<Cmd> {
        self.cmd_byte().and_then(Cmd::from_u8)
    }

    /// Total message length announced by an initialization packet
    pub fn payload_len(&self) -> Option<u16> {
        self.is_init()
            .then(|| u16::from_be_bytes([self.data[5], self.data[6]]))
    }

    /// Sequence number (continuation packets only)
    pub fn seq(&self) -> Option<u8> {
        (!self.is_init()).then_some(self.data[4])
    }

    /// Payload area, including any zero padding
    pub fn payload(&self) -> &[u8] {
        if self.is_init() {
            &self.data[7..]
        } else {
            &self.data[5..]
        }
    }

    /// Build an initialization packet carrying the first chunk of a message
    pub fn init(cid: u32, cmd: Cmd, total_len: u16, chunk: &[u8]) -> Self {
        let mut data = [0u8; PACKET_SIZE];
        data[0..4].copy_from_slice(&cid.to_be_bytes());
        data[4] = cmd.to_u8_init();
        data[5..7].copy_from_slice(&total_len.to_be_bytes());
        let len = chunk.len().min(INIT_PAYLOAD_SIZE);
        data[7..7 + len].copy_from_slice(&chunk[..len]);
        Self { data }
    }

    /// Build a continuation packet
    pub fn continuation(cid: u32, seq: u8, chunk: &[u8]) -> Self {
        let mut data = [0u8; PACKET_SIZE];
        data[0..4].copy_from_slice(&cid.to_be_bytes());
        data[4] = seq & MAX_SEQ;
        let len = chunk.len().min(CONT_PAYLOAD_SIZE);
        data[5..5 + len].copy_from_slice(&chunk[..len]);
        Self { data }
    }

    /// Build a one-packet ERROR frame
    pub fn error(cid: u32, code: ErrorCode) -> Self {
        Self::init(cid, Cmd::Error, 1, &[code.to_u8()])
    }

    /// Build a one-packet KEEPALIVE frame
    pub fn keepalive(cid: u32, status: u8) -> Self {
        Self::init(cid, Cmd::Keepalive, 1, &[status])
    }
}

/// A complete CTAPHID message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub cid: u32,
    pub cmd: Cmd,
    pub data: Vec<u8>,
}

impl Message {
    pub fn new(cid: u32, cmd: Cmd, data: Vec<u8>) -> Self {
        Self { cid, cmd, data }
    }

    /// Split the message into HID packets
    pub fn to_packets(&self) -> Result<Vec<Packet>> {
        if self.data.len() > MAX_MESSAGE_SIZE {
            return Err(Error::MessageTooLarge);
        }

        let head = self.data.len().min(INIT_PAYLOAD_SIZE);
        let mut packets = Vec::with_capacity(1 + (self.data.len() - head).div_ceil(CONT_PAYLOAD_SIZE));
        packets.push(Packet::init(
            self.cid,
            self.cmd,
            self.data.len() as u16,
            &self.data[..head],
        ));

        for (seq, chunk) in self.data[head..].chunks(CONT_PAYLOAD_SIZE).enumerate() {
            packets.push(Packet::continuation(self.cid, seq as u8, chunk));
        }

        Ok(packets)
    }
}
