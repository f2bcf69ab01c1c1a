//! ISO/IEC 7816-4 APDU codec
//!
//! Command layout: `CLA INS P1 P2 [Lc Data] [Le]`. The extended form replaces the
//! single byte Lc/Le with a `0x00` marker followed by two big-endian length bytes.
//!
//! Responses are `Data SW1 SW2`.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Largest command data field in short form
pub const MAX_SHORT_NC: usize = 255;

/// Largest command data field in extended form
pub const MAX_EXTENDED_NC: usize = 65535;

/// Largest expected response length in short form (encoded as Le = 0x00)
pub const MAX_SHORT_NE: usize = 256;

/// Largest expected response length in extended form (encoded as Le = 0x0000)
pub const MAX_EXTENDED_NE: usize = 65536;

/// Class byte bit marking "more commands of this chain follow"
pub const CLA_CHAINING: u8 = 0x10;

/// GET RESPONSE instruction
pub const INS_GET_RESPONSE: u8 = 0xC0;

/// SELECT instruction
pub const INS_SELECT: u8 = 0xA4;

/// Status word (SW1-SW2) terminating every response APDU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord {
    /// First status byte
    pub sw1: u8,
    /// Second status byte
    pub sw2: u8,
}

impl StatusWord {
    pub const SUCCESS: Self = Self::from_u16(0x9000);
    pub const TERMINATION_STATE: Self = Self::from_u16(0x6285);
    pub const WRONG_LENGTH: Self = Self::from_u16(0x6700);
    pub const SECURITY_STATUS_NOT_SATISFIED: Self = Self::from_u16(0x6982);
    pub const AUTH_METHOD_BLOCKED: Self = Self::from_u16(0x6983);
    pub const CONDITIONS_NOT_SATISFIED: Self = Self::from_u16(0x6985);
    pub const WRONG_DATA: Self = Self::from_u16(0x6A80);
    pub const FILE_NOT_FOUND: Self = Self::from_u16(0x6A82);
    pub const INS_NOT_SUPPORTED: Self = Self::from_u16(0x6D00);
    pub const CLA_NOT_SUPPORTED: Self = Self::from_u16(0x6E00);

    /// Create a new status word
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// Create from a u16 value (SW1 << 8 | SW2)
    pub const fn from_u16(status: u16) -> Self {
        Self {
            sw1: (status >> 8) as u8,
            sw2: status as u8,
        }
    }

    /// Convert to a u16 value
    pub const fn to_u16(self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    /// `90 00`
    pub const fn is_success(self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    /// Bytes still available through GET RESPONSE when SW1 = 61
    pub const fn remaining_bytes(self) -> Option<u8> {
        if self.sw1 == 0x61 { Some(self.sw2) } else { None }
    }

    /// Exact Le demanded by the card when SW1 = 6C
    pub const fn exact_length(self) -> Option<u8> {
        if self.sw1 == 0x6C && self.sw2 != 0 {
            Some(self.sw2)
        } else {
            None
        }
    }

    /// Retry counter carried by a `63 Cx` status word
    pub const fn retries_remaining(self) -> Option<u8> {
        if self.sw1 == 0x63 && (self.sw2 & 0xF0) == 0xC0 {
            Some(self.sw2 & 0x0F)
        } else {
            None
        }
    }

    /// Human readable description
    pub const fn description(self) -> &'static str {
        match (self.sw1, self.sw2) {
            (0x90, 0x00) => "Success",
            (0x61, _) => "More data available",
            (0x62, 0x85) => "Selected file in termination state",
            (0x63, n) if (n & 0xF0) == 0xC0 => "Verification failed, counter value",
            (0x67, 0x00) => "Wrong length",
            (0x69, 0x82) => "Security status not satisfied",
            (0x69, 0x83) => "Authentication method blocked",
            (0x69, 0x85) => "Conditions of use not satisfied",
            (0x6A, 0x80) => "Incorrect parameters in the data field",
            (0x6A, 0x82) => "File or application not found",
            (0x6C, _) => "Wrong Le field",
            (0x6D, 0x00) => "Instruction not supported",
            (0x6E, 0x00) => "Class not supported",
            _ => "Unknown status",
        }
    }
}

impl From<u16> for StatusWord {
    fn from(status: u16) -> Self {
        Self::from_u16(status)
    }
}

impl From<StatusWord> for u16 {
    fn from(sw: StatusWord) -> Self {
        sw.to_u16()
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X} ({})", self.sw1, self.sw2, self.description())
    }
}

/// Length encoding of a command APDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthForm {
    /// One byte Lc/Le
    Short,
    /// `00` marker plus two byte Lc/Le
    Extended,
}

/// Command APDU
///
/// `ne` is the expected response length: 0 means no Le field, 256 is the short
/// maximum and 65536 the extended maximum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandApdu {
    /// Class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    data: Bytes,
    ne: usize,
}

impl CommandApdu {
    /// Create a command with just the header bytes
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Bytes::new(),
            ne: 0,
        }
    }

    /// Attach a data field
    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }

    /// Set the expected response length
    pub fn with_ne(mut self, ne: usize) -> Self {
        self.ne = ne.min(MAX_EXTENDED_NE);
        self
    }

    /// SELECT by application identifier
    pub fn select(aid: &[u8]) -> Self {
        Self::new(0x00, INS_SELECT, 0x04, 0x00)
            .with_data(Bytes::copy_from_slice(aid))
            .with_ne(MAX_SHORT_NE)
    }

    /// GET RESPONSE for the `61 xx` continuation
    pub fn get_response(available: u8) -> Self {
        let ne = if available == 0 {
            MAX_SHORT_NE
        } else {
            available as usize
        };
        Self::new(0x00, INS_GET_RESPONSE, 0x00, 0x00).with_ne(ne)
    }

    /// Command data
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Expected response length
    pub fn ne(&self) -> usize {
        self.ne
    }

    /// Whether the command can be sent in short form without losing anything
    pub fn fits_short(&self) -> bool {
        self.data.len() <= MAX_SHORT_NC && self.ne <= MAX_SHORT_NE
    }

    /// Length form chosen for this command given the session's capability
    pub fn form_for(&self, extended_supported: bool) -> LengthForm {
        if extended_supported && !self.fits_short() {
            LengthForm::Extended
        } else {
            LengthForm::Short
        }
    }

    /// Same command with Ne clamped to the short maximum
    pub fn to_short(&self) -> Self {
        let mut short = self.clone();
        short.ne = short.ne.min(MAX_SHORT_NE);
        short
    }

    /// Encode choosing the form from the session capability
    pub fn to_bytes(&self, extended_supported: bool) -> Result<Bytes> {
        self.encode(self.form_for(extended_supported))
    }

    /// Encode in the given length form
    pub fn encode(&self, form: LengthForm) -> Result<Bytes> {
        let nc = self.data.len();
        let (max_nc, max_ne) = match form {
            LengthForm::Short => (MAX_SHORT_NC, MAX_SHORT_NE),
            LengthForm::Extended => (MAX_EXTENDED_NC, MAX_EXTENDED_NE),
        };
        if nc > max_nc {
            return Err(Error::DataTooLong { len: nc, max: max_nc });
        }
        if self.ne > max_ne {
            return Err(Error::DataTooLong {
                len: self.ne,
                max: max_ne,
            });
        }

        let mut buffer = BytesMut::with_capacity(4 + 3 + nc + 3);
        buffer.put_u8(self.cla);
        buffer.put_u8(self.ins);
        buffer.put_u8(self.p1);
        buffer.put_u8(self.p2);

        match form {
            LengthForm::Short => {
                if nc > 0 {
                    buffer.put_u8(nc as u8);
                    buffer.put_slice(&self.data);
                }
                if self.ne > 0 {
                    // 256 wraps to 0x00
                    buffer.put_u8(self.ne as u8);
                }
            }
            LengthForm::Extended => {
                if nc > 0 {
                    buffer.put_u8(0x00);
                    buffer.put_u16(nc as u16);
                    buffer.put_slice(&self.data);
                }
                if self.ne > 0 {
                    if nc == 0 {
                        buffer.put_u8(0x00);
                    }
                    // 65536 wraps to 0x0000
                    buffer.put_u16(self.ne as u16);
                }
            }
        }

        Ok(buffer.freeze())
    }

    /// Decode a command APDU, reporting which length form it used
    pub fn decode(bytes: &[u8]) -> Result<(Self, LengthForm)> {
        let malformed = || Error::MalformedResponse(format!("invalid command APDU of {} bytes", bytes.len()));

        if bytes.len() < 4 {
            return Err(malformed());
        }
        let mut command = Self::new(bytes[0], bytes[1], bytes[2], bytes[3]);
        let body = &bytes[4..];

        if body.is_empty() {
            return Ok((command, LengthForm::Short));
        }

        if body.len() == 1 {
            command.ne = short_ne(body[0]);
            return Ok((command, LengthForm::Short));
        }

        if body[0] != 0x00 {
            let nc = body[0] as usize;
            let rest = &body[1..];
            if rest.len() == nc {
                command.data = Bytes::copy_from_slice(rest);
            } else if rest.len() == nc + 1 {
                command.data = Bytes::copy_from_slice(&rest[..nc]);
                command.ne = short_ne(rest[nc]);
            } else {
                return Err(malformed());
            }
            return Ok((command, LengthForm::Short));
        }

        if body.len() == 3 {
            command.ne = extended_ne(body[1], body[2]);
            return Ok((command, LengthForm::Extended));
        }

        if body.len() < 3 {
            return Err(malformed());
        }
        let nc = u16::from_be_bytes([body[1], body[2]]) as usize;
        let rest = &body[3..];
        if nc == 0 {
            return Err(malformed());
        }
        if rest.len() == nc {
            command.data = Bytes::copy_from_slice(rest);
        } else if rest.len() == nc + 2 {
            command.data = Bytes::copy_from_slice(&rest[..nc]);
            command.ne = extended_ne(rest[nc], rest[nc + 1]);
        } else {
            return Err(malformed());
        }
        Ok((command, LengthForm::Extended))
    }

    /// Split the data field into a command chain of at most `chunk_size` bytes each
    ///
    /// Every link except the last carries `CLA | 0x10` and no Le. The last link
    /// keeps the original class byte and Ne clamped to the short maximum.
    pub fn chain(&self, chunk_size: usize) -> Vec<CommandApdu> {
        let chunk_size = chunk_size.clamp(1, MAX_SHORT_NC);
        if self.data.len() <= chunk_size {
            return vec![self.to_short()];
        }

        let total = self.data.len().div_ceil(chunk_size);
        (0..total)
            .map(|index| {
                let start = index * chunk_size;
                let end = (start + chunk_size).min(self.data.len());
                let last = index == total - 1;
                CommandApdu {
                    cla: if last { self.cla } else { self.cla | CLA_CHAINING },
                    ins: self.ins,
                    p1: self.p1,
                    p2: self.p2,
                    data: self.data.slice(start..end),
                    ne: if last { self.ne.min(MAX_SHORT_NE) } else { 0 },
                }
            })
            .collect()
    }
}

fn short_ne(le: u8) -> usize {
    if le == 0 { MAX_SHORT_NE } else { le as usize }
}

fn extended_ne(hi: u8, lo: u8) -> usize {
    match u16::from_be_bytes([hi, lo]) {
        0 => MAX_EXTENDED_NE,
        n => n as usize,
    }
}

/// Response APDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseApdu {
    data: Bytes,
    sw: StatusWord,
}

impl ResponseApdu {
    /// Create a response from payload and status word
    pub fn new(data: impl Into<Bytes>, sw: impl Into<StatusWord>) -> Self {
        Self {
            data: data.into(),
            sw: sw.into(),
        }
    }

    /// `90 00` response with payload
    pub fn success(data: impl Into<Bytes>) -> Self {
        Self::new(data, StatusWord::SUCCESS)
    }

    /// Payload-free response carrying only a status word
    pub fn status(sw: impl Into<StatusWord>) -> Self {
        Self::new(Bytes::new(), sw)
    }

    /// Parse `Data SW1 SW2`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 2 {
            return Err(Error::MalformedResponse(format!(
                "response APDU needs at least 2 bytes, got {}",
                bytes.len()
            )));
        }
        let split = bytes.len() - 2;
        Ok(Self {
            data: Bytes::copy_from_slice(&bytes[..split]),
            sw: StatusWord::new(bytes[split], bytes[split + 1]),
        })
    }

    /// Serialize back to `Data SW1 SW2`
    pub fn to_bytes(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(self.data.len() + 2);
        buffer.put_slice(&self.data);
        buffer.put_u8(self.sw.sw1);
        buffer.put_u8(self.sw.sw2);
        buffer.freeze()
    }

    /// Response payload
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Take the payload
    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// Status word
    pub fn sw(&self) -> StatusWord {
        self.sw
    }

    /// Whether SW is `90 00`
    pub fn is_success(&self) -> bool {
        self.sw.is_success()
    }
}
