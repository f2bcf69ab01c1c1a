//! CTAPHID response reassembly
//!
//! Collects the packets of one response message on the channel the host is
//! listening on. Frames addressed to other channels are skipped while no
//! message is in progress; once a message has started, every continuation
//! must come from the same channel in strict sequence order.

use crate::ctaphid::{Cmd, INIT_PAYLOAD_SIZE, MAX_MESSAGE_SIZE, Message, Packet};
use crate::error::{Error, Result};

use tracing::trace;

/// Partially received message
#[derive(Debug)]
struct Partial {
    cmd: Cmd,
    expected_len: usize,
    data: Vec<u8>,
    next_seq: u8,
}

impl Partial {
    fn is_complete(&self) -> bool {
        self.data.len() >= self.expected_len
    }
}

/// Reassembles one message at a time for a single channel
#[derive(Debug)]
pub struct Reassembler {
    cid: u32,
    partial: Option<Partial>,
}

impl Reassembler {
    /// Listen on `cid`
    pub fn new(cid: u32) -> Self {
        Self { cid, partial: None }
    }

    /// Channel being listened on
    pub fn cid(&self) -> u32 {
        self.cid
    }

    /// Whether no message is in progress
    pub fn is_idle(&self) -> bool {
        self.partial.is_none()
    }

    /// Abandon a partially received message
    pub fn reset(&mut self) {
        self.partial = None;
    }

    /// Feed one packet
    ///
    /// # Returns
    ///
    /// `Some(message)` once the final fragment has arrived, `None` while more
    /// packets are needed or when the packet was skipped.
    ///
    /// # Errors
    ///
    /// Any framing error abandons the message in progress.
    pub fn feed(&mut self, packet: &Packet) -> Result<Option<Message>> {
        let result = match self.partial.take() {
            None => self.start(packet),
            Some(partial) => self.resume(partial, packet),
        };
        if result.is_err() {
            self.partial = None;
        }
        result
    }

    fn start(&mut self, packet: &Packet) -> Result<Option<Message>> {
        if packet.cid() != self.cid {
            trace!(
                cid = format_args!("{:08x}", packet.cid()),
                "Skipping frame for foreign channel"
            );
            return Ok(None);
        }

        let Some(len) = packet.payload_len() else {
            return Err(Error::InvalidSequence {
                expected: 0,
                actual: packet.seq().unwrap_or_default(),
            });
        };
        let cmd = packet.cmd().ok_or(Error::InvalidCommand)?;
        let expected_len = len as usize;
        if expected_len > MAX_MESSAGE_SIZE {
            return Err(Error::MessageTooLarge);
        }

        let head = expected_len.min(INIT_PAYLOAD_SIZE);
        let mut data = Vec::with_capacity(expected_len);
        data.extend_from_slice(&packet.payload()[..head]);

        let partial = Partial {
            cmd,
            expected_len,
            data,
            next_seq: 0,
        };
        Ok(self.finish_or_store(partial))
    }

    fn resume(&mut self, mut partial: Partial, packet: &Packet) -> Result<Option<Message>> {
        if packet.cid() != self.cid {
            return Err(Error::InvalidChannel {
                expected: self.cid,
                actual: packet.cid(),
            });
        }

        let Some(seq) = packet.seq() else {
            return Err(Error::FragmentationError);
        };
        if seq != partial.next_seq {
            return Err(Error::InvalidSequence {
                expected: partial.next_seq,
                actual: seq,
            });
        }

        let take = (partial.expected_len - partial.data.len()).min(packet.payload().len());
        partial.data.extend_from_slice(&packet.payload()[..take]);
        partial.next_seq = partial.next_seq.wrapping_add(1);

        Ok(self.finish_or_store(partial))
    }

    fn finish_or_store(&mut self, partial: Partial) -> Option<Message> {
        if partial.is_complete() {
            Some(Message::new(self.cid, partial.cmd, partial.data))
        } else {
            self.partial = Some(partial);
            None
        }
    }
}

/// Reassemble a complete packet sequence in one call
pub fn reassemble(cid: u32, packets: &[Packet]) -> Result<Message> {
    let mut reassembler = Reassembler::new(cid);
    for packet in packets {
        if let Some(message) = reassembler.feed(packet)? {
            return Ok(message);
        }
    }
    Err(Error::FragmentationError)
}
