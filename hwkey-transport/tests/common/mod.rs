//! In-memory HID authenticator for link tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use hwkey_transport::ctaphid::{Capabilities, Cmd, InitResponse, Message, Packet};
use hwkey_transport::{Error, HidDevice, Reassembler, Result};

/// Produces the device's packets for each complete host message
pub type Responder = Box<dyn FnMut(&Message) -> Vec<Packet> + Send>;

/// Channel id handed out by [`init_reply`]
pub const DEVICE_CID: u32 = 0x1234_5678;

/// HID device that answers host messages from a scripted responder
pub struct FakeHidDevice {
    assembling: Option<Reassembler>,
    outbox: VecDeque<Packet>,
    responder: Responder,
    /// Every complete message written by the host
    pub received: Vec<Message>,
    /// Reject all writes
    pub fail_writes: bool,
    /// Time each packet write blocks for
    pub write_delay: Duration,
    /// Packets accepted so far
    pub packets_written: usize,
}

impl FakeHidDevice {
    pub fn new(responder: Responder) -> Self {
        Self {
            assembling: None,
            outbox: VecDeque::new(),
            responder,
            received: Vec::new(),
            fail_writes: false,
            write_delay: Duration::ZERO,
            packets_written: 0,
        }
    }

    /// Number of received messages with the given command
    pub fn count(&self, cmd: Cmd) -> usize {
        self.received.iter().filter(|m| m.cmd == cmd).count()
    }
}

impl HidDevice for FakeHidDevice {
    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        if self.fail_writes {
            return Err(Error::Enqueue("device queue full".into()));
        }
        thread::sleep(self.write_delay);
        self.packets_written += 1;

        let reassembler = self
            .assembling
            .get_or_insert_with(|| Reassembler::new(packet.cid()));
        if let Some(message) = reassembler.feed(packet)? {
            self.assembling = None;
            self.outbox.extend((self.responder)(&message));
            self.received.push(message);
        }
        Ok(())
    }

    fn read_packet(&mut self, _timeout: Duration) -> Result<Option<Packet>> {
        Ok(self.outbox.pop_front())
    }
}

/// Fragment a device message
pub fn reply(cid: u32, cmd: Cmd, data: &[u8]) -> Vec<Packet> {
    Message::new(cid, cmd, data.to_vec()).to_packets().unwrap()
}

/// INIT response echoing the request nonce and allocating [`DEVICE_CID`]
pub fn init_reply(request: &Message) -> Vec<Packet> {
    let mut nonce = [0u8; 8];
    nonce.copy_from_slice(&request.data[..8]);
    let response = InitResponse {
        nonce,
        cid: DEVICE_CID,
        protocol_version: 2,
        major: 1,
        minor: 2,
        build: 3,
        capabilities: Capabilities::from_bits(Capabilities::WINK | Capabilities::CBOR),
    };
    reply(request.cid, Cmd::Init, &response.to_bytes())
}

/// Responder that handles INIT and echoes every other command back
pub fn echo_authenticator() -> Responder {
    Box::new(|message| match message.cmd {
        Cmd::Init => init_reply(message),
        cmd => reply(message.cid, cmd, &message.data),
    })
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
