//! PIV signatures and PIN handling against a simulated card

mod common;

use std::sync::Arc;

use common::{Applet, FakeCard, init_tracing};
use hex_literal::hex;
use hwkey::piv::{AID, HashAlgorithm, KeyAlgorithm, KeyReference};
use hwkey::{Error, Pin, PivApplet};
use hwkey_transport::{CommandApdu, ResponseApdu, StatusWord};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

fn padded(pin: &str) -> Vec<u8> {
    let mut field = pin.as_bytes().to_vec();
    field.resize(8, 0xFF);
    field
}

fn tlv(tag: u8, value: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    match value.len() {
        len @ 0..=0x7F => out.push(len as u8),
        len @ 0x80..=0xFF => out.extend_from_slice(&[0x81, len as u8]),
        len => {
            out.push(0x82);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
    }
    out.extend_from_slice(value);
    out
}

struct FakePivCard {
    pin: String,
    puk: String,
    retries: u8,
    verified: bool,
    received: Vec<CommandApdu>,
}

impl FakePivCard {
    fn new() -> Self {
        Self {
            pin: "123456".to_owned(),
            puk: "12345678".to_owned(),
            retries: 3,
            verified: false,
            received: Vec::new(),
        }
    }

    fn count(&self, ins: u8) -> usize {
        self.received.iter().filter(|c| c.ins == ins).count()
    }

    fn last(&self, ins: u8) -> Option<&CommandApdu> {
        self.received.iter().rev().find(|c| c.ins == ins)
    }

    fn verify(&mut self, data: &[u8]) -> ResponseApdu {
        if self.retries == 0 {
            return ResponseApdu::status(StatusWord::AUTH_METHOD_BLOCKED);
        }
        if data == padded(&self.pin) {
            self.retries = 3;
            self.verified = true;
            return ResponseApdu::success(Vec::new());
        }
        self.retries -= 1;
        self.verified = false;
        match self.retries {
            0 => ResponseApdu::status(StatusWord::AUTH_METHOD_BLOCKED),
            n => ResponseApdu::status(StatusWord::new(0x63, 0xC0 | n)),
        }
    }

    fn reset_retry_counter(&mut self, data: &[u8]) -> ResponseApdu {
        let (puk, new_pin) = data.split_at(8);
        if puk != padded(&self.puk) {
            return ResponseApdu::status(StatusWord::new(0x63, 0xC2));
        }
        let len = new_pin.iter().position(|&b| b == 0xFF).unwrap_or(8);
        self.pin = String::from_utf8(new_pin[..len].to_vec()).unwrap();
        self.retries = 3;
        ResponseApdu::success(Vec::new())
    }

    fn general_authenticate(&mut self, algorithm: u8) -> ResponseApdu {
        if !self.verified {
            return ResponseApdu::status(StatusWord::SECURITY_STATUS_NOT_SATISFIED);
        }
        let signature = match algorithm {
            0x07 => vec![0x5A; 256],
            _ => vec![0x30; 71],
        };
        ResponseApdu::success(tlv(0x7C, &tlv(0x82, &signature)))
    }
}

impl Applet for FakePivCard {
    fn process(&mut self, command: &CommandApdu) -> ResponseApdu {
        self.received.push(command.clone());
        match (command.ins, command.p1, command.p2) {
            (0xA4, 0x04, _) if command.data().starts_with(&AID) => {
                self.verified = false;
                ResponseApdu::success(Vec::new())
            }
            (0xA4, _, _) => ResponseApdu::status(StatusWord::FILE_NOT_FOUND),
            (0x20, 0x00, 0x80) => self.verify(command.data()),
            (0x2C, 0x00, 0x80) if command.data().len() == 16 => self.reset_retry_counter(command.data()),
            (0x87, algorithm, _) => self.general_authenticate(algorithm),
            _ => ResponseApdu::status(StatusWord::INS_NOT_SUPPORTED),
        }
    }
}

fn select() -> (PivApplet<FakeCard<FakePivCard>>, Arc<Mutex<FakePivCard>>) {
    let card = FakeCard::new(FakePivCard::new());
    let state = card.applet();
    let mut applet = PivApplet::new(card);
    applet.select().expect("select");
    (applet, state)
}

#[test]
fn test_sign_with_ec_key() {
    init_tracing();
    let (mut applet, state) = select();
    let hash = Sha256::digest(b"payload");
    let pin = Pin::new("123456");

    let signature = applet
        .sign(&pin, KeyReference::Signature, KeyAlgorithm::EccP256, &hash, HashAlgorithm::Sha256)
        .unwrap();
    assert_eq!(signature, vec![0x30; 71]);
    assert!(applet.is_pin_verified());

    {
        let card = state.lock();
        let command = card.last(0x87).unwrap();
        assert_eq!((command.p1, command.p2), (0x11, 0x9C));
        let mut expected = hex!("7C 24 82 00 81 20").to_vec();
        expected.extend_from_slice(&hash);
        assert_eq!(command.data(), &expected[..]);
    }

    // The PIN is verified once per session
    applet
        .sign(&pin, KeyReference::Authentication, KeyAlgorithm::EccP256, &hash, HashAlgorithm::Sha256)
        .unwrap();
    let card = state.lock();
    assert_eq!(card.count(0x20), 1);
    assert_eq!(card.count(0x87), 2);
}

#[test]
fn test_sign_with_rsa_key() {
    init_tracing();
    let (mut applet, state) = select();
    let hash = Sha256::digest(b"payload");

    let signature = applet
        .sign(
            &Pin::new("123456"),
            KeyReference::KeyManagement,
            KeyAlgorithm::Rsa2048,
            &hash,
            HashAlgorithm::Sha256,
        )
        .unwrap();
    assert_eq!(signature.len(), 256);

    let card = state.lock();
    let command = card.last(0x87).unwrap();
    assert_eq!((command.p1, command.p2), (0x07, 0x9D));
    let data = command.data();
    assert_eq!(&data[..13], &hex!("7C 82 01 06 82 00 81 82 01 00 00 01 FF"));
    assert_eq!(data.len(), 4 + 262);
    let digest_info = &data[data.len() - 51..];
    assert_eq!(&digest_info[..19], &hex!("3031300d060960864801650304020105000420"));
    assert_eq!(&digest_info[19..], &hash[..]);
    assert_eq!(data[data.len() - 52], 0x00);
}

#[test]
fn test_wrong_pin_then_reset_with_puk() {
    init_tracing();
    let (mut applet, state) = select();
    let wrong = Pin::new("000000");

    assert_eq!(applet.verify_pin(&wrong), Err(Error::SecurityStatus { retries: Some(2) }));
    assert_eq!(applet.verify_pin(&wrong), Err(Error::SecurityStatus { retries: Some(1) }));
    assert_eq!(applet.verify_pin(&wrong), Err(Error::Blocked));
    assert_eq!(applet.verify_pin(&Pin::new("123456")), Err(Error::Blocked));

    let hash = [0u8; 32];
    assert_eq!(
        applet.sign(&Pin::new("123456"), KeyReference::Signature, KeyAlgorithm::EccP256, &hash, HashAlgorithm::Sha256),
        Err(Error::Blocked)
    );
    assert_eq!(state.lock().count(0x87), 0);

    assert_eq!(
        applet.reset_retry_counter(&Pin::new("00000000"), &Pin::new("2468")),
        Err(Error::SecurityStatus { retries: Some(2) })
    );
    applet
        .reset_retry_counter(&Pin::new("12345678"), &Pin::new("2468"))
        .unwrap();
    assert_eq!(state.lock().pin, "2468");

    applet
        .sign(&Pin::new("2468"), KeyReference::Signature, KeyAlgorithm::EccP256, &hash, HashAlgorithm::Sha256)
        .unwrap();
}

#[test]
fn test_rejected_before_io() {
    init_tracing();
    let (mut applet, state) = select();
    let before = state.lock().received.len();

    assert_eq!(applet.verify_pin(&Pin::new("")), Err(Error::PinTooShort));
    assert_eq!(applet.verify_pin(&Pin::new("123456789")), Err(Error::PinTooLong));
    assert_eq!(state.lock().received.len(), before);

    // Hash length is checked before GENERAL AUTHENTICATE
    assert!(matches!(
        applet.sign(&Pin::new("123456"), KeyReference::Signature, KeyAlgorithm::EccP384, &[0u8; 32], HashAlgorithm::Sha384),
        Err(Error::Protocol(_))
    ));
    assert_eq!(state.lock().count(0x87), 0);
}

#[test]
fn test_missing_applet() {
    init_tracing();
    struct Empty;
    impl Applet for Empty {
        fn process(&mut self, _: &CommandApdu) -> ResponseApdu {
            ResponseApdu::status(StatusWord::FILE_NOT_FOUND)
        }
    }

    let mut applet = PivApplet::new(FakeCard::new(Empty));
    assert!(matches!(applet.select(), Err(Error::Unsupported(_))));
}
