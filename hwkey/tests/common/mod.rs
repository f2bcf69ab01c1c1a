//! In-memory security keys for engine tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use hwkey::diagnostics::DiagnosticsSink;
use hwkey::Error;
use hwkey_crypto::ecdh::KeyPair;
use hwkey_crypto::pin_protocol::v1;
use hwkey_ctap::authenticator_data::flags;
use hwkey_ctap::commands::encode_response;
use hwkey_ctap::{
    AttestationObject, AttestedCredentialData, AuthenticatorData, AuthenticatorInfo, CborValue,
    ClientPinResponse, CoseAlgorithm, CoseKey, GetAssertionResponse, InfoOptions, MapBuilder,
    MapParser, PublicKeyCredentialDescriptor, StatusCode, Subcommand, User, cbor,
};
use hwkey_transport::{CommandApdu, ResponseApdu, StatusWord, Transport};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

pub const RP_ID: &str = "example.com";

/// Key handle of the one credential every fake authenticator holds
pub const KEY_HANDLE: [u8; 48] = [0x4B; 48];

pub const USER_ID: [u8; 8] = [0x75; 8];

pub const AAGUID: [u8; 16] = [0xA7; 16];

/// Assertion signature returned by both protocol paths
pub const ASSERTION_SIGNATURE: [u8; 71] = [0x30; 71];

/// Platform and device scalars of the PIN protocol vectors
pub const PLATFORM_SECRET: [u8; 32] = [0x11; 32];
pub const DEVICE_SECRET: [u8; 32] = [0x22; 32];

const CREDENTIAL_SECRET: [u8; 32] = [0x33; 32];

const FIDO_AID: [u8; 8] = [0xA0, 0x00, 0x00, 0x06, 0x47, 0x2F, 0x00, 0x01];
const OPENPGP_AID: [u8; 6] = [0xD2, 0x76, 0x00, 0x01, 0x24, 0x01];

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn rp_id_hash(rp_id: &str) -> [u8; 32] {
    Sha256::digest(rp_id.as_bytes()).into()
}

pub fn descriptor(id: &[u8]) -> PublicKeyCredentialDescriptor {
    PublicKeyCredentialDescriptor::new(id.to_vec())
}

/// Something that answers command APDUs
pub trait Applet: Send {
    fn process(&mut self, command: &CommandApdu) -> ResponseApdu;
}

/// [`Transport`] over an in-memory applet
///
/// The applet stays reachable through [`FakeCard::applet`] after the card is
/// moved into a connection.
pub struct FakeCard<A> {
    applet: Arc<Mutex<A>>,
    unplugged: Arc<AtomicBool>,
    connected: bool,
}

impl<A: Applet> FakeCard<A> {
    pub fn new(applet: A) -> Self {
        Self {
            applet: Arc::new(Mutex::new(applet)),
            unplugged: Arc::new(AtomicBool::new(false)),
            connected: false,
        }
    }

    pub fn applet(&self) -> Arc<Mutex<A>> {
        Arc::clone(&self.applet)
    }

    /// Flag that makes the card vanish when set
    pub fn unplug_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.unplugged)
    }
}

impl<A: Applet> Transport for FakeCard<A> {
    fn connect(&mut self) -> hwkey_transport::Result<()> {
        if self.unplugged.load(Ordering::SeqCst) {
            return Err(hwkey_transport::Error::DeviceNotFound);
        }
        self.connected = true;
        Ok(())
    }

    fn transceive(&mut self, command: &CommandApdu) -> hwkey_transport::Result<ResponseApdu> {
        if self.unplugged.load(Ordering::SeqCst) {
            self.connected = false;
        }
        if !self.connected {
            return Err(hwkey_transport::Error::NotConnected);
        }
        Ok(self.applet.lock().process(command))
    }

    fn release(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn is_extended_length_supported(&self) -> bool {
        true
    }
}

/// Called before the fake authenticator answers a request needing a touch
pub type TouchHook = Box<dyn FnMut() + Send>;

/// FIDO authenticator speaking U2F and/or CTAP2 with PIN protocol one
///
/// Keys are fixed so two instances produce byte-identical credentials.
pub struct FakeAuthenticator {
    pub u2f: bool,
    pub ctap2: bool,
    pub resident_keys: bool,
    pub pin_supported: bool,
    pub pin: Option<String>,
    pub retries: u8,
    /// Touch requests answered with `69 85` before one succeeds
    pub presence_pending: usize,
    pub counter: u32,
    pub on_touch: Option<TouchHook>,
    /// Every command received
    pub received: Vec<CommandApdu>,
    pub pin_token_requests: usize,
    pub last_pin_hash_enc: Option<Vec<u8>>,
    pub last_pin_auth: Option<Vec<u8>>,
    key_agreement: KeyPair,
    token: Vec<u8>,
}

impl FakeAuthenticator {
    /// FIDO2 key that also answers U2F, with clientPin but no PIN set
    pub fn fido2() -> Self {
        Self {
            u2f: true,
            ctap2: true,
            resident_keys: false,
            pin_supported: true,
            pin: None,
            retries: 8,
            presence_pending: 0,
            counter: 0,
            on_touch: None,
            received: Vec::new(),
            pin_token_requests: 0,
            last_pin_hash_enc: None,
            last_pin_auth: None,
            key_agreement: KeyPair::from_bytes(&DEVICE_SECRET).unwrap(),
            token: (0u8..16).collect(),
        }
    }

    /// U2F-only key
    pub fn u2f_only() -> Self {
        Self {
            ctap2: false,
            pin_supported: false,
            ..Self::fido2()
        }
    }

    pub fn with_pin(mut self, pin: &str, retries: u8) -> Self {
        self.pin = Some(pin.to_owned());
        self.retries = retries;
        self
    }

    pub fn with_resident_keys(mut self) -> Self {
        self.resident_keys = true;
        self
    }

    pub fn with_presence_pending(mut self, count: usize) -> Self {
        self.presence_pending = count;
        self
    }

    pub fn with_touch_hook(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.on_touch = Some(Box::new(hook));
        self
    }

    /// Number of received commands with the given INS
    pub fn count(&self, ins: u8) -> usize {
        self.received.iter().filter(|c| c.ins == ins).count()
    }

    /// Forget the issued PIN token, as a power cycle does
    pub fn rotate_pin_token(&mut self) {
        self.token = (16u8..32).collect();
    }

    /// Wait for the touch, or ask the host to retry
    fn touch(&mut self) -> bool {
        if let Some(hook) = self.on_touch.as_mut() {
            hook();
        }
        if self.presence_pending > 0 {
            self.presence_pending -= 1;
            return false;
        }
        true
    }

    fn credential_key() -> CoseKey {
        let (x, y) = KeyPair::from_bytes(&CREDENTIAL_SECRET).unwrap().public_key_cose();
        CoseKey::new(CoseAlgorithm::Es256, x, y)
    }

    fn certificate() -> Vec<u8> {
        let mut cert = vec![0x30, 0x82, 0x01, 0x00];
        cert.extend_from_slice(&[0x5A; 256]);
        cert
    }

    fn registration_auth_data(&self, rp_id_hash: [u8; 32], aaguid: [u8; 16], uv: bool) -> Vec<u8> {
        AuthenticatorData {
            rp_id_hash,
            flags: flags::UP | flags::AT | if uv { flags::UV } else { 0 },
            sign_count: 0,
            attested_credential_data: Some(AttestedCredentialData {
                aaguid,
                credential_id: KEY_HANDLE.to_vec(),
                credential_public_key: cbor::encode(&Self::credential_key().to_cbor()).unwrap(),
            }),
            extensions: None,
        }
        .to_bytes()
    }

    fn assertion_auth_data(&mut self, rp_id_hash: [u8; 32], uv: bool) -> Vec<u8> {
        self.counter += 1;
        let mut data = rp_id_hash.to_vec();
        data.push(flags::UP | if uv { flags::UV } else { 0 });
        data.extend_from_slice(&self.counter.to_be_bytes());
        data
    }

    fn select(&mut self, command: &CommandApdu) -> ResponseApdu {
        if command.data() != FIDO_AID {
            return ResponseApdu::status(StatusWord::FILE_NOT_FOUND);
        }
        let version: &[u8] = if self.u2f { b"U2F_V2" } else { b"FIDO_2_0" };
        ResponseApdu::success(version.to_vec())
    }

    fn u2f_register(&mut self, command: &CommandApdu) -> ResponseApdu {
        let data = command.data();
        if data.len() != 64 {
            return ResponseApdu::status(StatusWord::WRONG_LENGTH);
        }
        if !self.touch() {
            return ResponseApdu::status(StatusWord::CONDITIONS_NOT_SATISFIED);
        }

        let mut response = vec![0x05];
        response.extend_from_slice(&Self::credential_key().to_uncompressed());
        response.push(KEY_HANDLE.len() as u8);
        response.extend_from_slice(&KEY_HANDLE);
        response.extend_from_slice(&Self::certificate());
        response.extend_from_slice(&[0x30; 71]);
        ResponseApdu::success(response)
    }

    fn u2f_authenticate(&mut self, command: &CommandApdu) -> ResponseApdu {
        let data = command.data();
        if data.len() < 65 || data.len() != 65 + usize::from(data[64]) {
            return ResponseApdu::status(StatusWord::WRONG_LENGTH);
        }
        let app_id: [u8; 32] = data[32..64].try_into().unwrap();
        if data[65..] != KEY_HANDLE {
            return ResponseApdu::status(StatusWord::WRONG_DATA);
        }
        if command.p1 == 0x07 {
            return ResponseApdu::status(StatusWord::CONDITIONS_NOT_SATISFIED);
        }
        if !self.touch() {
            return ResponseApdu::status(StatusWord::CONDITIONS_NOT_SATISFIED);
        }

        // flags || counter, without the rpIdHash
        let auth_data = self.assertion_auth_data(app_id, false);
        let mut response = auth_data[32..].to_vec();
        response.extend_from_slice(&ASSERTION_SIGNATURE);
        ResponseApdu::success(response)
    }

    fn ctap2(&mut self, request: &[u8]) -> ResponseApdu {
        let Some((&command, body)) = request.split_first() else {
            return Self::status(StatusCode::InvalidLength);
        };
        let params = if body.is_empty() {
            None
        } else {
            match cbor::decode(body) {
                Ok(value) => Some(value),
                Err(_) => return Self::status(StatusCode::InvalidCbor),
            }
        };

        let result = match (command, params.as_ref()) {
            (0x04, _) => Ok(self.info().to_cbor()),
            (0x06, Some(params)) => self.client_pin(params),
            (0x01, Some(params)) => self.make_credential(params),
            (0x02, Some(params)) => self.get_assertion(params),
            _ => Err(StatusCode::InvalidCommand),
        };
        match result {
            Ok(body) => ResponseApdu::success(encode_response(Some(&body)).unwrap()),
            Err(status) => Self::status(status),
        }
    }

    fn status(status: StatusCode) -> ResponseApdu {
        ResponseApdu::success(vec![status.to_u8()])
    }

    pub fn info(&self) -> AuthenticatorInfo {
        let mut versions = vec!["FIDO_2_0".to_owned()];
        if self.u2f {
            versions.insert(0, "U2F_V2".to_owned());
        }
        AuthenticatorInfo {
            versions,
            extensions: Vec::new(),
            aaguid: AAGUID,
            options: InfoOptions {
                rk: Some(self.resident_keys),
                client_pin: self.pin_supported.then_some(self.pin.is_some()),
                up: Some(true),
                ..InfoOptions::default()
            },
            max_msg_size: Some(1200),
            pin_protocols: if self.pin_supported { vec![1] } else { Vec::new() },
        }
    }

    fn session_secret(&self, params: &MapParser<'_>) -> Result<[u8; 32], StatusCode> {
        let platform = params
            .get_opt(3)
            .and_then(|key| CoseKey::from_cbor(key).ok())
            .ok_or(StatusCode::MissingParameter)?;
        let ecdh = self
            .key_agreement
            .shared_secret_from_coordinates(&platform.x, &platform.y)
            .map_err(|_| StatusCode::InvalidParameter)?;
        Ok(*v1::shared_secret(&ecdh))
    }

    /// Compare a pinHashEnc against the stored PIN, spending an attempt on mismatch
    fn check_pin_hash(&mut self, secret: &[u8; 32], pin_hash_enc: &[u8]) -> Result<(), StatusCode> {
        if self.retries == 0 {
            return Err(StatusCode::PinBlocked);
        }
        let pin = self.pin.clone().ok_or(StatusCode::PinNotSet)?;
        let decrypted = v1::decrypt(secret, pin_hash_enc).map_err(|_| StatusCode::InvalidParameter)?;
        if decrypted[..] == v1::hash_pin(&pin)[..] {
            self.retries = 8;
            return Ok(());
        }
        self.retries -= 1;
        if self.retries == 0 {
            Err(StatusCode::PinBlocked)
        } else {
            Err(StatusCode::PinInvalid)
        }
    }

    fn decrypt_new_pin(secret: &[u8; 32], new_pin_enc: &[u8]) -> Result<String, StatusCode> {
        let padded = v1::decrypt(secret, new_pin_enc).map_err(|_| StatusCode::InvalidParameter)?;
        let end = padded.iter().position(|&b| b == 0).unwrap_or(padded.len());
        String::from_utf8(padded[..end].to_vec()).map_err(|_| StatusCode::PinPolicyViolation)
    }

    fn client_pin(&mut self, params: &CborValue) -> Result<CborValue, StatusCode> {
        if !self.pin_supported {
            return Err(StatusCode::InvalidCommand);
        }
        let params = MapParser::new(params).map_err(|_| StatusCode::InvalidCbor)?;
        let subcommand = params
            .unsigned(2)
            .ok()
            .and_then(|s| Subcommand::from_u8(s as u8))
            .ok_or(StatusCode::InvalidParameter)?;
        let bytes = |key| params.bytes_opt(key).ok().flatten().map(<[u8]>::to_vec);

        let response = match subcommand {
            Subcommand::GetRetries => ClientPinResponse {
                retries: Some(u64::from(self.retries)),
                ..ClientPinResponse::default()
            },
            Subcommand::GetKeyAgreement => {
                let (x, y) = self.key_agreement.public_key_cose();
                ClientPinResponse {
                    key_agreement: Some(CoseKey::new(CoseAlgorithm::EcdhEsHkdf256, x, y)),
                    ..ClientPinResponse::default()
                }
            }
            Subcommand::GetPinToken => {
                self.pin_token_requests += 1;
                let secret = self.session_secret(&params)?;
                let pin_hash_enc = bytes(6).ok_or(StatusCode::MissingParameter)?;
                self.last_pin_hash_enc = Some(pin_hash_enc.clone());
                self.check_pin_hash(&secret, &pin_hash_enc)?;
                ClientPinResponse {
                    pin_token: Some(v1::encrypt(&secret, &self.token).unwrap()),
                    ..ClientPinResponse::default()
                }
            }
            Subcommand::SetPin => {
                if self.pin.is_some() {
                    return Err(StatusCode::PinAuthInvalid);
                }
                let secret = self.session_secret(&params)?;
                let new_pin_enc = bytes(5).ok_or(StatusCode::MissingParameter)?;
                let pin_auth = bytes(4).ok_or(StatusCode::MissingParameter)?;
                if !v1::verify(&secret, &new_pin_enc, &pin_auth) {
                    return Err(StatusCode::PinAuthInvalid);
                }
                self.pin = Some(Self::decrypt_new_pin(&secret, &new_pin_enc)?);
                ClientPinResponse::default()
            }
            Subcommand::ChangePin => {
                let secret = self.session_secret(&params)?;
                let new_pin_enc = bytes(5).ok_or(StatusCode::MissingParameter)?;
                let pin_hash_enc = bytes(6).ok_or(StatusCode::MissingParameter)?;
                let pin_auth = bytes(4).ok_or(StatusCode::MissingParameter)?;
                let auth_data = [new_pin_enc.as_slice(), pin_hash_enc.as_slice()].concat();
                if !v1::verify(&secret, &auth_data, &pin_auth) {
                    return Err(StatusCode::PinAuthInvalid);
                }
                self.check_pin_hash(&secret, &pin_hash_enc)?;
                self.pin = Some(Self::decrypt_new_pin(&secret, &new_pin_enc)?);
                ClientPinResponse::default()
            }
        };
        Ok(response.to_cbor())
    }

    /// Validate pinAuth against the token; `Ok(true)` when the user was verified
    fn check_pin_auth(&mut self, pin_auth: Option<&[u8]>, client_data_hash: &[u8]) -> Result<bool, StatusCode> {
        let Some(pin_auth) = pin_auth else {
            return Ok(false);
        };
        self.last_pin_auth = Some(pin_auth.to_vec());
        if self.pin.is_none() {
            return Err(StatusCode::PinNotSet);
        }
        if !v1::verify(&self.token, client_data_hash, pin_auth) {
            return Err(StatusCode::PinAuthInvalid);
        }
        Ok(true)
    }

    fn listed(list: Option<&[CborValue]>) -> bool {
        list.unwrap_or_default().iter().any(|entry| {
            entry
                .get_text("id")
                .and_then(CborValue::as_bytes)
                .is_some_and(|id| id == KEY_HANDLE)
        })
    }

    fn make_credential(&mut self, params: &CborValue) -> Result<CborValue, StatusCode> {
        let params = MapParser::new(params).map_err(|_| StatusCode::InvalidCbor)?;
        let client_data_hash = params.bytes(1).map_err(|_| StatusCode::MissingParameter)?.to_vec();
        let rp_id = params
            .get_opt(2)
            .and_then(|rp| rp.get_text("id"))
            .and_then(CborValue::as_text)
            .ok_or(StatusCode::MissingParameter)?
            .to_owned();

        if Self::listed(params.array_opt(5).ok().flatten()) {
            return Err(StatusCode::CredentialExcluded);
        }
        let pin_auth = params.bytes_opt(8).ok().flatten();
        if pin_auth.is_none() && self.pin.is_some() {
            return Err(StatusCode::PinRequired);
        }
        let uv = self.check_pin_auth(pin_auth, &client_data_hash)?;
        if !self.touch() {
            return Err(StatusCode::UserActionTimeout);
        }

        let attestation = AttestationObject {
            fmt: "packed".to_owned(),
            auth_data: self.registration_auth_data(rp_id_hash(&rp_id), AAGUID, uv),
            att_stmt: MapBuilder::new()
                .insert("alg", -7)
                .insert("sig", vec![0x30; 71])
                .insert("x5c", CborValue::Array(vec![CborValue::from(Self::certificate())]))
                .build(),
        };
        Ok(attestation.to_ctap2())
    }

    fn get_assertion(&mut self, params: &CborValue) -> Result<CborValue, StatusCode> {
        let params = MapParser::new(params).map_err(|_| StatusCode::InvalidCbor)?;
        let rp_id = params.text(1).map_err(|_| StatusCode::MissingParameter)?.to_owned();
        let client_data_hash = params.bytes(2).map_err(|_| StatusCode::MissingParameter)?.to_vec();
        let allow_list = params.array_opt(3).ok().flatten();

        let discoverable = allow_list.is_none_or(|list| list.is_empty());
        let found = if discoverable {
            self.resident_keys
        } else {
            Self::listed(allow_list)
        };
        if !found {
            return Err(StatusCode::NoCredentials);
        }

        let uv = self.check_pin_auth(params.bytes_opt(6).ok().flatten(), &client_data_hash)?;
        if !self.touch() {
            return Err(StatusCode::UserActionTimeout);
        }

        let response = GetAssertionResponse {
            credential: Some(PublicKeyCredentialDescriptor::new(KEY_HANDLE.to_vec())),
            auth_data: self.assertion_auth_data(rp_id_hash(&rp_id), uv),
            signature: ASSERTION_SIGNATURE.to_vec(),
            user: discoverable.then(|| User::new(USER_ID.to_vec())),
            number_of_credentials: None,
        };
        Ok(response.to_cbor())
    }
}

impl Applet for FakeAuthenticator {
    fn process(&mut self, command: &CommandApdu) -> ResponseApdu {
        self.received.push(command.clone());
        match (command.cla, command.ins) {
            (0x00, 0xA4) => self.select(command),
            (0x80, 0x10) if self.ctap2 => self.ctap2(command.data()),
            (0x00, 0x01) if self.u2f => self.u2f_register(command),
            (0x00, 0x02) if self.u2f => self.u2f_authenticate(command),
            (0x00, 0x03) if self.u2f => ResponseApdu::success(b"U2F_V2".to_vec()),
            _ => ResponseApdu::status(StatusWord::INS_NOT_SUPPORTED),
        }
    }
}

/// How a card reports a wrong PIN
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrongPinReply {
    /// `63 Cx` with the remaining tries
    RetryCounter,
    /// Bare `69 82`; the host reads DO C4 for the counter
    SecurityStatus,
}

/// OpenPGP card with PW1 and PW3
pub struct FakeOpenPgpCard {
    pub pw1: String,
    pub pw3: String,
    pub pw1_retries: u8,
    pub pw3_retries: u8,
    pub wrong_pin_reply: WrongPinReply,
    pub received: Vec<CommandApdu>,
    verified: [bool; 3],
}

impl FakeOpenPgpCard {
    pub fn new(wrong_pin_reply: WrongPinReply) -> Self {
        Self {
            pw1: "123456".to_owned(),
            pw3: "12345678".to_owned(),
            pw1_retries: 3,
            pw3_retries: 3,
            wrong_pin_reply,
            received: Vec::new(),
            verified: [false; 3],
        }
    }

    pub fn instructions(&self) -> Vec<u8> {
        self.received.iter().map(|c| c.ins).collect()
    }

    pub fn count(&self, ins: u8) -> usize {
        self.received.iter().filter(|c| c.ins == ins).count()
    }

    fn slot(reference: u8) -> Option<usize> {
        match reference {
            0x81 => Some(0),
            0x82 => Some(1),
            0x83 => Some(2),
            _ => None,
        }
    }

    fn pw_status(&self) -> ResponseApdu {
        ResponseApdu::success(vec![0x00, 0x7F, 0x7F, 0x7F, self.pw1_retries, 0x00, self.pw3_retries])
    }

    /// Check `presented` against PW1 or PW3, spending a try on mismatch
    fn check(&mut self, is_pw3: bool, presented: &[u8]) -> Result<(), StatusWord> {
        let (secret, retries) = if is_pw3 {
            (self.pw3.as_bytes(), &mut self.pw3_retries)
        } else {
            (self.pw1.as_bytes(), &mut self.pw1_retries)
        };
        if *retries == 0 {
            return Err(StatusWord::AUTH_METHOD_BLOCKED);
        }
        if presented == secret {
            *retries = 3;
            return Ok(());
        }
        *retries -= 1;
        Err(match self.wrong_pin_reply {
            WrongPinReply::RetryCounter if *retries == 0 => StatusWord::AUTH_METHOD_BLOCKED,
            WrongPinReply::RetryCounter => StatusWord::new(0x63, 0xC0 | *retries),
            WrongPinReply::SecurityStatus => StatusWord::SECURITY_STATUS_NOT_SATISFIED,
        })
    }

    fn verify(&mut self, command: &CommandApdu) -> ResponseApdu {
        let Some(slot) = Self::slot(command.p2) else {
            return ResponseApdu::status(StatusWord::WRONG_DATA);
        };
        match self.check(slot == 2, command.data()) {
            Ok(()) => {
                self.verified[slot] = true;
                ResponseApdu::success(Vec::new())
            }
            Err(sw) => {
                self.verified[slot] = false;
                ResponseApdu::status(sw)
            }
        }
    }

    fn change_pw3(&mut self, command: &CommandApdu) -> ResponseApdu {
        let data = command.data();
        let current_len = self.pw3.len();
        if data.len() <= current_len {
            return ResponseApdu::status(StatusWord::WRONG_LENGTH);
        }
        let (current, new) = data.split_at(current_len);
        if let Err(sw) = self.check(true, current) {
            return ResponseApdu::status(sw);
        }
        self.pw3 = String::from_utf8(new.to_vec()).unwrap();
        self.verified[2] = false;
        ResponseApdu::success(Vec::new())
    }

    fn reset_pw1(&mut self, command: &CommandApdu) -> ResponseApdu {
        if !self.verified[2] {
            return ResponseApdu::status(StatusWord::SECURITY_STATUS_NOT_SATISFIED);
        }
        self.pw1 = String::from_utf8(command.data().to_vec()).unwrap();
        self.pw1_retries = 3;
        ResponseApdu::success(Vec::new())
    }
}

impl Applet for FakeOpenPgpCard {
    fn process(&mut self, command: &CommandApdu) -> ResponseApdu {
        self.received.push(command.clone());
        match (command.ins, command.p1, command.p2) {
            (0xA4, _, _) if command.data() == OPENPGP_AID => {
                self.verified = [false; 3];
                ResponseApdu::success(Vec::new())
            }
            (0xA4, _, _) => ResponseApdu::status(StatusWord::FILE_NOT_FOUND),
            (0xCA, 0x00, 0xC4) => self.pw_status(),
            (0x20, 0x00, _) => self.verify(command),
            (0x24, 0x00, 0x83) => self.change_pw3(command),
            (0x2C, 0x02, 0x81) => self.reset_pw1(command),
            _ => ResponseApdu::status(StatusWord::INS_NOT_SUPPORTED),
        }
    }
}

/// Diagnostics sink that keeps everything it is given
#[derive(Default)]
pub struct RecordingDiagnostics {
    pub breadcrumbs: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<Error>>,
    pub tags: Mutex<Vec<(String, String)>>,
}

impl DiagnosticsSink for RecordingDiagnostics {
    fn breadcrumb(&self, message: &str) {
        self.breadcrumbs.lock().push(message.to_owned());
    }

    fn capture_error(&self, error: &Error) {
        self.errors.lock().push(error.clone());
    }

    fn set_tag(&self, key: &str, value: &str) {
        self.tags.lock().push((key.to_owned(), value.to_owned()));
    }
}
