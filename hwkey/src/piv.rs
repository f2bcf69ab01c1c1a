//! PIV applet: PIN verification and signatures through GENERAL AUTHENTICATE
//!
//! Spec: NIST SP 800-73-4, part 2, sections 3.2 and 3.3
//! <https://nvlpubs.nist.gov/nistpubs/SpecialPublications/NIST.SP.800-73-4.pdf>

use hwkey_transport::{CommandApdu, StatusWord, Transport};
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::exchange;
use crate::pin::Pin;

/// PIV application identifier, without version
pub const AID: [u8; 5] = [0xA0, 0x00, 0x00, 0x03, 0x08];

/// PIN and PUK field length; shorter values are padded with 0xFF
pub const PIN_FIELD_LEN: usize = 8;

const INS_VERIFY: u8 = 0x20;
const INS_RESET_RETRY_COUNTER: u8 = 0x2C;
const INS_GENERAL_AUTHENTICATE: u8 = 0x87;

/// Key reference of the PIV card application PIN
const PIN_REFERENCE: u8 = 0x80;

const TAG_DYNAMIC_AUTH: u8 = 0x7C;
const TAG_RESPONSE: u8 = 0x82;
const TAG_CHALLENGE: u8 = 0x81;

/// Chunk size for command chaining
const CHAIN_CHUNK: usize = 255;

/// Key slots usable for signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyReference {
    Authentication = 0x9A,
    Signature = 0x9C,
    KeyManagement = 0x9D,
    CardAuthentication = 0x9E,
}

/// Key algorithm in P1 of GENERAL AUTHENTICATE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa1024,
    Rsa2048,
    EccP256,
    EccP384,
}

impl KeyAlgorithm {
    pub fn id(self) -> u8 {
        match self {
            KeyAlgorithm::Rsa1024 => 0x06,
            KeyAlgorithm::Rsa2048 => 0x07,
            KeyAlgorithm::EccP256 => 0x11,
            KeyAlgorithm::EccP384 => 0x14,
        }
    }

    /// Modulus size of RSA keys
    pub fn rsa_bits(self) -> Option<usize> {
        match self {
            KeyAlgorithm::Rsa1024 => Some(1024),
            KeyAlgorithm::Rsa2048 => Some(2048),
            KeyAlgorithm::EccP256 | KeyAlgorithm::EccP384 => None,
        }
    }
}

/// Digest algorithm of the hash being signed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha1,
    Ripemd160,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Sha1 | HashAlgorithm::Ripemd160 => 20,
            HashAlgorithm::Sha224 => 28,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    /// DER DigestInfo header preceding the hash
    fn digest_info_prefix(self) -> &'static [u8] {
        match self {
            HashAlgorithm::Sha1 => &[
                0x30, 0x21, 0x30, 0x09, 0x06, 0x05, 0x2B, 0x0E, 0x03, 0x02, 0x1A, 0x05, 0x00, 0x04, 0x14,
            ],
            HashAlgorithm::Ripemd160 => &[
                0x30, 0x21, 0x30, 0x09, 0x06, 0x05, 0x2B, 0x24, 0x03, 0x02, 0x01, 0x05, 0x00, 0x04, 0x14,
            ],
            HashAlgorithm::Sha224 => &[
                0x30, 0x2D, 0x30, 0x0D, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x04,
                0x05, 0x00, 0x04, 0x1C,
            ],
            HashAlgorithm::Sha256 => &[
                0x30, 0x31, 0x30, 0x0D, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01,
                0x05, 0x00, 0x04, 0x20,
            ],
            HashAlgorithm::Sha384 => &[
                0x30, 0x41, 0x30, 0x0D, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x02,
                0x05, 0x00, 0x04, 0x30,
            ],
            HashAlgorithm::Sha512 => &[
                0x30, 0x51, 0x30, 0x0D, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x03,
                0x05, 0x00, 0x04, 0x40,
            ],
        }
    }
}

/// BER length octets
fn encode_length(out: &mut Vec<u8>, len: usize) -> Result<()> {
    match len {
        0..=0x7F => out.push(len as u8),
        0x80..=0xFF => out.extend_from_slice(&[0x81, len as u8]),
        0x100..=0xFFFF => {
            out.push(0x82);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
        _ => return Err(Error::protocol(format!("TLV value of {len} bytes is too long"))),
    }
    Ok(())
}

/// BER length at the start of `data`: (value length, octets consumed)
fn decode_length(data: &[u8]) -> Result<(usize, usize)> {
    let truncated = || Error::protocol("TLV length truncated");
    match *data.first().ok_or_else(truncated)? {
        len @ 0..=0x7F => Ok((usize::from(len), 1)),
        0x81 => Ok((usize::from(*data.get(1).ok_or_else(truncated)?), 2)),
        0x82 => {
            let bytes = data.get(1..3).ok_or_else(truncated)?;
            Ok((usize::from(u16::from_be_bytes([bytes[0], bytes[1]])), 3))
        }
        other => Err(Error::protocol(format!("unsupported TLV length form {other:02x}"))),
    }
}

/// Split one single-byte-tag TLV off the front of `data`
fn read_tlv(data: &[u8]) -> Result<(u8, &[u8], &[u8])> {
    let (&tag, rest) = data
        .split_first()
        .ok_or_else(|| Error::protocol("TLV truncated"))?;
    let (len, consumed) = decode_length(rest)?;
    let rest = &rest[consumed..];
    if rest.len() < len {
        return Err(Error::protocol(format!("TLV {tag:02x} truncated")));
    }
    let (value, remaining) = rest.split_at(len);
    Ok((tag, value, remaining))
}

/// EMSA-PKCS1-v1_5 encoding of `hash` for a modulus of `key_bits`
fn pkcs1_pad(hash: &[u8], hash_algorithm: HashAlgorithm, key_bits: usize) -> Result<Vec<u8>> {
    let prefix = hash_algorithm.digest_info_prefix();
    let block_len = key_bits / 8;
    let digest_info_len = prefix.len() + hash.len();
    // 00 01, at least eight FF, 00
    if block_len < digest_info_len + 11 {
        return Err(Error::protocol(format!(
            "{key_bits}-bit modulus too small for {hash_algorithm:?} DigestInfo"
        )));
    }

    let mut block = Vec::with_capacity(block_len);
    block.extend_from_slice(&[0x00, 0x01]);
    block.resize(block_len - digest_info_len - 1, 0xFF);
    block.push(0x00);
    block.extend_from_slice(prefix);
    block.extend_from_slice(hash);
    Ok(block)
}

/// Build the GENERAL AUTHENTICATE template for signing `hash`
///
/// RSA keys get a PKCS#1 v1.5 padded DigestInfo; EC keys sign the hash as is.
pub fn prepare_data(hash: &[u8], hash_algorithm: HashAlgorithm, key: KeyAlgorithm) -> Result<Vec<u8>> {
    if hash.len() != hash_algorithm.digest_len() {
        return Err(Error::protocol(format!(
            "bad hash length {}, expected {} for {hash_algorithm:?}",
            hash.len(),
            hash_algorithm.digest_len()
        )));
    }

    let challenge = match key.rsa_bits() {
        Some(bits) => pkcs1_pad(hash, hash_algorithm, bits)?,
        None => hash.to_vec(),
    };

    let mut inner = vec![TAG_RESPONSE, 0x00, TAG_CHALLENGE];
    encode_length(&mut inner, challenge.len())?;
    inner.extend_from_slice(&challenge);

    let mut template = vec![TAG_DYNAMIC_AUTH];
    encode_length(&mut template, inner.len())?;
    template.extend_from_slice(&inner);
    Ok(template)
}

/// Signature inside `7C { 82 sig }`
pub fn unpack_signature(data: &[u8]) -> Result<Vec<u8>> {
    let (tag, mut template, _) = read_tlv(data)?;
    if tag != TAG_DYNAMIC_AUTH {
        return Err(Error::protocol("malformed signature TLV, no 7C tag"));
    }
    while !template.is_empty() {
        let (tag, value, rest) = read_tlv(template)?;
        if tag == TAG_RESPONSE {
            return Ok(value.to_vec());
        }
        template = rest;
    }
    Err(Error::protocol("malformed signature TLV, no 82 tag"))
}

/// PIN padded to eight bytes with 0xFF
fn format_pin(pin: &Pin) -> Result<Zeroizing<Vec<u8>>> {
    let bytes = pin.as_str().as_bytes();
    if bytes.is_empty() {
        return Err(Error::PinTooShort);
    }
    if bytes.len() > PIN_FIELD_LEN {
        return Err(Error::PinTooLong);
    }
    let mut field = Zeroizing::new(Vec::with_capacity(PIN_FIELD_LEN));
    field.extend_from_slice(bytes);
    field.resize(PIN_FIELD_LEN, 0xFF);
    Ok(field)
}

/// PIV status word table
fn status_error(sw: StatusWord) -> Error {
    if let Some(retries) = sw.retries_remaining() {
        return match retries {
            0 => Error::Blocked,
            n => Error::SecurityStatus { retries: Some(n) },
        };
    }
    match sw {
        StatusWord::AUTH_METHOD_BLOCKED => Error::Blocked,
        StatusWord::SECURITY_STATUS_NOT_SATISFIED => Error::SecurityStatus { retries: None },
        StatusWord::FILE_NOT_FOUND => Error::unsupported("PIV applet not found"),
        StatusWord::INS_NOT_SUPPORTED => Error::unsupported("instruction not supported"),
        StatusWord::CLA_NOT_SUPPORTED => Error::unsupported("class not supported"),
        other => Error::protocol(format!("unexpected status word {other}")),
    }
}

/// Session with the PIV applet of a card
pub struct PivApplet<T> {
    transport: T,
    pin_verified: bool,
}

impl<T: Transport> PivApplet<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            pin_verified: false,
        }
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    fn communicate(&mut self, command: &CommandApdu) -> Result<Vec<u8>> {
        let response = exchange::transmit(&mut self.transport, command, CHAIN_CHUNK)?;
        if !response.is_success() {
            return Err(status_error(response.sw()));
        }
        Ok(response.data().to_vec())
    }

    /// Connect if needed and select the applet
    pub fn select(&mut self) -> Result<()> {
        if !self.transport.is_connected() {
            self.transport.connect()?;
        }
        self.pin_verified = false;
        self.communicate(&CommandApdu::select(&AID))?;
        debug!("Selected PIV applet");
        Ok(())
    }

    pub fn is_pin_verified(&self) -> bool {
        self.pin_verified
    }

    /// VERIFY the card application PIN, once per session
    pub fn verify_pin(&mut self, pin: &Pin) -> Result<()> {
        if self.pin_verified {
            return Ok(());
        }
        let field = format_pin(pin)?;
        let command = CommandApdu::new(0x00, INS_VERIFY, 0x00, PIN_REFERENCE).with_data(field.to_vec());
        self.communicate(&command)?;
        self.pin_verified = true;
        debug!("PIV PIN verified");
        Ok(())
    }

    /// RESET RETRY COUNTER: unblock the PIN with the PUK
    pub fn reset_retry_counter(&mut self, puk: &Pin, new_pin: &Pin) -> Result<()> {
        let mut data = format_pin(puk)?;
        data.extend_from_slice(&format_pin(new_pin)?);
        let command =
            CommandApdu::new(0x00, INS_RESET_RETRY_COUNTER, 0x00, PIN_REFERENCE).with_data(data.to_vec());
        self.communicate(&command)?;
        self.pin_verified = false;
        debug!("PIV PIN reset");
        Ok(())
    }

    /// Sign `hash` with the key in `slot`
    pub fn sign(
        &mut self,
        pin: &Pin,
        slot: KeyReference,
        key: KeyAlgorithm,
        hash: &[u8],
        hash_algorithm: HashAlgorithm,
    ) -> Result<Vec<u8>> {
        self.verify_pin(pin)?;
        let template = prepare_data(hash, hash_algorithm, key)?;
        let command = CommandApdu::new(0x00, INS_GENERAL_AUTHENTICATE, key.id(), slot as u8)
            .with_data(template)
            .with_ne(256);
        let response = self.communicate(&command)?;
        debug!(slot = ?slot, "PIV signature computed");
        unpack_signature(&response)
    }
}
