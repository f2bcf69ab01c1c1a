//! OpenPGP v4 key fingerprints
//!
//! `SHA-1(0x99 || len16 || 04 || created || algorithm || key material)`
//!
//! Spec: <https://www.rfc-editor.org/rfc/rfc4880#section-12.2>, EC key
//! material per <https://www.rfc-editor.org/rfc/rfc6637#section-9>

use sha1::{Digest, Sha1};

/// OpenPGP public key algorithm IDs
pub mod algorithm {
    pub const RSA: u8 = 1;
    pub const ECDH: u8 = 18;
    pub const ECDSA: u8 = 19;
    pub const EDDSA: u8 = 22;
}

const PACKET_TAG: u8 = 0x99;
const KEY_VERSION: u8 = 4;

/// KDF parameters of ECDH keys: SHA-256 and AES-128
const ECDH_KDF: [u8; 4] = [0x03, 0x01, 0x08, 0x07];

/// Prefix of native 25519 points
const NATIVE_POINT_PREFIX: u8 = 0x40;

/// Curves usable on OpenPGP cards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    NistP256,
    NistP384,
    NistP521,
    Ed25519,
    Curve25519,
}

impl Curve {
    /// DER content octets of the curve OID
    pub fn oid(self) -> &'static [u8] {
        match self {
            Curve::NistP256 => &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x03, 0x01, 0x07],
            Curve::NistP384 => &[0x2B, 0x81, 0x04, 0x00, 0x22],
            Curve::NistP521 => &[0x2B, 0x81, 0x04, 0x00, 0x23],
            Curve::Ed25519 => &[0x2B, 0x06, 0x01, 0x04, 0x01, 0xDA, 0x47, 0x0F, 0x01],
            Curve::Curve25519 => &[0x2B, 0x06, 0x01, 0x04, 0x01, 0x97, 0x55, 0x01, 0x05, 0x01],
        }
    }
}

/// Public key material, as stored in the key packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    Rsa { modulus: Vec<u8>, exponent: Vec<u8> },
    Ecdsa { curve: Curve, point: Vec<u8> },
    Ecdh { curve: Curve, point: Vec<u8> },
    EdDsa { point: Vec<u8> },
}

impl PublicKey {
    /// Ed25519 key from its 32 raw bytes
    pub fn ed25519(raw: &[u8; 32]) -> Self {
        PublicKey::EdDsa {
            point: native_point(raw),
        }
    }

    /// X25519 key from its 32 raw bytes
    pub fn x25519(raw: &[u8; 32]) -> Self {
        PublicKey::Ecdh {
            curve: Curve::Curve25519,
            point: native_point(raw),
        }
    }

    pub fn algorithm(&self) -> u8 {
        match self {
            PublicKey::Rsa { .. } => algorithm::RSA,
            PublicKey::Ecdsa { .. } => algorithm::ECDSA,
            PublicKey::Ecdh { .. } => algorithm::ECDH,
            PublicKey::EdDsa { .. } => algorithm::EDDSA,
        }
    }

    fn write_material(&self, out: &mut Vec<u8>) {
        match self {
            PublicKey::Rsa { modulus, exponent } => {
                write_mpi(out, modulus);
                write_mpi(out, exponent);
            }
            PublicKey::Ecdsa { curve, point } => {
                write_oid(out, *curve);
                write_mpi(out, point);
            }
            PublicKey::Ecdh { curve, point } => {
                write_oid(out, *curve);
                write_mpi(out, point);
                out.extend_from_slice(&ECDH_KDF);
            }
            PublicKey::EdDsa { point } => {
                write_oid(out, Curve::Ed25519);
                write_mpi(out, point);
            }
        }
    }
}

fn native_point(raw: &[u8; 32]) -> Vec<u8> {
    let mut point = Vec::with_capacity(33);
    point.push(NATIVE_POINT_PREFIX);
    point.extend_from_slice(raw);
    point
}

fn write_oid(out: &mut Vec<u8>, curve: Curve) {
    let oid = curve.oid();
    out.push(oid.len() as u8);
    out.extend_from_slice(oid);
}

/// Two-byte bit count followed by the magnitude without leading zeros
fn write_mpi(out: &mut Vec<u8>, value: &[u8]) {
    let start = value.iter().position(|&b| b != 0).unwrap_or(value.len());
    let magnitude = &value[start..];
    let bits = match magnitude.first() {
        Some(&first) => (magnitude.len() - 1) * 8 + (8 - first.leading_zeros() as usize),
        None => 0,
    };
    out.extend_from_slice(&(bits as u16).to_be_bytes());
    out.extend_from_slice(magnitude);
}

/// v4 fingerprint of `key` created at `created` (seconds since the epoch)
pub fn fingerprint(key: &PublicKey, created: u32) -> [u8; 20] {
    let mut body = Vec::with_capacity(64);
    body.push(KEY_VERSION);
    body.extend_from_slice(&created.to_be_bytes());
    body.push(key.algorithm());
    key.write_material(&mut body);

    let mut hasher = Sha1::new();
    hasher.update([PACKET_TAG]);
    hasher.update((body.len() as u16).to_be_bytes());
    hasher.update(&body);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const CREATED: u32 = 946_731_661;

    const RSA_SPKI: [u8; 294] = hex!(
        "30820122300d06092a864886f70d01010105000382010f003082010a0282010100b0536771ab357106e33d68599d"
        "73f004793b9c0efd693a219136869da721a84d41f813734ee4b7e34bd52757e36b289636f6b1b77096867e7bbd"
        "5100b0e9c8c5e4842bae1915694f753be3f8d5f7bf97c3189faa6e5febecd8c5dc06e73f442046b05d831d27e3"
        "3bab874ec5cabc8fa0ae5b5a700b493a0a5498d0efc46283c6f09a02fa4cd23a5cdd120d16f8da94b1e24f1cc4"
        "3c39c412100687a00dd79fec1454faf5834d0caa9d74bdec08fe746e6f63127008822de32672fde3b6992e179d"
        "860b050b12a58293597d4330b6e5eb80383f819c39dd11cc9565eda9bf74c3d635c38850b50e9d18d70281fd59"
        "4a4dc6c99dced5a57e9d5a214680b75d36590203010001"
    );

    const P256_SPKI: [u8; 91] = hex!(
        "3059301306072a8648ce3d020106082a8648ce3d03010703420004aa0d448dd43f1cae67af7a497cff4aab13ac79"
        "dc32c31881f92911ed8a60c1cb349e9ebe4758910a6f7244c7a25bcc7cc726e168506ceaf69ea26a7c6468a46e"
    );

    const RAW_25519: [u8; 32] = hex!("b7a3c12dc0c8c748ab07525b701122b88bd78f600c76342d27f25e5f92444cde");

    fn p256_point() -> Vec<u8> {
        P256_SPKI[26..].to_vec()
    }

    #[test]
    fn test_rsa_fingerprint() {
        let key = PublicKey::Rsa {
            modulus: RSA_SPKI[33..289].to_vec(),
            exponent: RSA_SPKI[291..294].to_vec(),
        };
        assert_eq!(
            fingerprint(&key, CREATED),
            hex!("61af1d55181bd81e7170a27b57082c2e6a682373")
        );
    }

    #[test]
    fn test_ecdsa_fingerprint() {
        let key = PublicKey::Ecdsa {
            curve: Curve::NistP256,
            point: p256_point(),
        };
        assert_eq!(
            fingerprint(&key, CREATED),
            hex!("b9c2c4e3c51ac1e72242192fdd7c22ea2ae42bf8")
        );
    }

    #[test]
    fn test_ecdh_fingerprint() {
        let key = PublicKey::Ecdh {
            curve: Curve::NistP256,
            point: p256_point(),
        };
        assert_eq!(
            fingerprint(&key, CREATED),
            hex!("9e382b08d0e6b108d3bebdf8bea2457a7fe6acd8")
        );
    }

    #[test]
    fn test_ed25519_fingerprint() {
        assert_eq!(
            fingerprint(&PublicKey::ed25519(&RAW_25519), CREATED),
            hex!("3d63e471725725a831f8768b4f6f6325deb07294")
        );
    }

    #[test]
    fn test_x25519_fingerprint() {
        assert_eq!(
            fingerprint(&PublicKey::x25519(&RAW_25519), CREATED),
            hex!("78c2f872581742e1ae5db925cc5a3a513510e1f1")
        );
    }

    #[test]
    fn test_mpi_encoding() {
        let mut out = Vec::new();
        write_mpi(&mut out, &[0x00, 0x01, 0x00, 0x01]);
        assert_eq!(out, [0x00, 0x11, 0x01, 0x00, 0x01]);

        out.clear();
        write_mpi(&mut out, &[0x00, 0x00]);
        assert_eq!(out, [0x00, 0x00]);

        out.clear();
        write_mpi(&mut out, &[0x40, 0xFF]);
        assert_eq!(out, [0x00, 0x0F, 0x40, 0xFF]);
    }
}
