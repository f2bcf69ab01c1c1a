//! WebAuthn entities carried inside CTAP2 requests and responses
//!
//! Each type knows how to write itself as the CBOR map CTAP2 expects and,
//! where authenticators send it back, how to read itself from one.

use crate::cbor::{CborError, CborValue, MapBuilder, Result};

/// The only credential type defined by WebAuthn
pub const PUBLIC_KEY_TYPE: &str = "public-key";

/// Relying party entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelyingParty {
    /// RP ID, e.g. "example.com"
    pub id: String,
    pub name: Option<String>,
    pub icon: Option<String>,
}

impl RelyingParty {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            icon: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn to_cbor(&self) -> CborValue {
        MapBuilder::new()
            .insert("id", self.id.as_str())
            .insert_opt("name", self.name.as_deref())
            .insert_opt("icon", self.icon.as_deref())
            .build()
    }
}

/// User account entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// User handle
    pub id: Vec<u8>,
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub icon: Option<String>,
}

impl User {
    pub fn new(id: Vec<u8>) -> Self {
        Self {
            id,
            name: None,
            display_name: None,
            icon: None,
        }
    }

    pub fn with_names(mut self, name: impl Into<String>, display_name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self.display_name = Some(display_name.into());
        self
    }

    pub fn to_cbor(&self) -> CborValue {
        MapBuilder::new()
            .insert("id", self.id.clone())
            .insert_opt("name", self.name.as_deref())
            .insert_opt("displayName", self.display_name.as_deref())
            .insert_opt("icon", self.icon.as_deref())
            .build()
    }

    pub fn from_cbor(value: &CborValue) -> Result<Self> {
        let id = value
            .get_text("id")
            .and_then(CborValue::as_bytes)
            .ok_or_else(|| CborError::MissingField("user.id".into()))?;
        let text = |key: &str| value.get_text(key).and_then(CborValue::as_text).map(str::to_owned);

        Ok(Self {
            id: id.to_vec(),
            name: text("name"),
            display_name: text("displayName"),
            icon: text("icon"),
        })
    }
}

/// Reference to one credential, as used in allow and exclude lists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyCredentialDescriptor {
    pub id: Vec<u8>,
    pub transports: Option<Vec<String>>,
}

impl PublicKeyCredentialDescriptor {
    pub fn new(id: Vec<u8>) -> Self {
        Self {
            id,
            transports: None,
        }
    }

    pub fn to_cbor(&self) -> CborValue {
        let transports = self.transports.as_ref().map(|list| {
            CborValue::Array(list.iter().map(|t| CborValue::from(t.as_str())).collect())
        });
        MapBuilder::new()
            .insert("id", self.id.clone())
            .insert("type", PUBLIC_KEY_TYPE)
            .insert_opt("transports", transports)
            .build()
    }

    pub fn from_cbor(value: &CborValue) -> Result<Self> {
        let id = value
            .get_text("id")
            .and_then(CborValue::as_bytes)
            .ok_or_else(|| CborError::MissingField("credential.id".into()))?;
        let transports = value.get_text("transports").and_then(CborValue::as_array).map(|items| {
            items
                .iter()
                .filter_map(CborValue::as_text)
                .map(str::to_owned)
                .collect()
        });

        Ok(Self {
            id: id.to_vec(),
            transports,
        })
    }
}

/// Encode a descriptor list as a CBOR array
pub fn descriptor_list(list: &[PublicKeyCredentialDescriptor]) -> CborValue {
    CborValue::Array(list.iter().map(PublicKeyCredentialDescriptor::to_cbor).collect())
}

/// COSE algorithm identifiers used with FIDO
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoseAlgorithm {
    /// ECDSA with P-256 and SHA-256
    Es256,
    EdDsa,
    /// ECDH-ES with HKDF-SHA-256, the PIN key agreement algorithm
    EcdhEsHkdf256,
    /// RSASSA-PKCS1-v1_5 with SHA-256
    Rs256,
}

impl CoseAlgorithm {
    pub fn to_i32(self) -> i32 {
        match self {
            Self::Es256 => -7,
            Self::EdDsa => -8,
            Self::EcdhEsHkdf256 => -25,
            Self::Rs256 => -257,
        }
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            -7 => Some(Self::Es256),
            -8 => Some(Self::EdDsa),
            -25 => Some(Self::EcdhEsHkdf256),
            -257 => Some(Self::Rs256),
            _ => None,
        }
    }
}

/// One acceptable credential algorithm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyCredentialParameters {
    pub alg: i32,
}

impl PublicKeyCredentialParameters {
    pub fn new(alg: CoseAlgorithm) -> Self {
        Self { alg: alg.to_i32() }
    }

    pub fn es256() -> Self {
        Self::new(CoseAlgorithm::Es256)
    }

    pub fn to_cbor(&self) -> CborValue {
        MapBuilder::new()
            .insert("alg", self.alg)
            .insert("type", PUBLIC_KEY_TYPE)
            .build()
    }
}

/// How much attestation the caller wants back
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AttestationConveyance {
    /// Strip attestation; the AAGUID is zeroed as well
    #[default]
    None,
    /// Anonymized attestation; handled like `None`
    Indirect,
    /// Pass the authenticator's attestation through
    Direct,
}

/// User verification requirement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UserVerification {
    Required,
    #[default]
    Preferred,
    Discouraged,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cbor::encode;

    #[test]
    fn test_rp_encoding() {
        let rp = RelyingParty::new("example.com").with_name("Example");
        let value = rp.to_cbor();
        assert_eq!(value.get_text("id").and_then(|v| v.as_text()), Some("example.com"));
        assert_eq!(value.get_text("name").and_then(|v| v.as_text()), Some("Example"));
        assert!(value.get_text("icon").is_none());
    }

    #[test]
    fn test_user_from_cbor() {
        let user = User::new(vec![1, 2, 3]).with_names("alice", "Alice");
        assert_eq!(User::from_cbor(&user.to_cbor()).unwrap(), user);

        let missing = MapBuilder::new().insert("name", "bob").build();
        assert_eq!(
            User::from_cbor(&missing),
            Err(CborError::MissingField("user.id".into()))
        );
    }

    #[test]
    fn test_descriptor_encoding() {
        let descriptor = PublicKeyCredentialDescriptor::new(vec![0xAB; 4]);
        // {"id": h'ABABABAB', "type": "public-key"}
        let mut expected = vec![0xa2, 0x62, b'i', b'd', 0x44, 0xAB, 0xAB, 0xAB, 0xAB];
        expected.extend_from_slice(&[0x64, b't', b'y', b'p', b'e', 0x6a]);
        expected.extend_from_slice(b"public-key");
        assert_eq!(encode(&descriptor.to_cbor()).unwrap(), expected);
        assert_eq!(
            PublicKeyCredentialDescriptor::from_cbor(&descriptor.to_cbor()).unwrap(),
            descriptor
        );
    }

    #[test]
    fn test_cose_algorithm_ids() {
        assert_eq!(CoseAlgorithm::Es256.to_i32(), -7);
        assert_eq!(CoseAlgorithm::from_i32(-25), Some(CoseAlgorithm::EcdhEsHkdf256));
        assert_eq!(CoseAlgorithm::from_i32(-1), None);
        assert_eq!(
            PublicKeyCredentialParameters::es256().to_cbor().get_text("alg"),
            Some(&CborValue::Negative(6))
        );
    }
}
