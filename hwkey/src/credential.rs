//! Credential construction shared by the CTAP1 and CTAP2 paths
//!
//! Both protocol generations hand their registration result to
//! [`construct_credential`] and their assertion result to
//! [`construct_assertion`], so credential ids and attestation structure are
//! derived the same way regardless of the wire protocol.
//!
//! Spec: <https://www.w3.org/TR/webauthn-2/#sctn-createCredential>

use hwkey_ctap::{
    AttestationConveyance, AttestationObject, AuthenticatorData, PublicKeyCredentialDescriptor,
};
use tracing::warn;

use crate::error::{Error, Result};
use crate::webauthn::{AssertionResponse, AttestationResponse, AuthenticatorResponse, PublicKeyCredential};

/// Build the registration credential according to the attestation preference
pub fn construct_credential(
    attestation: AttestationObject,
    conveyance: AttestationConveyance,
) -> Result<PublicKeyCredential> {
    let attestation = match conveyance {
        AttestationConveyance::None => anonymize(&attestation)?,
        AttestationConveyance::Indirect => {
            warn!("Indirect attestation is not supported, falling back to none");
            anonymize(&attestation)?
        }
        AttestationConveyance::Direct => attestation,
    };

    let raw_id = raw_id(&attestation.auth_data)?;
    Ok(PublicKeyCredential {
        raw_id,
        response: AuthenticatorResponse::Attestation(AttestationResponse {
            attestation_object: attestation,
        }),
    })
}

/// "none" attestation: empty statement and zeroed AAGUID
fn anonymize(attestation: &AttestationObject) -> Result<AttestationObject> {
    let mut auth_data = AuthenticatorData::parse(&attestation.auth_data)?;
    auth_data.zero_aaguid();
    Ok(AttestationObject::none(auth_data.to_bytes()))
}

fn raw_id(auth_data: &[u8]) -> Result<Vec<u8>> {
    AuthenticatorData::parse(auth_data)?
        .credential_id()
        .map(<[u8]>::to_vec)
        .ok_or_else(|| Error::protocol("registration without attested credential data"))
}

/// Build the assertion credential
///
/// The credential id is the only allow list entry when there is exactly one,
/// otherwise the descriptor returned by the authenticator.
pub fn construct_assertion(
    allow_list: &[PublicKeyCredentialDescriptor],
    returned: Option<&PublicKeyCredentialDescriptor>,
    authenticator_data: Vec<u8>,
    signature: Vec<u8>,
    user_handle: Option<Vec<u8>>,
) -> Result<PublicKeyCredential> {
    let raw_id = match (allow_list, returned) {
        ([only], _) => only.id.clone(),
        (_, Some(descriptor)) => descriptor.id.clone(),
        _ => return Err(Error::protocol("authenticator did not return the credential")),
    };

    Ok(PublicKeyCredential {
        raw_id,
        response: AuthenticatorResponse::Assertion(AssertionResponse {
            authenticator_data,
            signature,
            user_handle,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use hwkey_ctap::authenticator_data::flags;
    use hwkey_ctap::attestation::{FORMAT_NONE, FORMAT_PACKED};
    use hwkey_ctap::{AttestedCredentialData, CborValue, CoseAlgorithm, CoseKey, MapBuilder, cbor};

    fn packed_attestation() -> AttestationObject {
        let key = CoseKey::new(CoseAlgorithm::Es256, [0x01; 32], [0x02; 32]);
        let auth_data = AuthenticatorData {
            rp_id_hash: [0x33; 32],
            flags: flags::UP | flags::AT,
            sign_count: 1,
            attested_credential_data: Some(AttestedCredentialData {
                aaguid: [0xEE; 16],
                credential_id: vec![0xC1; 16],
                credential_public_key: cbor::encode(&key.to_cbor()).unwrap(),
            }),
            extensions: None,
        };
        AttestationObject {
            fmt: FORMAT_PACKED.to_owned(),
            auth_data: auth_data.to_bytes(),
            att_stmt: MapBuilder::new().insert("alg", -7).insert("sig", vec![0x30, 0x01]).build(),
        }
    }

    #[test]
    fn test_none_strips_attestation() {
        let credential = construct_credential(packed_attestation(), AttestationConveyance::None).unwrap();
        let object = &credential.attestation().unwrap().attestation_object;

        assert_eq!(credential.raw_id, vec![0xC1; 16]);
        assert_eq!(object.fmt, FORMAT_NONE);
        assert_eq!(object.att_stmt, CborValue::Map(Vec::new()));
        let parsed = AuthenticatorData::parse(&object.auth_data).unwrap();
        assert_eq!(parsed.attested_credential_data.unwrap().aaguid, [0u8; 16]);
        assert_eq!(parsed.sign_count, 1);
    }

    #[test]
    fn test_indirect_behaves_like_none() {
        let none = construct_credential(packed_attestation(), AttestationConveyance::None).unwrap();
        let indirect = construct_credential(packed_attestation(), AttestationConveyance::Indirect).unwrap();
        assert_eq!(none, indirect);
    }

    #[test]
    fn test_direct_passes_through() {
        let original = packed_attestation();
        let credential = construct_credential(original.clone(), AttestationConveyance::Direct).unwrap();
        assert_eq!(credential.attestation().unwrap().attestation_object, original);
        assert_eq!(credential.raw_id, vec![0xC1; 16]);
    }

    #[test]
    fn test_registration_needs_credential_data() {
        let mut header = vec![0x33; 32];
        header.push(flags::UP);
        header.extend_from_slice(&[0, 0, 0, 0]);
        let object = AttestationObject::none(header);
        assert!(matches!(
            construct_credential(object, AttestationConveyance::Direct),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_assertion_credential_id() {
        let one = vec![PublicKeyCredentialDescriptor::new(vec![1])];
        let two = vec![
            PublicKeyCredentialDescriptor::new(vec![1]),
            PublicKeyCredentialDescriptor::new(vec![2]),
        ];
        let returned = PublicKeyCredentialDescriptor::new(vec![2]);

        let credential = construct_assertion(&one, None, vec![], vec![], None).unwrap();
        assert_eq!(credential.raw_id, vec![1]);

        let credential = construct_assertion(&two, Some(&returned), vec![], vec![], None).unwrap();
        assert_eq!(credential.raw_id, vec![2]);

        assert!(matches!(
            construct_assertion(&two, None, vec![], vec![], None),
            Err(Error::Protocol(_))
        ));
    }
}
