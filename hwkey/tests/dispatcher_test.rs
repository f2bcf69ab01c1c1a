//! Protocol selection and CTAP1/CTAP2 equivalence

mod common;

use common::{
    ASSERTION_SIGNATURE, FakeAuthenticator, FakeCard, KEY_HANDLE, RP_ID, USER_ID, descriptor,
    init_tracing, rp_id_hash,
};
use hwkey::{
    ConnectionConfig, Error, FidoConnection, GetAssertionCommand, MakeCredentialCommand, Operation,
    PublicKeyCredential, WebauthnCommand, dispatcher,
};
use hwkey_ctap::attestation::{FORMAT_FIDO_U2F, FORMAT_NONE, FORMAT_PACKED};
use hwkey_ctap::{
    AttestationConveyance, AuthenticatorData, RelyingParty, StatusCode, User, UserVerification,
};

const CLIENT_DATA_HASH: [u8; 32] = [0xCD; 32];

type Connection = FidoConnection<FakeCard<FakeAuthenticator>>;

fn ctap2(device: FakeAuthenticator) -> Connection {
    FidoConnection::new(FakeCard::new(device))
}

fn ctap1(device: FakeAuthenticator) -> Connection {
    FidoConnection::with_config(
        FakeCard::new(device),
        ConnectionConfig::new().with_force_ctap1(true),
    )
}

fn registration(attestation: AttestationConveyance) -> WebauthnCommand {
    MakeCredentialCommand::new(
        CLIENT_DATA_HASH,
        RelyingParty::new(RP_ID),
        User::new(USER_ID.to_vec()),
    )
    .with_attestation(attestation)
    .into()
}

fn authentication(allow_list: &[&[u8]]) -> WebauthnCommand {
    GetAssertionCommand::new(RP_ID, CLIENT_DATA_HASH)
        .with_allow_list(allow_list.iter().map(|id| descriptor(id)).collect())
        .into()
}

fn run(connection: &mut Connection, command: &WebauthnCommand) -> PublicKeyCredential {
    dispatcher::execute(connection, command)
        .expect("operation")
        .into_credential()
        .expect("credential")
}

#[test]
fn test_protocol_negotiation() {
    init_tracing();
    let mut connection = ctap2(FakeAuthenticator::fido2());
    connection.connect().unwrap();
    assert!(connection.is_ctap2_capable());
    assert_eq!(connection.version(), Some("U2F_V2"));
    assert_eq!(
        Operation::for_connection(hwkey::CommandKind::MakeCredential, &connection),
        Ok(Operation::Ctap2MakeCredential)
    );

    let mut connection = ctap2(FakeAuthenticator::u2f_only());
    connection.connect().unwrap();
    assert!(!connection.is_ctap2_capable());
    assert!(connection.info().is_none());

    let mut connection = ctap1(FakeAuthenticator::fido2());
    connection.connect().unwrap();
    assert!(!connection.is_ctap2_capable());
    assert_eq!(
        Operation::for_connection(hwkey::CommandKind::GetAssertion, &connection),
        Ok(Operation::Ctap1GetAssertion)
    );
}

#[test]
fn test_version_command_instead_of_select() {
    init_tracing();
    let card = FakeCard::new(FakeAuthenticator::u2f_only());
    let applet = card.applet();
    let mut connection =
        FidoConnection::with_config(card, ConnectionConfig::new().with_select_applet(false));

    connection.connect().unwrap();

    assert_eq!(connection.version(), Some("U2F_V2"));
    let device = applet.lock();
    assert_eq!(device.count(0xA4), 0);
    assert_eq!(device.count(0x03), 1);
}

#[test]
fn test_registration_is_protocol_independent() {
    init_tracing();
    let command = registration(AttestationConveyance::None);

    let over_ctap2 = run(&mut ctap2(FakeAuthenticator::fido2()), &command);
    let over_ctap1 = run(&mut ctap1(FakeAuthenticator::fido2()), &command);

    assert_eq!(over_ctap2.raw_id, KEY_HANDLE.to_vec());
    assert_eq!(over_ctap2, over_ctap1);

    let object = &over_ctap1.attestation().unwrap().attestation_object;
    assert_eq!(object.fmt, FORMAT_NONE);
    let auth_data = AuthenticatorData::parse(&object.auth_data).unwrap();
    assert_eq!(auth_data.rp_id_hash, rp_id_hash(RP_ID));
    assert!(auth_data.user_present());
    assert_eq!(auth_data.attested_credential_data.unwrap().aaguid, [0u8; 16]);
}

#[test]
fn test_direct_attestation_keeps_device_format() {
    init_tracing();
    let command = registration(AttestationConveyance::Direct);

    let over_ctap2 = run(&mut ctap2(FakeAuthenticator::fido2()), &command);
    let over_ctap1 = run(&mut ctap1(FakeAuthenticator::fido2()), &command);
    assert_eq!(over_ctap2.raw_id, over_ctap1.raw_id);

    let packed = &over_ctap2.attestation().unwrap().attestation_object;
    let u2f = &over_ctap1.attestation().unwrap().attestation_object;
    assert_eq!(packed.fmt, FORMAT_PACKED);
    assert_eq!(u2f.fmt, FORMAT_FIDO_U2F);

    let packed = AuthenticatorData::parse(&packed.auth_data).unwrap();
    let u2f = AuthenticatorData::parse(&u2f.auth_data).unwrap();
    let packed = packed.attested_credential_data.unwrap();
    let u2f = u2f.attested_credential_data.unwrap();
    assert_eq!(packed.aaguid, common::AAGUID);
    assert_eq!(u2f.aaguid, [0u8; 16]);
    assert_eq!(packed.credential_public_key, u2f.credential_public_key);
}

#[test]
fn test_assertion_is_protocol_independent() {
    init_tracing();
    let command = authentication(&[&KEY_HANDLE]);

    let over_ctap2 = run(&mut ctap2(FakeAuthenticator::fido2()), &command);
    let over_ctap1 = run(&mut ctap1(FakeAuthenticator::fido2()), &command);

    assert_eq!(over_ctap2, over_ctap1);
    let assertion = over_ctap1.assertion().unwrap();
    assert_eq!(over_ctap1.raw_id, KEY_HANDLE.to_vec());
    assert_eq!(assertion.signature, ASSERTION_SIGNATURE.to_vec());
    assert_eq!(&assertion.authenticator_data[..32], &rp_id_hash(RP_ID));
    assert_eq!(&assertion.authenticator_data[33..], &[0, 0, 0, 1]);
    assert_eq!(assertion.user_handle, None);
}

#[test]
fn test_ctap1_tries_each_allowed_key_handle() {
    init_tracing();
    let card = FakeCard::new(FakeAuthenticator::u2f_only());
    let applet = card.applet();
    let mut connection = FidoConnection::new(card);

    let credential = run(&mut connection, &authentication(&[&[0x01; 32], &KEY_HANDLE]));
    assert_eq!(credential.raw_id, KEY_HANDLE.to_vec());
    assert_eq!(applet.lock().count(0x02), 2);

    assert_eq!(
        dispatcher::execute(&mut connection, &authentication(&[&[0x01; 32], &[0x02; 32]])),
        Err(Error::NoCredentials)
    );
}

#[test]
fn test_excluded_credential_rejected_on_both_protocols() {
    init_tracing();
    let command: WebauthnCommand = MakeCredentialCommand::new(
        CLIENT_DATA_HASH,
        RelyingParty::new(RP_ID),
        User::new(USER_ID.to_vec()),
    )
    .with_exclude_list(vec![descriptor(&[0x01; 16]), descriptor(&KEY_HANDLE)])
    .into();
    let excluded = Err(Error::Ctap(StatusCode::CredentialExcluded));

    assert_eq!(dispatcher::execute(&mut ctap2(FakeAuthenticator::fido2()), &command), excluded);

    let card = FakeCard::new(FakeAuthenticator::u2f_only());
    let applet = card.applet();
    assert_eq!(dispatcher::execute(&mut FidoConnection::new(card), &command), excluded);
    // Only check-only authenticates were sent, no register
    let device = applet.lock();
    assert_eq!(device.count(0x02), 2);
    assert_eq!(device.count(0x01), 0);
}

#[test]
fn test_discoverable_credentials() {
    init_tracing();
    let command = authentication(&[]);

    assert!(matches!(
        dispatcher::execute(&mut ctap1(FakeAuthenticator::fido2()), &command),
        Err(Error::Unsupported(_))
    ));
    assert!(matches!(
        dispatcher::execute(&mut ctap2(FakeAuthenticator::fido2()), &command),
        Err(Error::Unsupported(_))
    ));

    let credential = run(&mut ctap2(FakeAuthenticator::fido2().with_resident_keys()), &command);
    assert_eq!(credential.raw_id, KEY_HANDLE.to_vec());
    assert_eq!(credential.assertion().unwrap().user_handle, Some(USER_ID.to_vec()));
}

#[test]
fn test_unsupported_combinations() {
    init_tracing();
    assert!(matches!(
        dispatcher::execute(&mut ctap2(FakeAuthenticator::u2f_only()), &WebauthnCommand::GetInfo),
        Err(Error::Unsupported(_))
    ));

    let verified: WebauthnCommand = GetAssertionCommand::new(RP_ID, CLIENT_DATA_HASH)
        .with_allow_list(vec![descriptor(&KEY_HANDLE)])
        .with_user_verification(UserVerification::Required)
        .into();
    assert!(matches!(
        dispatcher::execute(&mut ctap1(FakeAuthenticator::fido2()), &verified),
        Err(Error::Unsupported(_))
    ));

    let mut connection = ctap2(FakeAuthenticator::fido2());
    connection.connect().unwrap();
    assert!(matches!(
        Operation::Ctap2GetInfo.execute(&mut connection, &authentication(&[&KEY_HANDLE])),
        Err(Error::Unsupported(_))
    ));
}

#[test]
fn test_get_info() {
    init_tracing();
    let info = dispatcher::execute(&mut ctap2(FakeAuthenticator::fido2()), &WebauthnCommand::GetInfo)
        .unwrap()
        .into_info()
        .unwrap();

    assert!(info.supports_version("FIDO_2_0"));
    assert!(info.supports_version("U2F_V2"));
    assert!(info.supports_client_pin());
    assert!(!info.is_pin_set());
    assert_eq!(info.aaguid, common::AAGUID);
}

#[test]
fn test_presence_required_surfaces_without_bridge() {
    init_tracing();
    let mut connection = ctap1(FakeAuthenticator::fido2().with_presence_pending(1));
    let command = authentication(&[&KEY_HANDLE]);

    assert_eq!(dispatcher::execute(&mut connection, &command), Err(Error::PresenceRequired));
    assert!(dispatcher::execute(&mut connection, &command).is_ok());
}
