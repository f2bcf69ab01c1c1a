//! Protocol-agnostic commands and responses
//!
//! Callers describe what they want (create or get a credential, read device
//! info) without knowing whether the device speaks CTAP1 or CTAP2.

use hwkey_ctap::{
    AttestationConveyance, AttestationObject, AuthenticatorInfo, PublicKeyCredentialDescriptor,
    PublicKeyCredentialParameters, RelyingParty, User, UserVerification,
};

use crate::pin::Pin;

/// Create a credential
#[derive(Debug, Clone)]
pub struct MakeCredentialCommand {
    /// SHA-256 of the client data, computed by the caller
    pub client_data_hash: [u8; 32],
    pub rp: RelyingParty,
    pub user: User,
    pub pub_key_cred_params: Vec<PublicKeyCredentialParameters>,
    pub exclude_list: Vec<PublicKeyCredentialDescriptor>,
    pub resident_key: bool,
    pub user_verification: UserVerification,
    pub attestation: AttestationConveyance,
    pub pin: Option<Pin>,
    /// Allow spending the last PIN attempt
    pub last_attempt_ok: bool,
}

impl MakeCredentialCommand {
    pub fn new(client_data_hash: [u8; 32], rp: RelyingParty, user: User) -> Self {
        Self {
            client_data_hash,
            rp,
            user,
            pub_key_cred_params: vec![PublicKeyCredentialParameters::es256()],
            exclude_list: Vec::new(),
            resident_key: false,
            user_verification: UserVerification::default(),
            attestation: AttestationConveyance::default(),
            pin: None,
            last_attempt_ok: false,
        }
    }

    pub fn with_attestation(mut self, attestation: AttestationConveyance) -> Self {
        self.attestation = attestation;
        self
    }

    pub fn with_user_verification(mut self, user_verification: UserVerification) -> Self {
        self.user_verification = user_verification;
        self
    }

    pub fn with_pin(mut self, pin: impl Into<Pin>) -> Self {
        self.pin = Some(pin.into());
        self
    }

    pub fn with_last_attempt_ok(mut self, ok: bool) -> Self {
        self.last_attempt_ok = ok;
        self
    }

    pub fn with_exclude_list(mut self, exclude_list: Vec<PublicKeyCredentialDescriptor>) -> Self {
        self.exclude_list = exclude_list;
        self
    }

    pub fn with_resident_key(mut self, resident_key: bool) -> Self {
        self.resident_key = resident_key;
        self
    }
}

/// Get an assertion
#[derive(Debug, Clone)]
pub struct GetAssertionCommand {
    pub rp_id: String,
    /// SHA-256 of the client data, computed by the caller
    pub client_data_hash: [u8; 32],
    /// Empty for discoverable credentials
    pub allow_list: Vec<PublicKeyCredentialDescriptor>,
    pub user_verification: UserVerification,
    pub pin: Option<Pin>,
    /// Allow spending the last PIN attempt
    pub last_attempt_ok: bool,
}

impl GetAssertionCommand {
    pub fn new(rp_id: impl Into<String>, client_data_hash: [u8; 32]) -> Self {
        Self {
            rp_id: rp_id.into(),
            client_data_hash,
            allow_list: Vec::new(),
            user_verification: UserVerification::default(),
            pin: None,
            last_attempt_ok: false,
        }
    }

    pub fn with_allow_list(mut self, allow_list: Vec<PublicKeyCredentialDescriptor>) -> Self {
        self.allow_list = allow_list;
        self
    }

    pub fn with_user_verification(mut self, user_verification: UserVerification) -> Self {
        self.user_verification = user_verification;
        self
    }

    pub fn with_pin(mut self, pin: impl Into<Pin>) -> Self {
        self.pin = Some(pin.into());
        self
    }

    pub fn with_last_attempt_ok(mut self, ok: bool) -> Self {
        self.last_attempt_ok = ok;
        self
    }
}

/// A logical operation on a FIDO device
#[derive(Debug, Clone)]
pub enum WebauthnCommand {
    MakeCredential(MakeCredentialCommand),
    GetAssertion(GetAssertionCommand),
    GetInfo,
}

/// Kind of a [`WebauthnCommand`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    MakeCredential,
    GetAssertion,
    GetInfo,
}

impl WebauthnCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            WebauthnCommand::MakeCredential(_) => CommandKind::MakeCredential,
            WebauthnCommand::GetAssertion(_) => CommandKind::GetAssertion,
            WebauthnCommand::GetInfo => CommandKind::GetInfo,
        }
    }
}

impl From<MakeCredentialCommand> for WebauthnCommand {
    fn from(command: MakeCredentialCommand) -> Self {
        WebauthnCommand::MakeCredential(command)
    }
}

impl From<GetAssertionCommand> for WebauthnCommand {
    fn from(command: GetAssertionCommand) -> Self {
        WebauthnCommand::GetAssertion(command)
    }
}

/// Registration result
#[derive(Debug, Clone, PartialEq)]
pub struct AttestationResponse {
    pub attestation_object: AttestationObject,
}

impl AttestationResponse {
    /// WebAuthn attestation object bytes
    pub fn to_bytes(&self) -> hwkey_ctap::cbor::Result<Vec<u8>> {
        self.attestation_object.to_bytes()
    }
}

/// Authentication result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionResponse {
    pub authenticator_data: Vec<u8>,
    pub signature: Vec<u8>,
    pub user_handle: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthenticatorResponse {
    Attestation(AttestationResponse),
    Assertion(AssertionResponse),
}

/// A created or asserted credential
#[derive(Debug, Clone, PartialEq)]
pub struct PublicKeyCredential {
    pub raw_id: Vec<u8>,
    pub response: AuthenticatorResponse,
}

impl PublicKeyCredential {
    pub fn attestation(&self) -> Option<&AttestationResponse> {
        match &self.response {
            AuthenticatorResponse::Attestation(response) => Some(response),
            AuthenticatorResponse::Assertion(_) => None,
        }
    }

    pub fn assertion(&self) -> Option<&AssertionResponse> {
        match &self.response {
            AuthenticatorResponse::Assertion(response) => Some(response),
            AuthenticatorResponse::Attestation(_) => None,
        }
    }
}

/// Result of a [`WebauthnCommand`]
#[derive(Debug, Clone, PartialEq)]
pub enum WebauthnResponse {
    Credential(PublicKeyCredential),
    Info(AuthenticatorInfo),
}

impl WebauthnResponse {
    pub fn into_credential(self) -> Option<PublicKeyCredential> {
        match self {
            WebauthnResponse::Credential(credential) => Some(credential),
            WebauthnResponse::Info(_) => None,
        }
    }

    pub fn into_info(self) -> Option<AuthenticatorInfo> {
        match self {
            WebauthnResponse::Info(info) => Some(info),
            WebauthnResponse::Credential(_) => None,
        }
    }
}
