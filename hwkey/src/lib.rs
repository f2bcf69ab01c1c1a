#![warn(unused_extern_crates)]

//! # hwkey
//!
//! Client-side protocol engine for hardware security keys: FIDO U2F/FIDO2
//! authenticators plus the OpenPGP and PIV card applets.
//!
//! ## Architecture
//!
//! - **Connection**: applet selection and CTAP2-over-APDU on a [`Transport`]
//! - **Dispatcher**: resolves a [`WebauthnCommand`] to a CTAP1 or CTAP2 [`Operation`]
//! - **PIN**: CTAP2 client PIN protocol one
//! - **Bridge**: background execution with single-flight result delivery
//! - **Applets**: OpenPGP PIN management and fingerprints, PIV signatures
//!
//! ## Example
//!
//! ```no_run
//! use hwkey::{FidoConnection, GetAssertionCommand, Transport, WebauthnCommand, dispatcher};
//! use hwkey_ctap::PublicKeyCredentialDescriptor;
//!
//! fn sign_in<T: Transport>(transport: T) -> hwkey::Result<()> {
//!     let mut connection = FidoConnection::new(transport);
//!     let command = GetAssertionCommand::new("example.com", [0u8; 32])
//!         .with_allow_list(vec![PublicKeyCredentialDescriptor::new(vec![1, 2, 3])]);
//!     let response = dispatcher::execute(&mut connection, &WebauthnCommand::from(command))?;
//!     if let Some(credential) = response.into_credential() {
//!         println!("Signed with {}", hex::encode(&credential.raw_id));
//!     }
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod connection;
pub mod credential;
pub mod ctap1;
pub mod ctap2;
pub mod diagnostics;
pub mod dispatcher;
pub mod error;
pub mod exchange;
pub mod openpgp;
pub mod pin;
pub mod piv;
pub mod webauthn;

pub use bridge::{AsyncBridge, CallbackExecutor, DispatcherThread, InlineExecutor, OperationHandle, OperationState};
pub use config::{BridgeConfig, ConnectionConfig};
pub use connection::FidoConnection;
pub use diagnostics::{DiagnosticsSink, NoopDiagnostics, SharedDiagnostics, TracingDiagnostics};
pub use dispatcher::Operation;
pub use error::{Error, ErrorCategory, Result};
pub use openpgp::{OpenPgpApplet, PinReference, PwStatus};
pub use pin::{Pin, PinProtocolOne};
pub use piv::PivApplet;
pub use webauthn::{
    AssertionResponse, AttestationResponse, AuthenticatorResponse, CommandKind,
    GetAssertionCommand, MakeCredentialCommand, PublicKeyCredential, WebauthnCommand,
    WebauthnResponse,
};

pub use hwkey_transport::{LinkConfig, Transport};
