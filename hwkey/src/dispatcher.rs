//! Selects the protocol-specific executor for a logical command
//!
//! The (protocol version, command kind) pair is resolved once into an
//! [`Operation`]; combinations with no implementation fail at resolution.

use std::fmt;

use hwkey_transport::Transport;
use tracing::debug;

use crate::connection::FidoConnection;
use crate::error::{Error, Result};
use crate::webauthn::{CommandKind, WebauthnCommand, WebauthnResponse};
use crate::{ctap1, ctap2};

/// An executor bound to one protocol version and one command kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Ctap2MakeCredential,
    Ctap2GetAssertion,
    Ctap2GetInfo,
    Ctap1MakeCredential,
    Ctap1GetAssertion,
}

impl Operation {
    /// Resolve the executor for `kind`
    ///
    /// # Errors
    ///
    /// `Unsupported` for getInfo on a CTAP1-only device.
    pub fn resolve(kind: CommandKind, ctap2_supported: bool) -> Result<Self> {
        let operation = match (kind, ctap2_supported) {
            (CommandKind::MakeCredential, true) => Operation::Ctap2MakeCredential,
            (CommandKind::GetAssertion, true) => Operation::Ctap2GetAssertion,
            (CommandKind::GetInfo, true) => Operation::Ctap2GetInfo,
            (CommandKind::MakeCredential, false) => Operation::Ctap1MakeCredential,
            (CommandKind::GetAssertion, false) => Operation::Ctap1GetAssertion,
            (CommandKind::GetInfo, false) => {
                return Err(Error::unsupported("authenticatorGetInfo requires CTAP2"));
            }
        };
        debug!(operation = %operation, "Resolved operation");
        Ok(operation)
    }

    /// Resolve against the protocol negotiated on `connection`
    pub fn for_connection<T: Transport>(
        kind: CommandKind,
        connection: &FidoConnection<T>,
    ) -> Result<Self> {
        Self::resolve(kind, connection.is_ctap2_capable())
    }

    pub fn kind(self) -> CommandKind {
        match self {
            Operation::Ctap2MakeCredential | Operation::Ctap1MakeCredential => {
                CommandKind::MakeCredential
            }
            Operation::Ctap2GetAssertion | Operation::Ctap1GetAssertion => CommandKind::GetAssertion,
            Operation::Ctap2GetInfo => CommandKind::GetInfo,
        }
    }

    pub fn is_ctap2(self) -> bool {
        matches!(
            self,
            Operation::Ctap2MakeCredential | Operation::Ctap2GetAssertion | Operation::Ctap2GetInfo
        )
    }

    /// Run `command` on `connection`
    ///
    /// # Errors
    ///
    /// `Unsupported` when `command` is not of this operation's kind.
    pub fn execute<T: Transport>(
        self,
        connection: &mut FidoConnection<T>,
        command: &WebauthnCommand,
    ) -> Result<WebauthnResponse> {
        match (self, command) {
            (Operation::Ctap2MakeCredential, WebauthnCommand::MakeCredential(c)) => {
                ctap2::make_credential(connection, c).map(WebauthnResponse::Credential)
            }
            (Operation::Ctap2GetAssertion, WebauthnCommand::GetAssertion(c)) => {
                ctap2::get_assertion(connection, c).map(WebauthnResponse::Credential)
            }
            (Operation::Ctap2GetInfo, WebauthnCommand::GetInfo) => {
                ctap2::get_info(connection).map(WebauthnResponse::Info)
            }
            (Operation::Ctap1MakeCredential, WebauthnCommand::MakeCredential(c)) => {
                ctap1::make_credential(connection, c).map(WebauthnResponse::Credential)
            }
            (Operation::Ctap1GetAssertion, WebauthnCommand::GetAssertion(c)) => {
                ctap1::get_assertion(connection, c).map(WebauthnResponse::Credential)
            }
            (operation, command) => Err(Error::unsupported(format!(
                "{operation} cannot execute {:?}",
                command.kind()
            ))),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Ctap2MakeCredential => "CTAP2 makeCredential",
            Operation::Ctap2GetAssertion => "CTAP2 getAssertion",
            Operation::Ctap2GetInfo => "CTAP2 getInfo",
            Operation::Ctap1MakeCredential => "U2F register",
            Operation::Ctap1GetAssertion => "U2F authenticate",
        };
        f.write_str(name)
    }
}

/// Connect if needed, resolve the operation and run it
pub fn execute<T: Transport>(
    connection: &mut FidoConnection<T>,
    command: &WebauthnCommand,
) -> Result<WebauthnResponse> {
    connection.connect()?;
    let operation = Operation::for_connection(command.kind(), connection)?;
    operation.execute(connection, command)
}
