//! Connection and bridge configuration
//!
//! Plain structs with defaults and chainable setters. Link timeouts live in
//! [`hwkey_transport::LinkConfig`].

use std::time::Duration;

use hwkey_transport::apdu::MAX_SHORT_NC;

/// Delay between two attempts while the device waits for a touch
pub const DEFAULT_PRESENCE_CHECK_DELAY: Duration = Duration::from_millis(250);

/// Chunk size for chained command APDUs on OpenPGP cards
pub const OPENPGP_CHAIN_CHUNK: usize = 254;

/// Options for a FIDO applet connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Never use CTAP2, even when the device offers it
    pub force_ctap1: bool,

    /// Select the FIDO applet by AID; when false the U2F VERSION command is
    /// used instead, as over USB HID
    pub select_applet: bool,

    /// Data bytes per APDU when chaining short commands
    pub chain_chunk_size: usize,

    /// Delay before retrying an operation that needs user presence
    pub presence_check_delay: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            force_ctap1: false,
            select_applet: true,
            chain_chunk_size: MAX_SHORT_NC,
            presence_check_delay: DEFAULT_PRESENCE_CHECK_DELAY,
        }
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_force_ctap1(mut self, force: bool) -> Self {
        self.force_ctap1 = force;
        self
    }

    pub fn with_select_applet(mut self, select: bool) -> Self {
        self.select_applet = select;
        self
    }

    /// Set the chaining chunk size (clamped to 1..=255)
    pub fn with_chain_chunk_size(mut self, size: usize) -> Self {
        self.chain_chunk_size = size.clamp(1, MAX_SHORT_NC);
        self
    }

    pub fn with_presence_check_delay(mut self, delay: Duration) -> Self {
        self.presence_check_delay = delay;
        self
    }
}

/// Options for the async execution bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Overall deadline per operation; `None` waits indefinitely
    pub deadline: Option<Duration>,

    /// Delay before retrying an operation that needs user presence
    pub presence_check_delay: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            deadline: None,
            presence_check_delay: DEFAULT_PRESENCE_CHECK_DELAY,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_presence_check_delay(mut self, delay: Duration) -> Self {
        self.presence_check_delay = delay;
        self
    }
}
