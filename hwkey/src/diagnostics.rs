//! Pluggable diagnostics
//!
//! The engine reports milestones (breadcrumbs), device properties (tags) and
//! internal failures to a [`DiagnosticsSink`]. Crash reporters and metrics
//! backends implement the trait; nothing is reported unless a sink is set.

use std::sync::Arc;

use tracing::{debug, error};

use crate::error::Error;

/// Receiver of diagnostic events
///
/// All methods default to doing nothing.
pub trait DiagnosticsSink: Send + Sync {
    /// A protocol milestone, e.g. "selected FIDO applet"
    fn breadcrumb(&self, _message: &str) {}

    /// An error that indicates a bug or a misbehaving device
    fn capture_error(&self, _error: &Error) {}

    /// Attach a key/value property to subsequent reports
    fn set_tag(&self, _key: &str, _value: &str) {}

    fn remove_tag(&self, _key: &str) {}
}

/// Sink that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDiagnostics;

impl DiagnosticsSink for NoopDiagnostics {}

/// Sink that forwards events to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl DiagnosticsSink for TracingDiagnostics {
    fn breadcrumb(&self, message: &str) {
        debug!(target: "hwkey::diagnostics", "{message}");
    }

    fn capture_error(&self, err: &Error) {
        error!(target: "hwkey::diagnostics", category = ?err.category(), error = %err, "Captured error");
    }

    fn set_tag(&self, key: &str, value: &str) {
        debug!(target: "hwkey::diagnostics", key, value, "Tag set");
    }

    fn remove_tag(&self, key: &str) {
        debug!(target: "hwkey::diagnostics", key, "Tag removed");
    }
}

/// Shared handle to a sink
pub type SharedDiagnostics = Arc<dyn DiagnosticsSink>;

/// The default sink
pub fn noop() -> SharedDiagnostics {
    Arc::new(NoopDiagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl DiagnosticsSink for Recorder {
        fn breadcrumb(&self, message: &str) {
            self.events.lock().push(format!("crumb:{message}"));
        }

        fn set_tag(&self, key: &str, value: &str) {
            self.events.lock().push(format!("tag:{key}={value}"));
        }
    }

    #[test]
    fn test_default_methods_are_noops() {
        let recorder = Recorder::default();
        recorder.breadcrumb("selected");
        recorder.capture_error(&Error::Blocked);
        recorder.set_tag("version", "FIDO_2_0");
        recorder.remove_tag("version");

        assert_eq!(
            *recorder.events.lock(),
            vec!["crumb:selected".to_string(), "tag:version=FIDO_2_0".to_string()]
        );
    }

    #[test]
    fn test_shared_sinks() {
        let sinks: Vec<SharedDiagnostics> = vec![noop(), Arc::new(TracingDiagnostics)];
        for sink in sinks {
            sink.breadcrumb("hello");
            sink.capture_error(&Error::Timeout);
        }
    }
}
