//! Background execution of FIDO operations with single-flight delivery
//!
//! Each submitted command runs on its own worker thread. Submitting a new
//! command supersedes the one in flight: the old worker may finish its I/O,
//! but its outcome is dropped at delivery. Callbacks run on a
//! [`CallbackExecutor`].
//!
//! A delivery is claimed with one atomic swap on the operation's `finished`
//! flag. Supersession, explicit cancellation, the deadline watchdog and
//! normal delivery all race on that flag, so at most one of them wins.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Sender, unbounded};
use hwkey_transport::Transport;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use crate::config::BridgeConfig;
use crate::connection::FidoConnection;
use crate::diagnostics::{self, SharedDiagnostics};
use crate::dispatcher;
use crate::error::{Error, Result};
use crate::webauthn::{WebauthnCommand, WebauthnResponse};

/// Work posted to a [`CallbackExecutor`]
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Receives the outcome of an operation
pub type Callback = Box<dyn FnOnce(Result<WebauthnResponse>) + Send + 'static>;

/// Context that runs result callbacks
pub trait CallbackExecutor: Send + Sync {
    fn execute(&self, job: Job);
}

/// Runs callbacks on the worker thread that produced the result
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl CallbackExecutor for InlineExecutor {
    fn execute(&self, job: Job) {
        job();
    }
}

/// Runs callbacks in order on one dedicated thread
///
/// The thread exits once the executor is dropped and queued jobs are done.
pub struct DispatcherThread {
    sender: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl DispatcherThread {
    pub fn spawn() -> Result<Self> {
        let (sender, receiver) = unbounded::<Job>();
        let handle = thread::Builder::new()
            .name("hwkey-callbacks".into())
            .spawn(move || {
                for job in receiver {
                    job();
                }
            })
            .map_err(|e| Error::protocol(format!("failed to spawn callback thread: {e}")))?;
        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }
}

impl CallbackExecutor for DispatcherThread {
    fn execute(&self, job: Job) {
        let Some(sender) = &self.sender else {
            return;
        };
        if sender.send(job).is_err() {
            warn!("Callback thread is gone, dropping result");
        }
    }
}

impl Drop for DispatcherThread {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            // A callback dropping the last executor reference runs on this thread
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// Lifecycle of one submitted operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Created,
    Running,
    /// A response was delivered
    Completed,
    /// Superseded or cancelled; nothing was delivered
    Cancelled,
    /// An error was delivered, or the device went away
    Failed,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationState::Completed | OperationState::Cancelled | OperationState::Failed
        )
    }
}

struct Operation {
    generation: u64,
    finished: AtomicBool,
    state: Mutex<OperationState>,
    changed: Condvar,
    callback: Mutex<Option<Callback>>,
}

impl Operation {
    fn new(generation: u64, callback: Callback) -> Self {
        Self {
            generation,
            finished: AtomicBool::new(false),
            state: Mutex::new(OperationState::Created),
            changed: Condvar::new(),
            callback: Mutex::new(Some(callback)),
        }
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn supersede(&self) {
        self.finished.store(true, Ordering::Release);
    }

    /// Take the right to deliver; true exactly once
    fn claim(&self) -> bool {
        !self.finished.swap(true, Ordering::AcqRel)
    }

    fn set_state(&self, next: OperationState) {
        let mut state = self.state.lock();
        if state.is_terminal() {
            return;
        }
        *state = next;
        self.changed.notify_all();
    }

    fn state(&self) -> OperationState {
        *self.state.lock()
    }

    fn wait(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.is_terminal() {
            let _ = self
                .changed
                .wait_while_for(&mut state, |s| !s.is_terminal(), timeout);
        }
        state.is_terminal()
    }

    fn take_callback(&self) -> Option<Callback> {
        self.callback.lock().take()
    }
}

/// Handle to a submitted operation
#[derive(Clone)]
pub struct OperationHandle {
    operation: Arc<Operation>,
}

impl OperationHandle {
    pub fn generation(&self) -> u64 {
        self.operation.generation
    }

    pub fn state(&self) -> OperationState {
        self.operation.state()
    }

    /// Drop the outcome of this operation; blocking I/O is not interrupted
    pub fn cancel(&self) {
        self.operation.supersede();
    }

    /// Wait until the operation reaches a terminal state
    ///
    /// Returns false if `timeout` elapsed first.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.operation.wait(timeout)
    }
}

impl std::fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationHandle")
            .field("generation", &self.generation())
            .field("state", &self.state())
            .finish()
    }
}

/// Runs [`WebauthnCommand`]s in the background on one shared connection
pub struct AsyncBridge<T> {
    connection: Arc<Mutex<FidoConnection<T>>>,
    config: BridgeConfig,
    executor: Arc<dyn CallbackExecutor>,
    diagnostics: SharedDiagnostics,
    current: Slot,
    generation: AtomicU64,
}

/// The single in-flight register
type Slot = Arc<Mutex<Option<Arc<Operation>>>>;

/// Empty the slot if it still holds `operation`
fn release_slot(slot: &Slot, operation: &Arc<Operation>) {
    let mut current = slot.lock();
    if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, operation)) {
        *current = None;
    }
}

impl<T: Transport + Send + 'static> AsyncBridge<T> {
    /// Bridge with a [`DispatcherThread`] executor
    pub fn new(connection: FidoConnection<T>) -> Result<Self> {
        Ok(Self::with_executor(connection, Arc::new(DispatcherThread::spawn()?)))
    }

    pub fn with_executor(connection: FidoConnection<T>, executor: Arc<dyn CallbackExecutor>) -> Self {
        Self {
            connection: Arc::new(Mutex::new(connection)),
            config: BridgeConfig::default(),
            executor,
            diagnostics: diagnostics::noop(),
            current: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        }
    }

    pub fn with_config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: SharedDiagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The shared connection, for synchronous use between operations
    pub fn connection(&self) -> Arc<Mutex<FidoConnection<T>>> {
        Arc::clone(&self.connection)
    }

    /// True while an operation is the current one
    pub fn is_running(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Start `command`, superseding any operation in flight
    pub fn submit<F>(&self, command: WebauthnCommand, callback: F) -> OperationHandle
    where
        F: FnOnce(Result<WebauthnResponse>) + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let operation = Arc::new(Operation::new(generation, Box::new(callback)));

        {
            let mut current = self.current.lock();
            if let Some(previous) = current.take() {
                debug!(generation = previous.generation, "Superseding running operation");
                previous.supersede();
            }
            *current = Some(Arc::clone(&operation));
        }

        let worker = Worker {
            current: Arc::clone(&self.current),
            connection: Arc::clone(&self.connection),
            operation: Arc::clone(&operation),
            executor: Arc::clone(&self.executor),
            diagnostics: Arc::clone(&self.diagnostics),
            presence_check_delay: self.config.presence_check_delay,
            command,
        };
        let spawned = thread::Builder::new()
            .name(format!("hwkey-op-{generation}"))
            .spawn(move || worker.run());
        if let Err(e) = spawned {
            error!(error = %e, "Failed to spawn operation thread");
            deliver(
                &*self.executor,
                &operation,
                Err(Error::protocol("failed to spawn operation thread")),
            );
            release_slot(&self.current, &operation);
            return OperationHandle { operation };
        }

        if let Some(deadline) = self.config.deadline {
            self.spawn_watchdog(&operation, deadline);
        }

        OperationHandle { operation }
    }

    /// Drop the outcome of the current operation, if any
    pub fn cancel(&self) {
        if let Some(operation) = self.current.lock().take() {
            debug!(generation = operation.generation, "Cancelling operation");
            operation.supersede();
        }
    }

    fn spawn_watchdog(&self, operation: &Arc<Operation>, deadline: Duration) {
        let operation = Arc::clone(operation);
        let current = Arc::clone(&self.current);
        let executor = Arc::clone(&self.executor);
        let diagnostics = Arc::clone(&self.diagnostics);
        let spawned = thread::Builder::new()
            .name(format!("hwkey-watchdog-{}", operation.generation))
            .spawn(move || {
                if operation.wait(deadline) || operation.is_finished() {
                    return;
                }
                warn!(
                    generation = operation.generation,
                    deadline_ms = deadline.as_millis() as u64,
                    "Operation deadline expired"
                );
                diagnostics.breadcrumb("operation deadline expired");
                release_slot(&current, &operation);
                deliver(&*executor, &operation, Err(Error::Timeout));
            });
        if let Err(e) = spawned {
            warn!(error = %e, "Failed to spawn watchdog, running without deadline");
        }
    }
}

impl<T> Drop for AsyncBridge<T> {
    fn drop(&mut self) {
        if let Some(operation) = self.current.lock().take() {
            operation.supersede();
        }
    }
}

/// Post `result` to the executor; the callback runs only if the operation
/// was not superseded by then
fn deliver(executor: &dyn CallbackExecutor, operation: &Arc<Operation>, result: Result<WebauthnResponse>) {
    let operation = Arc::clone(operation);
    executor.execute(Box::new(move || {
        if !operation.claim() {
            debug!(generation = operation.generation, "Dropping result of superseded operation");
            operation.set_state(OperationState::Cancelled);
            return;
        }
        let state = if result.is_ok() {
            OperationState::Completed
        } else {
            OperationState::Failed
        };
        operation.set_state(state);
        if let Some(callback) = operation.take_callback() {
            callback(result);
        }
    }));
}

/// One operation's worker thread
struct Worker<T> {
    current: Slot,
    connection: Arc<Mutex<FidoConnection<T>>>,
    operation: Arc<Operation>,
    executor: Arc<dyn CallbackExecutor>,
    diagnostics: SharedDiagnostics,
    presence_check_delay: Duration,
    command: WebauthnCommand,
}

impl<T: Transport> Worker<T> {
    fn run(self) {
        let generation = self.operation.generation;
        self.operation.set_state(OperationState::Running);
        debug!(generation, kind = ?self.command.kind(), "Operation started");
        self.diagnostics.breadcrumb("operation started");

        loop {
            if self.operation.is_finished() {
                debug!(generation, "Operation superseded before attempt");
                self.operation.set_state(OperationState::Cancelled);
                break;
            }

            match self.attempt() {
                Err(Error::PresenceRequired) => {
                    debug!(
                        generation,
                        delay_ms = self.presence_check_delay.as_millis() as u64,
                        "Waiting for user presence"
                    );
                    thread::sleep(self.presence_check_delay);
                }
                Err(e) if e.is_disconnect() => {
                    warn!(generation, error = %e, "Transport gone during operation");
                    self.diagnostics.breadcrumb("transport gone during operation");
                    if self.operation.claim() {
                        self.operation.set_state(OperationState::Failed);
                    } else {
                        self.operation.set_state(OperationState::Cancelled);
                    }
                    break;
                }
                result => {
                    if let Err(e) = &result {
                        debug!(generation, error = %e, "Operation failed");
                        self.diagnostics.capture_error(e);
                    }
                    deliver(&*self.executor, &self.operation, result);
                    break;
                }
            }
        }

        release_slot(&self.current, &self.operation);
    }

    /// One try under the connection lock; a panic becomes a protocol error
    fn attempt(&self) -> Result<WebauthnResponse> {
        let mut connection = self.connection.lock();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            dispatcher::execute(&mut connection, &self.command)
        }));
        // A token used by a cancelled or expired operation is not reused
        if self.operation.is_finished() && connection.pin_token().is_some() {
            debug!(
                generation = self.operation.generation,
                "Operation ended while running, dropping PIN token"
            );
            connection.clear_pin_token();
        }
        outcome.unwrap_or_else(|payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_owned());
            error!(panic = %message, "Operation panicked");
            Err(Error::protocol(format!("operation panicked: {message}")))
        })
    }
}
