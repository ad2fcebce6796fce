//! Protocol worker integration traits.
//!
//! The wire protocol state machine that streams updates lives outside
//! this crate. When an agreement starts, the engine asks its
//! [`ProtocolFactory`] for a [`ProtocolDriver`] in the chosen initial
//! state and owns the handle until stop. Everything the engine tells a
//! running worker goes through the notify surface below; notifications
//! are fire-and-forget and must not re-enter the agreement's locks.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Initial protocol state for a new worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    /// Stream changes from the changelog.
    Incremental,
    /// Full re-send of the subtree first.
    Total,
}

/// Handle to a running protocol worker.
pub trait ProtocolDriver: Send + Sync + 'static {
    /// Begin scheduling sessions. The worker owns its own thread.
    fn start(&self);

    /// Cooperative stop; resolves once the worker has acknowledged.
    fn stop(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// A relevant local change is ready for delivery.
    fn notify_update(&self);

    /// The agreement's configuration changed.
    fn notify_agreement_changed(&self, long_name: &str);

    /// The schedule window opened.
    fn notify_window_opened(&self);

    /// The schedule window closed.
    fn notify_window_closed(&self);

    /// Transition the worker into a total refresh.
    fn initialize_replica(&self);
}

/// Creates protocol workers for one agreement.
pub trait ProtocolFactory: Send + Sync + 'static {
    fn create(&self, state: ProtocolState) -> Arc<dyn ProtocolDriver>;

    /// Session-plugin cleanup hook, called when a multi-supplier
    /// agreement is deleted.
    fn session_cleanup(&self) {}
}

/// A worker that records every notification instead of replicating.
///
/// The standalone/test stand-in: counters are atomics so assertions can
/// be made from any task.
#[derive(Debug, Default)]
pub struct RecordingProtocol {
    started: AtomicBool,
    stopped: AtomicBool,
    updates: AtomicU64,
    config_changes: AtomicU64,
    window_opened: AtomicU64,
    window_closed: AtomicU64,
    init_requests: AtomicU64,
}

impl RecordingProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Acquire)
    }

    pub fn config_changes(&self) -> u64 {
        self.config_changes.load(Ordering::Acquire)
    }

    pub fn window_opened(&self) -> u64 {
        self.window_opened.load(Ordering::Acquire)
    }

    pub fn window_closed(&self) -> u64 {
        self.window_closed.load(Ordering::Acquire)
    }

    pub fn init_requests(&self) -> u64 {
        self.init_requests.load(Ordering::Acquire)
    }
}

impl ProtocolDriver for RecordingProtocol {
    fn start(&self) {
        self.started.store(true, Ordering::Release);
    }

    fn stop(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.stopped.store(true, Ordering::Release);
        })
    }

    fn notify_update(&self) {
        self.updates.fetch_add(1, Ordering::AcqRel);
    }

    fn notify_agreement_changed(&self, long_name: &str) {
        tracing::debug!(agreement = long_name, "configuration change observed");
        self.config_changes.fetch_add(1, Ordering::AcqRel);
    }

    fn notify_window_opened(&self) {
        self.window_opened.fetch_add(1, Ordering::AcqRel);
    }

    fn notify_window_closed(&self) {
        self.window_closed.fetch_add(1, Ordering::AcqRel);
    }

    fn initialize_replica(&self) {
        self.init_requests.fetch_add(1, Ordering::AcqRel);
    }
}

/// Factory handing out [`RecordingProtocol`] workers and retaining a
/// handle to the most recent one.
#[derive(Debug, Default)]
pub struct RecordingFactory {
    last: std::sync::Mutex<Option<Arc<RecordingProtocol>>>,
    created: AtomicU64,
    cleanups: AtomicU64,
    last_state: std::sync::Mutex<Option<ProtocolState>>,
}

impl RecordingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently created worker, if any.
    pub fn last(&self) -> Option<Arc<RecordingProtocol>> {
        self.last.lock().unwrap().clone()
    }

    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Acquire)
    }

    pub fn cleanups(&self) -> u64 {
        self.cleanups.load(Ordering::Acquire)
    }

    pub fn last_state(&self) -> Option<ProtocolState> {
        *self.last_state.lock().unwrap()
    }
}

impl ProtocolFactory for RecordingFactory {
    fn create(&self, state: ProtocolState) -> Arc<dyn ProtocolDriver> {
        let prot = Arc::new(RecordingProtocol::new());
        *self.last.lock().unwrap() = Some(Arc::clone(&prot));
        *self.last_state.lock().unwrap() = Some(state);
        self.created.fetch_add(1, Ordering::AcqRel);
        prot
    }

    fn session_cleanup(&self) {
        self.cleanups.fetch_add(1, Ordering::AcqRel);
    }
}
