//! Schedule window integration.
//!
//! The update-window calendar (start/end per weekday) is parsed and
//! evaluated outside this crate. The engine needs two things from it:
//! whether a session may run right now, and a signal when the window
//! state flips so the running worker can be told. The signal is a
//! `watch` channel rather than a callback, so nothing ever re-enters an
//! agreement lock from scheduler context.

use crate::error::{AgreementError, Result};
use tokio::sync::watch;

/// What the engine needs from the schedule calendar.
pub trait ScheduleRef: Send + Sync + 'static {
    /// Replace the schedule. `None` deletes any existing one, leaving
    /// the window always open.
    fn set_spec(&self, spec: Option<&str>) -> Result<()>;

    /// True if a session may start now.
    fn in_window_now(&self) -> bool;

    /// Receiver observing window open/close transitions.
    fn window_changes(&self) -> watch::Receiver<bool>;
}

/// A schedule whose window is always open.
///
/// The standalone/test stand-in; it remembers the last spec it was given
/// and rejects specs it cannot represent (none).
#[derive(Debug)]
pub struct AlwaysOpenSchedule {
    tx: watch::Sender<bool>,
    spec: std::sync::Mutex<Option<String>>,
}

impl Default for AlwaysOpenSchedule {
    fn default() -> Self {
        Self::new()
    }
}

impl AlwaysOpenSchedule {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(true);
        Self {
            tx,
            spec: std::sync::Mutex::new(None),
        }
    }

    /// The last spec handed to `set_spec`.
    pub fn spec(&self) -> Option<String> {
        self.spec.lock().unwrap().clone()
    }

    /// Force a window transition, for tests.
    pub fn set_window(&self, open: bool) {
        self.tx.send_replace(open);
    }
}

impl ScheduleRef for AlwaysOpenSchedule {
    fn set_spec(&self, spec: Option<&str>) -> Result<()> {
        if let Some(s) = spec {
            if s.trim().is_empty() {
                return Err(AgreementError::conflict(
                    "replica-update-schedule",
                    "empty schedule",
                ));
            }
        }
        *self.spec.lock().unwrap() = spec.map(String::from);
        Ok(())
    }

    fn in_window_now(&self) -> bool {
        *self.tx.subscribe().borrow()
    }

    fn window_changes(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_always_open() {
        let s = AlwaysOpenSchedule::new();
        assert!(s.in_window_now());
    }

    #[test]
    fn test_spec_remembered_and_cleared() {
        let s = AlwaysOpenSchedule::new();
        s.set_spec(Some("0800-2200 12345")).unwrap();
        assert_eq!(s.spec().as_deref(), Some("0800-2200 12345"));
        s.set_spec(None).unwrap();
        assert!(s.spec().is_none());
    }

    #[test]
    fn test_empty_spec_rejected() {
        let s = AlwaysOpenSchedule::new();
        assert!(s.set_spec(Some("  ")).is_err());
    }

    #[tokio::test]
    async fn test_window_changes_observed() {
        let s = AlwaysOpenSchedule::new();
        let mut rx = s.window_changes();
        s.set_window(false);
        rx.changed().await.unwrap();
        assert!(!*rx.borrow());
        assert!(!s.in_window_now());
    }
}
