// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Directory integration trait.
//!
//! The directory backend, its search/modify path, and the RUV tombstone
//! entry live outside this crate. [`DirectoryRef`] is the seam the engine
//! calls through; the host process provides an implementation backed by
//! its internal-operation machinery.
//!
//! Implementations must serialise tombstone updates themselves; the
//! engine never holds an agreement lock across these calls.

use crate::config::BackendFlavor;
use crate::dn::Dn;
use crate::error::Result;
use crate::types::ConsumerRuv;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Modify operation applied to one attribute of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModOp {
    Replace,
    Delete,
    Add,
}

/// One attribute modification. A `Delete` with no values removes the
/// attribute entirely; implementations tolerate "no such attribute" on
/// that path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrMod {
    pub op: ModOp,
    pub attr: String,
    pub values: Vec<String>,
}

impl AttrMod {
    pub fn replace(attr: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            op: ModOp::Replace,
            attr: attr.into(),
            values: vec![value.into()],
        }
    }

    pub fn delete(attr: impl Into<String>) -> Self {
        Self {
            op: ModOp::Delete,
            attr: attr.into(),
            values: Vec::new(),
        }
    }
}

/// What the engine needs from the directory.
pub trait DirectoryRef: Send + Sync + 'static {
    /// Which storage flavor hosts the subtree; selects flow-control
    /// defaults.
    fn backend_flavor(&self, subtree: &Dn) -> BoxFuture<'_, BackendFlavor>;

    /// The process-wide default fractional exclude lists from the
    /// well-known plugin configuration entry, one grammar string per
    /// value.
    fn default_fractional_lists(&self) -> BoxFuture<'_, Vec<String>>;

    /// All agreement-maxcsn values carried on the subtree's RUV
    /// tombstone entry.
    fn read_tombstone_maxcsns(&self, subtree: &Dn) -> BoxFuture<'_, Vec<String>>;

    /// Remove one agreement-maxcsn value from the tombstone entry.
    fn delete_tombstone_maxcsn(&self, subtree: &Dn, value: &str) -> BoxFuture<'_, ()>;

    /// Apply a multi-attribute modify to an entry (status persistence).
    fn modify_entry(&self, dn: &Dn, mods: Vec<AttrMod>) -> BoxFuture<'_, ()>;

    /// Persist the consumer RUV onto the agreement's entry.
    fn persist_consumer_ruv(&self, dn: &Dn, ruv: Arc<ConsumerRuv>) -> BoxFuture<'_, ()>;
}

/// A directory that answers with defaults and discards writes.
///
/// Used standalone and as a base for tests that don't care about
/// persistence.
#[derive(Debug, Clone, Default)]
pub struct NoOpDirectory;

impl DirectoryRef for NoOpDirectory {
    fn backend_flavor(&self, _subtree: &Dn) -> BoxFuture<'_, BackendFlavor> {
        Box::pin(async { Ok(BackendFlavor::Bdb) })
    }

    fn default_fractional_lists(&self) -> BoxFuture<'_, Vec<String>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn read_tombstone_maxcsns(&self, _subtree: &Dn) -> BoxFuture<'_, Vec<String>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn delete_tombstone_maxcsn(&self, _subtree: &Dn, value: &str) -> BoxFuture<'_, ()> {
        tracing::debug!(value, "NoOp: would delete tombstone maxcsn");
        Box::pin(async { Ok(()) })
    }

    fn modify_entry(&self, dn: &Dn, mods: Vec<AttrMod>) -> BoxFuture<'_, ()> {
        tracing::debug!(entry = %dn, count = mods.len(), "NoOp: would modify entry");
        Box::pin(async { Ok(()) })
    }

    fn persist_consumer_ruv(&self, dn: &Dn, _ruv: Arc<ConsumerRuv>) -> BoxFuture<'_, ()> {
        tracing::debug!(entry = %dn, "NoOp: would persist consumer RUV");
        Box::pin(async { Ok(()) })
    }
}

/// An in-memory directory recording every write, for tests and local
/// experiments.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    inner: std::sync::Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    backend_flavor: Option<BackendFlavor>,
    default_fractional: Vec<String>,
    tombstone_maxcsns: Vec<String>,
    modifies: Vec<(String, Vec<AttrMod>)>,
    persisted_ruvs: Vec<(String, Arc<ConsumerRuv>)>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_backend_flavor(&self, flavor: BackendFlavor) {
        self.inner.lock().unwrap().backend_flavor = Some(flavor);
    }

    pub fn set_default_fractional(&self, lists: Vec<String>) {
        self.inner.lock().unwrap().default_fractional = lists;
    }

    pub fn set_tombstone_maxcsns(&self, values: Vec<String>) {
        self.inner.lock().unwrap().tombstone_maxcsns = values;
    }

    pub fn tombstone_maxcsns(&self) -> Vec<String> {
        self.inner.lock().unwrap().tombstone_maxcsns.clone()
    }

    /// Every `modify_entry` call recorded as `(dn, mods)`.
    pub fn modifies(&self) -> Vec<(String, Vec<AttrMod>)> {
        self.inner.lock().unwrap().modifies.clone()
    }

    pub fn persisted_ruvs(&self) -> Vec<(String, Arc<ConsumerRuv>)> {
        self.inner.lock().unwrap().persisted_ruvs.clone()
    }
}

impl DirectoryRef for MemoryDirectory {
    fn backend_flavor(&self, _subtree: &Dn) -> BoxFuture<'_, BackendFlavor> {
        let flavor = self
            .inner
            .lock()
            .unwrap()
            .backend_flavor
            .unwrap_or(BackendFlavor::Bdb);
        Box::pin(async move { Ok(flavor) })
    }

    fn default_fractional_lists(&self) -> BoxFuture<'_, Vec<String>> {
        let lists = self.inner.lock().unwrap().default_fractional.clone();
        Box::pin(async move { Ok(lists) })
    }

    fn read_tombstone_maxcsns(&self, _subtree: &Dn) -> BoxFuture<'_, Vec<String>> {
        let values = self.inner.lock().unwrap().tombstone_maxcsns.clone();
        Box::pin(async move { Ok(values) })
    }

    fn delete_tombstone_maxcsn(&self, _subtree: &Dn, value: &str) -> BoxFuture<'_, ()> {
        let mut state = self.inner.lock().unwrap();
        state.tombstone_maxcsns.retain(|v| v != value);
        Box::pin(async { Ok(()) })
    }

    fn modify_entry(&self, dn: &Dn, mods: Vec<AttrMod>) -> BoxFuture<'_, ()> {
        self.inner
            .lock()
            .unwrap()
            .modifies
            .push((dn.to_string(), mods));
        Box::pin(async { Ok(()) })
    }

    fn persist_consumer_ruv(&self, dn: &Dn, ruv: Arc<ConsumerRuv>) -> BoxFuture<'_, ()> {
        self.inner
            .lock()
            .unwrap()
            .persisted_ruvs
            .push((dn.to_string(), ruv));
        Box::pin(async { Ok(()) })
    }
}
