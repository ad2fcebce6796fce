// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The agreement registry.
//!
//! All live agreements are kept in a store keyed by the canonical form
//! of their entry DN. The store's own lock is held only for lookups and
//! enumeration; each agreement remains internally synchronised, so
//! fan-out operations (`notify_change`, `update_maxcsn`) snapshot the
//! membership first and then visit agreements without any store lock
//! held.

use crate::agreement::Agreement;
use crate::config::AgreementType;
use crate::dn::Dn;
use crate::metrics;
use crate::types::{ChangeOp, Csn, PendingChange};
use dashmap::DashMap;

/// Registry of live agreements, keyed by entry DN.
#[derive(Default)]
pub struct AgreementStore {
    agreements: DashMap<String, Agreement>,
}

impl AgreementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agreement. Replaces any previous agreement at the
    /// same DN and returns it.
    pub fn insert(&self, agreement: Agreement) -> Option<Agreement> {
        let key = agreement.dn().normalized().to_string();
        let previous = self.agreements.insert(key, agreement);
        metrics::set_registered_agreements(self.agreements.len());
        previous
    }

    /// Look up an agreement by its entry DN.
    pub fn get(&self, dn: &Dn) -> Option<Agreement> {
        self.agreements
            .get(dn.normalized())
            .map(|r| r.value().clone())
    }

    /// Remove an agreement from the registry. The caller is responsible
    /// for calling [`Agreement::delete`] on the returned handle.
    pub fn remove(&self, dn: &Dn) -> Option<Agreement> {
        let removed = self.agreements.remove(dn.normalized()).map(|(_, a)| a);
        metrics::set_registered_agreements(self.agreements.len());
        removed
    }

    /// Snapshot of all registered agreements.
    pub fn all(&self) -> Vec<Agreement> {
        self.agreements.iter().map(|r| r.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.agreements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agreements.is_empty()
    }

    /// True if this exact agreement handle is still registered.
    pub fn contains(&self, agreement: &Agreement) -> bool {
        self.get(agreement.dn()).is_some()
    }

    /// Start every registered agreement whose subtree matches `subtree`;
    /// `None` starts all.
    pub async fn start_all(&self, subtree: Option<&Dn>) {
        for agreement in self.all() {
            if subtree.map_or(true, |s| agreement.replarea_matches(s)) {
                let _ = agreement.start().await;
            }
        }
    }

    /// Stop every registered agreement whose subtree matches `subtree`;
    /// `None` stops all.
    pub async fn stop_all(&self, subtree: Option<&Dn>) {
        for agreement in self.all() {
            if subtree.map_or(true, |s| agreement.replarea_matches(s)) {
                agreement.stop().await;
            }
        }
    }

    /// Offer a logged local change to every agreement.
    pub async fn notify_change(&self, change: &PendingChange) {
        for agreement in self.all() {
            agreement.notify_change(change).await;
        }
    }

    /// Record a delivered change's CSN on every enabled, non-windows
    /// agreement whose subtree contains the change's DN.
    pub async fn update_maxcsn(&self, target: &Dn, op: &ChangeOp, csn: &Csn) {
        for agreement in self.all() {
            agreement.update_maxcsn(target, op, csn).await;
        }
    }

    /// The in-memory maxcsn values of all enabled, non-windows
    /// agreements, for the tombstone write path.
    pub async fn maxcsn_values(&self, subtree: &Dn) -> Vec<String> {
        let mut values = Vec::new();
        for agreement in self.all() {
            if agreement.agreement_type() == AgreementType::Windows {
                continue;
            }
            if !agreement.replarea_matches(subtree) {
                continue;
            }
            if !agreement.is_enabled().await {
                continue;
            }
            if let Some(value) = agreement.maxcsn().await {
                values.push(value);
            }
        }
        values
    }
}
