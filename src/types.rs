//! Shared value types crossing the collaborator seams.
//!
//! The CSN arithmetic, RUV implementation, and write-path plumbing live
//! outside this crate; these types are the opaque handles the engine
//! passes around.

use crate::dn::Dn;
use std::sync::Arc;

/// A change sequence number, carried as its canonical string form plus
/// the replica id that originated it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Csn {
    raw: String,
    replica_id: u16,
}

impl Csn {
    pub fn new(raw: impl Into<String>, replica_id: u16) -> Self {
        Self {
            raw: raw.into(),
            replica_id,
        }
    }

    /// Canonical string form.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Replica id of the originator.
    pub fn replica_id(&self) -> u16 {
        self.replica_id
    }
}

impl std::fmt::Display for Csn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// The consumer's replica update vector, as delivered by whatever
/// subsystem last read it from the peer. Shared by reference counting:
/// the agreement holds one `Arc`, current readers hold others, and the
/// vector is freed when the last goes away.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConsumerRuv {
    elements: Vec<String>,
}

impl ConsumerRuv {
    pub fn new(elements: Vec<String>) -> Self {
        Self { elements }
    }

    pub fn elements(&self) -> &[String] {
        &self.elements
    }

    pub fn shared(elements: Vec<String>) -> Arc<Self> {
        Arc::new(Self::new(elements))
    }
}

/// The operation kind of a pending local change.
///
/// Add, delete, and modrdn always replay, even on fractional agreements;
/// only modifies are subject to the fractional filter, carrying the
/// attribute types they touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOp {
    Add,
    Delete,
    Modify { attrs: Vec<String> },
    ModRdn,
}

impl ChangeOp {
    /// Attribute types touched by a modify; empty for other operations.
    pub fn mod_attrs(&self) -> &[String] {
        match self {
            ChangeOp::Modify { attrs } => attrs,
            _ => &[],
        }
    }
}

/// A change logged on the local database, offered to each agreement
/// for delivery.
#[derive(Debug, Clone)]
pub struct PendingChange {
    pub target: Dn,
    pub op: ChangeOp,
}

impl PendingChange {
    pub fn new(target: impl Into<Dn>, op: ChangeOp) -> Self {
        Self {
            target: target.into(),
            op,
        }
    }

    pub fn modify(target: impl Into<Dn>, attrs: &[&str]) -> Self {
        Self::new(
            target,
            ChangeOp::Modify {
                attrs: attrs.iter().map(|a| a.to_string()).collect(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csn_accessors() {
        let csn = Csn::new("67a1b2c3000000030000", 3);
        assert_eq!(csn.as_str(), "67a1b2c3000000030000");
        assert_eq!(csn.replica_id(), 3);
    }

    #[test]
    fn test_ruv_shared_ownership() {
        let ruv = ConsumerRuv::shared(vec!["{replica 3} csn1 csn2".to_string()]);
        let reader = Arc::clone(&ruv);
        drop(ruv);
        assert_eq!(reader.elements().len(), 1);
    }

    #[test]
    fn test_mod_attrs_only_for_modify() {
        let m = PendingChange::modify("uid=u,dc=x", &["mail"]);
        assert_eq!(m.op.mod_attrs(), ["mail".to_string()]);
        assert!(ChangeOp::Add.mod_attrs().is_empty());
        assert!(ChangeOp::ModRdn.mod_attrs().is_empty());
    }
}
