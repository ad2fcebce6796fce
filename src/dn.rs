//! Distinguished names in canonical form.
//!
//! Agreements compare names and decide subtree membership on the canonical
//! form of a DN: components are split on unescaped commas, trimmed, and
//! lowercased. The raw spelling is preserved for display and for the
//! persisted maxcsn format, which must round-trip exactly.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A distinguished name with its canonical (normalized) form.
///
/// Equality and hashing use the canonical form, so `CN=A, dc=X` and
/// `cn=a,dc=x` name the same entry. `as_str()` returns the raw spelling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dn {
    raw: String,
    norm: String,
}

impl Dn {
    /// Create a DN from its string form.
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let norm = normalize(&raw);
        Self { raw, norm }
    }

    /// The raw spelling as given.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The canonical form (lowercased, comma-split, trimmed).
    pub fn normalized(&self) -> &str {
        &self.norm
    }

    /// The leaf (leftmost) relative distinguished name, e.g. `cn=a`
    /// for `cn=a,cn=replica,cn=config`.
    pub fn rdn(&self) -> &str {
        match split_components(&self.raw).first() {
            Some(first) => first.trim(),
            None => "",
        }
    }

    /// True if `self` is the same entry as, or lies below, `suffix`.
    pub fn is_under(&self, suffix: &Dn) -> bool {
        let mine: Vec<&str> = split_components(&self.norm);
        let theirs: Vec<&str> = split_components(&suffix.norm);
        if theirs.len() > mine.len() {
            return false;
        }
        mine.iter()
            .rev()
            .zip(theirs.iter().rev())
            .all(|(a, b)| a == b)
    }
}

impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        self.norm == other.norm
    }
}

impl Eq for Dn {}

impl std::hash::Hash for Dn {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.norm.hash(state);
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for Dn {
    fn from(s: &str) -> Self {
        Dn::new(s)
    }
}

/// Split a DN into components on unescaped commas.
fn split_components(dn: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let bytes = dn.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b',' && (i == 0 || bytes[i - 1] != b'\\') {
            parts.push(&dn[start..i]);
            start = i + 1;
        }
        i += 1;
    }
    if start <= dn.len() && !dn.is_empty() {
        parts.push(&dn[start..]);
    }
    parts
}

fn normalize(dn: &str) -> String {
    split_components(dn)
        .iter()
        .map(|c| c.trim().to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join(",")
}
