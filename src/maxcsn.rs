// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The persisted agreement-maxcsn value.
//!
//! Each agreement records the highest CSN confirmed delivered to its peer
//! as one value of a multi-valued attribute on the replicated subtree's
//! RUV tombstone entry:
//!
//! ```text
//! <subtree-dn>;<agmt-rdn>;<host>;<port>;<rid>;<csn>
//! ```
//!
//! `<rid>` is either the decimal consumer replica id or the literal
//! `unavailable` when the consumer has not been contacted yet. The format
//! round-trips exactly; matching an agreement's own value is done on the
//! four-field prefix so both rid variants are found.

use std::fmt;

/// The literal rid slot used before the consumer's replica id is known.
pub const RID_UNAVAILABLE: &str = "unavailable";

/// A parsed agreement-maxcsn value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgreementMaxCsn {
    pub subtree: String,
    pub rdn: String,
    pub host: String,
    pub port: u16,
    /// `None` renders as `unavailable`.
    pub rid: Option<u16>,
    pub csn: String,
}

impl AgreementMaxCsn {
    /// Parse a persisted value. Exactly six `;`-separated fields are
    /// required.
    pub fn parse(value: &str) -> Option<Self> {
        let fields: Vec<&str> = value.split(';').collect();
        if fields.len() != 6 {
            return None;
        }
        let port = fields[3].parse::<u16>().ok()?;
        let rid = if fields[4].eq_ignore_ascii_case(RID_UNAVAILABLE) {
            None
        } else {
            Some(fields[4].parse::<u16>().ok()?)
        };
        Some(Self {
            subtree: fields[0].to_string(),
            rdn: fields[1].to_string(),
            host: fields[2].to_string(),
            port,
            rid,
            csn: fields[5].to_string(),
        })
    }
}

impl fmt::Display for AgreementMaxCsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rid = match self.rid {
            Some(r) => r.to_string(),
            None => RID_UNAVAILABLE.to_string(),
        };
        write!(
            f,
            "{};{};{};{};{};{}",
            self.subtree, self.rdn, self.host, self.port, rid, self.csn
        )
    }
}

/// The prefix identifying one agreement's value regardless of rid slot.
pub fn prefix(subtree: &str, rdn: &str, host: &str, port: u16) -> String {
    format!("{subtree};{rdn};{host};{port};")
}

/// True if `value` belongs to the agreement identified by the prefix
/// fields, whether its rid slot holds a number or `unavailable`.
pub fn matches(value: &str, subtree: &str, rdn: &str, host: &str, port: u16) -> bool {
    value.starts_with(&prefix(subtree, rdn, host, port))
}

/// Extract the consumer replica id from a persisted value; 0 when the
/// slot is `unavailable` or malformed.
pub fn rid_of(value: &str) -> u16 {
    value
        .split(';')
        .nth(4)
        .and_then(|t| t.parse::<u16>().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_with_rid() {
        let raw = "dc=x;cn=a;h;389;3;67a1b2c3000000030000";
        let parsed = AgreementMaxCsn::parse(raw).unwrap();
        assert_eq!(parsed.rid, Some(3));
        assert_eq!(parsed.csn, "67a1b2c3000000030000");
        assert_eq!(parsed.to_string(), raw);
    }

    #[test]
    fn test_round_trip_unavailable() {
        let raw = "dc=x;cn=a;h;389;unavailable;67a1b2c3000000030000";
        let parsed = AgreementMaxCsn::parse(raw).unwrap();
        assert_eq!(parsed.rid, None);
        assert_eq!(parsed.to_string(), raw);
    }

    #[test]
    fn test_wrong_field_count_rejected() {
        assert!(AgreementMaxCsn::parse("dc=x;cn=a;h;389;3").is_none());
        assert!(AgreementMaxCsn::parse("dc=x;cn=a;h;389;3;csn;extra").is_none());
        assert!(AgreementMaxCsn::parse("").is_none());
    }

    #[test]
    fn test_bad_port_or_rid_rejected() {
        assert!(AgreementMaxCsn::parse("dc=x;cn=a;h;notaport;3;csn").is_none());
        assert!(AgreementMaxCsn::parse("dc=x;cn=a;h;389;notarid;csn").is_none());
    }

    #[test]
    fn test_prefix_match_both_variants() {
        assert!(matches("dc=x;cn=a;h;389;3;csn1", "dc=x", "cn=a", "h", 389));
        assert!(matches(
            "dc=x;cn=a;h;389;unavailable;csn1",
            "dc=x",
            "cn=a",
            "h",
            389
        ));
        assert!(!matches("dc=x;cn=b;h;389;3;csn1", "dc=x", "cn=a", "h", 389));
        assert!(!matches("dc=x;cn=a;h;390;3;csn1", "dc=x", "cn=a", "h", 389));
    }

    #[test]
    fn test_rid_of() {
        assert_eq!(rid_of("dc=x;cn=a;h;389;3;csn1"), 3);
        assert_eq!(rid_of("dc=x;cn=a;h;389;unavailable;csn1"), 0);
        assert_eq!(rid_of("garbage"), 0);
    }
}
