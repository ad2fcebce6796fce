//! Configuration records.
//!
//! An agreement is configured by a record stored in the directory itself:
//! a distinguished name plus a bag of attribute/value pairs. Attribute
//! names are matched case-insensitively. The constants below are the
//! complete schema the parser understands.

use crate::dn::Dn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Remote hostname.
pub const ATTR_HOST: &str = "replica-host";
/// Remote port, integer 1..=65535.
pub const ATTR_PORT: &str = "replica-port";
/// `LDAP`, `LDAPS`, `SSL`, `StartTLS`, or `TLS`.
pub const ATTR_TRANSPORT: &str = "transport-info";
/// Bind DN, may be empty.
pub const ATTR_BIND_DN: &str = "replica-bind-dn";
/// Opaque credential bytes.
pub const ATTR_CREDENTIALS: &str = "replica-credentials";
/// `SIMPLE`, `SSLCLIENTAUTH`, `SASL/GSSAPI`, or `SASL/DIGEST-MD5`.
pub const ATTR_BIND_METHOD: &str = "replica-bind-method";
/// Fallback bind DN for replica acquisition.
pub const ATTR_BOOTSTRAP_BIND_DN: &str = "replica-bootstrap-bind-dn";
/// Fallback credential bytes.
pub const ATTR_BOOTSTRAP_CREDENTIALS: &str = "replica-bootstrap-credentials";
/// Fallback transport.
pub const ATTR_BOOTSTRAP_TRANSPORT: &str = "replica-bootstrap-transport-info";
/// Fallback bind method, restricted to `SIMPLE` or `SSLCLIENTAUTH`.
pub const ATTR_BOOTSTRAP_BIND_METHOD: &str = "replica-bootstrap-bind-method";
/// DN of the replicated subtree.
pub const ATTR_ROOT: &str = "replica-root";
/// Fractional exclude list, `(objectclass=*) $ EXCLUDE a b c` grammar.
pub const ATTR_FRACTIONAL_LIST: &str = "replicated-attribute-list";
/// Fractional exclude list for total refresh.
pub const ATTR_FRACTIONAL_LIST_TOTAL: &str = "replicated-attribute-list-total";
/// Space-separated attributes stripped from emptied mods.
pub const ATTR_STRIP_ATTRS: &str = "replica-strip-attrs";
/// Opaque schedule syntax, consumed by the schedule collaborator.
pub const ATTR_SCHEDULE: &str = "replica-update-schedule";
/// Outbound operation timeout, non-negative seconds.
pub const ATTR_TIMEOUT: &str = "replica-timeout";
/// Back-off after a BUSY response, non-negative seconds.
pub const ATTR_BUSY_WAIT: &str = "busy-wait-time";
/// Pause between sessions, non-negative seconds.
pub const ATTR_PAUSE: &str = "session-pause-time";
/// Max in-flight unacknowledged entries.
pub const ATTR_FLOW_WINDOW: &str = "flow-control-window";
/// Pause in milliseconds on flow-control overflow.
pub const ATTR_FLOW_PAUSE: &str = "flow-control-pause";
/// `on` or `off`, case-insensitive.
pub const ATTR_ENABLED: &str = "replica-enabled";
/// `off`/`never`, `on`/`once`, or `always`.
pub const ATTR_IGNORE_MISSING: &str = "replica-ignore-missing-change";
/// Sentinel `start` triggers an initial total refresh.
pub const ATTR_REFRESH: &str = "begin-replica-refresh";
/// Poll interval for async results, positive milliseconds.
pub const ATTR_WAIT_ASYNC: &str = "wait-for-async-results";
/// Worker stop timeout, seconds.
pub const ATTR_PROTOCOL_TIMEOUT: &str = "replica-protocol-timeout";
/// Persisted by the engine, read back on restart.
pub const ATTR_LAST_INIT_START: &str = "replica-last-init-start";
/// Persisted by the engine, read back on restart.
pub const ATTR_LAST_INIT_END: &str = "replica-last-init-end";
/// Persisted by the engine, read back on restart.
pub const ATTR_LAST_INIT_STATUS: &str = "replica-last-init-status";
/// `windows` marks the windows-sync agreement variant.
pub const ATTR_AGREEMENT_TYPE: &str = "agreement-type";
/// Consumer RUV elements observed on a previous run.
pub const ATTR_CONSUMER_RUV: &str = "consumer-ruv";

/// A configuration record: a DN and its attribute/value pairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigRecord {
    dn: Dn,
    attrs: HashMap<String, Vec<String>>,
}

impl ConfigRecord {
    /// Create an empty record at the given DN.
    pub fn new(dn: impl Into<Dn>) -> Self {
        Self {
            dn: dn.into(),
            attrs: HashMap::new(),
        }
    }

    /// Builder-style attribute set, for tests and fixtures.
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set(name, vec![value.into()]);
        self
    }

    /// Replace all values of an attribute.
    pub fn set(&mut self, name: &str, values: Vec<String>) {
        self.attrs.insert(name.to_ascii_lowercase(), values);
    }

    /// Remove an attribute.
    pub fn remove(&mut self, name: &str) {
        self.attrs.remove(&name.to_ascii_lowercase());
    }

    /// The record's DN.
    pub fn dn(&self) -> &Dn {
        &self.dn
    }

    /// First value of an attribute, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attrs
            .get(&name.to_ascii_lowercase())
            .and_then(|v| v.first())
            .map(|s| s.as_str())
    }

    /// All values of an attribute.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.attrs
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// First value as opaque bytes (credentials).
    pub fn get_bytes(&self, name: &str) -> Option<Vec<u8>> {
        self.get(name).map(|s| s.as_bytes().to_vec())
    }

    /// True if the attribute is present with at least one value.
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_names_case_insensitive() {
        let rec = ConfigRecord::new("cn=a,dc=x").with("Replica-Host", "peer.example.com");
        assert_eq!(rec.get(ATTR_HOST), Some("peer.example.com"));
        assert_eq!(rec.get("REPLICA-HOST"), Some("peer.example.com"));
    }

    #[test]
    fn test_missing_attribute() {
        let rec = ConfigRecord::new("cn=a,dc=x");
        assert_eq!(rec.get(ATTR_PORT), None);
        assert!(rec.get_all(ATTR_PORT).is_empty());
        assert!(!rec.has(ATTR_PORT));
    }

    #[test]
    fn test_multi_valued_attribute() {
        let mut rec = ConfigRecord::new("cn=a,dc=x");
        rec.set(ATTR_CONSUMER_RUV, vec!["e1".to_string(), "e2".to_string()]);
        assert_eq!(rec.get(ATTR_CONSUMER_RUV), Some("e1"));
        assert_eq!(rec.get_all(ATTR_CONSUMER_RUV).len(), 2);
    }

    #[test]
    fn test_get_bytes() {
        let rec = ConfigRecord::new("cn=a,dc=x").with(ATTR_CREDENTIALS, "secret");
        assert_eq!(rec.get_bytes(ATTR_CREDENTIALS), Some(b"secret".to_vec()));
    }

    #[test]
    fn test_remove() {
        let mut rec = ConfigRecord::new("cn=a,dc=x").with(ATTR_HOST, "h");
        rec.remove(ATTR_HOST);
        assert!(!rec.has(ATTR_HOST));
    }
}
