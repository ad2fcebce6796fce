//! Configuration parsing for replication agreements.
//!
//! This module maps a [`ConfigRecord`] (the attribute bag stored in the
//! directory) into a typed [`AgreementSettings`] value, owning all defaults
//! and defaulting rules.
//!
//! # Defaults
//!
//! | Setting | Default |
//! |---------|---------|
//! | transport | plain LDAP |
//! | bind method | SIMPLE |
//! | timeout | 120 s |
//! | flow-control window / pause | 1000 / 2000 ms (LMDB backend: 50 / 200 ms) |
//! | wait-for-async-results | 100 ms |
//! | enabled | on |
//! | ignore-missing-change | never |
//!
//! # Fractional lists
//!
//! The exclude-list grammar is
//! `"(objectclass=*) $ EXCLUDE attr [attr ...]"`: the leading filter must
//! match exactly, the `$ EXCLUDE ` literal is required, and attribute names
//! are space-separated. The process-wide default exclude list (served by the
//! directory from its plugin default-config entry) is merged in first, with
//! case-insensitive de-duplication. A fixed set of structural attributes can
//! never be excluded; they are filtered out and returned separately so the
//! caller can log an administrative error.

use crate::dn::Dn;
use crate::record::{self, ConfigRecord};
use crate::validate;
use serde::{Deserialize, Serialize};

/// Default outbound LDAP operation timeout (seconds).
pub const DEFAULT_TIMEOUT_SECS: i64 = 120;
/// Entries sent without acknowledgment before pausing (bdb backend).
pub const DEFAULT_FLOW_WINDOW: i64 = 1000;
/// Pause in msec when the flow-control window overflows (bdb backend).
pub const DEFAULT_FLOW_PAUSE_MS: i64 = 2000;
/// Entries sent without acknowledgment before pausing (lmdb backend).
pub const LMDB_FLOW_WINDOW: i64 = 50;
/// Pause in msec when the flow-control window overflows (lmdb backend).
pub const LMDB_FLOW_PAUSE_MS: i64 = 200;
/// Default poll interval for asynchronous results (milliseconds).
pub const DEFAULT_WAIT_ASYNC_MS: i64 = 100;

/// Sentinel value of `begin-replica-refresh` that selects a total refresh.
pub const REFRESH_SENTINEL: &str = "start";

/// Attributes that can never be excluded from replication.
pub const FORBIDDEN_FRACTIONAL_ATTRS: &[&str] = &[
    "nsuniqueid",
    "modifiersname",
    "lastmodifiedtime",
    "dc",
    "o",
    "ou",
    "cn",
    "objectclass",
];

/// How the outbound connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transport {
    /// Plain LDAP.
    Plain,
    /// Implicit TLS from the first byte (LDAPS).
    Ldaps,
    /// Plain connect upgraded with StartTLS.
    StartTls,
}

impl Transport {
    /// Map a `transport-info` value. `None` and `LDAP` are plain;
    /// unrecognized values return `None` so the caller can pick the
    /// no-op or hard-error behavior.
    pub fn parse(value: Option<&str>) -> Option<Transport> {
        match value {
            None => Some(Transport::Plain),
            Some(v) if v.eq_ignore_ascii_case("LDAP") => Some(Transport::Plain),
            Some(v) if v.eq_ignore_ascii_case("SSL") || v.eq_ignore_ascii_case("LDAPS") => {
                Some(Transport::Ldaps)
            }
            Some(v) if v.eq_ignore_ascii_case("TLS") || v.eq_ignore_ascii_case("StartTLS") => {
                Some(Transport::StartTls)
            }
            Some(_) => None,
        }
    }
}

/// How to authenticate against the remote replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindMethod {
    Simple,
    TlsClientCert,
    SaslGssapi,
    SaslDigestMd5,
}

impl BindMethod {
    /// Map a `replica-bind-method` value; unrecognized values fall back
    /// to SIMPLE.
    pub fn parse(value: Option<&str>) -> BindMethod {
        match value {
            None => BindMethod::Simple,
            Some(v) if v.eq_ignore_ascii_case("SIMPLE") => BindMethod::Simple,
            Some(v) if v.eq_ignore_ascii_case("SSLCLIENTAUTH") => BindMethod::TlsClientCert,
            Some(v) if v.eq_ignore_ascii_case("SASL/GSSAPI") => BindMethod::SaslGssapi,
            Some(v) if v.eq_ignore_ascii_case("SASL/DIGEST-MD5") => BindMethod::SaslDigestMd5,
            Some(_) => BindMethod::Simple,
        }
    }

    /// Bootstrap binds only support SIMPLE and SSLCLIENTAUTH; anything
    /// else is an error carrying the offending value.
    pub fn parse_bootstrap(value: Option<&str>) -> Result<BindMethod, String> {
        match value {
            None => Ok(BindMethod::Simple),
            Some(v) if v.eq_ignore_ascii_case("SIMPLE") => Ok(BindMethod::Simple),
            Some(v) if v.eq_ignore_ascii_case("SSLCLIENTAUTH") => Ok(BindMethod::TlsClientCert),
            Some(v) => Err(v.to_string()),
        }
    }
}

/// Handling of changes missing from the changelog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IgnoreMissing {
    Never,
    Once,
    Always,
}

impl IgnoreMissing {
    pub fn parse(value: &str) -> Option<IgnoreMissing> {
        if value.eq_ignore_ascii_case("off") || value.eq_ignore_ascii_case("never") {
            Some(IgnoreMissing::Never)
        } else if value.eq_ignore_ascii_case("on") || value.eq_ignore_ascii_case("once") {
            Some(IgnoreMissing::Once)
        } else if value.eq_ignore_ascii_case("always") {
            Some(IgnoreMissing::Always)
        } else {
            None
        }
    }
}

/// Initial protocol state selected for this configuration revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoInitialize {
    Incremental,
    Total,
}

/// Storage flavor hosting the replicated subtree; selects flow-control
/// defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendFlavor {
    Lmdb,
    Bdb,
}

/// Agreement variant discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgreementType {
    MultiSupplier,
    Windows,
}

/// Identity of the local supplier instance, used for the deterministic
/// session-id prefix.
#[derive(Debug, Clone, Default)]
pub struct LocalInstance {
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub secure_port: Option<u16>,
}

/// Inputs the parser needs beyond the record itself.
#[derive(Debug, Clone)]
pub struct ParseContext {
    /// Backend flavor of the replicated subtree (flow-control defaults).
    pub backend_flavor: BackendFlavor,
    /// Process-wide default exclude lists, one grammar string per value.
    pub default_fractional: Vec<String>,
}

impl Default for ParseContext {
    fn default() -> Self {
        Self {
            backend_flavor: BackendFlavor::Bdb,
            default_fractional: Vec::new(),
        }
    }
}

/// The typed form of an agreement's configuration record.
#[derive(Debug, Clone)]
pub struct AgreementSettings {
    pub hostname: String,
    pub port: u16,
    pub transport: Transport,
    pub bind_dn: String,
    pub credentials: Vec<u8>,
    pub bind_method: BindMethod,
    pub bootstrap_bind_dn: String,
    pub bootstrap_credentials: Vec<u8>,
    pub bootstrap_transport: Transport,
    pub bootstrap_bind_method: BindMethod,
    pub subtree: Dn,
    pub timeout_secs: i64,
    pub busy_wait_secs: i64,
    pub pause_secs: i64,
    pub flow_window: i64,
    pub flow_pause_ms: i64,
    pub wait_async_ms: i64,
    pub ignore_missing: IgnoreMissing,
    pub enabled: bool,
    pub auto_initialize: AutoInitialize,
    pub fractional_attrs: Option<Vec<String>>,
    pub fractional_attrs_total: Option<Vec<String>>,
    pub strip_attrs: Option<Vec<String>>,
    pub schedule_spec: Option<String>,
    pub protocol_timeout_secs: u64,
    pub agreement_type: AgreementType,
    pub consumer_ruv: Option<Vec<String>>,
    pub last_init_start: i64,
    pub last_init_end: i64,
    pub last_init_status: Option<String>,
}

/// A successfully parsed record, plus anything the caller should log.
#[derive(Debug, Clone)]
pub struct ParsedAgreement {
    pub settings: AgreementSettings,
    /// Forbidden attributes removed from the incremental exclude list.
    pub denied_attrs: Vec<String>,
    /// Forbidden attributes removed from the total exclude list.
    pub denied_attrs_total: Vec<String>,
    /// Non-fatal oddities (bad exclude-list grammar, ignored values).
    pub warnings: Vec<String>,
}

impl AgreementSettings {
    /// Parse and validate a configuration record.
    ///
    /// All diagnostics are collected; any diagnostic at all means the
    /// record is rejected and no agreement is created.
    pub fn parse(
        record: &ConfigRecord,
        ctx: &ParseContext,
    ) -> std::result::Result<ParsedAgreement, Vec<String>> {
        let mut diags: Vec<String> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        let auto_initialize = match record.get(record::ATTR_REFRESH) {
            Some(v) if v.eq_ignore_ascii_case(REFRESH_SENTINEL) => AutoInitialize::Total,
            _ => AutoInitialize::Incremental,
        };

        let hostname = record.get(record::ATTR_HOST).unwrap_or("").to_string();

        let port = match record.get(record::ATTR_PORT) {
            None => 0,
            Some(v) => match v.parse::<u32>() {
                Ok(p) if (1..=65535).contains(&p) => p as u16,
                _ => {
                    diags.push(format!("invalid port number \"{v}\", expected 1..65535"));
                    0
                }
            },
        };

        // Unrecognized primary transport is a no-op at parse time too.
        let transport =
            Transport::parse(record.get(record::ATTR_TRANSPORT)).unwrap_or(Transport::Plain);

        let bind_dn = record.get(record::ATTR_BIND_DN).unwrap_or("").to_string();
        let credentials = record.get_bytes(record::ATTR_CREDENTIALS).unwrap_or_default();
        let bind_method = BindMethod::parse(record.get(record::ATTR_BIND_METHOD));

        let bootstrap_bind_dn = record
            .get(record::ATTR_BOOTSTRAP_BIND_DN)
            .unwrap_or("")
            .to_string();
        let bootstrap_credentials = record
            .get_bytes(record::ATTR_BOOTSTRAP_CREDENTIALS)
            .unwrap_or_default();
        let bootstrap_transport =
            match Transport::parse(record.get(record::ATTR_BOOTSTRAP_TRANSPORT)) {
                Some(t) => t,
                None => {
                    diags.push(format!(
                        "invalid bootstrap transport \"{}\"",
                        record.get(record::ATTR_BOOTSTRAP_TRANSPORT).unwrap_or("")
                    ));
                    Transport::Plain
                }
            };
        let bootstrap_bind_method =
            match BindMethod::parse_bootstrap(record.get(record::ATTR_BOOTSTRAP_BIND_METHOD)) {
                Ok(m) => m,
                Err(v) => {
                    diags.push(format!(
                        "invalid bootstrap bind method \"{v}\", expected SIMPLE or SSLCLIENTAUTH"
                    ));
                    BindMethod::Simple
                }
            };

        let subtree = match record.get(record::ATTR_ROOT) {
            Some(v) => Dn::new(v),
            None => {
                diags.push("missing replicated subtree (replica-root)".to_string());
                Dn::new("")
            }
        };

        let timeout_secs = parse_nonneg(record, record::ATTR_TIMEOUT, &mut diags)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let busy_wait_secs = parse_nonneg(record, record::ATTR_BUSY_WAIT, &mut diags).unwrap_or(0);
        let pause_secs = parse_nonneg(record, record::ATTR_PAUSE, &mut diags).unwrap_or(0);

        let (default_window, default_pause) = match ctx.backend_flavor {
            BackendFlavor::Lmdb => (LMDB_FLOW_WINDOW, LMDB_FLOW_PAUSE_MS),
            BackendFlavor::Bdb => (DEFAULT_FLOW_WINDOW, DEFAULT_FLOW_PAUSE_MS),
        };
        let flow_window =
            parse_nonneg(record, record::ATTR_FLOW_WINDOW, &mut diags).unwrap_or(default_window);
        let flow_pause_ms =
            parse_nonneg(record, record::ATTR_FLOW_PAUSE, &mut diags).unwrap_or(default_pause);

        let wait_async_ms = match record.get(record::ATTR_WAIT_ASYNC) {
            Some(v) => match v.parse::<i64>() {
                Ok(n) if n > 0 => n,
                _ => DEFAULT_WAIT_ASYNC_MS,
            },
            None => DEFAULT_WAIT_ASYNC_MS,
        };

        let ignore_missing = match record.get(record::ATTR_IGNORE_MISSING) {
            Some(v) => match IgnoreMissing::parse(v) {
                Some(m) => m,
                None => {
                    warnings.push(format!("ignoring invalid {} value \"{v}\"", record::ATTR_IGNORE_MISSING));
                    IgnoreMissing::Never
                }
            },
            None => IgnoreMissing::Never,
        };

        let enabled = match record.get(record::ATTR_ENABLED) {
            None => true,
            Some(v) if v.eq_ignore_ascii_case("on") => true,
            Some(v) if v.eq_ignore_ascii_case("off") => false,
            Some(v) => {
                diags.push(format!(
                    "invalid value for {} ({v}), value must be \"on\" or \"off\"",
                    record::ATTR_ENABLED
                ));
                true
            }
        };

        let schedule_spec = record.get(record::ATTR_SCHEDULE).map(String::from);

        let protocol_timeout_secs = match record.get(record::ATTR_PROTOCOL_TIMEOUT) {
            Some(v) => match v.parse::<u64>() {
                Ok(n) => n,
                Err(_) => {
                    diags.push(format!("invalid protocol timeout \"{v}\""));
                    0
                }
            },
            None => 0,
        };

        let agreement_type = match record.get(record::ATTR_AGREEMENT_TYPE) {
            Some(v) if v.eq_ignore_ascii_case("windows") => AgreementType::Windows,
            _ => AgreementType::MultiSupplier,
        };

        let consumer_ruv = {
            let vals = record.get_all(record::ATTR_CONSUMER_RUV);
            if vals.is_empty() {
                None
            } else {
                Some(vals.to_vec())
            }
        };

        let last_init_start = parse_time(record.get(record::ATTR_LAST_INIT_START));
        let last_init_end = parse_time(record.get(record::ATTR_LAST_INIT_END));
        let last_init_status = record.get(record::ATTR_LAST_INIT_STATUS).map(String::from);

        // Incremental exclude list: process-wide defaults first, then the
        // agreement's own list, de-duplicated.
        let mut frac: Vec<String> = Vec::new();
        for value in &ctx.default_fractional {
            match parse_exclude_list(value) {
                Ok(attrs) => merge_unique(&mut frac, attrs),
                Err(e) => warnings.push(format!("bad default exclude list \"{value}\": {e}")),
            }
        }
        if let Some(value) = record.get(record::ATTR_FRACTIONAL_LIST) {
            match parse_exclude_list(value) {
                Ok(attrs) => merge_unique(&mut frac, attrs),
                Err(e) => warnings.push(format!("bad exclude list \"{value}\": {e}")),
            }
        }
        let denied_attrs = filter_forbidden(&mut frac);
        let fractional_attrs = if frac.is_empty() { None } else { Some(frac) };

        let mut denied_attrs_total = Vec::new();
        let fractional_attrs_total = match record.get(record::ATTR_FRACTIONAL_LIST_TOTAL) {
            Some(value) => match parse_exclude_list(value) {
                Ok(mut attrs) => {
                    denied_attrs_total = filter_forbidden(&mut attrs);
                    Some(attrs)
                }
                Err(e) => {
                    warnings.push(format!("bad total exclude list \"{value}\": {e}"));
                    None
                }
            },
            None => None,
        };

        let strip_attrs = record.get(record::ATTR_STRIP_ATTRS).map(|v| {
            v.split_ascii_whitespace()
                .map(String::from)
                .collect::<Vec<_>>()
        });

        let settings = AgreementSettings {
            hostname,
            port,
            transport,
            bind_dn,
            credentials,
            bind_method,
            bootstrap_bind_dn,
            bootstrap_credentials,
            bootstrap_transport,
            bootstrap_bind_method,
            subtree,
            timeout_secs,
            busy_wait_secs,
            pause_secs,
            flow_window,
            flow_pause_ms,
            wait_async_ms,
            ignore_missing,
            enabled,
            auto_initialize,
            fractional_attrs,
            fractional_attrs_total,
            strip_attrs,
            schedule_spec,
            protocol_timeout_secs,
            agreement_type,
            consumer_ruv,
            last_init_start,
            last_init_end,
            last_init_status,
        };

        diags.extend(validate::check(&settings));
        if diags.is_empty() {
            Ok(ParsedAgreement {
                settings,
                denied_attrs,
                denied_attrs_total,
                warnings,
            })
        } else {
            Err(diags)
        }
    }
}

/// Compute the display label `agmt="<rdn>" (<short-host>:<port>)` where
/// the short host is the part before the first dot.
pub fn long_name(rdn: &str, hostname: &str, port: u16) -> String {
    let host = if hostname.is_empty() {
        "(unknown)"
    } else {
        hostname
    };
    let short = host.split('.').next().unwrap_or(host);
    format!("agmt=\"{rdn}\" ({short}:{port})")
}

/// Parse one exclude-list value. The grammar is strict: the literal
/// `(objectclass=*) ` filter, the literal `$ EXCLUDE `, then
/// space-separated attribute names (case-insensitively de-duplicated).
pub fn parse_exclude_list(value: &str) -> std::result::Result<Vec<String>, String> {
    const FILTER: &str = "(objectclass=*) ";
    const EXCLUDE: &str = "$ EXCLUDE ";

    let rest = value
        .strip_prefix(FILTER)
        .ok_or_else(|| format!("expected leading \"{}\"", FILTER.trim_end()))?;
    let rest = rest
        .strip_prefix(EXCLUDE)
        .ok_or_else(|| format!("expected \"{}\" keyword", EXCLUDE.trim_end()))?;

    let mut attrs: Vec<String> = Vec::new();
    for token in rest.split(' ').filter(|t| !t.is_empty()) {
        if !contains_attr(&attrs, token) {
            attrs.push(token.to_string());
        }
    }
    Ok(attrs)
}

/// Case-insensitive attribute-name membership.
pub fn contains_attr(list: &[String], name: &str) -> bool {
    list.iter().any(|a| a.eq_ignore_ascii_case(name))
}

/// Merge `extra` into `base`, skipping names already present.
pub fn merge_unique(base: &mut Vec<String>, extra: Vec<String>) {
    for attr in extra {
        if !contains_attr(base, &attr) {
            base.push(attr);
        }
    }
}

/// Remove forbidden attributes in place, returning the removed names.
pub fn filter_forbidden(attrs: &mut Vec<String>) -> Vec<String> {
    let mut denied = Vec::new();
    attrs.retain(|a| {
        if FORBIDDEN_FRACTIONAL_ATTRS
            .iter()
            .any(|f| f.eq_ignore_ascii_case(a))
        {
            denied.push(a.clone());
            false
        } else {
            true
        }
    });
    denied
}

fn parse_nonneg(record: &ConfigRecord, attr: &str, diags: &mut Vec<String>) -> Option<i64> {
    match record.get(attr) {
        None => None,
        Some(v) => match v.parse::<i64>() {
            Ok(n) if n >= 0 => Some(n),
            _ => {
                diags.push(format!("invalid {attr} value \"{v}\", expected a non-negative integer"));
                None
            }
        },
    }
}

/// Parse a persisted ISO-8601 timestamp into epoch seconds; anything
/// unparsable means "never".
fn parse_time(value: Option<&str>) -> i64 {
    let Some(v) = value else { return 0 };
    match humantime::parse_rfc3339_weak(v) {
        Ok(t) => t
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0),
        Err(_) => 0,
    }
}
