//! Agreement validation.
//!
//! Pure checks over a parsed [`AgreementSettings`] value. Every structural
//! invariant lives here and only here: the parser runs these checks before
//! an agreement is created, and each setter runs them again before
//! accepting an update.

use crate::config::{AgreementSettings, BindMethod, Transport};

/// Check an agreement's settings, returning one human-readable
/// diagnostic per violated rule. An empty list means the settings
/// are valid.
pub fn check(settings: &AgreementSettings) -> Vec<String> {
    let mut diags = Vec::new();

    if settings.hostname.is_empty() {
        diags.push("missing host name".to_string());
    }
    if settings.port == 0 {
        diags.push(format!("invalid port number {}", settings.port));
    }
    if settings.timeout_secs < 0 {
        diags.push(format!("invalid timeout {}", settings.timeout_secs));
    }
    if settings.busy_wait_secs < 0 {
        diags.push(format!("invalid busy wait time {}", settings.busy_wait_secs));
    }
    if settings.pause_secs < 0 {
        diags.push(format!("invalid pausetime {}", settings.pause_secs));
    }
    if settings.flow_window < 0 {
        diags.push(format!(
            "invalid flow control window {}",
            settings.flow_window
        ));
    }
    if settings.flow_pause_ms < 0 {
        diags.push(format!("invalid flow control pause {}", settings.flow_pause_ms));
    }
    if settings.transport == Transport::Plain && settings.bind_method == BindMethod::TlsClientCert {
        diags.push(
            "cannot use SSLCLIENTAUTH if using plain LDAP - please change transport-info \
             to LDAPS or StartTLS before changing replica-bind-method to use SSLCLIENTAUTH"
                .to_string(),
        );
    }
    // Without GSSAPI or TLS client auth, a bind DN and password are required.
    if matches!(
        settings.bind_method,
        BindMethod::Simple | BindMethod::SaslDigestMd5
    ) && (settings.bind_dn.is_empty() || settings.credentials.is_empty())
    {
        let mech = match settings.bind_method {
            BindMethod::Simple => "SIMPLE",
            BindMethod::SaslDigestMd5 => "SASL/DIGEST-MD5",
            _ => "Unknown",
        };
        diags.push(format!(
            "a bind DN and password must be supplied for authentication method \"{mech}\""
        ));
    }

    diags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgreementType, AutoInitialize, IgnoreMissing};
    use crate::dn::Dn;

    fn valid_settings() -> AgreementSettings {
        AgreementSettings {
            hostname: "h".to_string(),
            port: 389,
            transport: Transport::Plain,
            bind_dn: "cn=u".to_string(),
            credentials: b"p".to_vec(),
            bind_method: BindMethod::Simple,
            bootstrap_bind_dn: String::new(),
            bootstrap_credentials: Vec::new(),
            bootstrap_transport: Transport::Plain,
            bootstrap_bind_method: BindMethod::Simple,
            subtree: Dn::new("dc=x"),
            timeout_secs: 120,
            busy_wait_secs: 0,
            pause_secs: 0,
            flow_window: 1000,
            flow_pause_ms: 2000,
            wait_async_ms: 100,
            ignore_missing: IgnoreMissing::Never,
            enabled: true,
            auto_initialize: AutoInitialize::Incremental,
            fractional_attrs: None,
            fractional_attrs_total: None,
            strip_attrs: None,
            schedule_spec: None,
            protocol_timeout_secs: 0,
            agreement_type: AgreementType::MultiSupplier,
            consumer_ruv: None,
            last_init_start: 0,
            last_init_end: 0,
            last_init_status: None,
        }
    }

    #[test]
    fn test_valid_settings_pass() {
        assert!(check(&valid_settings()).is_empty());
    }

    #[test]
    fn test_missing_host() {
        let mut s = valid_settings();
        s.hostname.clear();
        assert!(check(&s).iter().any(|d| d.contains("host")));
    }

    #[test]
    fn test_zero_port() {
        let mut s = valid_settings();
        s.port = 0;
        assert!(check(&s).iter().any(|d| d.contains("port")));
    }

    #[test]
    fn test_client_cert_over_plain_rejected() {
        let mut s = valid_settings();
        s.bind_method = BindMethod::TlsClientCert;
        assert!(check(&s).iter().any(|d| d.contains("SSLCLIENTAUTH")));

        s.transport = Transport::Ldaps;
        assert!(check(&s).is_empty());

        s.transport = Transport::StartTls;
        assert!(check(&s).is_empty());
    }

    #[test]
    fn test_simple_requires_dn_and_password() {
        let mut s = valid_settings();
        s.bind_dn.clear();
        assert!(check(&s).iter().any(|d| d.contains("SIMPLE")));

        let mut s = valid_settings();
        s.credentials.clear();
        assert!(check(&s).iter().any(|d| d.contains("bind DN and password")));
    }

    #[test]
    fn test_digest_md5_requires_dn_and_password() {
        let mut s = valid_settings();
        s.bind_method = BindMethod::SaslDigestMd5;
        s.credentials.clear();
        assert!(check(&s).iter().any(|d| d.contains("SASL/DIGEST-MD5")));
    }

    #[test]
    fn test_gssapi_needs_no_credentials() {
        let mut s = valid_settings();
        s.bind_method = BindMethod::SaslGssapi;
        s.bind_dn.clear();
        s.credentials.clear();
        assert!(check(&s).is_empty());
    }

    #[test]
    fn test_negative_times_flagged() {
        let mut s = valid_settings();
        s.timeout_secs = -1;
        s.busy_wait_secs = -2;
        s.pause_secs = -3;
        s.flow_window = -4;
        s.flow_pause_ms = -5;
        assert_eq!(check(&s).len(), 5);
    }
}
