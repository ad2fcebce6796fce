//! Property-based tests using proptest.
//!
//! These verify invariants that should hold for all inputs, helping
//! catch edge cases that unit tests might miss.

use agreement_engine::config::{self, ParseContext};
use agreement_engine::maxcsn::AgreementMaxCsn;
use agreement_engine::record::{self, ConfigRecord};
use agreement_engine::session::SessionId;
use agreement_engine::status::{
    build_update_status, ChangeCounters, ReplRc, StatusUpdate,
};
use agreement_engine::AgreementSettings;
use proptest::prelude::*;
use std::time::{Duration, UNIX_EPOCH};

fn any_repl_rc() -> impl Strategy<Value = ReplRc> {
    prop_oneof![
        Just(ReplRc::Ready),
        Just(ReplRc::Busy),
        Just(ReplRc::ExcessiveClockSkew),
        Just(ReplRc::PermissionDenied),
        Just(ReplRc::DecodingError),
        Just(ReplRc::InternalError),
        Just(ReplRc::ReleaseSucceeded),
        Just(ReplRc::Disabled),
        Just(ReplRc::UpToDate),
        Just(ReplRc::Backoff),
        Just(ReplRc::TransientError),
    ]
}

// =============================================================================
// Maxcsn Format Properties
// =============================================================================

proptest! {
    /// The six-field format round-trips exactly.
    #[test]
    fn maxcsn_round_trips(
        subtree in "[a-z]{1,8}=[a-z]{1,12}",
        rdn in "[a-z]{1,8}=[a-z]{1,12}",
        host in "[a-z][a-z0-9.-]{0,20}",
        port in 1u16..,
        rid in proptest::option::of(any::<u16>()),
        csn in "[0-9a-f]{8,20}",
    ) {
        let value = AgreementMaxCsn {
            subtree: subtree.clone(),
            rdn: rdn.clone(),
            host: host.clone(),
            port,
            rid,
            csn: csn.clone(),
        };
        let rendered = value.to_string();
        let parsed = AgreementMaxCsn::parse(&rendered).expect("rendered value must parse");
        prop_assert_eq!(parsed, value);
        prop_assert_eq!(rendered.split(';').count(), 6);
    }

    /// Prefix matching finds both the numeric-rid and `unavailable`
    /// renderings, and nothing else.
    #[test]
    fn maxcsn_prefix_matches_own_value(
        subtree in "[a-z]{1,8}=[a-z]{1,12}",
        rdn in "[a-z]{1,8}=[a-z]{1,12}",
        host in "[a-z][a-z0-9.-]{0,20}",
        port in 1u16..65535,
        rid in proptest::option::of(any::<u16>()),
        csn in "[0-9a-f]{8,20}",
    ) {
        let value = AgreementMaxCsn {
            subtree: subtree.clone(),
            rdn: rdn.clone(),
            host: host.clone(),
            port,
            rid,
            csn,
        }
        .to_string();
        prop_assert!(agreement_engine::maxcsn::matches(&value, &subtree, &rdn, &host, port));
        prop_assert!(!agreement_engine::maxcsn::matches(&value, &subtree, &rdn, &host, port + 1));
    }
}

// =============================================================================
// Session Identifier Properties
// =============================================================================

proptest! {
    /// Same inputs produce the same prefix.
    #[test]
    fn session_prefix_deterministic(
        subtree in "[a-z,=]{1,30}",
        host in "[a-z.]{1,30}",
        port in any::<u16>(),
        sport in any::<u16>(),
    ) {
        let a = SessionId::new(Some(&subtree), Some(&host), Some(port), Some(sport));
        let b = SessionId::new(Some(&subtree), Some(&host), Some(port), Some(sport));
        prop_assert_eq!(a.prefix(), b.prefix());
    }

    /// The rendered tag never outgrows its fixed log field.
    #[test]
    fn session_tag_bounded(
        subtree in "[a-z,=]{1,30}",
        host in "[a-z.]{1,30}",
        port in any::<u16>(),
        sport in any::<u16>(),
        advances in 0usize..50,
    ) {
        let mut s = SessionId::new(Some(&subtree), Some(&host), Some(port), Some(sport));
        for _ in 0..advances {
            s.advance();
        }
        prop_assert!(s.tag().len() <= 15);
    }

    /// The counter visits exactly 1..=999 and wraps.
    #[test]
    fn session_counter_cycles(advances in 1usize..3000) {
        let mut s = SessionId::new(Some("dc=x"), Some("h"), Some(389), Some(636));
        for _ in 0..advances {
            s.advance();
            prop_assert!((1..=999).contains(&s.counter()));
        }
        prop_assert_eq!(s.counter(), (advances % 999) as u16 + 1);
    }
}

// =============================================================================
// Exclude-list Grammar Properties
// =============================================================================

proptest! {
    /// Rendering a list into the grammar and parsing it back yields the
    /// de-duplicated original.
    #[test]
    fn exclude_list_round_trips(attrs in proptest::collection::vec("[a-zA-Z][a-zA-Z0-9]{0,15}", 0..8)) {
        let rendered = format!("(objectclass=*) $ EXCLUDE {}", attrs.join(" "));
        let parsed = config::parse_exclude_list(&rendered).expect("grammar must parse");

        let mut expected: Vec<String> = Vec::new();
        for a in &attrs {
            if !config::contains_attr(&expected, a) {
                expected.push(a.clone());
            }
        }
        prop_assert_eq!(parsed, expected);
    }

    /// Forbidden-attribute filtering removes exactly the forbidden
    /// names, preserving order of the rest.
    #[test]
    fn forbidden_filter_partition(attrs in proptest::collection::vec(
        prop_oneof![
            Just("cn".to_string()),
            Just("objectclass".to_string()),
            "[a-z]{3,10}".prop_map(|s| s),
        ],
        0..10,
    )) {
        let mut list = attrs.clone();
        let denied = config::filter_forbidden(&mut list);
        prop_assert_eq!(list.len() + denied.len(), attrs.len());
        for d in &denied {
            prop_assert!(
                config::FORBIDDEN_FRACTIONAL_ATTRS.iter().any(|f| f.eq_ignore_ascii_case(d))
            );
        }
        for kept in &list {
            prop_assert!(
                !config::FORBIDDEN_FRACTIONAL_ATTRS.iter().any(|f| f.eq_ignore_ascii_case(kept))
            );
        }
    }
}

// =============================================================================
// Status Builder Properties
// =============================================================================

proptest! {
    /// Every written JSON line parses and carries a known state color.
    #[test]
    fn status_json_always_valid(
        ldap_rc in prop_oneof![Just(0), 1i32..100],
        repl_rc in any_repl_rc(),
        message in proptest::option::of("[ -~]{0,40}"),
        secs in 1_000_000_000i64..2_000_000_000,
    ) {
        let now = UNIX_EPOCH + Duration::from_secs(secs as u64);
        let update = build_update_status(
            ldap_rc,
            repl_rc,
            message.as_deref(),
            "agmt=\"cn=a\" (h:389)",
            now,
        );
        match update {
            StatusUpdate::Unchanged => prop_assert_eq!(repl_rc, ReplRc::UpToDate),
            StatusUpdate::Clear => {
                prop_assert_eq!(ldap_rc, 0);
                prop_assert_eq!(repl_rc, ReplRc::Ready);
                prop_assert!(message.is_none());
            }
            StatusUpdate::Set { human, json } => {
                prop_assert!(!human.is_empty());
                let value: serde_json::Value = serde_json::from_str(&json).unwrap();
                let state = value["state"].as_str().unwrap();
                prop_assert!(["green", "amber", "red"].contains(&state));
                prop_assert_eq!(value["ldap_rc"].as_str().unwrap(), ldap_rc.to_string());
                prop_assert!(value["date"].as_str().unwrap().ends_with('Z'));
            }
        }
    }

    /// Non-zero LDAP codes are always red; busy/backoff/transient under
    /// a clean LDAP session are always amber.
    #[test]
    fn status_color_table(repl_rc in any_repl_rc(), secs in 1_000_000_000i64..2_000_000_000) {
        let now = UNIX_EPOCH + Duration::from_secs(secs as u64);
        if let StatusUpdate::Set { json, .. } =
            build_update_status(49, repl_rc, None, "a", now)
        {
            let value: serde_json::Value = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(&value["state"], "red");
        }
        if let StatusUpdate::Set { json, .. } =
            build_update_status(0, repl_rc, None, "a", now)
        {
            let value: serde_json::Value = serde_json::from_str(&json).unwrap();
            let expected_amber = matches!(
                repl_rc,
                ReplRc::Busy | ReplRc::Backoff | ReplRc::TransientError
            );
            prop_assert_eq!(value["state"] == "amber", expected_amber);
        }
    }
}

// =============================================================================
// Change Counter Properties
// =============================================================================

proptest! {
    /// At most one record per rid, and totals are conserved.
    #[test]
    fn change_counters_conserve_totals(ops in proptest::collection::vec((any::<u16>(), any::<bool>()), 0..200)) {
        let mut counters = ChangeCounters::new();
        for (rid, skipped) in &ops {
            counters.increment(*rid, *skipped);
        }

        let mut rids: Vec<u16> = counters.as_slice().iter().map(|c| c.rid).collect();
        rids.sort_unstable();
        rids.dedup();
        prop_assert_eq!(rids.len(), counters.as_slice().len());

        let total: u64 = counters
            .as_slice()
            .iter()
            .map(|c| c.replayed + c.skipped)
            .sum();
        prop_assert_eq!(total, ops.len() as u64);
    }
}

// =============================================================================
// Parser Round-trip Properties
// =============================================================================

proptest! {
    /// Accepted records round-trip through the parsed settings (modulo
    /// default substitution).
    #[test]
    fn parse_round_trips_explicit_values(
        host in "[a-z][a-z0-9]{0,15}",
        port in 1u32..=65535,
        timeout in 0i64..100_000,
        busy in 0i64..100_000,
        pause in 0i64..100_000,
        window in 0i64..100_000,
        flow_pause in 0i64..100_000,
        enabled in any::<bool>(),
    ) {
        let rec = ConfigRecord::new("cn=a,cn=replica,cn=config")
            .with(record::ATTR_HOST, host.clone())
            .with(record::ATTR_PORT, port.to_string())
            .with(record::ATTR_ROOT, "dc=x")
            .with(record::ATTR_BIND_DN, "cn=u")
            .with(record::ATTR_CREDENTIALS, "p")
            .with(record::ATTR_TIMEOUT, timeout.to_string())
            .with(record::ATTR_BUSY_WAIT, busy.to_string())
            .with(record::ATTR_PAUSE, pause.to_string())
            .with(record::ATTR_FLOW_WINDOW, window.to_string())
            .with(record::ATTR_FLOW_PAUSE, flow_pause.to_string())
            .with(record::ATTR_ENABLED, if enabled { "on" } else { "off" });

        let parsed = AgreementSettings::parse(&rec, &ParseContext::default())
            .expect("record must parse");
        let s = parsed.settings;
        prop_assert_eq!(s.hostname, host);
        prop_assert_eq!(u32::from(s.port), port);
        prop_assert_eq!(s.timeout_secs, timeout);
        prop_assert_eq!(s.busy_wait_secs, busy);
        prop_assert_eq!(s.pause_secs, pause);
        prop_assert_eq!(s.flow_window, window);
        prop_assert_eq!(s.flow_pause_ms, flow_pause);
        prop_assert_eq!(s.enabled, enabled);
    }

    /// Ports outside 1..=65535 are always rejected.
    #[test]
    fn parse_rejects_out_of_range_ports(port in prop_oneof![Just(0u64), 65_536u64..1_000_000]) {
        let rec = ConfigRecord::new("cn=a,cn=replica,cn=config")
            .with(record::ATTR_HOST, "h")
            .with(record::ATTR_PORT, port.to_string())
            .with(record::ATTR_ROOT, "dc=x")
            .with(record::ATTR_BIND_DN, "cn=u")
            .with(record::ATTR_CREDENTIALS, "p");
        prop_assert!(AgreementSettings::parse(&rec, &ParseContext::default()).is_err());
    }
}

// =============================================================================
// Time Rendering
// =============================================================================

proptest! {
    /// Epoch rendering is ISO-8601 UTC at second precision.
    #[test]
    fn epoch_rendering_shape(secs in 0i64..4_000_000_000) {
        let rendered = agreement_engine::status::format_epoch_secs(secs);
        prop_assert!(rendered.ends_with('Z'));
        prop_assert_eq!(rendered.len(), 20);
    }
}
