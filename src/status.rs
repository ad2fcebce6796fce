// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-agreement status bookkeeping.
//!
//! Two rotating status slots (last update and last init) each hold a
//! start/end timestamp, a short human line, and a structured JSON line.
//! The builders here are pure mappings from `(ldap_rc, repl_rc, conn_rc,
//! message)` to both lines; the state color follows a fixed table:
//!
//! | Condition | State |
//! |-----------|-------|
//! | repl rc = up-to-date | unchanged, no status write |
//! | ldap rc ≠ 0 | red |
//! | busy / transient / backoff | amber |
//! | release succeeded | green |
//! | disabled | red, with a remediation hint |
//! | other non-zero repl rc | red |
//! | all clear with a message | green |
//! | all clear, no message | both lines reset |
//!
//! Change counters track replayed/skipped totals per remote replica id
//! and render on demand as `rid:replayed/skipped` tokens.

use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Initial capacity of the per-replica change-counter list. The list
/// grows past this when a topology has more suppliers.
pub const MAX_SUPPLIERS: usize = 16;

/// Result of a replica acquisition attempt, as reported by the wire
/// protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ReplRc {
    Ready = 0,
    Busy = 1,
    ExcessiveClockSkew = 2,
    PermissionDenied = 3,
    DecodingError = 4,
    UnknownUpdateProtocol = 5,
    NoSuchReplica = 6,
    BelowPurgePoint = 7,
    InternalError = 8,
    ReleaseSucceeded = 9,
    LegacyConsumer = 10,
    ReplicaIdError = 11,
    Disabled = 12,
    UpToDate = 13,
    Backoff = 14,
    TransientError = 15,
}

impl ReplRc {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn text(self) -> &'static str {
        match self {
            ReplRc::Ready => "replica acquired",
            ReplRc::Busy => "replica busy",
            ReplRc::ExcessiveClockSkew => "excessive clock skew",
            ReplRc::PermissionDenied => "permission denied",
            ReplRc::DecodingError => "decoding error",
            ReplRc::UnknownUpdateProtocol => "unknown update protocol",
            ReplRc::NoSuchReplica => "no such replica",
            ReplRc::BelowPurgePoint => "csn below purge point",
            ReplRc::InternalError => "internal error",
            ReplRc::ReleaseSucceeded => "replica released",
            ReplRc::LegacyConsumer => "replica is a legacy consumer",
            ReplRc::ReplicaIdError => "duplicate replica id",
            ReplRc::Disabled => "replication disabled",
            ReplRc::UpToDate => "no change to send",
            ReplRc::Backoff => "backing off",
            ReplRc::TransientError => "transient error",
        }
    }
}

/// Result of the outbound connection attempt, reported during a total
/// refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ConnRc {
    Success = 0,
    OperationFailed = 1,
    NotConnected = 2,
    SslNotEnabled = 3,
    Timeout = 4,
}

impl ConnRc {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn text(self) -> &'static str {
        match self {
            ConnRc::Success => "operation success",
            ConnRc::OperationFailed => "operation failure",
            ConnRc::NotConnected => "connection lost",
            ConnRc::SslNotEnabled => "SSL not enabled",
            ConnRc::Timeout => "timed out",
        }
    }
}

/// Short text for an LDAP result code.
pub fn ldap_rc_text(rc: i32) -> &'static str {
    match rc {
        0 => "success",
        1 => "Operations error",
        2 => "Protocol error",
        3 => "Time limit exceeded",
        4 => "Size limit exceeded",
        10 => "Referral received",
        16 => "No such attribute",
        32 => "No such object",
        34 => "Invalid DN syntax",
        49 => "Invalid credentials",
        50 => "Insufficient access",
        51 => "Server is busy",
        52 => "Server is unavailable",
        53 => "Server is unwilling to perform",
        68 => "Already exists",
        81 => "Can't contact LDAP server",
        85 => "Timed out",
        _ => "Unknown error",
    }
}

const STATE_GOOD: &str = "green";
const STATE_WARNING: &str = "amber";
const STATE_BAD: &str = "red";

/// Shape of the structured status line. Field order is the wire order.
#[derive(Serialize)]
struct StatusJson<'a> {
    state: &'a str,
    ldap_rc: String,
    ldap_rc_text: &'a str,
    repl_rc: String,
    repl_rc_text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    conn_rc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    conn_rc_text: Option<&'a str>,
    date: String,
    message: &'a str,
}

fn render_json(
    state: &str,
    ldap_rc: i32,
    repl_rc: ReplRc,
    conn_rc: Option<ConnRc>,
    message: &str,
    now: SystemTime,
) -> String {
    let json = StatusJson {
        state,
        ldap_rc: ldap_rc.to_string(),
        ldap_rc_text: ldap_rc_text(ldap_rc),
        repl_rc: repl_rc.code().to_string(),
        repl_rc_text: repl_rc.text(),
        conn_rc: conn_rc.map(|c| c.code().to_string()),
        conn_rc_text: conn_rc.map(|c| c.text()),
        date: format_time(now),
        message,
    };
    // A struct with string fields cannot fail to serialize.
    serde_json::to_string(&json).unwrap_or_default()
}

/// ISO-8601 UTC at second precision.
pub fn format_time(t: SystemTime) -> String {
    humantime::format_rfc3339_seconds(t).to_string()
}

/// Render epoch seconds; zero renders as the epoch itself, matching the
/// persisted attribute's behavior for "never".
pub fn format_epoch_secs(secs: i64) -> String {
    let t = UNIX_EPOCH + Duration::from_secs(secs.max(0) as u64);
    format_time(t)
}

/// The read-side default shown when no session has run since startup.
pub fn default_update_status(now: SystemTime) -> (String, String) {
    let human = "Error (0) No replication sessions started since server startup".to_string();
    let json = render_json(STATE_GOOD, 0, ReplRc::Ready, None, &human, now);
    (human, json)
}

/// Outcome of a status-builder call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    /// No session started; leave the slot alone.
    Unchanged,
    /// Reset both lines.
    Clear,
    /// Replace both lines.
    Set { human: String, json: String },
}

/// Build the last-update status lines.
pub fn build_update_status(
    ldap_rc: i32,
    repl_rc: ReplRc,
    message: Option<&str>,
    long_name: &str,
    now: SystemTime,
) -> StatusUpdate {
    if repl_rc == ReplRc::UpToDate {
        return StatusUpdate::Unchanged;
    }

    if ldap_rc != 0 {
        let repl_part = if repl_rc != ReplRc::Ready {
            format!(" ({})", repl_rc.text())
        } else {
            String::new()
        };
        let human = match message {
            Some(m) if !m.is_empty() => format!(
                "Error ({ldap_rc}) {m} - LDAP error: {}{repl_part}",
                ldap_rc_text(ldap_rc)
            ),
            _ => format!(
                "Error ({ldap_rc}) - LDAP error: {}{repl_part}",
                ldap_rc_text(ldap_rc)
            ),
        };
        let json = render_json(STATE_BAD, ldap_rc, repl_rc, None, &human, now);
        return StatusUpdate::Set { human, json };
    }

    match repl_rc {
        ReplRc::Busy => {
            let human = format!(
                "Error ({}) Can't acquire busy replica ({})",
                repl_rc.code(),
                message.unwrap_or("")
            );
            let json = render_json(STATE_WARNING, ldap_rc, repl_rc, None, &human, now);
            StatusUpdate::Set { human, json }
        }
        ReplRc::TransientError | ReplRc::Backoff => {
            let human = format!(
                "Error ({}) Can't acquire replica ({})",
                repl_rc.code(),
                message.unwrap_or("")
            );
            let json = render_json(STATE_WARNING, ldap_rc, repl_rc, None, &human, now);
            StatusUpdate::Set { human, json }
        }
        ReplRc::ReleaseSucceeded => {
            let human = "Error (0) Replication session successful".to_string();
            let json = render_json(STATE_GOOD, ldap_rc, repl_rc, None, &human, now);
            StatusUpdate::Set { human, json }
        }
        ReplRc::Disabled => {
            let human = format!(
                "Error ({}) Incremental update aborted: Replication agreement for {} \
                 can not be updated while the replica is disabled. (If the suffix is \
                 disabled you must enable it then restart the server for replication \
                 to take place).",
                repl_rc.code(),
                long_name
            );
            let json = render_json(STATE_BAD, ldap_rc, repl_rc, None, &human, now);
            StatusUpdate::Set { human, json }
        }
        ReplRc::Ready => match message {
            Some(m) => {
                let human = format!("Error (0) Replica acquired successfully: {m}");
                let json = render_json(STATE_GOOD, ldap_rc, repl_rc, None, &human, now);
                StatusUpdate::Set { human, json }
            }
            None => StatusUpdate::Clear,
        },
        other => {
            let human = format!(
                "Error ({}) Replication error acquiring replica: {} ({})",
                other.code(),
                message.unwrap_or(""),
                other.text()
            );
            let json = render_json(STATE_BAD, ldap_rc, other, None, &human, now);
            StatusUpdate::Set { human, json }
        }
    }
}

/// Build the last-init status lines. Init adds the connection result
/// with its own string table.
pub fn build_init_status(
    ldap_rc: i32,
    repl_rc: ReplRc,
    conn_rc: ConnRc,
    message: Option<&str>,
    long_name: &str,
    agreement_enabled: bool,
    now: SystemTime,
) -> StatusUpdate {
    let conn_part = if conn_rc != ConnRc::Success {
        format!(" - {}", conn_rc.text())
    } else {
        String::new()
    };

    if ldap_rc != 0 {
        let repl_part = if repl_rc != ReplRc::Ready {
            format!(" - {}", repl_rc.text())
        } else {
            String::new()
        };
        let human = match message {
            Some(m) if !m.is_empty() => format!(
                "Error ({ldap_rc}) {m} - LDAP error: {}{repl_part}{conn_part}",
                ldap_rc_text(ldap_rc)
            ),
            _ => format!(
                "Error ({ldap_rc}) - LDAP error: {}{repl_part}{conn_part}",
                ldap_rc_text(ldap_rc)
            ),
        };
        let json = render_json(STATE_BAD, ldap_rc, repl_rc, Some(conn_rc), &human, now);
        return StatusUpdate::Set { human, json };
    }

    if repl_rc != ReplRc::Ready {
        return match repl_rc {
            ReplRc::ReleaseSucceeded => {
                let human = "Replication session successful".to_string();
                let json = render_json(STATE_GOOD, ldap_rc, repl_rc, Some(conn_rc), &human, now);
                StatusUpdate::Set { human, json }
            }
            ReplRc::Disabled => {
                let human = if agreement_enabled {
                    format!(
                        "Error ({}) Total update aborted: Replication agreement for \
                         \"{}\" can not be updated while the suffix is disabled. \
                         (You must enable it then restart the server for replication \
                         to take place).",
                        repl_rc.code(),
                        long_name
                    )
                } else {
                    format!(
                        "Error ({}) Total update aborted: Replication agreement for \
                         \"{}\" can not be updated while the agreement is disabled.",
                        repl_rc.code(),
                        long_name
                    )
                };
                let json = render_json(STATE_BAD, ldap_rc, repl_rc, Some(conn_rc), &human, now);
                StatusUpdate::Set { human, json }
            }
            other => {
                let msg_part = match message {
                    Some(m) if !m.is_empty() => format!(" - {m}"),
                    _ => String::new(),
                };
                let human = format!(
                    "Error ({}) Replication error acquiring replica: {}{msg_part}{conn_part}",
                    other.code(),
                    other.text()
                );
                let json = render_json(STATE_BAD, ldap_rc, other, Some(conn_rc), &human, now);
                StatusUpdate::Set { human, json }
            }
        };
    }

    if conn_rc != ConnRc::Success {
        let msg_part = match message {
            Some(m) if !m.is_empty() => format!(" - {m}"),
            _ => String::new(),
        };
        let human = format!(
            "Error ({}) connection error: {}{msg_part}",
            conn_rc.code(),
            conn_rc.text()
        );
        let json = render_json(STATE_BAD, ldap_rc, repl_rc, Some(conn_rc), &human, now);
        return StatusUpdate::Set { human, json };
    }

    match message {
        Some(m) => {
            let human = format!("Error ({ldap_rc}) {m}");
            let json = render_json(STATE_GOOD, ldap_rc, repl_rc, Some(conn_rc), &human, now);
            StatusUpdate::Set { human, json }
        }
        None => StatusUpdate::Clear,
    }
}

/// One rotating status slot: timestamps plus both rendered lines.
#[derive(Debug, Clone, Default)]
pub struct StatusSlot {
    /// Session start, epoch seconds; 0 means never.
    pub start: i64,
    /// Session end, epoch seconds; 0 means in progress or never.
    pub end: i64,
    pub human: String,
    pub json: String,
}

impl StatusSlot {
    /// Apply a builder outcome to this slot.
    pub fn apply(&mut self, update: StatusUpdate) {
        match update {
            StatusUpdate::Unchanged => {}
            StatusUpdate::Clear => {
                self.human.clear();
                self.json.clear();
            }
            StatusUpdate::Set { human, json } => {
                self.human = human;
                self.json = json;
            }
        }
    }
}

/// Changes replayed and skipped for one remote replica id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeCounter {
    pub rid: u16,
    pub replayed: u64,
    pub skipped: u64,
}

/// Ordered per-rid counters, at most one record per rid.
#[derive(Debug, Clone)]
pub struct ChangeCounters {
    counters: Vec<ChangeCounter>,
}

impl Default for ChangeCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeCounters {
    pub fn new() -> Self {
        Self {
            counters: Vec::with_capacity(MAX_SUPPLIERS),
        }
    }

    /// Bump the counter for `rid`, allocating a new record when the rid
    /// is new.
    pub fn increment(&mut self, rid: u16, skipped: bool) {
        match self.counters.iter_mut().find(|c| c.rid == rid) {
            Some(c) => {
                if skipped {
                    c.skipped += 1;
                } else {
                    c.replayed += 1;
                }
            }
            None => self.counters.push(ChangeCounter {
                rid,
                replayed: if skipped { 0 } else { 1 },
                skipped: if skipped { 1 } else { 0 },
            }),
        }
    }

    pub fn as_slice(&self) -> &[ChangeCounter] {
        &self.counters
    }

    /// Render as space-separated `rid:replayed/skipped` tokens.
    pub fn render(&self) -> String {
        self.counters
            .iter()
            .map(|c| format!("{}:{}/{}", c.rid, c.replayed, c.skipped))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_750_000_000)
    }

    fn set_parts(update: StatusUpdate) -> (String, serde_json::Value) {
        match update {
            StatusUpdate::Set { human, json } => {
                let value: serde_json::Value = serde_json::from_str(&json).unwrap();
                (human, value)
            }
            other => panic!("expected Set, got {other:?}"),
        }
    }

    #[test]
    fn test_uptodate_leaves_slot_alone() {
        let u = build_update_status(0, ReplRc::UpToDate, None, "agmt", t0());
        assert_eq!(u, StatusUpdate::Unchanged);
    }

    #[test]
    fn test_ldap_error_is_red() {
        let (human, json) = set_parts(build_update_status(32, ReplRc::Ready, Some(""), "agmt", t0()));
        assert!(human.starts_with("Error (32) "), "{human}");
        assert!(human.contains("No such object"));
        assert_eq!(json["state"], "red");
        assert_eq!(json["ldap_rc"], "32");
        assert_eq!(json["ldap_rc_text"], "No such object");
        assert!(json.get("conn_rc").is_none());
    }

    #[test]
    fn test_ldap_error_includes_repl_text() {
        let (human, _) =
            set_parts(build_update_status(81, ReplRc::InternalError, None, "agmt", t0()));
        assert!(human.contains("Can't contact LDAP server"));
        assert!(human.contains("internal error"));
    }

    #[test]
    fn test_busy_is_amber() {
        let (human, json) =
            set_parts(build_update_status(0, ReplRc::Busy, Some("peer"), "agmt", t0()));
        assert!(human.contains("Can't acquire busy replica (peer)"));
        assert_eq!(json["state"], "amber");
    }

    #[test]
    fn test_transient_and_backoff_are_amber() {
        for rc in [ReplRc::TransientError, ReplRc::Backoff] {
            let (_, json) = set_parts(build_update_status(0, rc, None, "agmt", t0()));
            assert_eq!(json["state"], "amber", "{rc:?}");
        }
    }

    #[test]
    fn test_release_succeeded_is_green() {
        let (human, json) =
            set_parts(build_update_status(0, ReplRc::ReleaseSucceeded, None, "agmt", t0()));
        assert_eq!(human, "Error (0) Replication session successful");
        assert_eq!(json["state"], "green");
    }

    #[test]
    fn test_disabled_is_red_with_hint() {
        let (human, json) =
            set_parts(build_update_status(0, ReplRc::Disabled, None, "agmt=\"cn=a\" (h:389)", t0()));
        assert!(human.contains("agmt=\"cn=a\" (h:389)"));
        assert!(human.contains("restart the server"));
        assert_eq!(json["state"], "red");
    }

    #[test]
    fn test_other_protocol_error_is_red() {
        let (human, json) =
            set_parts(build_update_status(0, ReplRc::PermissionDenied, Some("denied"), "a", t0()));
        assert!(human.contains("Replication error acquiring replica"));
        assert!(human.contains("permission denied"));
        assert_eq!(json["state"], "red");
    }

    #[test]
    fn test_acquired_with_message_is_green() {
        let (human, json) =
            set_parts(build_update_status(0, ReplRc::Ready, Some("begin"), "a", t0()));
        assert_eq!(human, "Error (0) Replica acquired successfully: begin");
        assert_eq!(json["state"], "green");
    }

    #[test]
    fn test_all_clear_resets() {
        assert_eq!(
            build_update_status(0, ReplRc::Ready, None, "a", t0()),
            StatusUpdate::Clear
        );
    }

    #[test]
    fn test_json_field_order_and_date() {
        if let StatusUpdate::Set { json, .. } =
            build_update_status(0, ReplRc::Busy, None, "a", t0())
        {
            let state_at = json.find("\"state\"").unwrap();
            let ldap_at = json.find("\"ldap_rc\"").unwrap();
            let repl_at = json.find("\"repl_rc\"").unwrap();
            let date_at = json.find("\"date\"").unwrap();
            let message_at = json.find("\"message\"").unwrap();
            assert!(state_at < ldap_at && ldap_at < repl_at);
            assert!(repl_at < date_at && date_at < message_at);
            assert!(json.contains("\"date\":\"2025-06-15T15:06:40Z\""));
        }
    }

    #[test]
    fn test_init_includes_conn_fields() {
        let (human, json) = set_parts(build_init_status(
            0,
            ReplRc::Ready,
            ConnRc::Timeout,
            Some("refused"),
            "a",
            true,
            t0(),
        ));
        assert!(human.contains("connection error: timed out - refused"));
        assert_eq!(json["state"], "red");
        assert_eq!(json["conn_rc"], "4");
        assert_eq!(json["conn_rc_text"], "timed out");
    }

    #[test]
    fn test_init_disabled_hint_depends_on_enabled_flag() {
        let (human, _) = set_parts(build_init_status(
            0,
            ReplRc::Disabled,
            ConnRc::Success,
            None,
            "a",
            true,
            t0(),
        ));
        assert!(human.contains("suffix is disabled"));

        let (human, _) = set_parts(build_init_status(
            0,
            ReplRc::Disabled,
            ConnRc::Success,
            None,
            "a",
            false,
            t0(),
        ));
        assert!(human.contains("agreement is disabled"));
    }

    #[test]
    fn test_init_success_message_is_green() {
        let (human, json) = set_parts(build_init_status(
            0,
            ReplRc::Ready,
            ConnRc::Success,
            Some("Total update succeeded"),
            "a",
            true,
            t0(),
        ));
        assert_eq!(human, "Error (0) Total update succeeded");
        assert_eq!(json["state"], "green");
    }

    #[test]
    fn test_init_all_clear_resets() {
        assert_eq!(
            build_init_status(0, ReplRc::Ready, ConnRc::Success, None, "a", true, t0()),
            StatusUpdate::Clear
        );
    }

    #[test]
    fn test_slot_apply() {
        let mut slot = StatusSlot::default();
        slot.apply(StatusUpdate::Set {
            human: "h".to_string(),
            json: "{}".to_string(),
        });
        assert_eq!(slot.human, "h");
        slot.apply(StatusUpdate::Unchanged);
        assert_eq!(slot.human, "h");
        slot.apply(StatusUpdate::Clear);
        assert!(slot.human.is_empty());
        assert!(slot.json.is_empty());
    }

    #[test]
    fn test_change_counters_single_record_per_rid() {
        let mut c = ChangeCounters::new();
        c.increment(3, false);
        c.increment(3, false);
        c.increment(3, true);
        c.increment(7, true);
        assert_eq!(c.as_slice().len(), 2);
        assert_eq!(
            c.as_slice()[0],
            ChangeCounter {
                rid: 3,
                replayed: 2,
                skipped: 1
            }
        );
        assert_eq!(c.render(), "3:2/1 7:0/1");
    }

    #[test]
    fn test_change_counters_grow_past_initial_capacity() {
        let mut c = ChangeCounters::new();
        for rid in 0..(MAX_SUPPLIERS as u16 + 4) {
            c.increment(rid, false);
        }
        assert_eq!(c.as_slice().len(), MAX_SUPPLIERS + 4);
    }

    #[test]
    fn test_format_epoch_secs_zero_is_epoch() {
        assert_eq!(format_epoch_secs(0), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_ldap_rc_text_fallback() {
        assert_eq!(ldap_rc_text(0), "success");
        assert_eq!(ldap_rc_text(9999), "Unknown error");
    }
}
