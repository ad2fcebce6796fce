// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The replication agreement.
//!
//! An [`Agreement`] is a reference-counted, internally-locked handle
//! binding this supplier to one remote consumer replica: where to
//! connect, how to authenticate, which subtree and attributes to
//! replicate, when and how fast, and how to report progress.
//!
//! # Locking
//!
//! Each agreement carries two locks and one atomic:
//!
//! - a mutex guarding all scalar state,
//! - a reader/writer lock guarding the fractional/strip attribute sets,
//!   so the write-path filter check can run under a shared lock,
//! - an atomic counter for the protocol stop timeout.
//!
//! The mutex is a leaf: it is never held across a call into the
//! directory, the protocol worker, or sibling agreements. Setters follow
//! `lock → mutate → unlock → notify worker`; [`Agreement::start`]
//! performs its tombstone search before taking the mutex for the same
//! reason.
//!
//! # Lifecycle
//!
//! Created from a configuration record by
//! [`new_from_record`](Agreement::new_from_record), optionally started
//! (which creates the protocol worker and reconciles the persisted
//! agreement-maxcsn), stopped cooperatively, and deleted. Disabled
//! agreements never hold a worker.

use crate::config::{
    self, AgreementSettings, AgreementType, AutoInitialize, BackendFlavor, BindMethod,
    IgnoreMissing, LocalInstance, ParseContext, ParsedAgreement, Transport,
};
use crate::directory::{AttrMod, DirectoryRef};
use crate::dn::Dn;
use crate::error::{AgreementError, Result};
use crate::maxcsn::{self, AgreementMaxCsn};
use crate::metrics;
use crate::protocol::{ProtocolDriver, ProtocolFactory, ProtocolState};
use crate::record::{self, ConfigRecord};
use crate::schedule::ScheduleRef;
use crate::session::SessionId;
use crate::status::{self, ChangeCounters, ConnRc, ReplRc, StatusSlot, StatusUpdate};
use crate::types::{ChangeOp, ConsumerRuv, Csn, PendingChange};
use crate::validate;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Reference-counted handle to one replication agreement.
#[derive(Clone)]
pub struct Agreement {
    inner: Arc<Inner>,
}

struct Inner {
    /// DN of the agreement's configuration entry. Stable for the
    /// agreement's lifetime.
    dn: Dn,
    /// Terminal name component of `dn`.
    rdn: String,
    /// Root of the replicated area. Immutable after creation.
    subtree: Dn,
    agreement_type: AgreementType,
    state: Mutex<State>,
    filters: RwLock<FilterSets>,
    /// Seconds a stop may wait on the worker; load/store is the only
    /// synchronisation between admin and worker here.
    protocol_timeout: AtomicU64,
    directory: Arc<dyn DirectoryRef>,
    factory: Arc<dyn ProtocolFactory>,
    schedule: Arc<dyn ScheduleRef>,
}

/// Attribute sets consulted on the local-write hot path.
struct FilterSets {
    incremental: Option<Vec<String>>,
    total: Option<Vec<String>>,
    strip: Option<Vec<String>>,
}

struct State {
    hostname: String,
    port: u16,
    transport: Transport,
    bind_dn: String,
    credentials: Vec<u8>,
    bind_method: BindMethod,
    bootstrap_bind_dn: String,
    bootstrap_credentials: Vec<u8>,
    bootstrap_transport: Transport,
    bootstrap_bind_method: BindMethod,
    long_name: String,
    session: SessionId,
    timeout_secs: i64,
    busy_wait_secs: i64,
    pause_secs: i64,
    flow_window: i64,
    flow_pause_ms: i64,
    wait_async_ms: i64,
    ignore_missing: IgnoreMissing,
    enabled: bool,
    auto_initialize: AutoInitialize,
    consumer_ruv: Option<Arc<ConsumerRuv>>,
    consumer_schema_csn: Option<Csn>,
    consumer_rid: u16,
    /// The rid came from the persisted maxcsn and must be refreshed from
    /// the peer on the next session.
    rid_tentative: bool,
    maxcsn: Option<String>,
    counters: ChangeCounters,
    last_update: StatusSlot,
    last_init: StatusSlot,
    update_in_progress: bool,
    stop_in_progress: bool,
    protocol: Option<Arc<dyn ProtocolDriver>>,
    window_task: Option<tokio::task::JoinHandle<()>>,
    window_shutdown: Option<watch::Sender<bool>>,
}

impl State {
    /// Scalar snapshot for re-validation in setters. The filter sets
    /// play no part in the validity rules.
    fn settings_snapshot(&self, subtree: &Dn) -> AgreementSettings {
        AgreementSettings {
            hostname: self.hostname.clone(),
            port: self.port,
            transport: self.transport,
            bind_dn: self.bind_dn.clone(),
            credentials: self.credentials.clone(),
            bind_method: self.bind_method,
            bootstrap_bind_dn: self.bootstrap_bind_dn.clone(),
            bootstrap_credentials: self.bootstrap_credentials.clone(),
            bootstrap_transport: self.bootstrap_transport,
            bootstrap_bind_method: self.bootstrap_bind_method,
            subtree: subtree.clone(),
            timeout_secs: self.timeout_secs,
            busy_wait_secs: self.busy_wait_secs,
            pause_secs: self.pause_secs,
            flow_window: self.flow_window,
            flow_pause_ms: self.flow_pause_ms,
            wait_async_ms: self.wait_async_ms,
            ignore_missing: self.ignore_missing,
            enabled: self.enabled,
            auto_initialize: self.auto_initialize,
            fractional_attrs: None,
            fractional_attrs_total: None,
            strip_attrs: None,
            schedule_spec: None,
            protocol_timeout_secs: 0,
            agreement_type: AgreementType::MultiSupplier,
            consumer_ruv: None,
            last_init_start: self.last_init.start,
            last_init_end: self.last_init.end,
            last_init_status: None,
        }
    }

    fn recompute_long_name(&mut self, rdn: &str) {
        self.long_name = config::long_name(rdn, &self.hostname, self.port);
    }
}

/// Read-side snapshot of an agreement's progress, rendered the way the
/// persisted attributes read back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgreementStatusReport {
    pub last_update_start: String,
    pub last_update_end: String,
    pub last_update_status: String,
    pub last_update_status_json: String,
    pub update_in_progress: bool,
    pub changes_sent: String,
    pub last_init_start: String,
    pub last_init_end: String,
    pub last_init_status: Option<String>,
    pub last_init_status_json: Option<String>,
}

fn notify_worker(protocol: Option<Arc<dyn ProtocolDriver>>, long_name: &str) {
    if let Some(p) = protocol {
        p.notify_agreement_changed(long_name);
    }
}

impl Agreement {
    /// Create an agreement from its configuration record.
    ///
    /// Gathers the backend flavor and the process-wide default exclude
    /// list from the directory, parses and validates the record, and
    /// returns the registered-but-not-started agreement. The only
    /// failure surfaced here is an invalid record.
    pub async fn new_from_record(
        rec: &ConfigRecord,
        directory: Arc<dyn DirectoryRef>,
        factory: Arc<dyn ProtocolFactory>,
        schedule: Arc<dyn ScheduleRef>,
        local: LocalInstance,
    ) -> Result<Agreement> {
        let backend_flavor = match rec.get(record::ATTR_ROOT) {
            Some(root) => match directory.backend_flavor(&Dn::new(root)).await {
                Ok(f) => f,
                Err(e) => {
                    return Err(AgreementError::ConfigInvalid {
                        agreement: rec.dn().to_string(),
                        diagnostics: vec![format!(
                            "failed to get backend for replicated suffix {root}: {e}"
                        )],
                    })
                }
            },
            None => BackendFlavor::Bdb,
        };
        let default_fractional = match directory.default_fractional_lists().await {
            Ok(lists) => lists,
            Err(e) => {
                warn!(agreement = %rec.dn(), error = %e, "failed to read default exclude list");
                Vec::new()
            }
        };

        let ctx = ParseContext {
            backend_flavor,
            default_fractional,
        };
        let ParsedAgreement {
            settings: s,
            denied_attrs,
            denied_attrs_total,
            warnings,
        } = AgreementSettings::parse(rec, &ctx).map_err(|diagnostics| {
            AgreementError::ConfigInvalid {
                agreement: rec.dn().to_string(),
                diagnostics,
            }
        })?;

        for w in &warnings {
            warn!(agreement = %rec.dn(), "{w}");
        }
        if !denied_attrs.is_empty() {
            error!(
                agreement = %rec.dn(),
                attrs = ?denied_attrs,
                "attempt to exclude illegal attributes from a fractional agreement"
            );
        }
        if !denied_attrs_total.is_empty() {
            error!(
                agreement = %rec.dn(),
                attrs = ?denied_attrs_total,
                "attempt to exclude illegal attributes from a fractional agreement \
                 for the total update protocol"
            );
        }

        if let Err(e) = schedule.set_spec(s.schedule_spec.as_deref()) {
            warn!(agreement = %rec.dn(), error = %e, "failed to set update schedule");
        }

        let dn = rec.dn().clone();
        let rdn = dn.rdn().to_string();
        let long_name = config::long_name(&rdn, &s.hostname, s.port);
        let session = SessionId::new(
            Some(s.subtree.as_str()),
            local.hostname.as_deref(),
            local.port,
            local.secure_port,
        );

        let state = State {
            hostname: s.hostname,
            port: s.port,
            transport: s.transport,
            bind_dn: s.bind_dn,
            credentials: s.credentials,
            bind_method: s.bind_method,
            bootstrap_bind_dn: s.bootstrap_bind_dn,
            bootstrap_credentials: s.bootstrap_credentials,
            bootstrap_transport: s.bootstrap_transport,
            bootstrap_bind_method: s.bootstrap_bind_method,
            long_name: long_name.clone(),
            session,
            timeout_secs: s.timeout_secs,
            busy_wait_secs: s.busy_wait_secs,
            pause_secs: s.pause_secs,
            flow_window: s.flow_window,
            flow_pause_ms: s.flow_pause_ms,
            wait_async_ms: s.wait_async_ms,
            ignore_missing: s.ignore_missing,
            enabled: s.enabled,
            auto_initialize: s.auto_initialize,
            consumer_ruv: s.consumer_ruv.map(|els| Arc::new(ConsumerRuv::new(els))),
            consumer_schema_csn: None,
            consumer_rid: 0,
            rid_tentative: false,
            maxcsn: None,
            counters: ChangeCounters::new(),
            last_update: StatusSlot::default(),
            last_init: StatusSlot {
                start: s.last_init_start,
                end: s.last_init_end,
                human: s.last_init_status.unwrap_or_default(),
                json: String::new(),
            },
            update_in_progress: false,
            stop_in_progress: false,
            protocol: None,
            window_task: None,
            window_shutdown: None,
        };

        let agreement = Agreement {
            inner: Arc::new(Inner {
                dn,
                rdn,
                subtree: s.subtree,
                agreement_type: s.agreement_type,
                state: Mutex::new(state),
                filters: RwLock::new(FilterSets {
                    incremental: s.fractional_attrs,
                    total: s.fractional_attrs_total,
                    strip: s.strip_attrs,
                }),
                protocol_timeout: AtomicU64::new(s.protocol_timeout_secs),
                directory,
                factory,
                schedule,
            }),
        };
        info!(agreement = %long_name, "replication agreement created");
        Ok(agreement)
    }

    // =========================================================================
    // Identity and naming
    // =========================================================================

    /// DN of the agreement's configuration entry. Stable, so no lock.
    pub fn dn(&self) -> &Dn {
        &self.inner.dn
    }

    /// Terminal name component of the agreement's DN.
    pub fn rdn(&self) -> &str {
        &self.inner.rdn
    }

    /// Root of the replicated area.
    pub fn replicated_subtree(&self) -> &Dn {
        &self.inner.subtree
    }

    pub fn agreement_type(&self) -> AgreementType {
        self.inner.agreement_type
    }

    /// Display label `agmt="<rdn>" (<short-host>:<port>)`.
    pub async fn long_name(&self) -> String {
        self.inner.state.lock().await.long_name.clone()
    }

    /// True if `name` is this agreement's entry DN (canonical form).
    pub fn matches_name(&self, name: &Dn) -> bool {
        *name == self.inner.dn
    }

    /// True if `name` is this agreement's replicated subtree.
    pub fn replarea_matches(&self, name: &Dn) -> bool {
        *name == self.inner.subtree
    }

    // =========================================================================
    // Getters (copies; all infallible)
    // =========================================================================

    pub async fn hostname(&self) -> String {
        self.inner.state.lock().await.hostname.clone()
    }

    pub async fn port(&self) -> u16 {
        self.inner.state.lock().await.port
    }

    pub async fn transport(&self) -> Transport {
        self.inner.state.lock().await.transport
    }

    pub async fn bind_dn(&self) -> String {
        self.inner.state.lock().await.bind_dn.clone()
    }

    pub async fn credentials(&self) -> Vec<u8> {
        self.inner.state.lock().await.credentials.clone()
    }

    pub async fn bind_method(&self) -> BindMethod {
        self.inner.state.lock().await.bind_method
    }

    pub async fn bootstrap_bind_dn(&self) -> String {
        self.inner.state.lock().await.bootstrap_bind_dn.clone()
    }

    pub async fn bootstrap_credentials(&self) -> Vec<u8> {
        self.inner.state.lock().await.bootstrap_credentials.clone()
    }

    pub async fn bootstrap_transport(&self) -> Transport {
        self.inner.state.lock().await.bootstrap_transport
    }

    pub async fn bootstrap_bind_method(&self) -> BindMethod {
        self.inner.state.lock().await.bootstrap_bind_method
    }

    pub async fn timeout_secs(&self) -> i64 {
        self.inner.state.lock().await.timeout_secs
    }

    pub async fn busy_wait_secs(&self) -> i64 {
        self.inner.state.lock().await.busy_wait_secs
    }

    pub async fn pause_secs(&self) -> i64 {
        self.inner.state.lock().await.pause_secs
    }

    pub async fn flow_window(&self) -> i64 {
        self.inner.state.lock().await.flow_window
    }

    pub async fn flow_pause_ms(&self) -> i64 {
        self.inner.state.lock().await.flow_pause_ms
    }

    pub async fn wait_async_ms(&self) -> i64 {
        self.inner.state.lock().await.wait_async_ms
    }

    pub async fn ignore_missing(&self) -> IgnoreMissing {
        self.inner.state.lock().await.ignore_missing
    }

    pub async fn is_enabled(&self) -> bool {
        self.inner.state.lock().await.enabled
    }

    pub async fn auto_initialize(&self) -> AutoInitialize {
        self.inner.state.lock().await.auto_initialize
    }

    pub async fn update_in_progress(&self) -> bool {
        self.inner.state.lock().await.update_in_progress
    }

    pub async fn has_protocol(&self) -> bool {
        self.inner.state.lock().await.protocol.is_some()
    }

    pub async fn consumer_ruv(&self) -> Option<Arc<ConsumerRuv>> {
        self.inner.state.lock().await.consumer_ruv.clone()
    }

    pub async fn consumer_schema_csn(&self) -> Option<Csn> {
        self.inner.state.lock().await.consumer_schema_csn.clone()
    }

    pub async fn consumer_rid(&self) -> u16 {
        self.inner.state.lock().await.consumer_rid
    }

    pub async fn rid_tentative(&self) -> bool {
        self.inner.state.lock().await.rid_tentative
    }

    pub async fn maxcsn(&self) -> Option<String> {
        self.inner.state.lock().await.maxcsn.clone()
    }

    pub fn protocol_timeout_secs(&self) -> u64 {
        self.inner.protocol_timeout.load(Ordering::Acquire)
    }

    pub fn set_protocol_timeout_secs(&self, timeout: u64) {
        self.inner.protocol_timeout.store(timeout, Ordering::Release);
    }

    /// Delegates to the schedule calendar.
    pub fn in_schedule_now(&self) -> bool {
        self.inner.schedule.in_window_now()
    }

    // =========================================================================
    // Fractional attribute sets (shared lock on the hot path)
    // =========================================================================

    /// True if an incremental exclude set is configured.
    pub async fn is_fractional(&self) -> bool {
        self.inner.filters.read().await.incremental.is_some()
    }

    pub async fn fractional_attrs(&self) -> Option<Vec<String>> {
        self.inner.filters.read().await.incremental.clone()
    }

    /// The total-refresh exclude set; falls back to the incremental set
    /// when none is defined.
    pub async fn fractional_attrs_total(&self) -> Option<Vec<String>> {
        let filters = self.inner.filters.read().await;
        filters
            .total
            .clone()
            .or_else(|| filters.incremental.clone())
    }

    pub async fn strip_attrs(&self) -> Option<Vec<String>> {
        self.inner.filters.read().await.strip.clone()
    }

    pub async fn is_fractional_attr(&self, name: &str) -> bool {
        let filters = self.inner.filters.read().await;
        filters
            .incremental
            .as_deref()
            .is_some_and(|list| config::contains_attr(list, name))
    }

    pub async fn is_fractional_attr_total(&self, name: &str) -> bool {
        let filters = self.inner.filters.read().await;
        match filters.total.as_deref() {
            Some(list) => config::contains_attr(list, name),
            None => filters
                .incremental
                .as_deref()
                .is_some_and(|list| config::contains_attr(list, name)),
        }
    }

    // =========================================================================
    // Session identifiers
    // =========================================================================

    /// The current per-session log tag `"<prefix> NNN"`.
    pub async fn session_id(&self) -> String {
        self.inner.state.lock().await.session.tag().to_string()
    }

    /// Advance the session counter and return the new tag.
    pub async fn next_session_id(&self) -> String {
        let mut st = self.inner.state.lock().await;
        st.session.advance();
        st.session.tag().to_string()
    }

    // =========================================================================
    // Record-driven setters
    //
    // Every setter takes the mutex, refuses the update while a stop is in
    // progress, validates, commits, and notifies the worker after unlock.
    // =========================================================================

    pub async fn set_host_from_record(&self, rec: &ConfigRecord) -> Result<()> {
        let mut st = self.inner.state.lock().await;
        if st.stop_in_progress {
            return Ok(());
        }
        let Some(value) = rec.get(record::ATTR_HOST) else {
            return Err(AgreementError::conflict(record::ATTR_HOST, "attribute missing"));
        };
        let mut snap = st.settings_snapshot(&self.inner.subtree);
        snap.hostname = value.to_string();
        let diags = validate::check(&snap);
        if !diags.is_empty() {
            return Err(AgreementError::conflict(record::ATTR_HOST, diags.join("; ")));
        }
        st.hostname = value.to_string();
        st.recompute_long_name(&self.inner.rdn);
        let (prot, name) = (st.protocol.clone(), st.long_name.clone());
        drop(st);
        notify_worker(prot, &name);
        Ok(())
    }

    pub async fn set_port_from_record(&self, rec: &ConfigRecord) -> Result<()> {
        let mut st = self.inner.state.lock().await;
        if st.stop_in_progress {
            return Ok(());
        }
        let Some(value) = rec.get(record::ATTR_PORT) else {
            return Err(AgreementError::conflict(record::ATTR_PORT, "attribute missing"));
        };
        let port = value
            .parse::<u32>()
            .ok()
            .filter(|p| (1..=65535).contains(p))
            .ok_or_else(|| {
                AgreementError::conflict(
                    record::ATTR_PORT,
                    format!("invalid port number \"{value}\", expected 1..65535"),
                )
            })? as u16;
        st.port = port;
        st.recompute_long_name(&self.inner.rdn);
        let (prot, name) = (st.protocol.clone(), st.long_name.clone());
        drop(st);
        notify_worker(prot, &name);
        Ok(())
    }

    /// Replace the primary or bootstrap bind credentials. A missing
    /// attribute clears them.
    pub async fn set_credentials_from_record(
        &self,
        rec: &ConfigRecord,
        bootstrap: bool,
    ) -> Result<()> {
        let attr = if bootstrap {
            record::ATTR_BOOTSTRAP_CREDENTIALS
        } else {
            record::ATTR_CREDENTIALS
        };
        let mut st = self.inner.state.lock().await;
        if st.stop_in_progress {
            return Ok(());
        }
        let creds = rec.get_bytes(attr).unwrap_or_default();
        if bootstrap {
            st.bootstrap_credentials = creds;
        } else {
            let mut snap = st.settings_snapshot(&self.inner.subtree);
            snap.credentials = creds.clone();
            let diags = validate::check(&snap);
            if !diags.is_empty() {
                return Err(AgreementError::conflict(attr, diags.join("; ")));
            }
            st.credentials = creds;
        }
        let (prot, name) = (st.protocol.clone(), st.long_name.clone());
        drop(st);
        notify_worker(prot, &name);
        Ok(())
    }

    /// Replace the primary or bootstrap bind DN. A missing attribute
    /// resets it to the empty string.
    pub async fn set_bind_dn_from_record(&self, rec: &ConfigRecord, bootstrap: bool) -> Result<()> {
        let attr = if bootstrap {
            record::ATTR_BOOTSTRAP_BIND_DN
        } else {
            record::ATTR_BIND_DN
        };
        let mut st = self.inner.state.lock().await;
        if st.stop_in_progress {
            return Ok(());
        }
        let value = rec.get(attr).unwrap_or("").to_string();
        if bootstrap {
            st.bootstrap_bind_dn = value;
        } else {
            let mut snap = st.settings_snapshot(&self.inner.subtree);
            snap.bind_dn = value.clone();
            let diags = validate::check(&snap);
            if !diags.is_empty() {
                return Err(AgreementError::conflict(attr, diags.join("; ")));
            }
            st.bind_dn = value;
        }
        let (prot, name) = (st.protocol.clone(), st.long_name.clone());
        drop(st);
        notify_worker(prot, &name);
        Ok(())
    }

    pub async fn set_bind_method_from_record(
        &self,
        rec: &ConfigRecord,
        bootstrap: bool,
    ) -> Result<()> {
        let mut st = self.inner.state.lock().await;
        if st.stop_in_progress {
            return Ok(());
        }
        if bootstrap {
            let method = BindMethod::parse_bootstrap(rec.get(record::ATTR_BOOTSTRAP_BIND_METHOD))
                .map_err(|v| {
                    AgreementError::conflict(
                        record::ATTR_BOOTSTRAP_BIND_METHOD,
                        format!("invalid value \"{v}\", expected SIMPLE or SSLCLIENTAUTH"),
                    )
                })?;
            st.bootstrap_bind_method = method;
        } else {
            let method = BindMethod::parse(rec.get(record::ATTR_BIND_METHOD));
            let mut snap = st.settings_snapshot(&self.inner.subtree);
            snap.bind_method = method;
            let diags = validate::check(&snap);
            if !diags.is_empty() {
                return Err(AgreementError::conflict(
                    record::ATTR_BIND_METHOD,
                    diags.join("; "),
                ));
            }
            st.bind_method = method;
        }
        let (prot, name) = (st.protocol.clone(), st.long_name.clone());
        drop(st);
        notify_worker(prot, &name);
        Ok(())
    }

    /// Replace the transport. An unrecognized primary value leaves the
    /// transport unchanged (a diagnostic is logged, the setter still
    /// succeeds); an unrecognized bootstrap value is rejected.
    pub async fn set_transport_from_record(
        &self,
        rec: &ConfigRecord,
        bootstrap: bool,
    ) -> Result<()> {
        let mut st = self.inner.state.lock().await;
        if st.stop_in_progress {
            return Ok(());
        }
        if bootstrap {
            let value = rec.get(record::ATTR_BOOTSTRAP_TRANSPORT);
            let transport = Transport::parse(value).ok_or_else(|| {
                AgreementError::conflict(
                    record::ATTR_BOOTSTRAP_TRANSPORT,
                    format!("invalid transport \"{}\"", value.unwrap_or("")),
                )
            })?;
            st.bootstrap_transport = transport;
        } else {
            let value = rec.get(record::ATTR_TRANSPORT);
            match Transport::parse(value) {
                Some(transport) => {
                    let mut snap = st.settings_snapshot(&self.inner.subtree);
                    snap.transport = transport;
                    let diags = validate::check(&snap);
                    if !diags.is_empty() {
                        return Err(AgreementError::conflict(
                            record::ATTR_TRANSPORT,
                            diags.join("; "),
                        ));
                    }
                    st.transport = transport;
                }
                None => {
                    warn!(
                        agreement = %st.long_name,
                        value = value.unwrap_or(""),
                        "unrecognized transport value left unchanged"
                    );
                }
            }
        }
        let (prot, name) = (st.protocol.clone(), st.long_name.clone());
        drop(st);
        notify_worker(prot, &name);
        Ok(())
    }

    /// Replace the update schedule. A missing attribute deletes any
    /// existing schedule.
    pub async fn set_schedule_from_record(&self, rec: &ConfigRecord) -> Result<()> {
        let (prot, name) = {
            let st = self.inner.state.lock().await;
            if st.stop_in_progress {
                return Ok(());
            }
            (st.protocol.clone(), st.long_name.clone())
        };
        // the calendar has its own locking; never call it under ours
        self.inner
            .schedule
            .set_spec(rec.get(record::ATTR_SCHEDULE))?;
        notify_worker(prot, &name);
        Ok(())
    }

    pub async fn set_timeout_from_record(&self, rec: &ConfigRecord) -> Result<()> {
        self.set_nonneg_from_record(rec, record::ATTR_TIMEOUT, |st, v| st.timeout_secs = v)
            .await
    }

    pub async fn set_busy_wait_from_record(&self, rec: &ConfigRecord) -> Result<()> {
        self.set_nonneg_from_record(rec, record::ATTR_BUSY_WAIT, |st, v| st.busy_wait_secs = v)
            .await
    }

    pub async fn set_pause_from_record(&self, rec: &ConfigRecord) -> Result<()> {
        self.set_nonneg_from_record(rec, record::ATTR_PAUSE, |st, v| st.pause_secs = v)
            .await
    }

    pub async fn set_flow_window_from_record(&self, rec: &ConfigRecord) -> Result<()> {
        self.set_nonneg_from_record(rec, record::ATTR_FLOW_WINDOW, |st, v| st.flow_window = v)
            .await
    }

    pub async fn set_flow_pause_from_record(&self, rec: &ConfigRecord) -> Result<()> {
        self.set_nonneg_from_record(rec, record::ATTR_FLOW_PAUSE, |st, v| st.flow_pause_ms = v)
            .await
    }

    async fn set_nonneg_from_record(
        &self,
        rec: &ConfigRecord,
        attr: &'static str,
        apply: impl FnOnce(&mut State, i64),
    ) -> Result<()> {
        let mut st = self.inner.state.lock().await;
        if st.stop_in_progress {
            return Ok(());
        }
        let value = rec
            .get(attr)
            .ok_or_else(|| AgreementError::conflict(attr, "attribute missing"))?;
        let parsed = value
            .parse::<i64>()
            .ok()
            .filter(|v| *v >= 0)
            .ok_or_else(|| {
                AgreementError::conflict(
                    attr,
                    format!("invalid value \"{value}\", expected a non-negative integer"),
                )
            })?;
        apply(&mut *st, parsed);
        let (prot, name) = (st.protocol.clone(), st.long_name.clone());
        drop(st);
        notify_worker(prot, &name);
        Ok(())
    }

    pub async fn set_wait_async_from_record(&self, rec: &ConfigRecord) -> Result<()> {
        let mut st = self.inner.state.lock().await;
        if st.stop_in_progress {
            return Ok(());
        }
        let wait = rec
            .get(record::ATTR_WAIT_ASYNC)
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(config::DEFAULT_WAIT_ASYNC_MS);
        st.wait_async_ms = wait;
        let (prot, name) = (st.protocol.clone(), st.long_name.clone());
        drop(st);
        notify_worker(prot, &name);
        Ok(())
    }

    pub async fn set_ignore_missing_from_record(&self, rec: &ConfigRecord) -> Result<()> {
        let mut st = self.inner.state.lock().await;
        if st.stop_in_progress {
            return Ok(());
        }
        let value = rec
            .get(record::ATTR_IGNORE_MISSING)
            .ok_or_else(|| AgreementError::conflict(record::ATTR_IGNORE_MISSING, "attribute missing"))?;
        let parsed = IgnoreMissing::parse(value).ok_or_else(|| {
            AgreementError::conflict(
                record::ATTR_IGNORE_MISSING,
                format!("invalid value \"{value}\""),
            )
        })?;
        st.ignore_missing = parsed;
        let (prot, name) = (st.protocol.clone(), st.long_name.clone());
        drop(st);
        notify_worker(prot, &name);
        Ok(())
    }

    /// Replace the incremental exclude set: process-wide defaults are
    /// re-read and merged, forbidden attributes are filtered and logged.
    pub async fn set_fractional_attrs_from_record(&self, rec: &ConfigRecord) -> Result<()> {
        let (prot, name) = {
            let st = self.inner.state.lock().await;
            if st.stop_in_progress {
                return Ok(());
            }
            (st.protocol.clone(), st.long_name.clone())
        };

        let defaults = match self.inner.directory.default_fractional_lists().await {
            Ok(lists) => lists,
            Err(e) => {
                warn!(agreement = %name, error = %e, "failed to read default exclude list");
                Vec::new()
            }
        };
        let mut attrs: Vec<String> = Vec::new();
        for value in &defaults {
            match config::parse_exclude_list(value) {
                Ok(list) => config::merge_unique(&mut attrs, list),
                Err(e) => warn!(agreement = %name, error = %e, "bad default exclude list"),
            }
        }
        if let Some(value) = rec.get(record::ATTR_FRACTIONAL_LIST) {
            let list = config::parse_exclude_list(value).map_err(|e| {
                AgreementError::conflict(record::ATTR_FRACTIONAL_LIST, e)
            })?;
            config::merge_unique(&mut attrs, list);
        }
        let denied = config::filter_forbidden(&mut attrs);
        if !denied.is_empty() {
            error!(
                agreement = %name,
                attrs = ?denied,
                "attempt to exclude illegal attributes from a fractional agreement"
            );
        }

        let mut filters = self.inner.filters.write().await;
        filters.incremental = if attrs.is_empty() { None } else { Some(attrs) };
        drop(filters);
        notify_worker(prot, &name);
        Ok(())
    }

    /// Replace the total-refresh exclude set. A missing attribute makes
    /// the total set fall back to the incremental one again.
    pub async fn set_fractional_attrs_total_from_record(&self, rec: &ConfigRecord) -> Result<()> {
        let (prot, name) = {
            let st = self.inner.state.lock().await;
            if st.stop_in_progress {
                return Ok(());
            }
            (st.protocol.clone(), st.long_name.clone())
        };

        let total = match rec.get(record::ATTR_FRACTIONAL_LIST_TOTAL) {
            Some(value) => {
                let mut attrs = config::parse_exclude_list(value).map_err(|e| {
                    AgreementError::conflict(record::ATTR_FRACTIONAL_LIST_TOTAL, e)
                })?;
                let denied = config::filter_forbidden(&mut attrs);
                if !denied.is_empty() {
                    error!(
                        agreement = %name,
                        attrs = ?denied,
                        "attempt to exclude illegal attributes from a fractional agreement \
                         for the total update protocol"
                    );
                }
                Some(attrs)
            }
            None => None,
        };

        let mut filters = self.inner.filters.write().await;
        filters.total = total;
        drop(filters);
        notify_worker(prot, &name);
        Ok(())
    }

    /// Replace the strip set. A missing attribute clears it.
    pub async fn set_strip_attrs_from_record(&self, rec: &ConfigRecord) -> Result<()> {
        let (prot, name) = {
            let st = self.inner.state.lock().await;
            if st.stop_in_progress {
                return Ok(());
            }
            (st.protocol.clone(), st.long_name.clone())
        };
        let strip = rec.get(record::ATTR_STRIP_ATTRS).map(|v| {
            v.split_ascii_whitespace()
                .map(String::from)
                .collect::<Vec<_>>()
        });
        let mut filters = self.inner.filters.write().await;
        filters.strip = strip;
        drop(filters);
        notify_worker(prot, &name);
        Ok(())
    }

    /// Re-read the refresh sentinel for this configuration revision.
    /// The literal `start` selects a total refresh and, when a worker is
    /// running, transitions it immediately.
    pub async fn set_refresh_from_record(&self, rec: &ConfigRecord) -> Result<()> {
        let requested = {
            let mut st = self.inner.state.lock().await;
            if st.stop_in_progress {
                return Ok(());
            }
            let total = matches!(
                rec.get(record::ATTR_REFRESH),
                Some(v) if v.eq_ignore_ascii_case(config::REFRESH_SENTINEL)
            );
            st.auto_initialize = if total {
                AutoInitialize::Total
            } else {
                AutoInitialize::Incremental
            };
            total && st.protocol.is_some()
        };
        if requested {
            self.initialize_replica().await?;
        }
        Ok(())
    }

    /// Flip the enabled flag. Enabling starts the worker; disabling
    /// stops it, persists the consumer RUV and init status, and records
    /// `"agreement disabled"` as the last-update status.
    pub async fn set_enabled_from_record(&self, rec: &ConfigRecord) -> Result<()> {
        let value = rec
            .get(record::ATTR_ENABLED)
            .ok_or_else(|| AgreementError::conflict(record::ATTR_ENABLED, "attribute missing"))?;
        let enable = if value.eq_ignore_ascii_case("on") {
            true
        } else if value.eq_ignore_ascii_case("off") {
            false
        } else {
            return Err(AgreementError::conflict(
                record::ATTR_ENABLED,
                format!("invalid value \"{value}\", the value must be \"on\" or \"off\""),
            ));
        };

        let transition = {
            let mut st = self.inner.state.lock().await;
            if enable == st.enabled {
                None
            } else {
                st.enabled = enable;
                info!(
                    agreement = %st.long_name,
                    enabled = enable,
                    "agreement enabled state changed"
                );
                Some(enable)
            }
        };

        match transition {
            Some(true) => self.start().await,
            Some(false) => {
                self.stop().await;
                self.update_consumer_ruv().await;
                self.update_init_status().await;
                self.set_last_update_status(0, ReplRc::Ready, Some("agreement disabled"))
                    .await;
                Ok(())
            }
            None => Ok(()),
        }
    }

    // =========================================================================
    // Direct value setters (admin CLI path)
    // =========================================================================

    pub async fn set_timeout(&self, timeout: i64) -> Result<()> {
        let mut st = self.inner.state.lock().await;
        if st.stop_in_progress {
            return Ok(());
        }
        if timeout < 0 {
            return Err(AgreementError::conflict(
                record::ATTR_TIMEOUT,
                format!("invalid timeout {timeout}"),
            ));
        }
        st.timeout_secs = timeout;
        Ok(())
    }

    pub async fn set_flow_window(&self, window: i64) -> Result<()> {
        let mut st = self.inner.state.lock().await;
        if st.stop_in_progress {
            return Ok(());
        }
        if window < 0 {
            return Err(AgreementError::conflict(
                record::ATTR_FLOW_WINDOW,
                format!("invalid flow control window {window}"),
            ));
        }
        st.flow_window = window;
        Ok(())
    }

    pub async fn set_flow_pause(&self, pause_ms: i64) -> Result<()> {
        let mut st = self.inner.state.lock().await;
        if st.stop_in_progress {
            return Ok(());
        }
        if pause_ms < 0 {
            return Err(AgreementError::conflict(
                record::ATTR_FLOW_PAUSE,
                format!("invalid flow control pause {pause_ms}"),
            ));
        }
        st.flow_pause_ms = pause_ms;
        Ok(())
    }

    /// Set the missing-change policy directly. Resetting to `never`
    /// also deletes the persisted attribute from the config entry.
    pub async fn set_ignore_missing(&self, value: IgnoreMissing) -> Result<()> {
        {
            let mut st = self.inner.state.lock().await;
            if st.stop_in_progress {
                return Ok(());
            }
            st.ignore_missing = value;
        }
        if value == IgnoreMissing::Never {
            if let Err(e) = self
                .inner
                .directory
                .modify_entry(
                    &self.inner.dn,
                    vec![AttrMod::delete(record::ATTR_IGNORE_MISSING)],
                )
                .await
            {
                warn!(
                    agreement = %self.inner.dn,
                    error = %e,
                    "failed to reset persisted missing-change policy"
                );
            }
        }
        Ok(())
    }

    pub async fn set_consumer_ruv(&self, ruv: Arc<ConsumerRuv>) {
        let mut st = self.inner.state.lock().await;
        st.consumer_ruv = Some(ruv);
    }

    pub async fn set_consumer_schema_csn(&self, csn: Option<Csn>) {
        let mut st = self.inner.state.lock().await;
        st.consumer_schema_csn = csn;
    }

    /// Apply the replica id read from the peer; clears the tentative
    /// flag set by the maxcsn reconcile.
    pub async fn refresh_consumer_rid(&self, rid: u16) {
        let mut st = self.inner.state.lock().await;
        st.consumer_rid = rid;
        st.rid_tentative = false;
    }

    pub async fn set_update_in_progress(&self, in_progress: bool) {
        self.inner.state.lock().await.update_in_progress = in_progress;
    }

    // =========================================================================
    // Status slots and counters
    // =========================================================================

    /// Starting a session resets the end timestamp.
    pub async fn set_last_update_start(&self, start: i64) {
        let mut st = self.inner.state.lock().await;
        st.last_update.start = start;
        st.last_update.end = 0;
    }

    pub async fn set_last_update_end(&self, end: i64) {
        self.inner.state.lock().await.last_update.end = end;
    }

    pub async fn set_last_init_start(&self, start: i64) {
        let mut st = self.inner.state.lock().await;
        st.last_init.start = start;
        st.last_init.end = 0;
    }

    pub async fn set_last_init_end(&self, end: i64) {
        self.inner.state.lock().await.last_init.end = end;
    }

    pub async fn set_last_update_status(
        &self,
        ldap_rc: i32,
        repl_rc: ReplRc,
        message: Option<&str>,
    ) {
        let mut st = self.inner.state.lock().await;
        let update = status::build_update_status(
            ldap_rc,
            repl_rc,
            message,
            &st.long_name,
            SystemTime::now(),
        );
        if repl_rc == ReplRc::Disabled {
            error!(
                agreement = %st.long_name,
                "incremental update aborted: agreement can not be updated while the \
                 replica is disabled"
            );
        }
        if matches!(update, StatusUpdate::Set { .. }) {
            metrics::record_status_written("update");
        }
        st.last_update.apply(update);
    }

    pub async fn set_last_init_status(
        &self,
        ldap_rc: i32,
        repl_rc: ReplRc,
        conn_rc: ConnRc,
        message: Option<&str>,
    ) {
        let mut st = self.inner.state.lock().await;
        let update = status::build_init_status(
            ldap_rc,
            repl_rc,
            conn_rc,
            message,
            &st.long_name,
            st.enabled,
            SystemTime::now(),
        );
        if matches!(update, StatusUpdate::Set { .. }) {
            metrics::record_status_written("init");
        }
        st.last_init.apply(update);
    }

    pub async fn last_update_status(&self) -> (String, String) {
        let st = self.inner.state.lock().await;
        (st.last_update.human.clone(), st.last_update.json.clone())
    }

    pub async fn last_init_status(&self) -> (String, String) {
        let st = self.inner.state.lock().await;
        (st.last_init.human.clone(), st.last_init.json.clone())
    }

    /// Bump the per-rid change counter; allocates a new record for a
    /// new rid.
    pub async fn inc_change_counter(&self, rid: u16, skipped: bool) {
        let mut st = self.inner.state.lock().await;
        st.counters.increment(rid, skipped);
        metrics::record_change_counted(skipped);
    }

    /// `rid:replayed/skipped` tokens, space-separated.
    pub async fn changecount_string(&self) -> String {
        self.inner.state.lock().await.counters.render()
    }

    /// Read-side snapshot of the agreement's progress.
    pub async fn status_report(&self) -> AgreementStatusReport {
        let st = self.inner.state.lock().await;
        let (update_status, update_json) = if st.last_update.human.is_empty() {
            status::default_update_status(SystemTime::now())
        } else {
            (st.last_update.human.clone(), st.last_update.json.clone())
        };
        AgreementStatusReport {
            last_update_start: status::format_epoch_secs(st.last_update.start),
            last_update_end: status::format_epoch_secs(st.last_update.end),
            last_update_status: update_status,
            last_update_status_json: update_json,
            update_in_progress: st.update_in_progress,
            changes_sent: st.counters.render(),
            last_init_start: status::format_epoch_secs(st.last_init.start),
            last_init_end: status::format_epoch_secs(st.last_init.end),
            last_init_status: if st.last_init.human.is_empty() {
                None
            } else {
                Some(st.last_init.human.clone())
            },
            last_init_status_json: if st.last_init.json.is_empty() {
                None
            } else {
                Some(st.last_init.json.clone())
            },
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Allow replication to begin at the next scheduled time.
    ///
    /// Reads the subtree's RUV tombstone before taking the agreement
    /// mutex, creates the worker in the configured initial state, and
    /// reconciles this agreement's persisted maxcsn (extracting the
    /// consumer rid as tentative). A no-op if already started or
    /// disabled.
    pub async fn start(&self) -> Result<()> {
        let (enabled, auto_initialize) = {
            let st = self.inner.state.lock().await;
            (st.enabled, st.auto_initialize)
        };
        if !enabled {
            return Ok(());
        }
        let initial_state = match auto_initialize {
            AutoInitialize::Total => ProtocolState::Total,
            AutoInitialize::Incremental => ProtocolState::Incremental,
        };

        // The tombstone search must happen before the mutex is taken to
        // avoid a lock-order inversion with the unique-id index.
        let maxcsns = match self
            .inner
            .directory
            .read_tombstone_maxcsns(&self.inner.subtree)
            .await
        {
            Ok(values) => values,
            Err(e) => {
                warn!(
                    subtree = %self.inner.subtree,
                    error = %e,
                    "replica ruv tombstone entry not found"
                );
                Vec::new()
            }
        };

        let protocol = self.inner.factory.create(initial_state);

        let mut st = self.inner.state.lock().await;
        if st.protocol.is_some() {
            debug!(agreement = %st.long_name, "replication already started");
            return Ok(());
        }
        st.protocol = Some(Arc::clone(&protocol));
        protocol.start();

        let prefix = maxcsn::prefix(
            self.inner.subtree.as_str(),
            &self.inner.rdn,
            &st.hostname,
            st.port,
        );
        if let Some(value) = maxcsns.iter().find(|v| v.starts_with(&prefix)) {
            st.maxcsn = Some(value.clone());
            st.consumer_rid = maxcsn::rid_of(value);
            st.rid_tentative = true;
            debug!(
                agreement = %st.long_name,
                maxcsn = %value,
                rid = st.consumer_rid,
                "restored agreement maxcsn from tombstone"
            );
        }

        // Forward schedule window flips to the worker from a dedicated
        // task; scheduler context must never re-enter our locks.
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let mut window_rx = self.inner.schedule.window_changes();
        let worker = Arc::clone(&protocol);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = window_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        if *window_rx.borrow() {
                            worker.notify_window_opened();
                        } else {
                            worker.notify_window_closed();
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        st.window_task = Some(handle);
        st.window_shutdown = Some(shutdown_tx);

        info!(agreement = %st.long_name, "agreement started");
        metrics::record_agreement_started();
        Ok(())
    }

    /// Cease replicating as soon as possible.
    ///
    /// Idempotent; blocks until the worker has acknowledged the stop.
    /// The protocol handle is taken outside the mutex so worker
    /// shutdown never runs inside our critical section.
    pub async fn stop(&self) {
        let (protocol, window_task, window_shutdown) = {
            let mut st = self.inner.state.lock().await;
            if st.stop_in_progress {
                return;
            }
            st.stop_in_progress = true;
            (
                st.protocol.clone(),
                st.window_task.take(),
                st.window_shutdown.take(),
            )
        };

        if let Some(p) = protocol {
            p.stop().await;
        }
        if let Some(tx) = window_shutdown {
            let _ = tx.send(true);
        }
        if let Some(task) = window_task {
            let _ = task.await;
        }

        let mut st = self.inner.state.lock().await;
        // the worker is not reused across restarts
        st.protocol = None;
        st.stop_in_progress = false;
        info!(agreement = %st.long_name, "agreement stopped");
        metrics::record_agreement_stopped();
    }

    /// Destroy the agreement: stop the worker, run the session-cleanup
    /// hook, release the consumer RUV, and strip this agreement's value
    /// from the persisted tombstone maxcsn attribute.
    pub async fn delete(&self) {
        self.stop().await;
        if self.inner.agreement_type == AgreementType::MultiSupplier {
            self.inner.factory.session_cleanup();
        }
        {
            let mut st = self.inner.state.lock().await;
            st.consumer_ruv = None;
        }
        self.remove_maxcsn().await;
        info!(agreement = %self.inner.dn, "agreement deleted");
    }

    /// Send pending updates immediately, ignoring the schedule.
    ///
    /// Deliberately a no-op: the scheduler is the sole trigger.
    pub async fn replicate_now(&self) -> Result<()> {
        debug!(agreement = %self.inner.dn, "replicate-now requested (no-op)");
        Ok(())
    }

    /// Transition the running worker into a total refresh.
    pub async fn initialize_replica(&self) -> Result<()> {
        let protocol = {
            let st = self.inner.state.lock().await;
            if st.stop_in_progress {
                return Ok(());
            }
            st.protocol.clone()
        };
        match protocol {
            Some(p) => {
                p.initialize_replica();
                Ok(())
            }
            // no worker means the suffix is disabled
            None => Err(AgreementError::Disabled(
                "replica initialization requires a started agreement".to_string(),
            )),
        }
    }

    /// End-of-session flush point for both update flavors.
    pub async fn update_done(&self, is_total: bool) {
        if self.inner.agreement_type == AgreementType::Windows {
            debug!(agreement = %self.inner.dn, is_total, "windows agreement update done");
        }
    }

    // =========================================================================
    // Hot path
    // =========================================================================

    /// Offer a local change for delivery to this peer.
    ///
    /// Drops changes outside the replicated subtree. On a fractional
    /// agreement a modify is delivered only if some touched attribute is
    /// not in the exclude set; add, delete, and modrdn always replay.
    pub async fn notify_change(&self, change: &PendingChange) {
        let st = self.inner.state.lock().await;
        if st.stop_in_progress {
            return;
        }
        if !change.target.is_under(&self.inner.subtree) {
            return;
        }

        let relevant = match &change.op {
            ChangeOp::Modify { attrs } => {
                let filters = self.inner.filters.read().await;
                match filters.incremental.as_deref() {
                    Some(excluded) => attrs
                        .iter()
                        .any(|a| !config::contains_attr(excluded, a)),
                    None => true,
                }
            }
            _ => true,
        };

        let protocol = st.protocol.clone();
        drop(st);

        metrics::record_change_offered(relevant);
        if relevant {
            if let Some(p) = protocol {
                p.notify_update();
            }
        }
    }

    /// Record a delivered change's CSN as this peer's agreement maxcsn.
    ///
    /// Skipped when every modified attribute is individually removed by
    /// the fractional or strip set; any surviving attribute re-enables
    /// the write. The formatted value always carries the current
    /// consumer rid, or `unavailable` before the first contact.
    pub async fn update_maxcsn(&self, target: &Dn, op: &ChangeOp, csn: &Csn) {
        if self.inner.agreement_type == AgreementType::Windows {
            return;
        }
        if !target.is_under(&self.inner.subtree) {
            return;
        }
        {
            let st = self.inner.state.lock().await;
            if !st.enabled {
                return;
            }
        }

        if let ChangeOp::Modify { attrs } = op {
            let filters = self.inner.filters.read().await;
            let excluded = attrs
                .iter()
                .filter(|a| {
                    filters
                        .incremental
                        .as_deref()
                        .is_some_and(|list| config::contains_attr(list, a))
                        || filters
                            .strip
                            .as_deref()
                            .is_some_and(|list| config::contains_attr(list, a))
                })
                .count();
            if excluded > 0 && excluded == attrs.len() {
                return;
            }
        }

        let mut st = self.inner.state.lock().await;
        let value = AgreementMaxCsn {
            subtree: self.inner.subtree.as_str().to_string(),
            rdn: self.inner.rdn.clone(),
            host: st.hostname.clone(),
            port: st.port,
            rid: if st.consumer_rid == 0 {
                None
            } else {
                Some(st.consumer_rid)
            },
            csn: csn.as_str().to_string(),
        };
        st.maxcsn = Some(value.to_string());
    }

    /// Strip this agreement's value from the persisted tombstone maxcsn
    /// attribute and forget the in-memory copy.
    pub async fn remove_maxcsn(&self) {
        let prefix = {
            let mut st = self.inner.state.lock().await;
            st.maxcsn = None;
            maxcsn::prefix(
                self.inner.subtree.as_str(),
                &self.inner.rdn,
                &st.hostname,
                st.port,
            )
        };
        let values = match self
            .inner
            .directory
            .read_tombstone_maxcsns(&self.inner.subtree)
            .await
        {
            Ok(values) => values,
            Err(e) => {
                warn!(
                    subtree = %self.inner.subtree,
                    error = %e,
                    "replica ruv tombstone entry not found"
                );
                return;
            }
        };
        if let Some(value) = values.iter().find(|v| v.starts_with(&prefix)) {
            if let Err(e) = self
                .inner
                .directory
                .delete_tombstone_maxcsn(&self.inner.subtree, value)
                .await
            {
                warn!(maxcsn = %value, error = %e, "failed to remove agreement maxcsn");
            }
        }
    }

    // =========================================================================
    // Persistence through the directory
    // =========================================================================

    /// Write the last-init timestamps and status back to the agreement's
    /// configuration entry. Skipped entirely when nothing is set.
    pub async fn update_init_status(&self) {
        let mods = {
            let st = self.inner.state.lock().await;
            let mut mods = Vec::new();
            if st.last_init.start != 0 {
                mods.push(AttrMod::replace(
                    record::ATTR_LAST_INIT_START,
                    status::format_epoch_secs(st.last_init.start),
                ));
            }
            if st.last_init.end != 0 {
                mods.push(AttrMod::replace(
                    record::ATTR_LAST_INIT_END,
                    status::format_epoch_secs(st.last_init.end),
                ));
            }
            if !st.last_init.human.is_empty() {
                mods.push(AttrMod::replace(
                    record::ATTR_LAST_INIT_STATUS,
                    st.last_init.human.clone(),
                ));
            }
            mods
            // lock released before the modify: the write path notifies
            // every sibling agreement and would re-enter it
        };
        if mods.is_empty() {
            return;
        }
        if let Err(e) = self.inner.directory.modify_entry(&self.inner.dn, mods).await {
            warn!(agreement = %self.inner.dn, error = %e, "failed to persist init status");
        }
    }

    /// Persist the held consumer RUV onto the agreement's entry.
    pub async fn update_consumer_ruv(&self) {
        let ruv = { self.inner.state.lock().await.consumer_ruv.clone() };
        let Some(ruv) = ruv else { return };
        if let Err(e) = self
            .inner
            .directory
            .persist_consumer_ruv(&self.inner.dn, ruv)
            .await
        {
            warn!(agreement = %self.inner.dn, error = %e, "failed to persist consumer RUV");
        }
    }

    /// Delete the refresh sentinel from the configuration entry to tell
    /// clients the initialization completed.
    pub async fn replica_init_done(&self) {
        if let Err(e) = self
            .inner
            .directory
            .modify_entry(&self.inner.dn, vec![AttrMod::delete(record::ATTR_REFRESH)])
            .await
        {
            error!(
                agreement = %self.inner.dn,
                error = %e,
                "failed to remove refresh sentinel from agreement entry"
            );
        }
    }
}

impl std::fmt::Debug for Agreement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agreement")
            .field("dn", &self.inner.dn)
            .field("subtree", &self.inner.subtree)
            .field("type", &self.inner.agreement_type)
            .finish()
    }
}
