//! # Agreement Engine
//!
//! The replication agreement engine of a multi-supplier directory
//! replication system. An agreement is a durable binding between this
//! supplier and one remote consumer replica: where to connect, how to
//! authenticate, which subtree and attributes to replicate, when to
//! replicate, how fast, and how to report progress.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         agreement-engine                            │
//! │                                                                     │
//! │  ┌──────────────┐   ┌───────────────┐   ┌───────────────────────┐   │
//! │  │ ConfigRecord │──►│ parse+validate│──►│ Agreement             │   │
//! │  │ (attr bag)   │   │ (config.rs)   │   │ locks · setters ·     │   │
//! │  └──────────────┘   └───────────────┘   │ start/stop · maxcsn   │   │
//! │                                         └──────────┬────────────┘   │
//! │         ┌───────────────────────────┬──────────────┤                │
//! │         ▼                           ▼              ▼                │
//! │  ┌──────────────┐          ┌──────────────┐  ┌──────────────┐       │
//! │  │ DirectoryRef │          │ProtocolDriver│  │ ScheduleRef  │       │
//! │  │ (tombstone,  │          │ (worker      │  │ (window      │       │
//! │  │  status)     │          │  thread)     │  │  calendar)   │       │
//! │  └──────────────┘          └──────────────┘  └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine turns a configuration record stored in the directory into
//! a live, scheduled, observable replication worker, and keeps that
//! worker's configuration, authentication, fractional-attribute filter,
//! and maxcsn bookkeeping coherent under concurrent reconfiguration,
//! shutdown, and failure. The wire protocol, changelog, RUV arithmetic,
//! schedule calendar, and directory backend are collaborators reached
//! through the traits in [`protocol`], [`directory`], and [`schedule`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use agreement_engine::{Agreement, AgreementStore, ConfigRecord, LocalInstance};
//! use agreement_engine::directory::NoOpDirectory;
//! use agreement_engine::protocol::RecordingFactory;
//! use agreement_engine::schedule::AlwaysOpenSchedule;
//! use std::sync::Arc;
//!
//! # async fn example() -> agreement_engine::Result<()> {
//! let record = ConfigRecord::new("cn=to-peer,cn=replica,cn=config")
//!     .with("replica-host", "peer.example.com")
//!     .with("replica-port", "389")
//!     .with("replica-root", "dc=example,dc=com")
//!     .with("replica-bind-dn", "cn=replication manager,cn=config")
//!     .with("replica-credentials", "secret");
//!
//! let agreement = Agreement::new_from_record(
//!     &record,
//!     Arc::new(NoOpDirectory),
//!     Arc::new(RecordingFactory::new()),
//!     Arc::new(AlwaysOpenSchedule::new()),
//!     LocalInstance::default(),
//! )
//! .await?;
//!
//! let store = AgreementStore::new();
//! store.insert(agreement.clone());
//! agreement.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod agreement;
pub mod config;
pub mod directory;
pub mod dn;
pub mod error;
pub mod maxcsn;
pub mod metrics;
pub mod protocol;
pub mod record;
pub mod schedule;
pub mod session;
pub mod status;
pub mod store;
pub mod types;
pub mod validate;

// Re-exports for convenience
pub use agreement::{Agreement, AgreementStatusReport};
pub use config::{
    AgreementSettings, AgreementType, AutoInitialize, BackendFlavor, BindMethod, IgnoreMissing,
    LocalInstance, ParseContext, Transport,
};
pub use directory::{AttrMod, DirectoryRef, ModOp, NoOpDirectory};
pub use dn::Dn;
pub use error::{AgreementError, Result};
pub use maxcsn::AgreementMaxCsn;
pub use protocol::{ProtocolDriver, ProtocolFactory, ProtocolState};
pub use record::ConfigRecord;
pub use schedule::ScheduleRef;
pub use status::{ConnRc, ReplRc};
pub use store::AgreementStore;
pub use types::{ChangeOp, ConsumerRuv, Csn, PendingChange};
