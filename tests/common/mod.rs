//! Shared test fixtures.

use agreement_engine::directory::MemoryDirectory;
use agreement_engine::protocol::RecordingFactory;
use agreement_engine::schedule::AlwaysOpenSchedule;
use agreement_engine::{Agreement, ConfigRecord, LocalInstance};
use std::sync::Arc;

/// Attribute names, re-exported so scenarios read like the schema.
pub use agreement_engine::record::{
    ATTR_BIND_DN, ATTR_BIND_METHOD, ATTR_CREDENTIALS, ATTR_ENABLED, ATTR_FRACTIONAL_LIST,
    ATTR_HOST, ATTR_PORT, ATTR_REFRESH, ATTR_ROOT, ATTR_STRIP_ATTRS, ATTR_TRANSPORT,
};

pub struct TestAgreement {
    pub agreement: Agreement,
    pub factory: Arc<RecordingFactory>,
    pub directory: Arc<MemoryDirectory>,
    pub schedule: Arc<AlwaysOpenSchedule>,
}

/// The minimal record from which a valid agreement parses.
pub fn minimal_record() -> ConfigRecord {
    ConfigRecord::new("cn=a,cn=replica,cn=config")
        .with(ATTR_HOST, "h")
        .with(ATTR_PORT, "389")
        .with(ATTR_ROOT, "dc=x")
        .with(ATTR_BIND_METHOD, "SIMPLE")
        .with(ATTR_BIND_DN, "cn=u")
        .with(ATTR_CREDENTIALS, "p")
}

/// Build an agreement over recording collaborators.
pub async fn build(record: ConfigRecord) -> TestAgreement {
    let factory = Arc::new(RecordingFactory::new());
    let directory = Arc::new(MemoryDirectory::new());
    let schedule = Arc::new(AlwaysOpenSchedule::new());
    let agreement = Agreement::new_from_record(
        &record,
        Arc::clone(&directory) as _,
        Arc::clone(&factory) as _,
        Arc::clone(&schedule) as _,
        LocalInstance {
            hostname: Some("supplier.example.com".to_string()),
            port: Some(389),
            secure_port: Some(636),
        },
    )
    .await
    .expect("record should parse");
    TestAgreement {
        agreement,
        factory,
        directory,
        schedule,
    }
}

/// Build expecting a rejection.
pub async fn build_err(record: ConfigRecord) -> agreement_engine::AgreementError {
    Agreement::new_from_record(
        &record,
        Arc::new(MemoryDirectory::new()),
        Arc::new(RecordingFactory::new()),
        Arc::new(AlwaysOpenSchedule::new()),
        LocalInstance::default(),
    )
    .await
    .expect_err("record should be rejected")
}
