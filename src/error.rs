// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the agreement engine.
//!
//! Errors are categorized by where they surface and whether the worker
//! should retry. Nothing here is fatal to the process: a bad configuration
//! record aborts only the creation of that one agreement, and everything
//! else is recorded into the agreement's status slots.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `ConfigInvalid` | No | Validator rejected a configuration record |
//! | `ConfigConflict` | No | A setter detected an invariant violation |
//! | `TransientRemote` | Yes | Peer reported busy/transient/backoff |
//! | `FatalRemote` | No | Any other non-zero LDAP or protocol code |
//! | `DirectoryIo` | No | Local directory search/modify failed |
//! | `Disabled` | No | Suffix or agreement is administratively disabled |
//! | `Internal` | No | Unexpected internal error |

use thiserror::Error;

/// Result type alias for agreement operations.
pub type Result<T> = std::result::Result<T, AgreementError>;

/// Errors raised by the agreement engine.
///
/// Use [`is_retryable()`](Self::is_retryable) to decide whether a session
/// should be retried on the next schedule tick.
#[derive(Error, Debug)]
pub enum AgreementError {
    /// The validator rejected a configuration record.
    ///
    /// The agreement is not created. This is the only failure surfaced
    /// at the creation API.
    #[error("invalid agreement configuration \"{agreement}\": {}", .diagnostics.join("; "))]
    ConfigInvalid {
        agreement: String,
        diagnostics: Vec<String>,
    },

    /// A setter detected a post-hoc invariant violation.
    ///
    /// The change is rejected and the existing state is preserved.
    #[error("configuration conflict on {attribute}: {message}")]
    ConfigConflict { attribute: String, message: String },

    /// The peer reported a retryable acquisition failure
    /// (busy, transient, or backoff).
    #[error("transient remote error: {0}")]
    TransientRemote(String),

    /// Any other non-zero LDAP or protocol result.
    ///
    /// The session ends; the agreement stays enabled and retries on the
    /// next tick.
    #[error("remote error ({code}): {message}")]
    FatalRemote { code: i32, message: String },

    /// A local directory search or modify failed.
    ///
    /// Logged by the engine, never surfaced to callers of the public
    /// operations.
    #[error("directory operation failed: {0}")]
    DirectoryIo(String),

    /// The suffix or agreement is administratively disabled.
    #[error("replication disabled: {0}")]
    Disabled(String),

    /// Unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AgreementError {
    /// Build a `ConfigConflict` for a named attribute.
    pub fn conflict(attribute: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigConflict {
            attribute: attribute.into(),
            message: message.into(),
        }
    }

    /// Check if the operation should be retried on the next tick.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransientRemote(_) => true,
            Self::ConfigInvalid { .. } => false,
            Self::ConfigConflict { .. } => false,
            Self::FatalRemote { .. } => false,
            Self::DirectoryIo(_) => false, // logged, needs operator attention
            Self::Disabled(_) => false,
            Self::Internal(_) => false,
        }
    }
}
