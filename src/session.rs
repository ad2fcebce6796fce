//! Session identifiers for log correlation.
//!
//! Every replication session carries a tag `"<prefix> NNN"`: a prefix
//! that is deterministic for this agreement's supplier/consumer pair, and
//! a counter cycling through 1..=999. The prefix is the SHA-1 of
//! `subtree || local-host || port || secure-port`, base64-encoded and
//! truncated so the rendered tag fits the fixed log field. When any of
//! the inputs is unavailable the prefix falls back to `dummyID`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha1::{Digest, Sha1};

/// Rendered tag capacity; the prefix is capped four bytes short to
/// leave room for `" NNN"`.
const SESSION_ID_LEN: usize = 15;
const PREFIX_CAP: usize = SESSION_ID_LEN - 4;

/// Fallback prefix when any hash input is missing.
const FALLBACK_PREFIX: &str = "dummyID";

/// Per-agreement session tag: deterministic prefix plus cycling counter.
#[derive(Debug, Clone)]
pub struct SessionId {
    prefix: String,
    counter: u16,
    rendered: String,
}

impl SessionId {
    /// Derive the session prefix for an agreement. The counter starts at 1
    /// and the tag renders as `"<prefix> ---"` until the first session
    /// advances it.
    pub fn new(
        subtree: Option<&str>,
        local_host: Option<&str>,
        local_port: Option<u16>,
        local_secure_port: Option<u16>,
    ) -> Self {
        let prefix = match (subtree, local_host, local_port, local_secure_port) {
            (Some(root), Some(host), Some(port), Some(sport)) => {
                let input = format!("{root}{host}{port}{sport}");
                let digest = Sha1::digest(input.as_bytes());
                let mut enc = BASE64.encode(digest);
                enc.truncate(PREFIX_CAP);
                enc
            }
            _ => FALLBACK_PREFIX.to_string(),
        };
        let rendered = format!("{prefix} ---");
        Self {
            prefix,
            counter: 1,
            rendered,
        }
    }

    /// The current tag, `"<prefix> NNN"`.
    pub fn tag(&self) -> &str {
        &self.rendered
    }

    /// The deterministic prefix alone.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The current counter value.
    pub fn counter(&self) -> u16 {
        self.counter
    }

    /// Advance to the next session: 1 → 2 → … → 999 → 1.
    pub fn advance(&mut self) {
        if self.counter == 999 {
            self.counter = 1;
        } else {
            self.counter += 1;
        }
        self.rendered = format!("{} {:03}", self.prefix, self.counter);
    }
}
