//! Synthetic records written by the filler.

use std::fmt;

use rand::TryRngCore;
use rand::rngs::OsRng;
use uuid::Uuid;

use crate::error::{Error, Result};

/// The prefix all records are written under unless configured otherwise.
pub const DEFAULT_PREFIX: &str = "/data";

/// The document stored as the value of every record.
pub const PAYLOAD: &str = r#"{
    "process_guid": "grace-1",
    "domain": "test",
    "rootfs": "docker:///onsi/grace-busybox",
    "instances": 1,
    "ports": [
        8080
    ],
    "action": {
        "run": {
            "path": "/grace",
            "args": [
                "-chatty"
            ],
            "dir": "/tmp",
            "user": "root"
        }
    },
    "routes": {
        "cf-router": [
            {
                "hostnames": [
                    "grace.app-domain.com"
                ],
                "port": 8080
            }
        ]
    }
}"#;

/// Unique identifier of a record.
///
/// This is a random version 4 UUID, displayed in its canonical hyphenated form.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Mints a new identifier from operating system randomness.
    ///
    /// Unlike [`Uuid::new_v4`], this reports a failing entropy source instead of panicking.
    pub fn mint() -> Result<Self> {
        let mut bytes = [0; 16];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|err| Error::IdentifierGeneration(err.to_string()))?;

        Ok(Self(uuid::Builder::from_random_bytes(bytes).into_uuid()))
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for RecordId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

/// A single synthetic unit of data.
///
/// Records live only for the duration of their write attempt.
#[derive(Debug, Clone)]
pub struct Record {
    /// The unique identifier of this record.
    pub id: RecordId,
    /// The storage key, scoped under the filler's prefix.
    pub key: String,
    /// The document to store.
    pub payload: &'static str,
}

impl Record {
    /// Creates the record for `id` under a prefix normalized by [`normalize_prefix`].
    pub fn new(prefix: &str, id: RecordId) -> Self {
        Self {
            id,
            key: format!("{prefix}/{id}"),
            payload: PAYLOAD,
        }
    }
}

/// Brings a key prefix into the form `/segment[/segment...]`.
///
/// Leading and trailing slashes are collapsed, so `data/`, `/data` and `//data//` all yield
/// `/data`. Returns an empty string for a prefix made up of slashes only.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        return String::new();
    }
    format!("/{trimmed}")
}
