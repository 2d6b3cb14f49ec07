pub mod api;
pub mod records;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use api::WatchApi;
pub use records::{history_from_map, HistoryMap, WatchListing, WatchRecord};

/// One remotely monitored resource and its last-known state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Watch {
    pub id: String,
    pub url: String,
    pub title: String,
    pub status: WatchStatus,
    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_changed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub history: Vec<Snapshot>,
    #[serde(default)]
    pub last_viewed: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Watch {
    /// Newest recorded snapshot, if any history has been fetched.
    pub fn latest_snapshot(&self) -> Option<&Snapshot> {
        self.history.last()
    }

    /// Base version for a diff when the user did not name one.
    ///
    /// Mirrors the remote service's own selection: if the watch was viewed
    /// after the newest change, diff the latest two snapshots; if the
    /// last-viewed time falls between two snapshots, use the older bound;
    /// otherwise fall back to the oldest snapshot.
    pub fn diff_base_snapshot(&self) -> Option<&Snapshot> {
        if self.history.len() < 2 {
            return None;
        }
        let last_viewed = self.last_viewed.unwrap_or(0);
        let newest = &self.history[self.history.len() - 1];
        if last_viewed >= newest.timestamp {
            return self.history.get(self.history.len() - 2);
        }
        for pair in self.history.windows(2).rev() {
            let (older, newer) = (&pair[0], &pair[1]);
            if last_viewed < newer.timestamp && last_viewed >= older.timestamp {
                return Some(older);
            }
        }
        self.history.first()
    }

    /// Default `(from, to)` version pair for the diff view.
    pub fn default_diff_pair(&self) -> Option<(String, String)> {
        let to = self.latest_snapshot()?;
        let from = self.diff_base_snapshot()?;
        Some((from.version_id.clone(), to.version_id.clone()))
    }
}

/// An immutable recorded version of a watch's content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    pub version_id: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum WatchStatus {
    Unchecked,
    Checking,
    Unchanged,
    Changed,
    Error,
}

impl Default for WatchStatus {
    fn default() -> Self {
        Self::Unchecked
    }
}

impl WatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchStatus::Unchecked => "unchecked",
            WatchStatus::Checking => "checking",
            WatchStatus::Unchanged => "unchanged",
            WatchStatus::Changed => "changed",
            WatchStatus::Error => "error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, WatchStatus::Error)
    }
}

impl fmt::Display for WatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WatchStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "unchecked" => Ok(WatchStatus::Unchecked),
            "checking" => Ok(WatchStatus::Checking),
            "unchanged" => Ok(WatchStatus::Unchanged),
            "changed" => Ok(WatchStatus::Changed),
            "error" => Ok(WatchStatus::Error),
            other => Err(format!("unknown watch status '{other}'")),
        }
    }
}

/// Closed failure taxonomy for every remote operation.
///
/// Callers branch on the variant, never on message text: `Network` feeds
/// backoff, `Auth` halts polling globally, `NotFound` deletes the watch,
/// `Parse` marks the watch errored until the next cycle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("malformed response: {0}")]
    Parse(String),
}

impl ApiError {
    /// Whether retrying with backoff is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }
}
