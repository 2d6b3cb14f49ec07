//! Raw wire records for the remote change-detection API.
//!
//! Remote payloads are tolerated field-by-field (`#[serde(default)]`,
//! flattened extras) but validated before conversion; nothing
//! partially-validated crosses into the store.

use crate::{ApiError, Snapshot, Watch, WatchStatus};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Listing body: a JSON object keyed by watch id.
pub type WatchListing = HashMap<String, WatchRecord>;

/// History body: version id mapped to its unix timestamp.
pub type HistoryMap = HashMap<String, i64>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchRecord {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub last_checked: i64,
    #[serde(default)]
    pub last_changed: i64,
    #[serde(default)]
    pub last_error: Option<ErrorField>,
    #[serde(default)]
    pub last_viewed: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

/// The remote reports `last_error` as either `false` or a message string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorField {
    Flag(bool),
    Message(String),
}

impl ErrorField {
    pub fn message(&self) -> Option<&str> {
        match self {
            ErrorField::Flag(_) => None,
            ErrorField::Message(text) if text.trim().is_empty() => None,
            ErrorField::Message(text) => Some(text),
        }
    }
}

impl WatchRecord {
    /// Validate and normalize into the local model.
    pub fn into_watch(self, id: &str) -> Result<Watch, ApiError> {
        if id.trim().is_empty() {
            return Err(ApiError::Parse("watch record with empty id".to_string()));
        }
        if self.url.trim().is_empty() {
            return Err(ApiError::Parse(format!("watch {id} has no url")));
        }
        let error_message = self
            .last_error
            .as_ref()
            .and_then(ErrorField::message)
            .map(str::to_string);
        let last_viewed = self.last_viewed.filter(|ts| *ts > 0);
        let status = derive_status(
            self.last_checked,
            self.last_changed,
            last_viewed,
            error_message.is_some(),
        );
        let title = self
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| self.url.clone());
        Ok(Watch {
            id: id.to_string(),
            url: self.url,
            title,
            status,
            last_checked_at: timestamp_opt(self.last_checked)?,
            last_changed_at: timestamp_opt(self.last_changed)?,
            revision: 0,
            error_message,
            history: Vec::new(),
            last_viewed,
            tags: self.tags,
        })
    }
}

fn derive_status(
    last_checked: i64,
    last_changed: i64,
    last_viewed: Option<i64>,
    has_error: bool,
) -> WatchStatus {
    if has_error {
        WatchStatus::Error
    } else if last_checked <= 0 {
        WatchStatus::Unchecked
    } else if last_changed > 0 && last_changed > last_viewed.unwrap_or(0) {
        WatchStatus::Changed
    } else {
        WatchStatus::Unchanged
    }
}

fn timestamp_opt(unix_secs: i64) -> Result<Option<DateTime<Utc>>, ApiError> {
    if unix_secs <= 0 {
        return Ok(None);
    }
    Utc.timestamp_opt(unix_secs, 0)
        .single()
        .map(Some)
        .ok_or_else(|| ApiError::Parse(format!("timestamp {unix_secs} out of range")))
}

/// Normalize a history map into snapshots ordered oldest-first.
pub fn history_from_map(map: HistoryMap) -> Vec<Snapshot> {
    let mut snapshots: Vec<Snapshot> = map
        .into_iter()
        .map(|(version_id, timestamp)| Snapshot {
            version_id,
            timestamp,
        })
        .collect();
    snapshots.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.version_id.cmp(&b.version_id))
    });
    snapshots
}
