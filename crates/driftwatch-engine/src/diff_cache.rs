//! Byte-budgeted memo of rendered diff text.
//!
//! Keyed by the ordered `(watch, from, to)` triple; A→B and B→A are
//! distinct entries. Least-recently-used entries are evicted once the
//! budget is exceeded.

use driftwatch_core::{ApiError, WatchApi};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

pub type DiffKey = (String, String, String);

pub struct DiffCache {
    entries: HashMap<DiffKey, Arc<str>>,
    recency: VecDeque<DiffKey>,
    bytes: usize,
    budget: usize,
}

impl DiffCache {
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            recency: VecDeque::new(),
            bytes: 0,
            budget: budget_bytes,
        }
    }

    pub fn key(watch_id: &str, from: &str, to: &str) -> DiffKey {
        (watch_id.to_string(), from.to_string(), to.to_string())
    }

    /// Cached text for the key, refreshing its recency on hit.
    pub fn get(&mut self, key: &DiffKey) -> Option<Arc<str>> {
        let text = self.entries.get(key)?.clone();
        self.touch(key);
        Some(text)
    }

    /// Retain the text under the key, evicting least-recently-used entries
    /// until the budget holds. Entries larger than the entire budget are
    /// not retained at all.
    pub fn insert(&mut self, key: DiffKey, text: Arc<str>) {
        if text.len() > self.budget {
            debug!(
                "diff for {} ({} bytes) exceeds cache budget {}, not retained",
                key.0,
                text.len(),
                self.budget
            );
            return;
        }
        if let Some(previous) = self.entries.insert(key.clone(), text.clone()) {
            self.bytes -= previous.len();
            self.touch(&key);
        } else {
            self.recency.push_back(key);
        }
        self.bytes += text.len();
        while self.bytes > self.budget {
            let Some(oldest) = self.recency.pop_front() else {
                break;
            };
            if let Some(evicted) = self.entries.remove(&oldest) {
                self.bytes -= evicted.len();
                debug!("evicted cached diff for {} ({} bytes)", oldest.0, evicted.len());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    fn touch(&mut self, key: &DiffKey) {
        if let Some(position) = self.recency.iter().position(|k| k == key) {
            self.recency.remove(position);
            self.recency.push_back(key.clone());
        }
    }

    /// Serve from cache or fetch through the gateway and retain the result.
    /// Repeated calls with the same key issue at most one underlying fetch.
    pub async fn get_or_compute(
        cache: &Mutex<Self>,
        api: &dyn WatchApi,
        watch_id: &str,
        from: &str,
        to: &str,
    ) -> Result<Arc<str>, ApiError> {
        let key = Self::key(watch_id, from, to);
        if let Some(text) = cache.lock().await.get(&key) {
            return Ok(text);
        }
        let fetched: Arc<str> = Arc::from(api.fetch_diff(watch_id, from, to).await?);
        let mut guard = cache.lock().await;
        if let Some(existing) = guard.get(&key) {
            return Ok(existing);
        }
        guard.insert(key, fetched.clone());
        Ok(fetched)
    }
}
