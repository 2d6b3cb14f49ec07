//! The single authoritative in-memory model of all watches.
//!
//! Every mutation flows through this type on the engine loop; subscribers
//! observe changes as a stream of events carrying the updated records.

use driftwatch_core::{Snapshot, Watch, WatchStatus};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::debug;

/// Change notification, one per applied mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Updated { watch: Watch },
    Removed { id: String },
}

/// Result of a completed fetch, fed to [`WatchStore::apply_result`].
#[derive(Debug, Clone)]
pub enum CheckOutcome {
    /// Fresh remote detail with history merged in.
    Refreshed { watch: Watch },
    /// The fetch settled in an error the watch should carry.
    Failed { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyDisposition {
    Applied,
    /// A newer result already landed (or the watch was deleted); dropped.
    Stale,
}

#[derive(Default)]
pub struct WatchStore {
    watches: BTreeMap<String, Watch>,
    subscribers: Vec<mpsc::UnboundedSender<StoreEvent>>,
}

impl WatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<StoreEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn get(&self, id: &str) -> Option<&Watch> {
        self.watches.get(id)
    }

    /// Stable id-ordered snapshot for rendering.
    pub fn all(&self) -> Vec<Watch> {
        self.watches.values().cloned().collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.watches.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.watches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    /// Flip a watch to `Checking` ahead of a fetch and return the revision
    /// the fetch must present back to `apply_result`.
    pub fn mark_checking(&mut self, id: &str) -> Option<u64> {
        let watch = self.watches.get_mut(id)?;
        watch.status = WatchStatus::Checking;
        watch.revision += 1;
        let revision = watch.revision;
        let snapshot = watch.clone();
        self.emit(StoreEvent::Updated { watch: snapshot });
        Some(revision)
    }

    /// Single mutation entry point for fetch results.
    ///
    /// `expected_revision` is the revision the caller observed when its
    /// fetch started; if the stored revision has moved past it the result
    /// is stale and silently dropped.
    pub fn apply_result(
        &mut self,
        id: &str,
        outcome: CheckOutcome,
        expected_revision: u64,
    ) -> ApplyDisposition {
        let Some(current) = self.watches.get_mut(id) else {
            return ApplyDisposition::Stale;
        };
        if current.revision > expected_revision {
            debug!(
                "stale result for {id}: store at {} > expected {expected_revision}",
                current.revision
            );
            return ApplyDisposition::Stale;
        }
        match outcome {
            CheckOutcome::Refreshed { watch: fresh } => {
                current.url = fresh.url;
                current.title = fresh.title;
                current.status = fresh.status;
                current.error_message = fresh.error_message;
                current.last_checked_at = monotonic_max(current.last_checked_at, fresh.last_checked_at);
                current.last_changed_at = monotonic_max(current.last_changed_at, fresh.last_changed_at);
                current.last_viewed = fresh.last_viewed.or(current.last_viewed);
                current.tags = fresh.tags;
                merge_history(&mut current.history, fresh.history);
            }
            CheckOutcome::Failed { message } => {
                current.status = WatchStatus::Error;
                current.error_message = Some(message);
            }
        }
        current.revision += 1;
        let snapshot = current.clone();
        self.emit(StoreEvent::Updated { watch: snapshot });
        ApplyDisposition::Applied
    }

    /// Reconcile a full remote listing: insert new watches, update known
    /// ones. Absence from a listing never deletes; deletion is driven by
    /// the remote reporting the watch gone.
    pub fn sync_listing(&mut self, listing: Vec<Watch>) {
        for incoming in listing {
            match self.watches.get_mut(&incoming.id) {
                Some(current) => {
                    if listing_differs(current, &incoming) {
                        current.url = incoming.url;
                        current.title = incoming.title;
                        current.status = incoming.status;
                        current.error_message = incoming.error_message;
                        current.last_checked_at =
                            monotonic_max(current.last_checked_at, incoming.last_checked_at);
                        current.last_changed_at =
                            monotonic_max(current.last_changed_at, incoming.last_changed_at);
                        current.last_viewed = incoming.last_viewed.or(current.last_viewed);
                        current.tags = incoming.tags;
                        current.revision += 1;
                        let snapshot = current.clone();
                        self.emit(StoreEvent::Updated { watch: snapshot });
                    }
                }
                None => {
                    let mut fresh = incoming;
                    fresh.revision = 1;
                    let snapshot = fresh.clone();
                    self.watches.insert(fresh.id.clone(), fresh);
                    self.emit(StoreEvent::Updated { watch: snapshot });
                }
            }
        }
    }

    pub fn remove(&mut self, id: &str) -> bool {
        if self.watches.remove(id).is_some() {
            self.emit(StoreEvent::Removed { id: id.to_string() });
            true
        } else {
            false
        }
    }

    fn emit(&mut self, event: StoreEvent) {
        self.subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

fn monotonic_max<T: Ord + Copy>(current: Option<T>, fresh: Option<T>) -> Option<T> {
    match (current, fresh) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// History never loses entries: keep everything already recorded and
/// append any versions the fresh fetch added.
fn merge_history(current: &mut Vec<Snapshot>, fresh: Vec<Snapshot>) {
    for snapshot in fresh {
        if !current.iter().any(|s| s.version_id == snapshot.version_id) {
            current.push(snapshot);
        }
    }
    current.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.version_id.cmp(&b.version_id))
    });
}

/// Fields a listing is allowed to move; revision and history are local.
fn listing_differs(current: &Watch, incoming: &Watch) -> bool {
    current.url != incoming.url
        || current.title != incoming.title
        || current.status != incoming.status
        || current.error_message != incoming.error_message
        || current.last_checked_at
            != monotonic_max(current.last_checked_at, incoming.last_checked_at)
        || current.last_changed_at
            != monotonic_max(current.last_changed_at, incoming.last_changed_at)
        || current.last_viewed != incoming.last_viewed.or(current.last_viewed)
        || current.tags != incoming.tags
}
