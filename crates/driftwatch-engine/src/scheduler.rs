//! Sync scheduling: what to fetch, when, and how failures are retried.
//!
//! Split in two layers. [`FlightTable`] is the pure per-watch state
//! machine (idle / queued / in-flight / backoff) enforcing single-flight
//! and the bounded fetch pool; [`SyncEngine`] is the async loop that owns
//! the table, the store, and the diff cache, and drives everything from a
//! single `tokio::select!`.

use crate::diff_cache::DiffCache;
use crate::dispatcher::{CommandDispatcher, EngineCommand, EngineEvent, COMMAND_QUEUE_CAPACITY};
use crate::store::{CheckOutcome, StoreEvent, WatchStore};
use driftwatch_core::{ApiError, Watch, WatchApi};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_BACKOFF_FLOOR: Duration = Duration::from_secs(1);
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    PeriodicPoll,
    UserRecheck,
}

/// One unit of scheduled work against a single watch.
#[derive(Debug, Clone)]
pub struct SyncTask {
    pub watch_id: String,
    pub kind: TaskKind,
    pub enqueued_at: Instant,
    pub attempt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightState {
    Idle,
    Queued,
    InFlight,
    Backoff { until: Instant },
}

/// Scheduling knobs, captured once at startup.
#[derive(Debug, Clone)]
pub struct SyncTunables {
    pub poll_interval: Duration,
    pub concurrency: usize,
    pub backoff_floor: Duration,
    pub backoff_cap: Duration,
    pub max_attempts: u32,
}

impl Default for SyncTunables {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            concurrency: DEFAULT_CONCURRENCY,
            backoff_floor: DEFAULT_BACKOFF_FLOOR,
            backoff_cap: DEFAULT_BACKOFF_CAP,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Outcome of a transient failure, decided by the flight table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Backoff scheduled; the task re-queues itself when `until` passes.
    RetryAt { until: Instant, delay: Duration },
    /// A user recheck was pending; it re-queued immediately instead.
    RerunNow,
    /// Consecutive failures exhausted the attempt budget.
    Abandoned,
}

#[derive(Debug, Clone)]
struct WatchFlight {
    state: FlightState,
    kind: TaskKind,
    attempt: u32,
    delay: Duration,
    rerun: bool,
}

impl WatchFlight {
    fn new(floor: Duration) -> Self {
        Self {
            state: FlightState::Idle,
            kind: TaskKind::PeriodicPoll,
            attempt: 0,
            delay: floor,
            rerun: false,
        }
    }
}

/// Per-watch flight bookkeeping plus bounded admission.
///
/// Invariants: at most one task per watch is queued or in flight, and at
/// most `concurrency` tasks are in flight across all watches.
pub struct FlightTable {
    flights: HashMap<String, WatchFlight>,
    queue: VecDeque<SyncTask>,
    in_flight: usize,
    tunables: SyncTunables,
}

impl FlightTable {
    pub fn new(tunables: SyncTunables) -> Self {
        Self {
            flights: HashMap::new(),
            queue: VecDeque::new(),
            in_flight: 0,
            tunables,
        }
    }

    /// Request work for a watch. Returns true when a new task was queued.
    ///
    /// Dedup rules: a periodic tick is ignored unless the watch is idle; a
    /// user recheck upgrades a queued periodic task, is recorded as a
    /// pending rerun while a fetch is in flight, and cuts a backoff short.
    pub fn enqueue(&mut self, watch_id: &str, kind: TaskKind, now: Instant) -> bool {
        let floor = self.tunables.backoff_floor;
        let flight = self
            .flights
            .entry(watch_id.to_string())
            .or_insert_with(|| WatchFlight::new(floor));
        match flight.state {
            FlightState::Idle => {
                flight.state = FlightState::Queued;
                flight.kind = kind;
                self.queue.push_back(SyncTask {
                    watch_id: watch_id.to_string(),
                    kind,
                    enqueued_at: now,
                    attempt: flight.attempt,
                });
                true
            }
            FlightState::Queued => {
                if kind == TaskKind::UserRecheck && flight.kind == TaskKind::PeriodicPoll {
                    flight.kind = TaskKind::UserRecheck;
                    if let Some(task) = self.queue.iter_mut().find(|t| t.watch_id == watch_id) {
                        task.kind = TaskKind::UserRecheck;
                    }
                }
                false
            }
            FlightState::InFlight => {
                if kind == TaskKind::UserRecheck {
                    flight.rerun = true;
                }
                false
            }
            FlightState::Backoff { .. } => {
                if kind == TaskKind::UserRecheck {
                    flight.state = FlightState::Queued;
                    flight.kind = TaskKind::UserRecheck;
                    self.queue.push_back(SyncTask {
                        watch_id: watch_id.to_string(),
                        kind: TaskKind::UserRecheck,
                        enqueued_at: now,
                        attempt: flight.attempt,
                    });
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Admit queued tasks while fetch slots remain. User-triggered tasks
    /// are taken ahead of periodic ones, otherwise arrival order.
    pub fn start_ready(&mut self, _now: Instant) -> Vec<SyncTask> {
        let mut started = Vec::new();
        while self.in_flight < self.tunables.concurrency && !self.queue.is_empty() {
            let index = self
                .queue
                .iter()
                .position(|t| t.kind == TaskKind::UserRecheck)
                .unwrap_or(0);
            let Some(task) = self.queue.remove(index) else {
                break;
            };
            if let Some(flight) = self.flights.get_mut(&task.watch_id) {
                flight.state = FlightState::InFlight;
            }
            self.in_flight += 1;
            started.push(task);
        }
        started
    }

    /// Successful completion: reset the backoff seed; queue the one
    /// pending rerun if a user asked for another pass meanwhile.
    pub fn on_success(&mut self, watch_id: &str, now: Instant) -> bool {
        let Some(flight) = self.flights.get_mut(watch_id) else {
            return false;
        };
        if flight.state != FlightState::InFlight {
            return false;
        }
        self.in_flight -= 1;
        flight.attempt = 0;
        flight.delay = self.tunables.backoff_floor;
        if flight.rerun {
            flight.rerun = false;
            flight.state = FlightState::Queued;
            flight.kind = TaskKind::UserRecheck;
            self.queue.push_back(SyncTask {
                watch_id: watch_id.to_string(),
                kind: TaskKind::UserRecheck,
                enqueued_at: now,
                attempt: 0,
            });
            true
        } else {
            flight.state = FlightState::Idle;
            false
        }
    }

    /// Transient failure: consume the current delay as a backoff window
    /// and escalate it toward the cap.
    pub fn on_transient_failure(&mut self, watch_id: &str, now: Instant) -> RetryDecision {
        let Some(flight) = self.flights.get_mut(watch_id) else {
            return RetryDecision::Abandoned;
        };
        if flight.state != FlightState::InFlight {
            return RetryDecision::Abandoned;
        }
        self.in_flight -= 1;
        flight.attempt += 1;
        let delay = flight.delay;
        flight.delay = next_backoff(flight.delay, self.tunables.backoff_cap);
        if flight.rerun {
            flight.rerun = false;
            flight.state = FlightState::Queued;
            flight.kind = TaskKind::UserRecheck;
            self.queue.push_back(SyncTask {
                watch_id: watch_id.to_string(),
                kind: TaskKind::UserRecheck,
                enqueued_at: now,
                attempt: flight.attempt,
            });
            RetryDecision::RerunNow
        } else if flight.attempt >= self.tunables.max_attempts {
            flight.state = FlightState::Idle;
            flight.attempt = 0;
            RetryDecision::Abandoned
        } else {
            let until = now + delay;
            flight.state = FlightState::Backoff { until };
            RetryDecision::RetryAt { until, delay }
        }
    }

    /// Completion that neither retries nor resets the backoff seed
    /// (parse failures: the watch carries the error until the next cycle).
    pub fn on_settled(&mut self, watch_id: &str, now: Instant) -> bool {
        let Some(flight) = self.flights.get_mut(watch_id) else {
            return false;
        };
        if flight.state != FlightState::InFlight {
            return false;
        }
        self.in_flight -= 1;
        flight.attempt = 0;
        if flight.rerun {
            flight.rerun = false;
            flight.state = FlightState::Queued;
            flight.kind = TaskKind::UserRecheck;
            self.queue.push_back(SyncTask {
                watch_id: watch_id.to_string(),
                kind: TaskKind::UserRecheck,
                enqueued_at: now,
                attempt: 0,
            });
            true
        } else {
            flight.state = FlightState::Idle;
            false
        }
    }

    /// Fatal (service-wide) failure: release the slot, drop any pending
    /// rerun; the engine suspends polling globally.
    pub fn on_fatal(&mut self, watch_id: &str) {
        if let Some(flight) = self.flights.get_mut(watch_id) {
            if flight.state == FlightState::InFlight {
                self.in_flight -= 1;
            }
            flight.state = FlightState::Idle;
            flight.attempt = 0;
            flight.rerun = false;
        }
    }

    /// The watch is gone; forget all scheduling state for it.
    pub fn on_removed(&mut self, watch_id: &str) {
        if let Some(flight) = self.flights.remove(watch_id) {
            if flight.state == FlightState::InFlight {
                self.in_flight -= 1;
            }
        }
        self.queue.retain(|t| t.watch_id != watch_id);
    }

    /// Re-queue every backoff whose window has passed, attempt preserved.
    pub fn release_due(&mut self, now: Instant) -> usize {
        let mut released = 0;
        for (watch_id, flight) in self.flights.iter_mut() {
            if let FlightState::Backoff { until } = flight.state {
                if until <= now {
                    flight.state = FlightState::Queued;
                    self.queue.push_back(SyncTask {
                        watch_id: watch_id.clone(),
                        kind: flight.kind,
                        enqueued_at: now,
                        attempt: flight.attempt,
                    });
                    released += 1;
                }
            }
        }
        released
    }

    pub fn next_backoff_deadline(&self) -> Option<Instant> {
        self.flights
            .values()
            .filter_map(|flight| match flight.state {
                FlightState::Backoff { until } => Some(until),
                _ => None,
            })
            .min()
    }

    pub fn state(&self, watch_id: &str) -> Option<FlightState> {
        self.flights.get(watch_id).map(|flight| flight.state)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight
    }

    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }
}

fn next_backoff(current: Duration, cap: Duration) -> Duration {
    let next = current + current;
    if next > cap {
        cap
    } else {
        next
    }
}

enum TaskCompletion {
    Fetch {
        watch_id: String,
        expected_revision: u64,
        result: Result<Watch, ApiError>,
    },
    Listing {
        result: Result<Vec<Watch>, ApiError>,
    },
}

struct DiffTask {
    watch_id: String,
    handle: JoinHandle<()>,
}

/// The engine loop: owns store, flight table, and diff cache; all
/// mutations happen here, serialized, while fetches run as spawned tasks
/// reporting back over a channel.
pub struct SyncEngine {
    api: Arc<dyn WatchApi>,
    store: WatchStore,
    table: FlightTable,
    tunables: SyncTunables,
    cmd_rx: mpsc::Receiver<EngineCommand>,
    event_tx: mpsc::UnboundedSender<EngineEvent>,
    done_tx: mpsc::UnboundedSender<TaskCompletion>,
    done_rx: mpsc::UnboundedReceiver<TaskCompletion>,
    diff_cache: Arc<Mutex<DiffCache>>,
    diff_task: Option<DiffTask>,
    polling_suspended: bool,
}

impl SyncEngine {
    pub fn new(
        api: Arc<dyn WatchApi>,
        tunables: SyncTunables,
        diff_budget_bytes: usize,
    ) -> (
        Self,
        CommandDispatcher,
        mpsc::UnboundedReceiver<EngineEvent>,
    ) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let table = FlightTable::new(tunables.clone());
        let engine = Self {
            api,
            store: WatchStore::new(),
            table,
            tunables,
            cmd_rx,
            event_tx,
            done_tx,
            done_rx,
            diff_cache: Arc::new(Mutex::new(DiffCache::new(diff_budget_bytes))),
            diff_task: None,
            polling_suspended: false,
        };
        (engine, CommandDispatcher::new(cmd_tx), event_rx)
    }

    /// Subscribe to store change events. Call before `run` is spawned.
    pub fn subscribe_store(&mut self) -> mpsc::UnboundedReceiver<StoreEvent> {
        self.store.subscribe()
    }

    /// Seed the store from the startup listing.
    pub fn seed(&mut self, listing: Vec<Watch>) {
        self.store.sync_listing(listing);
    }

    pub async fn run(mut self) {
        let mut poll_ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.tunables.poll_interval,
            self.tunables.poll_interval,
        );
        poll_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "sync engine running: poll_interval={:?} concurrency={}",
            self.tunables.poll_interval, self.tunables.concurrency
        );

        loop {
            self.pump();
            let backoff_deadline = self.table.next_backoff_deadline();
            tokio::select! {
                _ = poll_ticker.tick(), if !self.polling_suspended => {
                    self.enqueue_periodic();
                }
                maybe_command = self.cmd_rx.recv() => {
                    match maybe_command {
                        Some(command) => self.handle_command(command),
                        None => break,
                    }
                }
                Some(done) = self.done_rx.recv() => {
                    self.handle_completion(done);
                }
                _ = wait_until(backoff_deadline), if backoff_deadline.is_some() => {
                    let released = self.table.release_due(Instant::now());
                    if released > 0 {
                        debug!("released {released} watches from backoff");
                    }
                }
            }
        }
        debug!("sync engine stopped: command channel closed");
    }

    fn enqueue_periodic(&mut self) {
        let now = Instant::now();
        let mut queued = 0;
        for id in self.store.ids() {
            if self.table.enqueue(&id, TaskKind::PeriodicPoll, now) {
                queued += 1;
            }
        }
        debug!("periodic tick queued {queued} polls");
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::RefreshAll => self.spawn_listing(),
            EngineCommand::Recheck { id } => {
                self.table.enqueue(&id, TaskKind::UserRecheck, Instant::now());
            }
            EngineCommand::OpenDiff { id, from, to } => self.spawn_diff(id, from, to),
            EngineCommand::AcknowledgeAuth => {
                if self.polling_suspended {
                    self.polling_suspended = false;
                    info!("auth failure acknowledged, periodic polling resumed");
                }
            }
        }
    }

    fn handle_completion(&mut self, done: TaskCompletion) {
        let now = Instant::now();
        match done {
            TaskCompletion::Listing { result } => match result {
                Ok(listing) => self.store.sync_listing(listing),
                Err(ApiError::Auth(message)) => self.suspend_polling(message),
                Err(err) => warn!("listing refresh failed: {err}"),
            },
            TaskCompletion::Fetch {
                watch_id,
                expected_revision,
                result,
            } => match result {
                Ok(watch) => {
                    self.store.apply_result(
                        &watch_id,
                        CheckOutcome::Refreshed { watch },
                        expected_revision,
                    );
                    self.table.on_success(&watch_id, now);
                }
                Err(err) if err.is_transient() => {
                    match self.table.on_transient_failure(&watch_id, now) {
                        RetryDecision::RetryAt { delay, .. } => {
                            debug!("fetch for {watch_id} failed ({err}), retrying in {delay:?}");
                        }
                        RetryDecision::RerunNow => {
                            debug!("fetch for {watch_id} failed ({err}), user rerun pending");
                        }
                        RetryDecision::Abandoned => {
                            warn!("fetch for {watch_id} failed repeatedly, giving up: {err}");
                            self.store.apply_result(
                                &watch_id,
                                CheckOutcome::Failed {
                                    message: err.to_string(),
                                },
                                expected_revision,
                            );
                        }
                    }
                }
                Err(ApiError::NotFound(_)) => {
                    info!("watch {watch_id} gone remotely, dropping it");
                    self.table.on_removed(&watch_id);
                    self.store.remove(&watch_id);
                }
                Err(ApiError::Auth(message)) => {
                    self.table.on_fatal(&watch_id);
                    self.store.apply_result(
                        &watch_id,
                        CheckOutcome::Failed {
                            message: message.clone(),
                        },
                        expected_revision,
                    );
                    self.suspend_polling(message);
                }
                Err(err) => {
                    // Parse failures: fold into the watch, retried on the
                    // next periodic cycle.
                    self.table.on_settled(&watch_id, now);
                    self.store.apply_result(
                        &watch_id,
                        CheckOutcome::Failed {
                            message: err.to_string(),
                        },
                        expected_revision,
                    );
                }
            },
        }
    }

    fn suspend_polling(&mut self, message: String) {
        if !self.polling_suspended {
            self.polling_suspended = true;
            warn!("authentication rejected, periodic polling suspended: {message}");
            let _ = self.event_tx.send(EngineEvent::AuthHalted { message });
        }
    }

    /// Start queued tasks while slots remain.
    fn pump(&mut self) {
        let now = Instant::now();
        for task in self.table.start_ready(now) {
            let Some(expected_revision) = self.store.mark_checking(&task.watch_id) else {
                // Gone from the store between queueing and admission.
                self.table.on_removed(&task.watch_id);
                continue;
            };
            let api = self.api.clone();
            let done_tx = self.done_tx.clone();
            tokio::spawn(async move {
                let result = run_fetch(api.as_ref(), &task).await;
                let _ = done_tx.send(TaskCompletion::Fetch {
                    watch_id: task.watch_id,
                    expected_revision,
                    result,
                });
            });
        }
    }

    fn spawn_listing(&mut self) {
        let api = self.api.clone();
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let result = api.list_watches().await;
            let _ = done_tx.send(TaskCompletion::Listing { result });
        });
    }

    /// Fetch a diff through the cache. Opening a different watch's diff
    /// cancels the outstanding fetch for the one no longer displayed;
    /// poll tasks are never cancelled mid-flight.
    fn spawn_diff(&mut self, id: String, from: String, to: String) {
        if let Some(previous) = self.diff_task.take() {
            if previous.watch_id != id {
                previous.handle.abort();
                debug!("cancelled outstanding diff fetch for {}", previous.watch_id);
            }
        }
        let api = self.api.clone();
        let cache = self.diff_cache.clone();
        let event_tx = self.event_tx.clone();
        let watch_id = id.clone();
        let handle = tokio::spawn(async move {
            match DiffCache::get_or_compute(&cache, api.as_ref(), &id, &from, &to).await {
                Ok(text) => {
                    let _ = event_tx.send(EngineEvent::DiffReady { id, from, to, text });
                }
                Err(err) => {
                    let _ = event_tx.send(EngineEvent::DiffFailed {
                        id,
                        message: err.to_string(),
                    });
                }
            }
        });
        self.diff_task = Some(DiffTask { watch_id, handle });
    }
}

async fn run_fetch(api: &dyn WatchApi, task: &SyncTask) -> Result<Watch, ApiError> {
    if task.kind == TaskKind::UserRecheck && task.attempt == 0 {
        // Ask the remote once per user action; backoff retries of the
        // fetch must not re-trigger the remote job.
        match api.trigger_recheck(&task.watch_id).await {
            Ok(()) => {}
            Err(err) if err.is_transient() => {
                warn!(
                    "recheck trigger for {} failed transiently, fetching current state: {err}",
                    task.watch_id
                );
            }
            Err(err) => return Err(err),
        }
    }
    let mut watch = api.get_watch(&task.watch_id).await?;
    watch.history = api.fetch_history(&task.watch_id).await?;
    Ok(watch)
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(instant) => tokio::time::sleep_until(tokio::time::Instant::from_std(instant)).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(concurrency: usize) -> FlightTable {
        FlightTable::new(SyncTunables {
            poll_interval: Duration::from_secs(60),
            concurrency,
            backoff_floor: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
            max_attempts: 5,
        })
    }

    #[test]
    fn tick_admits_at_most_k_and_queues_the_rest() {
        let mut table = table(4);
        let now = Instant::now();
        for i in 0..10 {
            assert!(table.enqueue(&format!("w{i}"), TaskKind::PeriodicPoll, now));
        }
        let started = table.start_ready(now);
        assert_eq!(started.len(), 4);
        assert_eq!(table.in_flight_count(), 4);
        assert_eq!(table.queued_count(), 6);
    }

    #[test]
    fn redundant_periodic_ticks_are_ignored() {
        let mut table = table(4);
        let now = Instant::now();
        assert!(table.enqueue("w1", TaskKind::PeriodicPoll, now));
        assert!(!table.enqueue("w1", TaskKind::PeriodicPoll, now));
        table.start_ready(now);
        assert!(!table.enqueue("w1", TaskKind::PeriodicPoll, now));
        assert_eq!(table.in_flight_count(), 1);
        assert_eq!(table.queued_count(), 0);
    }

    #[test]
    fn user_tasks_jump_ahead_of_periodic_ones() {
        let mut table = table(1);
        let now = Instant::now();
        table.enqueue("w1", TaskKind::PeriodicPoll, now);
        table.enqueue("w2", TaskKind::PeriodicPoll, now);
        table.enqueue("w3", TaskKind::UserRecheck, now);

        let first = table.start_ready(now);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].watch_id, "w3");

        table.on_success("w3", now);
        let second = table.start_ready(now);
        assert_eq!(second[0].watch_id, "w1");
    }

    #[test]
    fn user_recheck_upgrades_a_queued_periodic_task() {
        let mut table = table(1);
        let now = Instant::now();
        table.enqueue("w1", TaskKind::PeriodicPoll, now);
        table.enqueue("w2", TaskKind::PeriodicPoll, now);
        assert!(!table.enqueue("w2", TaskKind::UserRecheck, now));

        let started = table.start_ready(now);
        assert_eq!(started[0].watch_id, "w2");
        assert_eq!(started[0].kind, TaskKind::UserRecheck);
        assert_eq!(table.queued_count(), 1);
    }

    #[test]
    fn recheck_during_flight_runs_exactly_once_more() {
        let mut table = table(4);
        let now = Instant::now();
        table.enqueue("w1", TaskKind::UserRecheck, now);
        assert_eq!(table.start_ready(now).len(), 1);

        // Two rechecks while in flight collapse into one pending rerun.
        assert!(!table.enqueue("w1", TaskKind::UserRecheck, now));
        assert!(!table.enqueue("w1", TaskKind::UserRecheck, now));
        assert_eq!(table.in_flight_count(), 1);

        assert!(table.on_success("w1", now));
        let rerun = table.start_ready(now);
        assert_eq!(rerun.len(), 1);
        assert_eq!(rerun[0].kind, TaskKind::UserRecheck);

        assert!(!table.on_success("w1", now));
        assert_eq!(table.queued_count(), 0);
        assert_eq!(table.state("w1"), Some(FlightState::Idle));
    }

    #[test]
    fn backoff_doubles_to_the_cap_and_resets_after_success() {
        let mut table = table(4);
        let mut now = Instant::now();
        let mut observed = Vec::new();

        for _ in 0..3 {
            table.enqueue("w1", TaskKind::PeriodicPoll, now);
            table.start_ready(now);
            match table.on_transient_failure("w1", now) {
                RetryDecision::RetryAt { until, delay } => {
                    observed.push(delay);
                    now = until;
                    assert_eq!(table.release_due(now), 1);
                }
                other => panic!("expected scheduled retry, got {other:?}"),
            }
        }
        assert_eq!(
            observed,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );

        // Success resets the seed; the next failure starts at the floor.
        table.start_ready(now);
        table.on_success("w1", now);
        table.enqueue("w1", TaskKind::PeriodicPoll, now);
        table.start_ready(now);
        match table.on_transient_failure("w1", now) {
            RetryDecision::RetryAt { delay, .. } => assert_eq!(delay, Duration::from_secs(1)),
            other => panic!("expected scheduled retry, got {other:?}"),
        }
    }

    #[test]
    fn backoff_delay_saturates_at_the_cap() {
        let mut table = FlightTable::new(SyncTunables {
            poll_interval: Duration::from_secs(60),
            concurrency: 4,
            backoff_floor: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(4),
            max_attempts: 10,
        });
        let mut now = Instant::now();
        let mut last = Duration::ZERO;
        for _ in 0..5 {
            table.enqueue("w1", TaskKind::PeriodicPoll, now);
            table.start_ready(now);
            match table.on_transient_failure("w1", now) {
                RetryDecision::RetryAt { until, delay } => {
                    assert!(delay >= last);
                    assert!(delay <= Duration::from_secs(4));
                    last = delay;
                    now = until;
                    table.release_due(now);
                }
                other => panic!("expected scheduled retry, got {other:?}"),
            }
        }
        assert_eq!(last, Duration::from_secs(4));
    }

    #[test]
    fn attempts_exhaust_into_abandonment() {
        let mut table = FlightTable::new(SyncTunables {
            poll_interval: Duration::from_secs(60),
            concurrency: 4,
            backoff_floor: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
            max_attempts: 2,
        });
        let mut now = Instant::now();

        table.enqueue("w1", TaskKind::PeriodicPoll, now);
        table.start_ready(now);
        match table.on_transient_failure("w1", now) {
            RetryDecision::RetryAt { until, .. } => {
                now = until;
                table.release_due(now);
            }
            other => panic!("expected scheduled retry, got {other:?}"),
        }
        table.start_ready(now);
        assert_eq!(
            table.on_transient_failure("w1", now),
            RetryDecision::Abandoned
        );
        assert_eq!(table.state("w1"), Some(FlightState::Idle));
        assert_eq!(table.in_flight_count(), 0);

        // The next periodic cycle starts a fresh task.
        assert!(table.enqueue("w1", TaskKind::PeriodicPoll, now));
    }

    #[test]
    fn user_recheck_cuts_a_backoff_short() {
        let mut table = table(4);
        let now = Instant::now();
        table.enqueue("w1", TaskKind::PeriodicPoll, now);
        table.start_ready(now);
        table.on_transient_failure("w1", now);
        assert!(matches!(
            table.state("w1"),
            Some(FlightState::Backoff { .. })
        ));

        assert!(!table.enqueue("w1", TaskKind::PeriodicPoll, now));
        assert!(table.enqueue("w1", TaskKind::UserRecheck, now));
        let started = table.start_ready(now);
        assert_eq!(started[0].kind, TaskKind::UserRecheck);
    }

    #[test]
    fn pending_rerun_survives_a_transient_failure() {
        let mut table = table(4);
        let now = Instant::now();
        table.enqueue("w1", TaskKind::PeriodicPoll, now);
        table.start_ready(now);
        table.enqueue("w1", TaskKind::UserRecheck, now);

        assert_eq!(
            table.on_transient_failure("w1", now),
            RetryDecision::RerunNow
        );
        let started = table.start_ready(now);
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].kind, TaskKind::UserRecheck);
    }

    #[test]
    fn removed_watch_loses_all_scheduling_state() {
        let mut table = table(1);
        let now = Instant::now();
        table.enqueue("w1", TaskKind::PeriodicPoll, now);
        table.enqueue("w2", TaskKind::PeriodicPoll, now);
        table.start_ready(now);

        table.on_removed("w1");
        assert_eq!(table.in_flight_count(), 0);
        assert_eq!(table.state("w1"), None);

        table.on_removed("w2");
        assert_eq!(table.queued_count(), 0);
        assert_eq!(table.start_ready(now).len(), 0);
    }

    #[test]
    fn backoff_deadline_tracks_the_earliest_window() {
        let mut table = table(4);
        let now = Instant::now();
        assert_eq!(table.next_backoff_deadline(), None);

        table.enqueue("w1", TaskKind::PeriodicPoll, now);
        table.enqueue("w2", TaskKind::PeriodicPoll, now);
        table.start_ready(now);
        table.on_transient_failure("w1", now);
        // Second failure for w2 lands later, with the same floor delay.
        let later = now + Duration::from_millis(500);
        table.on_transient_failure("w2", later);

        assert_eq!(
            table.next_backoff_deadline(),
            Some(now + Duration::from_secs(1))
        );
    }
}
