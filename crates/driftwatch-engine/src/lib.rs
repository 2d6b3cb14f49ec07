//! Synchronization core: the watch store, the sync scheduler, the diff
//! cache, and the command surface the terminal UI drives them through.

pub mod diff_cache;
pub mod dispatcher;
pub mod scheduler;
pub mod store;

pub use diff_cache::{DiffCache, DiffKey};
pub use dispatcher::{CommandDispatcher, EngineCommand, EngineEvent, COMMAND_QUEUE_CAPACITY};
pub use scheduler::{
    FlightState, FlightTable, RetryDecision, SyncEngine, SyncTask, SyncTunables, TaskKind,
    DEFAULT_BACKOFF_CAP, DEFAULT_BACKOFF_FLOOR, DEFAULT_CONCURRENCY, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_POLL_INTERVAL,
};
pub use store::{ApplyDisposition, CheckOutcome, StoreEvent, WatchStore};
