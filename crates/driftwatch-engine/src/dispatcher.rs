//! User actions translated into engine commands.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

pub const COMMAND_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    RefreshAll,
    Recheck { id: String },
    OpenDiff { id: String, from: String, to: String },
    AcknowledgeAuth,
}

/// Out-of-band engine notifications for the presentation layer. Per-watch
/// state flows through the store subscription instead.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The remote rejected our credentials; periodic polling is suspended
    /// until acknowledged.
    AuthHalted { message: String },
    DiffReady {
        id: String,
        from: String,
        to: String,
        text: Arc<str>,
    },
    DiffFailed { id: String, message: String },
}

/// Clonable handle feeding the engine's bounded command queue.
#[derive(Clone)]
pub struct CommandDispatcher {
    tx: mpsc::Sender<EngineCommand>,
}

impl CommandDispatcher {
    pub fn new(tx: mpsc::Sender<EngineCommand>) -> Self {
        Self { tx }
    }

    pub fn refresh_all(&self) {
        self.send(EngineCommand::RefreshAll);
    }

    pub fn trigger_recheck(&self, id: &str) {
        self.send(EngineCommand::Recheck { id: id.to_string() });
    }

    pub fn open_diff(&self, id: &str, from: &str, to: &str) {
        self.send(EngineCommand::OpenDiff {
            id: id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        });
    }

    pub fn acknowledge_auth(&self) {
        self.send(EngineCommand::AcknowledgeAuth);
    }

    fn send(&self, command: EngineCommand) {
        if let Err(err) = self.tx.try_send(command) {
            warn!("engine command dropped: {err}");
        }
    }
}
