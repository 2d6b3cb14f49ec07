use chrono::{DateTime, Utc};
use crossterm::event::{KeyCode, KeyEvent};
use driftwatch_core::{Watch, WatchStatus};
use driftwatch_engine::{CommandDispatcher, EngineEvent, StoreEvent};
use ratatui::widgets::TableState;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum View {
    #[default]
    List,
    Diff,
}

/// The diff currently (or about to be) displayed.
pub struct DiffPane {
    pub watch_id: String,
    pub title: String,
    pub from: String,
    pub to: String,
    pub text: Option<Arc<str>>,
    pub error: Option<String>,
    pub scroll: u16,
}

/// Render-side mirror of the watch store, fed by subscription events.
/// The store inside the engine stays the single authority; this only
/// caches what the last events carried.
pub struct App {
    pub watches: BTreeMap<String, Watch>,
    pub table_state: TableState,
    pub view: View,
    pub diff: Option<DiffPane>,
    pub show_help: bool,
    pub auth_halt: Option<String>,
    pub status_note: Option<String>,
    pub server_url: String,
    pub poll_interval: Duration,
    pub should_quit: bool,
    dispatcher: CommandDispatcher,
}

impl App {
    pub fn new(dispatcher: CommandDispatcher, server_url: String, poll_interval: Duration) -> Self {
        let mut table_state = TableState::default();
        table_state.select(Some(0));
        Self {
            watches: BTreeMap::new(),
            table_state,
            view: View::List,
            diff: None,
            show_help: false,
            auth_halt: None,
            status_note: None,
            server_url,
            poll_interval,
            should_quit: false,
            dispatcher,
        }
    }

    pub fn rows(&self) -> Vec<&Watch> {
        self.watches.values().collect()
    }

    pub fn selected_watch(&self) -> Option<&Watch> {
        let index = self.table_state.selected()?;
        self.rows().get(index).copied()
    }

    pub fn apply_store_event(&mut self, event: StoreEvent) {
        match event {
            StoreEvent::Updated { watch } => {
                self.watches.insert(watch.id.clone(), watch);
            }
            StoreEvent::Removed { id } => {
                self.watches.remove(&id);
                if self
                    .diff
                    .as_ref()
                    .is_some_and(|pane| pane.watch_id == id)
                {
                    self.diff = None;
                    self.view = View::List;
                    self.status_note = Some("watch disappeared remotely".to_string());
                }
            }
        }
        self.clamp_selection();
    }

    pub fn apply_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::AuthHalted { message } => {
                self.auth_halt = Some(message);
            }
            EngineEvent::DiffReady { id, from, to, text } => {
                if let Some(pane) = self.diff.as_mut() {
                    if pane.watch_id == id && pane.from == from && pane.to == to {
                        pane.text = Some(text);
                        pane.error = None;
                    }
                }
            }
            EngineEvent::DiffFailed { id, message } => {
                if let Some(pane) = self.diff.as_mut() {
                    if pane.watch_id == id {
                        pane.error = Some(message);
                    }
                }
            }
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        if self.show_help {
            match key.code {
                KeyCode::Char('?') | KeyCode::Char('q') | KeyCode::Esc => self.show_help = false,
                _ => {}
            }
            return;
        }
        match self.view {
            View::List => self.handle_list_key(key),
            View::Diff => self.handle_diff_key(key),
        }
    }

    fn handle_list_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('j') | KeyCode::Down => self.select_next(),
            KeyCode::Char('k') | KeyCode::Up => self.select_previous(),
            KeyCode::Char('g') | KeyCode::Home => self.select_first(),
            KeyCode::Char('G') | KeyCode::End => self.select_last(),
            KeyCode::Char('r') => self.recheck_selected(),
            KeyCode::Char('R') => {
                self.dispatcher.refresh_all();
                self.status_note = Some("refreshing watch list".to_string());
            }
            KeyCode::Char('d') | KeyCode::Enter => self.open_diff_for_selected(),
            KeyCode::Char('a') => self.acknowledge_auth(),
            KeyCode::Char('?') => self.show_help = true,
            _ => {}
        }
    }

    fn handle_diff_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.diff = None;
                self.view = View::List;
            }
            KeyCode::Char('j') | KeyCode::Down => self.scroll_diff(1),
            KeyCode::Char('k') | KeyCode::Up => self.scroll_diff(-1),
            KeyCode::PageDown => self.scroll_diff(20),
            KeyCode::PageUp => self.scroll_diff(-20),
            KeyCode::Char('g') | KeyCode::Home => {
                if let Some(pane) = self.diff.as_mut() {
                    pane.scroll = 0;
                }
            }
            KeyCode::Char('?') => self.show_help = true,
            _ => {}
        }
    }

    fn recheck_selected(&mut self) {
        let Some((id, title)) = self
            .selected_watch()
            .map(|watch| (watch.id.clone(), watch.title.clone()))
        else {
            return;
        };
        self.dispatcher.trigger_recheck(&id);
        self.status_note = Some(format!("recheck requested for {title}"));
    }

    fn open_diff_for_selected(&mut self) {
        let Some(watch) = self.selected_watch() else {
            return;
        };
        let (id, title) = (watch.id.clone(), watch.title.clone());
        match watch.default_diff_pair() {
            Some((from, to)) => {
                self.dispatcher.open_diff(&id, &from, &to);
                self.diff = Some(DiffPane {
                    watch_id: id,
                    title,
                    from,
                    to,
                    text: None,
                    error: None,
                    scroll: 0,
                });
                self.view = View::Diff;
            }
            None => {
                self.status_note = Some(format!("{title}: need two snapshots to diff"));
            }
        }
    }

    fn acknowledge_auth(&mut self) {
        if self.auth_halt.take().is_some() {
            self.dispatcher.acknowledge_auth();
            self.status_note = Some("polling resumed".to_string());
        }
    }

    fn scroll_diff(&mut self, delta: i32) {
        if let Some(pane) = self.diff.as_mut() {
            let scroll = i32::from(pane.scroll) + delta;
            pane.scroll = scroll.clamp(0, u16::MAX.into()) as u16;
        }
    }

    fn select_next(&mut self) {
        let len = self.watches.len();
        if len == 0 {
            return;
        }
        let next = self
            .table_state
            .selected()
            .map_or(0, |i| (i + 1).min(len - 1));
        self.table_state.select(Some(next));
    }

    fn select_previous(&mut self) {
        if self.watches.is_empty() {
            return;
        }
        let previous = self.table_state.selected().map_or(0, |i| i.saturating_sub(1));
        self.table_state.select(Some(previous));
    }

    fn select_first(&mut self) {
        if !self.watches.is_empty() {
            self.table_state.select(Some(0));
        }
    }

    fn select_last(&mut self) {
        let len = self.watches.len();
        if len > 0 {
            self.table_state.select(Some(len - 1));
        }
    }

    fn clamp_selection(&mut self) {
        let len = self.watches.len();
        if len == 0 {
            self.table_state.select(Some(0));
            return;
        }
        let selected = self.table_state.selected().unwrap_or(0);
        if selected >= len {
            self.table_state.select(Some(len - 1));
        }
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for watch in self.watches.values() {
            counts.total += 1;
            match watch.status {
                WatchStatus::Changed => counts.changed += 1,
                WatchStatus::Error => counts.errors += 1,
                WatchStatus::Checking => counts.checking += 1,
                _ => {}
            }
        }
        counts
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatusCounts {
    pub total: usize,
    pub changed: usize,
    pub errors: usize,
    pub checking: usize,
}

/// Coalesces bursts of change events into bounded-rate redraws: the
/// terminal never repaints more than once per frame window no matter how
/// many events arrive.
pub struct FrameGate {
    interval: Duration,
    last_draw: Option<Instant>,
    dirty: bool,
}

impl FrameGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_draw: None,
            dirty: true,
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// True at most once per window, and only while dirty.
    pub fn take_if_due(&mut self, now: Instant) -> bool {
        if !self.dirty {
            return false;
        }
        if let Some(last) = self.last_draw {
            if now.duration_since(last) < self.interval {
                return false;
            }
        }
        self.dirty = false;
        self.last_draw = Some(now);
        true
    }
}

/// Human-readable relative time, in the same buckets the service web UI
/// uses.
pub fn format_relative(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - then).num_seconds().max(0);
    if seconds < 60 {
        return "just now".to_string();
    }
    let (amount, unit) = if seconds < 3_600 {
        (seconds / 60, "minute")
    } else if seconds < 86_400 {
        (seconds / 3_600, "hour")
    } else if seconds < 604_800 {
        (seconds / 86_400, "day")
    } else if seconds < 2_592_000 {
        (seconds / 604_800, "week")
    } else {
        (seconds / 2_592_000, "month")
    };
    let plural = if amount == 1 { "" } else { "s" };
    format!("{amount} {unit}{plural} ago")
}

pub fn format_relative_opt(then: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match then {
        Some(then) => format_relative(then, now),
        None => "never".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use driftwatch_engine::EngineCommand;
    use tokio::sync::mpsc;

    fn test_app() -> (App, mpsc::Receiver<EngineCommand>) {
        let (tx, rx) = mpsc::channel(8);
        let app = App::new(
            CommandDispatcher::new(tx),
            "https://cd.example.com".to_string(),
            Duration::from_secs(300),
        );
        (app, rx)
    }

    fn watch(id: &str, status: WatchStatus) -> Watch {
        Watch {
            id: id.to_string(),
            url: format!("https://example.com/{id}"),
            title: id.to_string(),
            status,
            last_checked_at: None,
            last_changed_at: None,
            revision: 1,
            error_message: None,
            history: Vec::new(),
            last_viewed: None,
            tags: Vec::new(),
        }
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::from(code)
    }

    #[test]
    fn store_events_keep_the_mirror_and_selection_consistent() {
        let (mut app, _rx) = test_app();
        for id in ["w1", "w2", "w3"] {
            app.apply_store_event(StoreEvent::Updated {
                watch: watch(id, WatchStatus::Unchanged),
            });
        }
        app.handle_key(key(KeyCode::Char('G')));
        assert_eq!(app.table_state.selected(), Some(2));

        app.apply_store_event(StoreEvent::Removed {
            id: "w3".to_string(),
        });
        assert_eq!(app.watches.len(), 2);
        assert_eq!(app.table_state.selected(), Some(1));
    }

    #[test]
    fn recheck_key_dispatches_for_the_selected_watch() {
        let (mut app, mut rx) = test_app();
        app.apply_store_event(StoreEvent::Updated {
            watch: watch("w1", WatchStatus::Unchanged),
        });
        app.apply_store_event(StoreEvent::Updated {
            watch: watch("w2", WatchStatus::Unchanged),
        });
        app.handle_key(key(KeyCode::Char('j')));
        app.handle_key(key(KeyCode::Char('r')));

        assert_eq!(
            rx.try_recv().expect("command queued"),
            EngineCommand::Recheck {
                id: "w2".to_string()
            }
        );
        assert!(app
            .status_note
            .as_deref()
            .is_some_and(|note| note.contains("w2")));
    }

    #[test]
    fn diff_opens_only_with_enough_history() {
        let (mut app, mut rx) = test_app();
        let mut bare = watch("w1", WatchStatus::Changed);
        bare.history = vec![driftwatch_core::Snapshot {
            version_id: "v1".to_string(),
            timestamp: 100,
        }];
        app.apply_store_event(StoreEvent::Updated { watch: bare });

        app.handle_key(key(KeyCode::Char('d')));
        assert_eq!(app.view, View::List);
        assert!(rx.try_recv().is_err());

        let mut ready = watch("w1", WatchStatus::Changed);
        ready.history = vec![
            driftwatch_core::Snapshot {
                version_id: "v1".to_string(),
                timestamp: 100,
            },
            driftwatch_core::Snapshot {
                version_id: "v2".to_string(),
                timestamp: 200,
            },
        ];
        app.apply_store_event(StoreEvent::Updated { watch: ready });
        app.handle_key(key(KeyCode::Char('d')));

        assert_eq!(app.view, View::Diff);
        assert_eq!(
            rx.try_recv().expect("command queued"),
            EngineCommand::OpenDiff {
                id: "w1".to_string(),
                from: "v1".to_string(),
                to: "v2".to_string(),
            }
        );
    }

    #[test]
    fn diff_results_land_only_on_the_matching_pane() {
        let (mut app, _rx) = test_app();
        app.diff = Some(DiffPane {
            watch_id: "w1".to_string(),
            title: "w1".to_string(),
            from: "v1".to_string(),
            to: "v2".to_string(),
            text: None,
            error: None,
            scroll: 0,
        });
        app.view = View::Diff;

        app.apply_engine_event(EngineEvent::DiffReady {
            id: "w9".to_string(),
            from: "v1".to_string(),
            to: "v2".to_string(),
            text: Arc::from("other"),
        });
        assert!(app.diff.as_ref().expect("pane").text.is_none());

        app.apply_engine_event(EngineEvent::DiffReady {
            id: "w1".to_string(),
            from: "v1".to_string(),
            to: "v2".to_string(),
            text: Arc::from("payload"),
        });
        assert_eq!(
            app.diff.as_ref().expect("pane").text.as_deref(),
            Some("payload")
        );
    }

    #[test]
    fn auth_acknowledgement_clears_the_banner_and_notifies_the_engine() {
        let (mut app, mut rx) = test_app();
        app.apply_engine_event(EngineEvent::AuthHalted {
            message: "key revoked".to_string(),
        });
        assert!(app.auth_halt.is_some());

        app.handle_key(key(KeyCode::Char('a')));
        assert!(app.auth_halt.is_none());
        assert_eq!(
            rx.try_recv().expect("command queued"),
            EngineCommand::AcknowledgeAuth
        );

        // Without a banner the key is inert.
        app.handle_key(key(KeyCode::Char('a')));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn frame_gate_coalesces_bursts_into_one_draw() {
        let mut gate = FrameGate::new(Duration::from_millis(100));
        let start = Instant::now();
        assert!(gate.take_if_due(start), "first draw is immediate");

        for _ in 0..5 {
            gate.mark_dirty();
        }
        assert!(
            !gate.take_if_due(start + Duration::from_millis(10)),
            "still inside the frame window"
        );
        assert!(gate.take_if_due(start + Duration::from_millis(120)));
        assert!(
            !gate.take_if_due(start + Duration::from_millis(130)),
            "no draw without new events"
        );
    }

    #[test]
    fn relative_times_bucket_like_the_service() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).single().expect("ts");
        let at = |secs_ago: i64| {
            Utc.timestamp_opt(1_700_000_000 - secs_ago, 0)
                .single()
                .expect("ts")
        };
        assert_eq!(format_relative(at(30), now), "just now");
        assert_eq!(format_relative(at(90), now), "1 minute ago");
        assert_eq!(format_relative(at(7_200), now), "2 hours ago");
        assert_eq!(format_relative(at(172_800), now), "2 days ago");
        assert_eq!(format_relative(at(1_209_600), now), "2 weeks ago");
        assert_eq!(format_relative(at(5_184_000), now), "2 months ago");
        assert_eq!(format_relative_opt(None, now), "never");
    }
}
