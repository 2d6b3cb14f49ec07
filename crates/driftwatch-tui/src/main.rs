mod config;
mod state;
mod theme;
mod ui;

use anyhow::{anyhow, Result};
use clap::Parser;
use config::{Overrides, Settings};
use crossterm::{
    event::{Event, EventStream, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use driftwatch_api::{ApiClient, ClientConfig};
use driftwatch_core::WatchApi;
use driftwatch_engine::{EngineEvent, StoreEvent, SyncEngine};
use futures_util::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use state::{App, FrameGate};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "driftwatch",
    about = "Terminal dashboard for a change-detection service",
    version
)]
struct Args {
    /// Path to the TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Base URL of the change-detection service API.
    #[arg(long)]
    url: Option<String>,
    /// API key, or $VAR to read it from the environment.
    #[arg(long)]
    api_key: Option<String>,
    /// Seconds between periodic polls.
    #[arg(long)]
    poll_interval: Option<u64>,
    /// Maximum concurrent fetches.
    #[arg(long)]
    concurrency: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    let settings = Settings::load(
        args.config.clone(),
        Overrides {
            url: args.url.clone(),
            api_key: args.api_key.clone(),
            poll_interval_secs: args.poll_interval,
            concurrency: args.concurrency,
        },
    )?;

    let client = ApiClient::new(ClientConfig {
        base_url: settings.server_url.clone(),
        api_key: settings.api_key.clone(),
        timeout: settings.request_timeout,
    })
    .map_err(|err| anyhow!("invalid client configuration: {err}"))?;
    let api: Arc<dyn WatchApi> = Arc::new(client);

    // Startup probe: an unreachable service or rejected credentials abort
    // with a message on stderr instead of an empty dashboard.
    let initial = api
        .list_watches()
        .await
        .map_err(|err| anyhow!("cannot reach {} at startup: {err}", settings.server_url))?;
    info!("startup listing: {} watches", initial.len());

    let (mut engine, dispatcher, engine_rx) = SyncEngine::new(
        api,
        settings.tunables.clone(),
        settings.diff_budget_bytes,
    );
    let store_rx = engine.subscribe_store();
    engine.seed(initial);
    tokio::spawn(engine.run());

    let app = App::new(
        dispatcher,
        settings.server_url.clone(),
        settings.tunables.poll_interval,
    );

    let mut terminal = setup_terminal()?;
    let result = run_app(
        &mut terminal,
        app,
        store_rx,
        engine_rx,
        settings.frame_interval,
    )
    .await;
    restore_terminal(&mut terminal)?;
    result
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    mut app: App,
    mut store_rx: mpsc::UnboundedReceiver<StoreEvent>,
    mut engine_rx: mpsc::UnboundedReceiver<EngineEvent>,
    frame_interval: Duration,
) -> Result<()> {
    let mut events = EventStream::new();
    let mut gate = FrameGate::new(frame_interval);
    let mut frame_ticker = tokio::time::interval(frame_interval);
    frame_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if gate.take_if_due(Instant::now()) {
            terminal.draw(|frame| ui::render(frame, &mut app))?;
        }
        if app.should_quit {
            break;
        }
        tokio::select! {
            _ = frame_ticker.tick() => {}
            Some(event) = store_rx.recv() => {
                app.apply_store_event(event);
                gate.mark_dirty();
            }
            Some(event) = engine_rx.recv() => {
                app.apply_engine_event(event);
                gate.mark_dirty();
            }
            maybe_event = events.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key))) => {
                        if matches!(key.kind, KeyEventKind::Press | KeyEventKind::Repeat) {
                            app.handle_key(key);
                            gate.mark_dirty();
                        }
                    }
                    Some(Ok(Event::Resize(_, _))) => {
                        gate.mark_dirty();
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Err(err.into()),
                    None => break,
                }
            }
        }
    }
    Ok(())
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_enabled = matches!(
        std::env::var("DRIFTWATCH_LOG_STDOUT").ok().as_deref(),
        Some("1") | Some("true") | Some("TRUE") | Some("yes") | Some("YES")
    );
    // The terminal owns stdout; logs are discarded unless explicitly
    // routed there (e.g. when piping to a file for debugging).
    if stdout_enabled {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::sink)
            .try_init();
    }
}
