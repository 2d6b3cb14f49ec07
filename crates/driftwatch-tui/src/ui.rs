use crate::state::{format_relative_opt, App, View};
use crate::theme;
use chrono::Utc;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table},
    Frame,
};

pub fn render(f: &mut Frame, app: &mut App) {
    let area = f.size();
    let mut constraints = vec![Constraint::Length(3)];
    if app.auth_halt.is_some() {
        constraints.push(Constraint::Length(3));
    }
    constraints.push(Constraint::Min(0));
    constraints.push(Constraint::Length(1));
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(area);

    let mut next = 0;
    render_header(f, app, layout[next]);
    next += 1;
    if app.auth_halt.is_some() {
        render_auth_banner(f, app, layout[next]);
        next += 1;
    }
    match app.view {
        View::List => render_watch_table(f, app, layout[next]),
        View::Diff => render_diff(f, app, layout[next]),
    }
    next += 1;
    render_status_line(f, app, layout[next]);

    if app.show_help {
        render_help_overlay(f, area);
    }
}

fn render_header(f: &mut Frame, app: &App, area: Rect) {
    let counts = app.counts();
    let line = format!(
        "{} watches  |  {} changed  {} checking  {} errors  |  polling every {}s",
        counts.total,
        counts.changed,
        counts.checking,
        counts.errors,
        app.poll_interval.as_secs()
    );
    let paragraph = Paragraph::new(Line::from(Span::styled(
        line,
        Style::default().add_modifier(Modifier::BOLD),
    )))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(Span::styled(
                format!("driftwatch - {}", app.server_url),
                theme::HEADER_STYLE,
            )),
    );
    f.render_widget(paragraph, area);
}

fn render_auth_banner(f: &mut Frame, app: &App, area: Rect) {
    let message = app.auth_halt.as_deref().unwrap_or_default();
    let paragraph = Paragraph::new(format!(
        "polling suspended: {message}  (press 'a' to acknowledge and resume)"
    ))
    .style(theme::BANNER_STYLE)
    .block(Block::default().borders(Borders::ALL).title("Auth"));
    f.render_widget(paragraph, area);
}

fn render_watch_table(f: &mut Frame, app: &mut App, area: Rect) {
    let now = Utc::now();
    let header = Row::new(vec!["", "Title", "Checked", "Changed", "Info"])
        .style(theme::HEADER_STYLE)
        .height(1);
    let rows: Vec<Row> = app
        .rows()
        .iter()
        .enumerate()
        .map(|(index, watch)| {
            let info = match (&watch.error_message, watch.tags.is_empty()) {
                (Some(message), _) => message.clone(),
                (None, false) => watch.tags.join(", "),
                (None, true) => watch.url.clone(),
            };
            Row::new(vec![
                Cell::from(Span::styled(
                    theme::status_icon(watch.status),
                    Style::default().fg(theme::status_color(watch.status)),
                )),
                Cell::from(watch.title.clone()),
                Cell::from(format_relative_opt(watch.last_checked_at, now)),
                Cell::from(format_relative_opt(watch.last_changed_at, now)),
                Cell::from(Span::styled(info, theme::MUTED_STYLE)),
            ])
            .style(theme::zebra_row_style(index))
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(2),
            Constraint::Percentage(30),
            Constraint::Length(16),
            Constraint::Length(16),
            Constraint::Min(10),
        ],
    )
    .header(header)
    .highlight_style(theme::SELECTED_STYLE)
    .block(Block::default().borders(Borders::ALL).title("Watches"));
    f.render_stateful_widget(table, area, &mut app.table_state);
}

fn render_diff(f: &mut Frame, app: &App, area: Rect) {
    let Some(pane) = app.diff.as_ref() else {
        return;
    };
    let title = format!("Diff {} ({} -> {})", pane.title, pane.from, pane.to);
    let lines: Vec<Line> = if let Some(error) = pane.error.as_deref() {
        vec![Line::from(Span::styled(
            format!("diff unavailable: {error}"),
            Style::default().fg(theme::status_color(driftwatch_core::WatchStatus::Error)),
        ))]
    } else if let Some(text) = pane.text.as_deref() {
        text.lines().map(style_diff_line).collect()
    } else {
        vec![Line::from(Span::styled("fetching diff...", theme::MUTED_STYLE))]
    };
    let paragraph = Paragraph::new(lines)
        .scroll((pane.scroll, 0))
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(paragraph, area);
}

fn style_diff_line(line: &str) -> Line<'static> {
    let owned = line.to_string();
    let style = if line.starts_with('+') {
        theme::DIFF_ADDED_STYLE
    } else if line.starts_with('-') {
        theme::DIFF_REMOVED_STYLE
    } else if line.starts_with('@') {
        theme::DIFF_HUNK_STYLE
    } else {
        Style::default()
    };
    Line::from(Span::styled(owned, style))
}

fn render_status_line(f: &mut Frame, app: &App, area: Rect) {
    let (text, style) = match app.status_note.as_deref() {
        Some(note) => (note.to_string(), theme::NOTE_STYLE),
        None => (
            "j/k move  r recheck  R refresh  d diff  a ack  ? help  q quit".to_string(),
            theme::MUTED_STYLE,
        ),
    };
    f.render_widget(Paragraph::new(Line::from(Span::styled(text, style))), area);
}

fn render_help_overlay(f: &mut Frame, area: Rect) {
    let popup = centered_rect(50, 60, area);
    f.render_widget(Clear, popup);
    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled("Help", theme::HEADER_STYLE));
    let entries = [
        ("j / Down", "next watch"),
        ("k / Up", "previous watch"),
        ("g / G", "first / last watch"),
        ("r", "recheck selected watch"),
        ("R", "refresh the whole list"),
        ("d / Enter", "open diff for selected watch"),
        ("a", "acknowledge auth failure, resume polling"),
        ("q / Esc", "back / quit"),
        ("?", "toggle this help"),
    ];
    let mut lines = vec![
        Line::from(Span::styled(
            "Keyboard Shortcuts",
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
    ];
    for (keys, action) in entries {
        lines.push(Line::from(vec![
            Span::styled(format!("{keys:<12}"), theme::NOTE_STYLE),
            Span::raw(action),
        ]));
    }
    f.render_widget(Paragraph::new(lines).block(block), popup);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}
