use driftwatch_core::WatchStatus;
use ratatui::style::{Color, Modifier, Style};

pub const HEADER_STYLE: Style = Style::new()
    .fg(Color::Rgb(142, 192, 124))
    .add_modifier(Modifier::BOLD);
pub const SELECTED_STYLE: Style = Style::new()
    .bg(Color::Rgb(131, 165, 152))
    .fg(Color::Black)
    .add_modifier(Modifier::BOLD);
pub const MUTED_STYLE: Style = Style::new().fg(Color::Rgb(146, 131, 116));
pub const NOTE_STYLE: Style = Style::new().fg(Color::Rgb(250, 189, 47));
pub const BANNER_STYLE: Style = Style::new()
    .fg(Color::Black)
    .bg(Color::Rgb(254, 128, 25))
    .add_modifier(Modifier::BOLD);
pub const DIFF_ADDED_STYLE: Style = Style::new().fg(Color::Rgb(184, 187, 38));
pub const DIFF_REMOVED_STYLE: Style = Style::new().fg(Color::Rgb(251, 73, 52));
pub const DIFF_HUNK_STYLE: Style = Style::new().fg(Color::Rgb(131, 165, 152));

pub fn zebra_row_style(index: usize) -> Style {
    let bg = if index % 2 == 0 {
        Color::Rgb(18, 20, 26)
    } else {
        Color::Rgb(24, 27, 34)
    };
    Style::new().bg(bg)
}

pub mod icons {
    pub const UNCHECKED: &str = ".";
    pub const CHECKING: &str = ">";
    pub const UNCHANGED: &str = "=";
    pub const CHANGED: &str = "*";
    pub const ERROR: &str = "!";
}

pub fn status_icon(status: WatchStatus) -> &'static str {
    match status {
        WatchStatus::Unchecked => icons::UNCHECKED,
        WatchStatus::Checking => icons::CHECKING,
        WatchStatus::Unchanged => icons::UNCHANGED,
        WatchStatus::Changed => icons::CHANGED,
        WatchStatus::Error => icons::ERROR,
    }
}

pub fn status_color(status: WatchStatus) -> Color {
    match status {
        WatchStatus::Unchecked => Color::Rgb(146, 131, 116),
        WatchStatus::Checking => Color::Rgb(131, 165, 152),
        WatchStatus::Unchanged => Color::Rgb(104, 157, 106),
        WatchStatus::Changed => Color::Rgb(250, 189, 47),
        WatchStatus::Error => Color::Rgb(254, 128, 25),
    }
}
