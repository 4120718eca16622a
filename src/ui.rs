/// Glyphs and line formatting shared between the TUI and plain-stdout modes.
use crate::live::ConnectionState;
use crate::task::{Suggestion, Task};

// ── Glyphs ────────────────────────────────────────────────────────────────────

pub fn done_glyph(done: bool) -> &'static str {
    if done { "✓" } else { "○" }
}

pub fn connection_glyph(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Connecting => "◌",
        ConnectionState::Open       => "●",
        ConnectionState::Closed     => "○",
    }
}

pub fn connection_label(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Connecting => "connecting",
        ConnectionState::Open       => "live",
        ConnectionState::Closed     => "offline",
    }
}

// ── Plain-text lines ──────────────────────────────────────────────────────────

/// `✓ Buy milk  for breakfast  [1]`
pub fn task_line(task: &Task) -> String {
    let mut line = format!("{} {}", done_glyph(task.done), task.title);
    if !task.description.is_empty() {
        line.push_str("  ");
        line.push_str(&task.description);
    }
    line.push_str(&format!("  [{}]", task.id));
    line
}

/// `Buy milk · for breakfast`, or just the title.
pub fn suggestion_line(suggestion: &Suggestion) -> String {
    match &suggestion.description {
        Some(desc) if !desc.is_empty() => format!("{} · {}", suggestion.title, desc),
        _ => suggestion.title.clone(),
    }
}

pub fn count_label(n: usize) -> String {
    format!("{n} task{}", if n == 1 { "" } else { "s" })
}
