/// Ratatui draw entry-point for taskwire.
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
};
use unicode_width::UnicodeWidthStr;

use super::{AppState, Focus, NoticeKind};
use crate::live::ConnectionState;
use crate::task::Suggestion;
use crate::ui;

pub const SPINNER_GLYPHS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

const BG: Color = Color::Rgb(10, 10, 18);
const DIM: Color = Color::Rgb(70, 70, 90);
const ACCENT: Color = Color::Cyan;

// ── Main draw entry point ─────────────────────────────────────────────────────

pub fn draw(f: &mut Frame, state: &AppState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // header
            Constraint::Min(0),    // content
            Constraint::Length(1), // status bar
            Constraint::Length(1), // key hints
        ])
        .split(f.area());

    draw_header(f, state, rows[0]);

    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(rows[1]);

    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // title
            Constraint::Length(3), // description
            Constraint::Length(3), // query
            Constraint::Min(0),    // suggestions
        ])
        .split(cols[0]);

    draw_input(f, state, left[0], Focus::Title, "Title", &state.draft.title, state.title_cursor);
    draw_input(
        f,
        state,
        left[1],
        Focus::Description,
        "Description",
        &state.draft.description,
        state.description_cursor,
    );
    draw_input(f, state, left[2], Focus::Query, "Ask AI", &state.query, state.query_cursor);
    draw_suggestions(f, state, left[3]);
    draw_tasks(f, state, cols[1]);

    draw_status_bar(f, state, rows[2]);
    draw_hints(f, state, rows[3]);
}

fn border_style(state: &AppState, focus: Focus) -> Style {
    if state.focus == focus {
        Style::default().fg(ACCENT)
    } else {
        Style::default().fg(Color::Rgb(60, 60, 80))
    }
}

// ── Header ────────────────────────────────────────────────────────────────────

fn draw_header(f: &mut Frame, state: &AppState, area: Rect) {
    let line = Line::from(vec![
        Span::styled(" ▲ taskwire", Style::default().fg(Color::White).add_modifier(Modifier::BOLD)),
        Span::styled("  ·  ", Style::default().fg(Color::DarkGray)),
        Span::styled(state.backend_url.clone(), Style::default().fg(Color::Rgb(100, 180, 220))),
        Span::styled("  ·  ", Style::default().fg(Color::DarkGray)),
        Span::styled(
            state.model.clone(),
            Style::default().fg(if state.has_api_key { Color::Rgb(140, 120, 220) } else { DIM }),
        ),
    ]);
    f.render_widget(Paragraph::new(line).style(Style::default().bg(BG)), area);
}

// ── Text inputs ───────────────────────────────────────────────────────────────

fn draw_input(
    f: &mut Frame,
    state: &AppState,
    area: Rect,
    focus: Focus,
    label: &str,
    text: &str,
    cursor: usize,
) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(border_style(state, focus))
        .title(Span::styled(format!(" {label} "), Style::default().fg(Color::Gray)));

    let content = if text.is_empty() && state.focus != focus {
        Span::styled(placeholder(focus), Style::default().fg(DIM))
    } else {
        Span::styled(text.to_string(), Style::default().fg(Color::White))
    };
    f.render_widget(Paragraph::new(Line::from(content)).block(block), area);

    if state.focus == focus {
        let before = &text[..cursor.min(text.len())];
        let cursor_x = area.x + 1 + before.width() as u16;
        if cursor_x < area.x + area.width.saturating_sub(1) {
            f.set_cursor_position((cursor_x, area.y + 1));
        }
    }
}

fn placeholder(focus: Focus) -> &'static str {
    match focus {
        Focus::Title => "what needs doing",
        Focus::Description => "optional details",
        Focus::Query => "topic for AI suggestions",
        Focus::Suggestions | Focus::Tasks => "",
    }
}

// ── AI suggestions ────────────────────────────────────────────────────────────

fn draw_suggestions(f: &mut Frame, state: &AppState, area: Rect) {
    let title = if state.suggesting {
        let g = SPINNER_GLYPHS[(state.spinner_tick as usize) % SPINNER_GLYPHS.len()];
        format!(" Suggestions {g} ")
    } else {
        " Suggestions ".to_string()
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(border_style(state, Focus::Suggestions))
        .title(Span::styled(title, Style::default().fg(Color::Gray)));

    if state.suggestions.is_empty() {
        let hint = if state.has_api_key {
            "type a topic above and press Enter"
        } else {
            "set an AI API key to get suggestions"
        };
        f.render_widget(
            Paragraph::new(Span::styled(hint, Style::default().fg(DIM)))
                .block(block)
                .wrap(Wrap { trim: true }),
            area,
        );
        return;
    }

    let items: Vec<ListItem> = state
        .suggestions
        .iter()
        .map(|raw| {
            let s = Suggestion::parse(raw);
            let mut spans = vec![Span::styled(s.title, Style::default().fg(Color::White))];
            if let Some(desc) = s.description.filter(|d| !d.is_empty()) {
                spans.push(Span::styled(format!("  {desc}"), Style::default().fg(Color::DarkGray)));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();

    let mut list_state = ListState::default();
    if state.focus == Focus::Suggestions {
        list_state.select(Some(state.suggestion_selected));
    }
    let list = List::new(items)
        .block(block)
        .highlight_symbol("❯ ")
        .highlight_style(Style::default().bg(Color::Rgb(30, 30, 50)).add_modifier(Modifier::BOLD));
    f.render_stateful_widget(list, area, &mut list_state);
}

// ── Task list ─────────────────────────────────────────────────────────────────

fn draw_tasks(f: &mut Frame, state: &AppState, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(border_style(state, Focus::Tasks))
        .title(Span::styled(
            format!(" Tasks ({}) ", state.tasks.len()),
            Style::default().fg(Color::Gray),
        ));

    if state.tasks.is_empty() {
        let msg = if state.refreshing { "loading…" } else { "no tasks yet" };
        f.render_widget(Paragraph::new(Span::styled(msg, Style::default().fg(DIM))).block(block), area);
        return;
    }

    let items: Vec<ListItem> = state
        .tasks
        .iter()
        .map(|task| {
            let (glyph_color, title_style) = if task.done {
                (Color::Green, Style::default().fg(Color::DarkGray).add_modifier(Modifier::CROSSED_OUT))
            } else {
                (Color::Rgb(100, 100, 130), Style::default().fg(Color::White))
            };
            let mut spans = vec![
                Span::styled(format!("{} ", ui::done_glyph(task.done)), Style::default().fg(glyph_color)),
                Span::styled(task.title.clone(), title_style),
            ];
            if !task.description.is_empty() {
                spans.push(Span::styled(
                    format!("  {}", task.description),
                    Style::default().fg(Color::DarkGray),
                ));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();

    let mut list_state = ListState::default();
    list_state.select(Some(state.task_selected));
    let highlight = if state.focus == Focus::Tasks {
        Style::default().bg(Color::Rgb(30, 30, 50)).add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    };
    let list = List::new(items)
        .block(block)
        .highlight_symbol(if state.focus == Focus::Tasks { "❯ " } else { "  " })
        .highlight_style(highlight);
    f.render_stateful_widget(list, area, &mut list_state);
}

// ── Status bar ────────────────────────────────────────────────────────────────

fn draw_status_bar(f: &mut Frame, state: &AppState, area: Rect) {
    let conn_color = match state.connection {
        ConnectionState::Open => Color::Green,
        ConnectionState::Connecting => Color::Yellow,
        ConnectionState::Closed if state.live_enabled => Color::Red,
        ConnectionState::Closed => Color::DarkGray,
    };
    let conn_label = if state.live_enabled {
        ui::connection_label(state.connection)
    } else {
        "live off"
    };

    let mut spans = vec![
        Span::raw(" "),
        Span::styled(
            ui::connection_glyph(state.connection),
            Style::default().fg(conn_color).add_modifier(Modifier::BOLD),
        ),
        Span::styled(format!(" {conn_label}"), Style::default().fg(conn_color)),
        Span::styled("  ·  ", Style::default().fg(Color::DarkGray)),
        Span::styled(ui::count_label(state.tasks.len()), Style::default().fg(Color::Gray)),
    ];

    if state.busy() {
        let g = SPINNER_GLYPHS[(state.spinner_tick as usize) % SPINNER_GLYPHS.len()];
        spans.push(Span::styled(format!("  {g}"), Style::default().fg(ACCENT)));
    }

    if let Some(notice) = &state.notice {
        let (glyph, color) = match notice.kind {
            NoticeKind::Info => ("✓", Color::Rgb(0, 180, 80)),
            NoticeKind::Error => ("✗", Color::Rgb(220, 80, 80)),
        };
        spans.push(Span::styled("  ·  ", Style::default().fg(Color::DarkGray)));
        spans.push(Span::styled(
            format!("{} ", notice.at.format("%H:%M:%S")),
            Style::default().fg(Color::DarkGray),
        ));
        spans.push(Span::styled(format!("{glyph} {}", notice.text), Style::default().fg(color)));
    }

    f.render_widget(Paragraph::new(Line::from(spans)).style(Style::default().bg(BG)), area);
}

// ── Key hints ─────────────────────────────────────────────────────────────────

fn draw_hints(f: &mut Frame, state: &AppState, area: Rect) {
    let hint = match state.focus {
        Focus::Title | Focus::Description => "Enter add task  ·  Tab next field  ·  Ctrl+R refresh  ·  Esc quit",
        Focus::Query => "Enter ask AI  ·  Tab next field  ·  Ctrl+R refresh  ·  Esc quit",
        Focus::Suggestions => "↑↓ select  ·  Enter use suggestion  ·  Tab next  ·  Esc quit",
        Focus::Tasks => "↑↓ select  ·  d done/undo  ·  x delete  ·  r refresh  ·  Tab next  ·  Esc quit",
    };
    f.render_widget(
        Paragraph::new(Span::styled(format!(" {hint}"), Style::default().fg(Color::Rgb(55, 50, 90)))),
        area,
    );
}
