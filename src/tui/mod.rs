/// Ratatui-based TUI for taskwire.
///
/// Architecture:
///   main thread:  event loop over crossterm keys, UiEvents, store and
///                 connection-state changes, spinner tick
///   net tasks:    tokio::spawn per request; results come back as UiEvents
///   live task:    push listener; refreshes land in the store, not here
///
/// Layout:
///   ┌──────────────────────────────────────────────────────┐
///   │ header                                               │
///   ├───────────────────────────┬──────────────────────────┤
///   │ new task (title, desc)    │ tasks                    │
///   ├───────────────────────────┤                          │
///   │ AI query + suggestions    │                          │
///   ├───────────────────────────┴──────────────────────────┤
///   │ status bar                                           │
///   │ key hints                                            │
///   └──────────────────────────────────────────────────────┘
pub mod render;

use std::io;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Local};
use crossterm::{
    event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures_util::StreamExt;
use ratatui::{Terminal, backend::CrosstermBackend};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::config::ResolvedConfig;
use crate::error::{SyncError, SyncResult};
use crate::gateway::{RestGateway, TaskGateway};
use crate::live::{self, ConnectionState, WsConnector};
use crate::store::TaskStore;
use crate::suggest::{EMPTY_QUERY_NOTICE, SuggestionClient};
use crate::sync::{Mutation, MutationReport, RefreshOutcome, SyncEngine};
use crate::task::{Draft, Suggestion, Task, TaskUpdate};

// ── UiEvent: network results → TUI ────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum UiEvent {
    /// The draft was sent; `Ok` means the server accepted it
    Created(SyncResult<MutationReport>),
    /// Delete, mark-done or reopen finished
    Mutated { action: MutationKind, result: SyncResult<MutationReport> },
    /// Manual or initial refresh finished
    Refreshed(SyncResult<RefreshOutcome>),
    /// Raw suggestion strings from the AI endpoint
    Suggestions(SyncResult<Vec<String>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Complete,
    Reopen,
    Delete,
}

impl MutationKind {
    fn past_tense(self) -> &'static str {
        match self {
            MutationKind::Complete => "marked done",
            MutationKind::Reopen => "reopened",
            MutationKind::Delete => "deleted",
        }
    }
}

// ── Focus ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Title,
    Description,
    Query,
    Suggestions,
    Tasks,
}

impl Focus {
    const ORDER: [Focus; 5] = [
        Focus::Title,
        Focus::Description,
        Focus::Query,
        Focus::Suggestions,
        Focus::Tasks,
    ];

    fn index(self) -> usize {
        Self::ORDER.iter().position(|f| *f == self).unwrap_or(0)
    }

    pub fn next(self) -> Self {
        Self::ORDER[(self.index() + 1) % Self::ORDER.len()]
    }

    pub fn prev(self) -> Self {
        Self::ORDER[(self.index() + Self::ORDER.len() - 1) % Self::ORDER.len()]
    }
}

// ── Notices ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub text: String,
    pub at: DateTime<Local>,
}

// ── Action: what a key press asks the loop to do ──────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    None,
    Quit,
    Refresh,
    Create(Draft),
    Complete(String),
    Reopen(Task),
    Delete(String),
    Suggest(String),
}

// ── AppState ──────────────────────────────────────────────────────────────────

pub struct AppState {
    /// Last snapshot seen from the store
    pub tasks: Arc<Vec<Task>>,
    pub task_selected: usize,
    pub draft: Draft,
    pub title_cursor: usize,       // byte offset in draft.title
    pub description_cursor: usize, // byte offset in draft.description
    pub query: String,
    pub query_cursor: usize,
    /// Raw suggestion texts, parsed on display and on accept
    pub suggestions: Vec<String>,
    pub suggestion_selected: usize,
    pub focus: Focus,
    pub connection: ConnectionState,
    pub live_enabled: bool,
    pub notice: Option<Notice>,
    pub creating: bool,
    pub suggesting: bool,
    pub refreshing: bool,
    /// Delete / done / reopen calls in flight
    pub pending: usize,
    pub spinner_tick: u32,
    pub backend_url: String,
    pub model: String,
    pub has_api_key: bool,
}

impl AppState {
    pub fn new(backend_url: String, model: String, has_api_key: bool, live_enabled: bool) -> Self {
        Self {
            tasks: Arc::new(Vec::new()),
            task_selected: 0,
            draft: Draft::default(),
            title_cursor: 0,
            description_cursor: 0,
            query: String::new(),
            query_cursor: 0,
            suggestions: Vec::new(),
            suggestion_selected: 0,
            focus: Focus::Title,
            connection: if live_enabled { ConnectionState::Connecting } else { ConnectionState::Closed },
            live_enabled,
            notice: None,
            creating: false,
            suggesting: false,
            refreshing: false,
            pending: 0,
            spinner_tick: 0,
            backend_url,
            model,
            has_api_key,
        }
    }

    pub fn busy(&self) -> bool {
        self.creating || self.suggesting || self.refreshing || self.pending > 0
    }

    fn info(&mut self, text: impl Into<String>) {
        self.notice = Some(Notice { kind: NoticeKind::Info, text: text.into(), at: Local::now() });
    }

    fn error(&mut self, err: &SyncError) {
        debug!(kind = err.kind(), "showing error notice");
        self.notice = Some(Notice { kind: NoticeKind::Error, text: err.to_string(), at: Local::now() });
    }

    pub fn selected_task(&self) -> Option<&Task> {
        self.tasks.get(self.task_selected)
    }

    /// Take a new store snapshot, keeping the selection in range.
    pub fn set_tasks(&mut self, tasks: Arc<Vec<Task>>) {
        self.tasks = tasks;
        if self.task_selected >= self.tasks.len() {
            self.task_selected = self.tasks.len().saturating_sub(1);
        }
    }

    /// Copy suggestion `index` into the draft, replacing whatever was there.
    pub fn accept_suggestion(&mut self, index: usize) {
        let Some(text) = self.suggestions.get(index) else {
            return;
        };
        let suggestion = Suggestion::parse(text);
        let replaced = !self.draft.is_empty();
        self.draft.fill_from(&suggestion);
        if replaced {
            self.info("Draft replaced with suggestion");
        }
        self.title_cursor = self.draft.title.len();
        self.description_cursor = self.draft.description.len();
        self.focus = Focus::Title;
    }

    /// The server accepted the draft: clear it for the next one.
    pub fn on_created(&mut self) {
        self.draft.reset();
        self.title_cursor = 0;
        self.description_cursor = 0;
    }

    /// Validate and hand out the draft for sending. Invalid drafts become a notice.
    pub fn submit_draft(&mut self) -> Option<Draft> {
        if self.creating {
            return None;
        }
        if let Err(e) = self.draft.to_new_task() {
            self.error(&e);
            return None;
        }
        self.creating = true;
        Some(self.draft.clone())
    }

    /// Hand out the trimmed query, or leave a notice when there is nothing to ask.
    pub fn request_suggestions(&mut self) -> Option<String> {
        if self.suggesting {
            return None;
        }
        let query = self.query.trim();
        if query.is_empty() {
            self.error(&SyncError::Validation(EMPTY_QUERY_NOTICE.to_string()));
            return None;
        }
        let query = query.to_string();
        self.suggesting = true;
        Some(query)
    }

    /// The only place async results touch view state.
    pub fn apply_event(&mut self, ev: UiEvent) {
        match ev {
            UiEvent::Created(result) => {
                self.creating = false;
                match result {
                    Ok(report) => {
                        self.on_created();
                        match report.reconcile {
                            Ok(_) => self.info("Task created"),
                            Err(e) => self.error(&e),
                        }
                    }
                    Err(e) => self.error(&e),
                }
            }
            UiEvent::Mutated { action, result } => {
                self.pending = self.pending.saturating_sub(1);
                match result {
                    Ok(report) => match report.reconcile {
                        Ok(_) => self.info(format!("Task {}", action.past_tense())),
                        Err(e) => self.error(&e),
                    },
                    Err(e) => self.error(&e),
                }
            }
            UiEvent::Refreshed(result) => {
                self.refreshing = false;
                if let Err(e) = result {
                    self.error(&e);
                }
            }
            UiEvent::Suggestions(result) => {
                self.suggesting = false;
                match result {
                    Ok(list) => {
                        if list.is_empty() {
                            self.info("No suggestions returned");
                        } else {
                            self.info(format!("{} suggestion{}", list.len(), if list.len() == 1 { "" } else { "s" }));
                        }
                        self.suggestions = list;
                        self.suggestion_selected = 0;
                    }
                    // Previous suggestions stay on screen
                    Err(e) => self.error(&e),
                }
            }
        }
    }

    fn active_input(&mut self) -> Option<(&mut String, &mut usize)> {
        match self.focus {
            Focus::Title => Some((&mut self.draft.title, &mut self.title_cursor)),
            Focus::Description => Some((&mut self.draft.description, &mut self.description_cursor)),
            Focus::Query => Some((&mut self.query, &mut self.query_cursor)),
            Focus::Suggestions | Focus::Tasks => None,
        }
    }
}

// ── Terminal setup / teardown ─────────────────────────────────────────────────

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Ok(Terminal::new(backend)?)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) {
    let _ = disable_raw_mode();
    let _ = execute!(terminal.backend_mut(), LeaveAlternateScreen);
    let _ = terminal.show_cursor();
}

// ── Main TUI run loop ─────────────────────────────────────────────────────────

pub async fn run(resolved: ResolvedConfig) -> Result<()> {
    let gateway = RestGateway::new(&resolved.backend_url, resolved.request_timeout)?;
    let engine = Arc::new(SyncEngine::new(gateway, TaskStore::new(), resolved.ordering));

    let mut suggester = SuggestionClient::new(
        resolved.ai_endpoint.clone(),
        resolved.ai_model.clone(),
        resolved.request_timeout,
    )?;
    if let Some(key) = &resolved.ai_api_key {
        suggester.set_api_key(key.clone());
    }
    let suggester = Arc::new(suggester);

    let mut terminal = setup_terminal()?;

    // Panic hook: restore terminal before printing panic
    let orig_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        orig_hook(info);
    }));

    // ── Mount: open the push channel ──────────────────────────────────────────
    let listener = resolved.ws_url.as_ref().map(|url| {
        info!(%url, "opening live updates");
        live::spawn_listener(WsConnector::new(url.clone()), Arc::clone(&engine), resolved.reconnect.clone())
    });

    let mut state = AppState::new(
        resolved.backend_url.clone(),
        resolved.ai_model.clone(),
        suggester.has_api_key(),
        listener.is_some(),
    );

    let result = event_loop(&mut terminal, &mut state, engine, suggester, listener.as_ref()).await;

    restore_terminal(&mut terminal);

    // ── Unmount: close the push channel; in-flight HTTP calls are left alone ──
    if let Some(listener) = listener {
        listener.close().await;
    }
    result
}

async fn event_loop<G: TaskGateway + 'static>(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    state: &mut AppState,
    engine: Arc<SyncEngine<G>>,
    suggester: Arc<SuggestionClient>,
    listener: Option<&live::LiveHandle>,
) -> Result<()> {
    // Channel: spawned requests → TUI
    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel::<UiEvent>();

    let mut store_rx = engine.store().subscribe();
    state.set_tasks(engine.store().snapshot().tasks);
    // Keep a sender alive when live updates are off so the branch just idles
    let (_idle_tx, idle_rx) = watch::channel(ConnectionState::Closed);
    let mut conn_rx = listener.map(|l| l.subscribe()).unwrap_or(idle_rx);
    if let Some(l) = listener {
        state.connection = l.state();
    }

    // Initial load
    state.refreshing = true;
    dispatch(Action::Refresh, &engine, &suggester, &ui_tx);

    let mut crossterm_events = EventStream::new();
    let mut ticker = tokio::time::interval(tokio::time::Duration::from_millis(120));

    terminal.draw(|f| render::draw(f, state))?;

    loop {
        tokio::select! {
            // ── Animation tick ────────────────────────────────────────────────
            _ = ticker.tick() => {
                if state.busy() {
                    state.spinner_tick = state.spinner_tick.wrapping_add(1);
                    terminal.draw(|f| render::draw(f, state))?;
                }
            }

            // ── Request results ───────────────────────────────────────────────
            Some(ev) = ui_rx.recv() => {
                state.apply_event(ev);
                terminal.draw(|f| render::draw(f, state))?;
            }

            // ── Store replaced (manual, reconciling or push-driven fetch) ─────
            Ok(()) = store_rx.changed() => {
                let tasks = store_rx.borrow_and_update().tasks.clone();
                debug!(count = tasks.len(), "store changed");
                state.set_tasks(tasks);
                terminal.draw(|f| render::draw(f, state))?;
            }

            // ── Live connection state ─────────────────────────────────────────
            Ok(()) = conn_rx.changed() => {
                state.connection = *conn_rx.borrow_and_update();
                terminal.draw(|f| render::draw(f, state))?;
            }

            // ── Keyboard/resize events ────────────────────────────────────────
            Some(Ok(ev)) = crossterm_events.next() => {
                if let Event::Key(key) = ev {
                    match handle_key(key, state) {
                        Action::Quit => break,
                        action => dispatch(action, &engine, &suggester, &ui_tx),
                    }
                }
                terminal.draw(|f| render::draw(f, state))?;
            }
        }
    }

    Ok(())
}

// ── Request launcher ──────────────────────────────────────────────────────────

/// Run `action` in the background; its result arrives later as a `UiEvent`.
fn dispatch<G: TaskGateway + 'static>(
    action: Action,
    engine: &Arc<SyncEngine<G>>,
    suggester: &Arc<SuggestionClient>,
    ui_tx: &mpsc::UnboundedSender<UiEvent>,
) {
    let engine = Arc::clone(engine);
    let tx = ui_tx.clone();
    match action {
        Action::None | Action::Quit => {}
        Action::Refresh => {
            tokio::spawn(async move {
                let _ = tx.send(UiEvent::Refreshed(engine.refresh().await));
            });
        }
        Action::Create(draft) => {
            tokio::spawn(async move {
                let _ = tx.send(UiEvent::Created(engine.create(&draft).await));
            });
        }
        Action::Complete(id) => {
            tokio::spawn(async move {
                let result = engine.complete(&id).await;
                let _ = tx.send(UiEvent::Mutated { action: MutationKind::Complete, result });
            });
        }
        Action::Reopen(task) => {
            tokio::spawn(async move {
                let update = TaskUpdate { done: false, ..TaskUpdate::from(&task) };
                let result = engine.apply(Mutation::Update { id: task.id, update }).await;
                let _ = tx.send(UiEvent::Mutated { action: MutationKind::Reopen, result });
            });
        }
        Action::Delete(id) => {
            tokio::spawn(async move {
                let result = engine.delete(&id).await;
                let _ = tx.send(UiEvent::Mutated { action: MutationKind::Delete, result });
            });
        }
        Action::Suggest(query) => {
            let suggester = Arc::clone(suggester);
            tokio::spawn(async move {
                let _ = tx.send(UiEvent::Suggestions(suggester.recommend(&query).await));
            });
        }
    }
}

// ── Key handler ───────────────────────────────────────────────────────────────

fn handle_key(key: KeyEvent, state: &mut AppState) -> Action {
    // Windows reports releases too
    if key.kind == KeyEventKind::Release {
        return Action::None;
    }
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    // ── Global keys ───────────────────────────────────────────────────────────
    match key.code {
        KeyCode::Esc => return Action::Quit,
        KeyCode::Char('c') if ctrl => return Action::Quit,
        KeyCode::Char('r') if ctrl => return start_refresh(state),
        KeyCode::Tab => {
            state.focus = state.focus.next();
            return Action::None;
        }
        KeyCode::BackTab => {
            state.focus = state.focus.prev();
            return Action::None;
        }
        _ => {}
    }

    match state.focus {
        Focus::Title | Focus::Description => {
            if key.code == KeyCode::Enter {
                return state.submit_draft().map(Action::Create).unwrap_or(Action::None);
            }
            edit_input(key, state);
            Action::None
        }
        Focus::Query => {
            if key.code == KeyCode::Enter {
                return state.request_suggestions().map(Action::Suggest).unwrap_or(Action::None);
            }
            edit_input(key, state);
            Action::None
        }
        Focus::Suggestions => {
            match key.code {
                KeyCode::Up => {
                    state.suggestion_selected = state.suggestion_selected.saturating_sub(1);
                }
                KeyCode::Down => {
                    if state.suggestion_selected + 1 < state.suggestions.len() {
                        state.suggestion_selected += 1;
                    }
                }
                KeyCode::Enter => state.accept_suggestion(state.suggestion_selected),
                _ => {}
            }
            Action::None
        }
        Focus::Tasks => match key.code {
            KeyCode::Up => {
                state.task_selected = state.task_selected.saturating_sub(1);
                Action::None
            }
            KeyCode::Down => {
                if state.task_selected + 1 < state.tasks.len() {
                    state.task_selected += 1;
                }
                Action::None
            }
            // Toggles: a done task is reopened with a full update
            KeyCode::Char('d') => match state.selected_task() {
                Some(task) if task.done => {
                    let task = task.clone();
                    state.pending += 1;
                    Action::Reopen(task)
                }
                Some(task) => {
                    let id = task.id.clone();
                    state.pending += 1;
                    Action::Complete(id)
                }
                None => Action::None,
            },
            KeyCode::Char('x') | KeyCode::Delete => match state.selected_task() {
                Some(task) => {
                    let id = task.id.clone();
                    state.pending += 1;
                    Action::Delete(id)
                }
                None => Action::None,
            },
            KeyCode::Char('r') => start_refresh(state),
            _ => Action::None,
        },
    }
}

fn start_refresh(state: &mut AppState) -> Action {
    state.refreshing = true;
    Action::Refresh
}

/// Cursor editing for whichever text field has focus.
fn edit_input(key: KeyEvent, state: &mut AppState) {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let alt = key.modifiers.contains(KeyModifiers::ALT);
    let Some((input, cursor)) = state.active_input() else {
        return;
    };
    match key.code {
        KeyCode::Char('w') if ctrl => input_delete_word(input, cursor),
        KeyCode::Char('u') if ctrl => {
            input.drain(..*cursor);
            *cursor = 0;
        }
        KeyCode::Char('a') if ctrl => *cursor = 0,
        KeyCode::Char('e') if ctrl => *cursor = input.len(),
        KeyCode::Char(c) if !ctrl => {
            input.insert(*cursor, c);
            *cursor += c.len_utf8();
        }
        KeyCode::Backspace if ctrl || alt => input_delete_word(input, cursor),
        KeyCode::Backspace => input_backspace(input, cursor),
        KeyCode::Delete => input_delete_forward(input, cursor),
        KeyCode::Left if ctrl || alt => *cursor = word_left(input, *cursor),
        KeyCode::Right if ctrl || alt => *cursor = word_right(input, *cursor),
        KeyCode::Left => *cursor = prev_char_boundary(input, *cursor),
        KeyCode::Right => *cursor = next_char_boundary(input, *cursor),
        KeyCode::Home => *cursor = 0,
        KeyCode::End => *cursor = input.len(),
        _ => {}
    }
}

// ── Input editing helpers ─────────────────────────────────────────────────────

/// Remove the character immediately before the cursor (UTF-8 safe).
fn input_backspace(input: &mut String, cursor: &mut usize) {
    if *cursor == 0 {
        return;
    }
    let prev = prev_char_boundary(input, *cursor);
    input.drain(prev..*cursor);
    *cursor = prev;
}

fn input_delete_forward(input: &mut String, cursor: &mut usize) {
    if *cursor >= input.len() {
        return;
    }
    let next = next_char_boundary(input, *cursor);
    input.drain(*cursor..next);
}

/// Delete the word before the cursor, stopping at whitespace.
fn input_delete_word(input: &mut String, cursor: &mut usize) {
    if *cursor == 0 {
        return;
    }
    let start = word_left(input, *cursor);
    input.drain(start..*cursor);
    *cursor = start;
}

fn prev_char_boundary(s: &str, pos: usize) -> usize {
    if pos == 0 {
        return 0;
    }
    let mut p = pos - 1;
    while !s.is_char_boundary(p) {
        p -= 1;
    }
    p
}

fn next_char_boundary(s: &str, pos: usize) -> usize {
    if pos >= s.len() {
        return s.len();
    }
    let mut p = pos + 1;
    while p < s.len() && !s.is_char_boundary(p) {
        p += 1;
    }
    p
}

fn word_left(s: &str, mut pos: usize) -> usize {
    let bytes = s.as_bytes();
    while pos > 0 && bytes[pos - 1].is_ascii_whitespace() {
        pos -= 1;
    }
    while pos > 0 && !bytes[pos - 1].is_ascii_whitespace() {
        pos -= 1;
    }
    pos
}

fn word_right(s: &str, mut pos: usize) -> usize {
    let bytes = s.as_bytes();
    while pos < s.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    while pos < s.len() && !bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}
