//! Interactive fuzzy picker
//!
//! Items may keep arriving while the picker is open. The highlighted item's
//! preview is computed on the async runtime the first time it is shown and
//! memoized afterwards. The picker draws on stderr so that stdout is left to
//! the shell handshake.

use std::collections::HashMap;
use std::io::{self, Stderr};
use std::sync::Arc;
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use futures::future::BoxFuture;
use kubeswitch_store::SearchStatus;
use nucleo::pattern::{CaseMatching, Normalization, Pattern};
use nucleo::{Config, Matcher, Utf32Str};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::error::{CliError, Result};

const TICK_RATE: Duration = Duration::from_millis(30);
const PAGE_SIZE: usize = 10;

/// Something the picker can list
pub trait PickItem: Clone + Send + 'static {
    fn label(&self) -> String;
}

/// Message on the hot-reload channel
pub enum Feed<T> {
    Item(T),
    Error(String),
}

/// Produces the preview text of an item
pub type PreviewFn<T> = Arc<dyn Fn(T) -> BoxFuture<'static, String> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Selected(T),
    Cancelled,
}

pub struct Picker<T: PickItem> {
    prompt: String,
    items: Vec<T>,
    feed: Option<mpsc::Receiver<Feed<T>>>,
    preview: Option<PreviewFn<T>>,
    search: Option<SearchStatus>,
    runtime: Handle,
}

impl<T: PickItem> Picker<T> {
    /// Must be called from within the tokio runtime
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            items: Vec::new(),
            feed: None,
            preview: None,
            search: None,
            runtime: Handle::current(),
        }
    }

    pub fn with_items(mut self, items: Vec<T>) -> Self {
        self.items = items;
        self
    }

    /// Items arriving after the picker opened
    pub fn with_feed(mut self, feed: mpsc::Receiver<Feed<T>>) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn with_preview(mut self, preview: PreviewFn<T>) -> Self {
        self.preview = Some(preview);
        self
    }

    /// Search to cancel once the picker closes, and whose deadline is reported
    pub fn with_search_status(mut self, status: SearchStatus) -> Self {
        self.search = Some(status);
        self
    }

    /// Run the picker on a blocking thread
    pub async fn pick(self) -> Result<Outcome<T>> {
        tokio::task::spawn_blocking(move || self.run())
            .await
            .map_err(|e| CliError::internal(format!("picker task failed: {}", e)))?
    }

    fn run(mut self) -> Result<Outcome<T>> {
        let search = self.search.take();
        let outcome = self.event_loop(search.as_ref());
        if let Some(search) = &search {
            search.cancel();
        }
        outcome
    }

    fn event_loop(&mut self, search: Option<&SearchStatus>) -> Result<Outcome<T>> {
        let mut terminal = TerminalGuard::enter()?;
        let (preview_tx, preview_rx) = std_mpsc::channel();

        let mut state = PickerState::new(std::mem::take(&mut self.items));
        state.feed_open = self.feed.is_some();

        loop {
            self.drain_feed(&mut state);
            while let Ok((index, text)) = preview_rx.try_recv() {
                state.previews.insert(index, PreviewSlot::Ready(text));
            }
            self.request_preview(&mut state, &preview_tx);
            state.timed_out = search.is_some_and(SearchStatus::timed_out);

            terminal
                .terminal
                .draw(|f| state.render(f, &self.prompt, self.preview.is_some()))?;

            if !event::poll(TICK_RATE)? {
                continue;
            }
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match state.handle_key(key) {
                    Some(Action::Cancel) => return Ok(Outcome::Cancelled),
                    Some(Action::Select) => {
                        if let Some(item) = state.selected_item() {
                            return Ok(Outcome::Selected(item.clone()));
                        }
                    }
                    None => {}
                }
            }
        }
    }

    fn drain_feed(&mut self, state: &mut PickerState<T>) {
        let Some(feed) = self.feed.as_mut() else {
            return;
        };
        let mut added = false;
        loop {
            match feed.try_recv() {
                Ok(Feed::Item(item)) => {
                    state.push(item);
                    added = true;
                }
                Ok(Feed::Error(message)) => state.errors.push(message),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    state.feed_open = false;
                    self.feed = None;
                    break;
                }
            }
        }
        if added {
            state.refresh_matches();
        }
    }

    fn request_preview(&self, state: &mut PickerState<T>, tx: &std_mpsc::Sender<(usize, String)>) {
        let Some(preview) = &self.preview else {
            return;
        };
        let Some(index) = state.selected_index() else {
            return;
        };
        if state.previews.contains_key(&index) {
            return;
        }

        state.previews.insert(index, PreviewSlot::Loading);
        let future = preview(state.items[index].clone());
        let tx = tx.clone();
        self.runtime.spawn(async move {
            let _ = tx.send((index, future.await));
        });
    }
}

/// Raw mode and the alternate screen, restored on drop
struct TerminalGuard {
    terminal: Terminal<CrosstermBackend<Stderr>>,
}

impl TerminalGuard {
    fn enter() -> io::Result<Self> {
        enable_raw_mode()?;
        let mut stderr = io::stderr();
        if let Err(e) = execute!(stderr, EnterAlternateScreen) {
            let _ = disable_raw_mode();
            return Err(e);
        }
        let terminal = Terminal::new(CrosstermBackend::new(stderr))?;
        Ok(Self { terminal })
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Select,
    Cancel,
}

enum PreviewSlot {
    Loading,
    Ready(String),
}

/// Everything the picker shows, independent of the terminal
struct PickerState<T: PickItem> {
    items: Vec<T>,
    labels: Vec<String>,
    query: String,
    /// Indices into `items`, best match first
    matches: Vec<usize>,
    list: ListState,
    previews: HashMap<usize, PreviewSlot>,
    errors: Vec<String>,
    feed_open: bool,
    timed_out: bool,
    fuzzy: FuzzyMatcher,
}

impl<T: PickItem> PickerState<T> {
    fn new(items: Vec<T>) -> Self {
        let mut state = Self {
            items: Vec::with_capacity(items.len()),
            labels: Vec::with_capacity(items.len()),
            query: String::new(),
            matches: Vec::new(),
            list: ListState::default(),
            previews: HashMap::new(),
            errors: Vec::new(),
            feed_open: false,
            timed_out: false,
            fuzzy: FuzzyMatcher::new(),
        };
        for item in items {
            state.push(item);
        }
        state.refresh_matches();
        state
    }

    fn push(&mut self, item: T) {
        self.labels.push(item.label());
        self.items.push(item);
    }

    /// Recompute matches, keeping the highlighted item when it still matches
    fn refresh_matches(&mut self) {
        let highlighted = self.selected_index();
        self.matches = self.fuzzy.rank(&self.query, &self.labels);

        let position = highlighted
            .and_then(|h| self.matches.iter().position(|&i| i == h))
            .or(if self.matches.is_empty() { None } else { Some(0) });
        self.list.select(position);
    }

    fn selected_index(&self) -> Option<usize> {
        self.list.selected().and_then(|p| self.matches.get(p).copied())
    }

    fn selected_item(&self) -> Option<&T> {
        self.selected_index().map(|i| &self.items[i])
    }

    fn move_by(&mut self, delta: isize) {
        if self.matches.is_empty() {
            return;
        }
        let last = self.matches.len() - 1;
        let current = self.list.selected().unwrap_or(0);
        let next = current.saturating_add_signed(delta).min(last);
        self.list.select(Some(next));
    }

    fn handle_key(&mut self, key: KeyEvent) -> Option<Action> {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Esc => return Some(Action::Cancel),
            KeyCode::Char('c') | KeyCode::Char('d') if ctrl => return Some(Action::Cancel),
            KeyCode::Enter => return Some(Action::Select),
            KeyCode::Up => self.move_by(-1),
            KeyCode::Char('p') | KeyCode::Char('k') if ctrl => self.move_by(-1),
            KeyCode::Down => self.move_by(1),
            KeyCode::Char('n') | KeyCode::Char('j') if ctrl => self.move_by(1),
            KeyCode::PageUp => self.move_by(-(PAGE_SIZE as isize)),
            KeyCode::PageDown => self.move_by(PAGE_SIZE as isize),
            KeyCode::Home => self.list.select(if self.matches.is_empty() { None } else { Some(0) }),
            KeyCode::End => self.list.select(self.matches.len().checked_sub(1)),
            KeyCode::Char('u') if ctrl => {
                self.query.clear();
                self.list.select(None);
                self.refresh_matches();
            }
            KeyCode::Backspace => {
                if self.query.pop().is_some() {
                    self.list.select(None);
                    self.refresh_matches();
                }
            }
            KeyCode::Char(c) if !ctrl => {
                self.query.push(c);
                self.list.select(None);
                self.refresh_matches();
            }
            _ => {}
        }
        None
    }

    fn status_line(&self) -> Line<'static> {
        let mut spans = vec![Span::styled(
            format!("{}/{}", self.matches.len(), self.items.len()),
            Style::default().fg(Color::Cyan),
        )];
        if self.feed_open {
            spans.push(Span::raw("  searching…"));
        }
        if self.timed_out {
            spans.push(Span::styled(
                "  search timed out, results may be incomplete",
                Style::default().fg(Color::Yellow),
            ));
        }
        if let Some(last) = self.errors.last() {
            spans.push(Span::styled(
                format!("  {} error(s), last: {}", self.errors.len(), last),
                Style::default().fg(Color::Red),
            ));
        }
        Line::from(spans)
    }

    fn render(&mut self, f: &mut Frame, prompt: &str, with_preview: bool) {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1), // Query
                Constraint::Min(1),    // Items and preview
                Constraint::Length(1), // Status
            ])
            .split(f.area());

        let query = Paragraph::new(Line::from(vec![
            Span::styled(
                format!("{} > ", prompt),
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
            ),
            Span::raw(self.query.clone()),
        ]));
        f.render_widget(query, rows[0]);

        let columns = if with_preview {
            Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
                .split(rows[1])
        } else {
            Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(100)])
                .split(rows[1])
        };

        let items: Vec<ListItem> = self
            .matches
            .iter()
            .map(|&i| ListItem::new(self.labels[i].clone()))
            .collect();
        let list = List::new(items)
            .block(Block::default().borders(Borders::ALL))
            .highlight_style(
                Style::default()
                    .fg(Color::Black)
                    .bg(Color::LightBlue)
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("> ");
        f.render_stateful_widget(list, columns[0], &mut self.list);

        if with_preview {
            let text = match self.selected_index().and_then(|i| self.previews.get(&i)) {
                Some(PreviewSlot::Ready(text)) => text.clone(),
                Some(PreviewSlot::Loading) => "loading…".to_string(),
                None => String::new(),
            };
            let preview = Paragraph::new(text)
                .block(Block::default().borders(Borders::ALL).title("preview"))
                .wrap(Wrap { trim: false });
            f.render_widget(preview, columns[1]);
        }

        f.render_widget(Paragraph::new(self.status_line()), rows[2]);
    }
}

/// Fuzzy ranking of labels against a query
struct FuzzyMatcher {
    matcher: Matcher,
    buf: Vec<char>,
}

impl FuzzyMatcher {
    fn new() -> Self {
        Self {
            matcher: Matcher::new(Config::DEFAULT),
            buf: Vec::new(),
        }
    }

    /// Indices of matching labels, best score first, arrival order on ties.
    /// An empty query matches everything in arrival order.
    fn rank(&mut self, query: &str, labels: &[String]) -> Vec<usize> {
        if query.is_empty() {
            return (0..labels.len()).collect();
        }

        let pattern = Pattern::parse(query, CaseMatching::Smart, Normalization::Smart);
        let mut scored: Vec<(u32, usize)> = labels
            .iter()
            .enumerate()
            .filter_map(|(i, label)| {
                let haystack = Utf32Str::new(label, &mut self.buf);
                pattern.score(haystack, &mut self.matcher).map(|s| (s, i))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        scored.into_iter().map(|(_, i)| i).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Name(&'static str);

    impl PickItem for Name {
        fn label(&self) -> String {
            self.0.to_string()
        }
    }

    fn state(names: &[&'static str]) -> PickerState<Name> {
        PickerState::new(names.iter().map(|n| Name(n)).collect())
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn type_query(state: &mut PickerState<Name>, query: &str) {
        for c in query.chars() {
            state.handle_key(key(KeyCode::Char(c)));
        }
    }

    #[test]
    fn test_empty_query_keeps_arrival_order() {
        let mut fuzzy = FuzzyMatcher::new();
        let labels = vec!["b/ctx-b".to_string(), "a/ctx-a".to_string()];
        assert_eq!(fuzzy.rank("", &labels), vec![0, 1]);
    }

    #[test]
    fn test_rank_filters_non_matches() {
        let mut fuzzy = FuzzyMatcher::new();
        let labels = vec![
            "prod/payments".to_string(),
            "dev/frontend".to_string(),
            "prod/frontend".to_string(),
        ];
        let ranked = fuzzy.rank("prodfront", &labels);
        assert_eq!(ranked, vec![2]);
    }

    #[test]
    fn test_typing_filters_and_selects_first_match() {
        let mut state = state(&["a/ctx-a", "b/ctx-b"]);
        assert_eq!(state.selected_item(), Some(&Name("a/ctx-a")));

        type_query(&mut state, "ctx-b");
        assert_eq!(state.matches, vec![1]);
        assert_eq!(state.selected_item(), Some(&Name("b/ctx-b")));

        state.handle_key(key(KeyCode::Backspace));
        assert_eq!(state.query, "ctx-");
        assert_eq!(state.matches.len(), 2);

        state.handle_key(KeyEvent::new(KeyCode::Char('u'), KeyModifiers::CONTROL));
        assert!(state.query.is_empty());
    }

    #[test]
    fn test_hot_reload_keeps_highlight() {
        let mut state = state(&["a/ctx-a", "b/ctx-b"]);
        state.handle_key(key(KeyCode::Down));
        assert_eq!(state.selected_item(), Some(&Name("b/ctx-b")));

        state.push(Name("c/ctx-c"));
        state.refresh_matches();
        assert_eq!(state.matches.len(), 3);
        assert_eq!(state.selected_item(), Some(&Name("b/ctx-b")));
    }

    #[test]
    fn test_navigation_is_clamped() {
        let mut state = state(&["a", "b", "c"]);
        state.handle_key(key(KeyCode::Up));
        assert_eq!(state.selected_item(), Some(&Name("a")));
        state.handle_key(key(KeyCode::PageDown));
        assert_eq!(state.selected_item(), Some(&Name("c")));
        state.handle_key(key(KeyCode::Home));
        assert_eq!(state.selected_item(), Some(&Name("a")));
    }

    #[test]
    fn test_actions() {
        let mut state = state(&["a"]);
        assert_eq!(state.handle_key(key(KeyCode::Enter)), Some(Action::Select));
        assert_eq!(state.handle_key(key(KeyCode::Esc)), Some(Action::Cancel));
        assert_eq!(
            state.handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(Action::Cancel)
        );
        // ctrl-c never reaches the query
        assert!(state.query.is_empty());
    }

    #[test]
    fn test_no_selection_without_matches() {
        let mut state = state(&["a/ctx-a"]);
        type_query(&mut state, "zzz");
        assert!(state.matches.is_empty());
        assert_eq!(state.selected_item(), None);
    }
}
