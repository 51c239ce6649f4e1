// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{
    self, DisableBracketedPaste, EnableBracketedPaste, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers, KeyboardEnhancementFlags, PopKeyboardEnhancementFlags,
    PushKeyboardEnhancementFlags,
};
use crossterm::terminal::{
    self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode,
    enable_raw_mode,
};
use crossterm::{execute, queue};
use rand::seq::SliceRandom;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::io::{self, Write};
use std::sync::OnceLock;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};
use wisedeck_app::{
    ACTION_ROW, AppState, CommandGroup, DateFmt, DateParts, FieldKind, RunOutput, ToolDef, View,
    parse_array_draft,
};

const POLL_INTERVAL: Duration = Duration::from_millis(80);
const QUIT_CONFIRM_WINDOW: Duration = Duration::from_secs(2);
const FORM_SEARCH_THRESHOLD: usize = 8;
const HSCROLL_STEP: usize = 4;

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const REVERSE: &str = "\x1b[7m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";

const EN_DASH: &str = "–";

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
// ~1s per message at the 80ms spinner cadence
const FRAMES_PER_MESSAGE: u64 = 12;

const LOADING_MESSAGES: [&str; 16] = [
    "Thumbing through your highlights…",
    "Asking the librarian…",
    "Searching the stacks…",
    "Dusting off the archive…",
    "Untangling bookmarks…",
    "Filing marginalia…",
    "Consulting the index cards…",
    "Shelving stray documents…",
    "Polishing the reading lamp…",
    "Counting unread tabs…",
    "Sharpening pencils…",
    "Rewinding the tape…",
    "Brewing a fresh pot…",
    "Summoning the reading gnomes…",
    "Negotiating with the API…",
    "Turning pages quietly…",
];

fn shuffled_messages() -> &'static [&'static str] {
    static MESSAGES: OnceLock<Vec<&'static str>> = OnceLock::new();
    MESSAGES.get_or_init(|| {
        let mut pool = LOADING_MESSAGES.to_vec();
        pool.shuffle(&mut rand::rng());
        pool
    })
}

fn dim(text: &str) -> String {
    format!("{DIM}{text}{RESET}")
}

fn bold(text: &str) -> String {
    format!("{BOLD}{text}{RESET}")
}

fn red(text: &str) -> String {
    format!("{RED}{text}{RESET}")
}

fn green(text: &str) -> String {
    format!("{GREEN}{text}{RESET}")
}

fn yellow(text: &str) -> String {
    format!("{YELLOW}{text}{RESET}")
}

fn cyan(text: &str) -> String {
    format!("{CYAN}{text}{RESET}")
}

// ---------------------------------------------------------------------------
// ANSI-aware string utilities
// ---------------------------------------------------------------------------

/// Byte length of the escape sequence starting at `start` (which must point
/// at an ESC byte). Only CSI sequences are ever emitted by this crate.
fn escape_len(text: &str, start: usize) -> usize {
    let bytes = text.as_bytes();
    if bytes.get(start + 1) == Some(&b'[') {
        let mut end = start + 2;
        while let Some(&byte) = bytes.get(end) {
            end += 1;
            if (0x40..=0x7e).contains(&byte) {
                break;
            }
        }
        end - start
    } else {
        match text[start + 1..].chars().next() {
            Some(follower) => 1 + follower.len_utf8(),
            None => 1,
        }
    }
}

pub fn strip_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(position) = rest.find('\u{1b}') {
        out.push_str(&rest[..position]);
        let len = escape_len(rest, position);
        rest = &rest[(position + len).min(rest.len())..];
    }
    out.push_str(rest);
    out
}

pub fn visible_width(text: &str) -> usize {
    strip_ansi(text).width()
}

/// Skip `offset` visible columns. Every SGR sequence crossed while skipping
/// is re-emitted at the boundary so horizontally scrolled text keeps its
/// styling. A double-width character straddling the boundary is dropped.
pub fn ansi_slice(text: &str, offset: usize) -> String {
    if offset == 0 {
        return text.to_owned();
    }
    let mut out = String::new();
    let mut carried = String::new();
    let mut remaining = offset;
    let mut emitting = false;
    let mut index = 0;
    while index < text.len() {
        if text.as_bytes()[index] == 0x1b {
            let len = escape_len(text, index);
            let sequence = &text[index..(index + len).min(text.len())];
            if emitting {
                out.push_str(sequence);
            } else {
                carried.push_str(sequence);
            }
            index += len;
            continue;
        }
        let Some(ch) = text[index..].chars().next() else {
            break;
        };
        index += ch.len_utf8();
        if emitting {
            out.push(ch);
            continue;
        }
        let width = ch.width().unwrap_or(0);
        if width < remaining {
            remaining -= width;
        } else {
            remaining = 0;
            emitting = true;
            out.push_str(&carried);
            if width == 0 {
                out.push(ch);
            }
        }
    }
    out
}

/// Truncate or right-pad to exactly `width` printable columns. SGR codes
/// never count toward the width and survive truncation, including trailing
/// resets.
pub fn fit_width(text: &str, width: usize) -> String {
    let mut out = String::new();
    let mut used = 0usize;
    let mut index = 0;
    while index < text.len() {
        if text.as_bytes()[index] == 0x1b {
            let len = escape_len(text, index);
            out.push_str(&text[index..(index + len).min(text.len())]);
            index += len;
            continue;
        }
        let Some(ch) = text[index..].chars().next() else {
            break;
        };
        index += ch.len_utf8();
        if ch == '\n' || ch == '\r' {
            continue;
        }
        let char_width = ch.width().unwrap_or(0);
        if used + char_width > width {
            continue;
        }
        used += char_width;
        out.push(ch);
    }
    if used < width {
        out.push_str(&" ".repeat(width - used));
    }
    out
}

pub fn truncate_ellipsis(text: &str, width: usize) -> String {
    if visible_width(text) <= width {
        return text.to_owned();
    }
    let mut out = String::new();
    let mut used = 0usize;
    let budget = width.saturating_sub(1);
    for ch in strip_ansi(text).chars() {
        let char_width = ch.width().unwrap_or(0);
        if used + char_width > budget {
            break;
        }
        used += char_width;
        out.push(ch);
    }
    out.push('…');
    out
}

/// Greedy word wrap over collapsed whitespace. Never yields zero lines;
/// words longer than the width are hard-broken.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let mut word = word.to_owned();
        while word.width() > width {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let mut head = String::new();
            let mut used = 0usize;
            for ch in word.chars() {
                let char_width = ch.width().unwrap_or(0);
                if used + char_width > width {
                    break;
                }
                used += char_width;
                head.push(ch);
            }
            word = word[head.len()..].to_owned();
            lines.push(head);
        }
        if word.is_empty() {
            continue;
        }
        if current.is_empty() {
            current = word;
        } else if current.width() + 1 + word.width() <= width {
            current.push(' ');
            current.push_str(&word);
        } else {
            lines.push(std::mem::take(&mut current));
            current = word;
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// One breadcrumb row, a bordered content box, one footer row: exactly
/// `rows` lines regardless of how much content is supplied.
pub fn render_layout(
    breadcrumb: &str,
    content: &[String],
    footer: &str,
    cols: usize,
    rows: usize,
) -> Vec<String> {
    if rows == 0 {
        return Vec::new();
    }
    let inner = cols.saturating_sub(5);
    let fill = cols.saturating_sub(3);
    let content_rows = rows.saturating_sub(4);

    let mut lines = Vec::with_capacity(rows);
    lines.push(fit_width(breadcrumb, cols));
    lines.push(format!("╭{}╮", "─".repeat(fill)));
    for index in 0..content_rows {
        let body = content.get(index).map(String::as_str).unwrap_or("");
        lines.push(format!("│ {} │", fit_width(body, inner)));
    }
    lines.push(format!("╰{}╯", "─".repeat(fill)));
    lines.push(fit_width(footer, cols));
    lines.truncate(rows);
    lines
}

// ---------------------------------------------------------------------------
// Keyboard
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyName {
    Char(char),
    Enter,
    Escape,
    Backspace,
    Delete,
    Tab,
    BackTab,
    Up,
    Down,
    Left,
    Right,
    PageUp,
    PageDown,
    Home,
    End,
    WordLeft,
    WordRight,
    WordBackspace,
    Paste(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPress {
    pub name: KeyName,
    pub shift: bool,
    pub ctrl: bool,
}

impl KeyPress {
    pub fn plain(name: KeyName) -> Self {
        Self {
            name,
            shift: false,
            ctrl: false,
        }
    }

    pub fn ctrl(ch: char) -> Self {
        Self {
            name: KeyName::Char(ch),
            shift: false,
            ctrl: true,
        }
    }

    pub fn ch(ch: char) -> Self {
        Self::plain(KeyName::Char(ch))
    }
}

/// Collapse a terminal event into one logical key press. The terminal may
/// encode the same logical key several ways (legacy CSI, kitty CSI-u,
/// alt-prefixed); crossterm's parser recognizes them all, and the logical
/// mapping lives here.
pub fn map_event(raw: Event) -> Option<KeyPress> {
    match raw {
        Event::Key(key) => map_key_event(key),
        Event::Paste(text) => Some(KeyPress::plain(KeyName::Paste(
            text.replace("\r\n", "\n").replace('\r', "\n"),
        ))),
        _ => None,
    }
}

fn map_key_event(key: KeyEvent) -> Option<KeyPress> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    let shift = key.modifiers.contains(KeyModifiers::SHIFT);
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let alt = key.modifiers.contains(KeyModifiers::ALT);

    let name = match key.code {
        // alt+enter doubles as shift+enter for terminals without kitty keys
        KeyCode::Enter => {
            return Some(KeyPress {
                name: KeyName::Enter,
                shift: shift || alt,
                ctrl,
            });
        }
        KeyCode::Esc => KeyName::Escape,
        KeyCode::Backspace if alt => KeyName::WordBackspace,
        KeyCode::Backspace => KeyName::Backspace,
        KeyCode::Delete => KeyName::Delete,
        KeyCode::Tab if shift => KeyName::BackTab,
        KeyCode::Tab => KeyName::Tab,
        KeyCode::BackTab => {
            return Some(KeyPress {
                name: KeyName::BackTab,
                shift: true,
                ctrl,
            });
        }
        KeyCode::Up => KeyName::Up,
        KeyCode::Down => KeyName::Down,
        KeyCode::Left if alt => KeyName::WordLeft,
        KeyCode::Right if alt => KeyName::WordRight,
        KeyCode::Left => KeyName::Left,
        KeyCode::Right => KeyName::Right,
        KeyCode::PageUp => KeyName::PageUp,
        KeyCode::PageDown => KeyName::PageDown,
        KeyCode::Home => KeyName::Home,
        KeyCode::End => KeyName::End,
        KeyCode::Char('b') if alt => KeyName::WordLeft,
        KeyCode::Char('f') if alt => KeyName::WordRight,
        KeyCode::Char(ch) if ctrl => KeyName::Char(ch.to_ascii_lowercase()),
        KeyCode::Char(_) if alt => return None,
        KeyCode::Char(ch) => KeyName::Char(ch),
        _ => return None,
    };
    Some(KeyPress { name, shift, ctrl })
}

// ---------------------------------------------------------------------------
// Screen session and painting
// ---------------------------------------------------------------------------

/// Scoped ownership of the terminal. Entering switches to the alternate
/// screen, hides the cursor, enables bracketed paste and the kitty
/// disambiguate flags; dropping restores each in reverse order, so the
/// terminal comes back even when the loop unwinds.
pub struct ScreenSession {
    kitty_pushed: bool,
}

impl ScreenSession {
    pub fn enter() -> Result<Self> {
        enable_raw_mode().context("enable raw mode")?;
        let mut stdout = io::stdout();
        if let Err(error) = execute!(stdout, EnterAlternateScreen, Hide, EnableBracketedPaste) {
            let _ = disable_raw_mode();
            return Err(error).context("enter alternate screen");
        }

        // older terminals reject this; the legacy escape codes still work
        let kitty_pushed = matches!(terminal::supports_keyboard_enhancement(), Ok(true))
            && execute!(
                stdout,
                PushKeyboardEnhancementFlags(KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES)
            )
            .is_ok();

        Ok(Self { kitty_pushed })
    }
}

impl Drop for ScreenSession {
    fn drop(&mut self) {
        let mut stdout = io::stdout();
        if self.kitty_pushed {
            let _ = execute!(stdout, PopKeyboardEnhancementFlags);
        }
        let _ = execute!(stdout, DisableBracketedPaste, Show, LeaveAlternateScreen);
        let _ = disable_raw_mode();
    }
}

pub fn screen_size() -> (usize, usize) {
    match terminal::size() {
        Ok((cols, rows)) => (usize::from(cols.max(1)), usize::from(rows.max(1))),
        Err(_) => (80, 24),
    }
}

/// Repaint by overwriting in place: cursor home, each line followed by an
/// erase-to-end-of-line, then erase-below. No full-screen clear is ever
/// issued, which is what keeps repaints flicker-free.
pub fn paint(out: &mut impl Write, lines: &[String], rows: usize) -> Result<()> {
    queue!(out, MoveTo(0, 0)).context("queue cursor home")?;
    for (index, line) in lines.iter().take(rows).enumerate() {
        if index > 0 {
            out.write_all(b"\r\n").context("write line break")?;
        }
        out.write_all(line.as_bytes()).context("write line")?;
        queue!(out, Clear(ClearType::UntilNewLine)).context("queue line clear")?;
    }
    queue!(out, Clear(ClearType::FromCursorDown)).context("queue trailing clear")?;
    out.flush().context("flush frame")
}

// ---------------------------------------------------------------------------
// JSON pretty-printer
// ---------------------------------------------------------------------------

pub fn render_json(value: &Value) -> Vec<String> {
    let mut lines = Vec::new();
    render_value(value, 0, &mut lines);
    lines
}

fn indent_prefix(indent: usize) -> String {
    " ".repeat(indent)
}

fn render_value(value: &Value, indent: usize, lines: &mut Vec<String>) {
    match value {
        Value::Object(map) => render_object(map, indent, lines),
        Value::Array(items) => render_array(items, indent, lines),
        scalar => lines.push(format!("{}{}", indent_prefix(indent), scalar_text(scalar))),
    }
}

fn is_scalar(value: &Value) -> bool {
    !value.is_object() && !value.is_array()
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => dim("null"),
        Value::Number(number) => cyan(&number.to_string()),
        Value::Bool(flag) => yellow(&flag.to_string()),
        Value::String(text) if text.is_empty() => dim(EN_DASH),
        Value::String(text) => text.replace('\n', " "),
        other => other.to_string(),
    }
}

fn render_object(map: &Map<String, Value>, indent: usize, lines: &mut Vec<String>) {
    let pad = map
        .iter()
        .filter(|(_, value)| is_scalar(value))
        .map(|(key, _)| key.width())
        .max()
        .unwrap_or(0);
    for (key, value) in map {
        match value {
            Value::Array(items) if items.is_empty() => {}
            Value::Object(child) if child.is_empty() => {}
            Value::Array(_) | Value::Object(_) => {
                lines.push(format!("{}{}:", indent_prefix(indent), key));
                render_value(value, indent + 2, lines);
            }
            scalar => lines.push(format!(
                "{}{:<pad$}  {}",
                indent_prefix(indent),
                key,
                scalar_text(scalar),
            )),
        }
    }
}

fn render_array(items: &[Value], indent: usize, lines: &mut Vec<String>) {
    let mut first = true;
    for item in items {
        if is_scalar(item) {
            lines.push(format!(
                "{}{}{}",
                indent_prefix(indent),
                dim("─ "),
                scalar_text(item),
            ));
            first = false;
            continue;
        }

        if !first {
            lines.push(String::new());
        }
        first = false;
        let mut block = Vec::new();
        render_value(item, 0, &mut block);
        if block.is_empty() {
            block.push(String::new());
        }
        for (index, line) in block.iter().enumerate() {
            let marker = if index == 0 { dim("─ ") } else { "  ".to_owned() };
            lines.push(format!("{}{}{}", indent_prefix(indent), marker, line));
        }
    }
}

/// An empty collection answer: a bare empty array, or an object whose
/// values are all empty arrays, zeros, nulls, or empty strings, with at
/// least one array among them (`{results: [], count: 0}`).
pub fn is_empty_list_result(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => {
            let mut has_array = false;
            for child in map.values() {
                match child {
                    Value::Array(items) if items.is_empty() => has_array = true,
                    Value::Null => {}
                    Value::Number(number) if number.as_f64() == Some(0.0) => {}
                    Value::String(text) if text.is_empty() => {}
                    _ => return false,
                }
            }
            has_array
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Runtime seam
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolResult {
    pub is_error: bool,
    /// Text content blocks, in wire order.
    pub content: Vec<String>,
    /// Consulted when `content` is empty.
    pub structured: Option<Value>,
}

impl ToolResult {
    pub fn text(&self) -> String {
        self.content.join("\n")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InternalEvent {
    QuitConfirmExpired { token: u64 },
    ToolFinished {
        request_id: u64,
        outcome: Result<ToolResult, String>,
    },
}

/// What the event loop needs from the outside world. The CLI implements
/// this over the JSON-RPC client; tests implement it with canned results.
pub trait AppRuntime {
    /// The tool catalog, possibly from the on-disk cache. Called once at
    /// bootstrap to seed `AppState::new`; the core never persists it.
    fn list_catalog(&mut self) -> Result<Vec<ToolDef>>;

    /// Start the invocation on a worker thread and deliver a
    /// `ToolFinished` through `tx`. Exactly one call is in flight at a
    /// time; the Loading view drops keystrokes until it lands.
    fn spawn_tool_call(
        &mut self,
        request_id: u64,
        name: &str,
        arguments: Map<String, Value>,
        tx: Sender<InternalEvent>,
    );
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Continue,
    Submit,
    Exit,
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

pub fn run_app<R: AppRuntime>(state: &mut AppState, runtime: &mut R) -> Result<()> {
    let session = ScreenSession::enter()?;
    let mut out = io::stdout();
    let (internal_tx, internal_rx) = mpsc::channel();
    let mut current_request = 0u64;

    loop {
        process_internal_events(state, &internal_rx, current_request);

        let (cols, rows) = screen_size();
        state.viewport_cols = cols;
        state.viewport_rows = rows;
        let lines = render(state, cols, rows);
        paint(&mut out, &lines, rows)?;

        if !event::poll(POLL_INTERVAL).context("poll event")? {
            if state.view == View::Loading {
                state.spinner_frame = state.spinner_frame.wrapping_add(1);
            }
            continue;
        }
        let Some(key) = map_event(event::read().context("read event")?) else {
            continue;
        };
        if state.view == View::Loading {
            continue;
        }

        let token_before = state.quit_token;
        match handle_key(state, &key) {
            Signal::Continue => {}
            Signal::Submit => {
                current_request += 1;
                begin_invocation(state, runtime, current_request, &internal_tx);
            }
            Signal::Exit => break,
        }
        if state.quit_confirm && state.quit_token != token_before {
            schedule_quit_clear(&internal_tx, state.quit_token);
        }
    }

    drop(session);
    Ok(())
}

fn process_internal_events(
    state: &mut AppState,
    rx: &Receiver<InternalEvent>,
    current_request: u64,
) {
    while let Ok(event) = rx.try_recv() {
        match event {
            InternalEvent::QuitConfirmExpired { token } => {
                if state.quit_confirm && token == state.quit_token {
                    state.quit_confirm = false;
                }
            }
            InternalEvent::ToolFinished {
                request_id,
                outcome,
            } => {
                if state.view == View::Loading && request_id == current_request {
                    apply_outcome(state, outcome);
                }
            }
        }
    }
}

fn begin_invocation<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    request_id: u64,
    tx: &Sender<InternalEvent>,
) {
    let Some(tool_index) = state.selected_tool else {
        return;
    };
    let name = state.tools[tool_index].name.clone();
    let arguments = state.tool_args();
    state.view = View::Loading;
    state.spinner_frame = 0;
    state.editing = false;
    runtime.spawn_tool_call(request_id, &name, arguments, tx.clone());
}

fn apply_outcome(state: &mut AppState, outcome: Result<ToolResult, String>) {
    state.result_scroll = 0;
    state.result_scroll_x = 0;
    match outcome {
        Err(message) => {
            state.error = Some(message);
            state.result = RunOutput::None;
        }
        Ok(result) if result.is_error => {
            let text = result.text();
            state.error = Some(if text.trim().is_empty() {
                "tool reported an error".to_owned()
            } else {
                text
            });
            state.result = RunOutput::None;
        }
        Ok(result) => {
            state.error = None;
            let text = result.text();
            let value = if text.trim().is_empty() {
                result.structured
            } else {
                serde_json::from_str(&text).ok()
            };
            state.result = match value {
                Some(value) if is_empty_list_result(&value) => RunOutput::Empty,
                Some(value) => RunOutput::Json(value),
                None if text.trim().is_empty() => RunOutput::None,
                None => RunOutput::Text(text),
            };
        }
    }
    state.view = View::Results;
}

fn schedule_quit_clear(tx: &Sender<InternalEvent>, token: u64) {
    let sender = tx.clone();
    thread::spawn(move || {
        thread::sleep(QUIT_CONFIRM_WINDOW);
        let _ = sender.send(InternalEvent::QuitConfirmExpired { token });
    });
}

// ---------------------------------------------------------------------------
// Text-editing helpers (char-indexed cursors)
// ---------------------------------------------------------------------------

fn byte_index(text: &str, char_index: usize) -> usize {
    text.char_indices()
        .nth(char_index)
        .map(|(index, _)| index)
        .unwrap_or(text.len())
}

fn insert_at(buffer: &mut String, cursor: &mut usize, insertion: &str) {
    let at = byte_index(buffer, *cursor);
    buffer.insert_str(at, insertion);
    *cursor += insertion.chars().count();
}

fn backspace_at(buffer: &mut String, cursor: &mut usize) {
    if *cursor == 0 {
        return;
    }
    let end = byte_index(buffer, *cursor);
    let start = byte_index(buffer, *cursor - 1);
    buffer.replace_range(start..end, "");
    *cursor -= 1;
}

fn delete_at(buffer: &mut String, cursor: usize) {
    let start = byte_index(buffer, cursor);
    let end = byte_index(buffer, cursor + 1);
    if start < end {
        buffer.replace_range(start..end, "");
    }
}

fn word_left(buffer: &str, cursor: usize) -> usize {
    let chars: Vec<char> = buffer.chars().collect();
    let mut position = cursor.min(chars.len());
    while position > 0 && chars[position - 1].is_whitespace() {
        position -= 1;
    }
    while position > 0 && !chars[position - 1].is_whitespace() {
        position -= 1;
    }
    position
}

fn word_right(buffer: &str, cursor: usize) -> usize {
    let chars: Vec<char> = buffer.chars().collect();
    let mut position = cursor.min(chars.len());
    while position < chars.len() && chars[position].is_whitespace() {
        position += 1;
    }
    while position < chars.len() && !chars[position].is_whitespace() {
        position += 1;
    }
    position
}

fn word_backspace(buffer: &mut String, cursor: &mut usize) {
    let target = word_left(buffer, *cursor);
    let start = byte_index(buffer, target);
    let end = byte_index(buffer, *cursor);
    buffer.replace_range(start..end, "");
    *cursor = target;
}

fn follow_scroll(cursor: usize, scroll: usize, height: usize) -> usize {
    if height == 0 {
        return 0;
    }
    if cursor < scroll {
        cursor
    } else if cursor >= scroll + height {
        cursor + 1 - height
    } else {
        scroll
    }
}

fn commands_list_height(rows: usize) -> usize {
    // logo + blank + search + blank inside the bordered box
    rows.saturating_sub(4).saturating_sub(6).max(1)
}

fn form_list_height(rows: usize) -> usize {
    // header block + search + trailing field-description block
    rows.saturating_sub(4).saturating_sub(9).max(1)
}

fn results_list_height(rows: usize) -> usize {
    rows.saturating_sub(4).saturating_sub(2).max(1)
}

// ---------------------------------------------------------------------------
// Input handlers
// ---------------------------------------------------------------------------

pub fn handle_key(state: &mut AppState, key: &KeyPress) -> Signal {
    match state.view {
        View::Commands => handle_commands_key(state, key),
        View::Form => handle_form_key(state, key),
        View::Loading => Signal::Continue,
        View::Results => handle_results_key(state, key),
    }
}

fn arm_or_exit(state: &mut AppState) -> Signal {
    if state.quit_confirm {
        return Signal::Exit;
    }
    state.quit_confirm = true;
    state.quit_token = state.quit_token.wrapping_add(1);
    Signal::Continue
}

fn handle_commands_key(state: &mut AppState, key: &KeyPress) -> Signal {
    let is_quit_chord = matches!(key.name, KeyName::Escape)
        || (key.ctrl && key.name == KeyName::Char('c'))
        || (!key.ctrl && key.name == KeyName::Char('q') && state.cmd_query.is_empty());
    if state.quit_confirm && !is_quit_chord {
        state.quit_confirm = false;
    }

    match &key.name {
        KeyName::Escape => {
            if state.cmd_query.is_empty() {
                return arm_or_exit(state);
            }
            state.cmd_query.clear();
            state.cmd_query_cursor = 0;
            state.rebuild_command_filter();
        }
        KeyName::Char('c') if key.ctrl => {
            if state.cmd_query.is_empty() {
                return arm_or_exit(state);
            }
            state.cmd_query.clear();
            state.cmd_query_cursor = 0;
            state.rebuild_command_filter();
        }
        KeyName::Char('q') if !key.ctrl && state.cmd_query.is_empty() => {
            return arm_or_exit(state);
        }
        KeyName::Enter => {
            if let Some(tool_index) = state.selected_command() {
                state.select_tool(tool_index);
                if state.fields.is_empty() {
                    return Signal::Submit;
                }
                if let Some(&first_required) = state.unfilled_required().first() {
                    state.advance_to_next_required();
                    open_editor(state, first_required);
                }
            }
        }
        KeyName::Up => {
            state.cmd_cursor = state.cmd_cursor.saturating_sub(1);
            state.cmd_scroll = follow_scroll(
                state.cmd_cursor,
                state.cmd_scroll,
                commands_list_height(state.viewport_rows),
            );
        }
        KeyName::Down => {
            // the last selectable row holds still rather than wrapping
            if state.cmd_cursor + 1 < state.cmd_filtered.len() {
                state.cmd_cursor += 1;
            }
            state.cmd_scroll = follow_scroll(
                state.cmd_cursor,
                state.cmd_scroll,
                commands_list_height(state.viewport_rows),
            );
        }
        KeyName::PageUp => {
            let jump = commands_list_height(state.viewport_rows);
            state.cmd_cursor = state.cmd_cursor.saturating_sub(jump);
            state.cmd_scroll = follow_scroll(state.cmd_cursor, state.cmd_scroll, jump);
        }
        KeyName::PageDown => {
            let jump = commands_list_height(state.viewport_rows);
            state.cmd_cursor = (state.cmd_cursor + jump)
                .min(state.cmd_filtered.len().saturating_sub(1));
            state.cmd_scroll = follow_scroll(state.cmd_cursor, state.cmd_scroll, jump);
        }
        KeyName::Left => state.cmd_query_cursor = state.cmd_query_cursor.saturating_sub(1),
        KeyName::Right => {
            state.cmd_query_cursor =
                (state.cmd_query_cursor + 1).min(state.cmd_query.chars().count());
        }
        KeyName::Home => state.cmd_query_cursor = 0,
        KeyName::End => state.cmd_query_cursor = state.cmd_query.chars().count(),
        KeyName::Backspace => {
            backspace_at(&mut state.cmd_query, &mut state.cmd_query_cursor);
            state.cmd_cursor = 0;
            state.cmd_scroll = 0;
            state.rebuild_command_filter();
        }
        KeyName::WordBackspace => {
            word_backspace(&mut state.cmd_query, &mut state.cmd_query_cursor);
            state.cmd_cursor = 0;
            state.cmd_scroll = 0;
            state.rebuild_command_filter();
        }
        KeyName::WordLeft => {
            state.cmd_query_cursor = word_left(&state.cmd_query, state.cmd_query_cursor);
        }
        KeyName::WordRight => {
            state.cmd_query_cursor = word_right(&state.cmd_query, state.cmd_query_cursor);
        }
        KeyName::Char(ch) if !key.ctrl => {
            let insertion = ch.to_string();
            insert_at(&mut state.cmd_query, &mut state.cmd_query_cursor, &insertion);
            state.cmd_cursor = 0;
            state.cmd_scroll = 0;
            state.rebuild_command_filter();
        }
        KeyName::Paste(text) => {
            let flat = text.replace('\n', " ");
            insert_at(&mut state.cmd_query, &mut state.cmd_query_cursor, &flat);
            state.cmd_cursor = 0;
            state.cmd_scroll = 0;
            state.rebuild_command_filter();
        }
        _ => {}
    }
    Signal::Continue
}

fn handle_form_key(state: &mut AppState, key: &KeyPress) -> Signal {
    if state.editing {
        handle_editor_key(state, key);
        return Signal::Continue;
    }
    handle_palette_key(state, key)
}

fn handle_palette_key(state: &mut AppState, key: &KeyPress) -> Signal {
    match &key.name {
        KeyName::Escape => {
            if !state.form_query.is_empty() {
                state.form_query.clear();
                state.form_query_cursor = 0;
                state.rebuild_form_filter();
            } else if !state.form_stack.is_empty() {
                state.pop_sub_form(false);
            } else {
                state.view = View::Commands;
                state.rebuild_command_filter();
            }
        }
        KeyName::Char('c') if key.ctrl => {
            if !state.form_stack.is_empty() {
                state.pop_sub_form(false);
            } else {
                state.view = View::Commands;
                state.rebuild_command_filter();
            }
        }
        KeyName::Tab => state.jump_next_required(),
        KeyName::Char('o') if !key.ctrl && state.form_query.is_empty() => {
            state.show_optional = !state.show_optional;
            state.rebuild_form_filter();
        }
        KeyName::Enter => {
            if state.on_action_row() {
                if !state.unfilled_required().is_empty() {
                    state.show_required = true;
                } else if !state.form_stack.is_empty() {
                    state.pop_sub_form(true);
                } else {
                    return Signal::Submit;
                }
            } else if let Some(field_index) = state.field_under_cursor() {
                open_editor(state, field_index);
            }
        }
        KeyName::Up => {
            let len = state.form_filtered.len();
            if len > 0 {
                state.form_cursor = (state.form_cursor + len - 1) % len;
                state.form_scroll = follow_scroll(
                    state.form_cursor,
                    state.form_scroll,
                    form_list_height(state.viewport_rows),
                );
            }
        }
        KeyName::Down => {
            let len = state.form_filtered.len();
            if len > 0 {
                state.form_cursor = (state.form_cursor + 1) % len;
                state.form_scroll = follow_scroll(
                    state.form_cursor,
                    state.form_scroll,
                    form_list_height(state.viewport_rows),
                );
            }
        }
        KeyName::PageUp => {
            let jump = form_list_height(state.viewport_rows);
            state.form_cursor = state.form_cursor.saturating_sub(jump);
            state.form_scroll = follow_scroll(state.form_cursor, state.form_scroll, jump);
        }
        KeyName::PageDown => {
            let jump = form_list_height(state.viewport_rows);
            state.form_cursor =
                (state.form_cursor + jump).min(state.form_filtered.len().saturating_sub(1));
            state.form_scroll = follow_scroll(state.form_cursor, state.form_scroll, jump);
        }
        KeyName::Backspace if state.form_query.is_empty() => {
            if let Some(last) = state.last_edited {
                open_editor(state, last);
            }
        }
        KeyName::Backspace => {
            backspace_at(&mut state.form_query, &mut state.form_query_cursor);
            state.rebuild_form_filter();
        }
        KeyName::WordBackspace => {
            word_backspace(&mut state.form_query, &mut state.form_query_cursor);
            state.rebuild_form_filter();
        }
        KeyName::Left => state.form_query_cursor = state.form_query_cursor.saturating_sub(1),
        KeyName::Right => {
            state.form_query_cursor =
                (state.form_query_cursor + 1).min(state.form_query.chars().count());
        }
        KeyName::Char(ch) if !key.ctrl => {
            let insertion = ch.to_string();
            insert_at(
                &mut state.form_query,
                &mut state.form_query_cursor,
                &insertion,
            );
            state.form_cursor = 0;
            state.form_scroll = 0;
            state.rebuild_form_filter();
        }
        KeyName::Paste(text) => {
            let flat = text.replace('\n', " ");
            insert_at(&mut state.form_query, &mut state.form_query_cursor, &flat);
            state.rebuild_form_filter();
        }
        _ => {}
    }
    Signal::Continue
}

/// Seed the editor sub-state for one field from its current draft.
fn open_editor(state: &mut AppState, field_index: usize) {
    let Some(field) = state.fields.get(field_index) else {
        return;
    };
    let kind = field.kind.clone();
    let draft = state.draft(field_index).to_owned();

    state.editing = true;
    state.edit_field = field_index;
    state.input_buf.clear();
    state.input_cursor = 0;
    state.enum_cursor = 0;
    state.enum_selected = BTreeSet::new();
    state.date_parts = None;
    state.list_items.clear();
    state.list_cursor = 0;

    match kind {
        FieldKind::Text | FieldKind::Number => {
            state.input_cursor = draft.chars().count();
            state.input_buf = draft;
        }
        FieldKind::Bool => {
            state.enum_cursor = usize::from(draft == "false");
        }
        FieldKind::Enum(choices) => {
            state.enum_cursor = choices
                .iter()
                .position(|choice| *choice == draft)
                .unwrap_or(0);
        }
        FieldKind::ArrayEnum(choices) => {
            let picked: Vec<&str> = draft.split(',').map(str::trim).collect();
            state.enum_selected = choices
                .iter()
                .enumerate()
                .filter(|(_, choice)| picked.contains(&choice.as_str()))
                .map(|(index, _)| index)
                .collect();
        }
        FieldKind::ArrayText => {
            state.list_items = draft
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_owned)
                .collect();
            state.list_cursor = state.list_items.len();
        }
        FieldKind::Date(fmt) => {
            state.date_parts =
                Some(DateParts::parse(&draft, fmt).unwrap_or_else(|| DateParts::today(fmt)));
        }
        FieldKind::ArrayObj(_) => {
            state.list_cursor = 0;
        }
    }
}

/// Leave editor mode. Palette search resets so the next navigation starts
/// from the full field list; the top-level flow hops to the next unfilled
/// required field so enter-enter-enter walks the form.
fn close_editor(state: &mut AppState, advance: bool) {
    state.editing = false;
    state.form_query.clear();
    state.form_query_cursor = 0;
    state.rebuild_form_filter();
    if advance && state.form_stack.is_empty() {
        state.advance_to_next_required();
    }
}

fn handle_editor_key(state: &mut AppState, key: &KeyPress) {
    let Some(field) = state.fields.get(state.edit_field) else {
        state.editing = false;
        return;
    };
    match field.kind.clone() {
        FieldKind::Text | FieldKind::Number => handle_text_editor_key(state, key),
        FieldKind::Bool => {
            handle_choice_editor_key(state, key, &["true".to_owned(), "false".to_owned()]);
        }
        FieldKind::Enum(choices) => handle_choice_editor_key(state, key, &choices),
        FieldKind::ArrayEnum(choices) => handle_multi_editor_key(state, key, &choices),
        FieldKind::ArrayText => handle_list_editor_key(state, key),
        FieldKind::Date(_) => handle_date_editor_key(state, key),
        FieldKind::ArrayObj(_) => handle_items_editor_key(state, key),
    }
}

fn handle_text_editor_key(state: &mut AppState, key: &KeyPress) {
    match &key.name {
        KeyName::Enter if key.shift => {
            insert_at(&mut state.input_buf, &mut state.input_cursor, "\n");
        }
        KeyName::Enter => {
            let draft = state.input_buf.clone();
            state.set_draft(state.edit_field, draft);
            close_editor(state, true);
        }
        KeyName::Escape => close_editor(state, false),
        KeyName::Backspace => backspace_at(&mut state.input_buf, &mut state.input_cursor),
        KeyName::WordBackspace => word_backspace(&mut state.input_buf, &mut state.input_cursor),
        KeyName::Delete => delete_at(&mut state.input_buf, state.input_cursor),
        KeyName::Left => state.input_cursor = state.input_cursor.saturating_sub(1),
        KeyName::Right => {
            state.input_cursor = (state.input_cursor + 1).min(state.input_buf.chars().count());
        }
        KeyName::WordLeft => state.input_cursor = word_left(&state.input_buf, state.input_cursor),
        KeyName::WordRight => state.input_cursor = word_right(&state.input_buf, state.input_cursor),
        KeyName::Home => state.input_cursor = 0,
        KeyName::End => state.input_cursor = state.input_buf.chars().count(),
        KeyName::Char(ch) if !key.ctrl => {
            let insertion = ch.to_string();
            insert_at(&mut state.input_buf, &mut state.input_cursor, &insertion);
        }
        KeyName::Paste(text) => {
            let text = text.clone();
            insert_at(&mut state.input_buf, &mut state.input_cursor, &text);
        }
        _ => {}
    }
}

fn handle_choice_editor_key(state: &mut AppState, key: &KeyPress, choices: &[String]) {
    match key.name {
        KeyName::Up => state.enum_cursor = state.enum_cursor.saturating_sub(1),
        KeyName::Down => {
            state.enum_cursor = (state.enum_cursor + 1).min(choices.len().saturating_sub(1));
        }
        KeyName::Enter => {
            if let Some(choice) = choices.get(state.enum_cursor) {
                let choice = choice.clone();
                state.set_draft(state.edit_field, choice);
            }
            close_editor(state, true);
        }
        KeyName::Escape => close_editor(state, false),
        _ => {}
    }
}

fn write_multi_draft(state: &mut AppState, choices: &[String]) {
    let draft = state
        .enum_selected
        .iter()
        .filter_map(|&index| choices.get(index))
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    state.set_draft(state.edit_field, draft);
}

/// Multi-select edits are live: space rewrites the draft immediately, so
/// escape is a confirm too.
fn handle_multi_editor_key(state: &mut AppState, key: &KeyPress, choices: &[String]) {
    match key.name {
        KeyName::Up => state.enum_cursor = state.enum_cursor.saturating_sub(1),
        KeyName::Down => {
            state.enum_cursor = (state.enum_cursor + 1).min(choices.len().saturating_sub(1));
        }
        KeyName::Char(' ') => {
            if state.enum_selected.contains(&state.enum_cursor) {
                state.enum_selected.remove(&state.enum_cursor);
            } else {
                state.enum_selected.insert(state.enum_cursor);
            }
            write_multi_draft(state, choices);
        }
        KeyName::Enter => {
            state.enum_selected.insert(state.enum_cursor);
            write_multi_draft(state, choices);
            close_editor(state, true);
        }
        KeyName::Escape => {
            write_multi_draft(state, choices);
            close_editor(state, true);
        }
        _ => {}
    }
}

fn write_list_draft(state: &mut AppState) {
    let draft = state.list_items.join(", ");
    state.set_draft(state.edit_field, draft);
}

fn handle_list_editor_key(state: &mut AppState, key: &KeyPress) {
    let on_input = state.list_cursor >= state.list_items.len();
    match &key.name {
        KeyName::Up => state.list_cursor = state.list_cursor.saturating_sub(1),
        KeyName::Down => {
            state.list_cursor = (state.list_cursor + 1).min(state.list_items.len());
        }
        KeyName::Enter if on_input => {
            let pending = state.input_buf.trim().to_owned();
            if pending.is_empty() {
                write_list_draft(state);
                close_editor(state, true);
            } else {
                state.list_items.push(pending);
                state.input_buf.clear();
                state.input_cursor = 0;
                state.list_cursor = state.list_items.len();
                write_list_draft(state);
            }
        }
        KeyName::Enter => {
            // pull the item back into the input for re-editing
            let item = state.list_items.remove(state.list_cursor);
            state.input_cursor = item.chars().count();
            state.input_buf = item;
            state.list_cursor = state.list_items.len();
            write_list_draft(state);
        }
        KeyName::Backspace if !on_input => {
            state.list_items.remove(state.list_cursor);
            state.list_cursor = state.list_cursor.min(state.list_items.len());
            write_list_draft(state);
        }
        KeyName::Backspace => backspace_at(&mut state.input_buf, &mut state.input_cursor),
        KeyName::WordBackspace if on_input => {
            word_backspace(&mut state.input_buf, &mut state.input_cursor);
        }
        KeyName::Escape => {
            let pending = state.input_buf.trim().to_owned();
            if !pending.is_empty() {
                state.list_items.push(pending);
            }
            write_list_draft(state);
            close_editor(state, true);
        }
        KeyName::Left if on_input => state.input_cursor = state.input_cursor.saturating_sub(1),
        KeyName::Right if on_input => {
            state.input_cursor = (state.input_cursor + 1).min(state.input_buf.chars().count());
        }
        KeyName::Char(ch) if on_input && !key.ctrl => {
            let insertion = ch.to_string();
            insert_at(&mut state.input_buf, &mut state.input_cursor, &insertion);
        }
        KeyName::Paste(text) if on_input => {
            let flat = text.replace('\n', ", ");
            insert_at(&mut state.input_buf, &mut state.input_cursor, &flat);
        }
        _ => {}
    }
}

fn handle_date_editor_key(state: &mut AppState, key: &KeyPress) {
    match key.name {
        KeyName::Left => {
            if let Some(parts) = state.date_parts.as_mut() {
                parts.move_cursor(-1);
            }
        }
        KeyName::Right => {
            if let Some(parts) = state.date_parts.as_mut() {
                parts.move_cursor(1);
            }
        }
        KeyName::Up => {
            if let Some(parts) = state.date_parts.as_mut() {
                parts.adjust(1);
            }
        }
        KeyName::Down => {
            if let Some(parts) = state.date_parts.as_mut() {
                parts.adjust(-1);
            }
        }
        KeyName::Char('t') => {
            if let Some(parts) = &state.date_parts {
                state.date_parts = Some(DateParts::today(parts.fmt));
            }
        }
        KeyName::Backspace => {
            state.set_draft(state.edit_field, String::new());
            close_editor(state, false);
        }
        KeyName::Enter => {
            if let Some(parts) = &state.date_parts {
                let draft = parts.to_draft();
                state.set_draft(state.edit_field, draft);
            }
            close_editor(state, true);
        }
        KeyName::Escape => close_editor(state, false),
        _ => {}
    }
}

/// ArrayObj browser: existing items plus an "Add new item" row; enter
/// descends into a sub-form, backspace deletes in place.
fn handle_items_editor_key(state: &mut AppState, key: &KeyPress) {
    let items = parse_array_draft(state.draft(state.edit_field));
    match key.name {
        KeyName::Up => state.list_cursor = state.list_cursor.saturating_sub(1),
        KeyName::Down => state.list_cursor = (state.list_cursor + 1).min(items.len()),
        KeyName::Enter => {
            let field_index = state.edit_field;
            let edit_index = if state.list_cursor < items.len() {
                state.list_cursor as isize
            } else {
                -1
            };
            state.push_sub_form(field_index, edit_index);
        }
        KeyName::Backspace => {
            if state.list_cursor < items.len() {
                let mut items = items;
                items.remove(state.list_cursor);
                let remaining = items.len();
                let draft = if items.is_empty() {
                    String::new()
                } else {
                    Value::Array(items).to_string()
                };
                state.set_draft(state.edit_field, draft);
                state.list_cursor = state.list_cursor.min(remaining);
            }
        }
        KeyName::Escape => close_editor(state, false),
        _ => {}
    }
}

fn handle_results_key(state: &mut AppState, key: &KeyPress) -> Signal {
    let is_quit_chord =
        (!key.ctrl && key.name == KeyName::Char('q')) || (key.ctrl && key.name == KeyName::Char('c'));
    if state.quit_confirm && !is_quit_chord {
        state.quit_confirm = false;
    }

    match key.name {
        KeyName::Char('q') if !key.ctrl => return arm_or_exit(state),
        KeyName::Char('c') if key.ctrl => return arm_or_exit(state),
        KeyName::Escape | KeyName::Enter => {
            let back_to_form = !state.fields.is_empty()
                && (state.result != RunOutput::None || state.error.is_some());
            state.result = RunOutput::None;
            state.error = None;
            state.result_scroll = 0;
            state.result_scroll_x = 0;
            if back_to_form {
                state.view = View::Form;
                state.rebuild_form_filter();
            } else {
                state.view = View::Commands;
                state.rebuild_command_filter();
            }
        }
        KeyName::Up => state.result_scroll = state.result_scroll.saturating_sub(1),
        KeyName::Down => {
            let max = result_lines(state)
                .len()
                .saturating_sub(results_list_height(state.viewport_rows));
            state.result_scroll = (state.result_scroll + 1).min(max);
        }
        KeyName::PageUp => {
            state.result_scroll = state
                .result_scroll
                .saturating_sub(results_list_height(state.viewport_rows));
        }
        KeyName::PageDown => {
            let page = results_list_height(state.viewport_rows);
            let max = result_lines(state).len().saturating_sub(page);
            state.result_scroll = (state.result_scroll + page).min(max);
        }
        KeyName::Left => state.result_scroll_x = state.result_scroll_x.saturating_sub(HSCROLL_STEP),
        KeyName::Right => {
            let widest = result_lines(state)
                .iter()
                .map(|line| visible_width(line))
                .max()
                .unwrap_or(0);
            state.result_scroll_x = (state.result_scroll_x + HSCROLL_STEP)
                .min(widest.saturating_sub(1));
        }
        _ => {}
    }
    Signal::Continue
}

// ---------------------------------------------------------------------------
// Renderers
// ---------------------------------------------------------------------------

pub fn render(state: &AppState, cols: usize, rows: usize) -> Vec<String> {
    match state.view {
        View::Commands => render_commands(state, cols, rows),
        View::Form => render_form(state, cols, rows),
        View::Loading => render_loading(state, cols, rows),
        View::Results => render_results(state, cols, rows),
    }
}

fn breadcrumb(state: &AppState) -> String {
    let mut trail = vec![bold("wisedeck")];
    if let Some(tool_index) = state.selected_tool
        && state.view != View::Commands
    {
        trail.push(state.tools[tool_index].name.clone());
        for entry in &state.form_stack {
            trail.push(entry.field_name.clone());
        }
    }
    match state.view {
        View::Loading => trail.push("running".to_owned()),
        View::Results => trail.push("result".to_owned()),
        _ => {}
    }
    format!(" {}", trail.join(&dim(" › ")))
}

fn input_line(text: &str, cursor: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let cursor = cursor.min(chars.len());
    let before: String = chars[..cursor].iter().collect();
    let at: String = chars
        .get(cursor)
        .map(|ch| ch.to_string())
        .unwrap_or_else(|| " ".to_owned());
    let after: String = chars[(cursor + 1).min(chars.len())..].iter().collect();
    format!("{before}{REVERSE}{at}{RESET}{after}")
}

fn render_commands(state: &AppState, cols: usize, rows: usize) -> Vec<String> {
    let inner = cols.saturating_sub(5);
    let mut content = Vec::new();
    content.push(format!(
        "{} {}",
        bold("◆ wisedeck"),
        dim(&format!("v{}", env!("CARGO_PKG_VERSION"))),
    ));
    content.push(dim("your Readwise library, one palette away"));
    content.push(String::new());
    content.push(format!("❯ {}", input_line(&state.cmd_query, state.cmd_query_cursor)));
    content.push(String::new());

    let height = commands_list_height(rows);
    content.extend(command_list_lines(state, inner, height));

    let footer = if state.quit_confirm {
        format!(" {}", yellow("Press again to quit"))
    } else {
        format!(" {}", dim("↑↓ navigate · enter select · esc quit"))
    };
    render_layout(&breadcrumb(state), &content, &footer, cols, rows)
}

fn command_list_lines(state: &AppState, inner: usize, height: usize) -> Vec<String> {
    let mut lines = Vec::new();
    if state.cmd_filtered.is_empty() {
        lines.push(dim("(no matching commands)"));
        return lines;
    }

    let name_pad = state
        .cmd_filtered
        .iter()
        .map(|&index| state.tools[index].name.width())
        .max()
        .unwrap_or(0);

    let start = state
        .cmd_scroll
        .min(state.cmd_filtered.len().saturating_sub(1));
    let start = follow_scroll(state.cmd_cursor, start, height);
    let mut budget = height;
    let mut shown = 0usize;
    let mut previous_group: Option<CommandGroup> = None;
    if start > 0 {
        previous_group = Some(state.tools[state.cmd_filtered[start - 1]].group());
    }

    for (position, &tool_index) in state.cmd_filtered.iter().enumerate().skip(start) {
        if budget == 0 {
            break;
        }
        let tool = &state.tools[tool_index];
        let group = tool.group();
        if state.group_commands && previous_group != Some(group) {
            if budget == 1 {
                break;
            }
            lines.push(dim(&format!(
                "── {} {}",
                group.label(),
                "─".repeat(inner.saturating_sub(group.label().width() + 4)),
            )));
            budget -= 1;
            previous_group = Some(group);
        }
        if budget == 0 {
            break;
        }
        let selected = position == state.cmd_cursor;
        let marker = if selected { "❯ " } else { "  " };
        let description = tool.description.as_deref().unwrap_or("");
        let label = format!("{:<name_pad$}", tool.name);
        let label = if selected { bold(&label) } else { label };
        let line = format!("{marker}{label}  {}", dim(description));
        lines.push(truncate_row(&line, inner));
        budget -= 1;
        shown = position + 1;
    }

    let hidden = state.cmd_filtered.len().saturating_sub(shown);
    if hidden > 0 {
        lines.push(dim(&format!("({hidden} more)")));
    }
    lines
}

fn truncate_row(line: &str, inner: usize) -> String {
    if visible_width(line) <= inner {
        line.to_owned()
    } else {
        fit_width(line, inner).trim_end().to_owned()
    }
}

fn render_form(state: &AppState, cols: usize, rows: usize) -> Vec<String> {
    if state.editing {
        render_editor(state, cols, rows)
    } else {
        render_palette(state, cols, rows)
    }
}

fn form_header(state: &AppState) -> Vec<String> {
    let mut lines = Vec::new();
    let Some(tool_index) = state.selected_tool else {
        return lines;
    };
    let tool = &state.tools[tool_index];
    if state.form_stack.is_empty() {
        lines.push(bold(&tool.name));
        if let Some(description) = &tool.description {
            lines.push(dim(&description.replace('\n', " ")));
        }
    } else {
        let entry = &state.form_stack[state.form_stack.len() - 1];
        let mode = if entry.edit_index < 0 { "new" } else { "edit" };
        lines.push(bold(&format!("{} › {} ({mode} item)", tool.name, entry.field_name)));
    }

    let (set, total) = wisedeck_app::required_progress(&state.fields, &state.values);
    if total > 0 {
        let progress = if set == total {
            green(&format!("✓ {set} of {total} required"))
        } else if state.show_required {
            red(&format!("{set} of {total} required"))
        } else {
            format!("{set} of {total} required")
        };
        lines.push(progress);
    }
    lines
}

fn render_palette(state: &AppState, cols: usize, rows: usize) -> Vec<String> {
    let inner = cols.saturating_sub(5);
    let mut content = form_header(state);
    content.push(String::new());

    let searching = !state.form_query.is_empty();
    if state.fields.len() > FORM_SEARCH_THRESHOLD || searching {
        content.push(format!(
            "❯ {}",
            input_line(&state.form_query, state.form_query_cursor)
        ));
        content.push(String::new());
    }

    let height = form_list_height(rows);
    content.extend(palette_list_lines(state, inner, height));

    // description and first example of the highlighted field
    content.push(String::new());
    if let Some(field_index) = state.field_under_cursor()
        && let Some(field) = state.fields.get(field_index)
    {
        if let Some(description) = &field.description {
            for line in wrap_text(description, inner).into_iter().take(2) {
                content.push(dim(&line));
            }
        }
        if let Some(example) = field.first_example() {
            content.push(dim(&format!("e.g. {example}")));
        }
    }

    let footer = format!(
        " {}",
        dim("enter edit · tab next required · o optional · esc back")
    );
    render_layout(&breadcrumb(state), &content, &footer, cols, rows)
}

fn palette_list_lines(state: &AppState, inner: usize, height: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let searching = !state.form_query.is_empty();
    let name_pad = state
        .form_filtered
        .iter()
        .filter(|&&entry| entry >= 0)
        .filter_map(|&entry| state.fields.get(entry as usize))
        .map(|field| field.name.width() + 1)
        .max()
        .unwrap_or(8);

    let optional_total = state.fields.iter().filter(|field| !field.required).count();
    let optional_set = state
        .fields
        .iter()
        .enumerate()
        .filter(|(index, field)| !field.required && !state.is_field_unset(*index))
        .count();

    let start = follow_scroll(
        state.form_cursor,
        state
            .form_scroll
            .min(state.form_filtered.len().saturating_sub(1)),
        height,
    );
    let mut budget = height;
    let mut separator_emitted = start > 0;

    for (position, &entry) in state.form_filtered.iter().enumerate().skip(start) {
        if budget == 0 {
            break;
        }
        let selected = position == state.form_cursor;
        let marker = if selected { "❯ " } else { "  " };

        if entry == ACTION_ROW {
            // collapsed-optional hint sits just above the action row
            if !searching && !state.show_optional && optional_total > 0 && budget > 1 {
                lines.push(dim(&format!(
                    "── {optional_total} optional ({optional_set} set) · 'o' to show ──"
                )));
                budget -= 1;
            }
            let label = state.action_label();
            let line = if selected {
                format!("{marker}{}", bold(&format!("▶ {label}")))
            } else {
                format!("{marker}▶ {label}")
            };
            lines.push(line);
            budget -= 1;
            continue;
        }

        let field_index = entry as usize;
        let Some(field) = state.fields.get(field_index) else {
            continue;
        };
        if !searching && state.show_optional && !field.required && !separator_emitted {
            if budget == 1 {
                break;
            }
            lines.push(dim(&format!(
                "── {optional_total} optional ({optional_set} set) · 'o' to hide ──"
            )));
            budget -= 1;
            separator_emitted = true;
        }

        let unset = state.is_field_unset(field_index);
        let star = if field.required && unset {
            red("*")
        } else if field.required {
            green("*")
        } else {
            " ".to_owned()
        };
        let badge = field.kind.badge();
        let preview_width = inner
            .saturating_sub(2 + name_pad + 2 + badge.width() + 4)
            .max(4);
        let preview = value_preview(state.draft(field_index), preview_width);
        let name = format!("{:<width$}", field.name, width = name_pad.saturating_sub(1));
        let name = if selected { bold(&name) } else { name };
        lines.push(truncate_row(
            &format!("{marker}{name}{star}  {preview}  {}", dim(&format!("({badge})"))),
            inner,
        ));
        budget -= 1;
    }
    lines
}

/// Compressed one-line rendering of a draft for the palette row.
pub fn value_preview(draft: &str, width: usize) -> String {
    let trimmed = draft.trim();
    if trimmed.is_empty() {
        return dim(EN_DASH);
    }
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(trimmed) {
        let noun = if items.len() == 1 { "item" } else { "items" };
        return format!("[{} {noun}]", items.len());
    }
    let mut lines = trimmed.lines();
    let first = lines.next().unwrap_or("");
    let extra = lines.count();
    if extra > 0 {
        let head = truncate_ellipsis(first, width.saturating_sub(10).max(4));
        return format!("{head} {}", dim(&format!("[+{extra} lines]")));
    }
    truncate_ellipsis(first, width)
}

fn render_editor(state: &AppState, cols: usize, rows: usize) -> Vec<String> {
    let inner = cols.saturating_sub(5);
    let Some(field) = state.fields.get(state.edit_field) else {
        return render_palette(state, cols, rows);
    };

    let mut content = form_header(state);
    content.push(String::new());
    content.push(format!(
        "{} {}",
        bold(&field.name),
        dim(&format!("({})", field.kind.badge())),
    ));
    if let Some(description) = &field.description {
        for line in wrap_text(description, inner).into_iter().take(2) {
            content.push(dim(&line));
        }
    }
    content.push(String::new());

    let footer_hint = match &field.kind {
        FieldKind::Text | FieldKind::Number => {
            render_text_editor(state, field, &mut content);
            "enter confirm · shift+enter newline · esc cancel"
        }
        FieldKind::Bool => {
            render_choice_editor(state, &["true".to_owned(), "false".to_owned()], &mut content);
            "↑↓ choose · enter confirm · esc cancel"
        }
        FieldKind::Enum(choices) => {
            render_choice_editor(state, choices, &mut content);
            "↑↓ choose · enter confirm · esc cancel"
        }
        FieldKind::ArrayEnum(choices) => {
            render_multi_editor(state, choices, &mut content);
            "space toggle · enter confirm · esc done"
        }
        FieldKind::ArrayText => {
            render_list_editor(state, &mut content);
            "enter add/re-edit · backspace remove · esc done"
        }
        FieldKind::Date(_) => {
            render_date_editor(state, &mut content);
            "←→ part · ↑↓ adjust · t today · backspace clear · enter confirm"
        }
        FieldKind::ArrayObj(_) => {
            render_items_editor(state, inner, &mut content);
            "enter open · backspace delete · esc done"
        }
    };

    let footer = format!(" {}", dim(footer_hint));
    render_layout(&breadcrumb(state), &content, &footer, cols, rows)
}

fn editor_placeholder(field: &wisedeck_app::FormField) -> String {
    if let Some(example) = field.first_example() {
        return example.to_owned();
    }
    if let Some(description) = &field.description {
        return description.replace('\n', " ");
    }
    match field.kind {
        FieldKind::Number => "enter a number".to_owned(),
        _ => "type a value".to_owned(),
    }
}

fn render_text_editor(state: &AppState, field: &wisedeck_app::FormField, content: &mut Vec<String>) {
    if state.input_buf.is_empty() {
        content.push(format!(
            "❯ {REVERSE} {RESET}{}",
            dim(&editor_placeholder(field))
        ));
        return;
    }
    // the cursor lives on exactly one of possibly several lines
    let chars_before: usize = state.input_cursor;
    let mut consumed = 0usize;
    let mut cursor_placed = false;
    for (index, line) in state.input_buf.split('\n').enumerate() {
        let line_chars = line.chars().count();
        let prefix = if index == 0 { "❯ " } else { "  " };
        if !cursor_placed && chars_before >= consumed && chars_before <= consumed + line_chars {
            content.push(format!("{prefix}{}", input_line(line, chars_before - consumed)));
            cursor_placed = true;
        } else {
            content.push(format!("{prefix}{line}"));
        }
        consumed += line_chars + 1;
    }
}

fn render_choice_editor(state: &AppState, choices: &[String], content: &mut Vec<String>) {
    for (index, choice) in choices.iter().enumerate() {
        if index == state.enum_cursor {
            content.push(format!("❯ {}", bold(choice)));
        } else {
            content.push(format!("  {choice}"));
        }
    }
}

fn render_multi_editor(state: &AppState, choices: &[String], content: &mut Vec<String>) {
    for (index, choice) in choices.iter().enumerate() {
        let mark = if state.enum_selected.contains(&index) {
            green("[x]")
        } else {
            "[ ]".to_owned()
        };
        if index == state.enum_cursor {
            content.push(format!("❯ {mark} {}", bold(choice)));
        } else {
            content.push(format!("  {mark} {choice}"));
        }
    }
}

fn render_list_editor(state: &AppState, content: &mut Vec<String>) {
    for (index, item) in state.list_items.iter().enumerate() {
        let marker = if index == state.list_cursor { "❯ " } else { "  " };
        content.push(format!("{marker}• {item}"));
    }
    let on_input = state.list_cursor >= state.list_items.len();
    let marker = if on_input { "❯ " } else { "  " };
    if state.input_buf.is_empty() && !on_input {
        content.push(format!("{marker}{}", dim("add…")));
    } else {
        content.push(format!(
            "{marker}add: {}",
            input_line(&state.input_buf, state.input_cursor)
        ));
    }
}

fn render_date_editor(state: &AppState, content: &mut Vec<String>) {
    let Some(parts) = &state.date_parts else {
        return;
    };
    let rendered: Vec<String> = parts
        .parts
        .iter()
        .enumerate()
        .map(|(index, part)| {
            let text = if index == 0 {
                format!("{part:04}")
            } else {
                format!("{part:02}")
            };
            if index == parts.cursor {
                format!("{REVERSE}{text}{RESET}")
            } else {
                text
            }
        })
        .collect();
    let line = match parts.fmt {
        DateFmt::Day => format!("{}-{}-{}", rendered[0], rendered[1], rendered[2]),
        DateFmt::Minute => format!(
            "{}-{}-{} {}:{}",
            rendered[0], rendered[1], rendered[2], rendered[3], rendered[4],
        ),
    };
    content.push(format!("❯ {line}"));
}

/// One row per existing item, summarized by its populated keys, plus the
/// add row.
fn render_items_editor(state: &AppState, inner: usize, content: &mut Vec<String>) {
    let items = parse_array_draft(state.draft(state.edit_field));
    for (index, item) in items.iter().enumerate() {
        let marker = if index == state.list_cursor { "❯ " } else { "  " };
        content.push(truncate_row(
            &format!("{marker}{}", summarize_item(item)),
            inner,
        ));
    }
    let on_add = state.list_cursor >= items.len();
    let marker = if on_add { "❯ " } else { "  " };
    content.push(format!("{marker}{}", dim("+ Add new item")));
}

pub fn summarize_item(item: &Value) -> String {
    let Value::Object(map) = item else {
        return item.to_string();
    };
    let parts: Vec<String> = map
        .iter()
        .filter(|(_, value)| match value {
            Value::Null => false,
            Value::String(text) => !text.is_empty(),
            _ => true,
        })
        .map(|(key, value)| {
            let rendered = match value.as_str() {
                Some(text) => text.to_owned(),
                None => value.to_string(),
            };
            format!("{key}: {}", truncate_ellipsis(&rendered, 24))
        })
        .collect();
    if parts.is_empty() {
        dim("(empty item)")
    } else {
        parts.join(", ")
    }
}

fn render_loading(state: &AppState, cols: usize, rows: usize) -> Vec<String> {
    let frame = SPINNER_FRAMES[(state.spinner_frame % SPINNER_FRAMES.len() as u64) as usize];
    let messages = shuffled_messages();
    let message =
        messages[((state.spinner_frame / FRAMES_PER_MESSAGE) % messages.len() as u64) as usize];

    let mut content = Vec::new();
    let top_pad = rows.saturating_sub(4).saturating_sub(3) / 2;
    for _ in 0..top_pad {
        content.push(String::new());
    }
    content.push(format!("{} {}", cyan(frame), message));
    content.push(String::new());
    content.push(dim("waiting on the service, hang tight"));

    let footer = format!(" {}", dim("…"));
    render_layout(&breadcrumb(state), &content, &footer, cols, rows)
}

fn result_lines(state: &AppState) -> Vec<String> {
    if let Some(error) = &state.error {
        return wrap_text(error, state.viewport_cols.saturating_sub(5).max(8))
            .into_iter()
            .map(|line| red(&line))
            .collect();
    }
    match &state.result {
        RunOutput::Json(value) => render_json(value),
        RunOutput::Text(text) => text.lines().map(str::to_owned).collect(),
        RunOutput::None | RunOutput::Empty => Vec::new(),
    }
}

const OK_GLYPH: [&str; 5] = [
    "   ██████   ██   ██",
    "  ██    ██  ██  ██ ",
    "  ██    ██  █████  ",
    "  ██    ██  ██  ██ ",
    "   ██████   ██   ██",
];

const GHOST_GLYPH: [&str; 5] = [
    "   .-----.  ",
    "  / o   o \\ ",
    "  |   ⌣   | ",
    "  |       | ",
    "  '~'~'~'~' ",
];

fn render_results(state: &AppState, cols: usize, rows: usize) -> Vec<String> {
    let mut content = Vec::new();
    let footer_text;

    if state.error.is_none() && state.result == RunOutput::None {
        for line in OK_GLYPH {
            content.push(green(line));
        }
        content.push(String::new());
        content.push("Done.".to_owned());
        footer_text = "enter back · q quit";
    } else if state.error.is_none() && state.result == RunOutput::Empty {
        for line in GHOST_GLYPH {
            content.push(dim(line));
        }
        content.push(String::new());
        content.push(bold("No results found"));
        content.push(dim("try loosening a filter or two"));
        footer_text = "esc back · q quit";
    } else {
        let lines = result_lines(state);
        let height = results_list_height(rows);
        let total = lines.len();
        let first = state.result_scroll.min(total.saturating_sub(1));
        let last = (first + height).min(total);
        if total > height {
            content.push(dim(&format!("({}–{} of {})", first + 1, last, total)));
        } else if state.error.is_some() {
            content.push(red("Error"));
        } else {
            content.push(String::new());
        }
        content.push(String::new());
        for line in &lines[first..last] {
            content.push(ansi_slice(line, state.result_scroll_x));
        }
        footer_text = "↑↓ scroll · ←→ pan · esc back · q quit";
    }

    let footer = if state.quit_confirm {
        format!(" {}", yellow("Press again to quit"))
    } else {
        format!(" {}", dim(footer_text))
    };
    render_layout(&breadcrumb(state), &content, &footer, cols, rows)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::{
        InternalEvent, KeyName, KeyPress, Signal, ToolResult, ansi_slice, apply_outcome,
        begin_invocation, fit_width, handle_key, is_empty_list_result, map_event,
        process_internal_events, render, render_json, render_layout, strip_ansi, summarize_item,
        value_preview, visible_width, wrap_text, AppRuntime, BOLD, DIM, GREEN, RESET,
    };
    use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
    use serde_json::{Map, Value, json};
    use std::sync::mpsc::{self, Sender};
    use wisedeck_app::{AppState, RunOutput, View};

    fn key(name: KeyName) -> KeyPress {
        KeyPress::plain(name)
    }

    fn type_str(state: &mut AppState, text: &str) {
        for ch in text.chars() {
            assert_eq!(handle_key(state, &KeyPress::ch(ch)), Signal::Continue);
        }
    }

    fn catalog() -> Vec<wisedeck_app::ToolDef> {
        serde_json::from_value(json!([
            {
                "name": "reader_create_document",
                "description": "Save a document to Reader",
                "inputSchema": {
                    "properties": {
                        "url": {"type": "string", "examples": ["https://example.com"]},
                        "tags": {"type": "array", "items": {"type": "string"}},
                        "category": {"type": "string",
                                     "enum": ["article", "email", "pdf"]},
                        "published_date": {"type": "string", "format": "date"},
                        "highlights": {"type": "array", "items": {
                            "type": "object",
                            "properties": {
                                "text": {"type": "string"},
                                "note": {"type": "string"}
                            },
                            "required": ["text"]
                        }},
                        "category_in": {"type": "array",
                                        "items": {"enum": ["article", "email", "pdf"]}}
                    },
                    "required": ["url"]
                }
            },
            {"name": "readwise_list_tags", "description": "List every tag"},
            {"name": "zz_ping"}
        ]))
        .expect("catalog should decode")
    }

    fn form_state() -> AppState {
        let mut state = AppState::new(catalog());
        state.select_tool(0);
        state
    }

    fn field_index(state: &AppState, name: &str) -> usize {
        state
            .fields
            .iter()
            .position(|field| field.name == name)
            .expect("field should exist")
    }

    fn open_field(state: &mut AppState, name: &str) {
        let index = field_index(state, name);
        super::open_editor(state, index);
    }

    #[derive(Default)]
    struct TestRuntime {
        calls: Vec<(u64, String, Map<String, Value>)>,
        reply: Option<Result<ToolResult, String>>,
    }

    impl AppRuntime for TestRuntime {
        fn list_catalog(&mut self) -> anyhow::Result<Vec<wisedeck_app::ToolDef>> {
            Ok(catalog())
        }

        fn spawn_tool_call(
            &mut self,
            request_id: u64,
            name: &str,
            arguments: Map<String, Value>,
            tx: Sender<InternalEvent>,
        ) {
            self.calls.push((request_id, name.to_owned(), arguments));
            if let Some(outcome) = self.reply.clone() {
                let _ = tx.send(InternalEvent::ToolFinished {
                    request_id,
                    outcome,
                });
            }
        }
    }

    // -- ANSI utilities ----------------------------------------------------

    #[test]
    fn strip_ansi_removes_sgr_and_keeps_text() {
        let styled = format!("{BOLD}hi{RESET} there");
        assert_eq!(strip_ansi(&styled), "hi there");
        assert_eq!(visible_width(&styled), 8);
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn ansi_slice_keeps_styling_across_the_boundary() {
        let styled = format!("{GREEN}abcdef{RESET}");
        let sliced = ansi_slice(&styled, 3);
        assert_eq!(strip_ansi(&sliced), "def");
        assert!(sliced.starts_with(GREEN), "style lost: {sliced:?}");
    }

    #[test]
    fn ansi_slice_width_property() {
        let styled = format!("ab{DIM}cdefg{RESET}hij");
        for offset in 0..=12 {
            let expected = visible_width(&styled).saturating_sub(offset);
            assert_eq!(
                visible_width(&ansi_slice(&styled, offset)),
                expected,
                "offset {offset}"
            );
        }
    }

    #[test]
    fn fit_width_is_exact_for_truncate_and_pad() {
        assert_eq!(fit_width("hello", 3), "hel");
        assert_eq!(fit_width("hi", 5), "hi   ");
        assert_eq!(fit_width("", 4), "    ");
        let styled = format!("{BOLD}hello{RESET}");
        let fitted = fit_width(&styled, 3);
        assert_eq!(visible_width(&fitted), 3);
        assert!(fitted.contains(RESET), "trailing reset dropped: {fitted:?}");
        for width in 0..10 {
            assert_eq!(visible_width(&fit_width("wisedeck", width)), width);
        }
    }

    #[test]
    fn wrap_text_collapses_whitespace_and_never_returns_zero_lines() {
        assert_eq!(wrap_text("", 10), vec![String::new()]);
        assert_eq!(
            wrap_text("one  two   three", 8),
            vec!["one two".to_owned(), "three".to_owned()]
        );
        let wrapped = wrap_text("reallylongunbrokenword", 6);
        assert!(wrapped.iter().all(|line| line.len() <= 6));
        assert_eq!(wrapped.join(""), "reallylongunbrokenword");
    }

    // -- layout ------------------------------------------------------------

    #[test]
    fn layout_emits_exactly_rows_lines() {
        let content = vec!["a".to_owned(), "b".to_owned()];
        for rows in [1usize, 2, 3, 4, 5, 10, 24] {
            let lines = render_layout("crumb", &content, "footer", 40, rows);
            assert_eq!(lines.len(), rows, "rows {rows}");
            for line in &lines {
                assert!(visible_width(line) <= 40);
            }
        }
    }

    #[test]
    fn layout_survives_one_by_one_terminal() {
        let lines = render_layout("crumb", &[], "footer", 1, 1);
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn layout_pads_and_truncates_content_rows() {
        let lines = render_layout("", &["hi".to_owned()], "", 20, 8);
        assert!(lines[1].starts_with('╭'));
        assert!(lines[6].starts_with('╰'));
        assert_eq!(lines[2], format!("│ {} │", fit_width("hi", 15)));
        assert_eq!(lines[3], format!("│ {} │", fit_width("", 15)));
    }

    // -- key decoding --------------------------------------------------------

    #[test]
    fn enter_variants_map_to_shift_return() {
        let kitty = map_event(Event::Key(KeyEvent::new(
            KeyCode::Enter,
            KeyModifiers::SHIFT,
        )))
        .expect("key expected");
        assert_eq!(kitty.name, KeyName::Enter);
        assert!(kitty.shift);

        let alt = map_event(Event::Key(KeyEvent::new(KeyCode::Enter, KeyModifiers::ALT)))
            .expect("key expected");
        assert!(alt.shift, "alt+enter should read as shift+enter");
    }

    #[test]
    fn ctrl_letters_and_word_keys_decode() {
        let ctrl_c = map_event(Event::Key(KeyEvent::new(
            KeyCode::Char('c'),
            KeyModifiers::CONTROL,
        )))
        .expect("key expected");
        assert!(ctrl_c.ctrl);
        assert_eq!(ctrl_c.name, KeyName::Char('c'));

        let word_left = map_event(Event::Key(KeyEvent::new(
            KeyCode::Left,
            KeyModifiers::ALT,
        )))
        .expect("key expected");
        assert_eq!(word_left.name, KeyName::WordLeft);

        let legacy = map_event(Event::Key(KeyEvent::new(
            KeyCode::Char('b'),
            KeyModifiers::ALT,
        )))
        .expect("key expected");
        assert_eq!(legacy.name, KeyName::WordLeft);

        let word_backspace = map_event(Event::Key(KeyEvent::new(
            KeyCode::Backspace,
            KeyModifiers::ALT,
        )))
        .expect("key expected");
        assert_eq!(word_backspace.name, KeyName::WordBackspace);
    }

    #[test]
    fn paste_events_normalize_line_endings() {
        let pasted = map_event(Event::Paste("a\r\nb\rc".to_owned())).expect("key expected");
        assert_eq!(pasted.name, KeyName::Paste("a\nb\nc".to_owned()));
    }

    #[test]
    fn shift_tab_maps_to_back_tab() {
        let back = map_event(Event::Key(KeyEvent::new(KeyCode::BackTab, KeyModifiers::SHIFT)))
            .expect("key expected");
        assert_eq!(back.name, KeyName::BackTab);
    }

    // -- pretty printer ------------------------------------------------------

    #[test]
    fn object_scalars_align_and_complex_children_indent() {
        let lines = render_json(&json!({
            "id": 7,
            "title": "Deep Work",
            "author": {"name": "Cal"}
        }));
        let plain: Vec<String> = lines.iter().map(|line| strip_ansi(line)).collect();
        assert_eq!(plain[0], "id     7");
        assert_eq!(plain[1], "title  Deep Work");
        assert_eq!(plain[2], "author:");
        assert_eq!(plain[3], "  name  Cal");
    }

    #[test]
    fn scalar_arrays_get_dash_markers() {
        let lines = render_json(&json!(["one", "two"]));
        let plain: Vec<String> = lines.iter().map(|line| strip_ansi(line)).collect();
        assert_eq!(plain, vec!["─ one", "─ two"]);
    }

    #[test]
    fn object_arrays_render_blocks_with_blank_separators() {
        let lines = render_json(&json!([
            {"title": "A", "pages": 10},
            {"title": "B"}
        ]));
        let plain: Vec<String> = lines.iter().map(|line| strip_ansi(line)).collect();
        assert_eq!(plain[0], "─ title  A");
        assert_eq!(plain[1], "  pages  10");
        assert_eq!(plain[2], "");
        assert_eq!(plain[3], "─ title  B");
    }

    #[test]
    fn scalars_carry_their_styles() {
        let lines = render_json(&json!({"count": 3, "done": true, "gone": null, "name": ""}));
        let joined = lines.join("\n");
        assert!(joined.contains("\x1b[36m3"));
        assert!(joined.contains("\x1b[33mtrue"));
        assert!(joined.contains("null"));
        assert!(joined.contains("–"));
    }

    #[test]
    fn empty_containers_print_nothing() {
        assert!(render_json(&json!({})).is_empty());
        assert!(render_json(&json!([])).is_empty());
        let lines = render_json(&json!({"meta": {}, "rows": []}));
        assert!(lines.is_empty());
    }

    #[test]
    fn empty_list_detection() {
        assert!(is_empty_list_result(&json!([])));
        assert!(is_empty_list_result(&json!({"results": [], "count": 0})));
        assert!(is_empty_list_result(&json!({"results": [], "next": null, "q": ""})));
        assert!(!is_empty_list_result(&json!({"count": 0})));
        assert!(!is_empty_list_result(&json!({"results": [1]})));
        assert!(!is_empty_list_result(&json!({"results": [], "total": 5})));
        assert!(!is_empty_list_result(&json!("text")));
    }

    // -- previews ------------------------------------------------------------

    #[test]
    fn value_preview_shapes() {
        assert_eq!(strip_ansi(&value_preview("", 20)), "–");
        assert_eq!(value_preview("short", 20), "short");
        assert_eq!(value_preview(r#"[{"a":1},{"b":2}]"#, 20), "[2 items]");
        assert_eq!(value_preview(r#"["x"]"#, 20), "[1 item]");
        let multi = value_preview("first line\nsecond\nthird", 30);
        assert!(strip_ansi(&multi).contains("[+2 lines]"));
        let long = value_preview("abcdefghijklmnopqrstuvwxyz", 10);
        assert_eq!(visible_width(&long), 10);
        assert!(long.ends_with('…'));
    }

    #[test]
    fn item_summaries_skip_empty_values() {
        let summary = summarize_item(&json!({"text": "Note", "note": "", "page": 3}));
        assert_eq!(strip_ansi(&summary), "text: Note, page: 3");
    }

    // -- commands view -------------------------------------------------------

    #[test]
    fn typing_filters_and_enter_opens_required_editor() {
        let mut state = AppState::new(catalog());
        type_str(&mut state, "reader-create-document");
        assert_eq!(state.cmd_filtered, vec![0]);

        assert_eq!(handle_key(&mut state, &key(KeyName::Enter)), Signal::Continue);
        assert_eq!(state.view, View::Form);
        assert!(state.editing, "first unfilled required field should auto-open");
        assert_eq!(state.fields[state.edit_field].name, "url");
    }

    #[test]
    fn zero_parameter_tool_submits_straight_from_commands() {
        let mut state = AppState::new(catalog());
        type_str(&mut state, "zz_ping");
        assert_eq!(handle_key(&mut state, &key(KeyName::Enter)), Signal::Submit);
        assert!(state.fields.is_empty());
    }

    #[test]
    fn commands_cursor_clamps_at_last_row() {
        let mut state = AppState::new(catalog());
        for _ in 0..10 {
            handle_key(&mut state, &key(KeyName::Down));
        }
        assert_eq!(state.cmd_cursor, state.cmd_filtered.len() - 1);
        handle_key(&mut state, &key(KeyName::Down));
        assert_eq!(state.cmd_cursor, state.cmd_filtered.len() - 1);
    }

    #[test]
    fn quit_confirmation_arms_clears_and_exits() {
        let mut state = AppState::new(catalog());
        assert_eq!(handle_key(&mut state, &KeyPress::ch('q')), Signal::Continue);
        assert!(state.quit_confirm);

        // any other printable key disarms
        assert_eq!(handle_key(&mut state, &KeyPress::ch('r')), Signal::Continue);
        assert!(!state.quit_confirm);
        state.cmd_query.clear();
        state.cmd_query_cursor = 0;
        state.rebuild_command_filter();

        assert_eq!(handle_key(&mut state, &KeyPress::ch('q')), Signal::Continue);
        assert_eq!(handle_key(&mut state, &KeyPress::ch('q')), Signal::Exit);
    }

    #[test]
    fn escape_clears_query_before_arming_quit() {
        let mut state = AppState::new(catalog());
        type_str(&mut state, "reader");
        assert_eq!(handle_key(&mut state, &key(KeyName::Escape)), Signal::Continue);
        assert!(state.cmd_query.is_empty());
        assert!(!state.quit_confirm);
        assert_eq!(handle_key(&mut state, &key(KeyName::Escape)), Signal::Continue);
        assert!(state.quit_confirm);
        assert_eq!(
            handle_key(&mut state, &KeyPress::ctrl('c')),
            Signal::Exit
        );
    }

    #[test]
    fn q_is_a_plain_character_while_searching() {
        let mut state = AppState::new(catalog());
        type_str(&mut state, "read");
        assert_eq!(handle_key(&mut state, &KeyPress::ch('q')), Signal::Continue);
        assert!(!state.quit_confirm);
        assert_eq!(state.cmd_query, "readq");
    }

    // -- scenario: plain text required field ---------------------------------

    #[test]
    fn text_flow_fills_url_then_lands_on_execute() {
        let mut state = AppState::new(catalog());
        type_str(&mut state, "reader-create-document");
        handle_key(&mut state, &key(KeyName::Enter));
        assert!(state.editing);

        type_str(&mut state, "https://example.com");
        handle_key(&mut state, &key(KeyName::Enter));
        assert!(!state.editing);
        assert_eq!(state.draft(field_index(&state, "url")), "https://example.com");
        assert!(state.on_action_row(), "cursor should advance to Execute");

        assert_eq!(handle_key(&mut state, &key(KeyName::Enter)), Signal::Submit);
        assert_eq!(state.tool_args()["url"], json!("https://example.com"));
    }

    #[test]
    fn execute_with_missing_required_arms_show_required() {
        let mut state = form_state();
        state.form_cursor = state.form_filtered.len() - 1;
        assert!(state.on_action_row());
        assert_eq!(handle_key(&mut state, &key(KeyName::Enter)), Signal::Continue);
        assert!(state.show_required);
        assert_eq!(state.view, View::Form);
    }

    // -- scenario: multi-select enum -----------------------------------------

    #[test]
    fn multi_select_builds_comma_draft_and_array_args() {
        let mut state = form_state();
        open_field(&mut state, "category_in");

        handle_key(&mut state, &KeyPress::ch(' '));
        handle_key(&mut state, &key(KeyName::Down));
        handle_key(&mut state, &key(KeyName::Enter));

        let draft = state.draft(field_index(&state, "category_in")).to_owned();
        assert_eq!(draft, "article, email");
        state.set_draft(field_index(&state, "url"), "https://x".to_owned());
        assert_eq!(state.tool_args()["category_in"], json!(["article", "email"]));
    }

    #[test]
    fn multi_select_escape_confirms_live_edits() {
        let mut state = form_state();
        open_field(&mut state, "category_in");
        handle_key(&mut state, &KeyPress::ch(' '));
        handle_key(&mut state, &key(KeyName::Escape));
        assert!(!state.editing);
        assert_eq!(state.draft(field_index(&state, "category_in")), "article");
    }

    // -- scenario: array of objects ------------------------------------------

    #[test]
    fn array_obj_flow_appends_item_through_sub_form() {
        let mut state = form_state();
        open_field(&mut state, "highlights");
        assert!(state.editing);

        // enter on the Add row pushes the sub-form
        handle_key(&mut state, &key(KeyName::Enter));
        assert!(!state.editing);
        assert_eq!(state.form_stack.len(), 1);
        assert_eq!(state.action_label(), "Add");

        // fill `text` through its editor
        let text_index = field_index(&state, "text");
        state.form_cursor = state
            .form_filtered
            .iter()
            .position(|&entry| entry == text_index as isize)
            .expect("text row visible");
        handle_key(&mut state, &key(KeyName::Enter));
        assert!(state.editing);
        type_str(&mut state, "Note");
        handle_key(&mut state, &key(KeyName::Enter));

        // Add row commits back into the parent
        state.form_cursor = state.form_filtered.len() - 1;
        handle_key(&mut state, &key(KeyName::Enter));
        assert!(state.form_stack.is_empty());
        let highlights = field_index(&state, "highlights");
        assert_eq!(state.draft(highlights), r#"[{"text":"Note"}]"#);
        assert_eq!(
            strip_ansi(&value_preview(state.draft(highlights), 20)),
            "[1 item]"
        );

        state.set_draft(field_index(&state, "url"), "https://x".to_owned());
        assert_eq!(state.tool_args()["highlights"], json!([{"text": "Note"}]));
    }

    #[test]
    fn sub_form_escape_restores_parent_unchanged() {
        let mut state = form_state();
        open_field(&mut state, "highlights");
        handle_key(&mut state, &key(KeyName::Enter));
        assert_eq!(state.form_stack.len(), 1);

        let before_values = state.form_stack[0].values.clone();
        handle_key(&mut state, &key(KeyName::Escape));
        assert!(state.form_stack.is_empty());
        assert_eq!(state.values, before_values);
        assert_eq!(state.view, View::Form);
    }

    #[test]
    fn items_editor_deletes_with_backspace() {
        let mut state = form_state();
        let highlights = field_index(&state, "highlights");
        state.set_draft(highlights, r#"[{"text":"a"},{"text":"b"}]"#.to_owned());
        open_field(&mut state, "highlights");

        handle_key(&mut state, &key(KeyName::Backspace));
        assert_eq!(state.draft(highlights), r#"[{"text":"b"}]"#);
        handle_key(&mut state, &key(KeyName::Backspace));
        assert_eq!(state.draft(highlights), "");
    }

    // -- scenario: date picker -----------------------------------------------

    #[test]
    fn date_editor_confirms_canonical_draft() {
        let mut state = form_state();
        open_field(&mut state, "published_date");
        assert!(state.date_parts.is_some(), "date editor opens on today");

        handle_key(&mut state, &KeyPress::ch('t'));
        handle_key(&mut state, &key(KeyName::Up));
        handle_key(&mut state, &key(KeyName::Enter));

        let draft = state.draft(field_index(&state, "published_date")).to_owned();
        assert_eq!(draft.len(), 10);
        assert!(draft.as_bytes()[4] == b'-' && draft.as_bytes()[7] == b'-');
        assert!(draft[..4].bytes().all(|byte| byte.is_ascii_digit()));
    }

    #[test]
    fn date_editor_backspace_clears_the_draft() {
        let mut state = form_state();
        let published = field_index(&state, "published_date");
        state.set_draft(published, "2026-01-05".to_owned());
        open_field(&mut state, "published_date");
        assert_eq!(
            state.date_parts.as_ref().map(|parts| parts.parts.clone()),
            Some(vec![2026, 1, 5])
        );

        handle_key(&mut state, &key(KeyName::Backspace));
        assert!(!state.editing);
        assert_eq!(state.draft(published), "");
    }

    // -- palette behaviors ---------------------------------------------------

    #[test]
    fn optional_toggle_is_ignored_while_searching() {
        let mut state = form_state();
        assert!(!state.show_optional);
        handle_key(&mut state, &KeyPress::ch('o'));
        assert!(state.show_optional);

        type_str(&mut state, "tag");
        handle_key(&mut state, &KeyPress::ch('o'));
        assert!(state.show_optional, "o should type into the query instead");
        assert_eq!(state.form_query, "tago");
    }

    #[test]
    fn backspace_reopens_last_edited_field() {
        let mut state = form_state();
        let url = field_index(&state, "url");
        super::open_editor(&mut state, url);
        type_str(&mut state, "https://x");
        handle_key(&mut state, &key(KeyName::Enter));
        assert!(!state.editing);

        handle_key(&mut state, &key(KeyName::Backspace));
        assert!(state.editing);
        assert_eq!(state.edit_field, url);
        assert_eq!(state.input_buf, "https://x");
    }

    #[test]
    fn palette_cursor_wraps_both_directions() {
        let mut state = form_state();
        state.show_optional = true;
        state.rebuild_form_filter();
        let len = state.form_filtered.len();

        state.form_cursor = len - 1;
        handle_key(&mut state, &key(KeyName::Down));
        assert_eq!(state.form_cursor, 0);
        handle_key(&mut state, &key(KeyName::Up));
        assert_eq!(state.form_cursor, len - 1);
    }

    #[test]
    fn editor_escape_leaves_draft_untouched() {
        let mut state = form_state();
        let url = field_index(&state, "url");
        state.set_draft(url, "keep me".to_owned());
        super::open_editor(&mut state, url);
        type_str(&mut state, " changed");
        handle_key(&mut state, &key(KeyName::Escape));
        assert_eq!(state.draft(url), "keep me");
    }

    #[test]
    fn rejected_events_leave_state_value_equal() {
        let mut state = form_state();
        let before = state.clone();
        handle_key(&mut state, &key(KeyName::Delete));
        assert_eq!(state, before);
    }

    #[test]
    fn shift_enter_inserts_newline_in_text_editor() {
        let mut state = form_state();
        open_field(&mut state, "url");
        type_str(&mut state, "line1");
        handle_key(
            &mut state,
            &KeyPress {
                name: KeyName::Enter,
                shift: true,
                ctrl: false,
            },
        );
        type_str(&mut state, "line2");
        handle_key(&mut state, &key(KeyName::Enter));
        assert_eq!(state.draft(field_index(&state, "url")), "line1\nline2");
    }

    #[test]
    fn array_text_editor_adds_reedits_and_deletes() {
        let mut state = form_state();
        open_field(&mut state, "tags");

        type_str(&mut state, "rust");
        handle_key(&mut state, &key(KeyName::Enter));
        type_str(&mut state, "tui");
        handle_key(&mut state, &key(KeyName::Enter));
        let tags = field_index(&state, "tags");
        assert_eq!(state.draft(tags), "rust, tui");

        // re-edit the first item
        state.list_cursor = 0;
        handle_key(&mut state, &key(KeyName::Enter));
        assert_eq!(state.input_buf, "rust");
        assert_eq!(state.draft(tags), "tui");
        type_str(&mut state, "y");
        handle_key(&mut state, &key(KeyName::Enter));
        assert_eq!(state.draft(tags), "tui, rusty");

        // delete an item, then confirm with empty input
        state.list_cursor = 0;
        handle_key(&mut state, &key(KeyName::Backspace));
        assert_eq!(state.draft(tags), "rusty");
        state.list_cursor = state.list_items.len();
        handle_key(&mut state, &key(KeyName::Enter));
        assert!(!state.editing);
    }

    // -- results -------------------------------------------------------------

    fn finished(state: &mut AppState, outcome: Result<ToolResult, String>) {
        state.view = View::Loading;
        apply_outcome(state, outcome);
    }

    #[test]
    fn empty_list_result_shows_ghost_screen_and_returns_to_form() {
        let mut state = form_state();
        state.set_draft(field_index(&state, "url"), "https://x".to_owned());
        finished(
            &mut state,
            Ok(ToolResult {
                is_error: false,
                content: vec![r#"{"results": [], "count": 0}"#.to_owned()],
                structured: None,
            }),
        );
        assert_eq!(state.result, RunOutput::Empty);

        let frame = render(&state, 60, 20).join("\n");
        assert!(frame.contains("No results found"));

        handle_key(&mut state, &key(KeyName::Escape));
        assert_eq!(state.view, View::Form);
        assert_eq!(state.draft(field_index(&state, "url")), "https://x");
    }

    #[test]
    fn success_with_no_output_returns_to_commands() {
        let mut state = form_state();
        finished(
            &mut state,
            Ok(ToolResult {
                is_error: false,
                content: Vec::new(),
                structured: None,
            }),
        );
        assert_eq!(state.result, RunOutput::None);
        let frame = render(&state, 60, 20).join("\n");
        assert!(frame.contains("Done."));

        handle_key(&mut state, &key(KeyName::Enter));
        assert_eq!(state.view, View::Commands);
    }

    #[test]
    fn structured_content_backs_up_empty_text() {
        let mut state = form_state();
        finished(
            &mut state,
            Ok(ToolResult {
                is_error: false,
                content: Vec::new(),
                structured: Some(json!({"count": 2, "results": [1, 2]})),
            }),
        );
        assert!(matches!(state.result, RunOutput::Json(_)));
    }

    #[test]
    fn transport_and_tool_errors_render_in_red() {
        let mut state = form_state();
        finished(&mut state, Err("connection refused".to_owned()));
        assert_eq!(state.error.as_deref(), Some("connection refused"));
        let frame = render(&state, 60, 20).join("\n");
        assert!(frame.contains("\x1b[31m"));

        finished(
            &mut state,
            Ok(ToolResult {
                is_error: true,
                content: vec!["bad argument".to_owned(), "try again".to_owned()],
                structured: None,
            }),
        );
        assert_eq!(state.error.as_deref(), Some("bad argument\ntry again"));
    }

    #[test]
    fn results_scrolling_clamps() {
        let mut state = form_state();
        let rows: Vec<Value> = (0..40).map(|index| json!({"index": index})).collect();
        finished(
            &mut state,
            Ok(ToolResult {
                is_error: false,
                content: vec![Value::Array(rows).to_string()],
                structured: None,
            }),
        );
        state.viewport_rows = 20;

        for _ in 0..500 {
            handle_key(&mut state, &key(KeyName::Down));
        }
        let max = super::result_lines(&state)
            .len()
            .saturating_sub(super::results_list_height(20));
        assert_eq!(state.result_scroll, max);

        handle_key(&mut state, &key(KeyName::Right));
        assert_eq!(state.result_scroll_x, 4);
        handle_key(&mut state, &key(KeyName::Left));
        assert_eq!(state.result_scroll_x, 0);
    }

    #[test]
    fn error_results_go_back_to_the_form() {
        let mut state = form_state();
        finished(&mut state, Err("boom".to_owned()));
        handle_key(&mut state, &key(KeyName::Escape));
        assert_eq!(state.view, View::Form);
        assert!(state.error.is_none());
    }

    // -- loading / event loop pieces -----------------------------------------

    #[test]
    fn loading_drops_keys_and_only_spinner_advances() {
        let mut state = form_state();
        state.view = View::Loading;
        let before = state.clone();
        // run_app drops keys in Loading before handlers run; handle_key is
        // also a no-op there
        assert_eq!(handle_key(&mut state, &KeyPress::ch('x')), Signal::Continue);
        assert_eq!(state, before);
    }

    #[test]
    fn invocation_round_trip_through_test_runtime() {
        let mut runtime = TestRuntime {
            reply: Some(Ok(ToolResult {
                is_error: false,
                content: vec![r#"{"id": 9}"#.to_owned()],
                structured: None,
            })),
            ..TestRuntime::default()
        };
        let tools = runtime.list_catalog().expect("catalog should load");
        let mut state = AppState::new(tools);
        let (tx, rx) = mpsc::channel();

        type_str(&mut state, "zz_ping");
        assert_eq!(handle_key(&mut state, &key(KeyName::Enter)), Signal::Submit);
        begin_invocation(&mut state, &mut runtime, 1, &tx);
        assert_eq!(state.view, View::Loading);
        assert_eq!(runtime.calls.len(), 1);
        assert_eq!(runtime.calls[0].1, "zz_ping");

        process_internal_events(&mut state, &rx, 1);
        assert_eq!(state.view, View::Results);
        assert_eq!(state.result, RunOutput::Json(json!({"id": 9})));
    }

    #[test]
    fn stale_tool_results_and_quit_tokens_are_ignored() {
        let mut state = AppState::new(catalog());
        state.select_tool(2);
        let (tx, rx) = mpsc::channel();

        state.view = View::Loading;
        tx.send(InternalEvent::ToolFinished {
            request_id: 3,
            outcome: Err("old".to_owned()),
        })
        .expect("send should succeed");
        process_internal_events(&mut state, &rx, 4);
        assert_eq!(state.view, View::Loading, "stale request must not land");

        state.view = View::Commands;
        state.quit_confirm = true;
        state.quit_token = 7;
        tx.send(InternalEvent::QuitConfirmExpired { token: 6 })
            .expect("send should succeed");
        process_internal_events(&mut state, &rx, 4);
        assert!(state.quit_confirm, "stale token must not disarm");

        tx.send(InternalEvent::QuitConfirmExpired { token: 7 })
            .expect("send should succeed");
        process_internal_events(&mut state, &rx, 4);
        assert!(!state.quit_confirm);
    }

    // -- render invariants ---------------------------------------------------

    #[test]
    fn every_view_renders_exactly_rows_lines_within_cols() {
        let mut states = Vec::new();

        let commands = AppState::new(catalog());
        states.push(commands);

        let mut searching = AppState::new(catalog());
        type_str(&mut searching, "reader");
        states.push(searching);

        let mut palette = form_state();
        palette.show_optional = true;
        palette.rebuild_form_filter();
        states.push(palette);

        for field in ["url", "tags", "category", "published_date", "highlights", "category_in"] {
            let mut editing = form_state();
            open_field(&mut editing, field);
            states.push(editing);
        }

        let mut loading = form_state();
        loading.view = View::Loading;
        loading.spinner_frame = 17;
        states.push(loading);

        let mut results = form_state();
        finished(
            &mut results,
            Ok(ToolResult {
                is_error: false,
                content: vec![r#"[{"title": "A"}, {"title": "B"}]"#.to_owned()],
                structured: None,
            }),
        );
        states.push(results);

        for (index, state) in states.iter().enumerate() {
            for (cols, rows) in [(80usize, 24usize), (40, 12), (20, 6), (8, 3), (1, 1)] {
                let lines = render(state, cols, rows);
                assert_eq!(lines.len(), rows, "state {index} at {cols}x{rows}");
                for line in &lines {
                    assert!(
                        visible_width(line) <= cols,
                        "state {index} at {cols}x{rows}: {line:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn form_cursor_always_indexes_filtered_list() {
        let mut state = form_state();
        let keys = [
            KeyPress::ch('o'),
            key(KeyName::Down),
            key(KeyName::Down),
            KeyPress::ch('t'),
            KeyPress::ch('a'),
            key(KeyName::Backspace),
            key(KeyName::Backspace),
            key(KeyName::Escape),
            KeyPress::ch('o'),
            key(KeyName::Tab),
            key(KeyName::Up),
        ];
        for press in &keys {
            if state.view != View::Form {
                break;
            }
            handle_key(&mut state, press);
            if state.view == View::Form && !state.editing {
                assert!(
                    state.form_cursor < state.form_filtered.len(),
                    "cursor escaped after {press:?}"
                );
            }
        }
    }

    #[test]
    fn editing_flag_never_survives_leaving_the_form_view() {
        let mut state = form_state();
        open_field(&mut state, "url");
        assert!(state.editing);

        let (tx, _rx) = mpsc::channel();
        let mut runtime = TestRuntime::default();
        begin_invocation(&mut state, &mut runtime, 1, &tx);
        assert_eq!(state.view, View::Loading);
        assert!(!state.editing);
    }

    #[test]
    fn commands_view_shows_group_headers_and_quit_hint() {
        let mut state = AppState::new(catalog());
        let frame = render(&state, 70, 24).join("\n");
        assert!(frame.contains("Reader"));
        assert!(frame.contains("Readwise"));
        assert!(frame.contains("Other"));

        handle_key(&mut state, &KeyPress::ch('q'));
        let confirm = render(&state, 70, 24).join("\n");
        assert!(confirm.contains("Press again to quit"));
    }

    #[test]
    fn disabling_grouping_drops_the_separators() {
        let mut state = AppState::new(catalog());
        state.group_commands = false;
        state.rebuild_command_filter();

        let frame = strip_ansi(&render(&state, 70, 24).join("\n"));
        assert!(!frame.contains("── Reader"));
        assert!(!frame.contains("── Other"));
        assert!(frame.contains("reader_create_document"));
        assert!(frame.contains("zz_ping"));
    }

    #[test]
    fn palette_shows_progress_and_type_badges() {
        let mut state = form_state();
        state.show_optional = true;
        state.rebuild_form_filter();
        let frame = strip_ansi(&render(&state, 90, 30).join("\n"));
        assert!(frame.contains("0 of 1 required"));
        assert!(frame.contains("(text)"));
        assert!(frame.contains("(date)"));
        assert!(frame.contains("(multi)"));
        assert!(frame.contains("(form)"));
        assert!(frame.contains("▶ Execute"));

        state.set_draft(field_index(&state, "url"), "https://x".to_owned());
        let done = strip_ansi(&render(&state, 90, 30).join("\n"));
        assert!(done.contains("✓ 1 of 1 required"));
    }
}
