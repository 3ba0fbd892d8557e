//! Response parsing from the code generator's output.
//!
//! Parsing runs in two passes:
//! - a tokenizer classifies every line (`Token`) without looking at context
//! - a state machine over `Outside`, `InFileHeader` and `InCodeBlock`
//!   consumes every token in exactly one transition
//!
//! Two output dialects are supported as named modes:
//! - [`Dialect::Marker`]: `# file: <path>` and `# explanation: <text>` lines,
//!   usually inside fenced code blocks
//! - [`Dialect::Section`]: `## Files`, `## Changes` (bold filenames followed by
//!   fenced blocks), `## Explanation` and `## Considerations`
//!
//! Parsing never fails. Malformed fragments are skipped, recorded as warnings
//! and logged.

use std::sync::LazyLock;

use regex::Regex;

use super::types::{ChangeSet, Dialect, FileChange, ParsedResponse};
use super::validate::normalize_path;

static FILE_MARKER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:#|//)\s*file\s*:\s*(.*)$").unwrap());

static EXPLANATION_MARKER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:#|//)\s*explanation\s*:\s*(.*)$").unwrap());

static HEADING_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#{2,3}\s+(.+?)\s*#*$").unwrap());

// Bold filename on its own line, optionally bulleted and followed by a colon.
static BOLD_PATH_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[-*+]\s+|\d+\.\s+)?\*\*(.+?)\*\*\s*:?$").unwrap()
});

static LIST_ITEM_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[-*+]|\d+\.)\s+(.+)$").unwrap());

/// Named sections of the section dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Files,
    Changes,
    Explanation,
    Considerations,
    Other,
}

impl Section {
    fn from_heading(title: &str) -> Self {
        let title = title.trim().trim_end_matches(':').to_lowercase();
        if title.starts_with("files") {
            Self::Files
        } else if title.starts_with("changes") || title.starts_with("code changes") {
            Self::Changes
        } else if title.starts_with("explanation") {
            Self::Explanation
        } else if title.starts_with("considerations") {
            Self::Considerations
        } else {
            Self::Other
        }
    }
}

/// Classification of a single input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind<'a> {
    /// A code fence; `info` is the language tag, possibly empty.
    Fence { info: &'a str },
    FileMarker(&'a str),
    ExplanationMarker(&'a str),
    Heading(Section),
    BoldPath(&'a str),
    ListItem(&'a str),
    Blank,
    Text,
}

/// A classified line together with its raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: LineKind<'a>,
    pub raw: &'a str,
}

/// Classify every line of `text`.
pub fn tokenize(text: &str) -> Vec<Token<'_>> {
    text.lines()
        .map(|raw| Token {
            kind: classify(raw),
            raw,
        })
        .collect()
}

fn classify(raw: &str) -> LineKind<'_> {
    let line = raw.trim();
    if line.is_empty() {
        return LineKind::Blank;
    }
    if let Some(info) = line.strip_prefix("```") {
        return LineKind::Fence { info: info.trim() };
    }
    if let Some(cap) = FILE_MARKER_REGEX.captures(line) {
        return LineKind::FileMarker(cap.get(1).map_or("", |m| m.as_str()));
    }
    if let Some(cap) = EXPLANATION_MARKER_REGEX.captures(line) {
        return LineKind::ExplanationMarker(cap.get(1).map_or("", |m| m.as_str()));
    }
    if let Some(cap) = HEADING_REGEX.captures(line) {
        return LineKind::Heading(Section::from_heading(
            cap.get(1).map_or("", |m| m.as_str()),
        ));
    }
    if let Some(cap) = BOLD_PATH_REGEX.captures(line) {
        let inner = cap.get(1).map_or("", |m| m.as_str());
        if !clean_path(inner).contains(char::is_whitespace) {
            return LineKind::BoldPath(inner);
        }
    }
    if let Some(cap) = LIST_ITEM_REGEX.captures(line) {
        return LineKind::ListItem(cap.get(1).map_or("", |m| m.as_str()));
    }
    LineKind::Text
}

/// Pick the dialect of `text`: section when an unfenced `## Changes`
/// heading exists, marker otherwise.
pub fn detect_dialect(text: &str) -> Dialect {
    let mut in_fence = false;
    for token in tokenize(text) {
        match token.kind {
            LineKind::Fence { .. } => in_fence = !in_fence,
            LineKind::Heading(Section::Changes) if !in_fence => return Dialect::Section,
            _ => {}
        }
    }
    Dialect::Marker
}

/// Strip markdown decoration around a path and leading `./` segments.
fn clean_path(raw: &str) -> String {
    let mut s = raw.trim().trim_end_matches(':').trim();
    s = s.trim_start_matches("**").trim_end_matches("**").trim();
    s = s.trim_end_matches(':').trim();
    if s.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("file:")) {
        s = s[5..].trim();
    }
    if let Some(rest) = s.strip_prefix('`') {
        s = rest.split('`').next().unwrap_or_default();
    }
    normalize_path(s.trim_matches(|c| c == '"' || c == '\'')).to_string()
}

/// Drop blank lines at both ends of a block, keeping inner blank lines and
/// the indentation of the first content line.
fn trim_block(lines: &[&str]) -> String {
    let first = lines.iter().position(|l| !l.trim().is_empty());
    let last = lines.iter().rposition(|l| !l.trim().is_empty());
    match (first, last) {
        (Some(first), Some(last)) => lines[first..=last].join("\n"),
        _ => String::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Outside,
    InFileHeader { fenced: bool },
    InCodeBlock { fenced: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderOrigin {
    Marker,
    Bold,
}

#[derive(Debug)]
struct PendingFile<'a> {
    path: String,
    origin: HeaderOrigin,
    explanation: Vec<&'a str>,
    lines: Vec<&'a str>,
}

struct Machine<'a> {
    dialect: Dialect,
    state: State,
    section: Section,
    current: Option<PendingFile<'a>>,
    /// Content lines seen in a fenced block that has no file yet.
    orphan_lines: usize,
    out: ParsedResponse,
    explanation: Vec<&'a str>,
    considerations: Vec<&'a str>,
}

impl<'a> Machine<'a> {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            state: State::Outside,
            section: Section::Other,
            current: None,
            orphan_lines: 0,
            out: ParsedResponse::empty(dialect),
            explanation: Vec::new(),
            considerations: Vec::new(),
        }
    }

    fn sections_enabled(&self) -> bool {
        self.dialect == Dialect::Section
    }

    fn warn(&mut self, message: String) {
        tracing::debug!(dialect = self.dialect.as_str(), "{}", message);
        self.out.warnings.push(message);
    }

    fn step(&mut self, token: Token<'a>) {
        let raw = token.raw;
        self.state = match (self.state, token.kind) {
            // ── Outside any file ────────────────────────────────────────
            (State::Outside, LineKind::Fence { .. }) => {
                self.orphan_lines = 0;
                State::InCodeBlock { fenced: true }
            }
            (State::Outside, LineKind::FileMarker(path)) => {
                self.begin_file(path, HeaderOrigin::Marker);
                State::InFileHeader { fenced: false }
            }
            (State::Outside, LineKind::ExplanationMarker(_)) => {
                self.warn("explanation marker outside of any file skipped".to_string());
                State::Outside
            }
            (State::Outside, LineKind::Heading(section)) => {
                if self.sections_enabled() {
                    self.section = section;
                }
                State::Outside
            }
            (State::Outside, LineKind::BoldPath(path))
                if self.sections_enabled() && self.section == Section::Changes =>
            {
                self.begin_file(path, HeaderOrigin::Bold);
                State::InFileHeader { fenced: false }
            }
            (State::Outside, LineKind::ListItem(item))
                if self.sections_enabled() && self.section == Section::Files =>
            {
                self.list_file(item);
                State::Outside
            }
            (State::Outside, _) => {
                self.collect_prose(raw);
                State::Outside
            }

            // ── After a file header, before its body ───────────────────
            (State::InFileHeader { fenced }, LineKind::ExplanationMarker(text)) => {
                self.set_explanation(text);
                State::InFileHeader { fenced }
            }
            (State::InFileHeader { fenced }, LineKind::FileMarker(path)) => {
                self.flush();
                self.begin_file(path, HeaderOrigin::Marker);
                State::InFileHeader { fenced }
            }
            (State::InFileHeader { fenced }, LineKind::Blank) => State::InFileHeader { fenced },
            (State::InFileHeader { fenced: true }, LineKind::Fence { .. }) => {
                self.flush();
                State::Outside
            }
            (State::InFileHeader { fenced: false }, LineKind::Fence { .. }) => {
                State::InCodeBlock { fenced: true }
            }
            (State::InFileHeader { fenced: false }, LineKind::Heading(section))
                if self.sections_enabled() =>
            {
                self.flush();
                self.section = section;
                State::Outside
            }
            (State::InFileHeader { fenced: false }, LineKind::BoldPath(path))
                if self.sections_enabled() && self.section == Section::Changes =>
            {
                self.flush();
                self.begin_file(path, HeaderOrigin::Bold);
                State::InFileHeader { fenced: false }
            }
            (State::InFileHeader { fenced: false }, _) if self.header_takes_prose() => {
                if let Some(current) = self.current.as_mut() {
                    current.explanation.push(raw.trim());
                }
                State::InFileHeader { fenced: false }
            }
            (State::InFileHeader { fenced }, _) => {
                self.push_content(raw);
                State::InCodeBlock { fenced }
            }

            // ── Inside a file body ──────────────────────────────────────
            (State::InCodeBlock { fenced: true }, LineKind::Fence { .. }) => {
                self.close_block();
                State::Outside
            }
            (State::InCodeBlock { fenced: false }, LineKind::Fence { .. }) => {
                self.flush();
                self.orphan_lines = 0;
                State::InCodeBlock { fenced: true }
            }
            (State::InCodeBlock { fenced }, LineKind::FileMarker(path)) => {
                self.flush();
                self.orphan_lines = 0;
                self.begin_file(path, HeaderOrigin::Marker);
                State::InFileHeader { fenced }
            }
            (State::InCodeBlock { fenced }, LineKind::ExplanationMarker(text)) => {
                if self.current.is_some() {
                    self.set_explanation(text);
                } else {
                    self.warn("explanation marker in a code block without a file skipped".to_string());
                }
                State::InCodeBlock { fenced }
            }
            (State::InCodeBlock { fenced: false }, LineKind::Heading(section))
                if self.sections_enabled() =>
            {
                self.flush();
                self.section = section;
                State::Outside
            }
            (State::InCodeBlock { fenced: false }, LineKind::BoldPath(path))
                if self.sections_enabled() && self.section == Section::Changes =>
            {
                self.flush();
                self.begin_file(path, HeaderOrigin::Bold);
                State::InFileHeader { fenced: false }
            }
            (State::InCodeBlock { fenced }, _) => {
                self.push_content(raw);
                State::InCodeBlock { fenced }
            }
        };
    }

    /// Prose between a bold filename and its fence describes the file.
    fn header_takes_prose(&self) -> bool {
        self.sections_enabled()
            && self
                .current
                .as_ref()
                .is_some_and(|c| c.origin == HeaderOrigin::Bold)
    }

    fn begin_file(&mut self, raw_path: &str, origin: HeaderOrigin) {
        self.current = Some(PendingFile {
            path: clean_path(raw_path),
            origin,
            explanation: Vec::new(),
            lines: Vec::new(),
        });
    }

    fn set_explanation(&mut self, text: &'a str) {
        if let Some(current) = self.current.as_mut() {
            current.explanation = vec![text.trim()];
        }
    }

    fn push_content(&mut self, raw: &'a str) {
        match self.current.as_mut() {
            Some(current) => current.lines.push(raw),
            None => {
                if !raw.trim().is_empty() {
                    self.orphan_lines += 1;
                }
            }
        }
    }

    fn close_block(&mut self) {
        if self.current.is_some() {
            self.flush();
        } else if self.orphan_lines > 0 {
            let lines = self.orphan_lines;
            self.warn(format!(
                "code block without a file marker skipped ({} lines)",
                lines
            ));
        }
        self.orphan_lines = 0;
    }

    fn list_file(&mut self, item: &str) {
        let cleaned = clean_path(item);
        if let Some(path) = cleaned.split_whitespace().next() {
            self.out.listed_files.push(path.to_string());
        }
    }

    fn collect_prose(&mut self, raw: &'a str) {
        if !self.sections_enabled() {
            return;
        }
        match self.section {
            Section::Explanation => self.explanation.push(raw.trim_end()),
            Section::Considerations => self.considerations.push(raw.trim_end()),
            _ => {}
        }
    }

    /// Emit the pending file, if any, into the change set.
    fn flush(&mut self) {
        let Some(file) = self.current.take() else {
            return;
        };
        if file.path.is_empty() {
            self.warn("file marker without a path skipped".to_string());
            return;
        }
        let content = trim_block(&file.lines);
        if content.trim().is_empty() {
            self.warn(format!("{}: empty content, change dropped", file.path));
            return;
        }
        let explanation = file.explanation.join(" ");
        let path = file.path;
        if self
            .out
            .changes
            .upsert(FileChange::new(path.clone(), content, Some(explanation)))
        {
            tracing::debug!(path = %path, "repeated file declaration overrides the earlier one");
        }
    }

    fn finish(mut self) -> ParsedResponse {
        if let State::InCodeBlock { fenced: true } | State::InFileHeader { fenced: true } =
            self.state
        {
            self.warn("unterminated code block flushed at end of input".to_string());
        }
        self.close_block();
        self.out.explanation = join_prose(&self.explanation);
        self.out.considerations = join_prose(&self.considerations);
        self.out
    }
}

fn join_prose(lines: &[&str]) -> Option<String> {
    let text = trim_block(lines);
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Parser for turning model output into a change set.
#[derive(Debug, Clone, Default)]
pub struct ResponseParser {
    /// Forced dialect; detected per input when `None`.
    dialect: Option<Dialect>,
}

impl ResponseParser {
    /// Create a parser that detects the dialect of each input.
    pub fn new() -> Self {
        Self { dialect: None }
    }

    /// Create a parser that always uses `dialect`.
    pub fn with_dialect(dialect: Dialect) -> Self {
        Self {
            dialect: Some(dialect),
        }
    }

    /// Extract all file changes and section prose from `text`.
    pub fn parse(&self, text: &str) -> ParsedResponse {
        let dialect = self.dialect.unwrap_or_else(|| detect_dialect(text));
        let mut machine = Machine::new(dialect);
        for token in tokenize(text) {
            machine.step(token);
        }
        let parsed = machine.finish();
        tracing::debug!(
            dialect = dialect.as_str(),
            changes = parsed.changes.len(),
            skipped = parsed.warnings.len(),
            "parsed model response"
        );
        parsed
    }
}

/// Convenience function to extract the change set without creating a parser.
pub fn parse_changes(text: &str) -> ChangeSet {
    ResponseParser::new().parse(text).changes
}
