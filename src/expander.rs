//! Placeholder expansion.
//!
//! Turns stored snippet content into the final insertable text plus an
//! optional target cursor offset, resolving `{{clipboard}}`,
//! `{{date:<format>}}`, `{{datepicker:<ISO-date>}}` and `{{cursor}}`
//! tokens. The only I/O here is the clipboard read, and it is never
//! allowed to fail an expansion.

use chrono::{Local, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::errors::ExpandError;

const CLIPBOARD_TOKEN: &str = "{{clipboard}}";
const CURSOR_TOKEN: &str = "{{cursor}}";

static DATE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{date:([A-Za-z]+)\}\}").unwrap());
// Only the exact ISO date shape is recognized; anything else stays literal.
static DATEPICKER_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{datepicker:(\d{4}-\d{2}-\d{2})\}\}").unwrap());

/// Clipboard access seam. Production uses [`SystemClipboard`]; tests
/// substitute a deterministic fake.
pub trait ClipboardProvider: Send + Sync {
    fn read_text(&self) -> std::result::Result<String, ExpandError>;
    fn write_text(&self, text: &str) -> std::result::Result<(), ExpandError>;
}

/// System clipboard via arboard. A fresh handle per call keeps the
/// provider stateless; both directions are permission-gated and fallible.
pub struct SystemClipboard;

impl ClipboardProvider for SystemClipboard {
    fn read_text(&self) -> std::result::Result<String, ExpandError> {
        arboard::Clipboard::new()
            .and_then(|mut clipboard| clipboard.get_text())
            .map_err(|e| ExpandError::Clipboard(e.to_string()))
    }

    fn write_text(&self, text: &str) -> std::result::Result<(), ExpandError> {
        arboard::Clipboard::new()
            .and_then(|mut clipboard| clipboard.set_text(text.to_string()))
            .map_err(|e| ExpandError::Clipboard(e.to_string()))
    }
}

/// Whether the destination surface renders markup or plain text only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Richness {
    Plain,
    Rich,
}

/// Result of an expansion: the final text and, when the content carried a
/// `{{cursor}}` token, the character offset the caret should land on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expanded {
    pub text: String,
    pub cursor_offset: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateStyle {
    Iso,
    Us,
    Eu,
    Long,
    Short,
}

impl DateStyle {
    /// Unknown format names fall back to `iso`.
    fn parse(name: &str) -> Self {
        match name {
            "iso" => DateStyle::Iso,
            "us" => DateStyle::Us,
            "eu" => DateStyle::Eu,
            "long" => DateStyle::Long,
            "short" => DateStyle::Short,
            other => {
                debug!(format = %other, "unknown date format, falling back to iso");
                DateStyle::Iso
            }
        }
    }

    fn render(self, date: NaiveDate) -> String {
        let pattern = match self {
            DateStyle::Iso => "%Y-%m-%d",
            DateStyle::Us => "%m/%d/%Y",
            DateStyle::Eu => "%d/%m/%Y",
            DateStyle::Long => "%B %-d, %Y",
            DateStyle::Short => "%b %-d, %Y",
        };
        date.format(pattern).to_string()
    }
}

pub struct Expander {
    clipboard: Box<dyn ClipboardProvider>,
}

impl Expander {
    pub fn new(clipboard: Box<dyn ClipboardProvider>) -> Self {
        Self { clipboard }
    }

    pub fn system() -> Self {
        Self::new(Box::new(SystemClipboard))
    }

    /// Expand snippet content against today's date.
    pub fn expand(&self, content: &str, richness: Richness) -> Expanded {
        self.expand_on(content, richness, Local::now().date_naive())
    }

    /// Expansion body with an injectable date, so date formatting stays
    /// deterministic under test.
    pub fn expand_on(&self, content: &str, richness: Richness, today: NaiveDate) -> Expanded {
        let mut text = match richness {
            Richness::Plain => strip_markdown(content),
            Richness::Rich => content.to_string(),
        };

        if text.contains(CLIPBOARD_TOKEN) {
            let pasted = match self.clipboard.read_text() {
                Ok(pasted) => pasted,
                Err(e) => {
                    // Never surfaced to the host page; the token just
                    // resolves to nothing.
                    warn!(error = %e, "clipboard read failed, substituting empty text");
                    String::new()
                }
            };
            text = text.replace(CLIPBOARD_TOKEN, &pasted);
        }

        text = DATE_TOKEN
            .replace_all(&text, |caps: &regex::Captures<'_>| {
                DateStyle::parse(&caps[1]).render(today)
            })
            .into_owned();

        text = DATEPICKER_TOKEN
            .replace_all(&text, |caps: &regex::Captures<'_>| {
                match NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d") {
                    Ok(date) => DateStyle::Long.render(date),
                    // Shape matched but the date itself is impossible
                    // (e.g. month 13); leave the token in place.
                    Err(_) => caps[0].to_string(),
                }
            })
            .into_owned();

        // Cursor resolution runs last so the recorded offset is relative
        // to the fully substituted content.
        let (text, cursor_offset) = take_cursor(&text);
        Expanded { text, cursor_offset }
    }
}

/// Record the character offset of the first `{{cursor}}` token, then strip
/// every occurrence. `None` means "caret at end of insertion".
fn take_cursor(text: &str) -> (String, Option<usize>) {
    let Some(byte_idx) = text.find(CURSOR_TOKEN) else {
        return (text.to_string(), None);
    };
    let offset = text[..byte_idx].chars().count();
    (text.replace(CURSOR_TOKEN, ""), Some(offset))
}

static BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.+?)\*\*").unwrap());
static ITALIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*(.+?)\*").unwrap());
static UNDERLINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"__(.+?)__").unwrap());
static EMPHASIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"_(.+?)_").unwrap());
static STRIKE: Lazy<Regex> = Lazy::new(|| Regex::new(r"~~(.+?)~~").unwrap());
static CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`]*)`").unwrap());
static RAW_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?[A-Za-z][^>]*>").unwrap());

/// Strip markdown styling markers (and any embedded raw markup) down to
/// their inner text, for plain-text destinations. Double markers are
/// handled before their single-character forms.
pub fn strip_markdown(content: &str) -> String {
    let mut text = content.to_string();
    for re in [&*BOLD, &*ITALIC, &*UNDERLINE, &*EMPHASIS, &*STRIKE, &*CODE] {
        text = re.replace_all(&text, "$1").into_owned();
    }
    RAW_TAG.replace_all(&text, "").into_owned()
}
