//! Snippet data model, usage counters and the export/import envelope.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ClipioError, Result};

/// Identifier of the export envelope format.
pub const EXPORT_FORMAT: &str = "clipio";
/// Current export envelope version.
pub const EXPORT_VERSION: u32 = 1;

/// A stored shortcut → content mapping.
///
/// Field names are renamed to the wire form so serialized records match
/// what the storage substrate and the export envelope carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    pub id: Uuid,
    pub shortcut: String,
    pub label: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl Snippet {
    /// Create a snippet, enforcing the application-layer shortcut rules.
    ///
    /// Shortcut uniqueness across the set is the editing UI's concern, not
    /// the model's; storage does not enforce it either.
    pub fn new(shortcut: &str, label: &str, content: &str, tags: Vec<String>) -> Result<Self> {
        if shortcut.is_empty() {
            return Err(ClipioError::InvalidSnippet("shortcut must not be empty".into()));
        }
        if shortcut.chars().any(char::is_whitespace) {
            return Err(ClipioError::InvalidSnippet(format!(
                "shortcut '{shortcut}' must not contain whitespace"
            )));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            shortcut: shortcut.to_string(),
            label: label.to_string(),
            content: content.to_string(),
            tags: normalize_tags(tags),
            updated_at: Utc::now(),
        })
    }

    /// Refresh `updated_at` after a content/tag/label/shortcut mutation.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn set_tags(&mut self, tags: Vec<String>) {
        self.tags = normalize_tags(tags);
        self.touch();
    }
}

/// Lowercase, drop empties and duplicates; first-seen order is preserved
/// for display.
fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

/// Per-snippet usage counters, tracked outside the snippet records.
///
/// Counts only ever grow, except that deleting a snippet drops its entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounts(pub BTreeMap<Uuid, u64>);

impl UsageCounts {
    pub fn increment(&mut self, id: Uuid) -> u64 {
        let count = self.0.entry(id).or_insert(0);
        *count += 1;
        *count
    }

    pub fn get(&self, id: Uuid) -> u64 {
        self.0.get(&id).copied().unwrap_or(0)
    }

    pub fn remove(&mut self, id: Uuid) {
        self.0.remove(&id);
    }
}

/// Export/import envelope produced for backups and third-party exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnippetExport {
    pub version: u32,
    pub format: String,
    pub exported_at: DateTime<Utc>,
    pub snippets: Vec<Snippet>,
}

impl SnippetExport {
    pub fn new(snippets: Vec<Snippet>) -> Self {
        Self {
            version: EXPORT_VERSION,
            format: EXPORT_FORMAT.to_string(),
            exported_at: Utc::now(),
            snippets,
        }
    }

    /// Parse an export document, accepting both the versioned envelope and
    /// the legacy bare-array shape.
    pub fn parse(raw: &str) -> std::result::Result<Vec<Snippet>, serde_json::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Shape {
            Envelope(SnippetExport),
            Bare(Vec<Snippet>),
        }

        match serde_json::from_str::<Shape>(raw)? {
            Shape::Envelope(export) => Ok(export.snippets),
            Shape::Bare(snippets) => Ok(snippets),
        }
    }
}
