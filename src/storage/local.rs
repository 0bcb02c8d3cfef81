//! Unsynced local snippet store and the content-script cache path.
//!
//! The local backend keeps the whole set under one key (no quota pressure
//! here), acts as the fallback primary when sync hits its quota, and owns
//! the cache key page contexts read their snippet snapshot from.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::StorageError;
use crate::matcher::SnippetSource;
use crate::snippet::{Snippet, UsageCounts};
use crate::storage::kv::{KeyValueArea, KvMap};
use crate::storage::SnippetStore;

/// Whole-list key in the local area.
pub const LOCAL_SNIPPETS_KEY: &str = "snippets";
/// Well-known key the content-script cache lives under.
pub const CONTENT_CACHE_KEY: &str = "snippetCache";
/// Usage counters, keyed by snippet id.
pub const USAGE_KEY: &str = "usageCounts";

/// Written cache shape. Readers must also accept a legacy bare array.
#[derive(Serialize)]
struct CacheEnvelope<'a> {
    items: &'a [Snippet],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CacheShape {
    Wrapped { items: Vec<Snippet> },
    Bare(Vec<Snippet>),
}

/// Parse a cache value in either accepted shape.
pub fn parse_cache_value(raw: &str) -> std::result::Result<Vec<Snippet>, serde_json::Error> {
    Ok(match serde_json::from_str::<CacheShape>(raw)? {
        CacheShape::Wrapped { items } => items,
        CacheShape::Bare(snippets) => snippets,
    })
}

#[derive(Clone)]
pub struct LocalBackend {
    area: Arc<dyn KeyValueArea>,
}

impl LocalBackend {
    pub fn new(area: Arc<dyn KeyValueArea>) -> Self {
        Self { area }
    }

    fn set_key(&self, key: &str, value: String) -> std::result::Result<(), StorageError> {
        let mut entries = KvMap::new();
        entries.insert(key.to_string(), value);
        self.area.set(&entries)
    }

    /// Serialize the full list into the content-script cache key. Called
    /// after every successful authoritative write, whichever backend was
    /// primary.
    pub fn write_cache(&self, snippets: &[Snippet]) -> std::result::Result<(), StorageError> {
        let raw = serde_json::to_string(&CacheEnvelope { items: snippets })?;
        self.set_key(CONTENT_CACHE_KEY, raw)
    }

    pub fn read_cache(&self) -> std::result::Result<Vec<Snippet>, StorageError> {
        match self.area.get(CONTENT_CACHE_KEY)? {
            Some(raw) => Ok(parse_cache_value(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    pub fn read_usage(&self) -> std::result::Result<UsageCounts, StorageError> {
        match self.area.get(USAGE_KEY)? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(counts) => Ok(counts),
                Err(e) => {
                    warn!(error = %e, "unreadable usage counters, resetting");
                    Ok(UsageCounts::default())
                }
            },
            None => Ok(UsageCounts::default()),
        }
    }

    pub fn write_usage(&self, counts: &UsageCounts) -> std::result::Result<(), StorageError> {
        self.set_key(USAGE_KEY, serde_json::to_string(counts)?)
    }
}

impl SnippetStore for LocalBackend {
    fn get_snippets(&self) -> std::result::Result<Vec<Snippet>, StorageError> {
        let Some(raw) = self.area.get(LOCAL_SNIPPETS_KEY)? else {
            return Ok(Vec::new());
        };
        // Salvage what parses; one bad element never fails the read.
        let values: Vec<serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(values) => values,
            Err(e) => {
                warn!(error = %e, "unreadable local snippet list");
                return Ok(Vec::new());
            }
        };
        let mut snippets = Vec::with_capacity(values.len());
        for value in values {
            match serde_json::from_value::<Snippet>(value) {
                Ok(snippet) => snippets.push(snippet),
                Err(e) => warn!(error = %e, "skipping malformed local snippet entry"),
            }
        }
        Ok(snippets)
    }

    fn save_snippets(&self, snippets: &[Snippet]) -> std::result::Result<(), StorageError> {
        self.set_key(LOCAL_SNIPPETS_KEY, serde_json::to_string(snippets)?)
    }

    fn clear(&self) -> std::result::Result<(), StorageError> {
        self.area
            .remove(&[LOCAL_SNIPPETS_KEY.to_string(), USAGE_KEY.to_string()])
    }
}

/// Matcher-facing view of the content-script cache.
pub struct CacheReader {
    backend: LocalBackend,
}

impl CacheReader {
    pub fn new(area: Arc<dyn KeyValueArea>) -> Self {
        Self {
            backend: LocalBackend::new(area),
        }
    }
}

impl SnippetSource for CacheReader {
    fn load(&self) -> std::result::Result<Vec<Snippet>, StorageError> {
        self.backend.read_cache()
    }
}
