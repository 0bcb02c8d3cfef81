//! Sync-replicated snippet store.
//!
//! Each snippet lives under its own `snip:<id>` key so the set spreads
//! across the substrate's total/per-item/key-count quotas instead of
//! hitting the per-item cap as one blob. Reads migrate the legacy
//! single-key aggregate layout in place; writes are diffed against what is
//! already stored to stay under the substrate's write rate limits.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::errors::StorageError;
use crate::snippet::Snippet;
use crate::storage::kv::{KeyValueArea, KvMap};
use crate::storage::SnippetStore;

/// Per-snippet key prefix in the sync area.
pub const SNIPPET_KEY_PREFIX: &str = "snip:";
/// Pre-migration aggregate key holding the whole set as one JSON array.
pub const LEGACY_SNIPPETS_KEY: &str = "snippets";

/// Substrate quota failures are only identifiable by message text.
pub fn is_quota_message(message: &str) -> bool {
    let upper = message.to_ascii_uppercase();
    upper.contains("QUOTA") || upper.contains("MAX_ITEMS")
}

pub struct SyncBackend {
    area: Arc<dyn KeyValueArea>,
}

impl SyncBackend {
    pub fn new(area: Arc<dyn KeyValueArea>) -> Self {
        Self { area }
    }

    pub fn snippet_key(id: &uuid::Uuid) -> String {
        format!("{SNIPPET_KEY_PREFIX}{id}")
    }

    /// Classify raw substrate failures; quota signals become the
    /// distinguished variant, everything else propagates unchanged.
    fn translate(err: StorageError) -> StorageError {
        match err {
            StorageError::Backend(message) if is_quota_message(&message) => {
                StorageError::QuotaExceeded(message)
            }
            other => other,
        }
    }

    fn parse_per_key(all: &KvMap) -> Vec<Snippet> {
        let mut snippets = Vec::new();
        for (key, raw) in all.iter().filter(|(k, _)| k.starts_with(SNIPPET_KEY_PREFIX)) {
            match serde_json::from_str::<Snippet>(raw) {
                Ok(snippet) => snippets.push(snippet),
                // One bad record never aborts the whole read.
                Err(e) => warn!(%key, error = %e, "skipping malformed snippet record"),
            }
        }
        snippets
    }

    /// One-time migration from the aggregate layout. Interruption-safe:
    /// the legacy key is deleted only after the per-key rewrite succeeds,
    /// so a failed write retries on the next read instead of losing data.
    fn migrate_legacy(&self, raw: &str, all: &KvMap) -> std::result::Result<Vec<Snippet>, StorageError> {
        let snippets: Vec<Snippet> = match serde_json::from_str(raw) {
            Ok(snippets) => snippets,
            Err(e) => {
                warn!(error = %e, "legacy snippet blob is unreadable, leaving it in place");
                return Ok(Self::parse_per_key(all));
            }
        };
        info!(count = snippets.len(), "migrating legacy aggregate snippet storage");

        let mut entries = KvMap::new();
        for snippet in &snippets {
            entries.insert(Self::snippet_key(&snippet.id), serde_json::to_string(snippet)?);
        }
        if let Err(e) = self.area.set(&entries).map_err(Self::translate) {
            warn!(error = %e, "legacy migration write failed, will retry on next read");
            return Ok(snippets);
        }
        if let Err(e) = self.area.remove(&[LEGACY_SNIPPETS_KEY.to_string()]) {
            // Harmless: the next read re-runs the (idempotent) migration.
            warn!(error = %e, "failed to delete legacy key after migration");
        }
        Ok(snippets)
    }
}

impl SnippetStore for SyncBackend {
    fn get_snippets(&self) -> std::result::Result<Vec<Snippet>, StorageError> {
        let all = self.area.get_all()?;
        if let Some(raw) = all.get(LEGACY_SNIPPETS_KEY) {
            return self.migrate_legacy(raw, &all);
        }
        Ok(Self::parse_per_key(&all))
    }

    fn save_snippets(&self, snippets: &[Snippet]) -> std::result::Result<(), StorageError> {
        let existing = self.area.get_all()?;

        let mut upserts = KvMap::new();
        let mut keep: HashSet<String> = HashSet::with_capacity(snippets.len());
        for snippet in snippets {
            let key = Self::snippet_key(&snippet.id);
            let raw = serde_json::to_string(snippet)?;
            keep.insert(key.clone());
            // Upsert only when the serialized form actually changed.
            if existing.get(&key) != Some(&raw) {
                upserts.insert(key, raw);
            }
        }

        // Keys present in the store but missing from the incoming list are
        // deletions. Removing them first also frees quota for the upserts.
        let stale: Vec<String> = existing
            .keys()
            .filter(|key| key.starts_with(SNIPPET_KEY_PREFIX) && !keep.contains(*key))
            .cloned()
            .collect();
        if !stale.is_empty() {
            debug!(count = stale.len(), "removing deleted snippet keys");
            self.area.remove(&stale).map_err(Self::translate)?;
        }
        if !upserts.is_empty() {
            debug!(count = upserts.len(), "upserting changed snippet keys");
            self.area.set(&upserts).map_err(Self::translate)?;
        }
        Ok(())
    }

    fn clear(&self) -> std::result::Result<(), StorageError> {
        let all = self.area.get_all()?;
        let mut keys: Vec<String> = all
            .keys()
            .filter(|key| key.starts_with(SNIPPET_KEY_PREFIX))
            .cloned()
            .collect();
        if all.contains_key(LEGACY_SNIPPETS_KEY) {
            keys.push(LEGACY_SNIPPETS_KEY.to_string());
        }
        if keys.is_empty() {
            return Ok(());
        }
        self.area.remove(&keys)
    }
}
