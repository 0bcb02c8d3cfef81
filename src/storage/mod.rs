//! Layered snippet storage.
//!
//! Three physical stores compose under one manager: the quota-constrained
//! sync store (primary), the unsynced local store (fallback primary and
//! content-script cache host), and the write-only backup mirror. The
//! manager owns the policy: which store is authoritative, when local gets
//! promoted, and the rule that the cache is refreshed after every
//! successful authoritative write.

pub mod backup;
pub mod kv;
pub mod local;
pub mod sync;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Receiver;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::StorageError;
use crate::snippet::Snippet;
use crate::Result;

pub use backup::BackupBackend;
pub use kv::{AreaChange, AreaKind, JsonFileArea, KeyValueArea, KvMap, MemoryArea, QuotaConfig};
pub use local::{CacheReader, LocalBackend, CONTENT_CACHE_KEY};
pub use sync::{SyncBackend, LEGACY_SNIPPETS_KEY, SNIPPET_KEY_PREFIX};

/// Persisted marker the UI reads to offer backup recovery after an
/// account sign-out wiped the synced data.
pub const SYNC_DATA_LOST_KEY: &str = "syncDataLost";

/// Uniform contract the three physical stores implement.
pub trait SnippetStore: Send + Sync {
    fn get_snippets(&self) -> std::result::Result<Vec<Snippet>, StorageError>;
    fn save_snippets(&self, snippets: &[Snippet]) -> std::result::Result<(), StorageError>;
    fn clear(&self) -> std::result::Result<(), StorageError>;
}

/// Does this change batch look like an account sign-out wiping the synced
/// snippet set? Two or more `snip:` keys vanishing in one batch with no
/// replacement is treated as that signal; a single removal is an ordinary
/// delete.
pub fn is_sign_out_pattern(change: &AreaChange) -> bool {
    if change.area != AreaKind::Sync {
        return false;
    }
    let mut removed = 0usize;
    for key_change in &change.changes {
        if !key_change.key.starts_with(SNIPPET_KEY_PREFIX) {
            continue;
        }
        if key_change.new_value.is_some() {
            // Something is being written back; this is churn, not a wipe.
            return false;
        }
        removed += 1;
    }
    removed >= 2
}

pub struct StorageManager {
    sync: SyncBackend,
    local: LocalBackend,
    backup: BackupBackend,
    local_primary: AtomicBool,
    sync_events: Receiver<AreaChange>,
    local_area: Arc<dyn KeyValueArea>,
}

impl StorageManager {
    pub fn new(
        sync_area: Arc<dyn KeyValueArea>,
        local_area: Arc<dyn KeyValueArea>,
        backup: BackupBackend,
    ) -> Self {
        let sync_events = sync_area.subscribe();
        Self {
            sync: SyncBackend::new(sync_area),
            local: LocalBackend::new(local_area.clone()),
            backup,
            local_primary: AtomicBool::new(false),
            sync_events,
            local_area,
        }
    }

    /// Informational: whether a quota failure promoted the local store
    /// for this session. The UI may surface it; callers never see the
    /// underlying error.
    pub fn using_local_fallback(&self) -> bool {
        self.local_primary.load(Ordering::SeqCst)
    }

    fn primary(&self) -> &dyn SnippetStore {
        if self.using_local_fallback() {
            &self.local
        } else {
            &self.sync
        }
    }

    pub fn get_snippets(&self) -> Result<Vec<Snippet>> {
        Ok(self.primary().get_snippets()?)
    }

    /// Persist the full set. Sync quota exhaustion falls back to the
    /// local store transparently; afterwards the content-script cache is
    /// refreshed and the backup mirror updated, neither of which may fail
    /// the save.
    pub fn save_snippets(&self, snippets: &[Snippet]) -> Result<()> {
        if self.using_local_fallback() {
            self.local.save_snippets(snippets)?;
        } else {
            match self.sync.save_snippets(snippets) {
                Ok(()) => {}
                Err(StorageError::QuotaExceeded(message)) => {
                    warn!(%message, "sync quota exhausted, promoting local store to primary");
                    self.local.save_snippets(snippets)?;
                    self.local_primary.store(true, Ordering::SeqCst);
                }
                Err(other) => return Err(other.into()),
            }
        }

        if let Err(e) = self.local.write_cache(snippets) {
            // The matcher tolerates a stale cache by contract.
            warn!(error = %e, "content-script cache refresh failed");
        }
        // Mirror errors are already swallowed inside the backend.
        let _ = self.backup.save_snippets(snippets);
        Ok(())
    }

    /// Remove one snippet from every store along with its usage counter.
    pub fn delete_snippet(&self, id: Uuid) -> Result<()> {
        let mut snippets = self.get_snippets()?;
        snippets.retain(|snippet| snippet.id != id);
        self.save_snippets(&snippets)?;
        self.remove_usage(id);
        Ok(())
    }

    /// Wipe all three stores, the cache and the counters.
    pub fn clear(&self) -> Result<()> {
        self.sync.clear()?;
        self.local.clear()?;
        let _ = self.backup.clear();
        if let Err(e) = self.local.write_cache(&[]) {
            warn!(error = %e, "content-script cache clear failed");
        }
        Ok(())
    }

    /// Count one expansion (or manual copy). Failures are logged and
    /// swallowed so accounting can never break an expansion already
    /// applied to the page.
    pub fn increment_usage(&self, id: Uuid) {
        let result = self.local.read_usage().and_then(|mut counts| {
            counts.increment(id);
            self.local.write_usage(&counts)
        });
        if let Err(e) = result {
            warn!(error = %e, "usage counter increment failed");
        }
    }

    pub fn usage_count(&self, id: Uuid) -> u64 {
        match self.local.read_usage() {
            Ok(counts) => counts.get(id),
            Err(e) => {
                warn!(error = %e, "usage counter read failed");
                0
            }
        }
    }

    fn remove_usage(&self, id: Uuid) {
        let result = self.local.read_usage().and_then(|mut counts| {
            counts.remove(id);
            self.local.write_usage(&counts)
        });
        if let Err(e) = result {
            warn!(error = %e, "usage counter removal failed");
        }
    }

    /// Drain pending sync-area change batches, flagging data loss when
    /// the sign-out pattern appears. The host pumps this from its
    /// storage-change handler.
    pub fn poll_sync_changes(&self) {
        for change in self.sync_events.try_iter() {
            if is_sign_out_pattern(&change) {
                warn!(
                    removed = change.changes.len(),
                    "bulk removal of synced snippets detected, flagging possible sign-out"
                );
                let mut entries = KvMap::new();
                entries.insert(SYNC_DATA_LOST_KEY.to_string(), "true".to_string());
                if let Err(e) = self.local_area.set(&entries) {
                    warn!(error = %e, "failed to persist sync-data-lost marker");
                }
            }
        }
    }

    /// Whether the sign-out marker is set.
    pub fn sync_data_lost(&self) -> bool {
        matches!(
            self.local_area.get(SYNC_DATA_LOST_KEY),
            Ok(Some(value)) if value == "true"
        )
    }

    /// Explicit recovery flow — the only read of the backup mirror.
    /// Restores the mirrored set through the normal save path and clears
    /// the loss marker.
    pub fn recover_from_backup(&self) -> Result<Vec<Snippet>> {
        let snippets = self.backup.get_snippets()?;
        info!(count = snippets.len(), "restoring snippets from backup mirror");
        self.save_snippets(&snippets)?;
        if let Err(e) = self.local_area.remove(&[SYNC_DATA_LOST_KEY.to_string()]) {
            warn!(error = %e, "failed to clear sync-data-lost marker");
        }
        Ok(snippets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv::KeyChange;

    fn snippet(shortcut: &str, content: &str) -> Snippet {
        Snippet::new(shortcut, shortcut, content, vec![]).unwrap()
    }

    fn manager_with_quota(quota: QuotaConfig) -> (Arc<MemoryArea>, Arc<MemoryArea>, StorageManager) {
        let sync_area = Arc::new(MemoryArea::with_quota(AreaKind::Sync, quota));
        let local_area = Arc::new(MemoryArea::local());
        let manager = StorageManager::new(
            sync_area.clone(),
            local_area.clone(),
            BackupBackend::in_memory(),
        );
        (sync_area, local_area, manager)
    }

    fn manager() -> (Arc<MemoryArea>, Arc<MemoryArea>, StorageManager) {
        manager_with_quota(QuotaConfig::SYNC)
    }

    #[test]
    fn save_lands_in_sync_and_refreshes_cache() {
        let (sync_area, _, manager) = manager();
        let snippets = vec![snippet(";a", "alpha")];
        manager.save_snippets(&snippets).unwrap();

        assert!(!manager.using_local_fallback());
        assert_eq!(manager.get_snippets().unwrap(), snippets);
        assert_eq!(
            sync_area
                .get_all()
                .unwrap()
                .keys()
                .filter(|k| k.starts_with(SNIPPET_KEY_PREFIX))
                .count(),
            1
        );

        assert_eq!(manager.local.read_cache().unwrap(), snippets);
    }

    #[test]
    fn quota_failure_falls_back_to_local_without_raising() {
        // A quota so small any snippet write fails.
        let (sync_area, _, manager) =
            manager_with_quota(QuotaConfig { total_bytes: 8, per_item_bytes: 8, max_items: 512 });
        let snippets = vec![snippet(";a", "alpha")];

        manager.save_snippets(&snippets).unwrap();

        assert!(manager.using_local_fallback());
        assert_eq!(manager.get_snippets().unwrap(), snippets);
        assert!(sync_area.get_all().unwrap().is_empty());
        // Cache refreshed from the fallback write too.
        assert_eq!(manager.local.read_cache().unwrap(), snippets);

        // Later saves go straight to local for the rest of the session.
        let more = vec![snippet(";a", "alpha"), snippet(";b", "beta")];
        manager.save_snippets(&more).unwrap();
        assert_eq!(manager.get_snippets().unwrap(), more);
    }

    #[test]
    fn every_successful_save_mirrors_to_backup() {
        let (_, _, manager) = manager();
        let snippets = vec![snippet(";a", "alpha")];
        manager.save_snippets(&snippets).unwrap();
        assert_eq!(manager.backup.get_snippets().unwrap(), snippets);
    }

    #[test]
    fn delete_removes_snippet_and_usage_counter() {
        let (_, _, manager) = manager();
        let keep = snippet(";keep", "kept");
        let gone = snippet(";gone", "dropped");
        manager.save_snippets(&[keep.clone(), gone.clone()]).unwrap();
        manager.increment_usage(gone.id);
        assert_eq!(manager.usage_count(gone.id), 1);

        manager.delete_snippet(gone.id).unwrap();
        assert_eq!(manager.get_snippets().unwrap(), vec![keep]);
        assert_eq!(manager.usage_count(gone.id), 0);
        assert!(manager.backup.get_snippets().unwrap().len() == 1);
    }

    #[test]
    fn usage_counter_accumulates() {
        let (_, _, manager) = manager();
        let s = snippet(";a", "alpha");
        manager.increment_usage(s.id);
        manager.increment_usage(s.id);
        manager.increment_usage(s.id);
        assert_eq!(manager.usage_count(s.id), 3);
    }

    #[test]
    fn bulk_sync_removal_sets_data_lost_marker() {
        let (sync_area, _, manager) = manager();
        let snippets = vec![snippet(";a", "alpha"), snippet(";b", "beta")];
        manager.save_snippets(&snippets).unwrap();

        let keys: Vec<String> = snippets
            .iter()
            .map(|s| SyncBackend::snippet_key(&s.id))
            .collect();
        sync_area.remove(&keys).unwrap();
        manager.poll_sync_changes();

        assert!(manager.sync_data_lost());
    }

    #[test]
    fn single_removal_does_not_set_marker() {
        let (sync_area, _, manager) = manager();
        let snippets = vec![snippet(";a", "alpha"), snippet(";b", "beta")];
        manager.save_snippets(&snippets).unwrap();

        sync_area
            .remove(&[SyncBackend::snippet_key(&snippets[0].id)])
            .unwrap();
        manager.poll_sync_changes();

        assert!(!manager.sync_data_lost());
    }

    #[test]
    fn removal_with_replacement_is_not_a_sign_out() {
        let change = AreaChange {
            area: AreaKind::Sync,
            changes: vec![
                KeyChange {
                    key: "snip:1".into(),
                    old_value: Some("a".into()),
                    new_value: None,
                },
                KeyChange {
                    key: "snip:2".into(),
                    old_value: Some("b".into()),
                    new_value: Some("c".into()),
                },
            ],
        };
        assert!(!is_sign_out_pattern(&change));
    }

    #[test]
    fn local_area_changes_never_flag_sign_out() {
        let change = AreaChange {
            area: AreaKind::Local,
            changes: vec![
                KeyChange { key: "snip:1".into(), old_value: Some("a".into()), new_value: None },
                KeyChange { key: "snip:2".into(), old_value: Some("b".into()), new_value: None },
            ],
        };
        assert!(!is_sign_out_pattern(&change));
    }

    #[test]
    fn recovery_restores_from_backup_and_clears_marker() {
        let (sync_area, local_area, manager) = manager();
        let snippets = vec![snippet(";a", "alpha"), snippet(";b", "beta")];
        manager.save_snippets(&snippets).unwrap();

        // Simulate the sign-out wipe.
        let keys: Vec<String> = snippets
            .iter()
            .map(|s| SyncBackend::snippet_key(&s.id))
            .collect();
        sync_area.remove(&keys).unwrap();
        manager.poll_sync_changes();
        assert!(manager.sync_data_lost());
        assert!(manager.get_snippets().unwrap().is_empty());

        let mut recovered = manager.recover_from_backup().unwrap();
        recovered.sort_by_key(|s| s.shortcut.clone());
        assert_eq!(recovered, snippets);
        assert_eq!(manager.get_snippets().unwrap().len(), 2);
        assert!(!manager.sync_data_lost());
        assert!(local_area.get(SYNC_DATA_LOST_KEY).unwrap().is_none());
    }

    #[test]
    fn clear_empties_all_stores_and_cache() {
        let (sync_area, _, manager) = manager();
        manager.save_snippets(&[snippet(";a", "alpha")]).unwrap();
        manager.clear().unwrap();

        assert!(manager.get_snippets().unwrap().is_empty());
        assert!(sync_area
            .get_all()
            .unwrap()
            .keys()
            .all(|k| !k.starts_with(SNIPPET_KEY_PREFIX)));
        assert!(manager.backup.get_snippets().unwrap().is_empty());
        assert!(manager.local.read_cache().unwrap().is_empty());
    }
}
