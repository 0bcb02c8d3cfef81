//! Key/value substrate underneath the snippet stores.
//!
//! Models the browser storage areas the product runs on: string keys,
//! JSON-string values, per-area quotas, and change notifications keyed by
//! area and key. [`MemoryArea`] enforces the sync substrate's quotas and
//! fails with substrate-style messages so the quota-sniffing contract in
//! the sync backend is exercised honestly; [`JsonFileArea`] persists an
//! unsynced area to disk.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::errors::StorageError;

pub type KvMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaKind {
    Sync,
    Local,
}

/// One key's transition within a change batch.
#[derive(Debug, Clone)]
pub struct KeyChange {
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

/// A change batch as delivered by the platform: the area it happened in
/// and every key that changed in the same write.
#[derive(Debug, Clone)]
pub struct AreaChange {
    pub area: AreaKind,
    pub changes: Vec<KeyChange>,
}

/// Uniform surface over a storage area. All operations are best-effort
/// and eventually consistent; writes are atomic only at single-key
/// granularity.
pub trait KeyValueArea: Send + Sync {
    fn kind(&self) -> AreaKind;
    fn get(&self, key: &str) -> std::result::Result<Option<String>, StorageError>;
    fn get_all(&self) -> std::result::Result<KvMap, StorageError>;
    fn set(&self, entries: &KvMap) -> std::result::Result<(), StorageError>;
    fn remove(&self, keys: &[String]) -> std::result::Result<(), StorageError>;
    /// Subscribe to change batches. Events are delivered on the writer's
    /// thread; slow subscribers only buffer, they never block writes.
    fn subscribe(&self) -> Receiver<AreaChange>;
}

/// Fan-out of change batches to any number of subscribers.
#[derive(Default)]
pub struct ChangeHub {
    senders: Mutex<Vec<Sender<AreaChange>>>,
}

impl ChangeHub {
    pub fn subscribe(&self) -> Receiver<AreaChange> {
        let (tx, rx) = unbounded();
        self.senders.lock().push(tx);
        rx
    }

    pub fn publish(&self, change: AreaChange) {
        // Dropped receivers are pruned as we go.
        self.senders.lock().retain(|tx| tx.send(change.clone()).is_ok());
    }
}

/// Quota limits of an area, counted over key + value bytes.
#[derive(Debug, Clone, Copy)]
pub struct QuotaConfig {
    pub total_bytes: usize,
    pub per_item_bytes: usize,
    pub max_items: usize,
}

impl QuotaConfig {
    /// The sync substrate's documented limits.
    pub const SYNC: QuotaConfig = QuotaConfig {
        total_bytes: 102_400,
        per_item_bytes: 8_192,
        max_items: 512,
    };

    pub const UNLIMITED: QuotaConfig = QuotaConfig {
        total_bytes: usize::MAX,
        per_item_bytes: usize::MAX,
        max_items: usize::MAX,
    };
}

/// In-memory area with quota enforcement and change notifications.
pub struct MemoryArea {
    kind: AreaKind,
    quota: QuotaConfig,
    entries: Mutex<KvMap>,
    hub: ChangeHub,
}

impl MemoryArea {
    pub fn sync() -> Self {
        Self::with_quota(AreaKind::Sync, QuotaConfig::SYNC)
    }

    pub fn local() -> Self {
        Self::with_quota(AreaKind::Local, QuotaConfig::UNLIMITED)
    }

    pub fn with_quota(kind: AreaKind, quota: QuotaConfig) -> Self {
        Self {
            kind,
            quota,
            entries: Mutex::new(KvMap::new()),
            hub: ChangeHub::default(),
        }
    }

    fn check_quota(&self, merged: &KvMap) -> std::result::Result<(), StorageError> {
        // Substrate-style failure messages; the sync backend sniffs these
        // substrings to classify quota errors.
        for (key, value) in merged {
            if key.len() + value.len() > self.quota.per_item_bytes {
                return Err(StorageError::Backend(format!(
                    "QUOTA_BYTES_PER_ITEM quota exceeded for key '{key}'"
                )));
            }
        }
        let total: usize = merged.iter().map(|(k, v)| k.len() + v.len()).sum();
        if total > self.quota.total_bytes {
            return Err(StorageError::Backend(
                "QUOTA_BYTES quota exceeded".to_string(),
            ));
        }
        if merged.len() > self.quota.max_items {
            return Err(StorageError::Backend("MAX_ITEMS quota exceeded".to_string()));
        }
        Ok(())
    }
}

impl KeyValueArea for MemoryArea {
    fn kind(&self) -> AreaKind {
        self.kind
    }

    fn get(&self, key: &str) -> std::result::Result<Option<String>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn get_all(&self) -> std::result::Result<KvMap, StorageError> {
        Ok(self.entries.lock().clone())
    }

    fn set(&self, entries: &KvMap) -> std::result::Result<(), StorageError> {
        let mut current = self.entries.lock();
        let mut merged = current.clone();
        for (key, value) in entries {
            merged.insert(key.clone(), value.clone());
        }
        self.check_quota(&merged)?;

        let changes: Vec<KeyChange> = entries
            .iter()
            .map(|(key, value)| KeyChange {
                key: key.clone(),
                old_value: current.get(key).cloned(),
                new_value: Some(value.clone()),
            })
            .collect();
        *current = merged;
        drop(current);

        if !changes.is_empty() {
            self.hub.publish(AreaChange { area: self.kind, changes });
        }
        Ok(())
    }

    fn remove(&self, keys: &[String]) -> std::result::Result<(), StorageError> {
        let mut current = self.entries.lock();
        let mut changes = Vec::new();
        for key in keys {
            if let Some(old) = current.remove(key) {
                changes.push(KeyChange {
                    key: key.clone(),
                    old_value: Some(old),
                    new_value: None,
                });
            }
        }
        drop(current);

        if !changes.is_empty() {
            self.hub.publish(AreaChange { area: self.kind, changes });
        }
        Ok(())
    }

    fn subscribe(&self) -> Receiver<AreaChange> {
        self.hub.subscribe()
    }
}

/// Default on-disk location for the unsynced areas.
pub fn default_data_dir() -> std::result::Result<PathBuf, StorageError> {
    let base = dirs::data_dir()
        .ok_or_else(|| StorageError::Backend("could not determine data directory".into()))?;
    let dir = base.join("clipio");
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// File-backed area: the whole map serialized as one JSON object,
/// rewritten via a temp file so a crash never leaves a torn store.
pub struct JsonFileArea {
    kind: AreaKind,
    path: PathBuf,
    entries: Mutex<KvMap>,
    hub: ChangeHub,
}

impl JsonFileArea {
    pub fn open(kind: AreaKind, path: &Path) -> std::result::Result<Self, StorageError> {
        let entries = if path.exists() {
            let raw = fs::read_to_string(path)?;
            match serde_json::from_str::<KvMap>(&raw) {
                Ok(map) => map,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable area file, starting empty");
                    KvMap::new()
                }
            }
        } else {
            KvMap::new()
        };
        debug!(path = %path.display(), keys = entries.len(), "opened file-backed area");
        Ok(Self {
            kind,
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
            hub: ChangeHub::default(),
        })
    }

    fn persist(&self, entries: &KvMap) -> std::result::Result<(), StorageError> {
        let raw = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueArea for JsonFileArea {
    fn kind(&self) -> AreaKind {
        self.kind
    }

    fn get(&self, key: &str) -> std::result::Result<Option<String>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn get_all(&self) -> std::result::Result<KvMap, StorageError> {
        Ok(self.entries.lock().clone())
    }

    fn set(&self, entries: &KvMap) -> std::result::Result<(), StorageError> {
        let mut current = self.entries.lock();
        let mut changes = Vec::new();
        let mut merged = current.clone();
        for (key, value) in entries {
            changes.push(KeyChange {
                key: key.clone(),
                old_value: merged.insert(key.clone(), value.clone()),
                new_value: Some(value.clone()),
            });
        }
        self.persist(&merged)?;
        *current = merged;
        drop(current);

        if !changes.is_empty() {
            self.hub.publish(AreaChange { area: self.kind, changes });
        }
        Ok(())
    }

    fn remove(&self, keys: &[String]) -> std::result::Result<(), StorageError> {
        let mut current = self.entries.lock();
        let mut merged = current.clone();
        let mut changes = Vec::new();
        for key in keys {
            if let Some(old) = merged.remove(key) {
                changes.push(KeyChange {
                    key: key.clone(),
                    old_value: Some(old),
                    new_value: None,
                });
            }
        }
        if changes.is_empty() {
            return Ok(());
        }
        self.persist(&merged)?;
        *current = merged;
        drop(current);

        self.hub.publish(AreaChange { area: self.kind, changes });
        Ok(())
    }

    fn subscribe(&self) -> Receiver<AreaChange> {
        self.hub.subscribe()
    }
}
