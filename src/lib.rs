//! Clipio - snippet expansion core
//!
//! The engine behind the clipio text expander: shortcut detection against
//! live text surfaces, placeholder expansion, in-place application, and
//! the layered sync/local/backup snippet storage with quota fallback and
//! disaster recovery. Hosting surfaces (page contexts, the editor UI)
//! link this crate and drive it with their own event loops.

pub mod applier;
pub mod errors;
pub mod expander;
pub mod matcher;
pub mod snippet;
pub mod storage;

pub use applier::{
    apply_to_editable, apply_to_field, feedback_anchor, CaretPosition, CaretRectSource, DomNode,
    FeedbackAnchor, FieldKind, NodeAddress, PlainTextRenderer, RichContentRenderer,
    SyntheticEvent, TextField,
};
pub use errors::{ClipioError, ExpandError, Result, StorageError};
pub use expander::{
    strip_markdown, ClipboardProvider, DateStyle, Expanded, Expander, Richness, SystemClipboard,
};
pub use matcher::{
    find_shortcut, AlwaysAlive, ContextProbe, Debouncer, ShortcutMatch, SnippetMatcher,
    SnippetSource, DEBOUNCE_INTERVAL,
};
pub use snippet::{Snippet, SnippetExport, UsageCounts, EXPORT_FORMAT, EXPORT_VERSION};
pub use storage::{
    BackupBackend, CacheReader, JsonFileArea, KeyValueArea, LocalBackend, MemoryArea,
    QuotaConfig, SnippetStore, StorageManager, SyncBackend,
};

/// Where the host platform navigates on uninstall. Informational only.
pub const UNINSTALL_URL: &str = "https://clipio.app/uninstalled";
