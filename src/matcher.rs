//! Shortcut detection against live text surfaces.
//!
//! A [`SnippetMatcher`] is constructed once per page context and owns its
//! own snapshot of the cached snippet set, its debounce timer and its
//! context probe, so nothing here relies on process-wide state. Detection
//! itself is pure: it never touches storage and never mutates the host.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::errors::StorageError;
use crate::snippet::Snippet;

/// Trailing-edge debounce interval between the last input event and a
/// deferred match attempt.
pub const DEBOUNCE_INTERVAL: Duration = Duration::from_millis(300);

/// A detected shortcut immediately before the caret.
///
/// `start..end` is the character span of the shortcut in the surface text;
/// the applier replaces exactly that span.
#[derive(Debug, Clone, PartialEq)]
pub struct ShortcutMatch {
    pub snippet: Snippet,
    pub start: usize,
    pub end: usize,
}

/// Capability probe for the hosting extension context. Once the probe
/// reports dead (extension reloaded under a still-open page), the matcher
/// shuts down silently and permanently.
pub trait ContextProbe: Send + Sync {
    fn is_alive(&self) -> bool;
}

/// Probe for hosts that cannot be invalidated (tests, native embedders).
pub struct AlwaysAlive;

impl ContextProbe for AlwaysAlive {
    fn is_alive(&self) -> bool {
        true
    }
}

/// Where the matcher reloads its snippet snapshot from — in production the
/// content-script cache under the local store.
pub trait SnippetSource: Send + Sync {
    fn load(&self) -> std::result::Result<Vec<Snippet>, StorageError>;
}

/// Suffix-match the text before `caret` against the snippet set.
///
/// A match requires the shortcut to sit flush against the caret and to be
/// preceded by start-of-text or whitespace, so shortcuts embedded in a
/// longer word never fire. First snippet in set order wins; there is no
/// longest-match scoring.
pub fn find_shortcut(snippets: &[Snippet], text: &str, caret: usize) -> Option<ShortcutMatch> {
    let chars: Vec<char> = text.chars().collect();
    let caret = caret.min(chars.len());

    for snippet in snippets {
        let shortcut: Vec<char> = snippet.shortcut.chars().collect();
        if shortcut.is_empty() || shortcut.len() > caret {
            continue;
        }
        let start = caret - shortcut.len();
        if chars[start..caret] != shortcut[..] {
            continue;
        }
        if start > 0 && !chars[start - 1].is_whitespace() {
            continue;
        }
        return Some(ShortcutMatch {
            snippet: snippet.clone(),
            start,
            end: caret,
        });
    }
    None
}

/// Single cancellable delayed-task primitive.
///
/// Each `schedule` replaces any pending deadline (trailing-edge debounce,
/// not throttle); the immediate path is "cancel, then run now". Time is
/// passed in so hosts and tests drive the clock.
#[derive(Debug)]
pub struct Debouncer {
    interval: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(interval: Duration) -> Self {
        Self { interval, deadline: None }
    }

    pub fn schedule(&mut self, now: Instant) {
        self.deadline = Some(now + self.interval);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Consume the pending deadline if it has elapsed.
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Per-surface matcher instance.
pub struct SnippetMatcher {
    snippets: Vec<Snippet>,
    source: Arc<dyn SnippetSource>,
    probe: Arc<dyn ContextProbe>,
    debounce: Debouncer,
    disabled: bool,
}

impl SnippetMatcher {
    pub fn new(source: Arc<dyn SnippetSource>, probe: Arc<dyn ContextProbe>) -> Self {
        Self::with_interval(source, probe, DEBOUNCE_INTERVAL)
    }

    pub fn with_interval(
        source: Arc<dyn SnippetSource>,
        probe: Arc<dyn ContextProbe>,
        interval: Duration,
    ) -> Self {
        let mut matcher = Self {
            snippets: Vec::new(),
            source,
            probe,
            debounce: Debouncer::new(interval),
            disabled: false,
        };
        matcher.refresh();
        matcher
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Probe the hosting context; on invalidation, tear down and stay down.
    fn context_ok(&mut self) -> bool {
        if self.disabled {
            return false;
        }
        if !self.probe.is_alive() {
            debug!("extension context invalidated, disabling matcher");
            self.debounce.cancel();
            self.disabled = true;
            return false;
        }
        true
    }

    /// Reload the snippet snapshot from the cache. Called on a
    /// storage-change notification; a failed read keeps the previous
    /// snapshot, since the cache is best-effort by contract.
    pub fn refresh(&mut self) {
        if !self.context_ok() {
            return;
        }
        match self.source.load() {
            Ok(snippets) => self.snippets = snippets,
            Err(e) => warn!(error = %e, "snippet cache refresh failed, keeping stale snapshot"),
        }
    }

    /// Register an input event: restart the debounce window.
    pub fn on_input(&mut self, now: Instant) {
        if !self.context_ok() {
            return;
        }
        self.debounce.schedule(now);
    }

    /// Deferred matching path. Returns a match only once the debounce
    /// window has elapsed with no further input.
    pub fn poll(&mut self, text: &str, caret: usize, now: Instant) -> Option<ShortcutMatch> {
        if !self.context_ok() || !self.debounce.fire_if_due(now) {
            return None;
        }
        self.match_now(text, caret)
    }

    /// Immediate path for Space/Tab: cancel any pending deferred attempt
    /// and match synchronously. On a match the host must suppress the
    /// default character insertion so the replacement lands in one step.
    pub fn on_commit_key(&mut self, text: &str, caret: usize) -> Option<ShortcutMatch> {
        if !self.context_ok() {
            return None;
        }
        self.debounce.cancel();
        self.match_now(text, caret)
    }

    // Both trigger paths funnel through here so the two cannot drift.
    fn match_now(&self, text: &str, caret: usize) -> Option<ShortcutMatch> {
        find_shortcut(&self.snippets, text, caret)
    }
}
