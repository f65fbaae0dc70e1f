//! Filesystem change source
//!
//! Wraps a `notify` watcher and turns raw OS notifications into typed
//! [`FsChangeEvent`]s. Watch roots are tracked in registration order; the
//! canonical path of a root doubles as the channel name events are
//! eventually broadcast on (see `watch::bridge`).
//!
//! Unwatching a root is logical only: the root leaves the tracked list and
//! event forwarding stops, but the underlying OS watch is kept until
//! [`ChangeSource::stop`]. `notify` could tear the watch down per-root;
//! the logical-removal semantics are intentional.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use notify::event::{Event, EventKind, ModifyKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::error::{HubError, Result};

/// Path fragments skipped by default on every watch root.
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "__pycache__",
    ".venv",
];

/// Classified change kind for one OS notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    Moved,
}

/// One filesystem change, produced once per underlying OS notification.
#[derive(Debug, Clone)]
pub struct FsChangeEvent {
    pub kind: ChangeKind,
    pub path: PathBuf,
    /// Source path of a move (only for [`ChangeKind::Moved`])
    pub previous_path: Option<PathBuf>,
    pub timestamp: DateTime<Utc>,
    pub is_directory: bool,
}

/// A filesystem path under observation.
#[derive(Debug, Clone)]
pub struct WatchRoot {
    /// Canonical absolute path; also the channel name for its events
    pub path: PathBuf,
    pub recursive: bool,
    /// Case-insensitive substring patterns (deliberately not glob)
    pub ignore: Vec<String>,
}

/// Observes watch roots and emits [`FsChangeEvent`]s on a channel.
pub struct ChangeSource {
    watcher: Mutex<Option<RecommendedWatcher>>,
    roots: Arc<RwLock<Vec<WatchRoot>>>,
    running: Arc<AtomicBool>,
}

impl ChangeSource {
    /// Create the source and the receiving end of its event stream.
    pub fn new() -> Result<(Self, UnboundedReceiver<FsChangeEvent>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let roots: Arc<RwLock<Vec<WatchRoot>>> = Arc::new(RwLock::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(true));

        let watcher = Self::spawn_watcher(tx, Arc::clone(&roots), Arc::clone(&running))?;

        Ok((
            Self {
                watcher: Mutex::new(Some(watcher)),
                roots,
                running,
            },
            rx,
        ))
    }

    fn spawn_watcher(
        tx: UnboundedSender<FsChangeEvent>,
        roots: Arc<RwLock<Vec<WatchRoot>>>,
        running: Arc<AtomicBool>,
    ) -> Result<RecommendedWatcher> {
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if !running.load(Ordering::SeqCst) {
                return;
            }
            match res {
                Ok(event) => {
                    let Some(change) = classify(&event) else {
                        return;
                    };
                    if is_ignored(&change.path, &roots.read()) {
                        tracing::debug!("Ignoring change at {:?}", change.path);
                        return;
                    }
                    // Receiver dropped means the bridge is gone; nothing to do
                    let _ = tx.send(change);
                }
                Err(e) => tracing::error!("Watcher error: {}", e),
            }
        })?;
        Ok(watcher)
    }

    /// Register a watch root.
    ///
    /// Fails if the path does not exist or is not a directory. Registering
    /// the same canonical path twice is an idempotent success.
    pub fn watch(&self, path: &Path, recursive: bool) -> Result<()> {
        self.watch_with(path, recursive, Vec::new())
    }

    /// Like [`ChangeSource::watch`] with extra per-root ignore patterns on
    /// top of [`DEFAULT_IGNORE_PATTERNS`].
    pub fn watch_with(&self, path: &Path, recursive: bool, extra_ignore: Vec<String>) -> Result<()> {
        if !path.exists() {
            return Err(HubError::WatchPathNotFound {
                path: path.display().to_string(),
            });
        }
        if !path.is_dir() {
            return Err(HubError::WatchPathNotADirectory {
                path: path.display().to_string(),
            });
        }
        let canonical = path.canonicalize()?;

        {
            let roots = self.roots.read();
            if roots.iter().any(|r| r.path == canonical) {
                tracing::debug!("Already watching {:?}", canonical);
                return Ok(());
            }
        }

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        {
            let mut watcher = self.watcher.lock();
            let Some(watcher) = watcher.as_mut() else {
                return Err(HubError::Watcher {
                    message: "change source is stopped".to_string(),
                });
            };
            watcher.watch(&canonical, mode)?;
        }

        let mut ignore: Vec<String> = DEFAULT_IGNORE_PATTERNS
            .iter()
            .map(|p| p.to_string())
            .collect();
        ignore.extend(extra_ignore);

        self.roots.write().push(WatchRoot {
            path: canonical.clone(),
            recursive,
            ignore,
        });
        tracing::info!("Watching {:?} (recursive={})", canonical, recursive);
        Ok(())
    }

    /// Stop forwarding events for a root. Returns whether it was tracked.
    ///
    /// Logical removal only: the OS-level watch stays registered until
    /// [`ChangeSource::stop`].
    pub fn unwatch(&self, path: &Path) -> bool {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let mut roots = self.roots.write();
        let before = roots.len();
        roots.retain(|r| r.path != canonical);
        let removed = roots.len() != before;
        if removed {
            tracing::info!("Unwatched {:?}", canonical);
        }
        removed
    }

    /// Whether a path is currently tracked (by canonical path).
    pub fn is_tracked(&self, path: &Path) -> bool {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.roots.read().iter().any(|r| r.path == canonical)
    }

    /// Tracked roots in registration order.
    pub fn tracked_roots(&self) -> Vec<WatchRoot> {
        self.roots.read().clone()
    }

    /// Whether the source is observing.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop observation and release all OS watches. Idempotent.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!("Stopping change source");
        }
        *self.watcher.lock() = None;
    }
}

impl Drop for ChangeSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Classify a raw notification into a change event, if it is one we care
/// about. Access-only notifications are dropped.
fn classify(event: &Event) -> Option<FsChangeEvent> {
    let (kind, path, previous_path) = match &event.kind {
        EventKind::Create(_) => (ChangeKind::Created, event.paths.first()?.clone(), None),
        EventKind::Remove(_) => (ChangeKind::Deleted, event.paths.first()?.clone(), None),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // paths = [from, to] when the platform reports a paired rename
            let previous = event.paths.first()?.clone();
            let current = event.paths.get(1)?.clone();
            (ChangeKind::Moved, current, Some(previous))
        }
        // A bare rename half degrades to delete / create
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            (ChangeKind::Deleted, event.paths.first()?.clone(), None)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            (ChangeKind::Created, event.paths.first()?.clone(), None)
        }
        EventKind::Modify(_) | EventKind::Any => {
            (ChangeKind::Modified, event.paths.first()?.clone(), None)
        }
        EventKind::Access(_) | EventKind::Other => return None,
    };

    let is_directory = path.is_dir();
    Some(FsChangeEvent {
        kind,
        path,
        previous_path,
        timestamp: Utc::now(),
        is_directory,
    })
}

/// Check a path against the ignore patterns of every tracked root.
/// Patterns are matched as case-insensitive substrings of the full path.
fn is_ignored(path: &Path, roots: &[WatchRoot]) -> bool {
    let lower = path.to_string_lossy().to_lowercase();
    roots
        .iter()
        .flat_map(|r| r.ignore.iter())
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, RemoveKind};
    use tempfile::TempDir;

    fn event_with(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for p in paths {
            event = event.add_path(PathBuf::from(p));
        }
        event
    }

    #[test]
    fn test_classify_create() {
        let event = event_with(EventKind::Create(CreateKind::File), &["/data/x.txt"]);
        let change = classify(&event).unwrap();
        assert_eq!(change.kind, ChangeKind::Created);
        assert_eq!(change.path, PathBuf::from("/data/x.txt"));
        assert!(change.previous_path.is_none());
    }

    #[test]
    fn test_classify_remove() {
        let event = event_with(EventKind::Remove(RemoveKind::File), &["/data/x.txt"]);
        assert_eq!(classify(&event).unwrap().kind, ChangeKind::Deleted);
    }

    #[test]
    fn test_classify_paired_rename() {
        let event = event_with(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/data/old.txt", "/data/new.txt"],
        );
        let change = classify(&event).unwrap();
        assert_eq!(change.kind, ChangeKind::Moved);
        assert_eq!(change.path, PathBuf::from("/data/new.txt"));
        assert_eq!(change.previous_path, Some(PathBuf::from("/data/old.txt")));
    }

    #[test]
    fn test_classify_access_dropped() {
        let event = event_with(
            EventKind::Access(notify::event::AccessKind::Read),
            &["/data/x.txt"],
        );
        assert!(classify(&event).is_none());
    }

    #[test]
    fn test_ignore_filter_is_substring_and_case_insensitive() {
        let roots = vec![WatchRoot {
            path: PathBuf::from("/data"),
            recursive: true,
            ignore: vec![".git".to_string(), "node_modules".to_string()],
        }];
        assert!(is_ignored(Path::new("/data/.git/HEAD"), &roots));
        assert!(is_ignored(Path::new("/data/NODE_MODULES/pkg/i.js"), &roots));
        assert!(!is_ignored(Path::new("/data/src/main.rs"), &roots));
    }

    #[test]
    fn test_watch_rejects_missing_path() {
        let (source, _rx) = ChangeSource::new().unwrap();
        let err = source
            .watch(Path::new("/definitely/not/here"), true)
            .unwrap_err();
        assert!(matches!(err, HubError::WatchPathNotFound { .. }));
    }

    #[test]
    fn test_watch_rejects_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, "x").unwrap();

        let (source, _rx) = ChangeSource::new().unwrap();
        let err = source.watch(&file, true).unwrap_err();
        assert!(matches!(err, HubError::WatchPathNotADirectory { .. }));
    }

    #[test]
    fn test_watch_duplicate_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (source, _rx) = ChangeSource::new().unwrap();

        source.watch(dir.path(), true).unwrap();
        source.watch(dir.path(), true).unwrap();
        assert_eq!(source.tracked_roots().len(), 1);
    }

    #[test]
    fn test_unwatch_is_logical() {
        let dir = TempDir::new().unwrap();
        let (source, _rx) = ChangeSource::new().unwrap();

        source.watch(dir.path(), true).unwrap();
        assert!(source.is_tracked(dir.path()));

        assert!(source.unwatch(dir.path()));
        assert!(!source.is_tracked(dir.path()));
        assert!(source.tracked_roots().is_empty());

        // Second unwatch reports not-tracked
        assert!(!source.unwatch(dir.path()));
        // Observation itself is still running
        assert!(source.is_running());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (source, _rx) = ChangeSource::new().unwrap();
        source.stop();
        assert!(!source.is_running());
        source.stop();
        assert!(!source.is_running());

        // Watching after stop fails cleanly
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            source.watch(dir.path(), true),
            Err(HubError::Watcher { .. })
        ));
    }
}
