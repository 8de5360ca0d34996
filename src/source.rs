//! Raw event source boundary and the notify-backed implementation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;

use crate::error::WatchError;

/// Receives raw filesystem notifications from a `RawEventSource`.
///
/// All paths are absolute. Implementations must tolerate calls from the
/// source's own notification threads, including duplicated and unordered
/// events.
pub trait EventSink: Send + Sync {
    /// A node appeared at `path`.
    fn on_created(&self, path: &Path);
    /// The contents of `path` changed.
    fn on_changed(&self, path: &Path);
    /// The node at `path` was removed.
    fn on_deleted(&self, path: &Path);
    /// A node in `parent` was renamed from `old_name` to `new_name`.
    fn on_renamed(&self, old_name: &str, new_name: &str, parent: &Path);
}

/// Produces raw create/change/delete/rename notifications for one root.
///
/// Attached on demand when the first interest is registered and detached
/// when the registry empties, so implementations must tolerate repeated
/// attach/detach cycles. Attaching an already-attached source is a no-op.
pub trait RawEventSource: Send + Sync {
    /// Start producing events into `sink`.
    fn attach(&self, sink: Arc<dyn EventSink>) -> Result<(), WatchError>;

    /// Stop producing events and release the sink.
    fn detach(&self);
}

/// `RawEventSource` backed by `notify::RecommendedWatcher`, watching the
/// root recursively.
pub struct NotifySource {
    root: PathBuf,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl NotifySource {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            watcher: Mutex::new(None),
        }
    }
}

impl RawEventSource for NotifySource {
    fn attach(&self, sink: Arc<dyn EventSink>) -> Result<(), WatchError> {
        let mut guard = self.watcher.lock();
        if guard.is_some() {
            return Ok(());
        }

        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
                Ok(event) => route_event(sink.as_ref(), event),
                Err(e) => tracing::error!("[source] file watch error: {e}"),
            })?;

        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| WatchError::AttachFailed {
                root: self.root.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!("[source] watching {}", self.root.display());
        *guard = Some(watcher);
        Ok(())
    }

    fn detach(&self) {
        // Dropping the watcher stops its notification threads and releases
        // the sink it captured.
        if self.watcher.lock().take().is_some() {
            tracing::debug!("[source] stopped watching {}", self.root.display());
        }
    }
}

/// Translate one notify event into sink calls.
fn route_event(sink: &dyn EventSink, event: notify::Event) {
    match event.kind {
        EventKind::Create(_) => {
            for path in &event.paths {
                sink.on_created(path);
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // paths[0] is the old name, paths[1] the new one
            if let [old, new] = event.paths.as_slice() {
                route_rename(sink, old, new);
            }
        }
        // A lone rename half cannot be correlated with its counterpart, so
        // it degrades to a delete or create of the visible side.
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            for path in &event.paths {
                sink.on_deleted(path);
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            for path in &event.paths {
                sink.on_created(path);
            }
        }
        EventKind::Modify(_) => {
            for path in &event.paths {
                sink.on_changed(path);
            }
        }
        EventKind::Remove(_) => {
            for path in &event.paths {
                sink.on_deleted(path);
            }
        }
        _ => {}
    }
}

fn route_rename(sink: &dyn EventSink, old: &Path, new: &Path) {
    let same_parent = old.parent() == new.parent();
    match (old.parent(), old.file_name(), new.file_name()) {
        (Some(parent), Some(old_name), Some(new_name)) if same_parent => {
            sink.on_renamed(
                &old_name.to_string_lossy(),
                &new_name.to_string_lossy(),
                parent,
            );
        }
        // Moved across directories: surface as delete + create
        _ => {
            sink.on_deleted(old);
            sink.on_created(new);
        }
    }
}
