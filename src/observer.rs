//! Observer trait and interest entries.

use std::sync::Weak;

use crate::event::ChangeKind;

/// Callback contract for change notifications.
///
/// `on_event` is always invoked from the registry's delivery worker, but
/// the identity of that thread is not guaranteed stable across calls, so
/// implementations must not assume one.
pub trait Observer: Send + Sync {
    /// Receive one change notification.
    ///
    /// `path` is relative to the path the observer was registered on:
    /// `None` when the change hit the registered path itself, otherwise
    /// the remainder below it.
    fn on_event(&self, kind: ChangeKind, path: Option<&str>);
}

/// A (path, observer) registration.
///
/// The observer is weakly held: dropping the last `Arc` retires the entry
/// on the next delivery or rename pass. The path is root-relative with
/// forward slashes; the empty string means the whole root.
#[derive(Clone)]
pub(crate) struct InterestEntry {
    pub path: String,
    pub observer: Weak<dyn Observer>,
}

impl InterestEntry {
    pub fn is_live(&self) -> bool {
        self.observer.strong_count() > 0
    }
}
