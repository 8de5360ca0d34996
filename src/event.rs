//! Change kinds and the pending buffer entry.

use std::fmt;

/// Kind of change delivered to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeKind {
    /// File contents changed.
    Changed,
    /// File or directory deleted.
    Deleted,
    /// A new node appeared.
    ChildAdded,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeKind::Changed => "changed",
            ChangeKind::Deleted => "deleted",
            ChangeKind::ChildAdded => "child-added",
        };
        f.write_str(name)
    }
}

/// A buffered change awaiting delivery.
///
/// The path is root-relative with forward slashes. Pending changes live in
/// a set, so equal (kind, path) pairs collapse - that is the coalescing
/// mechanism for event bursts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingChange {
    pub kind: ChangeKind,
    pub path: String,
}

impl PendingChange {
    pub fn new(kind: ChangeKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}
