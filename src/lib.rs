//! Debounced, path-scoped file change notifications.
//!
//! A [`WatchRegistry`] watches a single root directory and tells
//! registered observers about changes under the relative paths they care
//! about. Raw filesystem events are buffered and coalesced; a burst of
//! writes collapses into one delivery pass that fires once activity has
//! been quiet for the debounce window (100 ms by default).
//!
//! # Architecture
//!
//! ```text
//! RawEventSource (notify backend, or a test double)
//!       | on_created / on_changed / on_deleted / on_renamed
//!       v
//! WatchRegistry
//!   - pending buffer (coalescing set) + debounced trigger
//!   - interest entries: (relative path, Weak<dyn Observer>)
//!   - one delivery worker: drain, match, dispatch, prune
//!   - rename remapping of live registrations
//!   - attaches the source on first interest, detaches when empty
//! ```
//!
//! Observers are weakly held: dropping the last `Arc` to an observer
//! retires its registrations on the next delivery pass, and the underlying
//! watch is released once no registrations remain.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pathwatch::{ChangeKind, Observer, WatchRegistry};
//!
//! struct PrintObserver;
//!
//! impl Observer for PrintObserver {
//!     fn on_event(&self, kind: ChangeKind, path: Option<&str>) {
//!         println!("{kind}: {path:?}");
//!     }
//! }
//!
//! let registry = WatchRegistry::builder()
//!     .root("/some/project")
//!     .build()
//!     .unwrap();
//! let observer = Arc::new(PrintObserver);
//! registry.register_interest("src", &observer);
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod observer;
pub mod paths;
pub mod registry;
pub mod source;

pub use config::WatchConfig;
pub use error::WatchError;
pub use event::{ChangeKind, PendingChange};
pub use observer::Observer;
pub use registry::{WatchRegistry, WatchRegistryBuilder};
pub use source::{EventSink, NotifySource, RawEventSource};
