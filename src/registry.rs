//! The watch registry: interest entries, the pending buffer, and the
//! debounced delivery worker.
//!
//! Producer threads (the raw source's notification threads, or any caller)
//! buffer changes and re-arm the delivery trigger; a single worker thread
//! per registry runs delivery passes, so passes never overlap. The lock is
//! held for individual mutations only, never across a whole pass.

use std::collections::HashSet;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::config::WatchConfig;
use crate::error::WatchError;
use crate::event::{ChangeKind, PendingChange};
use crate::observer::{InterestEntry, Observer};
use crate::paths;
use crate::source::{EventSink, NotifySource, RawEventSource};

#[derive(Default)]
struct RegistryState {
    entries: Vec<InterestEntry>,
    pending: HashSet<PendingChange>,
    /// True while a delivery pass is running. Guards against overlapping
    /// passes and suppresses re-arming the trigger mid-pass.
    delivering: bool,
    /// When the next delivery pass should fire, if one is armed.
    deadline: Option<Instant>,
    /// Completed delivery passes, for `await_next_delivery`.
    delivery_seq: u64,
    shutdown: bool,
}

struct Shared {
    root: PathBuf,
    config: WatchConfig,
    source: Box<dyn RawEventSource>,
    state: Mutex<RegistryState>,
    /// Wakes the delivery worker when the trigger deadline moves.
    wake: Condvar,
    /// Wakes `await_next_delivery` callers after each completed pass.
    delivered: Condvar,
    /// Serializes attach/detach decisions together with their side
    /// effects. Lock order: this lock first, then the state lock.
    /// `emit` never takes it, so the source's own callback threads
    /// cannot deadlock against an attach or detach in progress.
    attach_lock: Mutex<()>,
    attached: AtomicBool,
    /// Handed to the source as the event sink on attach.
    self_ref: Weak<Shared>,
}

impl Shared {
    /// Buffer one normalized change and, while idle, re-arm the trigger.
    ///
    /// Each change restarts the countdown, so a burst collapses into one
    /// trigger after the last change. While a pass is running the change is
    /// only buffered; the pass's own drain loop picks it up.
    fn emit(&self, kind: ChangeKind, path: String) {
        let mut state = self.state.lock();
        if state.shutdown {
            return;
        }
        state.pending.insert(PendingChange::new(kind, path));
        if !state.delivering {
            state.deadline = Some(Instant::now() + self.config.debounce());
            self.wake.notify_one();
        }
    }

    /// Rewrite registered paths for a rename of `old` to `new`, keeping
    /// each entry's observer. Dead entries are pruned in the same pass.
    fn remap_entries(&self, old: &str, new: &str) {
        {
            let mut state = self.state.lock();
            for entry in &mut state.entries {
                if let Some(rewritten) = paths::remap(&entry.path, old, new) {
                    entry.path = rewritten;
                }
            }
            state.entries.retain(InterestEntry::is_live);
        }
        debug!("[registry] remapped interests: {old} -> {new}");
        self.maybe_stop();
    }

    /// Attach the raw source iff there are entries and it is not attached.
    ///
    /// The emptiness check, the flag transition, and the attach itself
    /// happen under the attachment lock: a start racing a stop check
    /// always observes the other's completed side effect, so a fresh
    /// registration can never be stranded without a source.
    fn maybe_start(&self) {
        let _attachment = self.attach_lock.lock();
        if self.state.lock().entries.is_empty() {
            return;
        }
        if self
            .attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let Some(sink) = self.self_ref.upgrade() else {
            self.attached.store(false, Ordering::Release);
            return;
        };
        let sink: Arc<dyn EventSink> = sink;
        if let Err(e) = self.source.attach(sink) {
            // Invalid or vanished root degrades to a no-op; resetting the
            // flag lets a later registration retry.
            self.attached.store(false, Ordering::Release);
            debug!("[registry] attach skipped: {e}");
        }
    }

    /// Detach the raw source iff the registry is empty and attached.
    fn maybe_stop(&self) {
        let _attachment = self.attach_lock.lock();
        if !self.state.lock().entries.is_empty() {
            return;
        }
        if self
            .attached
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.source.detach();
            debug!("[registry] watch detached, no interests remain");
        }
    }

    /// Sleep until an armed deadline expires, then run one delivery pass.
    fn worker_loop(&self) {
        loop {
            {
                let mut state = self.state.lock();
                loop {
                    if state.shutdown {
                        return;
                    }
                    match state.deadline {
                        Some(deadline) => {
                            if Instant::now() >= deadline {
                                state.deadline = None;
                                break;
                            }
                            let _ = self.wake.wait_until(&mut state, deadline);
                        }
                        None => self.wake.wait(&mut state),
                    }
                }
            }
            self.run_delivery_pass();
        }
    }

    /// One complete drain-and-dispatch cycle.
    fn run_delivery_pass(&self) {
        // Snapshot under the lock so matching cannot race registrations.
        // Entries added mid-pass land in the next pass's snapshot.
        let snapshot = {
            let mut state = self.state.lock();
            state.delivering = true;
            state.entries.clone()
        };

        loop {
            let batch: Vec<PendingChange> = {
                let mut state = self.state.lock();
                if state.pending.is_empty() {
                    // The final empty check and the flag clear happen under
                    // one lock hold: an emit racing the end of the pass was
                    // either drained above or now observes delivering ==
                    // false and re-arms the trigger. Nothing is left
                    // buffered without a scheduled pass.
                    //
                    // A deadline armed by an emit this pass already drained
                    // is stale; left in place it would fire an empty pass
                    // and wake `await_next_delivery` with nothing delivered.
                    state.deadline = None;
                    state.entries.retain(InterestEntry::is_live);
                    state.delivery_seq += 1;
                    state.delivering = false;
                    drop(state);
                    self.delivered.notify_all();
                    self.maybe_stop();
                    return;
                }
                mem::take(&mut state.pending).into_iter().collect()
            };

            for change in &batch {
                for entry in &snapshot {
                    // Dead observers are skipped here and pruned from the
                    // live set once the pass completes.
                    let Some(observer) = entry.observer.upgrade() else {
                        continue;
                    };
                    if !entry_covers(entry, change) {
                        continue;
                    }
                    let delivered = paths::delivered(&entry.path, &change.path);
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                        observer.on_event(change.kind, delivered.as_deref());
                    }));
                    if outcome.is_err() {
                        warn!(
                            "[registry] observer for '{}' panicked on {} '{}'",
                            entry.path, change.kind, change.path
                        );
                    }
                }
            }
        }
    }
}

/// Whether a buffered change reaches an entry.
///
/// Changes match entries on the changed path or an ancestor of it. A
/// deletion additionally reaches entries registered below the deleted
/// node: removing a directory takes every descendant with it, and those
/// entries receive the raw deleted path.
fn entry_covers(entry: &InterestEntry, change: &PendingChange) -> bool {
    if paths::matches(&entry.path, &change.path) {
        return true;
    }
    change.kind == ChangeKind::Deleted && paths::matches(&change.path, &entry.path)
}

impl EventSink for Shared {
    fn on_created(&self, path: &Path) {
        if let Some(rel) = paths::relativize(&self.root, path) {
            self.emit(ChangeKind::ChildAdded, rel);
        }
    }

    fn on_changed(&self, path: &Path) {
        if let Some(rel) = paths::relativize(&self.root, path) {
            self.emit(ChangeKind::Changed, rel);
        }
    }

    fn on_deleted(&self, path: &Path) {
        if let Some(rel) = paths::relativize(&self.root, path) {
            self.emit(ChangeKind::Deleted, rel);
        }
    }

    fn on_renamed(&self, old_name: &str, new_name: &str, parent: &Path) {
        let Some(parent_rel) = paths::relativize(&self.root, parent) else {
            debug!("[registry] rename outside root ignored: {}", parent.display());
            return;
        };
        let old = paths::join(&parent_rel, old_name);
        let new = paths::join(&parent_rel, new_name);
        self.remap_entries(&old, &new);
    }
}

/// A debounced, path-scoped change notification registry for one root.
///
/// Dropping the registry tears it down: the source is detached, entries
/// are cleared, and the delivery worker is joined.
pub struct WatchRegistry {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl WatchRegistry {
    /// Create a builder for configuring a registry.
    pub fn builder() -> WatchRegistryBuilder {
        WatchRegistryBuilder::new()
    }

    /// Register interest in a root-relative path.
    ///
    /// The observer is weakly held; dropping the last `Arc` retires the
    /// registration on the next delivery or rename pass. The empty string
    /// (or `"/"`) registers interest in the whole root. Registering while
    /// a delivery pass is in flight is fine; the entry joins the next
    /// pass's snapshot.
    pub fn register_interest<O>(&self, relative_path: &str, observer: &Arc<O>)
    where
        O: Observer + 'static,
    {
        let weak = Arc::downgrade(observer);
        let observer: Weak<dyn Observer> = weak;
        let path = paths::normalize(relative_path);
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return;
            }
            state.entries.push(InterestEntry { path, observer });
        }
        self.shared.maybe_start();
    }

    /// Register interest via an absolute path under the watched root.
    pub fn register_interest_absolute<O>(
        &self,
        path: &Path,
        observer: &Arc<O>,
    ) -> Result<(), WatchError>
    where
        O: Observer + 'static,
    {
        let rel =
            paths::relativize(&self.shared.root, path).ok_or_else(|| WatchError::OutsideRoot {
                path: path.to_path_buf(),
                root: self.shared.root.clone(),
            })?;
        self.register_interest(&rel, observer);
        Ok(())
    }

    /// Block until the next completed delivery pass, or until `timeout`.
    ///
    /// Returning after the timeout is not an error; it signals that no
    /// delivery occurred in time. Primarily a synchronization hook for
    /// tests and diagnostics.
    pub fn await_next_delivery(&self, timeout: Option<Duration>) {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.shared.state.lock();
        let seq = state.delivery_seq;
        while state.delivery_seq == seq && !state.shutdown {
            match deadline {
                Some(deadline) => {
                    if self
                        .shared
                        .delivered
                        .wait_until(&mut state, deadline)
                        .timed_out()
                    {
                        return;
                    }
                }
                None => self.shared.delivered.wait(&mut state),
            }
        }
    }

    /// Number of interest entries, including ones whose observers have
    /// been dropped but not yet pruned.
    pub fn entry_count(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    /// Whether the raw source is currently attached.
    pub fn is_attached(&self) -> bool {
        self.shared.attached.load(Ordering::Acquire)
    }

    /// The watched root.
    pub fn root(&self) -> &Path {
        &self.shared.root
    }

    /// The registry's event sink, for feeding raw events directly, e.g.
    /// when bridging an event source that cannot hold the sink itself.
    pub fn sink(&self) -> Arc<dyn EventSink> {
        self.shared.clone()
    }
}

impl Drop for WatchRegistry {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.entries.clear();
            state.pending.clear();
        }
        self.shared.wake.notify_all();
        self.shared.delivered.notify_all();
        self.shared.maybe_stop();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Builder for a [`WatchRegistry`].
pub struct WatchRegistryBuilder {
    root: Option<PathBuf>,
    source: Option<Box<dyn RawEventSource>>,
    config: WatchConfig,
}

impl WatchRegistryBuilder {
    pub fn new() -> Self {
        Self {
            root: None,
            source: None,
            config: WatchConfig::default(),
        }
    }

    /// Set the watched root (required).
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Inject a raw event source. Defaults to [`NotifySource`] over the
    /// root; tests typically inject a fake.
    pub fn source(mut self, source: Box<dyn RawEventSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: WatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the debounce window in milliseconds.
    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.config.debounce_ms = ms;
        self
    }

    /// Build the registry and spawn its delivery worker.
    pub fn build(self) -> Result<WatchRegistry, WatchError> {
        let root = self.root.ok_or_else(|| WatchError::InitFailed {
            reason: "watched root is required".to_string(),
        })?;
        let source = self
            .source
            .unwrap_or_else(|| Box::new(NotifySource::new(root.clone())));

        let shared = Arc::new_cyclic(|self_ref| Shared {
            root,
            config: self.config,
            source,
            state: Mutex::new(RegistryState::default()),
            wake: Condvar::new(),
            delivered: Condvar::new(),
            attach_lock: Mutex::new(()),
            attached: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("pathwatch-delivery".to_string())
            .spawn(move || worker_shared.worker_loop())
            .map_err(|e| WatchError::InitFailed {
                reason: e.to_string(),
            })?;

        Ok(WatchRegistry {
            shared,
            worker: Some(worker),
        })
    }
}

impl Default for WatchRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullSource;

    impl RawEventSource for NullSource {
        fn attach(&self, _sink: Arc<dyn EventSink>) -> Result<(), WatchError> {
            Ok(())
        }

        fn detach(&self) {}
    }

    struct Ignoring;

    impl Observer for Ignoring {
        fn on_event(&self, _kind: ChangeKind, _path: Option<&str>) {}
    }

    fn bare_shared() -> Arc<Shared> {
        Arc::new_cyclic(|self_ref| Shared {
            root: PathBuf::from("/watched"),
            config: WatchConfig { debounce_ms: 10 },
            source: Box::new(NullSource),
            state: Mutex::new(RegistryState::default()),
            wake: Condvar::new(),
            delivered: Condvar::new(),
            attach_lock: Mutex::new(()),
            attached: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        })
    }

    fn test_registry() -> WatchRegistry {
        WatchRegistry::builder()
            .root("/watched")
            .source(Box::new(NullSource))
            .debounce_ms(10)
            .build()
            .unwrap()
    }

    #[test]
    fn builder_requires_root() {
        let err = WatchRegistry::builder()
            .source(Box::new(NullSource))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, WatchError::InitFailed { .. }));
    }

    #[test]
    fn registration_normalizes_paths() {
        let registry = test_registry();
        let observer = Arc::new(Ignoring);
        registry.register_interest("/prj/sub/", &observer);
        registry.register_interest("/", &observer);
        assert_eq!(registry.entry_count(), 2);
        assert!(registry.is_attached());

        let entries: Vec<String> = registry
            .shared
            .state
            .lock()
            .entries
            .iter()
            .map(|e| e.path.clone())
            .collect();
        assert!(entries.contains(&"prj/sub".to_string()));
        assert!(entries.contains(&String::new()));
    }

    #[test]
    fn builder_accepts_full_config() {
        let registry = WatchRegistry::builder()
            .root("/watched")
            .source(Box::new(NullSource))
            .config(WatchConfig { debounce_ms: 5 })
            .build()
            .unwrap();
        assert_eq!(registry.shared.config.debounce(), Duration::from_millis(5));
    }

    #[test]
    fn absolute_registration_relativizes_against_root() {
        let registry = test_registry();
        assert_eq!(registry.root(), Path::new("/watched"));
        let observer = Arc::new(Ignoring);
        registry
            .register_interest_absolute(Path::new("/watched/prj/a.txt"), &observer)
            .unwrap();
        assert_eq!(registry.entry_count(), 1);

        let err = registry
            .register_interest_absolute(Path::new("/elsewhere/a.txt"), &observer)
            .err()
            .unwrap();
        assert!(matches!(err, WatchError::OutsideRoot { .. }));
    }

    #[test]
    fn emit_while_delivering_does_not_rearm_trigger() {
        let registry = test_registry();
        {
            let mut state = registry.shared.state.lock();
            state.delivering = true;
        }
        registry.shared.emit(ChangeKind::Changed, "prj/a.txt".to_string());
        let state = registry.shared.state.lock();
        assert!(state.deadline.is_none());
        assert_eq!(state.pending.len(), 1);
        drop(state);
        // Unstick the worker for a clean shutdown
        registry.shared.state.lock().delivering = false;
    }

    #[test]
    fn emit_restarts_countdown_while_idle() {
        let registry = WatchRegistry::builder()
            .root("/watched")
            .source(Box::new(NullSource))
            .debounce_ms(60_000)
            .build()
            .unwrap();
        registry.shared.emit(ChangeKind::Changed, "a".to_string());
        let first = registry.shared.state.lock().deadline.unwrap();
        std::thread::sleep(Duration::from_millis(5));
        registry.shared.emit(ChangeKind::Changed, "b".to_string());
        let second = registry.shared.state.lock().deadline.unwrap();
        assert!(second > first);
    }

    #[test]
    fn deleted_changes_cover_descendant_entries() {
        let observer: Arc<dyn Observer> = Arc::new(Ignoring);
        let entry = InterestEntry {
            path: "prj/sub/a.txt".to_string(),
            observer: Arc::downgrade(&observer),
        };
        let delete = PendingChange::new(ChangeKind::Deleted, "prj");
        let change = PendingChange::new(ChangeKind::Changed, "prj");
        assert!(entry_covers(&entry, &delete));
        assert!(!entry_covers(&entry, &change));

        let sibling = PendingChange::new(ChangeKind::Deleted, "prj/sublet");
        let entry_sub = InterestEntry {
            path: "prj/sub".to_string(),
            observer: Arc::downgrade(&observer),
        };
        assert!(!entry_covers(&entry_sub, &sibling));
    }

    #[test]
    fn pass_clears_deadline_armed_by_an_emit_it_drained() {
        let shared = bare_shared();
        let observer: Arc<dyn Observer> = Arc::new(Ignoring);
        shared.state.lock().entries.push(InterestEntry {
            path: "prj".to_string(),
            observer: Arc::downgrade(&observer),
        });

        // An emit slipping in after the worker consumed its deadline but
        // before the pass marks delivering re-arms the trigger; the pass
        // below drains that very event, leaving the deadline stale.
        shared.emit(ChangeKind::Changed, "prj/a.txt".to_string());
        assert!(shared.state.lock().deadline.is_some());

        shared.run_delivery_pass();

        let state = shared.state.lock();
        assert!(state.deadline.is_none(), "stale deadline would fire an empty pass");
        assert_eq!(state.delivery_seq, 1);
        assert!(state.pending.is_empty());
        assert!(!state.delivering);
    }

    #[test]
    fn await_next_delivery_times_out_quietly() {
        let registry = test_registry();
        let started = Instant::now();
        registry.await_next_delivery(Some(Duration::from_millis(50)));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}
