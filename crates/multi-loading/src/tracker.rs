#![forbid(unsafe_code)]

//! The loading tracker: a set of active lids plus a change channel.
//!
//! # Invariants
//!
//! 1. `active` never holds the same lid twice.
//! 2. Every effective mutation (a lid added, or at least one removed) emits
//!    exactly one snapshot of `active` taken right after that mutation.
//! 3. Calls that change nothing (duplicate start, stop of unknown lids, stop
//!    on an idle tracker) emit nothing.
//! 4. `is_loading()` is true iff `active` is non-empty.
//!
//! Membership is boolean, not reference counted: two starts of the same lid
//! are released by a single stop.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::config::TrackerConfig;
use crate::lid::{Lid, LidGenerator, sequential_generator};
use crate::reactive::{Broadcast, Subscription};

struct TrackerInner {
    /// Insertion-ordered, duplicate-free.
    active: Vec<Lid>,
    generator: LidGenerator,
    config: TrackerConfig,
}

/// Tracks overlapping in-progress operations by lid.
///
/// Cloning a `LoadingTracker` creates a new handle to the **same** state, so
/// one tracker can be handed to every component of an application scope.
#[derive(Clone)]
pub struct LoadingTracker {
    inner: Rc<RefCell<TrackerInner>>,
    changes: Broadcast<Vec<Lid>>,
}

impl std::fmt::Debug for LoadingTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("LoadingTracker")
            .field("active", &inner.active)
            .field("config", &inner.config)
            .field("changes", &self.changes)
            .finish_non_exhaustive()
    }
}

impl Default for LoadingTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadingTracker {
    /// Create an idle tracker with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(TrackerConfig::default())
    }

    /// Create an idle tracker; the default generator uses `config.lid_prefix`.
    #[must_use]
    pub fn with_config(config: TrackerConfig) -> Self {
        let generator = sequential_generator(config.lid_prefix.clone());
        Self {
            inner: Rc::new(RefCell::new(TrackerInner {
                active: Vec::new(),
                generator,
                config,
            })),
            changes: Broadcast::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> TrackerConfig {
        self.inner.borrow().config.clone()
    }

    /// Replace the function that mints lids for [`start_loading`](Self::start_loading).
    ///
    /// Already active lids are untouched. The output is not checked for
    /// uniqueness; a repeated id simply makes the start a no-op.
    pub fn set_lid_generator(&self, generator: impl Fn() -> String + 'static) {
        self.inner.borrow_mut().generator = Rc::new(generator);
    }

    /// Whether any lid is active.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        !self.inner.borrow().active.is_empty()
    }

    /// Whether `lid` is active. Unknown lids are simply not loading.
    #[must_use]
    pub fn is_loading_lid(&self, lid: &str) -> bool {
        self.inner.borrow().active.iter().any(|a| a.as_str() == lid)
    }

    /// Snapshot of the active lids in insertion order.
    #[must_use]
    pub fn active(&self) -> Vec<Lid> {
        self.inner.borrow().active.clone()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.borrow().active.len()
    }

    /// Number of change notifications emitted so far.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.changes.emitted()
    }

    /// Observe every change of the active set.
    ///
    /// The callback receives the post-mutation snapshot. It may call back
    /// into the tracker; nested changes are delivered after the current one.
    pub fn subscribe(&self, observer: impl Fn(&[Lid]) + 'static) -> Subscription {
        self.changes
            .subscribe(move |snapshot: &Vec<Lid>| observer(snapshot.as_slice()))
    }

    /// Start loading under a freshly generated lid and return it.
    pub fn start_loading(&self) -> Lid {
        // Release the borrow first: the generator may query this tracker.
        let generator = Rc::clone(&self.inner.borrow().generator);
        self.insert(Lid::from(generator()))
    }

    /// Start loading under `lid` and return it.
    ///
    /// If `lid` is already active nothing changes and nothing is emitted.
    pub fn start_loading_lid(&self, lid: impl Into<Lid>) -> Lid {
        self.insert(lid.into())
    }

    /// Stop every active lid. Returns the lids removed, in insertion order.
    pub fn stop_loading(&self) -> Vec<Lid> {
        let removed = std::mem::take(&mut self.inner.borrow_mut().active);
        if removed.is_empty() {
            trace!("stop_loading on idle tracker");
            return removed;
        }
        debug!(removed = removed.len(), "all loading stopped");
        self.changes.emit(Vec::new());
        removed
    }

    /// Stop the given lids. Unknown lids are ignored.
    ///
    /// Returns the lids actually removed, in the order they were listed.
    pub fn stop_loading_lids<I>(&self, lids: I) -> Vec<Lid>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let requested: Vec<I::Item> = lids.into_iter().collect();
        let (removed, snapshot) = {
            let mut inner = self.inner.borrow_mut();
            let mut removed = Vec::new();
            for lid in &requested {
                let lid: &str = lid.as_ref();
                let position = inner.active.iter().position(|a| a.as_str() == lid);
                match position {
                    Some(index) => removed.push(inner.active.remove(index)),
                    None => trace!(lid, "stop for inactive lid ignored"),
                }
            }
            if removed.is_empty() {
                return removed;
            }
            debug!(
                removed = removed.len(),
                active = inner.active.len(),
                "loading stopped"
            );
            (removed, inner.active.clone())
        };
        self.changes.emit(snapshot);
        removed
    }

    fn insert(&self, lid: Lid) -> Lid {
        let snapshot = {
            let mut inner = self.inner.borrow_mut();
            if inner.active.contains(&lid) {
                trace!(%lid, "lid already active");
                return lid;
            }
            inner.active.push(lid.clone());
            let active = inner.active.len();
            debug!(%lid, active, "loading started");
            if inner.config.is_over_busy_threshold(active) {
                warn!(
                    active,
                    threshold = inner.config.busy_warn_threshold,
                    "active lid count above busy threshold"
                );
            }
            inner.active.clone()
        };
        self.changes.emit(snapshot);
        lid
    }
}
