#![forbid(unsafe_code)]

//! Multicast change channel with RAII subscriptions.
//!
//! # Design
//!
//! [`Broadcast<T>`] is an observer list in shared, reference-counted storage
//! (`Rc<RefCell<..>>`). Each [`emit`](Broadcast::emit) hands its payload to
//! every live subscriber in registration order. Nothing is retained after
//! delivery: a subscriber registered later never sees earlier payloads.
//!
//! # Re-entrancy
//!
//! A subscriber may emit again from inside its callback (for example, by
//! mutating the tracker that owns the channel). The nested payload is queued
//! and delivered once the current payload has reached every subscriber, so
//! all subscribers observe payloads in emission order and no emission is
//! skipped.
//!
//! # Failure Modes
//!
//! - **Panicking subscriber**: the panic propagates to the emitter and the
//!   channel stays usable. Payloads still queued behind it are kept and go
//!   out, in order, ahead of the next emission.
//! - **Subscriber leak**: callbacks accumulate while their [`Subscription`]
//!   guards are alive. Dead weak references are pruned lazily on emit.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

type CallbackRc<T> = Rc<dyn Fn(&T)>;
type CallbackWeak<T> = Weak<dyn Fn(&T)>;

struct BroadcastInner<T> {
    /// Stored weakly; the strong side lives in the `Subscription`.
    subscribers: Vec<CallbackWeak<T>>,
    /// Payloads emitted while a delivery pass is already running.
    pending: VecDeque<T>,
    delivering: bool,
    emitted: u64,
}

/// A multicast channel with no backlog.
///
/// Cloning a `Broadcast` creates a new handle to the **same** subscriber list.
///
/// # Invariants
///
/// 1. Each `emit` reaches every subscriber that is live when its turn for
///    delivery comes, exactly once.
/// 2. Payloads are delivered in emission order, including nested emissions.
/// 3. Subscribers are notified in registration order.
pub struct Broadcast<T> {
    inner: Rc<RefCell<BroadcastInner<T>>>,
}

impl<T> Clone for Broadcast<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Broadcast<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Broadcast")
            .field("emitted", &inner.emitted)
            .field("pending", &inner.pending.len())
            .field("subscriber_count", &inner.subscribers.len())
            .finish()
    }
}

impl<T: 'static> Default for Broadcast<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Broadcast<T> {
    /// Create a channel with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(BroadcastInner {
                subscribers: Vec::new(),
                pending: VecDeque::new(),
                delivering: false,
                emitted: 0,
            })),
        }
    }

    /// Register a callback for future payloads.
    ///
    /// Dropping the returned [`Subscription`] unsubscribes the callback.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let strong: CallbackRc<T> = Rc::new(callback);
        let weak = Rc::downgrade(&strong);
        self.inner.borrow_mut().subscribers.push(weak);
        Subscription {
            _guard: Box::new(strong),
        }
    }

    /// Deliver `payload` to every live subscriber.
    ///
    /// When called from inside a subscriber callback the payload is queued
    /// and delivered by the outer call before it returns.
    pub fn emit(&self, payload: T) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.emitted += 1;
            inner.pending.push_back(payload);
            if inner.delivering {
                return;
            }
            inner.delivering = true;
        }

        let _pass = DeliveryPass { inner: &self.inner };
        loop {
            // Collect live callbacks first so no borrow is held during calls.
            let (payload, callbacks) = {
                let mut inner = self.inner.borrow_mut();
                let Some(payload) = inner.pending.pop_front() else {
                    break;
                };
                inner.subscribers.retain(|w| w.strong_count() > 0);
                let callbacks: Vec<CallbackRc<T>> =
                    inner.subscribers.iter().filter_map(Weak::upgrade).collect();
                (payload, callbacks)
            };
            for cb in &callbacks {
                cb(&payload);
            }
        }
    }

    /// Total number of payloads emitted over the channel's lifetime.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.inner.borrow().emitted
    }

    /// Number of registered subscribers (including dead ones not yet pruned).
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }
}

/// Ends a delivery pass, including when a subscriber panics.
struct DeliveryPass<'a, T> {
    inner: &'a RefCell<BroadcastInner<T>>,
}

impl<T> Drop for DeliveryPass<'_, T> {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.try_borrow_mut() {
            inner.delivering = false;
        }
    }
}

/// RAII guard for a subscriber callback.
///
/// Dropping the `Subscription` drops the strong `Rc` to the callback, so the
/// `Weak` held by the channel fails to upgrade on the next delivery.
pub struct Subscription {
    /// Type-erased strong reference keeping the callback alive.
    _guard: Box<dyn std::any::Any>,
}

impl Subscription {
    pub(crate) fn from_guard(guard: Box<dyn std::any::Any>) -> Self {
        Self { _guard: guard }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}
