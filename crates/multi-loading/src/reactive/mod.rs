#![forbid(unsafe_code)]

//! Reactive primitives behind the loading tracker.
//!
//! - [`Broadcast`]: multicast change channel with no backlog.
//! - [`Subscription`]: RAII guard that unsubscribes on drop.
//! - [`SharedRun`] / [`Sink`]: one shared execution of a push-based producer,
//!   replayed to every subscriber.
//!
//! # Architecture
//!
//! Everything is single-threaded: shared state lives in `Rc<RefCell<..>>`
//! and subscribers are held as `Weak` callbacks, pruned lazily. No borrow is
//! held while user callbacks run, so callbacks may call back into the
//! primitive that is notifying them.
//!
//! # Invariants
//!
//! 1. Subscribers are notified in registration order.
//! 2. Nested emissions are delivered after the current one, never skipped.
//! 3. Dropping a [`Subscription`] removes the callback before the next
//!    delivery.

pub mod broadcast;
pub mod shared;

pub use broadcast::{Broadcast, Subscription};
pub use shared::{RunState, SharedRun, Signal, Sink};
