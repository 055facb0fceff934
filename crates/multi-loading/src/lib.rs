#![forbid(unsafe_code)]

//! Multi-loading: track overlapping in-progress operations by id.
//!
//! # Role
//! Many independent callers each say "I am busy" and "I am done" through one
//! shared [`LoadingTracker`] without stepping on each other. Observers ask
//! "is anything busy?" or "is this lid busy?" at any time, and receive a
//! snapshot of the active lids on every change (e.g. to drive a spinner).
//!
//! # Primary responsibilities
//! - **LoadingTracker**: the duplicate-free, ordered set of active [`Lid`]s,
//!   the start/stop protocol and the change channel.
//! - **Lid generation**: a replaceable `Fn() -> String`; the default draws
//!   from a process-wide counter ([`sequential_generator`]).
//! - **Completion binding**: [`LoadingTracker::loading_until_complete`] keeps a
//!   lid busy for exactly the lifetime of one push-based producer, shared
//!   and replayed to every subscriber as a [`SharedRun`].
//! - **Stream binding**: [`LoadingTracker::loading_until_stream_ends`] does the
//!   same for a `futures` stream spawned on a local executor.
//!
//! # Threading
//! Everything is single-threaded (`Rc<RefCell<..>>`, `!Send`). All mutations
//! and notifications run synchronously on the caller's stack.
//!
//! ```
//! use multi_loading::LoadingTracker;
//!
//! let tracker = LoadingTracker::new();
//! let _spinner = tracker.subscribe(|active| println!("busy: {}", !active.is_empty()));
//!
//! let lid = tracker.start_loading_lid("CUSTOM_ID");
//! assert!(tracker.is_loading_lid("CUSTOM_ID"));
//! assert_eq!(tracker.stop_loading_lids([lid.as_str()]), vec!["CUSTOM_ID"]);
//! assert!(!tracker.is_loading());
//! ```

pub mod binder;
pub mod config;
pub mod lid;
pub mod reactive;
pub mod stream;
pub mod tracker;

pub use config::{TrackerConfig, TrackerConfigError, TrackerConfigParse};
pub use lid::{Lid, LidGenerator, sequential_generator};
pub use reactive::{RunState, SharedRun, Signal, Sink, Subscription};
pub use tracker::LoadingTracker;

pub use futures::task::SpawnError;
