#![forbid(unsafe_code)]

//! Tie a lid's busy lifetime to one asynchronous operation.
//!
//! [`LoadingTracker::loading_until_complete`] starts a lid, runs the producer
//! once as a [`SharedRun`], and stops that lid when the run first terminates
//! (complete, error or cancellation). Nobody has to remember to call
//! `stop_loading`.
//!
//! ```
//! use multi_loading::{LoadingTracker, Signal};
//!
//! let tracker = LoadingTracker::new();
//! let run = tracker.loading_until_complete(|sink| {
//!     sink.next(42_u32);
//!     sink.complete();
//! });
//! // The producer already finished, so the lid is released.
//! assert!(!tracker.is_loading());
//! assert_eq!(run.outcome(), Some(Signal::<u32, ()>::Complete));
//! ```

use tracing::debug;

use crate::lid::Lid;
use crate::reactive::{SharedRun, Sink};
use crate::tracker::LoadingTracker;

impl LoadingTracker {
    /// Run `producer` under a freshly generated lid until it terminates.
    ///
    /// The producer is invoked before this returns. Subscribers of the
    /// returned run all share that single execution and see every signal
    /// from the start.
    pub fn loading_until_complete<T, E, P>(&self, producer: P) -> SharedRun<T, E>
    where
        T: Clone + 'static,
        E: Clone + 'static,
        P: FnOnce(Sink<T, E>),
    {
        let lid = self.start_loading();
        self.bind(lid, producer)
    }

    /// Like [`loading_until_complete`](Self::loading_until_complete), under `lid`.
    ///
    /// If `lid` is already active the run still stops it on termination,
    /// releasing whoever else started it too.
    pub fn loading_until_complete_lid<T, E, P>(
        &self,
        lid: impl Into<Lid>,
        producer: P,
    ) -> SharedRun<T, E>
    where
        T: Clone + 'static,
        E: Clone + 'static,
        P: FnOnce(Sink<T, E>),
    {
        let lid = self.start_loading_lid(lid);
        self.bind(lid, producer)
    }

    /// Attach the stop obligation for `lid` to a new run, then start it.
    pub(crate) fn bind<T, E, P>(&self, lid: Lid, producer: P) -> SharedRun<T, E>
    where
        T: Clone + 'static,
        E: Clone + 'static,
        P: FnOnce(Sink<T, E>),
    {
        let run = SharedRun::new(lid.clone());
        let tracker = self.clone();
        run.on_finish(move |terminal| {
            let released = tracker.stop_loading_lids([lid.as_str()]);
            debug!(
                %lid,
                outcome = terminal.kind(),
                released = !released.is_empty(),
                "bound run finished"
            );
        });
        run.start(producer);
        run
    }
}
