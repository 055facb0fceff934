#![forbid(unsafe_code)]

//! Bind a lid to a [`Stream`] driven on a local executor.
//!
//! The stream is spawned as a task on any [`LocalSpawn`] executor and fed
//! into a [`SharedRun`]:
//!
//! | Stream event     | Run signal          |
//! |------------------|---------------------|
//! | `Some(Ok(v))`    | `Signal::Next(v)`   |
//! | `Some(Err(e))`   | `Signal::Error(e)`  |
//! | `None`           | `Signal::Complete`  |
//! | task dropped     | `Signal::Cancelled` |
//!
//! Items after the first error are never pulled. A consumer-side
//! [`SharedRun::cancel`] aborts the task: it is woken, and the stream is
//! dropped on its next poll even if the stream itself stays pending.

use futures::future::{AbortHandle, Abortable};
use futures::task::{LocalSpawn, LocalSpawnExt, SpawnError};
use futures::{Stream, StreamExt};

use crate::lid::Lid;
use crate::reactive::{SharedRun, Sink};
use crate::tracker::LoadingTracker;

impl LoadingTracker {
    /// Keep a freshly generated lid busy until `stream` ends, fails or is
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns the executor's [`SpawnError`] if it refuses the task. The lid
    /// has been released again by then.
    pub fn loading_until_stream_ends<S, T, E, Sp>(
        &self,
        stream: S,
        spawner: &Sp,
    ) -> Result<SharedRun<T, E>, SpawnError>
    where
        S: Stream<Item = Result<T, E>> + 'static,
        T: Clone + 'static,
        E: Clone + 'static,
        Sp: LocalSpawn + ?Sized,
    {
        let lid = self.start_loading();
        self.bind_stream(lid, stream, spawner)
    }

    /// Like [`loading_until_stream_ends`](Self::loading_until_stream_ends),
    /// under `lid`.
    ///
    /// # Errors
    ///
    /// Returns the executor's [`SpawnError`] if it refuses the task.
    pub fn loading_until_stream_ends_lid<S, T, E, Sp>(
        &self,
        lid: impl Into<Lid>,
        stream: S,
        spawner: &Sp,
    ) -> Result<SharedRun<T, E>, SpawnError>
    where
        S: Stream<Item = Result<T, E>> + 'static,
        T: Clone + 'static,
        E: Clone + 'static,
        Sp: LocalSpawn + ?Sized,
    {
        let lid = self.start_loading_lid(lid);
        self.bind_stream(lid, stream, spawner)
    }

    fn bind_stream<S, T, E, Sp>(
        &self,
        lid: Lid,
        stream: S,
        spawner: &Sp,
    ) -> Result<SharedRun<T, E>, SpawnError>
    where
        S: Stream<Item = Result<T, E>> + 'static,
        T: Clone + 'static,
        E: Clone + 'static,
        Sp: LocalSpawn + ?Sized,
    {
        let mut spawned = Ok(());
        // A refused task is dropped along with its sink, which cancels the run.
        let run = self.bind(lid, |sink| {
            let (abort, registration) = AbortHandle::new_pair();
            sink.on_close(move || abort.abort());
            let task = Abortable::new(drive(stream, sink), registration);
            spawned = spawner.spawn_local(async move {
                // Aborted means a consumer cancelled; the run already knows.
                let _ = task.await;
            });
        });
        spawned.map(|()| run)
    }
}

async fn drive<S, T, E>(stream: S, sink: Sink<T, E>)
where
    S: Stream<Item = Result<T, E>>,
    T: Clone + 'static,
    E: Clone + 'static,
{
    let mut stream = std::pin::pin!(stream);
    loop {
        if sink.is_closed() {
            return;
        }
        match stream.next().await {
            Some(Ok(value)) => sink.next(value),
            Some(Err(error)) => {
                sink.error(error);
                return;
            }
            None => break,
        }
    }
    sink.complete();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{RunState, Signal};
    use futures::channel::mpsc;
    use futures::executor::LocalPool;
    use futures::stream;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<Signal<u32, String>>>>;

    fn record(run: &SharedRun<u32, String>) -> (Log, crate::Subscription) {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let log_clone = Rc::clone(&log);
        let sub = run.subscribe(move |s| log_clone.borrow_mut().push(s.clone()));
        (log, sub)
    }

    #[test]
    fn finite_stream_completes() {
        let mut pool = LocalPool::new();
        let tracker = LoadingTracker::new();
        let items = stream::iter(vec![Ok::<u32, String>(1), Ok(2)]);
        let run = tracker
            .loading_until_stream_ends(items, &pool.spawner())
            .unwrap();
        let (log, _sub) = record(&run);

        assert!(tracker.is_loading());
        pool.run_until_stalled();
        assert!(!tracker.is_loading());
        assert_eq!(
            *log.borrow(),
            vec![Signal::Next(1), Signal::Next(2), Signal::Complete]
        );
    }

    #[test]
    fn first_error_ends_the_run() {
        let mut pool = LocalPool::new();
        let tracker = LoadingTracker::new();
        let items = stream::iter(vec![Ok(1), Err("boom".to_owned()), Ok(3)]);
        let run = tracker
            .loading_until_stream_ends_lid("fetch", items, &pool.spawner())
            .unwrap();

        pool.run_until_stalled();
        assert!(!tracker.is_loading_lid("fetch"));
        let (log, _sub) = record(&run);
        assert_eq!(
            *log.borrow(),
            vec![Signal::Next(1), Signal::Error("boom".to_owned())]
        );
    }

    #[test]
    fn pending_stream_keeps_lid_busy() {
        let mut pool = LocalPool::new();
        let tracker = LoadingTracker::new();
        let (tx, rx) = mpsc::unbounded::<Result<u32, String>>();
        let run = tracker
            .loading_until_stream_ends(rx, &pool.spawner())
            .unwrap();
        let (log, _sub) = record(&run);

        pool.run_until_stalled();
        assert!(tracker.is_loading());

        tx.unbounded_send(Ok(5)).unwrap();
        pool.run_until_stalled();
        assert_eq!(*log.borrow(), vec![Signal::Next(5)]);
        assert_eq!(run.state(), RunState::Running);

        drop(tx);
        pool.run_until_stalled();
        assert!(!tracker.is_loading());
        assert_eq!(run.outcome(), Some(Signal::Complete));
    }

    #[test]
    fn dropping_executor_cancels() {
        let pool = LocalPool::new();
        let tracker = LoadingTracker::new();
        let (_tx, rx) = mpsc::unbounded::<Result<u32, String>>();
        let run = tracker
            .loading_until_stream_ends(rx, &pool.spawner())
            .unwrap();

        drop(pool);
        assert!(!tracker.is_loading());
        assert_eq!(run.outcome(), Some(Signal::Cancelled));
    }

    #[test]
    fn consumer_cancel_stops_pulling() {
        let mut pool = LocalPool::new();
        let tracker = LoadingTracker::new();
        let (tx, rx) = mpsc::unbounded::<Result<u32, String>>();
        let run = tracker
            .loading_until_stream_ends(rx, &pool.spawner())
            .unwrap();

        tx.unbounded_send(Ok(1)).unwrap();
        pool.run_until_stalled();
        run.cancel();
        assert!(!tracker.is_loading());

        pool.run_until_stalled();
        assert_eq!(run.replay_len(), 2);
        assert_eq!(run.outcome(), Some(Signal::Cancelled));
        assert!(tx.is_closed());
        assert!(tx.unbounded_send(Ok(2)).is_err());
    }

    #[test]
    fn cancel_while_pending_drops_stream() {
        let mut pool = LocalPool::new();
        let tracker = LoadingTracker::new();
        let (tx, rx) = mpsc::unbounded::<Result<u32, String>>();
        let run = tracker
            .loading_until_stream_ends(rx, &pool.spawner())
            .unwrap();

        pool.run_until_stalled();
        assert!(!tx.is_closed());

        run.cancel();
        pool.run_until_stalled();
        assert!(!tracker.is_loading());
        assert_eq!(run.outcome(), Some(Signal::Cancelled));
        assert!(tx.is_closed());
    }

    #[test]
    fn refused_spawn_releases_lid() {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        drop(pool);

        let tracker = LoadingTracker::new();
        let items = stream::iter(vec![Ok::<u32, String>(1)]);
        let result = tracker.loading_until_stream_ends(items, &spawner);
        assert!(result.unwrap_err().is_shutdown());
        assert!(!tracker.is_loading());
        assert_eq!(tracker.emitted(), 2);
    }
}
