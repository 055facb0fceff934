#![forbid(unsafe_code)]

//! Single shared execution of a push-based producer, with replay.
//!
//! # Design
//!
//! A producer is a `FnOnce(Sink<T, E>)`. It is invoked exactly once, by
//! [`SharedRun::start`], and pushes [`Signal`]s through the [`Sink`] for as
//! long as it holds it. Every signal is appended to a log. Each subscriber
//! owns a cursor into that log, so a late subscriber first receives every
//! buffered value and the terminal signal (if any), then live signals.
//!
//! ```text
//!            start()               complete() / error() / drop / cancel()
//!   Idle ─────────────▶ Running ────────────────────────────────▶ Finished
//! ```
//!
//! # Invariants
//!
//! 1. The producer runs at most once, no matter how many subscribers exist.
//! 2. At most one terminal signal is logged; signals after it are ignored.
//! 3. The finish hook runs exactly once, before any subscriber sees the
//!    terminal signal. Close callbacks registered through
//!    [`Sink::on_close`] run right after it.
//! 4. Every subscriber sees the full log in order, exactly once.
//!
//! # Failure Modes
//!
//! - **Abandoned sink**: dropping the [`Sink`] without `complete`/`error`
//!   finishes the run with [`Signal::Cancelled`].
//! - **Re-entrant push**: a subscriber that pushes into the run from its
//!   callback has the signal appended to the log; delivery continues from the
//!   outer pass, so per-subscriber order is preserved.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::broadcast::Subscription;
use crate::lid::Lid;

/// One notification from a shared run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal<T, E> {
    /// An intermediate value.
    Next(T),
    /// The producer failed. Terminal.
    Error(E),
    /// The producer finished normally. Terminal.
    Complete,
    /// The run was abandoned by the producer or cancelled by a consumer. Terminal.
    Cancelled,
}

impl<T, E> Signal<T, E> {
    /// Whether this signal ends the run.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Next(_))
    }

    /// Short name of the signal kind, for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Next(_) => "next",
            Self::Error(_) => "error",
            Self::Complete => "complete",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Lifecycle of a [`SharedRun`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Created, producer not invoked yet.
    Idle,
    /// Producer invoked, no terminal signal yet.
    Running,
    /// A terminal signal has been logged.
    Finished,
}

type SignalCallback<T, E> = dyn Fn(&Signal<T, E>);
type FinishHook<T, E> = Box<dyn FnOnce(&Signal<T, E>)>;
type CloseCallback = Box<dyn FnOnce()>;

struct Cursor<T, E> {
    callback: Weak<SignalCallback<T, E>>,
    /// Number of log entries already delivered to this subscriber.
    delivered: usize,
}

struct RunInner<T, E> {
    lid: Lid,
    state: RunState,
    log: Vec<Signal<T, E>>,
    cursors: Vec<Cursor<T, E>>,
    draining: bool,
    on_finish: Option<FinishHook<T, E>>,
    on_close: Vec<CloseCallback>,
}

/// Handle to one shared execution of a producer.
///
/// Cloning a `SharedRun` creates a new handle to the **same** run.
pub struct SharedRun<T, E> {
    inner: Rc<RefCell<RunInner<T, E>>>,
}

impl<T, E> Clone for SharedRun<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T, E> std::fmt::Debug for SharedRun<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("SharedRun")
            .field("lid", &inner.lid)
            .field("state", &inner.state)
            .field("replay_len", &inner.log.len())
            .field("subscriber_count", &inner.cursors.len())
            .finish()
    }
}

impl<T: Clone + 'static, E: Clone + 'static> SharedRun<T, E> {
    pub(crate) fn new(lid: Lid) -> Self {
        Self {
            inner: Rc::new(RefCell::new(RunInner {
                lid,
                state: RunState::Idle,
                log: Vec::new(),
                cursors: Vec::new(),
                draining: false,
                on_finish: None,
                on_close: Vec::new(),
            })),
        }
    }

    /// Install the hook run once when the run finishes.
    pub(crate) fn on_finish(&self, hook: impl FnOnce(&Signal<T, E>) + 'static) {
        self.inner.borrow_mut().on_finish = Some(Box::new(hook));
    }

    /// Invoke the producer. Ignored unless the run is still idle.
    pub(crate) fn start(&self, producer: impl FnOnce(Sink<T, E>)) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.state != RunState::Idle {
                return;
            }
            inner.state = RunState::Running;
        }
        producer(Sink { run: self.clone() });
    }

    /// Observe the run.
    ///
    /// The callback first receives everything logged so far, then live
    /// signals. Dropping the returned [`Subscription`] stops delivery to this
    /// callback; it never stops the run itself.
    pub fn subscribe(&self, observer: impl Fn(&Signal<T, E>) + 'static) -> Subscription {
        let strong: Rc<SignalCallback<T, E>> = Rc::new(observer);
        self.inner.borrow_mut().cursors.push(Cursor {
            callback: Rc::downgrade(&strong),
            delivered: 0,
        });
        self.drain();
        Subscription::from_guard(Box::new(strong))
    }

    /// Finish the run from the consumer side.
    ///
    /// Subscribers see [`Signal::Cancelled`] and later pushes from the
    /// producer are ignored. No-op if the run already finished.
    pub fn cancel(&self) {
        self.finish(Signal::Cancelled);
    }

    /// The lid this run keeps busy.
    #[must_use]
    pub fn lid(&self) -> Lid {
        self.inner.borrow().lid.clone()
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        self.inner.borrow().state
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state() == RunState::Finished
    }

    /// The terminal signal, once the run has finished.
    #[must_use]
    pub fn outcome(&self) -> Option<Signal<T, E>> {
        let inner = self.inner.borrow();
        inner.log.last().filter(|s| s.is_terminal()).cloned()
    }

    /// Number of signals buffered for replay (terminal included).
    #[must_use]
    pub fn replay_len(&self) -> usize {
        self.inner.borrow().log.len()
    }

    fn push(&self, value: T) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.state == RunState::Finished {
                return;
            }
            inner.log.push(Signal::Next(value));
        }
        self.drain();
    }

    fn finish(&self, terminal: Signal<T, E>) {
        let (hook, closers) = {
            let mut inner = self.inner.borrow_mut();
            if inner.state == RunState::Finished {
                return;
            }
            inner.state = RunState::Finished;
            inner.log.push(terminal.clone());
            (inner.on_finish.take(), std::mem::take(&mut inner.on_close))
        };
        if let Some(hook) = hook {
            hook(&terminal);
        }
        for close in closers {
            close();
        }
        self.drain();
    }

    fn add_close(&self, close: CloseCallback) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.state != RunState::Finished {
                inner.on_close.push(close);
                return;
            }
        }
        close();
    }

    /// Bring every live cursor up to the end of the log.
    fn drain(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.draining {
                return;
            }
            inner.draining = true;
        }

        let _pass = DrainPass { inner: &self.inner };
        loop {
            let step = {
                let mut guard = self.inner.borrow_mut();
                let inner = &mut *guard;
                inner.cursors.retain(|c| c.callback.strong_count() > 0);
                let log = &inner.log;
                inner.cursors.iter_mut().find_map(|cursor| {
                    let signal = log.get(cursor.delivered)?.clone();
                    let callback = cursor.callback.upgrade()?;
                    cursor.delivered += 1;
                    Some((callback, signal))
                })
            };
            match step {
                Some((callback, signal)) => callback(&signal),
                None => break,
            }
        }
    }
}

/// Ends a drain pass, including when a subscriber panics.
struct DrainPass<'a, T, E> {
    inner: &'a RefCell<RunInner<T, E>>,
}

impl<T, E> Drop for DrainPass<'_, T, E> {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.try_borrow_mut() {
            inner.draining = false;
        }
    }
}

/// Producer-side handle of a [`SharedRun`].
///
/// Dropping the sink without calling [`complete`](Sink::complete) or
/// [`error`](Sink::error) cancels the run.
pub struct Sink<T: Clone + 'static, E: Clone + 'static> {
    run: SharedRun<T, E>,
}

impl<T: Clone + 'static, E: Clone + 'static> Sink<T, E> {
    /// Emit an intermediate value. Ignored once the run has finished.
    pub fn next(&self, value: T) {
        self.run.push(value);
    }

    /// Finish the run with an error.
    pub fn error(self, error: E) {
        self.run.finish(Signal::Error(error));
    }

    /// Finish the run normally.
    pub fn complete(self) {
        self.run.finish(Signal::Complete);
    }

    /// Whether the run has finished (e.g. a consumer cancelled it).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.run.is_finished()
    }

    /// Register `close` to run once when the run finishes, whoever ends it.
    ///
    /// Producers parked on external work use this to hear about
    /// [`SharedRun::cancel`] without polling [`is_closed`](Sink::is_closed).
    /// Runs immediately if the run has already finished.
    pub fn on_close(&self, close: impl FnOnce() + 'static) {
        self.run.add_close(Box::new(close));
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Drop for Sink<T, E> {
    fn drop(&mut self) {
        self.run.finish(Signal::Cancelled);
    }
}

impl<T: Clone + 'static, E: Clone + 'static> std::fmt::Debug for Sink<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sink")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    type Log = Rc<RefCell<Vec<Signal<u32, String>>>>;

    fn record(run: &SharedRun<u32, String>) -> (Log, Subscription) {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let log_clone = Rc::clone(&log);
        let sub = run.subscribe(move |s| log_clone.borrow_mut().push(s.clone()));
        (log, sub)
    }

    fn parked() -> (SharedRun<u32, String>, Rc<RefCell<Option<Sink<u32, String>>>>) {
        let run = SharedRun::new(Lid::from("t"));
        let slot = Rc::new(RefCell::new(None));
        let slot_clone = Rc::clone(&slot);
        run.start(move |sink| *slot_clone.borrow_mut() = Some(sink));
        (run, slot)
    }

    #[test]
    fn producer_runs_once() {
        let runs = Rc::new(Cell::new(0u32));
        let runs_clone = Rc::clone(&runs);
        let run: SharedRun<u32, String> = SharedRun::new(Lid::from("t"));
        assert_eq!(run.state(), RunState::Idle);
        run.start(move |sink| {
            runs_clone.set(runs_clone.get() + 1);
            sink.next(1);
            sink.complete();
        });
        run.start(|_sink| panic!("second start must be ignored"));

        let (a, _sa) = record(&run);
        let (b, _sb) = record(&run);
        assert_eq!(runs.get(), 1);
        assert_eq!(*a.borrow(), vec![Signal::Next(1), Signal::Complete]);
        assert_eq!(*a.borrow(), *b.borrow());
    }

    #[test]
    fn live_and_late_subscribers_see_same_log() {
        let (run, slot) = parked();
        let (early, _se) = record(&run);

        slot.borrow().as_ref().unwrap().next(1);
        slot.borrow().as_ref().unwrap().next(2);
        let (late, _sl) = record(&run);
        assert_eq!(*late.borrow(), vec![Signal::Next(1), Signal::Next(2)]);

        slot.borrow_mut().take().unwrap().error("boom".to_owned());
        let expected = vec![
            Signal::Next(1),
            Signal::Next(2),
            Signal::Error("boom".to_owned()),
        ];
        assert_eq!(*early.borrow(), expected);
        assert_eq!(*late.borrow(), expected);
        assert_eq!(run.outcome(), Some(Signal::Error("boom".to_owned())));
        assert_eq!(run.replay_len(), 3);
    }

    #[test]
    fn dropped_sink_cancels() {
        let (run, slot) = parked();
        assert_eq!(run.state(), RunState::Running);
        drop(slot.borrow_mut().take());
        assert!(run.is_finished());
        assert_eq!(run.outcome(), Some(Signal::Cancelled));
    }

    #[test]
    fn finish_hook_runs_once_before_terminal_delivery() {
        let (run, slot) = parked();
        let order = Rc::new(RefCell::new(Vec::new()));

        let hook_order = Rc::clone(&order);
        run.on_finish(move |terminal| {
            hook_order
                .borrow_mut()
                .push(format!("hook:{}", terminal.kind()));
        });
        let sub_order = Rc::clone(&order);
        let _sub = run.subscribe(move |s| {
            sub_order.borrow_mut().push(format!("sub:{}", s.kind()));
        });

        run.cancel();
        slot.borrow_mut().take().unwrap().complete();
        run.cancel();

        assert_eq!(*order.borrow(), vec!["hook:cancelled", "sub:cancelled"]);
        assert_eq!(run.outcome(), Some(Signal::Cancelled));
    }

    #[test]
    fn close_callbacks_run_once_after_hook() {
        let (run, slot) = parked();
        let order = Rc::new(RefCell::new(Vec::new()));

        let hook_order = Rc::clone(&order);
        run.on_finish(move |_| hook_order.borrow_mut().push("hook"));
        let close_order = Rc::clone(&order);
        slot.borrow()
            .as_ref()
            .unwrap()
            .on_close(move || close_order.borrow_mut().push("close"));
        let sub_order = Rc::clone(&order);
        let _sub = run.subscribe(move |s| {
            if s.is_terminal() {
                sub_order.borrow_mut().push("sub");
            }
        });

        run.cancel();
        drop(slot.borrow_mut().take());
        assert_eq!(*order.borrow(), vec!["hook", "close", "sub"]);

        let late = Rc::new(Cell::new(false));
        let late_clone = Rc::clone(&late);
        Sink { run: run.clone() }.on_close(move || late_clone.set(true));
        assert!(late.get());
    }

    #[test]
    fn closed_sink_ignores_values() {
        let (run, slot) = parked();
        run.cancel();
        let sink = slot.borrow_mut().take().unwrap();
        assert!(sink.is_closed());
        sink.next(5);
        assert_eq!(run.replay_len(), 1);
    }

    #[test]
    fn dropping_subscription_keeps_run_alive() {
        let (run, slot) = parked();
        let (log, sub) = record(&run);
        drop(sub);
        slot.borrow().as_ref().unwrap().next(3);
        assert!(log.borrow().is_empty());
        assert_eq!(run.state(), RunState::Running);
    }

    #[test]
    fn reentrant_push_preserves_order() {
        let (run, slot) = parked();
        let sink = Rc::new(slot.borrow_mut().take().unwrap());

        let feeder = Rc::clone(&sink);
        let _first = run.subscribe(move |s| {
            if *s == Signal::Next(1) {
                feeder.next(2);
            }
        });
        let (log, _sub) = record(&run);

        sink.next(1);
        assert_eq!(*log.borrow(), vec![Signal::Next(1), Signal::Next(2)]);
    }

    #[test]
    fn signal_kinds() {
        let next: Signal<u8, ()> = Signal::Next(1);
        assert!(!next.is_terminal());
        assert_eq!(next.kind(), "next");
        assert!(Signal::<u8, ()>::Complete.is_terminal());
        assert!(Signal::<u8, ()>::Error(()).is_terminal());
        assert_eq!(Signal::<u8, ()>::Cancelled.kind(), "cancelled");
    }
}
