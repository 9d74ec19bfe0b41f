//! 🎬 *[INT. FETCH THREAD. THE LOOP NEVER SLEEPS. EXCEPT WHEN IT DOES. ON A CONDVAR.]*
//!
//! 🧵 The fetch loop: one dedicated thread, one reader, a handful of splits, and a shared
//! handoff queue to shovel batches into.
//!
//! 🧠 Knowledge graph:
//! - [`SplitFetcher`] is moved onto its thread and owns the reader. Nobody else touches it.
//! - [`FetcherHandle`] is the thread-safe remote control: add/remove splits, wake up,
//!   pause/resume, shut down, release the drain latch.
//! - One cycle is [`SplitFetcher::run_once`]. It returns a [`FetchOutcome`] so every edge of
//!   the state machine is a value a test can assert on, not an unwinding panic.
//! - Stale fetches (a wake-up raced the fetch) are never published. They go back to the
//!   reader through `rewind`, and the reader decides whether to replay them.
//! - Going idle completes the queue's availability future so the consumer comes by and notices.
//!
//! 🦆 The duck owns zero splits. The duck is always idle. Be more like the duck.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace, warn};

use crate::backends::{ReaderWaker, SplitReader};
use crate::common::SplitBatch;
use crate::handoff::{HandoffQueue, PutError};
use crate::splits::{SourceSplit, SplitsChange};
use crate::sync::OneShot;

/// 💀 Where fetch-thread failures go to be heard. Called from the fetch thread.
pub type ErrorSink = Arc<dyn Fn(anyhow::Error) + Send + Sync>;

/// 🚚 The queue every fetcher of a reader type publishes into.
pub type BatchQueue<T> = HandoffQueue<SplitBatch<T>>;

// -- 😴 upper bound on a single condvar nap while paused or idle; the loop re-checks after
const PARK_TIMEOUT: Duration = Duration::from_millis(100);

/// 🎯 What one fetch cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Paused. Nothing fetched.
    Paused,
    /// No splits assigned.
    Idle,
    /// A batch went into the queue.
    Published,
    /// The fetch came back with nothing for anyone.
    Empty,
    /// A wake-up raced the fetch. The batch went back to the reader unpublished.
    Stale,
    /// The producer was woken while the queue was full. The batch is kept for the next cycle.
    PublishDeferred,
    /// The queue is closed. The batch was dropped and the loop should wind down.
    QueueClosed,
}

struct ControlState<S> {
    // -- 📋 insertion order = fetch priority
    assigned: Vec<S>,
    pending: VecDeque<SplitsChange<S>>,
    paused: bool,
    // -- 🛑 Some(wait_for_drain) once shutdown was requested
    shutdown: Option<bool>,
    fetching: bool,
    idle: bool,
    has_unpublished: bool,
    awaiting_drain: bool,
    closed: bool,
}

impl<S> ControlState<S> {
    fn new() -> Self {
        Self {
            assigned: Vec::new(),
            pending: VecDeque::new(),
            paused: false,
            shutdown: None,
            fetching: false,
            idle: true,
            has_unpublished: false,
            awaiting_drain: false,
            closed: false,
        }
    }

    fn should_park(&self) -> bool {
        self.shutdown.is_none()
            && (self.paused
                || (self.assigned.is_empty() && self.pending.is_empty() && !self.has_unpublished))
    }
}

struct FetcherShared<R: SplitReader> {
    id: usize,
    state: Mutex<ControlState<R::Split>>,
    changed: Condvar,
    wake_requested: AtomicBool,
    reader_waker: Arc<dyn ReaderWaker>,
    queue: Arc<BatchQueue<R::Record>>,
    drain_latch: OneShot,
    terminated: OneShot,
}

/// 🎮 The thread-safe control surface of one fetch loop. Clone it, share it, poke it.
pub struct FetcherHandle<R: SplitReader> {
    shared: Arc<FetcherShared<R>>,
}

impl<R: SplitReader> Clone for FetcherHandle<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R: SplitReader> fmt::Debug for FetcherHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("FetcherHandle")
            .field("id", &self.shared.id)
            .field("assigned", &state.assigned.len())
            .field("paused", &state.paused)
            .field("idle", &state.idle)
            .field("shutdown", &state.shutdown)
            .field("closed", &state.closed)
            .finish()
    }
}

impl<R: SplitReader> FetcherHandle<R> {
    pub fn id(&self) -> usize {
        self.shared.id
    }

    /// ➕ Assigns splits. Already-assigned ids are ignored, new ones are appended in order.
    ///
    /// Wakes a possibly blocked fetch so the newcomers are picked up promptly.
    pub fn add_splits(&self, splits: Vec<R::Split>) {
        {
            let mut state = self.shared.state.lock();
            if state.closed || state.shutdown.is_some() {
                warn!(
                    "⚠️ fetcher {} is shutting down, refusing {} new splits",
                    self.shared.id,
                    splits.len()
                );
                return;
            }
            let mut added = Vec::with_capacity(splits.len());
            for split in splits {
                let already_there = state
                    .assigned
                    .iter()
                    .chain(added.iter())
                    .any(|s: &R::Split| s.split_id() == split.split_id());
                if !already_there {
                    added.push(split);
                }
            }
            if added.is_empty() {
                return;
            }
            debug!("🧩 fetcher {} picked up {} splits", self.shared.id, added.len());
            state.assigned.extend(added.iter().cloned());
            state.pending.push_back(SplitsChange::Addition(added));
            state.idle = false;
        }
        self.shared.changed.notify_all();
        self.wake_up(false);
    }

    /// ➖ Unassigns splits by id. Returns the splits that were actually removed.
    ///
    /// An in-flight fetch is woken and its result discarded, so nothing for a removed
    /// split gets published after this returns... give or take a batch already in the queue.
    pub fn remove_splits(&self, split_ids: &[&str]) -> Vec<R::Split> {
        let removed = {
            let mut state = self.shared.state.lock();
            let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.assigned)
                .into_iter()
                .partition(|split| split_ids.iter().any(|id| *id == split.split_id()));
            state.assigned = kept;
            if !removed.is_empty() {
                state.pending.push_back(SplitsChange::Removal(removed.clone()));
            }
            removed
        };
        if !removed.is_empty() {
            debug!("🧩 fetcher {} let go of {} splits", self.shared.id, removed.len());
            self.shared.changed.notify_all();
            self.wake_up(false);
        }
        removed
    }

    /// 📸 Snapshot of the assigned splits, in fetch priority order.
    pub fn assigned_splits(&self) -> Vec<R::Split> {
        self.shared.state.lock().assigned.clone()
    }

    /// 💤 No splits, not mid-fetch, nothing waiting to be published.
    pub fn is_idle(&self) -> bool {
        let state = self.shared.state.lock();
        state.idle && !state.fetching && !state.has_unpublished
    }

    /// ⏰ Short-circuits the in-flight (or next) fetch and pokes the reader.
    ///
    /// With `force`, a put blocked on a full queue is released too; the batch is kept
    /// and retried on the next cycle.
    pub fn wake_up(&self, force: bool) {
        trace!("⏰ waking fetcher {} (force: {force})", self.shared.id);
        self.shared.wake_requested.store(true, Ordering::SeqCst);
        self.shared.reader_waker.wake_up();
        if force {
            self.shared.queue.wake_up_producer(self.shared.id);
        }
        self.shared.changed.notify_all();
    }

    pub fn pause(&self) {
        self.shared.state.lock().paused = true;
        debug!("⏸️ fetcher {} paused", self.shared.id);
    }

    pub fn resume(&self) {
        self.shared.state.lock().paused = false;
        self.shared.changed.notify_all();
        debug!("▶️ fetcher {} resumed", self.shared.id);
    }

    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().paused
    }

    /// 🛑 Asks the loop to stop after its current cycle. Idempotent: the first mode wins.
    ///
    /// Immediate mode wakes the reader and a blocked put, and whatever they held is dropped.
    /// With `wait_for_drain`, the current cycle runs to completion and the fetch thread then
    /// parks on the drain latch before closing the reader, until somebody calls
    /// [`FetcherHandle::release_drain_latch`]. A later `wake_up(true)` still cuts a graceful
    /// cycle short.
    pub fn shutdown(&self, wait_for_drain: bool) {
        {
            let mut state = self.shared.state.lock();
            if state.shutdown.is_some() {
                return;
            }
            state.shutdown = Some(wait_for_drain);
        }
        info!(
            "🛑 fetcher {} asked to shut down (wait for drain: {wait_for_drain})",
            self.shared.id
        );
        self.shared.changed.notify_all();
        // -- 🔒 graceful stops let the current cycle finish, fetch and put included
        if !wait_for_drain {
            self.wake_up(true);
        }
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shared.state.lock().shutdown.is_some()
    }

    /// 🚦 Is the fetch thread parked on the drain latch right now?
    pub fn is_awaiting_drain(&self) -> bool {
        self.shared.state.lock().awaiting_drain
    }

    /// 🔓 Lets a draining fetch thread proceed to close its reader.
    pub fn release_drain_latch(&self) {
        self.shared.drain_latch.complete();
    }

    /// 🏁 Reader closed and bookkeeping done.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// ⏱️ Waits up to `timeout` for the loop to finish. Returns whether it did.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.shared.terminated.wait_timeout(timeout)
    }
}

/// 🧵 One fetch loop. Build it, grab a [`FetcherHandle`], then move it onto a thread and `run`.
pub struct SplitFetcher<R: SplitReader> {
    reader: R,
    shared: Arc<FetcherShared<R>>,
    unpublished: Option<SplitBatch<R::Record>>,
    error_sink: ErrorSink,
}

impl<R: SplitReader + fmt::Debug> fmt::Debug for SplitFetcher<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SplitFetcher")
            .field("id", &self.shared.id)
            .field("reader", &self.reader)
            .field("unpublished", &self.unpublished)
            .finish()
    }
}

impl<R: SplitReader> SplitFetcher<R> {
    pub fn new(
        id: usize,
        reader: R,
        queue: Arc<BatchQueue<R::Record>>,
        error_sink: ErrorSink,
    ) -> Self {
        let reader_waker = reader.waker();
        Self {
            reader,
            shared: Arc::new(FetcherShared {
                id,
                state: Mutex::new(ControlState::new()),
                changed: Condvar::new(),
                wake_requested: AtomicBool::new(false),
                reader_waker,
                queue,
                drain_latch: OneShot::new(),
                terminated: OneShot::new(),
            }),
            unpublished: None,
            error_sink,
        }
    }

    pub fn id(&self) -> usize {
        self.shared.id
    }

    pub fn handle(&self) -> FetcherHandle<R> {
        FetcherHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// 🔄 One fetch cycle. Blocks in the reader and, when the queue is full, in `put`.
    ///
    /// Reader failures come back as `Err` and are not retried here.
    pub fn run_once(&mut self) -> Result<FetchOutcome> {
        // -- 🧹 anything that woke us before this point is old news
        self.shared.wake_requested.store(false, Ordering::SeqCst);

        let changes: Vec<_> = {
            let mut state = self.shared.state.lock();
            if state.paused {
                return Ok(FetchOutcome::Paused);
            }
            state.pending.drain(..).collect()
        };
        for change in changes {
            self.reader.handle_splits_changes(change).with_context(|| {
                let id = self.shared.id;
                format!("💀 fetcher {id} could not hand split changes to its reader")
            })?;
        }

        if let Some(batch) = self.unpublished.take() {
            trace!("📦 fetcher {} retrying a deferred publish", self.shared.id);
            return Ok(self.publish(batch));
        }

        {
            let mut state = self.shared.state.lock();
            if state.assigned.is_empty() {
                drop(state);
                self.enter_idle();
                return Ok(FetchOutcome::Idle);
            }
            state.fetching = true;
        }

        let fetched = self.reader.fetch();
        let batch = match fetched {
            Ok(batch) => batch,
            Err(err) => {
                self.shared.state.lock().fetching = false;
                return Err(err.context(format!("💀 fetcher {} reader fetch failed", self.shared.id)));
            }
        };

        if self.shared.wake_requested.swap(false, Ordering::SeqCst) {
            trace!(
                "🗑️ fetcher {} discarding a stale batch of {} records",
                self.shared.id,
                batch.record_count()
            );
            self.reader.rewind(batch);
            self.shared.state.lock().fetching = false;
            return Ok(FetchOutcome::Stale);
        }

        let now_empty = {
            let mut state = self.shared.state.lock();
            let finished = batch.finished_splits();
            if !finished.is_empty() {
                state
                    .assigned
                    .retain(|split| !finished.contains(split.split_id()));
                debug!(
                    "🏁 fetcher {} finished splits {:?}, {} still assigned",
                    self.shared.id,
                    finished,
                    state.assigned.len()
                );
            }
            state.fetching = false;
            state.assigned.is_empty()
        };

        let outcome = if batch.is_empty() {
            batch.recycle();
            FetchOutcome::Empty
        } else {
            self.publish(batch)
        };

        if now_empty && outcome != FetchOutcome::PublishDeferred {
            self.enter_idle();
        }
        Ok(outcome)
    }

    fn publish(&mut self, batch: SplitBatch<R::Record>) -> FetchOutcome {
        let outcome = match self.shared.queue.put(self.shared.id, batch) {
            Ok(()) => FetchOutcome::Published,
            Err(PutError::WokenUp(batch)) => {
                self.unpublished = Some(batch);
                FetchOutcome::PublishDeferred
            }
            Err(PutError::Closed(batch)) => {
                debug!("🚪 fetcher {} found the queue closed, dropping its batch", self.shared.id);
                batch.recycle();
                FetchOutcome::QueueClosed
            }
        };
        self.shared.state.lock().has_unpublished = self.unpublished.is_some();
        outcome
    }

    /// 💤 Flags idleness and, on the transition only, rings the consumer's bell.
    fn enter_idle(&self) {
        let newly_idle = {
            let mut state = self.shared.state.lock();
            let was_idle = state.idle;
            state.idle = true;
            !was_idle
        };
        if newly_idle {
            debug!("💤 fetcher {} ran out of splits, going idle", self.shared.id);
            self.shared.queue.notify_available();
        }
    }

    fn park(&self) {
        let mut state = self.shared.state.lock();
        if state.should_park() {
            self.shared.changed.wait_for(&mut state, PARK_TIMEOUT);
        }
    }

    /// 🧵 The thread body. Cycles until shutdown, then closes the reader exactly once.
    ///
    /// Fetch failures are handed to the error sink and end the loop. A failing `close`
    /// is returned, after the bookkeeping is done.
    pub fn run(mut self) -> Result<()> {
        info!("🚀 fetcher {} started", self.shared.id);
        let mut failed = false;
        loop {
            if self.shared.state.lock().shutdown.is_some() {
                break;
            }
            match self.run_once() {
                Ok(FetchOutcome::Paused) | Ok(FetchOutcome::Idle) => self.park(),
                Ok(FetchOutcome::QueueClosed) => {
                    let mut state = self.shared.state.lock();
                    state.shutdown.get_or_insert(false);
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("💀 fetcher {} stopping after a fetch failure: {err:#}", self.shared.id);
                    (self.error_sink)(err);
                    failed = true;
                    break;
                }
            }
        }
        self.finish(failed)
    }

    fn finish(mut self, failed: bool) -> Result<()> {
        let wait_for_drain = !failed && self.shared.state.lock().shutdown == Some(true);
        if wait_for_drain {
            self.flush_unpublished();
            self.shared.state.lock().awaiting_drain = true;
            // -- 🔔 the consumer may be parked on availability, give it a reason to look around
            self.shared.queue.notify_available();
            debug!("🚦 fetcher {} parked on the drain latch", self.shared.id);
            self.shared.drain_latch.wait();
        } else if let Some(batch) = self.unpublished.take() {
            batch.recycle();
        }

        let closed = self.reader.close();
        {
            let mut state = self.shared.state.lock();
            state.closed = true;
            state.awaiting_drain = false;
            state.fetching = false;
            state.has_unpublished = false;
            state.idle = true;
        }
        self.shared.terminated.complete();
        info!("🏁 fetcher {} terminated", self.shared.id);
        closed.with_context(|| format!("💀 fetcher {} failed to close its reader", self.shared.id))
    }

    /// 📦 Graceful mode: a batch that lost a race with a wake-up still deserves a seat.
    fn flush_unpublished(&mut self) {
        while let Some(batch) = self.unpublished.take() {
            match self.shared.queue.put(self.shared.id, batch) {
                Ok(()) => {}
                Err(PutError::WokenUp(batch)) => self.unpublished = Some(batch),
                Err(PutError::Closed(batch)) => batch.recycle(),
            }
        }
        self.shared.state.lock().has_unpublished = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryReader;
    use crate::common::Record;
    use crate::splits::RangeSplit;
    use crate::sync::WakeSignal;
    use anyhow::bail;
    use std::collections::HashSet;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Instant;

    fn quiet_sink() -> (ErrorSink, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink: ErrorSink = Arc::new(move |err: anyhow::Error| sink_seen.lock().push(format!("{err:#}")));
        (sink, seen)
    }

    fn offsets(batch: SplitBatch<Record>) -> Vec<u64> {
        let (groups, _) = batch.into_parts();
        groups
            .into_iter()
            .flat_map(|(_, records)| records.into_iter().map(|r| r.offset))
            .collect()
    }

    /// 🎭 A reader that does exactly what the test script tells it, when it tells it.
    struct ScriptedReader {
        started: mpsc::Sender<()>,
        batches: mpsc::Receiver<Result<SplitBatch<Record>>>,
        rewound: Arc<Mutex<Vec<usize>>>,
        closed: Arc<AtomicBool>,
        fail_close: bool,
        waker: Arc<WakeSignal>,
    }

    impl SplitReader for ScriptedReader {
        type Split = RangeSplit;
        type Record = Record;

        fn fetch(&mut self) -> Result<SplitBatch<Record>> {
            let _ = self.started.send(());
            match self.batches.recv() {
                Ok(batch) => batch,
                Err(_) => bail!("💀 script ran out of lines"),
            }
        }

        fn handle_splits_changes(&mut self, _change: SplitsChange<RangeSplit>) -> Result<()> {
            Ok(())
        }

        fn waker(&self) -> Arc<dyn ReaderWaker> {
            self.waker.clone()
        }

        fn rewind(&mut self, stale: SplitBatch<Record>) {
            self.rewound.lock().push(stale.record_count());
        }

        fn close(&mut self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            if self.fail_close {
                bail!("💀 the reader slammed the door on its way out");
            }
            Ok(())
        }
    }

    struct Script {
        started: mpsc::Receiver<()>,
        batches: mpsc::Sender<Result<SplitBatch<Record>>>,
        rewound: Arc<Mutex<Vec<usize>>>,
        closed: Arc<AtomicBool>,
    }

    fn scripted(fail_close: bool) -> (ScriptedReader, Script) {
        let (started_tx, started_rx) = mpsc::channel();
        let (batches_tx, batches_rx) = mpsc::channel();
        let rewound = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let reader = ScriptedReader {
            started: started_tx,
            batches: batches_rx,
            rewound: Arc::clone(&rewound),
            closed: Arc::clone(&closed),
            fail_close,
            waker: Arc::new(WakeSignal::new()),
        };
        let script = Script {
            started: started_rx,
            batches: batches_tx,
            rewound,
            closed,
        };
        (reader, script)
    }

    fn batch_of(split_id: &str, offsets: std::ops::Range<u64>) -> SplitBatch<Record> {
        let mut batch = SplitBatch::new();
        batch.add_records(split_id, offsets.map(|n| Record::new(n, format!("{split_id}:{n}"))));
        batch
    }

    #[test]
    fn the_one_where_a_wake_up_mid_fetch_makes_the_batch_stale() -> Result<()> {
        let queue = Arc::new(BatchQueue::new(2));
        let (reader, script) = scripted(false);
        let (sink, _) = quiet_sink();
        let mut fetcher = SplitFetcher::new(0, reader, Arc::clone(&queue), sink);
        let handle = fetcher.handle();
        handle.add_splits(vec![RangeSplit::new("r", 0, 10)]);

        let worker = thread::spawn(move || {
            let outcome = fetcher.run_once();
            (fetcher, outcome)
        });
        script.started.recv()?;
        handle.wake_up(false);
        script
            .batches
            .send(Ok(batch_of("r", 0..3)))
            .expect("💀 script reader hung up");

        let (_fetcher, outcome) = worker.join().expect("💀 fetch thread panicked");
        assert_eq!(outcome?, FetchOutcome::Stale);
        assert!(queue.is_empty(), "a stale batch must never reach the consumer");
        assert_eq!(*script.rewound.lock(), vec![3]);
        Ok(())
    }

    /// 🚧 An in-memory reader that waits for a green light before every fetch.
    struct GatedReader {
        inner: InMemoryReader,
        started: mpsc::Sender<()>,
        gate: mpsc::Receiver<()>,
    }

    impl SplitReader for GatedReader {
        type Split = RangeSplit;
        type Record = Record;

        fn fetch(&mut self) -> Result<SplitBatch<Record>> {
            let _ = self.started.send(());
            if self.gate.recv().is_err() {
                bail!("💀 the gate keeper went home");
            }
            self.inner.fetch()
        }

        fn handle_splits_changes(&mut self, change: SplitsChange<RangeSplit>) -> Result<()> {
            self.inner.handle_splits_changes(change)
        }

        fn waker(&self) -> Arc<dyn ReaderWaker> {
            self.inner.waker()
        }

        fn rewind(&mut self, stale: SplitBatch<Record>) {
            self.inner.rewind(stale);
        }

        fn close(&mut self) -> Result<()> {
            self.inner.close()
        }
    }

    #[test]
    fn the_one_where_a_split_removed_mid_fetch_never_reaches_the_queue() -> Result<()> {
        let queue = Arc::new(BatchQueue::new(4));
        let (started_tx, started) = mpsc::channel();
        let (gate, gate_rx) = mpsc::channel();
        let reader = GatedReader {
            inner: InMemoryReader::with_limits(100, Duration::ZERO),
            started: started_tx,
            gate: gate_rx,
        };
        let (sink, _) = quiet_sink();
        let mut fetcher = SplitFetcher::new(0, reader, Arc::clone(&queue), sink);
        let handle = fetcher.handle();
        handle.add_splits(vec![RangeSplit::new("r", 0, 5), RangeSplit::new("s", 100, 103)]);

        let worker = thread::spawn(move || {
            let outcome = fetcher.run_once();
            (fetcher, outcome)
        });
        started.recv()?;
        let removed = handle.remove_splits(&["r"]);
        assert_eq!(removed, vec![RangeSplit::new("r", 0, 5)]);
        gate.send(()).expect("💀 gated reader hung up");
        let (mut fetcher, outcome) = worker.join().expect("💀 fetch thread panicked");
        assert_eq!(outcome?, FetchOutcome::Stale);

        gate.send(()).expect("💀 gated reader hung up");
        assert_eq!(fetcher.run_once()?, FetchOutcome::Published);
        let batch = queue.poll().expect("💀 the surviving split should have been published");
        assert_eq!(batch.split_ids(), vec!["s".to_string()]);
        assert!(!batch.finished_splits().contains("r"));
        assert_eq!(offsets(batch), vec![100, 101, 102]);
        assert!(queue.is_empty());
        assert!(handle.is_idle());
        Ok(())
    }

    #[test]
    fn the_one_where_an_undisturbed_fetch_gets_published() -> Result<()> {
        let queue = Arc::new(BatchQueue::new(2));
        let (reader, script) = scripted(false);
        let (sink, _) = quiet_sink();
        let mut fetcher = SplitFetcher::new(0, reader, Arc::clone(&queue), sink);
        fetcher.handle().add_splits(vec![RangeSplit::new("r", 0, 10)]);

        let mut batch = batch_of("r", 0..2);
        batch.finish_split("r");
        script.batches.send(Ok(batch)).expect("💀 script reader hung up");
        assert_eq!(fetcher.run_once()?, FetchOutcome::Published);
        assert!(fetcher.handle().is_idle(), "the only split finished");
        assert_eq!(offsets(queue.poll().expect("💀 batch should be queued")), vec![0, 1]);
        Ok(())
    }

    #[test]
    fn the_one_where_going_idle_rings_the_bell_with_nothing_to_show() -> Result<()> {
        let queue = Arc::new(BatchQueue::new(4));
        let (sink, _) = quiet_sink();
        let mut fetcher = SplitFetcher::new(
            0,
            InMemoryReader::with_limits(2, Duration::ZERO),
            Arc::clone(&queue),
            sink,
        );
        let handle = fetcher.handle();
        handle.add_splits(vec![RangeSplit::new("r", 0, 100)]);
        assert!(!handle.is_idle());

        assert_eq!(fetcher.run_once()?, FetchOutcome::Published);
        assert_eq!(offsets(queue.poll().expect("💀 first batch missing")), vec![0, 1]);

        let waiting = queue.availability();
        assert!(!waiting.is_done());
        let removed = handle.remove_splits(&["r"]);
        assert_eq!(removed.len(), 1);

        assert_eq!(fetcher.run_once()?, FetchOutcome::Idle);
        assert!(waiting.is_done(), "idle transition must release the waiting consumer");
        assert!(queue.is_empty());
        assert!(handle.is_idle());

        let again = queue.availability();
        assert_eq!(fetcher.run_once()?, FetchOutcome::Idle);
        assert!(!again.is_done(), "staying idle is not news");
        Ok(())
    }

    #[test]
    fn the_one_where_pause_means_pause() -> Result<()> {
        let queue = Arc::new(BatchQueue::new(2));
        let (sink, _) = quiet_sink();
        let mut fetcher = SplitFetcher::new(
            0,
            InMemoryReader::with_limits(10, Duration::ZERO),
            Arc::clone(&queue),
            sink,
        );
        let handle = fetcher.handle();
        handle.add_splits(vec![RangeSplit::new("r", 0, 5)]);
        handle.pause();
        assert!(handle.is_paused());
        assert_eq!(fetcher.run_once()?, FetchOutcome::Paused);
        assert!(queue.is_empty());

        handle.resume();
        assert_eq!(fetcher.run_once()?, FetchOutcome::Published);
        assert_eq!(queue.len(), 1);
        Ok(())
    }

    #[test]
    fn the_one_where_a_forced_wake_up_hands_the_batch_back_for_later() -> Result<()> {
        let queue = Arc::new(BatchQueue::new(1));
        let (sink, _) = quiet_sink();
        let mut fetcher = SplitFetcher::new(
            7,
            InMemoryReader::with_limits(1, Duration::ZERO),
            Arc::clone(&queue),
            sink,
        );
        let handle = fetcher.handle();
        handle.add_splits(vec![RangeSplit::new("r", 0, 3)]);
        assert_eq!(fetcher.run_once()?, FetchOutcome::Published);

        let worker = thread::spawn(move || {
            let outcome = fetcher.run_once();
            (fetcher, outcome)
        });
        thread::sleep(Duration::from_millis(50));
        // -- the fetch is long done, only the put is stuck, so this lands on the producer side
        handle.wake_up(true);
        let (mut fetcher, outcome) = worker.join().expect("💀 fetch thread panicked");
        assert_eq!(outcome?, FetchOutcome::PublishDeferred);
        assert!(!handle.is_idle());

        assert_eq!(offsets(queue.poll().expect("💀 first batch missing")), vec![0]);
        assert_eq!(fetcher.run_once()?, FetchOutcome::Published);
        assert_eq!(offsets(queue.poll().expect("💀 deferred batch missing")), vec![1]);
        Ok(())
    }

    #[test]
    fn the_one_where_the_reader_stays_open_until_the_drain_latch_drops() -> Result<()> {
        let queue = Arc::new(BatchQueue::new(1));
        let (reader, script) = scripted(false);
        let (sink, _) = quiet_sink();
        let fetcher = SplitFetcher::new(0, reader, Arc::clone(&queue), sink);
        let handle = fetcher.handle();
        handle.add_splits(vec![RangeSplit::new("r", 0, 4)]);
        for batch in [batch_of("r", 0..2), batch_of("r", 2..4)] {
            script.batches.send(Ok(batch)).expect("💀 script reader hung up");
        }

        let worker = thread::spawn(move || fetcher.run());
        // -- second batch is blocked on the full queue when shutdown arrives
        script.started.recv()?;
        script.started.recv()?;
        handle.shutdown(true);

        let mut drained = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !(handle.is_awaiting_drain() && queue.is_empty()) {
            assert!(Instant::now() < deadline, "💀 fetcher never parked on the latch");
            match queue.poll() {
                Some(batch) => drained.extend(offsets(batch)),
                None => thread::sleep(Duration::from_millis(5)),
            }
        }
        assert_eq!(drained, vec![0, 1, 2, 3], "graceful shutdown loses nothing in flight");
        assert!(!script.closed.load(Ordering::SeqCst), "reader must stay open while parked");

        handle.release_drain_latch();
        worker.join().expect("💀 fetch thread panicked")?;
        assert!(handle.await_termination(Duration::from_secs(5)));
        assert!(script.closed.load(Ordering::SeqCst));
        assert!(handle.is_closed());
        Ok(())
    }

    #[test]
    fn the_one_where_a_broken_reader_is_reported_not_retried() -> Result<()> {
        let queue = Arc::new(BatchQueue::new(2));
        let (reader, script) = scripted(false);
        let (sink, seen) = quiet_sink();
        let fetcher = SplitFetcher::new(3, reader, Arc::clone(&queue), sink);
        let handle = fetcher.handle();
        handle.add_splits(vec![RangeSplit::new("r", 0, 4)]);
        script
            .batches
            .send(Err(anyhow::anyhow!("disk on fire")))
            .expect("💀 script reader hung up");

        fetcher.run()?;
        let errors = seen.lock().clone();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("disk on fire"));
        assert!(script.closed.load(Ordering::SeqCst), "reader is still closed exactly once");
        assert!(handle.is_closed());
        Ok(())
    }

    #[test]
    fn the_one_where_a_failed_close_still_leaves_the_books_balanced() {
        let queue = Arc::new(BatchQueue::new(2));
        let (reader, _script) = scripted(true);
        let (sink, seen) = quiet_sink();
        let fetcher = SplitFetcher::new(0, reader, queue, sink);
        let handle = fetcher.handle();
        handle.shutdown(false);

        let result = fetcher.run();
        assert!(result.is_err(), "close failure must be surfaced");
        assert!(handle.is_closed());
        assert!(handle.await_termination(Duration::from_millis(10)));
        assert!(seen.lock().is_empty(), "close failures go to the caller, not the sink");
    }

    #[test]
    fn the_one_where_three_fetchers_and_a_heckler_lose_nothing() -> Result<()> {
        const FETCHERS: u64 = 3;
        const PER_FETCHER: u64 = 10_000;
        let queue = Arc::new(BatchQueue::new(2));
        let (sink, seen) = quiet_sink();

        let mut handles = Vec::new();
        let mut threads = Vec::new();
        for id in 0..FETCHERS {
            let fetcher = SplitFetcher::new(
                id as usize,
                InMemoryReader::with_limits(97, Duration::ZERO),
                Arc::clone(&queue),
                Arc::clone(&sink),
            );
            let handle = fetcher.handle();
            handle.add_splits(vec![RangeSplit::new(
                format!("range-{id}"),
                id * PER_FETCHER,
                (id + 1) * PER_FETCHER,
            )]);
            handles.push(handle);
            threads.push(thread::spawn(move || fetcher.run()));
        }

        let heckling = Arc::new(AtomicBool::new(true));
        let heckler = {
            let handles = handles.clone();
            let heckling = Arc::clone(&heckling);
            thread::spawn(move || {
                while heckling.load(Ordering::SeqCst) {
                    for handle in &handles {
                        handle.wake_up(false);
                    }
                    thread::sleep(Duration::from_millis(1));
                }
            })
        };

        let total = (FETCHERS * PER_FETCHER) as usize;
        let mut received = Vec::with_capacity(total);
        let deadline = Instant::now() + Duration::from_secs(60);
        while received.len() < total {
            assert!(Instant::now() < deadline, "💀 only {} of {total} records arrived", received.len());
            match queue.poll() {
                Some(batch) => received.extend(offsets(batch)),
                None => {
                    let availability = queue.availability();
                    if queue.is_empty() {
                        availability.wait_timeout(Duration::from_millis(50));
                    }
                }
            }
        }

        heckling.store(false, Ordering::SeqCst);
        heckler.join().expect("💀 heckler panicked");
        for handle in &handles {
            handle.shutdown(false);
        }
        for worker in threads {
            worker.join().expect("💀 fetch thread panicked")?;
        }
        assert!(seen.lock().is_empty());

        let unique: HashSet<u64> = received.iter().copied().collect();
        assert_eq!(received.len(), total, "no duplicates");
        assert_eq!(unique.len(), total, "no losses");
        assert_eq!(received.iter().min(), Some(&0));
        assert_eq!(received.iter().max(), Some(&(FETCHERS * PER_FETCHER - 1)));
        Ok(())
    }
}
