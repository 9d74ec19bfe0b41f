//! 🎬 *[camera pans across a row of fetch threads, each hunched over its reader]*
//! 🎬 "In a world where splits outnumber threads..."
//! 🎬 "One supervisor dared to deal them out round-robin."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The Supervisor: part card dealer, part HR department, part the person who turns off
//! the lights when everyone has gone home.
//!
//! 🧠 Knowledge graph:
//! - Owns the shared [`BatchQueue`], a reader factory, the error channel and one slot per
//!   fetch thread. Each slot holds a running fetcher or nothing (reaped after going idle).
//! - Splits are dealt round-robin over the slots. An empty slot gets a fresh fetcher and a
//!   fresh reader from the factory the next time a split lands on it.
//! - Fetch threads report failures through an `async_channel`, so the async consumer can
//!   both poll (`check_errors`) and await (`errors().recv()`) them.
//!
//! ⚠️ The workers module is private. Like Fight Club, but for consumer loops.

pub(crate) mod workers;

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use async_channel::{Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::backends::SplitReader;
use crate::fetcher::{BatchQueue, ErrorSink, FetcherHandle, SplitFetcher};
use crate::splits::SourceSplit;

/// 🏭 Builds one reader per fetch thread. Called on the supervisor's thread.
pub type ReaderFactory<R> = Box<dyn Fn() -> Result<R> + Send + Sync>;

struct RunningFetcher<R: SplitReader> {
    handle: FetcherHandle<R>,
    thread: Option<JoinHandle<()>>,
}

/// 📦 Deals splits to fetch threads and keeps an eye on them.
pub struct Supervisor<R: SplitReader> {
    queue: Arc<BatchQueue<R::Record>>,
    reader_factory: ReaderFactory<R>,
    slots: Vec<Option<RunningFetcher<R>>>,
    // -- 🪦 reaped fetchers, kept around so `close` can join their threads
    retired: Vec<RunningFetcher<R>>,
    next_slot: usize,
    next_fetcher_id: usize,
    error_tx: Sender<anyhow::Error>,
    error_rx: Receiver<anyhow::Error>,
}

impl<R: SplitReader> std::fmt::Debug for Supervisor<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("queue", &self.queue)
            .field("slots", &self.slots.len())
            .field("live_fetchers", &self.fetcher_count())
            .field("retired", &self.retired.len())
            .finish()
    }
}

impl<R: SplitReader> Supervisor<R> {
    /// 🚀 A supervisor with `fetcher_threads` slots (at least one) and a fresh queue.
    pub fn new(queue_capacity: usize, fetcher_threads: usize, reader_factory: ReaderFactory<R>) -> Self {
        let (error_tx, error_rx) = async_channel::unbounded();
        Self {
            queue: Arc::new(BatchQueue::new(queue_capacity)),
            reader_factory,
            slots: (0..fetcher_threads.max(1)).map(|_| None).collect(),
            retired: Vec::new(),
            next_slot: 0,
            next_fetcher_id: 0,
            error_tx,
            error_rx,
        }
    }

    /// 🚚 The queue the consumer reads from.
    pub fn queue(&self) -> Arc<BatchQueue<R::Record>> {
        Arc::clone(&self.queue)
    }

    /// 📬 Fetch-thread failures, for awaiting alongside availability.
    pub fn errors(&self) -> Receiver<anyhow::Error> {
        self.error_rx.clone()
    }

    /// 💀 Surfaces the oldest unreported fetch-thread failure, if any.
    pub fn check_errors(&self) -> Result<()> {
        match self.error_rx.try_recv() {
            Ok(err) => Err(err.context("💀 a fetch thread gave up")),
            Err(_) => Ok(()),
        }
    }

    /// 🃏 Deals `splits` round-robin over the slots, spawning fetchers for empty ones.
    pub fn add_splits(&mut self, splits: Vec<R::Split>) -> Result<()> {
        let slot_count = self.slots.len();
        let mut dealt: Vec<Vec<R::Split>> = (0..slot_count).map(|_| Vec::new()).collect();
        for split in splits {
            dealt[self.next_slot].push(split);
            self.next_slot = (self.next_slot + 1) % slot_count;
        }

        for (slot, splits) in dealt.into_iter().enumerate() {
            if splits.is_empty() {
                continue;
            }
            if self.slots[slot].is_none() {
                let running = self.spawn_fetcher()?;
                self.slots[slot] = Some(running);
            }
            if let Some(running) = &self.slots[slot] {
                debug!(
                    "🃏 slot {slot} (fetcher {}) dealt {:?}",
                    running.handle.id(),
                    splits.iter().map(|s| s.split_id()).collect::<Vec<_>>()
                );
                running.handle.add_splits(splits);
            }
        }
        Ok(())
    }

    /// ➖ Takes splits away from whichever fetcher holds them.
    pub fn remove_splits(&mut self, split_ids: &[&str]) -> Vec<R::Split> {
        self.live_handles()
            .flat_map(|handle| handle.remove_splits(split_ids))
            .collect()
    }

    fn spawn_fetcher(&mut self) -> Result<RunningFetcher<R>> {
        let id = self.next_fetcher_id;
        self.next_fetcher_id += 1;

        let reader = (self.reader_factory)()
            .with_context(|| format!("💀 could not build a reader for fetcher {id}"))?;
        let error_tx = self.error_tx.clone();
        let error_sink: ErrorSink = Arc::new(move |err: anyhow::Error| {
            // -- 📬 unbounded and the receiver lives as long as the supervisor, this only fails after close
            let _ = error_tx.send_blocking(err);
        });
        let fetcher = SplitFetcher::new(id, reader, Arc::clone(&self.queue), Arc::clone(&error_sink));
        let handle = fetcher.handle();

        let thread = thread::Builder::new()
            .name(format!("split-fetcher-{id}"))
            .spawn(move || {
                if let Err(err) = fetcher.run() {
                    error!("💀 fetcher {id} did not close cleanly: {err:#}");
                    error_sink(err);
                }
            })
            .with_context(|| format!("💀 failed to spawn thread for fetcher {id}"))?;
        info!("🧵 spawned split-fetcher-{id}");

        Ok(RunningFetcher {
            handle,
            thread: Some(thread),
        })
    }

    fn live_handles(&self) -> impl Iterator<Item = &FetcherHandle<R>> {
        self.slots.iter().flatten().map(|running| &running.handle)
    }

    /// 🎮 Control handles of the live fetchers, slot order.
    pub fn fetcher_handles(&self) -> Vec<FetcherHandle<R>> {
        self.live_handles().cloned().collect()
    }

    /// 🧹 Shuts down fetchers that went idle and frees their slots.
    ///
    /// Returns `true` when no live fetcher is left.
    pub fn maybe_shutdown_finished_fetchers(&mut self) -> bool {
        for slot in self.slots.iter_mut() {
            let finished = slot
                .as_ref()
                .is_some_and(|running| running.handle.is_idle() || running.handle.is_closed());
            if !finished {
                continue;
            }
            if let Some(running) = slot.take() {
                debug!("🧹 reaping idle fetcher {}", running.handle.id());
                running.handle.shutdown(false);
                self.retired.push(running);
            }
        }
        self.slots.iter().all(Option::is_none)
    }

    pub fn wake_up_all(&self, force: bool) {
        self.live_handles().for_each(|handle| handle.wake_up(force));
    }

    pub fn pause_all(&self) {
        self.live_handles().for_each(FetcherHandle::pause);
    }

    pub fn resume_all(&self) {
        self.live_handles().for_each(FetcherHandle::resume);
    }

    /// 🚦 Every live fetcher finishes its cycle, then parks on its drain latch.
    pub fn shutdown_gracefully(&self) {
        info!("🚦 graceful shutdown requested for {} fetchers", self.fetcher_count());
        self.live_handles().for_each(|handle| handle.shutdown(true));
    }

    /// 🚦 Is every live fetcher parked on its latch (or already gone)?
    pub fn all_awaiting_drain(&self) -> bool {
        self.live_handles()
            .all(|handle| handle.is_awaiting_drain() || handle.is_closed())
    }

    pub fn release_drain_latches(&self) {
        self.live_handles().for_each(FetcherHandle::release_drain_latch);
    }

    /// 🔢 Fetchers occupying a slot right now.
    pub fn fetcher_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// 🛑 Immediate shutdown: stop everything, close the queue, join the threads.
    ///
    /// Threads that do not terminate within `timeout` are left behind and reported. Any
    /// failure still sitting in the error channel afterwards is returned too.
    pub fn close(&mut self, timeout: Duration) -> Result<()> {
        let mut fetchers: Vec<RunningFetcher<R>> = self.slots.iter_mut().filter_map(Option::take).collect();
        fetchers.append(&mut self.retired);
        info!("🛑 closing supervisor with {} fetchers", fetchers.len());

        for running in &fetchers {
            running.handle.shutdown(false);
            // -- ⏰ shutdown is sticky, so after a graceful request only this gets a busy reader out
            running.handle.wake_up(true);
            running.handle.release_drain_latch();
        }
        self.queue.close();

        let deadline = Instant::now() + timeout;
        let mut stragglers = Vec::new();
        for mut running in fetchers {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !running.handle.await_termination(remaining) {
                warn!("⏱️ fetcher {} ignored the close for {timeout:?}", running.handle.id());
                stragglers.push(running.handle.id());
                continue;
            }
            if let Some(thread) = running.thread.take() {
                if thread.join().is_err() {
                    return Err(anyhow!("💀 fetcher {} panicked on its way out", running.handle.id()));
                }
            }
        }

        if !stragglers.is_empty() {
            return Err(anyhow!(
                "💀 fetchers {stragglers:?} did not stop within {timeout:?}. They have been left to their fate."
            ));
        }
        self.check_errors()
    }
}

impl<R: SplitReader> Drop for Supervisor<R> {
    fn drop(&mut self) {
        // -- 🚪 no joining in drop, just make sure nobody waits on us forever
        for running in self.slots.iter().flatten().chain(self.retired.iter()) {
            running.handle.shutdown(false);
            running.handle.wake_up(true);
            running.handle.release_drain_latch();
        }
        self.queue.close();
    }
}
