//! 🚚 The handoff queue: many fetch threads in, one consumer out.
//!
//! 🎬 *[a loading dock. N trucks idle outside. one forklift driver inside.]*
//! *[the dock holds `capacity` pallets. when it's full, the trucks wait.]*
//! *[when the dock goes from empty to not-empty, a bell rings in the break room.]*
//!
//! [`HandoffQueue`] is a bounded FIFO with blocking `put`/`take`, plus an availability
//! future ([`OneShot`]) so the consumer can park without polling.
//!
//! 🧠 Availability contract:
//! - `put` on an empty queue completes the outstanding future and installs a fresh one,
//!   all under the same lock that changes the size. No missed bell.
//! - `take`/`poll` never touch the future. A completed future means "go look",
//!   not "there is exactly one element for you". Re-check emptiness after draining.
//! - `availability()` returns the same pending future until it completes. On a non-empty
//!   (or closed) queue it hands out an already-completed one.
//! - `close` completes whatever is outstanding, so nobody waits forever.
//!
//! 🦆 The duck is a single consumer. It has always been a single consumer.

use std::collections::{HashSet, VecDeque};
use std::fmt;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::trace;

use crate::sync::OneShot;

/// 🔔 The consumer's "something to read" signal.
pub type AvailabilityFuture = OneShot;

/// 💀 Why a `take` came back empty-handed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("💀 handoff queue is closed and drained, nothing will ever arrive again")]
    Closed,
    #[error("⏰ blocking queue call was woken up before it could finish")]
    Interrupted,
}

/// 💀 Why a `put` was rejected. The element rides back to the caller either way.
pub enum PutError<E> {
    /// The queue is closed. Do not retry.
    Closed(E),
    /// Somebody called [`HandoffQueue::wake_up_producer`] for this producer while it waited.
    WokenUp(E),
}

impl<E> PutError<E> {
    pub fn into_inner(self) -> E {
        match self {
            PutError::Closed(element) | PutError::WokenUp(element) => element,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, PutError::Closed(_))
    }
}

impl<E> fmt::Debug for PutError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PutError::Closed(_) => f.write_str("PutError::Closed(..)"),
            PutError::WokenUp(_) => f.write_str("PutError::WokenUp(..)"),
        }
    }
}

impl<E> fmt::Display for PutError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PutError::Closed(_) => f.write_str("💀 cannot put into a closed handoff queue"),
            PutError::WokenUp(_) => f.write_str("⏰ put was woken up while waiting for capacity"),
        }
    }
}

impl<E> std::error::Error for PutError<E> {}

struct QueueState<E> {
    elements: VecDeque<E>,
    closed: bool,
    availability: AvailabilityFuture,
    woken_producers: HashSet<usize>,
    consumer_woken: bool,
}

/// 🚚 Bounded multi-producer / single-consumer queue with an availability future.
pub struct HandoffQueue<E> {
    capacity: usize,
    state: Mutex<QueueState<E>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<E> fmt::Debug for HandoffQueue<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("HandoffQueue")
            .field("capacity", &self.capacity)
            .field("len", &state.elements.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl<E> HandoffQueue<E> {
    /// 🏗️ A queue that holds at most `capacity` elements. Zero gets bumped to one,
    /// because a dock with no room is just a wall.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(QueueState {
                elements: VecDeque::with_capacity(capacity),
                closed: false,
                availability: OneShot::new(),
                woken_producers: HashSet::new(),
                consumer_woken: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// 📥 Appends `element`, blocking while the queue is full.
    ///
    /// `producer` identifies the calling fetcher so [`HandoffQueue::wake_up_producer`] can
    /// release exactly that thread. The empty to non-empty edge completes the availability future.
    pub fn put(&self, producer: usize, element: E) -> Result<(), PutError<E>> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(PutError::Closed(element));
            }
            if state.elements.len() < self.capacity {
                break;
            }
            if state.woken_producers.remove(&producer) {
                trace!("⏰ producer {producer} woken up while the dock was full");
                return Err(PutError::WokenUp(element));
            }
            self.not_full.wait(&mut state);
        }

        let was_empty = state.elements.is_empty();
        state.elements.push_back(element);
        // -- 🧹 a wake-up aimed at a put that never had to wait is stale news
        state.woken_producers.remove(&producer);
        if was_empty {
            let ringing = std::mem::replace(&mut state.availability, OneShot::new());
            ringing.complete();
        }
        self.not_empty.notify_one();
        Ok(())
    }

    /// 📤 Removes the head, blocking until there is one.
    ///
    /// Returns [`QueueError::Closed`] once the queue is closed and drained, and
    /// [`QueueError::Interrupted`] after [`HandoffQueue::wake_up_consumer`].
    pub fn take(&self) -> Result<E, QueueError> {
        let mut state = self.state.lock();
        loop {
            if let Some(element) = state.elements.pop_front() {
                self.not_full.notify_all();
                return Ok(element);
            }
            if state.closed {
                return Err(QueueError::Closed);
            }
            if std::mem::replace(&mut state.consumer_woken, false) {
                return Err(QueueError::Interrupted);
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// 👀 Non-blocking `take`.
    pub fn poll(&self) -> Option<E> {
        let mut state = self.state.lock();
        let element = state.elements.pop_front();
        if element.is_some() {
            self.not_full.notify_all();
        }
        element
    }

    /// 🔔 The future that completes when there is something to read (or the queue closes).
    pub fn availability(&self) -> AvailabilityFuture {
        let mut state = self.state.lock();
        if !state.elements.is_empty() || state.closed {
            return OneShot::completed();
        }
        if state.availability.is_done() {
            state.availability = OneShot::new();
        }
        state.availability.clone()
    }

    /// 📣 Completes the outstanding availability future without adding anything.
    ///
    /// Fetchers use it when they go idle so the consumer comes by and notices.
    pub fn notify_available(&self) {
        let state = self.state.lock();
        state.availability.complete();
    }

    /// 🚪 Closes the queue. Idempotent. Queued elements stay put for draining.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.availability.complete();
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// ⏰ Releases `producer` if it is blocked in `put` (or its next blocking `put`).
    pub fn wake_up_producer(&self, producer: usize) {
        let mut state = self.state.lock();
        state.woken_producers.insert(producer);
        self.not_full.notify_all();
    }

    /// ⏰ Releases the consumer blocked in `take`.
    pub fn wake_up_consumer(&self) {
        let mut state = self.state.lock();
        state.consumer_woken = true;
        self.not_empty.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().elements.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}
