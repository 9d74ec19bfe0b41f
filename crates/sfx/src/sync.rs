//! 🔔 Sync primitives: the doorbells of the split-fetching world.
//!
//! 🎬 *[a consumer waits by the door. a fetch thread rings the bell. nobody misses the delivery.]*
//!
//! Two tiny building blocks live here:
//!
//! - [`OneShot`]: a single-assignment, multi-waiter signal. Completes once, stays completed,
//!   and can be waited on from a plain thread (`wait`, `wait_timeout`) or `.await`ed from an
//!   async task. The handoff queue's availability future and every fetcher's drain latch are
//!   `OneShot`s.
//! - [`WakeSignal`]: a resettable interrupt flag. Readers park on it while they pretend to do
//!   blocking I/O, and the fetch loop pokes it when it wants them back. Like a snooze button
//!   that somebody else presses for you.
//!
//! 🦆 The duck waits on a condvar too. It has never been spuriously woken. It is very proud.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::backends::ReaderWaker;

#[derive(Debug, Default)]
struct OneShotState {
    done: bool,
    // -- 📬 async waiters leave their wakers here like business cards at a networking event
    wakers: Vec<Waker>,
}

#[derive(Debug, Default)]
struct OneShotInner {
    state: Mutex<OneShotState>,
    done_cond: Condvar,
}

/// 🎯 A signal that fires exactly once, for everyone who is listening.
///
/// Clones share the same underlying signal, so handing a clone to another thread
/// and completing the original wakes the clone's waiters. Once done, always done.
/// No take-backs. This is a legally binding doorbell.
#[derive(Debug, Clone, Default)]
pub struct OneShot {
    inner: Arc<OneShotInner>,
}

impl OneShot {
    /// 🚀 A fresh, not-yet-completed signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// ✅ A signal that was born finished. Overachiever.
    pub fn completed() -> Self {
        let signal = Self::new();
        signal.complete();
        signal
    }

    /// 🔔 Completes the signal and wakes every waiter, threads and tasks alike.
    ///
    /// Returns `true` only for the call that actually flipped it. Everyone after that
    /// gets `false` and a polite "we already did this".
    pub fn complete(&self) -> bool {
        let wakers = {
            let mut state = self.inner.state.lock();
            if state.done {
                return false;
            }
            state.done = true;
            std::mem::take(&mut state.wakers)
        };
        self.inner.done_cond.notify_all();
        for waker in wakers {
            waker.wake();
        }
        true
    }

    pub fn is_done(&self) -> bool {
        self.inner.state.lock().done
    }

    /// 💤 Parks the calling thread until the signal completes.
    pub fn wait(&self) {
        let mut state = self.inner.state.lock();
        while !state.done {
            self.inner.done_cond.wait(&mut state);
        }
    }

    /// ⏱️ Like [`OneShot::wait`] but with a curfew. Returns whether the signal completed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while !state.done {
            if self
                .inner
                .done_cond
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.done;
            }
        }
        true
    }

    /// 🪞 Are these two handles the very same signal? Identity crisis resolved.
    pub fn ptr_eq(&self, other: &OneShot) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Future for OneShot {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut state = self.inner.state.lock();
        if state.done {
            return Poll::Ready(());
        }
        // -- 🔁 don't stack the same waker twice, the doorbell only needs one button per guest
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

/// ⏰ A resettable wake-up flag for readers that block.
///
/// `wake` sets the flag and rouses anybody sleeping on it. `sleep` waits until the flag is
/// set (or the timeout passes) and consumes it on the way out, so one wake interrupts one nap.
#[derive(Debug, Default)]
pub struct WakeSignal {
    woken: Mutex<bool>,
    woken_cond: Condvar,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// 📣 Rise and shine.
    pub fn wake(&self) {
        *self.woken.lock() = true;
        self.woken_cond.notify_all();
    }

    /// 🧹 Read and clear the flag in one go.
    pub fn take_woken(&self) -> bool {
        std::mem::replace(&mut *self.woken.lock(), false)
    }

    /// 😴 Sleep up to `timeout`. Returns `true` if a wake-up cut the nap short.
    pub fn sleep(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut woken = self.woken.lock();
        while !*woken {
            if self.woken_cond.wait_until(&mut woken, deadline).timed_out() {
                break;
            }
        }
        std::mem::replace(&mut *woken, false)
    }
}

impl ReaderWaker for WakeSignal {
    fn wake_up(&self) {
        self.wake();
    }
}
