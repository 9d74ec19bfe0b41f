//! 🧵 Workers: the ones who actually do the work while the Supervisor takes the credit
//! in the sprint retro.
//!
//! 🚀 Fetch threads are plain OS threads owned by the Supervisor. The consumer side is a
//! tokio task, and that's what lives here. 🦆

use anyhow::Result;
use tokio::task::JoinHandle;

mod sink_worker;
pub(crate) use sink_worker::SinkWorker;

/// 🏗️ A background worker, that does work. duh.
///
/// Returns a JoinHandle because we trust but verify. Mostly verify.
pub(crate) trait Worker {
    type Output: Send + 'static;

    fn start(self) -> JoinHandle<Result<Self::Output>>;
}
