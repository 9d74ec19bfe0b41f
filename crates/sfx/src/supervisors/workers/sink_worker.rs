//! 🎬 *[a queue fills with batches. somewhere, a sink waits.]*
//! *[the clock on the wall reads 2:47am.]*
//!
//! 🗑️ The SinkWorker: the single consumer. It drains the handoff queue, renders every record
//! as a line, hands the lines to the sink, and decides when the party is over.
//!
//! 🧠 Knowledge graph:
//! - Never busy-polls. When the queue is dry it takes the availability future, re-checks the
//!   queue and the fetchers, and only then awaits the future (or a fetch error).
//! - A completed future means "go look", not "there is exactly one batch for you".
//! - End of input: every fetcher went idle and got reaped, and the queue is empty.
//! - Record limit: drain-then-close. Fetchers finish their cycle and park on their drain
//!   latches, we drain the queue dry, then release them.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{Context, Result};
use async_channel::Receiver;
use futures::future::{Either, select};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use super::Worker;
use crate::RunSummary;
use crate::backends::{Sink, SinkBackend, SplitReader};
use crate::common::{Record, SplitBatch};
use crate::fetcher::BatchQueue;
use crate::handoff::AvailabilityFuture;
use crate::progress::ProgressMetrics;
use crate::supervisors::Supervisor;

/// 🗑️ Drains the queue into a sink. The garbage disposal of the pipeline.
#[derive(Debug)]
pub(crate) struct SinkWorker<R: SplitReader<Record = Record>> {
    supervisor: Supervisor<R>,
    sink: SinkBackend,
    metrics: ProgressMetrics,
    record_limit: Option<u64>,
    close_timeout: Duration,
    finished_splits: BTreeSet<String>,
}

/// ⏳ Parks until the queue has news or a fetch thread reports a failure.
async fn wait_for_news(
    availability: AvailabilityFuture,
    errors: Receiver<anyhow::Error>,
) -> Result<()> {
    let failure = std::pin::pin!(errors.recv());
    match select(availability, failure).await {
        Either::Left(((), _)) => Ok(()),
        Either::Right((Ok(err), _)) => Err(err.context("💀 a fetch thread gave up")),
        // -- the supervisor holds a sender, so a closed channel means it is already gone
        Either::Right((Err(_), _)) => Ok(()),
    }
}

impl<R: SplitReader<Record = Record>> SinkWorker<R> {
    pub(crate) fn new(
        supervisor: Supervisor<R>,
        sink: SinkBackend,
        metrics: ProgressMetrics,
        record_limit: Option<u64>,
        close_timeout: Duration,
    ) -> Self {
        Self {
            supervisor,
            sink,
            metrics,
            record_limit,
            close_timeout,
            finished_splits: BTreeSet::new(),
        }
    }

    fn limit_reached(&self) -> bool {
        self.record_limit
            .is_some_and(|limit| self.metrics.total_records() >= limit)
    }

    /// 📄 Renders one batch into the sink, one payload per split group.
    ///
    /// Past the record limit, records are dropped instead of sent.
    async fn consume(&mut self, mut batch: SplitBatch<Record>) -> Result<()> {
        let mut budget = self
            .record_limit
            .map(|limit| limit.saturating_sub(self.metrics.total_records()));
        let mut records = 0u64;
        let mut bytes = 0u64;
        let mut truncated = false;

        while let Some(split_id) = batch.next_split() {
            let mut payload = String::new();
            while let Some(record) = batch.next_record_from_split() {
                if budget == Some(0) {
                    truncated = true;
                    break;
                }
                if let Some(left) = budget.as_mut() {
                    *left -= 1;
                }
                payload.push_str(&record.payload);
                payload.push('\n');
                records += 1;
            }
            if !payload.is_empty() {
                bytes += payload.len() as u64;
                self.sink
                    .send(payload)
                    .await
                    .with_context(|| format!("💀 the sink choked on records from split '{split_id}'"))?;
            }
            if truncated {
                break;
            }
        }

        let mut newly_finished = 0u64;
        if !truncated {
            for split_id in batch.finished_splits() {
                if self.finished_splits.insert(split_id.clone()) {
                    debug!("🏁 split '{split_id}' fully consumed");
                    newly_finished += 1;
                }
            }
        }
        batch.recycle();
        trace!("🪣 consumed {records} records ({bytes} bytes)");
        self.metrics.update(records, bytes, newly_finished);
        Ok(())
    }

    /// 🔄 The main loop. Returns when input is exhausted or the limit was hit and drained.
    async fn drive(&mut self) -> Result<()> {
        let queue = self.supervisor.queue();
        loop {
            self.supervisor.check_errors()?;
            if let Some(batch) = queue.poll() {
                self.consume(batch).await?;
                if self.limit_reached() {
                    info!("🛑 record limit reached, draining before close");
                    return self.drain_then_close(&queue).await;
                }
                continue;
            }

            let availability = queue.availability();
            if !queue.is_empty() {
                continue;
            }
            if self.supervisor.maybe_shutdown_finished_fetchers() {
                if queue.is_empty() {
                    debug!("🏁 every fetcher is done and the queue is dry");
                    return Ok(());
                }
                continue;
            }
            wait_for_news(availability, self.supervisor.errors()).await?;
        }
    }

    /// 🚦 Stop the fetchers gracefully, drain everything they already produced, then let them close.
    async fn drain_then_close(&mut self, queue: &BatchQueue<Record>) -> Result<()> {
        self.supervisor.shutdown_gracefully();
        loop {
            self.supervisor.check_errors()?;
            if let Some(batch) = queue.poll() {
                self.consume(batch).await?;
                continue;
            }
            let availability = queue.availability();
            if !queue.is_empty() {
                continue;
            }
            if self.supervisor.all_awaiting_drain() {
                break;
            }
            wait_for_news(availability, self.supervisor.errors()).await?;
        }
        debug!("🔓 queue drained, releasing the drain latches");
        self.supervisor.release_drain_latches();
        Ok(())
    }
}

impl<R: SplitReader<Record = Record>> Worker for SinkWorker<R> {
    type Output = RunSummary;

    fn start(mut self) -> JoinHandle<Result<RunSummary>> {
        tokio::spawn(async move {
            debug!("📥 SinkWorker started draining the handoff queue...");
            let drained = self.drive().await;
            let sink_closed = self
                .sink
                .close()
                .await
                .context("💀 SinkWorker failed to close the sink");
            self.metrics.finish();

            let SinkWorker {
                mut supervisor,
                metrics,
                close_timeout,
                finished_splits,
                ..
            } = self;
            // -- 🧵 joining OS threads is blocking work, keep it off the async workers
            let fetchers_closed = tokio::task::spawn_blocking(move || supervisor.close(close_timeout))
                .await
                .context("💀 the task closing the fetchers fell over")?;

            drained?;
            sink_closed?;
            fetchers_closed?;
            let summary = RunSummary {
                records: metrics.total_records(),
                bytes: metrics.total_bytes(),
                finished_splits: finished_splits.into_iter().collect(),
                elapsed: metrics.elapsed(),
            };
            info!(
                "🏁 SinkWorker done: {} records, {} splits finished",
                summary.records,
                summary.finished_splits.len()
            );
            Ok(summary)
        })
    }
}
