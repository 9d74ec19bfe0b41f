//! 🚚 sfx: split fetching with a handoff queue in the middle.
//!
//! Fetch threads pull record batches for their assigned splits out of blocking readers and
//! hand them to a single async consumer through a bounded queue with an availability future.
//! Wake-ups, pauses and two flavors of shutdown can be injected from anywhere. 🦆

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

pub mod app_config;
pub mod backends;
pub mod common;
pub mod fetcher;
pub mod handoff;
pub(crate) mod progress;
pub mod splits;
pub mod supervisors;
pub mod sync;

use crate::app_config::{AppConfig, ReaderConfig};
use crate::backends::{ReaderBackend, SinkBackend, splits_from_config};
use crate::progress::ProgressMetrics;
use crate::supervisors::workers::{SinkWorker, Worker};
use crate::supervisors::{ReaderFactory, Supervisor};

/// 📊 What a finished run has to show for itself.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub records: u64,
    pub bytes: u64,
    /// 🏁 Splits whose every record was consumed, sorted by id.
    pub finished_splits: Vec<String>,
    pub elapsed: Duration,
}

fn describe_source(reader_config: &ReaderConfig) -> (String, u64) {
    match reader_config {
        ReaderConfig::InMemory(config) => (
            format!("in-memory ({} splits)", config.splits),
            config.splits as u64 * config.records_per_split,
        ),
        // -- 📂 line counts are unknowable without reading the files, so no ETA for you
        ReaderConfig::File(config) => (config.files.join(", "), 0),
    }
}

/// 🚀 Wires the reader, the fetch threads, the queue and the sink together and runs to the end.
pub async fn run(app_config: AppConfig) -> Result<RunSummary> {
    let runtime = app_config.runtime.clone();
    let reader_config = app_config.reader_config.clone();
    let splits = splits_from_config(&reader_config);
    let (source_name, expected_records) = describe_source(&reader_config);
    info!(
        "🚀 starting: {} splits, {} fetch threads, queue capacity {}",
        splits.len(),
        runtime.fetcher_threads,
        runtime.queue_capacity
    );

    let sink = SinkBackend::from_config(&app_config.sink_config)
        .await
        .context("💀 could not open the sink")?;

    let reader_factory: ReaderFactory<ReaderBackend> =
        Box::new(move || ReaderBackend::from_config(&reader_config));
    let mut supervisor = Supervisor::new(runtime.queue_capacity, runtime.fetcher_threads, reader_factory);
    supervisor
        .add_splits(splits)
        .context("💀 could not hand out the initial splits")?;

    let metrics = ProgressMetrics::new(source_name, expected_records, runtime.show_progress);
    let sink_worker = SinkWorker::new(
        supervisor,
        sink,
        metrics,
        runtime.record_limit,
        Duration::from_millis(runtime.close_timeout_ms),
    );
    sink_worker
        .start()
        .await
        .context("💀 the sink worker task fell over")?
}
