//! 🔌 Backends: where the real I/O happens.
//!
//! 🚰 Readers pour records into fetch threads, Sinks slurp them up on the consumer side.
//! And in between sits the handoff queue, sweating through its shirt.
//!
//! 🎭 This module is the casting agency. Need to read integers out of thin air?
//! Lines out of a (possibly gzipped) file? We've got a reader for that. Need to write
//! the results somewhere? Memory or disk, take your pick.
//!
//! 🧠 Knowledge graph:
//! - Reader side is BLOCKING: `SplitReader::fetch` runs on a dedicated fetch thread and may
//!   park for a bounded time. `ReaderWaker::wake_up` is how another thread taps it on the shoulder.
//! - Sink side is ASYNC: the single consumer runs as a tokio task and awaits sink I/O.
//! - Pattern: trait → concrete impls → backend enum that dispatches. Callers never care which.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::app_config::{ReaderConfig, SinkConfig};
use crate::common::{Record, SplitBatch};
use crate::splits::{SourceSplit, Split, SplitsChange};

pub(crate) mod common_config;
pub(crate) mod file;
pub(crate) mod in_mem;

pub use common_config::CommonReaderConfig;
pub use file::{FileReader, FileReaderConfig, FileSink, FileSinkConfig};
pub use in_mem::{InMemoryReader, InMemoryReaderConfig, InMemorySink};

// ===== Reader Trait and Backend Enum =====

/// ⏰ The part of a reader other threads are allowed to poke.
///
/// `wake_up` is best effort: it should make an in-flight (or the next) blocking fetch
/// return promptly. How the reader pulls that off is its own business.
pub trait ReaderWaker: Send + Sync {
    fn wake_up(&self);
}

/// 🚰 A blocking reader that fetches records for the splits it has been handed.
///
/// # Contract 📜
/// - `fetch` returns one batch (possibly empty) in bounded time. It may block, but must come
///   back promptly after a wake-up.
/// - `handle_splits_changes` runs on the fetch thread, before the next `fetch`.
/// - `waker` hands out the thread-safe wake-up handle. Call it once, share it freely.
/// - `rewind` receives a batch the fetch loop refused to publish because a wake-up raced the
///   fetch. Readers that must not lose records replay it later. Default: recycle and forget.
/// - `close` is called exactly once per fetch loop.
pub trait SplitReader: Send + 'static {
    type Split: SourceSplit;
    type Record: Send + 'static;

    fn fetch(&mut self) -> Result<SplitBatch<Self::Record>>;

    fn handle_splits_changes(&mut self, change: SplitsChange<Self::Split>) -> Result<()>;

    fn waker(&self) -> Arc<dyn ReaderWaker>;

    fn rewind(&mut self, stale: SplitBatch<Self::Record>) {
        stale.recycle();
    }

    fn close(&mut self) -> Result<()>;
}

/// 🎭 The many faces of a reader, dispatched by enum instead of by class hierarchy.
#[derive(Debug)]
pub enum ReaderBackend {
    InMemory(InMemoryReader),
    File(FileReader),
}

impl ReaderBackend {
    /// 🏗️ Builds the reader the config asks for. Called once per fetch thread.
    pub fn from_config(config: &ReaderConfig) -> Result<Self> {
        Ok(match config {
            ReaderConfig::InMemory(in_mem_config) => {
                ReaderBackend::InMemory(InMemoryReader::new(in_mem_config))
            }
            ReaderConfig::File(file_config) => ReaderBackend::File(FileReader::new(file_config)),
        })
    }
}

impl SplitReader for ReaderBackend {
    type Split = Split;
    type Record = Record;

    fn fetch(&mut self) -> Result<SplitBatch<Record>> {
        match self {
            ReaderBackend::InMemory(reader) => reader.fetch(),
            ReaderBackend::File(reader) => reader.fetch(),
        }
    }

    fn handle_splits_changes(&mut self, change: SplitsChange<Split>) -> Result<()> {
        match self {
            ReaderBackend::InMemory(reader) => {
                reader.handle_splits_changes(change.try_map(|split| match split {
                    Split::Range(range) => Ok(range),
                    other => bail!("💀 the in-memory reader only speaks ranges, got {other:?}"),
                })?)
            }
            ReaderBackend::File(reader) => {
                reader.handle_splits_changes(change.try_map(|split| match split {
                    Split::File(file) => Ok(file),
                    other => bail!("💀 the file reader only reads files, got {other:?}"),
                })?)
            }
        }
    }

    fn waker(&self) -> Arc<dyn ReaderWaker> {
        match self {
            ReaderBackend::InMemory(reader) => reader.waker(),
            ReaderBackend::File(reader) => reader.waker(),
        }
    }

    fn rewind(&mut self, stale: SplitBatch<Record>) {
        match self {
            ReaderBackend::InMemory(reader) => reader.rewind(stale),
            ReaderBackend::File(reader) => reader.rewind(stale),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self {
            ReaderBackend::InMemory(reader) => reader.close(),
            ReaderBackend::File(reader) => reader.close(),
        }
    }
}

/// 🧩 The initial split assignment described by a reader config.
pub fn splits_from_config(config: &ReaderConfig) -> Vec<Split> {
    match config {
        ReaderConfig::InMemory(in_mem_config) => in_mem_config
            .splits()
            .into_iter()
            .map(Split::Range)
            .collect(),
        ReaderConfig::File(file_config) => file_config
            .splits()
            .into_iter()
            .map(Split::File)
            .collect(),
    }
}

// ===== Sink Trait and Backend Enum =====

/// 🕳️ A sink that receives rendered payloads from the consumer. Pure I/O, zero logic.
///
/// # Contract 📜
/// - `send` writes one payload (newline-terminated records).
/// - `close` flushes and finalizes. MUST be called. Skipping it is a bug, and also rude.
#[async_trait]
pub trait Sink: std::fmt::Debug + Send {
    async fn send(&mut self, payload: String) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

/// 🎭 Mirror of `ReaderBackend` on the far end of the queue.
#[derive(Debug)]
pub enum SinkBackend {
    InMemory(InMemorySink),
    File(FileSink),
}

impl SinkBackend {
    pub async fn from_config(config: &SinkConfig) -> Result<Self> {
        Ok(match config {
            SinkConfig::InMemory => SinkBackend::InMemory(InMemorySink::new()),
            SinkConfig::File(file_config) => {
                SinkBackend::File(FileSink::new(file_config.clone()).await?)
            }
        })
    }
}

#[async_trait]
impl Sink for SinkBackend {
    async fn send(&mut self, payload: String) -> Result<()> {
        match self {
            SinkBackend::InMemory(sink) => sink.send(payload).await,
            SinkBackend::File(sink) => sink.send(payload).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            SinkBackend::InMemory(sink) => sink.close().await,
            SinkBackend::File(sink) => sink.close().await,
        }
    }
}
