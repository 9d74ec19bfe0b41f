use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::Deserialize;
use tracing::trace;

use crate::backends::{CommonReaderConfig, ReaderWaker, SplitReader};
use crate::common::{Record, SplitBatch};
use crate::splits::{RangeSplit, SplitsChange};
use crate::sync::WakeSignal;

// -- 😴 how long an idle reader naps when asked to fetch with nothing assigned
const IDLE_NAP: Duration = Duration::from_millis(100);

/// 🔢 InMemoryReaderConfig: how many ranges, how big, how slow.
///
/// KNOWLEDGE GRAPH: config lives next to the reader that uses it, same as every backend.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct InMemoryReaderConfig {
    #[serde(default = "default_splits")]
    pub splits: usize,
    #[serde(default = "default_records_per_split")]
    pub records_per_split: u64,
    /// ⏱️ Simulated blocking per fetch. Zero means "as fast as the CPU allows".
    #[serde(default)]
    pub fetch_delay_ms: u64,
    #[serde(default)]
    pub common_config: CommonReaderConfig,
}

fn default_splits() -> usize {
    4
}

fn default_records_per_split() -> u64 {
    10_000
}

impl InMemoryReaderConfig {
    /// 🧩 Contiguous, non-overlapping ranges: `range-0` gets `[0, n)`, `range-1` gets `[n, 2n)`...
    pub fn splits(&self) -> Vec<RangeSplit> {
        (0..self.splits as u64)
            .map(|i| {
                RangeSplit::new(
                    format!("range-{i}"),
                    i * self.records_per_split,
                    (i + 1) * self.records_per_split,
                )
            })
            .collect()
    }
}

#[derive(Debug)]
struct RangeCursor {
    split: RangeSplit,
    next: u64,
}

/// 🔢 A reader that conjures `Record`s out of integer ranges.
///
/// Splits are served front to back: the first assigned range is drained before the
/// second one gets a look in. Stale batches handed back through `rewind` are replayed
/// before anything new, minus splits that were removed in the meantime, so nothing is
/// lost or duplicated when a wake-up races a fetch.
#[derive(Debug)]
pub struct InMemoryReader {
    cursors: VecDeque<RangeCursor>,
    replay: VecDeque<SplitBatch<Record>>,
    removed: HashSet<String>,
    waker: Arc<WakeSignal>,
    max_records_per_fetch: usize,
    fetch_delay: Duration,
    closed: bool,
}

impl InMemoryReader {
    pub fn new(config: &InMemoryReaderConfig) -> Self {
        Self::with_limits(
            config.common_config.max_records_per_fetch,
            Duration::from_millis(config.fetch_delay_ms),
        )
    }

    pub fn with_limits(max_records_per_fetch: usize, fetch_delay: Duration) -> Self {
        Self {
            cursors: VecDeque::new(),
            replay: VecDeque::new(),
            removed: HashSet::new(),
            waker: Arc::new(WakeSignal::new()),
            max_records_per_fetch: max_records_per_fetch.max(1),
            fetch_delay,
            closed: false,
        }
    }
}

impl SplitReader for InMemoryReader {
    type Split = RangeSplit;
    type Record = Record;

    fn fetch(&mut self) -> Result<SplitBatch<Record>> {
        if self.closed {
            bail!("💀 fetch called on a closed in-memory reader. It has left the building.");
        }
        if let Some(stale) = self.replay.pop_front() {
            return Ok(stale);
        }
        if self.cursors.is_empty() {
            self.waker.sleep(IDLE_NAP);
            return Ok(SplitBatch::empty());
        }
        if !self.fetch_delay.is_zero() && self.waker.sleep(self.fetch_delay) {
            // -- ⏰ woken mid-nap: come back empty-handed, the loop wants us
            return Ok(SplitBatch::empty());
        }

        let mut batch = SplitBatch::new();
        let exhausted = match self.cursors.front_mut() {
            Some(cursor) => {
                let end = cursor
                    .split
                    .end
                    .min(cursor.next.saturating_add(self.max_records_per_fetch as u64));
                let split_id = cursor.split.id.clone();
                batch.add_records(
                    &split_id,
                    (cursor.next..end).map(|n| Record::new(n, format!("{split_id}:{n}"))),
                );
                cursor.next = end;
                if cursor.next >= cursor.split.end {
                    batch.finish_split(split_id);
                    true
                } else {
                    false
                }
            }
            None => false,
        };
        if exhausted {
            self.cursors.pop_front();
        }
        trace!("🔢 conjured {} records out of thin air", batch.record_count());
        Ok(batch)
    }

    fn handle_splits_changes(&mut self, change: SplitsChange<RangeSplit>) -> Result<()> {
        match change {
            SplitsChange::Addition(splits) => {
                for split in splits {
                    self.removed.remove(&split.id);
                    if self.cursors.iter().any(|c| c.split.id == split.id) {
                        continue;
                    }
                    let next = split.start;
                    self.cursors.push_back(RangeCursor { split, next });
                }
            }
            SplitsChange::Removal(splits) => {
                for split in splits {
                    self.cursors.retain(|c| c.split.id != split.id);
                    self.removed.insert(split.id);
                }
                // -- 🧹 a stale batch rewound before the removal arrived must not sneak back out
                for mut stale in std::mem::take(&mut self.replay) {
                    stale.retain_splits(|split_id| !self.removed.contains(split_id));
                    if stale.is_empty() {
                        stale.recycle();
                    } else {
                        self.replay.push_back(stale);
                    }
                }
            }
        }
        Ok(())
    }

    fn waker(&self) -> Arc<dyn ReaderWaker> {
        self.waker.clone()
    }

    fn rewind(&mut self, mut stale: SplitBatch<Record>) {
        let removed = &self.removed;
        stale.retain_splits(|split_id| !removed.contains(split_id));
        if !stale.is_empty() {
            self.replay.push_back(stale);
        }
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.cursors.clear();
        self.replay.clear();
        Ok(())
    }
}
