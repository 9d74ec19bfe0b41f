use std::collections::{HashSet, VecDeque};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use flate2::read::GzDecoder;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::backends::{CommonReaderConfig, ReaderWaker, SplitReader};
use crate::common::{Record, SplitBatch};
use crate::splits::{FileSplit, SplitsChange};
use crate::sync::WakeSignal;

const IDLE_NAP: Duration = Duration::from_millis(100);

// -- 📂 FileReaderConfig: "It's just a list of files", said no sysadmin ever before the disk filled up.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct FileReaderConfig {
    pub files: Vec<String>,
    #[serde(default)]
    pub common_config: CommonReaderConfig,
}

impl FileReaderConfig {
    pub fn splits(&self) -> Vec<FileSplit> {
        self.files.iter().map(FileSplit::new).collect()
    }
}

type LineSource = BufReader<Box<dyn Read + Send>>;

struct FileCursor {
    split: FileSplit,
    lines: Option<LineSource>,
    line_number: u64,
}

/// 📂 FileReader: one split per file, one record per non-empty line.
///
/// Files are opened lazily on the fetch thread and read front to back, one split at a time.
/// A `.gz` suffix gets a `GzDecoder` in front of the BufReader. Line ends are found with
/// `memchr` straight out of the BufReader's buffer.
///
/// ⚠️ File reads can't be interrupted mid-syscall. A wake-up is noticed between lines,
/// and the partial batch goes back to the fetch loop, which treats it as stale and
/// hands it back via `rewind` for replay.
pub struct FileReader {
    cursors: VecDeque<FileCursor>,
    replay: VecDeque<SplitBatch<Record>>,
    removed: HashSet<String>,
    waker: Arc<WakeSignal>,
    common_config: CommonReaderConfig,
    closed: bool,
}

// 🐛 NOTE: open file handles are left out, nobody debugging a reader wants a wall of fds.
impl std::fmt::Debug for FileReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileReader")
            .field(
                "splits",
                &self.cursors.iter().map(|c| &c.split.id).collect::<Vec<_>>(),
            )
            .field("replay", &self.replay.len())
            .field("common_config", &self.common_config)
            .field("closed", &self.closed)
            .finish()
    }
}

impl FileReader {
    pub fn new(config: &FileReaderConfig) -> Self {
        Self::with_limits(config.common_config.clone())
    }

    pub fn with_limits(common_config: CommonReaderConfig) -> Self {
        Self {
            cursors: VecDeque::new(),
            replay: VecDeque::new(),
            removed: HashSet::new(),
            waker: Arc::new(WakeSignal::new()),
            common_config,
            closed: false,
        }
    }
}

/// 🚪 Opens `path`, gunzipping on the fly when the name ends in `.gz`.
fn open_lines(path: &Path) -> Result<LineSource> {
    let file = File::open(path).with_context(|| {
        format!(
            "💀 The door to '{}' would not budge. We knocked. We checked if it existed \
            (it might not). We checked permissions (they might be wrong). The split remains unread.",
            path.display()
        )
    })?;
    let is_gzipped = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));
    let inner: Box<dyn Read + Send> = if is_gzipped {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(BufReader::new(inner))
}

/// 🔍 Reads one line (including its `\n`) into `line`. Returns bytes consumed, 0 at EOF.
fn read_line(lines: &mut LineSource, line: &mut Vec<u8>) -> io::Result<usize> {
    let mut consumed = 0;
    loop {
        let (found_newline, used) = {
            let available = lines.fill_buf()?;
            if available.is_empty() {
                return Ok(consumed);
            }
            match memchr::memchr(b'\n', available) {
                Some(newline) => {
                    line.extend_from_slice(&available[..=newline]);
                    (true, newline + 1)
                }
                None => {
                    line.extend_from_slice(available);
                    (false, available.len())
                }
            }
        };
        lines.consume(used);
        consumed += used;
        if found_newline {
            return Ok(consumed);
        }
    }
}

impl SplitReader for FileReader {
    type Split = FileSplit;
    type Record = Record;

    fn fetch(&mut self) -> Result<SplitBatch<Record>> {
        if self.closed {
            bail!("💀 fetch called on a closed file reader. The files have been returned to the library.");
        }
        if let Some(stale) = self.replay.pop_front() {
            return Ok(stale);
        }
        let Some(cursor) = self.cursors.front_mut() else {
            self.waker.sleep(IDLE_NAP);
            return Ok(SplitBatch::empty());
        };

        if cursor.lines.is_none() {
            debug!("📂 opening split '{}'", cursor.split.id);
            cursor.lines = Some(open_lines(&cursor.split.path)?);
        }
        let split_id = cursor.split.id.clone();
        let mut batch = SplitBatch::new();
        let mut line = Vec::with_capacity(4096);
        let mut bytes_read = 0usize;
        let mut records_read = 0usize;
        let mut reached_eof = false;

        if let Some(lines) = cursor.lines.as_mut() {
            while records_read < self.common_config.max_records_per_fetch
                && bytes_read < self.common_config.max_bytes_per_fetch
            {
                if self.waker.take_woken() {
                    trace!("⏰ file reader woken mid-split '{split_id}'");
                    break;
                }
                line.clear();
                let consumed = read_line(lines, &mut line)
                    .with_context(|| format!("💀 failed reading a line from split '{split_id}'"))?;
                if consumed == 0 {
                    reached_eof = true;
                    break;
                }
                bytes_read += consumed;
                cursor.line_number += 1;
                let text = String::from_utf8_lossy(&line);
                let text = text.trim_end_matches('\n').trim_end_matches('\r');
                if !text.is_empty() {
                    batch.add_record(&split_id, Record::new(cursor.line_number, text));
                    records_read += 1;
                }
            }
        }

        trace!("📖 hauled {bytes_read} bytes out of '{split_id}', catch of the day");
        if reached_eof {
            batch.finish_split(split_id);
            self.cursors.pop_front();
        }
        Ok(batch)
    }

    fn handle_splits_changes(&mut self, change: SplitsChange<FileSplit>) -> Result<()> {
        match change {
            SplitsChange::Addition(splits) => {
                for split in splits {
                    self.removed.remove(&split.id);
                    if self.cursors.iter().any(|c| c.split.id == split.id) {
                        continue;
                    }
                    self.cursors.push_back(FileCursor {
                        split,
                        lines: None,
                        line_number: 0,
                    });
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
        // -- 🗑️ dropping the BufReaders closes the files
        self.closed = true;
        self.cursors.clear();
        self.replay.clear();
        Ok(())
    }
}
