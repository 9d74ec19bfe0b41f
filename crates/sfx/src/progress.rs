//! 📊 progress.rs: "Are we there yet?" Every pipeline, every time, forever.
//!
//! 🚀 Counts records, bytes and finished splits as the consumer drains the queue, and
//! renders rates into an indicatif bar with a comfy-table message underneath.
//!
//! ⚠️ Watching this progress bar will not make it go faster. We've tried. Science says no.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};

// -- 📏 one mebibyte, not a megabyte, pedants
const MIB: f64 = 1024.0 * 1024.0;

const RATE_WINDOW: Duration = Duration::from_secs(5);

/// 🔢 "1000000" → "1,000,000". You're welcome, eyes.
pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS, or HH:MM:SS if you should probably call your mom.
pub(crate) fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

struct Rates {
    records_per_sec: f64,
    mib_per_sec: f64,
}

/// 📊 Running totals plus a 5-second sliding window for rates.
///
/// `expected_records` of 0 means "no idea", and the ETA gives up politely.
pub(crate) struct ProgressMetrics {
    source_name: String,
    expected_records: u64,
    total_records: u64,
    total_bytes: u64,
    finished_splits: u64,
    progress_bar: ProgressBar,
    rate_samples: VecDeque<(Instant, u64, u64)>,
    start_time: Instant,
}

impl std::fmt::Debug for ProgressMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("ProgressMetrics")
            .field("source_name", &self.source_name)
            .field("expected_records", &self.expected_records)
            .field("total_records", &self.total_records)
            .field("total_bytes", &self.total_bytes)
            .field("finished_splits", &self.finished_splits)
            .finish()
    }
}

impl ProgressMetrics {
    /// 🚀 A visible bar when `show` is set, a silent accountant otherwise.
    pub(crate) fn new(source_name: String, expected_records: u64, show: bool) -> Self {
        let progress_bar = if show {
            ProgressBar::new(expected_records)
        } else {
            ProgressBar::hidden()
        };
        progress_bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg}\n| [{bar:40.cyan/blue}]")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );

        let start_time = Instant::now();
        let mut rate_samples = VecDeque::new();
        // -- 🔄 seed with t=0 so we don't divide by zero like animals
        rate_samples.push_back((start_time, 0u64, 0u64));

        Self {
            source_name,
            expected_records,
            total_records: 0,
            total_bytes: 0,
            finished_splits: 0,
            progress_bar,
            rate_samples,
            start_time,
        }
    }

    /// 🔄 Feed one drained batch into the totals and redraw.
    pub(crate) fn update(&mut self, records: u64, bytes: u64, finished_splits: u64) {
        self.total_records += records;
        self.total_bytes += bytes;
        self.finished_splits += finished_splits;

        let rates = self.calculate_rates();
        self.render(rates);
        self.progress_bar.set_position(self.total_records);
    }

    pub(crate) fn total_records(&self) -> u64 {
        self.total_records
    }

    pub(crate) fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// ✅ Ring the bell. We made it. (Or we hit the record limit. Same energy.)
    pub(crate) fn finish(&self) {
        self.progress_bar.finish();
    }

    fn calculate_rates(&mut self) -> Rates {
        let now = Instant::now();
        // -- 🔄 evict samples older than the window, like a bouncer but for data points
        while let Some(&(timestamp, _, _)) = self.rate_samples.front() {
            if now.duration_since(timestamp) > RATE_WINDOW {
                self.rate_samples.pop_front();
            } else {
                break;
            }
        }
        self.rate_samples
            .push_back((now, self.total_records, self.total_bytes));

        if let Some(&(oldest_time, oldest_records, oldest_bytes)) = self.rate_samples.front() {
            let elapsed = now.duration_since(oldest_time).as_secs_f64();
            if elapsed > 0.0 {
                return Rates {
                    records_per_sec: self.total_records.saturating_sub(oldest_records) as f64
                        / elapsed,
                    mib_per_sec: self.total_bytes.saturating_sub(oldest_bytes) as f64
                        / elapsed
                        / MIB,
                };
            }
        }
        Rates {
            records_per_sec: 0.0,
            mib_per_sec: 0.0,
        }
    }

    fn render(&self, rates: Rates) {
        let elapsed = self.start_time.elapsed();
        let percent = if self.expected_records > 0 {
            (self.total_records as f64 / self.expected_records as f64) * 100.0
        } else {
            0.0
        };
        let remaining = if percent > 0.0 && percent < 100.0 {
            // -- 🔮 linear extrapolation: assumes the future looks like the past. Bold.
            let total_estimated = elapsed.as_secs_f64() / (percent / 100.0);
            format_duration(Duration::from_secs_f64(
                (total_estimated - elapsed.as_secs_f64()).max(0.0),
            ))
        } else {
            "--:--".to_string()
        };

        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.add_row(vec![
            Cell::new(format!("{} Records/s", format_number(rates.records_per_sec as u64)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} Records", format_number(self.total_records)))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{:.2} MiB/s", rates.mib_per_sec)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2} MiB", self.total_bytes as f64 / MIB))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} splits done", format_number(self.finished_splits)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{percent:.2}%")).set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} elapsed", format_duration(elapsed)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{remaining} remaining")).set_alignment(CellAlignment::Right),
        ]);

        self.progress_bar
            .set_message(format!("source: {}\n{}", self.source_name, table));
    }
}
