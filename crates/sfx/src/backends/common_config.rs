//! 🎬 *[two knobs walk into a struct. one limits records. one limits bytes.]*
//!
//! 📦 **Common Reader Config**: the shared DNA of every reader configuration.
//!
//! 🧠 Knowledge graph:
//! - Embedded in `InMemoryReaderConfig` and `FileReaderConfig`.
//! - Controls how much a single `fetch` may return before handing control back to the loop.
//!   Smaller fetches mean wake-ups and shutdowns get noticed sooner.
//! - Lives in `backends` (not `app_config`) so `app_config` → `backends` stays a one-way street. 🦆

use serde::Deserialize;

/// 📦 Per-fetch ceilings shared by every reader.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct CommonReaderConfig {
    /// 📄 Max records per fetch call.
    #[serde(default = "default_max_records_per_fetch")]
    pub max_records_per_fetch: usize,
    /// 📏 Max payload bytes per fetch call. Checked after each record, so one record may overshoot.
    #[serde(default = "default_max_bytes_per_fetch")]
    pub max_bytes_per_fetch: usize,
}

// -- 📦 1000 records: a nice round number that will age like milk the first time someone
// -- points this at a file of 40MB lines
fn default_max_records_per_fetch() -> usize {
    1000
}

fn default_max_bytes_per_fetch() -> usize {
    1024 * 1024
} // -- 1MiB, if your records are bigger, we need to talk

impl Default for CommonReaderConfig {
    fn default() -> Self {
        Self {
            max_records_per_fetch: default_max_records_per_fetch(),
            max_bytes_per_fetch: default_max_bytes_per_fetch(),
        }
    }
}
