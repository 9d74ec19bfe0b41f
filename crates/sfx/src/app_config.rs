//! 🔧 App Configuration: the TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." -- every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment, because hand-parsing env vars is a hobby nobody should have.
//!
//! 🧠 Knowledge graph:
//! - `AppConfig` = which reader, which sink, and how the runtime behaves.
//! - Reader/sink configs live next to their backends and are only assembled into enums here.
//! - `SFX_*` env vars form the base layer. A TOML file, when given, wins on conflicts.

use std::path::Path;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::{FileReaderConfig, FileSinkConfig, InMemoryReaderConfig};

/// 📦 One struct to rule them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    pub reader_config: ReaderConfig,
    pub sink_config: SinkConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// 🚰 Where the records come from.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub enum ReaderConfig {
    InMemory(InMemoryReaderConfig),
    File(FileReaderConfig),
}

/// 🕳️ Where the records end up.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub enum SinkConfig {
    InMemory,
    File(FileSinkConfig),
}

/// 🧵 How the pipeline behaves, regardless of what it reads or writes.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// 🚚 Batches the handoff queue holds before fetch threads block.
    #[serde(default = "default_queue_capacity", alias = "element_queue_capacity")]
    pub queue_capacity: usize,
    /// 🧵 Fetch threads. Splits are dealt round-robin across them.
    #[serde(default = "default_fetcher_threads", alias = "num_fetchers")]
    pub fetcher_threads: usize,
    /// 🛑 Stop (gracefully) after this many records. `None` reads everything.
    #[serde(default)]
    pub record_limit: Option<u64>,
    /// ⏱️ How long closing the fetchers may take before we give up on them.
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
    /// 📊 Draw the progress bar. Turn off for CI logs that hate carriage returns.
    #[serde(default = "default_show_progress")]
    pub show_progress: bool,
}

fn default_queue_capacity() -> usize {
    2
}

fn default_fetcher_threads() -> usize {
    1
}

fn default_close_timeout_ms() -> u64 {
    30_000
}

fn default_show_progress() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            fetcher_threads: default_fetcher_threads(),
            record_limit: None,
            close_timeout_ms: default_close_timeout_ms(),
            show_progress: default_show_progress(),
        }
    }
}

/// 🚀 Loads the config from `SFX_*` env vars plus an optional TOML file.
///
/// 📐 `None` means env vars only. `Some(path)` layers the file on top, and the file wins.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {}",
        config_file_name.map_or_else(|| "<env only>".to_string(), |p| p.display().to_string())
    );

    let config = Figment::new().merge(Env::prefixed("SFX_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (SFX_*). \
             The file exists in our hearts, and the parser has opinions about its contents.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (SFX_*). \
                 No file was provided, so this one's all on the environment."
            .to_string(),
    };
    config.extract().context(context_msg)
}
