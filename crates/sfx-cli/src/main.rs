//! 🚀 sfx-cli: the front door, the bouncer, the maitre d' of sfx.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 Thin wrapper: set up logging, load config, run the pipeline, print a table. 🦆

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{Cell, CellAlignment, Table, presets::UTF8_FULL};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// 🍽️ The post-run receipt. Itemized, like a good restaurant bill.
fn summary_table(summary: &sfx::RunSummary) -> Table {
    let secs = summary.elapsed.as_secs_f64();
    let rate = if secs > 0.0 {
        summary.records as f64 / secs
    } else {
        0.0
    };
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["📊 metric", "value"]);
    for (metric, value) in [
        ("records", summary.records.to_string()),
        ("bytes", summary.bytes.to_string()),
        ("finished splits", summary.finished_splits.len().to_string()),
        ("elapsed", format!("{secs:.2}s")),
        ("records/s", format!("{rate:.0}")),
    ] {
        table.add_row(vec![
            Cell::new(metric),
            Cell::new(value).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}

async fn run_from_args() -> Result<sfx::RunSummary> {
    let path_arg = std::env::args().nth(1).unwrap_or_else(|| "sfx.toml".to_string());

    let config_file = Path::new(&path_arg);
    let config_file_if_it_exists = match config_file.try_exists().with_context(|| {
        format!(
            "💀 Couldn't even tell whether the config file exists. Permissions, maybe. \
            Or a relative path resolved against the wrong cwd. Was checking here: '{}'",
            config_file.display()
        )
    })? {
        true => Some(config_file),
        // -- 💤 no file, env vars only. Like camping, but for configuration.
        false => None,
    };

    let app_config = sfx::app_config::load_config(config_file_if_it_exists)
        .context("💀 In sfx-cli, main, we couldn't load the config. Check the file, check the SFX_* env vars.")?;
    sfx::run(app_config).await
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match run_from_args().await {
        Ok(summary) => {
            println!("{}", summary_table(&summary));
            Ok(())
        }
        Err(err) => {
            error!("💀 error: {}", err);
            // -- 🧅 peel the onion of sadness, one layer at a time
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {}", cause);
            }
            std::process::exit(1);
        }
    }
}
