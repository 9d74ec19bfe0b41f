//! 🧪 End to end: config in, lines out, summary back.

use std::collections::HashSet;
use std::fs;

use anyhow::Result;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::Write;

use sfx::app_config::{AppConfig, ReaderConfig, RuntimeConfig, SinkConfig};
use sfx::backends::{CommonReaderConfig, FileReaderConfig, FileSinkConfig, InMemoryReaderConfig};

fn runtime(fetcher_threads: usize, record_limit: Option<u64>) -> RuntimeConfig {
    RuntimeConfig {
        queue_capacity: 2,
        fetcher_threads,
        record_limit,
        close_timeout_ms: 10_000,
        show_progress: false,
    }
}

#[tokio::test]
async fn the_one_where_three_threads_move_thirty_thousand_records() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let out = dir.path().join("out.ndjson");
    let app_config = AppConfig {
        reader_config: ReaderConfig::InMemory(InMemoryReaderConfig {
            splits: 6,
            records_per_split: 5_000,
            fetch_delay_ms: 0,
            common_config: CommonReaderConfig {
                max_records_per_fetch: 250,
                ..CommonReaderConfig::default()
            },
        }),
        sink_config: SinkConfig::File(FileSinkConfig {
            file_name: out.display().to_string(),
        }),
        runtime: runtime(3, None),
    };

    let summary = sfx::run(app_config).await?;
    assert_eq!(summary.records, 30_000);
    assert_eq!(summary.finished_splits.len(), 6);

    let written = fs::read_to_string(&out)?;
    let lines: Vec<&str> = written.lines().collect();
    let unique: HashSet<&str> = lines.iter().copied().collect();
    assert_eq!(lines.len(), 30_000, "no duplicates");
    assert_eq!(unique.len(), 30_000, "no losses");
    assert!(unique.contains("range-0:0"));
    assert!(unique.contains("range-5:29999"));
    assert_eq!(summary.bytes, written.len() as u64);
    Ok(())
}

#[tokio::test]
async fn the_one_where_plain_and_gzipped_files_mix_just_fine() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let plain = dir.path().join("part-0.ndjson");
    fs::write(&plain, "{\"id\":1}\n{\"id\":2}\n\n{\"id\":3}\n")?;
    let gzipped = dir.path().join("part-1.ndjson.gz");
    let mut encoder = GzEncoder::new(fs::File::create(&gzipped)?, Compression::default());
    encoder.write_all(b"{\"id\":4}\n{\"id\":5}")?;
    encoder.finish()?;
    let out = dir.path().join("out.ndjson");

    let app_config = AppConfig {
        reader_config: ReaderConfig::File(FileReaderConfig {
            files: vec![plain.display().to_string(), gzipped.display().to_string()],
            common_config: CommonReaderConfig {
                max_records_per_fetch: 2,
                ..CommonReaderConfig::default()
            },
        }),
        sink_config: SinkConfig::File(FileSinkConfig {
            file_name: out.display().to_string(),
        }),
        runtime: runtime(2, None),
    };

    let summary = sfx::run(app_config).await?;
    assert_eq!(summary.records, 5);
    assert_eq!(summary.finished_splits.len(), 2);

    let written = fs::read_to_string(&out)?;
    let mut ids: Vec<&str> = written.lines().collect();
    ids.sort_unstable();
    assert_eq!(
        ids,
        vec!["{\"id\":1}", "{\"id\":2}", "{\"id\":3}", "{\"id\":4}", "{\"id\":5}"]
    );
    Ok(())
}

#[tokio::test]
async fn the_one_where_the_limit_ends_an_endless_stream() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let out = dir.path().join("out.ndjson");
    let app_config = AppConfig {
        reader_config: ReaderConfig::InMemory(InMemoryReaderConfig {
            splits: 4,
            records_per_split: 10_000_000,
            fetch_delay_ms: 0,
            common_config: CommonReaderConfig {
                max_records_per_fetch: 100,
                ..CommonReaderConfig::default()
            },
        }),
        sink_config: SinkConfig::File(FileSinkConfig {
            file_name: out.display().to_string(),
        }),
        runtime: runtime(2, Some(1_234)),
    };

    let summary = sfx::run(app_config).await?;
    assert_eq!(summary.records, 1_234);
    assert!(summary.finished_splits.is_empty());
    assert_eq!(fs::read_to_string(&out)?.lines().count(), 1_234);
    Ok(())
}

#[tokio::test]
async fn the_one_where_a_missing_file_fails_the_run_loudly() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let app_config = AppConfig {
        reader_config: ReaderConfig::File(FileReaderConfig {
            files: vec![dir.path().join("ghost.ndjson").display().to_string()],
            common_config: CommonReaderConfig::default(),
        }),
        sink_config: SinkConfig::InMemory,
        runtime: runtime(1, None),
    };

    let err = sfx::run(app_config).await.expect_err("💀 a missing file should not be a success");
    assert!(format!("{err:#}").contains("ghost.ndjson"));
    Ok(())
}
