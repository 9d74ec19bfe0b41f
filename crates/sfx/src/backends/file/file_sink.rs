use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::{
    fs::File,
    io::{self, AsyncWriteExt},
};
use tracing::trace;

use crate::backends::Sink;

// -- 🚰 FileSinkConfig: one knob. Where do the lines go. That's it. That's the config.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct FileSinkConfig {
    pub file_name: String,
}

/// 🚰 FileSink: appends every rendered payload to one file, through a BufWriter.
///
/// ⚠️ `File::create` truncates. Point it at something you love and it will be
/// something you used to love.
#[derive(Debug)]
pub struct FileSink {
    file_buf: io::BufWriter<File>,
    config: FileSinkConfig,
}

impl FileSink {
    /// 🚀 Creates (or truncates) the output file.
    pub async fn new(config: FileSinkConfig) -> Result<Self> {
        let file_handle = File::create(&config.file_name).await.with_context(|| {
            format!(
                "💀 The output file '{}' refused to exist. \
                The parent directory may be a figment of the config's imagination.",
                config.file_name
            )
        })?;
        Ok(Self {
            file_buf: io::BufWriter::new(file_handle),
            config,
        })
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn send(&mut self, payload: String) -> Result<()> {
        trace!("📬 {} bytes headed for '{}'", payload.len(), self.config.file_name);
        self.file_buf
            .write_all(payload.as_bytes())
            .await
            .with_context(|| format!("💀 write to '{}' failed mid-sentence", self.config.file_name))?;
        Ok(())
    }

    /// 🗑️ Flush or it didn't happen. Async Drop isn't a thing, so this is the only chance.
    async fn close(&mut self) -> Result<()> {
        self.file_buf.flush().await.with_context(|| {
            format!(
                "💀 The last bytes for '{}' were right there in the buffer, close enough to \
                touch the disk. The flush failed. They remain in memory, looking wistfully at the inode.",
                self.config.file_name
            )
        })
    }
}
