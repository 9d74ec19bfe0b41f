use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::backends::Sink;

/// 📦 A sink that never forgets. Unlike my dad, who forgot my soccer game in 1998.
///
/// Every payload the consumer renders lands in a shared Vec. Clone-able because tests
/// need to peek inside after handing `self` off to the pipeline. The `Arc` means every
/// clone sees the same Vec. Communist data, but in a good way.
#[derive(Debug, Default, Clone)]
pub struct InMemorySink {
    received: Arc<Mutex<Vec<String>>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🔍 Everything received so far, one entry per `send`.
    pub async fn payloads(&self) -> Vec<String> {
        self.received.lock().await.clone()
    }

    /// 📄 Every record line received so far, in arrival order.
    pub async fn lines(&self) -> Vec<String> {
        self.received
            .lock()
            .await
            .iter()
            .flat_map(|payload| payload.lines().map(str::to_string).collect::<Vec<_>>())
            .collect()
    }
}

#[async_trait]
impl Sink for InMemorySink {
    async fn send(&mut self, payload: String) -> Result<()> {
        // 🔒 The Mutex is load-bearing. Do not remove. I know it looks optional. It isn't.
        self.received.lock().await.push(payload);
        Ok(())
    }

    /// 🗑️ Nothing to flush. We live in RAM. The vibes are ref-counted.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
