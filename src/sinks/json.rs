/*
 * Copyright 2024 ArpNetworking
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Newline-delimited JSON sink

use super::MetricsSink;
use crate::model::WindowSnapshot;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt, Stdout};
use tokio::sync::Mutex;

/// Writes every window as one JSON object per line
pub struct JsonLinesSink<W> {
    name: String,
    writer: Mutex<W>,
}

impl<W> JsonLinesSink<W> {
    pub fn new(name: impl Into<String>, writer: W) -> Self {
        Self {
            name: name.into(),
            writer: Mutex::new(writer),
        }
    }

    /// Recover the underlying writer
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl JsonLinesSink<Stdout> {
    pub fn stdout() -> Self {
        Self::new("stdout", tokio::io::stdout())
    }
}

#[async_trait]
impl<W> MetricsSink for JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&self, data: &WindowSnapshot) -> Result<()> {
        let mut line = serde_json::to_vec(data).context("Failed to encode window")?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .with_context(|| format!("Failed to write window to {}", self.name))?;
        writer.flush().await?;
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.writer.lock().await.flush().await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.writer.lock().await.shutdown().await?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
