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

//! Newline-delimited JSON source

use super::{MetricSender, MetricsSource};
use crate::model::Fields;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::{Mutex, Notify};
use tracing::{info, warn};

/// Reads one JSON object per line and forwards it as a record
pub struct JsonLinesSource<R> {
    name: String,
    reader: Mutex<Option<R>>,
    stopped: Notify,
}

impl<R> JsonLinesSource<R> {
    pub fn new(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            reader: Mutex::new(Some(reader)),
            stopped: Notify::new(),
        }
    }
}

impl JsonLinesSource<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new("stdin", BufReader::new(tokio::io::stdin()))
    }
}

#[async_trait]
impl<R> MetricsSource for JsonLinesSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn start(&self, sender: MetricSender) -> Result<()> {
        let reader = self
            .reader
            .lock()
            .await
            .take()
            .with_context(|| format!("Source {} was already started", self.name))?;
        let mut lines = reader.lines();
        let (mut forwarded, mut skipped) = (0u64, 0u64);

        loop {
            let line = tokio::select! {
                line = lines.next_line() => line
                    .with_context(|| format!("Failed to read from {}", self.name))?,
                _ = self.stopped.notified() => break,
            };
            let Some(line) = line else {
                break;
            };
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<Fields>(&line) {
                Ok(fields) => {
                    if sender.send(fields).is_err() {
                        warn!(source = %self.name, "Aggregation stopped, dropping input");
                        break;
                    }
                    forwarded += 1;
                }
                Err(err) => {
                    skipped += 1;
                    warn!(source = %self.name, "Skipping malformed record: {}", err);
                }
            }
        }

        info!(source = %self.name, forwarded, skipped, "Source finished");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stopped.notify_one();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
