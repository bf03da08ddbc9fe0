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

//! In-process sink handing windows to a channel

use super::MetricsSink;
use crate::model::WindowSnapshot;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Forwards every window to an unbounded channel
///
/// Lets an embedding application consume windows directly.
pub struct ChannelSink {
    name: String,
    output_sender: mpsc::UnboundedSender<WindowSnapshot>,
}

impl ChannelSink {
    /// Create the sink and the receiver its windows arrive on
    pub fn new(name: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<WindowSnapshot>) {
        let (output_sender, receiver) = mpsc::unbounded_channel();
        let sink = Self {
            name: name.into(),
            output_sender,
        };
        (sink, receiver)
    }
}

#[async_trait]
impl MetricsSink for ChannelSink {
    async fn send(&self, data: &WindowSnapshot) -> Result<()> {
        self.output_sender
            .send(data.clone())
            .map_err(|_| anyhow!("Receiver of sink {} was dropped", self.name))
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
