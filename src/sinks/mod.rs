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

//! Sinks for delivering flushed windows
//!
//! A sink receives each [`WindowSnapshot`] after the engine has released its
//! lock, so slow delivery never blocks ingestion of the next window.
//! Serialization, retries and partitioning are the sink's own business.

use crate::model::WindowSnapshot;
use anyhow::Result;
use async_trait::async_trait;

mod channel;
mod json;

pub use channel::ChannelSink;
pub use json::JsonLinesSink;

/// Trait for all window sinks
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Send one flushed window to this sink
    async fn send(&self, data: &WindowSnapshot) -> Result<()>;

    /// Flush any buffered data
    async fn flush(&self) -> Result<()>;

    /// Close the sink gracefully
    async fn close(&self) -> Result<()>;

    /// Get the name of this sink
    fn name(&self) -> &str;
}
