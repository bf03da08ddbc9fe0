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

//! Record sources feeding the aggregation worker
//!
//! Sources turn whatever they receive into [`Fields`] maps and push them into
//! the worker's channel. Parsing raw log lines happens upstream.

use crate::model::Fields;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

mod json;

pub use json::JsonLinesSource;

/// Trait for all record sources
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Run the source, sending received records to the provided channel.
    ///
    /// Returns once the input is exhausted or the source is stopped.
    async fn start(&self, sender: MetricSender) -> Result<()>;

    /// Stop the source gracefully
    async fn stop(&self) -> Result<()>;

    /// Get the name of this source
    fn name(&self) -> &str;
}

/// Channel for sending records from sources to aggregation
pub type MetricSender = mpsc::UnboundedSender<Fields>;

/// Channel for receiving records in aggregation
pub type MetricReceiver = mpsc::UnboundedReceiver<Fields>;
