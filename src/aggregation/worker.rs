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

//! Single-consumer worker driving an [`AggregationEngine`]
//!
//! The worker owns the receiving end of the record channel, so ingestion is
//! serialized no matter how many sources feed it. It closes windows either on
//! event-time rollover or on a wall-clock timer and forwards every non-empty
//! snapshot to its sinks.

use super::{AggregationEngine, EngineStats};
use crate::config::TimeUnit;
use crate::model::{Fields, WindowSnapshot};
use crate::sinks::MetricsSink;
use crate::sources::MetricReceiver;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info};

/// When the worker closes the open window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Flush when a record's event time falls outside the open window
    EventTime,
    /// Flush on a fixed wall-clock period
    Timer(Duration),
}

/// Consumes records from a channel and delivers flushed windows to sinks
pub struct AggregationWorker {
    engine: Arc<AggregationEngine>,
    policy: FlushPolicy,
    time_unit: TimeUnit,
    sinks: Vec<Arc<dyn MetricsSink>>,
}

impl AggregationWorker {
    pub fn new(engine: Arc<AggregationEngine>, policy: FlushPolicy, time_unit: TimeUnit) -> Self {
        Self {
            engine,
            policy,
            time_unit,
            sinks: Vec::new(),
        }
    }

    /// Add a sink receiving every flushed window
    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Run until the channel closes, then flush what is left.
    pub async fn run(self, mut receiver: MetricReceiver) -> EngineStats {
        info!(policy = ?self.policy, sinks = self.sinks.len(), "Aggregation worker started");

        let last_event = match self.policy {
            FlushPolicy::EventTime => self.run_event_time(&mut receiver).await,
            FlushPolicy::Timer(period) => {
                self.run_timer(&mut receiver, period).await;
                None
            }
        };

        let timestamp = last_event.unwrap_or_else(|| self.time_unit.now());
        self.flush(timestamp).await;

        let stats = self.engine.stats();
        info!(
            accepted = stats.accepted,
            dropped = stats.dropped,
            rejected = stats.rejected,
            flushes = stats.flushes,
            "Aggregation worker stopped"
        );
        stats
    }

    async fn run_event_time(&self, receiver: &mut MetricReceiver) -> Option<i64> {
        let mut last_event: Option<i64> = None;

        while let Some(fields) = receiver.recv().await {
            // Close the open window before ingesting a record from any other
            // window, earlier or later, so a group never mixes windows.
            if let Ok(timestamp) = self.engine.event_time(&fields) {
                if self.engine.is_deadline(timestamp) {
                    self.flush(timestamp).await;
                }
            }

            if let Some(timestamp) = self.ingest(&fields) {
                last_event = Some(timestamp);
            }
        }

        // every sample still open shares the window of the last event
        last_event
    }

    async fn run_timer(&self, receiver: &mut MetricReceiver, period: Duration) {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                fields = receiver.recv() => match fields {
                    Some(fields) => {
                        self.ingest(&fields);
                    }
                    None => break,
                },
                _ = ticker.tick() => self.flush(self.time_unit.now()).await,
            }
        }
    }

    fn ingest(&self, fields: &Fields) -> Option<i64> {
        // rejections are counted and logged by the engine
        self.engine
            .record(fields)
            .ok()
            .and_then(|ingest| ingest.timestamp())
    }

    async fn flush(&self, timestamp: i64) {
        let snapshot = self.engine.dump(timestamp);
        if snapshot.is_empty() {
            return;
        }
        self.deliver(&snapshot).await;
    }

    async fn deliver(&self, snapshot: &WindowSnapshot) {
        for sink in &self.sinks {
            if let Err(err) = sink.send(snapshot).await {
                error!(sink = sink.name(), "Failed to deliver window: {:#}", err);
            }
        }
    }
}
