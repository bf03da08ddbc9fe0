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

//! # logagg
//!
//! Aggregation stage of a log pipeline: consumes structured event records
//! (field maps extracted from parsed log lines) and periodically emits
//! rolled-up statistics per bucket and tag combination.
//!
//! ## Features
//!
//! - **Configurable buckets**: tag fields, target field, time field and
//!   statistics (`cnt`, `avg`, `p1`..`p100`) per metric type
//! - **Fixed windows**: event-time rollover or wall-clock flushing
//! - **Malformed input tolerance**: bad records are dropped and counted,
//!   never fatal
//! - **Pluggable sources and sinks**: JSON lines on stdin/stdout out of the box
//!
//! ## Example
//!
//! ```rust,no_run
//! use logagg::config::DaemonConfig;
//! use logagg::sinks::{JsonLinesSink, MetricsSink};
//! use logagg::sources::JsonLinesSource;
//! use logagg::Daemon;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = DaemonConfig::from_file("logagg.json")?;
//!     let mut daemon = Daemon::new(config)?;
//!     daemon.start(
//!         Arc::new(JsonLinesSource::stdin()),
//!         vec![Arc::new(JsonLinesSink::stdout()) as Arc<dyn MetricsSink>],
//!     )?;
//!     daemon.wait_for_shutdown().await?;
//!     Ok(())
//! }
//! ```

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub mod aggregation;
pub mod config;
pub mod error;
pub mod model;
pub mod sinks;
pub mod sources;

pub use aggregation::{AggregationEngine, AggregationWorker, EngineStats, FlushPolicy, Ingest};
pub use error::{ConfigError, RecordError};
pub use model::{Aggregation, Fields, WindowSnapshot};

use config::DaemonConfig;
use sinks::MetricsSink;
use sources::MetricsSource;

/// Main daemon instance
pub struct Daemon {
    config: DaemonConfig,
    engine: Arc<AggregationEngine>,
    shutdown_notify: Arc<Notify>,
    running: Option<Running>,
}

struct Running {
    source: Arc<dyn MetricsSource>,
    source_task: JoinHandle<()>,
    worker_task: JoinHandle<EngineStats>,
    sinks: Vec<Arc<dyn MetricsSink>>,
}

impl Daemon {
    /// Create a daemon, validating the bucket configuration
    pub fn new(config: DaemonConfig) -> Result<Self> {
        let engine =
            AggregationEngine::from_config(&config).context("Invalid aggregation configuration")?;
        info!(
            buckets = config.buckets.len(),
            interval = config.interval,
            "Aggregation engine ready"
        );

        Ok(Self {
            config,
            engine: Arc::new(engine),
            shutdown_notify: Arc::new(Notify::new()),
            running: None,
        })
    }

    /// Shared handle to the engine
    pub fn engine(&self) -> Arc<AggregationEngine> {
        Arc::clone(&self.engine)
    }

    /// Start the worker and the source, and listen for shutdown signals
    pub fn start(
        &mut self,
        source: Arc<dyn MetricsSource>,
        sinks: Vec<Arc<dyn MetricsSink>>,
    ) -> Result<()> {
        if self.running.is_some() {
            anyhow::bail!("Daemon is already running");
        }
        info!(source = source.name(), "Starting services");

        let (sender, receiver) = mpsc::unbounded_channel();

        let mut worker = AggregationWorker::new(
            self.engine(),
            self.config.flush_policy(),
            self.config.time_unit,
        );
        for sink in &sinks {
            worker = worker.with_sink(Arc::clone(sink));
        }
        let worker_task = tokio::spawn(worker.run(receiver));

        // End of input shuts the daemon down like a signal does
        let source_task = {
            let source = Arc::clone(&source);
            let shutdown_notify = Arc::clone(&self.shutdown_notify);
            tokio::spawn(async move {
                if let Err(err) = source.start(sender).await {
                    error!(source = source.name(), "Source failed: {:#}", err);
                }
                shutdown_notify.notify_one();
            })
        };

        self.setup_signal_handlers();

        self.running = Some(Running {
            source,
            source_task,
            worker_task,
            sinks,
        });

        info!("All services started successfully");
        Ok(())
    }

    /// Wait for a shutdown signal or the end of input, then drain and flush
    pub async fn wait_for_shutdown(&mut self) -> Result<EngineStats> {
        let Some(running) = self.running.take() else {
            anyhow::bail!("Daemon was not started");
        };

        self.shutdown_notify.notified().await;
        info!("Shutdown requested, stopping services...");

        running.source.stop().await?;
        running
            .source_task
            .await
            .context("Source task panicked")?;

        // The source dropped its sender, so the worker drains and flushes
        let stats = running
            .worker_task
            .await
            .context("Aggregation worker panicked")?;

        for sink in &running.sinks {
            if let Err(err) = sink.flush().await.and(sink.close().await) {
                warn!(sink = sink.name(), "Failed to close sink: {:#}", err);
            }
        }

        Ok(stats)
    }

    fn setup_signal_handlers(&self) {
        let shutdown_notify = Arc::clone(&self.shutdown_notify);

        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received SIGINT, initiating shutdown");
                    shutdown_notify.notify_one();
                }
                Err(err) => {
                    warn!("Failed to listen for SIGINT: {}", err);
                }
            }
        });

        #[cfg(unix)]
        {
            let shutdown_notify = Arc::clone(&self.shutdown_notify);
            tokio::spawn(async move {
                let mut sigterm =
                    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                        Ok(sigterm) => sigterm,
                        Err(err) => {
                            warn!("Failed to register SIGTERM handler: {}", err);
                            return;
                        }
                    };

                if sigterm.recv().await.is_some() {
                    info!("Received SIGTERM, initiating shutdown");
                    shutdown_notify.notify_one();
                }
            });
        }
    }
}
