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

use anyhow::Result;
use logagg::config::DaemonConfig;
use logagg::sinks::{JsonLinesSink, MetricsSink};
use logagg::sources::JsonLinesSource;
use logagg::Daemon;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};

fn main() -> Result<()> {
    // Initialize tracing; stdout carries the aggregated windows
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <config-file>", args[0]);
        std::process::exit(1);
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(run(PathBuf::from(&args[1])));
    // A pending stdin read occupies a blocking thread until input arrives
    runtime.shutdown_background();
    result
}

async fn run(config_path: PathBuf) -> Result<()> {
    info!("Starting logagg with config: {}", config_path.display());

    let config = DaemonConfig::from_file(&config_path)?;
    info!(policy = ?config.flush_policy(), "Configuration loaded successfully");

    let mut daemon = Daemon::new(config)?;
    let sinks = vec![Arc::new(JsonLinesSink::stdout()) as Arc<dyn MetricsSink>];
    daemon.start(Arc::new(JsonLinesSource::stdin()), sinks)?;

    let stats = daemon.wait_for_shutdown().await?;
    info!(
        accepted = stats.accepted,
        dropped = stats.dropped,
        rejected = stats.rejected,
        "Shutdown complete"
    );

    Ok(())
}
