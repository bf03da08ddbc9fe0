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

//! Time-windowed aggregation engine
//!
//! Records are grouped by bucket name (read from a discriminator field) and
//! by a tag key built from the bucket's configured tag fields. Samples stay in
//! memory until the window closes; [`AggregationEngine::dump`] then swaps the
//! whole window out under the lock and computes the statistics for it.
//!
//! The engine is `Sync`. Every append and every swap takes the same mutex, so
//! concurrent producers never lose samples and a sample is never split across
//! two flushes.

use crate::config::{BucketConfig, BucketRecipe, DaemonConfig};
use crate::error::{ConfigError, RecordError};
use crate::model::{integer_field, string_field, Fields, WindowSnapshot};
use ahash::{HashMap, HashMapExt};
use parking_lot::Mutex;
use std::collections::HashMap as StdHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

mod statistics;
mod window;
mod worker;

pub use worker::{AggregationWorker, FlushPolicy};

use window::{window_index, WindowState};

/// Outcome of ingesting a record that named a known bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingest {
    /// The sample was added; carries the event timestamp
    Accepted(i64),

    /// The record held a malformed number and was discarded
    Dropped {
        /// Event timestamp, when the time field itself was readable
        timestamp: Option<i64>,
        cause: RecordError,
    },
}

impl Ingest {
    /// Event timestamp of the record, if it could be parsed
    pub fn timestamp(&self) -> Option<i64> {
        match self {
            Ingest::Accepted(timestamp) => Some(*timestamp),
            Ingest::Dropped { timestamp, .. } => *timestamp,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Ingest::Accepted(_))
    }
}

/// Running totals since the engine was built
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Samples added to a window
    pub accepted: u64,
    /// Records discarded because of a malformed target or time value
    pub dropped: u64,
    /// Records with no discriminator, unknown bucket or missing tag
    pub rejected: u64,
    /// Completed calls to `dump`
    pub flushes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
    flushes: AtomicU64,
}

/// Aggregation engine holding the open window for every configured bucket
#[derive(Debug)]
pub struct AggregationEngine {
    /// Window width in time-field units
    interval: i64,

    /// Field naming the bucket of each record
    discriminator: String,

    /// Validated recipes by bucket name
    recipes: HashMap<String, BucketRecipe>,

    window: Mutex<WindowState>,
    counters: Counters,
}

impl AggregationEngine {
    /// Create an engine, validating every bucket recipe up front
    pub fn new(
        interval: i64,
        discriminator: impl Into<String>,
        buckets: &StdHashMap<String, BucketConfig>,
    ) -> Result<Self, ConfigError> {
        if interval <= 0 {
            return Err(ConfigError::InvalidInterval(interval));
        }

        let mut recipes = HashMap::with_capacity(buckets.len());
        for (name, bucket) in buckets {
            recipes.insert(name.clone(), bucket.validate(name)?);
        }

        Ok(Self {
            interval,
            discriminator: discriminator.into(),
            recipes,
            window: Mutex::new(WindowState::default()),
            counters: Counters::default(),
        })
    }

    /// Create an engine from the daemon configuration
    pub fn from_config(config: &DaemonConfig) -> Result<Self, ConfigError> {
        Self::new(config.interval, config.discriminator.as_str(), &config.buckets)
    }

    pub fn interval(&self) -> i64 {
        self.interval
    }

    /// Add one record to the open window.
    ///
    /// Returns `Err` when the record cannot be routed to a group at all and
    /// `Ok(Ingest::Dropped { .. })` when its time or target value is not an
    /// integer. Neither affects other records.
    pub fn record(&self, fields: &Fields) -> Result<Ingest, RecordError> {
        let outcome = self.ingest(fields);
        match &outcome {
            Ok(Ingest::Accepted(_)) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Ingest::Dropped { cause, .. }) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(error = %cause, "Dropped record");
            }
            Err(err) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(error = %err, "Rejected record");
            }
        }
        outcome
    }

    fn ingest(&self, fields: &Fields) -> Result<Ingest, RecordError> {
        let (bucket, recipe) = self.resolve(fields)?;
        let tag_key = tag_key(bucket, recipe, fields)?;

        let timestamp = match integer_field(fields, &recipe.time) {
            Ok(timestamp) => timestamp,
            Err(cause) => {
                return Ok(Ingest::Dropped {
                    timestamp: None,
                    cause,
                })
            }
        };

        let sample = match &recipe.target {
            Some(target) => match integer_field(fields, target) {
                Ok(value) => value,
                Err(cause) => {
                    return Ok(Ingest::Dropped {
                        timestamp: Some(timestamp),
                        cause,
                    })
                }
            },
            // count-only buckets record occurrences
            None => 1,
        };

        self.window.lock().push(bucket, tag_key, sample);
        Ok(Ingest::Accepted(timestamp))
    }

    /// Read the event timestamp of a record without ingesting it.
    ///
    /// Fails for records `record` would reject, so an unroutable record can
    /// never close a window.
    pub fn event_time(&self, fields: &Fields) -> Result<i64, RecordError> {
        let (bucket, recipe) = self.resolve(fields)?;
        tag_key(bucket, recipe, fields)?;
        integer_field(fields, &recipe.time)
    }

    fn resolve<'a>(&self, fields: &'a Fields) -> Result<(&'a str, &BucketRecipe), RecordError> {
        let bucket = string_field(fields, &self.discriminator).ok_or_else(|| {
            RecordError::MissingDiscriminator {
                field: self.discriminator.clone(),
            }
        })?;
        let recipe = self
            .recipes
            .get(bucket)
            .ok_or_else(|| RecordError::UnknownBucket {
                bucket: bucket.to_string(),
            })?;
        Ok((bucket, recipe))
    }

    /// Whether `timestamp` falls outside the window of the last flush
    pub fn is_deadline(&self, timestamp: i64) -> bool {
        window_index(timestamp, self.interval) != self.window.lock().post_time()
    }

    /// Number of samples in the open window
    pub fn pending(&self) -> usize {
        self.window.lock().sample_count()
    }

    /// Close the open window and compute its statistics.
    ///
    /// The window is swapped out in one step under the lock; `timestamp`
    /// becomes the snapshot's timestamp and marks the new last-flushed window.
    pub fn dump(&self, timestamp: i64) -> WindowSnapshot {
        let buckets = self
            .window
            .lock()
            .rotate(window_index(timestamp, self.interval));

        let mut snapshot = WindowSnapshot::new(timestamp);
        for (bucket, groups) in buckets {
            let Some(recipe) = self.recipes.get(&bucket) else {
                continue;
            };
            for (tag_key, mut samples) in groups {
                if let Some(result) = statistics::compute(&mut samples, &recipe.aggregations) {
                    snapshot.metrics.insert(format!("{}{}", bucket, tag_key), result);
                }
            }
        }

        self.counters.flushes.fetch_add(1, Ordering::Relaxed);
        debug!(timestamp, groups = snapshot.metrics.len(), "Flushed window");
        snapshot
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            flushes: self.counters.flushes.load(Ordering::Relaxed),
        }
    }
}

/// `,tag=value` for each configured tag, in configured order
fn tag_key(bucket: &str, recipe: &BucketRecipe, fields: &Fields) -> Result<String, RecordError> {
    let mut key = String::new();
    for tag in &recipe.tags {
        let value = string_field(fields, tag).ok_or_else(|| RecordError::MissingTagField {
            bucket: bucket.to_string(),
            field: tag.clone(),
        })?;
        key.push(',');
        key.push_str(tag);
        key.push('=');
        key.push_str(value);
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Aggregation;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicBool;

    fn bucket(tags: &[&str], aggregations: &[&str], target: &str) -> BucketConfig {
        BucketConfig {
            tags: tags.iter().map(|t| t.to_string()).collect(),
            aggregations: aggregations.iter().map(|a| a.to_string()).collect(),
            target: target.to_string(),
            time: "ts".to_string(),
        }
    }

    fn engine() -> AggregationEngine {
        let mut buckets = StdHashMap::new();
        buckets.insert(
            "nginx".to_string(),
            bucket(&["host"], &["cnt", "avg", "p50"], "latency"),
        );
        buckets.insert("hits".to_string(), bucket(&[], &["cnt"], ""));
        AggregationEngine::new(60, "type", &buckets).unwrap()
    }

    fn event(pairs: Value) -> Fields {
        serde_json::from_value(pairs).unwrap()
    }

    fn nginx(host: &str, latency: &str, ts: i64) -> Fields {
        event(json!({
            "type": "nginx",
            "host": host,
            "latency": latency,
            "ts": ts.to_string(),
        }))
    }

    #[test]
    fn test_window_isolation_and_reset() {
        let engine = engine();
        for latency in ["1", "2", "4"] {
            assert_eq!(engine.record(&nginx("a", latency, 120)), Ok(Ingest::Accepted(120)));
        }

        let snapshot = engine.dump(179);
        assert_eq!(snapshot.timestamp, 179);
        assert_eq!(snapshot.metrics.len(), 1);
        let stats = snapshot.get("nginx,host=a").unwrap();
        assert_eq!(stats[&Aggregation::Count], 3);
        assert_eq!(stats[&Aggregation::Average], 2);
        assert_eq!(stats[&Aggregation::Percentile(50)], 1);

        assert_eq!(engine.pending(), 0);
        assert!(engine.dump(180).is_empty());
        assert!(engine.dump(181).is_empty());
    }

    #[test]
    fn test_percentile_from_records() {
        let engine = engine();
        for latency in ["50", "10", "40", "20", "30"] {
            engine.record(&nginx("a", latency, 0)).unwrap();
        }
        let snapshot = engine.dump(0);
        assert_eq!(snapshot.get("nginx,host=a").unwrap()[&Aggregation::Percentile(50)], 20);
    }

    #[test]
    fn test_count_only_bucket_counts_occurrences() {
        let engine = engine();
        for _ in 0..17 {
            let record = event(json!({"type": "hits", "ts": "5"}));
            assert_eq!(engine.record(&record), Ok(Ingest::Accepted(5)));
        }

        let snapshot = engine.dump(5);
        let stats = snapshot.get("hits").unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[&Aggregation::Count], 17);
    }

    #[test]
    fn test_count_only_bucket_ignores_target_field() {
        let engine = engine();
        let record = event(json!({"type": "hits", "latency": "oops", "ts": "5"}));
        assert!(engine.record(&record).unwrap().is_accepted());
    }

    #[test]
    fn test_tag_grouping() {
        let engine = engine();
        engine.record(&nginx("a", "10", 0)).unwrap();
        engine.record(&nginx("b", "20", 0)).unwrap();
        engine.record(&nginx("b", "30", 0)).unwrap();

        let snapshot = engine.dump(0);
        assert_eq!(snapshot.metrics.len(), 2);
        assert_eq!(snapshot.get("nginx,host=a").unwrap()[&Aggregation::Count], 1);
        assert_eq!(snapshot.get("nginx,host=b").unwrap()[&Aggregation::Count], 2);
        assert_eq!(snapshot.get("nginx,host=b").unwrap()[&Aggregation::Average], 25);
    }

    #[test]
    fn test_tag_key_follows_configured_order() {
        let mut buckets = StdHashMap::new();
        buckets.insert("api".to_string(), bucket(&["status", "host"], &["cnt"], ""));
        let engine = AggregationEngine::new(10, "type", &buckets).unwrap();

        let record = event(json!({"type": "api", "host": "h1", "status": "200", "ts": "1"}));
        engine.record(&record).unwrap();
        assert!(engine.dump(1).get("api,status=200,host=h1").is_some());
    }

    #[test]
    fn test_rollover_detection() {
        let engine = engine();
        // nothing flushed yet: window 0 is current
        assert!(!engine.is_deadline(0));
        assert!(!engine.is_deadline(59));
        assert!(engine.is_deadline(60));

        engine.dump(125);
        assert!(engine.is_deadline(119));
        assert!(!engine.is_deadline(120));
        assert!(!engine.is_deadline(179));
        assert!(engine.is_deadline(180));

    }

    #[test]
    fn test_malformed_target_is_dropped() {
        let engine = engine();
        let outcome = engine.record(&nginx("a", "slow", 61)).unwrap();
        assert_eq!(
            outcome,
            Ingest::Dropped {
                timestamp: Some(61),
                cause: RecordError::MalformedNumber {
                    field: "latency".to_string(),
                    value: "slow".to_string(),
                },
            }
        );
        assert_eq!(outcome.timestamp(), Some(61));

        engine.record(&nginx("a", "7", 61)).unwrap();
        let snapshot = engine.dump(61);
        assert_eq!(snapshot.get("nginx,host=a").unwrap()[&Aggregation::Count], 1);
        assert_eq!(snapshot.get("nginx,host=a").unwrap()[&Aggregation::Average], 7);
    }

    #[test]
    fn test_malformed_time_is_dropped_without_timestamp() {
        let engine = engine();
        let record = event(json!({"type": "nginx", "host": "a", "latency": "1", "ts": "later"}));
        let outcome = engine.record(&record).unwrap();
        assert_eq!(outcome.timestamp(), None);
        assert!(!outcome.is_accepted());

        let record = event(json!({"type": "nginx", "host": "a", "latency": "1"}));
        assert!(matches!(
            engine.record(&record),
            Ok(Ingest::Dropped {
                timestamp: None,
                cause: RecordError::MissingField { .. }
            })
        ));
        assert!(engine.dump(0).is_empty());
    }

    #[test]
    fn test_unroutable_records_are_rejected() {
        let engine = engine();

        let record = event(json!({"host": "a", "latency": "1", "ts": "1"}));
        assert_eq!(
            engine.record(&record),
            Err(RecordError::MissingDiscriminator {
                field: "type".to_string()
            })
        );

        let record = event(json!({"type": 7, "ts": "1"}));
        assert!(matches!(
            engine.record(&record),
            Err(RecordError::MissingDiscriminator { .. })
        ));

        let record = event(json!({"type": "apache", "ts": "1"}));
        assert_eq!(
            engine.record(&record),
            Err(RecordError::UnknownBucket {
                bucket: "apache".to_string()
            })
        );

        let record = event(json!({"type": "nginx", "host": 1, "latency": "1", "ts": "1"}));
        assert_eq!(
            engine.record(&record),
            Err(RecordError::MissingTagField {
                bucket: "nginx".to_string(),
                field: "host".to_string()
            })
        );

        assert_eq!(
            engine.stats(),
            EngineStats {
                rejected: 4,
                ..EngineStats::default()
            }
        );
        assert!(engine.dump(0).is_empty());
    }

    #[test]
    fn test_absent_tag_field_is_rejected() {
        let engine = engine();

        let record = event(json!({"type": "nginx", "latency": "1", "ts": "1"}));
        assert_eq!(
            engine.record(&record),
            Err(RecordError::MissingTagField {
                bucket: "nginx".to_string(),
                field: "host".to_string()
            })
        );
        assert_eq!(engine.pending(), 0);
        assert_eq!(engine.stats().rejected, 1);
        assert_eq!(engine.stats().accepted, 0);
        assert!(engine.dump(1).is_empty());
    }

    #[test]
    fn test_event_time() {
        let engine = engine();
        assert_eq!(engine.event_time(&nginx("a", "1", 42)), Ok(42));
        assert!(engine
            .event_time(&event(json!({"type": "nginx", "host": "a", "ts": "x"})))
            .is_err());
        assert_eq!(
            engine.event_time(&event(json!({"type": "nginx", "ts": "42"}))),
            Err(RecordError::MissingTagField {
                bucket: "nginx".to_string(),
                field: "host".to_string()
            })
        );
        assert_eq!(engine.pending(), 0);
    }

    #[test]
    fn test_stats_track_outcomes() {
        let engine = engine();
        engine.record(&nginx("a", "1", 0)).unwrap();
        engine.record(&nginx("a", "bad", 0)).unwrap();
        let _ = engine.record(&event(json!({"type": "unknown"})));
        engine.dump(0);

        assert_eq!(
            engine.stats(),
            EngineStats {
                accepted: 1,
                dropped: 1,
                rejected: 1,
                flushes: 1,
            }
        );
    }

    #[test]
    fn test_construction_validates_configuration() {
        let mut buckets = StdHashMap::new();
        buckets.insert("nginx".to_string(), bucket(&[], &["cnt", "p0"], "latency"));
        assert_eq!(
            AggregationEngine::new(60, "type", &buckets).unwrap_err(),
            ConfigError::UnknownAggregation("p0".to_string())
        );

        assert_eq!(
            AggregationEngine::new(0, "type", &StdHashMap::new()).unwrap_err(),
            ConfigError::InvalidInterval(0)
        );
    }

    #[test]
    fn test_concurrent_producers_lose_no_samples() {
        let engine = engine();
        std::thread::scope(|scope| {
            for worker in 0..8 {
                let engine = &engine;
                scope.spawn(move || {
                    let host = format!("h{}", worker % 2);
                    for _ in 0..1000 {
                        engine.record(&nginx(&host, "3", 10)).unwrap();
                    }
                });
            }
        });

        let snapshot = engine.dump(10);
        assert_eq!(snapshot.get("nginx,host=h0").unwrap()[&Aggregation::Count], 4000);
        assert_eq!(snapshot.get("nginx,host=h1").unwrap()[&Aggregation::Count], 4000);
    }

    #[test]
    fn test_concurrent_dump_never_splits_or_loses_samples() {
        let engine = engine();
        let done = AtomicBool::new(false);

        let flushed: i64 = std::thread::scope(|scope| {
            let producers: Vec<_> = (0..4)
                .map(|_| {
                    let engine = &engine;
                    scope.spawn(move || {
                        for _ in 0..2500 {
                            engine.record(&nginx("a", "1", 0)).unwrap();
                        }
                    })
                })
                .collect();

            let dumper = scope.spawn(|| {
                let mut total = 0;
                while !done.load(Ordering::Acquire) {
                    if let Some(stats) = engine.dump(0).get("nginx,host=a") {
                        total += stats[&Aggregation::Count];
                    }
                }
                total
            });

            for producer in producers {
                producer.join().unwrap();
            }
            done.store(true, Ordering::Release);
            dumper.join().unwrap()
        });

        let rest = engine
            .dump(0)
            .get("nginx,host=a")
            .map_or(0, |stats| stats[&Aggregation::Count]);
        assert_eq!(flushed + rest, 10_000);
    }
}
