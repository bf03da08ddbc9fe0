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

//! Configuration parsing and validation
//!
//! The daemon is configured from a single JSON document holding the window
//! interval, the discriminator field and the table of bucket recipes. Recipes
//! are checked once, when the engine is built, so bad aggregation identifiers
//! fail at startup rather than at flush time.

use crate::aggregation::FlushPolicy;
use crate::error::ConfigError;
use crate::model::{Aggregation, TIMESTAMP_KEY};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonConfig {
    /// Window width, in the unit of the events' time field
    pub interval: i64,

    /// Field whose value names the bucket a record belongs to
    #[serde(rename = "name", default = "default_discriminator")]
    pub discriminator: String,

    /// Unit of the events' time field
    #[serde(default)]
    pub time_unit: TimeUnit,

    /// Flush on a wall-clock timer instead of on event-time rollover
    #[serde(default, with = "duration_serde")]
    pub flush_interval: Option<Duration>,

    /// Aggregation recipe per bucket name
    #[serde(default)]
    pub buckets: HashMap<String, BucketConfig>,
}

/// Aggregation recipe for one bucket, as written in configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct BucketConfig {
    /// Fields whose values form the grouping key, in key order
    #[serde(default)]
    pub tags: Vec<String>,

    /// Requested statistics: `cnt`, `avg`, `p<N>`
    #[serde(default)]
    pub aggregations: Vec<String>,

    /// Field holding the numeric sample; unused for count-only buckets
    #[serde(default)]
    pub target: String,

    /// Field holding the event timestamp
    #[serde(default)]
    pub time: String,
}

/// Validated form of a [`BucketConfig`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketRecipe {
    pub tags: Vec<String>,
    pub aggregations: Vec<Aggregation>,
    /// Present iff some aggregation needs the numeric target
    pub target: Option<String>,
    pub time: String,
}

/// Unit of event timestamps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    #[default]
    Seconds,
    Milliseconds,
}

impl TimeUnit {
    /// Current wall-clock time expressed in this unit
    pub fn now(&self) -> i64 {
        let now = Utc::now();
        match self {
            TimeUnit::Seconds => now.timestamp(),
            TimeUnit::Milliseconds => now.timestamp_millis(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_json(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse configuration")
    }

    /// How the worker decides when to close a window
    pub fn flush_policy(&self) -> FlushPolicy {
        match self.flush_interval {
            Some(period) => FlushPolicy::Timer(period),
            None => FlushPolicy::EventTime,
        }
    }
}

impl BucketConfig {
    /// Check this recipe and resolve its aggregation identifiers
    pub fn validate(&self, bucket: &str) -> Result<BucketRecipe, ConfigError> {
        if self.aggregations.is_empty() {
            return Err(ConfigError::NoAggregations {
                bucket: bucket.to_string(),
            });
        }

        let mut aggregations = Vec::with_capacity(self.aggregations.len());
        for id in &self.aggregations {
            let aggregation: Aggregation = id.parse()?;
            if !aggregations.contains(&aggregation) {
                aggregations.push(aggregation);
            }
        }

        let target = if aggregations.iter().any(Aggregation::needs_target) {
            if self.target.is_empty() {
                return Err(ConfigError::MissingTarget {
                    bucket: bucket.to_string(),
                });
            }
            Some(self.target.clone())
        } else {
            None
        };

        if self.time.is_empty() {
            return Err(ConfigError::MissingTimeField {
                bucket: bucket.to_string(),
            });
        }

        if self.tags.is_empty() && bucket == TIMESTAMP_KEY {
            return Err(ConfigError::ReservedBucketName(bucket.to_string()));
        }

        Ok(BucketRecipe {
            tags: self.tags.clone(),
            aggregations,
            target,
            time: self.time.clone(),
        })
    }
}

fn default_discriminator() -> String {
    "type".to_string()
}

// ISO-8601 duration (de)serialization, e.g. `PT10S` or `PT0.5S`
mod duration_serde {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(duration) => {
                serializer.serialize_str(&format!("PT{}S", duration.as_secs_f64()))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let Some(s) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };

        let seconds = s
            .strip_prefix("PT")
            .and_then(|rest| rest.strip_suffix('S'))
            .ok_or_else(|| D::Error::custom(format!("Invalid duration format: {}", s)))?;
        let seconds: f64 = seconds.parse().map_err(D::Error::custom)?;
        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(D::Error::custom(format!(
                "Duration must be positive: {}",
                s
            )));
        }

        Ok(Some(Duration::from_secs_f64(seconds)))
    }
}
