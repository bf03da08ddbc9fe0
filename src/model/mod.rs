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

//! Core data model for windowed aggregation
//!
//! Defines the event field map consumed by the engine, the aggregation
//! identifiers it understands, and the snapshot it produces on every flush.

use crate::error::{ConfigError, RecordError};
use ahash::HashMap;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A single structured event: field name to value
pub type Fields = HashMap<String, Value>;

/// Computed statistics for one (bucket, tag key) group
pub type Statistics = BTreeMap<Aggregation, i64>;

/// Key under which a snapshot carries its flush timestamp
pub const TIMESTAMP_KEY: &str = "timestamp";

/// Look up a field that must hold text.
pub fn string_field<'a>(fields: &'a Fields, name: &str) -> Option<&'a str> {
    fields.get(name).and_then(Value::as_str)
}

/// Look up a field holding a base-10 integer.
///
/// Text is the canonical encoding; integral JSON numbers are accepted as well.
pub fn integer_field(fields: &Fields, name: &str) -> Result<i64, RecordError> {
    let malformed = |value: String| RecordError::MalformedNumber {
        field: name.to_string(),
        value,
    };

    match fields.get(name) {
        None | Some(Value::Null) => Err(RecordError::MissingField {
            field: name.to_string(),
        }),
        Some(Value::String(text)) => text.parse().map_err(|_| malformed(text.clone())),
        Some(Value::Number(number)) => number.as_i64().ok_or_else(|| malformed(number.to_string())),
        Some(other) => Err(malformed(other.to_string())),
    }
}

/// A statistic that can be requested for a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "String")]
pub enum Aggregation {
    /// Number of samples (`cnt`)
    Count,
    /// Truncated integer mean (`avg`)
    Average,
    /// Nearest-rank-below percentile (`p1`..`p100`)
    Percentile(u8),
}

impl Aggregation {
    /// Whether computing this statistic needs the numeric target value
    pub fn needs_target(&self) -> bool {
        !matches!(self, Aggregation::Count)
    }
}

impl FromStr for Aggregation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cnt" => Ok(Aggregation::Count),
            "avg" => Ok(Aggregation::Average),
            _ => {
                let unknown = || ConfigError::UnknownAggregation(s.to_string());
                let digits = s.strip_prefix('p').ok_or_else(unknown)?;
                // leading zeros are accepted: `p05` is `p5`
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(unknown());
                }
                match digits.parse::<u8>() {
                    Ok(rank @ 1..=100) => Ok(Aggregation::Percentile(rank)),
                    _ => Err(unknown()),
                }
            }
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Count => f.write_str("cnt"),
            Aggregation::Average => f.write_str("avg"),
            Aggregation::Percentile(rank) => write!(f, "p{}", rank),
        }
    }
}

impl From<Aggregation> for String {
    fn from(aggregation: Aggregation) -> Self {
        aggregation.to_string()
    }
}

/// Statistics for one closed window
///
/// Serializes to a flat object: one entry per `bucketName + tagKey` plus the
/// reserved `timestamp` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Timestamp passed to the flush that produced this snapshot
    pub timestamp: i64,

    /// Statistics keyed by bucket name followed by tag key
    pub metrics: BTreeMap<String, Statistics>,
}

impl WindowSnapshot {
    /// Create an empty snapshot for the given flush timestamp
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            metrics: BTreeMap::new(),
        }
    }

    /// True when the window held no samples
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Statistics for a single `bucketName + tagKey` entry
    pub fn get(&self, key: &str) -> Option<&Statistics> {
        self.metrics.get(key)
    }
}

impl Serialize for WindowSnapshot {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.metrics.len() + 1))?;
        for (key, statistics) in &self.metrics {
            map.serialize_entry(key, statistics)?;
        }
        map.serialize_entry(TIMESTAMP_KEY, &self.timestamp)?;
        map.end()
    }
}
