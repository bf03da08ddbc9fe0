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

//! Error types for record ingestion and configuration validation
//!
//! Record errors are local to a single event and never stop ingestion.
//! Configuration errors are raised once, when an engine is built.

use thiserror::Error;

/// Failure to ingest a single record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// The discriminator field naming the bucket is absent or not a string
    #[error("discriminator field `{field}` is missing or not a string")]
    MissingDiscriminator { field: String },

    /// No recipe is configured for the bucket named by the record
    #[error("no aggregation configured for bucket `{bucket}`")]
    UnknownBucket { bucket: String },

    /// A configured tag field is absent or not a string
    #[error("tag field `{field}` of bucket `{bucket}` is missing or not a string")]
    MissingTagField { bucket: String, field: String },

    /// The target or time field is absent
    #[error("field `{field}` is missing")]
    MissingField { field: String },

    /// The target or time field does not hold a base-10 integer
    #[error("field `{field}` holds `{value}`, which is not an integer")]
    MalformedNumber { field: String, value: String },
}

/// Invalid aggregator configuration, detected at construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown aggregation `{0}`, expected `cnt`, `avg` or `p1`..`p100`")]
    UnknownAggregation(String),

    #[error("window interval must be positive, got {0}")]
    InvalidInterval(i64),

    #[error("bucket `{bucket}` requests no aggregations")]
    NoAggregations { bucket: String },

    #[error("bucket `{bucket}` computes numeric statistics but names no target field")]
    MissingTarget { bucket: String },

    #[error("bucket `{bucket}` names no time field")]
    MissingTimeField { bucket: String },

    /// An untagged bucket would collide with the snapshot's reserved key
    #[error("bucket `{0}` has no tags and clashes with the reserved snapshot key")]
    ReservedBucketName(String),
}
