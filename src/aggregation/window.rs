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

//! Live sample storage for the currently open window

use ahash::HashMap;
use std::mem;

/// Samples grouped by bucket name, then by tag key
pub(crate) type Buckets = HashMap<String, HashMap<String, Vec<i64>>>;

/// Index of the fixed-width window containing `timestamp`
pub(crate) fn window_index(timestamp: i64, interval: i64) -> i64 {
    timestamp / interval
}

/// The single open window plus the index of the last flushed one
#[derive(Debug, Default)]
pub(crate) struct WindowState {
    buckets: Buckets,
    post_time: i64,
}

impl WindowState {
    pub(crate) fn push(&mut self, bucket: &str, tag_key: String, sample: i64) {
        self.buckets
            .entry(bucket.to_owned())
            .or_default()
            .entry(tag_key)
            .or_default()
            .push(sample);
    }

    pub(crate) fn post_time(&self) -> i64 {
        self.post_time
    }

    /// Close the window: hand out every sample and start empty at `window`
    pub(crate) fn rotate(&mut self, window: i64) -> Buckets {
        self.post_time = window;
        mem::take(&mut self.buckets)
    }

    pub(crate) fn sample_count(&self) -> usize {
        self.buckets
            .values()
            .flat_map(|groups| groups.values())
            .map(Vec::len)
            .sum()
    }
}
