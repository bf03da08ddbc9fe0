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

//! Per-group statistics computed when a window closes

use crate::model::{Aggregation, Statistics};

/// Compute the requested statistics over one group's samples.
///
/// Sorts `samples` in place. Returns `None` for an empty group.
pub(crate) fn compute(samples: &mut [i64], aggregations: &[Aggregation]) -> Option<Statistics> {
    if samples.is_empty() {
        return None;
    }
    samples.sort_unstable();

    let statistics = aggregations
        .iter()
        .map(|&aggregation| {
            let value = match aggregation {
                Aggregation::Count => samples.len() as i64,
                Aggregation::Average => average(samples),
                Aggregation::Percentile(rank) => percentile(samples, rank),
            };
            (aggregation, value)
        })
        .collect();

    Some(statistics)
}

/// Integer mean, truncated toward zero.
fn average(samples: &[i64]) -> i64 {
    let sum: i128 = samples.iter().map(|&value| i128::from(value)).sum();
    // The mean of i64 values always fits back into an i64.
    (sum / samples.len() as i128) as i64
}

/// Nearest-rank-below percentile over sorted, non-empty samples.
///
/// Picks index `len * rank / 100 - 1`, clamped to 0 when the rank product
/// truncates to zero.
fn percentile(sorted: &[i64], rank: u8) -> i64 {
    let position = sorted.len() * usize::from(rank) / 100;
    sorted[position.saturating_sub(1)]
}
