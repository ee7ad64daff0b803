// Copyright 2025 RISC Zero, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! FTSO scaling availability over a reward epoch.
//!
//! A voter hits a feed in a round when its value lies within the interquartile range or within
//! the closeness threshold of the median. A voter passes the epoch when it hits at least the
//! availability threshold share of all (round, feed) pairs that had a median.

use std::collections::BTreeMap;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::{
    config::{RewardSettings, TOTAL_BIPS, TOTAL_PPM},
    epoch::RewardEpoch,
    median::{MedianCalculationResult, MedianSummary},
};

/// Availability of one voter over the epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterScalingAvailability {
    pub identity_address: Address,
    pub submit_address: Address,
    pub hits: u64,
    pub total: u64,
    pub passes: bool,
}

/// Content of `minimal-conditions.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinimalConditions {
    pub reward_epoch_id: u32,
    pub start_voting_round_id: u32,
    pub end_voting_round_id: u32,
    #[serde(rename = "availabilityThresholdBIPS")]
    pub availability_threshold_bips: u64,
    #[serde(rename = "closenessThresholdPPM")]
    pub closeness_threshold_ppm: u64,
    /// In signing policy order.
    pub voters: Vec<VoterScalingAvailability>,
}

/// Whether `value` counts as a hit against `summary`.
pub fn is_scaling_hit(value: i64, summary: &MedianSummary, closeness_threshold_ppm: u64) -> bool {
    if summary.quartile1 <= value && value <= summary.quartile3 {
        return true;
    }
    let distance = (value as i128 - summary.median as i128).unsigned_abs();
    distance * TOTAL_PPM as u128 <= closeness_threshold_ppm as u128 * summary.median.unsigned_abs() as u128
}

/// Accumulates hits round by round.
#[derive(Debug, Clone)]
pub struct MinimalConditionsCalculator {
    closeness_threshold_ppm: u64,
    availability_threshold_bips: u64,
    total: u64,
    hits: BTreeMap<Address, u64>,
}

impl MinimalConditionsCalculator {
    pub fn new(settings: &RewardSettings) -> Self {
        Self {
            closeness_threshold_ppm: settings.ftso_scaling_closeness_threshold_ppm,
            availability_threshold_bips: settings.ftso_scaling_availability_threshold_bips,
            total: 0,
            hits: BTreeMap::new(),
        }
    }

    /// Count the median results of one round. Feeds without a median do not count.
    pub fn add_round(&mut self, medians: &[MedianCalculationResult]) {
        for result in medians {
            let Some(summary) = &result.summary else { continue };
            self.total += 1;
            for (voter, value) in result.voters.iter().zip(&result.feed_values) {
                if value.is_some_and(|v| is_scaling_hit(v, summary, self.closeness_threshold_ppm)) {
                    *self.hits.entry(*voter).or_default() += 1;
                }
            }
        }
    }

    /// Evaluate every voter of `epoch`. Without a single median in the range every voter passes.
    pub fn finish(self, epoch: &RewardEpoch, start_voting_round_id: u32, end_voting_round_id: u32) -> MinimalConditions {
        let voters = epoch
            .voters()
            .iter()
            .map(|voter| {
                let hits = self.hits.get(&voter.submit_address).copied().unwrap_or_default();
                VoterScalingAvailability {
                    identity_address: voter.identity_address,
                    submit_address: voter.submit_address,
                    hits,
                    total: self.total,
                    passes: hits * TOTAL_BIPS >= self.total * self.availability_threshold_bips,
                }
            })
            .collect();
        MinimalConditions {
            reward_epoch_id: epoch.reward_epoch_id(),
            start_voting_round_id,
            end_voting_round_id,
            availability_threshold_bips: self.availability_threshold_bips,
            closeness_threshold_ppm: self.closeness_threshold_ppm,
            voters,
        }
    }
}
