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

//! Median and random calculation seams with their default kernels.

use alloy_primitives::{keccak256, Address, U256};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};

use crate::{
    data::DataForCalculations,
    epoch::Feed,
    serde_utils::{u256_dec, u256_dec_vec},
};

/// Weighted median and quartiles of one feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedianSummary {
    pub median: i64,
    pub quartile1: i64,
    pub quartile3: i64,
    #[serde(with = "u256_dec")]
    pub participating_weight: U256,
}

/// Outcome of the median calculation for one feed in one voting round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedianCalculationResult {
    pub voting_round_id: u32,
    pub feed: Feed,
    /// Voters in signing policy order, with their values and median weights.
    pub voters: Vec<Address>,
    pub feed_values: Vec<Option<i64>>,
    #[serde(with = "u256_dec_vec")]
    pub weights: Vec<U256>,
    /// `None` when nobody with weight revealed a value.
    pub summary: Option<MedianSummary>,
}

impl MedianCalculationResult {
    pub fn is_empty(&self) -> bool {
        self.summary.is_none()
    }
}

/// Random number of a voting round and whether it can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RandomCalculationResult {
    pub voting_round_id: u32,
    #[serde(with = "u256_dec")]
    pub random: U256,
    pub is_secure: bool,
}

/// Turns a round's reveals into per-feed medians.
pub trait MedianCalculator: Send + Sync {
    fn calculate_medians(&self, data: &DataForCalculations) -> Vec<MedianCalculationResult>;
}

/// Turns a round's reveals into the round's random number.
pub trait RandomCalculator: Send + Sync {
    fn calculate_random(&self, data: &DataForCalculations) -> RandomCalculationResult;
}

/// Stake-weighted median with quartiles at one and three quarters of the weight.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedMedianCalculator;

impl WeightedMedianCalculator {
    /// `entries` are `(value, weight)` in voter order.
    pub fn summarize(entries: &[(i64, U256)]) -> Option<MedianSummary> {
        let mut sorted: Vec<(usize, i64, U256)> = entries
            .iter()
            .enumerate()
            .filter(|(_, (_, w))| !w.is_zero())
            .map(|(i, (v, w))| (i, *v, *w))
            .collect();
        sorted.sort_by_key(|(i, v, _)| (*v, *i));
        let total = sorted.iter().fold(U256::ZERO, |acc, (_, _, w)| acc + w);
        if total.is_zero() {
            return None;
        }

        let first_reaching = |numerator: u64, denominator: u64| -> (usize, U256) {
            let mut cumulative = U256::ZERO;
            for (pos, (_, _, w)) in sorted.iter().enumerate() {
                cumulative += w;
                if cumulative * U256::from(denominator) >= total * U256::from(numerator) {
                    return (pos, cumulative);
                }
            }
            (sorted.len() - 1, total)
        };

        let (median_pos, cumulative) = first_reaching(1, 2);
        let median = if cumulative * U256::from(2) == total && median_pos + 1 < sorted.len() {
            let (a, b) = (sorted[median_pos].1, sorted[median_pos + 1].1);
            ((a as i128 + b as i128) / 2) as i64
        } else {
            sorted[median_pos].1
        };
        Some(MedianSummary {
            median,
            quartile1: sorted[first_reaching(1, 4).0].1,
            quartile3: sorted[first_reaching(3, 4).0].1,
            participating_weight: total,
        })
    }
}

impl MedianCalculator for WeightedMedianCalculator {
    fn calculate_medians(&self, data: &DataForCalculations) -> Vec<MedianCalculationResult> {
        let voters = &data.ordered_voters_submit_addresses;
        let values: Vec<Vec<Option<i64>>> = voters.iter().map(|v| data.feed_values(v)).collect();
        let weights: Vec<U256> =
            voters.iter().map(|v| data.voters_weights.get(v).copied().unwrap_or_default()).collect();

        data.feed_order
            .iter()
            .enumerate()
            .map(|(feed_index, feed)| {
                let feed_values: Vec<Option<i64>> = values.iter().map(|v| v[feed_index]).collect();
                let entries: Vec<(i64, U256)> = feed_values
                    .iter()
                    .zip(&weights)
                    .filter_map(|(value, weight)| value.map(|v| (v, *weight)))
                    .collect();
                MedianCalculationResult {
                    voting_round_id: data.voting_round_id,
                    feed: *feed,
                    voters: voters.clone(),
                    feed_values,
                    weights: weights.clone(),
                    summary: Self::summarize(&entries),
                }
            })
            .collect()
    }
}

/// Sums the reveal randoms of voters outside the benching window.
#[derive(Debug, Clone, Copy)]
pub struct CommitRevealRandomCalculator {
    pub non_benched_random_voters_min_count: usize,
}

impl RandomCalculator for CommitRevealRandomCalculator {
    fn calculate_random(&self, data: &DataForCalculations) -> RandomCalculationResult {
        let benched = &data.benching_window_reveal_offenders;
        let mut sum = U256::ZERO;
        let mut count = 0usize;
        for (address, reveal) in &data.valid_eligible_reveals {
            if benched.contains(address) {
                continue;
            }
            sum = sum.wrapping_add(U256::from_be_bytes(reveal.random.0));
            count += 1;
        }
        let non_benched_offenders = data.reveal_offenders.iter().any(|a| !benched.contains(a));
        let random = U256::from_be_bytes(
            keccak256((sum, U256::from(data.voting_round_id)).abi_encode_params()).0,
        );
        RandomCalculationResult {
            voting_round_id: data.voting_round_id,
            random,
            is_secure: !non_benched_offenders && count >= self.non_benched_random_voters_min_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use alloy_primitives::B256;

    use super::*;
    use crate::encoding::{encode_feed_values, RevealData};

    fn w(v: u64) -> U256 {
        U256::from(v)
    }

    #[test]
    fn weighted_median_and_quartiles() {
        let summary = WeightedMedianCalculator::summarize(&[
            (50, w(1)),
            (10, w(1)),
            (40, w(1)),
            (20, w(1)),
            (30, w(1)),
        ])
        .unwrap();
        assert_eq!((summary.quartile1, summary.median, summary.quartile3), (20, 30, 40));

        // A heavy voter pulls the median.
        let summary = WeightedMedianCalculator::summarize(&[(10, w(1)), (20, w(1)), (90, w(5))]).unwrap();
        assert_eq!(summary.median, 90);
        assert_eq!(summary.participating_weight, w(7));
    }

    #[test]
    fn exact_half_split_averages_neighbours() {
        let summary = WeightedMedianCalculator::summarize(&[(10, w(2)), (21, w(2))]).unwrap();
        assert_eq!(summary.median, 15);
    }

    #[test]
    fn zero_weight_or_no_values_is_empty() {
        assert!(WeightedMedianCalculator::summarize(&[]).is_none());
        assert!(WeightedMedianCalculator::summarize(&[(5, U256::ZERO)]).is_none());
    }

    fn data(reveals: &[(u8, u8)], offenders: &[u8], benched: &[u8]) -> DataForCalculations {
        let addr = Address::repeat_byte;
        DataForCalculations {
            reward_epoch_id: 1,
            voting_round_id: 17,
            ordered_voters_submit_addresses: reveals.iter().map(|(a, _)| addr(*a)).collect(),
            valid_eligible_reveals: reveals
                .iter()
                .map(|(a, r)| {
                    (addr(*a), RevealData { random: B256::repeat_byte(*r), encoded_values: encode_feed_values(&[]) })
                })
                .collect::<BTreeMap<_, _>>(),
            reveal_offenders: offenders.iter().map(|a| addr(*a)).collect(),
            voters_weights: BTreeMap::new(),
            feed_order: vec![],
            benching_window_reveal_offenders: benched.iter().map(|a| addr(*a)).collect::<BTreeSet<_>>(),
        }
    }

    #[test]
    fn random_is_secure_only_without_fresh_offenders() {
        let calculator = CommitRevealRandomCalculator { non_benched_random_voters_min_count: 2 };
        let secure = calculator.calculate_random(&data(&[(1, 1), (2, 2)], &[], &[]));
        assert!(secure.is_secure);

        let offended = calculator.calculate_random(&data(&[(1, 1), (2, 2)], &[3], &[3]));
        assert!(offended.is_secure, "benched offenders do not break the random");
        assert_eq!(offended.random, secure.random);

        assert!(!calculator.calculate_random(&data(&[(1, 1), (2, 2)], &[3], &[])).is_secure);
        assert!(!calculator.calculate_random(&data(&[(1, 1), (2, 2)], &[], &[2])).is_secure);
    }
}
