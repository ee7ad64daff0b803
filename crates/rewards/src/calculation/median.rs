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

//! Rewards for closeness to the median.

use alloy_primitives::{keccak256, Address, U256};
use alloy_sol_types::SolValue;

use crate::{
    calculation::{claim_back, delegation_claims, distribute_by_weight, ensure_fully_allocated},
    claims::PartialRewardClaim,
    config::{TOTAL_BIPS, TOTAL_PPM},
    epoch::{FeedId, RewardEpoch},
    errors::InvariantViolation,
    median::{MedianCalculationResult, MedianSummary},
    offers::PartialRewardOffer,
};

/// Pseudo-random coin flip deciding whether a value exactly on a quartile counts as inside the
/// interquartile range: `keccak256(abi.encode(bytes21 feedId, uint256 votingRoundId, address voter)) mod 2 == 1`.
pub fn iqr_tie_break(feed_id: FeedId, voting_round_id: u32, voter: Address) -> bool {
    let hash = keccak256((feed_id, U256::from(voting_round_id), voter).abi_encode_params());
    hash.0[31] & 1 == 1
}

/// Strictly between the quartiles, or on a quartile and winning the tie-break.
pub fn is_in_iqr_band(
    value: i64,
    summary: &MedianSummary,
    feed_id: FeedId,
    voting_round_id: u32,
    voter: Address,
) -> bool {
    if value > summary.quartile1 && value < summary.quartile3 {
        return true;
    }
    (value == summary.quartile1 || value == summary.quartile3)
        && iqr_tie_break(feed_id, voting_round_id, voter)
}

/// Strictly within `secondary_band_width_ppm` of the median, relative to the median's magnitude.
pub fn is_in_pct_band(value: i64, summary: &MedianSummary, secondary_band_width_ppm: u32) -> bool {
    let median = summary.median as i128;
    let diff = median.abs() * secondary_band_width_ppm as i128 / TOTAL_PPM as i128;
    let value = value as i128;
    value > median - diff && value < median + diff
}

/// Median closeness rewards of one feed offer.
///
/// Without a median or with too little participating weight the offer is claimed back.
/// Otherwise voters earn weight for being in the IQR band and in the secondary band, mixed by
/// `primary_band_reward_share_ppm`, and the offer is distributed over that weight.
pub fn calculate_median_reward_claims(
    offer: &PartialRewardOffer,
    result: &MedianCalculationResult,
    epoch: &RewardEpoch,
) -> Result<Vec<PartialRewardClaim>, InvariantViolation> {
    let voting_round_id = offer.voting_round_id;
    let Some(summary) = result.summary else {
        tracing::debug!(voting_round_id, feed = %offer.feed_id, "No median, claiming back");
        return Ok(claim_back(offer, "no median"));
    };
    let total_weight = result.weights.iter().fold(U256::ZERO, |acc, w| acc + w);
    if summary.participating_weight * U256::from(TOTAL_BIPS)
        < total_weight * U256::from(offer.min_rewarded_turnout_bips)
    {
        tracing::debug!(voting_round_id, feed = %offer.feed_id, "Turnout too low, claiming back");
        return Ok(claim_back(offer, "low turnout"));
    }

    let primary_share = U256::from(offer.primary_band_reward_share_ppm);
    let secondary_share = U256::from(TOTAL_PPM.saturating_sub(offer.primary_band_reward_share_ppm as u64));
    let mut rewarded = Vec::new();
    let mut weights = Vec::new();
    for ((voter, value), weight) in result.voters.iter().zip(&result.feed_values).zip(&result.weights) {
        let Some(value) = value else { continue };
        let mut reward_weight = U256::ZERO;
        if is_in_iqr_band(*value, &summary, offer.feed_id, voting_round_id, *voter) {
            reward_weight += primary_share * weight;
        }
        if is_in_pct_band(*value, &summary, offer.secondary_band_width_ppm) {
            reward_weight += secondary_share * weight;
        }
        rewarded.push(*voter);
        weights.push(reward_weight);
    }

    let Some(amounts) = distribute_by_weight(offer.amount, &weights, "median rewards")? else {
        return Ok(claim_back(offer, "no rewarded weight"));
    };
    let mut claims = Vec::new();
    for (voter, amount) in rewarded.iter().zip(amounts) {
        if amount.is_zero() {
            continue;
        }
        match epoch.voter_for_submit_address(voter) {
            Some(weights) => claims.extend(delegation_claims(weights, amount)),
            None => {
                return Err(InvariantViolation::InvalidParameter(format!(
                    "median result voter {voter} is not registered in reward epoch {}",
                    epoch.reward_epoch_id()
                )))
            }
        }
    }
    ensure_fully_allocated("median rewards", offer.amount, &claims)?;
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        claims::ClaimType,
        median::{MedianCalculator, WeightedMedianCalculator},
        test_utils::EpochFixture,
    };

    fn summary(q1: i64, median: i64, q3: i64) -> MedianSummary {
        MedianSummary { median, quartile1: q1, quartile3: q3, participating_weight: U256::from(1) }
    }

    #[test]
    fn tie_break_is_deterministic() {
        let feed = FeedId::repeat_byte(7);
        let voter = Address::repeat_byte(9);
        let first = iqr_tie_break(feed, 1234, voter);
        for _ in 0..10 {
            assert_eq!(iqr_tie_break(feed, 1234, voter), first);
        }
        // Over many voters both outcomes occur.
        let outcomes: std::collections::BTreeSet<bool> =
            (0..32u8).map(|b| iqr_tie_break(feed, 1234, Address::repeat_byte(b))).collect();
        assert_eq!(outcomes.len(), 2);
    }

    #[test]
    fn band_membership() {
        let s = summary(90, 100, 110);
        let feed = FeedId::ZERO;
        assert!(is_in_iqr_band(100, &s, feed, 1, Address::ZERO));
        assert!(!is_in_iqr_band(111, &s, feed, 1, Address::ZERO));
        assert_eq!(
            is_in_iqr_band(90, &s, feed, 1, Address::ZERO),
            iqr_tie_break(feed, 1, Address::ZERO)
        );
        // 5% band around 100 is (95, 105), exclusive.
        assert!(is_in_pct_band(104, &s, 50_000));
        assert!(!is_in_pct_band(105, &s, 50_000));
        assert!(is_in_pct_band(-104, &summary(-110, -100, -90), 50_000));
    }

    #[test]
    fn insufficient_turnout_claims_back_everything() {
        let fixture = EpochFixture::new(5);
        let epoch = fixture.reward_epoch();
        let mut data = fixture.empty_data_for_calculations(epoch.start_voting_round_id());
        // Two of five equally weighted voters reveal: 40% turnout.
        fixture.add_valid_reveal(&mut data, 0, &[Some(100), Some(100), Some(100)]);
        fixture.add_valid_reveal(&mut data, 1, &[Some(101), Some(101), Some(101)]);
        let medians = WeightedMedianCalculator.calculate_medians(&data);

        let mut offer = fixture.round_offer(data.voting_round_id, 0, U256::from(1_000_000));
        offer.min_rewarded_turnout_bips = 5_000;
        let claims = calculate_median_reward_claims(&offer, &medians[0], &epoch).unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].beneficiary, offer.claim_back_address);
        assert_eq!(claims[0].claim_type, ClaimType::Direct);
        assert_eq!(claims[0].amount.into_raw(), offer.amount);

        offer.min_rewarded_turnout_bips = 4_000;
        let claims = calculate_median_reward_claims(&offer, &medians[0], &epoch).unwrap();
        assert!(claims.iter().all(|c| c.beneficiary != offer.claim_back_address));
        ensure_fully_allocated("test", offer.amount, &claims).unwrap();
    }

    #[test]
    fn outliers_earn_nothing() {
        let fixture = EpochFixture::new(5);
        let epoch = fixture.reward_epoch();
        let mut data = fixture.empty_data_for_calculations(epoch.start_voting_round_id());
        for (i, v) in [100, 101, 102, 103, 500].into_iter().enumerate() {
            fixture.add_valid_reveal(&mut data, i, &[Some(v), Some(v), Some(v)]);
        }
        let medians = WeightedMedianCalculator.calculate_medians(&data);
        let offer = fixture.round_offer(data.voting_round_id, 0, U256::from(999_999));
        let claims = calculate_median_reward_claims(&offer, &medians[0], &epoch).unwrap();
        ensure_fully_allocated("test", offer.amount, &claims).unwrap();
        let outlier = fixture.voters[4].delegation;
        assert!(claims.iter().all(|c| c.beneficiary != outlier));
        let median_voter = fixture.voters[2].delegation;
        assert!(claims.iter().any(|c| c.beneficiary == median_voter));
    }
}
