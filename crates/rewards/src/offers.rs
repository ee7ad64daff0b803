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

//! Slicing of epoch reward offers into per-voting-round, per-feed offers.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::{
    calculation::distribute_by_weight,
    config::{RewardSettings, TOTAL_BIPS},
    epoch::{FeedId, RewardEpoch, RewardOffer},
    errors::InvariantViolation,
    serde_utils::u256_dec,
};

/// The share of a reward offer paid out for one feed in one voting round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialRewardOffer {
    pub reward_epoch_id: u32,
    pub voting_round_id: u32,
    pub feed_id: FeedId,
    pub decimals: i8,
    #[serde(with = "u256_dec")]
    pub amount: U256,
    #[serde(rename = "minRewardedTurnoutBIPS")]
    pub min_rewarded_turnout_bips: u16,
    #[serde(rename = "primaryBandRewardSharePPM")]
    pub primary_band_reward_share_ppm: u32,
    #[serde(rename = "secondaryBandWidthPPM")]
    pub secondary_band_width_ppm: u32,
    pub claim_back_address: Address,
    /// No secure random was available to select a feed; the whole amount is burned.
    #[serde(default)]
    pub should_be_burned: bool,
}

impl PartialRewardOffer {
    fn from_epoch_offer(offer: &RewardOffer, voting_round_id: u32, amount: U256) -> Self {
        Self {
            reward_epoch_id: offer.reward_epoch_id,
            voting_round_id,
            feed_id: offer.feed_id,
            decimals: offer.decimals,
            amount,
            min_rewarded_turnout_bips: offer.min_rewarded_turnout_bips,
            primary_band_reward_share_ppm: offer.primary_band_reward_share_ppm,
            secondary_band_width_ppm: offer.secondary_band_width_ppm,
            claim_back_address: offer.claim_back_address,
            should_be_burned: false,
        }
    }

    fn with_amount(&self, amount: U256) -> Self {
        Self { amount, ..self.clone() }
    }
}

/// An offer split between the three reward kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitRewardOffer {
    pub median: PartialRewardOffer,
    pub signing: PartialRewardOffer,
    pub finalization: PartialRewardOffer,
}

/// Split by the configured signing and finalization shares; the median share takes the rest.
pub fn split_offer(offer: &PartialRewardOffer, settings: &RewardSettings) -> SplitRewardOffer {
    let signing = offer.amount * U256::from(settings.signing_bips) / U256::from(TOTAL_BIPS);
    let finalization = offer.amount * U256::from(settings.finalization_bips) / U256::from(TOTAL_BIPS);
    let median = offer.amount - signing - finalization;
    SplitRewardOffer {
        median: offer.with_amount(median),
        signing: offer.with_amount(signing),
        finalization: offer.with_amount(finalization),
    }
}

/// Share of `amount` falling on the `index`-th of `parts` equal parts; the remainder goes one
/// unit each to the first parts.
pub fn granulated_amount(amount: U256, parts: u32, index: u32) -> U256 {
    if parts == 0 {
        return U256::ZERO;
    }
    let parts_u = U256::from(parts);
    let base = amount / parts_u;
    if U256::from(index) < amount % parts_u {
        base + U256::from(1)
    } else {
        base
    }
}

/// Offers to reward in `voting_round_id` of a reward epoch spanning
/// `[start_voting_round_id, end_voting_round_id]`.
///
/// With random feed selection the whole round budget goes to one feed picked by
/// `next_secure_random mod feedCount`. Without a secure random, the budget is marked to be burned.
pub fn offers_for_round(
    epoch: &RewardEpoch,
    start_voting_round_id: u32,
    end_voting_round_id: u32,
    voting_round_id: u32,
    next_secure_random: Option<U256>,
    settings: &RewardSettings,
) -> Result<Vec<PartialRewardOffer>, InvariantViolation> {
    if voting_round_id < start_voting_round_id || voting_round_id > end_voting_round_id {
        return Err(InvariantViolation::InvalidParameter(format!(
            "voting round {voting_round_id} outside reward epoch range [{start_voting_round_id}, {end_voting_round_id}]"
        )));
    }
    let parts = end_voting_round_id - start_voting_round_id + 1;
    let index = voting_round_id - start_voting_round_id;
    let offers = epoch.offers();

    if !settings.random_feed_selection {
        return Ok(offers
            .iter()
            .map(|o| PartialRewardOffer::from_epoch_offer(o, voting_round_id, granulated_amount(o.amount, parts, index)))
            .filter(|o| !o.amount.is_zero())
            .collect());
    }

    let feeds = epoch.canonical_feed_order();
    let total = offers.iter().fold(U256::ZERO, |acc, o| acc + o.amount);
    let budget = granulated_amount(total, parts, index);
    if feeds.is_empty() || budget.is_zero() {
        return Ok(vec![]);
    }

    let Some(random) = next_secure_random else {
        let feed = &feeds[0];
        return Ok(vec![PartialRewardOffer {
            reward_epoch_id: epoch.reward_epoch_id(),
            voting_round_id,
            feed_id: feed.id,
            decimals: feed.decimals,
            amount: budget,
            min_rewarded_turnout_bips: 0,
            primary_band_reward_share_ppm: 0,
            secondary_band_width_ppm: 0,
            claim_back_address: settings.burn_address,
            should_be_burned: true,
        }]);
    };

    let selected = feeds[(random % U256::from(feeds.len())).to::<usize>()].id;
    let feed_offers: Vec<&RewardOffer> = offers.iter().filter(|o| o.feed_id == selected).collect();
    let weights: Vec<U256> = feed_offers.iter().map(|o| o.amount).collect();
    let Some(amounts) = distribute_by_weight(budget, &weights, "random feed selection")? else {
        return Ok(vec![]);
    };
    Ok(feed_offers
        .into_iter()
        .zip(amounts)
        .map(|(o, amount)| PartialRewardOffer::from_epoch_offer(o, voting_round_id, amount))
        .collect())
}

/// Offers of every voting round in the range, in round order.
pub fn granulate_offers(
    epoch: &RewardEpoch,
    start_voting_round_id: u32,
    end_voting_round_id: u32,
    next_secure_randoms: impl Fn(u32) -> Option<U256>,
    settings: &RewardSettings,
) -> Result<Vec<(u32, Vec<PartialRewardOffer>)>, InvariantViolation> {
    (start_voting_round_id..=end_voting_round_id)
        .map(|round| {
            offers_for_round(
                epoch,
                start_voting_round_id,
                end_voting_round_id,
                round,
                next_secure_randoms(round),
                settings,
            )
            .map(|offers| (round, offers))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::EpochFixture;

    fn total(offers: &[PartialRewardOffer]) -> U256 {
        offers.iter().fold(U256::ZERO, |acc, o| acc + o.amount)
    }

    #[test]
    fn granulation_conserves_amount() {
        let amount = U256::from(1_003);
        let parts: Vec<_> = (0..10).map(|i| granulated_amount(amount, 10, i)).collect();
        assert_eq!(parts.iter().fold(U256::ZERO, |a, b| a + b), amount);
        assert_eq!(parts[0], U256::from(101));
        assert_eq!(parts[3], U256::from(100));
    }

    #[test]
    fn split_leaves_remainder_to_median() {
        let fixture = EpochFixture::new(2);
        let epoch = fixture.reward_epoch();
        let offer = PartialRewardOffer::from_epoch_offer(&epoch.offers()[0], 5, U256::from(999));
        let split = split_offer(&offer, &fixture.config.rewards);
        assert_eq!(split.signing.amount, U256::from(99));
        assert_eq!(split.finalization.amount, U256::from(99));
        assert_eq!(split.median.amount, U256::from(801));
    }

    #[test]
    fn random_feed_selection_picks_one_feed_and_conserves_budget() {
        let fixture = EpochFixture::new(2);
        let epoch = fixture.reward_epoch();
        let settings = &fixture.config.rewards;
        let start = epoch.start_voting_round_id();
        let end = start + 9;
        let epoch_total = epoch.offers().iter().fold(U256::ZERO, |acc, o| acc + o.amount);

        let mut sum = U256::ZERO;
        for round in start..=end {
            let random = U256::from(round) * U256::from(7919);
            let offers = offers_for_round(&epoch, start, end, round, Some(random), settings).unwrap();
            let expected_feed = epoch.canonical_feed_order()
                [(random % U256::from(epoch.canonical_feed_order().len())).to::<usize>()]
            .id;
            assert!(offers.iter().all(|o| o.feed_id == expected_feed && !o.should_be_burned));
            sum += total(&offers);
        }
        assert_eq!(sum, epoch_total);
    }

    #[test]
    fn missing_random_burns_round_budget() {
        let fixture = EpochFixture::new(2);
        let epoch = fixture.reward_epoch();
        let start = epoch.start_voting_round_id();
        let offers = offers_for_round(&epoch, start, start + 9, start, None, &fixture.config.rewards).unwrap();
        assert_eq!(offers.len(), 1);
        assert!(offers[0].should_be_burned);
        assert_eq!(offers[0].claim_back_address, fixture.config.rewards.burn_address);
    }

    #[test]
    fn rounds_outside_epoch_are_rejected() {
        let fixture = EpochFixture::new(2);
        let epoch = fixture.reward_epoch();
        let start = epoch.start_voting_round_id();
        assert!(matches!(
            offers_for_round(&epoch, start, start + 9, start + 10, None, &fixture.config.rewards),
            Err(InvariantViolation::InvalidParameter(_))
        ));
    }
}
