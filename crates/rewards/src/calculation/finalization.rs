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

//! Rewards for finalizing the round's result through the relay.

use std::collections::BTreeSet;

use alloy_primitives::{keccak256, Address, U256};
use alloy_sol_types::SolValue;

use crate::{
    calculation::{claim_back, ensure_fully_allocated, signing_weight_based_claims},
    claims::{ClaimType, PartialRewardClaim},
    config::{NetworkConfig, TOTAL_BIPS},
    data::DataForRewardCalculation,
    epoch::RewardEpoch,
    errors::InvariantViolation,
    offers::PartialRewardOffer,
};

/// Signing addresses pre-selected to finalize a voting round.
///
/// Starting from `keccak256(abi.encode(uint256 seed, uint256 protocolId, uint256 votingRoundId))`,
/// voters are drawn at `hash mod voterCount`, re-hashing after each draw, until the selected
/// signing policy weight reaches `threshold_bips` of the total.
pub fn select_finalizers(
    epoch: &RewardEpoch,
    protocol_id: u8,
    voting_round_id: u32,
    threshold_bips: u64,
) -> BTreeSet<Address> {
    let policy = epoch.signing_policy();
    let voters = &policy.voters;
    let mut selected = BTreeSet::new();
    if voters.is_empty() {
        return selected;
    }
    let threshold = policy.total_weight() * threshold_bips / TOTAL_BIPS;
    let mut seed = keccak256(
        (policy.seed, U256::from(protocol_id), U256::from(voting_round_id)).abi_encode_params(),
    );
    let mut weight = 0u64;
    loop {
        let index = (U256::from_be_bytes(seed.0) % U256::from(voters.len())).to::<usize>();
        if selected.insert(voters[index]) {
            weight += policy.weights[index] as u64;
        }
        if weight >= threshold || selected.len() == voters.len() {
            break;
        }
        seed = keccak256(seed);
    }
    selected
}

/// Finalization rewards of one offer.
///
/// Nobody finalizing claims the offer back. A first successful finalization after the grace
/// period earns its sender the whole offer. Otherwise pre-selected voters that finalized within
/// the grace period share the offer by signing weight relative to all selected voters, and the
/// shares of selected voters that did not finalize are claimed back.
pub fn calculate_finalization_reward_claims(
    offer: &PartialRewardOffer,
    data: &DataForRewardCalculation,
    epoch: &RewardEpoch,
    config: &NetworkConfig,
) -> Result<Vec<PartialRewardClaim>, InvariantViolation> {
    let voting_round_id = offer.voting_round_id;
    let Some(first) = &data.first_successful_finalization else {
        return Ok(claim_back(offer, "no finalization"));
    };
    let grace_deadline = config.epoch_settings.reveal_deadline_sec(voting_round_id + 1)
        + config.rewards.grace_period_for_finalization_duration_sec;
    if first.submission.timestamp > grace_deadline {
        tracing::debug!(voting_round_id, finalizer = %first.submission.submit_address, "Late finalization takes the whole offer");
        if offer.amount.is_zero() {
            return Ok(vec![]);
        }
        return Ok(vec![PartialRewardClaim::reward(first.submission.submit_address, offer.amount, ClaimType::Direct)
            .with_info("late finalization")]);
    }

    let selected = select_finalizers(
        epoch,
        config.protocol_id,
        voting_round_id,
        config.rewards.finalization_voter_selection_threshold_weight_bips,
    );
    let selected_weight = selected
        .iter()
        .filter_map(|a| epoch.voter_for_signing_address(a))
        .fold(U256::ZERO, |acc, v| acc + v.signing_weight());

    let mut claims = Vec::new();
    let mut paid = U256::ZERO;
    if !selected_weight.is_zero() {
        for finalization in &data.finalizations {
            let sender = finalization.submission.submit_address;
            if !finalization.successful_on_chain
                || finalization.submission.timestamp > grace_deadline
                || !selected.contains(&sender)
            {
                continue;
            }
            let Some(voter) = epoch.voter_for_signing_address(&sender) else { continue };
            let amount = offer.amount * voter.signing_weight() / selected_weight;
            if amount.is_zero() {
                continue;
            }
            paid += amount;
            claims.extend(signing_weight_based_claims(voter, amount, config.rewards.capped_staking_fee_bips)?);
        }
    }
    if paid < offer.amount {
        claims.push(
            PartialRewardClaim::reward(offer.claim_back_address, offer.amount - paid, ClaimType::Direct)
                .with_info("unclaimed finalization"),
        );
    }
    ensure_fully_allocated("finalization rewards", offer.amount, &claims)?;
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{I256, B256};

    use super::*;
    use crate::test_utils::EpochFixture;

    #[test]
    fn selection_reaches_threshold_deterministically() {
        let fixture = EpochFixture::new(8);
        let epoch = fixture.reward_epoch();
        let policy = epoch.signing_policy();
        for round in 0..20 {
            let selected = select_finalizers(&epoch, 100, round, 500);
            assert_eq!(selected, select_finalizers(&epoch, 100, round, 500));
            let weight: u64 = policy
                .voters
                .iter()
                .zip(&policy.weights)
                .filter(|(v, _)| selected.contains(*v))
                .map(|(_, w)| *w as u64)
                .sum();
            assert!(weight * TOTAL_BIPS >= policy.total_weight() * 500);
        }
        assert_eq!(select_finalizers(&epoch, 100, 3, TOTAL_BIPS).len(), 8);
    }

    #[test]
    fn no_finalization_claims_back() {
        let fixture = EpochFixture::new(3);
        let epoch = fixture.reward_epoch();
        let round = epoch.start_voting_round_id();
        let data = fixture.empty_reward_data(round);
        let offer = fixture.round_offer(round, 0, U256::from(5_000));
        let claims = calculate_finalization_reward_claims(&offer, &data, &epoch, &fixture.config).unwrap();
        assert_eq!(
            claims,
            vec![PartialRewardClaim::reward(offer.claim_back_address, offer.amount, ClaimType::Direct)
                .with_info("no finalization")]
        );
    }

    #[test]
    fn late_single_finalizer_takes_everything() {
        let fixture = EpochFixture::new(3);
        let epoch = fixture.reward_epoch();
        let round = epoch.start_voting_round_id();
        let mut data = fixture.empty_reward_data(round);
        let message = fixture.protocol_message(round, B256::repeat_byte(1));
        let grace = fixture.config.rewards.grace_period_for_finalization_duration_sec;
        fixture.add_finalization(&mut data, 2, &message, &[0, 1, 2], grace + 1);
        let offer = fixture.round_offer(round, 0, U256::from(5_000));
        let claims = calculate_finalization_reward_claims(&offer, &data, &epoch, &fixture.config).unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].beneficiary, fixture.voters[2].signing_address());
        assert_eq!(claims[0].amount, I256::from_raw(offer.amount));
    }

    #[test]
    fn selected_finalizers_in_grace_share_by_weight() {
        let fixture = EpochFixture::new(6);
        let epoch = fixture.reward_epoch();
        let round = epoch.start_voting_round_id();
        let selected = select_finalizers(
            &epoch,
            fixture.config.protocol_id,
            round,
            fixture.config.rewards.finalization_voter_selection_threshold_weight_bips,
        );
        let mut data = fixture.empty_reward_data(round);
        let message = fixture.protocol_message(round, B256::repeat_byte(1));
        let all: Vec<usize> = (0..6).collect();
        for i in 0..6 {
            fixture.add_finalization(&mut data, i, &message, &all, 1 + i as u64 % 2);
        }
        let offer = fixture.round_offer(round, 0, U256::from(1_000_003));
        let claims = calculate_finalization_reward_claims(&offer, &data, &epoch, &fixture.config).unwrap();
        ensure_fully_allocated("test", offer.amount, &claims).unwrap();
        for voter in &fixture.voters {
            let rewarded = claims.iter().any(|c| c.beneficiary == voter.delegation);
            assert_eq!(rewarded, selected.contains(&voter.signing_address()));
        }
    }
}
