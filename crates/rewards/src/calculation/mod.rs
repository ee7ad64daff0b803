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

//! Claim calculation for one voting round.
//!
//! Every offer is split into median, signing and finalization parts. Each part is distributed
//! by its own algorithm, and every distribution must pay out its input amount exactly. Reveal
//! and double-signing offenders are penalized against the full offer.

mod finalization;
mod median;
mod penalties;
mod signing;
mod voter_claims;

use alloy_primitives::{I256, U256};

pub use finalization::{calculate_finalization_reward_claims, select_finalizers};
pub use median::{calculate_median_reward_claims, is_in_iqr_band, is_in_pct_band, iqr_tie_break};
pub use penalties::calculate_penalty_claims;
pub use signing::{calculate_signing_reward_claims, double_signers};
pub use voter_claims::{delegation_claims, signing_weight_based_claims};

use crate::{
    claims::{merge_claims, total_amount, ClaimType, PartialRewardClaim},
    config::NetworkConfig,
    data::DataForRewardCalculation,
    epoch::RewardEpoch,
    errors::InvariantViolation,
    median::MedianCalculationResult,
    offers::{split_offer, PartialRewardOffer},
};

/// Distribute `amount` proportionally to `weights` by double-declining balance: each share is
/// `weight * remaining_amount / remaining_weight`, after which both remainders shrink. The last
/// weighted entry takes whatever is left, so the shares always add up to `amount`.
///
/// Returns `None` when the total weight is zero.
pub fn distribute_by_weight(
    amount: U256,
    weights: &[U256],
    context: &'static str,
) -> Result<Option<Vec<U256>>, InvariantViolation> {
    let mut remaining_weight = weights.iter().fold(U256::ZERO, |acc, w| acc + w);
    if remaining_weight.is_zero() {
        return Ok(None);
    }
    let mut remaining_amount = amount;
    let mut shares = Vec::with_capacity(weights.len());
    for weight in weights {
        let share = if remaining_weight.is_zero() {
            U256::ZERO
        } else {
            *weight * remaining_amount / remaining_weight
        };
        remaining_amount -= share;
        remaining_weight -= *weight;
        shares.push(share);
    }
    if !remaining_amount.is_zero() {
        return Err(InvariantViolation::UnallocatedAmount {
            context,
            amount,
            residual: I256::from_raw(remaining_amount),
        });
    }
    Ok(Some(shares))
}

/// Fail unless `claims` add up to exactly `amount`.
pub fn ensure_fully_allocated(
    context: &'static str,
    amount: U256,
    claims: &[PartialRewardClaim],
) -> Result<(), InvariantViolation> {
    let residual = I256::from_raw(amount) - total_amount(claims);
    if !residual.is_zero() {
        return Err(InvariantViolation::UnallocatedAmount { context, amount, residual });
    }
    Ok(())
}

/// The whole amount back to the offer's claim-back address.
pub(crate) fn claim_back(offer: &PartialRewardOffer, info: &str) -> Vec<PartialRewardClaim> {
    if offer.amount.is_zero() {
        return vec![];
    }
    vec![PartialRewardClaim::reward(offer.claim_back_address, offer.amount, ClaimType::Direct).with_info(info)]
}

/// All claims of one voting round, merged.
///
/// `medians` must hold the median result of every feed in `offers`.
pub fn calculate_round_claims(
    epoch: &RewardEpoch,
    data: &DataForRewardCalculation,
    medians: &[MedianCalculationResult],
    offers: &[PartialRewardOffer],
    config: &NetworkConfig,
) -> anyhow::Result<Vec<PartialRewardClaim>> {
    let voting_round_id = data.data_for_calculations.voting_round_id;
    let settings = &config.rewards;
    let double_signers = double_signers(data, &config.epoch_settings);
    if !double_signers.is_empty() {
        tracing::info!(voting_round_id, count = double_signers.len(), "Double signers in round");
    }

    let mut claims = Vec::new();
    for offer in offers {
        anyhow::ensure!(
            offer.voting_round_id == voting_round_id,
            "offer for round {} passed to calculation of round {voting_round_id}",
            offer.voting_round_id
        );
        if offer.should_be_burned {
            claims.push(
                PartialRewardClaim::reward(settings.burn_address, offer.amount, ClaimType::Direct)
                    .with_info("no secure random"),
            );
            continue;
        }
        let split = split_offer(offer, settings);
        let median = medians
            .iter()
            .find(|m| m.feed.id == offer.feed_id)
            .ok_or_else(|| anyhow::anyhow!("no median result for feed {} in round {voting_round_id}", offer.feed_id))?;

        let median_claims = calculate_median_reward_claims(&split.median, median, epoch)?;
        let signing_claims =
            calculate_signing_reward_claims(&split.signing, data, epoch, config, &double_signers)?;
        let finalization_claims = calculate_finalization_reward_claims(&split.finalization, data, epoch, config)?;
        let offer_claims = [median_claims, signing_claims, finalization_claims].concat();
        ensure_fully_allocated("offer", offer.amount, &offer_claims)?;

        let reveal_penalties = calculate_penalty_claims(
            offer.amount,
            data.data_for_calculations.reveal_offenders.iter().filter_map(|a| epoch.voter_for_submit_address(a)),
            epoch,
            settings,
            "reveal offender",
        )?;
        let signing_penalties = calculate_penalty_claims(
            offer.amount,
            double_signers.iter().filter_map(|a| epoch.voter_for_signing_address(a)),
            epoch,
            settings,
            "double signer",
        )?;
        claims.extend(offer_claims);
        claims.extend(reveal_penalties);
        claims.extend(signing_penalties);
    }

    let claims: Vec<_> = claims.into_iter().map(|c| c.with_round(voting_round_id)).collect();
    Ok(merge_claims(&claims))
}
