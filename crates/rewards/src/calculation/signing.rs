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

//! Rewards for signing the round's result.

use std::collections::{BTreeMap, BTreeSet};

use alloy_primitives::{Address, B256, U256};

use crate::{
    calculation::{claim_back, distribute_by_weight, ensure_fully_allocated, signing_weight_based_claims},
    claims::PartialRewardClaim,
    config::{EpochSettings, NetworkConfig, TOTAL_BIPS},
    data::{DataForRewardCalculation, WRONG_SIGNATURE_INDICATOR_MESSAGE_HASH},
    encoding::SignaturePayload,
    epoch::RewardEpoch,
    errors::InvariantViolation,
    ledger::SubmissionData,
    offers::PartialRewardOffer,
};

/// Signing addresses that signed more than one message hash for the round before the end of
/// the following voting epoch.
pub fn double_signers(data: &DataForRewardCalculation, epochs: &EpochSettings) -> BTreeSet<Address> {
    let voting_round_id = data.data_for_calculations.voting_round_id;
    let deadline = epochs.voting_epoch_end_sec(voting_round_id + 1);
    let mut hashes_by_signer: BTreeMap<Address, BTreeSet<B256>> = BTreeMap::new();
    for (hash, signatures) in &data.signatures {
        for signature in signatures.iter().filter(|s| s.timestamp <= deadline) {
            if let Some(signer) = signature.messages.signer {
                hashes_by_signer.entry(signer).or_default().insert(*hash);
            }
        }
    }
    hashes_by_signer
        .into_iter()
        .filter(|(_, hashes)| hashes.len() > 1)
        .map(|(signer, _)| signer)
        .collect()
}

/// The hash with the most signing policy weight signed before `deadline`, ties going to the
/// smallest hash.
fn dominant_hash(data: &DataForRewardCalculation, deadline: u64) -> Option<(B256, u64)> {
    let mut best: Option<(B256, u64)> = None;
    for (hash, signatures) in &data.signatures {
        if *hash == *WRONG_SIGNATURE_INDICATOR_MESSAGE_HASH {
            continue;
        }
        let weight: u64 = signatures
            .iter()
            .filter(|s| s.timestamp <= deadline)
            .map(|s| s.messages.weight.unwrap_or_default() as u64)
            .sum();
        if weight > 0 && best.is_none_or(|(_, w)| weight > w) {
            best = Some((*hash, weight));
        }
    }
    best
}

/// Signing rewards of one offer.
///
/// With a successful finalization, signers of the finalized hash are rewarded if they signed
/// within the signature grace period, or at any time before both the finalization and the end
/// of the following voting epoch. Without one, signers of the dominant hash are rewarded
/// provided it gathered the minimal non-consensus weight. Double signers earn nothing.
pub fn calculate_signing_reward_claims(
    offer: &PartialRewardOffer,
    data: &DataForRewardCalculation,
    epoch: &RewardEpoch,
    config: &NetworkConfig,
    double_signers: &BTreeSet<Address>,
) -> Result<Vec<PartialRewardClaim>, InvariantViolation> {
    let voting_round_id = offer.voting_round_id;
    let epochs = &config.epoch_settings;
    let settings = &config.rewards;
    let epoch_deadline = epochs.voting_epoch_end_sec(voting_round_id + 1);

    let eligible: Vec<&SubmissionData<SignaturePayload>> = match &data.first_successful_finalization {
        Some(finalization) => {
            let hash = finalization.submission.messages.protocol_message_merkle_root.hash();
            let grace_deadline =
                epochs.reveal_deadline_sec(voting_round_id + 1) + settings.grace_period_for_signatures_duration_sec;
            let late_deadline = finalization.submission.timestamp.min(epoch_deadline);
            data.signatures
                .get(&hash)
                .map(|signatures| {
                    signatures
                        .iter()
                        .filter(|s| s.timestamp <= grace_deadline || s.timestamp <= late_deadline)
                        .collect()
                })
                .unwrap_or_default()
        }
        None => {
            let Some((hash, weight)) = dominant_hash(data, epoch_deadline) else {
                return Ok(claim_back(offer, "no signatures"));
            };
            let total = epoch.total_signing_policy_weight();
            if weight * TOTAL_BIPS
                < total * settings.minimal_rewarded_non_consensus_deposited_signatures_per_hash_bips
            {
                tracing::debug!(voting_round_id, %hash, weight, "Unfinalized hash below minimal weight, claiming back");
                return Ok(claim_back(offer, "no consensus"));
            }
            data.signatures[&hash].iter().filter(|s| s.timestamp <= epoch_deadline).collect()
        }
    };

    let voters: Vec<_> = eligible
        .iter()
        .filter_map(|s| s.messages.signer)
        .filter(|signer| !double_signers.contains(signer))
        .filter_map(|signer| epoch.voter_for_signing_address(&signer))
        .collect();
    let weights: Vec<U256> = voters.iter().map(|v| v.signing_weight()).collect();
    let Some(amounts) = distribute_by_weight(offer.amount, &weights, "signing rewards")? else {
        return Ok(claim_back(offer, "no eligible signers"));
    };

    let mut claims = Vec::new();
    for (voter, amount) in voters.into_iter().zip(amounts) {
        if !amount.is_zero() {
            claims.extend(signing_weight_based_claims(voter, amount, settings.capped_staking_fee_bips)?);
        }
    }
    ensure_fully_allocated("signing rewards", offer.amount, &claims)?;
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{claims::ClaimType, test_utils::EpochFixture};

    #[test]
    fn finalized_hash_signers_share_by_weight() {
        let fixture = EpochFixture::new(4);
        let epoch = fixture.reward_epoch();
        let round = epoch.start_voting_round_id();
        let mut data = fixture.empty_reward_data(round);
        let message = fixture.protocol_message(round, B256::repeat_byte(1));
        for i in 0..3 {
            fixture.add_signature(&mut data, i, &message, 1 + i as u64);
        }
        fixture.add_finalization(&mut data, 0, &message, &[0, 1, 2], 5);
        let offer = fixture.round_offer(round, 0, U256::from(100_000));
        let claims = calculate_signing_reward_claims(&offer, &data, &epoch, &fixture.config, &BTreeSet::new()).unwrap();
        ensure_fully_allocated("test", offer.amount, &claims).unwrap();
        assert!(claims.iter().all(|c| c.beneficiary != fixture.voters[3].delegation));
        assert!(claims.iter().any(|c| c.beneficiary == fixture.voters[2].delegation));
    }

    #[test]
    fn late_signature_after_finalization_is_not_rewarded() {
        let fixture = EpochFixture::new(3);
        let epoch = fixture.reward_epoch();
        let round = epoch.start_voting_round_id();
        let mut data = fixture.empty_reward_data(round);
        let message = fixture.protocol_message(round, B256::repeat_byte(1));
        let grace = fixture.config.rewards.grace_period_for_signatures_duration_sec;
        fixture.add_signature(&mut data, 0, &message, 1);
        fixture.add_signature(&mut data, 1, &message, 2);
        fixture.add_finalization(&mut data, 0, &message, &[0, 1], grace + 2);
        fixture.add_signature(&mut data, 2, &message, grace + 3);
        let offer = fixture.round_offer(round, 0, U256::from(100_000));
        let claims = calculate_signing_reward_claims(&offer, &data, &epoch, &fixture.config, &BTreeSet::new()).unwrap();
        assert!(claims.iter().all(|c| c.beneficiary != fixture.voters[2].delegation));
    }

    #[test]
    fn double_signer_gets_no_signing_reward() {
        let fixture = EpochFixture::new(4);
        let epoch = fixture.reward_epoch();
        let round = epoch.start_voting_round_id();
        let mut data = fixture.empty_reward_data(round);
        let good = fixture.protocol_message(round, B256::repeat_byte(1));
        let bad = fixture.protocol_message(round, B256::repeat_byte(2));
        for i in 0..4 {
            fixture.add_signature(&mut data, i, &good, 1);
        }
        fixture.add_signature(&mut data, 1, &bad, 2);
        fixture.add_finalization(&mut data, 0, &good, &[0, 1, 2, 3], 3);

        let double = double_signers(&data, &fixture.config.epoch_settings);
        assert_eq!(double, BTreeSet::from([fixture.voters[1].signing_address()]));

        let offer = fixture.round_offer(round, 0, U256::from(100_000));
        let claims = calculate_signing_reward_claims(&offer, &data, &epoch, &fixture.config, &double).unwrap();
        ensure_fully_allocated("test", offer.amount, &claims).unwrap();
        assert!(claims.iter().all(|c| c.beneficiary != fixture.voters[1].delegation));
        for i in [0, 2, 3] {
            let paid: usize = claims.iter().filter(|c| c.beneficiary == fixture.voters[i].delegation).count();
            assert!(paid > 0);
        }
    }

    #[test]
    fn unfinalized_minority_hash_is_claimed_back() {
        let fixture = EpochFixture::new(10);
        let epoch = fixture.reward_epoch();
        let round = epoch.start_voting_round_id();
        let mut data = fixture.empty_reward_data(round);
        let message = fixture.protocol_message(round, B256::repeat_byte(1));
        // 2 of 10 equally weighted signers stay below the 30% non-consensus minimum.
        fixture.add_signature(&mut data, 0, &message, 1);
        fixture.add_signature(&mut data, 1, &message, 1);
        let offer = fixture.round_offer(round, 0, U256::from(100_000));
        let claims = calculate_signing_reward_claims(&offer, &data, &epoch, &fixture.config, &BTreeSet::new()).unwrap();
        assert_eq!(claims, claim_back(&offer, "no consensus"));
        assert_eq!(claims[0].claim_type, ClaimType::Direct);

        fixture.add_signature(&mut data, 2, &message, 1);
        let claims = calculate_signing_reward_claims(&offer, &data, &epoch, &fixture.config, &BTreeSet::new()).unwrap();
        assert!(claims.iter().all(|c| c.beneficiary != offer.claim_back_address));
    }
}
