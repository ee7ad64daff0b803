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

//! Penalties for withheld reveals and double signing.

use alloy_primitives::{Address, I256, U256};

use crate::{
    calculation::signing_weight_based_claims,
    claims::{ClaimType, PartialRewardClaim},
    config::RewardSettings,
    epoch::{RewardEpoch, VoterWeights},
    errors::InvariantViolation,
};

/// Penalize each offender by `signingWeight * amount * penaltyFactor / totalSigningWeight`.
///
/// The penalty is attributed like a reward of the same size, with negated amounts. The burn
/// address receives the penalized total so that penalties move value rather than create it.
pub fn calculate_penalty_claims<'a>(
    amount: U256,
    offenders: impl IntoIterator<Item = &'a VoterWeights>,
    epoch: &RewardEpoch,
    settings: &RewardSettings,
    info: &str,
) -> Result<Vec<PartialRewardClaim>, InvariantViolation> {
    let total_weight = epoch.total_signing_weight();
    if total_weight.is_zero() || amount.is_zero() {
        return Ok(vec![]);
    }
    let mut claims = Vec::new();
    let mut penalized = U256::ZERO;
    for voter in offenders {
        let penalty = voter.signing_weight() * amount * U256::from(settings.penalty_factor) / total_weight;
        if penalty.is_zero() {
            continue;
        }
        let attributed = signing_weight_based_claims(voter, penalty, settings.capped_staking_fee_bips)?;
        claims.extend(attributed.into_iter().map(|c| PartialRewardClaim { amount: -c.amount, ..c }.with_info(info)));
        penalized += penalty;
    }
    if !penalized.is_zero() {
        claims.push(burn_claim(settings.burn_address, penalized, info));
    }
    Ok(claims)
}

fn burn_claim(burn_address: Address, amount: U256, info: &str) -> PartialRewardClaim {
    PartialRewardClaim::new(burn_address, I256::from_raw(amount), ClaimType::Direct).with_info(format!("{info} burn"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::total_amount;
    use crate::test_utils::EpochFixture;

    #[test]
    fn penalties_are_negative_and_balanced_by_burn() {
        let fixture = EpochFixture::new(4);
        let epoch = fixture.reward_epoch();
        let settings = &fixture.config.rewards;
        let offender = epoch.voter_for_submit_address(&fixture.voters[1].submit).unwrap();
        let claims = calculate_penalty_claims(U256::from(1_000_000), [offender], &epoch, settings, "reveal offender").unwrap();

        assert_eq!(total_amount(&claims), I256::ZERO);
        let burn: Vec<_> = claims.iter().filter(|c| c.beneficiary == settings.burn_address).collect();
        assert_eq!(burn.len(), 1);
        let expected = offender.signing_weight() * U256::from(1_000_000) * U256::from(settings.penalty_factor)
            / epoch.total_signing_weight();
        assert_eq!(burn[0].amount, I256::from_raw(expected));
        assert!(claims
            .iter()
            .filter(|c| c.beneficiary != settings.burn_address)
            .all(|c| c.amount.is_negative()));
    }

    #[test]
    fn no_offenders_no_claims() {
        let fixture = EpochFixture::new(2);
        let epoch = fixture.reward_epoch();
        assert!(calculate_penalty_claims(U256::from(10), [], &epoch, &fixture.config.rewards, "x").unwrap().is_empty());
    }
}
