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

//! Attribution of a voter's reward to its delegation address and nodes.

use alloy_primitives::{Address, U256};

use crate::{
    calculation::distribute_by_weight,
    claims::{ClaimType, PartialRewardClaim},
    config::TOTAL_BIPS,
    epoch::VoterWeights,
    errors::InvariantViolation,
};

fn fee_and_rest(amount: U256, fee_bips: u64) -> (U256, U256) {
    let fee = amount * U256::from(fee_bips.min(TOTAL_BIPS)) / U256::from(TOTAL_BIPS);
    (fee, amount - fee)
}

/// Fee and delegator claims for a reward earned by delegation weight.
pub fn delegation_claims(voter: &VoterWeights, amount: U256) -> Vec<PartialRewardClaim> {
    let (fee, rest) = fee_and_rest(amount, voter.fee_bips as u64);
    [(fee, ClaimType::Fee), (rest, ClaimType::Wnat)]
        .into_iter()
        .filter(|(a, _)| !a.is_zero())
        .map(|(a, claim_type)| PartialRewardClaim::reward(voter.delegation_address, a, claim_type))
        .collect()
}

/// Claims for a reward earned by signing weight.
///
/// The amount is split between staked and delegated weight. The delegated part goes through
/// [delegation_claims]; the staked part is split across nodes by node weight, each node share
/// paying a fee capped at `capped_staking_fee_bips` to the voter and the rest to the node's stakers.
pub fn signing_weight_based_claims(
    voter: &VoterWeights,
    amount: U256,
    capped_staking_fee_bips: u64,
) -> Result<Vec<PartialRewardClaim>, InvariantViolation> {
    let signing_weight = voter.signing_weight();
    let staked_weight = voter.staked_weight();
    let staking_amount = if signing_weight.is_zero() {
        U256::ZERO
    } else {
        amount * staked_weight / signing_weight
    };
    let mut claims = delegation_claims(voter, amount - staking_amount);
    if staking_amount.is_zero() {
        return Ok(claims);
    }

    let Some(node_amounts) = distribute_by_weight(staking_amount, &voter.node_weights, "node split")? else {
        return Ok(claims);
    };
    let staking_fee_bips = (voter.fee_bips as u64).min(capped_staking_fee_bips);
    let mut fees = U256::ZERO;
    for (node_id, node_amount) in voter.node_ids.iter().zip(node_amounts) {
        let (fee, rest) = fee_and_rest(node_amount, staking_fee_bips);
        fees += fee;
        if !rest.is_zero() {
            claims.push(PartialRewardClaim::reward(Address::from(node_id.0), rest, ClaimType::Mirror));
        }
    }
    if !fees.is_zero() {
        claims.push(PartialRewardClaim::reward(voter.delegation_address, fees, ClaimType::Fee));
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use crate::{calculation::ensure_fully_allocated, epoch::NodeId};

    use super::*;

    fn voter(fee_bips: u16, capped: u64, nodes: &[u64]) -> VoterWeights {
        VoterWeights {
            identity_address: Address::repeat_byte(1),
            submit_address: Address::repeat_byte(2),
            submit_signatures_address: Address::repeat_byte(3),
            signing_address: Address::repeat_byte(4),
            delegation_address: Address::repeat_byte(5),
            delegation_weight: U256::from(capped),
            capped_delegation_weight: U256::from(capped),
            registration_weight: U256::ZERO,
            signing_policy_weight: 1,
            fee_bips,
            node_ids: (0..nodes.len()).map(|i| NodeId::repeat_byte(0x10 + i as u8)).collect(),
            node_weights: nodes.iter().map(|w| U256::from(*w)).collect(),
        }
    }

    #[test]
    fn delegation_fee_and_participation() {
        let claims = delegation_claims(&voter(1_500, 10, &[]), U256::from(1_000));
        assert_eq!(
            claims,
            vec![
                PartialRewardClaim::reward(Address::repeat_byte(5), U256::from(150), ClaimType::Fee),
                PartialRewardClaim::reward(Address::repeat_byte(5), U256::from(850), ClaimType::Wnat),
            ]
        );
    }

    #[test]
    fn staked_share_goes_to_nodes_with_capped_fee() {
        // Half the signing weight is staked, across two nodes 1:3. The fee of 30% is capped at 20%
        // for the staked part.
        let voter = voter(3_000, 400, &[100, 300]);
        let claims = signing_weight_based_claims(&voter, U256::from(10_000), 2_000).unwrap();
        ensure_fully_allocated("test", U256::from(10_000), &claims).unwrap();

        let node = |i: u8| Address::from(NodeId::repeat_byte(0x10 + i).0);
        let amount_of = |beneficiary: Address, claim_type: ClaimType| {
            claims
                .iter()
                .filter(|c| c.beneficiary == beneficiary && c.claim_type == claim_type)
                .fold(U256::ZERO, |acc, c| acc + c.amount.into_raw())
        };
        assert_eq!(amount_of(node(0), ClaimType::Mirror), U256::from(1_000));
        assert_eq!(amount_of(node(1), ClaimType::Mirror), U256::from(3_000));
        assert_eq!(amount_of(voter.delegation_address, ClaimType::Wnat), U256::from(3_500));
        assert_eq!(amount_of(voter.delegation_address, ClaimType::Fee), U256::from(1_500 + 1_000));
    }

    #[test]
    fn zero_signing_weight_pays_delegation_part() {
        let claims = signing_weight_based_claims(&voter(0, 0, &[]), U256::from(7), 2_000).unwrap();
        assert_eq!(claims, vec![PartialRewardClaim::reward(Address::repeat_byte(5), U256::from(7), ClaimType::Wnat)]);
    }
}
