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

//! Reward claims: partial claims produced per voting round and the canonical per-epoch claims
//! they merge into.

use std::collections::BTreeMap;

use alloy_primitives::{keccak256, Address, B256, I256, U256};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};

use crate::{
    errors::InvariantViolation,
    merkle::MerkleTree,
    serde_utils::{i256_dec, u256_dec},
};

/// How a claim is paid out by the reward manager contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum ClaimType {
    /// Paid directly to the beneficiary.
    Direct = 0,
    /// Delegation fee of a voter.
    Fee = 1,
    /// Distributed to wNat delegators of the beneficiary.
    Wnat = 2,
    /// Distributed to stakers of the beneficiary node.
    Mirror = 3,
    /// Distributed to C-chain stakers.
    Cchain = 4,
}

impl ClaimType {
    /// Claims the contract distributes further by delegation or stake weight.
    pub fn is_weight_based(&self) -> bool {
        matches!(self, Self::Wnat | Self::Mirror | Self::Cchain)
    }
}

/// A contribution to a claim, produced while calculating one voting round. Negative amounts
/// are penalties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialRewardClaim {
    pub beneficiary: Address,
    #[serde(with = "i256_dec")]
    pub amount: I256,
    pub claim_type: ClaimType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voting_round_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
}

impl PartialRewardClaim {
    pub fn new(beneficiary: Address, amount: I256, claim_type: ClaimType) -> Self {
        Self { beneficiary, amount, claim_type, voting_round_id: None, info: None }
    }

    /// A non-negative claim of `amount`.
    pub fn reward(beneficiary: Address, amount: U256, claim_type: ClaimType) -> Self {
        Self::new(beneficiary, I256::from_raw(amount), claim_type)
    }

    pub fn with_round(mut self, voting_round_id: u32) -> Self {
        self.voting_round_id = Some(voting_round_id);
        self
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }
}

/// Sum claims by `(beneficiary, claim_type)`.
///
/// The result is ordered by beneficiary then claim type, and carries no round or info tags.
/// Merging is associative and commutative, and merging a merged set again changes nothing.
pub fn merge_claims<'a>(claims: impl IntoIterator<Item = &'a PartialRewardClaim>) -> Vec<PartialRewardClaim> {
    let mut totals: BTreeMap<(Address, ClaimType), I256> = BTreeMap::new();
    for claim in claims {
        let total = totals.entry((claim.beneficiary, claim.claim_type)).or_insert(I256::ZERO);
        *total += claim.amount;
    }
    totals
        .into_iter()
        .map(|((beneficiary, claim_type), amount)| PartialRewardClaim::new(beneficiary, amount, claim_type))
        .collect()
}

/// Sum of all claim amounts.
pub fn total_amount<'a>(claims: impl IntoIterator<Item = &'a PartialRewardClaim>) -> I256 {
    claims.into_iter().fold(I256::ZERO, |acc, c| acc + c.amount)
}

/// A canonical claim of a reward epoch; the payload of a Merkle leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardClaim {
    pub reward_epoch_id: u32,
    pub beneficiary: Address,
    #[serde(with = "u256_dec")]
    pub amount: U256,
    pub claim_type: ClaimType,
}

impl RewardClaim {
    /// Largest amount the on-chain `uint120` field holds.
    pub const MAX_AMOUNT: U256 = U256::from_limbs([u64::MAX, (1 << 56) - 1, 0, 0]);

    /// `keccak256(abi.encode(uint24 rewardEpochId, bytes20 beneficiary, uint120 amount, uint8 claimType))`
    pub fn hash(&self) -> B256 {
        let encoded = (
            self.reward_epoch_id,
            self.beneficiary.0,
            self.amount,
            U256::from(self.claim_type as u8),
        )
            .abi_encode_params();
        keccak256(encoded)
    }
}

/// Turn merged partial claims into the final claims of a reward epoch.
///
/// A beneficiary whose penalties exceed its rewards ends with a negative total, which is an
/// [InvariantViolation]. Zero claims are dropped.
pub fn finalize_claims(
    reward_epoch_id: u32,
    claims: &[PartialRewardClaim],
) -> Result<Vec<RewardClaim>, InvariantViolation> {
    let merged = merge_claims(claims);

    let mut result = Vec::with_capacity(merged.len());
    for claim in merged {
        if claim.amount.is_negative() {
            tracing::warn!(
                reward_epoch_id,
                beneficiary = %claim.beneficiary,
                claim_type = ?claim.claim_type,
                amount = %claim.amount,
                "Negative final claim"
            );
            return Err(InvariantViolation::NegativeClaim {
                beneficiary: claim.beneficiary,
                claim_type: claim.claim_type,
                amount: claim.amount,
            });
        }
        let amount = claim.amount.into_raw();
        if amount.is_zero() {
            continue;
        }
        if amount > RewardClaim::MAX_AMOUNT {
            return Err(InvariantViolation::AmountOverflow(amount));
        }
        result.push(RewardClaim {
            reward_epoch_id,
            beneficiary: claim.beneficiary,
            amount,
            claim_type: claim.claim_type,
        });
    }
    Ok(result)
}

/// A final claim with the proof of its leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardClaimWithProof {
    pub merkle_proof: Vec<B256>,
    pub body: RewardClaim,
}

/// The externally consumed result of a reward epoch: final claims, Merkle root and proofs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardDistributionData {
    pub reward_epoch_id: u32,
    /// Zero for an epoch without claims.
    pub merkle_root: B256,
    pub no_of_weight_based_claims: usize,
    pub reward_claims: Vec<RewardClaimWithProof>,
}

impl RewardDistributionData {
    pub fn new(reward_epoch_id: u32, claims: &[RewardClaim]) -> Result<Self, InvariantViolation> {
        let tree = MerkleTree::new(claims.iter().map(RewardClaim::hash))?;
        let mut reward_claims = Vec::with_capacity(claims.len());
        for claim in claims {
            let hash = claim.hash();
            let merkle_proof = tree.proof(&hash).ok_or_else(|| {
                InvariantViolation::InvalidParameter(format!("claim leaf {hash} missing from merkle tree"))
            })?;
            reward_claims.push(RewardClaimWithProof { merkle_proof, body: claim.clone() });
        }
        Ok(Self {
            reward_epoch_id,
            merkle_root: tree.root().unwrap_or_default(),
            no_of_weight_based_claims: claims.iter().filter(|c| c.claim_type.is_weight_based()).count(),
            reward_claims,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(b: u8, amount: i64, claim_type: ClaimType) -> PartialRewardClaim {
        PartialRewardClaim::new(Address::repeat_byte(b), I256::try_from(amount).unwrap(), claim_type)
    }

    #[test]
    fn merge_is_order_independent_and_idempotent() {
        let a = vec![claim(1, 10, ClaimType::Wnat), claim(2, 5, ClaimType::Fee)];
        let b = vec![claim(1, -3, ClaimType::Wnat), claim(1, 4, ClaimType::Fee)];
        let c = vec![claim(2, 7, ClaimType::Fee), claim(3, 1, ClaimType::Direct)];

        let left = merge_claims(merge_claims(a.iter().chain(&b)).iter().chain(&c));
        let right = merge_claims(a.iter().chain(merge_claims(b.iter().chain(&c)).iter()));
        let mut reversed: Vec<_> = a.iter().chain(&b).chain(&c).cloned().collect();
        reversed.reverse();

        assert_eq!(left, right);
        assert_eq!(left, merge_claims(&reversed));
        assert_eq!(merge_claims(&left), left);
        assert_eq!(
            left,
            vec![
                claim(1, 4, ClaimType::Fee),
                claim(1, 7, ClaimType::Wnat),
                claim(2, 12, ClaimType::Fee),
                claim(3, 1, ClaimType::Direct),
            ]
        );
    }

    #[test]
    fn finalize_keeps_penalized_claims_covered_by_rewards() {
        let burn = Address::repeat_byte(0xdd);
        let claims = vec![
            claim(1, 30, ClaimType::Wnat),
            claim(1, -25, ClaimType::Wnat),
            PartialRewardClaim::reward(burn, U256::from(25), ClaimType::Direct),
            claim(2, 0, ClaimType::Fee),
        ];
        let result = finalize_claims(7, &claims).unwrap();
        let amounts: Vec<_> = result.iter().map(|c| (c.beneficiary, c.amount)).collect();
        assert_eq!(amounts.len(), 2);
        assert!(amounts.contains(&(Address::repeat_byte(1), U256::from(5))));
        assert!(amounts.contains(&(burn, U256::from(25))));
    }

    #[test]
    fn finalize_rejects_penalties_exceeding_rewards() {
        let burn = Address::repeat_byte(0xdd);
        let claims = vec![
            claim(1, 10, ClaimType::Wnat),
            claim(1, -25, ClaimType::Wnat),
            PartialRewardClaim::reward(burn, U256::from(25), ClaimType::Direct),
        ];
        assert_eq!(
            finalize_claims(7, &claims).unwrap_err(),
            InvariantViolation::NegativeClaim {
                beneficiary: Address::repeat_byte(1),
                claim_type: ClaimType::Wnat,
                amount: I256::try_from(-15).unwrap(),
            }
        );
    }

    #[test]
    fn finalize_rejects_amounts_beyond_uint120() {
        let claims = vec![PartialRewardClaim::reward(
            Address::repeat_byte(1),
            RewardClaim::MAX_AMOUNT + U256::from(1),
            ClaimType::Direct,
        )];
        assert!(matches!(
            finalize_claims(1, &claims),
            Err(InvariantViolation::AmountOverflow(_))
        ));
    }

    #[test]
    fn claim_hash_matches_abi_layout() {
        let claim = RewardClaim {
            reward_epoch_id: 3,
            beneficiary: Address::repeat_byte(0xab),
            amount: U256::from(1000),
            claim_type: ClaimType::Mirror,
        };
        let mut expected = [0u8; 128];
        expected[31] = 3;
        expected[32..52].copy_from_slice(&[0xab; 20]);
        expected[64 + 30..96].copy_from_slice(&1000u16.to_be_bytes());
        expected[127] = 3;
        assert_eq!(claim.hash(), keccak256(expected));
    }

    #[test]
    fn distribution_data_proves_every_claim() {
        let claims: Vec<RewardClaim> = (1..=5u8)
            .map(|b| RewardClaim {
                reward_epoch_id: 9,
                beneficiary: Address::repeat_byte(b),
                amount: U256::from(b as u64 * 100),
                claim_type: if b % 2 == 0 { ClaimType::Wnat } else { ClaimType::Direct },
            })
            .collect();
        let data = RewardDistributionData::new(9, &claims).unwrap();
        assert_eq!(data.no_of_weight_based_claims, 2);
        for entry in &data.reward_claims {
            assert!(crate::merkle::verify_proof(entry.body.hash(), &entry.merkle_proof, data.merkle_root));
        }

        let empty = RewardDistributionData::new(9, &[]).unwrap();
        assert_eq!(empty.merkle_root, B256::ZERO);
        assert!(empty.reward_claims.is_empty());
    }
}
