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

use alloy_primitives::{keccak256, Address, B256, U256};
use serde::{Deserialize, Serialize};

use super::{take, take_u16, take_u32, EcdsaSignature, ProtocolMessageMerkleRoot};
use crate::errors::{DecodeError, InvariantViolation, RelayVerificationError};

/// Ordered voter set of a reward epoch with the weight threshold a relay must exceed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningPolicy {
    pub reward_epoch_id: u32,
    pub start_voting_round_id: u32,
    pub threshold: u16,
    #[serde(with = "crate::serde_utils::u256_dec")]
    pub seed: U256,
    pub voters: Vec<Address>,
    pub weights: Vec<u16>,
}

impl SigningPolicy {
    const HEADER_LEN: usize = 2 + 3 + 4 + 2 + 32;
    const VOTER_LEN: usize = 20 + 2;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::HEADER_LEN + self.voters.len() * Self::VOTER_LEN);
        out.extend_from_slice(&(self.voters.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.reward_epoch_id.to_be_bytes()[1..]);
        out.extend_from_slice(&self.start_voting_round_id.to_be_bytes());
        out.extend_from_slice(&self.threshold.to_be_bytes());
        out.extend_from_slice(&self.seed.to_be_bytes::<32>());
        for (voter, weight) in self.voters.iter().zip(&self.weights) {
            out.extend_from_slice(voter.as_slice());
            out.extend_from_slice(&weight.to_be_bytes());
        }
        out
    }

    pub(crate) fn decode_from(data: &mut &[u8]) -> Result<Self, DecodeError> {
        let count = take_u16(data, "signing policy voter count")? as usize;
        let epoch = take(data, 3, "signing policy reward epoch id")?;
        let reward_epoch_id = u32::from_be_bytes([0, epoch[0], epoch[1], epoch[2]]);
        let start_voting_round_id = take_u32(data, "signing policy start voting round id")?;
        let threshold = take_u16(data, "signing policy threshold")?;
        let seed = U256::from_be_slice(take(data, 32, "signing policy seed")?);
        let mut voters = Vec::with_capacity(count);
        let mut weights = Vec::with_capacity(count);
        for _ in 0..count {
            voters.push(Address::from_slice(take(data, 20, "signing policy voter")?));
            weights.push(take_u16(data, "signing policy weight")?);
        }
        Ok(Self { reward_epoch_id, start_voting_round_id, threshold, seed, voters, weights })
    }

    pub fn decode(mut data: &[u8]) -> Result<Self, DecodeError> {
        let policy = Self::decode_from(&mut data)?;
        if !data.is_empty() {
            return Err(DecodeError::Length {
                what: "signing policy",
                expected: Self::HEADER_LEN + policy.voters.len() * Self::VOTER_LEN,
                actual: Self::HEADER_LEN + policy.voters.len() * Self::VOTER_LEN + data.len(),
            });
        }
        Ok(policy)
    }

    /// Hash as computed by the relay contract: the encoding is zero-padded to whole 32-byte
    /// words, which are then folded with keccak256 pairwise from the left.
    pub fn hash(&self) -> B256 {
        Self::hash_bytes(&self.encode())
    }

    pub fn hash_bytes(encoded: &[u8]) -> B256 {
        let mut padded = encoded.to_vec();
        padded.resize(encoded.len().div_ceil(32).max(2) * 32, 0);
        let mut chunks = padded.chunks(32);
        let mut hash = match (chunks.next(), chunks.next()) {
            (Some(first), Some(second)) => keccak256([first, second].concat()),
            _ => keccak256(&padded),
        };
        for chunk in chunks {
            hash = keccak256([hash.as_slice(), chunk].concat());
        }
        hash
    }

    pub fn total_weight(&self) -> u64 {
        self.weights.iter().map(|w| *w as u64).sum()
    }
}

/// A signature in a relay message, tagged with the signer's position in the signing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedSignature {
    pub signature: EcdsaSignature,
    pub index: u16,
}

/// Calldata of a `relay()` transaction finalizing a protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayMessage {
    pub signing_policy: SigningPolicy,
    pub protocol_message_merkle_root: ProtocolMessageMerkleRoot,
    pub signatures: Vec<IndexedSignature>,
}

impl RelayMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.signing_policy.encode();
        out.extend_from_slice(&self.protocol_message_merkle_root.encode());
        out.extend_from_slice(&(self.signatures.len() as u16).to_be_bytes());
        for entry in &self.signatures {
            out.extend_from_slice(&entry.signature.encode());
            out.extend_from_slice(&entry.index.to_be_bytes());
        }
        out
    }

    pub fn decode(mut data: &[u8]) -> Result<Self, DecodeError> {
        let signing_policy = SigningPolicy::decode_from(&mut data)?;
        let protocol_message_merkle_root = ProtocolMessageMerkleRoot::decode(take(
            &mut data,
            ProtocolMessageMerkleRoot::ENCODED_LEN,
            "relay protocol message",
        )?)?;
        let count = take_u16(&mut data, "relay signature count")? as usize;
        let mut signatures = Vec::with_capacity(count);
        for _ in 0..count {
            let signature = EcdsaSignature::decode_from(&mut data)?;
            let index = take_u16(&mut data, "relay signature index")?;
            signatures.push(IndexedSignature { signature, index });
        }
        if !data.is_empty() {
            return Err(DecodeError::Length {
                what: "relay message trailing bytes",
                expected: 0,
                actual: data.len(),
            });
        }
        Ok(Self { signing_policy, protocol_message_merkle_root, signatures })
    }

    /// Check the message the way the relay contract would before accepting it.
    ///
    /// Signer indices must be strictly increasing, every signature must recover to the policy
    /// voter at its index and the accumulated weight must exceed the policy threshold.
    pub fn verify(&self) -> Result<(), RelayVerificationError> {
        let policy = &self.signing_policy;
        let message_hash = self.protocol_message_merkle_root.hash();
        let mut previous: Option<u16> = None;
        let mut weight = 0u64;
        for entry in &self.signatures {
            if let Some(previous) = previous {
                if entry.index == previous {
                    return Err(InvariantViolation::DuplicateSignatureIndex(entry.index).into());
                }
                if entry.index < previous {
                    return Err(RelayVerificationError::IndexNotIncreasing {
                        previous,
                        index: entry.index,
                    });
                }
            }
            previous = Some(entry.index);
            let i = entry.index as usize;
            let expected = *policy.voters.get(i).ok_or(RelayVerificationError::IndexOutOfRange {
                index: entry.index,
                voters: policy.voters.len(),
            })?;
            let recovered = entry.signature.recover_signer(message_hash)?;
            if recovered != expected {
                return Err(RelayVerificationError::WrongSigner {
                    index: entry.index,
                    expected,
                    recovered,
                });
            }
            weight += policy.weights[i] as u64;
        }
        if weight <= policy.threshold as u64 {
            return Err(RelayVerificationError::NotEnoughWeight {
                weight,
                threshold: policy.threshold,
            });
        }
        Ok(())
    }
}
