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

//! Error types shared across the crate.
//!
//! Operational failures (ledger queries, artifact I/O) travel as [anyhow::Error]. The types here
//! name the failure classes callers need to tell apart.

use alloy_primitives::{Address, B256, I256, U256};
use thiserror::Error;

use crate::{claims::ClaimType, ledger::BlockAssuranceResult};

/// Broken consistency guarantees. These are never recovered from: they indicate either a
/// corrupted ledger index or a calculation bug, and processing must stop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("{event} has reward epoch id {actual}, expected {expected}")]
    RewardEpochIdMismatch { event: &'static str, expected: u32, actual: u32 },

    #[error(
        "signing policy hash {actual} in finalization does not match reward epoch {reward_epoch_id} policy hash {expected}"
    )]
    SigningPolicyHashMismatch { reward_epoch_id: u32, expected: B256, actual: B256 },

    #[error("{context}: {residual} of {amount} was not allocated")]
    UnallocatedAmount { context: &'static str, amount: U256, residual: I256 },

    #[error("negative final claim of {amount} for {beneficiary} ({claim_type:?})")]
    NegativeClaim { beneficiary: Address, claim_type: ClaimType, amount: I256 },

    #[error("duplicate merkle leaf {0}")]
    DuplicateMerkleLeaf(B256),

    #[error("duplicate signature index {0} in relay message")]
    DuplicateSignatureIndex(u16),

    #[error("claim amount {0} does not fit into 120 bits")]
    AmountOverflow(U256),

    #[error("{0}")]
    InvalidParameter(String),
}

/// Failure to decode protocol wire data. A single malformed submission is logged and skipped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{what}: expected {expected} bytes, got {actual}")]
    Length { what: &'static str, expected: usize, actual: usize },

    #[error("{what}: unsupported value {value}")]
    Unsupported { what: &'static str, value: u64 },

    #[error("invalid signature: {0}")]
    Signature(String),

    #[error("invalid event log {event}: {reason}")]
    Event { event: &'static str, reason: String },
}

/// Reasons a relay message would be rejected on-chain.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayVerificationError {
    #[error("signature index {index} is not strictly increasing after {previous}")]
    IndexNotIncreasing { previous: u16, index: u16 },

    #[error(transparent)]
    Duplicate(#[from] InvariantViolation),

    #[error("signature index {index} out of range for {voters} voters")]
    IndexOutOfRange { index: u16, voters: usize },

    #[error("signer {recovered} does not match voter {expected} at index {index}")]
    WrongSigner { index: u16, expected: Address, recovered: Address },

    #[error("accumulated weight {weight} does not exceed threshold {threshold}")]
    NotEnoughWeight { weight: u64, threshold: u16 },

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Failure classes surfaced to callers driving a reward calculation.
#[derive(Error, Debug)]
pub enum RewardsError {
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),

    /// Data the caller declared final is still not fully indexed.
    #[error("{what} for voting round {voting_round_id} not available: {status:?}")]
    DataUnavailable { what: &'static str, voting_round_id: u32, status: BlockAssuranceResult },

    #[error(
        "voting rounds [{start_voting_round_id}, {end_voting_round_id}] outside reward epoch {reward_epoch_id} range [{epoch_start_voting_round_id}, {epoch_end_voting_round_id}]"
    )]
    RangeViolation {
        reward_epoch_id: u32,
        start_voting_round_id: u32,
        end_voting_round_id: u32,
        epoch_start_voting_round_id: u32,
        epoch_end_voting_round_id: u32,
    },

    #[error(transparent)]
    Decode(#[from] DecodeError),
}
