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

//! Reward data reconstruction and claim calculation for FTSO scaling voting rounds.
//!
//! Starting from an indexed view of the chain ([Ledger]), this crate rebuilds the reward epoch
//! configuration ([epoch]), the commit/reveal, signature and finalization data of every voting
//! round ([data]), computes medians and the commit-reveal random ([median]), and turns the
//! reward offers of a round into claims ([calculation]). Per-round claims are finally merged
//! into the Merkle-committed claim list of the reward epoch ([claims]).

pub mod artifacts;
pub mod calculation;
pub mod claims;
pub mod config;
pub mod data;
pub mod encoding;
pub mod epoch;
pub mod errors;
pub mod events;
pub mod ledger;
pub mod median;
pub mod merkle;
pub mod minimal_conditions;
pub mod offers;
pub mod random;
pub mod serde_utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use artifacts::{
    CalculationState, CalculationStatus, FinalRewardClaims, RewardCalculationStore, RoundCalculationData,
    RoundClaims, RoundOffers, StoredRewardEpochInfo, SCHEMA_VERSION,
};
pub use calculation::calculate_round_claims;
pub use claims::{
    finalize_claims, merge_claims, ClaimType, PartialRewardClaim, RewardClaim, RewardClaimWithProof,
    RewardDistributionData,
};
pub use config::{Network, NetworkConfig, RewardSettings, BURN_ADDRESS};
pub use data::{DataAvailabilityStatus, DataForCalculations, DataForRewardCalculation, DataManager};
pub use epoch::{RewardEpoch, RewardEpochInfo, RewardEpochManager};
pub use errors::{DecodeError, InvariantViolation, RewardsError};
pub use ledger::{BlockAssuranceResult, Ledger, LedgerQueries, LedgerResponse, LogRecord, TransactionRecord};
pub use median::{
    CommitRevealRandomCalculator, MedianCalculationResult, MedianCalculator, RandomCalculationResult,
    RandomCalculator, WeightedMedianCalculator,
};
pub use minimal_conditions::{MinimalConditions, MinimalConditionsCalculator};
pub use offers::{granulate_offers, offers_for_round, PartialRewardOffer};
pub use random::{next_secure_randoms, NextSecureRandom};
