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

//! Resolution of the random number each voting round's feed selection relies on.
//!
//! A round's own random is only known once its reveals are in, and may be insecure. The
//! random used for round `N` is derived from the first secure random at or after `N`, which
//! may only become available several rounds later.

use std::collections::BTreeMap;

use alloy_primitives::{keccak256, U256};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};

use crate::{median::RandomCalculationResult, serde_utils::u256_dec};

/// The random to use for a voting round, and the later round it was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextSecureRandom {
    #[serde(with = "u256_dec")]
    pub random: U256,
    pub secure_voting_round_id: u32,
}

/// `keccak256(abi.encode(uint256 secureRandom, uint256 votingRoundId))`
pub fn derive_round_random(secure_random: U256, voting_round_id: u32) -> U256 {
    U256::from_be_bytes(keccak256((secure_random, U256::from(voting_round_id)).abi_encode_params()).0)
}

/// Next secure randoms for consecutive rounds, computed backwards from the last round.
///
/// Rounds after the last secure round in `results` map to `None`: they have to wait for later
/// rounds, or be burned if the epoch closes without one.
pub fn next_secure_randoms(results: &[RandomCalculationResult]) -> BTreeMap<u32, Option<NextSecureRandom>> {
    let mut sorted: Vec<&RandomCalculationResult> = results.iter().collect();
    sorted.sort_by_key(|r| r.voting_round_id);
    let mut next_secure: Option<&RandomCalculationResult> = None;
    let mut result = BTreeMap::new();
    for round in sorted.into_iter().rev() {
        if round.is_secure {
            next_secure = Some(round);
        }
        result.insert(
            round.voting_round_id,
            next_secure.map(|secure| NextSecureRandom {
                random: derive_round_random(secure.random, round.voting_round_id),
                secure_voting_round_id: secure.voting_round_id,
            }),
        );
    }
    result
}
