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

//! Network configuration: epoch timing, contract addresses and reward constants.
//!
//! A [NetworkConfig] is built once at process start and shared by reference with every
//! component. Nothing in this crate reads network parameters from ambient state.

use std::{fmt, path::Path, str::FromStr};

use alloy_primitives::{address, Address};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

/// Denominator for basis-point quantities.
pub const TOTAL_BIPS: u64 = 10_000;
/// Denominator for parts-per-million quantities.
pub const TOTAL_PPM: u64 = 1_000_000;

/// Address receiving funds that nobody qualified for when the offer does not name one.
pub const BURN_ADDRESS: Address = address!("000000000000000000000000000000000000dEaD");

/// Timing of voting rounds (voting epochs) and reward epochs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochSettings {
    pub first_voting_round_start_ts: u64,
    pub voting_epoch_duration_seconds: u64,
    pub first_reward_epoch_start_voting_round_id: u32,
    pub reward_epoch_duration_in_voting_epochs: u32,
    pub reveal_deadline_seconds: u64,
}

impl EpochSettings {
    pub fn voting_epoch_start_sec(&self, voting_epoch_id: u32) -> u64 {
        self.first_voting_round_start_ts + voting_epoch_id as u64 * self.voting_epoch_duration_seconds
    }

    /// Last second (inclusive) belonging to the voting epoch.
    pub fn voting_epoch_end_sec(&self, voting_epoch_id: u32) -> u64 {
        self.voting_epoch_start_sec(voting_epoch_id + 1) - 1
    }

    /// Last second (inclusive) at which a reveal submitted in this voting epoch is accepted.
    pub fn reveal_deadline_sec(&self, voting_epoch_id: u32) -> u64 {
        self.voting_epoch_start_sec(voting_epoch_id) + self.reveal_deadline_seconds - 1
    }

    pub fn voting_epoch_for_time_sec(&self, unix_seconds: u64) -> u32 {
        (unix_seconds.saturating_sub(self.first_voting_round_start_ts)
            / self.voting_epoch_duration_seconds) as u32
    }

    pub fn expected_reward_epoch_start_voting_round_id(&self, reward_epoch_id: u32) -> u32 {
        self.first_reward_epoch_start_voting_round_id
            + reward_epoch_id * self.reward_epoch_duration_in_voting_epochs
    }

    pub fn expected_reward_epoch_start_sec(&self, reward_epoch_id: u32) -> u64 {
        self.voting_epoch_start_sec(self.expected_reward_epoch_start_voting_round_id(reward_epoch_id))
    }

    pub fn expected_reward_epoch_for_voting_epoch(&self, voting_epoch_id: u32) -> u32 {
        voting_epoch_id.saturating_sub(self.first_reward_epoch_start_voting_round_id)
            / self.reward_epoch_duration_in_voting_epochs
    }

    pub fn reward_epoch_duration_sec(&self) -> u64 {
        self.reward_epoch_duration_in_voting_epochs as u64 * self.voting_epoch_duration_seconds
    }
}

/// Addresses of the protocol contracts whose transactions and events are read from the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractAddresses {
    pub submission: Address,
    pub relay: Address,
    pub flare_systems_manager: Address,
    pub voter_registry: Address,
    pub flare_systems_calculator: Address,
    pub ftso_reward_offers_manager: Address,
}

impl ContractAddresses {
    pub fn ensure_configured(&self) -> anyhow::Result<()> {
        let entries = [
            ("submission", self.submission),
            ("relay", self.relay),
            ("flareSystemsManager", self.flare_systems_manager),
            ("voterRegistry", self.voter_registry),
            ("flareSystemsCalculator", self.flare_systems_calculator),
            ("ftsoRewardOffersManager", self.ftso_reward_offers_manager),
        ];
        for (name, address) in entries {
            if address.is_zero() {
                bail!("Contract address `{name}` is not configured; provide it with --network-config");
            }
        }
        Ok(())
    }
}

/// Constants driving the reward calculation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardSettings {
    /// Share of each feed offer distributed for signatures.
    pub signing_bips: u64,
    /// Share of each feed offer distributed for finalizations.
    pub finalization_bips: u64,
    pub penalty_factor: u64,
    pub grace_period_for_signatures_duration_sec: u64,
    pub grace_period_for_finalization_duration_sec: u64,
    pub minimal_rewarded_non_consensus_deposited_signatures_per_hash_bips: u64,
    pub finalization_voter_selection_threshold_weight_bips: u64,
    pub capped_staking_fee_bips: u64,
    /// Voting epochs after the reveal epoch in which signatures and finalizations still count.
    pub additional_rewarded_finalization_windows: u32,
    pub random_generation_benching_window: u32,
    pub non_benched_random_voters_min_count: usize,
    pub burn_address: Address,
    pub random_feed_selection: bool,
    pub ftso_scaling_availability_threshold_bips: u64,
    pub ftso_scaling_closeness_threshold_ppm: u64,
}

impl Default for RewardSettings {
    fn default() -> Self {
        Self {
            signing_bips: 1_000,
            finalization_bips: 1_000,
            penalty_factor: 30,
            grace_period_for_signatures_duration_sec: 10,
            grace_period_for_finalization_duration_sec: 20,
            minimal_rewarded_non_consensus_deposited_signatures_per_hash_bips: 3_000,
            finalization_voter_selection_threshold_weight_bips: 500,
            capped_staking_fee_bips: 2_000,
            additional_rewarded_finalization_windows: 0,
            random_generation_benching_window: 20,
            non_benched_random_voters_min_count: 2,
            burn_address: BURN_ADDRESS,
            random_feed_selection: true,
            ftso_scaling_availability_threshold_bips: 8_000,
            ftso_scaling_closeness_threshold_ppm: 5_000,
        }
    }
}

/// Networks with built-in timing presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Flare,
    Songbird,
    Coston,
    Coston2,
    Local,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Flare => "flare",
            Network::Songbird => "songbird",
            Network::Coston => "coston",
            Network::Coston2 => "coston2",
            Network::Local => "local",
        };
        f.write_str(name)
    }
}

impl FromStr for Network {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flare" => Ok(Network::Flare),
            "songbird" => Ok(Network::Songbird),
            "coston" => Ok(Network::Coston),
            "coston2" => Ok(Network::Coston2),
            "local" | "local-test" => Ok(Network::Local),
            other => bail!("Unknown network: {other}"),
        }
    }
}

/// Immutable configuration shared by every component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    pub network: Network,
    pub protocol_id: u8,
    /// First reward epoch run by the signing-policy protocol. Rounds before its start have no
    /// reveal history, so the benching window is clamped to its start.
    pub initial_reward_epoch_id: u32,
    pub epoch_settings: EpochSettings,
    pub contracts: ContractAddresses,
    pub rewards: RewardSettings,
}

impl NetworkConfig {
    pub const FTSO2_PROTOCOL_ID: u8 = 100;

    /// Timing and reward preset for a known network. Contract addresses are left unset and
    /// must be provided through a configuration file for public networks.
    pub fn from_network(network: Network) -> Self {
        let epoch_settings = match network {
            Network::Flare => EpochSettings {
                first_voting_round_start_ts: 1_658_430_000,
                voting_epoch_duration_seconds: 90,
                first_reward_epoch_start_voting_round_id: 0,
                reward_epoch_duration_in_voting_epochs: 3_360,
                reveal_deadline_seconds: 45,
            },
            Network::Songbird | Network::Coston2 => EpochSettings {
                first_voting_round_start_ts: 1_658_429_955,
                voting_epoch_duration_seconds: 90,
                first_reward_epoch_start_voting_round_id: 0,
                reward_epoch_duration_in_voting_epochs: 3_360,
                reveal_deadline_seconds: 45,
            },
            Network::Coston => EpochSettings {
                first_voting_round_start_ts: 1_658_429_955,
                voting_epoch_duration_seconds: 90,
                first_reward_epoch_start_voting_round_id: 0,
                reward_epoch_duration_in_voting_epochs: 240,
                reveal_deadline_seconds: 45,
            },
            Network::Local => EpochSettings {
                first_voting_round_start_ts: 1_700_000_000,
                voting_epoch_duration_seconds: 20,
                first_reward_epoch_start_voting_round_id: 0,
                reward_epoch_duration_in_voting_epochs: 10,
                reveal_deadline_seconds: 10,
            },
        };
        let rewards = match network {
            Network::Local => RewardSettings {
                random_generation_benching_window: 3,
                grace_period_for_signatures_duration_sec: 2,
                grace_period_for_finalization_duration_sec: 4,
                ..RewardSettings::default()
            },
            _ => RewardSettings::default(),
        };
        let initial_reward_epoch_id = match network {
            Network::Flare => 223,
            Network::Songbird => 183,
            Network::Coston => 2_466,
            Network::Coston2 => 3_110,
            Network::Local => 1,
        };
        Self {
            network,
            protocol_id: Self::FTSO2_PROTOCOL_ID,
            initial_reward_epoch_id,
            epoch_settings,
            contracts: ContractAddresses::default(),
            rewards,
        }
    }

    /// Load a full configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read network config {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse network config {}", path.display()))
    }

    /// The reward epoch whose start rounds have no predecessor epoch run by this protocol.
    pub fn is_initial_reward_epoch(&self, reward_epoch_id: u32) -> bool {
        reward_epoch_id == self.initial_reward_epoch_id
    }
}
