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

//! On-disk artifacts of a reward calculation.
//!
//! One directory per reward epoch, one subdirectory per voting round. Stages communicate only
//! through these files, which is what makes per-round work restartable and parallelizable.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    claims::{PartialRewardClaim, RewardClaim, RewardDistributionData},
    data::DataForRewardCalculation,
    epoch::RewardEpochInfo,
    median::{MedianCalculationResult, RandomCalculationResult},
    minimal_conditions::MinimalConditions,
    offers::PartialRewardOffer,
    random::NextSecureRandom,
};

/// Version written into every artifact; artifacts of another version are rejected on read.
pub const SCHEMA_VERSION: u32 = 1;

pub const REWARD_EPOCH_INFO_FILE: &str = "reward-epoch-info.json";
pub const CALCULATION_STATUS_FILE: &str = "calculation-status.json";
pub const FINAL_REWARD_CLAIMS_FILE: &str = "final-reward-claims.json";
pub const REWARD_DISTRIBUTION_DATA_FILE: &str = "reward-distribution-data.json";
pub const MINIMAL_CONDITIONS_FILE: &str = "minimal-conditions.json";
pub const OFFERS_FILE: &str = "offers.json";
pub const REWARD_CALCULATION_DATA_FILE: &str = "reward-calculation-data.json";
pub const CLAIMS_FILE: &str = "claims.json";
pub const AGGREGATED_CLAIMS_FILE: &str = "aggregated-claims.json";

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Versioned<T> {
    schema_version: u32,
    #[serde(flatten)]
    body: T,
}

/// Content of `reward-epoch-info.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRewardEpochInfo {
    pub info: RewardEpochInfo,
    pub end_voting_round_id: u32,
    /// The end is derived from epoch timing because the next signing policy is not known yet.
    pub is_expected_end: bool,
}

/// Content of `offers.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundOffers {
    pub reward_epoch_id: u32,
    pub voting_round_id: u32,
    /// The random the feed selection was made with, `None` if the offers burn the budget.
    pub next_secure_random: Option<NextSecureRandom>,
    pub offers: Vec<PartialRewardOffer>,
}

/// Content of `reward-calculation-data.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundCalculationData {
    pub data: DataForRewardCalculation,
    pub medians: Vec<MedianCalculationResult>,
    pub random: RandomCalculationResult,
    /// Back-filled once a later round produces a secure random.
    #[serde(default)]
    pub next_secure_random: Option<NextSecureRandom>,
}

/// Content of `claims.json` and `aggregated-claims.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundClaims {
    pub reward_epoch_id: u32,
    pub voting_round_id: u32,
    pub claims: Vec<PartialRewardClaim>,
}

/// Content of `final-reward-claims.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalRewardClaims {
    pub reward_epoch_id: u32,
    pub claims: Vec<RewardClaim>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CalculationState {
    Pending,
    InProgress,
    Done,
}

impl CalculationState {
    fn next(self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::InProgress),
            Self::InProgress => Some(Self::Done),
            Self::Done => None,
        }
    }
}

/// Content of `calculation-status.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationStatus {
    pub reward_epoch_id: u32,
    pub state: CalculationState,
    pub start_voting_round_id: u32,
    pub end_voting_round_id: u32,
    pub updated_at: DateTime<Utc>,
}

/// Artifact tree rooted at a calculation folder.
#[derive(Debug, Clone)]
pub struct RewardCalculationStore {
    root: PathBuf,
}

impl RewardCalculationStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn epoch_dir(&self, reward_epoch_id: u32) -> PathBuf {
        self.root.join(reward_epoch_id.to_string())
    }

    pub fn round_dir(&self, reward_epoch_id: u32, voting_round_id: u32) -> PathBuf {
        self.epoch_dir(reward_epoch_id).join(voting_round_id.to_string())
    }

    fn epoch_file(&self, reward_epoch_id: u32, name: &str) -> PathBuf {
        self.epoch_dir(reward_epoch_id).join(name)
    }

    fn round_file(&self, reward_epoch_id: u32, voting_round_id: u32, name: &str) -> PathBuf {
        self.round_dir(reward_epoch_id, voting_round_id).join(name)
    }

    pub fn round_artifact_exists(&self, reward_epoch_id: u32, voting_round_id: u32, name: &str) -> bool {
        self.round_file(reward_epoch_id, voting_round_id, name).exists()
    }

    /// Remove a round artifact so that its stage recomputes it. Missing files are fine.
    pub fn remove_round_artifact(&self, reward_epoch_id: u32, voting_round_id: u32, name: &str) -> anyhow::Result<()> {
        let path = self.round_file(reward_epoch_id, voting_round_id, name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }

    pub fn write_reward_epoch_info(&self, info: &StoredRewardEpochInfo) -> anyhow::Result<()> {
        write_artifact(&self.epoch_file(info.info.reward_epoch_id, REWARD_EPOCH_INFO_FILE), info)
    }

    pub fn read_reward_epoch_info(&self, reward_epoch_id: u32) -> anyhow::Result<Option<StoredRewardEpochInfo>> {
        read_artifact(&self.epoch_file(reward_epoch_id, REWARD_EPOCH_INFO_FILE))
    }

    pub fn write_offers(&self, offers: &RoundOffers) -> anyhow::Result<()> {
        write_artifact(&self.round_file(offers.reward_epoch_id, offers.voting_round_id, OFFERS_FILE), offers)
    }

    pub fn read_offers(&self, reward_epoch_id: u32, voting_round_id: u32) -> anyhow::Result<Option<RoundOffers>> {
        read_artifact(&self.round_file(reward_epoch_id, voting_round_id, OFFERS_FILE))
    }

    pub fn write_reward_calculation_data(&self, data: &RoundCalculationData) -> anyhow::Result<()> {
        let round = &data.data.data_for_calculations;
        write_artifact(
            &self.round_file(round.reward_epoch_id, round.voting_round_id, REWARD_CALCULATION_DATA_FILE),
            data,
        )
    }

    pub fn read_reward_calculation_data(
        &self,
        reward_epoch_id: u32,
        voting_round_id: u32,
    ) -> anyhow::Result<Option<RoundCalculationData>> {
        read_artifact(&self.round_file(reward_epoch_id, voting_round_id, REWARD_CALCULATION_DATA_FILE))
    }

    pub fn write_claims(&self, claims: &RoundClaims) -> anyhow::Result<()> {
        write_artifact(&self.round_file(claims.reward_epoch_id, claims.voting_round_id, CLAIMS_FILE), claims)
    }

    pub fn read_claims(&self, reward_epoch_id: u32, voting_round_id: u32) -> anyhow::Result<Option<RoundClaims>> {
        read_artifact(&self.round_file(reward_epoch_id, voting_round_id, CLAIMS_FILE))
    }

    pub fn write_aggregated_claims(&self, claims: &RoundClaims) -> anyhow::Result<()> {
        write_artifact(
            &self.round_file(claims.reward_epoch_id, claims.voting_round_id, AGGREGATED_CLAIMS_FILE),
            claims,
        )
    }

    pub fn read_aggregated_claims(
        &self,
        reward_epoch_id: u32,
        voting_round_id: u32,
    ) -> anyhow::Result<Option<RoundClaims>> {
        read_artifact(&self.round_file(reward_epoch_id, voting_round_id, AGGREGATED_CLAIMS_FILE))
    }

    pub fn write_final_reward_claims(&self, claims: &FinalRewardClaims) -> anyhow::Result<()> {
        write_artifact(&self.epoch_file(claims.reward_epoch_id, FINAL_REWARD_CLAIMS_FILE), claims)
    }

    pub fn read_final_reward_claims(&self, reward_epoch_id: u32) -> anyhow::Result<Option<FinalRewardClaims>> {
        read_artifact(&self.epoch_file(reward_epoch_id, FINAL_REWARD_CLAIMS_FILE))
    }

    pub fn write_reward_distribution_data(&self, data: &RewardDistributionData) -> anyhow::Result<()> {
        write_artifact(&self.epoch_file(data.reward_epoch_id, REWARD_DISTRIBUTION_DATA_FILE), data)
    }

    pub fn read_reward_distribution_data(
        &self,
        reward_epoch_id: u32,
    ) -> anyhow::Result<Option<RewardDistributionData>> {
        read_artifact(&self.epoch_file(reward_epoch_id, REWARD_DISTRIBUTION_DATA_FILE))
    }

    pub fn write_minimal_conditions(&self, conditions: &MinimalConditions) -> anyhow::Result<()> {
        write_artifact(&self.epoch_file(conditions.reward_epoch_id, MINIMAL_CONDITIONS_FILE), conditions)
    }

    pub fn read_minimal_conditions(&self, reward_epoch_id: u32) -> anyhow::Result<Option<MinimalConditions>> {
        read_artifact(&self.epoch_file(reward_epoch_id, MINIMAL_CONDITIONS_FILE))
    }

    pub fn read_calculation_status(&self, reward_epoch_id: u32) -> anyhow::Result<Option<CalculationStatus>> {
        read_artifact(&self.epoch_file(reward_epoch_id, CALCULATION_STATUS_FILE))
    }

    /// Create the `PENDING` status of an epoch. Fails if a status already exists.
    pub fn create_calculation_status(
        &self,
        reward_epoch_id: u32,
        start_voting_round_id: u32,
        end_voting_round_id: u32,
    ) -> anyhow::Result<CalculationStatus> {
        if let Some(existing) = self.read_calculation_status(reward_epoch_id)? {
            bail!("Calculation status of reward epoch {reward_epoch_id} already exists: {:?}", existing.state);
        }
        let status = CalculationStatus {
            reward_epoch_id,
            state: CalculationState::Pending,
            start_voting_round_id,
            end_voting_round_id,
            updated_at: Utc::now(),
        };
        write_artifact(&self.epoch_file(reward_epoch_id, CALCULATION_STATUS_FILE), &status)?;
        Ok(status)
    }

    /// Move the epoch's status one step forward to `state`.
    pub fn update_calculation_status(
        &self,
        reward_epoch_id: u32,
        state: CalculationState,
    ) -> anyhow::Result<CalculationStatus> {
        let Some(mut status) = self.read_calculation_status(reward_epoch_id)? else {
            bail!("Calculation status of reward epoch {reward_epoch_id} does not exist");
        };
        if status.state.next() != Some(state) {
            bail!(
                "Invalid calculation status transition for reward epoch {reward_epoch_id}: {:?} -> {state:?}",
                status.state
            );
        }
        status.state = state;
        status.updated_at = Utc::now();
        write_artifact(&self.epoch_file(reward_epoch_id, CALCULATION_STATUS_FILE), &status)?;
        tracing::info!(reward_epoch_id, ?state, "Updated calculation status");
        Ok(status)
    }
}

/// Write `body` under the current schema version via a temporary file and a rename.
fn write_artifact<T: Serialize>(path: &Path, body: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_vec_pretty(&Versioned { schema_version: SCHEMA_VERSION, body })
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

fn read_artifact<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("Failed to read {}", path.display())),
    };
    let versioned: Versioned<T> =
        serde_json::from_slice(&contents).with_context(|| format!("Failed to parse {}", path.display()))?;
    if versioned.schema_version != SCHEMA_VERSION {
        bail!(
            "{} has schema version {}, expected {SCHEMA_VERSION}",
            path.display(),
            versioned.schema_version
        );
    }
    Ok(Some(versioned.body))
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{Address, U256};

    use super::*;
    use crate::claims::ClaimType;

    fn round_claims(voting_round_id: u32) -> RoundClaims {
        RoundClaims {
            reward_epoch_id: 3,
            voting_round_id,
            claims: vec![
                PartialRewardClaim::reward(Address::repeat_byte(1), U256::from(10), ClaimType::Wnat),
                PartialRewardClaim::new(Address::repeat_byte(2), "-5".parse().unwrap(), ClaimType::Fee),
            ],
        }
    }

    #[test]
    fn artifacts_land_in_epoch_and_round_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = RewardCalculationStore::new(dir.path());
        store.write_claims(&round_claims(40)).unwrap();
        assert!(dir.path().join("3").join("40").join(CLAIMS_FILE).exists());
        assert!(!dir.path().join("3").join("40").join("claims.json.tmp").exists());
        assert_eq!(store.read_claims(3, 40).unwrap(), Some(round_claims(40)));
        assert_eq!(store.read_claims(3, 41).unwrap(), None);

        let raw: serde_json::Value =
            serde_json::from_slice(&fs::read(dir.path().join("3/40/claims.json")).unwrap()).unwrap();
        assert_eq!(raw["schemaVersion"], 1);
        assert_eq!(raw["claims"][1]["amount"], "-5");

        store.remove_round_artifact(3, 40, CLAIMS_FILE).unwrap();
        store.remove_round_artifact(3, 40, CLAIMS_FILE).unwrap();
        assert!(!store.round_artifact_exists(3, 40, CLAIMS_FILE));
    }

    #[test]
    fn other_schema_versions_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = RewardCalculationStore::new(dir.path());
        store.write_aggregated_claims(&round_claims(7)).unwrap();
        let path = dir.path().join("3/7").join(AGGREGATED_CLAIMS_FILE);
        let json = fs::read_to_string(&path).unwrap().replace("\"schemaVersion\": 1", "\"schemaVersion\": 2");
        fs::write(&path, json).unwrap();
        let err = store.read_aggregated_claims(3, 7).unwrap_err();
        assert!(err.to_string().contains("schema version 2"));
    }

    #[test]
    fn calculation_status_moves_forward_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = RewardCalculationStore::new(dir.path());
        assert!(store.update_calculation_status(5, CalculationState::InProgress).is_err());

        let status = store.create_calculation_status(5, 100, 199).unwrap();
        assert_eq!(status.state, CalculationState::Pending);
        assert!(store.create_calculation_status(5, 100, 199).is_err());
        assert!(store.update_calculation_status(5, CalculationState::Done).is_err());

        store.update_calculation_status(5, CalculationState::InProgress).unwrap();
        assert!(store.update_calculation_status(5, CalculationState::InProgress).is_err());
        let done = store.update_calculation_status(5, CalculationState::Done).unwrap();
        assert_eq!(store.read_calculation_status(5).unwrap(), Some(done));
        assert!(store.update_calculation_status(5, CalculationState::Pending).is_err());
    }
}
