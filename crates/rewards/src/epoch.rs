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

//! The voter and weight model of a reward epoch.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use alloy_primitives::{aliases::U24, Address, FixedBytes, B256, U256};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{
    config::NetworkConfig,
    encoding::SigningPolicy,
    errors::InvariantViolation,
    events::{InflationRewardsOffered, RewardEpochEvents, RewardsOffered},
    ledger::{Ledger, LedgerQueries},
    serde_utils::{u256_dec, u256_dec_vec},
};

/// 21-byte feed identifier: category byte followed by the zero-padded feed name.
pub type FeedId = FixedBytes<21>;

/// 20-byte validator node identifier.
pub type NodeId = FixedBytes<20>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Feed {
    pub id: FeedId,
    pub decimals: i8,
}

/// A per-feed reward offer for a whole reward epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardOffer {
    pub reward_epoch_id: u32,
    pub feed_id: FeedId,
    pub decimals: i8,
    #[serde(with = "u256_dec")]
    pub amount: U256,
    #[serde(rename = "minRewardedTurnoutBIPS")]
    pub min_rewarded_turnout_bips: u16,
    #[serde(rename = "primaryBandRewardSharePPM")]
    pub primary_band_reward_share_ppm: u32,
    #[serde(rename = "secondaryBandWidthPPM")]
    pub secondary_band_width_ppm: u32,
    pub claim_back_address: Address,
    /// Offer split off an inflation offer rather than offered by a community member.
    #[serde(default)]
    pub is_inflation: bool,
}

impl From<&RewardsOffered> for RewardOffer {
    fn from(event: &RewardsOffered) -> Self {
        Self {
            reward_epoch_id: event.rewardEpochId.to(),
            feed_id: event.feedId,
            decimals: event.decimals,
            amount: event.amount,
            min_rewarded_turnout_bips: event.minRewardedTurnoutBIPS,
            primary_band_reward_share_ppm: event.primaryBandRewardSharePPM.to(),
            secondary_band_width_ppm: event.secondaryBandWidthPPM.to(),
            claim_back_address: event.claimBackAddress,
            is_inflation: false,
        }
    }
}

/// Split an inflation offer into one offer per feed.
///
/// The amount is split evenly, with the remainder going one unit each to the first feeds. The
/// claim-back of inflation funds is always the burn address.
pub fn split_inflation_offer(
    event: &InflationRewardsOffered,
    burn_address: Address,
) -> anyhow::Result<Vec<RewardOffer>> {
    const FEED_ID_LEN: usize = 21;
    const WIDTH_LEN: usize = 3;

    let feed_ids: Vec<FeedId> =
        event.feedIds.chunks_exact(FEED_ID_LEN).map(FeedId::from_slice).collect();
    anyhow::ensure!(
        event.feedIds.len() == feed_ids.len() * FEED_ID_LEN
            && event.decimals.len() == feed_ids.len()
            && event.secondaryBandWidthPPMs.len() == feed_ids.len() * WIDTH_LEN,
        "inflation offer for reward epoch {} has inconsistent feed arrays",
        event.rewardEpochId
    );
    if feed_ids.is_empty() {
        return Ok(vec![]);
    }

    let count = U256::from(feed_ids.len());
    let share = event.amount / count;
    let remainder: usize = (event.amount % count).to();
    Ok(feed_ids
        .into_iter()
        .enumerate()
        .map(|(i, feed_id)| {
            let width = &event.secondaryBandWidthPPMs[i * WIDTH_LEN..(i + 1) * WIDTH_LEN];
            RewardOffer {
                reward_epoch_id: event.rewardEpochId.to(),
                feed_id,
                decimals: event.decimals[i] as i8,
                amount: if i < remainder { share + U256::from(1) } else { share },
                min_rewarded_turnout_bips: event.minRewardedTurnoutBIPS,
                primary_band_reward_share_ppm: event.primaryBandRewardSharePPM.to(),
                secondary_band_width_ppm: u32::from_be_bytes([0, width[0], width[1], width[2]]),
                claim_back_address: burn_address,
                is_inflation: true,
            }
        })
        .collect())
}

/// Identity, addresses and weights of one registered voter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterWeights {
    pub identity_address: Address,
    pub submit_address: Address,
    pub submit_signatures_address: Address,
    pub signing_address: Address,
    pub delegation_address: Address,
    #[serde(with = "u256_dec")]
    pub delegation_weight: U256,
    #[serde(with = "u256_dec")]
    pub capped_delegation_weight: U256,
    #[serde(with = "u256_dec")]
    pub registration_weight: U256,
    /// Normalized weight in the signing policy.
    pub signing_policy_weight: u16,
    #[serde(rename = "feeBIPS")]
    pub fee_bips: u16,
    pub node_ids: Vec<NodeId>,
    #[serde(with = "u256_dec_vec")]
    pub node_weights: Vec<U256>,
}

impl VoterWeights {
    /// Weight used to split signing and finalization rewards: staked node weight plus capped
    /// delegation weight.
    pub fn signing_weight(&self) -> U256 {
        self.node_weights.iter().fold(self.capped_delegation_weight, |acc, w| acc + w)
    }

    pub fn staked_weight(&self) -> U256 {
        self.node_weights.iter().fold(U256::ZERO, |acc, w| acc + w)
    }
}

/// Persisted description of a reward epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardEpochInfo {
    pub reward_epoch_id: u32,
    pub previous_reward_epoch_start_voting_round_id: u32,
    pub previous_reward_epoch_start_ts: u64,
    pub random_acquisition_start_ts: u64,
    pub vote_power_block: u64,
    pub signing_policy: SigningPolicy,
    pub signing_policy_hash: B256,
    pub signing_policy_initialized_ts: u64,
    /// In signing policy order.
    pub voters: Vec<VoterWeights>,
    pub canonical_feed_order: Vec<Feed>,
    pub offers: Vec<RewardOffer>,
}

/// An immutable reward epoch with its lookup tables.
#[derive(Debug, Clone)]
pub struct RewardEpoch {
    info: RewardEpochInfo,
    by_signing: HashMap<Address, usize>,
    by_submit: HashMap<Address, usize>,
    by_submit_signatures: HashMap<Address, usize>,
    by_delegation: HashMap<Address, usize>,
    by_identity: HashMap<Address, usize>,
    feed_index: HashMap<FeedId, usize>,
}

impl RewardEpoch {
    pub fn new(info: RewardEpochInfo) -> Self {
        let mut epoch = Self {
            by_signing: HashMap::new(),
            by_submit: HashMap::new(),
            by_submit_signatures: HashMap::new(),
            by_delegation: HashMap::new(),
            by_identity: HashMap::new(),
            feed_index: info.canonical_feed_order.iter().enumerate().map(|(i, f)| (f.id, i)).collect(),
            info,
        };
        for (i, voter) in epoch.info.voters.iter().enumerate() {
            epoch.by_signing.insert(voter.signing_address, i);
            epoch.by_submit.insert(voter.submit_address, i);
            epoch.by_submit_signatures.insert(voter.submit_signatures_address, i);
            epoch.by_delegation.insert(voter.delegation_address, i);
            epoch.by_identity.insert(voter.identity_address, i);
        }
        epoch
    }

    /// Assemble a reward epoch from its setup events.
    ///
    /// Every event must belong to the same reward epoch, the one following
    /// `previous_reward_epoch_started`; any disagreement is an [InvariantViolation].
    pub fn from_events(events: &RewardEpochEvents, config: &NetworkConfig) -> anyhow::Result<Self> {
        let policy = &events.signing_policy_initialized;
        let reward_epoch_id = events.previous_reward_epoch_started.rewardEpochId.to::<u32>() + 1;
        let check = |event: &'static str, actual: U24| -> Result<(), InvariantViolation> {
            let actual = actual.to::<u32>();
            if actual != reward_epoch_id {
                return Err(InvariantViolation::RewardEpochIdMismatch {
                    event,
                    expected: reward_epoch_id,
                    actual,
                });
            }
            Ok(())
        };
        check("SigningPolicyInitialized", policy.rewardEpochId)?;
        check("RandomAcquisitionStarted", events.random_acquisition_started.rewardEpochId)?;
        check("VotePowerBlockSelected", events.vote_power_block_selected.rewardEpochId)?;
        for offer in &events.rewards_offered {
            check("RewardsOffered", offer.rewardEpochId)?;
        }
        for offer in &events.inflation_rewards_offered {
            check("InflationRewardsOffered", offer.rewardEpochId)?;
        }
        for registration in &events.voters_registered {
            check("VoterRegistered", registration.rewardEpochId)?;
        }
        for info in &events.voter_registration_infos {
            check("VoterRegistrationInfo", info.rewardEpochId)?;
        }

        let registrations: HashMap<Address, _> =
            events.voters_registered.iter().map(|r| (r.signingPolicyAddress, r)).collect();
        let infos: HashMap<Address, _> =
            events.voter_registration_infos.iter().map(|i| (i.voter, i)).collect();
        let mut voters = Vec::with_capacity(policy.voters.len());
        for (signing_address, weight) in policy.voters.iter().zip(&policy.weights) {
            let registration = registrations.get(signing_address).with_context(|| {
                format!("no registration for signing policy voter {signing_address} in reward epoch {reward_epoch_id}")
            })?;
            let info = infos.get(&registration.voter).with_context(|| {
                format!("no registration info for voter {} in reward epoch {reward_epoch_id}", registration.voter)
            })?;
            voters.push(VoterWeights {
                identity_address: registration.voter,
                submit_address: registration.submitAddress,
                submit_signatures_address: registration.submitSignaturesAddress,
                signing_address: *signing_address,
                delegation_address: info.delegationAddress,
                delegation_weight: info.wNatWeight,
                capped_delegation_weight: info.wNatCappedWeight,
                registration_weight: registration.registrationWeight,
                signing_policy_weight: *weight,
                fee_bips: info.delegationFeeBIPS,
                node_ids: info.nodeIds.clone(),
                node_weights: info.nodeWeights.clone(),
            });
        }

        let mut offers: Vec<RewardOffer> = events.rewards_offered.iter().map(RewardOffer::from).collect();
        for inflation in &events.inflation_rewards_offered {
            offers.extend(split_inflation_offer(inflation, config.rewards.burn_address)?);
        }

        let mut feeds: BTreeMap<FeedId, i8> = BTreeMap::new();
        for offer in &offers {
            feeds.entry(offer.feed_id).or_insert(offer.decimals);
        }

        Ok(Self::new(RewardEpochInfo {
            reward_epoch_id,
            previous_reward_epoch_start_voting_round_id: events
                .previous_reward_epoch_started
                .startVotingRoundId,
            previous_reward_epoch_start_ts: events.previous_reward_epoch_started.timestamp,
            random_acquisition_start_ts: events.random_acquisition_started.timestamp,
            vote_power_block: events.vote_power_block_selected.votePowerBlock,
            signing_policy: SigningPolicy {
                reward_epoch_id,
                start_voting_round_id: policy.startVotingRoundId,
                threshold: policy.threshold,
                seed: policy.seed,
                voters: policy.voters.clone(),
                weights: policy.weights.clone(),
            },
            signing_policy_hash: SigningPolicy::hash_bytes(&policy.signingPolicyBytes),
            signing_policy_initialized_ts: policy.timestamp,
            voters,
            canonical_feed_order: feeds.into_iter().map(|(id, decimals)| Feed { id, decimals }).collect(),
            offers,
        }))
    }

    pub fn info(&self) -> &RewardEpochInfo {
        &self.info
    }

    pub fn reward_epoch_id(&self) -> u32 {
        self.info.reward_epoch_id
    }

    pub fn start_voting_round_id(&self) -> u32 {
        self.info.signing_policy.start_voting_round_id
    }

    pub fn signing_policy(&self) -> &SigningPolicy {
        &self.info.signing_policy
    }

    pub fn signing_policy_hash(&self) -> B256 {
        self.info.signing_policy_hash
    }

    pub fn voters(&self) -> &[VoterWeights] {
        &self.info.voters
    }

    pub fn canonical_feed_order(&self) -> &[Feed] {
        &self.info.canonical_feed_order
    }

    pub fn offers(&self) -> &[RewardOffer] {
        &self.info.offers
    }

    pub fn feed_index(&self, feed_id: &FeedId) -> Option<usize> {
        self.feed_index.get(feed_id).copied()
    }

    pub fn is_eligible_submit_address(&self, submit_address: &Address) -> bool {
        self.by_submit.contains_key(submit_address)
    }

    pub fn voter_for_submit_address(&self, submit_address: &Address) -> Option<&VoterWeights> {
        self.by_submit.get(submit_address).map(|&i| &self.info.voters[i])
    }

    pub fn voter_for_submit_signatures_address(&self, address: &Address) -> Option<&VoterWeights> {
        self.by_submit_signatures.get(address).map(|&i| &self.info.voters[i])
    }

    pub fn voter_for_signing_address(&self, signing_address: &Address) -> Option<&VoterWeights> {
        self.by_signing.get(signing_address).map(|&i| &self.info.voters[i])
    }

    pub fn voter_for_identity_address(&self, identity_address: &Address) -> Option<&VoterWeights> {
        self.by_identity.get(identity_address).map(|&i| &self.info.voters[i])
    }

    /// Signing policy position of a signing address.
    pub fn signer_index(&self, signing_address: &Address) -> Option<u16> {
        self.by_signing.get(signing_address).map(|&i| i as u16)
    }

    /// Capped delegation weight of the voter submitting from `submit_address`, zero for
    /// unknown addresses.
    pub fn median_reward_distribution_weight(&self, submit_address: &Address) -> U256 {
        self.voter_for_submit_address(submit_address)
            .map_or(U256::ZERO, |v| v.capped_delegation_weight)
    }

    pub fn capped_weight_for_delegation_address(&self, delegation_address: &Address) -> U256 {
        self.by_delegation
            .get(delegation_address)
            .map_or(U256::ZERO, |&i| self.info.voters[i].capped_delegation_weight)
    }

    /// Sum of signing policy weights.
    pub fn total_signing_policy_weight(&self) -> u64 {
        self.info.signing_policy.total_weight()
    }

    /// Sum of the median weights of all registered voters.
    pub fn total_median_weight(&self) -> U256 {
        self.info.voters.iter().fold(U256::ZERO, |acc, v| acc + v.capped_delegation_weight)
    }

    /// Sum of the signing reward weights of all registered voters.
    pub fn total_signing_weight(&self) -> U256 {
        self.info.voters.iter().fold(U256::ZERO, |acc, v| acc + v.signing_weight())
    }

    /// Submit addresses in signing policy order.
    pub fn submit_addresses(&self) -> Vec<Address> {
        self.info.voters.iter().map(|v| v.submit_address).collect()
    }

    /// Unique feeds offered this epoch, canonically ordered.
    pub fn offered_feeds(&self) -> BTreeSet<FeedId> {
        self.info.offers.iter().map(|o| o.feed_id).collect()
    }
}

/// Resolves and caches reward epochs from the ledger.
pub struct RewardEpochManager<L> {
    queries: LedgerQueries<L>,
    cache: RwLock<BTreeMap<u32, Arc<RewardEpoch>>>,
}

impl<L: Ledger> RewardEpochManager<L> {
    pub fn new(queries: LedgerQueries<L>) -> Self {
        Self { queries, cache: RwLock::new(BTreeMap::new()) }
    }

    pub fn queries(&self) -> &LedgerQueries<L> {
        &self.queries
    }

    pub fn config(&self) -> &NetworkConfig {
        self.queries.config()
    }

    /// Seed the cache, e.g. from a persisted `reward-epoch-info.json`.
    pub async fn insert(&self, epoch: RewardEpoch) -> Arc<RewardEpoch> {
        let epoch = Arc::new(epoch);
        self.cache.write().await.insert(epoch.reward_epoch_id(), epoch.clone());
        epoch
    }

    /// The reward epoch with the given id, or `None` while its signing policy is not indexed.
    pub async fn reward_epoch(&self, reward_epoch_id: u32) -> anyhow::Result<Option<Arc<RewardEpoch>>> {
        if let Some(epoch) = self.cache.read().await.get(&reward_epoch_id) {
            return Ok(Some(epoch.clone()));
        }
        let response = self.queries.reward_epoch_events(reward_epoch_id).await?;
        let Some(events) = response.data else {
            tracing::debug!(reward_epoch_id, status = ?response.status, "Reward epoch not yet available");
            return Ok(None);
        };
        let epoch = RewardEpoch::from_events(&events, self.config())
            .with_context(|| format!("Failed to build reward epoch {reward_epoch_id}"))?;
        tracing::info!(
            reward_epoch_id,
            voters = epoch.voters().len(),
            feeds = epoch.canonical_feed_order().len(),
            start_voting_round_id = epoch.start_voting_round_id(),
            "Loaded reward epoch"
        );
        Ok(Some(self.insert(epoch).await))
    }

    /// The reward epoch a voting round belongs to.
    ///
    /// Reward epochs may start later than expected, never earlier, so a round before the
    /// expected epoch's actual start belongs to the previous epoch.
    pub async fn reward_epoch_for_voting_round(
        &self,
        voting_round_id: u32,
    ) -> anyhow::Result<Option<Arc<RewardEpoch>>> {
        let expected =
            self.config().epoch_settings.expected_reward_epoch_for_voting_epoch(voting_round_id);
        if let Some(epoch) = self.reward_epoch(expected).await? {
            if epoch.start_voting_round_id() <= voting_round_id {
                return Ok(Some(epoch));
            }
        }
        match expected.checked_sub(1) {
            Some(previous) => self.reward_epoch(previous).await,
            None => Ok(None),
        }
    }

    /// The last voting round of a reward epoch, known once the next epoch's signing policy is.
    pub async fn end_voting_round_id(&self, reward_epoch_id: u32) -> anyhow::Result<Option<u32>> {
        let next_id = reward_epoch_id.checked_add(1).ok_or_else(|| {
            InvariantViolation::InvalidParameter(format!("reward epoch {reward_epoch_id} has no successor"))
        })?;
        let Some(next) = self.queries.signing_policy_initialized(next_id).await?.data else {
            return Ok(None);
        };
        let end = next.startVotingRoundId.checked_sub(1).ok_or_else(|| {
            InvariantViolation::InvalidParameter(format!(
                "signing policy of reward epoch {next_id} starts at voting round 0"
            ))
        })?;
        Ok(Some(end))
    }

    /// Expected last voting round of a reward epoch from epoch timing alone.
    pub fn expected_end_voting_round_id(&self, reward_epoch_id: u32) -> Result<u32, InvariantViolation> {
        reward_epoch_id
            .checked_add(1)
            .map(|next| self.config().epoch_settings.expected_reward_epoch_start_voting_round_id(next))
            .and_then(|start| start.checked_sub(1))
            .ok_or_else(|| {
                InvariantViolation::InvalidParameter(format!(
                    "reward epoch {reward_epoch_id} has no expected end voting round"
                ))
            })
    }
}
