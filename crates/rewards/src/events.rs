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

//! Reward epoch events and their retrieval from the indexed ledger.

use alloy_sol_types::{sol, SolEvent};
use anyhow::{bail, Context};

use crate::ledger::{BlockAssuranceResult, Ledger, LedgerQueries, LedgerResponse, LogRecord};

sol! {
    #![sol(all_derives)]

    event SigningPolicyInitialized(
        uint24 indexed rewardEpochId,
        uint32 startVotingRoundId,
        uint16 threshold,
        uint256 seed,
        address[] voters,
        uint16[] weights,
        bytes signingPolicyBytes,
        uint64 timestamp
    );

    event VoterRegistered(
        address indexed voter,
        uint24 indexed rewardEpochId,
        address indexed signingPolicyAddress,
        address submitAddress,
        address submitSignaturesAddress,
        bytes32 publicKeyPart1,
        bytes32 publicKeyPart2,
        uint256 registrationWeight
    );

    event VoterRegistrationInfo(
        address indexed voter,
        uint24 indexed rewardEpochId,
        address delegationAddress,
        uint16 delegationFeeBIPS,
        uint256 wNatWeight,
        uint256 wNatCappedWeight,
        bytes20[] nodeIds,
        uint256[] nodeWeights
    );

    event RandomAcquisitionStarted(uint24 indexed rewardEpochId, uint64 timestamp);

    event VotePowerBlockSelected(uint24 indexed rewardEpochId, uint64 votePowerBlock, uint64 timestamp);

    event RewardEpochStarted(uint24 indexed rewardEpochId, uint32 startVotingRoundId, uint64 timestamp);

    event RewardsOffered(
        uint24 indexed rewardEpochId,
        bytes21 feedId,
        int8 decimals,
        uint256 amount,
        uint16 minRewardedTurnoutBIPS,
        uint24 primaryBandRewardSharePPM,
        uint24 secondaryBandWidthPPM,
        address claimBackAddress
    );

    event InflationRewardsOffered(
        uint24 indexed rewardEpochId,
        bytes feedIds,
        bytes decimals,
        uint256 amount,
        uint16 minRewardedTurnoutBIPS,
        uint24 primaryBandRewardSharePPM,
        bytes secondaryBandWidthPPMs,
        uint16 mode
    );
}

/// Everything emitted on-chain while a reward epoch was being set up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardEpochEvents {
    pub previous_reward_epoch_started: RewardEpochStarted,
    pub random_acquisition_started: RandomAcquisitionStarted,
    pub vote_power_block_selected: VotePowerBlockSelected,
    pub signing_policy_initialized: SigningPolicyInitialized,
    pub voters_registered: Vec<VoterRegistered>,
    pub voter_registration_infos: Vec<VoterRegistrationInfo>,
    pub rewards_offered: Vec<RewardsOffered>,
    pub inflation_rewards_offered: Vec<InflationRewardsOffered>,
}

/// Decode logs of one event type. Logs that fail to decode are logged and skipped.
pub fn decode_logs<E: SolEvent>(logs: &[LogRecord]) -> Vec<E> {
    logs.iter()
        .filter_map(|log| match E::decode_raw_log(log.topics.iter().copied(), &log.data) {
            Ok(event) => Some(event),
            Err(err) => {
                tracing::warn!(tx = %log.transaction_hash, "Skipping undecodable {} log: {err}", E::SIGNATURE);
                None
            }
        })
        .collect()
}

impl<L: Ledger> LedgerQueries<L> {
    /// Logs of event `E` emitted by `address` in `[start, end]`, decoded.
    pub async fn events_in_range<E: SolEvent>(
        &self,
        address: alloy_primitives::Address,
        start: u64,
        end: u64,
    ) -> anyhow::Result<LedgerResponse<Vec<E>>> {
        let response = self
            .ledger()
            .logs_in_range(address, E::SIGNATURE_HASH, start, end)
            .await
            .with_context(|| format!("Failed to get {} logs", E::SIGNATURE))?;
        Ok(response.map(|logs| decode_logs(&logs)))
    }

    /// The signing policy of `reward_epoch_id`, if it has been initialized in the indexed range.
    pub async fn signing_policy_initialized(
        &self,
        reward_epoch_id: u32,
    ) -> anyhow::Result<LedgerResponse<Option<SigningPolicyInitialized>>> {
        let epochs = &self.config().epoch_settings;
        let start = epochs.expected_reward_epoch_start_sec(reward_epoch_id.saturating_sub(1));
        let end = epochs.expected_reward_epoch_start_sec(reward_epoch_id)
            + epochs.reward_epoch_duration_sec();
        let response = self
            .events_in_range::<SigningPolicyInitialized>(self.config().contracts.relay, start, end)
            .await?;
        Ok(response.map(|events| {
            events.into_iter().find(|e| e.rewardEpochId.to::<u32>() == reward_epoch_id)
        }))
    }

    /// Collect the setup events of `reward_epoch_id`.
    ///
    /// Returns `None` data while the signing policy is not yet initialized. Once it is, every
    /// other event is expected to be present in the index; a missing one is an error. The
    /// policy search range reaching past the indexed head does not matter once it is found.
    pub async fn reward_epoch_events(
        &self,
        reward_epoch_id: u32,
    ) -> anyhow::Result<LedgerResponse<Option<RewardEpochEvents>>> {
        let policy_response = self.signing_policy_initialized(reward_epoch_id).await?;
        let Some(signing_policy_initialized) = policy_response.data else {
            return Ok(LedgerResponse { status: policy_response.status, data: None });
        };
        let previous_id = reward_epoch_id
            .checked_sub(1)
            .context("reward epoch 0 has no predecessor to take setup events from")?;
        let policy_ts = signing_policy_initialized.timestamp;

        let epochs = &self.config().epoch_settings;
        let contracts = &self.config().contracts;
        let previous_start = epochs.expected_reward_epoch_start_sec(previous_id);
        let started_response = self
            .events_in_range::<RewardEpochStarted>(
                contracts.flare_systems_manager,
                previous_start.saturating_sub(epochs.reward_epoch_duration_sec()),
                policy_ts,
            )
            .await?;
        let previous_reward_epoch_started = started_response
            .data
            .into_iter()
            .find(|e| e.rewardEpochId.to::<u32>() == previous_id)
            .with_context(|| format!("RewardEpochStarted for reward epoch {previous_id} not indexed"))?;

        let start = previous_reward_epoch_started.timestamp;
        tracing::debug!(reward_epoch_id, start, end = policy_ts, "Querying reward epoch setup events");
        let (random, vote_power, registered, infos, offers, inflation) = tokio::join!(
            self.events_in_range::<RandomAcquisitionStarted>(contracts.flare_systems_manager, start, policy_ts),
            self.events_in_range::<VotePowerBlockSelected>(contracts.flare_systems_manager, start, policy_ts),
            self.events_in_range::<VoterRegistered>(contracts.voter_registry, start, policy_ts),
            self.events_in_range::<VoterRegistrationInfo>(contracts.flare_systems_calculator, start, policy_ts),
            self.events_in_range::<RewardsOffered>(contracts.ftso_reward_offers_manager, start, policy_ts),
            self.events_in_range::<InflationRewardsOffered>(contracts.ftso_reward_offers_manager, start, policy_ts),
        );
        let (random, vote_power, registered, infos, offers, inflation) =
            (random?, vote_power?, registered?, infos?, offers?, inflation?);

        let status = [
            &random.status,
            &vote_power.status,
            &registered.status,
            &infos.status,
            &offers.status,
            &inflation.status,
        ]
        .into_iter()
        .fold(started_response.status, |acc, s| acc.and(*s));
        if status == BlockAssuranceResult::NotOk {
            return Ok(LedgerResponse { status, data: None });
        }

        let Some(random_acquisition_started) = random.data.into_iter().last() else {
            bail!("RandomAcquisitionStarted for reward epoch {reward_epoch_id} not indexed");
        };
        let Some(vote_power_block_selected) = vote_power.data.into_iter().last() else {
            bail!("VotePowerBlockSelected for reward epoch {reward_epoch_id} not indexed");
        };

        Ok(LedgerResponse {
            status,
            data: Some(RewardEpochEvents {
                previous_reward_epoch_started,
                random_acquisition_started,
                vote_power_block_selected,
                signing_policy_initialized,
                voters_registered: registered.data,
                voter_registration_infos: infos.data,
                rewards_offered: offers.data,
                inflation_rewards_offered: inflation.data,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use alloy_primitives::aliases::U24;

    use super::*;
    use crate::test_utils::EpochFixture;

    fn logs_of<E: SolEvent>(logs: &[LogRecord]) -> Vec<LogRecord> {
        logs.iter().filter(|l| l.topics.first() == Some(&E::SIGNATURE_HASH)).cloned().collect()
    }

    #[test]
    fn uint24_fields_decode_from_logs() {
        let fixture = EpochFixture::new(3);
        let events = fixture.events();
        let ledger = fixture.ledger_with_epoch_events();

        let offered: Vec<RewardsOffered> = decode_logs(&logs_of::<RewardsOffered>(ledger.logs()));
        assert_eq!(offered, events.rewards_offered);
        assert_eq!(offered[0].rewardEpochId.to::<u32>(), fixture.reward_epoch_id);
        assert_eq!(offered[0].primaryBandRewardSharePPM, U24::from(600_000));

        let registered: Vec<VoterRegistered> = decode_logs(&logs_of::<VoterRegistered>(ledger.logs()));
        assert_eq!(registered, events.voters_registered);
    }

    #[test_log::test(tokio::test)]
    async fn collects_setup_events_of_reward_epoch() {
        let fixture = EpochFixture::new(3);
        let queries = LedgerQueries::new(fixture.ledger_with_epoch_events(), Arc::new(fixture.config.clone()));

        let response = queries.reward_epoch_events(fixture.reward_epoch_id).await.unwrap();
        assert_eq!(response.data, Some(fixture.events()));

        let next = queries.reward_epoch_events(fixture.reward_epoch_id + 1).await.unwrap();
        assert_eq!(next.data, None);
    }
}
