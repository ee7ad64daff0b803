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

//! Reconstruction of a voting round's protocol state from the indexed ledger.
//!
//! For one voting round the [DataManager] gathers commits and reveals, checks reveals against
//! commits, determines reveal offenders over the random benching window and, for reward
//! calculation, collects signatures and finalizations. Malformed or ineligible submissions are
//! logged and dropped. Only epoch-wide inconsistencies are errors.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, LazyLock},
};

use alloy_primitives::{keccak256, Address, B256, U256};
use serde::{Deserialize, Serialize};

pub use crate::ledger::BlockAssuranceResult as DataAvailabilityStatus;
use crate::{
    config::NetworkConfig,
    encoding::{CommitData, PayloadMessage, RelayMessage, RevealData, SignaturePayload},
    epoch::{Feed, RewardEpoch, RewardEpochManager},
    errors::{InvariantViolation, RelayVerificationError},
    ledger::{ContractMethod, FinalizationData, Ledger, LedgerResponse, SubmissionData},
    serde_utils::u256_dec_map,
};

/// Message hash under which signatures are filed whose signer does not match the sender's
/// registered signing address, when signatures are checked against a fixed message hash.
pub static WRONG_SIGNATURE_INDICATOR_MESSAGE_HASH: LazyLock<B256> =
    LazyLock::new(|| keccak256(b"WRONG_SIGNATURE"));

/// Last commit and last reveal per submit address for one voting round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitsAndReveals {
    pub commits: BTreeMap<Address, SubmissionData<CommitData>>,
    pub reveals: BTreeMap<Address, SubmissionData<RevealData>>,
}

/// Commit/reveal outcome of one voting round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataForCalculations {
    pub reward_epoch_id: u32,
    pub voting_round_id: u32,
    /// Submit addresses of all registered voters, in signing policy order.
    pub ordered_voters_submit_addresses: Vec<Address>,
    /// Reveals of eligible voters that open their commit.
    pub valid_eligible_reveals: BTreeMap<Address, RevealData>,
    /// Eligible voters that committed without a valid reveal.
    pub reveal_offenders: BTreeSet<Address>,
    /// Median weight by submit address.
    #[serde(with = "u256_dec_map")]
    pub voters_weights: BTreeMap<Address, U256>,
    pub feed_order: Vec<Feed>,
    /// Reveal offenders of the benching window preceding this round.
    pub benching_window_reveal_offenders: BTreeSet<Address>,
}

impl DataForCalculations {
    /// Revealed values of `submit_address` in feed order; empty without a valid reveal.
    pub fn feed_values(&self, submit_address: &Address) -> Vec<Option<i64>> {
        self.valid_eligible_reveals
            .get(submit_address)
            .map(|reveal| reveal.feed_values(self.feed_order.len()))
            .unwrap_or_else(|| vec![None; self.feed_order.len()])
    }
}

/// A decoded relay of this round's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedFinalizationData {
    #[serde(flatten)]
    pub submission: SubmissionData<RelayMessage>,
    /// The relay contract would accept the message.
    pub successful_on_chain: bool,
}

/// Everything reward calculation needs to know about a voting round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataForRewardCalculation {
    pub data_for_calculations: DataForCalculations,
    /// Eligible signatures by signed message hash, chronological, one per signer and hash.
    pub signatures: BTreeMap<B256, Vec<SubmissionData<SignaturePayload>>>,
    /// One finalization per sender, chronological.
    pub finalizations: Vec<ParsedFinalizationData>,
    pub first_successful_finalization: Option<ParsedFinalizationData>,
}

/// Builds per-round calculation data from the ledger.
pub struct DataManager<L> {
    epochs: Arc<RewardEpochManager<L>>,
}

impl<L: Ledger> DataManager<L> {
    pub fn new(epochs: Arc<RewardEpochManager<L>>) -> Self {
        Self { epochs }
    }

    pub fn epochs(&self) -> &Arc<RewardEpochManager<L>> {
        &self.epochs
    }

    fn config(&self) -> &NetworkConfig {
        self.epochs.config()
    }

    /// Commits and reveals for every voting round in `[first_voting_round_id, last_voting_round_id]`.
    pub async fn commits_and_reveals(
        &self,
        first_voting_round_id: u32,
        last_voting_round_id: u32,
        end_timeout: Option<u64>,
    ) -> anyhow::Result<LedgerResponse<BTreeMap<u32, CommitsAndReveals>>> {
        let epochs = &self.config().epoch_settings;
        let queries = self.epochs.queries();
        let (commits, reveals) = tokio::join!(
            queries.submission_data_in_range(
                ContractMethod::Submit1,
                epochs.voting_epoch_start_sec(first_voting_round_id),
                epochs.voting_epoch_end_sec(last_voting_round_id),
                end_timeout,
            ),
            queries.submission_data_in_range(
                ContractMethod::Submit2,
                epochs.voting_epoch_start_sec(first_voting_round_id + 1),
                epochs.reveal_deadline_sec(last_voting_round_id + 1),
                end_timeout,
            ),
        );
        let (commits, reveals) = (commits?, reveals?);
        let status = commits.status.and(reveals.status);

        let mut result: BTreeMap<u32, CommitsAndReveals> = (first_voting_round_id..=last_voting_round_id)
            .map(|round| (round, CommitsAndReveals::default()))
            .collect();
        for submission in &commits.data {
            for message in self.protocol_messages(submission) {
                if message.voting_round_id != submission.voting_epoch_id_from_timestamp {
                    continue;
                }
                let Some(round) = result.get_mut(&message.voting_round_id) else { continue };
                match CommitData::decode(&message.payload) {
                    Ok(commit) => {
                        round.commits.insert(submission.submit_address, submission.with_messages(commit));
                    }
                    Err(err) => tracing::debug!(
                        voting_round_id = message.voting_round_id,
                        submit_address = %submission.submit_address,
                        "Skipping malformed commit: {err}"
                    ),
                }
            }
        }
        let reveal_deadline = epochs.reveal_deadline_seconds;
        for submission in &reveals.data {
            if submission.relative_timestamp >= reveal_deadline {
                continue;
            }
            for message in self.protocol_messages(submission) {
                if message.voting_round_id + 1 != submission.voting_epoch_id_from_timestamp {
                    continue;
                }
                let Some(round) = result.get_mut(&message.voting_round_id) else { continue };
                match RevealData::decode(&message.payload) {
                    Ok(reveal) => {
                        round.reveals.insert(submission.submit_address, submission.with_messages(reveal));
                    }
                    Err(err) => tracing::debug!(
                        voting_round_id = message.voting_round_id,
                        submit_address = %submission.submit_address,
                        "Skipping malformed reveal: {err}"
                    ),
                }
            }
        }
        Ok(LedgerResponse { status, data: result })
    }

    fn protocol_messages<'a>(
        &self,
        submission: &'a SubmissionData,
    ) -> impl Iterator<Item = &'a PayloadMessage> + 'a {
        let protocol_id = self.config().protocol_id;
        submission.messages.iter().filter(move |m| m.protocol_id == protocol_id)
    }

    /// Commit/reveal state of one voting round, including benching window offenders.
    ///
    /// `TIMEOUT_OK` data is returned as is; it is up to the caller whether provisional data
    /// is acceptable.
    pub async fn data_for_calculations(
        &self,
        voting_round_id: u32,
        benching_window: u32,
        end_timeout: Option<u64>,
    ) -> anyhow::Result<LedgerResponse<Option<DataForCalculations>>> {
        let Some(epoch) = self.epochs.reward_epoch_for_voting_round(voting_round_id).await? else {
            return Ok(LedgerResponse { status: DataAvailabilityStatus::NotOk, data: None });
        };

        let mut first_round = voting_round_id.saturating_sub(benching_window);
        if self.config().is_initial_reward_epoch(epoch.reward_epoch_id()) {
            first_round = first_round.max(epoch.start_voting_round_id());
        }
        let response = self.commits_and_reveals(first_round, voting_round_id, end_timeout).await?;
        if response.status == DataAvailabilityStatus::NotOk {
            return Ok(LedgerResponse { status: response.status, data: None });
        }
        let mut rounds = response.data;

        let mut benching_window_reveal_offenders = BTreeSet::new();
        for round in first_round..voting_round_id {
            let Some(round_epoch) = self.epochs.reward_epoch_for_voting_round(round).await? else {
                return Ok(LedgerResponse { status: DataAvailabilityStatus::NotOk, data: None });
            };
            let Some(data) = rounds.remove(&round) else { continue };
            let (_, offenders) = valid_reveals_and_offenders(&round_epoch, round, &data);
            benching_window_reveal_offenders.extend(offenders);
        }

        let current = rounds.remove(&voting_round_id).unwrap_or_default();
        let (valid_eligible_reveals, reveal_offenders) =
            valid_reveals_and_offenders(&epoch, voting_round_id, &current);

        let ordered_voters_submit_addresses = epoch.submit_addresses();
        let voters_weights = ordered_voters_submit_addresses
            .iter()
            .map(|a| (*a, epoch.median_reward_distribution_weight(a)))
            .collect();
        tracing::debug!(
            voting_round_id,
            reveals = valid_eligible_reveals.len(),
            offenders = reveal_offenders.len(),
            benched = benching_window_reveal_offenders.len(),
            "Assembled commit/reveal data"
        );
        Ok(LedgerResponse {
            status: response.status,
            data: Some(DataForCalculations {
                reward_epoch_id: epoch.reward_epoch_id(),
                voting_round_id,
                ordered_voters_submit_addresses,
                valid_eligible_reveals,
                reveal_offenders,
                voters_weights,
                feed_order: epoch.canonical_feed_order().to_vec(),
                benching_window_reveal_offenders,
            }),
        })
    }

    /// Full reward calculation data of a voting round.
    ///
    /// Rewards are only ever computed from complete data: anything but `OK` yields no data.
    /// `fixed_message_hash` checks signatures against an externally fixed hash instead of the
    /// hash of the signed message.
    pub async fn data_for_reward_calculation(
        &self,
        voting_round_id: u32,
        benching_window: u32,
        fixed_message_hash: Option<B256>,
    ) -> anyhow::Result<LedgerResponse<Option<DataForRewardCalculation>>> {
        let response = self.data_for_calculations(voting_round_id, benching_window, None).await?;
        let Some(data_for_calculations) = response.data.filter(|_| response.status == DataAvailabilityStatus::Ok)
        else {
            return Ok(LedgerResponse { status: response.status, data: None });
        };
        let Some(epoch) = self.epochs.reward_epoch(data_for_calculations.reward_epoch_id).await? else {
            return Ok(LedgerResponse { status: DataAvailabilityStatus::NotOk, data: None });
        };

        let config = self.config();
        let epochs = &config.epoch_settings;
        let start = epochs.reveal_deadline_sec(voting_round_id + 1) + 1;
        let end = epochs.voting_epoch_end_sec(
            voting_round_id + 1 + config.rewards.additional_rewarded_finalization_windows,
        );
        let queries = self.epochs.queries();
        let (signatures, finalizations) = tokio::join!(
            queries.submission_data_in_range(ContractMethod::SubmitSignatures, start, end, None),
            queries.finalizations_in_range(start, end),
        );
        let (signatures, finalizations) = (signatures?, finalizations?);
        let status = signatures.status.and(finalizations.status);
        if status != DataAvailabilityStatus::Ok {
            return Ok(LedgerResponse { status, data: None });
        }

        let signatures = self.extract_signatures(&epoch, voting_round_id, &signatures.data, fixed_message_hash);
        let finalizations = self.extract_finalizations(&epoch, voting_round_id, &finalizations.data)?;
        let first_successful_finalization = finalizations.iter().find(|f| f.successful_on_chain).cloned();
        Ok(LedgerResponse::ok(Some(DataForRewardCalculation {
            data_for_calculations,
            signatures,
            finalizations,
            first_successful_finalization,
        })))
    }

    fn extract_signatures(
        &self,
        epoch: &RewardEpoch,
        voting_round_id: u32,
        submissions: &[SubmissionData],
        fixed_message_hash: Option<B256>,
    ) -> BTreeMap<B256, Vec<SubmissionData<SignaturePayload>>> {
        let mut result: BTreeMap<B256, Vec<SubmissionData<SignaturePayload>>> = BTreeMap::new();
        let mut seen: BTreeSet<(B256, Address)> = BTreeSet::new();
        for submission in submissions {
            for message in self.protocol_messages(submission) {
                if message.voting_round_id != voting_round_id {
                    continue;
                }
                let mut payload = match SignaturePayload::decode(&message.payload) {
                    Ok(payload) => payload,
                    Err(err) => {
                        tracing::debug!(voting_round_id, submit_address = %submission.submit_address, "Skipping malformed signature payload: {err}");
                        continue;
                    }
                };
                if payload.message.protocol_id != message.protocol_id
                    || payload.message.voting_round_id != message.voting_round_id
                {
                    tracing::debug!(voting_round_id, submit_address = %submission.submit_address, "Signed message does not match its envelope");
                    continue;
                }
                let Some(voter) = epoch.voter_for_submit_signatures_address(&submission.submit_address) else {
                    tracing::debug!(voting_round_id, submit_address = %submission.submit_address, "Signature from unregistered sender");
                    continue;
                };
                let mut message_hash = fixed_message_hash.unwrap_or_else(|| payload.message.hash());
                let recovered = match payload.signature.recover_signer(message_hash) {
                    Ok(recovered) => recovered,
                    Err(err) => {
                        tracing::debug!(voting_round_id, submit_address = %submission.submit_address, "Unrecoverable signature: {err}");
                        continue;
                    }
                };
                if recovered != voter.signing_address {
                    if fixed_message_hash.is_none() {
                        tracing::debug!(
                            voting_round_id,
                            %recovered,
                            expected = %voter.signing_address,
                            "Signature signer does not match sender's signing address"
                        );
                        continue;
                    }
                    message_hash = *WRONG_SIGNATURE_INDICATOR_MESSAGE_HASH;
                }
                let signer = voter.signing_address;
                if !seen.insert((message_hash, signer)) {
                    continue;
                }
                payload.signer = Some(signer);
                payload.index = epoch.signer_index(&signer);
                payload.weight = Some(voter.signing_policy_weight);
                payload.message_hash = Some(message_hash);
                result.entry(message_hash).or_default().push(submission.with_messages(payload));
            }
        }
        result
    }

    fn extract_finalizations(
        &self,
        epoch: &RewardEpoch,
        voting_round_id: u32,
        finalizations: &[FinalizationData],
    ) -> Result<Vec<ParsedFinalizationData>, InvariantViolation> {
        let protocol_id = self.config().protocol_id;
        let mut senders = BTreeSet::new();
        let mut result = Vec::new();
        for finalization in finalizations {
            let relay = match RelayMessage::decode(&finalization.message) {
                Ok(relay) => relay,
                Err(err) => {
                    tracing::debug!(voting_round_id, submit_address = %finalization.submit_address, "Skipping undecodable relay: {err}");
                    continue;
                }
            };
            let message = &relay.protocol_message_merkle_root;
            if message.protocol_id != protocol_id
                || message.voting_round_id != voting_round_id
                || relay.signing_policy.reward_epoch_id != epoch.reward_epoch_id()
            {
                continue;
            }
            let policy_hash = relay.signing_policy.hash();
            if policy_hash != epoch.signing_policy_hash() {
                return Err(InvariantViolation::SigningPolicyHashMismatch {
                    reward_epoch_id: epoch.reward_epoch_id(),
                    expected: epoch.signing_policy_hash(),
                    actual: policy_hash,
                });
            }
            if !senders.insert(finalization.submit_address) {
                continue;
            }
            let successful_on_chain = match relay.verify() {
                Ok(()) => true,
                Err(RelayVerificationError::Duplicate(violation)) => {
                    tracing::warn!(voting_round_id, submit_address = %finalization.submit_address, "Relay with {violation}");
                    false
                }
                Err(err) => {
                    tracing::debug!(voting_round_id, submit_address = %finalization.submit_address, "Relay would not finalize: {err}");
                    false
                }
            };
            result.push(ParsedFinalizationData {
                submission: SubmissionData {
                    block_number: finalization.block_number,
                    transaction_index: finalization.transaction_index,
                    timestamp: finalization.timestamp,
                    voting_epoch_id_from_timestamp: finalization.voting_epoch_id_from_timestamp,
                    relative_timestamp: finalization.relative_timestamp,
                    submit_address: finalization.submit_address,
                    messages: relay,
                },
                successful_on_chain,
            });
        }
        Ok(result)
    }
}

/// Split the commits of eligible voters into valid reveals and reveal offenders.
pub fn valid_reveals_and_offenders(
    epoch: &RewardEpoch,
    voting_round_id: u32,
    data: &CommitsAndReveals,
) -> (BTreeMap<Address, RevealData>, BTreeSet<Address>) {
    let mut valid = BTreeMap::new();
    let mut offenders = BTreeSet::new();
    for (address, commit) in &data.commits {
        if !epoch.is_eligible_submit_address(address) {
            tracing::debug!(voting_round_id, submit_address = %address, "Ignoring commit from non-registered voter");
            continue;
        }
        match data.reveals.get(address) {
            Some(reveal) if reveal.messages.matches(&commit.messages, *address, voting_round_id) => {
                valid.insert(*address, reveal.messages.clone());
            }
            Some(_) => {
                tracing::debug!(voting_round_id, submit_address = %address, "Reveal does not match commit");
                offenders.insert(*address);
            }
            None => {
                offenders.insert(*address);
            }
        }
    }
    (valid, offenders)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        encoding::encode_feed_values,
        test_utils::{EpochFixture, RoundScript},
    };

    #[test_log::test(tokio::test)]
    async fn keeps_last_commit_and_reveal_and_flags_offenders() {
        let fixture = EpochFixture::new(4);
        let round = fixture.start_voting_round_id + 1;
        let mut script = RoundScript::new(&fixture, round);
        let values = vec![Some(100), Some(200), Some(300)];
        // Voter 0 commits twice; only the second commit is opened.
        script.commit(0, B256::repeat_byte(1), &values);
        script.commit(0, B256::repeat_byte(2), &values);
        script.reveal(0, B256::repeat_byte(2), &values);
        // Voter 1 reveals different values than committed.
        script.commit(1, B256::repeat_byte(3), &values);
        script.reveal_raw(1, B256::repeat_byte(3), encode_feed_values(&[Some(1)]));
        // Voter 2 commits and never reveals, voter 3 stays silent.
        script.commit(2, B256::repeat_byte(4), &values);

        let manager = fixture.data_manager(script.into_ledger());
        let response = manager.data_for_calculations(round, 0, None).await.unwrap();
        assert_eq!(response.status, DataAvailabilityStatus::Ok);
        let data = response.data.unwrap();
        let voters = &fixture.voters;
        assert_eq!(data.valid_eligible_reveals.keys().copied().collect::<Vec<_>>(), vec![voters[0].submit]);
        assert_eq!(data.reveal_offenders, BTreeSet::from([voters[1].submit, voters[2].submit]));
        assert_eq!(data.feed_values(&voters[0].submit), values);
        assert_eq!(data.feed_values(&voters[3].submit), vec![None; 3]);
    }

    #[test_log::test(tokio::test)]
    async fn late_reveals_and_strangers_are_ignored() {
        let fixture = EpochFixture::new(2);
        let round = fixture.start_voting_round_id + 1;
        let mut script = RoundScript::new(&fixture, round);
        let values = vec![Some(1), Some(2), Some(3)];
        script.commit(0, B256::repeat_byte(1), &values);
        script.reveal_at(0, B256::repeat_byte(1), &values, fixture.config.epoch_settings.reveal_deadline_seconds);
        script.commit_from(Address::repeat_byte(0x99), B256::repeat_byte(1), &values);

        let manager = fixture.data_manager(script.into_ledger());
        let data = manager.data_for_calculations(round, 0, None).await.unwrap().data.unwrap();
        assert!(data.valid_eligible_reveals.is_empty());
        assert_eq!(data.reveal_offenders, BTreeSet::from([fixture.voters[0].submit]));
    }

    #[test_log::test(tokio::test)]
    async fn benching_window_is_clamped_to_initial_epoch_start() {
        let fixture = EpochFixture::new(2);
        let first = fixture.start_voting_round_id;
        let values = vec![Some(1), Some(2), Some(3)];
        let mut script = RoundScript::new(&fixture, first);
        script.commit(0, B256::repeat_byte(1), &values);
        let mut ledger = script.into_ledger();
        let mut next = RoundScript::new(&fixture, first + 1);
        next.commit(1, B256::repeat_byte(1), &values);
        next.reveal(1, B256::repeat_byte(1), &values);
        next.append_to(&mut ledger);

        let manager = fixture.data_manager(ledger);
        let data = manager.data_for_calculations(first + 1, 20, None).await.unwrap().data.unwrap();
        assert!(data.reveal_offenders.is_empty());
        assert_eq!(data.benching_window_reveal_offenders, BTreeSet::from([fixture.voters[0].submit]));
    }

    #[test_log::test(tokio::test)]
    async fn unindexed_range_is_not_ok() {
        let fixture = EpochFixture::new(2);
        let round = fixture.start_voting_round_id + 1;
        let mut ledger = RoundScript::new(&fixture, round).into_ledger();
        ledger.set_indexed_until(fixture.config.epoch_settings.voting_epoch_start_sec(round + 1));
        let manager = fixture.data_manager(ledger);
        let response = manager.data_for_calculations(round, 0, None).await.unwrap();
        assert_eq!(response.status, DataAvailabilityStatus::NotOk);
        assert!(response.data.is_none());
    }

    #[test_log::test(tokio::test)]
    async fn collects_first_signature_per_signer_and_finalizations() {
        let fixture = EpochFixture::new(4);
        let round = fixture.start_voting_round_id + 1;
        let mut script = RoundScript::new(&fixture, round);
        let message = script.protocol_message(B256::repeat_byte(0x42));
        script.sign(0, &message, 0);
        script.sign(0, &message, 1);
        script.sign(1, &message, 2);
        let other = script.protocol_message(B256::repeat_byte(0x43));
        script.sign(2, &other, 3);
        script.sign_as(3, 0, &message, 4);
        script.finalize(1, &message, &[0, 1, 2, 3], 5);
        script.finalize(1, &message, &[0, 1, 2, 3], 6);
        script.finalize(2, &message, &[0], 7);

        let manager = fixture.data_manager(script.into_ledger());
        let data = manager.data_for_reward_calculation(round, 0, None).await.unwrap().data.unwrap();
        let signatures = &data.signatures[&message.hash()];
        assert_eq!(
            signatures.iter().map(|s| s.messages.signer.unwrap()).collect::<Vec<_>>(),
            vec![fixture.voters[0].signing_address(), fixture.voters[1].signing_address()]
        );
        assert_eq!(signatures[0].messages.index, Some(0));
        assert_eq!(data.signatures[&other.hash()].len(), 1);

        assert_eq!(data.finalizations.len(), 2);
        assert!(data.finalizations[0].successful_on_chain);
        assert!(!data.finalizations[1].successful_on_chain);
        assert_eq!(
            data.first_successful_finalization.unwrap().submission.submit_address,
            fixture.voters[1].signing_address()
        );
    }

    #[test_log::test(tokio::test)]
    async fn fixed_message_hash_tags_wrong_signers() {
        let fixture = EpochFixture::new(3);
        let round = fixture.start_voting_round_id + 1;
        let mut script = RoundScript::new(&fixture, round);
        let message = script.protocol_message(B256::repeat_byte(0x42));
        script.sign(0, &message, 0);
        script.sign_as(1, 2, &message, 1);

        let manager = fixture.data_manager(script.into_ledger());
        let data = manager
            .data_for_reward_calculation(round, 0, Some(message.hash()))
            .await
            .unwrap()
            .data
            .unwrap();
        assert_eq!(data.signatures[&message.hash()].len(), 1);
        let wrong = &data.signatures[&*WRONG_SIGNATURE_INDICATOR_MESSAGE_HASH];
        assert_eq!(wrong[0].messages.signer, Some(fixture.voters[1].signing_address()));
    }

    #[test_log::test(tokio::test)]
    async fn foreign_signing_policy_in_relay_is_fatal() {
        let fixture = EpochFixture::new(2);
        let round = fixture.start_voting_round_id + 1;
        let mut script = RoundScript::new(&fixture, round);
        let message = script.protocol_message(B256::repeat_byte(0x42));
        script.finalize_with_policy_threshold(0, &message, &[0, 1], 1, 1);

        let manager = fixture.data_manager(script.into_ledger());
        let err = manager.data_for_reward_calculation(round, 0, None).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<InvariantViolation>(),
            Some(InvariantViolation::SigningPolicyHashMismatch { .. })
        ));
    }
}
