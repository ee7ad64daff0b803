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

//! Fixtures for tests: a fully registered reward epoch, scripted voting rounds and an
//! in-memory [Ledger].

use std::collections::BTreeSet;

use alloy::signers::{local::PrivateKeySigner, SignerSync};
use alloy_primitives::{aliases::U24, keccak256, Address, Bytes, FixedBytes, B256, U256};
use alloy_sol_types::SolEvent;
use async_trait::async_trait;

use crate::{
    config::{ContractAddresses, Network, NetworkConfig},
    data::{DataForCalculations, DataForRewardCalculation, DataManager, ParsedFinalizationData},
    encoding::{
        commit_hash, encode_feed_values, CommitData, EcdsaSignature, IndexedSignature, PayloadMessage,
        ProtocolMessageMerkleRoot, RelayMessage, RevealData, SignaturePayload, SigningPolicy,
    },
    epoch::{FeedId, NodeId, RewardEpoch, RewardEpochManager},
    events::{
        InflationRewardsOffered, RandomAcquisitionStarted, RewardEpochEvents, RewardEpochStarted,
        RewardsOffered, SigningPolicyInitialized, VotePowerBlockSelected, VoterRegistered,
        VoterRegistrationInfo,
    },
    ledger::{
        BlockAssuranceResult, ContractMethod, Ledger, LedgerQueries, LedgerResponse, LogRecord,
        SubmissionData, TransactionRecord,
    },
    offers::PartialRewardOffer,
};

const TOTAL_POLICY_WEIGHT: u64 = 65_535;

fn test_address(kind: u8, index: usize) -> Address {
    let mut bytes = [0u8; 20];
    bytes[0] = kind;
    bytes[18] = (index >> 8) as u8;
    bytes[19] = index as u8;
    Address::from(bytes)
}

/// Feed id for a category 1 (crypto) feed name.
pub fn feed_id(name: &str) -> FeedId {
    let mut bytes = [0u8; 21];
    bytes[0] = 1;
    bytes[1..1 + name.len()].copy_from_slice(name.as_bytes());
    FeedId::from(bytes)
}

/// A registered voter with all its addresses, weights and signing key.
#[derive(Debug, Clone)]
pub struct TestVoter {
    pub identity: Address,
    pub signer: PrivateKeySigner,
    pub submit: Address,
    pub submit_signatures: Address,
    pub delegation: Address,
    pub fee_bips: u16,
    pub wnat_weight: U256,
    pub capped_weight: U256,
    pub node_ids: Vec<NodeId>,
    pub node_weights: Vec<U256>,
    pub policy_weight: u16,
}

impl TestVoter {
    fn new(index: usize, policy_weight: u16) -> Self {
        let key = B256::from(U256::from(index as u64 + 1));
        Self {
            identity: test_address(0x01, index),
            signer: PrivateKeySigner::from_bytes(&key).expect("valid test key"),
            submit: test_address(0x02, index),
            submit_signatures: test_address(0x03, index),
            delegation: test_address(0x04, index),
            fee_bips: 1_000 + 100 * (index as u16 % 5),
            wnat_weight: U256::from(2_000_000u64),
            capped_weight: U256::from(1_000_000u64),
            node_ids: vec![NodeId::from_slice(test_address(0x05, index).as_slice())],
            node_weights: vec![U256::from(500_000u64)],
            policy_weight,
        }
    }

    pub fn signing_address(&self) -> Address {
        self.signer.address()
    }

    pub fn sign(&self, message: &ProtocolMessageMerkleRoot) -> EcdsaSignature {
        let signature = self.signer.sign_message_sync(message.hash().as_slice()).expect("signing failed");
        EcdsaSignature::from_signature(&signature)
    }
}

/// A reward epoch with `n` equally weighted voters on the local network preset.
///
/// Three feeds are offered: one community offer on `BTC/USD` and an inflation offer covering all
/// three feeds. Setup events are emitted during the previous reward epoch.
#[derive(Debug, Clone)]
pub struct EpochFixture {
    pub config: NetworkConfig,
    pub reward_epoch_id: u32,
    /// Actual start of the epoch; may be moved past the expected start before the events are built.
    pub start_voting_round_id: u32,
    pub voters: Vec<TestVoter>,
    pub community_claim_back: Address,
}

impl EpochFixture {
    pub fn new(n: usize) -> Self {
        let mut config = NetworkConfig::from_network(Network::Local);
        config.contracts = ContractAddresses {
            submission: Address::repeat_byte(0xa1),
            relay: Address::repeat_byte(0xa2),
            flare_systems_manager: Address::repeat_byte(0xa3),
            voter_registry: Address::repeat_byte(0xa4),
            flare_systems_calculator: Address::repeat_byte(0xa5),
            ftso_reward_offers_manager: Address::repeat_byte(0xa6),
        };
        let reward_epoch_id = config.initial_reward_epoch_id;
        let start_voting_round_id =
            config.epoch_settings.expected_reward_epoch_start_voting_round_id(reward_epoch_id);
        let policy_weight = (TOTAL_POLICY_WEIGHT / n.max(1) as u64) as u16;
        Self {
            config,
            reward_epoch_id,
            start_voting_round_id,
            voters: (0..n).map(|i| TestVoter::new(i, policy_weight)).collect(),
            community_claim_back: Address::repeat_byte(0xcb),
        }
    }

    pub fn feed_ids(&self) -> [FeedId; 3] {
        [feed_id("BTC/USD"), feed_id("ETH/USD"), feed_id("FLR/USD")]
    }

    fn previous_epoch_start_ts(&self) -> u64 {
        self.config.epoch_settings.expected_reward_epoch_start_sec(self.reward_epoch_id - 1)
    }

    pub fn signing_policy(&self) -> SigningPolicy {
        let weights: Vec<u16> = self.voters.iter().map(|v| v.policy_weight).collect();
        let total: u64 = weights.iter().map(|w| *w as u64).sum();
        SigningPolicy {
            reward_epoch_id: self.reward_epoch_id,
            start_voting_round_id: self.start_voting_round_id,
            threshold: (total / 2) as u16,
            seed: U256::from(0x5eed_u64),
            voters: self.voters.iter().map(TestVoter::signing_address).collect(),
            weights,
        }
    }

    /// Setup events of the epoch, with the timestamp each is emitted at.
    fn timed_events(&self) -> (RewardEpochEvents, [u64; 7]) {
        let prev_ts = self.previous_epoch_start_ts();
        let id = U24::from(self.reward_epoch_id);
        let policy = self.signing_policy();
        let [btc, eth, flr] = self.feed_ids();
        let events = RewardEpochEvents {
            previous_reward_epoch_started: RewardEpochStarted {
                rewardEpochId: id - U24::from(1),
                startVotingRoundId: self
                    .config
                    .epoch_settings
                    .expected_reward_epoch_start_voting_round_id(self.reward_epoch_id - 1),
                timestamp: prev_ts,
            },
            random_acquisition_started: RandomAcquisitionStarted { rewardEpochId: id, timestamp: prev_ts + 100 },
            vote_power_block_selected: VotePowerBlockSelected {
                rewardEpochId: id,
                votePowerBlock: 1_234,
                timestamp: prev_ts + 110,
            },
            signing_policy_initialized: SigningPolicyInitialized {
                rewardEpochId: id,
                startVotingRoundId: policy.start_voting_round_id,
                threshold: policy.threshold,
                seed: policy.seed,
                voters: policy.voters.clone(),
                weights: policy.weights.clone(),
                signingPolicyBytes: Bytes::from(policy.encode()),
                timestamp: prev_ts + 150,
            },
            voters_registered: self
                .voters
                .iter()
                .map(|v| VoterRegistered {
                    voter: v.identity,
                    rewardEpochId: id,
                    signingPolicyAddress: v.signing_address(),
                    submitAddress: v.submit,
                    submitSignaturesAddress: v.submit_signatures,
                    publicKeyPart1: B256::ZERO,
                    publicKeyPart2: B256::ZERO,
                    registrationWeight: v.wnat_weight,
                })
                .collect(),
            voter_registration_infos: self
                .voters
                .iter()
                .map(|v| VoterRegistrationInfo {
                    voter: v.identity,
                    rewardEpochId: id,
                    delegationAddress: v.delegation,
                    delegationFeeBIPS: v.fee_bips,
                    wNatWeight: v.wnat_weight,
                    wNatCappedWeight: v.capped_weight,
                    nodeIds: v.node_ids.clone(),
                    nodeWeights: v.node_weights.clone(),
                })
                .collect(),
            rewards_offered: vec![RewardsOffered {
                rewardEpochId: id,
                feedId: btc,
                decimals: 2,
                amount: U256::from(1_000_000u64),
                minRewardedTurnoutBIPS: 1_000,
                primaryBandRewardSharePPM: U24::from(600_000),
                secondaryBandWidthPPM: U24::from(10_000),
                claimBackAddress: self.community_claim_back,
            }],
            inflation_rewards_offered: vec![InflationRewardsOffered {
                rewardEpochId: id,
                feedIds: Bytes::from([btc.to_vec(), eth.to_vec(), flr.to_vec()].concat()),
                decimals: Bytes::from(vec![2u8, 3, 5]),
                amount: U256::from(3_000_000u64),
                minRewardedTurnoutBIPS: 1_000,
                primaryBandRewardSharePPM: U24::from(700_000),
                secondaryBandWidthPPMs: Bytes::from(vec![0, 0x27, 0x10, 0, 0x27, 0x10, 0, 0x4e, 0x20]),
                mode: 0,
            }],
        };
        (events, [prev_ts, prev_ts + 100, prev_ts + 110, prev_ts + 150, prev_ts + 120, prev_ts + 125, prev_ts + 50])
    }

    pub fn events(&self) -> RewardEpochEvents {
        self.timed_events().0
    }

    pub fn reward_epoch(&self) -> RewardEpoch {
        RewardEpoch::from_events(&self.events(), &self.config).expect("fixture events are consistent")
    }

    /// A ledger holding the setup events of the epoch.
    pub fn ledger_with_epoch_events(&self) -> MockLedger {
        let (events, [started, random, vote_power, policy, registered, infos, offers]) = self.timed_events();
        let contracts = &self.config.contracts;
        let mut ledger = MockLedger::default();
        ledger.push_event(contracts.flare_systems_manager, &events.previous_reward_epoch_started, started);
        ledger.push_event(contracts.flare_systems_manager, &events.random_acquisition_started, random);
        ledger.push_event(contracts.flare_systems_manager, &events.vote_power_block_selected, vote_power);
        ledger.push_event(contracts.relay, &events.signing_policy_initialized, policy);
        for event in &events.voters_registered {
            ledger.push_event(contracts.voter_registry, event, registered);
        }
        for event in &events.voter_registration_infos {
            ledger.push_event(contracts.flare_systems_calculator, event, infos);
        }
        for event in &events.rewards_offered {
            ledger.push_event(contracts.ftso_reward_offers_manager, event, offers);
        }
        for event in &events.inflation_rewards_offered {
            ledger.push_event(contracts.ftso_reward_offers_manager, event, offers);
        }
        ledger
    }

    /// Initialize the next epoch's signing policy, which fixes the end of this epoch at
    /// `end_voting_round_id`.
    pub fn push_next_signing_policy(&self, ledger: &mut MockLedger, end_voting_round_id: u32) {
        let mut policy = self.signing_policy();
        policy.reward_epoch_id = self.reward_epoch_id + 1;
        policy.start_voting_round_id = end_voting_round_id + 1;
        let epochs = &self.config.epoch_settings;
        let timestamp = epochs.expected_reward_epoch_start_sec(self.reward_epoch_id + 1) - 30;
        let event = SigningPolicyInitialized {
            rewardEpochId: U24::from(policy.reward_epoch_id),
            startVotingRoundId: policy.start_voting_round_id,
            threshold: policy.threshold,
            seed: policy.seed,
            voters: policy.voters.clone(),
            weights: policy.weights.clone(),
            signingPolicyBytes: Bytes::from(policy.encode()),
            timestamp,
        };
        ledger.push_event(self.config.contracts.relay, &event, timestamp);
    }

    pub fn data_manager(&self, ledger: MockLedger) -> DataManager<MockLedger> {
        let queries = LedgerQueries::new(ledger, std::sync::Arc::new(self.config.clone()));
        DataManager::new(std::sync::Arc::new(RewardEpochManager::new(queries)))
    }

    pub fn empty_data_for_calculations(&self, voting_round_id: u32) -> DataForCalculations {
        let epoch = self.reward_epoch();
        let ordered_voters_submit_addresses = epoch.submit_addresses();
        DataForCalculations {
            reward_epoch_id: self.reward_epoch_id,
            voting_round_id,
            voters_weights: ordered_voters_submit_addresses
                .iter()
                .map(|a| (*a, epoch.median_reward_distribution_weight(a)))
                .collect(),
            ordered_voters_submit_addresses,
            valid_eligible_reveals: Default::default(),
            reveal_offenders: BTreeSet::new(),
            feed_order: epoch.canonical_feed_order().to_vec(),
            benching_window_reveal_offenders: BTreeSet::new(),
        }
    }

    /// Record a valid reveal of voter `index`, values in canonical feed order.
    pub fn add_valid_reveal(&self, data: &mut DataForCalculations, index: usize, values: &[Option<i64>]) {
        data.valid_eligible_reveals.insert(
            self.voters[index].submit,
            RevealData {
                random: B256::from(U256::from(index as u64 + 1)),
                encoded_values: encode_feed_values(values),
            },
        );
    }

    /// A round offer of the community offer's parameters on the `feed_index`-th canonical feed.
    pub fn round_offer(&self, voting_round_id: u32, feed_index: usize, amount: U256) -> PartialRewardOffer {
        let feed = self.reward_epoch().canonical_feed_order()[feed_index];
        PartialRewardOffer {
            reward_epoch_id: self.reward_epoch_id,
            voting_round_id,
            feed_id: feed.id,
            decimals: feed.decimals,
            amount,
            min_rewarded_turnout_bips: 1_000,
            primary_band_reward_share_ppm: 600_000,
            secondary_band_width_ppm: 10_000,
            claim_back_address: self.community_claim_back,
            should_be_burned: false,
        }
    }

    pub fn empty_reward_data(&self, voting_round_id: u32) -> DataForRewardCalculation {
        DataForRewardCalculation {
            data_for_calculations: self.empty_data_for_calculations(voting_round_id),
            signatures: Default::default(),
            finalizations: vec![],
            first_successful_finalization: None,
        }
    }

    pub fn protocol_message(&self, voting_round_id: u32, merkle_root: B256) -> ProtocolMessageMerkleRoot {
        ProtocolMessageMerkleRoot {
            protocol_id: self.config.protocol_id,
            voting_round_id,
            is_secure_random: true,
            merkle_root,
        }
    }

    /// Timestamp `offset` seconds into the signature window of `voting_round_id`.
    pub fn signing_window_ts(&self, voting_round_id: u32, offset: u64) -> u64 {
        self.config.epoch_settings.reveal_deadline_sec(voting_round_id + 1) + 1 + offset
    }

    fn submission<T>(&self, timestamp: u64, submit_address: Address, messages: T) -> SubmissionData<T> {
        let epochs = &self.config.epoch_settings;
        let voting_epoch_id = epochs.voting_epoch_for_time_sec(timestamp);
        SubmissionData {
            block_number: timestamp,
            transaction_index: 0,
            timestamp,
            voting_epoch_id_from_timestamp: voting_epoch_id,
            relative_timestamp: timestamp - epochs.voting_epoch_start_sec(voting_epoch_id),
            submit_address,
            messages,
        }
    }

    /// Relay of `message` signed by the voters at `signer_indices`.
    pub fn relay_message(
        &self,
        message: &ProtocolMessageMerkleRoot,
        signer_indices: &[usize],
        signing_policy: SigningPolicy,
    ) -> RelayMessage {
        let mut indices = signer_indices.to_vec();
        indices.sort_unstable();
        RelayMessage {
            signing_policy,
            protocol_message_merkle_root: *message,
            signatures: indices
                .into_iter()
                .map(|i| IndexedSignature { signature: self.voters[i].sign(message), index: i as u16 })
                .collect(),
        }
    }

    /// Add a signature of voter `index`, as [DataManager] would have extracted it.
    pub fn add_signature(
        &self,
        data: &mut DataForRewardCalculation,
        index: usize,
        message: &ProtocolMessageMerkleRoot,
        offset: u64,
    ) {
        let voter = &self.voters[index];
        let mut payload = SignaturePayload::new(*message, voter.sign(message));
        payload.signer = Some(voter.signing_address());
        payload.index = Some(index as u16);
        payload.weight = Some(voter.policy_weight);
        payload.message_hash = Some(message.hash());
        let timestamp = self.signing_window_ts(message.voting_round_id, offset);
        let signatures = data.signatures.entry(message.hash()).or_default();
        signatures.push(self.submission(timestamp, voter.submit_signatures, payload));
        signatures.sort_by_key(|s| s.timestamp);
    }

    /// Add a relay of `message` sent by voter `sender`'s signing address.
    pub fn add_finalization(
        &self,
        data: &mut DataForRewardCalculation,
        sender: usize,
        message: &ProtocolMessageMerkleRoot,
        signer_indices: &[usize],
        offset: u64,
    ) {
        let relay = self.relay_message(message, signer_indices, self.signing_policy());
        let successful_on_chain = relay.verify().is_ok();
        let timestamp = self.signing_window_ts(message.voting_round_id, offset);
        data.finalizations.push(ParsedFinalizationData {
            submission: self.submission(timestamp, self.voters[sender].signing_address(), relay),
            successful_on_chain,
        });
        data.finalizations.sort_by_key(|f| f.submission.timestamp);
        data.first_successful_finalization = data.finalizations.iter().find(|f| f.successful_on_chain).cloned();
    }
}

/// Builds the submission and relay transactions of one voting round.
pub struct RoundScript<'a> {
    fixture: &'a EpochFixture,
    voting_round_id: u32,
    transactions: Vec<TransactionRecord>,
}

impl<'a> RoundScript<'a> {
    pub fn new(fixture: &'a EpochFixture, voting_round_id: u32) -> Self {
        Self { fixture, voting_round_id, transactions: vec![] }
    }

    fn push(&mut self, method: ContractMethod, from: Address, timestamp: u64, body: Vec<u8>) {
        let contracts = &self.fixture.config.contracts;
        let to = match method {
            ContractMethod::Relay => contracts.relay,
            _ => contracts.submission,
        };
        let selector = method.selector();
        let input = [selector.as_slice(), &body].concat();
        let transaction_index = self.transactions.len() as u64;
        self.transactions.push(TransactionRecord {
            hash: keccak256([input.as_slice(), &timestamp.to_be_bytes(), &transaction_index.to_be_bytes()].concat()),
            function_sig: selector,
            input: input.into(),
            block_number: timestamp,
            transaction_index,
            from_address: from,
            to_address: to,
            status: true,
            timestamp,
        });
    }

    fn submit(&mut self, method: ContractMethod, from: Address, timestamp: u64, payload: Bytes) {
        let message = PayloadMessage::new(self.fixture.config.protocol_id, self.voting_round_id, payload);
        self.push(method, from, timestamp, PayloadMessage::encode_all(&[message]));
    }

    fn epochs(&self) -> &crate::config::EpochSettings {
        &self.fixture.config.epoch_settings
    }

    pub fn commit(&mut self, index: usize, random: B256, values: &[Option<i64>]) {
        let submit = self.fixture.voters[index].submit;
        self.commit_from(submit, random, values);
    }

    pub fn commit_from(&mut self, submit_address: Address, random: B256, values: &[Option<i64>]) {
        let hash = commit_hash(submit_address, self.voting_round_id, random, &encode_feed_values(values));
        let timestamp = self.epochs().voting_epoch_start_sec(self.voting_round_id) + 1;
        self.submit(ContractMethod::Submit1, submit_address, timestamp, CommitData { commit_hash: hash }.encode());
    }

    pub fn reveal(&mut self, index: usize, random: B256, values: &[Option<i64>]) {
        self.reveal_at(index, random, values, 1);
    }

    pub fn reveal_raw(&mut self, index: usize, random: B256, encoded_values: Bytes) {
        self.reveal_encoded_at(index, RevealData { random, encoded_values }, 1);
    }

    /// Reveal `relative_ts` seconds into the following voting epoch.
    pub fn reveal_at(&mut self, index: usize, random: B256, values: &[Option<i64>], relative_ts: u64) {
        self.reveal_encoded_at(index, RevealData { random, encoded_values: encode_feed_values(values) }, relative_ts);
    }

    fn reveal_encoded_at(&mut self, index: usize, reveal: RevealData, relative_ts: u64) {
        let submit = self.fixture.voters[index].submit;
        let timestamp = self.epochs().voting_epoch_start_sec(self.voting_round_id + 1) + relative_ts;
        self.submit(ContractMethod::Submit2, submit, timestamp, reveal.encode());
    }

    pub fn protocol_message(&self, merkle_root: B256) -> ProtocolMessageMerkleRoot {
        self.fixture.protocol_message(self.voting_round_id, merkle_root)
    }

    pub fn sign(&mut self, index: usize, message: &ProtocolMessageMerkleRoot, offset: u64) {
        self.sign_as(index, index, message, offset);
    }

    /// Submit from voter `sender`'s signature address a signature made with voter `key`'s key.
    pub fn sign_as(&mut self, sender: usize, key: usize, message: &ProtocolMessageMerkleRoot, offset: u64) {
        let payload = SignaturePayload::new(*message, self.fixture.voters[key].sign(message));
        let from = self.fixture.voters[sender].submit_signatures;
        let timestamp = self.fixture.signing_window_ts(self.voting_round_id, offset);
        self.submit(ContractMethod::SubmitSignatures, from, timestamp, payload.encode());
    }

    pub fn finalize(&mut self, sender: usize, message: &ProtocolMessageMerkleRoot, signers: &[usize], offset: u64) {
        let relay = self.fixture.relay_message(message, signers, self.fixture.signing_policy());
        self.push_relay(sender, relay, offset);
    }

    /// Finalize with a signing policy that differs from the registered one in its threshold.
    pub fn finalize_with_policy_threshold(
        &mut self,
        sender: usize,
        message: &ProtocolMessageMerkleRoot,
        signers: &[usize],
        threshold: u16,
        offset: u64,
    ) {
        let mut policy = self.fixture.signing_policy();
        policy.threshold = threshold;
        let relay = self.fixture.relay_message(message, signers, policy);
        self.push_relay(sender, relay, offset);
    }

    fn push_relay(&mut self, sender: usize, relay: RelayMessage, offset: u64) {
        let from = self.fixture.voters[sender].signing_address();
        let timestamp = self.fixture.signing_window_ts(self.voting_round_id, offset);
        self.push(ContractMethod::Relay, from, timestamp, relay.encode());
    }

    /// The epoch's setup events plus this round's transactions.
    pub fn into_ledger(self) -> MockLedger {
        let mut ledger = self.fixture.ledger_with_epoch_events();
        self.append_to(&mut ledger);
        ledger
    }

    pub fn append_to(self, ledger: &mut MockLedger) {
        for transaction in self.transactions {
            ledger.push_transaction(transaction);
        }
    }
}

/// In-memory [Ledger] over a fixed set of records.
///
/// Block numbers equal timestamps. Everything is indexed unless limited with
/// [MockLedger::set_indexed_until].
#[derive(Debug, Clone, Default)]
pub struct MockLedger {
    transactions: Vec<TransactionRecord>,
    logs: Vec<LogRecord>,
    indexed_until: Option<u64>,
    now: u64,
}

impl MockLedger {
    pub fn push_transaction(&mut self, transaction: TransactionRecord) {
        self.transactions.push(transaction);
        self.transactions.sort_by_key(|t| (t.block_number, t.transaction_index));
    }

    pub fn push_event<E: SolEvent>(&mut self, address: Address, event: &E, timestamp: u64) {
        let data = event.encode_log_data();
        let log_index = self.logs.len() as u64;
        self.logs.push(LogRecord {
            transaction_hash: keccak256([data.data.as_ref(), &log_index.to_be_bytes()].concat()),
            address,
            topics: data.topics().to_vec(),
            data: data.data.clone(),
            log_index,
            block_number: timestamp,
            timestamp,
        });
        self.logs.sort_by_key(|l| (l.block_number, l.log_index));
    }

    pub fn transactions(&self) -> &[TransactionRecord] {
        &self.transactions
    }

    pub fn logs(&self) -> &[LogRecord] {
        &self.logs
    }

    pub fn set_indexed_until(&mut self, timestamp: u64) {
        self.indexed_until = Some(timestamp);
    }

    /// Wall clock used to decide `TIMEOUT_OK`.
    pub fn set_now(&mut self, now: u64) {
        self.now = now;
    }

    fn status(&self, end: u64, end_timeout: Option<u64>) -> BlockAssuranceResult {
        match self.indexed_until {
            Some(indexed) if indexed < end => match end_timeout {
                Some(timeout) if self.now > end + timeout => BlockAssuranceResult::TimeoutOk,
                _ => BlockAssuranceResult::NotOk,
            },
            _ => BlockAssuranceResult::Ok,
        }
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn transactions_in_range(
        &self,
        to: Address,
        selector: FixedBytes<4>,
        start: u64,
        end: u64,
        end_timeout: Option<u64>,
    ) -> anyhow::Result<LedgerResponse<Vec<TransactionRecord>>> {
        let indexed_end = self.indexed_until.map_or(end, |i| i.min(end));
        let transactions = self
            .transactions
            .iter()
            .filter(|t| t.to_address == to && t.function_sig == selector)
            .filter(|t| t.timestamp >= start && t.timestamp <= indexed_end)
            .cloned()
            .collect();
        Ok(LedgerResponse { status: self.status(end, end_timeout), data: transactions })
    }

    async fn logs_in_range(
        &self,
        address: Address,
        topic0: B256,
        start: u64,
        end: u64,
    ) -> anyhow::Result<LedgerResponse<Vec<LogRecord>>> {
        let indexed_end = self.indexed_until.map_or(end, |i| i.min(end));
        let logs = self
            .logs
            .iter()
            .filter(|l| l.address == address && l.topics.first() == Some(&topic0))
            .filter(|l| l.timestamp >= start && l.timestamp <= indexed_end)
            .cloned()
            .collect();
        Ok(LedgerResponse { status: self.status(end, None), data: logs })
    }
}
