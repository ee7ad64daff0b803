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

//! The indexed ledger as seen by the reward engine.
//!
//! [Ledger] is the query seam towards the chain indexer database. [LedgerQueries] layers protocol
//! decoding on top of it: submission calldata becomes [SubmissionData], relay calls become
//! [FinalizationData] and contract logs become typed reward epoch events.

use std::sync::Arc;

use alloy_primitives::{keccak256, Address, Bytes, FixedBytes, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{config::NetworkConfig, encoding::PayloadMessage};

/// Availability of the indexed data covering a requested time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockAssuranceResult {
    /// The index fully covers the range.
    Ok,
    /// The index does not (yet) cover the range.
    NotOk,
    /// The range end is not covered but the completeness deadline has passed.
    TimeoutOk,
}

impl BlockAssuranceResult {
    /// Combine the availability of two queries; the weaker status wins.
    pub fn and(self, other: Self) -> Self {
        use BlockAssuranceResult::*;
        match (self, other) {
            (NotOk, _) | (_, NotOk) => NotOk,
            (TimeoutOk, _) | (_, TimeoutOk) => TimeoutOk,
            (Ok, Ok) => Ok,
        }
    }
}

/// A query result tagged with the availability of the data behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerResponse<T> {
    pub status: BlockAssuranceResult,
    pub data: T,
}

impl<T> LedgerResponse<T> {
    pub fn ok(data: T) -> Self {
        Self { status: BlockAssuranceResult::Ok, data }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> LedgerResponse<U> {
        LedgerResponse { status: self.status, data: f(self.data) }
    }
}

/// An indexed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub hash: B256,
    pub function_sig: FixedBytes<4>,
    pub input: Bytes,
    pub block_number: u64,
    pub transaction_index: u64,
    pub from_address: Address,
    pub to_address: Address,
    pub status: bool,
    pub timestamp: u64,
}

/// An indexed event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub transaction_hash: B256,
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub log_index: u64,
    pub block_number: u64,
    pub timestamp: u64,
}

/// Range queries over the indexed chain.
///
/// Both queries cover the inclusive time range `[start, end]` and return records ordered by
/// `(block_number, transaction_index[, log_index])`.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Successful and failed transactions sent to `to` whose calldata starts with `selector`.
    ///
    /// With `end_timeout` set, a range whose end is not yet indexed reports
    /// [BlockAssuranceResult::TimeoutOk] once `end + end_timeout` has passed.
    async fn transactions_in_range(
        &self,
        to: Address,
        selector: FixedBytes<4>,
        start: u64,
        end: u64,
        end_timeout: Option<u64>,
    ) -> anyhow::Result<LedgerResponse<Vec<TransactionRecord>>>;

    /// Logs emitted by `address` with the given first topic.
    async fn logs_in_range(
        &self,
        address: Address,
        topic0: B256,
        start: u64,
        end: u64,
    ) -> anyhow::Result<LedgerResponse<Vec<LogRecord>>>;
}

#[async_trait]
impl<L: Ledger + ?Sized> Ledger for Arc<L> {
    async fn transactions_in_range(
        &self,
        to: Address,
        selector: FixedBytes<4>,
        start: u64,
        end: u64,
        end_timeout: Option<u64>,
    ) -> anyhow::Result<LedgerResponse<Vec<TransactionRecord>>> {
        (**self).transactions_in_range(to, selector, start, end, end_timeout).await
    }

    async fn logs_in_range(
        &self,
        address: Address,
        topic0: B256,
        start: u64,
        end: u64,
    ) -> anyhow::Result<LedgerResponse<Vec<LogRecord>>> {
        (**self).logs_in_range(address, topic0, start, end).await
    }
}

/// Protocol entry points whose calldata the engine decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractMethod {
    /// Commit phase submissions.
    Submit1,
    /// Reveal phase submissions.
    Submit2,
    SubmitSignatures,
    Relay,
}

impl ContractMethod {
    pub fn signature(&self) -> &'static str {
        match self {
            Self::Submit1 => "submit1()",
            Self::Submit2 => "submit2()",
            Self::SubmitSignatures => "submitSignatures()",
            Self::Relay => "relay()",
        }
    }

    pub fn selector(&self) -> FixedBytes<4> {
        FixedBytes::from_slice(&keccak256(self.signature())[..4])
    }
}

/// One decoded submission transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionData<T = Vec<PayloadMessage>> {
    pub block_number: u64,
    pub transaction_index: u64,
    pub timestamp: u64,
    pub voting_epoch_id_from_timestamp: u32,
    /// Seconds since the start of `voting_epoch_id_from_timestamp`.
    pub relative_timestamp: u64,
    pub submit_address: Address,
    pub messages: T,
}

impl<T> SubmissionData<T> {
    pub fn with_messages<U>(&self, messages: U) -> SubmissionData<U> {
        SubmissionData {
            block_number: self.block_number,
            transaction_index: self.transaction_index,
            timestamp: self.timestamp,
            voting_epoch_id_from_timestamp: self.voting_epoch_id_from_timestamp,
            relative_timestamp: self.relative_timestamp,
            submit_address: self.submit_address,
            messages,
        }
    }
}

/// One successful `relay()` transaction, still undecoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizationData {
    pub submit_address: Address,
    pub block_number: u64,
    pub transaction_index: u64,
    pub timestamp: u64,
    pub voting_epoch_id_from_timestamp: u32,
    pub relative_timestamp: u64,
    /// Calldata without the function selector.
    pub message: Bytes,
}

/// Protocol-aware queries on top of a [Ledger].
#[derive(Clone)]
pub struct LedgerQueries<L> {
    ledger: L,
    config: Arc<NetworkConfig>,
}

impl<L: Ledger> LedgerQueries<L> {
    pub fn new(ledger: L, config: Arc<NetworkConfig>) -> Self {
        Self { ledger, config }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Decoded submissions of `method` to the submission contract in `[start, end]`.
    ///
    /// Reverted transactions are skipped. Undecodable calldata is logged and skipped.
    pub async fn submission_data_in_range(
        &self,
        method: ContractMethod,
        start: u64,
        end: u64,
        end_timeout: Option<u64>,
    ) -> anyhow::Result<LedgerResponse<Vec<SubmissionData>>> {
        let response = self
            .ledger
            .transactions_in_range(
                self.config.contracts.submission,
                method.selector(),
                start,
                end,
                end_timeout,
            )
            .await?;
        let epochs = &self.config.epoch_settings;
        Ok(response.map(|transactions| {
            transactions
                .into_iter()
                .filter(|tx| tx.status)
                .filter_map(|tx| {
                    let calldata = tx.input.get(4..).unwrap_or_default();
                    let messages = match PayloadMessage::decode_all(calldata) {
                        Ok(messages) => messages,
                        Err(err) => {
                            tracing::warn!(
                                tx = %tx.hash,
                                from = %tx.from_address,
                                "Skipping undecodable {} calldata: {err}",
                                method.signature()
                            );
                            return None;
                        }
                    };
                    let voting_epoch_id = epochs.voting_epoch_for_time_sec(tx.timestamp);
                    Some(SubmissionData {
                        block_number: tx.block_number,
                        transaction_index: tx.transaction_index,
                        timestamp: tx.timestamp,
                        voting_epoch_id_from_timestamp: voting_epoch_id,
                        relative_timestamp: tx
                            .timestamp
                            .saturating_sub(epochs.voting_epoch_start_sec(voting_epoch_id)),
                        submit_address: tx.from_address,
                        messages,
                    })
                })
                .collect()
        }))
    }

    /// Successful `relay()` calls to the relay contract in `[start, end]`.
    pub async fn finalizations_in_range(
        &self,
        start: u64,
        end: u64,
    ) -> anyhow::Result<LedgerResponse<Vec<FinalizationData>>> {
        let response = self
            .ledger
            .transactions_in_range(
                self.config.contracts.relay,
                ContractMethod::Relay.selector(),
                start,
                end,
                None,
            )
            .await?;
        let epochs = &self.config.epoch_settings;
        Ok(response.map(|transactions| {
            transactions
                .into_iter()
                .filter(|tx| tx.status)
                .map(|tx| {
                    let voting_epoch_id = epochs.voting_epoch_for_time_sec(tx.timestamp);
                    FinalizationData {
                        submit_address: tx.from_address,
                        block_number: tx.block_number,
                        transaction_index: tx.transaction_index,
                        timestamp: tx.timestamp,
                        voting_epoch_id_from_timestamp: voting_epoch_id,
                        relative_timestamp: tx
                            .timestamp
                            .saturating_sub(epochs.voting_epoch_start_sec(voting_epoch_id)),
                        message: Bytes::copy_from_slice(tx.input.get(4..).unwrap_or_default()),
                    }
                })
                .collect()
        }))
    }
}
