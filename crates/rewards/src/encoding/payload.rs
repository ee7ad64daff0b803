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

use alloy_primitives::{keccak256, Address, Bytes, B256};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};

use super::{take, take_u16, take_u32};
use crate::errors::DecodeError;

/// One protocol message inside a submission transaction's calldata.
///
/// Calldata (after the 4-byte selector) is a concatenation of
/// `protocolId:u8 | votingRoundId:u32 | length:u16 | payload[length]` records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadMessage<T = Bytes> {
    pub protocol_id: u8,
    pub voting_round_id: u32,
    pub payload: T,
}

impl PayloadMessage {
    const HEADER_LEN: usize = 7;

    pub fn new(protocol_id: u8, voting_round_id: u32, payload: impl Into<Bytes>) -> Self {
        Self { protocol_id, voting_round_id, payload: payload.into() }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::HEADER_LEN + self.payload.len());
        out.push(self.protocol_id);
        out.extend_from_slice(&self.voting_round_id.to_be_bytes());
        out.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn encode_all(messages: &[PayloadMessage]) -> Vec<u8> {
        messages.iter().flat_map(PayloadMessage::encode).collect()
    }

    /// Decode every message in `data`. Any truncated record fails the whole decode.
    pub fn decode_all(mut data: &[u8]) -> Result<Vec<PayloadMessage>, DecodeError> {
        let mut messages = Vec::new();
        while !data.is_empty() {
            let protocol_id = take(&mut data, 1, "payload message protocol id")?[0];
            let voting_round_id = take_u32(&mut data, "payload message voting round id")?;
            let length = take_u16(&mut data, "payload message length")? as usize;
            let payload = take(&mut data, length, "payload message body")?;
            messages.push(PayloadMessage {
                protocol_id,
                voting_round_id,
                payload: Bytes::copy_from_slice(payload),
            });
        }
        Ok(messages)
    }
}

/// Commit payload: the hash a voter later opens with its reveal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitData {
    pub commit_hash: B256,
}

impl CommitData {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.len() != 32 {
            return Err(DecodeError::Length {
                what: "commit payload",
                expected: 32,
                actual: payload.len(),
            });
        }
        Ok(Self { commit_hash: B256::from_slice(payload) })
    }

    pub fn encode(&self) -> Bytes {
        Bytes::copy_from_slice(self.commit_hash.as_slice())
    }
}

/// Reveal payload: `random:32 | encodedValues`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealData {
    pub random: B256,
    pub encoded_values: Bytes,
}

impl RevealData {
    const VALUE_LEN: usize = 4;
    const VALUE_OFFSET: i64 = 1 << 31;

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.len() < 32 {
            return Err(DecodeError::Length {
                what: "reveal payload",
                expected: 32,
                actual: payload.len(),
            });
        }
        Ok(Self {
            random: B256::from_slice(&payload[..32]),
            encoded_values: Bytes::copy_from_slice(&payload[32..]),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut out = self.random.to_vec();
        out.extend_from_slice(&self.encoded_values);
        out.into()
    }

    /// Whether the reveal opens `commit` for the given voter and round.
    pub fn matches(&self, commit: &CommitData, submit_address: Address, voting_round_id: u32) -> bool {
        commit_hash(submit_address, voting_round_id, self.random, &self.encoded_values)
            == commit.commit_hash
    }

    /// Decode the value for each of `feed_count` feeds in canonical order. Missing trailing
    /// values and explicit zero words are empty.
    pub fn feed_values(&self, feed_count: usize) -> Vec<Option<i64>> {
        (0..feed_count)
            .map(|i| {
                let start = i * Self::VALUE_LEN;
                let word = self.encoded_values.get(start..start + Self::VALUE_LEN)?;
                let raw = u32::from_be_bytes([word[0], word[1], word[2], word[3]]);
                (raw != 0).then(|| raw as i64 - Self::VALUE_OFFSET)
            })
            .collect()
    }
}

/// Encode feed values as revealed by voters; `None` becomes the empty word.
pub fn encode_feed_values(values: &[Option<i64>]) -> Bytes {
    let mut out = Vec::with_capacity(values.len() * RevealData::VALUE_LEN);
    for value in values {
        let raw = match value {
            Some(v) => (v + RevealData::VALUE_OFFSET) as u32,
            None => 0,
        };
        out.extend_from_slice(&raw.to_be_bytes());
    }
    out.into()
}

/// `keccak256(abi.encode(address, uint32, bytes32, bytes))` over the reveal contents.
pub fn commit_hash(
    submit_address: Address,
    voting_round_id: u32,
    random: B256,
    encoded_values: &[u8],
) -> B256 {
    let encoded = (submit_address, voting_round_id, random, Bytes::copy_from_slice(encoded_values))
        .abi_encode_params();
    keccak256(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_messages_concatenate() {
        let messages = vec![
            PayloadMessage::new(100, 7, vec![1u8, 2, 3]),
            PayloadMessage::new(255, 8, Vec::<u8>::new()),
        ];
        let encoded = PayloadMessage::encode_all(&messages);
        assert_eq!(encoded.len(), 7 + 3 + 7);
        assert_eq!(PayloadMessage::decode_all(&encoded).unwrap(), messages);
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let mut encoded = PayloadMessage::new(100, 7, vec![1u8, 2, 3]).encode();
        encoded.pop();
        assert!(matches!(
            PayloadMessage::decode_all(&encoded),
            Err(DecodeError::Length { what: "payload message body", .. })
        ));
    }

    #[test]
    fn feed_values_use_offset_encoding() {
        let values = vec![Some(-5), None, Some(1_234_567)];
        let reveal = RevealData { random: B256::ZERO, encoded_values: encode_feed_values(&values) };
        assert_eq!(reveal.feed_values(4), vec![Some(-5), None, Some(1_234_567), None]);
    }

    #[test]
    fn reveal_must_open_commit() {
        let voter = Address::repeat_byte(0x11);
        let random = B256::repeat_byte(0x22);
        let values = encode_feed_values(&[Some(100), Some(200)]);
        let commit = CommitData { commit_hash: commit_hash(voter, 5, random, &values) };
        let reveal = RevealData { random, encoded_values: values.clone() };
        assert!(reveal.matches(&commit, voter, 5));
        assert!(!reveal.matches(&commit, voter, 6));
        assert!(!reveal.matches(&commit, Address::repeat_byte(0x12), 5));

        // Any single flipped byte in the values breaks the opening.
        for i in 0..values.len() {
            let mut tampered = values.to_vec();
            tampered[i] ^= 0x01;
            let reveal = RevealData { random, encoded_values: tampered.into() };
            assert!(!reveal.matches(&commit, voter, 5), "tampered byte {i} accepted");
        }
    }
}
