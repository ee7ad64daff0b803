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

use alloy_primitives::{keccak256, Address, Bytes, Signature, B256, U256};
use serde::{Deserialize, Serialize};

use super::take;
use crate::errors::DecodeError;

/// The root a voting round's result is attested by: what voters sign and relays finalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolMessageMerkleRoot {
    pub protocol_id: u8,
    pub voting_round_id: u32,
    pub is_secure_random: bool,
    pub merkle_root: B256,
}

impl ProtocolMessageMerkleRoot {
    pub const ENCODED_LEN: usize = 38;

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[0] = self.protocol_id;
        out[1..5].copy_from_slice(&self.voting_round_id.to_be_bytes());
        out[5] = self.is_secure_random as u8;
        out[6..].copy_from_slice(self.merkle_root.as_slice());
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() != Self::ENCODED_LEN {
            return Err(DecodeError::Length {
                what: "protocol message merkle root",
                expected: Self::ENCODED_LEN,
                actual: data.len(),
            });
        }
        let is_secure_random = match data[5] {
            0 => false,
            1 => true,
            other => {
                return Err(DecodeError::Unsupported {
                    what: "isSecureRandom flag",
                    value: other as u64,
                })
            }
        };
        Ok(Self {
            protocol_id: data[0],
            voting_round_id: u32::from_be_bytes([data[1], data[2], data[3], data[4]]),
            is_secure_random,
            merkle_root: B256::from_slice(&data[6..]),
        })
    }

    pub fn hash(&self) -> B256 {
        keccak256(self.encode())
    }
}

/// A recoverable ECDSA signature in `v | r | s` wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcdsaSignature {
    pub r: B256,
    pub s: B256,
    pub v: u8,
}

impl EcdsaSignature {
    pub const ENCODED_LEN: usize = 65;

    pub fn from_signature(signature: &Signature) -> Self {
        Self {
            r: B256::from(signature.r().to_be_bytes::<32>()),
            s: B256::from(signature.s().to_be_bytes::<32>()),
            v: 27 + signature.v() as u8,
        }
    }

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[0] = self.v;
        out[1..33].copy_from_slice(self.r.as_slice());
        out[33..].copy_from_slice(self.s.as_slice());
        out
    }

    pub(crate) fn decode_from(data: &mut &[u8]) -> Result<Self, DecodeError> {
        let v = take(data, 1, "signature v")?[0];
        let r = B256::from_slice(take(data, 32, "signature r")?);
        let s = B256::from_slice(take(data, 32, "signature s")?);
        Ok(Self { r, s, v })
    }

    /// Recover the address that produced this signature as an EIP-191 personal-sign signature
    /// over `message_hash`.
    pub fn recover_signer(&self, message_hash: B256) -> Result<Address, DecodeError> {
        let parity = match self.v {
            0 | 27 => false,
            1 | 28 => true,
            other => {
                return Err(DecodeError::Unsupported { what: "signature v", value: other as u64 })
            }
        };
        let signature = Signature::new(U256::from_be_bytes(self.r.0), U256::from_be_bytes(self.s.0), parity);
        signature
            .recover_address_from_msg(message_hash.as_slice())
            .map_err(|err| DecodeError::Signature(err.to_string()))
    }
}

/// A voter's signature over a round's protocol message, as submitted via `submitSignatures`.
///
/// `signer`, `index`, `weight` and `message_hash` are filled in once the signer has been
/// recovered and checked against the signing policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignaturePayload {
    #[serde(rename = "type")]
    pub payload_type: u8,
    pub message: ProtocolMessageMerkleRoot,
    pub signature: EcdsaSignature,
    #[serde(default, skip_serializing_if = "alloy_primitives::bytes::Bytes::is_empty")]
    pub unsigned_message: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_hash: Option<B256>,
}

impl SignaturePayload {
    const PAYLOAD_TYPE: u8 = 0;

    pub fn new(message: ProtocolMessageMerkleRoot, signature: EcdsaSignature) -> Self {
        Self {
            payload_type: Self::PAYLOAD_TYPE,
            message,
            signature,
            unsigned_message: Bytes::new(),
            signer: None,
            index: None,
            weight: None,
            message_hash: None,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut out = vec![self.payload_type];
        out.extend_from_slice(&self.message.encode());
        out.extend_from_slice(&self.signature.encode());
        out.extend_from_slice(&self.unsigned_message);
        out.into()
    }

    pub fn decode(mut data: &[u8]) -> Result<Self, DecodeError> {
        let payload_type = take(&mut data, 1, "signature payload type")?[0];
        if payload_type != Self::PAYLOAD_TYPE {
            return Err(DecodeError::Unsupported {
                what: "signature payload type",
                value: payload_type as u64,
            });
        }
        let message = ProtocolMessageMerkleRoot::decode(take(
            &mut data,
            ProtocolMessageMerkleRoot::ENCODED_LEN,
            "signature payload message",
        )?)?;
        let signature = EcdsaSignature::decode_from(&mut data)?;
        Ok(Self {
            unsigned_message: Bytes::copy_from_slice(data),
            ..Self::new(message, signature)
        })
    }
}

#[cfg(test)]
mod tests {
    use alloy::signers::{local::PrivateKeySigner, SignerSync};

    use super::*;

    fn message() -> ProtocolMessageMerkleRoot {
        ProtocolMessageMerkleRoot {
            protocol_id: 100,
            voting_round_id: 4242,
            is_secure_random: true,
            merkle_root: B256::repeat_byte(0xab),
        }
    }

    #[test]
    fn protocol_message_layout() {
        let encoded = message().encode();
        assert_eq!(encoded[0], 100);
        assert_eq!(&encoded[1..5], &4242u32.to_be_bytes());
        assert_eq!(encoded[5], 1);
        assert_eq!(ProtocolMessageMerkleRoot::decode(&encoded).unwrap(), message());

        let mut bad_flag = encoded;
        bad_flag[5] = 2;
        assert!(ProtocolMessageMerkleRoot::decode(&bad_flag).is_err());
    }

    #[test]
    fn recovers_personal_sign_signer() {
        let signer = PrivateKeySigner::random();
        let hash = message().hash();
        let signature = EcdsaSignature::from_signature(&signer.sign_message_sync(hash.as_slice()).unwrap());
        assert_eq!(signature.recover_signer(hash).unwrap(), signer.address());
        assert_ne!(signature.recover_signer(B256::ZERO).unwrap(), signer.address());
    }

    #[test]
    fn signature_payload_keeps_unsigned_tail() {
        let signer = PrivateKeySigner::random();
        let signature =
            EcdsaSignature::from_signature(&signer.sign_message_sync(message().hash().as_slice()).unwrap());
        let mut payload = SignaturePayload::new(message(), signature);
        payload.unsigned_message = Bytes::from_static(b"extra");
        let encoded = payload.encode();
        assert_eq!(encoded.len(), 1 + 38 + 65 + 5);
        assert_eq!(SignaturePayload::decode(&encoded).unwrap(), payload);
    }
}
