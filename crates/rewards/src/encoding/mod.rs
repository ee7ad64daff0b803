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

//! Wire codecs for the voting protocol: submission payload messages, commit/reveal payloads,
//! signature payloads, signing policies and relay messages.

mod payload;
mod relay;
mod signature;

pub use payload::{commit_hash, encode_feed_values, CommitData, PayloadMessage, RevealData};
pub use relay::{IndexedSignature, RelayMessage, SigningPolicy};
pub use signature::{EcdsaSignature, ProtocolMessageMerkleRoot, SignaturePayload};

use crate::errors::DecodeError;

/// Split off `len` bytes from the front of `data`.
pub(crate) fn take<'a>(
    data: &mut &'a [u8],
    len: usize,
    what: &'static str,
) -> Result<&'a [u8], DecodeError> {
    if data.len() < len {
        return Err(DecodeError::Length { what, expected: len, actual: data.len() });
    }
    let (head, tail) = data.split_at(len);
    *data = tail;
    Ok(head)
}

pub(crate) fn take_u16(data: &mut &[u8], what: &'static str) -> Result<u16, DecodeError> {
    let bytes = take(data, 2, what)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn take_u32(data: &mut &[u8], what: &'static str) -> Result<u32, DecodeError> {
    let bytes = take(data, 4, what)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
