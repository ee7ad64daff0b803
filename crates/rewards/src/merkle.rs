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

//! Merkle tree over claim hashes, compatible with OpenZeppelin's `MerkleProof`.
//!
//! Leaves are sorted and stored in heap layout: node `i` has children `2i + 1` and `2i + 2`,
//! and pairs are hashed in sorted order.

use std::collections::HashMap;

use alloy_primitives::{keccak256, B256};

use crate::errors::InvariantViolation;

fn hash_pair(a: &B256, b: &B256) -> B256 {
    if a <= b {
        keccak256([a.as_slice(), b.as_slice()].concat())
    } else {
        keccak256([b.as_slice(), a.as_slice()].concat())
    }
}

#[derive(Debug, Clone)]
pub struct MerkleTree {
    nodes: Vec<B256>,
    positions: HashMap<B256, usize>,
}

impl MerkleTree {
    /// Build a tree over `leaves`. Leaves must be pairwise distinct.
    pub fn new(leaves: impl IntoIterator<Item = B256>) -> Result<Self, InvariantViolation> {
        let mut leaves: Vec<B256> = leaves.into_iter().collect();
        leaves.sort();
        if let Some(pair) = leaves.windows(2).find(|w| w[0] == w[1]) {
            return Err(InvariantViolation::DuplicateMerkleLeaf(pair[0]));
        }
        let n = leaves.len();
        if n == 0 {
            return Ok(Self { nodes: vec![], positions: HashMap::new() });
        }

        let mut nodes = vec![B256::ZERO; 2 * n - 1];
        nodes[n - 1..].copy_from_slice(&leaves);
        for i in (0..n - 1).rev() {
            nodes[i] = hash_pair(&nodes[2 * i + 1], &nodes[2 * i + 2]);
        }
        let positions = (n - 1..2 * n - 1).map(|i| (nodes[i], i)).collect();
        Ok(Self { nodes, positions })
    }

    /// Root of the tree, `None` for an empty tree.
    pub fn root(&self) -> Option<B256> {
        self.nodes.first().copied()
    }

    pub fn leaf_count(&self) -> usize {
        self.positions.len()
    }

    /// Sibling hashes from the leaf up to the root, or `None` if `leaf` is not in the tree.
    pub fn proof(&self, leaf: &B256) -> Option<Vec<B256>> {
        let mut index = *self.positions.get(leaf)?;
        let mut proof = Vec::new();
        while index > 0 {
            let sibling = if index % 2 == 1 { index + 1 } else { index - 1 };
            proof.push(self.nodes[sibling]);
            index = (index - 1) / 2;
        }
        Some(proof)
    }
}

/// Check a proof produced by [MerkleTree::proof].
pub fn verify_proof(leaf: B256, proof: &[B256], root: B256) -> bool {
    proof.iter().fold(leaf, |acc, sibling| hash_pair(&acc, sibling)) == root
}
