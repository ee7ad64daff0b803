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

use std::{path::Path, time::Duration};

use alloy_primitives::{B256, U256};
use ftso_reward_indexer::{
    db::{
        ledger::{FIRST_DATABASE_BLOCK, LAST_DATABASE_BLOCK},
        LedgerDb, LedgerIndexerDb,
    },
    rewards::{CalculationStages, RewardCalculationServiceConfig},
};
use ftso_rewards::test_utils::{EpochFixture, MockLedger, RoundScript};
use tempfile::NamedTempFile;

pub const VOTERS: usize = 4;

/// Total of the fixture's community and inflation offers.
pub const TOTAL_OFFERED: u64 = 4_000_000;

pub fn fixture() -> EpochFixture {
    EpochFixture::new(VOTERS)
}

/// Feed values of voter `index`, close enough together for every voter to hit every median.
pub fn feed_values(index: usize) -> Vec<Option<i64>> {
    let i = index as i64;
    vec![Some(100_000 + 10 * i), Some(2_000_000 + i), Some(50_000 + i)]
}

/// Append a voting round in which `revealing` voters commit and reveal, every voter signs
/// the same result and voter 0 finalizes it.
pub fn script_round(fixture: &EpochFixture, ledger: &mut MockLedger, voting_round_id: u32, revealing: &[usize]) {
    let mut script = RoundScript::new(fixture, voting_round_id);
    for &index in revealing {
        let random = B256::from(U256::from(voting_round_id as u64 * 100 + index as u64 + 1));
        script.commit(index, random, &feed_values(index));
        script.reveal(index, random, &feed_values(index));
    }
    let message = script.protocol_message(B256::repeat_byte(0x77));
    let signers: Vec<usize> = (0..VOTERS).collect();
    for &index in &signers {
        script.sign(index, &message, 0);
    }
    script.finalize(0, &message, &signers, 1);
    script.append_to(ledger);
}

/// Copy the records of `ledger` into a fresh SQLite indexer database.
pub async fn sqlite_ledger(ledger: &MockLedger) -> (LedgerDb, NamedTempFile) {
    let temp_file = NamedTempFile::new().expect("Failed to create temp file");
    let db_url = format!("sqlite:{}", temp_file.path().display());
    let db = LedgerDb::new(&db_url).await.expect("Failed to create database");
    db.insert_transactions(ledger.transactions()).await.expect("Failed to insert transactions");
    db.insert_logs(ledger.logs()).await.expect("Failed to insert logs");
    db.set_state(FIRST_DATABASE_BLOCK, 0, 0).await.expect("Failed to set first block");
    db.set_state(LAST_DATABASE_BLOCK, u32::MAX as u64, u32::MAX as u64).await.expect("Failed to set last block");
    (db, temp_file)
}

pub fn service_config(folder: &Path, use_expected_end: bool) -> RewardCalculationServiceConfig {
    RewardCalculationServiceConfig {
        calculation_folder: folder.to_path_buf(),
        batch_size: 3,
        workers: 2,
        retry_delay: Duration::from_millis(10),
        use_expected_end,
        stages: CalculationStages::all(),
        start_voting_round_id: None,
        end_voting_round_id: None,
    }
}
