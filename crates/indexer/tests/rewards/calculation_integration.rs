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

use std::sync::Arc;

use alloy_primitives::U256;
use ftso_reward_indexer::rewards::RewardCalculationService;
use ftso_rewards::{
    artifacts::{AGGREGATED_CLAIMS_FILE, CLAIMS_FILE, OFFERS_FILE, REWARD_CALCULATION_DATA_FILE},
    merkle::verify_proof,
    CalculationState, RewardsError,
};
use tokio_util::sync::CancellationToken;

use super::common::{self, TOTAL_OFFERED, VOTERS};

fn claims_total(claims: &[ftso_rewards::RewardClaim]) -> U256 {
    claims.iter().fold(U256::ZERO, |acc, c| acc + c.amount)
}

#[test_log::test(tokio::test)]
async fn test_reward_epoch_from_indexer_database() {
    let fixture = common::fixture();
    let start = fixture.start_voting_round_id;
    let end = start + fixture.config.epoch_settings.reward_epoch_duration_in_voting_epochs - 1;
    let all: Vec<usize> = (0..VOTERS).collect();

    let mut ledger = fixture.ledger_with_epoch_events();
    for round in start..=end {
        common::script_round(&fixture, &mut ledger, round, &all);
    }
    fixture.push_next_signing_policy(&mut ledger, end);
    let (db, _db_file) = common::sqlite_ledger(&ledger).await;

    let folder = tempfile::tempdir().unwrap();
    let service = RewardCalculationService::new(
        db,
        Arc::new(fixture.config.clone()),
        common::service_config(folder.path(), false),
        CancellationToken::new(),
    );
    service.run(fixture.reward_epoch_id, fixture.reward_epoch_id).await.unwrap();

    let store = service.store();
    let id = fixture.reward_epoch_id;
    let status = store.read_calculation_status(id).unwrap().unwrap();
    assert_eq!(status.state, CalculationState::Done);
    assert_eq!((status.start_voting_round_id, status.end_voting_round_id), (start, end));
    for round in start..=end {
        for file in [OFFERS_FILE, REWARD_CALCULATION_DATA_FILE, CLAIMS_FILE, AGGREGATED_CLAIMS_FILE] {
            assert!(store.round_artifact_exists(id, round, file), "{file} of round {round} missing");
        }
        let data = store.read_reward_calculation_data(id, round).unwrap().unwrap();
        assert!(data.random.is_secure);
        assert_eq!(data.next_secure_random.unwrap().secure_voting_round_id, round);
        assert!(data.data.first_successful_finalization.is_some());
    }

    let final_claims = store.read_final_reward_claims(id).unwrap().unwrap();
    assert_eq!(claims_total(&final_claims.claims), U256::from(TOTAL_OFFERED));

    let distribution = store.read_reward_distribution_data(id).unwrap().unwrap();
    assert_eq!(distribution.reward_claims.len(), final_claims.claims.len());
    for claim in &distribution.reward_claims {
        assert!(verify_proof(claim.body.hash(), &claim.merkle_proof, distribution.merkle_root));
    }

    let conditions = store.read_minimal_conditions(id).unwrap().unwrap();
    assert_eq!(conditions.voters.len(), VOTERS);
    assert!(conditions.voters.iter().all(|v| v.passes && v.total == 30 && v.hits == 30));

    // A finished epoch is left alone.
    service.run(id, id).await.unwrap();
    assert_eq!(store.read_final_reward_claims(id).unwrap().unwrap(), final_claims);
}

#[test_log::test(tokio::test)]
async fn test_provisional_calculation_is_extended() {
    let fixture = common::fixture();
    let id = fixture.reward_epoch_id;
    let start = fixture.start_voting_round_id;
    let end = start + fixture.config.epoch_settings.reward_epoch_duration_in_voting_epochs - 1;
    let insecure = start + 5;
    let all: Vec<usize> = (0..VOTERS).collect();

    let mut ledger = fixture.ledger_with_epoch_events();
    for round in start..=end {
        // A single revealing voter does not make a secure random.
        let revealing: &[usize] = if round == insecure { &[0] } else { &all };
        common::script_round(&fixture, &mut ledger, round, revealing);
    }
    let folder = tempfile::tempdir().unwrap();

    let mut config = common::service_config(folder.path(), true);
    config.end_voting_round_id = Some(insecure);
    let provisional =
        RewardCalculationService::new(ledger.clone(), Arc::new(fixture.config.clone()), config, CancellationToken::new());
    provisional.run(id, id).await.unwrap();

    let store = provisional.store();
    assert!(store.read_reward_epoch_info(id).unwrap().unwrap().is_expected_end);
    assert_eq!(store.read_calculation_status(id).unwrap().unwrap().state, CalculationState::InProgress);
    let burned = store.read_offers(id, insecure).unwrap().unwrap();
    assert_eq!(burned.next_secure_random, None);
    assert!(burned.offers.iter().all(|o| o.should_be_burned));
    let kept_claims = store.read_claims(id, start).unwrap().unwrap();
    assert!(store.round_artifact_exists(id, insecure, AGGREGATED_CLAIMS_FILE));
    assert!(store.read_final_reward_claims(id).unwrap().is_none());

    fixture.push_next_signing_policy(&mut ledger, end);
    let full = RewardCalculationService::new(
        ledger,
        Arc::new(fixture.config.clone()),
        common::service_config(folder.path(), false),
        CancellationToken::new(),
    );
    full.run(id, id).await.unwrap();

    let store = full.store();
    assert!(!store.read_reward_epoch_info(id).unwrap().unwrap().is_expected_end);
    let regenerated = store.read_offers(id, insecure).unwrap().unwrap();
    let next = regenerated.next_secure_random.unwrap();
    assert_eq!(next.secure_voting_round_id, insecure + 1);
    assert!(regenerated.offers.iter().all(|o| !o.should_be_burned));
    let data = store.read_reward_calculation_data(id, insecure).unwrap().unwrap();
    assert!(!data.random.is_secure);
    assert_eq!(data.next_secure_random, Some(next));
    assert_eq!(store.read_claims(id, start).unwrap().unwrap(), kept_claims);

    assert_eq!(store.read_calculation_status(id).unwrap().unwrap().state, CalculationState::Done);
    let final_claims = store.read_final_reward_claims(id).unwrap().unwrap();
    assert_eq!(claims_total(&final_claims.claims), U256::from(TOTAL_OFFERED));
}

#[test_log::test(tokio::test)]
async fn test_voting_rounds_outside_epoch_are_rejected() {
    let fixture = common::fixture();
    let mut ledger = fixture.ledger_with_epoch_events();
    let end = fixture.start_voting_round_id + 9;
    fixture.push_next_signing_policy(&mut ledger, end);
    let folder = tempfile::tempdir().unwrap();

    let mut config = common::service_config(folder.path(), false);
    config.end_voting_round_id = Some(end + 1);
    let service =
        RewardCalculationService::new(ledger, Arc::new(fixture.config.clone()), config, CancellationToken::new());
    let err = service.run(fixture.reward_epoch_id, fixture.reward_epoch_id).await.unwrap_err();
    assert!(err
        .chain()
        .any(|e| matches!(e.downcast_ref::<RewardsError>(), Some(RewardsError::RangeViolation { .. }))));
}

#[test_log::test(tokio::test)]
async fn test_final_calculation_requires_next_signing_policy() {
    let fixture = common::fixture();
    let folder = tempfile::tempdir().unwrap();
    let service = RewardCalculationService::new(
        fixture.ledger_with_epoch_events(),
        Arc::new(fixture.config.clone()),
        common::service_config(folder.path(), false),
        CancellationToken::new(),
    );
    let err = service.run(fixture.reward_epoch_id, fixture.reward_epoch_id).await.unwrap_err();
    assert!(err.chain().any(|e| matches!(
        e.downcast_ref::<RewardsError>(),
        Some(RewardsError::DataUnavailable { what: "next signing policy", .. })
    )));
    assert!(service.store().read_calculation_status(fixture.reward_epoch_id).unwrap().is_none());
}

#[test_log::test(tokio::test)]
async fn test_cancelled_run_writes_nothing() {
    let fixture = common::fixture();
    let folder = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let service = RewardCalculationService::new(
        fixture.ledger_with_epoch_events(),
        Arc::new(fixture.config.clone()),
        common::service_config(folder.path(), true),
        cancel,
    );
    service.run(fixture.reward_epoch_id, fixture.reward_epoch_id).await.unwrap();
    assert!(std::fs::read_dir(folder.path()).unwrap().next().is_none());
}
