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

use std::{fmt, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use ftso_rewards::{
    artifacts::{AGGREGATED_CLAIMS_FILE, CLAIMS_FILE, REWARD_CALCULATION_DATA_FILE},
    calculate_round_claims, finalize_claims, merge_claims, next_secure_randoms, offers_for_round,
    BlockAssuranceResult, CalculationState, CommitRevealRandomCalculator, DataForRewardCalculation, DataManager,
    FinalRewardClaims, Ledger, LedgerQueries, MedianCalculator, MinimalConditionsCalculator, NetworkConfig,
    RandomCalculator, RewardCalculationStore, RewardDistributionData, RewardEpoch, RewardEpochManager,
    RewardsError, RoundCalculationData, RoundClaims, RoundOffers, StoredRewardEpochInfo,
    WeightedMedianCalculator,
};
use tokio::{sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;

/// Stages to run for each reward epoch. Stages read the artifacts of earlier stages from the
/// calculation folder, so they may run in separate invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CalculationStages {
    pub prepare_data: bool,
    pub calculate_offers: bool,
    pub calculate_claims: bool,
    pub aggregate_claims: bool,
}

impl CalculationStages {
    pub fn all() -> Self {
        Self { prepare_data: true, calculate_offers: true, calculate_claims: true, aggregate_claims: true }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone)]
pub struct RewardCalculationServiceConfig {
    pub calculation_folder: PathBuf,
    /// Voting rounds per worker batch.
    pub batch_size: u32,
    /// Maximum number of batches processed at the same time.
    pub workers: usize,
    pub retry_delay: Duration,
    /// Calculate with the expected end of a reward epoch while the next signing policy is not
    /// known. Missing data is then waited for instead of failing the run.
    pub use_expected_end: bool,
    pub stages: CalculationStages,
    pub start_voting_round_id: Option<u32>,
    pub end_voting_round_id: Option<u32>,
}

/// Per-round stages run by the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundStage {
    PrepareData,
    CalculateClaims,
}

impl fmt::Display for RoundStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundStage::PrepareData => f.write_str("Data preparation"),
            RoundStage::CalculateClaims => f.write_str("Claim calculation"),
        }
    }
}

/// Split `[first, last]` into contiguous batches of at most `batch_size` rounds.
pub fn round_batches(first: u32, last: u32, batch_size: u32) -> Vec<(u32, u32)> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::new();
    let mut start = first;
    while start <= last {
        let end = start.saturating_add(batch_size - 1).min(last);
        batches.push((start, end));
        match end.checked_add(1) {
            Some(next) => start = next,
            None => break,
        }
    }
    batches
}

/// Computes one voting round at a time. Cloned into every worker task.
struct RoundWorker<L> {
    data: Arc<DataManager<L>>,
    store: RewardCalculationStore,
    medians: Arc<dyn MedianCalculator>,
    random: Arc<dyn RandomCalculator>,
    retry_delay: Duration,
    retry_unavailable: bool,
    cancel: CancellationToken,
}

impl<L> Clone for RoundWorker<L> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            store: self.store.clone(),
            medians: self.medians.clone(),
            random: self.random.clone(),
            retry_delay: self.retry_delay,
            retry_unavailable: self.retry_unavailable,
            cancel: self.cancel.clone(),
        }
    }
}

impl<L: Ledger> RoundWorker<L> {
    fn network(&self) -> &NetworkConfig {
        self.data.epochs().config()
    }

    /// Sleep for the retry delay. Returns `false` if cancelled in the meantime.
    async fn wait_for_retry(&self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.retry_delay) => true,
        }
    }

    async fn run_batch(&self, stage: RoundStage, reward_epoch_id: u32, first: u32, last: u32) -> Result<()> {
        tracing::debug!(reward_epoch_id, first, last, "{stage} batch started");
        for voting_round_id in first..=last {
            if self.cancel.is_cancelled() {
                tracing::info!(voting_round_id, "{stage} cancelled");
                return Ok(());
            }
            match stage {
                RoundStage::PrepareData => self.prepare_round(reward_epoch_id, voting_round_id).await,
                RoundStage::CalculateClaims => self.calculate_claims(reward_epoch_id, voting_round_id).await,
            }
            .with_context(|| format!("{stage} of voting round {voting_round_id} failed"))?;
        }
        tracing::debug!(reward_epoch_id, first, last, "{stage} batch done");
        Ok(())
    }

    /// Reward calculation data of a round, waiting for the indexer when allowed to.
    /// `None` if cancelled while waiting.
    async fn reward_data(&self, voting_round_id: u32) -> Result<Option<DataForRewardCalculation>> {
        let benching_window = self.network().rewards.random_generation_benching_window;
        let mut attempt = 0u32;
        loop {
            let response = self.data.data_for_reward_calculation(voting_round_id, benching_window, None).await?;
            if let Some(data) = response.data {
                return Ok(Some(data));
            }
            if !self.retry_unavailable {
                return Err(RewardsError::DataUnavailable {
                    what: "reward calculation data",
                    voting_round_id,
                    status: response.status,
                }
                .into());
            }
            attempt += 1;
            tracing::warn!(
                voting_round_id,
                attempt,
                status = ?response.status,
                "Reward calculation data not available, retrying in {:?}",
                self.retry_delay
            );
            if !self.wait_for_retry().await {
                return Ok(None);
            }
        }
    }

    async fn prepare_round(&self, reward_epoch_id: u32, voting_round_id: u32) -> Result<()> {
        if self.store.round_artifact_exists(reward_epoch_id, voting_round_id, REWARD_CALCULATION_DATA_FILE) {
            tracing::debug!(voting_round_id, "Reward calculation data already prepared");
            return Ok(());
        }
        let Some(data) = self.reward_data(voting_round_id).await? else {
            return Ok(());
        };
        let round = &data.data_for_calculations;
        anyhow::ensure!(
            round.reward_epoch_id == reward_epoch_id,
            "voting round {voting_round_id} belongs to reward epoch {}, not {reward_epoch_id}",
            round.reward_epoch_id
        );
        let medians = self.medians.calculate_medians(round);
        let random = self.random.calculate_random(round);
        tracing::debug!(
            voting_round_id,
            reveals = round.valid_eligible_reveals.len(),
            secure_random = random.is_secure,
            "Prepared reward calculation data"
        );
        self.store.write_reward_calculation_data(&RoundCalculationData {
            data,
            medians,
            random,
            next_secure_random: None,
        })
    }

    async fn calculate_claims(&self, reward_epoch_id: u32, voting_round_id: u32) -> Result<()> {
        if self.store.round_artifact_exists(reward_epoch_id, voting_round_id, CLAIMS_FILE) {
            tracing::debug!(voting_round_id, "Claims already calculated");
            return Ok(());
        }
        let data = self
            .store
            .read_reward_calculation_data(reward_epoch_id, voting_round_id)?
            .with_context(|| format!("Reward calculation data of voting round {voting_round_id} not prepared"))?;
        let offers = self
            .store
            .read_offers(reward_epoch_id, voting_round_id)?
            .with_context(|| format!("Offers of voting round {voting_round_id} not calculated"))?;
        let epoch = self
            .data
            .epochs()
            .reward_epoch(reward_epoch_id)
            .await?
            .with_context(|| format!("Reward epoch {reward_epoch_id} not available"))?;

        let claims = calculate_round_claims(&epoch, &data.data, &data.medians, &offers.offers, self.network())?;
        tracing::debug!(voting_round_id, claims = claims.len(), "Calculated claims");
        self.store.write_claims(&RoundClaims { reward_epoch_id, voting_round_id, claims })
    }
}

/// Runs the reward calculation of whole reward epochs.
pub struct RewardCalculationService<L> {
    worker: RoundWorker<L>,
    config: RewardCalculationServiceConfig,
}

impl<L: Ledger + 'static> RewardCalculationService<L> {
    pub fn new(
        ledger: L,
        network: Arc<NetworkConfig>,
        config: RewardCalculationServiceConfig,
        cancel: CancellationToken,
    ) -> Self {
        let random = CommitRevealRandomCalculator {
            non_benched_random_voters_min_count: network.rewards.non_benched_random_voters_min_count,
        };
        Self::with_calculators(ledger, network, config, cancel, Arc::new(WeightedMedianCalculator), Arc::new(random))
    }

    pub fn with_calculators(
        ledger: L,
        network: Arc<NetworkConfig>,
        config: RewardCalculationServiceConfig,
        cancel: CancellationToken,
        medians: Arc<dyn MedianCalculator>,
        random: Arc<dyn RandomCalculator>,
    ) -> Self {
        let epochs = Arc::new(RewardEpochManager::new(LedgerQueries::new(ledger, network)));
        let worker = RoundWorker {
            data: Arc::new(DataManager::new(epochs)),
            store: RewardCalculationStore::new(&config.calculation_folder),
            medians,
            random,
            retry_delay: config.retry_delay,
            retry_unavailable: config.use_expected_end,
            cancel,
        };
        Self { worker, config }
    }

    pub fn store(&self) -> &RewardCalculationStore {
        &self.worker.store
    }

    fn network(&self) -> &NetworkConfig {
        self.worker.network()
    }

    fn epochs(&self) -> &Arc<RewardEpochManager<L>> {
        self.worker.data.epochs()
    }

    /// Calculate the reward epochs `[start_reward_epoch_id, end_reward_epoch_id]` in order.
    pub async fn run(&self, start_reward_epoch_id: u32, end_reward_epoch_id: u32) -> Result<()> {
        let start_time = std::time::Instant::now();
        for reward_epoch_id in start_reward_epoch_id..=end_reward_epoch_id {
            if self.worker.cancel.is_cancelled() {
                tracing::info!(reward_epoch_id, "Cancelled before reward epoch");
                break;
            }
            self.calculate_reward_epoch(reward_epoch_id)
                .await
                .with_context(|| format!("Reward calculation of reward epoch {reward_epoch_id} failed"))?;
        }
        tracing::info!("Reward calculation run completed in {:.2}s", start_time.elapsed().as_secs_f64());
        Ok(())
    }

    pub async fn calculate_reward_epoch(&self, reward_epoch_id: u32) -> Result<()> {
        let store = self.store();
        if let Some(status) = store.read_calculation_status(reward_epoch_id)? {
            if status.state == CalculationState::Done {
                tracing::info!(reward_epoch_id, "Reward epoch already calculated");
                return Ok(());
            }
        }

        let Some(epoch) = self.resolve_reward_epoch(reward_epoch_id).await? else {
            return Ok(());
        };
        let (end, is_expected_end) = self.resolve_end(reward_epoch_id).await?;
        let start = epoch.start_voting_round_id();
        let (first, last) = self.round_range(reward_epoch_id, start, end)?;
        tracing::info!(
            reward_epoch_id,
            start,
            end,
            is_expected_end,
            first,
            last,
            "Calculating reward epoch"
        );

        self.record_reward_epoch_info(&epoch, end, is_expected_end)?;
        match store.read_calculation_status(reward_epoch_id)? {
            None => {
                store.create_calculation_status(reward_epoch_id, start, end)?;
                store.update_calculation_status(reward_epoch_id, CalculationState::InProgress)?;
            }
            Some(status) if status.state == CalculationState::Pending => {
                store.update_calculation_status(reward_epoch_id, CalculationState::InProgress)?;
            }
            Some(_) => {}
        }

        let stages = self.config.stages;
        if stages.prepare_data {
            self.run_round_stage(RoundStage::PrepareData, reward_epoch_id, first, last).await?;
        }
        if self.worker.cancel.is_cancelled() {
            return Ok(());
        }
        if stages.calculate_offers {
            self.calculate_offers(&epoch, start, end)?;
        }
        if stages.calculate_claims {
            self.run_round_stage(RoundStage::CalculateClaims, reward_epoch_id, first, last).await?;
        }
        if self.worker.cancel.is_cancelled() {
            return Ok(());
        }
        if stages.aggregate_claims {
            let aggregated_until = self.aggregate_claims(reward_epoch_id, start, end)?;
            if aggregated_until == Some(end) && !is_expected_end {
                self.distribute(&epoch, start, end)?;
            }
        }
        Ok(())
    }

    /// `None` if cancelled while waiting for the reward epoch to be indexed.
    async fn resolve_reward_epoch(&self, reward_epoch_id: u32) -> Result<Option<Arc<RewardEpoch>>> {
        loop {
            if let Some(epoch) = self.epochs().reward_epoch(reward_epoch_id).await? {
                return Ok(Some(epoch));
            }
            let expected_start =
                self.network().epoch_settings.expected_reward_epoch_start_voting_round_id(reward_epoch_id);
            if !self.config.use_expected_end {
                return Err(RewardsError::DataUnavailable {
                    what: "reward epoch",
                    voting_round_id: expected_start,
                    status: BlockAssuranceResult::NotOk,
                }
                .into());
            }
            tracing::warn!(reward_epoch_id, "Reward epoch not indexed yet, retrying in {:?}", self.config.retry_delay);
            if !self.worker.wait_for_retry().await {
                return Ok(None);
            }
        }
    }

    /// The last voting round of the epoch and whether it is only the expected one.
    async fn resolve_end(&self, reward_epoch_id: u32) -> Result<(u32, bool)> {
        if let Some(end) = self.epochs().end_voting_round_id(reward_epoch_id).await? {
            return Ok((end, false));
        }
        let expected = self.epochs().expected_end_voting_round_id(reward_epoch_id).map_err(RewardsError::from)?;
        if self.config.use_expected_end {
            tracing::info!(reward_epoch_id, expected, "Next signing policy not known, using expected end");
            return Ok((expected, true));
        }
        Err(RewardsError::DataUnavailable {
            what: "next signing policy",
            voting_round_id: expected.saturating_add(1),
            status: BlockAssuranceResult::NotOk,
        }
        .into())
    }

    fn round_range(&self, reward_epoch_id: u32, start: u32, end: u32) -> Result<(u32, u32), RewardsError> {
        let first = self.config.start_voting_round_id.unwrap_or(start);
        let last = self.config.end_voting_round_id.unwrap_or(end);
        if first < start || last > end || first > last {
            return Err(RewardsError::RangeViolation {
                reward_epoch_id,
                start_voting_round_id: first,
                end_voting_round_id: last,
                epoch_start_voting_round_id: start,
                epoch_end_voting_round_id: end,
            });
        }
        Ok((first, last))
    }

    fn record_reward_epoch_info(&self, epoch: &RewardEpoch, end: u32, is_expected_end: bool) -> Result<()> {
        let reward_epoch_id = epoch.reward_epoch_id();
        let info = StoredRewardEpochInfo {
            info: epoch.info().clone(),
            end_voting_round_id: end,
            is_expected_end,
        };
        match self.store().read_reward_epoch_info(reward_epoch_id)? {
            Some(previous) if previous == info => return Ok(()),
            Some(previous) if previous.end_voting_round_id != end => tracing::info!(
                reward_epoch_id,
                previous_end = previous.end_voting_round_id,
                end,
                "Reward epoch end moved"
            ),
            _ => {}
        }
        self.store().write_reward_epoch_info(&info)
    }

    async fn run_round_stage(&self, stage: RoundStage, reward_epoch_id: u32, first: u32, last: u32) -> Result<()> {
        let stage_start = std::time::Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut workers = JoinSet::new();
        for (batch_first, batch_last) in round_batches(first, last, self.config.batch_size) {
            let worker = self.worker.clone();
            let semaphore = semaphore.clone();
            workers.spawn(async move {
                let _permit = semaphore.acquire_owned().await?;
                worker.run_batch(stage, reward_epoch_id, batch_first, batch_last).await
            });
        }
        while let Some(result) = workers.join_next().await {
            if let Err(err) = result.context("Worker task panicked").and_then(|r| r) {
                workers.abort_all();
                return Err(err);
            }
        }
        tracing::info!(
            reward_epoch_id,
            first,
            last,
            "{stage} completed in {:.2}s",
            stage_start.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Granulate the epoch's offers over the prepared rounds, back-filling each round's next
    /// secure random. Rounds whose offers changed since the last run lose their claims, and
    /// every aggregate from the first such round on is dropped.
    fn calculate_offers(&self, epoch: &RewardEpoch, start: u32, end: u32) -> Result<()> {
        let reward_epoch_id = epoch.reward_epoch_id();
        let store = self.store();
        let mut rounds = Vec::new();
        for voting_round_id in start..=end {
            match store.read_reward_calculation_data(reward_epoch_id, voting_round_id)? {
                Some(data) => rounds.push(data),
                None => break,
            }
        }
        if rounds.is_empty() {
            tracing::info!(reward_epoch_id, "No prepared voting rounds, skipping offers");
            return Ok(());
        }

        let randoms: Vec<_> = rounds.iter().map(|r| r.random).collect();
        let next_randoms = next_secure_randoms(&randoms);
        let settings = &self.network().rewards;
        let mut first_changed = None;
        let prepared = rounds.len();
        for mut data in rounds {
            let voting_round_id = data.data.data_for_calculations.voting_round_id;
            let next_secure_random = next_randoms.get(&voting_round_id).copied().flatten();
            if data.next_secure_random != next_secure_random {
                data.next_secure_random = next_secure_random;
                store.write_reward_calculation_data(&data)?;
                tracing::debug!(voting_round_id, ?next_secure_random, "Back-filled next secure random");
            }

            let offers = RoundOffers {
                reward_epoch_id,
                voting_round_id,
                next_secure_random,
                offers: offers_for_round(
                    epoch,
                    start,
                    end,
                    voting_round_id,
                    next_secure_random.map(|n| n.random),
                    settings,
                )?,
            };
            match store.read_offers(reward_epoch_id, voting_round_id)? {
                Some(existing) if existing == offers => continue,
                Some(_) => {
                    tracing::info!(voting_round_id, "Offers changed, invalidating claims");
                    store.remove_round_artifact(reward_epoch_id, voting_round_id, CLAIMS_FILE)?;
                    first_changed.get_or_insert(voting_round_id);
                }
                None => {}
            }
            store.write_offers(&offers)?;
        }

        if let Some(first) = first_changed {
            for voting_round_id in first..=end {
                store.remove_round_artifact(reward_epoch_id, voting_round_id, AGGREGATED_CLAIMS_FILE)?;
            }
        }
        tracing::info!(reward_epoch_id, rounds = prepared, "Calculated offers");
        Ok(())
    }

    /// Fold claims into running aggregates, resuming after the last existing aggregate.
    /// Returns the last aggregated round.
    fn aggregate_claims(&self, reward_epoch_id: u32, start: u32, end: u32) -> Result<Option<u32>> {
        let store = self.store();
        let mut previous: Option<RoundClaims> = None;
        let mut resume_from = None;
        let mut aggregated_until = None;
        for voting_round_id in start..=end {
            if store.round_artifact_exists(reward_epoch_id, voting_round_id, AGGREGATED_CLAIMS_FILE) {
                resume_from = Some(voting_round_id);
                aggregated_until = Some(voting_round_id);
                previous = None;
                continue;
            }
            let Some(claims) = store.read_claims(reward_epoch_id, voting_round_id)? else {
                tracing::info!(reward_epoch_id, voting_round_id, "Claims not calculated yet, stopping aggregation");
                break;
            };
            if previous.is_none() {
                if let Some(round) = resume_from {
                    previous = Some(
                        store
                            .read_aggregated_claims(reward_epoch_id, round)?
                            .with_context(|| format!("Aggregated claims of voting round {round} disappeared"))?,
                    );
                }
            }

            let merged = merge_claims(previous.iter().flat_map(|p| &p.claims).chain(&claims.claims));
            let aggregated = RoundClaims { reward_epoch_id, voting_round_id, claims: merged };
            store.write_aggregated_claims(&aggregated)?;
            previous = Some(aggregated);
            aggregated_until = Some(voting_round_id);
        }
        tracing::info!(reward_epoch_id, ?aggregated_until, "Aggregated claims");
        Ok(aggregated_until)
    }

    /// Final claims, Merkle tree and minimal conditions of a fully aggregated epoch.
    fn distribute(&self, epoch: &RewardEpoch, start: u32, end: u32) -> Result<()> {
        let reward_epoch_id = epoch.reward_epoch_id();
        let store = self.store();
        let aggregated = store
            .read_aggregated_claims(reward_epoch_id, end)?
            .with_context(|| format!("Aggregated claims of voting round {end} missing"))?;
        let claims = finalize_claims(reward_epoch_id, &aggregated.claims)
            .map_err(RewardsError::from)?;
        let distribution = RewardDistributionData::new(reward_epoch_id, &claims).map_err(RewardsError::from)?;
        store.write_final_reward_claims(&FinalRewardClaims { reward_epoch_id, claims })?;
        store.write_reward_distribution_data(&distribution)?;

        let mut conditions = MinimalConditionsCalculator::new(&self.network().rewards);
        for voting_round_id in start..=end {
            let data = store
                .read_reward_calculation_data(reward_epoch_id, voting_round_id)?
                .with_context(|| format!("Reward calculation data of voting round {voting_round_id} missing"))?;
            conditions.add_round(&data.medians);
        }
        let conditions = conditions.finish(epoch, start, end);
        store.write_minimal_conditions(&conditions)?;

        store.update_calculation_status(reward_epoch_id, CalculationState::Done)?;
        tracing::info!(
            reward_epoch_id,
            merkle_root = %distribution.merkle_root,
            claims = distribution.reward_claims.len(),
            passing_voters = conditions.voters.iter().filter(|v| v.passes).count(),
            "Reward epoch calculated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ftso_rewards::test_utils::EpochFixture;
    use tracing_test::traced_test;

    use super::*;

    fn config(folder: &std::path::Path, use_expected_end: bool) -> RewardCalculationServiceConfig {
        RewardCalculationServiceConfig {
            calculation_folder: folder.to_path_buf(),
            batch_size: 2,
            workers: 2,
            retry_delay: Duration::from_millis(10),
            use_expected_end,
            stages: CalculationStages::all(),
            start_voting_round_id: None,
            end_voting_round_id: None,
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_expected_end_without_next_signing_policy() {
        let fixture = EpochFixture::new(4);
        let folder = tempfile::tempdir().unwrap();
        let service = RewardCalculationService::new(
            fixture.ledger_with_epoch_events(),
            Arc::new(fixture.config.clone()),
            RewardCalculationServiceConfig {
                stages: CalculationStages { prepare_data: true, ..Default::default() },
                ..config(folder.path(), true)
            },
            CancellationToken::new(),
        );
        service.run(fixture.reward_epoch_id, fixture.reward_epoch_id).await.unwrap();

        assert!(logs_contain("Next signing policy not known, using expected end"));
        let info = service.store().read_reward_epoch_info(fixture.reward_epoch_id).unwrap().unwrap();
        assert!(info.is_expected_end);
        assert_eq!(info.end_voting_round_id, fixture.start_voting_round_id + 9);
        let status = service.store().read_calculation_status(fixture.reward_epoch_id).unwrap().unwrap();
        assert_eq!(status.state, CalculationState::InProgress);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_final_mode_does_not_retry_missing_reward_epoch() {
        let fixture = EpochFixture::new(4);
        let folder = tempfile::tempdir().unwrap();
        let service = RewardCalculationService::new(
            fixture.ledger_with_epoch_events(),
            Arc::new(fixture.config.clone()),
            config(folder.path(), false),
            CancellationToken::new(),
        );
        let err = service.calculate_reward_epoch(fixture.reward_epoch_id + 5).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RewardsError>(),
            Some(RewardsError::DataUnavailable { what: "reward epoch", .. })
        ));
        assert!(!logs_contain("retrying"));
    }

    #[test]
    fn batches_are_contiguous_and_bounded() {
        assert_eq!(round_batches(10, 19, 4), vec![(10, 13), (14, 17), (18, 19)]);
        assert_eq!(round_batches(10, 10, 100), vec![(10, 10)]);
        assert_eq!(round_batches(5, 7, 0), vec![(5, 5), (6, 6), (7, 7)]);
        assert!(round_batches(8, 7, 3).is_empty());
        assert_eq!(round_batches(u32::MAX - 1, u32::MAX, 5), vec![(u32::MAX - 1, u32::MAX)]);
    }

    #[test]
    fn empty_stage_selection() {
        assert!(CalculationStages::default().is_empty());
        assert!(!CalculationStages::all().is_empty());
    }
}
