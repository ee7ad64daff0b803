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

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use clap::Parser;
use ftso_reward_indexer::{
    db::LedgerDb,
    rewards::{CalculationStages, RewardCalculationService, RewardCalculationServiceConfig},
};
use ftso_rewards::{Network, NetworkConfig};
use tokio_util::sync::CancellationToken;

/// Arguments for the reward calculator.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct RewardCalculatorArgs {
    /// Connection string of the C-chain indexer database.
    #[clap(long, env = "DATABASE_URL")]
    db: String,

    /// Network whose timing and reward presets to use.
    #[clap(long, env, default_value = "flare")]
    network: Network,

    /// JSON network configuration, replacing the preset of --network.
    #[clap(long, env)]
    network_config: Option<PathBuf>,

    /// Folder receiving the calculation artifacts.
    #[clap(long, env, default_value = "calculations")]
    calculation_folder: PathBuf,

    /// Reward epoch to calculate.
    #[clap(long, conflicts_with_all = ["start_reward_epoch_id", "end_reward_epoch_id"])]
    reward_epoch_id: Option<u32>,

    /// First reward epoch to calculate (must be provided together with --end-reward-epoch-id).
    #[clap(long, requires = "end_reward_epoch_id")]
    start_reward_epoch_id: Option<u32>,

    /// Last reward epoch to calculate (must be provided together with --start-reward-epoch-id).
    #[clap(long, requires = "start_reward_epoch_id")]
    end_reward_epoch_id: Option<u32>,

    /// First voting round to process. Only valid with --reward-epoch-id.
    #[clap(long, requires = "reward_epoch_id")]
    start_voting_round_id: Option<u32>,

    /// Last voting round to process. Only valid with --reward-epoch-id.
    #[clap(long, requires = "reward_epoch_id")]
    end_voting_round_id: Option<u32>,

    /// Voting rounds per worker batch.
    #[clap(long, default_value = "100")]
    batch_size: u32,

    /// Number of batches processed in parallel.
    #[clap(long, default_value = "10")]
    workers: usize,

    /// Run the data preparation stage.
    #[clap(long)]
    prepare_data: bool,

    /// Run the offer calculation stage.
    #[clap(long)]
    calculate_offers: bool,

    /// Run the claim calculation stage.
    #[clap(long)]
    calculate_claims: bool,

    /// Run the claim aggregation stage, finishing the epoch once all rounds are aggregated.
    #[clap(long)]
    aggregate_claims: bool,

    /// Use the expected end of reward epochs whose next signing policy is not yet known, and
    /// wait for missing data instead of failing.
    #[clap(long)]
    use_expected_end: bool,

    /// Delay between attempts while waiting for the indexer.
    #[clap(long, default_value = "10000")]
    retry_delay_ms: u64,

    /// Whether to log in JSON format.
    #[clap(long, env, default_value_t = false)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = RewardCalculatorArgs::parse();

    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        .from_env_lossy();

    if args.log_json {
        tracing_subscriber::fmt().with_ansi(false).json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_ansi(false).with_env_filter(filter).init();
    }

    let (start_reward_epoch_id, end_reward_epoch_id) =
        match (args.reward_epoch_id, args.start_reward_epoch_id, args.end_reward_epoch_id) {
            (Some(id), _, _) => (id, id),
            (None, Some(start), Some(end)) if start <= end => (start, end),
            (None, Some(start), Some(end)) => {
                bail!("Start reward epoch {start} is after end reward epoch {end}")
            }
            _ => bail!("Provide --reward-epoch-id or --start-reward-epoch-id and --end-reward-epoch-id"),
        };

    let network = match &args.network_config {
        Some(path) => NetworkConfig::from_file(path)?,
        None => NetworkConfig::from_network(args.network),
    };
    network.contracts.ensure_configured()?;
    tracing::info!("Using {} network configuration", network.network);

    let mut stages = CalculationStages {
        prepare_data: args.prepare_data,
        calculate_offers: args.calculate_offers,
        calculate_claims: args.calculate_claims,
        aggregate_claims: args.aggregate_claims,
    };
    if stages.is_empty() {
        stages = CalculationStages::all();
    }

    let config = RewardCalculationServiceConfig {
        calculation_folder: args.calculation_folder,
        batch_size: args.batch_size,
        workers: args.workers,
        retry_delay: Duration::from_millis(args.retry_delay_ms),
        use_expected_end: args.use_expected_end,
        stages,
        start_voting_round_id: args.start_voting_round_id,
        end_voting_round_id: args.end_voting_round_id,
    };

    let ledger = LedgerDb::new(&args.db).await.context("Failed to connect to the indexer database")?;
    let cancel = CancellationToken::new();
    let service = RewardCalculationService::new(ledger, Arc::new(network), config, cancel.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, stopping after the current voting rounds");
            cancel.cancel();
        }
    });

    service.run(start_reward_epoch_id, end_reward_epoch_id).await?;
    tracing::info!("Reward calculator completed successfully");
    Ok(())
}
