//! Cue session sync simulator
//!
//! Drives a simulated phone/wrist pairing through scripted scenarios or a
//! seeded chaos schedule.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::error;

use cue_logging::{CueSubscriberBuilder, FileConfig, LogConfig};
use cue_simulation::{ChaosConfig, Scenario, chaos, scenarios};

#[derive(Parser)]
#[command(
    name = "cue-sim",
    about = "Phone and wrist session sync over a simulated link",
    version
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSONL logs instead of pretty console output
    #[arg(long, global = true)]
    json: bool,

    /// Also write JSONL logs to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Load logging configuration from a JSON file
    #[arg(long, global = true)]
    log_config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scripted scenario
    Scenario {
        #[arg(value_enum)]
        name: Scenario,
    },

    /// Run every scripted scenario in order
    All,

    /// Toggle at random while the link flaps, then check convergence
    Chaos {
        /// Number of random actions
        #[arg(short, long, default_value = "200")]
        steps: usize,

        /// Seed for the action schedule
        #[arg(long, default_value = "7")]
        seed: u64,

        /// Longest pause between actions, in milliseconds
        #[arg(long, default_value = "5")]
        max_pause_ms: u64,
    },
}

fn log_config(cli: &Cli) -> anyhow::Result<LogConfig> {
    let mut config = match &cli.log_config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            LogConfig::from_json(&json).context("parsing log configuration")?
        }
        None if cli.json => LogConfig::default(),
        None => LogConfig::development(),
    };

    config.default_level = if cli.verbose { "debug" } else { "info" }.to_string();
    if let Some(dir) = &cli.log_dir {
        config.file = Some(FileConfig {
            directory: dir.clone(),
            ..FileConfig::default()
        });
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = CueSubscriberBuilder::new()
        .with_config(log_config(&cli)?)
        .init()?;

    let result = match cli.command {
        Commands::Scenario { name } => scenarios::run(name).await.map(|report| {
            println!("{report}");
        }),
        Commands::All => run_all().await,
        Commands::Chaos {
            steps,
            seed,
            max_pause_ms,
        } => chaos::run(ChaosConfig {
            steps,
            seed,
            max_pause: Duration::from_millis(max_pause_ms),
        })
        .await
        .map(|report| {
            println!("{report}");
        }),
    };

    if let Err(e) = &result {
        error!(error = %e, "Simulation failed");
    }
    result
}

async fn run_all() -> anyhow::Result<()> {
    for scenario in Scenario::ALL {
        let report = scenarios::run(scenario)
            .await
            .with_context(|| format!("scenario {scenario}"))?;
        println!("{report}");
    }
    Ok(())
}
