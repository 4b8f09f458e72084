#![forbid(unsafe_code)]

use std::env;
use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use dagclock_core::{ConfigError, IndexConfig};
use dagclock_sim::campaign::{CampaignConfig, format_violation, replay_seed, run_campaign};
use dagclock_sim::tiny_index_config;
use tracing::error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    name = "dagclock-sim",
    version,
    about = "Replay random validator DAGs in several topological orders and check the vector index agrees with itself",
    after_help = "EXAMPLES:\n    # 500 seeds, 3 equivocators\n    dagclock-sim --seeds 500 --cheaters 3\n\n    # Inspect one failing seed\n    dagclock-sim --replay 42"
)]
struct Cli {
    /// First seed of the campaign.
    #[arg(long, default_value_t = 0)]
    seed_start: u64,

    /// Number of seeds to run.
    #[arg(long, default_value_t = 100)]
    seeds: u64,

    #[arg(long, default_value_t = 7)]
    validators: u32,

    #[arg(long, default_value_t = 12)]
    rounds: u32,

    /// Other-validator parents per event.
    #[arg(long, default_value_t = 2)]
    parents: usize,

    /// Equivocating validators per seed.
    #[arg(long, default_value_t = 1)]
    cheaters: u32,

    /// Topological orders replayed per seed.
    #[arg(long, default_value_t = 3)]
    orderings: usize,

    /// TOML file with index budgets; defaults to a tiny cache that forces spills.
    #[arg(long, value_name = "PATH")]
    index_config: Option<PathBuf>,

    /// Run only this seed and print every violation.
    #[arg(long, value_name = "SEED")]
    replay: Option<u64>,

    /// Print the campaign report as JSON.
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn campaign_config(&self) -> Result<CampaignConfig> {
        let index = match &self.index_config {
            Some(path) => IndexConfig::load(path).inspect_err(|err| {
                if let Some(config_err) = err.downcast_ref::<ConfigError>() {
                    error!(code = %config_err.code(), path = %path.display(), "index config rejected");
                }
            })?,
            None => tiny_index_config(),
        };
        Ok(CampaignConfig {
            seed_range: self.seed_start..self.seed_start.saturating_add(self.seeds),
            validators: self.validators,
            rounds: self.rounds,
            parents_per_event: self.parents,
            cheaters: self.cheaters,
            orderings: self.orderings,
            index,
        })
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("DAGCLOCK_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "dagclock=debug,info"
        } else {
            "dagclock=info,warn"
        })
    });

    let format = env::var("DAGCLOCK_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry.with(fmt::layer().json().with_ansi(false)).init();
        }
        _ => {
            registry.with(fmt::layer().compact()).init();
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = cli.campaign_config()?;

    if let Some(seed) = cli.replay {
        let trace = replay_seed(seed, &config)?;
        println!(
            "seed {seed}: events={} orderings={} forks_marked={} passed={}",
            trace.result.dag.events.len(),
            trace.result.replays.len(),
            trace.result.replays.first().map_or(0, |r| r.forks_marked),
            trace.oracle.passed
        );
        for violation in &trace.oracle.violations {
            println!("  {}", format_violation(violation));
        }
        if !trace.oracle.passed {
            bail!("seed {seed} violated {} invariants", trace.oracle.violations.len());
        }
        return Ok(());
    }

    let report = run_campaign(&config)?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "campaign complete: seeds={} passed={} with_forks={} events_indexed={}",
            report.seeds_run, report.seeds_passed, report.seeds_with_forks, report.events_indexed
        );
        for failure in &report.failures {
            println!("seed {}:", failure.seed);
            for violation in &failure.violations {
                println!("  {violation}");
            }
        }
    }

    if let Some(seed) = report.first_failure {
        bail!(
            "{} of {} seeds failed; first failing seed: {seed}",
            report.failures.len(),
            report.seeds_run
        );
    }
    Ok(())
}
