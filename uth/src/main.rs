//! Resilience-test harness for the update client.
//!
//! Runs scenarios that generate fixture trees, serve them through a
//! fault-injection proxy, launch the external update client, and verify
//! the resulting tree against the expected end state.

#![forbid(unsafe_code)]

mod scenarios;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use scenarios::HarnessOptions;
use uth_common::run_scenario;

#[derive(Parser)]
#[command(name = "uth")]
#[command(author, version, about = "Update client resilience-test harness")]
struct Cli {
    /// Run only the named scenario
    #[arg(short, long)]
    scenario: Option<String>,

    /// List scenario names and exit
    #[arg(long)]
    list: bool,

    /// Path to the update client executable under test
    #[arg(long, env = "UTH_UPDATER", default_value = "updater")]
    updater: PathBuf,

    /// Path to the prebuilt blocker executable
    #[arg(long, env = "UTH_BLOCKER", default_value = "uth-blocker")]
    blocker: PathBuf,

    /// Root directory for generated fixture trees
    #[arg(long, default_value = "testfiles")]
    testfiles: PathBuf,

    /// Leave fixture trees on disk after each scenario
    #[arg(long)]
    keep_files: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let options = HarnessOptions {
        root: cli.testfiles,
        updater: cli.updater,
        blocker: cli.blocker,
        keep_files: cli.keep_files,
    };

    let mut table = scenarios::scenario_table(&options);
    if cli.list {
        for cfg in &table {
            println!("{:>2}  {}", cfg.number, cfg.name);
        }
        return Ok(());
    }

    if let Some(ref name) = cli.scenario {
        table.retain(|c| &c.name == name);
        if table.is_empty() {
            anyhow::bail!("unknown scenario: {name}");
        }
    }

    let mut failed = 0usize;
    for cfg in &table {
        match run_scenario(cfg).await {
            Ok(outcome) if outcome.passed => {}
            Ok(_) => failed += 1,
            Err(e) => {
                error!(scenario = %cfg.name, error = %e, "scenario aborted");
                failed += 1;
            }
        }
    }

    if failed == 0 {
        info!(total = table.len(), "all scenarios completed");
        Ok(())
    } else {
        error!(failed, total = table.len(), "scenarios failed");
        std::process::exit(1);
    }
}
