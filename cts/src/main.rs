use anyhow::{anyhow, Context};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use cts::orchestrator::{self, CtsOrchestrator};
use cts::{CtsError, RunStatistics};

#[derive(Parser)]
#[command(name = "cts")]
#[command(about = "Randomized fault-injection testing for HA clusters", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the fault-injection loop against a lab
    Run {
        /// Lab description file (TOML)
        #[arg(long)]
        lab: PathBuf,

        /// Number of iterations, replacing the lab file's
        #[arg(long)]
        iterations: Option<u64>,

        /// Run seed, replacing the lab file's
        #[arg(long)]
        seed: Option<u64>,

        /// Cluster option override (repeatable), e.g. --set dead_time=\"20s\"
        #[arg(long = "set", value_parser = parse_key_val)]
        overrides: Vec<(String, String)>,

        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },
    /// List registered cluster manager drivers
    Drivers,
    /// Validate a lab file and the resulting cluster configuration
    Check {
        /// Lab description file (TOML)
        #[arg(long)]
        lab: PathBuf,

        /// Cluster option override (repeatable)
        #[arg(long = "set", value_parser = parse_key_val)]
        overrides: Vec<(String, String)>,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cts=info,cts_core=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match execute(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn execute(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            lab,
            iterations,
            seed,
            overrides,
            json,
        } => {
            let lab_config = orchestrator::load_lab_config(&lab, iterations, seed)
                .with_context(|| format!("Failed to load lab file {}", lab.display()))?;
            let mut cts = CtsOrchestrator::new(&lab_config, &overrides)
                .await
                .context("Failed to assemble test run")?;

            match cts.run().await {
                Ok(stats) => {
                    print_statistics(&cts, &stats, false, json)?;
                    Ok(())
                }
                Err(CtsError::RunAborted {
                    iteration,
                    reason,
                    statistics,
                }) => {
                    print_statistics(&cts, &statistics, true, json)?;
                    Err(anyhow!("Run aborted at iteration {}: {}", iteration, reason))
                }
                Err(e) => Err(e).context("Test run failed"),
            }
        }
        Commands::Drivers => {
            let registry = orchestrator::driver_registry();
            println!("Available cluster manager drivers:");
            for (name, description) in registry.get_driver_info() {
                println!("  {:<12} {}", name, description);
            }
            Ok(())
        }
        Commands::Check { lab, overrides } => {
            let lab_config = orchestrator::load_lab_config(&lab, None, None)
                .with_context(|| format!("Failed to load lab file {}", lab.display()))?;
            let cts = CtsOrchestrator::new(&lab_config, &overrides)
                .await
                .context("Lab file is not usable")?;

            let cm = cts.cluster_manager();
            println!("Lab file {} is valid", lab.display());
            println!("  driver:     {}", cm.driver().name());
            println!("  nodes:      {}", cm.lab().node_names().collect::<Vec<_>>().join(", "));
            println!("  log file:   {}", cm.config().log_file.display());
            println!("  tests:      {}", cts.test_names().join(", "));
            println!("  iterations: {}", cts.iterations());
            Ok(())
        }
    }
}

fn print_statistics(
    cts: &CtsOrchestrator,
    stats: &RunStatistics,
    aborted: bool,
    json: bool,
) -> anyhow::Result<()> {
    if json {
        let report = cts.report(stats, aborted);
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize statistics")?
        );
    } else {
        print!("{}", stats);
    }
    Ok(())
}
