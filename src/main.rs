mod demo;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use graphk_core::config::AppConfig;
use graphk_core::types::PortValues;

#[derive(Parser)]
#[command(name = "graphk", version, about = "Graph-based pipeline execution engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "graphk.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a bundled demo pipeline and print its outputs
    Demo {
        #[command(subcommand)]
        scenario: Scenario,
    },
    /// Print a demo pipeline's description as JSON
    Describe {
        #[arg(value_enum)]
        pipeline: DemoName,
    },
    /// Show current configuration
    Config,
}

#[derive(Subcommand)]
enum Scenario {
    /// Branch on x > 0
    Branch {
        #[arg(long, allow_negative_numbers = true)]
        x: i64,
    },
    /// Increment v through a nested pipeline
    Nested {
        #[arg(long, allow_negative_numbers = true)]
        v: i64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DemoName {
    Branch,
    Nested,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Missing config falls back to defaults
    let config = if cli.config.exists() {
        AppConfig::load(&cli.config)?
    } else {
        AppConfig::default()
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Describe { pipeline } => {
            let (runtime, pipeline) = match pipeline {
                DemoName::Branch => demo::branch()?,
                DemoName::Nested => demo::nested()?,
            };
            let catalog = runtime.catalog();
            let nested: Vec<_> = catalog
                .ids()
                .into_iter()
                .filter_map(|id| catalog.get(id))
                .map(|p| p.describe())
                .collect();
            let description = serde_json::json!({
                "pipeline": pipeline.describe(),
                "catalog": nested,
                "healthy": runtime.ping(&pipeline),
            });
            println!("{}", serde_json::to_string_pretty(&description)?);
        }
        Commands::Demo { scenario } => {
            let (runtime, pipeline, inputs) = match scenario {
                Scenario::Branch { x } => {
                    let (runtime, pipeline) = demo::branch()?;
                    (runtime, pipeline, single("x", x))
                }
                Scenario::Nested { v } => {
                    let (runtime, pipeline) = demo::nested()?;
                    (runtime, pipeline, single("v", v))
                }
            };

            let cancel = CancellationToken::new();
            let cancel_clone = cancel.clone();

            // Ctrl-C aborts the run
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Cancelling run...");
                cancel_clone.cancel();
            });

            let run_config = config.runtime.to_run_config().with_cancellation(cancel);
            let outputs = runtime.run(&pipeline, inputs, run_config).await?;
            println!("{}", serde_json::to_string_pretty(&outputs)?);
        }
    }

    Ok(())
}

fn single(port: &str, value: i64) -> PortValues {
    let mut values = PortValues::new();
    values.insert(port.to_string(), value.into());
    values
}
