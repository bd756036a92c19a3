//! Shipwright CLI - release pipeline for toolkit container images.

mod colors;
mod plan;
mod run;

use clap::{Parser, Subcommand};
use shipwright_core::{Pipeline, PipelineConfig, PipelineDirs};

#[derive(Parser)]
#[command(name = "shipwright")]
#[command(about = "Builds toolkit release images from a pipeline config")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline
    Run {
        /// Path to the pipeline config
        #[arg(default_value = "shipwright.toml")]
        config: String,

        /// Override the workspace build profile
        #[arg(long, value_parser = ["debug", "release"])]
        profile: Option<String>,

        /// Write the JSON run report to this path
        #[arg(long)]
        report: Option<String>,
    },

    /// Print the resolved stage plan without executing anything
    Plan {
        /// Path to the pipeline config
        #[arg(default_value = "shipwright.toml")]
        config: String,
    },

    /// Provision the toolchains only (idempotent)
    Provision {
        /// Path to the pipeline config
        #[arg(default_value = "shipwright.toml")]
        config: String,
    },

    /// Remove the pipeline working tree
    Clean {
        /// Path to the pipeline config
        #[arg(default_value = "shipwright.toml")]
        config: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run {
            config,
            profile,
            report,
        } => run::execute(&config, profile.as_deref(), report.as_deref())?,

        Commands::Plan { config } => plan::execute(&config)?,

        Commands::Provision { config } => provision(&config)?,

        Commands::Clean { config } => clean(&config)?,
    }

    Ok(())
}

/// Provision the toolchains without building anything.
fn provision(config_path: &str) -> anyhow::Result<()> {
    let config = PipelineConfig::load(config_path)?;
    let pipeline = Pipeline::new(config)?;
    let env = pipeline.provision()?;

    println!(
        "{}Provisioned:{} {} ({})",
        colors::GREEN,
        colors::RESET,
        env.channel(),
        env.rustc_version()
    );
    Ok(())
}

/// Drop everything under the `.shipwright` working tree.
fn clean(config_path: &str) -> anyhow::Result<()> {
    let config = PipelineConfig::load(config_path)?;
    let dirs = PipelineDirs::from_root(&config.root)?;
    dirs.clean()?;

    println!("Removed {}", dirs.work_dir.display());
    Ok(())
}
