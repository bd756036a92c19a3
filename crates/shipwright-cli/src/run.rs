//! Run command implementation.
//!
//! Executes the full pipeline and renders the per-step report. The process
//! exits non-zero iff a fatal-policy step failed; tolerated failures are
//! listed but do not fail the run.

use std::fs;
use std::path::Path;
use std::time::Instant;

use shipwright_core::{BuildProfile, Pipeline, PipelineConfig, StepOutcome};

use crate::colors;

/// Execute the pipeline described by `config_path`.
pub fn execute(
    config_path: &str,
    profile: Option<&str>,
    report_path: Option<&str>,
) -> anyhow::Result<()> {
    let path = Path::new(config_path);
    if !path.exists() {
        anyhow::bail!(
            "config not found: {} (current directory: {})",
            config_path,
            std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| "<unknown>".to_string())
        );
    }

    let start = Instant::now();

    let mut config = PipelineConfig::load(path)?;
    if let Some(profile) = profile {
        config.workspace.profile = match profile {
            "debug" => BuildProfile::Debug,
            _ => BuildProfile::Release,
        };
    }

    println!(
        "\n{}Shipwright{} - Running {}{}{} ({} profile)\n",
        colors::BOLD,
        colors::RESET,
        colors::CYAN,
        path.file_name().unwrap_or_default().to_string_lossy(),
        colors::RESET,
        config.workspace.profile
    );

    print!("{}  ◆ Executing stages{} ... ", colors::DIM, colors::RESET);
    colors::flush_stdout();

    let pipeline = Pipeline::new(config)?;
    let report = pipeline.run()?;
    println!("done\n");

    // Per-step outcomes, in execution order.
    for step in &report.steps {
        print!("  {} {}", colors::marker(&step.outcome), step.step);
        match &step.outcome {
            StepOutcome::Success => println!(" {}({:.2}s){}", colors::DIM, step.duration_secs, colors::RESET),
            StepOutcome::FailedFatal { message } | StepOutcome::FailedTolerated { message } => {
                println!();
                for line in message.lines().take(8) {
                    println!("      {}{}{}", colors::DIM, line, colors::RESET);
                }
            }
            StepOutcome::Skipped { blocked_on } => {
                println!(" {}(blocked on {}){}", colors::DIM, blocked_on, colors::RESET)
            }
        }
    }

    if let Some(report_path) = report_path {
        fs::write(report_path, report.to_json())?;
        println!(
            "\n{}Report:{} {}",
            colors::DIM,
            colors::RESET,
            report_path
        );
    }

    let tolerated: Vec<String> = report.tolerated().map(|s| s.step.to_string()).collect();
    if !tolerated.is_empty() {
        println!(
            "\n{}Degraded:{} deliverable lacks output of {}",
            colors::YELLOW,
            colors::RESET,
            tolerated.join(", ")
        );
    }

    println!();
    if let Some(fatal) = report.first_fatal() {
        println!(
            "{}Failed:{} {} after {:.2}s",
            colors::RED,
            colors::RESET,
            fatal.step,
            start.elapsed().as_secs_f64()
        );
        anyhow::bail!("pipeline failed at step '{}'", fatal.step);
    }

    println!(
        "{}Completed{} {} steps in {:.2}s",
        colors::GREEN,
        colors::RESET,
        report.steps.len(),
        start.elapsed().as_secs_f64()
    );
    println!(
        "{}Artifacts:{} {}",
        colors::DIM,
        colors::RESET,
        pipeline.dirs().artifact_dir.display()
    );

    Ok(())
}
