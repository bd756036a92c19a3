//! Plan command implementation.
//!
//! Resolves the stage plan (dependency order, policies, declared
//! artifacts) without provisioning or building anything, so config
//! mistakes surface before a long run.

use std::path::Path;

use shipwright_core::{Pipeline, PipelineConfig, StepPolicy};

use crate::colors;

pub fn execute(config_path: &str) -> anyhow::Result<()> {
    let path = Path::new(config_path);
    if !path.exists() {
        anyhow::bail!("config not found: {}", config_path);
    }

    let config = PipelineConfig::load(path)?;
    let pipeline = Pipeline::new(config)?;
    let plan = pipeline.plan()?;

    println!(
        "\n{}Shipwright{} - Plan for {}{}{}\n",
        colors::BOLD,
        colors::RESET,
        colors::CYAN,
        path.file_name().unwrap_or_default().to_string_lossy(),
        colors::RESET
    );

    println!("{}Toolchains:{}", colors::BOLD, colors::RESET);
    for toolchain in &plan.toolchains {
        println!("  {toolchain}");
    }

    println!("\n{}Packages (build order):{}", colors::BOLD, colors::RESET);
    for (position, name) in plan.package_order.iter().enumerate() {
        println!("  {}. {}", position + 1, name);
    }

    if !plan.externals.is_empty() {
        println!("\n{}External modules:{}", colors::BOLD, colors::RESET);
        for (name, policy) in &plan.externals {
            let policy = match policy {
                StepPolicy::Fatal => "fatal",
                StepPolicy::BestEffort => "best-effort",
            };
            println!("  {name} {}({policy}){}", colors::DIM, colors::RESET);
        }
    }

    println!("\n{}Artifacts:{}", colors::BOLD, colors::RESET);
    for (name, producer) in &plan.artifacts {
        println!("  {name} {}<- {producer}{}", colors::DIM, colors::RESET);
    }

    if !plan.images.is_empty() {
        println!("\n{}Images:{}", colors::BOLD, colors::RESET);
        for image in &plan.images {
            println!("  {image}");
        }
    }

    println!();
    Ok(())
}
