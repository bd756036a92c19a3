//! Pipeline orchestration.
//!
//! Stage order is a data dependency, not a convention: provisioning
//! returns the [`ToolchainEnv`] the builders require, the two build
//! branches run under `rayon::join` against disjoint trees, and the
//! collector is the join point that turns build outputs into the
//! [`ArtifactSet`] the tool image consumes. A fatal failure anywhere
//! skips every stage that transitively depends on it; completed work is
//! left in place for inspection.

use std::time::Instant;

use rustc_hash::FxHashSet;

use crate::artifact::{self, ArtifactEntry, ArtifactManifest, ArtifactSet};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::external::{ExternalBuildReport, ExternalBuilder};
use crate::image;
use crate::outcome::{PipelineReport, StepId, StepOutcome, StepPolicy, StepReport};
use crate::paths::PipelineDirs;
use crate::toolchain::{verify_host_tools, ToolchainEnv, ToolchainProvisioner};
use crate::workspace::{PackageBuildReport, PackageGraph, WorkspaceBuilder};

/// The resolved stage plan, for display before a run.
#[derive(Debug)]
pub struct PipelinePlan {
    /// Toolchain descriptions in provisioning order.
    pub toolchains: Vec<String>,
    /// Workspace packages in build order.
    pub package_order: Vec<String>,
    /// External modules with their failure policies.
    pub externals: Vec<(String, StepPolicy)>,
    /// Declared artifacts as (name, producer) pairs.
    pub artifacts: Vec<(String, String)>,
    /// Images that will be assembled.
    pub images: Vec<String>,
}

/// A configured pipeline, ready to run.
pub struct Pipeline {
    config: PipelineConfig,
    dirs: PipelineDirs,
}

impl Pipeline {
    /// Create a pipeline from a validated config.
    ///
    /// The package graph is checked here so cycles and unknown
    /// dependencies surface before anything is provisioned or built.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        PackageGraph::from_packages(&config.workspace.packages)?;
        let dirs = PipelineDirs::from_root(&config.root)?;
        Ok(Self { config, dirs })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn dirs(&self) -> &PipelineDirs {
        &self.dirs
    }

    /// Resolve the stage plan without executing anything.
    pub fn plan(&self) -> Result<PipelinePlan> {
        let graph = PackageGraph::from_packages(&self.config.workspace.packages)?;

        let mut toolchains = vec![format!("rust {}", self.config.toolchain.channel)];
        if !self.config.toolchain.ctools.is_empty() {
            toolchains.push(format!(
                "host tools: {}",
                self.config.toolchain.ctools.join(", ")
            ));
        }

        let mut images = Vec::new();
        if self.config.images.tool.is_some() {
            images.push("tool".to_string());
        }
        if self.config.images.workstation.is_some() {
            images.push("workstation".to_string());
        }

        Ok(PipelinePlan {
            toolchains,
            package_order: graph.build_order()?,
            externals: self
                .config
                .externals
                .iter()
                .map(|m| (m.name.clone(), m.policy))
                .collect(),
            artifacts: self
                .manifest()
                .entries()
                .iter()
                .map(|e| (e.name.clone(), e.producer.to_string()))
                .collect(),
            images,
        })
    }

    /// Run only the provisioning stage. Idempotent.
    pub fn provision(&self) -> Result<ToolchainEnv> {
        verify_host_tools(&self.config.toolchain.ctools)?;
        ToolchainProvisioner::new(&self.config.toolchain)?.provision()
    }

    /// Execute the full pipeline and report every step's outcome.
    ///
    /// Build and assembly failures are recorded in the report, not
    /// returned as errors; the caller maps [`PipelineReport::succeeded`]
    /// onto the process exit status.
    pub fn run(&self) -> Result<PipelineReport> {
        let mut report = PipelineReport::new();

        let Some(env) = self.provision_stage(&mut report)? else {
            return Ok(report);
        };

        let (package_reports, external_reports) = self.build_stage(&env)?;

        // Tolerated external failures make their artifacts legitimately
        // absent downstream; everything else missing is an error.
        let mut tolerated_steps = FxHashSet::default();
        let mut tolerated_artifacts = FxHashSet::default();
        for ext in &external_reports {
            if ext.outcome.is_tolerated() {
                tolerated_steps.insert(StepId::External(ext.name.clone()));
                tolerated_artifacts.insert(ext.name.clone());
            }
        }

        for pkg in package_reports {
            report.push(StepReport::new(
                StepId::Package(pkg.name),
                pkg.outcome,
                pkg.duration_secs,
            ));
        }
        for ext in external_reports {
            report.push(StepReport::new(
                StepId::External(ext.name),
                ext.outcome,
                ext.duration_secs,
            ));
        }

        let first_fatal = report.first_fatal().map(|f| f.step.clone());
        if let Some(blocked_on) = first_fatal {
            self.skip_terminal_stages(&mut report, &blocked_on);
            return Ok(report);
        }

        let Some(artifacts) = self.collect_stage(&mut report, &tolerated_steps) else {
            return Ok(report);
        };

        self.assemble_stage(&mut report, &artifacts, &tolerated_artifacts);

        Ok(report)
    }

    /// Provision both toolchains. On failure, records the fatal outcome,
    /// marks every remaining stage skipped, and yields `None`.
    fn provision_stage(&self, report: &mut PipelineReport) -> Result<Option<ToolchainEnv>> {
        let rust_step = StepId::Provision(self.config.toolchain.channel.clone());
        let ctools_step = StepId::Provision("host-ctools".to_string());

        let started = Instant::now();
        let env = match ToolchainProvisioner::new(&self.config.toolchain)
            .and_then(|p| p.provision())
        {
            Ok(env) => {
                report.push(StepReport::new(
                    rust_step.clone(),
                    StepOutcome::Success,
                    started.elapsed().as_secs_f64(),
                ));
                env
            }
            Err(e) => {
                report.push(StepReport::new(
                    rust_step.clone(),
                    StepOutcome::FailedFatal {
                        message: e.to_string(),
                    },
                    started.elapsed().as_secs_f64(),
                ));
                self.skip_build_stages(report, &rust_step);
                self.skip_terminal_stages(report, &rust_step);
                return Ok(None);
            }
        };

        let started = Instant::now();
        if let Err(e) = verify_host_tools(&self.config.toolchain.ctools) {
            report.push(StepReport::new(
                ctools_step.clone(),
                StepOutcome::FailedFatal {
                    message: e.to_string(),
                },
                started.elapsed().as_secs_f64(),
            ));
            self.skip_build_stages(report, &ctools_step);
            self.skip_terminal_stages(report, &ctools_step);
            return Ok(None);
        }
        report.push(StepReport::new(
            ctools_step,
            StepOutcome::Success,
            started.elapsed().as_secs_f64(),
        ));

        Ok(Some(env))
    }

    /// Run the two independent build branches. They touch disjoint source
    /// trees and output locations, so they join only at the collector.
    fn build_stage(
        &self,
        env: &ToolchainEnv,
    ) -> Result<(Vec<PackageBuildReport>, Vec<ExternalBuildReport>)> {
        let builder =
            WorkspaceBuilder::new(&self.config.workspace, env, self.config.workspace_root());

        let (package_reports, external_reports) = rayon::join(
            || builder.build_all(),
            || {
                self.config
                    .externals
                    .iter()
                    .map(|module| {
                        ExternalBuilder::new(module, self.config.resolve(&module.path)).build()
                    })
                    .collect::<Vec<_>>()
            },
        );

        Ok((package_reports?, external_reports))
    }

    fn collect_stage(
        &self,
        report: &mut PipelineReport,
        tolerated_steps: &FxHashSet<StepId>,
    ) -> Option<ArtifactSet> {
        let started = Instant::now();
        match artifact::collect(&self.manifest(), tolerated_steps, &self.dirs.artifact_dir) {
            Ok(set) => {
                report.push(StepReport::new(
                    StepId::Collect,
                    StepOutcome::Success,
                    started.elapsed().as_secs_f64(),
                ));
                Some(set)
            }
            Err(e) => {
                report.push(StepReport::new(
                    StepId::Collect,
                    StepOutcome::FailedFatal {
                        message: e.to_string(),
                    },
                    started.elapsed().as_secs_f64(),
                ));
                self.skip_images(report, &StepId::Collect);
                None
            }
        }
    }

    /// Assemble both images. They are independent deliverables: a tool
    /// image failure does not block the workstation image, and vice
    /// versa — either failure still fails the run.
    fn assemble_stage(
        &self,
        report: &mut PipelineReport,
        artifacts: &ArtifactSet,
        tolerated_artifacts: &FxHashSet<String>,
    ) {
        if let Some(tool) = &self.config.images.tool {
            let started = Instant::now();
            let outcome = match image::assemble_tool(
                tool,
                artifacts,
                tolerated_artifacts,
                &self.dirs.image_context("tool"),
            ) {
                Ok(_) => StepOutcome::Success,
                Err(e) => StepOutcome::FailedFatal {
                    message: e.to_string(),
                },
            };
            report.push(StepReport::new(
                StepId::Image("tool".to_string()),
                outcome,
                started.elapsed().as_secs_f64(),
            ));
        }

        if let Some(workstation) = &self.config.images.workstation {
            let started = Instant::now();
            let outcome = match image::assemble_workstation(
                workstation,
                &self.config.resolve(&workstation.binding.path),
                &self.config.resolve(&workstation.launch_script),
                &self.dirs.image_context("workstation"),
            ) {
                Ok(_) => StepOutcome::Success,
                Err(e) => StepOutcome::FailedFatal {
                    message: e.to_string(),
                },
            };
            report.push(StepReport::new(
                StepId::Image("workstation".to_string()),
                outcome,
                started.elapsed().as_secs_f64(),
            ));
        }
    }

    /// The declared artifact manifest: package binaries out of the cargo
    /// target directory plus each external module's single artifact.
    fn manifest(&self) -> ArtifactManifest {
        let target_dir = self
            .config
            .workspace_root()
            .join("target")
            .join(self.config.workspace.profile.target_subdir());

        let mut entries = Vec::new();
        for package in &self.config.workspace.packages {
            for artifact in &package.artifacts {
                entries.push(ArtifactEntry {
                    name: artifact.clone(),
                    producer: StepId::Package(package.name.clone()),
                    source: target_dir.join(artifact),
                });
            }
        }
        for module in &self.config.externals {
            entries.push(ArtifactEntry {
                name: module.name.clone(),
                producer: StepId::External(module.name.clone()),
                source: self.config.resolve(&module.path).join(&module.artifact),
            });
        }

        ArtifactManifest::new(entries)
    }

    /// Mark the never-started build steps skipped after a provisioning
    /// failure.
    fn skip_build_stages(&self, report: &mut PipelineReport, blocked_on: &StepId) {
        let order = PackageGraph::from_packages(&self.config.workspace.packages)
            .and_then(|g| g.build_order())
            .unwrap_or_default();
        for name in order {
            push_skip(report, StepId::Package(name), blocked_on);
        }
        for module in &self.config.externals {
            push_skip(report, StepId::External(module.name.clone()), blocked_on);
        }
    }

    /// Mark the collector and both assemblers skipped.
    fn skip_terminal_stages(&self, report: &mut PipelineReport, blocked_on: &StepId) {
        push_skip(report, StepId::Collect, blocked_on);
        self.skip_images(report, blocked_on);
    }

    fn skip_images(&self, report: &mut PipelineReport, blocked_on: &StepId) {
        if self.config.images.tool.is_some() {
            push_skip(report, StepId::Image("tool".to_string()), blocked_on);
        }
        if self.config.images.workstation.is_some() {
            push_skip(report, StepId::Image("workstation".to_string()), blocked_on);
        }
    }
}

fn push_skip(report: &mut PipelineReport, step: StepId, blocked_on: &StepId) {
    report.push(StepReport::new(
        step,
        StepOutcome::Skipped {
            blocked_on: blocked_on.to_string(),
        },
        0.0,
    ));
}
