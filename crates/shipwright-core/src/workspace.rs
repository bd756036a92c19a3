//! Workspace package builds in dependency order.
//!
//! The packages declared in the config form a directed graph; builds run in
//! topological order. A failed package never blocks packages that don't
//! depend on it, but everything downstream of the failure is skipped
//! without ever being invoked.

use std::path::PathBuf;
use std::time::Instant;

use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::{PackageConfig, WorkspaceConfig};
use crate::error::{Error, Result};
use crate::outcome::StepOutcome;
use crate::toolchain::ToolchainEnv;

/// Dependency graph over the workspace packages.
#[derive(Debug)]
pub struct PackageGraph {
    /// Edges go from dependency to dependent.
    graph: DiGraph<String, ()>,
    indices: FxHashMap<String, NodeIndex>,
}

impl PackageGraph {
    /// Build the graph from package declarations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownDependency`] for a `depends-on` naming no
    /// declared package, and [`Error::CyclicDependency`] naming the cycle
    /// members if the declarations are circular.
    pub fn from_packages(packages: &[PackageConfig]) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut indices = FxHashMap::default();

        for package in packages {
            let idx = graph.add_node(package.name.clone());
            indices.insert(package.name.clone(), idx);
        }

        for package in packages {
            let consumer = indices[&package.name];
            for dep in &package.depends_on {
                let producer = *indices.get(dep).ok_or_else(|| {
                    Error::UnknownDependency(format!(
                        "package '{}' depends on '{}', but no package declares it",
                        package.name, dep
                    ))
                })?;
                graph.add_edge(producer, consumer, ());
            }
        }

        let built = Self { graph, indices };
        built.detect_cycles()?;
        Ok(built)
    }

    fn detect_cycles(&self) -> Result<()> {
        use petgraph::algo::kosaraju_scc;

        for scc in kosaraju_scc(&self.graph) {
            if scc.len() > 1 {
                let members: Vec<&str> = scc
                    .iter()
                    .map(|&idx| self.graph[idx].as_str())
                    .collect();
                return Err(Error::CyclicDependency(format!(
                    "{} → {}",
                    members.join(" → "),
                    members[0]
                )));
            }
        }

        Ok(())
    }

    /// Package names in build order.
    pub fn build_order(&self) -> Result<Vec<String>> {
        use petgraph::algo::toposort;

        toposort(&self.graph, None)
            .map(|nodes| nodes.into_iter().map(|idx| self.graph[idx].clone()).collect())
            .map_err(|cycle| {
                Error::CyclicDependency(format!(
                    "cycle detected at package '{}'",
                    self.graph[cycle.node_id()]
                ))
            })
    }

    /// Direct dependents of a package.
    pub fn dependents(&self, name: &str) -> Vec<String> {
        self.indices
            .get(name)
            .map(|&idx| {
                self.graph
                    .neighbors(idx)
                    .map(|n| self.graph[n].clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Outcome of one package build, with the produced binary locations.
#[derive(Debug)]
pub struct PackageBuildReport {
    pub name: String,
    pub outcome: StepOutcome,
    /// Locations under `target/<profile>/`; only valid when the outcome is
    /// [`StepOutcome::Success`].
    pub artifacts: Vec<PathBuf>,
    pub duration_secs: f64,
}

/// Builds workspace packages with the provisioned toolchain.
pub struct WorkspaceBuilder<'a> {
    config: &'a WorkspaceConfig,
    env: &'a ToolchainEnv,
    root: PathBuf,
}

impl<'a> WorkspaceBuilder<'a> {
    pub fn new(config: &'a WorkspaceConfig, env: &'a ToolchainEnv, root: PathBuf) -> Self {
        Self { config, env, root }
    }

    /// Build every package in dependency order.
    ///
    /// Build failures do not abort the walk: independent packages still
    /// build, dependents are skipped unfired, and each package's outcome is
    /// reported. The caller decides fatality from the outcomes.
    ///
    /// # Errors
    ///
    /// Returns an error only for graph-level problems (cycles, unknown
    /// dependencies); those are config defects, not build failures.
    pub fn build_all(&self) -> Result<Vec<PackageBuildReport>> {
        let graph = PackageGraph::from_packages(&self.config.packages)?;
        let order = graph.build_order()?;

        let by_name: FxHashMap<&str, &PackageConfig> = self
            .config
            .packages
            .iter()
            .map(|p| (p.name.as_str(), p))
            .collect();

        let mut unusable: FxHashSet<&str> = FxHashSet::default();
        let mut reports = Vec::with_capacity(order.len());

        for name in &order {
            let package = by_name[name.as_str()];

            if let Some(bad) = package
                .depends_on
                .iter()
                .find(|dep| unusable.contains(dep.as_str()))
            {
                tracing::warn!("skipping package {} (blocked on {})", name, bad);
                unusable.insert(package.name.as_str());
                reports.push(PackageBuildReport {
                    name: name.clone(),
                    outcome: StepOutcome::Skipped {
                        blocked_on: format!("package:{bad}"),
                    },
                    artifacts: Vec::new(),
                    duration_secs: 0.0,
                });
                continue;
            }

            let started = Instant::now();
            tracing::info!("building package {}", name);

            match self.build_package(package) {
                Ok(artifacts) => reports.push(PackageBuildReport {
                    name: name.clone(),
                    outcome: StepOutcome::Success,
                    artifacts,
                    duration_secs: started.elapsed().as_secs_f64(),
                }),
                Err(e) => {
                    tracing::error!("package {} failed to build", name);
                    unusable.insert(package.name.as_str());
                    reports.push(PackageBuildReport {
                        name: name.clone(),
                        outcome: StepOutcome::FailedFatal {
                            message: e.to_string(),
                        },
                        artifacts: Vec::new(),
                        duration_secs: started.elapsed().as_secs_f64(),
                    });
                }
            }
        }

        Ok(reports)
    }

    /// Invoke cargo for one package. Returns the expected artifact
    /// locations on success, or [`Error::Compile`] with the captured
    /// diagnostics.
    fn build_package(&self, package: &PackageConfig) -> Result<Vec<PathBuf>> {
        let mut cmd = self.env.cargo_command();
        cmd.current_dir(&self.root)
            .arg("build")
            .args(["-p", &package.name])
            .args(self.config.profile.cargo_args());

        let output = cmd.output().map_err(|e| Error::Compile {
            package: package.name.clone(),
            stderr: format!(
                "failed to run cargo (working dir: {}): {}",
                self.root.display(),
                e
            ),
        })?;

        if !output.status.success() {
            return Err(Error::Compile {
                package: package.name.clone(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let target_dir = self
            .root
            .join("target")
            .join(self.config.profile.target_subdir());
        Ok(package
            .artifacts
            .iter()
            .map(|artifact| target_dir.join(artifact))
            .collect())
    }
}
