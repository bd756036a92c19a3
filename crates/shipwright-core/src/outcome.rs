//! Step identities, failure policies, and run reports.
//!
//! Every pipeline stage produces a tagged [`StepOutcome`] instead of relying
//! on control flow to distinguish "failed but tolerated" from "failed and
//! fatal". The collector and the assemblers consume these tags uniformly.

use serde::Serialize;

/// Failure policy for a build step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepPolicy {
    /// A failure halts the pipeline and all dependent stages.
    Fatal,
    /// A failure is reported but the pipeline continues; the step's
    /// artifact is simply absent from the deliverable.
    BestEffort,
}

/// Identity of a pipeline step, used in reports and error messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    /// Toolchain provisioning (rust toolchain or host C tools).
    Provision(String),
    /// Build of one workspace package.
    Package(String),
    /// Build of one external native module.
    External(String),
    /// Artifact collection into the canonical directory.
    Collect,
    /// Assembly of one deliverable image.
    Image(String),
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provision(name) => write!(f, "provision:{name}"),
            Self::Package(name) => write!(f, "package:{name}"),
            Self::External(name) => write!(f, "external:{name}"),
            Self::Collect => write!(f, "collect"),
            Self::Image(name) => write!(f, "image:{name}"),
        }
    }
}

/// Result of executing one pipeline step.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum StepOutcome {
    /// The step completed and its artifacts are valid.
    Success,
    /// The step failed under a `fatal` policy; dependent stages are skipped.
    FailedFatal { message: String },
    /// The step failed under a `best-effort` policy; the run continues
    /// without its artifact.
    FailedTolerated { message: String },
    /// The step was never invoked because a step it depends on failed.
    Skipped { blocked_on: String },
}

impl StepOutcome {
    /// Returns true if the step completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns true if this outcome halts dependent stages.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FailedFatal { .. })
    }

    /// Returns true if the failure was tolerated by policy.
    pub fn is_tolerated(&self) -> bool {
        matches!(self, Self::FailedTolerated { .. })
    }
}

/// Outcome of one step together with its identity and wall time.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: StepId,
    #[serde(flatten)]
    pub outcome: StepOutcome,
    pub duration_secs: f64,
}

impl StepReport {
    pub fn new(step: StepId, outcome: StepOutcome, duration_secs: f64) -> Self {
        Self {
            step,
            outcome,
            duration_secs,
        }
    }
}

/// Full record of a pipeline run, in execution order.
#[derive(Debug, Default, Serialize)]
pub struct PipelineReport {
    pub steps: Vec<StepReport>,
}

impl PipelineReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a step outcome.
    pub fn push(&mut self, report: StepReport) {
        self.steps.push(report);
    }

    /// True iff no step failed fatally. Tolerated failures and skips do
    /// not affect the exit status.
    pub fn succeeded(&self) -> bool {
        !self.steps.iter().any(|s| s.outcome.is_fatal())
    }

    /// The first fatally-failed step, if any.
    pub fn first_fatal(&self) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.outcome.is_fatal())
    }

    /// Steps whose failure was tolerated by policy.
    pub fn tolerated(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|s| s.outcome.is_tolerated())
    }

    /// Serialize the report as pretty JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_id_display() {
        assert_eq!(StepId::Package("core-library".into()).to_string(), "package:core-library");
        assert_eq!(StepId::Collect.to_string(), "collect");
        assert_eq!(StepId::Image("tool".into()).to_string(), "image:tool");
    }

    #[test]
    fn test_report_success_ignores_tolerated() {
        let mut report = PipelineReport::new();
        report.push(StepReport::new(
            StepId::Package("a".into()),
            StepOutcome::Success,
            0.1,
        ));
        report.push(StepReport::new(
            StepId::External("m".into()),
            StepOutcome::FailedTolerated {
                message: "make: error".into(),
            },
            0.1,
        ));
        assert!(report.succeeded());
        assert_eq!(report.tolerated().count(), 1);
    }

    #[test]
    fn test_report_fatal() {
        let mut report = PipelineReport::new();
        report.push(StepReport::new(
            StepId::Package("a".into()),
            StepOutcome::FailedFatal {
                message: "missing symbol".into(),
            },
            0.1,
        ));
        report.push(StepReport::new(
            StepId::Collect,
            StepOutcome::Skipped {
                blocked_on: "package:a".into(),
            },
            0.0,
        ));
        assert!(!report.succeeded());
        assert_eq!(report.first_fatal().unwrap().step, StepId::Package("a".into()));
    }

    #[test]
    fn test_policy_parse() {
        let policy: StepPolicy = serde_json::from_str("\"best-effort\"").unwrap();
        assert_eq!(policy, StepPolicy::BestEffort);
        let policy: StepPolicy = serde_json::from_str("\"fatal\"").unwrap();
        assert_eq!(policy, StepPolicy::Fatal);
    }
}
