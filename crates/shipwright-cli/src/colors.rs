//! Terminal color constants and step markers for CLI output.

use std::io::{self, Write};

use shipwright_core::StepOutcome;

pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";
pub const DIM: &str = "\x1b[2m";
pub const RED: &str = "\x1b[31m";
pub const GREEN: &str = "\x1b[32m";
pub const YELLOW: &str = "\x1b[33m";
pub const CYAN: &str = "\x1b[36m";

/// Flush stdout so progress fragments without a newline appear immediately.
#[inline]
pub fn flush_stdout() {
    io::stdout().flush().ok();
}

/// One-character status marker for a step outcome.
pub fn marker(outcome: &StepOutcome) -> String {
    match outcome {
        StepOutcome::Success => format!("{GREEN}✓{RESET}"),
        StepOutcome::FailedFatal { .. } => format!("{RED}✗{RESET}"),
        StepOutcome::FailedTolerated { .. } => format!("{YELLOW}~{RESET}"),
        StepOutcome::Skipped { .. } => format!("{DIM}-{RESET}"),
    }
}
