//! Run report and summary formatting.

use std::collections::BTreeMap;

use colored::Colorize;
use serde::Serialize;

use crate::outcome::CheckOutcome;

/// Process exit code when every check is healthy (or nothing ran).
pub const EXIT_HEALTHY: u8 = 0;
/// Process exit code when the doctor itself could not run.
pub const EXIT_ERROR: u8 = 1;
/// Process exit code when at least one check is unhealthy.
pub const EXIT_UNHEALTHY: u8 = 2;

/// Outcomes of one run, keyed by check name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub checks: BTreeMap<String, CheckOutcome>,
}

impl RunReport {
    #[must_use]
    pub fn new(checks: BTreeMap<String, CheckOutcome>) -> Self {
        Self { checks }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CheckOutcome> {
        self.checks.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Check if every recorded check is healthy.
    #[must_use]
    pub fn all_healthy(&self) -> bool {
        self.checks.values().all(CheckOutcome::is_healthy)
    }

    #[must_use]
    pub fn healthy_count(&self) -> usize {
        self.checks.values().filter(|o| o.is_healthy()).count()
    }

    #[must_use]
    pub fn unhealthy_count(&self) -> usize {
        self.len() - self.healthy_count()
    }

    /// Exit code for the process: [`EXIT_UNHEALTHY`] if any check failed.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        if self.all_healthy() {
            EXIT_HEALTHY
        } else {
            EXIT_UNHEALTHY
        }
    }

    /// Print a summary of the run.
    pub fn print_summary(&self) {
        println!();
        println!("{}", "═".repeat(70).bright_black());
        println!("{}", "DIAGNOSTIC SUMMARY".cyan().bold());
        println!("{}", "═".repeat(70).bright_black());

        for (name, outcome) in &self.checks {
            match outcome {
                CheckOutcome::Healthy => println!("  {} {}", "✓".green(), name),
                CheckOutcome::Unhealthy(causes) => {
                    println!("  {} {}", "✗".red(), name.red());
                    for cause in causes {
                        println!(
                            "      {} {}",
                            format!("[{}]", cause.kind).bright_black(),
                            cause
                        );
                    }
                }
            }
        }

        println!();
        let line = format!(
            "{}/{} checks healthy",
            self.healthy_count(),
            self.len()
        );
        if self.all_healthy() {
            println!("{} {}", "✓".green().bold(), line.green());
        } else {
            println!("{} {}", "✗".red().bold(), line.red());
        }
        println!();
    }
}
