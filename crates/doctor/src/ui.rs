//! UI helpers for the doctor CLI.
//!
//! Provides consistent formatting for console output while checks run.

use colored::Colorize;

use crate::outcome::CheckOutcome;
use crate::pool::ProgressReporter;

/// Print a section header.
pub fn print_section(title: &str) {
    println!();
    println!("{}", "═".repeat(70).bright_black());
    println!("{}", title.cyan().bold());
    println!("{}", "═".repeat(70).bright_black());
    println!();
}

/// Print a warning message to stderr, keeping stdout for results.
pub fn print_warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow().bold(), message.yellow());
}

/// Print an error message.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message.red());
}

/// Prints one line when a check starts and a block when it finishes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReporter;

impl ProgressReporter for ConsoleReporter {
    fn started(&self, name: &str) {
        println!("{} {} started", "⏳".bold(), name.bold());
    }

    fn finished(&self, name: &str, outcome: &CheckOutcome) {
        match outcome {
            CheckOutcome::Healthy => {
                println!("{} {} succeeded", "✅".bold(), name.green());
            }
            CheckOutcome::Unhealthy(causes) => {
                println!("{} {} failed", "❌".bold(), name.red());
                for cause in causes {
                    println!("\t{} {}", "🐞".bold(), cause);
                }
                println!();
            }
        }
    }
}
