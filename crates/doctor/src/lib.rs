//! Concurrent diagnostics for RKE2 / Kubernetes nodes.
//!
//! A run selects a set of [`checks::DiagnosticCheck`]s, hands them to a
//! [`pool::Pool`] that runs them all at once, and collects one
//! [`outcome::CheckOutcome`] per check into a [`report::RunReport`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use infra_doctor::checks::{CheckKind, RunContext};
//! use infra_doctor::pool::{Pool, SilentReporter};
//!
//! let checks = vec![CheckKind::EtcdHealth.build(&deps).unwrap()];
//! let report = Pool::new(checks, Arc::new(SilentReporter))?
//!     .run(&RunContext::default())
//!     .await;
//! std::process::exit(report.exit_code().into());
//! ```

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]

pub mod checks;
pub mod cluster;
pub mod commands;
pub mod config;
pub mod error;
pub mod outcome;
pub mod pool;
pub mod process;
pub mod report;
pub mod ui;

#[cfg(test)]
mod testing;

// Re-export commonly used types at the crate root
pub use checks::{CheckDeps, CheckKind, DiagnosticCheck, RunContext};
pub use config::DoctorConfig;
pub use outcome::{Cause, CauseKind, CheckOutcome, EvidenceAggregator};
pub use pool::{Pool, ProgressReporter};
pub use report::RunReport;
