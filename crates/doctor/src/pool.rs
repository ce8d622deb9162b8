//! Concurrent check scheduler.
//!
//! Every check runs on its own task with no concurrency cap, and [`Pool::run`]
//! returns once all of them have finished. A failing or panicking check is
//! recorded like any other outcome and never cancels its siblings.

use std::collections::{BTreeMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::checks::{DiagnosticCheck, RunContext};
use crate::error::DoctorError;
use crate::outcome::{Cause, CheckOutcome};
use crate::report::RunReport;

/// Receives progress events from running checks.
pub trait ProgressReporter: Send + Sync {
    fn started(&self, name: &str);

    fn finished(&self, name: &str, outcome: &CheckOutcome);
}

/// Reporter that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {
    fn started(&self, _name: &str) {}

    fn finished(&self, _name: &str, _outcome: &CheckOutcome) {}
}

/// Runs a set of checks and collects one outcome per check.
pub struct Pool {
    checks: Vec<Arc<dyn DiagnosticCheck>>,
    reporter: Arc<dyn ProgressReporter>,
    results: Arc<Mutex<BTreeMap<String, CheckOutcome>>>,
}

impl Pool {
    /// Build a pool. Two checks with the same name are rejected.
    pub fn new(
        checks: Vec<Arc<dyn DiagnosticCheck>>,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<Self, DoctorError> {
        let mut seen = HashSet::new();
        for check in &checks {
            if !seen.insert(check.name().to_string()) {
                return Err(DoctorError::DuplicateCheck(check.name().to_string()));
            }
        }

        Ok(Self {
            checks,
            reporter,
            results: Arc::new(Mutex::new(BTreeMap::new())),
        })
    }

    /// Names of the scheduled checks, in selection order.
    pub fn check_names(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    /// Run every check concurrently and wait for all of them.
    pub async fn run(&self, ctx: &RunContext) -> RunReport {
        info!(count = self.checks.len(), "Running diagnostic checks");

        let mut tasks = JoinSet::new();
        for check in &self.checks {
            let check = Arc::clone(check);
            let reporter = Arc::clone(&self.reporter);
            let results = Arc::clone(&self.results);
            let ctx = ctx.clone();

            tasks.spawn(async move {
                let name = check.name().to_string();
                report_progress(&name, || reporter.started(&name));

                let outcome = match AssertUnwindSafe(check.run(&ctx)).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        error!(check = %name, panic = %message, "Check panicked");
                        CheckOutcome::failed(Cause::internal(format!("check panicked: {message}")))
                    }
                };

                report_progress(&name, || reporter.finished(&name, &outcome));
                results
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(name, outcome);
            });
        }

        while let Some(joined) = tasks.join_next().await {
            // Panics are caught inside the task, so only runtime shutdown lands here.
            if let Err(e) = joined {
                error!(error = %e, "Check task did not complete");
            }
        }

        RunReport::new(self.results())
    }

    /// Snapshot of the outcomes recorded so far.
    pub fn results(&self) -> BTreeMap<String, CheckOutcome> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Run a reporter callback. A panicking reporter never costs a check its outcome.
fn report_progress(name: &str, notify: impl FnOnce()) {
    if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(notify)) {
        warn!(check = %name, panic = %panic_message(panic.as_ref()), "Progress reporter panicked");
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Fixed {
        name: &'static str,
        outcome: CheckOutcome,
    }

    #[async_trait]
    impl DiagnosticCheck for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self, _ctx: &RunContext) -> CheckOutcome {
            self.outcome.clone()
        }
    }

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<String>>,
    }

    impl ProgressReporter for Recording {
        fn started(&self, name: &str) {
            self.events.lock().unwrap().push(format!("started {name}"));
        }

        fn finished(&self, name: &str, outcome: &CheckOutcome) {
            let verdict = if outcome.is_healthy() { "succeeded" } else { "failed" };
            self.events.lock().unwrap().push(format!("{verdict} {name}"));
        }
    }

    fn fixed(name: &'static str, outcome: CheckOutcome) -> Arc<dyn DiagnosticCheck> {
        Arc::new(Fixed { name, outcome })
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = Pool::new(
            vec![
                fixed("etcd_health", CheckOutcome::Healthy),
                fixed("etcd_health", CheckOutcome::Healthy),
            ],
            Arc::new(SilentReporter),
        )
        .err()
        .unwrap();
        assert!(matches!(err, DoctorError::DuplicateCheck(name) if name == "etcd_health"));
    }

    #[tokio::test]
    async fn every_check_reports_start_and_finish() {
        let reporter = Arc::new(Recording::default());
        let pool = Pool::new(
            vec![
                fixed("etcd_health", CheckOutcome::Healthy),
                fixed(
                    "etcd_alarm",
                    CheckOutcome::failed(Cause::evidence("etcd pod etcd-a has alarms.")),
                ),
            ],
            reporter.clone(),
        )
        .unwrap();

        let report = pool.run(&RunContext::default()).await;

        let mut events = reporter.events.lock().unwrap().clone();
        events.sort();
        assert_eq!(
            events,
            vec![
                "failed etcd_alarm",
                "started etcd_alarm",
                "started etcd_health",
                "succeeded etcd_health",
            ]
        );
        assert_eq!(report.len(), 2);
        assert_eq!(pool.results().len(), 2);
    }

    #[tokio::test]
    async fn empty_pool_returns_empty_report() {
        let pool = Pool::new(Vec::new(), Arc::new(SilentReporter)).unwrap();
        let report = pool.run(&RunContext::default()).await;
        assert!(report.is_empty());
    }

    struct BrokenPipe;

    impl ProgressReporter for BrokenPipe {
        fn started(&self, _name: &str) {}

        fn finished(&self, _name: &str, _outcome: &CheckOutcome) {
            panic!("failed printing to stdout: Broken pipe");
        }
    }

    struct FailsOnStart;

    impl ProgressReporter for FailsOnStart {
        fn started(&self, _name: &str) {
            panic!("failed printing to stdout: Broken pipe");
        }

        fn finished(&self, _name: &str, _outcome: &CheckOutcome) {}
    }

    #[tokio::test]
    async fn reporter_panic_keeps_the_outcome() {
        let checks = || {
            vec![
                fixed("etcd_health", CheckOutcome::Healthy),
                fixed(
                    "containerd_health",
                    CheckOutcome::failed(Cause::evidence("no containers found")),
                ),
            ]
        };

        for reporter in [
            Arc::new(BrokenPipe) as Arc<dyn ProgressReporter>,
            Arc::new(FailsOnStart),
        ] {
            let pool = Pool::new(checks(), reporter).unwrap();
            let report = pool.run(&RunContext::default()).await;

            assert_eq!(report.len(), 2);
            assert!(report.get("etcd_health").unwrap().is_healthy());
            assert!(!report.get("containerd_health").unwrap().is_healthy());
            assert_eq!(report.exit_code(), crate::report::EXIT_UNHEALTHY);
        }
    }

    #[test]
    fn panic_payloads_are_rendered() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&"kaboom".to_string()), "kaboom");
        assert_eq!(panic_message(&42_u8), "unknown panic");
    }
}
