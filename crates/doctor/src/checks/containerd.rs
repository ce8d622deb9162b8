//! containerd runtime health.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{DiagnosticCheck, RunContext};
use crate::config::DoctorConfig;
use crate::outcome::{CheckOutcome, EvidenceAggregator};
use crate::process::{CommandInvocation, ProcessRunner, StdinMode};

pub const CONTAINERD_HEALTH: &str = "containerd_health";

/// Verifies that the runtime lists containers and that the recent containerd
/// log is free of errors.
pub struct ContainerdHealthCheck {
    runner: Arc<dyn ProcessRunner>,
    config: Arc<DoctorConfig>,
}

impl ContainerdHealthCheck {
    pub fn new(runner: Arc<dyn ProcessRunner>, config: Arc<DoctorConfig>) -> Self {
        Self { runner, config }
    }

    async fn check_containers(&self, evidence: &EvidenceAggregator) {
        let invocation = CommandInvocation::new("crictl", ["ps"]).with_stdin(StdinMode::Null);
        let stdout = match self.runner.run(&invocation).await {
            Ok(output) => output.stdout,
            Err(err) => {
                evidence.execution("failed to list containers", &err);
                err.captured_stdout().to_string()
            }
        };

        if stdout.is_empty() {
            evidence.evidence("no containers found");
        }
    }

    async fn check_log(&self, evidence: &EvidenceAggregator) {
        let containerd = &self.config.containerd;
        let invocation = CommandInvocation::new(
            "tail",
            [
                "-n".to_string(),
                containerd.tail_lines.to_string(),
                containerd.log_path.clone(),
            ],
        )
        .with_stdin(StdinMode::Null);

        let mut error_lines = Vec::new();
        let scanned = self
            .runner
            .scan_lines(&invocation, &mut |line: &str| {
                if line.to_lowercase().contains("error") {
                    error_lines.push(line.to_string());
                }
            })
            .await;

        if let Err(err) = scanned {
            evidence.execution("failed to read containerd log", &err);
        }

        debug!(matched = error_lines.len(), log = %containerd.log_path, "Scanned containerd log");
        if !error_lines.is_empty() {
            warn!(count = error_lines.len(), "containerd log contains errors");
            evidence.evidence(format!(
                "containerd logs contain errors.\n{}",
                error_lines.join("\n")
            ));
        }
    }
}

#[async_trait]
impl DiagnosticCheck for ContainerdHealthCheck {
    fn name(&self) -> &str {
        CONTAINERD_HEALTH
    }

    async fn run(&self, _ctx: &RunContext) -> CheckOutcome {
        let evidence = EvidenceAggregator::new();
        self.check_containers(&evidence).await;
        self.check_log(&evidence).await;
        evidence.finish()
    }
}
