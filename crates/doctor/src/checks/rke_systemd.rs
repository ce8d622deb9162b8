//! RKE2 systemd service health.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{DiagnosticCheck, RunContext};
use crate::config::DoctorConfig;
use crate::error::ExecError;
use crate::outcome::{Cause, CheckOutcome};
use crate::process::{CommandInvocation, ProcessRunner, StdinMode};

pub const RKE2_SYSTEMD_HEALTH: &str = "rke2_systemd_health";

pub const NOT_RANCHER: &str = "this is not a rancher environment";
pub const UNKNOWN_NODE_TYPE: &str = "could not determine rke2 node type";

/// Checks that the node's RKE2 unit (server or agent) is running.
///
/// Only the literal `inactive` state is treated as a failure. `failed` and
/// `activating` currently pass.
pub struct RkeSystemdHealthCheck {
    runner: Arc<dyn ProcessRunner>,
    config: Arc<DoctorConfig>,
}

impl RkeSystemdHealthCheck {
    pub fn new(runner: Arc<dyn ProcessRunner>, config: Arc<DoctorConfig>) -> Self {
        Self { runner, config }
    }

    async fn query(&self, invocation: CommandInvocation) -> Result<String, ExecError> {
        self.runner
            .run(&invocation.with_stdin(StdinMode::Null))
            .await
            .map(|output| output.stdout)
    }
}

#[async_trait]
impl DiagnosticCheck for RkeSystemdHealthCheck {
    fn name(&self) -> &str {
        RKE2_SYSTEMD_HEALTH
    }

    async fn run(&self, _ctx: &RunContext) -> CheckOutcome {
        let rke2 = &self.config.rke2;
        if !self.runner.program_exists(&rke2.marker_binary) {
            return CheckOutcome::failed(Cause::precondition(NOT_RANCHER));
        }

        let units = match self
            .query(CommandInvocation::new(
                "systemctl",
                ["list-units", "--type=service"],
            ))
            .await
        {
            Ok(units) => units,
            Err(e) => {
                return CheckOutcome::failed(Cause::execution("failed to list systemd services", &e))
            }
        };

        let unit = if units.contains(&rke2.server_unit) {
            &rke2.server_unit
        } else if units.contains(&rke2.agent_unit) {
            &rke2.agent_unit
        } else {
            return CheckOutcome::failed(Cause::precondition(UNKNOWN_NODE_TYPE));
        };
        debug!(unit = %unit, "Resolved rke2 node type");

        // `is-active` exits non-zero for a stopped unit but still prints the state.
        let state = match self
            .query(CommandInvocation::new("systemctl", ["is-active", unit.as_str()]))
            .await
        {
            Ok(state) => state,
            Err(e) if !e.captured_stdout().is_empty() => e.captured_stdout().to_string(),
            Err(e) => {
                return CheckOutcome::failed(Cause::execution(
                    "failed to check rke2 service status",
                    &e,
                ))
            }
        };

        if !state.contains("inactive") {
            return CheckOutcome::Healthy;
        }

        info!(unit = %unit, "rke2 service is inactive, collecting journal");
        let journal = CommandInvocation::new(
            "journalctl",
            [
                "-u".to_string(),
                unit.clone(),
                "--no-pager".to_string(),
                "-n".to_string(),
                rke2.journal_lines.to_string(),
            ],
        );
        match self.query(journal).await {
            Ok(logs) => CheckOutcome::failed(Cause::evidence(format!(
                "rke2 service is not active.\n{logs}"
            ))),
            Err(e) => CheckOutcome::failed(Cause::execution("failed to get rke2 journal logs", &e)),
        }
    }
}
