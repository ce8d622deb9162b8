//! etcd member health and alarm checks.
//!
//! Both checks enumerate the etcd static pods and run `etcdctl` inside each
//! one through `kubectl exec`, using the node-local etcd client certificates.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{DiagnosticCheck, RunContext};
use crate::cluster::{ClusterClient, ClusterSelector, PodSummary};
use crate::config::{DoctorConfig, EtcdConfig};
use crate::error::ExecError;
use crate::outcome::{Cause, CheckOutcome, EvidenceAggregator};
use crate::process::{CommandInvocation, ProcessRunner};

pub const ETCD_HEALTH: &str = "etcd_health";
pub const ETCD_ALARM: &str = "etcd_alarm";

/// Marker printed by `etcdctl endpoint health` for a healthy member.
const HEALTHY_MARKER: &str = "is healthy";

fn etcd_selector(config: &EtcdConfig) -> ClusterSelector {
    ClusterSelector::namespace(&config.namespace)
        .with_label(&config.label_key, &config.label_value)
}

/// `kubectl -n <ns> exec <pod> -- sh -c "<env> etcdctl <subcommand>"`
fn etcdctl_invocation(config: &EtcdConfig, pod: &str, subcommand: &str) -> CommandInvocation {
    CommandInvocation::new(
        "kubectl",
        [
            "-n".to_string(),
            config.namespace.clone(),
            "exec".to_string(),
            pod.to_string(),
            "--".to_string(),
            "sh".to_string(),
            "-c".to_string(),
            config.etcdctl(subcommand),
        ],
    )
}

/// Run `etcdctl <subcommand>` in `pod`, returning whatever stdout was
/// captured alongside the execution error, if any.
async fn exec_etcdctl(
    runner: &dyn ProcessRunner,
    config: &EtcdConfig,
    pod: &PodSummary,
    subcommand: &str,
) -> (String, Option<ExecError>) {
    let invocation = etcdctl_invocation(config, &pod.name, subcommand);
    match runner.run(&invocation).await {
        Ok(output) => (output.stdout, None),
        Err(err) => (err.captured_stdout().to_string(), Some(err)),
    }
}

/// Checks that every etcd member answers `endpoint health` as healthy.
pub struct EtcdHealthCheck {
    cluster: Arc<dyn ClusterClient>,
    runner: Arc<dyn ProcessRunner>,
    config: Arc<DoctorConfig>,
}

impl EtcdHealthCheck {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        runner: Arc<dyn ProcessRunner>,
        config: Arc<DoctorConfig>,
    ) -> Self {
        Self {
            cluster,
            runner,
            config,
        }
    }
}

#[async_trait]
impl DiagnosticCheck for EtcdHealthCheck {
    fn name(&self) -> &str {
        ETCD_HEALTH
    }

    async fn run(&self, _ctx: &RunContext) -> CheckOutcome {
        let etcd = &self.config.etcd;
        let pods = match self.cluster.list_pods(&etcd_selector(etcd)).await {
            Ok(pods) => pods,
            Err(e) => return CheckOutcome::failed(Cause::execution("failed to list etcd pods", &e)),
        };
        // No pods means nothing to report, not a failure.
        debug!(count = pods.len(), "Checking etcd member health");

        let evidence = EvidenceAggregator::new();
        for pod in &pods {
            let (stdout, err) =
                exec_etcdctl(self.runner.as_ref(), etcd, pod, "endpoint health").await;
            if let Some(err) = err {
                evidence.execution(
                    format!("failed to execute etcd health command on {}", pod.name),
                    &err,
                );
            }
            if !stdout.contains(HEALTHY_MARKER) {
                warn!(pod = %pod.name, "etcd member is not healthy");
                evidence.evidence(format!("etcd pod {} is not healthy", pod.name));
            }
        }
        evidence.finish()
    }
}

/// Reports any alarm raised on an etcd member (NOSPACE, CORRUPT, ...).
pub struct EtcdAlarmCheck {
    cluster: Arc<dyn ClusterClient>,
    runner: Arc<dyn ProcessRunner>,
    config: Arc<DoctorConfig>,
}

impl EtcdAlarmCheck {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        runner: Arc<dyn ProcessRunner>,
        config: Arc<DoctorConfig>,
    ) -> Self {
        Self {
            cluster,
            runner,
            config,
        }
    }
}

#[async_trait]
impl DiagnosticCheck for EtcdAlarmCheck {
    fn name(&self) -> &str {
        ETCD_ALARM
    }

    async fn run(&self, _ctx: &RunContext) -> CheckOutcome {
        let etcd = &self.config.etcd;
        let pods = match self.cluster.list_pods(&etcd_selector(etcd)).await {
            Ok(pods) => pods,
            Err(e) => return CheckOutcome::failed(Cause::execution("failed to list etcd pods", &e)),
        };

        let evidence = EvidenceAggregator::new();
        for pod in &pods {
            let (stdout, err) = exec_etcdctl(self.runner.as_ref(), etcd, pod, "alarm list").await;
            if let Some(err) = err {
                evidence.execution(
                    format!("failed to execute etcd alarm command on {}", pod.name),
                    &err,
                );
            }
            // `alarm list` prints nothing when the member has no alarms.
            if !stdout.is_empty() {
                warn!(pod = %pod.name, "etcd member has active alarms");
                evidence.evidence(format!("etcd pod {} has alarms. {}", pod.name, stdout));
            }
        }
        evidence.finish()
    }
}
