//! Diagnostic checks.
//!
//! Each check owns one detection algorithm. Checks are built once per run with
//! their collaborators injected through [`CheckDeps`] and never share mutable
//! state with each other.

pub mod containerd;
pub mod etcd;
pub mod prometheus;
pub mod rke_systemd;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::cluster::ClusterClient;
use crate::config::DoctorConfig;
use crate::outcome::CheckOutcome;
use crate::process::ProcessRunner;

pub use containerd::ContainerdHealthCheck;
pub use etcd::{EtcdAlarmCheck, EtcdHealthCheck};
pub use prometheus::PrometheusAlarmCheck;
pub use rke_systemd::RkeSystemdHealthCheck;

/// Context shared by every check in a run.
///
/// The cancellation token is handed to each check but none of the current
/// checks consult it: a cancelled run still waits for in-flight subprocess
/// and HTTP calls.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    cancel: CancellationToken,
}

impl RunContext {
    #[must_use]
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// One named health probe.
#[async_trait]
pub trait DiagnosticCheck: Send + Sync {
    /// Stable name, unique within a run.
    fn name(&self) -> &str;

    /// Gather evidence and fold it into an outcome.
    async fn run(&self, ctx: &RunContext) -> CheckOutcome;
}

/// Collaborators injected into every check.
#[derive(Clone)]
pub struct CheckDeps {
    pub runner: Arc<dyn ProcessRunner>,
    pub cluster: Arc<dyn ClusterClient>,
    pub http: reqwest::Client,
    pub config: Arc<DoctorConfig>,
}

/// The catalog of selectable checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CheckKind {
    EtcdHealth,
    EtcdAlarm,
    EtcdPerf,
    PrometheusAlarm,
    RkeSystemdHealth,
    ContainerdHealth,
}

impl CheckKind {
    /// Catalog in picker order.
    pub const ALL: [Self; 6] = [
        Self::EtcdHealth,
        Self::EtcdAlarm,
        Self::EtcdPerf,
        Self::PrometheusAlarm,
        Self::RkeSystemdHealth,
        Self::ContainerdHealth,
    ];

    /// Name the check reports results under.
    #[must_use]
    pub fn check_name(self) -> &'static str {
        match self {
            Self::EtcdHealth => etcd::ETCD_HEALTH,
            Self::EtcdAlarm => etcd::ETCD_ALARM,
            Self::EtcdPerf => "etcd_perf",
            Self::PrometheusAlarm => prometheus::PROMETHEUS_ALARM,
            Self::RkeSystemdHealth => rke_systemd::RKE2_SYSTEMD_HEALTH,
            Self::ContainerdHealth => containerd::CONTAINERD_HEALTH,
        }
    }

    /// Label shown in the interactive picker.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::EtcdHealth => "Etcd Health",
            Self::EtcdAlarm => "Etcd Alarm",
            Self::EtcdPerf => "Etcd Perf",
            Self::PrometheusAlarm => "Prometheus Alerts",
            Self::RkeSystemdHealth => "RKE Systemd Health",
            Self::ContainerdHealth => "Containerd Health",
        }
    }

    /// Build the check, or `None` when it has no detection algorithm yet.
    #[must_use]
    pub fn build(self, deps: &CheckDeps) -> Option<Arc<dyn DiagnosticCheck>> {
        let check: Arc<dyn DiagnosticCheck> = match self {
            Self::EtcdHealth => Arc::new(EtcdHealthCheck::new(
                Arc::clone(&deps.cluster),
                Arc::clone(&deps.runner),
                Arc::clone(&deps.config),
            )),
            Self::EtcdAlarm => Arc::new(EtcdAlarmCheck::new(
                Arc::clone(&deps.cluster),
                Arc::clone(&deps.runner),
                Arc::clone(&deps.config),
            )),
            // Selectable, but there is no detection algorithm for it.
            Self::EtcdPerf => return None,
            Self::PrometheusAlarm => Arc::new(PrometheusAlarmCheck::new(
                Arc::clone(&deps.cluster),
                Arc::clone(&deps.runner),
                deps.http.clone(),
                Arc::clone(&deps.config),
            )),
            Self::RkeSystemdHealth => Arc::new(RkeSystemdHealthCheck::new(
                Arc::clone(&deps.runner),
                Arc::clone(&deps.config),
            )),
            Self::ContainerdHealth => Arc::new(ContainerdHealthCheck::new(
                Arc::clone(&deps.runner),
                Arc::clone(&deps.config),
            )),
        };
        Some(check)
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.check_name())
    }
}
