//! Doctor command - concurrent node diagnostics.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use dialoguer::{theme::ColorfulTheme, MultiSelect};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::checks::{CheckDeps, CheckKind, DiagnosticCheck, RunContext};
use crate::cluster::{resolve_kubeconfig_path, KubeCluster, RKE2_KUBECONFIG};
use crate::config::DoctorConfig;
use crate::pool::{Pool, ProgressReporter, SilentReporter};
use crate::process::SystemRunner;
use crate::report::EXIT_HEALTHY;
use crate::ui::{self, ConsoleReporter};

/// Diagnose problems on this node and its cluster.
#[derive(Args, Debug, Default)]
pub struct DoctorCommand {
    /// Check the health of etcd.
    #[arg(long)]
    pub etcd_health: bool,

    /// Check the alarm of etcd.
    #[arg(long)]
    pub etcd_alarm: bool,

    /// Check the performance of etcd.
    #[arg(long)]
    pub etcd_perf: bool,

    /// Check the health of rke systemd.
    #[arg(long)]
    pub rke_systemd_health: bool,

    /// Check the alarm of prometheus.
    #[arg(long)]
    pub prometheus_alarm: bool,

    /// Check the health of containerd.
    #[arg(long)]
    pub containerd_health: bool,

    /// Path to a YAML config file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Path to kubeconfig file.
    #[arg(long, value_name = "FILE")]
    pub kubeconfig: Option<PathBuf>,

    /// Output report as JSON.
    #[arg(long, default_value = "false")]
    pub json: bool,
}

impl DoctorCommand {
    /// Checks chosen by flags, in catalog order.
    #[must_use]
    pub fn flagged_checks(&self) -> Vec<CheckKind> {
        CheckKind::ALL
            .into_iter()
            .filter(|kind| match kind {
                CheckKind::EtcdHealth => self.etcd_health,
                CheckKind::EtcdAlarm => self.etcd_alarm,
                CheckKind::EtcdPerf => self.etcd_perf,
                CheckKind::PrometheusAlarm => self.prometheus_alarm,
                CheckKind::RkeSystemdHealth => self.rke_systemd_health,
                CheckKind::ContainerdHealth => self.containerd_health,
            })
            .collect()
    }

    /// Run the doctor command and return the process exit code.
    ///
    /// # Errors
    ///
    /// Returns an error if selection, config loading or cluster bootstrap fails.
    pub async fn run(&self) -> Result<u8> {
        let mut selected = self.flagged_checks();
        if selected.is_empty() {
            match prompt_for_checks()? {
                Some(kinds) => selected = kinds,
                None => {
                    ui::print_warning("No checks selected.");
                    return Ok(EXIT_HEALTHY);
                }
            }
        }

        let config = Arc::new(
            DoctorConfig::load(self.config.as_deref()).context("Failed to load doctor config")?,
        );

        let kubeconfig = resolve_kubeconfig_path(
            self.kubeconfig.as_deref(),
            std::path::Path::new(RKE2_KUBECONFIG).exists(),
            std::env::var("KUBECONFIG").ok().as_deref(),
            dirs::home_dir().as_deref(),
        )
        .context("Could not determine kubeconfig path")?;

        let cluster = KubeCluster::from_kubeconfig(&kubeconfig, config.list_page_size)
            .await
            .context("Failed to create Kubernetes client")?;

        let http = reqwest::Client::builder()
            .build()
            .context("Failed to create HTTP client")?;

        let deps = CheckDeps {
            runner: Arc::new(SystemRunner::new()),
            cluster: Arc::new(cluster),
            http,
            config,
        };

        let (checks, skipped) = build_checks(&selected, &deps);
        for kind in skipped {
            warn!(check = %kind, "Check has no detection algorithm, skipping");
            ui::print_warning(&format!("{} is not implemented yet, skipping", kind.label()));
        }
        let reporter: Arc<dyn ProgressReporter> = if self.json {
            Arc::new(SilentReporter)
        } else {
            ui::print_section("Running diagnostics");
            Arc::new(ConsoleReporter)
        };

        let pool = Pool::new(checks, reporter)?;
        info!(checks = ?pool.check_names(), "Starting doctor run");
        let report = pool.run(&RunContext::new(CancellationToken::new())).await;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            report.print_summary();
        }

        Ok(report.exit_code())
    }
}

/// Build the runnable checks. Catalog entries without an algorithm are
/// returned separately.
pub fn build_checks(
    selected: &[CheckKind],
    deps: &CheckDeps,
) -> (Vec<Arc<dyn DiagnosticCheck>>, Vec<CheckKind>) {
    let mut checks = Vec::with_capacity(selected.len());
    let mut skipped = Vec::new();
    for &kind in selected {
        match kind.build(deps) {
            Some(check) => checks.push(check),
            None => skipped.push(kind),
        }
    }
    (checks, skipped)
}

/// Ask which checks to run. `None` when the user aborts.
fn prompt_for_checks() -> Result<Option<Vec<CheckKind>>> {
    let labels: Vec<&str> = CheckKind::ALL.iter().map(|kind| kind.label()).collect();

    let picked = MultiSelect::with_theme(&ColorfulTheme::default())
        .with_prompt("Which one do you want to check? (space to toggle, enter to run, q to quit)")
        .items(&labels)
        .interact_opt()
        .context("Failed to read check selection")?;

    Ok(picked.map(|indices| indices.into_iter().map(|i| CheckKind::ALL[i]).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCluster, FakeRunner};

    #[test]
    fn flags_select_checks_in_catalog_order() {
        let cmd = DoctorCommand {
            containerd_health: true,
            etcd_health: true,
            prometheus_alarm: true,
            ..DoctorCommand::default()
        };
        assert_eq!(
            cmd.flagged_checks(),
            vec![
                CheckKind::EtcdHealth,
                CheckKind::PrometheusAlarm,
                CheckKind::ContainerdHealth
            ]
        );
    }

    #[test]
    fn no_flags_selects_nothing() {
        assert!(DoctorCommand::default().flagged_checks().is_empty());
    }

    #[test]
    fn etcd_perf_is_dropped_from_the_run() {
        let deps = CheckDeps {
            runner: Arc::new(FakeRunner::new()),
            cluster: Arc::new(FakeCluster::default()),
            http: reqwest::Client::new(),
            config: Arc::new(DoctorConfig::default()),
        };
        let (checks, skipped) = build_checks(&[CheckKind::EtcdHealth, CheckKind::EtcdPerf], &deps);
        let names: Vec<_> = checks.iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["etcd_health"]);
        assert_eq!(skipped, vec![CheckKind::EtcdPerf]);
    }
}
