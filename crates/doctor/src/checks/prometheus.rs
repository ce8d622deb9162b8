//! Firing Prometheus alerts.
//!
//! The endpoint is found in one of three ways:
//! - a configured URL is used as-is;
//! - on hosts without the rke2 binary, the first `monitoring` ingress whose
//!   host starts with `prometheus` is queried over HTTPS;
//! - on rke2 hosts, the Prometheus pod is port-forwarded to localhost.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use super::{DiagnosticCheck, RunContext};
use crate::cluster::{ClusterClient, ClusterSelector};
use crate::config::{DoctorConfig, PrometheusConfig};
use crate::outcome::{Cause, CauseKind, CheckOutcome, EvidenceAggregator};
use crate::process::{CommandInvocation, ProcessGuard, ProcessRunner, StdinMode};

pub const PROMETHEUS_ALARM: &str = "prometheus_alarm";

const RULES_PATH: &str = "/api/v1/rules";

/// Body of `GET /api/v1/rules`.
#[derive(Debug, Clone, Deserialize)]
pub struct RulesResponse {
    pub status: String,
    #[serde(default)]
    pub data: RulesData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RulesData {
    #[serde(default)]
    pub groups: Vec<RuleGroup>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleGroup {
    #[serde(default)]
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Rule {
    pub name: String,
    #[serde(default)]
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Alert {
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub state: String,
}

impl Alert {
    fn is_firing(&self) -> bool {
        self.state == "firing"
    }

    fn name(&self) -> Option<&str> {
        self.labels.get("alertname").map(String::as_str)
    }
}

/// Alerts of one rule that survived filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiringRule {
    pub rule: String,
    pub descriptions: Vec<String>,
}

/// Firing, non-sentinel alerts grouped by rule name in first-seen order.
#[must_use]
pub fn firing_rules(response: &RulesResponse, sentinels: &[String]) -> Vec<FiringRule> {
    let mut firing: Vec<FiringRule> = Vec::new();

    let alerts = response
        .data
        .groups
        .iter()
        .flat_map(|group| group.rules.iter())
        .flat_map(|rule| rule.alerts.iter().map(move |alert| (rule, alert)));

    for (rule, alert) in alerts {
        if !alert.is_firing() || alert.name().is_some_and(|n| sentinels.iter().any(|s| s == n)) {
            continue;
        }
        let description = alert
            .annotations
            .get("description")
            .cloned()
            .unwrap_or_default();

        match firing.iter_mut().find(|f| f.rule == rule.name) {
            Some(existing) => existing.descriptions.push(description),
            None => firing.push(FiringRule {
                rule: rule.name.clone(),
                descriptions: vec![description],
            }),
        }
    }
    firing
}

/// A resolved endpoint. Holds the port-forward alive while in scope.
struct Endpoint {
    url: String,
    _forward: ProcessGuard,
}

impl Endpoint {
    fn direct(url: String) -> Self {
        Self {
            url,
            _forward: ProcessGuard::detached(),
        }
    }
}

/// Reports every firing alert except the always-on sentinels.
pub struct PrometheusAlarmCheck {
    cluster: Arc<dyn ClusterClient>,
    runner: Arc<dyn ProcessRunner>,
    http: reqwest::Client,
    config: Arc<DoctorConfig>,
}

impl PrometheusAlarmCheck {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        runner: Arc<dyn ProcessRunner>,
        http: reqwest::Client,
        config: Arc<DoctorConfig>,
    ) -> Self {
        Self {
            cluster,
            runner,
            http,
            config,
        }
    }

    fn prometheus(&self) -> &PrometheusConfig {
        &self.config.prometheus
    }

    async fn resolve_endpoint(&self) -> Result<Endpoint, Cause> {
        let prometheus = self.prometheus();
        if let Some(url) = &prometheus.url {
            return Ok(Endpoint::direct(url.trim_end_matches('/').to_string()));
        }

        if self.runner.program_exists(&self.config.rke2.marker_binary) {
            return self.port_forward().await;
        }

        let selector = ClusterSelector::namespace(&prometheus.namespace);
        let ingresses = self
            .cluster
            .list_ingresses(&selector)
            .await
            .map_err(|e| Cause::execution("failed to list ingresses", &e))?;

        ingresses
            .iter()
            .flat_map(|ingress| ingress.hosts.iter())
            .find(|host| host.starts_with(&prometheus.host_prefix))
            .map(|host| Endpoint::direct(format!("https://{host}")))
            .ok_or_else(|| Cause::new(CauseKind::Execution, "failed to find prometheus endpoint"))
    }

    async fn port_forward(&self) -> Result<Endpoint, Cause> {
        let prometheus = self.prometheus();
        let invocation = CommandInvocation::new(
            "kubectl",
            [
                "port-forward".to_string(),
                prometheus.pod.clone(),
                format!("{0}:{0}", prometheus.local_port),
                "-n".to_string(),
                prometheus.namespace.clone(),
            ],
        )
        .with_stdin(StdinMode::Null);

        let guard = self
            .runner
            .spawn(&invocation)
            .await
            .map_err(|e| Cause::execution("failed to port-forward to prometheus", &e))?;
        info!(pod = %prometheus.pod, "Port-forwarding to prometheus");

        Ok(Endpoint {
            url: prometheus.local_url(),
            _forward: guard,
        })
    }

    async fn fetch_rules(&self, base_url: &str) -> Result<RulesResponse, reqwest::Error> {
        let url = format!("{base_url}{RULES_PATH}");
        debug!(url = %url, "Fetching alerting rules");

        self.http
            .get(&url)
            .query(&[("type", "alert")])
            .timeout(Duration::from_secs(self.prometheus().request_timeout_secs))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

#[async_trait]
impl DiagnosticCheck for PrometheusAlarmCheck {
    fn name(&self) -> &str {
        PROMETHEUS_ALARM
    }

    async fn run(&self, _ctx: &RunContext) -> CheckOutcome {
        let endpoint = match self.resolve_endpoint().await {
            Ok(endpoint) => endpoint,
            Err(cause) => return CheckOutcome::failed(cause),
        };

        let response = match self.fetch_rules(&endpoint.url).await {
            Ok(response) => response,
            Err(e) => return CheckOutcome::failed(Cause::execution("failed to fetch alerts", &e)),
        };
        if response.status != "success" {
            return CheckOutcome::failed(Cause::new(
                CauseKind::Execution,
                format!("prometheus returned status {}", response.status),
            ));
        }

        let evidence = EvidenceAggregator::new();
        for firing in firing_rules(&response, &self.prometheus().sentinel_alerts) {
            evidence.evidence(format!(
                "{}:\n\t{}",
                firing.rule,
                firing.descriptions.join("\n\t")
            ));
        }
        evidence.finish()
    }
}
