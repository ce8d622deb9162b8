//! Doctor configuration.
//!
//! Defaults match a stock RKE2 node running kube-prometheus-stack. Any field
//! can be overridden from a YAML file, and `PROMETHEUS_URL` overrides the
//! Prometheus endpoint discovery entirely.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable that pins the Prometheus endpoint.
pub const PROMETHEUS_URL_ENV: &str = "PROMETHEUS_URL";

/// Settings shared by all checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoctorConfig {
    pub etcd: EtcdConfig,
    pub containerd: ContainerdConfig,
    pub rke2: Rke2Config,
    pub prometheus: PrometheusConfig,
    /// Page size for cluster list calls.
    pub list_page_size: u32,
}

impl Default for DoctorConfig {
    fn default() -> Self {
        Self {
            etcd: EtcdConfig::default(),
            containerd: ContainerdConfig::default(),
            rke2: Rke2Config::default(),
            prometheus: PrometheusConfig::default(),
            list_page_size: 100,
        }
    }
}

/// Where etcd runs and how etcdctl reaches it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtcdConfig {
    pub namespace: String,
    pub label_key: String,
    pub label_value: String,
    pub endpoints: String,
    pub cacert: String,
    pub cert: String,
    pub key: String,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            namespace: "kube-system".to_string(),
            label_key: "component".to_string(),
            label_value: "etcd".to_string(),
            endpoints: "https://127.0.0.1:2379".to_string(),
            cacert: "/var/lib/rancher/rke2/server/tls/etcd/server-ca.crt".to_string(),
            cert: "/var/lib/rancher/rke2/server/tls/etcd/server-client.crt".to_string(),
            key: "/var/lib/rancher/rke2/server/tls/etcd/server-client.key".to_string(),
        }
    }
}

impl EtcdConfig {
    /// `etcdctl` prefixed with the mTLS environment, ready for `sh -c`.
    #[must_use]
    pub fn etcdctl(&self, subcommand: &str) -> String {
        format!(
            "ETCDCTL_ENDPOINTS='{}' ETCDCTL_CACERT='{}' ETCDCTL_CERT='{}' ETCDCTL_KEY='{}' ETCDCTL_API=3 etcdctl {}",
            self.endpoints, self.cacert, self.cert, self.key, subcommand
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerdConfig {
    pub log_path: String,
    pub tail_lines: u32,
}

impl Default for ContainerdConfig {
    fn default() -> Self {
        Self {
            log_path: "/var/lib/rancher/rke2/agent/containerd/containerd.log".to_string(),
            tail_lines: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rke2Config {
    /// Binary whose presence on `PATH` marks an RKE2 host.
    pub marker_binary: String,
    pub server_unit: String,
    pub agent_unit: String,
    pub journal_lines: u32,
}

impl Default for Rke2Config {
    fn default() -> Self {
        Self {
            marker_binary: "rke2".to_string(),
            server_unit: "rke2-server.service".to_string(),
            agent_unit: "rke2-agent.service".to_string(),
            journal_lines: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrometheusConfig {
    /// Skip discovery and query this endpoint.
    pub url: Option<String>,
    pub namespace: String,
    /// Ingress host prefix that identifies Prometheus.
    pub host_prefix: String,
    pub pod: String,
    pub local_port: u16,
    /// Always-firing alerts that are never evidence of a problem.
    pub sentinel_alerts: Vec<String>,
    pub request_timeout_secs: u64,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            url: None,
            namespace: "monitoring".to_string(),
            host_prefix: "prometheus".to_string(),
            pod: "prometheus-prometheus-monitoring-kube-prometheus-0".to_string(),
            local_port: 9090,
            sentinel_alerts: vec!["Watchdog".to_string(), "InfoInhibitor".to_string()],
            request_timeout_secs: 30,
        }
    }
}

impl PrometheusConfig {
    #[must_use]
    pub fn local_url(&self) -> String {
        format!("http://localhost:{}", self.local_port)
    }
}

impl DoctorConfig {
    /// Read a YAML config file. Missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Defaults, then the optional file, then `PROMETHEUS_URL`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(config.with_prometheus_url(std::env::var(PROMETHEUS_URL_ENV).ok()))
    }

    #[must_use]
    pub fn with_prometheus_url(mut self, url: Option<String>) -> Self {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            self.prometheus.url = Some(url);
        }
        self
    }
}
