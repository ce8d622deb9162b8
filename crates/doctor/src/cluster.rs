//! Cluster API access.
//!
//! Checks only need two read-only queries, so the Kubernetes client is hidden
//! behind [`ClusterClient`] and results are reduced to the fields the checks
//! look at.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, ListParams, ObjectList};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::ClusterError;

/// Kubeconfig written by RKE2 on server nodes.
pub const RKE2_KUBECONFIG: &str = "/etc/rancher/rke2/rke2.yaml";

/// Namespace plus label equality constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSelector {
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
}

impl ClusterSelector {
    /// Everything in `namespace`.
    pub fn namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            labels: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// `k1=v1,k2=v2`, or `None` when no labels are set.
    #[must_use]
    pub fn label_selector(&self) -> Option<String> {
        if self.labels.is_empty() {
            return None;
        }
        Some(
            self.labels
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

/// The parts of a pod the checks use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSummary {
    pub name: String,
}

/// The parts of an ingress the checks use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressSummary {
    pub name: String,
    /// Rule hosts in declaration order. Rules without a host are skipped.
    pub hosts: Vec<String>,
}

/// Read-only view of the cluster API.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn list_pods(&self, selector: &ClusterSelector) -> Result<Vec<PodSummary>, ClusterError>;

    async fn list_ingresses(
        &self,
        selector: &ClusterSelector,
    ) -> Result<Vec<IngressSummary>, ClusterError>;
}

/// [`ClusterClient`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    page_size: u32,
}

impl KubeCluster {
    #[must_use]
    pub fn new(client: Client, page_size: u32) -> Self {
        Self { client, page_size }
    }

    /// Build a client from the kubeconfig at `path`.
    pub async fn from_kubeconfig(path: &Path, page_size: u32) -> Result<Self, ClusterError> {
        let kubeconfig = Kubeconfig::read_from(path).map_err(|e| ClusterError::Kubeconfig {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| ClusterError::Kubeconfig {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let client = Client::try_from(config)?;
        info!(kubeconfig = %path.display(), "Connected to cluster");
        Ok(Self::new(client, page_size))
    }

    /// Follow `continue` tokens until the list is exhausted.
    async fn list_all<K>(&self, selector: &ClusterSelector) -> Result<Vec<K>, ClusterError>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + std::fmt::Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &selector.namespace);
        let mut params = ListParams::default().limit(self.page_size);
        if let Some(labels) = selector.label_selector() {
            params = params.labels(&labels);
        }

        let mut items = Vec::new();
        loop {
            let page: ObjectList<K> = api.list(&params).await?;
            items.extend(page.items);
            match page.metadata.continue_.filter(|token| !token.is_empty()) {
                Some(token) => params = params.continue_token(&token),
                None => break,
            }
        }

        debug!(
            namespace = %selector.namespace,
            selector = ?selector.label_selector(),
            count = items.len(),
            "Listed resources"
        );
        Ok(items)
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn list_pods(&self, selector: &ClusterSelector) -> Result<Vec<PodSummary>, ClusterError> {
        let pods: Vec<Pod> = self.list_all(selector).await?;
        Ok(pods
            .into_iter()
            .filter_map(|pod| pod.metadata.name)
            .map(|name| PodSummary { name })
            .collect())
    }

    async fn list_ingresses(
        &self,
        selector: &ClusterSelector,
    ) -> Result<Vec<IngressSummary>, ClusterError> {
        let ingresses: Vec<Ingress> = self.list_all(selector).await?;
        Ok(ingresses.into_iter().map(summarize_ingress).collect())
    }
}

fn summarize_ingress(ingress: Ingress) -> IngressSummary {
    let hosts = ingress
        .spec
        .and_then(|spec| spec.rules)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|rule| rule.host)
        .collect();

    IngressSummary {
        name: ingress.metadata.name.unwrap_or_else(|| "unknown".to_string()),
        hosts,
    }
}

/// Pick the kubeconfig to use.
///
/// An explicit path wins. Otherwise the RKE2 server kubeconfig is used when it
/// exists, then `$KUBECONFIG`, then `~/.kube/config`.
#[must_use]
pub fn resolve_kubeconfig_path(
    explicit: Option<&Path>,
    rke2_kubeconfig_exists: bool,
    env_kubeconfig: Option<&str>,
    home: Option<&Path>,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if rke2_kubeconfig_exists {
        return Some(PathBuf::from(RKE2_KUBECONFIG));
    }
    if let Some(env) = env_kubeconfig.filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(env));
    }
    home.map(|h| h.join(".kube").join("config"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::networking::v1::{IngressRule, IngressSpec};
    use kube::api::ObjectMeta;

    #[test]
    fn selector_renders_labels_sorted() {
        let selector = ClusterSelector::namespace("kube-system")
            .with_label("tier", "control-plane")
            .with_label("component", "etcd");
        assert_eq!(
            selector.label_selector().as_deref(),
            Some("component=etcd,tier=control-plane")
        );
    }

    #[test]
    fn selector_without_labels_has_no_selector() {
        assert!(ClusterSelector::namespace("monitoring")
            .label_selector()
            .is_none());
    }

    #[test]
    fn ingress_summary_skips_hostless_rules() {
        let ingress = Ingress {
            metadata: ObjectMeta {
                name: Some("kube-prometheus".to_string()),
                ..Default::default()
            },
            spec: Some(IngressSpec {
                rules: Some(vec![
                    IngressRule {
                        host: None,
                        http: None,
                    },
                    IngressRule {
                        host: Some("prometheus.example.com".to_string()),
                        http: None,
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let summary = summarize_ingress(ingress);
        assert_eq!(summary.name, "kube-prometheus");
        assert_eq!(summary.hosts, vec!["prometheus.example.com".to_string()]);
    }

    #[test]
    fn explicit_kubeconfig_wins() {
        let path = resolve_kubeconfig_path(
            Some(Path::new("/tmp/kc")),
            true,
            Some("/env/kc"),
            Some(Path::new("/home/op")),
        );
        assert_eq!(path, Some(PathBuf::from("/tmp/kc")));
    }

    #[test]
    fn rke2_kubeconfig_beats_env() {
        let path = resolve_kubeconfig_path(None, true, Some("/env/kc"), Some(Path::new("/home/op")));
        assert_eq!(path, Some(PathBuf::from(RKE2_KUBECONFIG)));
    }

    #[test]
    fn env_then_home() {
        let from_env =
            resolve_kubeconfig_path(None, false, Some("/env/kc"), Some(Path::new("/home/op")));
        assert_eq!(from_env, Some(PathBuf::from("/env/kc")));

        let from_home = resolve_kubeconfig_path(None, false, Some(""), Some(Path::new("/home/op")));
        assert_eq!(from_home, Some(PathBuf::from("/home/op/.kube/config")));

        assert_eq!(resolve_kubeconfig_path(None, false, None, None), None);
    }
}
