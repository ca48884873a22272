use std::{collections::HashSet, fmt, path::Path};

use k8s_openapi::api::core::v1::PodSpec;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::info;

use crate::error::{ConfigError, FieldError};

pub mod merge;
pub mod tools;
pub mod validate;

pub use tools::*;

pub const DEFAULT_CLUSTER_CIDR: &str = "10.200.0.0/16";
pub const DEFAULT_SERVICE_CIDR: &str = "10.71.0.0/16";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    K3d,
    Kind,
}

impl Runtime {
    pub const ALL: &'static [Runtime] = &[Runtime::K3d, Runtime::Kind];

    pub fn as_str(&self) -> &'static str {
        match self {
            Runtime::K3d => "k3d",
            Runtime::Kind => "kind",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|r| r.as_str() == name)
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CniKind {
    Calico,
    Cilium,
    Flannel,
    Kindnet,
}

impl CniKind {
    pub const ALL: &'static [CniKind] = &[
        CniKind::Calico,
        CniKind::Cilium,
        CniKind::Flannel,
        CniKind::Kindnet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CniKind::Calico => "calico",
            CniKind::Cilium => "cilium",
            CniKind::Flannel => "flannel",
            CniKind::Kindnet => "kindnet",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for CniKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values inherited by every cluster that does not set them itself.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct CommonConfig {
    pub runtime: Runtime,
    pub cni: CniKind,
    pub nodes: u32,
    pub cluster_cidr: String,
    pub service_cidr: String,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            runtime: Runtime::K3d,
            cni: CniKind::Calico,
            nodes: 1,
            cluster_cidr: DEFAULT_CLUSTER_CIDR.to_owned(),
            service_cidr: DEFAULT_SERVICE_CIDR.to_owned(),
        }
    }
}

/// A cluster entry after default inheritance: every field is concrete.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterSpec {
    pub name: String,
    pub runtime: Runtime,
    pub cni: CniKind,
    pub nodes: u32,
    pub cluster_cidr: String,
    pub service_cidr: String,
    #[serde(default)]
    pub namespaces: Vec<NamespaceSpec>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NamespaceSpec {
    pub name: String,
    #[serde(default)]
    pub deployments: Vec<DeploymentSpec>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DeploymentSpec {
    pub name: String,
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    pub pod_spec: PodSpec,
}

fn default_replicas() -> i32 {
    1
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RootConfig {
    #[serde(default)]
    pub default: CommonConfig,
    pub clusters: Vec<ClusterSpec>,
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl RootConfig {
    /// Rejects the first cluster whose name was already used by an earlier entry.
    pub fn check_unique_names(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for (index, cluster) in self.clusters.iter().enumerate() {
            if !seen.insert(cluster.name.as_str()) {
                return Err(ConfigError::DuplicateCluster {
                    name: cluster.name.clone(),
                    index,
                });
            }
        }
        Ok(())
    }

    pub fn cluster(&self, name: &str) -> Option<&ClusterSpec> {
        self.clusters.iter().find(|c| c.name == name)
    }
}

pub fn parse_config(file: impl AsRef<Path>) -> Result<RootConfig, ConfigError> {
    let path = file.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_owned(),
        source,
    })?;

    let config = parse_str(&raw)?;
    info!(
        clusters = config.clusters.len(),
        "config file {} parsed",
        path.display()
    );
    Ok(config)
}

pub fn parse_str(raw: &str) -> Result<RootConfig, ConfigError> {
    let doc: Value = serde_yaml::from_str(raw)?;
    validate_document(&doc)
}

/// Merge defaults, validate structure, bind to typed config and check cross-cluster invariants.
///
/// Either every stage succeeds and a fully populated `RootConfig` is returned, or nothing is.
pub fn validate_document(doc: &Value) -> Result<RootConfig, ConfigError> {
    if !doc.is_mapping() {
        return Err(ConfigError::NotAMapping);
    }

    let merged = merge::merge_defaults(doc);
    let errors = validate::validate(&merged);
    if !errors.is_empty() {
        return Err(ConfigError::Schema(errors));
    }

    let config: RootConfig = serde_yaml::from_value(merged)
        .map_err(|err| ConfigError::Schema(vec![FieldError::new("root", err.to_string())]))?;
    config.check_unique_names()?;
    Ok(config)
}
