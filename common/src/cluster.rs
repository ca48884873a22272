use std::path::{Path, PathBuf};

use tracing::warn;

use crate::{
    cni::CniTarget,
    config::{ClusterSpec, CniKind, Runtime},
    error::{Error, Result},
    k8s,
};

pub const CREATE: [&str; 3] = [
    "Creating cluster",
    "Could not create cluster",
    "Cluster created",
];

pub const DELETE: [&str; 3] = [
    "Deleting cluster",
    "Could not delete cluster",
    "Cluster deleted",
];

pub const PROXY: [&str; 3] = [
    "Configuring registry proxy",
    "Could not configure registry proxy",
    "Registry proxy configured",
];

/// Settings shared by every cluster of a run.
#[derive(Debug, Clone)]
pub struct ClusterContext {
    pub out_dir: PathBuf,
    pub verbose: bool,
}

impl ClusterContext {
    pub fn new(out_dir: impl Into<PathBuf>, verbose: bool) -> Self {
        Self {
            out_dir: out_dir.into(),
            verbose,
        }
    }

    /// `<out-dir>/kubeconfigs/<name>.yaml`
    pub fn kubeconfig_path(&self, name: &str) -> PathBuf {
        self.out_dir.join("kubeconfigs").join(format!("{name}.yaml"))
    }
}

/// Node label value for the i-th node; the control plane is 0.
pub fn tier_label(i: u32) -> String {
    format!("tier=worker-{i}")
}

/// Create the directory a kubeconfig will be written to.
pub async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

pub fn unsupported_cni(spec: &ClusterSpec) -> Error {
    Error::UnsupportedCni {
        cluster: spec.name.clone(),
        runtime: spec.runtime,
        cni: spec.cni,
    }
}

/// Fail unless `spec.cni` is one the runtime can run.
pub fn check_cni(spec: &ClusterSpec, supported: &[CniKind]) -> Result<()> {
    if supported.contains(&spec.cni) {
        return Ok(());
    }
    Err(unsupported_cni(spec))
}

#[async_trait::async_trait]
pub trait Cluster: Send + Sync {
    fn spec(&self) -> &ClusterSpec;

    fn runtime(&self) -> Runtime;

    /// Whether services of type LoadBalancer get an externally reachable address.
    fn supports_load_balancer(&self) -> bool;

    fn kubeconfig_location(&self) -> &Path;

    /// Runtime specific cluster definition, fed to the provisioning CLI over stdin.
    fn render_config(&self) -> Result<String>;

    async fn exists(&self) -> Result<bool>;

    /// Create the cluster and write its kubeconfig.
    async fn init_cluster(&self) -> Result<()>;

    async fn install_cni(&self) -> Result<()>;

    /// Delete the cluster if it exists. The kubeconfig file is left in place.
    async fn cleanup(&self) -> Result<()>;

    fn name(&self) -> &str {
        &self.spec().name
    }

    /// Point node image pulls at a pull-through cache. Must be called before `init_cluster`.
    fn set_proxy(&mut self, address: &str) {
        warn!(
            cluster = self.name(),
            runtime = %self.runtime(),
            "registry proxy is not supported by this runtime, ignoring {address}"
        );
    }

    fn cni_target(&self) -> CniTarget {
        CniTarget {
            kubeconfig: self.kubeconfig_location().to_owned(),
            cidr: self.spec().cluster_cidr.clone(),
        }
    }

    async fn api_server_url(&self) -> Result<String> {
        let client = k8s::client_for(self.kubeconfig_location()).await?;
        k8s::control_plane_address(&client, self.name()).await
    }
}
