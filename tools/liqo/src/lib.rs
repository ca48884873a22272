use std::path::{Path, PathBuf};

use common::{
    cluster::Cluster,
    command::{command, Cmd},
    config::{LiqoConfig, LiqoVersion, Runtime},
    tool::{find_cluster, Tool},
    Error, Result,
};
use tracing::info;

const INSTALL: [&str; 3] = [
    "Installing Liqo",
    "Could not install Liqo",
    "Liqo installed",
];

const PEER: [&str; 3] = [
    "Peering clusters",
    "Could not peer clusters",
    "Clusters peered",
];

/// liqoctl provider name for a runtime, if Liqo can be installed on it.
pub fn provider(runtime: Runtime) -> Option<&'static str> {
    match runtime {
        Runtime::K3d => Some("k3s"),
        Runtime::Kind => None,
    }
}

/// How the peer side exposes its gateway server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayServiceType {
    LoadBalancer,
    NodePort,
}

impl GatewayServiceType {
    /// Decided by the remote cluster, since that is where the gateway server lives.
    pub fn for_remote(remote: &dyn Cluster) -> Self {
        if remote.supports_load_balancer() {
            Self::LoadBalancer
        } else {
            Self::NodePort
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoadBalancer => "LoadBalancer",
            Self::NodePort => "NodePort",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallParams {
    pub provider: &'static str,
    pub cluster_id: String,
    pub kubeconfig: PathBuf,
    pub pod_cidr: Option<String>,
    pub service_cidr: Option<String>,
    pub api_server_url: Option<String>,
    pub version: Option<LiqoVersion>,
}

impl InstallParams {
    pub fn cmd(&self) -> Cmd {
        let version = self.version.as_ref();
        let kubeconfig = self.kubeconfig.to_string_lossy().into_owned();
        let flags = [
            ("--cluster-id", Some(self.cluster_id.as_str())),
            ("--pod-cidr", self.pod_cidr.as_deref()),
            ("--service-cidr", self.service_cidr.as_deref()),
            ("--kubeconfig", Some(kubeconfig.as_str())),
            ("--api-server-url", self.api_server_url.as_deref()),
            ("--repo-url", version.and_then(LiqoVersion::repo_url)),
            ("--version", version.and_then(LiqoVersion::version)),
        ];

        flags
            .into_iter()
            .filter_map(|(flag, value)| Some([flag, value?]))
            .fold(Cmd::new("liqoctl").args(["install", self.provider]), |cmd, pair| {
                cmd.args(pair)
            })
    }
}

pub fn peer_cmd(kubeconfig: &Path, remote_kubeconfig: &Path, gateway: GatewayServiceType) -> Cmd {
    Cmd::new("liqoctl")
        .arg("peer")
        .arg("--kubeconfig")
        .arg(kubeconfig.to_string_lossy())
        .arg("--remote-kubeconfig")
        .arg(remote_kubeconfig.to_string_lossy())
        .args(["--gw-server-service-type", gateway.as_str()])
}

/// Peering command for the ordered pair (local, remote).
pub fn peering(local: &dyn Cluster, remote: &dyn Cluster) -> Cmd {
    peer_cmd(
        local.kubeconfig_location(),
        remote.kubeconfig_location(),
        GatewayServiceType::for_remote(remote),
    )
}

/// Installs Liqo into the requested clusters, then peers the configured pairs.
#[derive(Debug, Clone)]
pub struct Liqo {
    config: LiqoConfig,
}

impl Liqo {
    pub fn new(config: LiqoConfig) -> Self {
        Self { config }
    }

    async fn install_params(&self, cluster: &dyn Cluster, version: Option<&LiqoVersion>) -> Result<InstallParams> {
        let provider = provider(cluster.runtime()).ok_or_else(|| Error::UnsupportedTool {
            tool: self.name().to_owned(),
            cluster: cluster.name().to_owned(),
            runtime: cluster.runtime(),
        })?;

        let spec = cluster.spec();
        Ok(InstallParams {
            provider,
            cluster_id: spec.name.clone(),
            kubeconfig: cluster.kubeconfig_location().to_owned(),
            pod_cidr: Some(spec.cluster_cidr.clone()),
            service_cidr: Some(spec.service_cidr.clone()),
            api_server_url: Some(cluster.api_server_url().await?),
            version: version.cloned(),
        })
    }
}

#[async_trait::async_trait]
impl Tool for Liqo {
    fn name(&self) -> &'static str {
        "liqo"
    }

    fn check_references(&self, clusters: &[Box<dyn Cluster>]) -> Result<()> {
        let installed = self.config.installations.iter().map(|i| i.cluster.as_str());
        let peered = self
            .config
            .peerings
            .iter()
            .flat_map(|(local, remote)| [local.as_str(), remote.as_str()]);

        for name in installed.chain(peered) {
            find_cluster(clusters, name)?;
        }
        Ok(())
    }

    async fn install(&self, clusters: &[Box<dyn Cluster>], verbose: bool) -> Result<()> {
        for installation in &self.config.installations {
            let cluster = find_cluster(clusters, &installation.cluster)?;
            let params = self
                .install_params(cluster, installation.version.as_ref())
                .await?;
            info!(
                "installing liqo {} in {}",
                installation
                    .version
                    .as_ref()
                    .map_or_else(|| "latest".to_owned(), ToString::to_string),
                cluster.name()
            );
            command(&params.cmd(), verbose, INSTALL, cluster.name()).await?;
        }

        for (local, remote) in &self.config.peerings {
            let local = find_cluster(clusters, local)?;
            let remote = find_cluster(clusters, remote)?;
            let context = format!("{} -> {}", local.name(), remote.name());
            command(&peering(local, remote), verbose, PEER, &context).await?;
        }

        Ok(())
    }
}
