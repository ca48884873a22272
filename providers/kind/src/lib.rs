use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use common::{
    cluster::{check_cni, ensure_parent, Cluster, ClusterContext, CREATE, DELETE, PROXY},
    cni::{Cni, DefaultCni},
    command::{command, command_output, step, Cmd},
    config::{ClusterSpec, CniKind, Runtime},
    docker::{Docker, NETWORK_NAME},
    Result,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const IMAGE: &str = "kindest/node:v1.30.0";
pub const SUPPORTED_CNIS: &[CniKind] = &[CniKind::Kindnet];

const API_VERSION: &str = "kind.x-k8s.io/v1alpha4";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindConfig {
    pub api_version: String,
    pub kind: String,
    pub networking: Networking,
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Networking {
    pub pod_subnet: String,
    pub service_subnet: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub role: String,
    pub image: String,
    pub labels: BTreeMap<String, String>,
}

impl Node {
    fn new(role: &str, tier: u32) -> Self {
        Self {
            role: role.to_owned(),
            image: IMAGE.to_owned(),
            labels: BTreeMap::from([("tier".to_owned(), format!("worker-{tier}"))]),
        }
    }
}

/// Shell pipeline that points a node's containerd at the registry proxy.
pub fn proxy_setup_script(address: &str) -> String {
    format!(
        r#"curl {address}/setup/systemd | sed s/docker\.service/containerd\.service/g | sed '/Environment/ s/$/ "NO_PROXY=127.0.0.0\/8,10.0.0.0\/8,172.16.0.0\/12,192.168.0.0\/16"/' | bash"#
    )
}

/// Kubernetes in docker with the bundled kindnet CNI.
#[derive(Debug, Clone)]
pub struct Kind {
    spec: ClusterSpec,
    kubeconfig: PathBuf,
    proxy: Option<String>,
    docker: Docker,
    verbose: bool,
}

impl Kind {
    pub fn new(spec: ClusterSpec, ctx: &ClusterContext, docker: &Docker) -> Result<Self> {
        check_cni(&spec, SUPPORTED_CNIS)?;
        Ok(Self {
            kubeconfig: ctx.kubeconfig_path(&spec.name),
            spec,
            proxy: None,
            docker: docker.clone(),
            verbose: ctx.verbose,
        })
    }

    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    pub fn gen_config(&self) -> KindConfig {
        let nodes = std::iter::once(Node::new("control-plane", 0))
            .chain((1..self.spec.nodes).map(|i| Node::new("worker", i)))
            .collect();

        KindConfig {
            api_version: API_VERSION.to_owned(),
            kind: "Cluster".to_owned(),
            networking: Networking {
                pod_subnet: self.spec.cluster_cidr.clone(),
                service_subnet: self.spec.service_cidr.clone(),
            },
            nodes,
        }
    }

    pub fn create_cmd(&self) -> Result<Cmd> {
        Ok(Cmd::new("kind")
            .args(["create", "cluster", "--name", self.spec.name.as_str()])
            .arg("--kubeconfig")
            .arg(self.kubeconfig.to_string_lossy())
            .args(["--config", "-", "--wait", "5m"])
            .env("KIND_EXPERIMENTAL_DOCKER_NETWORK", NETWORK_NAME)
            .stdin(self.render_config()?))
    }

    async fn node_names(&self) -> Result<Vec<String>> {
        let out = command_output(&Cmd::new("kind").args(["get", "nodes", "--name", self.spec.name.as_str()]))
            .await?;
        Ok(out.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_owned).collect())
    }

    async fn install_cache_proxy(&self, address: &str) -> Result<()> {
        let script = proxy_setup_script(address);
        for node in self.node_names().await? {
            step(self.verbose, PROXY, &node, async {
                self.docker.exec(&node, &["sh", "-c", &script]).await.map(|_| ())
            })
            .await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Cluster for Kind {
    fn spec(&self) -> &ClusterSpec {
        &self.spec
    }

    fn runtime(&self) -> Runtime {
        Runtime::Kind
    }

    fn supports_load_balancer(&self) -> bool {
        false
    }

    fn kubeconfig_location(&self) -> &Path {
        &self.kubeconfig
    }

    fn set_proxy(&mut self, address: &str) {
        self.proxy = Some(address.to_owned());
    }

    fn render_config(&self) -> Result<String> {
        let config = serde_yaml::to_string(&self.gen_config())?;
        debug!("kind config for {}:\n{config}", self.spec.name);
        Ok(config)
    }

    async fn exists(&self) -> Result<bool> {
        let out = command_output(&Cmd::new("kind").args(["get", "clusters"])).await?;
        Ok(out.lines().any(|l| l.trim() == self.spec.name))
    }

    async fn init_cluster(&self) -> Result<()> {
        ensure_parent(&self.kubeconfig).await?;
        command(&self.create_cmd()?, self.verbose, CREATE, &self.spec.name).await?;
        info!("kubeconfig for {} written to {}", self.spec.name, self.kubeconfig.display());

        if let Some(address) = &self.proxy {
            self.install_cache_proxy(address).await?;
        }
        Ok(())
    }

    async fn install_cni(&self) -> Result<()> {
        check_cni(&self.spec, SUPPORTED_CNIS)?;
        DefaultCni::new(self.spec.cni).install(self.verbose).await
    }

    async fn cleanup(&self) -> Result<()> {
        if !self.exists().await? {
            info!("cluster {} does not exist, nothing to delete", self.spec.name);
            return Ok(());
        }

        command(
            &Cmd::new("kind").args(["delete", "cluster", "--name", self.spec.name.as_str()]),
            self.verbose,
            DELETE,
            &self.spec.name,
        )
        .await
    }
}
