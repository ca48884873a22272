use std::path::{Path, PathBuf};

use common::{
    cluster::{check_cni, ensure_parent, tier_label, unsupported_cni, Cluster, ClusterContext, CREATE, DELETE},
    cni::{Cni, DefaultCni},
    command::{command, command_output, command_succeeds, Cmd},
    config::{ClusterSpec, CniKind, Runtime},
    docker::NETWORK_NAME,
    Result,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const IMAGE: &str = "docker.io/rancher/k3s:v1.30.2-k3s2";

/// k3s ships flannel; the rest replace it.
pub const DEFAULT_CNI: CniKind = CniKind::Flannel;
pub const SUPPORTED_CNIS: &[CniKind] = &[CniKind::Flannel, CniKind::Calico, CniKind::Cilium];

const API_VERSION: &str = "k3d.io/v1alpha5";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleConfig {
    pub api_version: String,
    pub kind: String,
    pub image: String,
    pub servers: u32,
    pub agents: u32,
    pub network: String,
    pub options: Options,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    pub k3s: K3sOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct K3sOptions {
    pub extra_args: Vec<ArgWithNodeFilters>,
    pub node_labels: Vec<LabelWithNodeFilters>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgWithNodeFilters {
    pub arg: String,
    pub node_filters: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelWithNodeFilters {
    pub label: String,
    pub node_filters: Vec<String>,
}

impl SimpleConfig {
    /// Value of a `--flag=value` server argument.
    pub fn server_arg(&self, flag: &str) -> Option<&str> {
        let prefix = format!("{flag}=");
        self.options
            .k3s
            .extra_args
            .iter()
            .find_map(|a| a.arg.strip_prefix(&prefix))
    }
}

fn server_arg(arg: String) -> ArgWithNodeFilters {
    ArgWithNodeFilters {
        arg,
        node_filters: vec!["server:*".to_owned()],
    }
}

/// k3s in docker: one server node and `nodes - 1` agents.
#[derive(Debug, Clone)]
pub struct K3d {
    spec: ClusterSpec,
    kubeconfig: PathBuf,
    verbose: bool,
}

impl K3d {
    pub fn new(spec: ClusterSpec, ctx: &ClusterContext) -> Result<Self> {
        check_cni(&spec, SUPPORTED_CNIS)?;
        Ok(Self {
            kubeconfig: ctx.kubeconfig_path(&spec.name),
            spec,
            verbose: ctx.verbose,
        })
    }

    pub fn gen_config(&self) -> SimpleConfig {
        let agents = self.spec.nodes.saturating_sub(1);
        let node_labels = std::iter::once(LabelWithNodeFilters {
            label: tier_label(0),
            node_filters: vec!["server:0".to_owned()],
        })
        .chain((1..=agents).map(|i| LabelWithNodeFilters {
            label: tier_label(i),
            node_filters: vec![format!("agent:{}", i - 1)],
        }))
        .collect();

        SimpleConfig {
            api_version: API_VERSION.to_owned(),
            kind: "Simple".to_owned(),
            image: IMAGE.to_owned(),
            servers: 1,
            agents,
            network: NETWORK_NAME.to_owned(),
            options: Options {
                k3s: K3sOptions {
                    extra_args: vec![
                        server_arg(format!("--cluster-cidr={}", self.spec.cluster_cidr)),
                        server_arg(format!("--service-cidr={}", self.spec.service_cidr)),
                    ],
                    node_labels,
                },
            },
        }
    }

    pub fn create_cmd(&self) -> Result<Cmd> {
        let mut cmd = Cmd::new("k3d")
            .args(["cluster", "create", self.spec.name.as_str()])
            .args(["--config", "-", "--kubeconfig-update-default=false"])
            .stdin(self.render_config()?);

        if self.spec.cni != DEFAULT_CNI {
            cmd = cmd.args([
                "--k3s-arg",
                "--flannel-backend=none@server:*",
                "--k3s-arg",
                "--disable-network-policy@server:*",
            ]);
        }
        Ok(cmd)
    }

    fn cni(&self) -> Result<Box<dyn Cni>> {
        check_cni(&self.spec, SUPPORTED_CNIS)?;
        if self.spec.cni == DEFAULT_CNI {
            return Ok(Box::new(DefaultCni::new(DEFAULT_CNI)));
        }
        base_cni::new_cni(self.spec.cni, self.cni_target()).ok_or_else(|| unsupported_cni(&self.spec))
    }
}

#[async_trait::async_trait]
impl Cluster for K3d {
    fn spec(&self) -> &ClusterSpec {
        &self.spec
    }

    fn runtime(&self) -> Runtime {
        Runtime::K3d
    }

    fn supports_load_balancer(&self) -> bool {
        true
    }

    fn kubeconfig_location(&self) -> &Path {
        &self.kubeconfig
    }

    fn render_config(&self) -> Result<String> {
        let config = serde_yaml::to_string(&self.gen_config())?;
        debug!("k3d config for {}:\n{config}", self.spec.name);
        Ok(config)
    }

    async fn exists(&self) -> Result<bool> {
        command_succeeds(&Cmd::new("k3d").args(["cluster", "get", self.spec.name.as_str()])).await
    }

    async fn init_cluster(&self) -> Result<()> {
        command(&self.create_cmd()?, self.verbose, CREATE, &self.spec.name).await?;

        let kubeconfig =
            command_output(&Cmd::new("k3d").args(["kubeconfig", "get", self.spec.name.as_str()]))
                .await?;
        ensure_parent(&self.kubeconfig).await?;
        tokio::fs::write(&self.kubeconfig, kubeconfig).await?;
        info!("kubeconfig for {} written to {}", self.spec.name, self.kubeconfig.display());
        Ok(())
    }

    async fn install_cni(&self) -> Result<()> {
        self.cni()?.install(self.verbose).await
    }

    async fn cleanup(&self) -> Result<()> {
        if !self.exists().await? {
            info!("cluster {} does not exist, nothing to delete", self.spec.name);
            return Ok(());
        }

        command(
            &Cmd::new("k3d").args(["cluster", "delete", self.spec.name.as_str()]),
            self.verbose,
            DELETE,
            &self.spec.name,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use common::{config::DEFAULT_SERVICE_CIDR, Error};
    use pretty_assertions::assert_eq;

    use super::*;

    fn spec(nodes: u32, cni: CniKind) -> ClusterSpec {
        ClusterSpec {
            name: "alpha".into(),
            runtime: Runtime::K3d,
            cni,
            nodes,
            cluster_cidr: "10.10.0.0/16".into(),
            service_cidr: DEFAULT_SERVICE_CIDR.into(),
            namespaces: vec![],
        }
    }

    fn cluster(nodes: u32, cni: CniKind) -> K3d {
        K3d::new(spec(nodes, cni), &ClusterContext::new("out", false)).unwrap()
    }

    #[test]
    fn rendered_config_round_trips() {
        let k3d = cluster(3, CniKind::Calico);
        let parsed: SimpleConfig = serde_yaml::from_str(&k3d.render_config().unwrap()).unwrap();

        assert_eq!(parsed, k3d.gen_config());
        assert_eq!(parsed.servers + parsed.agents, 3);
        assert_eq!(parsed.server_arg("--cluster-cidr"), Some("10.10.0.0/16"));
        assert_eq!(parsed.server_arg("--service-cidr"), Some(DEFAULT_SERVICE_CIDR));
        assert_eq!(parsed.network, NETWORK_NAME);
    }

    #[test]
    fn nodes_are_labelled_by_tier() {
        let config = cluster(3, CniKind::Flannel).gen_config();
        let labels: Vec<(&str, &str)> = config
            .options
            .k3s
            .node_labels
            .iter()
            .map(|l| (l.label.as_str(), l.node_filters[0].as_str()))
            .collect();

        assert_eq!(
            labels,
            vec![
                ("tier=worker-0", "server:0"),
                ("tier=worker-1", "agent:0"),
                ("tier=worker-2", "agent:1"),
            ]
        );
    }

    #[test]
    fn single_node_has_no_agents() {
        let config = cluster(1, CniKind::Flannel).gen_config();
        assert_eq!(config.agents, 0);
        assert_eq!(config.options.k3s.node_labels.len(), 1);
    }

    #[test]
    fn custom_cni_disables_flannel() {
        let cmd = cluster(1, CniKind::Cilium).create_cmd().unwrap();
        assert!(cmd.get_args().iter().any(|a| a == "--flannel-backend=none@server:*"));
        assert!(cmd.get_args().iter().any(|a| a == "--disable-network-policy@server:*"));
        assert_eq!(&cmd.get_args()[..3], ["cluster", "create", "alpha"]);
        assert!(cmd.get_stdin().unwrap().contains("k3d.io/v1alpha5"));

        let cmd = cluster(1, CniKind::Flannel).create_cmd().unwrap();
        assert!(!cmd.get_args().iter().any(|a| a == "--k3s-arg"));
    }

    #[test]
    fn kindnet_is_rejected_at_construction() {
        let err = K3d::new(spec(1, CniKind::Kindnet), &ClusterContext::new("out", false)).unwrap_err();
        assert!(matches!(err, Error::UnsupportedCni { cni: CniKind::Kindnet, .. }));
    }

    #[test]
    fn kubeconfig_lives_under_out_dir() {
        assert_eq!(
            cluster(1, CniKind::Flannel).kubeconfig_location(),
            Path::new("out/kubeconfigs/alpha.yaml")
        );
    }

    #[test]
    fn cni_selection() {
        assert_eq!(cluster(1, CniKind::Flannel).cni().unwrap().kind(), CniKind::Flannel);
        assert_eq!(cluster(1, CniKind::Calico).cni().unwrap().kind(), CniKind::Calico);
        assert_eq!(cluster(1, CniKind::Cilium).cni().unwrap().kind(), CniKind::Cilium);
    }
}
