use std::path::Path;

use anyhow::Result;
use common::{
    cluster::{Cluster, ClusterContext},
    command::GREEN_TICK,
    config::{RootConfig, ToolsConfig},
    docker::{ContainerEngine, Docker, NETWORK_NAME},
    exit,
    tool::Tool,
};
use liqo::Liqo;
use tracing::info;

use super::workloads::create_workloads;
use crate::args::Cli;

/// Tools requested by the configuration, in installation order.
pub fn configured_tools(tools: &ToolsConfig) -> Vec<Box<dyn Tool>> {
    let mut configured: Vec<Box<dyn Tool>> = Vec::new();
    if let Some(liqo) = &tools.liqo {
        configured.push(Box::new(Liqo::new(liqo.clone())));
    }
    configured
}

/// Bring up every configured cluster, stage by stage. Any failure aborts the run.
pub async fn setup(cli: &Cli, config: &RootConfig) -> Result<()> {
    let ctx = ClusterContext::new(&cli.out_dir, cli.verbose);
    let docker = Docker::new(cli.verbose);

    let clusters = match base_provider::new_clusters(&config.clusters, &ctx, &docker) {
        Ok(c) => c,
        Err(err) => exit!(err, "Could not instantiate clusters"),
    };
    let tools = configured_tools(&config.tools);
    let proxy_dir = cli.registry_proxy.then_some(cli.out_dir.as_path());

    let clusters = provision(clusters, &tools, &docker, proxy_dir, cli.verbose).await?;
    print_kubeconfigs(&clusters);
    Ok(())
}

/// Run the provisioning stages in order. Each stage covers every cluster before the next starts.
///
/// `proxy_dir` enables the registry proxy, with its volumes kept under that directory.
pub async fn provision(
    mut clusters: Vec<Box<dyn Cluster>>,
    tools: &[Box<dyn Tool>],
    engine: &dyn ContainerEngine,
    proxy_dir: Option<&Path>,
    verbose: bool,
) -> Result<Vec<Box<dyn Cluster>>> {
    for tool in tools {
        if let Err(err) = tool.check_references(&clusters) {
            exit!(err, "Invalid {} configuration", tool.name());
        }
    }

    if clusters.is_empty() {
        info!("no clusters configured, nothing to do");
        return Ok(clusters);
    }

    for cluster in &clusters {
        if let Err(err) = cluster.cleanup().await {
            exit!(err, "Could not remove stale cluster {}", cluster.name());
        }
    }

    if let Err(err) = engine.ensure_network(NETWORK_NAME).await {
        exit!(err, "Could not create docker network {NETWORK_NAME}");
    }

    if let Some(dir) = proxy_dir {
        let address = match engine.ensure_registry_proxy(dir).await {
            Ok(a) => a,
            Err(err) => exit!(err, "Could not start registry proxy"),
        };
        info!("registry proxy listening on {address}");
        for cluster in clusters.iter_mut() {
            cluster.set_proxy(&address);
        }
    }

    for cluster in &clusters {
        if let Err(err) = cluster.init_cluster().await {
            exit!(err, "Could not create cluster {}", cluster.name());
        }
    }

    for cluster in &clusters {
        if let Err(err) = cluster.install_cni().await {
            exit!(err, "Could not install {} in cluster {}", cluster.spec().cni, cluster.name());
        }
    }

    if let Err(err) = create_workloads(&clusters, verbose).await {
        exit!(err, "Could not create workloads");
    }

    for tool in tools {
        info!("installing {}", tool.name());
        if let Err(err) = tool.install(&clusters, verbose).await {
            exit!(err, "Could not install {}", tool.name());
        }
    }

    Ok(clusters)
}

fn print_kubeconfigs(clusters: &[Box<dyn Cluster>]) {
    for cluster in clusters {
        println!(
            "{} {}: export KUBECONFIG={}",
            *GREEN_TICK,
            cluster.name(),
            cluster.kubeconfig_location().display()
        );
    }
}

#[cfg(test)]
mod tests {
    use std::{
        path::PathBuf,
        sync::{Arc, Mutex},
    };

    use common::{
        config::{parse_str, ClusterSpec, CniKind, LiqoConfig, Runtime, DEFAULT_CLUSTER_CIDR, DEFAULT_SERVICE_CIDR},
        Error,
    };
    use pretty_assertions::assert_eq;

    use super::*;

    type Calls = Arc<Mutex<Vec<String>>>;

    fn record(calls: &Calls, call: String) {
        calls.lock().unwrap().push(call);
    }

    struct FakeCluster {
        spec: ClusterSpec,
        kubeconfig: PathBuf,
        fail_init: bool,
        calls: Calls,
    }

    fn fake(name: &str, calls: &Calls) -> FakeCluster {
        FakeCluster {
            spec: ClusterSpec {
                name: name.into(),
                runtime: Runtime::Kind,
                cni: CniKind::Kindnet,
                nodes: 1,
                cluster_cidr: DEFAULT_CLUSTER_CIDR.into(),
                service_cidr: DEFAULT_SERVICE_CIDR.into(),
                namespaces: vec![],
            },
            kubeconfig: PathBuf::from(format!("out/kubeconfigs/{name}.yaml")),
            fail_init: false,
            calls: calls.clone(),
        }
    }

    #[async_trait::async_trait]
    impl Cluster for FakeCluster {
        fn spec(&self) -> &ClusterSpec {
            &self.spec
        }
        fn runtime(&self) -> Runtime {
            self.spec.runtime
        }
        fn supports_load_balancer(&self) -> bool {
            false
        }
        fn kubeconfig_location(&self) -> &Path {
            &self.kubeconfig
        }
        fn set_proxy(&mut self, address: &str) {
            record(&self.calls, format!("proxy {} {address}", self.spec.name));
        }
        fn render_config(&self) -> common::Result<String> {
            Ok(String::new())
        }
        async fn exists(&self) -> common::Result<bool> {
            Ok(false)
        }
        async fn init_cluster(&self) -> common::Result<()> {
            record(&self.calls, format!("init {}", self.spec.name));
            if self.fail_init {
                return Err(Error::Timeout(format!("cluster {}", self.spec.name)));
            }
            Ok(())
        }
        async fn install_cni(&self) -> common::Result<()> {
            record(&self.calls, format!("cni {}", self.spec.name));
            Ok(())
        }
        async fn cleanup(&self) -> common::Result<()> {
            record(&self.calls, format!("cleanup {}", self.spec.name));
            Ok(())
        }
    }

    struct FakeEngine {
        calls: Calls,
    }

    #[async_trait::async_trait]
    impl ContainerEngine for FakeEngine {
        async fn ensure_network(&self, name: &str) -> common::Result<bool> {
            record(&self.calls, format!("network {name}"));
            Ok(true)
        }
        async fn ensure_registry_proxy(&self, _out_dir: &Path) -> common::Result<String> {
            record(&self.calls, "registry proxy".to_owned());
            Ok("http://172.20.0.2:3128".to_owned())
        }
    }

    struct FakeTool {
        calls: Calls,
    }

    #[async_trait::async_trait]
    impl Tool for FakeTool {
        fn name(&self) -> &'static str {
            "fake"
        }
        fn check_references(&self, _clusters: &[Box<dyn Cluster>]) -> common::Result<()> {
            Ok(())
        }
        async fn install(&self, clusters: &[Box<dyn Cluster>], _verbose: bool) -> common::Result<()> {
            let names: Vec<_> = clusters.iter().map(|c| c.name()).collect();
            record(&self.calls, format!("tool {}", names.join(",")));
            Ok(())
        }
    }

    fn calls(calls: &Calls) -> Vec<String> {
        calls.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn stages_run_in_order_across_all_clusters() {
        let log = Calls::default();
        let clusters: Vec<Box<dyn Cluster>> = vec![Box::new(fake("a", &log)), Box::new(fake("b", &log))];
        let tools: Vec<Box<dyn Tool>> = vec![Box::new(FakeTool { calls: log.clone() })];
        let engine = FakeEngine { calls: log.clone() };

        let clusters = provision(clusters, &tools, &engine, Some(Path::new("out")), false)
            .await
            .unwrap();

        assert_eq!(clusters.len(), 2);
        assert_eq!(
            calls(&log),
            vec![
                "cleanup a",
                "cleanup b",
                "network testbench-net",
                "registry proxy",
                "proxy a http://172.20.0.2:3128",
                "proxy b http://172.20.0.2:3128",
                "init a",
                "init b",
                "cni a",
                "cni b",
                "tool a,b",
            ]
        );
    }

    #[tokio::test]
    async fn proxy_stage_is_skipped_when_disabled() {
        let log = Calls::default();
        let clusters: Vec<Box<dyn Cluster>> = vec![Box::new(fake("a", &log))];
        let engine = FakeEngine { calls: log.clone() };

        provision(clusters, &[], &engine, None, false).await.unwrap();
        assert_eq!(
            calls(&log),
            vec!["cleanup a", "network testbench-net", "init a", "cni a"]
        );
    }

    #[tokio::test]
    async fn failed_creation_stops_later_stages() {
        let log = Calls::default();
        let mut first = fake("a", &log);
        first.fail_init = true;
        let clusters: Vec<Box<dyn Cluster>> = vec![Box::new(first), Box::new(fake("b", &log))];
        let tools: Vec<Box<dyn Tool>> = vec![Box::new(FakeTool { calls: log.clone() })];
        let engine = FakeEngine { calls: log.clone() };

        let err = provision(clusters, &tools, &engine, None, false)
            .await
            .err()
            .unwrap();

        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Timeout(_))));
        assert_eq!(
            calls(&log),
            vec!["cleanup a", "cleanup b", "network testbench-net", "init a"]
        );
    }

    #[tokio::test]
    async fn dangling_tool_reference_fails_without_clusters() {
        let log = Calls::default();
        let config = parse_str("clusters: []\ntools:\n  liqo:\n    installations: [{cluster: a}]\n").unwrap();
        let engine = FakeEngine { calls: log.clone() };

        let err = provision(vec![], &configured_tools(&config.tools), &engine, None, false)
            .await
            .err()
            .unwrap();

        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::UnknownCluster(name)) if name == "a"));
        assert!(calls(&log).is_empty());
    }

    #[tokio::test]
    async fn dangling_tool_reference_fails_before_provisioning() {
        let log = Calls::default();
        let config = parse_str("clusters: [{name: a}]\ntools:\n  liqo:\n    peerings: [[a, b]]\n").unwrap();
        let clusters: Vec<Box<dyn Cluster>> = vec![Box::new(fake("a", &log))];
        let engine = FakeEngine { calls: log.clone() };

        let err = provision(clusters, &configured_tools(&config.tools), &engine, None, false)
            .await
            .err()
            .unwrap();

        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::UnknownCluster(name)) if name == "b"));
        assert!(calls(&log).is_empty());
    }

    #[tokio::test]
    async fn zero_clusters_without_tools_touch_nothing() {
        let log = Calls::default();
        let engine = FakeEngine { calls: log.clone() };

        let clusters = provision(vec![], &[], &engine, Some(Path::new("out")), false)
            .await
            .unwrap();
        assert!(clusters.is_empty());
        assert!(calls(&log).is_empty());
    }

    fn cli(out_dir: PathBuf) -> Cli {
        Cli {
            config: PathBuf::from("base.yaml"),
            verbose: false,
            out_dir,
            registry_proxy: true,
            destroy: false,
        }
    }

    #[test]
    fn tools_follow_configuration() {
        assert!(configured_tools(&ToolsConfig::default()).is_empty());

        let tools = configured_tools(&ToolsConfig {
            liqo: Some(LiqoConfig::default()),
        });
        let names: Vec<_> = tools.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["liqo"]);
    }

    #[tokio::test]
    async fn empty_configuration_writes_nothing() {
        let out = tempfile::tempdir().unwrap();
        let config = parse_str("clusters: []\n").unwrap();

        setup(&cli(out.path().to_owned()), &config).await.unwrap();
        assert!(std::fs::read_dir(out.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn unsupported_cni_stops_before_provisioning() {
        let out = tempfile::tempdir().unwrap();
        let config = parse_str("clusters:\n  - {name: a, runtime: kind, cni: cilium}\n").unwrap();

        let err = setup(&cli(out.path().to_owned()), &config).await.unwrap_err();
        assert!(err.to_string().contains("cilium"));
        assert!(std::fs::read_dir(out.path()).unwrap().next().is_none());
    }
}
