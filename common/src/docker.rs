use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::info;

use crate::{
    cache,
    command::{command, command_output, command_succeeds, Cmd},
    error::Result,
};

/// Bridge network every cluster and the registry proxy are attached to.
pub const NETWORK_NAME: &str = "testbench-net";

const NETWORK: [&str; 3] = [
    "Creating docker network",
    "Could not create docker network",
    "Docker network created",
];

const CONTAINER: [&str; 3] = [
    "Starting container",
    "Could not start container",
    "Container running",
];

/// A long-running container to create if absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub network: Option<String>,
    pub env: Vec<(String, String)>,
    /// (host path, container path) bind mounts
    pub volumes: Vec<(PathBuf, String)>,
}

impl ContainerSpec {
    pub fn run_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_owned(),
            "--detach".to_owned(),
            "--name".to_owned(),
            self.name.clone(),
        ];
        if let Some(network) = &self.network {
            args.extend(["--network".to_owned(), network.clone()]);
        }
        for (k, v) in &self.env {
            args.extend(["--env".to_owned(), format!("{k}={v}")]);
        }
        for (host, target) in &self.volumes {
            args.extend([
                "--volume".to_owned(),
                format!("{}:{target}:rw", host.display()),
            ]);
        }
        args.push(self.image.clone());
        args
    }
}

/// Handle on the local container runtime, driven through the `docker` CLI.
#[derive(Debug, Clone)]
pub struct Docker {
    binary: String,
    verbose: bool,
}

impl Docker {
    pub fn new(verbose: bool) -> Self {
        Self {
            binary: "docker".to_owned(),
            verbose,
        }
    }

    fn cmd(&self) -> Cmd {
        Cmd::new(&self.binary)
    }

    pub async fn network_exists(&self, name: &str) -> Result<bool> {
        command_succeeds(&self.cmd().args(["network", "inspect", name])).await
    }

    /// Create a bridge network unless one with this name exists. Returns whether it was created.
    pub async fn ensure_network(&self, name: &str) -> Result<bool> {
        if self.network_exists(name).await? {
            info!("docker network {name} already exists, skipping");
            return Ok(false);
        }

        command(
            &self.cmd().args(["network", "create", "--driver", "bridge", name]),
            self.verbose,
            NETWORK,
            name,
        )
        .await?;
        Ok(true)
    }

    pub async fn container_exists(&self, name: &str) -> Result<bool> {
        command_succeeds(&self.cmd().args(["container", "inspect", name])).await
    }

    /// Run the container unless it already exists, in which case it is (re)started.
    pub async fn ensure_container(&self, spec: &ContainerSpec) -> Result<bool> {
        if self.container_exists(&spec.name).await? {
            info!("container {} already exists, reusing it", spec.name);
            command_output(&self.cmd().args(["start", spec.name.as_str()])).await?;
            return Ok(false);
        }

        command(
            &self.cmd().args(spec.run_args()),
            self.verbose,
            CONTAINER,
            &spec.name,
        )
        .await?;
        Ok(true)
    }

    /// Address of a container on the given network, `None` if it is not attached to it.
    pub async fn container_ip(&self, container: &str, network: &str) -> Result<Option<String>> {
        let out = command_output(&self.cmd().args([
            "container",
            "inspect",
            "--format",
            "{{json .NetworkSettings.Networks}}",
            container,
        ]))
        .await?;
        network_ip(&out, network)
    }

    /// Run a command inside a container and return its stdout.
    pub async fn exec(&self, container: &str, args: &[&str]) -> Result<String> {
        command_output(
            &self
                .cmd()
                .args(["exec", container])
                .args(args.iter().copied()),
        )
        .await
    }
}

/// Host-level resources shared by every cluster of a run.
#[async_trait::async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn ensure_network(&self, name: &str) -> Result<bool>;

    /// Start the pull-through cache and return the address clusters should use.
    async fn ensure_registry_proxy(&self, out_dir: &Path) -> Result<String>;
}

#[async_trait::async_trait]
impl ContainerEngine for Docker {
    async fn ensure_network(&self, name: &str) -> Result<bool> {
        Docker::ensure_network(self, name).await
    }

    async fn ensure_registry_proxy(&self, out_dir: &Path) -> Result<String> {
        cache::ensure_registry_proxy(self, out_dir).await
    }
}

fn network_ip(inspect: &str, network: &str) -> Result<Option<String>> {
    let networks: Value = serde_json::from_str(inspect.trim())?;
    Ok(networks
        .get(network)
        .and_then(|n| n.get("IPAddress"))
        .and_then(Value::as_str)
        .filter(|ip| !ip.is_empty())
        .map(str::to_owned))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn run_args_carry_network_env_and_volumes() {
        let spec = ContainerSpec {
            name: "proxy".into(),
            image: "registry:2".into(),
            network: Some(NETWORK_NAME.into()),
            env: vec![("A".into(), "b".into())],
            volumes: vec![(PathBuf::from("/tmp/cache"), "/cache".into())],
        };

        assert_eq!(
            spec.run_args(),
            vec![
                "run", "--detach", "--name", "proxy", "--network", "testbench-net", "--env", "A=b",
                "--volume", "/tmp/cache:/cache:rw", "registry:2",
            ]
        );
    }

    #[test]
    fn ip_is_read_from_the_named_network() {
        let inspect = r#"{"bridge":{"IPAddress":"172.17.0.2"},"testbench-net":{"IPAddress":"172.20.0.5"}}"#;
        assert_eq!(
            network_ip(inspect, NETWORK_NAME).unwrap().as_deref(),
            Some("172.20.0.5")
        );
        assert_eq!(network_ip(inspect, "other").unwrap(), None);
    }

    #[test]
    fn empty_address_counts_as_detached() {
        let inspect = "{\"testbench-net\":{\"IPAddress\":\"\"}}\n";
        assert_eq!(network_ip(inspect, NETWORK_NAME).unwrap(), None);
    }

    #[test]
    fn garbage_inspect_output_is_an_error() {
        assert!(network_ip("not json", NETWORK_NAME).is_err());
    }
}
