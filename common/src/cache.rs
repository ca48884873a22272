//! Pull-through registry cache shared by every cluster of a run.

use std::path::Path;

use crate::{
    docker::{ContainerSpec, Docker, NETWORK_NAME},
    error::{Error, Result},
};

pub const PROXY_IMAGE: &str = "rpardini/docker-registry-proxy:0.6.5";
pub const PROXY_CONTAINER: &str = "testbench-registry-proxy";
pub const PROXY_PORT: u16 = 3128;

/// Container definition for the proxy. Creates the volume directories under `out_dir`.
pub fn proxy_container(out_dir: &Path) -> Result<ContainerSpec> {
    let base = out_dir.join("registry-proxy");
    let mut volumes = Vec::new();
    for (dir, target) in [("ca", "/ca"), ("cache", "/docker_mirror_cache")] {
        let host = base.join(dir);
        std::fs::create_dir_all(&host)?;
        volumes.push((host.canonicalize()?, target.to_owned()));
    }

    Ok(ContainerSpec {
        name: PROXY_CONTAINER.to_owned(),
        image: PROXY_IMAGE.to_owned(),
        network: Some(NETWORK_NAME.to_owned()),
        env: vec![("ENABLE_MANIFEST_CACHE".to_owned(), "true".to_owned())],
        volumes,
    })
}

pub fn proxy_url(ip: &str) -> String {
    format!("http://{ip}:{PROXY_PORT}")
}

/// Start the proxy if needed and return the address clusters should use.
pub async fn ensure_registry_proxy(docker: &Docker, out_dir: &Path) -> Result<String> {
    let spec = proxy_container(out_dir)?;
    docker.ensure_container(&spec).await?;

    let ip = docker
        .container_ip(PROXY_CONTAINER, NETWORK_NAME)
        .await?
        .ok_or_else(|| Error::ProxyNotAttached {
            container: PROXY_CONTAINER.to_owned(),
            network: NETWORK_NAME.to_owned(),
        })?;
    Ok(proxy_url(&ip))
}
