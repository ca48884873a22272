use anyhow::Result;
use common::{cluster::ClusterContext, config::RootConfig, docker::Docker, exit};

use crate::args::Cli;

/// Delete every configured cluster that currently exists.
pub async fn destroy(cli: &Cli, config: &RootConfig) -> Result<()> {
    let ctx = ClusterContext::new(&cli.out_dir, cli.verbose);
    let docker = Docker::new(cli.verbose);

    let clusters = match base_provider::new_clusters(&config.clusters, &ctx, &docker) {
        Ok(c) => c,
        Err(err) => exit!(err, "Could not instantiate clusters"),
    };

    for cluster in &clusters {
        if let Err(err) = cluster.cleanup().await {
            exit!(err, "Could not delete cluster {}", cluster.name());
        }
    }
    Ok(())
}
