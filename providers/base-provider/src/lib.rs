use common::{
    cluster::{Cluster, ClusterContext},
    config::{ClusterSpec, Runtime},
    docker::Docker,
    Result,
};
use k3d::K3d;
use kind::Kind;

/// Build the runtime specific cluster for a spec. Fails before touching any infrastructure
/// if the runtime cannot run the requested CNI.
pub fn new_cluster(spec: &ClusterSpec, ctx: &ClusterContext, docker: &Docker) -> Result<Box<dyn Cluster>> {
    Ok(match spec.runtime {
        Runtime::K3d => Box::new(K3d::new(spec.clone(), ctx)?),
        Runtime::Kind => Box::new(Kind::new(spec.clone(), ctx, docker)?),
    })
}

/// Instantiate every cluster in declaration order.
pub fn new_clusters(
    specs: &[ClusterSpec],
    ctx: &ClusterContext,
    docker: &Docker,
) -> Result<Vec<Box<dyn Cluster>>> {
    specs.iter().map(|s| new_cluster(s, ctx, docker)).collect()
}
