use crate::{
    cluster::Cluster,
    error::{Error, Result},
};

#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fail if the tool refers to a cluster that is not part of the run.
    fn check_references(&self, clusters: &[Box<dyn Cluster>]) -> Result<()>;

    /// Runs once every cluster of the run is up and has its CNI.
    async fn install(&self, clusters: &[Box<dyn Cluster>], verbose: bool) -> Result<()>;
}

/// Look a cluster up by name among the live clusters of the run.
pub fn find_cluster<'a>(clusters: &'a [Box<dyn Cluster>], name: &str) -> Result<&'a dyn Cluster> {
    clusters
        .iter()
        .find(|c| c.name() == name)
        .map(|c| c.as_ref())
        .ok_or_else(|| Error::UnknownCluster(name.to_owned()))
}
