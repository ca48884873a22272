use common::{cluster::Cluster, command::step, k8s, Error, Result};
use tracing::info;

const WORKLOADS: [&str; 3] = [
    "Creating namespace and deployments",
    "Could not create workloads",
    "Workloads created",
];

/// Create the namespaces and deployments declared for each cluster.
pub async fn create_workloads(clusters: &[Box<dyn Cluster>], verbose: bool) -> Result<()> {
    for cluster in clusters {
        let spec = cluster.spec();
        if spec.namespaces.is_empty() {
            continue;
        }

        let client = k8s::client_for(cluster.kubeconfig_location()).await?;
        for ns in &spec.namespaces {
            let context = format!("{}/{}", cluster.name(), ns.name);
            step(verbose, WORKLOADS, &context, async {
                if !k8s::ensure_namespace(&client, &ns.name).await? {
                    info!("reusing namespace {context}");
                }
                for deployment in &ns.deployments {
                    k8s::create_deployment(&client, &ns.name, deployment).await?;
                }
                Ok::<_, Error>(())
            })
            .await?;
        }
    }
    Ok(())
}
