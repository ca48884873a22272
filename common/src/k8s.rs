use std::{collections::BTreeMap, path::Path, time::Duration};

use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec as WorkloadSpec},
        core::v1::{Namespace, Node, PodTemplateSpec},
    },
    apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
    apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta},
};
use kube::{
    api::{Api, DynamicObject, ListParams, Patch, PatchParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    core::GroupVersionKind,
    discovery::{Discovery, Scope},
    runtime::wait::{await_condition, conditions},
    Client, Config,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    config::DeploymentSpec,
    error::{Error, Result},
};

pub const FIELD_MANAGER: &str = "testbench";
pub const CONTROL_PLANE_SELECTOR: &str = "node-role.kubernetes.io/control-plane";
pub const API_SERVER_PORT: u16 = 6443;

/// Build a client from a kubeconfig file written by a cluster runtime.
pub async fn client_for(kubeconfig: &Path) -> Result<Client> {
    let kubeconfig = Kubeconfig::read_from(kubeconfig)?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
    Ok(Client::try_from(config)?)
}

/// Create a namespace, returning `false` if it already existed.
pub async fn ensure_namespace(client: &Client, name: &str) -> Result<bool> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let namespace = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            ..ObjectMeta::default()
        },
        ..Namespace::default()
    };

    match namespaces.create(&PostParams::default(), &namespace).await {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(ref api_error)) if api_error.code == 409 => {
            info!("namespace {name} already exists, not creating");
            Ok(false)
        }
        Err(err) => Err(err.into()),
    }
}

pub fn deployment_manifest(spec: &DeploymentSpec) -> Deployment {
    let labels = BTreeMap::from([("app".to_owned(), spec.name.clone())]);

    Deployment {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            ..ObjectMeta::default()
        },
        spec: Some(WorkloadSpec {
            replicas: Some(spec.replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..ObjectMeta::default()
                }),
                spec: Some(spec.pod_spec.clone()),
            },
            ..WorkloadSpec::default()
        }),
        ..Deployment::default()
    }
}

/// Create a deployment. An existing deployment with the same name is an error.
pub async fn create_deployment(client: &Client, namespace: &str, spec: &DeploymentSpec) -> Result<()> {
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    deployments
        .create(&PostParams::default(), &deployment_manifest(spec))
        .await?;
    info!("deployment {namespace}/{} created", spec.name);
    Ok(())
}

/// API server URL reachable from other containers on the shared network.
pub async fn control_plane_address(client: &Client, cluster: &str) -> Result<String> {
    let nodes: Api<Node> = Api::all(client.clone());
    let list = nodes
        .list(&ListParams::default().labels(CONTROL_PLANE_SELECTOR))
        .await?;

    api_server_url(&list.items).ok_or_else(|| Error::ApiServerNotFound {
        cluster: cluster.to_owned(),
        selector: CONTROL_PLANE_SELECTOR.to_owned(),
    })
}

/// First InternalIP among the given nodes, formatted as an https URL.
pub fn api_server_url(nodes: &[Node]) -> Option<String> {
    nodes
        .iter()
        .filter_map(|node| node.status.as_ref()?.addresses.as_ref())
        .flatten()
        .find(|addr| addr.type_ == "InternalIP")
        .map(|addr| format!("https://{}:{API_SERVER_PORT}", addr.address))
}

/// Split a multi-document YAML stream into JSON objects, dropping empty documents.
pub fn split_documents(raw: &str) -> Result<Vec<Value>> {
    let mut docs = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(raw) {
        let value = Value::deserialize(doc)?;
        if !value.is_null() {
            docs.push(value);
        }
    }
    Ok(docs)
}

fn is_foundational(doc: &Value) -> bool {
    matches!(
        doc.get("kind").and_then(Value::as_str),
        Some("Namespace" | "CustomResourceDefinition")
    )
}

/// Server-side apply a set of documents.
///
/// Namespaces and CRDs go first; discovery is then re-run so that kinds defined by the new
/// CRDs resolve for the remaining documents.
pub async fn apply_manifests(client: &Client, docs: &[Value]) -> Result<()> {
    if docs.is_empty() {
        return Ok(());
    }

    let (foundational, rest): (Vec<&Value>, Vec<&Value>) =
        docs.iter().partition(|doc| is_foundational(doc));
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for batch in [foundational, rest] {
        if batch.is_empty() {
            continue;
        }

        let discovery = Discovery::new(client.clone()).run().await?;
        for doc in batch {
            apply_one(client, &discovery, doc, &params).await?;
        }
    }

    Ok(())
}

async fn apply_one(
    client: &Client,
    discovery: &Discovery,
    doc: &Value,
    params: &PatchParams,
) -> Result<()> {
    let field = |pointer: &str| doc.pointer(pointer).and_then(Value::as_str);
    let kind = field("/kind").ok_or_else(|| Error::Manifest("missing kind".into()))?;
    let api_version =
        field("/apiVersion").ok_or_else(|| Error::Manifest(format!("{kind}: missing apiVersion")))?;
    let name = field("/metadata/name")
        .ok_or_else(|| Error::Manifest(format!("{kind}: missing metadata.name")))?;
    let namespace = field("/metadata/namespace");

    let (group, version) = api_version.split_once('/').unwrap_or(("", api_version));
    let gvk = GroupVersionKind::gvk(group, version, kind);
    let (resource, caps) = discovery
        .resolve_gvk(&gvk)
        .ok_or_else(|| Error::Manifest(format!("unknown resource type {api_version}/{kind}")))?;

    let api: Api<DynamicObject> = match caps.scope {
        Scope::Namespaced => {
            Api::namespaced_with(client.clone(), namespace.unwrap_or("default"), &resource)
        }
        Scope::Cluster => Api::all_with(client.clone(), &resource),
    };

    api.patch(name, params, &Patch::Apply(doc)).await?;
    debug!(kind, name, namespace, "applied manifest");
    Ok(())
}

/// Wait until every named CRD reports `Established`, so its kinds show up in discovery.
///
/// A CRD that was just applied already exists but may not be served yet.
pub async fn wait_for_crds(client: &Client, names: &[&str], timeout: Duration) -> Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());

    let established = async {
        for name in names {
            debug!("waiting for crd {name} to be established");
            await_condition(crds.clone(), name, conditions::is_crd_established()).await?;
        }
        Ok::<_, Error>(())
    };

    tokio::time::timeout(timeout, established)
        .await
        .map_err(|_| Error::Timeout(format!("crds {}", names.join(", "))))?
}

#[cfg(test)]
mod tests {
    use k8s_openapi::{
        api::core::v1::{NodeAddress, NodeStatus, PodSpec},
        apiextensions_apiserver::pkg::apis::apiextensions::v1::{
            CustomResourceDefinitionCondition, CustomResourceDefinitionStatus,
        },
    };
    use kube::runtime::wait::Condition;
    use pretty_assertions::assert_eq;

    use super::*;

    fn node(addresses: &[(&str, &str)]) -> Node {
        Node {
            status: Some(NodeStatus {
                addresses: Some(
                    addresses
                        .iter()
                        .map(|(t, a)| NodeAddress {
                            type_: t.to_string(),
                            address: a.to_string(),
                        })
                        .collect(),
                ),
                ..NodeStatus::default()
            }),
            ..Node::default()
        }
    }

    #[test]
    fn api_server_url_uses_internal_ip() {
        let nodes = vec![node(&[("Hostname", "k3d-a-server-0"), ("InternalIP", "172.18.0.3")])];
        assert_eq!(
            api_server_url(&nodes).as_deref(),
            Some("https://172.18.0.3:6443")
        );
    }

    #[test]
    fn api_server_url_without_nodes_is_none() {
        assert_eq!(api_server_url(&[]), None);
        assert_eq!(api_server_url(&[Node::default()]), None);
        assert_eq!(api_server_url(&[node(&[("ExternalIP", "1.2.3.4")])]), None);
    }

    #[test]
    fn deployment_selector_matches_template_labels() {
        let spec = DeploymentSpec {
            name: "web".into(),
            replicas: 3,
            pod_spec: PodSpec::default(),
        };
        let deployment = deployment_manifest(&spec);
        let ws = deployment.spec.unwrap();

        let expected = BTreeMap::from([("app".to_owned(), "web".to_owned())]);
        assert_eq!(deployment.metadata.name.as_deref(), Some("web"));
        assert_eq!(ws.replicas, Some(3));
        assert_eq!(ws.selector.match_labels.as_ref(), Some(&expected));
        assert_eq!(ws.template.metadata.unwrap().labels, Some(expected));
    }

    #[test]
    fn documents_are_split_and_empty_ones_dropped() {
        let docs = split_documents(
            "---\napiVersion: v1\nkind: Namespace\nmetadata:\n  name: tigera-operator\n---\n---\nkind: ConfigMap\n",
        )
        .unwrap();

        assert_eq!(docs.len(), 2);
        assert!(is_foundational(&docs[0]));
        assert!(!is_foundational(&docs[1]));
    }

    fn crd(conditions: &[(&str, &str)]) -> CustomResourceDefinition {
        CustomResourceDefinition {
            metadata: ObjectMeta {
                name: Some("installations.operator.tigera.io".into()),
                ..ObjectMeta::default()
            },
            status: Some(CustomResourceDefinitionStatus {
                conditions: Some(
                    conditions
                        .iter()
                        .map(|(type_, status)| CustomResourceDefinitionCondition {
                            type_: type_.to_string(),
                            status: status.to_string(),
                            ..CustomResourceDefinitionCondition::default()
                        })
                        .collect(),
                ),
                ..CustomResourceDefinitionStatus::default()
            }),
            ..CustomResourceDefinition::default()
        }
    }

    #[test]
    fn stored_crd_is_not_yet_established() {
        let established = conditions::is_crd_established();

        assert!(!established.matches_object(None));
        assert!(!established.matches_object(Some(&CustomResourceDefinition::default())));
        assert!(!established.matches_object(Some(&crd(&[("NamesAccepted", "True")]))));
        assert!(!established.matches_object(Some(&crd(&[("Established", "False")]))));
        assert!(established.matches_object(Some(&crd(&[
            ("NamesAccepted", "True"),
            ("Established", "True"),
        ]))));
    }
}
