use std::time::Duration;

use common::{
    cni::{Cni, CniTarget, INSTALL},
    command::step,
    config::CniKind,
    k8s, Error, Result,
};
use serde_json::{json, Value};
use tracing::info;

pub const VERSION: &str = "3.30.3";

const OPERATOR_GROUP: &str = "operator.tigera.io";

const CRD_TIMEOUT: Duration = Duration::from_secs(120);

pub fn manifest_urls(version: &str) -> [String; 2] {
    ["operator-crds.yaml", "tigera-operator.yaml"].map(|file| {
        format!("https://raw.githubusercontent.com/projectcalico/calico/v{version}/manifests/{file}")
    })
}

/// CRDs that must be established before `custom_resources` can be applied.
pub fn operator_crds() -> Vec<String> {
    ["installations", "apiservers", "goldmanes", "whiskers"]
        .map(|plural| format!("{plural}.{OPERATOR_GROUP}"))
        .to_vec()
}

/// Operator resources enabling Calico with a VXLAN pool over `cidr`.
pub fn custom_resources(cidr: &str) -> Vec<Value> {
    let resource = |kind: &str| {
        json!({
            "apiVersion": format!("{OPERATOR_GROUP}/v1"),
            "kind": kind,
            "metadata": { "name": "default" },
        })
    };

    let mut installation = resource("Installation");
    installation["spec"] = json!({
        "calicoNetwork": {
            // liqo gateway interfaces must never be picked as the node address
            "nodeAddressAutodetectionV4": { "skipInterface": "liqo.*" },
            "ipPools": [{
                "name": "default-ipv4-ippool",
                "blockSize": 26,
                "cidr": cidr,
                "encapsulation": "VXLAN",
                "natOutgoing": "Enabled",
                "nodeSelector": "all()",
            }],
        },
    });

    let mut api_server = resource("APIServer");
    api_server["spec"] = json!({});

    vec![installation, api_server, resource("Goldmane"), resource("Whisker")]
}

async fn fetch(url: &str) -> Result<String> {
    let fetch_err = |err: reqwest::Error| Error::Fetch {
        url: url.to_owned(),
        reason: err.to_string(),
    };

    info!("fetching {url}");
    reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(fetch_err)?
        .text()
        .await
        .map_err(fetch_err)
}

#[derive(Debug, Clone)]
pub struct Calico {
    target: CniTarget,
    version: String,
}

impl Calico {
    pub fn new(target: CniTarget) -> Self {
        Self {
            target,
            version: VERSION.to_owned(),
        }
    }

    async fn apply(&self) -> Result<()> {
        let client = k8s::client_for(&self.target.kubeconfig).await?;

        let mut docs = Vec::new();
        for url in manifest_urls(&self.version) {
            docs.extend(k8s::split_documents(&fetch(&url).await?)?);
        }
        k8s::apply_manifests(&client, &docs).await?;

        let crds = operator_crds();
        let names: Vec<&str> = crds.iter().map(String::as_str).collect();
        k8s::wait_for_crds(&client, &names, CRD_TIMEOUT).await?;
        k8s::apply_manifests(&client, &custom_resources(&self.target.cidr)).await
    }
}

#[async_trait::async_trait]
impl Cni for Calico {
    fn kind(&self) -> CniKind {
        CniKind::Calico
    }

    async fn install(&self, verbose: bool) -> Result<()> {
        step(verbose, INSTALL, "calico", self.apply()).await
    }
}
