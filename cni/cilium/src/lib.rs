use common::{
    cni::{Cni, CniTarget, INSTALL},
    command::{command, Cmd},
    config::CniKind,
    Result,
};
use serde_json::{json, Value};
use tracing::debug;

pub const VERSION: &str = "1.18.6";

/// Helm values passed to `cilium install`.
///
/// Agents stay off virtual nodes created by multi-cluster offloading, and the operator
/// allocates pod addresses from the cluster's own CIDR.
pub fn values(cidr: &str) -> Value {
    json!({
        "affinity": {
            "nodeAffinity": {
                "requiredDuringSchedulingIgnoredDuringExecution": {
                    "nodeSelectorTerms": [{
                        "matchExpressions": [{
                            "key": "liqo.io/type",
                            "operator": "DoesNotExist",
                        }],
                    }],
                },
            },
        },
        "ipam": {
            "operator": {
                "clusterPoolIPv4PodCIDRList": [cidr],
            },
        },
    })
}

#[derive(Debug, Clone)]
pub struct Cilium {
    target: CniTarget,
    version: String,
}

impl Cilium {
    pub fn new(target: CniTarget) -> Self {
        Self {
            target,
            version: VERSION.to_owned(),
        }
    }

    pub fn install_cmd(&self) -> Result<Cmd> {
        let values = serde_yaml::to_string(&values(&self.target.cidr))?;
        debug!("cilium values:\n{values}");

        Ok(Cmd::new("cilium")
            .arg("install")
            .arg("--kubeconfig")
            .arg(self.target.kubeconfig.to_string_lossy())
            .args(["--version", self.version.as_str(), "--values", "-"])
            .stdin(values))
    }
}

#[async_trait::async_trait]
impl Cni for Cilium {
    fn kind(&self) -> CniKind {
        CniKind::Cilium
    }

    async fn install(&self, verbose: bool) -> Result<()> {
        command(&self.install_cmd()?, verbose, INSTALL, "cilium").await
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn cilium() -> Cilium {
        Cilium::new(CniTarget {
            kubeconfig: "out/kubeconfigs/a.yaml".into(),
            cidr: "10.42.0.0/16".into(),
        })
    }

    #[test]
    fn values_carry_pod_cidr_and_affinity() {
        let v = values("10.42.0.0/16");
        assert_eq!(
            v.pointer("/ipam/operator/clusterPoolIPv4PodCIDRList/0"),
            Some(&json!("10.42.0.0/16"))
        );

        let expr = v
            .pointer("/affinity/nodeAffinity/requiredDuringSchedulingIgnoredDuringExecution/nodeSelectorTerms/0/matchExpressions/0")
            .unwrap();
        assert_eq!(expr, &json!({"key": "liqo.io/type", "operator": "DoesNotExist"}));
    }

    #[test]
    fn install_reads_values_from_stdin() {
        let cmd = cilium().install_cmd().unwrap();
        assert_eq!(
            cmd.to_string(),
            "cilium install --kubeconfig out/kubeconfigs/a.yaml --version 1.18.6 --values -"
        );

        let piped: Value = serde_yaml::from_str(cmd.get_stdin().unwrap()).unwrap();
        assert_eq!(piped, values("10.42.0.0/16"));
    }
}
