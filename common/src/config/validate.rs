//! Structural validation of the merged configuration document.
//!
//! Walks the untyped YAML tree and records every offending field instead of stopping at the
//! first one, so a user sees all mistakes in a single run.

use std::net::IpAddr;

use k8s_openapi::api::core::v1::PodSpec;
use lazy_static::lazy_static;
use regex::Regex;
use serde_yaml::{Mapping, Value};

use super::{CniKind, LiqoVersion, Runtime};
use crate::error::FieldError;

lazy_static! {
    static ref DNS_LABEL: Regex = Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap();
}

const ROOT_FIELDS: &[&str] = &["default", "clusters", "tools"];
const COMMON_FIELDS: &[&str] = &["runtime", "cni", "nodes", "cluster_cidr", "service_cidr"];
const CLUSTER_FIELDS: &[&str] = &[
    "name",
    "runtime",
    "cni",
    "nodes",
    "cluster_cidr",
    "service_cidr",
    "namespaces",
];
const NAMESPACE_FIELDS: &[&str] = &["name", "deployments"];
const DEPLOYMENT_FIELDS: &[&str] = &["name", "replicas", "pod_spec"];
const TOOLS_FIELDS: &[&str] = &["liqo"];
const LIQO_FIELDS: &[&str] = &["installations", "peerings"];
const INSTALLATION_FIELDS: &[&str] = &["cluster", "version"];

const MAX_NAME_LEN: usize = 63;

/// Returns every structural error in `doc`; an empty list means the document can be bound.
pub fn validate(doc: &Value) -> Vec<FieldError> {
    let mut v = Validator::default();
    let Some(root) = v.mapping("root", doc) else {
        return v.errors;
    };
    v.known_fields("", root, ROOT_FIELDS);

    if let Some(default) = root.get("default") {
        if let Some(default) = v.mapping("default", default) {
            v.known_fields("default", default, COMMON_FIELDS);
            v.common_fields("default", default, false);
        }
    }

    match root.get("clusters") {
        Some(clusters) => {
            if let Some(clusters) = v.sequence("clusters", clusters) {
                for (i, cluster) in clusters.iter().enumerate() {
                    v.cluster(&format!("clusters.{i}"), cluster);
                }
            }
        }
        None => v.push("clusters", "field required"),
    }

    if let Some(tools) = root.get("tools") {
        v.tools("tools", tools);
    }

    v.errors
}

#[derive(Default)]
struct Validator {
    errors: Vec<FieldError>,
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_owned()
    } else {
        format!("{path}.{key}")
    }
}

impl Validator {
    fn push(&mut self, path: &str, message: impl Into<String>) {
        self.errors.push(FieldError::new(path, message));
    }

    fn mapping<'a>(&mut self, path: &str, value: &'a Value) -> Option<&'a Mapping> {
        let m = value.as_mapping();
        if m.is_none() {
            self.push(path, "value is not a valid mapping");
        }
        m
    }

    fn sequence<'a>(&mut self, path: &str, value: &'a Value) -> Option<&'a Vec<Value>> {
        let s = value.as_sequence();
        if s.is_none() {
            self.push(path, "value is not a valid list");
        }
        s
    }

    fn string<'a>(&mut self, path: &str, value: &'a Value) -> Option<&'a str> {
        let s = value.as_str();
        if s.is_none() {
            self.push(path, "value is not a valid string");
        }
        s
    }

    fn known_fields(&mut self, path: &str, map: &Mapping, allowed: &[&str]) {
        for key in map.keys() {
            match key.as_str() {
                Some(k) if allowed.contains(&k) => {}
                Some(k) => self.push(&join(path, k), "extra fields not permitted"),
                None => self.push(path, format!("field names must be strings, got {key:?}")),
            }
        }
    }

    fn required<'a>(&mut self, path: &str, map: &'a Mapping, key: &str) -> Option<&'a Value> {
        let value = map.get(key);
        if value.is_none() {
            self.push(&join(path, key), "field required");
        }
        value
    }

    /// Integers must also fit the type the field binds to.
    fn integer(&mut self, path: &str, value: &Value, min: i64, max: i64) {
        match value.as_i64() {
            Some(n) if n < min => self.push(
                path,
                format!("ensure this value is greater than or equal to {min}"),
            ),
            Some(n) if n > max => self.push(
                path,
                format!("ensure this value is less than or equal to {max}"),
            ),
            Some(_) => {}
            None if value.as_u64().is_some() => self.push(
                path,
                format!("ensure this value is less than or equal to {max}"),
            ),
            None => self.push(path, "value is not a valid integer"),
        }
    }

    fn name(&mut self, path: &str, value: &Value) {
        let Some(name) = self.string(path, value) else {
            return;
        };
        if name.len() > MAX_NAME_LEN || !DNS_LABEL.is_match(name) {
            self.push(
                path,
                format!("'{name}' must be a lowercase RFC 1123 label of at most {MAX_NAME_LEN} characters"),
            );
        }
    }

    fn choice(&mut self, path: &str, value: &Value, names: &[&str], known: impl Fn(&str) -> bool) {
        let Some(s) = self.string(path, value) else {
            return;
        };
        if !known(s) {
            let permitted = names
                .iter()
                .map(|n| format!("'{n}'"))
                .collect::<Vec<_>>()
                .join(", ");
            self.push(
                path,
                format!("value is not a valid enumeration member; permitted: {permitted}"),
            );
        }
    }

    fn cidr(&mut self, path: &str, value: &Value) {
        let Some(s) = self.string(path, value) else {
            return;
        };
        if let Err(msg) = check_cidr(s) {
            self.push(path, msg);
        }
    }

    /// `required` is set for cluster entries, where the merge has already filled these in.
    fn common_fields(&mut self, path: &str, map: &Mapping, required: bool) {
        let runtimes: Vec<&str> = Runtime::ALL.iter().map(Runtime::as_str).collect();
        let cnis: Vec<&str> = CniKind::ALL.iter().map(CniKind::as_str).collect();

        for field in COMMON_FIELDS {
            let field_path = join(path, field);
            let value = if required {
                self.required(path, map, field)
            } else {
                map.get(*field)
            };
            let Some(value) = value else { continue };

            match *field {
                "runtime" => self.choice(&field_path, value, &runtimes, |s| {
                    Runtime::from_name(s).is_some()
                }),
                "cni" => self.choice(&field_path, value, &cnis, |s| CniKind::from_name(s).is_some()),
                "nodes" => self.integer(&field_path, value, 1, u32::MAX.into()),
                _ => self.cidr(&field_path, value),
            }
        }
    }

    fn cluster(&mut self, path: &str, value: &Value) {
        let Some(cluster) = self.mapping(path, value) else {
            return;
        };
        self.known_fields(path, cluster, CLUSTER_FIELDS);

        if let Some(name) = self.required(path, cluster, "name") {
            self.name(&join(path, "name"), name);
        }
        self.common_fields(path, cluster, true);

        let Some(namespaces) = cluster.get("namespaces") else {
            return;
        };
        let ns_path = join(path, "namespaces");
        let Some(namespaces) = self.sequence(&ns_path, namespaces) else {
            return;
        };
        for (i, ns) in namespaces.iter().enumerate() {
            self.namespace(&format!("{ns_path}.{i}"), ns);
        }
    }

    fn namespace(&mut self, path: &str, value: &Value) {
        let Some(ns) = self.mapping(path, value) else {
            return;
        };
        self.known_fields(path, ns, NAMESPACE_FIELDS);
        if let Some(name) = self.required(path, ns, "name") {
            self.name(&join(path, "name"), name);
        }

        let Some(deployments) = ns.get("deployments") else {
            return;
        };
        let d_path = join(path, "deployments");
        let Some(deployments) = self.sequence(&d_path, deployments) else {
            return;
        };
        for (i, d) in deployments.iter().enumerate() {
            self.deployment(&format!("{d_path}.{i}"), d);
        }
    }

    fn deployment(&mut self, path: &str, value: &Value) {
        let Some(d) = self.mapping(path, value) else {
            return;
        };
        self.known_fields(path, d, DEPLOYMENT_FIELDS);
        if let Some(name) = self.required(path, d, "name") {
            self.name(&join(path, "name"), name);
        }
        if let Some(replicas) = d.get("replicas") {
            self.integer(&join(path, "replicas"), replicas, 0, i32::MAX.into());
        }
        if let Some(pod_spec) = self.required(path, d, "pod_spec") {
            if let Err(err) = serde_yaml::from_value::<PodSpec>(pod_spec.clone()) {
                self.push(&join(path, "pod_spec"), format!("invalid pod spec: {err}"));
            }
        }
    }

    fn tools(&mut self, path: &str, value: &Value) {
        let Some(tools) = self.mapping(path, value) else {
            return;
        };
        self.known_fields(path, tools, TOOLS_FIELDS);

        let liqo_path = join(path, "liqo");
        let Some(liqo) = tools.get("liqo").filter(|v| !v.is_null()) else {
            return;
        };
        let Some(liqo) = self.mapping(&liqo_path, liqo) else {
            return;
        };
        self.known_fields(&liqo_path, liqo, LIQO_FIELDS);

        if let Some(installations) = liqo.get("installations") {
            let i_path = join(&liqo_path, "installations");
            if let Some(installations) = self.sequence(&i_path, installations) {
                for (i, install) in installations.iter().enumerate() {
                    self.installation(&format!("{i_path}.{i}"), install);
                }
            }
        }

        if let Some(peerings) = liqo.get("peerings") {
            let p_path = join(&liqo_path, "peerings");
            if let Some(peerings) = self.sequence(&p_path, peerings) {
                for (i, pair) in peerings.iter().enumerate() {
                    self.peering(&format!("{p_path}.{i}"), pair);
                }
            }
        }
    }

    fn installation(&mut self, path: &str, value: &Value) {
        let Some(install) = self.mapping(path, value) else {
            return;
        };
        self.known_fields(path, install, INSTALLATION_FIELDS);
        if let Some(cluster) = self.required(path, install, "cluster") {
            self.string(&join(path, "cluster"), cluster);
        }

        let version_path = join(path, "version");
        let Some(version) = install.get("version").filter(|v| !v.is_null()) else {
            return;
        };
        if let Some(version) = self.string(&version_path, version) {
            if let Err(msg) = version.parse::<LiqoVersion>() {
                self.push(&version_path, msg);
            }
        }
    }

    fn peering(&mut self, path: &str, value: &Value) {
        match value.as_sequence().map(Vec::as_slice) {
            Some([a, b]) => {
                self.string(&format!("{path}.0"), a);
                self.string(&format!("{path}.1"), b);
            }
            _ => self.push(path, "expected a pair of cluster names"),
        }
    }
}

/// Accepts `<ip>/<prefix>` where the prefix fits the address family.
pub fn check_cidr(s: &str) -> Result<(), String> {
    let Some((addr, prefix)) = s.split_once('/') else {
        return Err(format!("'{s}' is not a valid CIDR (expected <address>/<prefix>)"));
    };
    let addr: IpAddr = addr
        .parse()
        .map_err(|_| format!("'{s}' is not a valid CIDR (bad address)"))?;
    let prefix: u8 = prefix
        .parse()
        .map_err(|_| format!("'{s}' is not a valid CIDR (bad prefix length)"))?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    if prefix > max {
        return Err(format!("'{s}' is not a valid CIDR (prefix longer than {max})"));
    }
    Ok(())
}
