use serde_yaml::{Mapping, Value};

use super::CommonConfig;

/// Cluster fields that fall back to the `default` block when a cluster omits them.
pub const INHERITABLE_FIELDS: [&str; 5] = ["runtime", "nodes", "cni", "cluster_cidr", "service_cidr"];

/// Copy inheritable fields from the effective defaults into every cluster entry that lacks them.
///
/// Operates on the untyped document and returns a new one; runs before validation so that
/// inherited values are checked exactly like explicit ones. Anything that is not shaped like
/// the expected mappings is left untouched for the validator to report.
pub fn merge_defaults(doc: &Value) -> Value {
    let mut doc = doc.clone();
    let Some(root) = doc.as_mapping_mut() else {
        return doc;
    };

    for key in ["default", "tools"] {
        if root.get(key).is_some_and(Value::is_null) {
            root.remove(key);
        }
    }

    let defaults = effective_defaults(root.get("default"));
    if let Some(Value::Sequence(clusters)) = root.get_mut("clusters") {
        for cluster in clusters.iter_mut().filter_map(Value::as_mapping_mut) {
            for field in INHERITABLE_FIELDS {
                if cluster.contains_key(field) {
                    continue;
                }
                if let Some(value) = defaults.get(field) {
                    cluster.insert(Value::String(field.to_owned()), value.clone());
                }
            }
        }
    }

    doc
}

/// Built-in defaults overlaid with whatever the document's `default` block sets.
fn effective_defaults(raw: Option<&Value>) -> Mapping {
    let mut defaults = match serde_yaml::to_value(CommonConfig::default()) {
        Ok(Value::Mapping(m)) => m,
        _ => Mapping::new(),
    };

    if let Some(Value::Mapping(raw)) = raw {
        for (k, v) in raw {
            defaults.insert(k.clone(), v.clone());
        }
    }
    defaults
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn missing_fields_come_from_defaults() {
        let merged = merge_defaults(&yaml(
            r#"
default:
  nodes: 2
  cni: cilium
  cluster_cidr: 10.1.0.0/16
clusters:
  - name: a
"#,
        ));

        let a = &merged["clusters"][0];
        assert_eq!(a["nodes"], yaml("2"));
        assert_eq!(a["cni"], yaml("cilium"));
        assert_eq!(a["cluster_cidr"], yaml("10.1.0.0/16"));
        assert_eq!(a["runtime"], yaml("k3d"));
        assert_eq!(a["service_cidr"], yaml("10.71.0.0/16"));
    }

    #[test]
    fn explicit_fields_are_kept() {
        let merged = merge_defaults(&yaml(
            r#"
default: {nodes: 2, runtime: kind}
clusters:
  - {name: a, nodes: 5, runtime: k3d}
"#,
        ));

        assert_eq!(merged["clusters"][0]["nodes"], yaml("5"));
        assert_eq!(merged["clusters"][0]["runtime"], yaml("k3d"));
    }

    #[test]
    fn invalid_defaults_are_copied_verbatim() {
        let merged = merge_defaults(&yaml("default: {nodes: many}\nclusters: [{name: a}]"));
        assert_eq!(merged["clusters"][0]["nodes"], yaml("many"));
    }

    #[test]
    fn input_is_not_mutated() {
        let doc = yaml("clusters: [{name: a}]");
        let before = doc.clone();
        let _ = merge_defaults(&doc);
        assert_eq!(doc, before);
    }

    #[test]
    fn malformed_shapes_pass_through() {
        let doc = yaml("clusters: not-a-list");
        assert_eq!(merge_defaults(&doc), doc);

        let merged = merge_defaults(&yaml("clusters: [42, {name: a}]"));
        assert_eq!(merged["clusters"][0], yaml("42"));
        assert_eq!(merged["clusters"][1]["nodes"], yaml("1"));
    }
}
