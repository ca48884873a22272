use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(Default, Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct ToolsConfig {
    pub liqo: Option<LiqoConfig>,
}

#[derive(Default, Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct LiqoConfig {
    pub installations: Vec<LiqoInstallation>,
    /// Ordered (local, remote) pairs; the remote side hosts the gateway server
    pub peerings: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LiqoInstallation {
    pub cluster: String,
    #[serde(default)]
    pub version: Option<LiqoVersion>,
}

/// Version pin for a Liqo installation.
///
/// `latest` defers to liqoctl's own default, a plain tag is passed through as
/// `--version`, and `<repo-url>@<revision>` installs from a specific source.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum LiqoVersion {
    Latest,
    Tag(String),
    Source { repo_url: String, revision: String },
}

impl LiqoVersion {
    pub fn repo_url(&self) -> Option<&str> {
        match self {
            LiqoVersion::Source { repo_url, .. } => Some(repo_url),
            _ => None,
        }
    }

    pub fn version(&self) -> Option<&str> {
        match self {
            LiqoVersion::Latest => None,
            LiqoVersion::Tag(tag) => Some(tag),
            LiqoVersion::Source { revision, .. } => Some(revision),
        }
    }
}

impl FromStr for LiqoVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("version must not be empty".to_owned());
        }
        if s == "latest" {
            return Ok(LiqoVersion::Latest);
        }

        match s.split('@').collect::<Vec<_>>()[..] {
            [tag] => Ok(LiqoVersion::Tag(tag.to_owned())),
            [repo, rev] if !repo.is_empty() && !rev.is_empty() => Ok(LiqoVersion::Source {
                repo_url: repo.to_owned(),
                revision: rev.to_owned(),
            }),
            [_, _] => Err(format!(
                "invalid version '{s}': expected '<repo-url>@<revision>'"
            )),
            _ => Err(format!(
                "invalid version '{s}': at most one '@' is allowed"
            )),
        }
    }
}

impl TryFrom<String> for LiqoVersion {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LiqoVersion> for String {
    fn from(value: LiqoVersion) -> Self {
        value.to_string()
    }
}

impl fmt::Display for LiqoVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiqoVersion::Latest => f.write_str("latest"),
            LiqoVersion::Tag(tag) => f.write_str(tag),
            LiqoVersion::Source { repo_url, revision } => write!(f, "{repo_url}@{revision}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_pin_splits_on_at() {
        let v: LiqoVersion = "https://github.com/liqotech/liqo.git@a1b2c3".parse().unwrap();
        assert_eq!(v.repo_url(), Some("https://github.com/liqotech/liqo.git"));
        assert_eq!(v.version(), Some("a1b2c3"));

        let v: LiqoVersion = "repo@rev".parse().unwrap();
        assert_eq!(
            v,
            LiqoVersion::Source {
                repo_url: "repo".into(),
                revision: "rev".into()
            }
        );
    }

    #[test]
    fn latest_yields_no_flags() {
        let v: LiqoVersion = "latest".parse().unwrap();
        assert_eq!(v.repo_url(), None);
        assert_eq!(v.version(), None);
    }

    #[test]
    fn plain_tag_is_only_a_version() {
        let v: LiqoVersion = "v1.0.0".parse().unwrap();
        assert_eq!(v.repo_url(), None);
        assert_eq!(v.version(), Some("v1.0.0"));
    }

    #[test]
    fn more_than_one_at_is_rejected() {
        assert!("a@b@c".parse::<LiqoVersion>().is_err());
        assert!("@rev".parse::<LiqoVersion>().is_err());
        assert!("repo@".parse::<LiqoVersion>().is_err());
        assert!("".parse::<LiqoVersion>().is_err());
    }

    #[test]
    fn absent_version_deserializes_to_none() {
        let install: LiqoInstallation = serde_yaml::from_str("cluster: a").unwrap();
        assert_eq!(install.version, None);

        let install: LiqoInstallation = serde_yaml::from_str("cluster: a\nversion: repo@rev").unwrap();
        assert_eq!(install.version.unwrap().to_string(), "repo@rev");
    }
}
