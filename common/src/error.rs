use std::{fmt, path::PathBuf};

use thiserror::Error;

use crate::config::{CniKind, Runtime};

/// A single structural problem found in the configuration document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Dotted location of the offending value, e.g. `clusters.1.nodes`
    pub path: String,
    pub message: String,
}

impl FieldError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Errors raised while turning a configuration file into a `RootConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("yaml syntax error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("configuration document must be a mapping")]
    NotAMapping,

    #[error("{} validation error(s) found", .0.len())]
    Schema(Vec<FieldError>),

    #[error("duplicate cluster name found: '{name}' (at clusters.{index})")]
    DuplicateCluster { name: String, index: usize },
}

impl ConfigError {
    /// Per-field messages for schema errors, a single line for anything else.
    pub fn lines(&self) -> Vec<String> {
        match self {
            Self::Schema(errors) => errors.iter().map(ToString::to_string).collect(),
            other => vec![other.to_string()],
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("cni '{cni}' is not supported by runtime '{runtime}' (cluster {cluster})")]
    UnsupportedCni {
        cluster: String,
        runtime: Runtime,
        cni: CniKind,
    },

    #[error("{tool} installation is not supported for cluster {cluster} (runtime '{runtime}')")]
    UnsupportedTool {
        tool: String,
        cluster: String,
        runtime: Runtime,
    },

    #[error("cluster '{0}' is not defined in the configuration")]
    UnknownCluster(String),

    #[error("command failed: {command}\n{output}")]
    Command { command: String, output: String },

    #[error("api server address not found for cluster {cluster}: no node matches '{selector}'")]
    ApiServerNotFound { cluster: String, selector: String },

    #[error("container {container} is not connected to network {network}")]
    ProxyNotAttached { container: String, network: String },

    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("watch error: {0}")]
    Wait(#[from] kube::runtime::wait::Error),

    #[error("kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error("could not fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("invalid manifest: {0}")]
    Manifest(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
