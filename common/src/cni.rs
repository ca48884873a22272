use std::path::PathBuf;

use tracing::info;

use crate::{config::CniKind, error::Result};

pub const INSTALL: [&str; 3] = [
    "Installing CNI",
    "Could not install CNI",
    "CNI installed",
];

/// The only cluster data a CNI installer gets to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CniTarget {
    pub kubeconfig: PathBuf,
    pub cidr: String,
}

#[async_trait::async_trait]
pub trait Cni: Send + Sync {
    fn kind(&self) -> CniKind;
    async fn install(&self, verbose: bool) -> Result<()>;
}

/// The plugin a runtime ships with. Nothing to install.
#[derive(Debug, Clone)]
pub struct DefaultCni {
    kind: CniKind,
}

impl DefaultCni {
    pub fn new(kind: CniKind) -> Self {
        Self { kind }
    }
}

#[async_trait::async_trait]
impl Cni for DefaultCni {
    fn kind(&self) -> CniKind {
        self.kind
    }

    async fn install(&self, _verbose: bool) -> Result<()> {
        info!("{} is the runtime default, nothing to install", self.kind);
        Ok(())
    }
}
