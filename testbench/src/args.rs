use std::path::PathBuf;

use clap::{ArgAction, Parser};

#[derive(Debug, Parser)]
#[command(name = "testbench")]
#[command(author, version, about = "Provision local multi-cluster Kubernetes test environments", long_about = None)]
pub struct Cli {
    /// Configuration file
    pub config: PathBuf,

    /// Verbose logging, stream the output of external commands
    #[arg(long, short, action = ArgAction::SetTrue)]
    pub verbose: bool,

    /// Directory for kubeconfigs and registry cache volumes
    #[arg(long, short, default_value = "out")]
    pub out_dir: PathBuf,

    /// Run a pull-through registry cache and point clusters at it
    #[arg(long, action = ArgAction::SetTrue)]
    pub registry_proxy: bool,

    /// Delete every configured cluster and exit
    #[arg(long, action = ArgAction::SetTrue)]
    pub destroy: bool,
}
