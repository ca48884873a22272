pub mod cache;
pub mod cluster;
pub mod cni;
pub mod command;
pub mod config;
pub mod docker;
pub mod error;
pub mod k8s;
pub mod tool;

pub use error::{Error, Result};

#[macro_export]
macro_rules! exit {
    ($err:expr, $($arg:tt)*) => {
        {
            tracing::error!($($arg)*);
            anyhow::bail!($err)
        }
    };
}
