pub mod destroy;
pub mod setup;
pub mod workloads;
