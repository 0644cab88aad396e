//! Helpers for running several nodes in one process, as tests and demos do.

mod cluster;
mod failure_config;
mod logging;

#[rustfmt::skip]
pub use {
  cluster::local_cluster,
  cluster::LocalCluster,
  failure_config::FailureConfig,
  failure_config::FailureConfigMap,
  logging::init_logging,
  logging::DEFAULT_FILTER,
};
