//! The local caches commands operate on.
//!
//! A [`CacheManager`] owns the caches of a node and the configuration templates they are started
//! with. Clustered caches replicate writes through the node's
//! [`Transport`](crate::core::Transport) by broadcasting commands; how entries are placed and
//! transferred between members is not modelled, every member holds every entry.

mod cache;
mod config;
mod manager;

#[rustfmt::skip]
pub use {
  cache::Cache,
  cache::Flag,
  config::CacheMode,
  config::Configuration,
  config::ConfigurationBuilder,
  manager::CacheManager,
};
