use crate::cache::{Cache, Configuration};
use crate::cluster::FormationConfig;
use crate::core::{Address, GridError, Transport};
use dashmap::DashMap;
use itertools::Itertools;
use std::sync::Arc;
use tracing::{debug, info};

/// Owns the caches and configuration templates of one node. Remote commands reach local state
/// through the manager handed to them in their
/// [`InvocationContext`](crate::commands::InvocationContext).
pub struct CacheManager {
  transport: Arc<dyn Transport>,
  default_config: Configuration,
  formation: FormationConfig,
  configurations: DashMap<String, Configuration>,
  caches: DashMap<String, Arc<Cache>>,
}
impl CacheManager {
  pub fn new(
    transport: Arc<dyn Transport>,
    default_config: Configuration,
    formation: FormationConfig,
  ) -> Arc<CacheManager> {
    Arc::new(CacheManager {
      transport: transport,
      default_config: default_config,
      formation: formation,
      configurations: DashMap::new(),
      caches: DashMap::new(),
    })
  }

  pub fn address(&self) -> Address {
    self.transport.address()
  }

  pub fn transport(&self) -> &Arc<dyn Transport> {
    &self.transport
  }

  pub fn formation_config(&self) -> &FormationConfig {
    &self.formation
  }

  /// The template defined under `name`, if any.
  pub fn cache_configuration(&self, name: &str) -> Option<Configuration> {
    self.configurations.get(name).map(|c| c.clone())
  }

  /// Defines (or redefines) a template. Caches already running keep the configuration they
  /// started with.
  pub fn define_configuration(&self, name: &str, config: Configuration) -> Configuration {
    debug!(name, mode = ?config.cache_mode, "defining configuration");
    self.configurations.insert(name.to_string(), config.clone());
    config
  }

  /// Returns the named cache, starting it with its template (or the default configuration) on
  /// first access.
  pub fn get_cache(&self, name: &str) -> Arc<Cache> {
    self
      .caches
      .entry(name.to_string())
      .or_insert_with(|| {
        let config = self.cache_configuration(name).unwrap_or_else(|| self.default_config.clone());
        Cache::start(name.to_string(), config, self.transport.clone())
      })
      .clone()
  }

  /// Returns the named cache only if it is already running.
  pub fn existing_cache(&self, name: &str) -> Result<Arc<Cache>, GridError> {
    self
      .caches
      .get(name)
      .map(|c| c.clone())
      .ok_or_else(|| GridError::CacheNotFound(name.to_string()))
  }

  pub fn is_running(&self, name: &str) -> bool {
    self.caches.contains_key(name)
  }

  pub fn cache_names(&self) -> Vec<String> {
    self.caches.iter().map(|c| c.key().clone()).sorted().collect()
  }

  pub fn stop(&self) {
    for cache in self.caches.iter() {
      cache.stop();
    }
    self.caches.clear();
    info!(address = %self.address(), "cache manager stopped");
  }
}
