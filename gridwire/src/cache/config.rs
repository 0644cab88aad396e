use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a cache shares its entries with the rest of the cluster.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum CacheMode {
  Local,
  ReplicatedSync,
  ReplicatedAsync,
  DistributedSync,
  DistributedAsync,
}
impl CacheMode {
  pub fn is_clustered(&self) -> bool {
    !matches!(self, CacheMode::Local)
  }

  pub fn is_synchronous(&self) -> bool {
    matches!(self, CacheMode::ReplicatedSync | CacheMode::DistributedSync)
  }
}

/// A resolved cache configuration. Built with [`ConfigurationBuilder`].
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Configuration {
  /// default: `CacheMode::Local`
  pub cache_mode: CacheMode,
  /// The number of owners of each entry in distributed modes. Entries are written to every member
  /// regardless, since placement is not decided here.
  ///
  /// default: `2`
  pub num_owners: u32,
  /// Whether a joining member pulls existing entries from the others.
  ///
  /// default: `true`
  pub fetch_in_memory_state: bool,
  /// When set, writes do not consult other members to produce the previous value.
  ///
  /// default: `false`
  pub unreliable_return_values: bool,
  /// How long an entry lives after being written.
  ///
  /// default: `None`
  pub lifespan: Option<Duration>,
  /// How long an entry lives without being read or written.
  ///
  /// default: `None`
  pub max_idle: Option<Duration>,
  /// How often the reaper purges expired entries.
  ///
  /// default: `60 seconds`
  pub wake_up_interval: Duration,
  /// Whether a reaper task runs while the cache is started.
  ///
  /// default: `false`
  pub reaper_enabled: bool,
  /// Timeout for synchronous replication of writes.
  ///
  /// default: `15 seconds`
  pub replication_timeout: Duration,
}
impl Default for Configuration {
  fn default() -> Self {
    Configuration {
      cache_mode: CacheMode::Local,
      num_owners: 2,
      fetch_in_memory_state: true,
      unreliable_return_values: false,
      lifespan: None,
      max_idle: None,
      wake_up_interval: Duration::from_secs(60),
      reaper_enabled: false,
      replication_timeout: Duration::from_secs(15),
    }
  }
}
impl Configuration {
  /// The configuration given to caches created on the cluster without a named template:
  /// distributed and synchronous with two owners, entries expiring after two minutes.
  pub fn temporary_default() -> Configuration {
    ConfigurationBuilder::new()
      .cache_mode(CacheMode::DistributedSync)
      .num_owners(2)
      .fetch_in_memory_state(false)
      .unreliable_return_values(true)
      .lifespan(Duration::from_secs(120))
      .max_idle(Duration::from_secs(120))
      .wake_up_interval(Duration::from_secs(30))
      .enable_reaper()
      .build()
  }
}

pub struct ConfigurationBuilder {
  config: Configuration,
}
impl ConfigurationBuilder {
  pub fn new() -> ConfigurationBuilder {
    ConfigurationBuilder {
      config: Configuration::default(),
    }
  }

  pub fn read(config: &Configuration) -> ConfigurationBuilder {
    ConfigurationBuilder {
      config: config.clone(),
    }
  }

  pub fn cache_mode(mut self, mode: CacheMode) -> Self {
    self.config.cache_mode = mode;
    self
  }

  pub fn num_owners(mut self, owners: u32) -> Self {
    self.config.num_owners = owners;
    self
  }

  pub fn fetch_in_memory_state(mut self, fetch: bool) -> Self {
    self.config.fetch_in_memory_state = fetch;
    self
  }

  pub fn unreliable_return_values(mut self, unreliable: bool) -> Self {
    self.config.unreliable_return_values = unreliable;
    self
  }

  pub fn lifespan(mut self, lifespan: Duration) -> Self {
    self.config.lifespan = Some(lifespan);
    self
  }

  pub fn max_idle(mut self, max_idle: Duration) -> Self {
    self.config.max_idle = Some(max_idle);
    self
  }

  pub fn wake_up_interval(mut self, interval: Duration) -> Self {
    self.config.wake_up_interval = interval;
    self
  }

  pub fn enable_reaper(mut self) -> Self {
    self.config.reaper_enabled = true;
    self
  }

  pub fn replication_timeout(mut self, timeout: Duration) -> Self {
    self.config.replication_timeout = timeout;
    self
  }

  pub fn build(self) -> Configuration {
    self.config
  }
}
impl Default for ConfigurationBuilder {
  fn default() -> Self {
    Self::new()
  }
}

#[test]
fn test_temporary_default() {
  let config = Configuration::temporary_default();
  assert_eq!(config.cache_mode, CacheMode::DistributedSync);
  assert!(config.cache_mode.is_clustered() && config.cache_mode.is_synchronous());
  assert_eq!(config.lifespan, Some(Duration::from_secs(120)));
  assert_eq!(config.wake_up_interval, Duration::from_secs(30));
  assert!(config.reaper_enabled && config.unreliable_return_values && !config.fetch_in_memory_state);
  let local = ConfigurationBuilder::read(&config).cache_mode(CacheMode::Local).build();
  assert!(!local.cache_mode.is_clustered());
  assert_eq!(local.num_owners, 2);
}
