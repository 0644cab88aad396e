use crate::cache::Configuration;
use crate::commands::{ClusteredGetCommand, Command, PutKeyValueCommand, RemoveCommand};
use crate::core::{FirstValueFilter, GridError, Param, ResponseMode, RpcOptions, Transport};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Per-invocation modifiers for cache operations.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize)]
pub enum Flag {
  /// Do not acquire a lock on the key.
  SkipLocking,
  /// Replicate the write without waiting for other members, whatever the cache mode.
  ForceAsynchronous,
  /// Never ask other members for a value missing locally.
  SkipRemoteLookup,
  /// Apply the operation on this member only.
  CacheModeLocal,
  /// The caller does not need the previous value, locally or from the members it writes to.
  IgnoreReturnValues,
}

struct Entry {
  value: Param,
  created: Instant,
  touched: Instant,
}
impl Entry {
  fn new(value: Param) -> Entry {
    let now = Instant::now();
    Entry {
      value: value,
      created: now,
      touched: now,
    }
  }

  fn expired(&self, config: &Configuration, now: Instant) -> bool {
    config.lifespan.map_or(false, |l| now.duration_since(self.created) > l)
      || config.max_idle.map_or(false, |m| now.duration_since(self.touched) > m)
  }
}

/// A named key/value store on one member, replicating its writes to the other members of the
/// cluster according to its [`Configuration`].
pub struct Cache {
  name: String,
  config: Configuration,
  entries: DashMap<Param, Entry>,
  transport: Arc<dyn Transport>,
  reaper: Mutex<Option<JoinHandle<()>>>,
}
impl Cache {
  pub(crate) fn start(
    name: String,
    config: Configuration,
    transport: Arc<dyn Transport>,
  ) -> Arc<Cache> {
    let cache = Arc::new(Cache {
      name: name,
      config: config,
      entries: DashMap::new(),
      transport: transport,
      reaper: Mutex::new(None),
    });
    if cache.config.reaper_enabled {
      match tokio::runtime::Handle::try_current() {
        Ok(rt) => {
          let hdl = rt.spawn(reap(Arc::downgrade(&cache), cache.config.wake_up_interval));
          *cache.reaper.lock() = Some(hdl);
        }
        Err(_) => warn!(cache = %cache.name, "no runtime to run the reaper on, expiry is lazy only"),
      }
    }
    debug!(cache = %cache.name, mode = ?cache.config.cache_mode, "started cache");
    cache
  }

  pub(crate) fn stop(&self) {
    if let Some(hdl) = self.reaper.lock().take() {
      hdl.abort();
    }
    self.entries.clear();
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn configuration(&self) -> &Configuration {
    &self.config
  }

  /// Stores `value`, replicating the write to the cluster. Returns the previous value, which may
  /// come from another member when it is missing here and return values are reliable.
  pub async fn put(
    &self,
    key: Param,
    value: Param,
    flags: &[Flag],
  ) -> Result<Option<Param>, GridError> {
    let mut previous = None;
    if !flags.contains(&Flag::IgnoreReturnValues) {
      previous = self.get_local(&key);
      if previous.is_none() && !self.config.unreliable_return_values && self.remote_lookup(flags) {
        previous = self.get_remote(&key).await?;
      }
    }
    self.put_local(key.clone(), value.clone());
    let cmd = PutKeyValueCommand::new(self.name.clone(), key, value, flags.to_vec());
    self.replicate(Command::Put(cmd), flags).await?;
    Ok(previous)
  }

  pub async fn get(&self, key: &Param, flags: &[Flag]) -> Result<Option<Param>, GridError> {
    match self.get_local(key) {
      Some(v) => Ok(Some(v)),
      None if self.remote_lookup(flags) => self.get_remote(key).await,
      None => Ok(None),
    }
  }

  pub async fn remove(&self, key: &Param, flags: &[Flag]) -> Result<Option<Param>, GridError> {
    let previous = self.remove_local(key).filter(|_| !flags.contains(&Flag::IgnoreReturnValues));
    let cmd = RemoveCommand::new(self.name.clone(), key.clone(), flags.to_vec());
    self.replicate(Command::Remove(cmd), flags).await?;
    Ok(previous)
  }

  pub fn contains_key(&self, key: &Param) -> bool {
    let now = Instant::now();
    self.entries.get(key).map_or(false, |e| !e.expired(&self.config, now))
  }

  pub fn size(&self) -> usize {
    let now = Instant::now();
    self.entries.iter().filter(|e| !e.expired(&self.config, now)).count()
  }

  pub fn keys(&self) -> Vec<Param> {
    let now = Instant::now();
    self
      .entries
      .iter()
      .filter(|e| !e.expired(&self.config, now))
      .map(|e| e.key().clone())
      .collect()
  }

  pub(crate) fn put_local(&self, key: Param, value: Param) -> Option<Param> {
    let now = Instant::now();
    self
      .entries
      .insert(key, Entry::new(value))
      .filter(|old| !old.expired(&self.config, now))
      .map(|old| old.value)
  }

  pub(crate) fn get_local(&self, key: &Param) -> Option<Param> {
    let now = Instant::now();
    {
      let mut entry = self.entries.get_mut(key)?;
      if !entry.expired(&self.config, now) {
        entry.touched = now;
        return Some(entry.value.clone());
      }
    }
    self.entries.remove_if(key, |_, e| e.expired(&self.config, now));
    None
  }

  pub(crate) fn remove_local(&self, key: &Param) -> Option<Param> {
    let now = Instant::now();
    self
      .entries
      .remove(key)
      .filter(|(_, old)| !old.expired(&self.config, now))
      .map(|(_, old)| old.value)
  }

  /// Drops every expired entry, returning how many were dropped.
  pub fn purge_expired(&self) -> usize {
    let now = Instant::now();
    let mut purged = 0;
    self.entries.retain(|_, e| {
      let expired = e.expired(&self.config, now);
      if expired {
        purged += 1;
      }
      !expired
    });
    purged
  }

  fn remote_lookup(&self, flags: &[Flag]) -> bool {
    self.config.cache_mode.is_clustered()
      && !flags.contains(&Flag::SkipRemoteLookup)
      && !flags.contains(&Flag::CacheModeLocal)
  }

  async fn get_remote(&self, key: &Param) -> Result<Option<Param>, GridError> {
    let cmd = Command::ClusteredGet(ClusteredGetCommand::new(self.name.clone(), key.clone()));
    let opts = RpcOptions::new(ResponseMode::SyncWaitFiltered, self.config.replication_timeout)
      .filter(Box::new(FirstValueFilter::default()));
    let responses = self.transport.invoke(None, &cmd, opts).await?;
    Ok(responses.values().filter_map(|r| r.value()).find(|v| !v.is_null()).cloned())
  }

  async fn replicate(&self, cmd: Command, flags: &[Flag]) -> Result<(), GridError> {
    if !self.config.cache_mode.is_clustered() || flags.contains(&Flag::CacheModeLocal) {
      return Ok(());
    }
    let mode = if flags.contains(&Flag::ForceAsynchronous) || !self.config.cache_mode.is_synchronous()
    {
      ResponseMode::Async
    } else {
      ResponseMode::SyncWaitAll
    };
    trace!(cache = %self.name, command_id = cmd.command_id(), ?mode, "replicating");
    self.transport.invoke(None, &cmd, RpcOptions::new(mode, self.config.replication_timeout)).await?;
    Ok(())
  }
}

async fn reap(cache: Weak<Cache>, interval: std::time::Duration) {
  loop {
    tokio::time::sleep(interval).await;
    match cache.upgrade() {
      Some(cache) => {
        let purged = cache.purge_expired();
        if purged > 0 {
          debug!(cache = %cache.name, purged, "reaper purged expired entries");
        }
      }
      None => break,
    }
  }
}
