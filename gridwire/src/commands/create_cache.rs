use crate::cache::{CacheManager, Configuration};
use crate::cluster::FormationBarrier;
use crate::commands::{BuiltinCommand, InvocationContext, ParamReader, ReplicableCommand};
use crate::core::{GridError, Param};
use async_trait::async_trait;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// Defines and starts a cache on the receiving member, optionally waiting for the cluster to
/// form around it.
///
/// When `start` is set, `perform` only returns once `expected_size` members are in the view and
/// have seen each other's markers in the new cache, or once the
/// [`FormationBarrier`](crate::cluster::FormationBarrier) gives up on the latter.
pub struct CreateCacheCommand {
  owner: Option<String>,
  cache_name: String,
  config_name: Option<String>,
  start: bool,
  expected_size: usize,
  manager: Option<Weak<CacheManager>>,
}
impl CreateCacheCommand {
  pub fn new(
    owner: String,
    cache_name: String,
    config_name: Option<String>,
    start: bool,
    expected_size: usize,
  ) -> Self {
    CreateCacheCommand {
      owner: Some(owner),
      cache_name: cache_name,
      config_name: config_name,
      start: start,
      expected_size: expected_size,
      manager: None,
    }
  }

  /// A command with no parameters yet, for registry factories.
  pub fn empty(owner: Option<String>) -> Self {
    CreateCacheCommand {
      owner: owner,
      cache_name: String::new(),
      config_name: None,
      start: false,
      expected_size: 0,
      manager: None,
    }
  }

  pub fn init(&mut self, manager: &Arc<CacheManager>) {
    self.manager = Some(Arc::downgrade(manager));
  }

  pub fn cache_name(&self) -> &str {
    &self.cache_name
  }

  pub fn expected_size(&self) -> usize {
    self.expected_size
  }
}
#[async_trait]
impl ReplicableCommand for CreateCacheCommand {
  const COMMAND_ID: u8 = BuiltinCommand::CreateCache as u8;

  fn origin(&self) -> Option<&str> {
    self.owner.as_deref()
  }

  fn parameters(&self) -> Vec<Param> {
    vec![
      Param::Str(self.cache_name.clone()),
      Param::from(self.config_name.clone()),
      Param::Bool(self.start),
      Param::Int(self.expected_size as i64),
    ]
  }

  fn set_parameters(&mut self, command_id: u8, params: Vec<Param>) -> Result<(), GridError> {
    let mut reader = ParamReader::new(Self::COMMAND_ID, command_id, params, 4)?;
    self.cache_name = reader.string()?;
    self.config_name = reader.opt_string()?;
    self.start = reader.boolean()?;
    self.expected_size = reader.size()?;
    Ok(())
  }

  fn can_block(&self) -> bool {
    true
  }

  async fn perform(&self, _ctx: &InvocationContext) -> Result<Param, GridError> {
    let manager = self
      .manager
      .as_ref()
      .and_then(Weak::upgrade)
      .ok_or(GridError::NoInvocationContext)?;
    let template = self.config_name.as_deref().and_then(|n| manager.cache_configuration(n));
    let config = match template {
      Some(config) => config,
      None => {
        debug!(cache = %self.cache_name, "using the temporary default configuration");
        Configuration::temporary_default()
      }
    };
    manager.define_configuration(&self.cache_name, config);
    let cache = manager.get_cache(&self.cache_name);
    if self.start {
      let barrier = FormationBarrier::new(manager.formation_config().clone());
      let outcome = barrier
        .await_formation(&cache, manager.transport().as_ref(), self.expected_size)
        .await?;
      info!(
        cache = %self.cache_name,
        converged = outcome.converged,
        rounds = outcome.rounds_used,
        "cluster formed"
      );
    }
    debug!(cache = %self.cache_name, "defined and started cache");
    Ok(Param::Bool(true))
  }
}
impl PartialEq for CreateCacheCommand {
  fn eq(&self, other: &Self) -> bool {
    self.owner == other.owner
      && self.cache_name == other.cache_name
      && self.config_name == other.config_name
      && self.start == other.start
      && self.expected_size == other.expected_size
  }
}
impl Eq for CreateCacheCommand {}
impl Hash for CreateCacheCommand {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.owner.hash(state);
    self.cache_name.hash(state);
    self.config_name.hash(state);
    self.start.hash(state);
    self.expected_size.hash(state);
  }
}
impl Clone for CreateCacheCommand {
  fn clone(&self) -> Self {
    CreateCacheCommand {
      owner: self.owner.clone(),
      cache_name: self.cache_name.clone(),
      config_name: self.config_name.clone(),
      start: self.start,
      expected_size: self.expected_size,
      manager: self.manager.clone(),
    }
  }
}
impl fmt::Debug for CreateCacheCommand {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CreateCacheCommand")
      .field("owner", &self.owner)
      .field("cache_name", &self.cache_name)
      .field("config_name", &self.config_name)
      .field("start", &self.start)
      .field("expected_size", &self.expected_size)
      .field("has_manager", &self.manager.is_some())
      .finish()
  }
}

#[test]
fn test_parameters_round_trip() {
  let cmd = CreateCacheCommand::new("___defaultcache".to_string(), "sessions".to_string(), None, true, 2);
  let mut decoded = CreateCacheCommand::empty(Some("___defaultcache".to_string()));
  decoded.set_parameters(29, cmd.parameters()).unwrap();
  assert_eq!(cmd, decoded);
  assert!(decoded.can_block() && decoded.is_return_value_expected());
  let mut wrong = CreateCacheCommand::empty(None);
  assert!(matches!(
    wrong.set_parameters(8, cmd.parameters()),
    Err(GridError::ProtocolMismatch { expected: 29, actual: 8 })
  ));
}
