use crate::cache::Flag;
use crate::commands::{BuiltinCommand, InvocationContext, ParamReader, ReplicableCommand};
use crate::core::{GridError, Param};
use async_trait::async_trait;

/// Stores an entry on the receiving member. Broadcast by a cache to replicate a local write.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PutKeyValueCommand {
  cache_name: Option<String>,
  key: Param,
  value: Param,
  flags: Vec<Flag>,
}
impl PutKeyValueCommand {
  pub fn new(cache_name: String, key: Param, value: Param, flags: Vec<Flag>) -> Self {
    PutKeyValueCommand {
      cache_name: Some(cache_name),
      key: key,
      value: value,
      flags: flags,
    }
  }

  pub fn empty(cache_name: Option<String>) -> Self {
    PutKeyValueCommand {
      cache_name: cache_name,
      key: Param::Null,
      value: Param::Null,
      flags: vec![],
    }
  }

  pub fn key(&self) -> &Param {
    &self.key
  }

  pub fn value(&self) -> &Param {
    &self.value
  }

  pub fn flags(&self) -> &[Flag] {
    &self.flags
  }
}
#[async_trait]
impl ReplicableCommand for PutKeyValueCommand {
  const COMMAND_ID: u8 = BuiltinCommand::PutKeyValue as u8;

  fn origin(&self) -> Option<&str> {
    self.cache_name.as_deref()
  }

  fn parameters(&self) -> Vec<Param> {
    vec![self.key.clone(), self.value.clone(), Param::Flags(self.flags.clone())]
  }

  fn set_parameters(&mut self, command_id: u8, params: Vec<Param>) -> Result<(), GridError> {
    let mut reader = ParamReader::new(Self::COMMAND_ID, command_id, params, 3)?;
    self.key = reader.any()?;
    self.value = reader.any()?;
    self.flags = reader.flags()?;
    Ok(())
  }

  fn is_return_value_expected(&self) -> bool {
    !self.flags.contains(&Flag::IgnoreReturnValues)
  }

  async fn perform(&self, ctx: &InvocationContext) -> Result<Param, GridError> {
    let cache = ctx.manager.existing_cache(self.cache_name.as_deref().unwrap_or_default())?;
    let previous = cache.put_local(self.key.clone(), self.value.clone());
    Ok(previous.unwrap_or(Param::Null))
  }
}

/// Removes an entry on the receiving member.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct RemoveCommand {
  cache_name: Option<String>,
  key: Param,
  flags: Vec<Flag>,
}
impl RemoveCommand {
  pub fn new(cache_name: String, key: Param, flags: Vec<Flag>) -> Self {
    RemoveCommand {
      cache_name: Some(cache_name),
      key: key,
      flags: flags,
    }
  }

  pub fn empty(cache_name: Option<String>) -> Self {
    RemoveCommand {
      cache_name: cache_name,
      key: Param::Null,
      flags: vec![],
    }
  }
}
#[async_trait]
impl ReplicableCommand for RemoveCommand {
  const COMMAND_ID: u8 = BuiltinCommand::Remove as u8;

  fn origin(&self) -> Option<&str> {
    self.cache_name.as_deref()
  }

  fn parameters(&self) -> Vec<Param> {
    vec![self.key.clone(), Param::Flags(self.flags.clone())]
  }

  fn set_parameters(&mut self, command_id: u8, params: Vec<Param>) -> Result<(), GridError> {
    let mut reader = ParamReader::new(Self::COMMAND_ID, command_id, params, 2)?;
    self.key = reader.any()?;
    self.flags = reader.flags()?;
    Ok(())
  }

  fn is_return_value_expected(&self) -> bool {
    !self.flags.contains(&Flag::IgnoreReturnValues)
  }

  async fn perform(&self, ctx: &InvocationContext) -> Result<Param, GridError> {
    let cache = ctx.manager.existing_cache(self.cache_name.as_deref().unwrap_or_default())?;
    Ok(cache.remove_local(&self.key).unwrap_or(Param::Null))
  }
}
