use crate::commands::{BuiltinCommand, InvocationContext, ParamReader, ReplicableCommand};
use crate::core::{GridError, Param};
use async_trait::async_trait;

/// Asks a member for its local copy of an entry. Answers `Null` when the member has none.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ClusteredGetCommand {
  cache_name: Option<String>,
  key: Param,
}
impl ClusteredGetCommand {
  pub fn new(cache_name: String, key: Param) -> Self {
    ClusteredGetCommand {
      cache_name: Some(cache_name),
      key: key,
    }
  }

  pub fn empty(cache_name: Option<String>) -> Self {
    ClusteredGetCommand {
      cache_name: cache_name,
      key: Param::Null,
    }
  }
}
#[async_trait]
impl ReplicableCommand for ClusteredGetCommand {
  const COMMAND_ID: u8 = BuiltinCommand::ClusteredGet as u8;

  fn origin(&self) -> Option<&str> {
    self.cache_name.as_deref()
  }

  fn parameters(&self) -> Vec<Param> {
    vec![self.key.clone()]
  }

  fn set_parameters(&mut self, command_id: u8, params: Vec<Param>) -> Result<(), GridError> {
    let mut reader = ParamReader::new(Self::COMMAND_ID, command_id, params, 1)?;
    self.key = reader.any()?;
    Ok(())
  }

  async fn perform(&self, ctx: &InvocationContext) -> Result<Param, GridError> {
    let cache = ctx.manager.existing_cache(self.cache_name.as_deref().unwrap_or_default())?;
    Ok(cache.get_local(&self.key).unwrap_or(Param::Null))
  }
}
