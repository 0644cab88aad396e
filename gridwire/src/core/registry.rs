use crate::commands::{
  ClusteredGetCommand, Command, CreateCacheCommand, PutKeyValueCommand, RemoveCommand,
  ReplicableCommand,
};
use crate::core::{GridError, Param, WireCommand};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Builds an empty command of one variant, scoped to the given cache. The registry fills in the
/// parameters afterwards.
pub type CommandFactory = fn(Option<String>) -> Command;

/// Maps command ids to the factories that reconstruct them on the receiving side.
///
/// Populated once through a [`RegistryBuilder`] at node startup and shared read-only afterwards.
pub struct CommandRegistry {
  factories: HashMap<u8, CommandFactory>,
}
impl CommandRegistry {
  pub fn builder() -> RegistryBuilder {
    RegistryBuilder {
      factories: HashMap::new(),
    }
  }

  /// A registry holding every command this crate ships with.
  pub fn builtin() -> Arc<CommandRegistry> {
    Self::builtin_builder().build()
  }

  /// The builtin commands, for callers who want to register more before building.
  pub fn builtin_builder() -> RegistryBuilder {
    let builtins: [(u8, CommandFactory); 4] = [
      (PutKeyValueCommand::COMMAND_ID, |o| Command::Put(PutKeyValueCommand::empty(o))),
      (RemoveCommand::COMMAND_ID, |o| Command::Remove(RemoveCommand::empty(o))),
      (ClusteredGetCommand::COMMAND_ID, |o| Command::ClusteredGet(ClusteredGetCommand::empty(o))),
      (CreateCacheCommand::COMMAND_ID, |o| Command::CreateCache(CreateCacheCommand::empty(o))),
    ];
    RegistryBuilder {
      factories: builtins.into_iter().collect(),
    }
  }

  pub fn contains(&self, id: u8) -> bool {
    self.factories.contains_key(&id)
  }

  /// Reconstructs a command from its id, scope and parameters.
  pub fn resolve(
    &self,
    id: u8,
    origin: Option<String>,
    params: Vec<Param>,
  ) -> Result<Command, GridError> {
    let factory = self.factories.get(&id).ok_or(GridError::UnknownCommandId(id))?;
    let mut command = factory(origin);
    command.set_parameters(id, params)?;
    Ok(command)
  }

  pub fn decode(&self, wire: WireCommand) -> Result<Command, GridError> {
    self.resolve(wire.command_id, wire.origin, wire.params)
  }
}

pub struct RegistryBuilder {
  factories: HashMap<u8, CommandFactory>,
}
impl RegistryBuilder {
  pub fn register(&mut self, id: u8, factory: CommandFactory) -> Result<&mut Self, GridError> {
    if self.factories.contains_key(&id) {
      return Err(GridError::DuplicateCommandId(id));
    }
    debug!(command_id = id, "registering command");
    self.factories.insert(id, factory);
    Ok(self)
  }

  pub fn build(self) -> Arc<CommandRegistry> {
    Arc::new(CommandRegistry {
      factories: self.factories,
    })
  }
}

#[test]
fn test_duplicate_registration() {
  let mut builder = CommandRegistry::builtin_builder();
  let result =
    builder.register(CreateCacheCommand::COMMAND_ID, |o| Command::CreateCache(CreateCacheCommand::empty(o)));
  assert!(matches!(result, Err(GridError::DuplicateCommandId(29))));
  let registry = builder.build();
  assert!(registry.contains(8) && registry.contains(10) && registry.contains(16) && registry.contains(29));
}

#[test]
fn test_unknown_id() {
  let registry = CommandRegistry::builder().build();
  match registry.resolve(29, None, vec![]) {
    Err(GridError::UnknownCommandId(29)) => {}
    other => panic!("expected UnknownCommandId, got {:?}", other.map(|c| c.command_id())),
  }
}
