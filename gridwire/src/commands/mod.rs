//! Units of work a node can ship to other members and execute on their behalf.
//!
//! Every command is a variant of [`Command`], and every variant implements
//! [`ReplicableCommand`]: a stable numeric id, a flat list of [`Param`]s that fully determines the
//! command, and an asynchronous `perform` run against the receiving node's state. On the wire a
//! command is its id, its scope and its parameters ([`WireCommand`]); the receiver rebuilds it
//! through the [`CommandRegistry`](crate::core::CommandRegistry).
//!
//! ### Execution
//! Receivers run commands on one of two lanes. Commands whose [`can_block`] is `true` (such as
//! [`CreateCacheCommand`], which may wait for the cluster to form) get their own lane so they
//! never hold up short commands like [`PutKeyValueCommand`].
//!
//! [`can_block`]: ReplicableCommand::can_block

use crate::cache::{CacheManager, Flag};
use crate::core::{Address, GridError, Param, WireCommand};
use async_trait::async_trait;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::sync::Arc;

mod create_cache;
mod get;
mod write;

#[rustfmt::skip]
pub use {
  create_cache::CreateCacheCommand,
  get::ClusteredGetCommand,
  write::PutKeyValueCommand,
  write::RemoveCommand,
};

/// Ids of the commands this crate ships with.
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum BuiltinCommand {
  PutKeyValue = 8,
  Remove = 10,
  ClusteredGet = 16,
  CreateCache = 29,
}

/// Local state handed to a command for the duration of one `perform` call.
pub struct InvocationContext {
  /// The member that sent the command. The local address for commands performed locally.
  pub origin: Address,
  pub manager: Arc<CacheManager>,
}

/// The contract every command variant fulfils.
#[async_trait]
pub trait ReplicableCommand: Send + Sync {
  /// Must be unique across all variants.
  const COMMAND_ID: u8;

  /// The cache this command is scoped to.
  fn origin(&self) -> Option<&str>;

  fn parameters(&self) -> Vec<Param>;

  /// The exact inverse of [`parameters`](ReplicableCommand::parameters). Fails if `command_id`
  /// is not this variant's id.
  fn set_parameters(&mut self, command_id: u8, params: Vec<Param>) -> Result<(), GridError>;

  fn is_return_value_expected(&self) -> bool {
    true
  }

  fn can_block(&self) -> bool {
    false
  }

  async fn perform(&self, ctx: &InvocationContext) -> Result<Param, GridError>;
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Command {
  Put(PutKeyValueCommand),
  Remove(RemoveCommand),
  ClusteredGet(ClusteredGetCommand),
  CreateCache(CreateCacheCommand),
}
impl Command {
  pub fn command_id(&self) -> u8 {
    match self {
      Command::Put(_) => PutKeyValueCommand::COMMAND_ID,
      Command::Remove(_) => RemoveCommand::COMMAND_ID,
      Command::ClusteredGet(_) => ClusteredGetCommand::COMMAND_ID,
      Command::CreateCache(_) => CreateCacheCommand::COMMAND_ID,
    }
  }

  pub fn origin(&self) -> Option<&str> {
    match self {
      Command::Put(c) => c.origin(),
      Command::Remove(c) => c.origin(),
      Command::ClusteredGet(c) => c.origin(),
      Command::CreateCache(c) => c.origin(),
    }
  }

  pub fn parameters(&self) -> Vec<Param> {
    match self {
      Command::Put(c) => c.parameters(),
      Command::Remove(c) => c.parameters(),
      Command::ClusteredGet(c) => c.parameters(),
      Command::CreateCache(c) => c.parameters(),
    }
  }

  pub fn set_parameters(&mut self, command_id: u8, params: Vec<Param>) -> Result<(), GridError> {
    match self {
      Command::Put(c) => c.set_parameters(command_id, params),
      Command::Remove(c) => c.set_parameters(command_id, params),
      Command::ClusteredGet(c) => c.set_parameters(command_id, params),
      Command::CreateCache(c) => c.set_parameters(command_id, params),
    }
  }

  pub fn is_return_value_expected(&self) -> bool {
    match self {
      Command::Put(c) => c.is_return_value_expected(),
      Command::Remove(c) => c.is_return_value_expected(),
      Command::ClusteredGet(c) => c.is_return_value_expected(),
      Command::CreateCache(c) => c.is_return_value_expected(),
    }
  }

  pub fn can_block(&self) -> bool {
    match self {
      Command::Put(c) => c.can_block(),
      Command::Remove(c) => c.can_block(),
      Command::ClusteredGet(c) => c.can_block(),
      Command::CreateCache(c) => c.can_block(),
    }
  }

  /// Hands the receiving node's manager to commands that hold on to it. The manager is not part
  /// of the command's identity and is never serialized.
  pub fn init(&mut self, manager: &Arc<CacheManager>) {
    if let Command::CreateCache(c) = self {
      c.init(manager);
    }
  }

  pub async fn perform(&self, ctx: &InvocationContext) -> Result<Param, GridError> {
    match self {
      Command::Put(c) => c.perform(ctx).await,
      Command::Remove(c) => c.perform(ctx).await,
      Command::ClusteredGet(c) => c.perform(ctx).await,
      Command::CreateCache(c) => c.perform(ctx).await,
    }
  }

  pub fn to_wire(&self) -> WireCommand {
    WireCommand {
      command_id: self.command_id(),
      origin: self.origin().map(|s| s.to_string()),
      params: self.parameters(),
    }
  }
}

/// Reads a parameter list in order, turning shape mismatches into
/// [`GridError::BadParameters`].
pub(crate) struct ParamReader {
  command_id: u8,
  params: std::vec::IntoIter<Param>,
}
impl ParamReader {
  pub fn new(
    expected_id: u8,
    command_id: u8,
    params: Vec<Param>,
    arity: usize,
  ) -> Result<ParamReader, GridError> {
    if command_id != expected_id {
      return Err(GridError::ProtocolMismatch {
        expected: expected_id,
        actual: command_id,
      });
    }
    if params.len() != arity {
      return Err(GridError::BadParameters {
        command_id: command_id,
        reason: format!("expected {} parameters, got {}", arity, params.len()),
      });
    }
    Ok(ParamReader {
      command_id: command_id,
      params: params.into_iter(),
    })
  }

  fn bad(&self, what: &str, got: &Param) -> GridError {
    GridError::BadParameters {
      command_id: self.command_id,
      reason: format!("expected {}, got {:?}", what, got),
    }
  }

  pub fn any(&mut self) -> Result<Param, GridError> {
    let command_id = self.command_id;
    self.params.next().ok_or_else(|| GridError::BadParameters {
      command_id: command_id,
      reason: "ran out of parameters".to_string(),
    })
  }

  pub fn string(&mut self) -> Result<String, GridError> {
    match self.any()? {
      Param::Str(s) => Ok(s),
      p => Err(self.bad("a string", &p)),
    }
  }

  pub fn opt_string(&mut self) -> Result<Option<String>, GridError> {
    match self.any()? {
      Param::Str(s) => Ok(Some(s)),
      Param::Null => Ok(None),
      p => Err(self.bad("a string or null", &p)),
    }
  }

  pub fn boolean(&mut self) -> Result<bool, GridError> {
    match self.any()? {
      Param::Bool(b) => Ok(b),
      p => Err(self.bad("a boolean", &p)),
    }
  }

  pub fn size(&mut self) -> Result<usize, GridError> {
    match self.any()? {
      Param::Int(i) if i >= 0 => Ok(i as usize),
      p => Err(self.bad("a non-negative integer", &p)),
    }
  }

  pub fn flags(&mut self) -> Result<Vec<Flag>, GridError> {
    match self.any()? {
      Param::Flags(f) => Ok(f),
      p => Err(self.bad("flags", &p)),
    }
  }
}

#[test]
fn test_builtin_ids() {
  assert_eq!(u8::from(BuiltinCommand::CreateCache), CreateCacheCommand::COMMAND_ID);
  assert_eq!(u8::from(BuiltinCommand::PutKeyValue), PutKeyValueCommand::COMMAND_ID);
  assert_eq!(u8::from(BuiltinCommand::Remove), RemoveCommand::COMMAND_ID);
  assert_eq!(u8::from(BuiltinCommand::ClusteredGet), ClusteredGetCommand::COMMAND_ID);
  assert_eq!(BuiltinCommand::try_from(16u8).ok(), Some(BuiltinCommand::ClusteredGet));
  assert!(BuiltinCommand::try_from(3u8).is_err());
}

#[test]
fn test_param_reader_rejects_wrong_id() {
  match ParamReader::new(29, 8, vec![], 0) {
    Err(GridError::ProtocolMismatch {
      expected: 29,
      actual: 8,
    }) => {}
    _ => panic!("expected a protocol mismatch"),
  }
  let mut reader = ParamReader::new(29, 29, vec![Param::Int(-1)], 1).unwrap();
  assert!(matches!(reader.size(), Err(GridError::BadParameters { .. })));
}

#[test]
fn test_param_reader_runs_out() {
  let mut reader = ParamReader::new(10, 10, vec![Param::Int(1)], 1).unwrap();
  assert_eq!(reader.any().unwrap(), Param::Int(1));
  assert!(matches!(reader.any(), Err(GridError::BadParameters { command_id: 10, .. })));
}
