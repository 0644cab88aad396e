use crate::core::{Address, ResponseMap};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Failures reported by a [`GroupChannel`](crate::group::GroupChannel).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
  #[error("channel is not connected")]
  NotConnected,
  #[error("channel is already connected")]
  AlreadyConnected,
  #[error("{0} is not a member of the group")]
  UnknownMember(Address),
  #[error("link to {0} is closed")]
  LinkClosed(Address),
  #[error("total order delivery is not available")]
  TotalOrderUnavailable,
}

/// Errors raised by the transport, the command registry and the commands themselves.
#[derive(Debug, Error)]
pub enum GridError {
  #[error("unknown command id {0}, is the cluster running mismatched versions?")]
  UnknownCommandId(u8),
  #[error("command id {0} is already registered")]
  DuplicateCommandId(u8),
  #[error("invalid command id {actual}, expected {expected}")]
  ProtocolMismatch { expected: u8, actual: u8 },
  #[error("bad parameters for command {command_id}: {reason}")]
  BadParameters { command_id: u8, reason: String },
  /// `responses` holds the replies that arrived in time.
  #[error("timed out after {timeout:?} waiting for responses from {missing:?}")]
  RemotingTimeout {
    timeout: Duration,
    missing: Vec<Address>,
    responses: ResponseMap,
  },
  #[error("remoting failure")]
  Remoting(#[from] ChannelError),
  #[error("serialization failure: {0}")]
  Serialization(#[from] serde_cbor::Error),
  #[error("unsupported configuration: {0}")]
  UnsupportedConfiguration(String),
  #[error("transport is stopped")]
  TransportStopped,
  #[error("{} member(s) failed, {succeeded} succeeded: {failures:?}", failures.len())]
  PartialFailure {
    failures: BTreeMap<Address, String>,
    succeeded: usize,
    responses: ResponseMap,
  },
  #[error("expected {expected} members but only {observed} joined within {waited:?}")]
  ClusterFormationTimeout {
    expected: usize,
    observed: usize,
    waited: Duration,
  },
  #[error("cache {0} is not running on this node")]
  CacheNotFound(String),
  #[error("no invocation context is attached to this transport")]
  NoInvocationContext,
  #[error("site {0} is unreachable")]
  SiteUnavailable(String),
}
