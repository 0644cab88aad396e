use crate::cache::{Configuration, Flag};
use crate::core::{Address, GridError, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A typed value carried by commands, stored in caches and returned in responses.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Param {
  Null,
  Bool(bool),
  Int(i64),
  Str(String),
  Bytes(Vec<u8>),
  Address(Address),
  Config(Configuration),
  Flags(Vec<Flag>),
  List(Vec<Param>),
}
impl Param {
  pub fn is_null(&self) -> bool {
    matches!(self, Param::Null)
  }
}
impl fmt::Display for Param {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Param::Null => write!(f, "null"),
      Param::Bool(b) => write!(f, "{}", b),
      Param::Int(i) => write!(f, "{}", i),
      Param::Str(s) => write!(f, "{:?}", s),
      Param::Bytes(b) => write!(f, "<{} bytes>", b.len()),
      Param::Address(a) => write!(f, "{}", a),
      Param::Config(c) => write!(f, "{:?}", c.cache_mode),
      Param::Flags(flags) => write!(f, "{:?}", flags),
      Param::List(l) => write!(f, "[{} items]", l.len()),
    }
  }
}
impl From<&str> for Param {
  fn from(s: &str) -> Self {
    Param::Str(s.to_string())
  }
}
impl From<String> for Param {
  fn from(s: String) -> Self {
    Param::Str(s)
  }
}
impl From<i64> for Param {
  fn from(i: i64) -> Self {
    Param::Int(i)
  }
}
impl From<bool> for Param {
  fn from(b: bool) -> Self {
    Param::Bool(b)
  }
}
impl From<Address> for Param {
  fn from(a: Address) -> Self {
    Param::Address(a)
  }
}
impl From<Option<String>> for Param {
  fn from(s: Option<String>) -> Self {
    s.map(Param::Str).unwrap_or(Param::Null)
  }
}

/// The serialized form of a command: its id, the cache it is scoped to and its parameters, in
/// order. The id decides which factory in the
/// [`CommandRegistry`](crate::core::CommandRegistry) reconstructs it.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct WireCommand {
  pub command_id: u8,
  pub origin: Option<String>,
  pub params: Vec<Param>,
}

/// Everything sent between two transports is one of these.
#[derive(Debug, Deserialize, Serialize)]
pub(crate) enum Frame {
  Request {
    req_id: u64,
    reply: bool,
    command: WireCommand,
  },
  Reply {
    req_id: u64,
    response: Response,
  },
}

pub fn serialize<T: Serialize>(item: &T) -> Result<Vec<u8>, GridError> {
  Ok(serde_cbor::to_vec(item)?)
}

pub fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, GridError> {
  Ok(serde_cbor::from_slice(bytes)?)
}

#[test]
fn test_frame_serde() {
  let frame = Frame::Request {
    req_id: 0x0f0e0d0c0b0a0908,
    reply: true,
    command: WireCommand {
      command_id: 16,
      origin: Some("sessions".to_string()),
      params: vec![Param::Address(Address::loopback(7800, 1)), Param::Flags(vec![Flag::SkipLocking])],
    },
  };
  let bytes = serialize(&frame).unwrap();
  match deserialize::<Frame>(&bytes[..]).unwrap() {
    Frame::Request {
      req_id,
      reply,
      command,
    } => {
      assert_eq!(req_id, 0x0f0e0d0c0b0a0908);
      assert!(reply);
      assert_eq!(command.command_id, 16);
      assert_eq!(command.params.len(), 2);
    }
    Frame::Reply { .. } => panic!("decoded a reply"),
  }
  assert!(deserialize::<Frame>(&bytes[..bytes.len() / 2]).is_err());
}
