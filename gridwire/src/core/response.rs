use crate::core::{Address, Param};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What a single member answered to a remote invocation.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Response {
  /// The command ran, and this is its result.
  Success(Param),
  /// The command ran but did not apply, e.g. a conditional write whose condition failed.
  Unsuccessful,
  /// The command was scoped to a cache that is not running on the member.
  CacheNotFound,
  /// The command could not be decoded or failed while running.
  Exception(String),
}
impl Response {
  pub fn is_successful(&self) -> bool {
    matches!(self, Response::Success(_))
  }

  pub fn value(&self) -> Option<&Param> {
    match self {
      Response::Success(p) => Some(p),
      _ => None,
    }
  }
}

/// Responses keyed by the member that sent them.
pub type ResponseMap = BTreeMap<Address, Response>;

/// How a multi-recipient invocation waits for and aggregates replies.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum ResponseMode {
  /// Wait for every recipient, or for the response filter to be satisfied.
  SyncWaitAll,
  /// Wait until the response filter no longer needs responses.
  SyncWaitFiltered,
  /// Do not wait at all.
  Async,
}
impl ResponseMode {
  pub fn is_synchronous(&self) -> bool {
    !matches!(self, ResponseMode::Async)
  }
}

/// Decides which responses count, and when enough of them have arrived.
///
/// A filter is owned by a single invocation and is consulted in arrival order.
pub trait ResponseFilter: Send {
  /// Whether `response` from `sender` should be kept in the result.
  fn is_acceptable(&mut self, response: &Response, sender: &Address) -> bool;

  /// Whether the invocation should keep waiting.
  fn need_more_responses(&self) -> bool;
}

/// Accepts successful responses and is satisfied by the first one carrying a non-null value.
#[derive(Default)]
pub struct FirstValueFilter {
  found: bool,
}
impl ResponseFilter for FirstValueFilter {
  fn is_acceptable(&mut self, response: &Response, _: &Address) -> bool {
    match response {
      Response::Success(value) => {
        self.found |= !value.is_null();
        true
      }
      _ => false,
    }
  }

  fn need_more_responses(&self) -> bool {
    !self.found
  }
}

#[test]
fn test_first_value_filter() {
  let a = Address::loopback(7800, 0);
  let mut filter = FirstValueFilter::default();
  assert!(!filter.is_acceptable(&Response::CacheNotFound, &a));
  assert!(filter.need_more_responses());
  assert!(filter.is_acceptable(&Response::Success(Param::Null), &a));
  assert!(filter.need_more_responses());
  assert!(filter.is_acceptable(&Response::Success(Param::from("v")), &a));
  assert!(!filter.need_more_responses());
}
