use crate::commands::Command;
use crate::core::{Address, GridError, Response, ResponseFilter, ResponseMap, ResponseMode, WireCommand};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;

/// How a single invocation is delivered and aggregated.
pub struct RpcOptions {
  pub mode: ResponseMode,
  /// Bounds the wait of synchronous modes. Ignored by [`ResponseMode::Async`].
  pub timeout: Duration,
  /// Deliver on the priority lane, ahead of ordinary traffic.
  pub use_priority_queue: bool,
  pub response_filter: Option<Box<dyn ResponseFilter>>,
  /// Deliver through the total order protocol of the group channel.
  pub total_order: bool,
  /// Only meaningful with `total_order`: order among the recipients only, rather than among the
  /// whole group.
  pub anycast: bool,
}
impl RpcOptions {
  pub fn new(mode: ResponseMode, timeout: Duration) -> RpcOptions {
    RpcOptions {
      mode: mode,
      timeout: timeout,
      use_priority_queue: false,
      response_filter: None,
      total_order: false,
      anycast: false,
    }
  }

  pub fn sync(timeout: Duration) -> RpcOptions {
    Self::new(ResponseMode::SyncWaitAll, timeout)
  }

  pub fn asynchronous() -> RpcOptions {
    Self::new(ResponseMode::Async, Duration::ZERO)
  }

  pub fn priority(mut self) -> Self {
    self.use_priority_queue = true;
    self
  }

  pub fn filter(mut self, filter: Box<dyn ResponseFilter>) -> Self {
    self.response_filter = Some(filter);
    self
  }

  pub fn total_order(mut self, anycast: bool) -> Self {
    self.total_order = true;
    self.anycast = anycast;
    self
  }
}
impl fmt::Debug for RpcOptions {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RpcOptions")
      .field("mode", &self.mode)
      .field("timeout", &self.timeout)
      .field("use_priority_queue", &self.use_priority_queue)
      .field("has_filter", &self.response_filter.is_some())
      .field("total_order", &self.total_order)
      .field("anycast", &self.anycast)
      .finish()
  }
}

/// Whether the caller waits for a cross-site backup.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum BackupStrategy {
  Sync,
  Async,
}

/// A remote site to back a command up to.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct XSiteBackup {
  pub site: String,
  pub strategy: BackupStrategy,
  pub timeout: Duration,
}
impl XSiteBackup {
  pub fn sync(site: &str, timeout: Duration) -> XSiteBackup {
    XSiteBackup {
      site: site.to_string(),
      strategy: BackupStrategy::Sync,
      timeout: timeout,
    }
  }

  pub fn asynchronous(site: &str) -> XSiteBackup {
    XSiteBackup {
      site: site.to_string(),
      strategy: BackupStrategy::Async,
      timeout: Duration::ZERO,
    }
  }
}

/// A link to a member of another site, able to run a command there.
#[async_trait]
pub trait SiteLink: Send + Sync {
  async fn relay(&self, command: WireCommand) -> Result<Response, GridError>;
}

/// The pending outcome of [`Transport::backup_remotely`]. Synchronous backups run in the
/// background until awaited; asynchronous ones are not tracked at all.
pub struct BackupResponse {
  pending: Vec<(String, JoinHandle<Result<Response, GridError>>)>,
  failures: BTreeMap<String, String>,
}
impl BackupResponse {
  pub(crate) fn new() -> BackupResponse {
    BackupResponse {
      pending: Vec::new(),
      failures: BTreeMap::new(),
    }
  }

  pub(crate) fn track(&mut self, site: String, hdl: JoinHandle<Result<Response, GridError>>) {
    self.pending.push((site, hdl));
  }

  pub(crate) fn fail(&mut self, site: String, reason: String) {
    self.failures.insert(site, reason);
  }

  /// No synchronous backup was attempted.
  pub fn is_empty(&self) -> bool {
    self.pending.is_empty() && self.failures.is_empty()
  }

  /// Polls without waiting.
  pub fn is_finished(&self) -> bool {
    self.pending.iter().all(|(_, hdl)| hdl.is_finished())
  }

  /// Waits for every synchronous backup, then reports the sites that failed.
  pub async fn wait_for_backup_to_finish(&mut self) -> Result<(), GridError> {
    for (site, hdl) in self.pending.drain(..) {
      let reason = match hdl.await {
        Ok(Ok(Response::Success(_))) => continue,
        Ok(Ok(Response::Exception(e))) => e,
        Ok(Ok(other)) => format!("{:?}", other),
        Ok(Err(e)) => e.to_string(),
        Err(e) => e.to_string(),
      };
      self.failures.insert(site, reason);
    }
    match self.failures.keys().next() {
      Some(site) => Err(GridError::SiteUnavailable(site.clone())),
      None => Ok(()),
    }
  }

  /// Sites whose backup failed, as far as is known.
  pub fn failed_backups(&self) -> &BTreeMap<String, String> {
    &self.failures
  }
}

/// The only path by which a node exchanges commands with other members.
#[async_trait]
pub trait Transport: Send + Sync {
  /// Invokes `command` on `recipients`, or on every other member of the view when `None`. The
  /// local member is never a recipient.
  async fn invoke(
    &self,
    recipients: Option<Vec<Address>>,
    command: &Command,
    options: RpcOptions,
  ) -> Result<ResponseMap, GridError>;

  /// Ships `command` to other sites.
  async fn backup_remotely(
    &self,
    backups: Vec<XSiteBackup>,
    command: &Command,
  ) -> Result<BackupResponse, GridError>;

  fn is_coordinator(&self) -> bool;

  fn coordinator(&self) -> Option<Address>;

  fn address(&self) -> Address;

  /// Logical and physical addresses are the same for every channel this crate knows of.
  fn physical_addresses(&self) -> Vec<Address> {
    vec![self.address()]
  }

  /// A copy of the current view's members.
  fn members(&self) -> Vec<Address>;

  /// Fails once the transport is stopped.
  fn view_id(&self) -> Result<u64, GridError>;

  fn is_multicast_capable(&self) -> bool;

  /// Fails unless the channel can deliver in total order.
  fn check_total_order_supported(&self, anycast: bool) -> Result<(), GridError>;

  async fn start(&self) -> Result<(), GridError>;

  async fn stop(&self) -> Result<(), GridError>;
}
