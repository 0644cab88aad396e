use crate::cache::CacheManager;
use crate::commands::{Command, InvocationContext};
use crate::core::{
  deserialize, serialize, Address, BackupResponse, BackupStrategy, ChannelError, CommandRegistry,
  Frame, GridError, Param, Response, ResponseMap, ResponseMode, RpcOptions, SiteLink, Transport,
  View, WireCommand, XSiteBackup,
};
use crate::group::{Delivery, GroupChannel, Inbox, Lane};
use async_trait::async_trait;
use dashmap::DashMap;
use itertools::Itertools;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, trace, warn};

/// Configures a [`GroupTransport`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransportConfig {
  /// The timeout used for synchronous invocations issued on behalf of the node, such as
  /// cluster-wide cache creation.
  ///
  /// default: `15 seconds`
  pub sync_timeout: Duration,
  /// How many received commands that may block run at once.
  ///
  /// default: `num_cpus::get()`
  pub blocking_workers: usize,
  /// How many received commands that never block run at once.
  ///
  /// default: `num_cpus::get() * 2`
  pub non_blocking_workers: usize,
  /// The site this node belongs to. Backups addressed to it are skipped.
  ///
  /// default: `None`
  pub site: Option<String>,
}
impl Default for TransportConfig {
  #[inline]
  fn default() -> Self {
    TransportConfig {
      sync_timeout: Duration::from_secs(15),
      blocking_workers: num_cpus::get(),
      non_blocking_workers: num_cpus::get() * 2,
      site: None,
    }
  }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
  Created,
  Running,
  Stopped,
}

type Pending = UnboundedSender<(Address, Response)>;

struct Incoming {
  from: Address,
  req_id: u64,
  reply: bool,
  command: Result<Command, GridError>,
}

struct Inner {
  address: Address,
  config: TransportConfig,
  channel: Box<dyn GroupChannel>,
  registry: Arc<CommandRegistry>,
  state: Mutex<State>,
  view: RwLock<Arc<View>>,
  next_req: AtomicU64,
  pending: Mutex<HashMap<u64, Pending>>,
  manager: RwLock<Weak<CacheManager>>,
  blocking: Arc<Semaphore>,
  non_blocking: Arc<Semaphore>,
  sites: DashMap<String, Arc<dyn SiteLink>>,
  tasks: Mutex<Vec<JoinHandle<()>>>,
}
impl Inner {
  fn ensure_running(&self) -> Result<(), GridError> {
    match *self.state.lock() {
      State::Running => Ok(()),
      State::Created => Err(ChannelError::NotConnected.into()),
      State::Stopped => Err(GridError::TransportStopped),
    }
  }

  fn install_view(&self, view: Arc<View>) {
    let mut current = self.view.write();
    if view.id() <= current.id() {
      trace!(view_id = view.id(), "ignoring stale view");
      return;
    }
    info!(
      address = %self.address,
      view_id = view.id(),
      members = view.size(),
      coordinator = ?view.coordinator(),
      "installed view"
    );
    *current = view;
  }

  fn send(&self, targets: &[Address], bytes: Vec<u8>, options: &RpcOptions) -> Result<(), GridError> {
    if options.total_order {
      self.channel.send_total_order(targets, bytes, options.anycast)?;
    } else {
      let lane = if options.use_priority_queue {
        Lane::Priority
      } else {
        Lane::Regular
      };
      self.channel.send(targets, bytes, lane)?;
    }
    Ok(())
  }

  /// Hands replies to their waiting invocation. Requests are decoded and returned.
  fn accept(&self, delivery: Delivery) -> Option<Incoming> {
    match deserialize::<Frame>(&delivery.bytes[..]) {
      Ok(Frame::Reply { req_id, response }) => {
        match self.pending.lock().get(&req_id) {
          Some(tx) => {
            let _ = tx.send((delivery.from, response));
          }
          None => trace!(req_id, from = %delivery.from, "reply for a finished invocation"),
        }
        None
      }
      Ok(Frame::Request {
        req_id,
        reply,
        command,
      }) => Some(Incoming {
        from: delivery.from,
        req_id: req_id,
        reply: reply,
        command: self.registry.decode(command),
      }),
      Err(e) => {
        warn!(from = %delivery.from, error = %e, "dropping undecodable frame");
        None
      }
    }
  }

  async fn execute(&self, origin: &Address, mut command: Command) -> Response {
    let manager = self.manager.read().upgrade();
    let manager = match manager {
      Some(m) => m,
      None => return Response::Exception(GridError::NoInvocationContext.to_string()),
    };
    command.init(&manager);
    let ctx = InvocationContext {
      origin: origin.clone(),
      manager: manager,
    };
    match command.perform(&ctx).await {
      Ok(_) if !command.is_return_value_expected() => Response::Success(Param::Null),
      Ok(value) => Response::Success(value),
      Err(GridError::CacheNotFound(cache)) => {
        trace!(%cache, command_id = command.command_id(), "cache not running here");
        Response::CacheNotFound
      }
      Err(e) => {
        debug!(command_id = command.command_id(), from = %origin, error = %e, "command failed");
        Response::Exception(e.to_string())
      }
    }
  }

  async fn respond(&self, incoming: Incoming) {
    let Incoming {
      from,
      req_id,
      reply,
      command,
    } = incoming;
    let response = match command {
      Ok(command) => self.execute(&from, command).await,
      Err(e) => {
        warn!(%from, error = %e, "could not reconstruct command");
        Response::Exception(e.to_string())
      }
    };
    if reply {
      self.reply(&from, req_id, response);
    }
  }

  async fn respond_pooled(self: Arc<Self>, incoming: Incoming) {
    let workers = match &incoming.command {
      Ok(c) if c.can_block() => self.blocking.clone(),
      _ => self.non_blocking.clone(),
    };
    let _permit = match workers.acquire_owned().await {
      Ok(permit) => permit,
      Err(_) => {
        if incoming.reply {
          let response = Response::Exception(GridError::TransportStopped.to_string());
          self.reply(&incoming.from, incoming.req_id, response);
        }
        return;
      }
    };
    self.respond(incoming).await;
  }

  fn reply(&self, to: &Address, req_id: u64, response: Response) {
    let bytes = match serialize(&Frame::Reply { req_id, response }) {
      Ok(b) => b,
      Err(e) => {
        warn!(%to, error = %e, "could not serialize reply");
        return;
      }
    };
    if let Err(e) = self.channel.send(std::slice::from_ref(to), bytes, Lane::Regular) {
      debug!(%to, error = %e, "could not send reply");
    }
  }

  async fn collect(
    &self,
    rx: &mut UnboundedReceiver<(Address, Response)>,
    targets: &[Address],
    options: RpcOptions,
  ) -> Result<ResponseMap, GridError> {
    let RpcOptions {
      mode,
      timeout: limit,
      mut response_filter,
      ..
    } = options;
    let deadline = Instant::now().checked_add(limit);
    let mut outstanding = targets.iter().cloned().collect::<BTreeSet<_>>();
    let mut responses = ResponseMap::new();
    let mut satisfied = false;
    while !outstanding.is_empty() {
      let next = match deadline {
        Some(deadline) => timeout_at(deadline, rx.recv()).await,
        None => Ok(rx.recv().await),
      };
      let (from, response) = match next {
        Ok(Some(r)) => r,
        Ok(None) => return Err(GridError::TransportStopped),
        Err(_) => break,
      };
      if !outstanding.remove(&from) {
        continue;
      }
      let acceptable = match response_filter.as_mut() {
        Some(filter) => filter.is_acceptable(&response, &from),
        None => true,
      };
      if acceptable {
        responses.insert(from, response);
      }
      if response_filter.as_ref().map_or(false, |f| !f.need_more_responses()) {
        satisfied = true;
        break;
      }
    }
    if !outstanding.is_empty() && !satisfied {
      if mode == ResponseMode::SyncWaitAll {
        return Err(GridError::RemotingTimeout {
          timeout: limit,
          missing: outstanding.into_iter().collect(),
          responses: responses,
        });
      }
      debug!(missing = outstanding.len(), "filtered invocation timed out, returning what arrived");
    }
    if mode == ResponseMode::SyncWaitAll {
      let failures = responses
        .iter()
        .filter_map(|(addr, r)| match r {
          Response::Exception(e) => Some((addr.clone(), e.clone())),
          _ => None,
        })
        .collect::<BTreeMap<_, _>>();
      if !failures.is_empty() {
        let succeeded = responses.values().filter(|r| r.is_successful()).count();
        return Err(GridError::PartialFailure {
          failures: failures,
          succeeded: succeeded,
          responses: responses,
        });
      }
    }
    Ok(responses)
  }
}

async fn dispatch(
  inner: Weak<Inner>,
  mut regular: UnboundedReceiver<Delivery>,
  mut priority: UnboundedReceiver<Delivery>,
  mut views: UnboundedReceiver<Arc<View>>,
) {
  loop {
    let (delivery, lane) = tokio::select! {
      biased;
      Some(view) = views.recv() => {
        match inner.upgrade() {
          Some(inner) => inner.install_view(view),
          None => break,
        }
        continue;
      }
      Some(d) = priority.recv() => (d, Lane::Priority),
      Some(d) = regular.recv() => (d, Lane::Regular),
      else => break,
    };
    let inner = match inner.upgrade() {
      Some(inner) => inner,
      None => break,
    };
    trace!(from = %delivery.from, ?lane, "received frame");
    if let Some(incoming) = inner.accept(delivery) {
      tokio::spawn(inner.respond_pooled(incoming));
    }
  }
}

async fn dispatch_ordered(inner: Weak<Inner>, mut ordered: UnboundedReceiver<Delivery>) {
  while let Some(delivery) = ordered.recv().await {
    let inner = match inner.upgrade() {
      Some(inner) => inner,
      None => break,
    };
    if let Some(incoming) = inner.accept(delivery) {
      inner.respond(incoming).await;
    }
  }
}

/// A [`Transport`] over a [`GroupChannel`].
///
/// Outbound, commands are serialized into request frames and handed to the channel. Inbound, a
/// dispatcher task multiplexes view changes, the priority lane and the regular lane, in that
/// order of precedence, and runs each request on a blocking or non-blocking worker pool.
/// Requests delivered in total order are run one at a time by a separate task, in delivery
/// order.
///
/// Commands are executed against the [`CacheManager`] given to [`attach`](GroupTransport::attach).
pub struct GroupTransport {
  inner: Arc<Inner>,
}
impl GroupTransport {
  pub fn new<C: GroupChannel + 'static>(
    config: TransportConfig,
    channel: C,
    registry: Arc<CommandRegistry>,
  ) -> GroupTransport {
    let blocking = Semaphore::new(config.blocking_workers.max(1));
    let non_blocking = Semaphore::new(config.non_blocking_workers.max(1));
    GroupTransport {
      inner: Arc::new(Inner {
        address: channel.local_address().clone(),
        config: config,
        channel: Box::new(channel),
        registry: registry,
        state: Mutex::new(State::Created),
        view: RwLock::new(View::empty()),
        next_req: AtomicU64::new(0),
        pending: Mutex::new(HashMap::new()),
        manager: RwLock::new(Weak::new()),
        blocking: Arc::new(blocking),
        non_blocking: Arc::new(non_blocking),
        sites: DashMap::new(),
        tasks: Mutex::new(Vec::new()),
      }),
    }
  }

  /// Sets the manager received commands are performed against.
  pub fn attach(&self, manager: &Arc<CacheManager>) {
    *self.inner.manager.write() = Arc::downgrade(manager);
  }

  pub fn registry(&self) -> &Arc<CommandRegistry> {
    &self.inner.registry
  }

  pub fn config(&self) -> &TransportConfig {
    &self.inner.config
  }

  pub fn view(&self) -> Arc<View> {
    self.inner.view.read().clone()
  }

  /// Registers the link used to back commands up to `site`, replacing any previous one.
  pub fn connect_site(&self, site: &str, link: Arc<dyn SiteLink>) {
    debug!(site, "connected site link");
    self.inner.sites.insert(site.to_string(), link);
  }

  /// A link through which another site can run commands on this node.
  pub fn site_link(&self) -> Arc<dyn SiteLink> {
    Arc::new(NodeSiteLink {
      address: self.inner.address.clone(),
      inner: Arc::downgrade(&self.inner),
    })
  }
}
#[async_trait]
impl Transport for GroupTransport {
  async fn invoke(
    &self,
    recipients: Option<Vec<Address>>,
    command: &Command,
    options: RpcOptions,
  ) -> Result<ResponseMap, GridError> {
    let inner = &self.inner;
    inner.ensure_running()?;
    if options.total_order {
      self.check_total_order_supported(options.anycast)?;
    }
    let targets = match recipients {
      Some(r) => r.into_iter().filter(|a| *a != inner.address).unique().collect::<Vec<_>>(),
      None => {
        let view = inner.view.read();
        view.members().iter().filter(|a| **a != inner.address).cloned().collect()
      }
    };
    if targets.is_empty() {
      trace!(command_id = command.command_id(), "no recipients");
      return Ok(ResponseMap::new());
    }
    let sync = options.mode.is_synchronous();
    let req_id = inner.next_req.fetch_add(1, Ordering::Relaxed);
    let bytes = serialize(&Frame::Request {
      req_id: req_id,
      reply: sync,
      command: command.to_wire(),
    })?;
    trace!(req_id, command_id = command.command_id(), recipients = targets.len(), ?options, "invoking");
    if !sync {
      inner.send(&targets, bytes, &options)?;
      return Ok(ResponseMap::new());
    }
    let (tx, mut rx) = unbounded_channel();
    inner.pending.lock().insert(req_id, tx);
    if let Err(e) = inner.send(&targets, bytes, &options) {
      inner.pending.lock().remove(&req_id);
      return Err(e);
    }
    let result = inner.collect(&mut rx, &targets, options).await;
    inner.pending.lock().remove(&req_id);
    result
  }

  async fn backup_remotely(
    &self,
    backups: Vec<XSiteBackup>,
    command: &Command,
  ) -> Result<BackupResponse, GridError> {
    self.inner.ensure_running()?;
    let wire = command.to_wire();
    let mut response = BackupResponse::new();
    for backup in backups {
      if self.inner.config.site.as_deref() == Some(backup.site.as_str()) {
        debug!(site = %backup.site, "skipping backup to the local site");
        continue;
      }
      let link = match self.inner.sites.get(&backup.site) {
        Some(link) => link.value().clone(),
        None => {
          warn!(site = %backup.site, "no link to backup site");
          if backup.strategy == BackupStrategy::Sync {
            response.fail(backup.site, "no link to site".to_string());
          }
          continue;
        }
      };
      let wire = wire.clone();
      match backup.strategy {
        BackupStrategy::Async => {
          let site = backup.site;
          tokio::spawn(async move {
            if let Err(e) = link.relay(wire).await {
              debug!(%site, error = %e, "asynchronous backup failed");
            }
          });
        }
        BackupStrategy::Sync => {
          let limit = backup.timeout;
          let hdl = tokio::spawn(async move {
            match timeout(limit, link.relay(wire)).await {
              Ok(result) => result,
              Err(_) => Err(GridError::RemotingTimeout {
                timeout: limit,
                missing: vec![],
                responses: ResponseMap::new(),
              }),
            }
          });
          response.track(backup.site, hdl);
        }
      }
    }
    Ok(response)
  }

  fn is_coordinator(&self) -> bool {
    self.inner.view.read().coordinator() == Some(&self.inner.address)
  }

  fn coordinator(&self) -> Option<Address> {
    self.inner.view.read().coordinator().cloned()
  }

  fn address(&self) -> Address {
    self.inner.address.clone()
  }

  fn members(&self) -> Vec<Address> {
    self.inner.view.read().members().to_vec()
  }

  fn view_id(&self) -> Result<u64, GridError> {
    match *self.inner.state.lock() {
      State::Stopped => Err(GridError::TransportStopped),
      _ => Ok(self.inner.view.read().id()),
    }
  }

  fn is_multicast_capable(&self) -> bool {
    self.inner.channel.is_multicast_capable()
  }

  fn check_total_order_supported(&self, anycast: bool) -> Result<(), GridError> {
    if self.inner.channel.supports_total_order(anycast) {
      return Ok(());
    }
    let kind = if anycast { "anycast" } else { "multicast" };
    Err(GridError::UnsupportedConfiguration(format!(
      "the group channel does not support {} total order delivery",
      kind
    )))
  }

  async fn start(&self) -> Result<(), GridError> {
    {
      let mut state = self.inner.state.lock();
      match *state {
        State::Running => return Ok(()),
        State::Stopped => return Err(GridError::TransportStopped),
        State::Created => *state = State::Running,
      }
    }
    let Inbox {
      regular,
      priority,
      ordered,
      mut views,
    } = match self.inner.channel.connect().await {
      Ok(inbox) => inbox,
      Err(e) => {
        *self.inner.state.lock() = State::Created;
        return Err(e.into());
      }
    };
    while let Ok(view) = views.try_recv() {
      self.inner.install_view(view);
    }
    let weak = Arc::downgrade(&self.inner);
    let mut tasks = self.inner.tasks.lock();
    tasks.push(tokio::spawn(dispatch(weak.clone(), regular, priority, views)));
    tasks.push(tokio::spawn(dispatch_ordered(weak, ordered)));
    info!(address = %self.inner.address, "transport started");
    Ok(())
  }

  async fn stop(&self) -> Result<(), GridError> {
    let previous = {
      let mut state = self.inner.state.lock();
      std::mem::replace(&mut *state, State::Stopped)
    };
    if previous != State::Running {
      return Ok(());
    }
    for task in self.inner.tasks.lock().drain(..) {
      task.abort();
    }
    self.inner.pending.lock().clear();
    self.inner.blocking.close();
    self.inner.non_blocking.close();
    *self.inner.view.write() = View::empty();
    if let Err(e) = self.inner.channel.disconnect().await {
      warn!(address = %self.inner.address, error = %e, "could not leave the group cleanly");
    }
    info!(address = %self.inner.address, "transport stopped");
    Ok(())
  }
}

/// Runs relayed commands on the node it was taken from.
struct NodeSiteLink {
  address: Address,
  inner: Weak<Inner>,
}
#[async_trait]
impl SiteLink for NodeSiteLink {
  async fn relay(&self, command: WireCommand) -> Result<Response, GridError> {
    let inner = self
      .inner
      .upgrade()
      .ok_or_else(|| GridError::from(ChannelError::LinkClosed(self.address.clone())))?;
    inner.ensure_running()?;
    let command = inner.registry.decode(command)?;
    Ok(inner.execute(&self.address, command).await)
  }
}
