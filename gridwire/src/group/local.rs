use crate::core::{Address, ChannelError, View};
use crate::group::{Delivery, GroupChannel, Inbox, Lane};
use crate::testkit::FailureConfigMap;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::time::sleep;
use tracing::{debug, trace};

/// Configures a [`LocalGroup`].
#[derive(Clone, Serialize, Deserialize)]
pub struct LocalGroupConfig {
  /// Whether the group offers total order delivery to the whole group.
  ///
  /// default: `true`
  pub total_order: bool,
  /// Whether the group offers total order delivery restricted to a subset of members.
  ///
  /// default: `true`
  pub anycast_total_order: bool,
  /// Whether sending to many members costs a single send.
  ///
  /// default: `true`
  pub multicast: bool,
  /// Frames to drop or delay on the regular and priority lanes, per receiving member.
  ///
  /// default: nothing dropped or delayed
  pub failures: FailureConfigMap,
}
impl Default for LocalGroupConfig {
  fn default() -> Self {
    LocalGroupConfig {
      total_order: true,
      anycast_total_order: true,
      multicast: true,
      failures: FailureConfigMap::default(),
    }
  }
}

struct Endpoint {
  regular: UnboundedSender<Delivery>,
  priority: UnboundedSender<Delivery>,
  ordered: UnboundedSender<Delivery>,
  views: UnboundedSender<Arc<View>>,
}
impl Endpoint {
  fn lane(&self, lane: Lane) -> &UnboundedSender<Delivery> {
    match lane {
      Lane::Regular => &self.regular,
      Lane::Priority => &self.priority,
      Lane::Ordered => &self.ordered,
    }
  }
}

struct GroupState {
  view: Arc<View>,
  endpoints: HashMap<Address, Endpoint>,
  failures: FailureConfigMap,
}

/// An in-process group. Members join in order, so the first member to join is the coordinator
/// until it leaves.
pub struct LocalGroup {
  config: LocalGroupConfig,
  state: Mutex<GroupState>,
}
impl LocalGroup {
  pub fn new(config: LocalGroupConfig) -> Arc<LocalGroup> {
    let failures = config.failures.clone();
    Arc::new(LocalGroup {
      config: config,
      state: Mutex::new(GroupState {
        view: View::empty(),
        endpoints: HashMap::new(),
        failures: failures,
      }),
    })
  }

  /// A channel for a member at `address`. The member joins when the channel connects.
  pub fn channel(self: &Arc<Self>, address: Address) -> LocalChannel {
    LocalChannel {
      group: self.clone(),
      address: address,
    }
  }

  pub fn view(&self) -> Arc<View> {
    self.state.lock().view.clone()
  }

  /// Replaces the failure injection settings for frames sent from now on.
  pub fn set_failures(&self, failures: FailureConfigMap) {
    self.state.lock().failures = failures;
  }

  fn join(&self, address: &Address) -> Result<Inbox, ChannelError> {
    let mut state = self.state.lock();
    if state.endpoints.contains_key(address) {
      return Err(ChannelError::AlreadyConnected);
    }
    let (regular_tx, regular_rx) = unbounded_channel();
    let (priority_tx, priority_rx) = unbounded_channel();
    let (ordered_tx, ordered_rx) = unbounded_channel();
    let (views_tx, views_rx) = unbounded_channel();
    state.endpoints.insert(
      address.clone(),
      Endpoint {
        regular: regular_tx,
        priority: priority_tx,
        ordered: ordered_tx,
        views: views_tx,
      },
    );
    let mut members = state.view.members().to_vec();
    members.push(address.clone());
    Self::install(&mut state, members);
    Ok(Inbox {
      regular: regular_rx,
      priority: priority_rx,
      ordered: ordered_rx,
      views: views_rx,
    })
  }

  fn leave(&self, address: &Address) -> Result<(), ChannelError> {
    let mut state = self.state.lock();
    if state.endpoints.remove(address).is_none() {
      return Err(ChannelError::NotConnected);
    }
    let members = state.view.members().iter().filter(|m| *m != address).cloned().collect();
    Self::install(&mut state, members);
    Ok(())
  }

  fn install(state: &mut GroupState, members: Vec<Address>) {
    let view = Arc::new(View::new(state.view.id() + 1, members));
    debug!(view_id = view.id(), members = view.size(), "installing view");
    for endpoint in state.endpoints.values() {
      let _ = endpoint.views.send(view.clone());
    }
    state.view = view;
  }

  fn deliver(
    &self,
    from: &Address,
    targets: &[Address],
    bytes: Vec<u8>,
    lane: Lane,
  ) -> Result<(), ChannelError> {
    let state = self.state.lock();
    if !state.endpoints.contains_key(from) {
      return Err(ChannelError::NotConnected);
    }
    let bytes = Arc::new(bytes);
    let mut rng = SmallRng::from_entropy();
    for target in targets {
      let endpoint = match state.endpoints.get(target) {
        Some(e) => e,
        None if targets.len() == 1 => return Err(ChannelError::UnknownMember(target.clone())),
        None => {
          trace!(%target, "dropping frame for a member not in the group");
          continue;
        }
      };
      let delivery = Delivery {
        from: from.clone(),
        bytes: bytes.clone(),
      };
      if lane == Lane::Ordered {
        let _ = endpoint.ordered.send(delivery);
        continue;
      }
      let fail_cfg = state.failures.get(target);
      if fail_cfg.drop_prob > 0.0 && rng.gen::<f64>() < fail_cfg.drop_prob {
        trace!(%from, %target, "dropped frame");
        continue;
      }
      let delay = fail_cfg.delay.map(|(min, max)| {
        let range = min.as_millis()..=max.as_millis();
        Duration::from_millis(rng.gen_range(range) as u64)
      });
      match (delay, tokio::runtime::Handle::try_current()) {
        (Some(dur), Ok(rt)) => {
          let tx = endpoint.lane(lane).clone();
          rt.spawn(async move {
            sleep(dur).await;
            let _ = tx.send(delivery);
          });
        }
        _ => {
          let _ = endpoint.lane(lane).send(delivery);
        }
      }
    }
    Ok(())
  }
}

/// One member's handle on a [`LocalGroup`].
pub struct LocalChannel {
  group: Arc<LocalGroup>,
  address: Address,
}
#[async_trait]
impl GroupChannel for LocalChannel {
  fn local_address(&self) -> &Address {
    &self.address
  }

  async fn connect(&self) -> Result<Inbox, ChannelError> {
    self.group.join(&self.address)
  }

  async fn disconnect(&self) -> Result<(), ChannelError> {
    self.group.leave(&self.address)
  }

  fn send(&self, targets: &[Address], bytes: Vec<u8>, lane: Lane) -> Result<(), ChannelError> {
    self.group.deliver(&self.address, targets, bytes, lane)
  }

  fn send_total_order(
    &self,
    targets: &[Address],
    bytes: Vec<u8>,
    anycast: bool,
  ) -> Result<(), ChannelError> {
    if !self.supports_total_order(anycast) {
      return Err(ChannelError::TotalOrderUnavailable);
    }
    self.group.deliver(&self.address, targets, bytes, Lane::Ordered)
  }

  fn supports_total_order(&self, anycast: bool) -> bool {
    if anycast {
      self.group.config.anycast_total_order
    } else {
      self.group.config.total_order
    }
  }

  fn is_multicast_capable(&self) -> bool {
    self.group.config.multicast
  }
}

#[cfg(test)]
fn block_on<F: std::future::Future>(f: F) -> F::Output {
  tokio_test::block_on(f)
}

#[test]
fn test_views_increase_on_join_and_leave() {
  let group = LocalGroup::new(LocalGroupConfig::default());
  let a = group.channel(Address::loopback(7800, 1));
  let b = group.channel(Address::loopback(7801, 2));
  let mut inbox_a = block_on(a.connect()).unwrap();
  let _inbox_b = block_on(b.connect()).unwrap();
  assert!(matches!(block_on(b.connect()), Err(ChannelError::AlreadyConnected)));
  let first = inbox_a.views.try_recv().unwrap();
  let second = inbox_a.views.try_recv().unwrap();
  assert_eq!((first.id(), second.id()), (1, 2));
  assert_eq!(second.coordinator(), Some(a.local_address()));
  block_on(a.disconnect()).unwrap();
  let view = group.view();
  assert_eq!(view.id(), 3);
  assert_eq!(view.members(), &[b.local_address().clone()]);
}

#[test]
fn test_ordered_lane_is_identical_everywhere() {
  let group = LocalGroup::new(LocalGroupConfig::default());
  let channels = (0..3).map(|x| group.channel(Address::loopback(7800 + x, x as u64))).collect::<Vec<_>>();
  let mut inboxes = channels.iter().map(|c| block_on(c.connect()).unwrap()).collect::<Vec<_>>();
  let targets = channels.iter().map(|c| c.local_address().clone()).collect::<Vec<_>>();
  for i in 0..20u8 {
    channels[(i % 3) as usize].send_total_order(&targets, vec![i], false).unwrap();
  }
  let orders = inboxes
    .iter_mut()
    .map(|i| (0..20).map(|_| i.ordered.try_recv().unwrap().bytes[0]).collect::<Vec<_>>())
    .collect::<Vec<_>>();
  assert_eq!(orders[0], orders[1]);
  assert_eq!(orders[1], orders[2]);
}
