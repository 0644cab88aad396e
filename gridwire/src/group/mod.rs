//! The group communication layer underneath the [`Transport`](crate::core::Transport).
//!
//! A [`GroupChannel`] moves opaque byte frames between members and tells its owner about
//! membership changes. It knows nothing about commands. The transport is its only client.
//!
//! [`LocalGroup`] is an in-process implementation: every member is a [`LocalChannel`] attached to
//! the same hub, which installs views, fans frames out to per-member lanes and can be told to
//! drop or delay frames (see [`FailureConfigMap`](crate::testkit::FailureConfigMap)).

use crate::core::{Address, ChannelError, View};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

mod local;

#[rustfmt::skip]
pub use {
  local::LocalChannel,
  local::LocalGroup,
  local::LocalGroupConfig,
};

/// The inbound queue a frame is delivered to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Lane {
  Regular,
  /// Drained before the regular lane.
  Priority,
  /// Every member receives frames on this lane in the same relative order.
  Ordered,
}

/// A frame received from another member.
#[derive(Debug)]
pub struct Delivery {
  pub from: Address,
  pub bytes: Arc<Vec<u8>>,
}

/// What a channel hands its owner on connecting: one receiver per lane, and the views installed
/// from the moment of joining.
pub struct Inbox {
  pub regular: UnboundedReceiver<Delivery>,
  pub priority: UnboundedReceiver<Delivery>,
  pub ordered: UnboundedReceiver<Delivery>,
  pub views: UnboundedReceiver<Arc<View>>,
}

#[async_trait]
pub trait GroupChannel: Send + Sync {
  fn local_address(&self) -> &Address;

  /// Joins the group.
  async fn connect(&self) -> Result<Inbox, ChannelError>;

  /// Leaves the group. Frames sent to this member afterwards are dropped.
  async fn disconnect(&self) -> Result<(), ChannelError>;

  /// Sends `bytes` to each of `targets`, with no ordering guarantee across targets.
  fn send(&self, targets: &[Address], bytes: Vec<u8>, lane: Lane) -> Result<(), ChannelError>;

  /// Sends `bytes` so that every target delivers it in the same order relative to other frames
  /// sent this way.
  fn send_total_order(
    &self,
    targets: &[Address],
    bytes: Vec<u8>,
    anycast: bool,
  ) -> Result<(), ChannelError>;

  fn supports_total_order(&self, anycast: bool) -> bool;

  fn is_multicast_capable(&self) -> bool;
}
