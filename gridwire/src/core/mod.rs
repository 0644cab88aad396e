//! Member identity, the wire model and the transport that moves commands between members.
//!
//! Every exchange between two members is a [`WireCommand`] going one way and a [`Response`]
//! coming back. [`Transport::invoke`] decides who receives a command and how their responses are
//! aggregated, per [`RpcOptions`]. On the receiving side the [`CommandRegistry`] turns the
//! command id back into a [`Command`](crate::commands::Command), which is then performed against
//! the local node.
//!
//! [`GroupTransport`] implements the transport over any
//! [`GroupChannel`](crate::group::GroupChannel). [`Node`] wires a transport together with a
//! [`CacheManager`](crate::cache::CacheManager).

mod address;
mod error;
mod group_transport;
mod node;
mod packets;
mod registry;
mod response;
mod transport;

#[rustfmt::skip]
pub(crate) use {
  packets::Frame,
};

#[rustfmt::skip]
pub use {
  address::Address,
  address::Host,
  address::View,
  error::ChannelError,
  error::GridError,
  group_transport::GroupTransport,
  group_transport::TransportConfig,
  node::Node,
  node::NodeConfig,
  packets::deserialize,
  packets::serialize,
  packets::Param,
  packets::WireCommand,
  registry::CommandFactory,
  registry::CommandRegistry,
  registry::RegistryBuilder,
  response::FirstValueFilter,
  response::Response,
  response::ResponseFilter,
  response::ResponseMap,
  response::ResponseMode,
  transport::BackupResponse,
  transport::BackupStrategy,
  transport::RpcOptions,
  transport::SiteLink,
  transport::Transport,
  transport::XSiteBackup,
};
