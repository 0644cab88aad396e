use crate::cache::{CacheManager, Configuration};
use crate::cluster::{ClusterFormationCoordinator, FormationConfig};
use crate::core::{Address, CommandRegistry, GridError, GroupTransport, Transport, TransportConfig};
use crate::group::GroupChannel;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Configures a [`Node`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NodeConfig {
  pub transport: TransportConfig,
  pub formation: FormationConfig,
  /// The configuration of caches started without a template of their own.
  ///
  /// default: `Configuration::default()`
  pub default_cache: Configuration,
}

/// One member of the grid: a started transport, the cache manager it executes commands against,
/// and a coordinator for cluster-wide cache creation.
pub struct Node {
  transport: Arc<GroupTransport>,
  manager: Arc<CacheManager>,
  coordinator: ClusterFormationCoordinator,
}
impl Node {
  pub async fn start<C: GroupChannel + 'static>(
    config: NodeConfig,
    channel: C,
    registry: Arc<CommandRegistry>,
  ) -> Result<Node, GridError> {
    let sync_timeout = config.transport.sync_timeout;
    let transport = Arc::new(GroupTransport::new(config.transport, channel, registry));
    let manager = CacheManager::new(transport.clone(), config.default_cache, config.formation);
    transport.attach(&manager);
    transport.start().await?;
    info!(address = %transport.address(), "node started");
    Ok(Node {
      transport: transport,
      coordinator: ClusterFormationCoordinator::new(manager.clone(), sync_timeout),
      manager: manager,
    })
  }

  pub fn address(&self) -> Address {
    self.transport.address()
  }

  pub fn transport(&self) -> &Arc<GroupTransport> {
    &self.transport
  }

  pub fn manager(&self) -> &Arc<CacheManager> {
    &self.manager
  }

  pub fn coordinator(&self) -> &ClusterFormationCoordinator {
    &self.coordinator
  }

  /// Stops every cache, then leaves the group.
  pub async fn stop(&self) -> Result<(), GridError> {
    self.manager.stop();
    self.transport.stop().await
  }
}
