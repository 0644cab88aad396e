use crate::cache::CacheManager;
use crate::commands::{Command, CreateCacheCommand, InvocationContext};
use crate::core::{GridError, Param, ResponseMap, RpcOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Creates a cache on every member at once and waits for it to span the cluster.
pub struct ClusterFormationCoordinator {
  manager: Arc<CacheManager>,
  sync_timeout: Duration,
}
impl ClusterFormationCoordinator {
  pub fn new(manager: Arc<CacheManager>, sync_timeout: Duration) -> ClusterFormationCoordinator {
    ClusterFormationCoordinator {
      manager: manager,
      sync_timeout: sync_timeout,
    }
  }

  /// How long the broadcast waits for the other members, which each run the formation barrier
  /// before answering.
  pub fn broadcast_timeout(&self) -> Duration {
    let formation = self.manager.formation_config();
    self
      .sync_timeout
      .saturating_add(formation.round_budget())
      .saturating_add(formation.membership_timeout.unwrap_or_default())
  }

  /// Broadcasts a [`CreateCacheCommand`] and performs it locally at the same time. Returns the
  /// other members' responses once every member, this one included, has started the cache.
  ///
  /// The local execution and the broadcast run concurrently because each member's barrier waits
  /// for the markers of all the others.
  pub async fn create_cluster_cache(
    &self,
    cache_name: &str,
    config_name: Option<&str>,
    expected_size: usize,
  ) -> Result<ResponseMap, GridError> {
    let transport = self.manager.transport();
    let owner = transport.address().to_string();
    let mut command = Command::CreateCache(CreateCacheCommand::new(
      owner,
      cache_name.to_string(),
      config_name.map(|s| s.to_string()),
      true,
      expected_size,
    ));
    command.init(&self.manager);
    let ctx = InvocationContext {
      origin: transport.address(),
      manager: self.manager.clone(),
    };
    let (remote, local) = tokio::join!(
      transport.invoke(None, &command, RpcOptions::sync(self.broadcast_timeout())),
      command.perform(&ctx)
    );
    match local {
      Ok(Param::Bool(true)) => {}
      Ok(other) => warn!(cache = cache_name, result = %other, "unexpected local result"),
      Err(e) => return Err(e),
    }
    let responses = remote?;
    info!(cache = cache_name, members = responses.len() + 1, "cluster cache created");
    Ok(responses)
  }
}
