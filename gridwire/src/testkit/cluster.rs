use crate::core::{Address, CommandRegistry, GridError, Node, NodeConfig, Transport};
use crate::group::{LocalGroup, LocalGroupConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

const BASE_PORT: u16 = 7800;

/// Nodes sharing one [`LocalGroup`], in the order they joined.
pub struct LocalCluster {
  pub group: Arc<LocalGroup>,
  pub nodes: Vec<Node>,
  config: NodeConfig,
  registry: Arc<CommandRegistry>,
}
impl LocalCluster {
  pub fn addresses(&self) -> Vec<Address> {
    self.nodes.iter().map(|n| n.address()).collect()
  }

  /// Starts one more node. Its address follows the last one handed out.
  pub async fn add_node(&mut self) -> Result<&Node, GridError> {
    let id = self.nodes.iter().map(|n| n.address().id + 1).max().unwrap_or(0);
    let address = Address::loopback(BASE_PORT + id as u16, id);
    let node = Node::start(self.config.clone(), self.group.channel(address), self.registry.clone()).await?;
    self.nodes.push(node);
    Ok(&self.nodes[self.nodes.len() - 1])
  }

  /// Waits until every node has installed a view of `size` members.
  pub async fn await_view_size(&self, size: usize, limit: Duration) -> Result<(), GridError> {
    let started = Instant::now();
    loop {
      let observed = self.nodes.iter().map(|n| n.transport().members().len()).min().unwrap_or(0);
      if observed == size && self.nodes.iter().all(|n| n.transport().members().len() == size) {
        return Ok(());
      }
      if started.elapsed() >= limit {
        return Err(GridError::ClusterFormationTimeout {
          expected: size,
          observed: observed,
          waited: started.elapsed(),
        });
      }
      sleep(Duration::from_millis(5)).await;
    }
  }

  pub async fn stop(&self) -> Result<(), GridError> {
    for node in &self.nodes {
      node.stop().await?;
    }
    Ok(())
  }
}

/// Starts `size` nodes with the builtin commands on a fresh [`LocalGroup`], and waits for all of
/// them to see each other.
pub async fn local_cluster(
  size: usize,
  group_config: LocalGroupConfig,
  config: NodeConfig,
) -> Result<LocalCluster, GridError> {
  let mut cluster = LocalCluster {
    group: LocalGroup::new(group_config),
    nodes: Vec::with_capacity(size),
    config: config,
    registry: CommandRegistry::builtin(),
  };
  for _ in 0..size {
    cluster.add_node().await?;
  }
  cluster.await_view_size(size, Duration::from_secs(5)).await?;
  Ok(cluster)
}
