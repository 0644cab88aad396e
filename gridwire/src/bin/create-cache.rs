use gridwire::cache::Flag;
use gridwire::core::{GridError, NodeConfig, Param};
use gridwire::group::LocalGroupConfig;
use gridwire::testkit::{init_logging, local_cluster};
use std::env::args;
use tracing::{error, info};

// Usage: create-cache [NODES] [CACHE]
#[tokio::main]
async fn main() {
  init_logging();
  let mut args = args().skip(1);
  let nodes = args.next().and_then(|n| n.parse::<usize>().ok()).unwrap_or(3).max(1);
  let cache = args.next().unwrap_or_else(|| "sessions".to_string());
  if let Err(e) = run(nodes, &cache).await {
    error!(error = %e, "create-cache failed");
    std::process::exit(1);
  }
}

async fn run(nodes: usize, cache_name: &str) -> Result<(), GridError> {
  let cluster = local_cluster(nodes, LocalGroupConfig::default(), NodeConfig::default()).await?;
  let issuer = &cluster.nodes[0];
  let responses = issuer.coordinator().create_cluster_cache(cache_name, None, nodes).await?;
  info!(cache = cache_name, responses = responses.len(), "cache created on every node");

  let cache = issuer.manager().get_cache(cache_name);
  cache.put(Param::from("greeting"), Param::from("hello"), &[Flag::SkipLocking]).await?;
  for node in &cluster.nodes[1..] {
    let value = node.manager().get_cache(cache_name).get(&Param::from("greeting"), &[]).await?;
    info!(node = %node.address(), value = ?value, "read back");
  }
  cluster.stop().await
}
