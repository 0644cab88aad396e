use gridwire::cache::{CacheMode, Configuration, ConfigurationBuilder};
use gridwire::cluster::{FormationBarrier, FormationConfig};
use gridwire::commands::{Command, CreateCacheCommand};
use gridwire::core::{Address, GridError, NodeConfig, Param, Response, RpcOptions, Transport};
use gridwire::group::LocalGroupConfig;
use gridwire::testkit::{init_logging, local_cluster, LocalCluster};
use std::time::Duration;

fn address(id: u64) -> Address {
  Address::loopback(7800 + id as u16, id)
}

async fn cluster(size: usize, formation: FormationConfig) -> LocalCluster {
  init_logging();
  let config = NodeConfig {
    formation: formation,
    ..NodeConfig::default()
  };
  local_cluster(size, LocalGroupConfig::default(), config).await.unwrap()
}

fn has_markers(cluster: &LocalCluster, cache: &str) -> bool {
  cluster.nodes.iter().all(|n| {
    let cache = n.manager().get_cache(cache);
    cluster.addresses().into_iter().all(|a| cache.contains_key(&Param::Address(a)))
  })
}

#[tokio::test]
async fn test_create_cache_on_two_nodes() {
  let cluster = cluster(2, FormationConfig::default()).await;
  let responses =
    cluster.nodes[0].coordinator().create_cluster_cache("sessions", None, 2).await.unwrap();
  assert_eq!(responses.len(), 1);
  assert_eq!(responses[&address(1)], Response::Success(Param::Bool(true)));
  for node in &cluster.nodes {
    let manager = node.manager();
    assert!(manager.is_running("sessions"));
    assert_eq!(manager.cache_configuration("sessions"), Some(Configuration::temporary_default()));
    let cache = manager.existing_cache("sessions").unwrap();
    assert_eq!(cache.configuration().cache_mode, CacheMode::DistributedSync);
  }
  assert!(has_markers(&cluster, "sessions"));
}

#[tokio::test]
async fn test_create_cache_from_template() {
  let cluster = cluster(3, FormationConfig::default()).await;
  let template = ConfigurationBuilder::new()
    .cache_mode(CacheMode::ReplicatedSync)
    .unreliable_return_values(true)
    .build();
  for node in &cluster.nodes {
    node.manager().define_configuration("replicated-template", template.clone());
  }
  cluster.nodes[1]
    .coordinator()
    .create_cluster_cache("orders", Some("replicated-template"), 3)
    .await
    .unwrap();
  for node in &cluster.nodes {
    let cache = node.manager().existing_cache("orders").unwrap();
    assert_eq!(cache.configuration(), &template);
  }
  assert!(has_markers(&cluster, "orders"));
}

#[tokio::test]
async fn test_create_without_start_skips_the_barrier() {
  let cluster = cluster(3, FormationConfig::default()).await;
  let owner = cluster.nodes[0].address().to_string();
  let cmd = Command::CreateCache(CreateCacheCommand::new(owner, "lazy".to_string(), None, false, 9));
  let options = RpcOptions::sync(Duration::from_secs(5));
  let responses = cluster.nodes[0].transport().invoke(None, &cmd, options).await.unwrap();
  assert_eq!(responses.len(), 2);
  assert!(responses.values().all(|r| *r == Response::Success(Param::Bool(true))));
  assert!(!cluster.nodes[0].manager().is_running("lazy"));
  assert!(cluster.nodes[1..].iter().all(|n| n.manager().is_running("lazy")));
}

#[tokio::test]
async fn test_membership_timeout() {
  let formation = FormationConfig {
    membership_timeout: Some(Duration::from_millis(200)),
    ..FormationConfig::default()
  };
  let cluster = cluster(2, formation).await;
  match cluster.nodes[0].coordinator().create_cluster_cache("sessions", None, 3).await {
    Err(GridError::ClusterFormationTimeout {
      expected,
      observed,
      waited,
    }) => {
      assert_eq!((expected, observed), (3, 2));
      assert!(waited >= Duration::from_millis(200));
    }
    other => panic!("expected a formation timeout, got {:?}", other),
  }
}

#[tokio::test]
async fn test_missing_member_blocks_forever() {
  let cluster = cluster(2, FormationConfig::default()).await;
  let node = &cluster.nodes[0];
  node.manager().define_configuration("sessions", Configuration::temporary_default());
  let cache = node.manager().get_cache("sessions");
  let barrier = FormationBarrier::new(FormationConfig::default());
  let wait = barrier.await_formation(&cache, node.manager().transport().as_ref(), 3);
  assert!(tokio::time::timeout(Duration::from_millis(500), wait).await.is_err());
}

#[tokio::test]
async fn test_round_budget_exhaustion_is_not_fatal() {
  let formation = FormationConfig {
    rounds: 3,
    round_interval: Duration::from_millis(10),
    ..FormationConfig::default()
  };
  let cluster = cluster(2, formation.clone()).await;
  // Only the first node runs the cache, so the second one never writes its marker.
  let node = &cluster.nodes[0];
  node.manager().define_configuration("sessions", Configuration::temporary_default());
  let cache = node.manager().get_cache("sessions");
  let outcome = FormationBarrier::new(formation)
    .await_formation(&cache, node.manager().transport().as_ref(), 2)
    .await
    .unwrap();
  assert!(!outcome.converged);
  assert_eq!(outcome.rounds_used, 3);
  assert_eq!(outcome.members, vec![address(0), address(1)]);
  assert!(cache.contains_key(&Param::Address(address(0))));
}

#[tokio::test]
async fn test_barrier_converges_within_budget() {
  let config = FormationConfig::default();
  let cluster = cluster(3, config.clone()).await;
  let caches = cluster
    .nodes
    .iter()
    .map(|n| {
      n.manager().define_configuration("sessions", Configuration::temporary_default());
      n.manager().get_cache("sessions")
    })
    .collect::<Vec<_>>();
  let barrier = FormationBarrier::new(config.clone());
  let (a, b, c) = tokio::join!(
    barrier.await_formation(&caches[0], cluster.nodes[0].manager().transport().as_ref(), 3),
    barrier.await_formation(&caches[1], cluster.nodes[1].manager().transport().as_ref(), 3),
    barrier.await_formation(&caches[2], cluster.nodes[2].manager().transport().as_ref(), 3),
  );
  for outcome in [a.unwrap(), b.unwrap(), c.unwrap()] {
    assert!(outcome.converged);
    assert!(outcome.rounds_used < config.rounds);
    assert_eq!(outcome.members.len(), 3);
  }
}

#[tokio::test]
async fn test_broadcast_timeout_saturates() {
  let formation = FormationConfig {
    membership_timeout: Some(Duration::MAX),
    ..FormationConfig::default()
  };
  let cluster = cluster(1, formation).await;
  assert_eq!(cluster.nodes[0].coordinator().broadcast_timeout(), Duration::MAX);
}
