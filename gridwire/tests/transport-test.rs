use gridwire::cache::{CacheMode, Configuration, ConfigurationBuilder, Flag};
use gridwire::commands::{ClusteredGetCommand, Command, PutKeyValueCommand};
use gridwire::core::{
  Address, ChannelError, CommandRegistry, FirstValueFilter, GridError, GroupTransport, Node,
  NodeConfig, Param, Response, ResponseFilter, ResponseMode, RpcOptions, Transport, TransportConfig,
};
use gridwire::group::{LocalGroup, LocalGroupConfig};
use gridwire::testkit::{init_logging, local_cluster, FailureConfig, FailureConfigMap, LocalCluster};
use maplit::btreemap;
use std::time::Duration;
use tokio::time::{sleep, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

fn address(id: u64) -> Address {
  Address::loopback(7800 + id as u16, id)
}

fn get(cache: &str, key: &str) -> Command {
  Command::ClusteredGet(ClusteredGetCommand::new(cache.to_string(), Param::from(key)))
}

fn put(cache: &str, key: &str, value: Param) -> Command {
  Command::Put(PutKeyValueCommand::new(cache.to_string(), Param::from(key), value, vec![]))
}

async fn cluster(size: usize, failures: FailureConfigMap) -> LocalCluster {
  init_logging();
  let group = LocalGroupConfig {
    failures: failures,
    ..LocalGroupConfig::default()
  };
  local_cluster(size, group, NodeConfig::default()).await.unwrap()
}

/// Starts a local-mode cache named `name` on the given nodes, holding `key` -> `value@<id>`.
async fn seed(cluster: &LocalCluster, nodes: &[usize], name: &str, key: &str) {
  for i in nodes {
    let node = &cluster.nodes[*i];
    let value = format!("value@{}", node.address().id);
    let cache = node.manager().get_cache(name);
    cache.put(Param::from(key), Param::from(value), &[]).await.unwrap();
  }
}

struct AcceptAll;
impl ResponseFilter for AcceptAll {
  fn is_acceptable(&mut self, _: &Response, _: &Address) -> bool {
    true
  }

  fn need_more_responses(&self) -> bool {
    true
  }
}

#[tokio::test]
async fn test_coordinator_is_oldest_member() {
  let cluster = cluster(3, FailureConfigMap::default()).await;
  for (i, node) in cluster.nodes.iter().enumerate() {
    let transport = node.transport();
    assert_eq!(transport.coordinator(), Some(address(0)));
    assert_eq!(transport.is_coordinator(), i == 0);
    assert_eq!(transport.members(), vec![address(0), address(1), address(2)]);
    assert_eq!(transport.view_id().unwrap(), 3);
    assert_eq!(transport.physical_addresses(), vec![address(i as u64)]);
    assert!(transport.is_multicast_capable());
  }
  cluster.nodes[0].stop().await.unwrap();
  let started = Instant::now();
  while cluster.nodes[1].transport().members().len() != 2 {
    assert!(started.elapsed() < TIMEOUT, "the departure was never noticed");
    sleep(Duration::from_millis(5)).await;
  }
  assert_eq!(cluster.nodes[1].transport().coordinator(), Some(address(1)));
  assert!(cluster.nodes[1].transport().is_coordinator());
}

#[tokio::test]
async fn test_sync_wait_all_collects_every_reply() {
  let cluster = cluster(3, FailureConfigMap::default()).await;
  seed(&cluster, &[1, 2], "kv", "k").await;
  let responses = cluster.nodes[0]
    .transport()
    .invoke(None, &get("kv", "k"), RpcOptions::sync(TIMEOUT))
    .await
    .unwrap();
  assert_eq!(
    responses,
    btreemap! {
      address(1) => Response::Success(Param::from("value@1")),
      address(2) => Response::Success(Param::from("value@2")),
    }
  );
}

#[tokio::test]
async fn test_missing_cache_is_not_a_failure() {
  let cluster = cluster(3, FailureConfigMap::default()).await;
  seed(&cluster, &[1], "kv", "k").await;
  let responses = cluster.nodes[0]
    .transport()
    .invoke(None, &put("kv", "k", Param::Int(1)), RpcOptions::sync(TIMEOUT))
    .await
    .unwrap();
  assert_eq!(responses[&address(1)], Response::Success(Param::from("value@1")));
  assert_eq!(responses[&address(2)], Response::CacheNotFound);
}

#[tokio::test]
async fn test_explicit_recipients_exclude_self() {
  let cluster = cluster(3, FailureConfigMap::default()).await;
  seed(&cluster, &[0, 1, 2], "kv", "k").await;
  let recipients = vec![address(0), address(1), address(1)];
  let responses = cluster.nodes[0]
    .transport()
    .invoke(Some(recipients), &get("kv", "k"), RpcOptions::sync(TIMEOUT))
    .await
    .unwrap();
  assert_eq!(responses.keys().cloned().collect::<Vec<_>>(), vec![address(1)]);

  let alone = cluster.nodes[0]
    .transport()
    .invoke(Some(vec![address(0)]), &get("kv", "k"), RpcOptions::sync(TIMEOUT))
    .await
    .unwrap();
  assert!(alone.is_empty());
}

#[tokio::test]
async fn test_unicast_to_a_stranger() {
  let cluster = cluster(2, FailureConfigMap::default()).await;
  let stranger = Address::loopback(9000, 99);
  let result = cluster.nodes[0]
    .transport()
    .invoke(Some(vec![stranger.clone()]), &get("kv", "k"), RpcOptions::sync(TIMEOUT))
    .await;
  match result {
    Err(GridError::Remoting(ChannelError::UnknownMember(a))) => assert_eq!(a, stranger),
    other => panic!("expected an unknown member, got {:?}", other),
  }
}

#[tokio::test]
async fn test_sync_wait_all_times_out() {
  let failures = FailureConfigMap::default().with(address(2), FailureConfig::unreachable());
  let cluster = cluster(3, failures).await;
  seed(&cluster, &[1, 2], "kv", "k").await;
  let limit = Duration::from_millis(200);
  let result = cluster.nodes[0].transport().invoke(None, &get("kv", "k"), RpcOptions::sync(limit)).await;
  match result {
    Err(GridError::RemotingTimeout {
      timeout,
      missing,
      responses,
    }) => {
      assert_eq!(timeout, limit);
      assert_eq!(missing, vec![address(2)]);
      assert_eq!(
        responses,
        btreemap! { address(1) => Response::Success(Param::from("value@1")) }
      );
    }
    other => panic!("expected a timeout, got {:?}", other),
  }
}

#[tokio::test]
async fn test_unbounded_timeout() {
  let cluster = cluster(3, FailureConfigMap::default()).await;
  seed(&cluster, &[1, 2], "kv", "k").await;
  let responses = cluster.nodes[0]
    .transport()
    .invoke(None, &get("kv", "k"), RpcOptions::sync(Duration::MAX))
    .await
    .unwrap();
  assert_eq!(responses.len(), 2);
}

#[tokio::test]
async fn test_sync_wait_filtered_keeps_partial_results() {
  let failures = FailureConfigMap::default().with(address(2), FailureConfig::unreachable());
  let cluster = cluster(3, failures).await;
  seed(&cluster, &[1, 2], "kv", "k").await;
  let options = RpcOptions::new(ResponseMode::SyncWaitFiltered, Duration::from_millis(200))
    .filter(Box::new(AcceptAll));
  let responses = cluster.nodes[0].transport().invoke(None, &get("kv", "k"), options).await.unwrap();
  assert_eq!(
    responses,
    btreemap! { address(1) => Response::Success(Param::from("value@1")) }
  );
}

#[tokio::test]
async fn test_satisfied_filter_ends_the_wait() {
  let failures = FailureConfigMap::default().with(address(2), FailureConfig::unreachable());
  let cluster = cluster(3, failures).await;
  seed(&cluster, &[1, 2], "kv", "k").await;
  let started = Instant::now();
  let options = RpcOptions::sync(Duration::from_secs(30)).filter(Box::new(FirstValueFilter::default()));
  let responses = cluster.nodes[0].transport().invoke(None, &get("kv", "k"), options).await.unwrap();
  assert!(started.elapsed() < Duration::from_secs(5));
  assert_eq!(responses.len(), 1);
  assert_eq!(responses[&address(1)], Response::Success(Param::from("value@1")));
}

#[tokio::test]
async fn test_async_does_not_wait() {
  let delay = FailureConfig::delayed(Duration::from_millis(300), Duration::from_millis(400));
  let cluster = cluster(2, FailureConfigMap::default().with(address(1), delay)).await;
  seed(&cluster, &[1], "kv", "k").await;
  let responses = cluster.nodes[0]
    .transport()
    .invoke(None, &put("kv", "k", Param::Int(7)), RpcOptions::asynchronous())
    .await
    .unwrap();
  assert!(responses.is_empty());
  let remote = cluster.nodes[1].manager().get_cache("kv");
  assert_eq!(remote.get(&Param::from("k"), &[]).await.unwrap(), Some(Param::from("value@1")));
  let started = Instant::now();
  while remote.get(&Param::from("k"), &[]).await.unwrap() != Some(Param::Int(7)) {
    assert!(started.elapsed() < TIMEOUT, "asynchronous put never arrived");
    sleep(Duration::from_millis(20)).await;
  }
}

#[tokio::test]
async fn test_priority_invocation() {
  let cluster = cluster(3, FailureConfigMap::default()).await;
  seed(&cluster, &[1, 2], "kv", "k").await;
  let responses = cluster.nodes[0]
    .transport()
    .invoke(None, &get("kv", "k"), RpcOptions::sync(TIMEOUT).priority())
    .await
    .unwrap();
  assert_eq!(responses.len(), 2);
  assert!(responses.values().all(|r| r.is_successful()));
}

#[tokio::test]
async fn test_exceptions_become_partial_failures() {
  init_logging();
  let group = LocalGroup::new(LocalGroupConfig::default());
  let config = NodeConfig::default();
  let a = Node::start(config.clone(), group.channel(address(0)), CommandRegistry::builtin()).await.unwrap();
  // Knows nothing of puts.
  let _b = Node::start(config.clone(), group.channel(address(1)), CommandRegistry::builder().build())
    .await
    .unwrap();
  let c = Node::start(config, group.channel(address(2)), CommandRegistry::builtin()).await.unwrap();
  c.manager().get_cache("kv");
  while a.transport().members().len() < 3 {
    sleep(Duration::from_millis(5)).await;
  }
  match a.transport().invoke(None, &put("kv", "k", Param::Int(1)), RpcOptions::sync(TIMEOUT)).await {
    Err(GridError::PartialFailure {
      failures,
      succeeded,
      responses,
    }) => {
      assert_eq!(succeeded, 1);
      assert_eq!(failures.keys().cloned().collect::<Vec<_>>(), vec![address(1)]);
      assert_eq!(responses.get(&address(2)), Some(&Response::Success(Param::Null)));
      assert!(matches!(responses.get(&address(1)), Some(Response::Exception(_))));
    }
    other => panic!("expected a partial failure, got {:?}", other),
  }
}

#[tokio::test]
async fn test_total_order_unsupported() {
  init_logging();
  let group = LocalGroupConfig {
    total_order: false,
    anycast_total_order: false,
    ..LocalGroupConfig::default()
  };
  let cluster = local_cluster(2, group, NodeConfig::default()).await.unwrap();
  seed(&cluster, &[1], "kv", "k").await;
  let transport = cluster.nodes[0].transport();
  let supported = transport.check_total_order_supported(true);
  assert!(matches!(supported, Err(GridError::UnsupportedConfiguration(_))));
  let options = RpcOptions::asynchronous().total_order(false);
  let result = transport.invoke(None, &put("kv", "k", Param::Int(1)), options).await;
  assert!(matches!(result, Err(GridError::UnsupportedConfiguration(_))));
  sleep(Duration::from_millis(100)).await;
  let remote = cluster.nodes[1].manager().get_cache("kv");
  assert_eq!(remote.get(&Param::from("k"), &[]).await.unwrap(), Some(Param::from("value@1")));
}

#[tokio::test]
async fn test_total_order_runs_in_delivery_order() {
  let cluster = cluster(3, FailureConfigMap::default()).await;
  seed(&cluster, &[1, 2], "kv", "k").await;
  let transport = cluster.nodes[0].transport();
  for i in 0..50 {
    let options = RpcOptions::asynchronous().total_order(false);
    transport.invoke(None, &put("kv", "k", Param::Int(i)), options).await.unwrap();
  }
  let options = RpcOptions::sync(TIMEOUT).total_order(true);
  let responses = transport.invoke(None, &get("kv", "k"), options).await.unwrap();
  assert_eq!(responses.len(), 2);
  assert!(responses.values().all(|r| *r == Response::Success(Param::Int(49))));
}

#[tokio::test]
async fn test_unstarted_transport() {
  let group = LocalGroup::new(LocalGroupConfig::default());
  let channel = group.channel(address(0));
  let transport = GroupTransport::new(TransportConfig::default(), channel, CommandRegistry::builtin());
  let result = transport.invoke(None, &get("kv", "k"), RpcOptions::sync(TIMEOUT)).await;
  assert!(matches!(result, Err(GridError::Remoting(ChannelError::NotConnected))));
}

#[tokio::test]
async fn test_ignored_return_values() {
  let cluster = cluster(3, FailureConfigMap::default()).await;
  seed(&cluster, &[1, 2], "kv", "k").await;
  let transport = cluster.nodes[0].transport();
  let quiet = Command::Put(PutKeyValueCommand::new(
    "kv".to_string(),
    Param::from("k"),
    Param::Int(1),
    vec![Flag::IgnoreReturnValues],
  ));
  let responses = transport.invoke(None, &quiet, RpcOptions::sync(TIMEOUT)).await.unwrap();
  assert_eq!(
    responses,
    btreemap! {
      address(1) => Response::Success(Param::Null),
      address(2) => Response::Success(Param::Null),
    }
  );
  let loud = put("kv", "k", Param::Int(2));
  let responses = transport.invoke(None, &loud, RpcOptions::sync(TIMEOUT)).await.unwrap();
  assert!(responses.values().all(|r| *r == Response::Success(Param::Int(1))));
}

#[tokio::test]
async fn test_stopped_transport() {
  let cluster = cluster(2, FailureConfigMap::default()).await;
  let transport = cluster.nodes[0].transport();
  transport.stop().await.unwrap();
  transport.stop().await.unwrap();
  assert!(matches!(transport.view_id(), Err(GridError::TransportStopped)));
  assert!(matches!(transport.start().await, Err(GridError::TransportStopped)));
  assert!(transport.members().is_empty());
  let result = transport.invoke(None, &get("kv", "k"), RpcOptions::sync(TIMEOUT)).await;
  assert!(matches!(result, Err(GridError::TransportStopped)));
}

#[tokio::test]
async fn test_stop_fails_in_flight_invocations() {
  let failures = FailureConfigMap::default().with(address(1), FailureConfig::unreachable());
  let cluster = cluster(2, failures).await;
  let transport = cluster.nodes[0].transport().clone();
  let hdl = tokio::spawn(async move {
    transport.invoke(None, &get("kv", "k"), RpcOptions::sync(Duration::from_secs(30))).await
  });
  sleep(Duration::from_millis(100)).await;
  cluster.nodes[0].transport().stop().await.unwrap();
  assert!(matches!(hdl.await.unwrap(), Err(GridError::TransportStopped)));
}

#[tokio::test]
async fn test_writes_replicate_by_cache_mode() {
  let cluster = cluster(3, FailureConfigMap::default()).await;
  let replicated = ConfigurationBuilder::new().cache_mode(CacheMode::ReplicatedSync).build();
  let caches = cluster
    .nodes
    .iter()
    .map(|n| {
      n.manager().define_configuration("repl", replicated.clone());
      n.manager().get_cache("repl")
    })
    .collect::<Vec<_>>();
  let key = Param::from("k");
  assert_eq!(caches[0].put(key.clone(), Param::Int(1), &[]).await.unwrap(), None);
  assert!(caches.iter().all(|c| c.contains_key(&key)));
  let previous = caches[1].put(key.clone(), Param::Int(2), &[Flag::CacheModeLocal]).await.unwrap();
  assert_eq!(previous, Some(Param::Int(1)));
  assert_eq!(caches[2].get(&key, &[]).await.unwrap(), Some(Param::Int(1)));
  caches[2].remove(&key, &[]).await.unwrap();
  assert!(caches.iter().all(|c| !c.contains_key(&key)));

  let other = Param::from("only-on-1");
  caches[1].put(other.clone(), Param::Int(3), &[Flag::CacheModeLocal]).await.unwrap();
  assert_eq!(caches[0].get(&other, &[Flag::SkipRemoteLookup]).await.unwrap(), None);
  assert_eq!(caches[0].get(&other, &[]).await.unwrap(), Some(Param::Int(3)));
}

#[tokio::test]
async fn test_entries_expire() {
  let cluster = cluster(1, FailureConfigMap::default()).await;
  let manager = cluster.nodes[0].manager();
  let short = ConfigurationBuilder::new().lifespan(Duration::from_millis(100)).build();
  manager.define_configuration("short", short);
  let cache = manager.get_cache("short");
  cache.put(Param::from("a"), Param::Int(1), &[]).await.unwrap();
  cache.put(Param::from("b"), Param::Int(2), &[]).await.unwrap();
  assert_eq!(cache.size(), 2);
  sleep(Duration::from_millis(200)).await;
  assert_eq!(cache.get(&Param::from("a"), &[]).await.unwrap(), None);
  assert_eq!(cache.size(), 0);
  assert_eq!(cache.purge_expired(), 1);
  cache.put(Param::from("a"), Param::Int(3), &[]).await.unwrap();
  assert_eq!(cache.get(&Param::from("a"), &[]).await.unwrap(), Some(Param::Int(3)));
  assert_eq!(cache.size(), 1);
  let quiet = cache.put(Param::from("a"), Param::Int(4), &[Flag::IgnoreReturnValues]).await;
  assert_eq!(quiet.unwrap(), None);

  let reaped = ConfigurationBuilder::read(&Configuration::default())
    .lifespan(Duration::from_millis(50))
    .wake_up_interval(Duration::from_millis(20))
    .enable_reaper()
    .build();
  manager.define_configuration("reaped", reaped);
  let cache = manager.get_cache("reaped");
  cache.put(Param::from("a"), Param::Int(1), &[]).await.unwrap();
  sleep(Duration::from_millis(300)).await;
  assert_eq!(cache.purge_expired(), 0);
  assert_eq!(manager.cache_names(), vec!["reaped".to_string(), "short".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_purge_counts_under_concurrent_writes() {
  let cluster = cluster(1, FailureConfigMap::default()).await;
  let manager = cluster.nodes[0].manager();
  let fleeting = ConfigurationBuilder::new().lifespan(Duration::from_millis(1)).build();
  manager.define_configuration("fleeting", fleeting);
  let cache = manager.get_cache("fleeting");
  let writers = (0..4)
    .map(|w| {
      let cache = cache.clone();
      tokio::spawn(async move {
        for i in 0..500 {
          cache.put(Param::from(format!("{}-{}", w, i)), Param::Int(i), &[]).await.unwrap();
        }
      })
    })
    .collect::<Vec<_>>();
  let purger = {
    let cache = cache.clone();
    tokio::task::spawn_blocking(move || {
      let mut purged = 0;
      for _ in 0..2000 {
        purged += cache.purge_expired();
      }
      purged
    })
  };
  for writer in writers {
    writer.await.unwrap();
  }
  let mut purged = purger.await.unwrap();
  sleep(Duration::from_millis(20)).await;
  purged += cache.purge_expired();
  assert_eq!(purged, 2000);
}
