use crate::cache::{Cache, Flag};
use crate::core::{Address, GridError, Param, Transport};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace, warn};

const MARKER_FLAGS: [Flag; 3] = [Flag::SkipLocking, Flag::ForceAsynchronous, Flag::SkipRemoteLookup];

/// Configures the [`FormationBarrier`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FormationConfig {
  /// How often the barrier checks the view size while waiting for the expected membership.
  ///
  /// default: `50 milliseconds`
  pub poll_interval: Duration,
  /// The pause between two rounds of marker writes.
  ///
  /// default: `50 milliseconds`
  pub round_interval: Duration,
  /// The maximum number of marker rounds. Running out is logged, and the barrier returns anyway.
  ///
  /// default: `300`
  pub rounds: usize,
  /// How long to wait for the expected membership before failing with
  /// [`GridError::ClusterFormationTimeout`]. With `None`, the barrier waits for as long as it
  /// takes, which is forever if the expected members never join.
  ///
  /// default: `None`
  pub membership_timeout: Option<Duration>,
}
impl Default for FormationConfig {
  #[inline]
  fn default() -> Self {
    FormationConfig {
      poll_interval: Duration::from_millis(50),
      round_interval: Duration::from_millis(50),
      rounds: 300,
      membership_timeout: None,
    }
  }
}
impl FormationConfig {
  /// The longest the marker rounds can take.
  pub fn round_budget(&self) -> Duration {
    let rounds = u32::try_from(self.rounds).unwrap_or(u32::MAX);
    self.round_interval.saturating_mul(rounds)
  }
}

/// What the barrier observed when it returned.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FormationOutcome {
  /// Every member of the final view saw its marker here.
  pub converged: bool,
  pub rounds_used: usize,
  pub members: Vec<Address>,
}

/// Waits for a freshly started cache to span the cluster.
///
/// The barrier first waits for the view to reach the expected size. It then writes a marker
/// entry keyed by the local address into the cache, without waiting on replication, and checks
/// whether the markers of all current members have arrived locally. Marker writes are repeated
/// every round, since members that had not started the cache yet drop them.
pub struct FormationBarrier {
  config: FormationConfig,
}
impl FormationBarrier {
  pub fn new(config: FormationConfig) -> FormationBarrier {
    FormationBarrier { config: config }
  }

  pub async fn await_formation(
    &self,
    cache: &Cache,
    transport: &dyn Transport,
    expected_size: usize,
  ) -> Result<FormationOutcome, GridError> {
    self.await_membership(transport, expected_size).await?;
    self.await_visibility(cache, transport).await
  }

  async fn await_membership(
    &self,
    transport: &dyn Transport,
    expected_size: usize,
  ) -> Result<(), GridError> {
    let started = Instant::now();
    loop {
      let observed = transport.members().len();
      if observed == expected_size {
        debug!(expected_size, waited = ?started.elapsed(), "expected membership reached");
        return Ok(());
      }
      if let Some(limit) = self.config.membership_timeout {
        let waited = started.elapsed();
        if waited >= limit {
          return Err(GridError::ClusterFormationTimeout {
            expected: expected_size,
            observed: observed,
            waited: waited,
          });
        }
      }
      trace!(observed, expected_size, "waiting for members to join");
      sleep(self.config.poll_interval).await;
    }
  }

  async fn await_visibility(
    &self,
    cache: &Cache,
    transport: &dyn Transport,
  ) -> Result<FormationOutcome, GridError> {
    let marker = Param::Address(transport.address());
    for round in 1..=self.config.rounds {
      cache.put(marker.clone(), Param::from("0"), &MARKER_FLAGS).await?;
      let members = transport.members();
      let missing = members.iter().filter(|m| !cache.contains_key(&Param::Address((*m).clone()))).count();
      if missing == 0 {
        debug!(cache = cache.name(), round, "all markers visible");
        return Ok(FormationOutcome {
          converged: true,
          rounds_used: round,
          members: members,
        });
      }
      trace!(cache = cache.name(), round, missing, "markers still missing");
      sleep(self.config.round_interval).await;
    }
    let members = transport.members();
    warn!(
      cache = cache.name(),
      rounds = self.config.rounds,
      members = members.len(),
      "gave up waiting for every member to see the cache, continuing"
    );
    Ok(FormationOutcome {
      converged: false,
      rounds_used: self.config.rounds,
      members: members,
    })
  }
}

#[test]
fn test_default_budget() {
  let config = FormationConfig::default();
  assert_eq!(config.round_budget(), Duration::from_secs(15));
  assert!(config.membership_timeout.is_none());
}

#[test]
fn test_round_budget_saturates() {
  let config = FormationConfig {
    round_interval: Duration::MAX,
    rounds: usize::MAX,
    ..FormationConfig::default()
  };
  assert_eq!(config.round_budget(), Duration::MAX);
}
