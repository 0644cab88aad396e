use crate::core::Address;
use im::HashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How frames sent to one member misbehave.
#[derive(Default, Serialize, Deserialize, Clone, Copy, Debug)]
pub struct FailureConfig {
  /// The probability a frame is silently dropped.
  pub drop_prob: f64,
  /// A frame is held back for a uniformly chosen time in this range before delivery.
  pub delay: Option<(Duration, Duration)>,
}
impl FailureConfig {
  pub fn unreachable() -> FailureConfig {
    FailureConfig {
      drop_prob: 1.0,
      delay: None,
    }
  }

  pub fn delayed(min: Duration, max: Duration) -> FailureConfig {
    FailureConfig {
      drop_prob: 0.0,
      delay: Some((min, max)),
    }
  }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct FailureConfigMap {
  pub cluster_wide: FailureConfig,
  pub node_wide: HashMap<Address, FailureConfig>,
}
impl FailureConfigMap {
  pub fn get(&self, address: &Address) -> &FailureConfig {
    self.node_wide.get(address).unwrap_or(&self.cluster_wide)
  }

  pub fn with(mut self, address: Address, config: FailureConfig) -> Self {
    self.node_wide.insert(address, config);
    self
  }
}

#[test]
fn test_node_wide_overrides_cluster_wide() {
  let a = Address::loopback(7800, 0);
  let b = Address::loopback(7801, 1);
  let map = FailureConfigMap::default().with(b.clone(), FailureConfig::unreachable());
  assert_eq!(map.get(&a).drop_prob, 0.0);
  assert_eq!(map.get(&b).drop_prob, 1.0);
}
