use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::sync::Arc;

/// The DNS name or IP address of the machine hosting a cluster member.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize)]
pub enum Host {
  DNS(String),
  IP(IpAddr),
}
impl From<String> for Host {
  fn from(s: String) -> Self {
    match IpAddr::from_str(s.as_str()) {
      Ok(ip) => Host::IP(ip),
      Err(_) => Host::DNS(s),
    }
  }
}
impl fmt::Display for Host {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Host::DNS(s) => write!(f, "{}", s),
      Host::IP(ip) => write!(f, "{}", ip),
    }
  }
}

/// The identity of a cluster member.
///
/// Addresses are plain values: they are compared, hashed and ordered by their fields, and carry
/// no ownership of the member they name. The `id` distinguishes separate incarnations of a member
/// bound to the same host and port.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize, Ord, PartialOrd)]
pub struct Address {
  /// The DNS name or IP address of the machine hosting the member.
  pub host: Host,
  /// The port the member receives on.
  pub port: u16,
  /// The incarnation of the member.
  pub id: u64,
}
impl Address {
  /// Creates a new [`Address`]
  pub fn new(host: Host, port: u16, id: u64) -> Address {
    Address {
      host: host,
      port: port,
      id: id,
    }
  }

  /// An address on the loopback interface, mostly useful for in-process clusters.
  pub fn loopback(port: u16, id: u64) -> Address {
    Address::new(Host::IP(IpAddr::V4(Ipv4Addr::LOCALHOST)), port, id)
  }
}
impl fmt::Display for Address {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}#{}", self.host, self.port, self.id)
  }
}
impl Default for Address {
  fn default() -> Self {
    Address::new(Host::IP(IpAddr::V4(Ipv4Addr::UNSPECIFIED)), 0, 0)
  }
}

/// An ordered, versioned list of cluster members.
///
/// A new [`View`] is installed whole on every membership change. Readers share it through an
/// [`Arc`] and never see it change underneath them.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct View {
  id: u64,
  members: Vec<Address>,
}
impl View {
  pub fn new(id: u64, members: Vec<Address>) -> View {
    View {
      id: id,
      members: members,
    }
  }

  /// The view installed on a node before it joins, and after it leaves.
  pub fn empty() -> Arc<View> {
    Arc::new(View::default())
  }

  pub fn id(&self) -> u64 {
    self.id
  }

  pub fn members(&self) -> &[Address] {
    &self.members
  }

  /// The oldest member of the view. Only `None` for the empty view.
  pub fn coordinator(&self) -> Option<&Address> {
    self.members.first()
  }

  pub fn contains(&self, addr: &Address) -> bool {
    self.members.contains(addr)
  }

  pub fn size(&self) -> usize {
    self.members.len()
  }
}

#[cfg(test)]
fn addresses(n: u16) -> Vec<Address> {
  (0..n).map(|x| Address::loopback(7800 + x, x as u64)).collect()
}

#[test]
fn test_coordinator_is_first_member() {
  let members = addresses(3);
  let view = View::new(4, vec![members[1].clone(), members[0].clone(), members[2].clone()]);
  assert_eq!(view.coordinator(), Some(&members[1]));
  assert!(view.contains(&members[2]));
  assert_eq!(view.id(), 4);
  assert_eq!(View::empty().coordinator(), None);
}

#[test]
fn test_address_order() {
  let a = Address::loopback(7800, 2);
  let b = Address::loopback(7800, 3);
  let c = Address::loopback(7801, 0);
  assert!(a < b);
  assert!(b < c);
  assert_eq!(a.to_string(), "127.0.0.1:7800#2");
  assert_eq!(Host::from("node-a.local".to_string()), Host::DNS("node-a.local".to_string()));
}
