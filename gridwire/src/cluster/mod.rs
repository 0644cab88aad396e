//! Cluster-wide operations built on top of the [`Transport`](crate::core::Transport).
//!
//! Creating a cache on all members is not done once the command has been delivered: a member
//! that just joined may not see the others' writes yet. The [`FormationBarrier`] waits for the
//! expected membership and then for every member to observe every other one in the new cache.

mod coordinator;
mod formation;

#[rustfmt::skip]
pub use {
  coordinator::ClusterFormationCoordinator,
  formation::FormationBarrier,
  formation::FormationConfig,
  formation::FormationOutcome,
};
