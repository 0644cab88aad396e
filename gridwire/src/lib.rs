//! `gridwire` is the cluster layer of an in-memory data grid node: it ships commands to other
//! members of a dynamic cluster, waits for (or ignores) their responses under configurable
//! delivery guarantees, and knows when a cache created on every member has actually spanned the
//! cluster.
//!
//! The crate is organized as follows:
//! - [`core`]: addresses and views, the wire model, the command registry and the
//!   [`Transport`](crate::core::Transport).
//! - [`commands`]: the commands members run on each other's behalf.
//! - [`cache`]: the caches and cache manager commands act on.
//! - [`cluster`]: cluster-wide cache creation and the formation barrier.
//! - [`group`]: the group channel underneath the transport, with an in-process implementation.
//! - [`testkit`]: in-process clusters, failure injection and logging setup.

pub mod cache;
pub mod cluster;
pub mod commands;
pub mod core;
pub mod group;
pub mod testkit;
