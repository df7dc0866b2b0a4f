//! Fleet update controller for k3os nodes.
//!
//! One agent runs per cluster node. The agents cooperate through shared
//! [`channel::UpdateChannel`] resources: they elect a per-channel poller to
//! resolve `latest` into a concrete release, gate how many nodes may upgrade
//! at once, schedule a privileged per-node upgrade job, and reboot each node
//! when its job succeeds. There is no leader election; agents converge by
//! authoring single-field mutations under the store's optimistic concurrency.

pub mod agent;
pub mod channel;
pub mod constants;
pub mod error;
pub mod job;
pub mod reconcile;
pub mod release;
pub mod store;
pub mod system;
