use crate::{
    release::Resolver,
    store::{ChannelStore, JobStore},
    system::{NodeState, Reboot},
};
use std::sync::Arc;

pub mod channel;
pub mod job;

/// Process-wide identity and capabilities, constructed once at bootstrap and
/// threaded into both reconcilers.
pub struct AgentContext {
    /// This agent's cluster node name.
    pub node: String,
    /// Namespace the operator manages.
    pub namespace: String,
    /// Verbose-logging flag, propagated into spawned upgrade jobs.
    pub debug: bool,
    pub channels: Arc<dyn ChannelStore>,
    pub jobs: Arc<dyn JobStore>,
    pub state: Arc<dyn NodeState>,
    pub resolver: Arc<dyn Resolver>,
    pub reboot: Arc<dyn Reboot>,
}
