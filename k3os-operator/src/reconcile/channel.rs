use super::AgentContext;
use crate::{
    channel::{slot_entry, slot_node, wants_latest, UpdateChannel, UpdateChannelStatus},
    constants::MODE_LIVE,
    error::{Error, Result},
    job::upgrade_job,
    system::LocalState,
};
use futures::StreamExt;
use kube::{
    api::Api,
    runtime::{
        controller::{Action, Controller},
        watcher,
    },
    Client, ResourceExt,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

/// One single-field mutation of the shared channel, or nothing. Every pass
/// authors at most one transition; the store's optimistic concurrency
/// arbitrates between agents authoring at the same revision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    SetPolling,
    PollLatest,
    ClearPolling,
    SetUpgrading,
    UpgradeNode,
    ClearUpgrading,
    Noop,
}

fn should_poll(channel: &UpdateChannel) -> bool {
    wants_latest(&channel.spec.version)
}

fn is_polling(channel: &UpdateChannel, node: &str) -> bool {
    channel.polling() == node
}

fn can_poll(channel: &UpdateChannel) -> bool {
    channel.polling().is_empty()
}

fn should_upgrade(channel: &UpdateChannel, local: &LocalState) -> bool {
    match (&local.mode, &local.os_current) {
        (Some(mode), Some(current)) => {
            mode.trim() != MODE_LIVE && current != &channel.spec.version
        }
        // uncertain local state never starts an upgrade
        _ => false,
    }
}

fn is_upgrading(channel: &UpdateChannel, node: &str) -> bool {
    channel.upgrading().iter().any(|entry| slot_node(entry) == node)
}

fn can_upgrade(channel: &UpdateChannel) -> bool {
    channel.spec.concurrency > channel.upgrading().len()
}

/// The next transition for this node, computed from observed state alone.
///
/// Evaluated top to bottom, first match wins. Polling takes precedence over
/// upgrading, and while any node is polling no upgrade state moves. Clearing
/// the poll only wins once the version is concrete, so an operator pinning a
/// version mid-poll lets the election drain rather than interrupting it.
pub fn plan(channel: &UpdateChannel, node: &str, local: &LocalState) -> Transition {
    if should_poll(channel) && !is_polling(channel, node) && can_poll(channel) {
        return Transition::SetPolling;
    }
    if should_poll(channel) && is_polling(channel, node) {
        return Transition::PollLatest;
    }
    if is_polling(channel, node) {
        return Transition::ClearPolling;
    }
    if channel.polling().is_empty() {
        if should_upgrade(channel, local) && !is_upgrading(channel, node) && can_upgrade(channel) {
            return Transition::SetUpgrading;
        }
        if should_upgrade(channel, local) && is_upgrading(channel, node) {
            return Transition::UpgradeNode;
        }
        if is_upgrading(channel, node) {
            return Transition::ClearUpgrading;
        }
    }
    Transition::Noop
}

fn status_mut(channel: &mut UpdateChannel) -> &mut UpdateChannelStatus {
    channel.status.get_or_insert_with(UpdateChannelStatus::default)
}

/// Apply one transition through the store. Returns the written channel, or
/// `None` when the pass authored nothing.
pub async fn step(
    ctx: &AgentContext,
    observed: &UpdateChannel,
    local: &LocalState,
    transition: Transition,
) -> Result<Option<UpdateChannel>> {
    let mut channel = observed.clone();
    match transition {
        Transition::SetPolling => {
            status_mut(&mut channel).polling = ctx.node.clone();
        }
        Transition::PollLatest => {
            // resolver failure propagates without mutation; the next
            // reconciliation retries
            let latest = ctx.resolver.latest(&channel.spec.url).await?;
            debug!(channel = %channel.name_any(), version = %latest.name, "resolved latest release");
            channel.spec.version = latest.name;
        }
        Transition::ClearPolling => {
            status_mut(&mut channel).polling.clear();
        }
        Transition::SetUpgrading => {
            let node = ctx.node.clone();
            status_mut(&mut channel).upgrading.push(node);
        }
        Transition::UpgradeNode => {
            let Some(slot) = channel
                .upgrading()
                .iter()
                .position(|entry| entry.as_str() == ctx.node)
            else {
                // this node's slot is already dispatched
                return Ok(None);
            };
            let job = upgrade_job(&channel, &ctx.node, local.kernel_upgradable, ctx.debug);
            let created = ctx.jobs.create(&job).await?;
            let uid = created.uid().unwrap_or_default();
            status_mut(&mut channel).upgrading[slot] = slot_entry(&ctx.node, &uid);
        }
        Transition::ClearUpgrading => {
            let node = ctx.node.clone();
            status_mut(&mut channel)
                .upgrading
                .retain(|entry| slot_node(entry) != node);
        }
        Transition::Noop => return Ok(None),
    }
    // the version is spec; everything else this machine authors is status and
    // must go through the status subresource to persist
    match transition {
        Transition::PollLatest => ctx.channels.update(&channel).await.map(Some),
        _ => ctx.channels.update_status(&channel).await.map(Some),
    }
}

pub(crate) async fn reconcile(channel: Arc<UpdateChannel>, ctx: Arc<AgentContext>) -> Result<Action> {
    let local = ctx.state.observe().await;
    let transition = plan(&channel, &ctx.node, &local);
    debug!(
        channel = %channel.name_any(),
        node = %ctx.node,
        ?transition,
        polling = %channel.polling(),
        upgrading = ?channel.upgrading(),
        "reconciling update channel"
    );
    match step(&ctx, &channel, &local, transition).await {
        Ok(Some(written)) => {
            info!(channel = %written.name_any(), ?transition, "applied channel transition");
        }
        Ok(None) => {}
        Err(err) if err.is_write_conflict() => {
            // lost the revision race; the winner's write re-drives this loop
            debug!(channel = %channel.name_any(), %err, "dropped conflicting write");
        }
        Err(err) => return Err(err),
    }
    Ok(Action::await_change())
}

pub(crate) fn error_policy(channel: Arc<UpdateChannel>, err: &Error, _ctx: Arc<AgentContext>) -> Action {
    warn!(channel = %channel.name_any(), %err, "channel reconcile failed");
    Action::requeue(Duration::from_secs(15))
}

/// Run the channel controller until shutdown.
pub async fn controller(client: Client, ctx: Arc<AgentContext>) {
    let channels: Api<UpdateChannel> = Api::namespaced(client, &ctx.namespace);
    Controller::new(channels, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|reconciled| async move {
            match reconciled {
                Ok((channel, _)) => debug!(%channel, "channel reconciled"),
                Err(err) => warn!(%err, "channel controller error"),
            }
        })
        .await;
}
