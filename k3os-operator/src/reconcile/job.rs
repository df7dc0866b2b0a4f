use super::AgentContext;
use crate::{
    channel::{slot_uid, UpdateChannel},
    constants::REBOOT_DELAY,
    error::{Error, Result},
};
use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
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

fn completed(job: &Job) -> bool {
    job.status
        .as_ref()
        .and_then(|status| status.completion_time.as_ref())
        .is_some()
}

fn succeeded(job: &Job) -> bool {
    job.status
        .as_ref()
        .and_then(|status| status.succeeded)
        .unwrap_or(0)
        > 0
}

fn target_node(job: &Job) -> Option<&str> {
    job.spec.as_ref()?.template.spec.as_ref()?.node_name.as_deref()
}

fn holds_slot(channel: &UpdateChannel, uid: &str) -> bool {
    channel
        .upgrading()
        .iter()
        .any(|entry| slot_uid(entry) == Some(uid))
}

/// Release the slots a completed job holds and reboot this node when its own
/// upgrade succeeded.
///
/// Any agent may release any slot, so a node that reboots straight out of a
/// successful job cannot leave its slot wedged. Slot entries are matched on
/// the job uid alone.
pub(crate) async fn reconcile(job: Arc<Job>, ctx: Arc<AgentContext>) -> Result<Action> {
    if !completed(&job) {
        return Ok(Action::await_change());
    }
    let Some(uid) = job.uid() else {
        return Ok(Action::await_change());
    };

    for channel in ctx.channels.list().await? {
        if !holds_slot(&channel, &uid) {
            continue;
        }
        let mut released = channel.clone();
        released
            .status
            .get_or_insert_with(Default::default)
            .upgrading
            .retain(|entry| slot_uid(entry) != Some(uid.as_str()));
        match ctx.channels.update_status(&released).await {
            Ok(written) => {
                info!(channel = %written.name_any(), job = %job.name_any(), "released upgrade slot");
            }
            // a lost race here means another agent released the slot first
            Err(err) => {
                warn!(channel = %channel.name_any(), %err, "failed to release upgrade slot");
            }
        }
    }

    // repeat completion events could each schedule a reboot; the node reboots
    // on the first, so later ones are moot
    if target_node(&job) == Some(ctx.node.as_str()) && succeeded(&job) {
        ctx.reboot.schedule(REBOOT_DELAY);
    }
    Ok(Action::await_change())
}

pub(crate) fn error_policy(job: Arc<Job>, err: &Error, _ctx: Arc<AgentContext>) -> Action {
    warn!(job = %job.name_any(), %err, "job reconcile failed");
    Action::requeue(Duration::from_secs(15))
}

/// Run the job controller until shutdown.
pub async fn controller(client: Client, ctx: Arc<AgentContext>) {
    let jobs: Api<Job> = Api::namespaced(client, &ctx.namespace);
    Controller::new(jobs, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|reconciled| async move {
            match reconciled {
                Ok((job, _)) => debug!(%job, "job reconciled"),
                Err(err) => warn!(%err, "job controller error"),
            }
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::UpdateChannelStatus,
        job::upgrade_job,
        reconcile::testing::{local, test_channel, Cluster},
    };
    use k8s_openapi::{
        api::batch::v1::JobStatus,
        apimachinery::pkg::apis::meta::v1::Time,
        chrono::Utc,
    };

    const NAME: &str = "github-releases";

    fn finished_job(node: &str, uid: &str, successes: i32) -> Arc<Job> {
        let channel = test_channel("v1.0.0", 1);
        let mut job = upgrade_job(&channel, node, false, false);
        job.metadata.uid = Some(uid.to_string());
        job.status = Some(JobStatus {
            completion_time: Some(Time(Utc::now())),
            succeeded: Some(successes),
            ..Default::default()
        });
        Arc::new(job)
    }

    fn seed_with_slots(cluster: &Cluster, upgrading: &[&str]) {
        let mut channel = test_channel("v1.0.0", 2);
        channel.status = Some(UpdateChannelStatus {
            polling: String::new(),
            upgrading: upgrading.iter().map(|entry| entry.to_string()).collect(),
        });
        cluster.channels.seed(channel);
    }

    #[tokio::test]
    async fn completion_releases_the_matching_slot() {
        let cluster = Cluster::new();
        let ctx = cluster.agent("n1", local("local", "v0.9.0"), "v1.0.0");
        seed_with_slots(&cluster, &["n1:uid-1", "n2:uid-2"]);

        reconcile(finished_job("n1", "uid-1", 1), ctx).await.unwrap();

        let channel = cluster.channels.get(NAME);
        assert_eq!(channel.upgrading(), ["n2:uid-2"]);
    }

    #[tokio::test]
    async fn any_agent_may_release_any_slot() {
        let cluster = Cluster::new();
        // n2 observes n1's job completing, e.g. because n1 already rebooted out
        let ctx = cluster.agent("n2", local("local", "v0.9.0"), "v1.0.0");
        seed_with_slots(&cluster, &["n1:uid-1"]);

        reconcile(finished_job("n1", "uid-1", 1), ctx).await.unwrap();

        assert!(cluster.channels.get(NAME).upgrading().is_empty());
        // releasing someone else's slot never reboots this node
        assert!(cluster.reboot.delays.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn own_successful_job_schedules_one_delayed_reboot() {
        let cluster = Cluster::new();
        let ctx = cluster.agent("n1", local("local", "v0.9.0"), "v1.0.0");
        seed_with_slots(&cluster, &["n1:uid-1"]);

        reconcile(finished_job("n1", "uid-1", 1), ctx).await.unwrap();

        let delays = cluster.reboot.delays.lock().unwrap();
        assert_eq!(*delays, [Duration::from_secs(5)]);
    }

    #[tokio::test]
    async fn failed_job_releases_the_slot_without_rebooting() {
        let cluster = Cluster::new();
        let ctx = cluster.agent("n1", local("local", "v0.9.0"), "v1.0.0");
        seed_with_slots(&cluster, &["n1:uid-1"]);

        reconcile(finished_job("n1", "uid-1", 0), ctx).await.unwrap();

        assert!(cluster.channels.get(NAME).upgrading().is_empty());
        assert!(cluster.reboot.delays.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn incomplete_job_is_left_alone() {
        let cluster = Cluster::new();
        let ctx = cluster.agent("n1", local("local", "v0.9.0"), "v1.0.0");
        seed_with_slots(&cluster, &["n1:uid-1"]);

        let channel = test_channel("v1.0.0", 1);
        let mut job = upgrade_job(&channel, "n1", false, false);
        job.metadata.uid = Some("uid-1".to_string());
        reconcile(Arc::new(job), ctx).await.unwrap();

        assert_eq!(cluster.channels.get(NAME).upgrading(), ["n1:uid-1"]);
        assert!(cluster.reboot.delays.lock().unwrap().is_empty());
        assert_eq!(cluster.channels.writes(), 0);
    }

    #[tokio::test]
    async fn unmatched_uid_releases_no_slots() {
        let cluster = Cluster::new();
        let ctx = cluster.agent("n1", local("local", "v0.9.0"), "v1.0.0");
        seed_with_slots(&cluster, &["n2:uid-9"]);

        reconcile(finished_job("n1", "uid-1", 0), ctx).await.unwrap();

        assert_eq!(cluster.channels.get(NAME).upgrading(), ["n2:uid-9"]);
        assert_eq!(cluster.channels.writes(), 0);
    }
}
