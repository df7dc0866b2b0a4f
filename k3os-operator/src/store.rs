use crate::{
    channel::UpdateChannel,
    error::{self, Error, ListChannels, Result},
};
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use kube::{
    api::{Api, ListParams, Patch, PatchParams, PostParams},
    Client, ResourceExt,
};
use serde_json::json;
use snafu::ResultExt;

/// Channel storage capability consumed by the reconcilers. Backing stores are
/// expected to reject writes at stale revisions; reconcilers drop those
/// conflicts and re-drive from the next observed state.
///
/// The channel carries a status subresource, so spec and status move through
/// separate writes: `update` is blind to status changes and `update_status`
/// is blind to spec changes.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// All channels in the managed namespace.
    async fn list(&self) -> Result<Vec<UpdateChannel>>;
    /// Compare-and-swap write of one channel's spec at its observed revision.
    async fn update(&self, channel: &UpdateChannel) -> Result<UpdateChannel>;
    /// Compare-and-swap write of one channel's status, through the status
    /// subresource, at its observed revision.
    async fn update_status(&self, channel: &UpdateChannel) -> Result<UpdateChannel>;
    /// Create a channel.
    async fn create(&self, channel: &UpdateChannel) -> Result<UpdateChannel>;
}

/// Job creation capability. An already-existing job surfaces as a conflict
/// for the operator to clean up, never as a silent retry.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: &Job) -> Result<Job>;
}

/// `ChannelStore` backed by the cluster API, scoped to one namespace.
pub struct KubeChannels {
    api: Api<UpdateChannel>,
    namespace: String,
}

impl KubeChannels {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
        }
    }
}

fn write_error(name: String, source: kube::Error) -> Error {
    if error::kube_conflict(&source) {
        Error::WriteConflict { name }
    } else {
        Error::WriteChannel { name, source }
    }
}

#[async_trait]
impl ChannelStore for KubeChannels {
    async fn list(&self) -> Result<Vec<UpdateChannel>> {
        let channels = self
            .api
            .list(&ListParams::default())
            .await
            .context(ListChannels {
                namespace: self.namespace.clone(),
            })?;
        Ok(channels.items)
    }

    async fn update(&self, channel: &UpdateChannel) -> Result<UpdateChannel> {
        let name = channel.name_any();
        self.api
            .replace(&name, &PostParams::default(), channel)
            .await
            .map_err(|source| write_error(name.clone(), source))
    }

    async fn update_status(&self, channel: &UpdateChannel) -> Result<UpdateChannel> {
        let name = channel.name_any();
        // the observed revision rides in the patch so a stale writer still
        // loses with a conflict
        let patch = json!({
            "metadata": { "resourceVersion": channel.resource_version() },
            "status": channel.status,
        });
        self.api
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|source| write_error(name.clone(), source))
    }

    async fn create(&self, channel: &UpdateChannel) -> Result<UpdateChannel> {
        let name = channel.name_any();
        self.api
            .create(&PostParams::default(), channel)
            .await
            .map_err(|source| Error::CreateChannel {
                name: name.clone(),
                source,
            })
    }
}

/// `JobStore` backed by the cluster API, scoped to one namespace.
pub struct KubeJobs {
    api: Api<Job>,
}

impl KubeJobs {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl JobStore for KubeJobs {
    async fn create(&self, job: &Job) -> Result<Job> {
        let name = job.name_any();
        self.api
            .create(&PostParams::default(), job)
            .await
            .map_err(|source| {
                if error::kube_conflict(&source) {
                    Error::JobConflict { name: name.clone() }
                } else {
                    Error::CreateJob {
                        name: name.clone(),
                        source,
                    }
                }
            })
    }
}


#[cfg(test)]
mod tests {
    use super::{fake::FakeChannels, ChannelStore};
    use crate::channel::{UpdateChannel, UpdateChannelSpec, UpdateChannelStatus};

    fn channel(version: &str) -> UpdateChannel {
        let mut channel = UpdateChannel::new(
            "github-releases",
            UpdateChannelSpec {
                url: "github-releases://rancher/k3os".to_string(),
                version: version.to_string(),
                concurrency: 1,
            },
        );
        channel.metadata.namespace = Some("k3os-system".to_string());
        channel
    }

    #[tokio::test]
    async fn main_resource_write_cannot_touch_status() {
        let store = FakeChannels::default();
        let mut seeded = store.seed(channel("v1.0.0"));
        seeded.status = Some(UpdateChannelStatus {
            polling: "n1".to_string(),
            upgrading: vec![],
        });
        seeded.spec.version = "v1.1.0".to_string();

        store.update(&seeded).await.unwrap();

        let stored = store.get("github-releases");
        assert_eq!(stored.spec.version, "v1.1.0");
        assert_eq!(stored.polling(), "");
    }

    #[tokio::test]
    async fn status_write_cannot_touch_spec() {
        let store = FakeChannels::default();
        let mut seeded = store.seed(channel("v1.0.0"));
        seeded.status = Some(UpdateChannelStatus {
            polling: "n1".to_string(),
            upgrading: vec![],
        });
        seeded.spec.version = "v1.1.0".to_string();

        store.update_status(&seeded).await.unwrap();

        let stored = store.get("github-releases");
        assert_eq!(stored.spec.version, "v1.0.0");
        assert_eq!(stored.polling(), "n1");
    }

    #[tokio::test]
    async fn stale_revisions_conflict_on_either_subresource() {
        let store = FakeChannels::default();
        let seeded = store.seed(channel("v1.0.0"));
        store.update(&seeded).await.unwrap();

        assert!(store.update(&seeded).await.unwrap_err().is_write_conflict());
        assert!(store
            .update_status(&seeded)
            .await
            .unwrap_err()
            .is_write_conflict());
    }
}
