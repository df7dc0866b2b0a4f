use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// UpdateChannel is both operator-provided configuration and the coordination
/// medium the per-node agents converge through. Agents author single-field
/// mutations only; the cluster store's optimistic concurrency arbitrates races.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "k3os.io",
    version = "v1",
    kind = "UpdateChannel",
    namespaced,
    status = "UpdateChannelStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct UpdateChannelSpec {
    /// Release channel locator, e.g. `github-releases://rancher/k3os`.
    pub url: String,
    /// Desired version. Empty or `latest` means poll and resolve.
    #[serde(default)]
    pub version: String,
    /// Maximum number of nodes allowed to be upgrading this channel at once.
    pub concurrency: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateChannelStatus {
    /// Node currently elected to poll the channel, or empty.
    #[serde(default)]
    pub polling: String,
    /// Active upgrade slots, each `<node>` or `<node>:<job-uid>`.
    #[serde(default)]
    pub upgrading: Vec<String>,
}

impl UpdateChannel {
    /// The elected poller, tolerating a status no reconciler has written yet.
    pub fn polling(&self) -> &str {
        self.status.as_ref().map_or("", |status| &status.polling)
    }

    /// The active upgrade slots.
    pub fn upgrading(&self) -> &[String] {
        match &self.status {
            Some(status) => &status.upgrading,
            None => &[],
        }
    }
}

/// True when the desired version asks for resolution instead of naming a
/// concrete release.
pub fn wants_latest(version: &str) -> bool {
    let version = version.trim();
    version.is_empty() || version.eq_ignore_ascii_case("latest")
}

/// Node component of a slot entry. Matching is exact on the component, so a
/// node whose name prefixes another's cannot touch the other's slot.
pub fn slot_node(entry: &str) -> &str {
    entry.split_once(':').map_or(entry, |(node, _)| node)
}

/// Job uid component of a dispatched slot entry.
pub fn slot_uid(entry: &str) -> Option<&str> {
    entry.split_once(':').map(|(_, uid)| uid)
}

/// Slot entry recording the job dispatched for a node.
pub fn slot_entry(node: &str, uid: &str) -> String {
    format!("{node}:{uid}")
}
