use snafu::Snafu;
use std::path::PathBuf;

/// Failure modes of the operator agent.
///
/// Write conflicts are expected under the optimistic-concurrency model and are
/// dropped by the reconcilers; the next change event re-drives the loop.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum Error {
    #[snafu(display("failed to initialize the Kubernetes client: {source}"))]
    KubeClient { source: kube::Error },

    #[snafu(display("failed to list UpdateChannels in namespace '{namespace}': {source}"))]
    ListChannels {
        namespace: String,
        source: kube::Error,
    },

    #[snafu(display("write to UpdateChannel '{name}' rejected at a stale revision"))]
    WriteConflict { name: String },

    #[snafu(display("failed to write UpdateChannel '{name}': {source}"))]
    WriteChannel { name: String, source: kube::Error },

    #[snafu(display("failed to create UpdateChannel '{name}': {source}"))]
    CreateChannel { name: String, source: kube::Error },

    #[snafu(display("upgrade job '{name}' already exists, delete it to let the upgrade proceed"))]
    JobConflict { name: String },

    #[snafu(display("failed to create upgrade job '{name}': {source}"))]
    CreateJob { name: String, source: kube::Error },

    #[snafu(display("malformed channel url '{url}': {source}"))]
    ParseChannelUrl {
        url: String,
        source: url::ParseError,
    },

    #[snafu(display("channel url '{url}' names no known release driver"))]
    UnknownChannelScheme { url: String },

    #[snafu(display("channel url '{url}' is missing the repository owner or name"))]
    IncompleteChannelUrl { url: String },

    #[snafu(display("release channel '{url}' is unreachable: {source}"))]
    UpstreamUnavailable {
        url: String,
        source: reqwest::Error,
    },

    #[snafu(display("release channel '{url}' returned an undecodable response: {source}"))]
    UpstreamMalformed {
        url: String,
        source: reqwest::Error,
    },

    #[snafu(display("failed to read version link '{}': {source}", path.display()))]
    ReadVersionLink {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to read boot mode from '{}': {source}", path.display()))]
    ReadBootMode {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("{} is not set", crate::constants::NODE_ENV))]
    MissingNodeName,
}

impl Error {
    /// True for the lost-update race on the shared channel. These are dropped,
    /// never retried in place.
    pub fn is_write_conflict(&self) -> bool {
        matches!(self, Error::WriteConflict { .. })
    }
}

/// True when the cluster API rejected a write at a stale resource version or
/// because the object already exists.
pub(crate) fn kube_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 409)
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
