use crate::{
    channel::{UpdateChannel, UpdateChannelSpec},
    constants::{
        DEBUG_ENV, DEFAULT_CHANNEL_NAME, DEFAULT_CHANNEL_URL, DEFAULT_NAMESPACE, MODE_FILE,
        NODE_ANNOTATION, NODE_ENV, ROOT_DIR,
    },
    error::{KubeClient, MissingNodeName, Result},
    reconcile::{self, AgentContext},
    release::SchemeResolver,
    store::{ChannelStore, JobStore, KubeChannels, KubeJobs},
    system::{self, HostState, SystemReboot},
};
use clap::Parser;
use kube::{Client, ResourceExt};
use snafu::{OptionExt, ResultExt};
use std::{collections::BTreeMap, path::Path, sync::Arc};
use tracing::{info, warn};

/// The per-node resource controller.
#[derive(Debug, Parser)]
#[command(name = "k3os-operator", version, about = "k3os update channel controller")]
pub struct AgentArgs {
    /// Namespace holding the operator's resources.
    #[arg(long, env = "K3OS_OPERATOR_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Reconciler worker threads.
    #[arg(long, env = "K3OS_OPERATOR_THREADS", default_value_t = 1)]
    pub threads: usize,
}

/// Wire the reconcilers to the cluster and block until a termination signal.
pub async fn run(args: AgentArgs) -> Result<()> {
    let node = std::env::var(NODE_ENV)
        .ok()
        .filter(|name| !name.is_empty())
        .context(MissingNodeName)?;
    let debug = std::env::var(DEBUG_ENV)
        .map(|raw| raw.parse().unwrap_or(false))
        .unwrap_or(false);

    let root = Path::new(ROOT_DIR);
    let version = system::os_version(root).await?;
    if version.runtime != version.current {
        warn!(current = %version.current, runtime = %version.runtime, "runtime version differs from current");
    }
    info!(
        previous = %version.previous,
        current = %version.current,
        runtime = %version.runtime,
        "k3os version"
    );
    if !system::kernel_upgradable(root).await {
        warn!("no kernel artifact installed, kernel upgrades disabled");
    }
    match system::kernel_version(root).await {
        Ok(kernel) => info!(
            previous = %kernel.previous,
            current = %kernel.current,
            runtime = %kernel.runtime,
            "kernel version"
        ),
        Err(err) => warn!(%err, "kernel version unavailable"),
    }

    let client = Client::try_default().await.context(KubeClient)?;
    let channels: Arc<dyn ChannelStore> = Arc::new(KubeChannels::new(client.clone(), &args.namespace));
    let jobs: Arc<dyn JobStore> = Arc::new(KubeJobs::new(client.clone(), &args.namespace));
    let ctx = Arc::new(AgentContext {
        node: node.clone(),
        namespace: args.namespace.clone(),
        debug,
        channels: channels.clone(),
        jobs,
        state: Arc::new(HostState::new(ROOT_DIR, MODE_FILE)),
        resolver: Arc::new(SchemeResolver),
        reboot: Arc::new(SystemReboot),
    });

    seed_default_channel(channels.as_ref(), &args.namespace, &node, &version.runtime).await;

    info!(node = %node, namespace = %args.namespace, "starting controllers");
    futures::join!(
        reconcile::channel::controller(client.clone(), ctx.clone()),
        reconcile::job::controller(client, ctx),
    );
    Ok(())
}

/// Seed a channel tracking the upstream releases when the namespace has none,
/// pinned to the running version so nothing upgrades until an operator or a
/// poll says so. Failures here are warnings; the agent still runs.
async fn seed_default_channel(channels: &dyn ChannelStore, namespace: &str, node: &str, version: &str) {
    let existing = match channels.list().await {
        Ok(existing) => existing,
        Err(err) => {
            warn!(%err, "failed to list update channels");
            return;
        }
    };
    if !existing.is_empty() {
        return;
    }

    let mut channel = UpdateChannel::new(
        DEFAULT_CHANNEL_NAME,
        UpdateChannelSpec {
            url: DEFAULT_CHANNEL_URL.to_string(),
            version: version.to_string(),
            concurrency: 1,
        },
    );
    channel.metadata.namespace = Some(namespace.to_string());
    channel.metadata.annotations = Some(BTreeMap::from([(
        NODE_ANNOTATION.to_string(),
        node.to_string(),
    )]));

    match channels.create(&channel).await {
        Ok(created) => info!(
            name = %created.name_any(),
            url = %created.spec.url,
            version = %created.spec.version,
            concurrency = created.spec.concurrency,
            "created default update channel"
        ),
        Err(err) => warn!(%err, "failed to create default update channel"),
    }
}
