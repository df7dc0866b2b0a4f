use clap::Parser;
use color_eyre::eyre::{ensure, Result, WrapErr};
use k3os_operator::{
    agent::{self, AgentArgs},
    constants::{DEBUG_ENV, ROOT_DIR},
};
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    color_eyre::install()?;

    let args = AgentArgs::parse();
    let debug = std::env::var(DEBUG_ENV)
        .map(|raw| raw.parse().unwrap_or(false))
        .unwrap_or(false);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // the reconcilers mutate the host; refuse to start from a partial environment
    ensure!(!args.namespace.is_empty(), "namespace is required");
    ensure!(rustix::process::geteuid().is_root(), "must be run as root");
    let root = Path::new(ROOT_DIR);
    ensure!(root.is_dir(), "stat {}: not a directory", root.display());

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(args.threads.max(1))
        .enable_all()
        .build()
        .wrap_err("failed to build the runtime")?
        .block_on(agent::run(args))
        .map_err(Into::into)
}
