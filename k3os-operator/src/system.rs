use crate::error::{ReadBootMode, ReadVersionLink, Result};
use async_trait::async_trait;
use snafu::ResultExt;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{fs, process::Command};
use tracing::{debug, info, warn};

/// Previous, current, and runtime versions of one installed artifact.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Version {
    pub previous: String,
    pub current: String,
    pub runtime: String,
}

/// OS versioning information under the system root. The runtime version is
/// the one baked into this binary; current and previous come from the
/// installation symlinks. A missing `previous` link is an empty string, a
/// missing `current` link is an error.
pub async fn os_version(root: &Path) -> Result<Version> {
    let (current, previous) = filesystem_versions(root, "k3os").await?;
    Ok(Version {
        previous,
        current,
        runtime: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Kernel versioning information under the system root; the runtime version
/// is the running kernel's release string.
pub async fn kernel_version(root: &Path) -> Result<Version> {
    let (current, previous) = filesystem_versions(root, "kernel").await?;
    Ok(Version {
        previous,
        current,
        runtime: kernel_release(),
    })
}

/// Release string of the running kernel.
pub fn kernel_release() -> String {
    rustix::system::uname().release().to_string_lossy().into_owned()
}

/// Whether a kernel artifact is installed and therefore upgradable.
pub async fn kernel_upgradable(root: &Path) -> bool {
    fs::metadata(root.join("kernel"))
        .await
        .map(|metadata| metadata.is_dir())
        .unwrap_or(false)
}

/// Boot mode as recorded by the init path, e.g. `live` or `local`.
pub async fn boot_mode(path: &Path) -> Result<String> {
    let raw = fs::read_to_string(path).await.context(ReadBootMode {
        path: path.to_path_buf(),
    })?;
    Ok(raw.split_whitespace().next().unwrap_or_default().to_string())
}

async fn filesystem_versions(root: &Path, artifact: &str) -> Result<(String, String)> {
    let current_link = root.join(artifact).join("current");
    let current = fs::read_link(&current_link).await.context(ReadVersionLink {
        path: current_link.clone(),
    })?;
    // previous is legitimately absent on a first install
    let previous = fs::read_link(root.join(artifact).join("previous"))
        .await
        .map(|link| basename(&link))
        .unwrap_or_default();
    Ok((basename(&current), previous))
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Snapshot of the local facts the channel reconciler consumes. `None` means
/// the probe failed; an uncertain state never initiates an upgrade.
#[derive(Clone, Debug, Default)]
pub struct LocalState {
    pub mode: Option<String>,
    pub os_current: Option<String>,
    pub kernel_upgradable: bool,
}

/// Source of local node facts, injectable for tests.
#[async_trait]
pub trait NodeState: Send + Sync {
    async fn observe(&self) -> LocalState;
}

/// Probes the host filesystem afresh on every observation, so each reconcile
/// pass sees the state as of that pass.
pub struct HostState {
    root: PathBuf,
    mode_file: PathBuf,
}

impl HostState {
    pub fn new(root: impl Into<PathBuf>, mode_file: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            mode_file: mode_file.into(),
        }
    }
}

#[async_trait]
impl NodeState for HostState {
    async fn observe(&self) -> LocalState {
        let mode = match boot_mode(&self.mode_file).await {
            Ok(mode) => Some(mode),
            Err(err) => {
                debug!(%err, "boot mode unreadable");
                None
            }
        };
        let os_current = match fs::read_link(self.root.join("k3os").join("current")).await {
            Ok(link) => Some(basename(&link)),
            Err(err) => {
                debug!(%err, "current version link unreadable");
                None
            }
        };
        LocalState {
            mode,
            os_current,
            kernel_upgradable: kernel_upgradable(&self.root).await,
        }
    }
}

/// Schedules the node reboot that follows a successful upgrade.
pub trait Reboot: Send + Sync {
    fn schedule(&self, delay: Duration);
}

/// Reboots the host through the system `reboot` command once the delay has
/// passed, leaving the calling reconciler free to return and let its store
/// write settle.
pub struct SystemReboot;

impl Reboot for SystemReboot {
    fn schedule(&self, delay: Duration) {
        info!("upgrade has finished, rebooting in {}s", delay.as_secs());
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = Command::new("reboot").status().await {
                warn!(%err, "reboot command failed");
            }
        });
    }
}
