use std::time::Duration;

/// Where persistent OS installations are located on the host.
pub const ROOT_DIR: &str = "/k3os/system";
/// Where persistent state is located on the host.
pub const DATA_DIR: &str = "/k3os/data";
/// File the init path writes the boot mode to.
pub const MODE_FILE: &str = "/run/k3os/mode";
/// Boot mode in which the OS is ephemeral and upgrades are disabled.
pub const MODE_LIVE: &str = "live";
/// Namespace the operator manages when none is given.
pub const DEFAULT_NAMESPACE: &str = "k3os-system";
/// Environment variable carrying this agent's cluster node name.
pub const NODE_ENV: &str = "K3OS_OPERATOR_NODE";
/// Environment variable enabling verbose logging, propagated into upgrade jobs.
pub const DEBUG_ENV: &str = "K3OS_DEBUG";
/// Annotation recording the version an upgrade job installs.
pub const VERSION_ANNOTATION: &str = "k3os.io/version";
/// Annotation recording which node seeded the default channel.
pub const NODE_ANNOTATION: &str = "k3os.io/node";
/// Service account identity reserved for the operator's upgrade jobs.
pub const OPERATOR_SERVICE_ACCOUNT: &str = "k3os-operator";
/// Name of the seeded default channel.
pub const DEFAULT_CHANNEL_NAME: &str = "github-releases";
/// Upstream locator of the seeded default channel.
pub const DEFAULT_CHANNEL_URL: &str = "github-releases://rancher/k3os";
/// Image carrying the host-mounted upgrade command.
pub const UPGRADE_JOB_IMAGE: &str = "k8s.gcr.io/pause";
/// Upper bound on upgrade job runtime.
pub const UPGRADE_JOB_DEADLINE_SECONDS: i64 = 180;
/// Delay between a successful upgrade job and the node reboot, long enough for
/// the slot release to settle in the store.
pub const REBOOT_DELAY: Duration = Duration::from_secs(5);
