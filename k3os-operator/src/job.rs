use crate::{
    channel::UpdateChannel,
    constants::{
        DEBUG_ENV, DEFAULT_NAMESPACE, OPERATOR_SERVICE_ACCOUNT, UPGRADE_JOB_DEADLINE_SECONDS,
        UPGRADE_JOB_IMAGE, VERSION_ANNOTATION,
    },
};
use k8s_openapi::{
    api::{
        batch::v1::{Job, JobSpec},
        core::v1::{
            Capabilities, Container, EnvVar, HostPathVolumeSource, PodSpec, PodTemplateSpec,
            SecurityContext, Volume, VolumeMount,
        },
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use kube::ResourceExt;
use std::collections::BTreeMap;

/// Deterministic name of a node's upgrade job. Re-creation under the same
/// name is a conflict, not a retry trigger.
pub fn job_name(node: &str) -> String {
    format!("{node}-upgrade")
}

// (volume name, host path, mount path, host path type, read only)
const HOST_PATHS: [(&str, &str, &str, &str, bool); 7] = [
    ("etc-os-release", "/etc/os-release", "/etc/os/release", "File", true),
    ("etc-ssl", "/etc/ssl", "/etc/ssl", "Directory", true),
    ("k3os-exe", "/sbin/k3os", "/sbin/k3os", "File", true),
    ("k3os-system", "/k3os/system", "/k3os/system", "Directory", false),
    ("k3os-temp", "/tmp", "/tmp", "Directory", false),
    ("run-k3os", "/run/k3os", "/run/k3os", "Directory", false),
    ("var-lib-rancher", "/var/lib/rancher", "/var/lib/rancher", "Directory", false),
];

/// Fully prepared upgrade job for one node: privileged, node-pinned, driving
/// the host-mounted OS binary's `operator upgrade` sub-command against the
/// channel's resolved version. The job reboots nothing itself; the agent
/// reboots the node when the job completes successfully.
pub fn upgrade_job(channel: &UpdateChannel, node: &str, upgrade_kernel: bool, debug: bool) -> Job {
    let name = job_name(node);
    let namespace = channel
        .namespace()
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
    let version = channel.spec.version.clone();

    let volumes = HOST_PATHS
        .iter()
        .map(|(volume, path, _, kind, _)| Volume {
            name: volume.to_string(),
            host_path: Some(HostPathVolumeSource {
                path: path.to_string(),
                type_: Some(kind.to_string()),
            }),
            ..Default::default()
        })
        .collect();
    let volume_mounts = HOST_PATHS
        .iter()
        .map(|(volume, _, mount, _, read_only)| VolumeMount {
            name: volume.to_string(),
            mount_path: mount.to_string(),
            read_only: Some(*read_only),
            ..Default::default()
        })
        .collect();

    let command = vec![
        "k3os".to_string(),
        "operator".to_string(),
        "upgrade".to_string(),
        format!("--channel={}", channel.spec.url),
        format!("--version={version}"),
        "--remount".to_string(),
        format!("--kernel={upgrade_kernel}"),
        "--rootfs=true".to_string(),
        "--sync".to_string(),
    ];

    Job {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace),
            annotations: Some(BTreeMap::from([(
                VERSION_ANNOTATION.to_string(),
                version,
            )])),
            ..Default::default()
        },
        spec: Some(JobSpec {
            active_deadline_seconds: Some(UPGRADE_JOB_DEADLINE_SECONDS),
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    node_name: Some(node.to_string()),
                    restart_policy: Some("Never".to_string()),
                    service_account_name: Some(OPERATOR_SERVICE_ACCOUNT.to_string()),
                    containers: vec![Container {
                        name: name.clone(),
                        image: Some(UPGRADE_JOB_IMAGE.to_string()),
                        command: Some(command),
                        env: Some(vec![EnvVar {
                            name: DEBUG_ENV.to_string(),
                            value: Some(debug.to_string()),
                            ..Default::default()
                        }]),
                        security_context: Some(SecurityContext {
                            privileged: Some(true),
                            capabilities: Some(Capabilities {
                                add: Some(vec!["CAP_SYS_BOOT".to_string()]),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }),
                        volume_mounts: Some(volume_mounts),
                        ..Default::default()
                    }],
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::UpdateChannelSpec;

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

    #[test]
    fn job_is_node_pinned_and_deadline_bounded() {
        let job = upgrade_job(&channel("v1.0.0"), "n1", false, false);
        assert_eq!(job.metadata.name.as_deref(), Some("n1-upgrade"));
        assert_eq!(job.metadata.namespace.as_deref(), Some("k3os-system"));

        let spec = job.spec.unwrap();
        assert_eq!(spec.active_deadline_seconds, Some(180));
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.node_name.as_deref(), Some("n1"));
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert_eq!(pod.service_account_name.as_deref(), Some("k3os-operator"));
    }

    #[test]
    fn job_records_the_version_it_installs() {
        let job = upgrade_job(&channel("v1.0.0"), "n1", false, false);
        let annotations = job.metadata.annotations.unwrap();
        assert_eq!(annotations.get("k3os.io/version").unwrap(), "v1.0.0");
    }

    #[test]
    fn command_reflects_channel_and_kernel_state() {
        let job = upgrade_job(&channel("v1.0.0"), "n1", true, true);
        let pod = job.spec.unwrap().template.spec.unwrap();
        let container = &pod.containers[0];
        let command = container.command.as_ref().unwrap();
        assert_eq!(command[..3], ["k3os", "operator", "upgrade"]);
        assert!(command.contains(&"--channel=github-releases://rancher/k3os".to_string()));
        assert!(command.contains(&"--version=v1.0.0".to_string()));
        assert!(command.contains(&"--remount".to_string()));
        assert!(command.contains(&"--kernel=true".to_string()));
        assert!(command.contains(&"--rootfs=true".to_string()));
        assert!(command.contains(&"--sync".to_string()));

        let env = container.env.as_ref().unwrap();
        assert_eq!(env[0].name, "K3OS_DEBUG");
        assert_eq!(env[0].value.as_deref(), Some("true"));

        let without_kernel = upgrade_job(&channel("v1.0.0"), "n1", false, false);
        let pod = without_kernel.spec.unwrap().template.spec.unwrap();
        let command = pod.containers[0].command.as_ref().unwrap();
        assert!(command.contains(&"--kernel=false".to_string()));
    }

    #[test]
    fn container_is_privileged_with_boot_capability() {
        let job = upgrade_job(&channel("v1.0.0"), "n1", false, false);
        let pod = job.spec.unwrap().template.spec.unwrap();
        let security = pod.containers[0].security_context.as_ref().unwrap();
        assert_eq!(security.privileged, Some(true));
        let capabilities = security.capabilities.as_ref().unwrap();
        assert_eq!(
            capabilities.add.as_ref().unwrap(),
            &vec!["CAP_SYS_BOOT".to_string()]
        );
    }

    #[test]
    fn host_mounts_cover_the_upgrade_surface() {
        let job = upgrade_job(&channel("v1.0.0"), "n1", false, false);
        let pod = job.spec.unwrap().template.spec.unwrap();
        let volumes = pod.volumes.as_ref().unwrap();
        let mounts = pod.containers[0].volume_mounts.as_ref().unwrap();
        assert_eq!(volumes.len(), 7);
        assert_eq!(mounts.len(), 7);

        let system = mounts.iter().find(|m| m.name == "k3os-system").unwrap();
        assert_eq!(system.mount_path, "/k3os/system");
        assert_eq!(system.read_only, Some(false));

        let release = mounts.iter().find(|m| m.name == "etc-os-release").unwrap();
        assert_eq!(release.mount_path, "/etc/os/release");
        assert_eq!(release.read_only, Some(true));
    }
}
