//! Pod and node inspection helpers.
//!
//! Pure functions over Kubernetes snapshots used by the readiness conditions,
//! the healing pipeline and the node container restarts.

use std::fmt;
use std::str::FromStr;

use jiff::Timestamp;
use k8s_openapi::api::core::v1::{ContainerStatus, Node, Pod};
use kube::ResourceExt;

use crate::error::{Error, Result};

/// Annotation the kubelet sets on mirror pods of static manifests.
pub const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

/// Waiting reason of a container stuck restarting.
const CRASH_LOOP_BACK_OFF: &str = "CrashLoopBackOff";

/// Script installed on every node by the rotation provisioning step.
const ROTATE_CERTS_SCRIPT: &str = "/etc/kubernetes/rotate-certs/rotate-certs.sh";

/// Returns true if the NodeReady condition of the node is set to True.
pub fn is_node_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
        .is_some_and(|c| c.status == "True")
}

/// Node name the pod is scheduled on.
pub fn node_name(pod: &Pod) -> Option<&str> {
    pod.spec.as_ref().and_then(|s| s.node_name.as_deref())
}

fn container_statuses(pod: &Pod) -> &[ContainerStatus] {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_deref())
        .unwrap_or_default()
}

fn is_running_phase(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == "Running")
}

fn is_container_running_and_ready(status: &ContainerStatus) -> bool {
    status.ready
        && status
            .state
            .as_ref()
            .is_some_and(|state| state.running.is_some())
}

/// Pod is in the Running phase and every container is running and ready.
pub fn is_pod_ready(pod: &Pod) -> bool {
    is_running_phase(pod) && container_statuses(pod).iter().all(is_container_running_and_ready)
}

/// Pod is the API mirror of a static pod.
pub fn is_mirror_pod(pod: &Pod) -> bool {
    pod.annotations().contains_key(MIRROR_POD_ANNOTATION)
}

/// Container is waiting in CrashLoopBackOff.
pub fn is_container_crashing(status: &ContainerStatus) -> bool {
    status
        .state
        .as_ref()
        .and_then(|state| state.waiting.as_ref())
        .and_then(|waiting| waiting.reason.as_deref())
        .is_some_and(|reason| reason == CRASH_LOOP_BACK_OFF)
}

/// At least one container of the pod is crash looping.
pub fn is_any_container_crashing(pod: &Pod) -> bool {
    container_statuses(pod).iter().any(is_container_crashing)
}

/// Statuses of the containers currently crash looping.
pub fn crashing_containers(pod: &Pod) -> impl Iterator<Item = &ContainerStatus> {
    container_statuses(pod)
        .iter()
        .filter(|status| is_container_crashing(status))
}

/// All container statuses of the pod.
pub fn statuses(pod: &Pod) -> &[ContainerStatus] {
    container_statuses(pod)
}

/// Earliest start time among running and ready containers of a running pod.
pub fn earliest_container_start(pod: &Pod) -> Option<Timestamp> {
    if !is_running_phase(pod) {
        return None;
    }
    container_statuses(pod)
        .iter()
        .filter(|status| is_container_running_and_ready(status))
        .filter_map(|status| {
            status
                .state
                .as_ref()
                .and_then(|state| state.running.as_ref())
                .and_then(|running| running.started_at.as_ref())
                .map(|time| time.0)
        })
        .min()
}

/// Container runtimes the rotation script knows how to restart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerRuntime {
    Docker,
    Containerd,
}

impl fmt::Display for ContainerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerRuntime::Docker => write!(f, "docker"),
            ContainerRuntime::Containerd => write!(f, "containerd"),
        }
    }
}

/// Runtime-qualified container identifier, e.g. `containerd://3f2a...`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerId {
    pub runtime: ContainerRuntime,
    pub id: String,
}

impl FromStr for ContainerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidContainerId(s.to_string());
        let (runtime, id) = s.split_once("://").ok_or_else(invalid)?;
        if id.is_empty() || id.contains("://") {
            return Err(invalid());
        }
        let runtime = match runtime {
            "docker" => ContainerRuntime::Docker,
            "containerd" => ContainerRuntime::Containerd,
            _ => return Err(invalid()),
        };
        Ok(Self {
            runtime,
            id: id.to_string(),
        })
    }
}

/// Runtime and script argument identifying the process to restart.
///
/// Docker containers are addressed by id. Containerd containers are addressed
/// by their entrypoint, skipping a `/hyperkube` wrapper.
pub fn restart_target(pod: &Pod, status: &ContainerStatus) -> Result<(ContainerRuntime, String)> {
    let raw = status
        .container_id
        .as_deref()
        .ok_or_else(|| Error::MissingField(format!("containerID of {}", status.name)))?;
    let container_id: ContainerId = raw.parse()?;
    match container_id.runtime {
        ContainerRuntime::Docker => Ok((ContainerRuntime::Docker, container_id.id)),
        ContainerRuntime::Containerd => {
            let command = pod
                .spec
                .as_ref()
                .and_then(|spec| spec.containers.iter().find(|c| c.name == status.name))
                .and_then(|c| c.command.as_deref())
                .unwrap_or_default();
            let arg = match command {
                [wrapper, binary, ..] if wrapper == "/hyperkube" => binary,
                [binary, ..] => binary,
                [] => {
                    return Err(Error::MissingField(format!(
                        "command of container {}",
                        status.name
                    )));
                }
            };
            Ok((ContainerRuntime::Containerd, arg.clone()))
        }
    }
}

fn rotate_certs_command(action: &str, runtime: ContainerRuntime, arg: &str) -> String {
    format!("bash -euxo pipefail -c \"sudo {ROTATE_CERTS_SCRIPT} {action}_{runtime} {arg}\"")
}

/// Remote command that restarts the static process behind a mirror pod.
pub fn restart_mirror_pod_command(runtime: ContainerRuntime, arg: &str) -> String {
    rotate_certs_command("restart_mirror_pod", runtime, arg)
}

/// Remote command that restarts a regular pod container.
pub fn restart_pod_command(runtime: ContainerRuntime, arg: &str) -> String {
    rotate_certs_command("restart_pod", runtime, arg)
}
