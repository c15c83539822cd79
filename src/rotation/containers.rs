//! Restarting control plane containers on a node.

use kube::ResourceExt;
use kube::api::ListParams;
use tracing::{debug, instrument};

use super::KUBE_SYSTEM;
use crate::client::KubeClient;
use crate::error::Result;
use crate::remote::{RemoteExecutor, RemoteHost};
use crate::resources::pod::{restart_pod_command, restart_target, statuses};

/// Restart every container of the `kube-system` pods scheduled on `host` that
/// match the `labels` selector, so they reload the rotated certificates.
///
/// Returns the number of restart commands issued. An unexpected container id
/// aborts with an error; a failed restart command is only logged.
#[instrument(skip(client, executor, host), fields(node = %host.uri))]
pub async fn restart_node_containers<K, E>(
    client: &K,
    executor: &E,
    host: &RemoteHost,
    labels: &str,
) -> Result<usize>
where
    K: KubeClient,
    E: RemoteExecutor,
{
    let params = ListParams::default()
        .fields(&format!("spec.nodeName={}", host.uri))
        .labels(labels);
    let pods = client
        .list_pods(KUBE_SYSTEM, &params)
        .await
        .map_err(|e| e.context("listing pods"))?;

    let mut issued = 0;
    for pod in &pods {
        for status in statuses(pod) {
            let (runtime, arg) = restart_target(pod, status)
                .map_err(|e| e.context(format!("restart of {} aborted", pod.name_any())))?;
            let script = restart_pod_command(runtime, &arg);
            issued += 1;
            if let Err(e) = executor.execute(host, &script).await {
                debug!(pod = %pod.name_any(), container = %status.name, error = %e, "Remote command failed");
            }
        }
    }
    Ok(issued)
}
