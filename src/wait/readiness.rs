//! Readiness waits built on [`wait_for`].
//!
//! Each wait lists a resource kind through a [`KubeClient`] and checks one of
//! the [`conditions`](super::conditions). Pod waits optionally hand every
//! listed pod snapshot to a [`PodHealer`] so crash looping static pods are
//! restarted while the wait is in progress.

use std::time::Duration;

use jiff::Timestamp;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use tracing::{info, instrument};

use super::conditions::{
    daemon_sets_updated, deployments_updated, nodes_ready, pods_ready, pods_restarted_since,
};
use super::{ConditionOutcome, wait_for};
use crate::client::KubeClient;
use crate::error::Result;
use crate::heal::PodHealer;

/// Consecutive successes required before nodes are considered ready.
pub const NODES_READY_SUCCESSES: u32 = 5;
/// Consecutive successes required before a rollout is considered complete.
pub const ROLLOUT_SUCCESSES: u32 = 5;
/// Consecutive successes required before named pods are considered ready.
pub const PODS_READY_SUCCESSES: u32 = 6;
/// Restarted pods only need to be observed once.
pub const RESTART_SUCCESSES: u32 = 1;

/// Wait until every expected node (every node when `expected` is empty) is Ready.
#[instrument(skip(client, expected))]
pub async fn wait_for_nodes_ready<K: KubeClient>(
    client: &K,
    expected: &[String],
    interval: Duration,
    timeout: Duration,
) -> Result<()> {
    wait_for(
        move || client.list_nodes(),
        |nodes| nodes_ready(nodes, expected),
        NODES_READY_SUCCESSES,
        interval,
        timeout,
    )
    .await?;
    info!(nodes = expected.len(), "Nodes are ready");
    Ok(())
}

/// Wait until every daemonset in `namespace` finished rolling out.
#[instrument(skip(client))]
pub async fn wait_for_daemon_sets_updated<K: KubeClient>(
    client: &K,
    namespace: &str,
    interval: Duration,
    timeout: Duration,
) -> Result<()> {
    wait_for(
        move || client.list_daemon_sets(namespace),
        |daemon_sets| daemon_sets_updated(daemon_sets),
        ROLLOUT_SUCCESSES,
        interval,
        timeout,
    )
    .await?;
    Ok(())
}

/// Wait until every deployment in `namespace` finished rolling out.
#[instrument(skip(client))]
pub async fn wait_for_deployments_updated<K: KubeClient>(
    client: &K,
    namespace: &str,
    interval: Duration,
    timeout: Duration,
) -> Result<()> {
    wait_for(
        move || client.list_deployments(namespace),
        |deployments| deployments_updated(deployments),
        ROLLOUT_SUCCESSES,
        interval,
        timeout,
    )
    .await?;
    Ok(())
}

async fn wait_for_pods<K, C>(
    client: &K,
    namespace: &str,
    condition: C,
    successes_needed: u32,
    interval: Duration,
    timeout: Duration,
    healer: Option<&PodHealer>,
) -> Result<()>
where
    K: KubeClient,
    C: FnMut(&Vec<Pod>) -> ConditionOutcome,
{
    let params = ListParams::default();
    let params = &params;
    wait_for(
        move || async move {
            let pods = client.list_pods(namespace, params).await?;
            if let Some(healer) = healer {
                healer.feed(&pods).await;
            }
            Ok(pods)
        },
        condition,
        successes_needed,
        interval,
        timeout,
    )
    .await?;
    Ok(())
}

/// Wait until daemonsets, then deployments, then every pod of `namespace` are ready.
#[instrument(skip(client, healer))]
pub async fn wait_for_all_in_namespace_ready<K: KubeClient>(
    client: &K,
    namespace: &str,
    interval: Duration,
    timeout: Duration,
    healer: Option<&PodHealer>,
) -> Result<()> {
    wait_for_daemon_sets_updated(client, namespace, interval, timeout).await?;
    wait_for_deployments_updated(client, namespace, interval, timeout).await?;
    wait_for_pods(
        client,
        namespace,
        |pods| pods_ready(pods, &[]),
        ROLLOUT_SUCCESSES,
        interval,
        timeout,
        healer,
    )
    .await?;
    info!(namespace = %namespace, "All workloads are ready");
    Ok(())
}

/// Wait until every named pod in `namespace` is running with ready containers.
#[instrument(skip(client, pods, healer))]
pub async fn wait_for_ready<K: KubeClient>(
    client: &K,
    namespace: &str,
    pods: &[String],
    interval: Duration,
    timeout: Duration,
    healer: Option<&PodHealer>,
) -> Result<()> {
    wait_for_pods(
        client,
        namespace,
        |listed| pods_ready(listed, pods),
        PODS_READY_SUCCESSES,
        interval,
        timeout,
        healer,
    )
    .await
}

/// Wait until every named pod in `namespace` runs containers started at or
/// after `restarted_at`.
#[instrument(skip(client, pods, healer))]
pub async fn wait_for_restart<K: KubeClient>(
    client: &K,
    namespace: &str,
    pods: &[String],
    restarted_at: Timestamp,
    interval: Duration,
    timeout: Duration,
    healer: Option<&PodHealer>,
) -> Result<()> {
    wait_for_pods(
        client,
        namespace,
        |listed| pods_restarted_since(listed, pods, restarted_at),
        RESTART_SUCCESSES,
        interval,
        timeout,
        healer,
    )
    .await
}
