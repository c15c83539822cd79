//! Convergence conditions evaluated against cluster snapshots.

use std::collections::BTreeMap;

use jiff::Timestamp;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::ResourceExt;

use super::ConditionOutcome;
use crate::error::Error;
use crate::resources::pod::{earliest_container_start, is_node_ready, is_pod_ready};

/// Every expected node is registered and Ready. With no expected nodes,
/// every registered node must be Ready.
pub fn nodes_ready(nodes: &[Node], expected: &[String]) -> ConditionOutcome {
    let not_ready: Vec<String> = if expected.is_empty() {
        nodes
            .iter()
            .filter(|node| !is_node_ready(node))
            .map(|node| node.name_any())
            .collect()
    } else {
        let by_name: BTreeMap<String, &Node> =
            nodes.iter().map(|node| (node.name_any(), node)).collect();
        expected
            .iter()
            .filter(|name| !by_name.get(*name).is_some_and(|node| is_node_ready(node)))
            .cloned()
            .collect()
    };
    if not_ready.is_empty() {
        ConditionOutcome::satisfied()
    } else {
        ConditionOutcome::unsatisfied(Error::ConditionNotMet(format!(
            "at least one node did not reach the Ready state: {not_ready:?}"
        )))
    }
}

/// Every expected pod (every listed pod when none are named) is Running with
/// every container ready. The error names the first offending pod.
pub fn pods_ready(pods: &[Pod], expected: &[String]) -> ConditionOutcome {
    let offender = if expected.is_empty() {
        pods.iter().find(|pod| !is_pod_ready(pod)).map(|pod| pod.name_any())
    } else {
        let by_name: BTreeMap<String, &Pod> =
            pods.iter().map(|pod| (pod.name_any(), pod)).collect();
        expected
            .iter()
            .find(|name| !by_name.get(*name).is_some_and(|pod| is_pod_ready(pod)))
            .cloned()
    };
    match offender {
        None => ConditionOutcome::satisfied(),
        Some(name) => ConditionOutcome::unsatisfied(Error::ConditionNotMet(format!(
            "at least one pod did not reach the Ready state: {name}"
        ))),
    }
}

/// Every expected pod runs containers that all started at or after `since`.
pub fn pods_restarted_since(
    pods: &[Pod],
    expected: &[String],
    since: Timestamp,
) -> ConditionOutcome {
    let by_name: BTreeMap<String, &Pod> = pods.iter().map(|pod| (pod.name_any(), pod)).collect();
    let not_restarted: Vec<&String> = expected
        .iter()
        .filter(|name| {
            !by_name
                .get(*name)
                .and_then(|pod| earliest_container_start(pod))
                .is_some_and(|started| started >= since)
        })
        .collect();
    if not_restarted.is_empty() {
        ConditionOutcome::satisfied()
    } else {
        ConditionOutcome::unsatisfied(Error::ConditionNotMet(format!(
            "at least one pod did not restart as expected: {not_restarted:?}"
        )))
    }
}

/// Every daemonset has as many current and updated pods as desired.
pub fn daemon_sets_updated(daemon_sets: &[DaemonSet]) -> ConditionOutcome {
    let updating: Vec<String> = daemon_sets
        .iter()
        .filter(|ds| {
            ds.status.as_ref().is_some_and(|s| {
                s.desired_number_scheduled != s.current_number_scheduled
                    || s.desired_number_scheduled != s.updated_number_scheduled.unwrap_or(0)
            })
        })
        .map(|ds| ds.name_any())
        .collect();
    if updating.is_empty() {
        ConditionOutcome::satisfied()
    } else {
        ConditionOutcome::unsatisfied(Error::ConditionNotMet(format!(
            "at least one daemonset is still updating replicas: {updating:?}"
        )))
    }
}

/// Every deployment has as many available and updated replicas as replicas.
pub fn deployments_updated(deployments: &[Deployment]) -> ConditionOutcome {
    let updating: Vec<String> = deployments
        .iter()
        .filter(|deploy| {
            deploy.status.as_ref().is_some_and(|s| {
                let desired = s.replicas.unwrap_or(0);
                desired != s.available_replicas.unwrap_or(0)
                    || desired != s.updated_replicas.unwrap_or(0)
            })
        })
        .map(|deploy| deploy.name_any())
        .collect();
    if updating.is_empty() {
        ConditionOutcome::satisfied()
    } else {
        ConditionOutcome::unsatisfied(Error::ConditionNotMet(format!(
            "at least one deployment is still updating replicas: {updating:?}"
        )))
    }
}
