//! Convergence and readiness wait tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use jiff::{SignedDuration, Timestamp};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use ca_rotation::client::DualClient;
use ca_rotation::error::Error;
use ca_rotation::heal::{ContainerRestarter, PodHealer};
use ca_rotation::remote::{AuthConfig, RemoteHost};
use ca_rotation::wait::{
    ConditionOutcome, wait_for, wait_for_all_in_namespace_ready, wait_for_nodes_ready,
    wait_for_ready, wait_for_restart,
};

use crate::mock_client::{
    Failure, FakeClient, RecordingExecutor, crashing_mirror_pod, daemon_set, deployment, names,
    node, ready_pod,
};

const INTERVAL: Duration = Duration::from_secs(1);
const TIMEOUT: Duration = Duration::from_secs(60);

/// Poll a fixed sequence of satisfied/unsatisfied outcomes, repeating the last.
async fn poll_sequence(outcomes: &[bool], successes_needed: u32) -> (Result<(), Error>, u32) {
    let polls = AtomicU32::new(0);
    let polls_ref = &polls;
    let result = wait_for(
        move || async move { Ok(polls_ref.fetch_add(1, Ordering::SeqCst) as usize) },
        |&tick| {
            let satisfied = outcomes
                .get(tick)
                .or(outcomes.last())
                .copied()
                .unwrap_or(false);
            if satisfied {
                ConditionOutcome::satisfied()
            } else {
                ConditionOutcome::unsatisfied(Error::ConditionNotMet(format!("tick {tick}")))
            }
        },
        successes_needed,
        INTERVAL,
        TIMEOUT,
    )
    .await
    .map(drop);
    (result, polls.load(Ordering::SeqCst))
}

fn master_nodes() -> HashMap<String, RemoteHost> {
    HashMap::from([(
        "k8s-master-0".to_string(),
        RemoteHost::new(
            "k8s-master-0",
            AuthConfig::with_private_key("azureuser", "/root/.ssh/id_rsa"),
        ),
    )])
}

// ============================================================================
// Poll Convergence
// ============================================================================

/// Two satisfied polls are needed: success comes after the second, not the first.
#[tokio::test(start_paused = true)]
async fn test_converges_after_second_success() {
    let start = Instant::now();
    let (result, polls) = poll_sequence(&[true, true], 2).await;

    assert!(result.is_ok());
    assert_eq!(polls, 2);
    assert_eq!(start.elapsed(), INTERVAL);
}

/// Satisfied then unsatisfied with two successes needed is one flap, which
/// fails immediately without a third poll.
#[tokio::test(start_paused = true)]
async fn test_flap_fails_fast() {
    let start = Instant::now();
    let (result, polls) = poll_sequence(&[true, false], 2).await;

    match result.unwrap_err() {
        Error::Flapping {
            successes,
            flaps,
            source,
        } => {
            assert_eq!(successes, 1);
            assert_eq!(flaps, 1);
            assert_eq!(source.unwrap().to_string(), "Condition not met: tick 1");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(polls, 2);
    assert!(start.elapsed() < TIMEOUT);
}

#[tokio::test(start_paused = true)]
async fn test_single_flap_tolerated_with_more_successes_needed() {
    let (result, polls) = poll_sequence(&[true, false, true, true, true], 3).await;

    assert!(result.is_ok());
    assert_eq!(polls, 5);
}

#[tokio::test(start_paused = true)]
async fn test_never_satisfied_times_out() {
    let start = Instant::now();
    let (result, _) = poll_sequence(&[false], 2).await;

    let err = result.unwrap_err();
    assert!(matches!(err, Error::Timeout { successes: 0, .. }), "{err}");
    assert!(err.to_string().contains("condition successesCount: 0"));
    assert!(start.elapsed() >= TIMEOUT);
}

// ============================================================================
// Readiness Waits
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_nodes_ready_after_node_recovers() {
    let client = FakeClient::new();
    client.with_cluster(|c| {
        c.node_snapshots.push_back(vec![
            node("k8s-master-0", false),
            node("k8s-agent-0", true),
        ]);
        c.node_snapshots.push_back(vec![
            node("k8s-master-0", true),
            node("k8s-agent-0", true),
        ]);
    });

    let start = Instant::now();
    wait_for_nodes_ready(&client, &names(&["k8s-master-0"]), INTERVAL, TIMEOUT)
        .await
        .unwrap();

    assert_eq!(client.calls("list_nodes"), 6);
    assert_eq!(start.elapsed(), 5 * INTERVAL);
}

#[tokio::test(start_paused = true)]
async fn test_nodes_ready_through_dual_client() {
    let (old, new) = FakeClient::pair();
    old.with_cluster(|c| c.nodes = vec![node("k8s-master-0", true)]);
    old.fail_always("list_nodes", Failure::UnknownAuthority);
    let client = DualClient::new(old, new, INTERVAL, Duration::from_secs(10));

    wait_for_nodes_ready(&client, &[], INTERVAL, TIMEOUT)
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_list_error_aborts_wait() {
    let client = FakeClient::new();
    client.fail_always("list_nodes", Failure::Forbidden);

    let err = wait_for_nodes_ready(&client, &[], INTERVAL, TIMEOUT)
        .await
        .unwrap_err();

    assert_eq!(client.calls("list_nodes"), 1);
    assert!(err.to_string().starts_with("condition successesCount: 0"));
}

#[tokio::test(start_paused = true)]
async fn test_all_in_namespace_ready() {
    let now = Timestamp::now();
    let client = FakeClient::new();
    client.with_cluster(|c| {
        c.add_deployment(deployment("kube-system", "coredns", Some("coredns")));
        c.add_daemon_set(daemon_set("kube-system", "kube-proxy", Some("kube-proxy")));
        c.pods = vec![
            ready_pod("kube-system", "coredns-1", "k8s-agent-0", now),
            ready_pod("kube-system", "kube-proxy-1", "k8s-agent-0", now),
        ];
    });

    wait_for_all_in_namespace_ready(&client, "kube-system", INTERVAL, TIMEOUT, None)
        .await
        .unwrap();

    assert_eq!(client.calls("list_daemon_sets"), 5);
    assert_eq!(client.calls("list_deployments"), 5);
    assert_eq!(client.calls("list_pods"), 5);
}

/// A crash looping apiserver mirror pod is healed on its node while the wait polls.
#[tokio::test(start_paused = true)]
async fn test_wait_for_ready_heals_crash_looping_mirror_pod() {
    let now = Timestamp::now();
    let client = FakeClient::new();
    client.with_cluster(|c| {
        c.pod_snapshots.push_back(vec![crashing_mirror_pod(
            "kube-system",
            "kube-apiserver-k8s-master-0",
            "k8s-master-0",
        )]);
        c.pod_snapshots.push_back(vec![ready_pod(
            "kube-system",
            "kube-apiserver-k8s-master-0",
            "k8s-master-0",
            now,
        )]);
    });
    let executor = RecordingExecutor::default();
    let cancel = CancellationToken::new();
    let healer = PodHealer::crash_looping_mirror_pods(
        master_nodes(),
        ContainerRestarter::new(executor.clone()),
        &cancel,
    );

    wait_for_ready(
        &client,
        "kube-system",
        &names(&["kube-apiserver-k8s-master-0"]),
        INTERVAL,
        TIMEOUT,
        Some(&healer),
    )
    .await
    .unwrap();
    healer.shutdown().await;

    assert_eq!(client.calls("list_pods"), 7);
    let scripts = executor.scripts();
    assert_eq!(scripts.len(), 1);
    assert_eq!(scripts[0].0, "k8s-master-0");
    assert!(scripts[0].1.contains("restart_mirror_pod_containerd kube-apiserver"));
}

#[tokio::test(start_paused = true)]
async fn test_healing_failures_do_not_fail_the_wait() {
    let now = Timestamp::now();
    let client = FakeClient::new();
    client.with_cluster(|c| {
        c.pod_snapshots.push_back(vec![crashing_mirror_pod(
            "kube-system",
            "kube-apiserver-k8s-master-0",
            "k8s-master-0",
        )]);
        c.pod_snapshots.push_back(vec![ready_pod(
            "kube-system",
            "kube-apiserver-k8s-master-0",
            "k8s-master-0",
            now,
        )]);
    });
    let executor = RecordingExecutor::failing();
    let healer = PodHealer::crash_looping_mirror_pods(
        master_nodes(),
        ContainerRestarter::new(executor.clone()),
        &CancellationToken::new(),
    );

    wait_for_ready(
        &client,
        "kube-system",
        &names(&["kube-apiserver-k8s-master-0"]),
        INTERVAL,
        TIMEOUT,
        Some(&healer),
    )
    .await
    .unwrap();
    healer.shutdown().await;

    assert_eq!(executor.scripts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_restart_requires_new_start_time() {
    let restarted_at: Timestamp = "2024-05-01T10:00:00Z".parse().unwrap();
    let before = restarted_at - SignedDuration::from_secs(3600);
    let after = restarted_at + SignedDuration::from_secs(30);
    let client = FakeClient::new();
    client.with_cluster(|c| {
        for started in [before, before, after] {
            c.pod_snapshots.push_back(vec![ready_pod(
                "kube-system",
                "kube-scheduler-k8s-master-0",
                "k8s-master-0",
                started,
            )]);
        }
    });

    wait_for_restart(
        &client,
        "kube-system",
        &names(&["kube-scheduler-k8s-master-0"]),
        restarted_at,
        INTERVAL,
        TIMEOUT,
        None,
    )
    .await
    .unwrap();

    assert_eq!(client.calls("list_pods"), 3);
}
