// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Unit tests for ca-rotation.
//!
//! These tests run without a cluster or remote hosts and exercise the public
//! pure functions in isolation.

mod container_tests {
    use k8s_openapi::api::core::v1::{Container, ContainerStatus, Pod, PodSpec};
    use ca_rotation::error::Error;
    use ca_rotation::resources::pod::{
        ContainerId, ContainerRuntime, restart_pod_command, restart_target,
    };

    fn pod_with_command(container: &str, command: &[&str]) -> Pod {
        Pod {
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: container.to_string(),
                    command: Some(command.iter().map(|c| c.to_string()).collect()),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn status(container: &str, id: &str) -> ContainerStatus {
        ContainerStatus {
            name: container.to_string(),
            container_id: Some(id.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_container_id_parsing() {
        let id: ContainerId = "docker://3f2a9c".parse().unwrap();
        assert_eq!(id.runtime, ContainerRuntime::Docker);
        assert_eq!(id.id, "3f2a9c");

        let id: ContainerId = "containerd://77ab".parse().unwrap();
        assert_eq!(id.runtime, ContainerRuntime::Containerd);
    }

    #[test]
    fn test_container_id_rejects_unknown_shapes() {
        for raw in ["3f2a9c", "cri-o://3f2a9c", "docker://", "docker://a://b"] {
            let err = raw.parse::<ContainerId>().unwrap_err();
            assert!(matches!(err, Error::InvalidContainerId(_)), "{raw}: {err}");
        }
    }

    #[test]
    fn test_docker_target_is_container_id() {
        let pod = pod_with_command("kube-proxy", &["kube-proxy"]);
        let (runtime, arg) = restart_target(&pod, &status("kube-proxy", "docker://abc123")).unwrap();
        assert_eq!(runtime, ContainerRuntime::Docker);
        assert_eq!(arg, "abc123");
        assert_eq!(
            restart_pod_command(runtime, &arg),
            "bash -euxo pipefail -c \"sudo /etc/kubernetes/rotate-certs/rotate-certs.sh restart_pod_docker abc123\""
        );
    }

    #[test]
    fn test_containerd_target_skips_hyperkube_wrapper() {
        let pod = pod_with_command(
            "kube-controller-manager",
            &["/hyperkube", "kube-controller-manager", "--v=2"],
        );
        let (runtime, arg) =
            restart_target(&pod, &status("kube-controller-manager", "containerd://1")).unwrap();
        assert_eq!(runtime, ContainerRuntime::Containerd);
        assert_eq!(arg, "kube-controller-manager");
    }

    #[test]
    fn test_containerd_target_needs_a_command() {
        let pod = pod_with_command("pause", &[]);
        let err = restart_target(&pod, &status("pause", "containerd://1")).unwrap_err();
        assert!(matches!(err, Error::MissingField(_)), "{err}");
    }
}

mod condition_tests {
    use jiff::{SignedDuration, Timestamp};
    use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateRunning, ContainerStatus, Pod, PodStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use ca_rotation::wait::conditions::{deployments_updated, pods_ready, pods_restarted_since};

    fn pod(name: &str, ready: bool, started: Timestamp) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                container_statuses: Some(vec![ContainerStatus {
                    name: "main".to_string(),
                    ready,
                    state: Some(ContainerState {
                        running: Some(ContainerStateRunning {
                            started_at: Some(Time(started)),
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_pods_ready_names_first_offender() {
        let now = Timestamp::now();
        let pods = vec![pod("etcd", true, now), pod("kube-apiserver", false, now)];
        let expected = vec!["etcd".to_string(), "kube-apiserver".to_string()];

        let outcome = pods_ready(&pods, &expected);

        assert!(!outcome.satisfied);
        assert_eq!(
            outcome.error.unwrap().to_string(),
            "Condition not met: at least one pod did not reach the Ready state: kube-apiserver"
        );
    }

    #[test]
    fn test_missing_expected_pod_is_not_ready() {
        let pods = vec![pod("etcd", true, Timestamp::now())];
        let outcome = pods_ready(&pods, &["kube-scheduler".to_string()]);
        assert!(!outcome.satisfied);
    }

    #[test]
    fn test_restart_at_exact_instant_counts() {
        let at = Timestamp::now();
        let expected = vec!["kube-apiserver".to_string()];

        assert!(pods_restarted_since(&[pod("kube-apiserver", true, at)], &expected, at).satisfied);
        let earlier = at - SignedDuration::from_secs(1);
        assert!(
            !pods_restarted_since(&[pod("kube-apiserver", true, earlier)], &expected, at)
                .satisfied
        );
    }

    #[test]
    fn test_deployment_rollout_progress() {
        let rolling = Deployment {
            status: Some(DeploymentStatus {
                replicas: Some(3),
                available_replicas: Some(3),
                updated_replicas: Some(1),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(!deployments_updated(&[rolling]).satisfied);
        assert!(deployments_updated(&[]).satisfied);
    }
}

mod retry_tests {
    use std::time::Duration;

    use ca_rotation::retry::{RetryPolicy, step_count};

    #[test]
    fn test_step_count() {
        assert_eq!(step_count(Duration::from_secs(10), Duration::from_secs(300)), 30);
        assert_eq!(step_count(Duration::from_secs(10), Duration::from_secs(5)), 1);
        assert_eq!(step_count(Duration::ZERO, Duration::from_secs(5)), 1);
    }

    #[test]
    fn test_budget_covers_every_attempt() {
        let policy = RetryPolicy::new(Duration::from_secs(10), Duration::from_secs(300));
        assert_eq!(policy.steps(), 30);
        assert_eq!(policy.interval(), Duration::from_secs(10));
    }
}

mod error_tests {
    use ca_rotation::error::Error;

    #[test]
    fn test_root_cause_strips_every_layer() {
        let err = Error::MissingField("containerID".into())
            .context("restart of kube-proxy aborted")
            .context("healing k8s-master-0");
        assert!(matches!(err.root_cause(), Error::MissingField(_)));
        assert_eq!(
            err.to_string(),
            "healing k8s-master-0: restart of kube-proxy aborted: Missing required field: containerID"
        );
    }

    #[test]
    fn test_timeouts_are_retryable_but_convergence_failures_are_not() {
        let race = Error::RaceTimeout {
            operation: "list nodes",
            timeout: std::time::Duration::from_secs(300),
        };
        assert!(race.is_retryable());
        assert!(!Error::ConditionNotMet("nodes".into()).is_retryable());
        assert!(!Error::Cancelled("shutdown".into()).is_retryable());
    }
}

mod cloud_tests {
    use ca_rotation::client::is_virtual_machine_running;

    #[test]
    fn test_power_state() {
        assert!(is_virtual_machine_running("PowerState/running"));
        assert!(is_virtual_machine_running("powerstate/Running"));
        assert!(!is_virtual_machine_running("PowerState/stopped"));
        assert!(!is_virtual_machine_running(""));
    }
}

mod remote_tests {
    use ca_rotation::remote::{AuthConfig, DEFAULT_SSH_PORT, OsType, RemoteHost};

    #[test]
    fn test_host_defaults() {
        let host = RemoteHost::new(
            "10.255.255.5",
            AuthConfig::with_private_key("azureuser", "/root/.ssh/id_rsa"),
        );
        assert_eq!(host.port, DEFAULT_SSH_PORT);
        assert_eq!(host.operating_system, OsType::Linux);
        assert_eq!(host.address(), "10.255.255.5:22");
        assert!(host.jumpbox.is_none());
    }

    #[test]
    fn test_debug_hides_password() {
        let auth = AuthConfig {
            user: "azureuser".to_string(),
            password: Some("hunter2".to_string()),
            private_key_path: None,
        };
        let debug = format!("{auth:?}");
        assert!(!debug.contains("hunter2"), "{debug}");
    }
}

mod config_tests {
    use std::time::Duration;

    use ca_rotation::config::RotationSettings;

    #[test]
    fn test_settings_from_json() {
        let settings: RotationSettings = serde_json::from_value(serde_json::json!({
            "intervalSecs": 5,
            "namespaces": ["kube-system", "monitoring"],
        }))
        .unwrap();

        assert_eq!(settings.interval(), Duration::from_secs(5));
        assert_eq!(settings.api_timeout(), Duration::from_secs(300));
        assert_eq!(settings.wait_timeout(), Duration::from_secs(1200));
        assert_eq!(settings.namespaces.len(), 2);
        assert_eq!(settings.retry_policy().steps(), 60);
    }
}

mod metrics_tests {
    use ca_rotation::metrics::RotationMetrics;

    #[test]
    fn test_race_outcomes_are_labelled() {
        let metrics = RotationMetrics::new();
        metrics.record_race("delete secret", "new", "not_found");
        let encoded = metrics.encode();
        assert!(encoded.contains("operation=\"delete secret\""), "{encoded}");
        assert!(encoded.contains("outcome=\"not_found\""), "{encoded}");
    }
}
