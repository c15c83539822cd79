//! Kubernetes resource helpers.
//!
//! This module provides:
//! - Pod and node inspection helpers (readiness, crash loops, mirror pods)
//! - Container id parsing and the remote restart commands derived from it
//! - Typed merge patches used to force rollouts and scale deployments

pub mod patch;
pub mod pod;

pub use patch::{ROTATION_ANNOTATION, ReplicasPatch, RolloutPatch};
pub use pod::{
    ContainerId, ContainerRuntime, is_any_container_crashing, is_container_crashing,
    is_mirror_pod, is_node_ready, is_pod_ready,
};
