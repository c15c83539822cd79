//! Rotation passes built on the dual-trust-root client.
//!
//! - `tokens`: delete service account tokens and roll out workloads
//! - `autoscaler`: pause and resume the cluster autoscaler
//! - `containers`: restart control plane containers on a node

pub mod autoscaler;
pub mod containers;
pub mod tokens;

pub use autoscaler::{PauseError, ScaleRestore, pause_cluster_autoscaler, pause_deployment};
pub use containers::restart_node_containers;
pub use tokens::{RotationSummary, ServiceAccountRecord, rotate_service_account_tokens};

/// Namespace of the cluster add-ons.
pub const KUBE_SYSTEM: &str = "kube-system";

/// Name of the cluster autoscaler add-on deployment.
pub const CLUSTER_AUTOSCALER: &str = "cluster-autoscaler";
