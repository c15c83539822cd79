//! ca-rotation library crate
//!
//! Control-plane plumbing used while a cluster certificate authority is
//! rotated, when some api servers trust the old CA and some the new one:
//!
//! - [`client::DualClient`] races an old-trust and a new-trust client
//! - [`client::RetryingCloudClient`] retries virtual machine power operations
//! - [`wait`] polls cluster state until it converges, failing fast on crash loops
//! - [`rotation`] rotates service account tokens and pauses the autoscaler
//! - [`heal`] restarts crash looping static pods on their nodes
//!
//! No command-line entry point ships with the crate; an orchestrator composes
//! these pieces.

pub mod client;
pub mod config;
pub mod error;
pub mod heal;
pub mod metrics;
pub mod remote;
pub mod resources;
pub mod retry;
pub mod rotation;
pub mod telemetry;
pub mod wait;

pub use client::{DualClient, KubeApiClient, KubeClient, TrustRoot};
pub use config::RotationSettings;
pub use error::{Error, Result};
pub use heal::{ContainerRestarter, PodHealer, Remediator};
pub use metrics::RotationMetrics;
pub use remote::{RemoteExecutor, RemoteHost};
pub use retry::RetryPolicy;
pub use wait::{ConditionOutcome, PollState, wait_for};
