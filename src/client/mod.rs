//! Client module for control-plane and cloud operations.
//!
//! This module defines the capability sets the rotation core depends on and
//! the clients that implement them.
//!
//! ## Architecture
//!
//! - `kube_api`: [`KubeClient`] over a `kube::Client`, one per trust root
//! - `dual`: races an old-trust and a new-trust client and returns the first success
//! - `cloud`: bounded-retry wrapper for virtual machine power operations
//!
//! ## Example
//!
//! ```rust,ignore
//! use ca_rotation::client::{DualClient, KubeApiClient, KubeClient};
//!
//! let old = KubeApiClient::for_trust_root(config.clone(), old_ca_der)?;
//! let new = KubeApiClient::for_trust_root(config, new_ca_der)?;
//! let client = DualClient::new(old, new, Duration::from_secs(5), Duration::from_secs(60));
//! let nodes = client.list_nodes().await?;
//! ```

use std::future::Future;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Node, Pod, Secret, ServiceAccount};
use kube::api::ListParams;

use crate::error::Result;

pub mod cloud;
pub mod dual;
pub mod kube_api;

pub use cloud::{CloudClient, RetryingCloudClient, is_virtual_machine_running};
pub use dual::{DualClient, TrustRoot};
pub use kube_api::KubeApiClient;

/// Control-plane operations used during a CA rotation.
///
/// An empty namespace addresses every namespace for list calls. Calls that
/// get, patch or delete need a namespace and fail with
/// [`Error::MissingField`](crate::error::Error::MissingField) without one.
pub trait KubeClient: Send + Sync {
    /// List pods matching the selectors in `params`.
    fn list_pods(
        &self,
        namespace: &str,
        params: &ListParams,
    ) -> impl Future<Output = Result<Vec<Pod>>> + Send;

    /// List the nodes registered in the api server.
    fn list_nodes(&self) -> impl Future<Output = Result<Vec<Node>>> + Send;

    /// List service accounts in a namespace.
    fn list_service_accounts(
        &self,
        namespace: &str,
    ) -> impl Future<Output = Result<Vec<ServiceAccount>>> + Send;

    /// List deployments in a namespace.
    fn list_deployments(
        &self,
        namespace: &str,
    ) -> impl Future<Output = Result<Vec<Deployment>>> + Send;

    /// List daemonsets in a namespace.
    fn list_daemon_sets(
        &self,
        namespace: &str,
    ) -> impl Future<Output = Result<Vec<DaemonSet>>> + Send;

    /// List secrets in a namespace.
    fn list_secrets(&self, namespace: &str) -> impl Future<Output = Result<Vec<Secret>>> + Send;

    /// Get a deployment.
    fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Deployment>> + Send;

    /// Apply a JSON merge patch to a deployment.
    fn patch_deployment(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> impl Future<Output = Result<Deployment>> + Send;

    /// Apply a JSON merge patch to a daemonset.
    fn patch_daemon_set(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> impl Future<Output = Result<DaemonSet>> + Send;

    /// Delete every pod matching the selectors in `params`.
    fn delete_pods(
        &self,
        namespace: &str,
        params: &ListParams,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Delete a secret.
    fn delete_secret(&self, namespace: &str, name: &str)
    -> impl Future<Output = Result<()>> + Send;

    /// Delete a service account.
    fn delete_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}
