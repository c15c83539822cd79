//! [`KubeClient`] implementation over a live api server.

use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Node, Pod, Secret, ServiceAccount};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::{Client, Config, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use super::KubeClient;
use crate::error::{Error, Result};

/// Create namespaced or cluster-wide API based on scope
fn scoped_api<T>(client: Client, namespace: &str) -> Api<T>
where
    T: Resource<Scope = NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    if namespace.is_empty() {
        Api::all(client)
    } else {
        Api::namespaced(client, namespace)
    }
}

/// Namespaced API for calls that address objects by name.
fn named_api<T>(client: Client, namespace: &str) -> Result<Api<T>>
where
    T: Resource<Scope = NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
{
    if namespace.is_empty() {
        return Err(Error::MissingField("namespace".to_string()));
    }
    Ok(Api::namespaced(client, namespace))
}

/// Kubernetes client bound to a single trust root.
#[derive(Clone)]
pub struct KubeApiClient {
    client: Client,
}

impl KubeApiClient {
    /// Wrap an existing client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from `config` that trusts only the given DER-encoded
    /// root certificates.
    pub fn for_trust_root(mut config: Config, root_certs_der: Vec<Vec<u8>>) -> Result<Self> {
        config.root_cert = Some(root_certs_der);
        let client = Client::try_from(config)?;
        Ok(Self { client })
    }

    /// Client from the default kubeconfig or in-cluster environment.
    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }

    /// Underlying kube client.
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

impl KubeClient for KubeApiClient {
    #[instrument(skip(self, params))]
    async fn list_pods(&self, namespace: &str, params: &ListParams) -> Result<Vec<Pod>> {
        let api: Api<Pod> = scoped_api(self.client.clone(), namespace);
        Ok(api.list(params).await?.items)
    }

    #[instrument(skip(self))]
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    #[instrument(skip(self))]
    async fn list_service_accounts(&self, namespace: &str) -> Result<Vec<ServiceAccount>> {
        let api: Api<ServiceAccount> = scoped_api(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    #[instrument(skip(self))]
    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>> {
        let api: Api<Deployment> = scoped_api(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    #[instrument(skip(self))]
    async fn list_daemon_sets(&self, namespace: &str) -> Result<Vec<DaemonSet>> {
        let api: Api<DaemonSet> = scoped_api(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    #[instrument(skip(self))]
    async fn list_secrets(&self, namespace: &str) -> Result<Vec<Secret>> {
        let api: Api<Secret> = scoped_api(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    #[instrument(skip(self))]
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        let api: Api<Deployment> = named_api(self.client.clone(), namespace)?;
        Ok(api.get(name).await?)
    }

    #[instrument(skip(self, patch))]
    async fn patch_deployment(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<Deployment> {
        let api: Api<Deployment> = named_api(self.client.clone(), namespace)?;
        Ok(api
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?)
    }

    #[instrument(skip(self, patch))]
    async fn patch_daemon_set(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<DaemonSet> {
        let api: Api<DaemonSet> = named_api(self.client.clone(), namespace)?;
        Ok(api
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?)
    }

    #[instrument(skip(self, params))]
    async fn delete_pods(&self, namespace: &str, params: &ListParams) -> Result<()> {
        let api: Api<Pod> = named_api(self.client.clone(), namespace)?;
        api.delete_collection(&DeleteParams::default(), params)
            .await?;
        debug!(namespace = %namespace, "Pod collection delete issued");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Secret> = named_api(self.client.clone(), namespace)?;
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_service_account(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<ServiceAccount> = named_api(self.client.clone(), namespace)?;
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}
