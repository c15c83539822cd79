//! Service account token rotation.
//!
//! Legacy service account token secrets are signed by the cluster CA. Once the
//! CA is rotated the tokens are deleted so the controller manager issues new
//! ones signed by the new CA, and every workload is rolled out so its pods
//! mount the fresh tokens.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use k8s_openapi::api::core::v1::{PodSpec, ServiceAccount};
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use crate::client::KubeClient;
use crate::error::Result;
use crate::resources::patch::RolloutPatch;

/// A service account and the token secrets it references.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceAccountRecord {
    pub name: String,
    pub secret_refs: BTreeSet<String>,
}

impl From<&ServiceAccount> for ServiceAccountRecord {
    fn from(sa: &ServiceAccount) -> Self {
        let secret_refs = sa
            .secrets
            .iter()
            .flatten()
            .filter_map(|reference| reference.name.clone())
            .collect();
        Self {
            name: sa.name_any(),
            secret_refs,
        }
    }
}

/// What a rotation run changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RotationSummary {
    /// Token secrets deleted. Secrets that were already gone are not counted.
    pub secrets_deleted: usize,
    /// Service accounts deleted.
    pub service_accounts_deleted: usize,
    /// Deployments and daemonsets patched to force a rollout.
    pub workloads_patched: usize,
}

impl RotationSummary {
    fn absorb(&mut self, other: RotationSummary) {
        self.secrets_deleted += other.secrets_deleted;
        self.service_accounts_deleted += other.service_accounts_deleted;
        self.workloads_patched += other.workloads_patched;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WorkloadKind {
    Deployment,
    DaemonSet,
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadKind::Deployment => write!(f, "deployment"),
            WorkloadKind::DaemonSet => write!(f, "daemonset"),
        }
    }
}

/// A workload to roll out and the service account its pods run as.
struct Workload {
    name: String,
    service_account: Option<String>,
}

fn template_service_account(spec: Option<&PodSpec>) -> Option<String> {
    spec.and_then(|spec| spec.service_account_name.clone())
        .filter(|name| !name.is_empty())
}

/// Service accounts of one namespace whose tokens have not been revoked yet.
struct TokenRevoker<'a, K> {
    client: &'a K,
    namespace: &'a str,
    accounts: HashMap<String, ServiceAccountRecord>,
    summary: RotationSummary,
}

impl<'a, K: KubeClient> TokenRevoker<'a, K> {
    /// `None` when the namespace has no service accounts.
    async fn load(client: &'a K, namespace: &'a str) -> Result<Option<Self>> {
        let accounts = client
            .list_service_accounts(namespace)
            .await
            .map_err(|e| e.context(format!("listing {namespace} service accounts")))?;
        if accounts.is_empty() {
            return Ok(None);
        }
        let accounts = accounts
            .iter()
            .map(ServiceAccountRecord::from)
            .map(|record| (record.name.clone(), record))
            .collect();
        Ok(Some(Self {
            client,
            namespace,
            accounts,
            summary: RotationSummary::default(),
        }))
    }

    /// Delete the token secrets of `name`, then the service account itself.
    ///
    /// Untracked or already revoked accounts are ignored.
    async fn revoke(&mut self, name: &str) -> Result<()> {
        let Some(record) = self.accounts.get(name) else {
            return Ok(());
        };
        let ns = self.namespace;
        for secret in &record.secret_refs {
            match self.client.delete_secret(ns, secret).await {
                Ok(()) => self.summary.secrets_deleted += 1,
                Err(e) if e.is_not_found() => {
                    debug!(namespace = %ns, secret = %secret, "Token secret already deleted");
                }
                Err(e) => return Err(e.context(format!("deleting {ns} secret {secret}"))),
            }
        }
        match self.client.delete_service_account(ns, name).await {
            Ok(()) => self.summary.service_accounts_deleted += 1,
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.context(format!("deleting {ns} service account {name}"))),
        }
        self.accounts.remove(name);
        Ok(())
    }

    /// Revoke tokens of every workload's service account and patch every workload.
    async fn roll_out(&mut self, kind: WorkloadKind, workloads: Vec<Workload>) -> Result<()> {
        let patch = RolloutPatch::random().to_value()?;
        let ns = self.namespace;
        for workload in workloads {
            if let Some(sa) = &workload.service_account {
                self.revoke(sa).await?;
            }
            let patched = match kind {
                WorkloadKind::Deployment => self
                    .client
                    .patch_deployment(ns, &workload.name, &patch)
                    .await
                    .map(drop),
                WorkloadKind::DaemonSet => self
                    .client
                    .patch_daemon_set(ns, &workload.name, &patch)
                    .await
                    .map(drop),
            };
            match patched {
                Ok(()) => self.summary.workloads_patched += 1,
                Err(e) if e.is_not_found() => {
                    debug!(namespace = %ns, name = %workload.name, "Workload already deleted");
                }
                Err(e) => {
                    return Err(e.context(format!("patching {ns} {kind} {}", workload.name)));
                }
            }
        }
        Ok(())
    }
}

async fn rotate_namespace<K: KubeClient>(client: &K, namespace: &str) -> Result<RotationSummary> {
    let Some(mut revoker) = TokenRevoker::load(client, namespace).await? else {
        debug!(namespace = %namespace, "No service accounts, skipping");
        return Ok(RotationSummary::default());
    };

    let deployments = client
        .list_deployments(namespace)
        .await
        .map_err(|e| e.context(format!("listing {namespace} deployments")))?
        .into_iter()
        .map(|deploy| Workload {
            service_account: template_service_account(
                deploy.spec.as_ref().and_then(|s| s.template.spec.as_ref()),
            ),
            name: deploy.name_any(),
        })
        .collect();
    revoker
        .roll_out(WorkloadKind::Deployment, deployments)
        .await?;

    let daemon_sets = client
        .list_daemon_sets(namespace)
        .await
        .map_err(|e| e.context(format!("listing {namespace} daemonsets")))?
        .into_iter()
        .map(|ds| Workload {
            service_account: template_service_account(
                ds.spec.as_ref().and_then(|s| s.template.spec.as_ref()),
            ),
            name: ds.name_any(),
        })
        .collect();
    revoker.roll_out(WorkloadKind::DaemonSet, daemon_sets).await?;

    Ok(revoker.summary)
}

/// Delete the service account tokens referenced by deployments and daemonsets
/// of `namespaces` and force a rollout of every deployment and daemonset.
///
/// Stops at the first failure; tokens or workloads already gone are skipped.
#[instrument(skip(client))]
pub async fn rotate_service_account_tokens<K: KubeClient>(
    client: &K,
    namespaces: &[String],
) -> Result<RotationSummary> {
    let mut summary = RotationSummary::default();
    for namespace in namespaces {
        let rotated = rotate_namespace(client, namespace).await?;
        info!(
            namespace = %namespace,
            secrets_deleted = rotated.secrets_deleted,
            workloads_patched = rotated.workloads_patched,
            "Rotated service account tokens"
        );
        summary.absorb(rotated);
    }
    Ok(summary)
}
