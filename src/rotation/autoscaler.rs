//! Pausing the cluster autoscaler while nodes restart.
//!
//! A node that restarts during the rotation looks unhealthy to the
//! autoscaler, which could then remove it. The autoscaler deployment is scaled
//! to zero for the duration of the rotation and scaled back afterwards.

use tracing::{info, instrument, warn};

use super::{CLUSTER_AUTOSCALER, KUBE_SYSTEM};
use crate::client::KubeClient;
use crate::error::{Error, Result};
use crate::resources::patch::ReplicasPatch;

/// Reverses a scale-down.
///
/// Holds the replica count to restore. A restore with nothing to restore is a no-op.
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use = "the deployment stays scaled down unless resume is called"]
pub struct ScaleRestore {
    namespace: String,
    name: String,
    replicas: Option<i32>,
}

impl ScaleRestore {
    fn noop(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            replicas: None,
        }
    }

    /// Replica count `resume` scales back to, if any.
    pub fn replicas(&self) -> Option<i32> {
        self.replicas
    }

    /// Scale the deployment back to its original replica count.
    pub async fn resume<K: KubeClient>(&self, client: &K) -> Result<()> {
        let Some(replicas) = self.replicas else {
            return Ok(());
        };
        info!(
            name = %self.name,
            replicas = replicas,
            "Resuming deployment, restoring replica count"
        );
        let result = apply_replicas(client, &self.namespace, &self.name, replicas).await;
        if self.name == CLUSTER_AUTOSCALER {
            warn!("Upgrade the cluster to refresh the cluster-autoscaler node template");
        }
        result
    }
}

/// The scale-down failed. `resume` still restores the original replica count.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct PauseError {
    #[source]
    pub source: Error,
    pub resume: ScaleRestore,
}

async fn apply_replicas<K: KubeClient>(
    client: &K,
    namespace: &str,
    name: &str,
    replicas: i32,
) -> Result<()> {
    let patch = ReplicasPatch::new(replicas).to_value()?;
    match client.patch_deployment(namespace, name, &patch).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e.context(format!("applying patch to {name} deployment"))),
    }
}

/// Scale a deployment to zero replicas.
///
/// Absent deployments and deployments already at zero are left alone and yield
/// a no-op restore.
#[instrument(skip(client))]
pub async fn pause_deployment<K: KubeClient>(
    client: &K,
    namespace: &str,
    name: &str,
) -> std::result::Result<ScaleRestore, PauseError> {
    let deployment = match client.get_deployment(namespace, name).await {
        Ok(deployment) => deployment,
        Err(e) if e.is_not_found() => return Ok(ScaleRestore::noop(namespace, name)),
        Err(e) => {
            return Err(PauseError {
                source: e.context(format!("getting {name} deployment")),
                resume: ScaleRestore::noop(namespace, name),
            });
        }
    };
    let replicas = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(1);
    if replicas == 0 {
        return Ok(ScaleRestore::noop(namespace, name));
    }

    let restore = ScaleRestore {
        namespace: namespace.to_string(),
        name: name.to_string(),
        replicas: Some(replicas),
    };
    info!(name = %name, "Pausing deployment, setting replica count to 0");
    match apply_replicas(client, namespace, name, 0).await {
        Ok(()) => Ok(restore),
        Err(source) => Err(PauseError {
            source,
            resume: restore,
        }),
    }
}

/// Scale the `kube-system/cluster-autoscaler` deployment to zero replicas.
pub async fn pause_cluster_autoscaler<K: KubeClient>(
    client: &K,
) -> std::result::Result<ScaleRestore, PauseError> {
    pause_deployment(client, KUBE_SYSTEM, CLUSTER_AUTOSCALER).await
}
