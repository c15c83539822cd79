//! Pod healing pipeline.
//!
//! A [`PodHealer`] owns one background worker fed with pod snapshots by the
//! readiness waits. Every pod that satisfies all of the healer's predicates
//! and runs on a known node is handed to a [`Remediator`] together with the
//! node's [`RemoteHost`]. Remediations run one at a time on the worker, which
//! bounds the load put on remote hosts.
//!
//! The hand-off channel holds a single pod, so a caller feeding snapshots
//! waits while the worker is busy. Cancelling the healer's scope stops the
//! worker and interrupts an in-flight remediation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use crate::error::Error;
use crate::metrics::RotationMetrics;
use crate::remote::{RemoteExecutor, RemoteHost};
use crate::resources::pod::{
    crashing_containers, is_any_container_crashing, is_mirror_pod, node_name,
    restart_mirror_pod_command, restart_target,
};

/// Predicate over a pod snapshot.
pub type PodPredicate = Arc<dyn Fn(&Pod) -> bool + Send + Sync>;

/// Whether every predicate holds for `pod`. Holds vacuously for no predicates.
pub fn all_hold(predicates: &[PodPredicate], pod: &Pod) -> bool {
    predicates.iter().all(|predicate| predicate(pod))
}

/// Best-effort fix applied to an unhealthy pod on its node.
///
/// Failures are handled inside the remediation; nothing is reported back.
pub trait Remediator: Send + Sync + 'static {
    fn remediate(&self, pod: &Pod, host: &RemoteHost) -> impl Future<Output = ()> + Send;
}

/// Handle to a running healing worker.
///
/// Dropping the handle cancels the worker.
pub struct PodHealer {
    sender: mpsc::Sender<Pod>,
    predicates: Vec<PodPredicate>,
    scope: CancellationToken,
    _scope_guard: DropGuard,
    worker: JoinHandle<()>,
}

impl PodHealer {
    /// Spawn a worker that remediates pods scheduled on one of `nodes`.
    ///
    /// `nodes` is keyed by node name. The worker's scope is a child of `cancel`.
    pub fn spawn<R: Remediator>(
        nodes: HashMap<String, RemoteHost>,
        remediator: R,
        predicates: Vec<PodPredicate>,
        cancel: &CancellationToken,
    ) -> Self {
        let scope = cancel.child_token();
        let (sender, mut receiver) = mpsc::channel::<Pod>(1);
        let worker_scope = scope.clone();

        let worker = tokio::spawn(async move {
            loop {
                let pod = tokio::select! {
                    biased;
                    _ = worker_scope.cancelled() => break,
                    pod = receiver.recv() => match pod {
                        Some(pod) => pod,
                        None => break,
                    },
                };
                let Some(host) = node_name(&pod).and_then(|name| nodes.get(name)) else {
                    debug!(pod = %pod.name_any(), "Pod is not scheduled on a known node, skipping");
                    continue;
                };
                debug!(pod = %pod.name_any(), node = %host.uri, "Healing pod");
                tokio::select! {
                    biased;
                    _ = worker_scope.cancelled() => break,
                    _ = remediator.remediate(&pod, host) => {}
                }
            }
            debug!("Healing worker stopped");
        });

        Self {
            sender,
            predicates,
            _scope_guard: scope.clone().drop_guard(),
            scope,
            worker,
        }
    }

    /// Worker that restarts crash looping containers of mirror pods.
    pub fn crash_looping_mirror_pods<R: Remediator>(
        nodes: HashMap<String, RemoteHost>,
        remediator: R,
        cancel: &CancellationToken,
    ) -> Self {
        let predicates: Vec<PodPredicate> = vec![
            Arc::new(is_mirror_pod),
            Arc::new(is_any_container_crashing),
        ];
        Self::spawn(nodes, remediator, predicates, cancel)
    }

    /// Hand every pod matching all predicates to the worker.
    ///
    /// Waits while the worker is busy. Returns the number of pods handed over,
    /// which is short if the healer is cancelled meanwhile.
    pub async fn feed(&self, pods: &[Pod]) -> usize {
        let mut handed = 0;
        for pod in pods.iter().filter(|pod| all_hold(&self.predicates, pod)) {
            let sent = tokio::select! {
                biased;
                _ = self.scope.cancelled() => false,
                sent = self.sender.send(pod.clone()) => sent.is_ok(),
            };
            if !sent {
                break;
            }
            handed += 1;
        }
        handed
    }

    /// Cancel the worker and wait for it to stop.
    pub async fn shutdown(self) {
        self.scope.cancel();
        if let Err(e) = self.worker.await {
            warn!(error = %e, "Healing worker panicked");
        }
    }
}

/// Restarts the static process behind every crash looping container of a
/// mirror pod through the node's rotation script.
pub struct ContainerRestarter<E> {
    executor: E,
    metrics: Option<Arc<RotationMetrics>>,
}

impl<E: RemoteExecutor> ContainerRestarter<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            metrics: None,
        }
    }

    /// Count healed and failed restarts.
    pub fn with_metrics(mut self, metrics: Arc<RotationMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn record(&self, succeeded: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_heal(succeeded);
        }
    }
}

impl<E: RemoteExecutor + 'static> Remediator for ContainerRestarter<E> {
    async fn remediate(&self, pod: &Pod, host: &RemoteHost) {
        for status in crashing_containers(pod) {
            let (runtime, arg) = match restart_target(pod, status) {
                Ok(target) => target,
                Err(e) => {
                    debug!(
                        pod = %pod.name_any(),
                        container = %status.name,
                        error = %e,
                        "Restart aborted"
                    );
                    continue;
                }
            };
            // Recovers apiservers stuck on "bind: address already in use" after a restart
            debug!(pod = %pod.name_any(), container = %status.name, "Healing container");
            let script = restart_mirror_pod_command(runtime, &arg);
            match self.executor.execute(host, &script).await {
                Ok(_) => self.record(true),
                Err(e) => {
                    debug!(node = %host.uri, error = %e, "Remote command failed");
                    if let Error::Remote { output, .. } = &e {
                        debug!(output = %output, "Remote command output");
                    }
                    self.record(false);
                }
            }
        }
    }
}
