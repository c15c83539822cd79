//! Dual-trust-root Kubernetes client.
//!
//! While a cluster CA is being rotated some api servers present certificates
//! signed by the old CA and some by the new one, and it cannot be known in
//! advance which one a given request will hit. [`DualClient`] wraps one client
//! per trust root and runs every operation against both concurrently:
//!
//! - each arm retries on its own at a fixed interval, up to `timeout / interval` attempts
//! - the first arm to succeed wins and the other arm is dropped
//! - for idempotent writes (patch, delete) a "not found" answer is final and
//!   wins the race as is, since the target is already gone
//! - if nothing wins before the timeout, the last error seen is returned
//!
//! Both arms share one cancellation scope, a child of the client's scope. The
//! scope is cancelled as soon as the race is decided, which interrupts the
//! losing arm's pending pause. Cancelling the client's scope ends a race at
//! once, even while both arms are blocked inside a call.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Node, Pod, Secret, ServiceAccount};
use kube::api::ListParams;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::KubeClient;
use crate::error::{Error, Result};
use crate::metrics::RotationMetrics;
use crate::retry::RetryPolicy;

/// Which client of the pair an arm runs against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrustRoot {
    /// Client that trusts the CA being replaced.
    Old,
    /// Client that trusts the CA being introduced.
    New,
}

impl TrustRoot {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustRoot::Old => "old",
            TrustRoot::New => "new",
        }
    }
}

impl std::fmt::Display for TrustRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an arm treats a "not found" answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Access {
    /// Reads retry on not found like on any other error.
    Read,
    /// Idempotent writes settle on not found.
    Write,
}

/// How an arm finished.
enum ArmOutcome<T> {
    /// Success, or a not found answer to a write.
    Settled(Result<T>),
    /// Ran out of attempts.
    Exhausted,
    /// Stopped early: the retry predicate rejected an error or the scope was cancelled.
    Stopped,
}

/// Last error observed per arm.
#[derive(Default)]
struct LastErrors {
    old: Option<Error>,
    new: Option<Error>,
}

impl LastErrors {
    fn record(&mut self, root: TrustRoot, err: Error) {
        match root {
            TrustRoot::Old => self.old = Some(err),
            TrustRoot::New => self.new = Some(err),
        }
    }

    /// The old-trust arm's error wins ties so the result does not depend on scheduling.
    fn take(self) -> Option<Error> {
        self.old.or(self.new)
    }
}

/// Kubernetes client that races an old-trust and a new-trust client.
///
/// The pair shares nothing but the channel the arms report errors on.
pub struct DualClient<C> {
    old: C,
    new: C,
    retry: RetryPolicy,
    timeout: Duration,
    cancel: CancellationToken,
    metrics: Option<Arc<RotationMetrics>>,
}

impl<C: KubeClient> DualClient<C> {
    /// Create a client whose arms retry every error at `interval` for up to `timeout`.
    pub fn new(old: C, new: C, interval: Duration, timeout: Duration) -> Self {
        Self {
            old,
            new,
            retry: RetryPolicy::new(interval, timeout),
            timeout,
            cancel: CancellationToken::new(),
            metrics: None,
        }
    }

    /// Replace the per-arm retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Tie every race to an outer cancellation scope.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Record race outcomes.
    pub fn with_metrics(mut self, metrics: Arc<RotationMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Client that trusts the CA being replaced.
    pub fn old_trust(&self) -> &C {
        &self.old
    }

    /// Client that trusts the CA being introduced.
    pub fn new_trust(&self) -> &C {
        &self.new
    }

    /// Overall deadline of every operation.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn record(&self, operation: &str, root: &str, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_race(operation, root, outcome);
        }
    }

    /// Retry `call` against one client until it settles or gives up, reporting
    /// every error it does not settle on through `errors`.
    async fn arm<'a, T, F, Fut>(
        &self,
        root: TrustRoot,
        client: &'a C,
        call: &F,
        access: Access,
        scope: &CancellationToken,
        errors: &mpsc::UnboundedSender<(TrustRoot, Error)>,
    ) -> ArmOutcome<T>
    where
        F: Fn(&'a C) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let steps = self.retry.steps();
        for attempt in 1..=steps {
            let err = match call(client).await {
                Ok(value) => return ArmOutcome::Settled(Ok(value)),
                Err(e) if access == Access::Write && e.is_not_found() => {
                    return ArmOutcome::Settled(Err(e));
                }
                Err(e) => e,
            };
            let retryable = self.retry.is_retryable(&err);
            debug!(
                trust_root = %root,
                attempt = attempt,
                steps = steps,
                error = %err,
                "Attempt failed"
            );
            // The receiver lives as long as the race; a send error means it is already decided.
            let _ = errors.send((root, err));
            if !retryable {
                return ArmOutcome::Stopped;
            }
            if attempt < steps && !self.retry.pause(scope).await {
                return ArmOutcome::Stopped;
            }
        }
        ArmOutcome::Exhausted
    }

    /// Run `call` against both clients and return the first settled result.
    async fn race<'a, T, F, Fut>(
        &'a self,
        operation: &'static str,
        access: Access,
        call: F,
    ) -> Result<T>
    where
        F: Fn(&'a C) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let scope = self.cancel.child_token();
        let _scope_guard = scope.clone().drop_guard();
        let (errors_tx, mut errors_rx) = mpsc::unbounded_channel();

        let old = self.arm(TrustRoot::Old, &self.old, &call, access, &scope, &errors_tx);
        let new = self.arm(TrustRoot::New, &self.new, &call, access, &scope, &errors_tx);
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(old, new, deadline);

        let mut last = LastErrors::default();
        let mut old_end: Option<bool> = None;
        let mut new_end: Option<bool> = None;

        loop {
            tokio::select! {
                biased;
                Some((root, err)) = errors_rx.recv() => last.record(root, err),
                outcome = &mut old, if old_end.is_none() => match outcome {
                    ArmOutcome::Settled(result) => return self.settle(operation, TrustRoot::Old, result),
                    ArmOutcome::Exhausted => old_end = Some(true),
                    ArmOutcome::Stopped => old_end = Some(false),
                },
                outcome = &mut new, if new_end.is_none() => match outcome {
                    ArmOutcome::Settled(result) => return self.settle(operation, TrustRoot::New, result),
                    ArmOutcome::Exhausted => new_end = Some(true),
                    ArmOutcome::Stopped => new_end = Some(false),
                },
                _ = self.cancel.cancelled() => break,
                _ = &mut deadline => break,
            }
            // Nothing can settle once both arms ended. Two exhausted arms still
            // wait for the deadline so a failing race always lasts the full timeout.
            if old_end.is_some()
                && new_end.is_some()
                && (old_end == Some(false) || new_end == Some(false))
            {
                break;
            }
        }

        while let Ok((root, err)) = errors_rx.try_recv() {
            last.record(root, err);
        }
        if self.cancel.is_cancelled() {
            self.record(operation, "none", "cancelled");
            return Err(Error::Cancelled(operation.to_string()));
        }
        self.record(operation, "none", "timeout");
        let err = last.take().unwrap_or(Error::RaceTimeout {
            operation,
            timeout: self.timeout,
        });
        warn!(
            operation = operation,
            timeout = ?self.timeout,
            error = %err,
            "Neither trust root succeeded"
        );
        Err(err)
    }

    fn settle<T>(&self, operation: &'static str, root: TrustRoot, result: Result<T>) -> Result<T> {
        let outcome = if result.is_ok() { "success" } else { "not_found" };
        debug!(operation = operation, trust_root = %root, outcome = outcome, "Race settled");
        self.record(operation, root.as_str(), outcome);
        result
    }
}

impl<C: KubeClient> KubeClient for DualClient<C> {
    async fn list_pods(&self, namespace: &str, params: &ListParams) -> Result<Vec<Pod>> {
        self.race("list pods", Access::Read, |c| c.list_pods(namespace, params))
            .await
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        self.race("list nodes", Access::Read, |c| c.list_nodes()).await
    }

    async fn list_service_accounts(&self, namespace: &str) -> Result<Vec<ServiceAccount>> {
        self.race("list service accounts", Access::Read, |c| {
            c.list_service_accounts(namespace)
        })
        .await
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>> {
        self.race("list deployments", Access::Read, |c| {
            c.list_deployments(namespace)
        })
        .await
    }

    async fn list_daemon_sets(&self, namespace: &str) -> Result<Vec<DaemonSet>> {
        self.race("list daemonsets", Access::Read, |c| {
            c.list_daemon_sets(namespace)
        })
        .await
    }

    async fn list_secrets(&self, namespace: &str) -> Result<Vec<Secret>> {
        self.race("list secrets", Access::Read, |c| c.list_secrets(namespace))
            .await
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        self.race("get deployment", Access::Read, |c| {
            c.get_deployment(namespace, name)
        })
        .await
    }

    async fn patch_deployment(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<Deployment> {
        self.race("patch deployment", Access::Write, |c| {
            c.patch_deployment(namespace, name, patch)
        })
        .await
    }

    async fn patch_daemon_set(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<DaemonSet> {
        self.race("patch daemonset", Access::Write, |c| {
            c.patch_daemon_set(namespace, name, patch)
        })
        .await
    }

    async fn delete_pods(&self, namespace: &str, params: &ListParams) -> Result<()> {
        self.race("delete pods", Access::Write, |c| {
            c.delete_pods(namespace, params)
        })
        .await
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        self.race("delete secret", Access::Write, |c| {
            c.delete_secret(namespace, name)
        })
        .await
    }

    async fn delete_service_account(&self, namespace: &str, name: &str) -> Result<()> {
        self.race("delete service account", Access::Write, |c| {
            c.delete_service_account(namespace, name)
        })
        .await
    }
}
