//! Bounded-retry wrapper for cloud resource management calls.
//!
//! Cloud management APIs throttle aggressively. [`RetryingCloudClient`] retries
//! every call a fixed number of times at a fixed interval, and bounds each
//! individual attempt with its own deadline so one hung request cannot consume
//! the whole retry budget.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Deadline of a single cloud API attempt.
pub const ATTEMPT_DEADLINE: Duration = Duration::from_secs(5 * 60);

/// Power state reported by a running virtual machine.
const POWER_STATE_RUNNING: &str = "PowerState/running";

/// Virtual machine power operations, keyed by resource group and name.
pub trait CloudClient: Send + Sync {
    /// Power state of a virtual machine, e.g. `PowerState/running`.
    fn get_virtual_machine_power_state(
        &self,
        resource_group: &str,
        vm_name: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Power state of a scale set instance.
    fn get_virtual_machine_scale_set_instance_power_state(
        &self,
        resource_group: &str,
        vmss_name: &str,
        instance_id: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Restart a virtual machine.
    fn restart_virtual_machine(
        &self,
        resource_group: &str,
        vm_name: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Restart every instance of a scale set.
    fn restart_virtual_machine_scale_sets(
        &self,
        resource_group: &str,
        vmss_name: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Whether a power state string reports a running machine.
pub fn is_virtual_machine_running(status: &str) -> bool {
    status.eq_ignore_ascii_case(POWER_STATE_RUNNING)
}

/// [`CloudClient`] that retries every call with a bounded step count.
pub struct RetryingCloudClient<C> {
    inner: C,
    retry: RetryPolicy,
    attempt_deadline: Duration,
    cancel: CancellationToken,
}

impl<C: CloudClient> RetryingCloudClient<C> {
    /// Retry every error at `interval`, `timeout / interval` times.
    pub fn new(inner: C, interval: Duration, timeout: Duration) -> Self {
        Self {
            inner,
            retry: RetryPolicy::new(interval, timeout),
            attempt_deadline: ATTEMPT_DEADLINE,
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override the per-attempt deadline.
    pub fn with_attempt_deadline(mut self, deadline: Duration) -> Self {
        self.attempt_deadline = deadline;
        self
    }

    /// Stop retrying once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Retry policy applied to every call.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    async fn call<'a, T, F, Fut>(&'a self, operation: &'static str, intent: &str, f: F) -> Result<T>
    where
        F: Fn(&'a C) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let inner = &self.inner;
        let deadline = self.attempt_deadline;
        let f = &f;
        self.retry
            .retry(&self.cancel, move || async move {
                match tokio::time::timeout(deadline, f(inner)).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::AttemptTimeout {
                        operation,
                        deadline,
                    }),
                }
            })
            .await
            .map_err(|e| e.context(intent))
    }
}

impl<C: CloudClient> CloudClient for RetryingCloudClient<C> {
    #[instrument(skip(self))]
    async fn get_virtual_machine_power_state(
        &self,
        resource_group: &str,
        vm_name: &str,
    ) -> Result<String> {
        self.call(
            "get virtual machine power state",
            "fetching virtual machine resource",
            |c| c.get_virtual_machine_power_state(resource_group, vm_name),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn get_virtual_machine_scale_set_instance_power_state(
        &self,
        resource_group: &str,
        vmss_name: &str,
        instance_id: &str,
    ) -> Result<String> {
        self.call(
            "get scale set instance power state",
            "fetching virtual machine resource",
            |c| {
                c.get_virtual_machine_scale_set_instance_power_state(
                    resource_group,
                    vmss_name,
                    instance_id,
                )
            },
        )
        .await
    }

    #[instrument(skip(self))]
    async fn restart_virtual_machine(&self, resource_group: &str, vm_name: &str) -> Result<()> {
        self.call(
            "restart virtual machine",
            "restarting virtual machine",
            |c| c.restart_virtual_machine(resource_group, vm_name),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn restart_virtual_machine_scale_sets(
        &self,
        resource_group: &str,
        vmss_name: &str,
    ) -> Result<()> {
        self.call(
            "restart virtual machine scale set",
            "restarting virtual machine",
            |c| c.restart_virtual_machine_scale_sets(resource_group, vmss_name),
        )
        .await
    }
}
