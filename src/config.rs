//! Rotation settings.
//!
//! Embedding programs deserialize [`RotationSettings`] from whatever source
//! they use and derive the clients and policies from it.

use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::client::{DualClient, KubeClient};
use crate::retry::RetryPolicy;
use crate::rotation::KUBE_SYSTEM;

/// Default pause between attempts.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
/// Default overall deadline of a single API operation.
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Default deadline of a convergence wait.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Timing and scope of a rotation run.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RotationSettings {
    /// Seconds between retry attempts and between polls.
    pub interval_secs: u64,
    /// Seconds an API operation may take, retries included.
    pub api_timeout_secs: u64,
    /// Seconds a convergence wait may take.
    pub wait_timeout_secs: u64,
    /// Namespaces whose service account tokens are rotated.
    pub namespaces: Vec<String>,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL.as_secs(),
            api_timeout_secs: DEFAULT_API_TIMEOUT.as_secs(),
            wait_timeout_secs: DEFAULT_WAIT_TIMEOUT.as_secs(),
            namespaces: vec![KUBE_SYSTEM.to_string()],
        }
    }
}

impl RotationSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    /// Retry every error at the configured interval within the API timeout.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.interval(), self.api_timeout())
    }

    /// Dual-trust-root client bound to `cancel`.
    pub fn dual_client<C: KubeClient>(
        &self,
        old: C,
        new: C,
        cancel: CancellationToken,
    ) -> DualClient<C> {
        DualClient::new(old, new, self.interval(), self.api_timeout()).with_cancellation(cancel)
    }
}
