//! Prometheus metrics for rotation operations.
//!
//! Records which trust root wins each dual-client race and how many crash
//! looping containers the healing worker restarted. Embedding programs expose
//! the text encoding on whatever endpoint they serve.

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

/// Labels for race outcome metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct RaceLabels {
    pub operation: String,
    pub trust_root: String,
    pub outcome: String,
}

impl EncodeLabelSet for RaceLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("operation", self.operation.as_str()).encode(encoder.encode_label())?;
        ("trust_root", self.trust_root.as_str()).encode(encoder.encode_label())?;
        ("outcome", self.outcome.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for rotation operations
pub struct RotationMetrics {
    /// Dual-client race outcomes
    pub race_outcomes_total: Family<RaceLabels, Counter>,
    /// Containers restarted by the healing worker
    pub containers_healed_total: Counter,
    /// Remediation attempts that failed on the remote host
    pub heal_failures_total: Counter,
    /// Prometheus registry
    registry: Registry,
}

impl Default for RotationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RotationMetrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let race_outcomes_total = Family::<RaceLabels, Counter>::default();
        registry.register(
            "ca_rotation_race_outcomes",
            "Outcomes of dual trust root races",
            race_outcomes_total.clone(),
        );

        let containers_healed_total = Counter::default();
        registry.register(
            "ca_rotation_containers_healed",
            "Crash looping containers restarted on their node",
            containers_healed_total.clone(),
        );

        let heal_failures_total = Counter::default();
        registry.register(
            "ca_rotation_heal_failures",
            "Container restarts that failed on the remote host",
            heal_failures_total.clone(),
        );

        Self {
            race_outcomes_total,
            containers_healed_total,
            heal_failures_total,
            registry,
        }
    }

    /// Record the outcome of a race
    pub fn record_race(&self, operation: &str, trust_root: &str, outcome: &str) {
        let labels = RaceLabels {
            operation: operation.to_string(),
            trust_root: trust_root.to_string(),
            outcome: outcome.to_string(),
        };
        self.race_outcomes_total.get_or_create(&labels).inc();
    }

    /// Record a healed container
    pub fn record_heal(&self, succeeded: bool) {
        if succeeded {
            self.containers_healed_total.inc();
        } else {
            self.heal_failures_total.inc();
        }
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}
