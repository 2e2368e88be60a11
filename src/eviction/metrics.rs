//! Prometheus metrics for eviction passes

use once_cell::sync::Lazy;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

use super::plan::Tier;
use crate::error::{Error, Result};

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TierLabels {
    pub tier: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub outcome: String,
}

/// Pods deleted, per tier
pub static PODS_EVICTED: Lazy<Family<TierLabels, Counter>> = Lazy::new(Family::default);

/// Pod deletions that failed, per tier
pub static EVICTION_FAILURES: Lazy<Family<TierLabels, Counter>> = Lazy::new(Family::default);

/// Completed eviction passes, per outcome
pub static EVICTION_PASSES: Lazy<Family<OutcomeLabels, Counter>> = Lazy::new(Family::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();
    registry.register(
        "node_termination_pods_evicted",
        "Pods deleted from the terminating node",
        PODS_EVICTED.clone(),
    );
    registry.register(
        "node_termination_eviction_failures",
        "Pod deletions that failed",
        EVICTION_FAILURES.clone(),
    );
    registry.register(
        "node_termination_eviction_passes",
        "Eviction passes by outcome",
        EVICTION_PASSES.clone(),
    );
    registry
});

fn tier_labels(tier: Tier) -> TierLabels {
    TierLabels {
        tier: tier.as_str().to_string(),
    }
}

pub fn record_eviction(tier: Tier) {
    PODS_EVICTED.get_or_create(&tier_labels(tier)).inc();
}

pub fn record_failure(tier: Tier) {
    EVICTION_FAILURES.get_or_create(&tier_labels(tier)).inc();
}

/// Count a finished pass; `outcome` is "success", "discovery_failed", "partial" or "timeout"
pub fn record_pass(outcome: &str) {
    EVICTION_PASSES
        .get_or_create(&OutcomeLabels {
            outcome: outcome.to_string(),
        })
        .inc();
}

#[cfg(test)]
pub(crate) fn pass_count(outcome: &str) -> u64 {
    EVICTION_PASSES
        .get_or_create(&OutcomeLabels {
            outcome: outcome.to_string(),
        })
        .get()
}

/// Render every metric in the Prometheus text format
pub fn encode_metrics() -> Result<String> {
    let mut buffer = String::new();
    encode(&mut buffer, &REGISTRY)
        .map_err(|e| Error::ConfigError(format!("Failed to encode metrics: {}", e)))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_exported() {
        record_eviction(Tier::Regular);
        record_failure(Tier::System);
        record_pass("success");

        let text = encode_metrics().unwrap();
        assert!(text.contains("node_termination_pods_evicted_total{tier=\"regular\"}"));
        assert!(text.contains("node_termination_eviction_failures_total{tier=\"system\"}"));
        assert!(text.contains("node_termination_eviction_passes_total{outcome=\"success\"}"));
    }

    #[test]
    fn test_counter_increments() {
        let before = PODS_EVICTED.get_or_create(&tier_labels(Tier::System)).get();
        record_eviction(Tier::System);
        let after = PODS_EVICTED.get_or_create(&tier_labels(Tier::System)).get();
        assert!(after > before);
    }
}
