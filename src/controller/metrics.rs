//! Prometheus metrics for the cloud lifecycle controller

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

/// Labels for the reconcile outcome counter
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub outcome: String,
}

/// Labels for the deleted node counter
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DeletionLabels {
    pub status: String,
    pub dry_run: String,
}

/// Reconciliation passes by outcome
pub static RECONCILE_OUTCOMES: Lazy<Family<OutcomeLabels, Counter>> = Lazy::new(Family::default);

/// Node deletions by instance status, dry-run skips included
pub static NODES_DELETED: Lazy<Family<DeletionLabels, Counter>> = Lazy::new(Family::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();
    registry.register(
        "cloud_lifecycle_reconcile_outcomes",
        "Reconciliation passes by outcome",
        RECONCILE_OUTCOMES.clone(),
    );
    registry.register(
        "cloud_lifecycle_nodes_deleted",
        "Nodes removed because their instance is gone or shut down",
        NODES_DELETED.clone(),
    );
    registry
});

pub fn record_outcome(outcome: &str) {
    RECONCILE_OUTCOMES
        .get_or_create(&OutcomeLabels {
            outcome: outcome.to_string(),
        })
        .inc();
}

pub fn record_deletion(status: &str, dry_run: bool) {
    NODES_DELETED
        .get_or_create(&DeletionLabels {
            status: status.to_string(),
            dry_run: dry_run.to_string(),
        })
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn test_registry_exposes_counters() {
        record_outcome("Requeued");
        record_deletion("NotFound", true);

        let mut buffer = String::new();
        encode(&mut buffer, &REGISTRY).unwrap();
        assert!(buffer.contains("cloud_lifecycle_reconcile_outcomes_total{outcome=\"Requeued\"}"));
        assert!(buffer.contains("cloud_lifecycle_nodes_deleted_total"));
    }
}
