//! Prometheus metrics for admission decisions

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

use crate::error::WebhookError;

/// Outcome of one admission review
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied,
}

impl Decision {
    /// Label value for the `result` dimension
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allowed => "allowed",
            Decision::Denied => "denied",
        }
    }
}

/// Admission metrics and the registry they are exported from
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    decisions: IntCounterVec,
}

impl Metrics {
    /// Create a registry with the decision counter registered
    pub fn new() -> Result<Self, WebhookError> {
        let registry = Registry::new();
        let decisions = IntCounterVec::new(
            Opts::new(
                "machineos_admission_decisions_total",
                "Admission reviews answered, by kind, operation and result",
            ),
            &["kind", "operation", "result"],
        )?;
        registry.register(Box::new(decisions.clone()))?;
        Ok(Self { registry, decisions })
    }

    /// Count one answered review
    pub fn record(&self, kind: &str, operation: &str, decision: Decision) {
        self.decisions
            .with_label_values(&[kind, operation, decision.as_str()])
            .inc();
    }

    #[cfg(test)]
    pub fn decision_count(&self, kind: &str, operation: &str, decision: Decision) -> u64 {
        self.decisions
            .with_label_values(&[kind, operation, decision.as_str()])
            .get()
    }

    /// Render every registered metric in the Prometheus text format
    pub fn render(&self) -> Result<String, WebhookError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| WebhookError::Metrics(prometheus::Error::Msg(e.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_render() {
        let metrics = Metrics::new().unwrap();
        metrics.record("MachineOSBuild", "CREATE", Decision::Denied);
        metrics.record("MachineOSBuild", "CREATE", Decision::Denied);
        metrics.record("MachineOSImage", "UPDATE", Decision::Allowed);

        assert_eq!(metrics.decision_count("MachineOSBuild", "CREATE", Decision::Denied), 2);
        assert_eq!(metrics.decision_count("MachineOSBuild", "CREATE", Decision::Allowed), 0);

        let text = metrics.render().unwrap();
        assert!(text.contains("machineos_admission_decisions_total"));
        assert!(text.contains(r#"result="denied""#));
    }
}
