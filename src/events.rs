//! Usage telemetry: event model and exposure constructors.
//!
//! Exposure events record that a user's evaluation of a gate/config/layer was observed; they are
//! what experiment analysis is built on. Custom events carry user-defined names and payloads.
//! Both flow through the [`event_logger::EventLogger`] pipeline.

pub mod dedup;
pub mod event_logger;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::evaluations::{
    ConfigEvaluation, DetailedEvaluation, GateEvaluation, LayerEvaluation, SecondaryExposure,
};
use crate::user::User;

pub(crate) const GATE_EXPOSURE_NAME: &str = "gatehouse::gate_exposure";
pub(crate) const CONFIG_EXPOSURE_NAME: &str = "gatehouse::config_exposure";
pub(crate) const LAYER_EXPOSURE_NAME: &str = "gatehouse::layer_exposure";
pub(crate) const NON_EXPOSED_CHECKS_NAME: &str = "gatehouse::non_exposed_checks";

/// Epoch milliseconds now. All event timestamps and recency bookkeeping use this clock.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A single telemetry event.
///
/// Created at the call site, normalized (private user attributes stripped) when appended to the
/// queue, and delivered in enqueue order within a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_name: String,
    #[serde(default)]
    pub user: Option<User>,
    pub time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_exposures: Option<Vec<SecondaryExposure>>,
}

impl Event {
    /// Create a custom event.
    pub fn new(user: Option<User>, event_name: impl Into<String>) -> Event {
        Event {
            event_name: event_name.into(),
            user,
            time: now_ms(),
            metadata: None,
            value: None,
            secondary_exposures: None,
        }
    }

    /// Attach a user-defined value (e.g. a price or a label).
    pub fn with_value(mut self, value: impl Into<serde_json::Value>) -> Event {
        self.value = Some(value.into());
        self
    }

    /// Attach string-keyed metadata.
    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Event {
        self.metadata = Some(metadata);
        self
    }

    /// Exposure of a gate evaluation.
    pub fn gate_exposure(
        user: Option<User>,
        gate_name: &str,
        detailed: &DetailedEvaluation<GateEvaluation>,
    ) -> Event {
        let mut metadata = exposure_metadata(&detailed.details);
        metadata.insert("gate".to_owned(), gate_name.into());

        let (value, rule_id, exposures) = match &detailed.evaluation {
            Some(gate) => (
                gate.value,
                gate.rule_id.as_str(),
                Some(gate.secondary_exposures.clone()),
            ),
            None => (false, "", None),
        };
        metadata.insert("gateValue".to_owned(), value.to_string().into());
        metadata.insert("ruleID".to_owned(), rule_id.into());

        Event {
            event_name: GATE_EXPOSURE_NAME.to_owned(),
            user,
            time: now_ms(),
            metadata: Some(metadata),
            value: None,
            secondary_exposures: exposures,
        }
    }

    /// Exposure of a dynamic config or experiment evaluation.
    pub fn config_exposure(
        user: Option<User>,
        config_name: &str,
        detailed: &DetailedEvaluation<ConfigEvaluation>,
    ) -> Event {
        let mut metadata = exposure_metadata(&detailed.details);
        metadata.insert("config".to_owned(), config_name.into());

        let (rule_id, exposures) = match &detailed.evaluation {
            Some(config) => (
                config.rule_id.as_str(),
                Some(config.secondary_exposures.clone()),
            ),
            None => ("", None),
        };
        metadata.insert("ruleID".to_owned(), rule_id.into());

        Event {
            event_name: CONFIG_EXPOSURE_NAME.to_owned(),
            user,
            time: now_ms(),
            metadata: Some(metadata),
            value: None,
            secondary_exposures: exposures,
        }
    }

    /// Exposure of a layer parameter access.
    ///
    /// If `parameter_name` is one of the layer's `explicit_parameters`, the exposure is
    /// attributed to the allocated experiment and carries the layer's secondary exposures.
    /// Otherwise the experiment attribution is empty and the undelegated exposure list is used.
    pub fn layer_exposure(
        user: Option<User>,
        layer_name: &str,
        parameter_name: &str,
        detailed: &DetailedEvaluation<LayerEvaluation>,
    ) -> Event {
        let mut metadata = exposure_metadata(&detailed.details);
        metadata.insert("config".to_owned(), layer_name.into());
        metadata.insert("parameterName".to_owned(), parameter_name.into());

        let (rule_id, allocated_experiment, is_explicit, exposures) = match &detailed.evaluation {
            Some(layer) => {
                let is_explicit = layer
                    .explicit_parameters
                    .iter()
                    .any(|param| param == parameter_name);

                if is_explicit {
                    (
                        layer.rule_id.as_str(),
                        layer.allocated_experiment_name.as_str(),
                        true,
                        Some(layer.secondary_exposures.clone()),
                    )
                } else {
                    (
                        layer.rule_id.as_str(),
                        "",
                        false,
                        Some(
                            layer
                                .undelegated_secondary_exposures
                                .clone()
                                .unwrap_or_default(),
                        ),
                    )
                }
            }
            None => ("", "", false, None),
        };

        metadata.insert("ruleID".to_owned(), rule_id.into());
        metadata.insert("allocatedExperiment".to_owned(), allocated_experiment.into());
        metadata.insert(
            "isExplicitParameter".to_owned(),
            is_explicit.to_string().into(),
        );

        Event {
            event_name: LAYER_EXPOSURE_NAME.to_owned(),
            user,
            time: now_ms(),
            metadata: Some(metadata),
            value: None,
            secondary_exposures: exposures,
        }
    }

    /// Synthetic aggregate of evaluation lookups that never produced an exposure.
    pub(crate) fn non_exposed_checks(checks: HashMap<String, u64>) -> Event {
        let checks = serde_json::to_value(checks).unwrap_or_default();
        Event {
            event_name: NON_EXPOSED_CHECKS_NAME.to_owned(),
            user: None,
            time: now_ms(),
            metadata: Some([("checks".to_owned(), checks)].into_iter().collect()),
            value: None,
            secondary_exposures: None,
        }
    }

    /// Whether this event records an exposure (and is therefore subject to deduplication).
    pub fn is_exposure(&self) -> bool {
        matches!(
            self.event_name.as_str(),
            GATE_EXPOSURE_NAME | CONFIG_EXPOSURE_NAME | LAYER_EXPOSURE_NAME
        )
    }

    /// String value out of metadata, used to build dedup keys.
    pub(crate) fn metadata_str(&self, key: &str) -> &str {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.get(key))
            .and_then(|value| value.as_str())
            .unwrap_or("")
    }

    /// Normalized copy for the outgoing queue: private user attributes never leave the process.
    pub(crate) fn normalized(mut self) -> Event {
        if let Some(user) = &self.user {
            self.user = Some(user.without_private_attributes());
        }
        self
    }
}

fn exposure_metadata(
    details: &crate::evaluations::EvaluationDetails,
) -> HashMap<String, serde_json::Value> {
    let mut metadata = HashMap::new();
    metadata.insert("reason".to_owned(), details.reason.as_str().into());
    if let Some(lcut) = details.lcut {
        metadata.insert("lcut".to_owned(), lcut.into());
    }
    if let Some(received_at) = details.received_at {
        metadata.insert("receivedAt".to_owned(), received_at.into());
    }
    metadata
}
