//! Wire and data model for resolved evaluations.
//!
//! An [`EvaluationPayload`] is the full resolved dataset for one user at one point in time. It is
//! immutable once received; a newer payload always replaces the old one wholesale, there is no
//! partial merge.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Where a [`DataAdapterResult`] came from.
///
/// Also doubles as the provenance tag reported in [`EvaluationDetails::reason`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    Uninitialized,
    Loading,
    NoValues,
    Cache,
    Network,
    NetworkNotModified,
    Bootstrap,
    Prefetch,
}

impl DataSource {
    /// Rank used when deciding which of two results to keep. Higher wins.
    ///
    /// `NetworkNotModified` ranks with `Network` since it vouches for the same payload.
    pub(crate) fn priority(self) -> u8 {
        match self {
            DataSource::Uninitialized | DataSource::Loading => 0,
            DataSource::NoValues => 1,
            DataSource::Cache => 2,
            DataSource::Network | DataSource::NetworkNotModified => 3,
            DataSource::Prefetch => 4,
            DataSource::Bootstrap => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataSource::Uninitialized => "Uninitialized",
            DataSource::Loading => "Loading",
            DataSource::NoValues => "NoValues",
            DataSource::Cache => "Cache",
            DataSource::Network => "Network",
            DataSource::NetworkNotModified => "NetworkNotModified",
            DataSource::Bootstrap => "Bootstrap",
            DataSource::Prefetch => "Prefetch",
        }
    }
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tagged resolution result produced by the data adapter and consumed read-only by the
/// evaluation store.
///
/// `data` is the serialized payload exactly as received; parsing is deferred to the store so the
/// adapter can shuttle results between cache and memory without a decode round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataAdapterResult {
    pub source: DataSource,
    pub data: String,
    /// Epoch milliseconds at which this result was obtained.
    pub received_at: i64,
}

impl DataAdapterResult {
    /// Pick the more authoritative of two results.
    ///
    /// Source priority decides, with recency breaking ties. The one exception: when either side
    /// is `NetworkNotModified`, recency alone decides: a not-modified response proves the prior
    /// payload is still current as of `received_at`, which outranks any source label.
    pub(crate) fn prefer(a: DataAdapterResult, b: DataAdapterResult) -> DataAdapterResult {
        let not_modified = a.source == DataSource::NetworkNotModified
            || b.source == DataSource::NetworkNotModified;

        if not_modified {
            return if a.received_at >= b.received_at { a } else { b };
        }

        match a.source.priority().cmp(&b.source.priority()) {
            std::cmp::Ordering::Greater => a,
            std::cmp::Ordering::Less => b,
            std::cmp::Ordering::Equal => {
                if a.received_at >= b.received_at {
                    a
                } else {
                    b
                }
            }
        }
    }
}

/// An exposure generated as a side effect of evaluating a nested gate or segment during a primary
/// evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondaryExposure {
    pub gate: String,
    #[serde(rename = "gateValue")]
    pub gate_value: String,
    #[serde(rename = "ruleID")]
    pub rule_id: String,
}

/// Resolved evaluation of a boolean gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateEvaluation {
    pub name: String,
    pub rule_id: String,
    pub id_type: String,
    pub value: bool,
    #[serde(default)]
    pub secondary_exposures: Vec<SecondaryExposure>,
}

/// Resolved evaluation of a dynamic config or experiment.
///
/// Experiments are dynamic configs with group/allocation metadata populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEvaluation {
    pub name: String,
    pub rule_id: String,
    pub id_type: String,
    #[serde(default)]
    pub value: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(default)]
    pub is_device_based: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_experiment_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_user_in_experiment: Option<bool>,
    #[serde(default)]
    pub secondary_exposures: Vec<SecondaryExposure>,
}

/// Resolved evaluation of a layer.
///
/// A layer is a bundle of parameters whose ownership may be delegated across experiments.
/// `explicit_parameters` lists the parameters the allocated experiment is authorized to override;
/// accesses to any other parameter are attributed with `undelegated_secondary_exposures` instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerEvaluation {
    pub name: String,
    pub rule_id: String,
    #[serde(default)]
    pub value: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(default)]
    pub is_device_based: bool,
    #[serde(default)]
    pub allocated_experiment_name: String,
    #[serde(default)]
    pub explicit_parameters: Vec<String>,
    #[serde(default)]
    pub secondary_exposures: Vec<SecondaryExposure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undelegated_secondary_exposures: Option<Vec<SecondaryExposure>>,
}

/// The full resolved dataset for one user at one point in time.
///
/// `has_updates` is a refinement: this type only deserializes from responses that actually carry
/// values. "Not modified" responses deserialize as [`EvaluationResponse::NoUpdates`] instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationPayload {
    pub has_updates: serde_bool::True,
    /// Last config update time (lcut), epoch milliseconds. Used for staleness comparisons.
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub feature_gates: HashMap<String, GateEvaluation>,
    #[serde(default)]
    pub dynamic_configs: HashMap<String, ConfigEvaluation>,
    #[serde(default)]
    pub layer_configs: HashMap<String, LayerEvaluation>,
}

/// Response from the evaluations endpoint: either a fresh payload or a "no updates" marker that
/// keeps whatever the client already has.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EvaluationResponse {
    Updates(EvaluationPayload),
    NoUpdates(NoUpdatesPayload),
}

/// Marker body returned when the server has nothing newer than the client's `time`.
#[derive(Debug, Clone, Deserialize)]
pub struct NoUpdatesPayload {
    pub has_updates: serde_bool::False,
}

/// Provenance attached to every lookup result.
///
/// `reason` is always derivable purely from the current source and whether the name was found:
/// a bare source name for `Uninitialized`/`NoValues`, otherwise
/// `"<source>:Recognized"`/`"<source>:Unrecognized"` with `lcut` and `received_at` populated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationDetails {
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lcut: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received_at: Option<i64>,
}

/// A lookup result paired with its provenance.
#[derive(Debug, Clone)]
pub struct DetailedEvaluation<T> {
    pub evaluation: Option<T>,
    pub details: EvaluationDetails,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(source: DataSource, received_at: i64) -> DataAdapterResult {
        DataAdapterResult {
            source,
            data: String::new(),
            received_at,
        }
    }

    #[test]
    fn network_outranks_stale_cache() {
        let network = result(DataSource::Network, 100);
        let cache = result(DataSource::Cache, 200);

        let preferred = DataAdapterResult::prefer(network, cache);

        assert_eq!(preferred.source, DataSource::Network);
    }

    #[test]
    fn bootstrap_outranks_network() {
        let bootstrap = result(DataSource::Bootstrap, 100);
        let network = result(DataSource::Network, 200);

        let preferred = DataAdapterResult::prefer(network, bootstrap);

        assert_eq!(preferred.source, DataSource::Bootstrap);
    }

    #[test]
    fn not_modified_is_decided_by_recency() {
        let bootstrap = result(DataSource::Bootstrap, 100);
        let not_modified = result(DataSource::NetworkNotModified, 200);

        let preferred = DataAdapterResult::prefer(bootstrap, not_modified);

        assert_eq!(preferred.source, DataSource::NetworkNotModified);

        let newer_bootstrap = result(DataSource::Bootstrap, 300);
        let older_not_modified = result(DataSource::NetworkNotModified, 200);

        let preferred = DataAdapterResult::prefer(newer_bootstrap, older_not_modified);

        assert_eq!(preferred.source, DataSource::Bootstrap);
    }

    #[test]
    fn parses_no_updates_response() {
        let response: EvaluationResponse =
            serde_json::from_str(r#"{"has_updates": false}"#).unwrap();

        assert!(matches!(response, EvaluationResponse::NoUpdates(_)));
    }

    #[test]
    fn parses_payload_response() {
        let json = r#"{
            "has_updates": true,
            "time": 1700000000000,
            "feature_gates": {
                "a_gate": {
                    "name": "a_gate",
                    "rule_id": "rule_1",
                    "id_type": "userID",
                    "value": true,
                    "secondary_exposures": [
                        {"gate": "segment", "gateValue": "true", "ruleID": "seg_rule"}
                    ]
                }
            },
            "dynamic_configs": {},
            "layer_configs": {}
        }"#;

        let response: EvaluationResponse = serde_json::from_str(json).unwrap();

        let EvaluationResponse::Updates(payload) = response else {
            panic!("expected payload with updates");
        };
        assert_eq!(payload.time, 1_700_000_000_000);
        let gate = &payload.feature_gates["a_gate"];
        assert!(gate.value);
        assert_eq!(gate.secondary_exposures[0].gate, "segment");
    }

    #[test]
    fn rejects_has_updates_false_as_payload() {
        let parsed: Result<EvaluationPayload, _> =
            serde_json::from_str(r#"{"has_updates": false, "time": 1}"#);

        assert!(parsed.is_err());
    }
}
