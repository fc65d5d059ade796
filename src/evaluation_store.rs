//! A thread-safe holder for the currently active evaluation payload. [`EvaluationStore`] provides
//! concurrent access for readers (gate/config/layer lookups) and writers (the data adapter
//! resolution path).
use std::sync::{Arc, RwLock};

use crate::evaluations::{
    ConfigEvaluation, DataAdapterResult, DataSource, DetailedEvaluation, EvaluationDetails,
    EvaluationPayload, EvaluationResponse, GateEvaluation, LayerEvaluation,
};

#[derive(Debug)]
struct StoreState {
    values: Option<Arc<EvaluationPayload>>,
    source: DataSource,
    lcut: i64,
    received_at: i64,
}

/// `EvaluationStore` holds exactly one current [`EvaluationPayload`] (or none) and answers typed
/// lookups with provenance.
///
/// The payload is always immutable and can only be replaced completely; readers never observe a
/// partially-updated payload.
pub struct EvaluationStore {
    state: RwLock<StoreState>,
}

impl Default for EvaluationStore {
    fn default() -> Self {
        EvaluationStore {
            state: RwLock::new(StoreState {
                values: None,
                source: DataSource::Uninitialized,
                lcut: 0,
                received_at: 0,
            }),
        }
    }
}

impl EvaluationStore {
    /// Create a new empty store. Lookups answer with the `Uninitialized` reason until values
    /// arrive.
    pub fn new() -> Self {
        EvaluationStore::default()
    }

    /// Replace the payload with the parsed contents of a data adapter result.
    ///
    /// A result whose data parses to `has_updates: false` (or does not parse at all) is a no-op:
    /// the store keeps its previous payload. This models "not modified" responses.
    pub fn set_values_from_data_adapter(&self, result: &DataAdapterResult) {
        let values = match serde_json::from_str::<EvaluationResponse>(&result.data) {
            Ok(EvaluationResponse::Updates(payload)) => payload,
            Ok(EvaluationResponse::NoUpdates(_)) => {
                log::debug!(target: "gatehouse", "evaluation data from {} carried no updates, keeping previous values", result.source);
                return;
            }
            Err(err) => {
                log::warn!(target: "gatehouse", "failed to parse evaluation data: {:?}", err);
                return;
            }
        };

        let mut state = self
            .state
            .write()
            .expect("thread holding evaluation store lock should not panic");

        state.lcut = values.time;
        state.received_at = result.received_at;
        state.source = result.source;
        state.values = Some(Arc::new(values));
    }

    /// Clear the payload and mark the store as loading. Used when switching users before new data
    /// has arrived.
    pub fn reset(&self) {
        let mut state = self
            .state
            .write()
            .expect("thread holding evaluation store lock should not panic");

        state.values = None;
        state.source = DataSource::Loading;
        state.lcut = 0;
        state.received_at = 0;
    }

    /// Mark the end of resolution attempts. If the store is still empty, downgrades the source to
    /// `NoValues`, distinguishing "tried and found nothing" from "never tried".
    pub fn finalize(&self) {
        let mut state = self
            .state
            .write()
            .expect("thread holding evaluation store lock should not panic");

        if state.values.is_some() {
            return;
        }

        state.source = DataSource::NoValues;
    }

    /// Source of the currently held payload.
    pub fn source(&self) -> DataSource {
        self.state
            .read()
            .expect("thread holding evaluation store lock should not panic")
            .source
    }

    /// Look up a gate evaluation by name.
    pub fn get_gate(&self, name: &str) -> DetailedEvaluation<GateEvaluation> {
        self.lookup(|values| values.feature_gates.get(name).cloned())
    }

    /// Look up a dynamic config or experiment evaluation by name.
    pub fn get_config(&self, name: &str) -> DetailedEvaluation<ConfigEvaluation> {
        self.lookup(|values| values.dynamic_configs.get(name).cloned())
    }

    /// Look up a layer evaluation by name.
    pub fn get_layer(&self, name: &str) -> DetailedEvaluation<LayerEvaluation> {
        self.lookup(|values| values.layer_configs.get(name).cloned())
    }

    fn lookup<T>(
        &self,
        get: impl FnOnce(&EvaluationPayload) -> Option<T>,
    ) -> DetailedEvaluation<T> {
        let state = self
            .state
            .read()
            .expect("thread holding evaluation store lock should not panic");

        let evaluation = state.values.as_deref().and_then(get);
        let details = details_for(&state, evaluation.is_none());

        DetailedEvaluation {
            evaluation,
            details,
        }
    }
}

fn details_for(state: &StoreState, is_unrecognized: bool) -> EvaluationDetails {
    if matches!(
        state.source,
        DataSource::Uninitialized | DataSource::NoValues
    ) {
        return EvaluationDetails {
            reason: state.source.as_str().to_owned(),
            lcut: None,
            received_at: None,
        };
    }

    let subreason = if is_unrecognized {
        "Unrecognized"
    } else {
        "Recognized"
    };

    EvaluationDetails {
        reason: format!("{}:{}", state.source, subreason),
        lcut: Some(state.lcut),
        received_at: Some(state.received_at),
    }
}
