//! Declarative check: CQL evaluated remotely through the measure protocol.

use crate::application::measure::{self, SUBJECT_TYPE};
use crate::domain::{CheckDefinition, CheckOutcome};
use crate::ports::FhirStore;

use super::QualityCheck;

/// A check whose rule lives in CQL text, compiled and evaluated by the data
/// store.
pub struct DeclarativeCheck {
    definition: CheckDefinition,
}

impl DeclarativeCheck {
    /// Wrap a catalog definition. The definition must carry query text.
    #[must_use]
    pub fn new(definition: CheckDefinition) -> Self {
        Self { definition }
    }
}

impl QualityCheck for DeclarativeCheck {
    fn definition(&self) -> &CheckDefinition {
        &self.definition
    }

    fn execute(&self, store: &dyn FhirStore) -> CheckOutcome {
        let Some(query) = self.definition.query.as_deref() else {
            return CheckOutcome::failed("declarative check has no query text");
        };

        match measure::evaluate_query(store, query) {
            Ok(population) => {
                CheckOutcome::counted(population.count, SUBJECT_TYPE, population.subject_ids)
            }
            Err(e) => {
                tracing::warn!(check = %self.definition.id, error = %e, "Measure evaluation failed");
                CheckOutcome::failed(e.to_string())
            }
        }
    }
}
