//! The polymorphic check set.
//!
//! Every check satisfies `QualityCheck`: it describes itself through a
//! `CheckDefinition` and executes against the store, returning an outcome
//! value even when it fails. Checks that analyze independent sub-populations
//! additionally implement the stratification capability.

use std::collections::BTreeMap;

use crate::domain::{CheckDefinition, CheckOutcome};
use crate::ports::FhirStore;

mod declarative;
mod duplicate_identifier;
mod invalid_code;
mod survival;

pub use declarative::DeclarativeCheck;
pub use duplicate_identifier::DuplicateIdentifierCheck;
pub use invalid_code::InvalidCodeCheck;
pub use survival::SurvivalStratifiedCheck;

/// Capability shared by all checks, declarative and hand-coded.
pub trait QualityCheck: Send + Sync {
    /// The check's definition (identity, thresholds, epsilon budget).
    fn definition(&self) -> &CheckDefinition;

    /// Run the check against the store.
    ///
    /// Never panics and never propagates store failures: any error is
    /// converted into `CheckOutcome::Failed` locally so one broken check
    /// cannot abort the run of the others.
    fn execute(&self, store: &dyn FhirStore) -> CheckOutcome;

    /// Optional capability: run the check split into independent
    /// sub-populations, keyed by stratum label.
    ///
    /// Returns `None` for checks without stratification. Each stratum's
    /// outcome is independent; the caller divides the check's epsilon budget
    /// evenly across the strata actually returned.
    fn execute_with_stratification(
        &self,
        _store: &dyn FhirStore,
    ) -> Option<BTreeMap<String, CheckOutcome>> {
        None
    }
}

/// The fixed set of hand-coded checks every run includes.
///
/// These are constructed in-process with fixed identity, thresholds and
/// epsilon; they are never persisted as catalog records.
#[must_use]
pub fn builtin_checks() -> Vec<Box<dyn QualityCheck>> {
    vec![
        Box::new(DuplicateIdentifierCheck::new()),
        Box::new(InvalidCodeCheck::new()),
        Box::new(SurvivalStratifiedCheck::new()),
    ]
}

/// Wrap persisted catalog definitions into executable checks.
///
/// Definitions without query text cannot execute remotely and are skipped
/// with a warning; the catalog CRUD layer should not produce them.
#[must_use]
pub fn catalog_checks(definitions: Vec<CheckDefinition>) -> Vec<Box<dyn QualityCheck>> {
    definitions
        .into_iter()
        .filter_map(|definition| {
            if definition.query.is_none() {
                tracing::warn!(check = %definition.id, "Catalog check has no query text; skipping");
                return None;
            }
            Some(Box::new(DeclarativeCheck::new(definition)) as Box<dyn QualityCheck>)
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    //! In-memory store used by check tests.

    use serde_json::Value;

    use crate::ports::{FhirError, FhirStore, SubjectListEvaluation};

    /// Store serving canned resources per entity type.
    #[derive(Default)]
    pub struct FixtureStore {
        pub patients: Vec<Value>,
        pub conditions: Vec<Value>,
        pub fail_fetch: bool,
    }

    impl FhirStore for FixtureStore {
        fn fetch_all(&self, entity_type: &str, _: &[&str]) -> Result<Vec<Value>, FhirError> {
            if self.fail_fetch {
                return Err(FhirError::Transport("connection refused".into()));
            }
            match entity_type {
                "Patient" => Ok(self.patients.clone()),
                "Condition" => Ok(self.conditions.clone()),
                other => Err(FhirError::Protocol(format!("unexpected type {other}"))),
            }
        }

        fn count(&self, entity_type: &str) -> Result<u64, FhirError> {
            self.fetch_all(entity_type, &[]).map(|r| r.len() as u64)
        }

        fn submit_library(&self, _: &Value) -> Result<(), FhirError> {
            Err(FhirError::Protocol("fixture store has no measures".into()))
        }

        fn submit_measure(&self, _: &Value) -> Result<String, FhirError> {
            Err(FhirError::Protocol("fixture store has no measures".into()))
        }

        fn evaluate_measure_subject_list(
            &self,
            _: &str,
        ) -> Result<SubjectListEvaluation, FhirError> {
            Err(FhirError::Protocol("fixture store has no measures".into()))
        }

        fn resolve_list(&self, _: &str) -> Result<Vec<String>, FhirError> {
            Err(FhirError::Protocol("fixture store has no lists".into()))
        }

        fn health_check(&self) -> Result<(), FhirError> {
            Ok(())
        }
    }
}
