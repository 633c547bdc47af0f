//! Stratified survival check: living subjects per gender.
//!
//! Counts subjects without a deceased marker, split into one stratum per
//! administrative gender. Each stratum carries its own share of the check's
//! privacy budget, so the strata can be released independently.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::domain::{CheckDefinition, CheckOutcome};
use crate::ports::FhirStore;

use super::QualityCheck;

/// The fixed set of strata this check partitions by.
const GENDER_STRATA: [&str; 2] = ["female", "male"];

/// Hand-coded stratified check over patient survival.
pub struct SurvivalStratifiedCheck {
    definition: CheckDefinition,
}

impl SurvivalStratifiedCheck {
    #[must_use]
    pub fn new() -> Self {
        Self {
            definition: CheckDefinition::builtin(
                "survival-by-gender",
                "Living patients by gender",
                "Subjects without a deceased marker, stratified by gender",
                50.0,
                80.0,
                1.0,
            ),
        }
    }

    fn fetch_patients(&self, store: &dyn FhirStore) -> Result<Vec<Value>, CheckOutcome> {
        store
            .fetch_all("Patient", &["gender", "deceasedBoolean", "deceasedDateTime"])
            .map_err(|e| CheckOutcome::failed(e.to_string()))
    }
}

impl Default for SurvivalStratifiedCheck {
    fn default() -> Self {
        Self::new()
    }
}

/// A subject is alive unless a deceased marker says otherwise.
fn is_alive(patient: &Value) -> bool {
    if patient["deceasedBoolean"].as_bool() == Some(true) {
        return false;
    }
    patient["deceasedDateTime"].as_str().is_none()
}

fn alive_subjects(patients: &[Value], gender: Option<&str>) -> BTreeSet<String> {
    patients
        .iter()
        .filter(|p| gender.map_or(true, |g| p["gender"].as_str() == Some(g)))
        .filter(|p| is_alive(p))
        .filter_map(|p| p["id"].as_str().map(str::to_string))
        .collect()
}

impl QualityCheck for SurvivalStratifiedCheck {
    fn definition(&self) -> &CheckDefinition {
        &self.definition
    }

    fn execute(&self, store: &dyn FhirStore) -> CheckOutcome {
        match self.fetch_patients(store) {
            Ok(patients) => CheckOutcome::subjects("Patient", alive_subjects(&patients, None)),
            Err(failed) => failed,
        }
    }

    fn execute_with_stratification(
        &self,
        store: &dyn FhirStore,
    ) -> Option<BTreeMap<String, CheckOutcome>> {
        let strata = match self.fetch_patients(store) {
            Ok(patients) => GENDER_STRATA
                .iter()
                .map(|&gender| {
                    (
                        gender.to_string(),
                        CheckOutcome::subjects("Patient", alive_subjects(&patients, Some(gender))),
                    )
                })
                .collect(),
            Err(failed) => {
                // One failed fetch fails every stratum, each with its own
                // error row, so no stratum silently vanishes.
                GENDER_STRATA
                    .iter()
                    .map(|&gender| (gender.to_string(), failed.clone()))
                    .collect()
            }
        };

        Some(strata)
    }
}
