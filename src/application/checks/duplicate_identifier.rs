//! Duplicate-identifier check: subjects sharing an external identifier.
//!
//! Two patient records carrying the same value under the site's identifier
//! system are almost always the same person registered twice; both records
//! are reported.

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{CheckDefinition, CheckOutcome};
use crate::ports::FhirStore;

use super::QualityCheck;

/// Identifier system whose values are expected to be unique per subject.
const IDENTIFIER_SYSTEM: &str = "http://hospital.example.org/sid/patient-id";

/// Hand-coded check that groups subjects by external identifier value and
/// reports every member of a group of size > 1.
pub struct DuplicateIdentifierCheck {
    definition: CheckDefinition,
    identifier_system: String,
}

impl DuplicateIdentifierCheck {
    #[must_use]
    pub fn new() -> Self {
        Self::with_system(IDENTIFIER_SYSTEM)
    }

    /// Use a different identifier system (for sites with their own).
    #[must_use]
    pub fn with_system(identifier_system: impl Into<String>) -> Self {
        Self {
            definition: CheckDefinition::builtin(
                "duplicate-patient-identifier",
                "Duplicate patient identifiers",
                "Patients sharing the same external identifier value",
                1.0,
                5.0,
                1.0,
            ),
            identifier_system: identifier_system.into(),
        }
    }
}

impl Default for DuplicateIdentifierCheck {
    fn default() -> Self {
        Self::new()
    }
}

impl QualityCheck for DuplicateIdentifierCheck {
    fn definition(&self) -> &CheckDefinition {
        &self.definition
    }

    fn execute(&self, store: &dyn FhirStore) -> CheckOutcome {
        let patients = match store.fetch_all("Patient", &["identifier"]) {
            Ok(patients) => patients,
            Err(e) => return CheckOutcome::failed(e.to_string()),
        };

        // identifier value -> subject ids carrying it
        let mut groups: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for patient in &patients {
            let Some(subject_id) = patient["id"].as_str() else {
                continue;
            };
            let Some(identifiers) = patient["identifier"].as_array() else {
                continue;
            };
            for identifier in identifiers {
                if identifier["system"].as_str() != Some(self.identifier_system.as_str()) {
                    continue;
                }
                if let Some(value) = identifier["value"].as_str() {
                    groups
                        .entry(value.to_string())
                        .or_default()
                        .insert(subject_id.to_string());
                }
            }
        }

        let duplicates: BTreeSet<String> = groups
            .into_values()
            .filter(|members| members.len() > 1)
            .flatten()
            .collect();

        CheckOutcome::subjects("Patient", duplicates)
    }
}
