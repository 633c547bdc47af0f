//! Invalid-code check: condition codings that should validate but don't.
//!
//! Only codings under a recognized system are judged. A condition with no
//! codings at all, or with only unrecognized-system codings, is not
//! reported; the check targets codes that claim a known system and fail its
//! format.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::domain::{CheckDefinition, CheckOutcome};
use crate::ports::FhirStore;

use super::QualityCheck;

const ICD10_SYSTEM: &str = "http://hl7.org/fhir/sid/icd-10";
const ICD10_GM_SYSTEM: &str = "http://fhir.de/CodeSystem/bfarm/icd-10-gm";
const SNOMED_SYSTEM: &str = "http://snomed.info/sct";
const LOINC_SYSTEM: &str = "http://loinc.org";

fn icd10_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z][0-9]{2}(\.[0-9]{1,2})?$").expect("Valid regex"))
}

fn snomed_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9]{6,18}$").expect("Valid regex"))
}

fn loinc_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9]{1,7}-[0-9]$").expect("Valid regex"))
}

/// Whether this system's code format is known to the validator.
fn recognized(system: &str) -> bool {
    matches!(
        system,
        ICD10_SYSTEM | ICD10_GM_SYSTEM | SNOMED_SYSTEM | LOINC_SYSTEM
    )
}

/// Format validation for a recognized system.
fn valid_code(system: &str, code: &str) -> bool {
    match system {
        ICD10_SYSTEM | ICD10_GM_SYSTEM => icd10_pattern().is_match(code),
        SNOMED_SYSTEM => snomed_pattern().is_match(code),
        LOINC_SYSTEM => loinc_pattern().is_match(code),
        _ => false,
    }
}

/// Hand-coded check reporting subjects of conditions whose recognized-system
/// codings all fail format validation.
pub struct InvalidCodeCheck {
    definition: CheckDefinition,
}

impl InvalidCodeCheck {
    #[must_use]
    pub fn new() -> Self {
        Self {
            definition: CheckDefinition::builtin(
                "invalid-condition-code",
                "Invalid condition codes",
                "Subjects with conditions whose recognized codings fail format validation",
                5.0,
                10.0,
                1.0,
            ),
        }
    }
}

impl Default for InvalidCodeCheck {
    fn default() -> Self {
        Self::new()
    }
}

impl QualityCheck for InvalidCodeCheck {
    fn definition(&self) -> &CheckDefinition {
        &self.definition
    }

    fn execute(&self, store: &dyn FhirStore) -> CheckOutcome {
        let conditions = match store.fetch_all("Condition", &["code", "subject"]) {
            Ok(conditions) => conditions,
            Err(e) => return CheckOutcome::failed(e.to_string()),
        };

        let mut reported: BTreeSet<String> = BTreeSet::new();

        for condition in &conditions {
            let codings = condition["code"]["coding"].as_array();
            let Some(codings) = codings else { continue };

            let mut saw_recognized = false;
            let mut any_valid = false;

            for coding in codings {
                let (Some(system), Some(code)) =
                    (coding["system"].as_str(), coding["code"].as_str())
                else {
                    continue;
                };
                if !recognized(system) {
                    continue;
                }
                saw_recognized = true;
                if valid_code(system, code) {
                    any_valid = true;
                    break;
                }
            }

            // Only conditions with at least one coding that should validate
            // but doesn't are reported.
            if saw_recognized && !any_valid {
                if let Some(subject) = subject_id(condition) {
                    reported.insert(subject);
                }
            }
        }

        CheckOutcome::subjects("Patient", reported)
    }
}

/// Extract the subject id from a condition's `subject.reference`.
fn subject_id(condition: &serde_json::Value) -> Option<String> {
    let reference = condition["subject"]["reference"].as_str()?;
    reference
        .strip_prefix("Patient/")
        .map(str::to_string)
        .filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::checks::test_support::FixtureStore;
    use serde_json::json;

    fn condition(subject: &str, codings: serde_json::Value) -> serde_json::Value {
        json!({
            "resourceType": "Condition",
            "subject": {"reference": format!("Patient/{subject}")},
            "code": {"coding": codings}
        })
    }

    #[test]
    fn test_code_format_validators() {
        assert!(valid_code(ICD10_GM_SYSTEM, "E11"));
        assert!(valid_code(ICD10_GM_SYSTEM, "E11.9"));
        assert!(valid_code(ICD10_GM_SYSTEM, "C50.91"));
        assert!(!valid_code(ICD10_GM_SYSTEM, "e11.9"));
        assert!(!valid_code(ICD10_GM_SYSTEM, "11.9"));
        assert!(!valid_code(ICD10_GM_SYSTEM, "E11.999"));

        assert!(valid_code(SNOMED_SYSTEM, "44054006"));
        assert!(!valid_code(SNOMED_SYSTEM, "4405"));
        assert!(!valid_code(SNOMED_SYSTEM, "44054006abc"));

        assert!(valid_code(LOINC_SYSTEM, "4548-4"));
        assert!(!valid_code(LOINC_SYSTEM, "4548"));
    }

    #[test]
    fn test_reports_only_failing_recognized_codings() {
        let store = FixtureStore {
            conditions: vec![
                // valid ICD-10-GM: not reported
                condition("p1", json!([{"system": ICD10_GM_SYSTEM, "code": "E11.9"}])),
                // invalid ICD-10-GM: reported
                condition("p2", json!([{"system": ICD10_GM_SYSTEM, "code": "bogus"}])),
                // unrecognized system only: not reported
                condition("p3", json!([{"system": "http://local.example/cs", "code": "x"}])),
                // no codings at all: not reported
                json!({
                    "resourceType": "Condition",
                    "subject": {"reference": "Patient/p4"},
                    "code": {}
                }),
                // invalid ICD-10 rescued by a valid SNOMED coding: not reported
                condition(
                    "p5",
                    json!([
                        {"system": ICD10_SYSTEM, "code": "nope"},
                        {"system": SNOMED_SYSTEM, "code": "44054006"}
                    ]),
                ),
            ],
            ..Default::default()
        };

        let outcome = InvalidCodeCheck::new().execute(&store);
        let CheckOutcome::Count {
            count, subject_ids, ..
        } = outcome
        else {
            panic!("expected count outcome");
        };

        assert_eq!(count, 1);
        assert!(subject_ids.contains("p2"));
    }

    #[test]
    fn test_fetch_failure_becomes_failed_outcome() {
        let store = FixtureStore {
            fail_fetch: true,
            ..Default::default()
        };

        let outcome = InvalidCodeCheck::new().execute(&store);
        assert!(outcome.is_failed());
    }
}
