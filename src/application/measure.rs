//! Measure evaluation: drives the remote four-step protocol for declarative
//! checks.
//!
//! The CQL itself is compiled and evaluated by the data store; this module
//! only wraps it into the Library/Measure envelopes the store understands,
//! submits both, evaluates in subject-list mode, and resolves the matched
//! subjects.

use std::collections::BTreeSet;

use base64::Engine;
use serde_json::{json, Value};

use crate::domain::uuid_v4;
use crate::ports::{FhirError, FhirStore};

/// The subject type counted by every declarative check.
pub const SUBJECT_TYPE: &str = "Patient";

/// Top-level boolean expression every check's CQL must define.
const POPULATION_EXPRESSION: &str = "InInitialPopulation";

/// Population of a successfully evaluated declarative check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurePopulation {
    /// Size of the matched population as reported by the store.
    pub count: u64,

    /// Matched subject ids. May be empty even when `count > 0` if the store
    /// omitted or garbled the subject list.
    pub subject_ids: BTreeSet<String>,
}

/// Evaluate a declarative check's CQL against the store.
///
/// Steps: wrap the query into a Library with a fresh canonical url, build a
/// Measure referencing it, submit both, evaluate in subject-list mode, and
/// resolve the matched subjects.
///
/// A count of 0 never dereferences the subject list; a present count with a
/// missing or unresolvable list still succeeds with an empty id set.
///
/// # Errors
/// Returns an error if any submission or the evaluation itself fails. The
/// caller converts this into a failed outcome for the single check.
pub fn evaluate_query(store: &dyn FhirStore, query: &str) -> Result<MeasurePopulation, FhirError> {
    let library_url = format!("urn:uuid:{}", uuid_v4());

    store.submit_library(&library_envelope(&library_url, query))?;
    let measure_id = store.submit_measure(&measure_envelope(&library_url))?;

    let evaluation = store.evaluate_measure_subject_list(&measure_id)?;

    let subject_ids = match (&evaluation.subject_list, evaluation.count) {
        // Empty population: the list is never dereferenced. Stores omit it
        // for empty results, and fetching it would be a wasted round trip.
        (_, 0) | (None, _) => BTreeSet::new(),
        (Some(reference), _) => match store.resolve_list(reference) {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                // A broken list does not fail the check; the count stands.
                tracing::warn!(
                    reference,
                    error = %e,
                    "Subject list could not be resolved; continuing with empty set"
                );
                BTreeSet::new()
            }
        },
    };

    Ok(MeasurePopulation {
        count: evaluation.count,
        subject_ids,
    })
}

/// Library envelope wrapping the transport-encoded CQL.
fn library_envelope(url: &str, query: &str) -> Value {
    let encoded = base64::engine::general_purpose::STANDARD.encode(query.as_bytes());

    json!({
        "resourceType": "Library",
        "url": url,
        "status": "active",
        "type": {
            "coding": [{
                "system": "http://terminology.hl7.org/CodeSystem/library-type",
                "code": "logic-library"
            }]
        },
        "content": [{
            "contentType": "text/cql",
            "data": encoded
        }]
    })
}

/// Measure envelope referencing the library by canonical url, with a single
/// initial-population criterion over the fixed subject type.
fn measure_envelope(library_url: &str) -> Value {
    json!({
        "resourceType": "Measure",
        "status": "active",
        "library": [library_url],
        "subjectCodeableConcept": {
            "coding": [{
                "system": "http://hl7.org/fhir/resource-types",
                "code": SUBJECT_TYPE
            }]
        },
        "scoring": {
            "coding": [{
                "system": "http://terminology.hl7.org/CodeSystem/measure-scoring",
                "code": "cohort"
            }]
        },
        "group": [{
            "population": [{
                "code": {
                    "coding": [{
                        "system": "http://terminology.hl7.org/CodeSystem/measure-population",
                        "code": "initial-population"
                    }]
                },
                "criteria": {
                    "language": "text/cql-identifier",
                    "expression": POPULATION_EXPRESSION
                }
            }]
        }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::SubjectListEvaluation;
    use std::sync::Mutex;

    /// Scripted store recording protocol calls.
    #[derive(Default)]
    struct ScriptedStore {
        evaluation: Option<SubjectListEvaluation>,
        list_ids: Vec<String>,
        fail_library: bool,
        fail_resolve: bool,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedStore {
        fn record(&self, call: &str) {
            self.calls.lock().expect("lock").push(call.to_string());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("lock").clone()
        }
    }

    impl FhirStore for ScriptedStore {
        fn fetch_all(&self, _: &str, _: &[&str]) -> Result<Vec<Value>, FhirError> {
            unimplemented!("not used by measure evaluation")
        }

        fn count(&self, _: &str) -> Result<u64, FhirError> {
            unimplemented!("not used by measure evaluation")
        }

        fn submit_library(&self, library: &Value) -> Result<(), FhirError> {
            self.record("library");
            assert_eq!(library["resourceType"], "Library");
            assert!(library["url"].as_str().expect("url").starts_with("urn:uuid:"));
            if self.fail_library {
                return Err(FhirError::Status {
                    status: 400,
                    message: "bad library".into(),
                });
            }
            Ok(())
        }

        fn submit_measure(&self, measure: &Value) -> Result<String, FhirError> {
            self.record("measure");
            assert_eq!(measure["resourceType"], "Measure");
            assert_eq!(
                measure["group"][0]["population"][0]["criteria"]["expression"],
                "InInitialPopulation"
            );
            Ok("m-1".to_string())
        }

        fn evaluate_measure_subject_list(
            &self,
            measure_id: &str,
        ) -> Result<SubjectListEvaluation, FhirError> {
            self.record("evaluate");
            assert_eq!(measure_id, "m-1");
            Ok(self.evaluation.clone().expect("scripted evaluation"))
        }

        fn resolve_list(&self, _: &str) -> Result<Vec<String>, FhirError> {
            self.record("resolve");
            if self.fail_resolve {
                return Err(FhirError::Protocol("garbled list".into()));
            }
            Ok(self.list_ids.clone())
        }

        fn health_check(&self) -> Result<(), FhirError> {
            Ok(())
        }
    }

    #[test]
    fn test_zero_count_never_resolves_list() {
        let store = ScriptedStore {
            evaluation: Some(SubjectListEvaluation {
                count: 0,
                subject_list: Some("List/l1".into()),
            }),
            ..Default::default()
        };

        let population = evaluate_query(&store, "define InInitialPopulation: true")
            .expect("evaluation succeeds");
        assert_eq!(population.count, 0);
        assert!(population.subject_ids.is_empty());
        assert_eq!(store.calls(), vec!["library", "measure", "evaluate"]);
    }

    #[test]
    fn test_missing_list_reference_keeps_count() {
        let store = ScriptedStore {
            evaluation: Some(SubjectListEvaluation {
                count: 3,
                subject_list: None,
            }),
            ..Default::default()
        };

        let population = evaluate_query(&store, "define InInitialPopulation: true")
            .expect("evaluation succeeds");
        assert_eq!(population.count, 3);
        assert!(population.subject_ids.is_empty());
    }

    #[test]
    fn test_unresolvable_list_keeps_count() {
        let store = ScriptedStore {
            evaluation: Some(SubjectListEvaluation {
                count: 2,
                subject_list: Some("List/broken".into()),
            }),
            fail_resolve: true,
            ..Default::default()
        };

        let population = evaluate_query(&store, "define InInitialPopulation: true")
            .expect("evaluation succeeds");
        assert_eq!(population.count, 2);
        assert!(population.subject_ids.is_empty());
    }

    #[test]
    fn test_resolved_subjects() {
        let store = ScriptedStore {
            evaluation: Some(SubjectListEvaluation {
                count: 2,
                subject_list: Some("List/l1".into()),
            }),
            list_ids: vec!["p1".into(), "p2".into()],
            ..Default::default()
        };

        let population = evaluate_query(&store, "define InInitialPopulation: true")
            .expect("evaluation succeeds");
        assert_eq!(population.count, 2);
        assert_eq!(population.subject_ids.len(), 2);
        assert_eq!(
            store.calls(),
            vec!["library", "measure", "evaluate", "resolve"]
        );
    }

    #[test]
    fn test_library_failure_propagates() {
        let store = ScriptedStore {
            fail_library: true,
            ..Default::default()
        };

        let result = evaluate_query(&store, "define InInitialPopulation: true");
        assert!(result.is_err());
        assert_eq!(store.calls(), vec!["library"]);
    }

    #[test]
    fn test_library_envelope_encodes_query() {
        let envelope = library_envelope("urn:uuid:x", "define InInitialPopulation: true");
        let data = envelope["content"][0]["data"].as_str().expect("data");
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(data)
            .expect("valid base64");
        assert_eq!(decoded, b"define InInitialPopulation: true");
    }
}
