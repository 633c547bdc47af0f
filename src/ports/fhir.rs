//! FHIR store port: Trait for the remote clinical data store.
//!
//! The transport itself (auth, retries, TLS) is outside this crate; the
//! trait covers exactly the operations the checks and the measure
//! evaluation protocol need. It is object safe so checks can run against
//! `&dyn FhirStore`.

use serde_json::Value;

/// Errors surfaced by the data store boundary.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FhirError {
    /// The store could not be reached or the connection failed mid-flight.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The store answered with an unexpected status code.
    #[error("Unexpected response ({status}): {message}")]
    Status { status: u16, message: String },

    /// The store's answer could not be interpreted.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Result of evaluating a measure in subject-list mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectListEvaluation {
    /// Size of the matched population.
    pub count: u64,

    /// Reference to the list resource holding the matched subjects.
    ///
    /// Stores omit the list for empty populations, and some omit it even for
    /// non-empty ones; callers must tolerate `None` either way.
    pub subject_list: Option<String>,
}

/// Trait for the remote FHIR data store.
pub trait FhirStore: Send + Sync {
    /// Fetch every resource of `entity_type`, restricted to the given field
    /// projection, following pagination to exhaustion.
    ///
    /// # Errors
    /// Returns an error if any page cannot be fetched or parsed.
    fn fetch_all(&self, entity_type: &str, elements: &[&str]) -> Result<Vec<Value>, FhirError>;

    /// Total number of resources of `entity_type` in the store.
    ///
    /// # Errors
    /// Returns an error if the count request fails.
    fn count(&self, entity_type: &str) -> Result<u64, FhirError>;

    /// Upload a Library envelope (compiled declarative check).
    ///
    /// # Errors
    /// Returns an error if the store rejects the resource.
    fn submit_library(&self, library: &Value) -> Result<(), FhirError>;

    /// Upload a Measure envelope, returning the server-assigned measure id.
    ///
    /// # Errors
    /// Returns an error if the store rejects the resource or assigns no id.
    fn submit_measure(&self, measure: &Value) -> Result<String, FhirError>;

    /// Invoke the store's evaluate-measure operation in subject-list mode
    /// over a date-agnostic wide interval.
    ///
    /// # Errors
    /// Returns an error if the evaluation fails or the report is malformed.
    fn evaluate_measure_subject_list(
        &self,
        measure_id: &str,
    ) -> Result<SubjectListEvaluation, FhirError>;

    /// Dereference a subject list, returning the referenced subject ids.
    ///
    /// Entries with absent or malformed references are skipped, not failed.
    ///
    /// # Errors
    /// Returns an error only if the list itself cannot be fetched.
    fn resolve_list(&self, reference: &str) -> Result<Vec<String>, FhirError>;

    /// Probe store availability.
    ///
    /// # Errors
    /// Returns an error describing why the store is unreachable.
    fn health_check(&self) -> Result<(), FhirError>;
}
