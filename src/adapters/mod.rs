//! Adapters layer: Concrete implementations of ports.
//!
//! These modules contain the actual integration with external systems:
//! - `laplace`: Laplace mechanism for the privacy transform
//! - `fhir`: blocking HTTP client for the FHIR data store
//! - `sqlite`: SQLite persistence for checks and reports
//! - `sanitize`: PHI filtering for logs

pub mod fhir;
pub mod laplace;
pub mod sanitize;
pub mod sqlite;

// Re-export storage error for lib.rs
pub use sqlite::StorageError;
