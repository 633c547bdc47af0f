//! # fhirprobe
//!
//! Privacy-preserving data-quality auditing for a clinical FHIR store.
//!
//! This crate provides:
//! - A polymorphic set of data-quality checks (declarative CQL checks
//!   evaluated remotely, plus hand-coded checks), including stratified
//!   checks with a split privacy budget
//! - The Measure/Library protocol for compiling and evaluating declarative
//!   checks against the data store
//! - A Laplace mechanism that obfuscates raw counts before they leave the
//!   privacy boundary, with low-count suppression
//! - An orchestration pipeline that runs every check under partial-failure
//!   tolerance and aggregates results into one report
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture:
//! - `domain`: Core business types (checks, outcomes, reports)
//! - `ports`: Trait definitions for external operations
//! - `adapters`: Concrete implementations (Laplace, HTTP FHIR, SQLite)
//! - `application`: Use cases orchestrating domain and ports
//!
//! It is a library: HTTP routing, check CRUD, auth and scheduling belong to
//! the embedding process.

pub mod adapters;
pub mod application;
pub mod domain;
pub mod ports;
pub mod telemetry;

pub use application::ReportPipeline;
pub use domain::{CheckDefinition, Report, ReportStatus};

/// Result type for fhirprobe operations
pub type Result<T> = std::result::Result<T, ProbeError>;

/// Main error type for fhirprobe
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Privacy transform failed: {0}")]
    Privacy(#[from] ports::ObfuscationError),

    #[error("Data store operation failed: {0}")]
    Store(#[from] ports::FhirError),

    #[error("Persistence operation failed: {0}")]
    Persistence(#[from] adapters::StorageError),

    #[error("Report delivery failed: {0}")]
    Shipment(#[from] ports::ShipmentError),

    #[error("Invalid configuration: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
