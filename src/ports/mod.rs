//! Ports layer: Trait definitions for external operations.
//!
//! Following Hexagonal Architecture, these traits define the boundaries
//! between the application and external systems (data store, persistence,
//! privacy mechanism, central aggregator).

mod catalog;
mod fhir;
mod privacy;
mod reports;
mod shipment;

pub use catalog::CheckCatalog;
pub use fhir::{FhirError, FhirStore, SubjectListEvaluation};
pub use privacy::{CountObfuscation, ObfuscationError};
pub use reports::ReportStore;
pub use shipment::{ExternalReport, ExternalResult, ReportSender, ShipmentError};
