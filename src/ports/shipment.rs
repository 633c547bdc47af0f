//! Shipment port: hands a finished report to the central aggregator.
//!
//! Only the privacy-safe external representation crosses this boundary. Raw
//! counts and matched subject sets never appear here.

use serde::{Deserialize, Serialize};

/// One exported entry: the check's identity hash and its released value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalResult {
    /// Stable per-check hash, stratum-suffixed when stratified. Lets the
    /// central aggregator correlate results across sites without learning
    /// the check's content.
    pub check: String,

    /// Obfuscated proportion of the population, rounded to 2 decimals.
    pub value: f64,
}

/// Privacy-safe representation of a generated report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalReport {
    /// Id of the originating report.
    pub report_id: String,

    /// Exported entries, one per (check, stratum) pair.
    pub results: Vec<ExternalResult>,
}

/// Errors raised by the delivery path.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ShipmentError {
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Trait for the outbound delivery of generated reports.
///
/// The transport (registration, heartbeat, auth against the central server)
/// is outside this crate.
pub trait ReportSender: Send + Sync {
    /// Deliver a finished report.
    ///
    /// # Errors
    /// Returns error if delivery fails; the report itself stays `Generated`
    /// and can be re-sent by the embedding layer.
    fn send(&self, report: &ExternalReport) -> Result<(), ShipmentError>;
}
