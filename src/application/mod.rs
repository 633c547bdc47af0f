//! Application layer: Use cases and services.
//!
//! This module orchestrates domain logic with ports to implement the audit
//! pipeline: check execution, measure evaluation, aggregation, export.

pub mod checks;
pub mod export;
pub mod measure;
mod pipeline;
mod worker;

pub use pipeline::{CheckResultEvent, ReportPipeline, RunHandle, MAX_ERROR_LEN};
pub use worker::WorkerPool;
