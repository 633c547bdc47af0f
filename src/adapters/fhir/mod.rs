//! FHIR adapter: blocking HTTP implementation of FhirStore.
//!
//! Speaks plain FHIR REST against the configured base URL: paged searches
//! with `_elements` projections, `_summary=count` totals, resource creation
//! for Library/Measure envelopes, the `$evaluate-measure` operation in
//! subject-list mode, and List dereferencing.
//!
//! Auth, retries, and TLS policy belong to the embedding layer; this client
//! only applies a request timeout so a hung store surfaces as a per-check
//! error instead of stalling the worker pool forever.

use std::time::Duration;

use reqwest::blocking::{Client, Response};
use serde_json::Value;

use crate::ports::{FhirError, FhirStore, SubjectListEvaluation};

/// Evaluation period handed to `$evaluate-measure`. Wide enough to be
/// date-agnostic.
const MEASURE_PERIOD_START: &str = "1900-01-01";
const MEASURE_PERIOD_END: &str = "2100-01-01";

/// Configuration for the FHIR client.
#[derive(Debug, Clone)]
pub struct FhirConfig {
    /// Base URL of the FHIR endpoint, without trailing slash.
    pub base_url: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Page size requested via `_count` for paged searches.
    pub page_size: u32,
}

impl Default for FhirConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/fhir".to_string(),
            timeout_secs: 30,
            page_size: 500,
        }
    }
}

impl FhirConfig {
    /// Load config overrides from environment (best-effort).
    ///
    /// Supported:
    /// - FHIRPROBE_FHIR_BASE_URL
    /// - FHIRPROBE_FHIR_TIMEOUT_SECS
    /// - FHIRPROBE_FHIR_PAGE_SIZE
    #[must_use]
    pub fn from_env_or_default() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("FHIRPROBE_FHIR_BASE_URL") {
            let trimmed = v.trim().trim_end_matches('/');
            if !trimmed.is_empty() {
                cfg.base_url = trimmed.to_string();
            }
        }

        if let Ok(v) = std::env::var("FHIRPROBE_FHIR_TIMEOUT_SECS") {
            if let Ok(x) = v.trim().parse::<u64>() {
                if x > 0 {
                    cfg.timeout_secs = x;
                }
            }
        }

        if let Ok(v) = std::env::var("FHIRPROBE_FHIR_PAGE_SIZE") {
            if let Ok(x) = v.trim().parse::<u32>() {
                if x > 0 {
                    cfg.page_size = x;
                }
            }
        }

        cfg
    }
}

/// Blocking HTTP client for a FHIR R4 store.
pub struct HttpFhirClient {
    client: Client,
    config: FhirConfig,
}

impl HttpFhirClient {
    /// Create a new client.
    ///
    /// # Errors
    /// Returns error if the underlying HTTP client cannot be built.
    pub fn new(config: FhirConfig) -> Result<Self, FhirError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| FhirError::Transport(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn get_json(&self, url: &str) -> Result<Value, FhirError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/fhir+json")
            .send()
            .map_err(|e| FhirError::Transport(e.to_string()))?;
        Self::json_body(response)
    }

    fn json_body(response: Response) -> Result<Value, FhirError> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(FhirError::Status {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json()
            .map_err(|e| FhirError::Protocol(e.to_string()))
    }

    /// Extract the resources of one search Bundle page plus the next link.
    fn bundle_page(bundle: &Value) -> (Vec<Value>, Option<String>) {
        let resources = bundle["entry"]
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| {
                        let resource = &e["resource"];
                        (!resource.is_null()).then(|| resource.clone())
                    })
                    .collect()
            })
            .unwrap_or_default();

        let next = bundle["link"].as_array().and_then(|links| {
            links.iter().find_map(|l| {
                (l["relation"].as_str() == Some("next"))
                    .then(|| l["url"].as_str().map(str::to_string))
                    .flatten()
            })
        });

        (resources, next)
    }

    /// Extract a resource id from a `Location`-style or relative reference
    /// like `http://host/fhir/Measure/123/_history/1` or `Measure/123`.
    fn id_from_reference(reference: &str, resource_type: &str) -> Option<String> {
        let mut segments = reference.trim_end_matches('/').split('/');
        let mut id = None;
        while let Some(segment) = segments.next() {
            if segment == resource_type {
                id = segments.next().map(str::to_string);
            }
        }
        id.filter(|s| !s.is_empty())
    }
}

impl FhirStore for HttpFhirClient {
    fn fetch_all(&self, entity_type: &str, elements: &[&str]) -> Result<Vec<Value>, FhirError> {
        let mut url = format!(
            "{}/{}?_count={}",
            self.config.base_url, entity_type, self.config.page_size
        );
        if !elements.is_empty() {
            url.push_str("&_elements=");
            url.push_str(&elements.join(","));
        }

        let mut resources = Vec::new();
        let mut next_url = Some(url);

        while let Some(url) = next_url {
            let bundle = self.get_json(&url)?;
            let (mut page, next) = Self::bundle_page(&bundle);
            resources.append(&mut page);
            next_url = next;
        }

        tracing::debug!(entity_type, count = resources.len(), "Fetched resources");
        Ok(resources)
    }

    fn count(&self, entity_type: &str) -> Result<u64, FhirError> {
        let url = format!(
            "{}/{}?_summary=count",
            self.config.base_url, entity_type
        );
        let bundle = self.get_json(&url)?;
        bundle["total"]
            .as_u64()
            .ok_or_else(|| FhirError::Protocol("count bundle has no total".to_string()))
    }

    fn submit_library(&self, library: &Value) -> Result<(), FhirError> {
        let url = format!("{}/Library", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/fhir+json")
            .json(library)
            .send()
            .map_err(|e| FhirError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FhirError::Status {
                status: status.as_u16(),
                message: response.text().unwrap_or_default(),
            });
        }
        Ok(())
    }

    fn submit_measure(&self, measure: &Value) -> Result<String, FhirError> {
        let url = format!("{}/Measure", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/fhir+json")
            .json(measure)
            .send()
            .map_err(|e| FhirError::Transport(e.to_string()))?;

        // Prefer the Location header; fall back to the echoed resource id.
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|loc| Self::id_from_reference(loc, "Measure"));

        let body = Self::json_body(response)?;
        location
            .or_else(|| body["id"].as_str().map(str::to_string))
            .ok_or_else(|| FhirError::Protocol("store assigned no measure id".to_string()))
    }

    fn evaluate_measure_subject_list(
        &self,
        measure_id: &str,
    ) -> Result<SubjectListEvaluation, FhirError> {
        let url = format!(
            "{}/Measure/{}/$evaluate-measure?reportType=subject-list&periodStart={}&periodEnd={}",
            self.config.base_url, measure_id, MEASURE_PERIOD_START, MEASURE_PERIOD_END
        );
        let report = self.get_json(&url)?;

        let population = &report["group"][0]["population"][0];
        let count = population["count"]
            .as_u64()
            .ok_or_else(|| FhirError::Protocol("measure report has no population count".to_string()))?;
        let subject_list = population["subjectResults"]["reference"]
            .as_str()
            .map(str::to_string);

        Ok(SubjectListEvaluation {
            count,
            subject_list,
        })
    }

    fn resolve_list(&self, reference: &str) -> Result<Vec<String>, FhirError> {
        let list_id = Self::id_from_reference(reference, "List")
            .ok_or_else(|| FhirError::Protocol(format!("malformed list reference: {reference}")))?;

        let url = format!("{}/List/{}", self.config.base_url, list_id);
        let list = self.get_json(&url)?;

        let ids = list["entry"]
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        // Entries with absent or malformed references are
                        // skipped, not failed.
                        let reference = entry["item"]["reference"].as_str()?;
                        Self::id_from_reference(reference, "Patient")
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(ids)
    }

    fn health_check(&self) -> Result<(), FhirError> {
        let url = format!("{}/metadata", self.config.base_url);
        self.get_json(&url).map(|_| ())
    }
}
