//! Report pipeline: triggers a check run, aggregates results, finalizes.
//!
//! One trigger produces one report. Checks execute concurrently on the
//! worker pool; each check (or each stratum of a stratified check) emits
//! exactly one result event, which the aggregation step obfuscates and
//! appends under a per-report lock. A run context tracks expected versus
//! completed checks; the last completion drives finalization.
//!
//! The remote store is never called while the aggregation lock is held:
//! check execution and the denominator count happen before the lock is
//! taken.

use std::sync::{Arc, Condvar, Mutex};

use crate::adapters::laplace::PrivacyConfig;
use crate::adapters::StorageError;
use crate::application::checks::{builtin_checks, catalog_checks, QualityCheck};
use crate::application::export;
use crate::application::measure::SUBJECT_TYPE;
use crate::application::worker::WorkerPool;
use crate::domain::{CheckId, CheckOutcome, Report, ReportStatus};
use crate::ports::{CheckCatalog, CountObfuscation, FhirStore, ReportSender, ReportStore};
use crate::{ProbeError, Result};

/// Maximum stored length of a result row's error text, in bytes.
pub const MAX_ERROR_LEN: usize = 512;

/// Sensitivity of a counting query: one subject changes the count by one.
const SENSITIVITY: f64 = 1.0;

/// One result event, emitted per (check, stratum) pair.
#[derive(Debug, Clone)]
pub struct CheckResultEvent {
    pub check_id: CheckId,
    pub check_name: String,
    pub fingerprint: String,
    pub outcome: CheckOutcome,
    pub warning_threshold: f64,
    pub error_threshold: f64,
    pub epsilon: f64,
    pub stratum: Option<String>,
}

struct RunState {
    report: Report,
    completed_checks: usize,
    aggregation_failed: bool,
    settled: bool,
}

/// Tracks one run: the report under construction and how many of the
/// triggered checks have completed.
///
/// Aggregation is serialized by the state mutex; one report never sees two
/// concurrent appends. Concurrent runs have independent contexts and do not
/// contend.
pub struct RunContext {
    expected_checks: usize,
    state: Mutex<RunState>,
    settled_signal: Condvar,
}

impl RunContext {
    fn new(report: Report, expected_checks: usize) -> Self {
        Self {
            expected_checks,
            state: Mutex::new(RunState {
                report,
                completed_checks: 0,
                aggregation_failed: false,
                settled: false,
            }),
            settled_signal: Condvar::new(),
        }
    }
}

/// Handle to a triggered run.
pub struct RunHandle {
    /// Id of the report being generated.
    pub report_id: String,
    ctx: Arc<RunContext>,
}

impl RunHandle {
    /// Block until every triggered check has completed and finalization has
    /// been attempted, returning the report's final status.
    ///
    /// `Generating` after a settled run means finalization failed and should
    /// be retried by the embedding layer.
    pub fn wait(&self) -> ReportStatus {
        let mut state = self
            .ctx
            .state
            .lock()
            .expect("Run state lock poisoned");
        while !state.settled {
            state = self
                .ctx
                .settled_signal
                .wait(state)
                .expect("Run state lock poisoned");
        }
        state.report.status
    }
}

/// The orchestration/aggregation pipeline.
pub struct ReportPipeline<C, R>
where
    C: CheckCatalog,
    R: ReportStore,
{
    catalog: Arc<C>,
    store: Arc<dyn FhirStore>,
    reports: Arc<R>,
    privacy: Arc<dyn CountObfuscation>,
    sender: Arc<dyn ReportSender>,
    config: PrivacyConfig,
    pool: WorkerPool,
}

impl<C, R> ReportPipeline<C, R>
where
    C: CheckCatalog,
    C::Error: Into<StorageError>,
    R: ReportStore + 'static,
    R::Error: Into<StorageError>,
{
    /// Create a pipeline with the default pool size.
    pub fn new(
        catalog: Arc<C>,
        store: Arc<dyn FhirStore>,
        reports: Arc<R>,
        privacy: Arc<dyn CountObfuscation>,
        sender: Arc<dyn ReportSender>,
        config: PrivacyConfig,
    ) -> Self {
        Self::with_pool(catalog, store, reports, privacy, sender, config, 4, 16)
    }

    /// Create a pipeline with an explicit worker count and queue depth.
    #[allow(clippy::too_many_arguments)]
    pub fn with_pool(
        catalog: Arc<C>,
        store: Arc<dyn FhirStore>,
        reports: Arc<R>,
        privacy: Arc<dyn CountObfuscation>,
        sender: Arc<dyn ReportSender>,
        config: PrivacyConfig,
        workers: usize,
        queue_depth: usize,
    ) -> Self {
        Self {
            catalog,
            store,
            reports,
            privacy,
            sender,
            config,
            pool: WorkerPool::new(workers, queue_depth),
        }
    }

    /// Trigger a new report run.
    ///
    /// Loads the catalog, validates every check's privacy parameters (a
    /// misconfigured epsilon fails the trigger, not the run), creates the
    /// report and dispatches every check onto the pool.
    ///
    /// # Errors
    /// Returns error if the catalog cannot be read, a check carries an
    /// invalid epsilon, or the report cannot be created.
    pub fn trigger_run(&self, epsilon: f64) -> Result<RunHandle> {
        let definitions = self
            .catalog
            .list_all()
            .map_err(|e| ProbeError::Persistence(e.into()))?;

        let mut checks = catalog_checks(definitions);
        checks.extend(builtin_checks());

        // Privacy-parameter errors are configuration errors: fail fast
        // before any check touches the store.
        for check in &checks {
            let definition = check.definition();
            if !definition.epsilon.is_finite() || definition.epsilon <= 0.0 {
                return Err(ProbeError::Validation(format!(
                    "check {} has invalid epsilon {}",
                    definition.id, definition.epsilon
                )));
            }
        }

        let report = Report::new(epsilon);
        let report_id = report.id.clone();
        self.reports
            .create(&report)
            .map_err(|e| ProbeError::Persistence(e.into()))?;

        tracing::info!(report = %report_id, checks = checks.len(), "Triggered report run");

        let ctx = Arc::new(RunContext::new(report, checks.len()));

        if checks.is_empty() {
            // Nothing to run; finalize immediately.
            Self::finalize_run(&ctx, &self.store, &self.reports, &self.sender);
        }

        for check in checks {
            let ctx = Arc::clone(&ctx);
            let store = Arc::clone(&self.store);
            let reports = Arc::clone(&self.reports);
            let privacy = Arc::clone(&self.privacy);
            let sender = Arc::clone(&self.sender);
            let config = self.config.clone();
            self.pool.execute(move || {
                Self::run_check(&*check, &ctx, &store, &reports, &privacy, &sender, &config);
            });
        }

        Ok(RunHandle {
            report_id,
            ctx,
        })
    }

    /// Execute one check and aggregate its result events.
    fn run_check(
        check: &dyn QualityCheck,
        ctx: &Arc<RunContext>,
        store: &Arc<dyn FhirStore>,
        reports: &Arc<R>,
        privacy: &Arc<dyn CountObfuscation>,
        sender: &Arc<dyn ReportSender>,
        config: &PrivacyConfig,
    ) {
        let events = Self::execute_check(check, store.as_ref());

        for event in events {
            if let Err(e) = Self::apply_event(ctx, event, privacy.as_ref(), config, reports) {
                tracing::error!(error = %e, "Failed to aggregate check result");
                if let Ok(mut state) = ctx.state.lock() {
                    state.aggregation_failed = true;
                }
            }
        }

        let all_done = {
            let Ok(mut state) = ctx.state.lock() else {
                return;
            };
            state.completed_checks += 1;
            state.completed_checks == ctx.expected_checks && !state.settled
        };

        if all_done {
            Self::finalize_run(ctx, store, reports, sender);
        }
    }

    /// Run a check, preferring its stratification capability, and turn the
    /// outcome(s) into result events.
    fn execute_check(check: &dyn QualityCheck, store: &dyn FhirStore) -> Vec<CheckResultEvent> {
        let definition = check.definition().clone();

        match check.execute_with_stratification(store) {
            Some(strata) => {
                // The budget splits over the strata actually executed.
                let epsilon = definition.epsilon / strata.len().max(1) as f64;
                strata
                    .into_iter()
                    .map(|(stratum, outcome)| CheckResultEvent {
                        check_id: definition.id.clone(),
                        check_name: format!("{} ({stratum})", definition.name),
                        fingerprint: definition.fingerprint(),
                        outcome,
                        warning_threshold: definition.warning_threshold,
                        error_threshold: definition.error_threshold,
                        epsilon,
                        stratum: Some(stratum),
                    })
                    .collect()
            }
            None => {
                let outcome = check.execute(store);
                vec![CheckResultEvent {
                    check_id: definition.id.clone(),
                    check_name: definition.name.clone(),
                    fingerprint: definition.fingerprint(),
                    outcome,
                    warning_threshold: definition.warning_threshold,
                    error_threshold: definition.error_threshold,
                    epsilon: definition.epsilon,
                    stratum: None,
                }]
            }
        }
    }

    /// Aggregate one result event: obfuscate at the boundary, append,
    /// persist.
    ///
    /// Idempotent on (check id, stratum); events for an already generated
    /// report are ignored.
    fn apply_event(
        ctx: &Arc<RunContext>,
        event: CheckResultEvent,
        privacy: &dyn CountObfuscation,
        config: &PrivacyConfig,
        reports: &Arc<R>,
    ) -> Result<()> {
        // The privacy transform runs before the aggregation lock is taken.
        let obfuscated = match &event.outcome {
            CheckOutcome::Count { count, .. } => {
                if config.suppresses(*count) {
                    // Low-count suppression: small populations release 0.
                    0.0
                } else {
                    privacy.obfuscate(*count, event.epsilon, SENSITIVITY)?
                }
            }
            CheckOutcome::Failed { .. } => 0.0,
        };

        let row = Report::result_row(
            event.check_id,
            event.check_name,
            event.fingerprint,
            &event.outcome,
            obfuscated,
            event.warning_threshold,
            event.error_threshold,
            event.epsilon,
            event.stratum,
            MAX_ERROR_LEN,
        );

        let mut state = ctx
            .state
            .lock()
            .map_err(|_| ProbeError::Validation("aggregation lock poisoned".to_string()))?;
        if state.report.append(row.clone()) {
            reports
                .append_result(&state.report.id, &row)
                .map_err(|e| ProbeError::Persistence(e.into()))?;
        }

        Ok(())
    }

    /// Compute the denominator, flip the report to `Generated` and hand the
    /// external representation to the sender.
    ///
    /// Any failure here leaves the report `Generating` so the embedding
    /// layer can retry; a wrong denominator must never be shipped.
    fn finalize_run(
        ctx: &Arc<RunContext>,
        store: &Arc<dyn FhirStore>,
        reports: &Arc<R>,
        sender: &Arc<dyn ReportSender>,
    ) {
        // Remote I/O first, outside the aggregation lock.
        let denominator = store.count(SUBJECT_TYPE);

        let external = {
            let Ok(mut state) = ctx.state.lock() else {
                return;
            };

            if state.aggregation_failed {
                tracing::error!(
                    report = %state.report.id,
                    "Not finalizing: one or more result rows could not be persisted"
                );
                None
            } else {
                match denominator {
                    Ok(number_of_entities) => {
                        if state.report.finalize(number_of_entities) {
                            match reports.finalize(&state.report.id, number_of_entities) {
                                Ok(()) => {
                                    tracing::info!(
                                        report = %state.report.id,
                                        number_of_entities,
                                        results = state.report.results.len(),
                                        "Report generated"
                                    );
                                    Some(export::external_report(&state.report))
                                }
                                Err(e) => {
                                    let e: StorageError = e.into();
                                    tracing::error!(
                                        report = %state.report.id,
                                        error = %e,
                                        "Failed to persist finalization"
                                    );
                                    None
                                }
                            }
                        } else {
                            None
                        }
                    }
                    Err(e) => {
                        tracing::error!(
                            report = %state.report.id,
                            error = %e,
                            "Failed to compute denominator; report stays GENERATING"
                        );
                        None
                    }
                }
            }
        };

        // Delivery is outward I/O; the lock is released first.
        if let Some(external) = external {
            if let Err(e) = sender.send(&external) {
                tracing::error!(error = %e, "Report delivery failed");
            }
        }

        let Ok(mut state) = ctx.state.lock() else {
            return;
        };
        state.settled = true;
        ctx.settled_signal.notify_all();
    }
}
