//! Export mapping: the privacy-safe external representation of a report.
//!
//! Only two things per row leave the system: the check's identity hash
//! (stratum-suffixed when stratified) and the obfuscated value as a rounded
//! proportion of the population. Raw counts and matched subject sets never
//! appear here.

use crate::domain::{RawValue, Report};
use crate::ports::{ExternalReport, ExternalResult};

/// Build the external representation of a generated report.
#[must_use]
pub fn external_report(report: &Report) -> ExternalReport {
    let results = report
        .results
        .iter()
        .map(|row| {
            let check = match &row.stratum {
                Some(stratum) => format!("{} ({stratum})", row.fingerprint),
                None => row.fingerprint.clone(),
            };
            let value = match row.raw {
                // Error rows keep their place in the report but release
                // nothing.
                RawValue::Error => 0.0,
                RawValue::Count(_) => proportion(row.obfuscated, report.number_of_entities),
            };
            ExternalResult { check, value }
        })
        .collect();

    ExternalReport {
        report_id: report.id.clone(),
        results,
    }
}

/// Obfuscated count as a share of the population, rounded half-up to two
/// decimals. An empty population exports 0.0 rather than NaN.
fn proportion(obfuscated: f64, number_of_entities: u64) -> f64 {
    if number_of_entities == 0 {
        return 0.0;
    }
    round_half_up(obfuscated / number_of_entities as f64)
}

fn round_half_up(value: f64) -> f64 {
    // `round` is half-away-from-zero, which equals half-up for the
    // non-negative values released here.
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CheckId, CheckOutcome, ReportStatus};

    fn report_with(rows: Vec<(&str, Option<&str>, RawValue, f64)>, denominator: u64) -> Report {
        let mut report = Report::new(1.0);
        for (check, stratum, raw, obfuscated) in rows {
            let outcome = match raw {
                RawValue::Count(count) => {
                    CheckOutcome::counted(count, "Patient", Default::default())
                }
                RawValue::Error => CheckOutcome::failed("boom"),
            };
            let row = Report::result_row(
                CheckId::new(check),
                check.to_string(),
                format!("hash-{check}"),
                &outcome,
                obfuscated,
                10.0,
                20.0,
                1.0,
                stratum.map(str::to_string),
                512,
            );
            assert!(report.append(row));
        }
        assert!(report.finalize(denominator));
        assert_eq!(report.status, ReportStatus::Generated);
        report
    }

    #[test]
    fn test_proportion_rounds_half_up() {
        assert_eq!(proportion(125.0, 1000), 0.13); // 0.125 rounds up
        assert_eq!(proportion(124.0, 1000), 0.12);
        assert_eq!(proportion(1000.0, 1000), 1.0);
    }

    #[test]
    fn test_zero_denominator_exports_zero() {
        let report = report_with(vec![("c1", None, RawValue::Count(10), 12.0)], 0);
        let external = external_report(&report);
        assert_eq!(external.results[0].value, 0.0);
        assert!(external.results[0].value.is_finite());
    }

    #[test]
    fn test_error_rows_export_zero() {
        let report = report_with(vec![("c1", None, RawValue::Error, 0.0)], 100);
        let external = external_report(&report);
        assert_eq!(external.results.len(), 1);
        assert_eq!(external.results[0].value, 0.0);
    }

    #[test]
    fn test_stratum_suffix_is_the_only_difference() {
        let report = report_with(
            vec![
                ("c1", None, RawValue::Count(10), 10.0),
                ("c1", Some("female"), RawValue::Count(5), 5.0),
            ],
            100,
        );
        let external = external_report(&report);

        let base = &external.results[0].check;
        let stratified = &external.results[1].check;
        assert_eq!(*stratified, format!("{base} (female)"));
    }

    #[test]
    fn test_no_raw_values_leak() {
        let report = report_with(vec![("c1", None, RawValue::Count(987), 1000.0)], 100);
        let external = external_report(&report);
        let serialized = serde_json::to_string(&external).expect("serializable");
        assert!(!serialized.contains("987"));
        assert!(!serialized.contains("subject"));
    }
}
