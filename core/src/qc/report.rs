use crate::config::QcParams;
use crate::prelude::{CoreResult, QcResult};
use crate::telemetry::metrics::Metrics;
use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};

pub fn report_file_name(started_at: &DateTime<Local>) -> String {
    format!("qc_report_{}.csv", started_at.format("%Y%m%dT%H%M%S"))
}

/// Writes one CSV per session: a row per inspected sensor, then the QC parameters
/// and the pass/fail/skip summary the verdicts were produced under.
pub fn write_report(
    dir: &Path,
    started_at: &DateTime<Local>,
    results: &[QcResult],
    params: &QcParams,
    metrics: &Metrics,
) -> CoreResult<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(report_file_name(started_at));
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_path(&path)?;

    writer.write_record([
        "sensor_id",
        "wafer_id",
        "verdict",
        "resonance_min_thz",
        "violations",
        "timestamp",
    ])?;
    for result in results {
        writer.write_record([
            result.sensor_id.to_string(),
            result.wafer_id.clone(),
            result.verdict.to_string(),
            format!("{:.4}", result.resonance_min_thz),
            result.violations.to_string(),
            result.timestamp.format("%Y-%m-%dT%H:%M:%S").to_string(),
        ])?;
    }

    writer.write_record(["parameter", "value"])?;
    for (name, value) in params.as_rows() {
        writer.write_record([name.to_string(), value])?;
    }
    writer.write_record(["passed".to_string(), metrics.passed.to_string()])?;
    writer.write_record(["failed".to_string(), metrics.failed.to_string()])?;
    writer.write_record(["skipped".to_string(), metrics.skipped.to_string()])?;
    writer.flush()?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::Verdict;
    use crate::testing::test_config;
    use chrono::TimeZone;

    #[test]
    fn report_lists_results_then_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let started = Local.with_ymd_and_hms(2024, 5, 2, 8, 30, 0).unwrap();
        let result = QcResult {
            sensor_id: 4,
            wafer_id: "W1".into(),
            verdict: Verdict::Pass,
            resonance_min_thz: 0.7612,
            violations: 0,
            timestamp: started,
        };
        let metrics = Metrics {
            passed: 1,
            failed: 0,
            skipped: 0,
        };
        let path = write_report(dir.path(), &started, &[result], &test_config().qc, &metrics).unwrap();
        assert_eq!(path.file_name().unwrap(), "qc_report_20240502T083000.csv");

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&path)
            .unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(&rows[0][0], "4");
        assert_eq!(&rows[0][2], "PASS");
        assert_eq!(&rows[1][0], "parameter");
        assert!(rows.iter().any(|r| &r[0] == "max_violations"));
        assert_eq!(&rows.last().unwrap()[0], "skipped");
    }
}
