//! Result exports.
//!
//! - `results.csv`: tab-separated, one row per star, appended across runs
//! - optional JSON with every row plus the skipped jobs of this run

use std::fs::{File, OpenOptions};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{SkippedJob, StarResult};
use crate::error::AppError;

/// Append rows to the results table.
///
/// The header is written when the file is new (or empty) and whenever
/// `overwrite` truncates it.
pub fn write_results_table(path: &Path, rows: &[StarResult], overwrite: bool) -> Result<(), AppError> {
    let fresh = overwrite || std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(!overwrite)
        .truncate(overwrite)
        .open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open results table '{}': {e}", path.display())))?;

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(fresh)
        .from_writer(file);
    if fresh && rows.is_empty() {
        writer
            .write_record(RESULTS_HEADER)
            .map_err(|e| AppError::new(2, format!("Failed to write results header: {e}")))?;
    }
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| AppError::new(2, format!("Failed to write results row for '{}': {e}", row.linelist)))?;
    }
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush results table: {e}")))?;
    Ok(())
}

/// Column names of the results table, matching `StarResult`'s serialized fields.
pub const RESULTS_HEADER: [&str; 25] = [
    "linelist",
    "teff",
    "tefferr",
    "logg",
    "loggerr",
    "feh",
    "feherr",
    "vt",
    "vterr",
    "loggastero",
    "dloggastero",
    "loggLC",
    "dloggLC",
    "convergence",
    "fixteff",
    "fixlogg",
    "fixfeh",
    "fixvt",
    "outlier",
    "weights",
    "model",
    "refine",
    "EPcrit",
    "RWcrit",
    "ABdiffcrit",
];

#[derive(Debug, Serialize)]
pub struct RunExport<'a> {
    pub tool: &'static str,
    pub generated_at: DateTime<Utc>,
    pub results: &'a [StarResult],
    pub skipped: &'a [SkippedJob],
}

/// Write the JSON export for one run.
pub fn write_run_json(path: &Path, results: &[StarResult], skipped: &[SkippedJob]) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create JSON export '{}': {e}", path.display())))?;
    let export = RunExport {
        tool: "specpar",
        generated_at: Utc::now(),
        results,
        skipped,
    };
    serde_json::to_writer_pretty(file, &export)
        .map_err(|e| AppError::new(2, format!("Failed to write JSON export: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str) -> StarResult {
        StarResult {
            linelist: name.to_string(),
            teff: 5777.0,
            tefferr: 25.0,
            logg: 4.44,
            loggerr: 0.05,
            feh: 0.0,
            feherr: 0.02,
            vt: 1.0,
            vterr: 0.03,
            loggastero: 4.29,
            dloggastero: 0.02,
            logg_lc: 4.39,
            dlogg_lc: 0.02,
            convergence: true,
            fixteff: false,
            fixlogg: false,
            fixfeh: false,
            fixvt: false,
            outlier: "False".into(),
            weights: "null".into(),
            model: "kurucz95".into(),
            refine: false,
            ep_crit: 0.001,
            rw_crit: 0.003,
            abdiff_crit: 0.01,
        }
    }

    #[test]
    fn header_once_then_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        write_results_table(&path, &[row("a.moog")], false).unwrap();
        write_results_table(&path, &[row("b.moog")], false).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], RESULTS_HEADER.join("\t"));
        assert!(lines[1].starts_with("a.moog\t5777"));
        assert!(lines[2].starts_with("b.moog\t"));
        assert_eq!(lines[2].split('\t').count(), RESULTS_HEADER.len());
    }

    #[test]
    fn overwrite_truncates_and_rewrites_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        write_results_table(&path, &[row("a.moog"), row("b.moog")], false).unwrap();
        write_results_table(&path, &[row("c.moog")], true).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("linelist\tteff"));
        assert!(lines[1].starts_with("c.moog\t"));
    }

    #[test]
    fn empty_run_still_creates_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        write_results_table(&path, &[], false).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim_end(), RESULTS_HEADER.join("\t"));
    }

    #[test]
    fn json_export_lists_results_and_skips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        let skipped = [SkippedJob {
            line_no: 4,
            linelist: "bad.moog".into(),
            kind: "out_of_grid".into(),
            message: "teff=9000".into(),
        }];
        write_run_json(&path, &[row("a.moog")], &skipped).unwrap();

        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["tool"], "specpar");
        assert_eq!(value["results"][0]["loggLC"], 4.39);
        assert_eq!(value["results"][0]["EPcrit"], 0.001);
        assert_eq!(value["skipped"][0]["kind"], "out_of_grid");
        assert!(value["generated_at"].as_str().is_some());
    }
}
