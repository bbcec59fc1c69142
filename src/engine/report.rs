//! Parsing the engine's summary report.
//!
//! Only a handful of lines matter:
//!
//! ```text
//! Abundance Results for Species Fe I        (input abundance =   7.470)
//! wavelength        ID      EP     logGF     EW     logRW     abund    delavg
//!  4445.471   26.00000   0.087  -5.441    40.00   -5.046    7.4431   -0.0256
//! average abundance =   7.469  std. deviation =   0.076  #lines =  47
//! E.P. correlation:  slope =  -7.21E-04  intercept =   7.496  corr. coeff. =  -0.048
//! R.W. correlation:  slope =  -2.43E-03  intercept =   7.457  corr. coeff. =  -0.005
//! ```
//!
//! Reports from the 2013 engine lack the `logRW` column; we derive it from EW and λ.

use crate::domain::{EngineReport, EngineVersion, LineAbundance};
use crate::error::JobError;

/// Float immediately following `marker` on `line`.
fn value_after(line: &str, marker: &str) -> Result<f64, JobError> {
    let rest = line
        .split_once(marker)
        .map(|(_, rest)| rest)
        .ok_or_else(|| JobError::EngineInvocation(format!("no '{marker}' in report line '{line}'")))?;
    let token = rest
        .split_whitespace()
        .next()
        .ok_or_else(|| JobError::EngineInvocation(format!("missing value after '{marker}' in '{line}'")))?;
    token
        .parse::<f64>()
        .map_err(|e| JobError::EngineInvocation(format!("bad value '{token}' in report: {e}")))
}

fn parse_line_row(line: &str, version: EngineVersion) -> Option<LineAbundance> {
    let values: Vec<f64> = line
        .split_whitespace()
        .map(str::parse::<f64>)
        .collect::<Result<_, _>>()
        .ok()?;
    match version {
        EngineVersion::V2014 if values.len() >= 7 => Some(LineAbundance {
            wavelength: values[0],
            ep: values[2],
            log_rw: values[5],
            abundance: values[6],
        }),
        EngineVersion::V2013 if values.len() >= 6 => {
            let (wavelength, ew) = (values[0], values[4]);
            Some(LineAbundance {
                wavelength,
                ep: values[2],
                log_rw: (ew * 1e-3 / wavelength).log10(),
                abundance: values[5],
            })
        }
        _ => None,
    }
}

/// Parse the summary report text.
///
/// Does not judge whether the report is complete; see [`crate::solver::weighting`].
pub fn parse_summary(text: &str, version: EngineVersion) -> Result<EngineReport, JobError> {
    let mut report = EngineReport::default();
    let mut in_table = false;

    for line in text.lines() {
        if line.starts_with("Abundance Results for Species") {
            report.stages.push(Vec::new());
            in_table = false;
        } else if line.starts_with("wavelength") {
            in_table = true;
        } else if line.starts_with("average abundance") {
            report.average_abundances.push(value_after(line, "abundance =")?);
            in_table = false;
        } else if line.starts_with("E.P") {
            report.ep_slopes.push(value_after(line, "slope =")?);
        } else if line.starts_with("R.W") {
            report.rw_slopes.push(value_after(line, "slope =")?);
        } else if in_table {
            if let (Some(row), Some(stage)) = (parse_line_row(line, version), report.stages.last_mut()) {
                stage.push(row);
            }
        }
    }

    Ok(report)
}
