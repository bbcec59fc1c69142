//! Formatted terminal output for a finished batch.

use crate::domain::{SkippedJob, StarResult};

/// Batch summary: one row per solved star, then the skipped jobs.
pub fn format_batch_summary(results: &[StarResult], skipped: &[SkippedJob]) -> String {
    let mut out = String::new();

    out.push_str("=== specpar - spectroscopic parameters ===\n");
    out.push_str(&format!(
        "Jobs: {} solved | {} converged | {} skipped\n\n",
        results.len(),
        results.iter().filter(|r| r.convergence).count(),
        skipped.len()
    ));

    if !results.is_empty() {
        out.push_str(&format_results_table(results));
    }
    if !skipped.is_empty() {
        out.push('\n');
        out.push_str("Skipped:\n");
        out.push_str(&format_skipped_table(skipped));
    }
    out
}

fn format_results_table(rows: &[StarResult]) -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "{:<24} {:>12} {:>12} {:>12} {:>12} {:<5} {:<8}\n",
            "linelist", "Teff", "logg", "[Fe/H]", "vt", "conv", "fixed"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(
        format!(
            "{:-<24} {:-<12} {:-<12} {:-<12} {:-<12} {:-<5} {:-<8}\n",
            "", "", "", "", "", "", ""
        )
        .trim_end(),
    );
    out.push('\n');

    for r in rows {
        out.push_str(
            format!(
                "{:<24} {:>12} {:>12} {:>12} {:>12} {:<5} {:<8}\n",
                truncate(&r.linelist, 24),
                format!("{:.0}±{:.0}", r.teff, r.tefferr),
                format!("{:.2}±{:.2}", r.logg, r.loggerr),
                format!("{:.2}±{:.2}", r.feh, r.feherr),
                format!("{:.2}±{:.2}", r.vt, r.vterr),
                if r.convergence { "yes" } else { "no" },
                fixed_tags(r),
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

fn format_skipped_table(rows: &[SkippedJob]) -> String {
    let mut out = String::new();
    for s in rows {
        let name = if s.linelist.is_empty() { "-" } else { s.linelist.as_str() };
        out.push_str(&format!(
            "  line {:<4} {:<24} [{}] {}\n",
            s.line_no,
            truncate(name, 24),
            s.kind,
            s.message
        ));
    }
    out
}

fn fixed_tags(r: &StarResult) -> String {
    let tags: Vec<&str> = [
        (r.fixteff, "T"),
        (r.fixlogg, "g"),
        (r.fixfeh, "m"),
        (r.fixvt, "v"),
    ]
    .iter()
    .filter(|(on, _)| *on)
    .map(|(_, t)| *t)
    .collect();
    if tags.is_empty() { "-".to_string() } else { tags.concat() }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}
