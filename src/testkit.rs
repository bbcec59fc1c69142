//! Test doubles for the synthesis engine and synthetic line sets.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::domain::{EngineReport, LineAbundance, ParameterVector, SOLAR_FE};
use crate::engine::SynthesisEngine;
use crate::error::JobError;
use crate::io::linelist::{LineList, SpectralLine};
use crate::math::mean;

/// 30 Fe I + 12 Fe II lines with reproducible EPs and EWs.
pub fn sample_lines() -> LineList {
    let mut rng = StdRng::seed_from_u64(42);
    let mut lines = Vec::new();
    for i in 0..42 {
        let species = if i < 30 { 26.0 } else { 26.1 };
        lines.push(SpectralLine {
            wavelength: 4500.0 + 37.31 * i as f64,
            species,
            ep: rng.gen_range(0.0..5.0),
            loggf: rng.gen_range(-4.0..-1.0),
            ew: rng.gen_range(10.0..110.0),
        });
    }
    LineList::new("star.moog", lines)
}

/// Report with explicit per-line abundances; slopes set to zero.
pub fn report_from_abundances(stage_i: &[(f64, f64)], stage_ii: &[(f64, f64)]) -> EngineReport {
    let rows = |v: &[(f64, f64)]| -> Vec<LineAbundance> {
        v.iter()
            .enumerate()
            .map(|(i, &(wavelength, abundance))| LineAbundance {
                wavelength,
                ep: i as f64 * 0.1,
                log_rw: -5.0 + 0.01 * i as f64,
                abundance,
            })
            .collect()
    };
    let s1 = rows(stage_i);
    let s2 = rows(stage_ii);
    let avg = |rows: &[LineAbundance]| mean(&rows.iter().map(|r| r.abundance).collect::<Vec<_>>()).unwrap_or(0.0);
    EngineReport {
        ep_slopes: vec![0.0, 0.0],
        rw_slopes: vec![0.0, 0.0],
        average_abundances: vec![avg(&s1), avg(&s2)],
        stages: vec![s1, s2],
    }
}

/// Replays a fixed sequence of reports; errors once exhausted.
pub struct ScriptedEngine {
    reports: VecDeque<EngineReport>,
    calls: usize,
    pub seen: Vec<(ParameterVector, usize)>,
}

impl ScriptedEngine {
    pub fn new(reports: Vec<EngineReport>) -> Self {
        Self {
            reports: reports.into(),
            calls: 0,
            seen: Vec::new(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl SynthesisEngine for ScriptedEngine {
    fn evaluate(&mut self, params: &ParameterVector, lines: &LineList) -> Result<EngineReport, JobError> {
        self.calls += 1;
        self.seen.push((*params, lines.len()));
        self.reports
            .pop_front()
            .ok_or_else(|| JobError::EngineInvocation("scripted engine exhausted".into()))
    }
}

/// Smooth forward model with a known solution.
///
/// Residuals shrink linearly towards `truth`, so the default gains halve the
/// error every iteration. Per-line abundances carry reproducible Gaussian
/// scatter (`noise`) plus optional per-wavelength offsets.
pub struct LinearEngine {
    pub truth: ParameterVector,
    pub noise: f64,
    pub offsets: Vec<(f64, f64)>,
    calls: usize,
}

impl LinearEngine {
    pub fn new(truth: ParameterVector) -> Self {
        Self {
            truth,
            noise: 0.0,
            offsets: Vec::new(),
            calls: 0,
        }
    }

    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = noise;
        self
    }

    pub fn with_offset(mut self, wavelength: f64, offset: f64) -> Self {
        self.offsets.push((wavelength, offset));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls
    }

    fn scatter(&self, wavelength: f64) -> f64 {
        let offset: f64 = self
            .offsets
            .iter()
            .filter(|(w, _)| (w - wavelength).abs() < 0.005)
            .map(|(_, o)| o)
            .sum();
        if self.noise <= 0.0 {
            return offset;
        }
        let mut rng = StdRng::seed_from_u64((wavelength * 1000.0).round() as u64);
        let normal = Normal::new(0.0, self.noise).unwrap();
        normal.sample(&mut rng) + offset
    }
}

impl SynthesisEngine for LinearEngine {
    fn evaluate(&mut self, p: &ParameterVector, lines: &LineList) -> Result<EngineReport, JobError> {
        self.calls += 1;
        let t = &self.truth;
        let ep = 0.5 * (t.teff - p.teff) / 5000.0;
        let rw = 0.5 * (t.vt - p.vt) / 5.0;
        let a1 = SOLAR_FE + t.feh + 1e-5 * (p.teff - t.teff);
        let a2 = a1 - 0.5 * (t.logg - p.logg) / 1.5;

        let mut stages = vec![Vec::new(), Vec::new()];
        for line in &lines.lines {
            let stage = line.stage().min(1);
            let log_rw = (line.ew * 1e-3 / line.wavelength).log10();
            let base = if stage == 0 {
                a1 + ep * (line.ep - 2.5) + rw * (log_rw + 5.0)
            } else {
                a2
            };
            stages[stage].push(LineAbundance {
                wavelength: line.wavelength,
                ep: line.ep,
                log_rw,
                abundance: base + self.scatter(line.wavelength),
            });
        }

        let averages: Vec<f64> = stages
            .iter()
            .filter(|s| !s.is_empty())
            .filter_map(|s| mean(&s.iter().map(|r| r.abundance).collect::<Vec<_>>()))
            .collect();
        stages.retain(|s| !s.is_empty());
        Ok(EngineReport {
            ep_slopes: vec![ep; averages.len()],
            rw_slopes: vec![rw; averages.len()],
            average_abundances: averages,
            stages,
        })
    }
}
