//! Atmosphere interpolation.
//!
//! Two schemes over the bracketing models returned by [`GridCatalog::locate`]:
//!
//! - **trilinear**: 8 corners, per (layer, column) cell a 2×2×2 tensor evaluated at the
//!   fractional coordinates `t = (x - lo)/(hi - lo)` of each axis
//! - **polynomial**: up to 4 Teff × 2 logg × 2 [Fe/H]; one axis at a time, fit value vs.
//!   signed distance `sample - target` (degree 2 for ≥3 samples, 1 for 2) and evaluate at
//!   distance 0. Axes collapse in the order Teff → [Fe/H] → logg.
//!
//! The output never extends past the shortest source model: layers and columns are the
//! minimum over all contributing models.

use std::collections::HashMap;
use std::path::PathBuf;

use nalgebra::{DMatrix, DVector};

use crate::domain::InterpolationMode;
use crate::error::JobError;
use crate::grid::catalog::{BracketSet, GridCatalog};
use crate::grid::model::AtmosphereGridPoint;
use crate::math::polynomial_value_at_zero;

/// Model at the requested parameters; not persisted on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpolatedModel {
    pub teff: f64,
    pub logg: f64,
    pub feh: f64,
    pub layers: DMatrix<f64>,
}

/// Builds models at arbitrary parameters from one grid directory.
#[derive(Debug, Clone)]
pub struct GridInterpolator {
    catalog: GridCatalog,
    mode: InterpolationMode,
}

impl GridInterpolator {
    pub fn new(catalog: GridCatalog, mode: InterpolationMode) -> Self {
        Self { catalog, mode }
    }

    pub fn mode(&self) -> InterpolationMode {
        self.mode
    }

    pub fn catalog(&self) -> &GridCatalog {
        &self.catalog
    }

    pub fn model_at(&self, teff: f64, logg: f64, feh: f64) -> Result<InterpolatedModel, JobError> {
        let set = self.catalog.locate(self.mode, teff, logg, feh)?;
        let models = load_bracket(&set)?;
        let refs: Vec<&AtmosphereGridPoint> = models.iter().collect();
        match self.mode {
            InterpolationMode::Trilinear => trilinear(&refs, teff, logg, feh),
            InterpolationMode::Polynomial => {
                polynomial(&refs, [set.teffs.len(), set.loggs.len(), set.fehs.len()], teff, logg, feh)
            }
        }
    }
}

/// Read every model of `set` in order; a file repeated by a zero-width bracket is read once.
fn load_bracket(set: &BracketSet) -> Result<Vec<AtmosphereGridPoint>, JobError> {
    let mut cache: HashMap<PathBuf, AtmosphereGridPoint> = HashMap::new();
    let mut out = Vec::with_capacity(set.paths.len());
    for (it, &t) in set.teffs.iter().enumerate() {
        for (il, &g) in set.loggs.iter().enumerate() {
            for (ife, &f) in set.fehs.iter().enumerate() {
                let path = &set.paths[set.index(it, il, ife)];
                if let Some(m) = cache.get(path) {
                    out.push(m.clone());
                    continue;
                }
                let m = AtmosphereGridPoint::read(t, g, f, path)?;
                cache.insert(path.clone(), m.clone());
                out.push(m);
            }
        }
    }
    Ok(out)
}

fn common_shape(models: &[&AtmosphereGridPoint]) -> Result<(usize, usize), JobError> {
    let layers = models.iter().map(|m| m.n_layers()).min().unwrap_or(0);
    let columns = models.iter().map(|m| m.n_columns()).min().unwrap_or(0);
    if layers == 0 || columns == 0 {
        return Err(JobError::OutOfGrid("no bracketing models to interpolate".into()));
    }
    Ok((layers, columns))
}

fn fraction(x: f64, lo: f64, hi: f64) -> f64 {
    if (hi - lo).abs() < 1e-12 { 0.0 } else { (x - lo) / (hi - lo) }
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a * (1.0 - t) + b * t
}

/// Trilinear interpolation over 8 corners ordered Teff-major, then logg, then [Fe/H]
/// (corner `i*4 + j*2 + k`, with 0 = low and 1 = high on each axis).
pub fn trilinear(
    corners: &[&AtmosphereGridPoint],
    teff: f64,
    logg: f64,
    feh: f64,
) -> Result<InterpolatedModel, JobError> {
    if corners.len() != 8 {
        return Err(JobError::OutOfGrid(format!(
            "trilinear interpolation needs 8 bracketing models, got {}",
            corners.len()
        )));
    }
    let (layers, columns) = common_shape(corners)?;

    let tx = fraction(teff, corners[0].teff, corners[4].teff);
    let ty = fraction(logg, corners[0].logg, corners[2].logg);
    let tz = fraction(feh, corners[0].feh, corners[1].feh);

    let out = DMatrix::from_fn(layers, columns, |l, c| {
        let v = |idx: usize| corners[idx].layers[(l, c)];
        // Collapse Teff, then logg, then [Fe/H].
        let c00 = lerp(v(0), v(4), tx);
        let c01 = lerp(v(1), v(5), tx);
        let c10 = lerp(v(2), v(6), tx);
        let c11 = lerp(v(3), v(7), tx);
        let c0 = lerp(c00, c10, ty);
        let c1 = lerp(c01, c11, ty);
        lerp(c0, c1, tz)
    });

    Ok(InterpolatedModel {
        teff,
        logg,
        feh,
        layers: out,
    })
}

/// Linear weights `l` with `Σ l_i y_i` = polynomial fit of `y` vs. `xs`, evaluated at 0.
///
/// The design matrix is shared by every cell, so we solve it once per axis.
fn axis_weights(xs: &[f64]) -> Result<Vec<f64>, JobError> {
    let n = xs.len();
    if n == 1 {
        return Ok(vec![1.0]);
    }
    let degree = if n >= 3 { 2 } else { 1 };
    let mut weights = Vec::with_capacity(n);
    for i in 0..n {
        let mut unit = vec![0.0; n];
        unit[i] = 1.0;
        let w = polynomial_value_at_zero(xs, &unit, degree).ok_or_else(|| {
            JobError::OutOfGrid(format!("degenerate axis samples {xs:?} for polynomial interpolation"))
        })?;
        weights.push(w);
    }
    Ok(weights)
}

/// Axis-by-axis polynomial interpolation.
///
/// `models` are ordered Teff-major, then logg, then [Fe/H], with `shape = [nt, nl, nf]`.
pub fn polynomial(
    models: &[&AtmosphereGridPoint],
    shape: [usize; 3],
    teff: f64,
    logg: f64,
    feh: f64,
) -> Result<InterpolatedModel, JobError> {
    let [nt, nl, nf] = shape;
    if models.len() != nt * nl * nf || models.is_empty() {
        return Err(JobError::OutOfGrid(format!(
            "expected {nt}x{nl}x{nf} bracketing models, got {}",
            models.len()
        )));
    }
    let (layers, columns) = common_shape(models)?;
    let at = |it: usize, il: usize, ife: usize| models[(it * nl + il) * nf + ife];

    let teff_d: Vec<f64> = (0..nt).map(|it| at(it, 0, 0).teff - teff).collect();
    let feh_d: Vec<f64> = (0..nf).map(|ife| at(0, 0, ife).feh - feh).collect();
    let logg_d: Vec<f64> = (0..nl).map(|il| at(0, il, 0).logg - logg).collect();
    let wt = DVector::from_vec(axis_weights(&teff_d)?);
    let wf = DVector::from_vec(axis_weights(&feh_d)?);
    let wg = DVector::from_vec(axis_weights(&logg_d)?);

    let out = DMatrix::from_fn(layers, columns, |l, c| {
        // Teff collapse leaves an (nl × nf) slab, [Fe/H] collapse leaves nl values.
        let slab = DMatrix::from_fn(nl, nf, |il, ife| {
            (0..nt).map(|it| wt[it] * at(it, il, ife).layers[(l, c)]).sum::<f64>()
        });
        let by_logg = &slab * &wf;
        by_logg.dot(&wg)
    });

    Ok(InterpolatedModel {
        teff,
        logg,
        feh,
        layers: out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A model whose every cell is an affine function of the parameters plus a layer/column offset.
    fn affine_model(teff: f64, logg: f64, feh: f64, layers: usize) -> AtmosphereGridPoint {
        let m = DMatrix::from_fn(layers, 7, |l, c| {
            1000.0 + 2.0 * teff + 30.0 * logg - 50.0 * feh + 10.0 * l as f64 + c as f64
        });
        AtmosphereGridPoint::from_layers(teff, logg, feh, m)
    }

    fn cube(t: [f64; 2], g: [f64; 2], f: [f64; 2]) -> Vec<AtmosphereGridPoint> {
        let mut out = Vec::new();
        for &tt in &t {
            for &gg in &g {
                for &ff in &f {
                    out.push(affine_model(tt, gg, ff, 5));
                }
            }
        }
        out
    }

    #[test]
    fn identity_on_every_axis() {
        let models = cube([5500.0, 5750.0], [4.0, 4.5], [-0.5, 0.0]);
        let refs: Vec<&AtmosphereGridPoint> = models.iter().collect();
        for (idx, m) in models.iter().enumerate() {
            let out = trilinear(&refs, m.teff, m.logg, m.feh).unwrap();
            assert_eq!(out.layers, models[idx].layers, "corner {idx}");
        }
    }

    #[test]
    fn linear_in_fractional_teff() {
        // logg and [Fe/H] brackets coincide, so only Teff varies.
        let models = cube([5000.0, 6000.0], [4.5, 4.5], [0.0, 0.0]);
        let refs: Vec<&AtmosphereGridPoint> = models.iter().collect();
        let v0 = models[0].layers[(2, 3)];
        let v1 = models[4].layers[(2, 3)];
        for t in [0.0, 0.1, 0.25, 0.5, 0.9, 1.0] {
            let out = trilinear(&refs, 5000.0 + 1000.0 * t, 4.5, 0.0).unwrap();
            let expected = v0 + t * (v1 - v0);
            assert!((out.layers[(2, 3)] - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn shortest_model_bounds_the_output() {
        let mut models = cube([5500.0, 5750.0], [4.0, 4.5], [-0.5, 0.0]);
        models[3] = affine_model(5500.0, 4.5, 0.0, 3);
        let refs: Vec<&AtmosphereGridPoint> = models.iter().collect();
        let out = trilinear(&refs, 5600.0, 4.2, -0.2).unwrap();
        assert_eq!(out.layers.nrows(), 3);
        assert_eq!(out.layers.ncols(), 7);
    }

    #[test]
    fn trilinear_reproduces_affine_fields() {
        let models = cube([5500.0, 5750.0], [4.0, 4.5], [-0.5, 0.0]);
        let refs: Vec<&AtmosphereGridPoint> = models.iter().collect();
        let out = trilinear(&refs, 5620.0, 4.3, -0.15).unwrap();
        let expected = affine_model(5620.0, 4.3, -0.15, 5);
        assert!((&out.layers - &expected.layers).amax() < 1e-8);
    }

    #[test]
    fn polynomial_reproduces_quadratic_in_teff() {
        let teffs = [5250.0, 5500.0, 5750.0, 6000.0];
        let loggs = [4.0, 4.5];
        let fehs = [-0.5, 0.0];
        let field = |t: f64, g: f64, f: f64| 3.0 + 1e-6 * (t - 5000.0).powi(2) + 0.2 * g - 0.7 * f;
        let mut models = Vec::new();
        for &t in &teffs {
            for &g in &loggs {
                for &f in &fehs {
                    let m = DMatrix::from_fn(4, 7, |l, _| field(t, g, f) + l as f64);
                    models.push(AtmosphereGridPoint::from_layers(t, g, f, m));
                }
            }
        }
        let refs: Vec<&AtmosphereGridPoint> = models.iter().collect();
        let out = polynomial(&refs, [4, 2, 2], 5600.0, 4.2, -0.1).unwrap();
        assert!((out.layers[(1, 0)] - (field(5600.0, 4.2, -0.1) + 1.0)).abs() < 1e-8);
    }

    #[test]
    fn polynomial_identity_at_grid_point() {
        let m = affine_model(5750.0, 4.5, 0.0, 4);
        let out = polynomial(&[&m], [1, 1, 1], 5750.0, 4.5, 0.0).unwrap();
        assert_eq!(out.layers, m.layers);
    }

    #[test]
    fn wrong_corner_count_is_rejected() {
        let m = affine_model(5750.0, 4.5, 0.0, 4);
        assert!(trilinear(&[&m, &m], 5750.0, 4.5, 0.0).is_err());
    }
}
