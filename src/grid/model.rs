//! Reading tabulated atmosphere models.
//!
//! Grid files are gzip-compressed text: a fixed 23-line header, one row per depth
//! layer, and a trailer line. Layer columns start with mass depth (RHOX),
//! temperature, gas pressure, electron density and the Rosseland absorption
//! coefficient (ABROSS), followed by auxiliary columns.

use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use nalgebra::DMatrix;

use crate::error::JobError;

/// Header lines preceding the first layer row.
pub const HEADER_LINES: usize = 23;

const COL_RHOX: usize = 0;
const COL_ABROSS: usize = 4;

/// One tabulated model of the grid.
#[derive(Debug, Clone, PartialEq)]
pub struct AtmosphereGridPoint {
    pub teff: f64,
    pub logg: f64,
    pub feh: f64,
    /// `layers × columns`.
    pub layers: DMatrix<f64>,
    /// Rosseland optical-depth scale, one entry per layer.
    pub tau_ross: Vec<f64>,
}

impl AtmosphereGridPoint {
    pub fn from_layers(teff: f64, logg: f64, feh: f64, layers: DMatrix<f64>) -> Self {
        let tau_ross = if layers.ncols() > COL_ABROSS {
            let rhox: Vec<f64> = layers.column(COL_RHOX).iter().copied().collect();
            let abross: Vec<f64> = layers.column(COL_ABROSS).iter().copied().collect();
            tau_ross_scale(&rhox, &abross)
        } else {
            Vec::new()
        };
        Self {
            teff,
            logg,
            feh,
            layers,
            tau_ross,
        }
    }

    pub fn n_layers(&self) -> usize {
        self.layers.nrows()
    }

    pub fn n_columns(&self) -> usize {
        self.layers.ncols()
    }

    /// Parse the decompressed text of a grid file.
    pub fn parse(teff: f64, logg: f64, feh: f64, text: &str, origin: &Path) -> Result<Self, JobError> {
        let all: Vec<&str> = text.lines().collect();
        if all.len() <= HEADER_LINES + 1 {
            return Err(JobError::GridFormat {
                path: origin.to_path_buf(),
                message: format!("only {} lines, expected a {HEADER_LINES}-line header plus layers", all.len()),
            });
        }
        // Last line is a trailer, never a layer.
        let body = &all[HEADER_LINES..all.len() - 1];

        let mut rows: Vec<Vec<f64>> = Vec::with_capacity(body.len());
        for line in body {
            let parsed: Result<Vec<f64>, _> = line.split_whitespace().map(str::parse::<f64>).collect();
            match parsed {
                Ok(values) if !values.is_empty() => {
                    if let Some(first) = rows.first() {
                        if values.len() != first.len() {
                            break;
                        }
                    }
                    rows.push(values);
                }
                _ => break,
            }
        }

        let ncols = rows.first().map(|r| r.len()).unwrap_or(0);
        if rows.is_empty() || ncols <= COL_ABROSS {
            return Err(JobError::GridFormat {
                path: origin.to_path_buf(),
                message: format!("no usable layers ({} rows, {ncols} columns)", rows.len()),
            });
        }

        let layers = DMatrix::from_fn(rows.len(), ncols, |i, j| rows[i][j]);
        Ok(Self::from_layers(teff, logg, feh, layers))
    }

    /// Read and decompress a `.gz` grid file.
    pub fn read(teff: f64, logg: f64, feh: f64, path: &Path) -> Result<Self, JobError> {
        let file = std::fs::File::open(path).map_err(|e| JobError::GridFormat {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let mut text = String::new();
        GzDecoder::new(file)
            .read_to_string(&mut text)
            .map_err(|e| JobError::GridFormat {
                path: path.to_path_buf(),
                message: format!("decompression failed: {e}"),
            })?;
        Self::parse(teff, logg, feh, &text, path)
    }
}

/// Cumulative trapezoid of `rhox·abross` over the layer index, seeded with the first product.
pub fn tau_ross_scale(rhox: &[f64], abross: &[f64]) -> Vec<f64> {
    let y: Vec<f64> = rhox.iter().zip(abross).map(|(r, a)| r * a).collect();
    let Some(&first) = y.first() else {
        return Vec::new();
    };
    let mut out = Vec::with_capacity(y.len());
    out.push(first);
    let mut acc = 0.0;
    for w in y.windows(2) {
        acc += (w[0] + w[1]) / 2.0;
        out.push(acc);
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    /// Minimal grid-file text with `n` layers whose values depend on `base`.
    pub(crate) fn fake_model_text(n: usize, base: f64) -> String {
        let mut out = String::new();
        for i in 0..HEADER_LINES {
            out.push_str(&format!("HEADER LINE {i}\n"));
        }
        for i in 0..n {
            let x = i as f64 + 1.0;
            out.push_str(&format!(
                "{:.8E} {:.1} {:.3E} {:.3E} {:.3E} {:.3E} {:.3E}\n",
                1e-3 * x,
                base + 10.0 * x,
                1e2 * x,
                1e10 * x,
                0.5 * x,
                0.0,
                0.0
            ));
        }
        out.push_str("PRADK 1.0\n");
        out
    }

    #[test]
    fn parse_skips_header_and_trailer() {
        let text = fake_model_text(5, 4000.0);
        let m = AtmosphereGridPoint::parse(5000.0, 4.5, 0.0, &text, Path::new("x.gz")).unwrap();
        assert_eq!(m.n_layers(), 5);
        assert_eq!(m.n_columns(), 7);
        assert!((m.layers[(0, 1)] - 4010.0).abs() < 1e-9);
        assert!((m.layers[(4, 1)] - 4050.0).abs() < 1e-9);
    }

    #[test]
    fn parse_stops_at_first_non_numeric_row() {
        let mut text = String::new();
        for _ in 0..HEADER_LINES {
            text.push_str("hdr\n");
        }
        text.push_str("1 2 3 4 5\n2 3 4 5 6\nPRADK 1.4\n7 8 9 10 11\ntrailer\n");
        let m = AtmosphereGridPoint::parse(5000.0, 4.5, 0.0, &text, Path::new("x.gz")).unwrap();
        assert_eq!(m.n_layers(), 2);
    }

    #[test]
    fn tau_scale_is_cumulative_trapezoid() {
        let tau = tau_ross_scale(&[1.0, 2.0, 3.0], &[1.0, 1.0, 1.0]);
        assert_eq!(tau, vec![1.0, 1.5, 4.0]);
        assert!(tau.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn reads_gzip_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("5000g45.p00.gz");
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(fake_model_text(4, 4000.0).as_bytes()).unwrap();
        std::fs::write(&path, enc.finish().unwrap()).unwrap();

        let m = AtmosphereGridPoint::read(5000.0, 4.5, 0.0, &path).unwrap();
        assert_eq!(m.n_layers(), 4);
        assert_eq!(m.tau_ross.len(), 4);
    }

    #[test]
    fn short_files_are_grid_format_errors() {
        let err = AtmosphereGridPoint::parse(5000.0, 4.5, 0.0, "a\nb\n", Path::new("x.gz")).unwrap_err();
        assert_eq!(err.kind(), "grid_format");
    }
}
