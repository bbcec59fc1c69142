//! Writing an interpolated model in the engine's KURUCZ input format.

use std::path::Path;

use crate::domain::{ParameterVector, SOLAR_FE};
use crate::error::JobError;
use crate::grid::interp::InterpolatedModel;

/// Columns the engine reads per layer.
const WRITTEN_COLUMNS: usize = 7;

const MOLECULES: &str = concat!(
    "NMOL      19\n",
    "      606.0    106.0    607.0    608.0    107.0    108.0    112.0  707.0\n",
    "       708.0    808.0     12.1  60808.0  10108.0    101.0     6.1    7.1\n",
    "         8.1    822.0     22.1",
);

/// C-style `%.<precision>e` / `%.<precision>E`: exponent carries a sign and at least two digits.
pub fn format_exp(value: f64, precision: usize, upper: bool) -> String {
    let raw = format!("{value:.precision$e}");
    let Some((mantissa, exp)) = raw.split_once('e') else {
        // inf / NaN
        return raw;
    };
    let exp: i32 = exp.parse().unwrap_or(0);
    let sign = if exp < 0 { '-' } else { '+' };
    let marker = if upper { 'E' } else { 'e' };
    format!("{mantissa}{marker}{sign}{:02}", exp.abs())
}

/// Render the model deck. Only the first seven columns are written.
pub fn kurucz_text(model: &InterpolatedModel, params: &ParameterVector) -> String {
    let layers = model.layers.nrows();
    let cols = model.layers.ncols().min(WRITTEN_COLUMNS);

    let mut out = String::with_capacity(96 * (layers + 10));
    out.push_str("KURUCZ\n");
    out.push_str(&format!("Teff= {}   log g= {:.2}\n", params.teff.trunc() as i64, params.logg));
    out.push_str(&format!("NTAU        {layers}\n"));

    for l in 0..layers {
        let mut fields: Vec<String> = Vec::with_capacity(cols);
        for c in 0..cols {
            let v = model.layers[(l, c)];
            fields.push(match c {
                0 => format!("{:>15}", format_exp(v, 8, true)),
                1 => format!("{v:8.1}"),
                _ => format_exp(v, 3, true),
            });
        }
        out.push_str(&fields.join(" "));
        out.push('\n');
    }

    // Microturbulence in cm/s.
    out.push_str(&format!("    {}\n", format_exp(params.vt * 1e5, 3, false)));
    out.push_str(&format!("NATOMS     1  {:.2}\n", params.feh));
    out.push_str(&format!("      26.0   {:.2}\n", SOLAR_FE + params.feh));
    out.push_str(MOLECULES);
    out.push('\n');
    out
}

pub fn write_kurucz(path: &Path, model: &InterpolatedModel, params: &ParameterVector) -> Result<(), JobError> {
    std::fs::write(path, kurucz_text(model, params))
        .map_err(|e| JobError::io(format!("writing model '{}'", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    #[test]
    fn exponent_format_matches_c_printf() {
        assert_eq!(format_exp(1.23456789e-3, 8, true), "1.23456789E-03");
        assert_eq!(format_exp(150000.0, 3, false), "1.500e+05");
        assert_eq!(format_exp(0.0, 3, true), "0.000E+00");
        assert_eq!(format_exp(-2.5e120, 3, true), "-2.500E+120");
    }

    #[test]
    fn deck_layout() {
        let layers = DMatrix::from_row_slice(
            2,
            8,
            &[
                6.8e-3, 3662.1, 6.8e1, 6.4e9, 4.3e-4, 0.0, 0.0, 99.0, //
                8.9e-3, 3680.4, 8.9e1, 8.1e9, 5.0e-4, 0.0, 0.0, 99.0,
            ],
        );
        let model = InterpolatedModel {
            teff: 5777.8,
            logg: 4.44,
            feh: -0.1,
            layers,
        };
        let params = ParameterVector::new(5777.8, 4.44, -0.1, 1.2);
        let text = kurucz_text(&model, &params);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "KURUCZ");
        assert_eq!(lines[1], "Teff= 5777   log g= 4.44");
        assert_eq!(lines[2], "NTAU        2");
        assert_eq!(
            lines[3],
            " 6.80000000E-03   3662.1 6.800E+01 6.400E+09 4.300E-04 0.000E+00 0.000E+00"
        );
        assert_eq!(lines[5], "    1.200e+05");
        assert_eq!(lines[6], "NATOMS     1  -0.10");
        assert_eq!(lines[7], "      26.0   7.37");
        assert_eq!(lines[8], "NMOL      19");
        assert_eq!(lines.len(), 12);
    }
}
