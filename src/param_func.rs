//! Parameter-space functions: how prior strength falls off with frequency magnitude.

use crate::error::{BifsError, Result};
use crate::grid::FrequencyGrid;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// smallest value any parameter function may return, keeps prior variances strictly positive
pub const PARAM_FLOOR: f64 = 1e-12;

pub const DEFAULT_AMPLITUDE: f64 = 500.;
pub const DEFAULT_DECAY: f64 = 2.;
pub const DEFAULT_BAND_HIGH: f64 = 50.;
pub const DEFAULT_BAND_FLOOR: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamFunc {
    /// amplitude / (1 + |f|^decay)
    InversePowerDecay { amplitude: f64, decay: f64 },
    /// inverse power decay inside [band_low, band_high], floor outside
    BandedInversePowerDecay {
        amplitude: f64,
        decay: f64,
        band_low: f64,
        band_high: f64,
        floor: f64,
    },
    /// amplitude * max(0, 1 - |f| / f_max), f_max defaults to the largest grid magnitude
    LinearDecay {
        amplitude: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        f_max: Option<f64>,
    },
}

impl Default for ParamFunc {
    fn default() -> Self {
        Self::InversePowerDecay { amplitude: DEFAULT_AMPLITUDE, decay: DEFAULT_DECAY }
    }
}

impl ParamFunc {
    pub fn name(&self) -> &'static str {
        match self {
            Self::InversePowerDecay { .. } => "Inverse Power Decay",
            Self::BandedInversePowerDecay { .. } => "Banded Inverse Power Decay",
            Self::LinearDecay { .. } => "Linear Decay",
        }
    }

    /// peak value of the function, reached at the zero frequency
    pub fn peak(&self) -> f64 {
        match self {
            Self::InversePowerDecay { amplitude, .. }
            | Self::BandedInversePowerDecay { amplitude, .. }
            | Self::LinearDecay { amplitude, .. } => amplitude.max(PARAM_FLOOR),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let positive = |name: &str, v: f64| {
            if v.is_finite() && v > 0. {
                Ok(())
            } else {
                Err(BifsError::invalid_configuration(format!("{} of {} must be positive and finite, got {v}", name, self.name())))
            }
        };
        match *self {
            Self::InversePowerDecay { amplitude, decay } => {
                positive("amplitude", amplitude)?;
                positive("decay", decay)
            }
            Self::BandedInversePowerDecay { amplitude, decay, band_low, band_high, floor } => {
                positive("amplitude", amplitude)?;
                positive("decay", decay)?;
                positive("floor", floor)?;
                if !(band_low >= 0. && band_low < band_high) {
                    return Err(BifsError::invalid_configuration(format!(
                        "band must satisfy 0 <= low < high, got [{band_low}, {band_high}]"
                    )));
                }
                Ok(())
            }
            Self::LinearDecay { amplitude, f_max } => {
                positive("amplitude", amplitude)?;
                match f_max {
                    Some(f) => positive("f_max", f),
                    None => Ok(()),
                }
            }
        }
    }

    fn value(&self, f: f64, grid_max: f64) -> f64 {
        let v = match *self {
            Self::InversePowerDecay { amplitude, decay } => amplitude / (1. + f.powf(decay)),
            Self::BandedInversePowerDecay { amplitude, decay, band_low, band_high, floor } => {
                if f >= band_low && f <= band_high {
                    amplitude / (1. + f.powf(decay))
                } else {
                    floor
                }
            }
            Self::LinearDecay { amplitude, f_max } => {
                let f_max = f_max.unwrap_or(grid_max);
                if f_max > 0. {
                    amplitude * (1. - f / f_max).max(0.)
                } else {
                    amplitude
                }
            }
        };
        v.max(PARAM_FLOOR)
    }

    pub fn evaluate(&self, grid: &FrequencyGrid) -> ArrayD<f64> {
        let grid_max = grid.max_magnitude();
        grid.magnitude().mapv(|f| self.value(f, grid_max))
    }
}

impl FromStr for ParamFunc {
    type Err = BifsError;

    /// family names as used in parameter files, with default constants
    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_ascii_lowercase().replace(|c: char| c == '_' || c == '-', " ");
        match key.as_str() {
            "inverse power decay" => Ok(Self::default()),
            "banded inverse power decay" => Ok(Self::BandedInversePowerDecay {
                amplitude: DEFAULT_AMPLITUDE,
                decay: DEFAULT_DECAY,
                band_low: 0.,
                band_high: DEFAULT_BAND_HIGH,
                floor: DEFAULT_BAND_FLOOR,
            }),
            "linear decay" => Ok(Self::LinearDecay { amplitude: DEFAULT_AMPLITUDE, f_max: None }),
            _ => Err(BifsError::invalid_configuration(format!("unknown parameter function '{s}'"))),
        }
    }
}

impl fmt::Display for ParamFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn inverse_power_decay_values() {
        let g = FrequencyGrid::new(&[8]);
        let pf = ParamFunc::InversePowerDecay { amplitude: 10., decay: 2. };
        let v = pf.evaluate(&g);
        assert_abs_diff_eq!(v[0], 10., epsilon = 1e-12);
        assert_abs_diff_eq!(v[1], 5., epsilon = 1e-12);
        assert_abs_diff_eq!(v[2], 2., epsilon = 1e-12);
        assert_abs_diff_eq!(v[7], 5., epsilon = 1e-12);
    }

    #[test]
    fn banded_floors_outside_band() {
        let g = FrequencyGrid::new(&[10]);
        let pf = ParamFunc::BandedInversePowerDecay { amplitude: 4., decay: 1., band_low: 1., band_high: 3., floor: 1e-3 };
        let v = pf.evaluate(&g);
        assert_eq!(v[0], 1e-3);
        assert_abs_diff_eq!(v[1], 2., epsilon = 1e-12);
        assert_abs_diff_eq!(v[3], 1., epsilon = 1e-12);
        assert_eq!(v[4], 1e-3);
        assert_eq!(v[5], 1e-3);
    }

    #[test]
    fn linear_decay_defaults_to_grid_max_and_stays_positive() {
        let g = FrequencyGrid::new(&[9]);
        let pf = ParamFunc::LinearDecay { amplitude: 2., f_max: None };
        let v = pf.evaluate(&g);
        assert_abs_diff_eq!(v[0], 2., epsilon = 1e-12);
        assert_abs_diff_eq!(v[2], 1., epsilon = 1e-12);
        assert_eq!(v[4], PARAM_FLOOR);
        assert!(v.iter().all(|&x| x > 0.));

        let pf = ParamFunc::LinearDecay { amplitude: 2., f_max: Some(2.) };
        assert_eq!(pf.evaluate(&g)[3], PARAM_FLOOR);
    }

    #[test]
    fn parse_names() {
        assert_eq!("Inverse Power Decay".parse::<ParamFunc>().unwrap(), ParamFunc::default());
        assert!(matches!("linear_decay".parse::<ParamFunc>().unwrap(), ParamFunc::LinearDecay { .. }));
        assert!(matches!("Banded Inverse Power Decay".parse::<ParamFunc>().unwrap(), ParamFunc::BandedInversePowerDecay { .. }));
        let err = "Cubic Spline".parse::<ParamFunc>().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn validation() {
        assert!(ParamFunc::default().validate().is_ok());
        assert!(ParamFunc::InversePowerDecay { amplitude: -1., decay: 2. }.validate().is_err());
        assert!(ParamFunc::LinearDecay { amplitude: 1., f_max: Some(0.) }.validate().is_err());
        let bad_band = ParamFunc::BandedInversePowerDecay { amplitude: 1., decay: 2., band_low: 5., band_high: 2., floor: 1e-3 };
        assert!(bad_band.validate().is_err());
    }

    #[test]
    fn toml_round_trip() {
        let pf = ParamFunc::LinearDecay { amplitude: 3., f_max: Some(12.) };
        let s = toml::to_string(&pf).unwrap();
        assert!(s.contains("type = \"linear_decay\""));
        assert_eq!(toml::from_str::<ParamFunc>(&s).unwrap(), pf);
    }
}
