//! Noise models for observed k-space magnitudes.
//!
//! Both families describe each bin by a mean and a variance. The Gaussian model takes the observed
//! magnitude at face value. The Rician model removes the magnitude bias of complex Gaussian noise
//! and reports the Rician variance through the correction factor of Koay and Basser (2006).

use crate::error::{BifsError, Result};
use crate::grid::FrequencyGrid;
use log::debug;
use ndarray::{ArrayD, Zip};
use rustfft::num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::str::FromStr;

/// smallest variance a likelihood evaluation may report
pub const VARIANCE_FLOOR: f64 = 1e-12;

/// SNR above which the Rician variance is taken at its Gaussian limit
const RICIAN_GAUSSIAN_LIMIT: f64 = 8.;

/// fraction of the largest grid magnitude above which bins are treated as noise only
const NOISE_BAND_FRACTION: f64 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LikelihoodKind {
    #[default]
    Gaussian,
    Rician,
}

impl FromStr for LikelihoodKind {
    type Err = BifsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gaussian" => Ok(Self::Gaussian),
            "rician" => Ok(Self::Rician),
            _ => Err(BifsError::invalid_configuration(format!("unknown likelihood '{s}'"))),
        }
    }
}

/// Likelihood family with its noise level. The noise standard deviation is given in image
/// space; when it is absent it is estimated from the outer band of k-space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Likelihood {
    Gaussian { noise_sd: Option<f64> },
    Rician { noise_sd: Option<f64> },
}

impl Default for Likelihood {
    fn default() -> Self {
        Self::Gaussian { noise_sd: None }
    }
}

/// per-bin likelihood parameters, noise_sd is the k-space noise level that produced them
#[derive(Debug, Clone, PartialEq)]
pub struct LikelihoodField {
    pub mean: ArrayD<f64>,
    pub variance: ArrayD<f64>,
    pub noise_sd: f64,
}

impl Likelihood {
    pub fn new(kind: LikelihoodKind, noise_sd: Option<f64>) -> Self {
        match kind {
            LikelihoodKind::Gaussian => Self::Gaussian { noise_sd },
            LikelihoodKind::Rician => Self::Rician { noise_sd },
        }
    }

    pub fn kind(&self) -> LikelihoodKind {
        match self {
            Self::Gaussian { .. } => LikelihoodKind::Gaussian,
            Self::Rician { .. } => LikelihoodKind::Rician,
        }
    }

    pub fn noise_sd(&self) -> Option<f64> {
        match *self {
            Self::Gaussian { noise_sd } | Self::Rician { noise_sd } => noise_sd,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.noise_sd() {
            Some(sd) if !(sd.is_finite() && sd >= 0.) => Err(BifsError::invalid_configuration(
                format!("noise standard deviation must be non-negative and finite, got {sd}"),
            )),
            _ => Ok(()),
        }
    }

    /// evaluates the model on observed k-space. noise_gain converts an image-space noise level
    /// to k-space units for the transform in use.
    pub fn evaluate(&self, k_space: &ArrayD<Complex64>, grid: &FrequencyGrid, noise_gain: f64) -> LikelihoodField {
        let noise_sd = match self.noise_sd() {
            Some(sd) => sd * noise_gain,
            None => {
                let sd = estimate_noise_sd(k_space, grid);
                debug!("estimated k-space noise sd {sd:.4e}");
                sd
            }
        };
        let magnitude = k_space.mapv(|v| v.norm());
        match self {
            Self::Gaussian { .. } => {
                let variance = ArrayD::from_elem(magnitude.raw_dim(), noise_sd * noise_sd);
                LikelihoodField { mean: magnitude, variance, noise_sd }
            }
            Self::Rician { .. } => {
                let (mean, variance) = rician_moments(&magnitude, noise_sd);
                LikelihoodField { mean, variance, noise_sd }
            }
        }
    }
}

/// Rician mean and variance for observed magnitudes. noise_sd is the k-space noise level, the
/// per-component scale of the complex noise is noise_sd / sqrt(2).
fn rician_moments(magnitude: &ArrayD<f64>, noise_sd: f64) -> (ArrayD<f64>, ArrayD<f64>) {
    let sigma = noise_sd / 2f64.sqrt();
    let mut mean = ArrayD::zeros(magnitude.raw_dim());
    let mut variance = ArrayD::zeros(magnitude.raw_dim());
    if sigma <= 0. {
        mean.assign(magnitude);
        variance.fill(VARIANCE_FLOOR);
        return (mean, variance);
    }
    let sigma_sq = sigma * sigma;
    Zip::from(&mut mean).and(&mut variance).and(magnitude).par_for_each(|mu, var, &m| {
        *mu = (m * m - 2. * sigma_sq).max(0.).sqrt();
        *var = (sigma_sq * rician_correction(*mu / sigma)).max(VARIANCE_FLOOR);
    });
    let clamped = variance.iter().filter(|&&v| v <= VARIANCE_FLOOR).count();
    if clamped > 0 {
        debug!("{clamped} rician variances clamped to {VARIANCE_FLOOR:e}");
    }
    (mean, variance)
}

/// ratio of the Rician variance to the per-component noise variance at signal-to-noise theta
pub fn rician_correction(theta: f64) -> f64 {
    if theta > RICIAN_GAUSSIAN_LIMIT {
        return 1.;
    }
    let t2 = theta * theta;
    let x = t2 / 4.;
    let b = (2. + t2) * bessel_i0e(x) + t2 * bessel_i1e(x);
    2. + t2 - PI / 8. * b * b
}

// exponentially scaled modified Bessel functions, polynomial fits from Abramowitz and Stegun 9.8

fn bessel_i0e(x: f64) -> f64 {
    let ax = x.abs();
    if ax < 3.75 {
        let y = (x / 3.75).powi(2);
        let i0 = 1. + y * (3.5156229 + y * (3.0899424 + y * (1.2067492
            + y * (0.2659732 + y * (0.0360768 + y * 0.0045813)))));
        i0 * (-ax).exp()
    } else {
        let y = 3.75 / ax;
        (0.39894228 + y * (0.01328592 + y * (0.00225319 + y * (-0.00157565 + y * (0.00916281
            + y * (-0.02057706 + y * (0.02635537 + y * (-0.01647633 + y * 0.00392377)))))))) / ax.sqrt()
    }
}

fn bessel_i1e(x: f64) -> f64 {
    let ax = x.abs();
    let v = if ax < 3.75 {
        let y = (x / 3.75).powi(2);
        let i1 = ax * (0.5 + y * (0.87890594 + y * (0.51498869 + y * (0.15084934
            + y * (0.02658733 + y * (0.00301532 + y * 0.00032411))))));
        i1 * (-ax).exp()
    } else {
        let y = 3.75 / ax;
        (0.39894228 + y * (-0.03988024 + y * (-0.00362018 + y * (0.00163801 + y * (-0.01031555
            + y * (0.02282967 + y * (-0.02895312 + y * (0.01787654 - y * 0.00420059)))))))) / ax.sqrt()
    };
    if x < 0. { -v } else { v }
}

/// Estimates the k-space noise standard deviation from the median magnitude of the outer
/// frequency band, where magnitudes of complex white noise are Rayleigh distributed with
/// median sd * sqrt(ln 2). Returns 0 when the grid has no outer band.
pub fn estimate_noise_sd(k_space: &ArrayD<Complex64>, grid: &FrequencyGrid) -> f64 {
    let cutoff = NOISE_BAND_FRACTION * grid.max_magnitude();
    if cutoff <= 0. {
        return 0.;
    }
    let mut outer: Vec<f64> = k_space.iter().zip(grid.magnitude().iter())
        .filter(|(_, &f)| f >= cutoff)
        .map(|(v, _)| v.norm())
        .collect();
    if outer.is_empty() {
        return 0.;
    }
    outer.sort_by(|a, b| a.total_cmp(b));
    let n = outer.len();
    let median = if n % 2 == 1 {
        outer[n / 2]
    } else {
        0.5 * (outer[n / 2 - 1] + outer[n / 2])
    };
    median / 2f64.ln().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::FftTransform;
    use approx::assert_abs_diff_eq;
    use ndarray::IxDyn;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn gaussian_noise(shape: &[usize], sd: f64, seed: u64) -> ArrayD<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0., sd).unwrap();
        ArrayD::from_shape_simple_fn(IxDyn(shape), || normal.sample(&mut rng))
    }

    #[test]
    fn rician_correction_limits() {
        assert_abs_diff_eq!(rician_correction(0.), 2. - PI / 2., epsilon = 1e-6);
        let mid = rician_correction(2.);
        assert!(mid > 2. - PI / 2. && mid < 1.);
        let high = rician_correction(7.9);
        assert!(high > 0.97 && high < 1.01, "xi(7.9) = {high}");
        assert_eq!(rician_correction(50.), 1.);
    }

    #[test]
    fn bessel_values() {
        // I0(1) = 1.2660659, I1(1) = 0.5651591, I0(5) = 27.239872
        assert_abs_diff_eq!(bessel_i0e(1.) * 1f64.exp(), 1.2660659, epsilon = 1e-6);
        assert_abs_diff_eq!(bessel_i1e(1.) * 1f64.exp(), 0.5651591, epsilon = 1e-6);
        assert_abs_diff_eq!(bessel_i0e(5.) * 5f64.exp(), 27.239872, epsilon = 1e-4);
    }

    #[test]
    fn gaussian_uses_supplied_noise() {
        let k = ArrayD::from_shape_vec(IxDyn(&[4]), vec![
            Complex64::new(3., 4.), Complex64::new(0., 1.), Complex64::new(-2., 0.), Complex64::new(0., 0.),
        ]).unwrap();
        let grid = FrequencyGrid::new(&[4]);
        let field = Likelihood::Gaussian { noise_sd: Some(0.5) }.evaluate(&k, &grid, 2.);
        assert_eq!(field.mean.as_slice().unwrap(), &[5., 1., 2., 0.]);
        assert!(field.variance.iter().all(|&v| v == 1.));
        assert_eq!(field.noise_sd, 1.);
    }

    #[test]
    fn rician_mean_is_bias_corrected_and_variance_positive() {
        let k = ArrayD::from_shape_vec(IxDyn(&[3]), vec![
            Complex64::new(10., 0.), Complex64::new(0.5, 0.), Complex64::new(0., 0.),
        ]).unwrap();
        let grid = FrequencyGrid::new(&[3]);
        let field = Likelihood::Rician { noise_sd: Some(2f64.sqrt()) }.evaluate(&k, &grid, 1.);
        // sigma = 1, mean = sqrt(100 - 2)
        assert_abs_diff_eq!(field.mean[0], 98f64.sqrt(), epsilon = 1e-12);
        assert_eq!(field.mean[1], 0.);
        assert_eq!(field.mean[2], 0.);
        assert_abs_diff_eq!(field.variance[2], 2. - PI / 2., epsilon = 1e-6);
        assert!(field.variance.iter().all(|&v| v >= VARIANCE_FLOOR));
    }

    #[test]
    fn rician_without_noise_passes_magnitude_through() {
        let k = ArrayD::from_elem(IxDyn(&[2, 2]), Complex64::new(0., 3.));
        let grid = FrequencyGrid::new(&[2, 2]);
        let field = Likelihood::Rician { noise_sd: Some(0.) }.evaluate(&k, &grid, 1.);
        assert!(field.mean.iter().all(|&m| m == 3.));
        assert!(field.variance.iter().all(|&v| v == VARIANCE_FLOOR));
    }

    #[test]
    fn noise_estimate_recovers_white_noise_level() {
        let noise = gaussian_noise(&[128, 128], 2., 11);
        let grid = FrequencyGrid::new(&[128, 128]);
        let k = FftTransform::default().forward(&noise);
        let sd = estimate_noise_sd(&k, &grid);
        assert!((sd - 2.).abs() < 0.2, "estimated {sd}");
    }

    #[test]
    fn validation_and_names() {
        assert!(Likelihood::Gaussian { noise_sd: Some(-1.) }.validate().is_err());
        assert!(Likelihood::Rician { noise_sd: None }.validate().is_ok());
        assert_eq!("Rician".parse::<LikelihoodKind>().unwrap(), LikelihoodKind::Rician);
        assert!("Poisson".parse::<LikelihoodKind>().is_err());
        assert_eq!(Likelihood::new(LikelihoodKind::Rician, Some(1.)).kind(), LikelihoodKind::Rician);
    }
}
