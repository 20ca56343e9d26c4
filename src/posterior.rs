use crate::likelihood::LikelihoodField;
use crate::prior::PriorField;
use log::warn;
use ndarray::{ArrayD, Zip};
use rustfft::num_complex::Complex64;

/// MAP estimate of a single bin from likelihood and prior moments.
/// Returns None when the variances do not give a usable weighting.
pub fn map_bin(lik_mean: f64, lik_var: f64, prior_mean: f64, prior_var: f64) -> Option<f64> {
    if prior_var == f64::INFINITY && lik_var.is_finite() {
        return Some(lik_mean);
    }
    if lik_var == f64::INFINITY && prior_var.is_finite() {
        return Some(prior_mean);
    }
    let denom = lik_var + prior_var;
    if !denom.is_finite() || denom <= 0. {
        return None;
    }
    let v = (lik_mean * prior_var + prior_mean * lik_var) / denom;
    v.is_finite().then_some(v)
}

/// posterior modulus and the modified k-space built from it
#[derive(Debug, Clone, PartialEq)]
pub struct Posterior {
    pub modulus: ArrayD<f64>,
    pub k_space: ArrayD<Complex64>,
    /// bins that fell back to the likelihood mean
    pub degenerate_bins: usize,
}

impl Posterior {
    /// Combines per-bin moments and puts the posterior modulus back on the observed phase.
    /// Degenerate bins keep the likelihood mean.
    pub fn combine(observed: &ArrayD<Complex64>, likelihood: &LikelihoodField, prior: &PriorField) -> Self {
        let mut modulus = ArrayD::zeros(observed.raw_dim());
        let mut degenerate = ArrayD::from_elem(observed.raw_dim(), false);
        Zip::from(&mut modulus)
            .and(&mut degenerate)
            .and(&likelihood.mean)
            .and(&likelihood.variance)
            .and(&prior.mean)
            .and(&prior.variance)
            .par_for_each(|m, d, &ml, &vl, &mp, &vp| match map_bin(ml, vl, mp, vp) {
                Some(v) => *m = v,
                None => {
                    *m = ml;
                    *d = true;
                }
            });
        let degenerate_bins = degenerate.iter().filter(|&&d| d).count();
        if degenerate_bins > 0 {
            warn!("{degenerate_bins} k-space bins had degenerate variances, kept the likelihood mean");
        }

        let mut k_space = observed.clone();
        Zip::from(&mut k_space).and(&modulus).par_for_each(|k, &m| {
            *k = Complex64::from_polar(m, k.arg());
        });
        Self { modulus, k_space, degenerate_bins }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::IxDyn;

    #[test]
    fn weighted_combination() {
        // equal variances give the midpoint
        assert_eq!(map_bin(4., 1., 2., 1.), Some(3.));
        // prior three times as wide pulls toward the likelihood
        assert_abs_diff_eq!(map_bin(4., 1., 0., 3.).unwrap(), 3., epsilon = 1e-12);
    }

    #[test]
    fn variance_limits() {
        assert_eq!(map_bin(5., 1., -2., f64::INFINITY), Some(5.));
        assert_eq!(map_bin(5., f64::INFINITY, -2., 1.), Some(-2.));
        let near = map_bin(5., 1e-12, -2., 1e12).unwrap();
        assert_abs_diff_eq!(near, 5., epsilon = 1e-9);
        let far = map_bin(5., 1e12, -2., 1e-12).unwrap();
        assert_abs_diff_eq!(far, -2., epsilon = 1e-9);
    }

    #[test]
    fn degenerate_bins() {
        assert_eq!(map_bin(1., 0., 2., 0.), None);
        assert_eq!(map_bin(1., f64::NAN, 2., 1.), None);
        assert_eq!(map_bin(1., f64::INFINITY, 2., f64::INFINITY), None);
    }

    #[test]
    fn combine_keeps_phase_and_counts_fallbacks() {
        let shape = IxDyn(&[3]);
        let observed = ArrayD::from_shape_vec(shape.clone(), vec![
            Complex64::new(0., 4.), Complex64::new(-3., 0.), Complex64::new(1., 1.),
        ]).unwrap();
        let likelihood = LikelihoodField {
            mean: observed.mapv(|v| v.norm()),
            variance: ArrayD::from_shape_vec(shape.clone(), vec![1., 1., 0.]).unwrap(),
            noise_sd: 1.,
        };
        let prior = PriorField {
            mean: ArrayD::zeros(shape.clone()),
            variance: ArrayD::from_shape_vec(shape, vec![1., 3., 0.]).unwrap(),
        };
        let p = Posterior::combine(&observed, &likelihood, &prior);
        assert_eq!(p.degenerate_bins, 1);
        assert_abs_diff_eq!(p.modulus[0], 2., epsilon = 1e-12);
        assert_abs_diff_eq!(p.modulus[1], 2.25, epsilon = 1e-12);
        assert_abs_diff_eq!(p.modulus[2], 2f64.sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(p.k_space[0].im, 2., epsilon = 1e-12);
        assert_abs_diff_eq!(p.k_space[0].re, 0., epsilon = 1e-12);
        assert_abs_diff_eq!(p.k_space[1].re, -2.25, epsilon = 1e-12);
        assert_abs_diff_eq!(p.k_space[2].re, 1., epsilon = 1e-12);
        assert_abs_diff_eq!(p.k_space[2].im, 1., epsilon = 1e-12);
    }
}
