// Forward and inverse frequency transforms between image space and k-space
// n-dimensional transforms are built from 1-D rustfft plans applied lane by lane along each axis

use clap::ValueEnum;
use ndarray::{ArrayD, Axis, Zip};
use rustfft::num_complex::Complex64;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FftDirection {
    Forward,
    Inverse,
}

/// scaling convention of the transform pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationType {
    /// 1/sqrt(N) on both directions, energy preserving
    #[default]
    Unitary,
    /// no scaling forward, 1/N on the inverse (numpy convention)
    Backward,
}

impl NormalizationType {
    fn scale(&self, n: usize, direction: FftDirection) -> f64 {
        match (self, direction) {
            (Self::Unitary, _) => 1. / (n as f64).sqrt(),
            (Self::Backward, FftDirection::Forward) => 1.,
            (Self::Backward, FftDirection::Inverse) => 1. / n as f64,
        }
    }

    /// ratio between the noise standard deviation of a k-space bin and the image-space
    /// noise standard deviation for white noise on an array of n elements
    pub fn noise_gain(&self, n: usize) -> f64 {
        match self {
            Self::Unitary => 1.,
            Self::Backward => (n as f64).sqrt(),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Unitary => 0,
            Self::Backward => 1,
        }
    }

    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Unitary),
            1 => Some(Self::Backward),
            _ => None,
        }
    }
}

/// in-place n-dimensional fft over every axis of x
pub fn fftn(x: &mut ArrayD<Complex64>, direction: FftDirection, normalization: NormalizationType) {
    if x.is_empty() {
        return;
    }
    let mut planner = FftPlanner::<f64>::new();
    for axis in 0..x.ndim() {
        let n = x.len_of(Axis(axis));
        if n < 2 {
            continue;
        }
        let fft = match direction {
            FftDirection::Forward => planner.plan_fft_forward(n),
            FftDirection::Inverse => planner.plan_fft_inverse(n),
        };
        // lanes along an axis are independent 1-D transforms
        Zip::from(x.lanes_mut(Axis(axis))).par_for_each(|mut lane| {
            let mut buffer = lane.to_vec();
            fft.process(&mut buffer);
            lane.iter_mut().zip(buffer).for_each(|(dst, src)| *dst = src);
        });
    }
    let scale = normalization.scale(x.len(), direction);
    if scale != 1. {
        x.par_mapv_inplace(|v| v * scale);
    }
}

/// The transform adapter used by the engine and the empirical scanner. Real images go in,
/// complex k-space of the same shape comes out, and the inverse keeps only the real part.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FftTransform {
    pub normalization: NormalizationType,
}

impl FftTransform {
    pub fn new(normalization: NormalizationType) -> Self {
        Self { normalization }
    }

    pub fn forward(&self, image: &ArrayD<f64>) -> ArrayD<Complex64> {
        let mut k = image.mapv(|v| Complex64::new(v, 0.));
        fftn(&mut k, FftDirection::Forward, self.normalization);
        k
    }

    pub fn inverse(&self, k_space: &ArrayD<Complex64>) -> ArrayD<f64> {
        let mut x = k_space.clone();
        fftn(&mut x, FftDirection::Inverse, self.normalization);
        x.mapv(|v| v.re)
    }

    /// k-space magnitude of an image, the quantity the priors describe
    pub fn modulus(&self, image: &ArrayD<f64>) -> ArrayD<f64> {
        self.forward(image).mapv(|v| v.norm())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{ArrayD, IxDyn, ShapeBuilder};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_image(shape: &[usize], seed: u64) -> ArrayD<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        ArrayD::from_shape_simple_fn(IxDyn(shape), || rng.random::<f64>() * 10. - 5.)
    }

    #[test]
    fn round_trip_unitary() {
        for shape in [vec![50], vec![16, 9], vec![6, 5, 4]] {
            let x = random_image(&shape, 7);
            let t = FftTransform::default();
            let y = t.inverse(&t.forward(&x));
            assert_eq!(y.shape(), x.shape());
            x.iter().zip(y.iter()).for_each(|(a, b)| assert_abs_diff_eq!(a, b, epsilon = 1e-10));
        }
    }

    #[test]
    fn round_trip_backward_col_maj() {
        let shape = [8, 3, 5];
        let x = ArrayD::from_shape_fn(IxDyn(&shape).f(), |i| (i[0] + 2 * i[1]) as f64 - i[2] as f64);
        let t = FftTransform::new(NormalizationType::Backward);
        let y = t.inverse(&t.forward(&x));
        x.iter().zip(y.iter()).for_each(|(a, b)| assert_abs_diff_eq!(a, b, epsilon = 1e-10));
    }

    #[test]
    fn dc_bin_is_scaled_sum() {
        let x = ArrayD::from_elem(IxDyn(&[4, 4]), 2.0);
        let k = FftTransform::default().forward(&x);
        // 32 / sqrt(16)
        assert_abs_diff_eq!(k[[0, 0]].re, 8.0, epsilon = 1e-12);
        assert_abs_diff_eq!(k[[1, 2]].norm(), 0.0, epsilon = 1e-12);

        let k = FftTransform::new(NormalizationType::Backward).forward(&x);
        assert_abs_diff_eq!(k[[0, 0]].re, 32.0, epsilon = 1e-12);
    }

    #[test]
    fn unitary_preserves_energy() {
        let x = random_image(&[12, 10], 3);
        let k = FftTransform::default().forward(&x);
        let e_img: f64 = x.iter().map(|v| v * v).sum();
        let e_ksp: f64 = k.iter().map(|v| v.norm_sqr()).sum();
        assert_abs_diff_eq!(e_img, e_ksp, epsilon = 1e-8);
    }

    #[test]
    fn normalization_tags() {
        for n in [NormalizationType::Unitary, NormalizationType::Backward] {
            assert_eq!(NormalizationType::from_u8(n.as_u8()), Some(n));
        }
        assert_eq!(NormalizationType::from_u8(9), None);
    }
}
