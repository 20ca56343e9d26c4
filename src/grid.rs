use crate::fftshift::frequency_bin;
use ndarray::{ArrayD, Dimension, IxDyn};

/// Distance of every k-space bin from the zero-frequency origin, in units of frequency bins.
/// Bins follow the unshifted DFT ordering so the grid folds around both ends of each axis.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyGrid {
    magnitude: ArrayD<f64>,
}

impl FrequencyGrid {
    pub fn new(shape: &[usize]) -> Self {
        let magnitude = ArrayD::from_shape_fn(IxDyn(shape), |idx| {
            idx.slice().iter().zip(shape)
                .map(|(&i, &n)| frequency_bin(i, n).pow(2) as f64)
                .sum::<f64>()
                .sqrt()
        });
        Self { magnitude }
    }

    pub fn shape(&self) -> &[usize] {
        self.magnitude.shape()
    }

    pub fn magnitude(&self) -> &ArrayD<f64> {
        &self.magnitude
    }

    pub fn len(&self) -> usize {
        self.magnitude.len()
    }

    pub fn is_empty(&self) -> bool {
        self.magnitude.is_empty()
    }

    /// largest frequency magnitude on the grid, 0 for a single bin
    pub fn max_magnitude(&self) -> f64 {
        self.magnitude.iter().cloned().fold(0., f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn folds_around_axis_ends() {
        let g = FrequencyGrid::new(&[6]);
        assert_eq!(g.magnitude().as_slice().unwrap(), &[0., 1., 2., 3., 2., 1.]);
        assert_eq!(g.max_magnitude(), 3.);
    }

    #[test]
    fn euclidean_in_2d() {
        let g = FrequencyGrid::new(&[8, 5]);
        assert_eq!(g.shape(), &[8, 5]);
        assert_eq!(g.magnitude()[[0, 0]], 0.);
        assert_abs_diff_eq!(g.magnitude()[[7, 4]], 2f64.sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(g.magnitude()[[3, 2]], 13f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn single_bin_grid() {
        let g = FrequencyGrid::new(&[1, 1]);
        assert_eq!(g.len(), 1);
        assert_eq!(g.max_magnitude(), 0.);
    }
}
