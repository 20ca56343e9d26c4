//! Rank-based distribution matching onto a pool of reference voxels.

use crate::data_import::{read_raw_volume, write_raw_volume, RawDataType};
use crate::error::{BifsError, Result};
use ndarray::{ArrayD, IxDyn};
use std::fs;
use std::path::Path;

/// reference intensities, sorted ascending
#[derive(Debug, Clone, PartialEq)]
pub struct ReferencePool {
    values: Vec<f64>,
}

impl ReferencePool {
    pub fn new(mut values: Vec<f64>) -> Result<Self> {
        if values.is_empty() {
            return Err(BifsError::invalid_configuration("reference voxel pool is empty"));
        }
        if values.iter().any(|v| v.is_nan()) {
            return Err(BifsError::invalid_configuration("reference voxel pool contains NaN"));
        }
        values.sort_by(|a, b| a.total_cmp(b));
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn min(&self) -> f64 {
        self.values[0]
    }

    pub fn max(&self) -> f64 {
        self.values[self.values.len() - 1]
    }

    /// writes the sorted pool as little endian f64 samples
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let v = ArrayD::from_shape_vec(IxDyn(&[self.values.len()]), self.values.clone())
            .map_err(|e| BifsError::invalid_configuration(e.to_string()))?;
        write_raw_volume(path, &v, RawDataType::F64LittleEndian)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let n = fs::metadata(path.as_ref())?.len() as usize / RawDataType::F64LittleEndian.size();
        let v = read_raw_volume(path, &[n], RawDataType::F64LittleEndian)?;
        Self::new(v.into_raw_vec_and_offset().0)
    }
}

/// Gives every voxel the pool value at its rank. The voxel at rank r (stable ordering, ties keep
/// their logical order) receives pool[round(r * |pool| / |input|)], clamped to the last entry.
pub fn match_distribution(input: &ArrayD<f64>, pool: &ReferencePool) -> ArrayD<f64> {
    let n = input.len();
    let values: Vec<f64> = input.iter().cloned().collect();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let ratio = pool.len() as f64 / n.max(1) as f64;
    let last = pool.len() - 1;
    let mut matched = vec![0.; n];
    order.iter().enumerate().for_each(|(rank, &src)| {
        let idx = ((rank as f64 * ratio).round() as usize).min(last);
        matched[src] = pool.values[idx];
    });

    // values are in logical order, lay them back out in the input's shape and memory order
    let mut out = input.clone();
    out.iter_mut().zip(matched).for_each(|(o, m)| *o = m);
    out
}

/// zeroes every voxel where the mask is zero
pub fn apply_mask(image: &mut ArrayD<f64>, mask: &ArrayD<f64>) -> Result<()> {
    if image.shape() != mask.shape() {
        return Err(BifsError::shape_mismatch(image.shape(), mask.shape()));
    }
    image.zip_mut_with(mask, |v, &m| {
        if m == 0. {
            *v = 0.;
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{IxDyn, ShapeBuilder};

    fn arr(v: Vec<f64>) -> ArrayD<f64> {
        ArrayD::from_shape_vec(IxDyn(&[v.len()]), v).unwrap()
    }

    #[test]
    fn preserves_rank_order_within_pool_range() {
        let pool = ReferencePool::new(vec![2., 0., 1.]).unwrap();
        let out = match_distribution(&arr(vec![5., 1., 3.]), &pool);
        assert_eq!(out.as_slice().unwrap(), &[2., 0., 1.]);
    }

    #[test]
    fn ties_keep_logical_order() {
        let pool = ReferencePool::new(vec![10., 20., 30.]).unwrap();
        let out = match_distribution(&arr(vec![2., 1., 2.]), &pool);
        assert_eq!(out.as_slice().unwrap(), &[20., 10., 30.]);
    }

    #[test]
    fn larger_pool_is_subsampled() {
        let pool = ReferencePool::new((0..100).map(|v| v as f64).collect()).unwrap();
        let out = match_distribution(&arr(vec![0.3, 0.1, 0.4, 0.2]), &pool);
        // ranks 0..4 map to pool[0], pool[25], pool[50], pool[75]
        assert_eq!(out.as_slice().unwrap(), &[50., 0., 75., 25.]);
    }

    #[test]
    fn smaller_pool_is_clamped() {
        let pool = ReferencePool::new(vec![-1., 1.]).unwrap();
        let input = arr((0..7).map(|v| v as f64).collect());
        let out = match_distribution(&input, &pool);
        assert!(out.iter().all(|&v| v >= pool.min() && v <= pool.max()));
        assert_eq!(out[6], 1.);
        assert_eq!(out[0], -1.);
    }

    #[test]
    fn column_major_input_keeps_its_layout() {
        let input = ArrayD::from_shape_vec(IxDyn(&[2, 2]).f(), vec![4., 3., 2., 1.]).unwrap();
        let pool = ReferencePool::new(vec![10., 20., 30., 40.]).unwrap();
        let out = match_distribution(&input, &pool);
        assert_eq!(out[[0, 0]], 40.);
        assert_eq!(out[[1, 0]], 30.);
        assert_eq!(out[[0, 1]], 20.);
        assert_eq!(out[[1, 1]], 10.);
    }

    #[test]
    fn masking() {
        let mut image = arr(vec![1., 2., 3.]);
        apply_mask(&mut image, &arr(vec![1., 0., 2.])).unwrap();
        assert_eq!(image.as_slice().unwrap(), &[1., 0., 3.]);
        assert!(apply_mask(&mut image, &arr(vec![1., 1.])).is_err());
    }

    #[test]
    fn pool_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.pool");
        let pool = ReferencePool::new(vec![3., -1., 2.5, 0.]).unwrap();
        pool.save(&path).unwrap();
        assert_eq!(ReferencePool::load(&path).unwrap(), pool);
    }

    #[test]
    fn invalid_pools() {
        assert!(ReferencePool::new(vec![]).is_err());
        assert!(ReferencePool::new(vec![1., f64::NAN]).is_err());
    }
}
