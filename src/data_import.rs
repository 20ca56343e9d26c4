use crate::error::{BifsError, Result};
use crate::scanner::VolumeSource;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use clap::ValueEnum;
use log::debug;
use ndarray::{ArrayD, IxDyn, ShapeBuilder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// sample encodings of headerless volume files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RawDataType {
    /// signed 16 bit, big endian (civm raw slices)
    #[default]
    I16BigEndian,
    F32LittleEndian,
    F64LittleEndian,
}

impl RawDataType {
    pub fn size(&self) -> usize {
        match self {
            Self::I16BigEndian => size_of::<i16>(),
            Self::F32LittleEndian => size_of::<f32>(),
            Self::F64LittleEndian => size_of::<f64>(),
        }
    }
}

/// reads a headerless volume stored in column-major order (first index fastest)
pub fn read_raw_volume(file: impl AsRef<Path>, dims: &[usize], dtype: RawDataType) -> Result<ArrayD<f64>> {
    let file = file.as_ref();
    let id = file.display().to_string();
    let bytes = fs::read(file).map_err(|e| BifsError::unreadable(&id, e.to_string()))?;
    let n: usize = dims.iter().product();
    if bytes.len() != n * dtype.size() {
        return Err(BifsError::unreadable(
            &id,
            format!("expected {} bytes for {:?} {:?}, found {}", n * dtype.size(), dims, dtype, bytes.len()),
        ));
    }
    let values: Vec<f64> = match dtype {
        RawDataType::I16BigEndian => {
            let mut dst = vec![0i16; n];
            BigEndian::read_i16_into(&bytes, &mut dst);
            dst.into_iter().map(f64::from).collect()
        }
        RawDataType::F32LittleEndian => {
            let mut dst = vec![0f32; n];
            LittleEndian::read_f32_into(&bytes, &mut dst);
            dst.into_iter().map(f64::from).collect()
        }
        RawDataType::F64LittleEndian => {
            let mut dst = vec![0f64; n];
            LittleEndian::read_f64_into(&bytes, &mut dst);
            dst
        }
    };
    if values.iter().any(|v| !v.is_finite()) {
        return Err(BifsError::unreadable(&id, "volume contains non-finite samples"));
    }
    ArrayD::from_shape_vec(IxDyn(dims).f(), values).map_err(|e| BifsError::unreadable(&id, e.to_string()))
}

/// writes a volume in column-major order, i16 samples are rounded and saturated
pub fn write_raw_volume(file: impl AsRef<Path>, volume: &ArrayD<f64>, dtype: RawDataType) -> Result<()> {
    // iterating the reversed-axis view visits the first index fastest
    let col_maj = volume.t();
    let mut bytes = vec![0u8; volume.len() * dtype.size()];
    match dtype {
        RawDataType::I16BigEndian => {
            let src: Vec<i16> = col_maj.iter().map(|&v| v.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16).collect();
            BigEndian::write_i16_into(&src, &mut bytes);
        }
        RawDataType::F32LittleEndian => {
            let src: Vec<f32> = col_maj.iter().map(|&v| v as f32).collect();
            LittleEndian::write_f32_into(&src, &mut bytes);
        }
        RawDataType::F64LittleEndian => {
            let src: Vec<f64> = col_maj.iter().cloned().collect();
            LittleEndian::write_f64_into(&src, &mut bytes);
        }
    }
    fs::write(file, bytes)?;
    Ok(())
}

/// reference volumes found by a glob pattern, all stored with the same dims and encoding
#[derive(Debug, Clone)]
pub struct GlobVolumeSource {
    pattern: String,
    dims: Vec<usize>,
    dtype: RawDataType,
}

impl GlobVolumeSource {
    pub fn new(pattern: impl Into<String>, dims: &[usize], dtype: RawDataType) -> Result<Self> {
        let pattern = pattern.into();
        glob::Pattern::new(&pattern)?;
        if dims.is_empty() || dims.iter().any(|&d| d == 0) {
            return Err(BifsError::invalid_configuration(format!("invalid volume dims {dims:?}")));
        }
        Ok(Self { pattern, dims: dims.to_vec(), dtype })
    }
}

impl VolumeSource for GlobVolumeSource {
    fn candidates(&self) -> Result<Vec<String>> {
        let mut paths = glob::glob(&self.pattern)?
            .filter_map(|entry| match entry {
                Ok(p) => Some(p.display().to_string()),
                Err(e) => {
                    debug!("skipping unreadable entry: {e}");
                    None
                }
            })
            .collect::<Vec<_>>();
        paths.sort();
        Ok(paths)
    }

    fn read(&self, id: &str) -> Result<ArrayD<f64>> {
        read_raw_volume(id, &self.dims, self.dtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    fn ramp(dims: &[usize]) -> ArrayD<f64> {
        ArrayD::from_shape_fn(IxDyn(dims), |i| (i[0] + 10 * i[1] + 100 * i[2]) as f64 - 50.)
    }

    #[test]
    fn raw_volume_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let dims = [4, 3, 2];
        let vol = ramp(&dims);
        for dtype in [RawDataType::I16BigEndian, RawDataType::F32LittleEndian, RawDataType::F64LittleEndian] {
            let path = dir.path().join(format!("vol_{dtype:?}.raw"));
            write_raw_volume(&path, &vol, dtype).unwrap();
            assert_eq!(fs::metadata(&path).unwrap().len() as usize, 24 * dtype.size());
            let back = read_raw_volume(&path, &dims, dtype).unwrap();
            assert_eq!(back, vol);
        }
    }

    #[test]
    fn first_index_is_fastest_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slice.raw");
        let mut f = File::create(&path).unwrap();
        for v in [1i16, 2, 3, -4, 5, 6] {
            f.write_all(&v.to_be_bytes()).unwrap();
        }
        drop(f);
        let vol = read_raw_volume(&path, &[2, 3], RawDataType::I16BigEndian).unwrap();
        assert_eq!(vol[[0, 0]], 1.);
        assert_eq!(vol[[1, 0]], 2.);
        assert_eq!(vol[[0, 1]], 3.);
        assert_eq!(vol[[1, 1]], -4.);
        assert_eq!(vol[[1, 2]], 6.);
    }

    #[test]
    fn short_files_are_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.raw");
        fs::write(&path, [0u8; 10]).unwrap();
        let err = read_raw_volume(&path, &[2, 3], RawDataType::I16BigEndian).unwrap_err();
        assert!(matches!(err, BifsError::UnreadableVolume { .. }));
        let err = read_raw_volume(dir.path().join("missing.raw"), &[2], RawDataType::F64LittleEndian).unwrap_err();
        assert!(matches!(err, BifsError::UnreadableVolume { .. }));
    }

    #[test]
    fn glob_source_lists_sorted_matches() {
        let dir = tempfile::tempdir().unwrap();
        let dims = [4, 3, 2];
        for name in ["b.raw", "a.raw", "c.txt"] {
            write_raw_volume(dir.path().join(name), &ramp(&dims), RawDataType::F32LittleEndian).unwrap();
        }
        let pattern = format!("{}/*.raw", dir.path().display());
        let source = GlobVolumeSource::new(pattern, &dims, RawDataType::F32LittleEndian).unwrap();
        let ids = source.candidates().unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids[0].ends_with("a.raw") && ids[1].ends_with("b.raw"));
        assert_eq!(source.read(&ids[0]).unwrap(), ramp(&dims));
        assert!(GlobVolumeSource::new("[", &dims, RawDataType::F32LittleEndian).is_err());
        assert!(GlobVolumeSource::new("*.raw", &[4, 0], RawDataType::F32LittleEndian).is_err());
    }
}
