//! Per-bin k-space statistics gathered from reference volumes, and the finalized empirical prior.
//!
//! The accumulator keeps (count, sum, sum of squares) for every bin so partial accumulators built
//! from different volume subsets can be merged in any order. Finalizing produces the per-bin
//! mean and variance of the k-space magnitude, which is what the empirical prior reads.
//!
//! Artifact layout (little endian):
//! ```text
//! magic "BIFSEMP1" | version u32 | normalization u8 | ndim u32 | dims u64 * ndim
//! count u64 * n | mean f64 * n | variance f64 * n
//! ```
//! Bins are stored in logical (row-major) order of the canonical shape.

use crate::error::{BifsError, Result};
use crate::transform::NormalizationType;
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use ndarray::{ArrayD, IxDyn, Zip};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

const MAGIC: &[u8; 8] = b"BIFSEMP1";
const VERSION: u32 = 1;
const MAX_DIMS: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct KSpaceStats {
    normalization: NormalizationType,
    count: ArrayD<u64>,
    sum: ArrayD<f64>,
    sum_sq: ArrayD<f64>,
}

impl KSpaceStats {
    pub fn new(shape: &[usize], normalization: NormalizationType) -> Self {
        Self {
            normalization,
            count: ArrayD::zeros(IxDyn(shape)),
            sum: ArrayD::zeros(IxDyn(shape)),
            sum_sq: ArrayD::zeros(IxDyn(shape)),
        }
    }

    pub fn shape(&self) -> &[usize] {
        self.count.shape()
    }

    pub fn normalization(&self) -> NormalizationType {
        self.normalization
    }

    /// number of volumes folded in, the largest per-bin count
    pub fn samples(&self) -> u64 {
        self.count.iter().cloned().max().unwrap_or(0)
    }

    /// folds the k-space magnitude of one volume into the running sums
    pub fn push(&mut self, modulus: &ArrayD<f64>) -> Result<()> {
        if modulus.shape() != self.shape() {
            return Err(BifsError::shape_mismatch(self.shape(), modulus.shape()));
        }
        Zip::from(&mut self.count)
            .and(&mut self.sum)
            .and(&mut self.sum_sq)
            .and(modulus)
            .for_each(|c, s, s2, &m| {
                *c += 1;
                *s += m;
                *s2 += m * m;
            });
        Ok(())
    }

    /// adds the sums of another accumulator built with the same shape and normalization
    pub fn merge(&mut self, other: &KSpaceStats) -> Result<()> {
        if other.shape() != self.shape() {
            return Err(BifsError::shape_mismatch(self.shape(), other.shape()));
        }
        if other.normalization != self.normalization {
            return Err(BifsError::invalid_configuration("cannot merge statistics built with different normalizations"));
        }
        self.count += &other.count;
        self.sum += &other.sum;
        self.sum_sq += &other.sum_sq;
        Ok(())
    }

    /// per-bin mean and population variance; fails when nothing was accumulated
    pub fn finalize(&self) -> Result<EmpiricalPrior> {
        if self.samples() == 0 {
            return Err(BifsError::NoUsableSamples { failures: 0, rejected: 0 });
        }
        let mut mean = ArrayD::zeros(self.count.raw_dim());
        let mut variance = ArrayD::zeros(self.count.raw_dim());
        Zip::from(&mut mean)
            .and(&mut variance)
            .and(&self.count)
            .and(&self.sum)
            .and(&self.sum_sq)
            .for_each(|mu, var, &c, &s, &s2| {
                if c > 0 {
                    let n = c as f64;
                    *mu = s / n;
                    *var = (s2 / n - *mu * *mu).max(0.);
                }
            });
        Ok(EmpiricalPrior {
            normalization: self.normalization,
            count: self.count.clone(),
            mean,
            variance,
        })
    }
}

/// finalized per-bin statistics of reference k-space magnitudes
#[derive(Debug, Clone, PartialEq)]
pub struct EmpiricalPrior {
    normalization: NormalizationType,
    count: ArrayD<u64>,
    mean: ArrayD<f64>,
    variance: ArrayD<f64>,
}

impl EmpiricalPrior {
    pub fn shape(&self) -> &[usize] {
        self.mean.shape()
    }

    pub fn normalization(&self) -> NormalizationType {
        self.normalization
    }

    pub fn count(&self) -> &ArrayD<u64> {
        &self.count
    }

    pub fn mean(&self) -> &ArrayD<f64> {
        &self.mean
    }

    pub fn variance(&self) -> &ArrayD<f64> {
        &self.variance
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        self.write_to(&mut w)?;
        w.flush()?;
        Ok(())
    }

    /// Reads an artifact file. The size implied by the header is checked against the file
    /// length before any bin data is allocated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let f = File::open(path)?;
        let file_len = f.metadata()?.len();
        let mut r = BufReader::new(f);
        let header = read_header(&mut r).map_err(truncated)?;
        let expected = header.payload_len()?.checked_add(header_len(header.shape.len()))
            .ok_or_else(|| BifsError::MalformedArtifact(format!("shape {:?} overflows", header.shape)))?;
        if expected != file_len {
            return Err(BifsError::MalformedArtifact(format!("expected {expected} bytes, file has {file_len}")));
        }
        read_payload(&mut r, header).map_err(truncated)
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(MAGIC)?;
        w.write_u32::<LittleEndian>(VERSION)?;
        w.write_u8(self.normalization.as_u8())?;
        w.write_u32::<LittleEndian>(self.shape().len() as u32)?;
        for &d in self.shape() {
            w.write_u64::<LittleEndian>(d as u64)?;
        }
        for &c in self.count.iter() {
            w.write_u64::<LittleEndian>(c)?;
        }
        for &m in self.mean.iter() {
            w.write_f64::<LittleEndian>(m)?;
        }
        for &v in self.variance.iter() {
            w.write_f64::<LittleEndian>(v)?;
        }
        Ok(())
    }

    /// Reads an artifact from a stream of unknown length. Bin data is buffered as it arrives,
    /// so a header claiming more bins than the stream holds fails as truncated.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let header = read_header(r).map_err(truncated)?;
        read_payload(r, header).map_err(truncated)
    }
}

fn truncated(e: BifsError) -> BifsError {
    match e {
        BifsError::Io(io) if io.kind() == ErrorKind::UnexpectedEof => {
            BifsError::MalformedArtifact("truncated artifact".to_string())
        }
        e => e,
    }
}

fn header_len(ndim: usize) -> u64 {
    (MAGIC.len() + 4 + 1 + 4 + 8 * ndim) as u64
}

struct Header {
    normalization: NormalizationType,
    shape: Vec<usize>,
    bins: usize,
}

impl Header {
    /// bytes of count, mean and variance data following the header
    fn payload_len(&self) -> Result<u64> {
        (self.bins as u64).checked_mul(24)
            .ok_or_else(|| BifsError::MalformedArtifact(format!("shape {:?} overflows", self.shape)))
    }
}

fn read_header<R: Read>(r: &mut R) -> Result<Header> {
    let mut magic = [0u8; 8];
    r.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(BifsError::MalformedArtifact("not an empirical prior artifact".to_string()));
    }
    let version = r.read_u32::<LittleEndian>()?;
    if version != VERSION {
        return Err(BifsError::MalformedArtifact(format!("unsupported version {version}")));
    }
    let tag = r.read_u8()?;
    let normalization = NormalizationType::from_u8(tag)
        .ok_or_else(|| BifsError::MalformedArtifact(format!("unknown normalization tag {tag}")))?;
    let ndim = r.read_u32::<LittleEndian>()? as usize;
    if ndim == 0 || ndim > MAX_DIMS {
        return Err(BifsError::MalformedArtifact(format!("unsupported dimensionality {ndim}")));
    }
    let mut shape = Vec::with_capacity(ndim);
    for _ in 0..ndim {
        let d = r.read_u64::<LittleEndian>()?;
        let d = usize::try_from(d).map_err(|_| BifsError::MalformedArtifact(format!("dimension {d} is too large")))?;
        shape.push(d);
    }
    let bins = shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| BifsError::MalformedArtifact(format!("shape {shape:?} overflows")))?;
    Ok(Header { normalization, shape, bins })
}

fn read_payload<R: Read>(r: &mut R, header: Header) -> Result<EmpiricalPrior> {
    let len = header.payload_len()?;
    let Header { normalization, shape, bins } = header;
    let mut payload = Vec::new();
    r.by_ref().take(len).read_to_end(&mut payload)?;
    if payload.len() as u64 != len {
        return Err(BifsError::MalformedArtifact("truncated artifact".to_string()));
    }
    let mut trailing = [0u8; 1];
    if r.read(&mut trailing)? != 0 {
        return Err(BifsError::MalformedArtifact("trailing bytes after bin data".to_string()));
    }

    let (count_bytes, rest) = payload.split_at(8 * bins);
    let (mean_bytes, variance_bytes) = rest.split_at(8 * bins);
    let mut count = vec![0u64; bins];
    LittleEndian::read_u64_into(count_bytes, &mut count);
    let mut mean = vec![0f64; bins];
    LittleEndian::read_f64_into(mean_bytes, &mut mean);
    let mut variance = vec![0f64; bins];
    LittleEndian::read_f64_into(variance_bytes, &mut variance);

    let malformed = |e: ndarray::ShapeError| BifsError::MalformedArtifact(e.to_string());
    Ok(EmpiricalPrior {
        normalization,
        count: ArrayD::from_shape_vec(IxDyn(&shape), count).map_err(malformed)?,
        mean: ArrayD::from_shape_vec(IxDyn(&shape), mean).map_err(malformed)?,
        variance: ArrayD::from_shape_vec(IxDyn(&shape), variance).map_err(malformed)?,
    })
}
