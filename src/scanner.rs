//! Builds an empirical prior by scanning a population of reference volumes.
//!
//! Candidates are enumerated by a [VolumeSource], filtered by an exclusion pattern and sampled
//! down to a fraction. Selected volumes are read and transformed in parallel batches, then folded
//! into the accumulator one at a time in enumeration order, so the result does not depend on
//! thread scheduling. A volume that cannot be read, or whose shape differs from the canonical
//! shape, is skipped and recorded in the report.

use crate::empirical::{EmpiricalPrior, KSpaceStats};
use crate::error::{BifsError, Result};
use crate::matching::ReferencePool;
use crate::transform::{FftTransform, NormalizationType};
use log::{debug, info, warn};
use ndarray::ArrayD;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// enumerates and decodes reference volumes
pub trait VolumeSource: Sync {
    /// identifiers of every candidate volume, in a stable order
    fn candidates(&self) -> Result<Vec<String>>;
    fn read(&self, id: &str) -> Result<ArrayD<f64>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanParams {
    /// fraction of eligible candidates to sample, in (0, 1]
    pub sample_fraction: f64,
    /// glob pattern on the identifier or file name of volumes to leave out
    pub exclude: Option<String>,
    /// seed for candidate sampling, drawn from the os when absent
    pub seed: Option<u64>,
    /// volumes read and transformed in parallel before folding
    pub batch_size: usize,
    /// keep voxels of contributing volumes as a reference pool for distribution matching
    pub collect_voxels: bool,
    /// keep every nth voxel of each volume in the pool
    pub voxel_stride: usize,
    /// shape every volume must have; taken from the first readable volume when absent
    pub shape: Option<Vec<usize>>,
    pub normalization: NormalizationType,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            sample_fraction: 0.1,
            exclude: None,
            seed: None,
            batch_size: 16,
            collect_voxels: false,
            voxel_stride: 1,
            shape: None,
            normalization: NormalizationType::Unitary,
        }
    }
}

impl ScanParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.sample_fraction > 0. && self.sample_fraction <= 1.) {
            return Err(BifsError::invalid_configuration(format!(
                "sample fraction must be in (0, 1], got {}",
                self.sample_fraction
            )));
        }
        if self.batch_size == 0 || self.voxel_stride == 0 {
            return Err(BifsError::invalid_configuration("batch size and voxel stride must be at least 1"));
        }
        if let Some(shape) = &self.shape {
            if shape.is_empty() || shape.iter().any(|&d| d == 0) {
                return Err(BifsError::invalid_configuration(format!("invalid canonical shape {shape:?}")));
            }
        }
        if let Some(p) = &self.exclude {
            glob::Pattern::new(p)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedVolume {
    pub id: String,
    pub reason: String,
}

/// summary of a scan, written next to the artifact
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub candidates: usize,
    pub excluded: usize,
    pub selected: usize,
    pub contributing: usize,
    /// volumes that could not be read or decoded
    pub failures: Vec<SkippedVolume>,
    /// readable volumes with a shape other than the canonical one
    pub rejected: Vec<SkippedVolume>,
    pub shape: Vec<usize>,
    pub normalization: NormalizationType,
}

impl ScanReport {
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn rejected_count(&self) -> usize {
        self.rejected.len()
    }
}

/// reported after every folded batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanProgress {
    pub batch: usize,
    pub batches: usize,
    pub processed: usize,
    pub selected: usize,
    pub contributing: usize,
    pub failures: usize,
}

#[derive(Debug, Clone)]
pub struct ScanOutcome {
    /// raw sums, for merging with other scans
    pub stats: KSpaceStats,
    pub prior: EmpiricalPrior,
    pub report: ScanReport,
    pub pool: Option<ReferencePool>,
}

struct Sample {
    modulus: ArrayD<f64>,
    shape: Vec<usize>,
    voxels: Vec<f64>,
}

pub struct EmpiricalScanner<'a, S: VolumeSource> {
    source: &'a S,
    params: ScanParams,
    transform: FftTransform,
}

impl<'a, S: VolumeSource> EmpiricalScanner<'a, S> {
    pub fn new(source: &'a S, params: ScanParams) -> Result<Self> {
        params.validate()?;
        let transform = FftTransform::new(params.normalization);
        Ok(Self { source, params, transform })
    }

    fn excluded(&self, pattern: &glob::Pattern, id: &str) -> bool {
        pattern.matches(id)
            || Path::new(id)
                .file_name()
                .is_some_and(|name| pattern.matches(&name.to_string_lossy()))
    }

    /// candidates left after exclusion and sampling, in enumeration order
    pub fn select(&self, report: &mut ScanReport) -> Result<Vec<String>> {
        let candidates = self.source.candidates()?;
        report.candidates = candidates.len();
        let eligible = match &self.params.exclude {
            Some(p) => {
                let pattern = glob::Pattern::new(p)?;
                candidates.into_iter().filter(|id| !self.excluded(&pattern, id)).collect::<Vec<_>>()
            }
            None => candidates,
        };
        report.excluded = report.candidates - eligible.len();
        if eligible.is_empty() {
            return Ok(eligible);
        }

        let n = ((self.params.sample_fraction * eligible.len() as f64).round() as usize).clamp(1, eligible.len());
        let mut rng = match self.params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let mut picked = rand::seq::index::sample(&mut rng, eligible.len(), n).into_vec();
        picked.sort_unstable();
        report.selected = picked.len();
        Ok(picked.into_iter().map(|i| eligible[i].clone()).collect())
    }

    fn load(&self, id: &str) -> Result<Sample> {
        let vol = self.source.read(id)?;
        if vol.is_empty() {
            return Err(BifsError::unreadable(id, "volume is empty"));
        }
        let voxels = if self.params.collect_voxels {
            vol.iter().step_by(self.params.voxel_stride).cloned().collect()
        } else {
            vec![]
        };
        Ok(Sample { modulus: self.transform.modulus(&vol), shape: vol.shape().to_vec(), voxels })
    }

    pub fn scan(&self, mut progress: impl FnMut(&ScanProgress)) -> Result<ScanOutcome> {
        let mut report = ScanReport { normalization: self.params.normalization, ..Default::default() };
        let selected = self.select(&mut report)?;
        info!(
            "scanning {} of {} candidates ({} excluded)",
            selected.len(),
            report.candidates,
            report.excluded
        );

        let mut shape = self.params.shape.clone();
        let mut stats: Option<KSpaceStats> = None;
        let mut voxels = Vec::<f64>::new();
        let batches = selected.len().div_ceil(self.params.batch_size);
        let mut processed = 0;

        for (batch_id, batch) in selected.chunks(self.params.batch_size).enumerate() {
            let loaded = batch.par_iter().map(|id| self.load(id)).collect::<Vec<_>>();

            for (id, sample) in batch.iter().zip(loaded) {
                processed += 1;
                let sample = match sample {
                    Ok(s) => s,
                    Err(e) => {
                        debug!("skipping {id}: {e}");
                        report.failures.push(SkippedVolume { id: id.clone(), reason: e.to_string() });
                        continue;
                    }
                };
                let canonical = shape.get_or_insert_with(|| sample.shape.clone());
                if sample.shape != *canonical {
                    debug!("rejecting {id}: shape {:?} differs from {:?}", sample.shape, canonical);
                    report.rejected.push(SkippedVolume {
                        id: id.clone(),
                        reason: BifsError::shape_mismatch(canonical, &sample.shape).to_string(),
                    });
                    continue;
                }
                stats
                    .get_or_insert_with(|| KSpaceStats::new(canonical, self.params.normalization))
                    .push(&sample.modulus)?;
                voxels.extend(sample.voxels);
                report.contributing += 1;
            }

            let p = ScanProgress {
                batch: batch_id + 1,
                batches,
                processed,
                selected: selected.len(),
                contributing: report.contributing,
                failures: report.failure_count(),
            };
            info!(
                "batch {} of {}: {} volumes processed, {} contributing",
                p.batch, p.batches, p.processed, p.contributing
            );
            progress(&p);
        }

        if report.failure_count() + report.rejected_count() > 0 {
            warn!(
                "{} volumes unreadable and {} rejected for shape",
                report.failure_count(),
                report.rejected_count()
            );
        }

        let stats = match stats {
            Some(s) if s.samples() > 0 => s,
            _ => {
                return Err(BifsError::NoUsableSamples {
                    failures: report.failure_count(),
                    rejected: report.rejected_count(),
                })
            }
        };
        let prior = stats.finalize()?;
        report.shape = prior.shape().to_vec();

        let pool = if self.params.collect_voxels {
            Some(ReferencePool::new(voxels)?)
        } else {
            None
        };
        info!(
            "empirical prior built from {} volumes with shape {:?}",
            report.contributing, report.shape
        );
        Ok(ScanOutcome { stats, prior, report, pool })
    }
}
