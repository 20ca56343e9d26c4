//! Bayesian image restoration in Fourier space.
//!
//! An image is transformed to k-space, where every bin gets a MAP estimate combining a noise model
//! of the observed magnitude (the likelihood) with an expected magnitude (the prior). The prior
//! either follows a parameter-space function of frequency or comes from statistics of reference
//! volumes gathered by [scanner::EmpiricalScanner]. The restored image is the inverse transform of
//! the posterior magnitudes on the observed phase.

pub mod config;
pub mod data_import;
pub mod empirical;
pub mod engine;
pub mod error;
pub mod fftshift;
pub mod grid;
pub mod likelihood;
pub mod matching;
pub mod param_func;
pub mod posterior;
pub mod prior;
pub mod scanner;
pub mod transform;

pub use config::BifsParams;
pub use empirical::{EmpiricalPrior, KSpaceStats};
pub use engine::{Artifact, BinDistribution, Bifs, RecomputeStats};
pub use error::{BifsError, Result};
pub use likelihood::{Likelihood, LikelihoodKind};
pub use matching::{apply_mask, match_distribution, ReferencePool};
pub use param_func::ParamFunc;
pub use prior::{Prior, PriorKind, PriorModel};
pub use scanner::{EmpiricalScanner, ScanParams, ScanReport, VolumeSource};
pub use transform::{FftTransform, NormalizationType};
