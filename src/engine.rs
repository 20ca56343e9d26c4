//! The restoration engine.
//!
//! An engine owns the model configuration (prior, likelihood, parameter function and transform)
//! and at most one image session. A session caches every derived artifact of its image:
//!
//! ```text
//! init image -> k-space -> likelihood -> mod image (prior + posterior) -> final image
//! ```
//!
//! Artifacts are computed on first read and dropped when something they depend on changes.
//! Setting the image drops everything, setting the likelihood drops the likelihood onwards, and
//! setting the prior, its scale or the parameter function drops the mod image onwards.

use crate::config::BifsParams;
use crate::empirical::EmpiricalPrior;
use crate::error::{BifsError, Result};
use crate::grid::FrequencyGrid;
use crate::likelihood::{Likelihood, LikelihoodField};
use crate::param_func::ParamFunc;
use crate::posterior::Posterior;
use crate::prior::{Prior, PriorField, PriorModel};
use crate::transform::{FftTransform, NormalizationType};
use log::{debug, info};
use ndarray::ArrayD;
use rustfft::num_complex::Complex64;
use std::path::Path;
use std::sync::Arc;

/// cached artifacts, in dependency order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Artifact {
    KSpace,
    Likelihood,
    ModImage,
    FinalImage,
}

/// number of times each artifact has been computed over the life of the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecomputeStats {
    pub k_space: usize,
    pub likelihood: usize,
    pub mod_image: usize,
    pub final_image: usize,
}

impl RecomputeStats {
    pub fn total(&self) -> usize {
        self.k_space + self.likelihood + self.mod_image + self.final_image
    }
}

/// prior, likelihood and posterior moments at a single k-space bin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinDistribution {
    pub frequency: f64,
    pub observed: f64,
    pub likelihood_mean: f64,
    pub likelihood_variance: f64,
    pub prior_mean: f64,
    pub prior_variance: f64,
    pub posterior: f64,
}

/// the prior field and the posterior combined from it
#[derive(Debug, Clone)]
struct ModImage {
    prior: PriorField,
    posterior: Posterior,
}

#[derive(Debug, Clone)]
struct Session {
    init_image: ArrayD<f64>,
    grid: FrequencyGrid,
    k_image: Option<ArrayD<Complex64>>,
    likelihood: Option<LikelihoodField>,
    mod_image: Option<ModImage>,
    final_image: Option<ArrayD<f64>>,
}

impl Session {
    fn new(image: ArrayD<f64>) -> Self {
        let grid = FrequencyGrid::new(image.shape());
        Self {
            init_image: image,
            grid,
            k_image: None,
            likelihood: None,
            mod_image: None,
            final_image: None,
        }
    }

    fn invalidate(&mut self, from: Artifact) {
        if from <= Artifact::KSpace {
            self.k_image = None;
        }
        if from <= Artifact::Likelihood {
            self.likelihood = None;
        }
        if from <= Artifact::ModImage {
            self.mod_image = None;
        }
        self.final_image = None;
    }

    fn is_cached(&self, artifact: Artifact) -> bool {
        match artifact {
            Artifact::KSpace => self.k_image.is_some(),
            Artifact::Likelihood => self.likelihood.is_some(),
            Artifact::ModImage => self.mod_image.is_some(),
            Artifact::FinalImage => self.final_image.is_some(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Model {
    prior: PriorModel,
    likelihood: Likelihood,
    param_func: ParamFunc,
    transform: FftTransform,
}

#[derive(Debug, Clone, Default)]
pub struct Bifs {
    model: Model,
    session: Option<Session>,
    stats: RecomputeStats,
}

/// borrows of every artifact up to the mod image, computed on demand
struct ModStage<'a> {
    model: &'a Model,
    stats: &'a mut RecomputeStats,
    grid: &'a FrequencyGrid,
    k_image: &'a ArrayD<Complex64>,
    likelihood: &'a LikelihoodField,
    mod_image: &'a ModImage,
    final_image: &'a mut Option<ArrayD<f64>>,
}

fn fill_k_space<'a>(
    slot: &'a mut Option<ArrayD<Complex64>>,
    image: &ArrayD<f64>,
    model: &Model,
    stats: &mut RecomputeStats,
) -> &'a ArrayD<Complex64> {
    slot.get_or_insert_with(|| {
        debug!("computing k-space");
        stats.k_space += 1;
        model.transform.forward(image)
    })
}

fn fill_likelihood<'a>(
    slot: &'a mut Option<LikelihoodField>,
    k: &ArrayD<Complex64>,
    grid: &FrequencyGrid,
    model: &Model,
    stats: &mut RecomputeStats,
) -> &'a LikelihoodField {
    slot.get_or_insert_with(|| {
        debug!("evaluating {:?} likelihood", model.likelihood.kind());
        stats.likelihood += 1;
        let gain = model.transform.normalization.noise_gain(grid.len());
        model.likelihood.evaluate(k, grid, gain)
    })
}

/// the prior can still reject the grid here, in which case nothing is cached
fn fill_mod_image<'a>(
    slot: &'a mut Option<ModImage>,
    k: &ArrayD<Complex64>,
    likelihood: &LikelihoodField,
    grid: &FrequencyGrid,
    model: &Model,
    stats: &mut RecomputeStats,
) -> Result<&'a ModImage> {
    match slot {
        Some(m) => Ok(m),
        None => {
            model.prior.check(grid, model.transform.normalization)?;
            debug!("combining {:?} prior with {}", model.prior.kind(), model.param_func);
            let prior = model.prior.evaluate(grid, &model.param_func)?;
            stats.mod_image += 1;
            let posterior = Posterior::combine(k, likelihood, &prior);
            Ok(slot.insert(ModImage { prior, posterior }))
        }
    }
}

impl Bifs {
    pub fn new(params: &BifsParams) -> Result<Self> {
        params.validate()?;
        let model = Model {
            prior: params.prior_model()?,
            likelihood: params.likelihood(),
            param_func: params.param_func.clone(),
            transform: FftTransform::new(params.normalization),
        };
        Ok(Self { model, session: None, stats: RecomputeStats::default() })
    }

    /// Starts a new session with this image. All cached artifacts of a previous image are
    /// dropped; the model configuration is kept.
    pub fn load_image(&mut self, image: ArrayD<f64>) -> Result<()> {
        check_image(&image)?;
        debug!("loading image with shape {:?}", image.shape());
        self.session = Some(Session::new(image));
        Ok(())
    }

    /// Replaces the pixels of the loaded image, keeping its shape. Everything derived is dropped.
    pub fn replace_image(&mut self, image: ArrayD<f64>) -> Result<()> {
        let session = self.session.as_mut().ok_or(BifsError::NoImageLoaded)?;
        if image.shape() != session.init_image.shape() {
            return Err(BifsError::shape_mismatch(session.init_image.shape(), image.shape()));
        }
        check_image(&image)?;
        session.init_image = image;
        session.invalidate(Artifact::KSpace);
        Ok(())
    }

    pub fn image_loaded(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_cached(&self, artifact: Artifact) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_cached(artifact))
    }

    pub fn recompute_stats(&self) -> RecomputeStats {
        self.stats
    }

    pub fn prior_model(&self) -> &PriorModel {
        &self.model.prior
    }

    pub fn likelihood(&self) -> &Likelihood {
        &self.model.likelihood
    }

    pub fn param_func(&self) -> &ParamFunc {
        &self.model.param_func
    }

    pub fn normalization(&self) -> NormalizationType {
        self.model.transform.normalization
    }

    fn invalidate(&mut self, from: Artifact) {
        if let Some(s) = self.session.as_mut() {
            s.invalidate(from);
        }
    }

    /// Selects a new prior. An empirical prior that does not fit the loaded image is rejected
    /// and the current prior is kept.
    pub fn set_prior(&mut self, prior: Prior) -> Result<()> {
        if *self.model.prior.prior() == prior {
            return Ok(());
        }
        let mut candidate = self.model.prior.clone();
        candidate.set_prior(prior);
        if let Some(s) = &self.session {
            candidate.check(&s.grid, self.model.transform.normalization)?;
        }
        debug!("prior set to {:?}", candidate.kind());
        self.model.prior = candidate;
        self.invalidate(Artifact::ModImage);
        Ok(())
    }

    /// reads an empirical prior artifact and selects it
    pub fn load_empirical(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let ep = EmpiricalPrior::load(path.as_ref())?;
        info!("loaded empirical prior {} with shape {:?}", path.as_ref().display(), ep.shape());
        self.set_prior(Prior::Empirical(Arc::new(ep)))
    }

    pub fn set_prior_scale(&mut self, scale: f64) -> Result<()> {
        if scale == self.model.prior.scale() {
            return Ok(());
        }
        self.model.prior.set_scale(scale)?;
        self.invalidate(Artifact::ModImage);
        Ok(())
    }

    pub fn set_likelihood(&mut self, likelihood: Likelihood) -> Result<()> {
        likelihood.validate()?;
        if likelihood != self.model.likelihood {
            self.model.likelihood = likelihood;
            self.invalidate(Artifact::Likelihood);
        }
        Ok(())
    }

    pub fn set_param_func(&mut self, param_func: ParamFunc) -> Result<()> {
        param_func.validate()?;
        if param_func != self.model.param_func {
            self.model.param_func = param_func;
            self.invalidate(Artifact::ModImage);
        }
        Ok(())
    }

    /// Changes the transform convention. k-space and everything after it is recomputed, and
    /// an empirical prior built with the other convention stops fitting.
    pub fn set_normalization(&mut self, normalization: NormalizationType) -> Result<()> {
        if normalization == self.model.transform.normalization {
            return Ok(());
        }
        if let Some(s) = &self.session {
            self.model.prior.check(&s.grid, normalization)?;
        }
        self.model.transform = FftTransform::new(normalization);
        self.invalidate(Artifact::KSpace);
        Ok(())
    }

    fn session_parts(&mut self) -> Result<(&Model, &mut RecomputeStats, &mut Session)> {
        let Self { model, session, stats } = self;
        let s = session.as_mut().ok_or(BifsError::NoImageLoaded)?;
        Ok((&*model, stats, s))
    }

    /// fills the cache up to and including the mod image
    fn mod_stage(&mut self) -> Result<ModStage<'_>> {
        let (model, stats, s) = self.session_parts()?;
        let Session { init_image, grid, k_image, likelihood, mod_image, final_image } = s;
        let k_image = fill_k_space(k_image, init_image, model, stats);
        let likelihood = fill_likelihood(likelihood, k_image, grid, model, stats);
        let mod_image = fill_mod_image(mod_image, k_image, likelihood, grid, model, stats)?;
        Ok(ModStage { model, stats, grid, k_image, likelihood, mod_image, final_image })
    }

    pub fn init_image(&self) -> Result<&ArrayD<f64>> {
        self.session.as_ref().map(|s| &s.init_image).ok_or(BifsError::NoImageLoaded)
    }

    pub fn grid(&self) -> Result<&FrequencyGrid> {
        self.session.as_ref().map(|s| &s.grid).ok_or(BifsError::NoImageLoaded)
    }

    /// observed k-space of the loaded image
    pub fn k_image(&mut self) -> Result<&ArrayD<Complex64>> {
        let (model, stats, s) = self.session_parts()?;
        Ok(fill_k_space(&mut s.k_image, &s.init_image, model, stats))
    }

    pub fn likelihood_field(&mut self) -> Result<&LikelihoodField> {
        let (model, stats, s) = self.session_parts()?;
        let k = fill_k_space(&mut s.k_image, &s.init_image, model, stats);
        Ok(fill_likelihood(&mut s.likelihood, k, &s.grid, model, stats))
    }

    pub fn posterior(&mut self) -> Result<&Posterior> {
        let m = self.mod_stage()?.mod_image;
        Ok(&m.posterior)
    }

    /// modified k-space: posterior magnitudes on the observed phase
    pub fn mod_image(&mut self) -> Result<&ArrayD<Complex64>> {
        Ok(&self.posterior()?.k_space)
    }

    pub fn posterior_modulus(&mut self) -> Result<&ArrayD<f64>> {
        Ok(&self.posterior()?.modulus)
    }

    pub fn final_image(&mut self) -> Result<&ArrayD<f64>> {
        let ModStage { model, stats, mod_image, final_image, .. } = self.mod_stage()?;
        Ok(final_image.get_or_insert_with(|| {
            debug!("computing final image");
            stats.final_image += 1;
            model.transform.inverse(&mod_image.posterior.k_space)
        }))
    }

    /// loads an image and returns its restoration
    pub fn restore(&mut self, image: ArrayD<f64>) -> Result<ArrayD<f64>> {
        self.load_image(image)?;
        Ok(self.final_image()?.clone())
    }

    /// the parameter function evaluated on the grid of the loaded image
    pub fn param_func_field(&self) -> Result<ArrayD<f64>> {
        Ok(self.model.param_func.evaluate(self.grid()?))
    }

    /// moments of every distribution involved at one k-space bin
    pub fn bin_distribution(&mut self, index: &[usize]) -> Result<BinDistribution> {
        let ModStage { grid, k_image, likelihood, mod_image, .. } = self.mod_stage()?;
        let out_of_range = || {
            BifsError::invalid_configuration(format!("bin {index:?} is outside the grid {:?}", grid.shape()))
        };
        if index.len() != grid.shape().len() {
            return Err(out_of_range());
        }
        let frequency = *grid.magnitude().get(index).ok_or_else(out_of_range)?;
        Ok(BinDistribution {
            frequency,
            observed: k_image[index].norm(),
            likelihood_mean: likelihood.mean[index],
            likelihood_variance: likelihood.variance[index],
            prior_mean: mod_image.prior.mean[index],
            prior_variance: mod_image.prior.variance[index],
            posterior: mod_image.posterior.modulus[index],
        })
    }
}

fn check_image(image: &ArrayD<f64>) -> Result<()> {
    if image.is_empty() {
        return Err(BifsError::invalid_configuration(format!("cannot load an empty image of shape {:?}", image.shape())));
    }
    if image.iter().any(|v| !v.is_finite()) {
        return Err(BifsError::invalid_configuration("image contains non-finite values"));
    }
    Ok(())
}
