use crate::empirical::EmpiricalPrior;
use crate::error::{BifsError, Result};
use crate::likelihood::{Likelihood, LikelihoodKind};
use crate::param_func::ParamFunc;
use crate::prior::{Prior, PriorKind, PriorModel, DEFAULT_PRIOR_SCALE};
use crate::transform::NormalizationType;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Restoration parameters as stored in a toml parameter file. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BifsParams {
    pub prior: PriorKind,
    /// mean of the gaussian and uniform priors
    pub prior_mean: f64,
    /// multiplier on the prior variance
    pub prior_scale: f64,
    /// artifact written by bifs-scan, required for the empirical prior
    #[serde(skip_serializing_if = "Option::is_none")]
    pub empirical_prior: Option<PathBuf>,
    pub likelihood: LikelihoodKind,
    /// image-space noise standard deviation, estimated from k-space when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noise_sd: Option<f64>,
    pub normalization: NormalizationType,
    // tables go last in toml output
    pub param_func: ParamFunc,
}

impl Default for BifsParams {
    fn default() -> Self {
        Self {
            prior: PriorKind::Gaussian,
            prior_mean: 0.,
            prior_scale: DEFAULT_PRIOR_SCALE,
            empirical_prior: None,
            likelihood: LikelihoodKind::Gaussian,
            noise_sd: None,
            normalization: NormalizationType::Unitary,
            param_func: ParamFunc::default(),
        }
    }
}

impl BifsParams {
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let s = fs::read_to_string(path.as_ref())?;
        let params: Self = toml::from_str(&s)?;
        params.validate()?;
        Ok(params)
    }

    pub fn to_toml(&self) -> Result<String> {
        let mut s = toml::to_string(self)?;
        s.push('\n');
        Ok(s)
    }

    pub fn write_toml_file(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.prior_scale.is_finite() && self.prior_scale > 0.) {
            return Err(BifsError::invalid_configuration(format!(
                "prior_scale must be positive and finite, got {}",
                self.prior_scale
            )));
        }
        if !self.prior_mean.is_finite() {
            return Err(BifsError::invalid_configuration("prior_mean must be finite"));
        }
        if self.prior == PriorKind::Empirical && self.empirical_prior.is_none() {
            return Err(BifsError::invalid_configuration("the empirical prior needs an empirical_prior artifact path"));
        }
        self.likelihood().validate()?;
        self.param_func.validate()
    }

    pub fn likelihood(&self) -> Likelihood {
        Likelihood::new(self.likelihood, self.noise_sd)
    }

    /// builds the prior, reading the empirical artifact when one is selected
    pub fn prior_model(&self) -> Result<PriorModel> {
        let prior = match self.prior {
            PriorKind::Gaussian => Prior::Gaussian { mean: self.prior_mean },
            PriorKind::Uniform => Prior::Uniform { mean: self.prior_mean },
            PriorKind::Empirical => {
                let path = self.empirical_prior.as_ref().ok_or_else(|| {
                    BifsError::invalid_configuration("the empirical prior needs an empirical_prior artifact path")
                })?;
                let ep = EmpiricalPrior::load(path)?;
                info!("loaded empirical prior {} with shape {:?}", path.display(), ep.shape());
                Prior::Empirical(Arc::new(ep))
            }
        };
        PriorModel::new(prior, self.prior_scale)
    }
}
