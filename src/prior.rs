//! Prior models: the expected signal magnitude of every k-space bin.

use crate::empirical::EmpiricalPrior;
use crate::error::{BifsError, Result};
use crate::grid::FrequencyGrid;
use crate::param_func::{ParamFunc, PARAM_FLOOR};
use crate::transform::NormalizationType;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

pub const DEFAULT_PRIOR_SCALE: f64 = 1.;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorKind {
    #[default]
    Gaussian,
    Uniform,
    Empirical,
}

impl FromStr for PriorKind {
    type Err = BifsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gaussian" => Ok(Self::Gaussian),
            "uniform" => Ok(Self::Uniform),
            "empirical" => Ok(Self::Empirical),
            _ => Err(BifsError::invalid_configuration(format!("unknown prior '{s}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Prior {
    /// fixed mean, variance follows the parameter function
    Gaussian { mean: f64 },
    /// fixed mean, flat variance at the peak of the parameter function
    Uniform { mean: f64 },
    /// per-bin statistics of reference volumes, shared between engines
    Empirical(Arc<EmpiricalPrior>),
}

impl Default for Prior {
    fn default() -> Self {
        Self::Gaussian { mean: 0. }
    }
}

impl Prior {
    pub fn kind(&self) -> PriorKind {
        match self {
            Self::Gaussian { .. } => PriorKind::Gaussian,
            Self::Uniform { .. } => PriorKind::Uniform,
            Self::Empirical(_) => PriorKind::Empirical,
        }
    }
}

/// per-bin prior parameters
#[derive(Debug, Clone, PartialEq)]
pub struct PriorField {
    pub mean: ArrayD<f64>,
    pub variance: ArrayD<f64>,
}

/// a prior together with the scale factor applied to its variance
#[derive(Debug, Clone, PartialEq)]
pub struct PriorModel {
    prior: Prior,
    scale: f64,
}

impl Default for PriorModel {
    fn default() -> Self {
        Self { prior: Prior::default(), scale: DEFAULT_PRIOR_SCALE }
    }
}

fn check_scale(scale: f64) -> Result<()> {
    if scale.is_finite() && scale > 0. {
        Ok(())
    } else {
        Err(BifsError::invalid_configuration(format!("prior scale must be positive and finite, got {scale}")))
    }
}

impl PriorModel {
    pub fn new(prior: Prior, scale: f64) -> Result<Self> {
        check_scale(scale)?;
        Ok(Self { prior, scale })
    }

    pub fn prior(&self) -> &Prior {
        &self.prior
    }

    pub fn kind(&self) -> PriorKind {
        self.prior.kind()
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn set_prior(&mut self, prior: Prior) {
        self.prior = prior;
    }

    /// leaves the current scale in place when the factor is rejected
    pub fn set_scale(&mut self, scale: f64) -> Result<()> {
        check_scale(scale)?;
        self.scale = scale;
        Ok(())
    }

    /// Checks that the prior can be evaluated on this grid. Only the empirical prior is
    /// constrained: its bins must line up with the grid and come from the same normalization.
    pub fn check(&self, grid: &FrequencyGrid, normalization: NormalizationType) -> Result<()> {
        if let Prior::Empirical(ep) = &self.prior {
            if ep.shape() != grid.shape() {
                return Err(BifsError::shape_mismatch(ep.shape(), grid.shape()));
            }
            if ep.normalization() != normalization {
                return Err(BifsError::invalid_configuration(format!(
                    "empirical prior was built with {:?} normalization, the transform uses {:?}",
                    ep.normalization(),
                    normalization
                )));
            }
        }
        Ok(())
    }

    /// Evaluates per-bin mean and variance. Callers must have passed [PriorModel::check] for the
    /// same grid; an empirical prior with a different shape is reported as a shape mismatch.
    pub fn evaluate(&self, grid: &FrequencyGrid, param_func: &ParamFunc) -> Result<PriorField> {
        let s = self.scale;
        match &self.prior {
            Prior::Gaussian { mean } => Ok(PriorField {
                mean: ArrayD::from_elem(grid.magnitude().raw_dim(), *mean),
                variance: param_func.evaluate(grid).mapv_into(|v| s * v),
            }),
            Prior::Uniform { mean } => Ok(PriorField {
                mean: ArrayD::from_elem(grid.magnitude().raw_dim(), *mean),
                variance: ArrayD::from_elem(grid.magnitude().raw_dim(), s * param_func.peak()),
            }),
            Prior::Empirical(ep) => {
                if ep.shape() != grid.shape() {
                    return Err(BifsError::shape_mismatch(ep.shape(), grid.shape()));
                }
                Ok(PriorField {
                    mean: ep.mean().clone(),
                    variance: ep.variance().mapv(|v| (s * v).max(PARAM_FLOOR)),
                })
            }
        }
    }
}
