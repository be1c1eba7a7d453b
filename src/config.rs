use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    Result, SmartErr,
    divergence::{Divergence, KlDiv, Reduction, SymKlDiv},
    norm::{InfNorm, L2Norm, NormFn},
};

/// Selects a divergence function.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DivergenceConfig {
    Kl {
        #[serde(default = "batch_mean")]
        reduction: Reduction,
    },
    SymKl {
        #[serde(default = "unit_alpha")]
        alpha: f32,
        #[serde(default = "sum")]
        reduction: Reduction,
    },
}

fn batch_mean() -> Reduction {
    Reduction::BatchMean
}

fn sum() -> Reduction {
    Reduction::Sum
}

fn unit_alpha() -> f32 {
    1.0
}

impl Default for DivergenceConfig {
    fn default() -> Self {
        DivergenceConfig::SymKl {
            alpha: unit_alpha(),
            reduction: sum(),
        }
    }
}

impl DivergenceConfig {
    /// Resolves this configuration into the divergence it names.
    pub fn build(&self) -> Box<dyn Divergence> {
        match *self {
            DivergenceConfig::Kl { reduction } => Box::new(KlDiv::new(reduction)),
            DivergenceConfig::SymKl { alpha, reduction } => {
                Box::new(SymKlDiv::new(alpha, reduction))
            }
        }
    }
}

/// Selects a norm function.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormConfig {
    #[default]
    Inf,
    L2,
}

impl NormConfig {
    /// Resolves this configuration into the norm it names.
    pub fn build(&self) -> Box<dyn NormFn> {
        match self {
            NormConfig::Inf => Box::new(InfNorm),
            NormConfig::L2 => Box::new(L2Norm),
        }
    }
}

/// Construction time settings of a perturbation search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SmartConfig {
    /// The amount of ascent iterations before the terminal evaluation.
    pub num_steps: usize,
    /// The length of each ascent step along the noise gradient.
    pub step_size: f32,
    /// Added to the norm when projecting, must be positive.
    pub epsilon: f32,
    /// Scale of the initial gaussian noise.
    pub noise_var: f32,
    /// Divergence driving the ascent iterations.
    pub step_loss: DivergenceConfig,
    /// Divergence of the terminal evaluation, `step_loss` if unset.
    pub final_loss: Option<DivergenceConfig>,
    pub norm: NormConfig,
}

impl Default for SmartConfig {
    fn default() -> Self {
        Self {
            num_steps: 1,
            step_size: 1e-3,
            epsilon: 1e-6,
            noise_var: 1e-5,
            step_loss: DivergenceConfig::default(),
            final_loss: None,
            norm: NormConfig::default(),
        }
    }
}

impl SmartConfig {
    /// Parses and validates a configuration from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a configuration from a JSON file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Checks every scalar is within its valid range.
    ///
    /// # Returns
    /// `SmartErr::InvalidConfig` describing the first offending value.
    pub fn validate(&self) -> Result<()> {
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(SmartErr::InvalidConfig(format!(
                "epsilon must be positive and finite, got {}",
                self.epsilon
            )));
        }
        if !self.step_size.is_finite() {
            return Err(SmartErr::InvalidConfig(format!(
                "step_size must be finite, got {}",
                self.step_size
            )));
        }
        if !(self.noise_var.is_finite() && self.noise_var >= 0.0) {
            return Err(SmartErr::InvalidConfig(format!(
                "noise_var must be non-negative and finite, got {}",
                self.noise_var
            )));
        }

        for loss in std::iter::once(&self.step_loss).chain(&self.final_loss) {
            if let DivergenceConfig::SymKl { alpha, .. } = loss
                && !alpha.is_finite()
            {
                return Err(SmartErr::InvalidConfig(format!(
                    "alpha must be finite, got {alpha}"
                )));
            }
        }

        Ok(())
    }
}
