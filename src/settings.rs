use std::str::FromStr;

use crate::{error::HmcError, kernel::DualAverageOptions};

/// How a trajectory is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplerKind {
    /// Multinomial no-U-turn sampling.
    #[default]
    Dynamic,
    /// A fixed number of leapfrog steps with an end-point Metropolis test.
    Static,
}

impl FromStr for SamplerKind {
    type Err = HmcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dynamic" => Ok(SamplerKind::Dynamic),
            "static" => Ok(SamplerKind::Static),
            other => Err(HmcError::InvalidSamplerType(other.to_string())),
        }
    }
}

/// The inverse mass matrix to start from.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum MetricKind {
    Unit,
    #[default]
    Diag,
    Dense,
    /// An explicit matrix with one row per free variable.
    Matrix(Vec<Vec<f64>>),
}

impl FromStr for MetricKind {
    type Err = HmcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unit" => Ok(MetricKind::Unit),
            "diag" => Ok(MetricKind::Diag),
            "dense" => Ok(MetricKind::Dense),
            other => Err(HmcError::InvalidMetric(other.to_string())),
        }
    }
}

/// What the driver does with a divergent transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DivergencePolicy {
    /// Record it in the statistics and carry on.
    #[default]
    Absorb,
    /// Record it, then fail the step with [`HmcError::Divergence`].
    Abort,
}

/// Settings for the HMC driver
#[derive(Debug, Clone, PartialEq)]
pub struct HmcSettings {
    pub sampler: SamplerKind,
    /// The maximum tree depth of the dynamic sampler. The number of leapfrog
    /// steps is smaller than 2 ^ max_depth.
    pub max_depth: u64,
    /// Leapfrog steps per transition of the static sampler.
    pub n_steps: u64,
    pub metric: MetricKind,
    /// If the energy error is larger than this threshold we treat the leapfrog
    /// step as a divergence.
    pub max_energy_error: f64,
    /// Record the optimized attributes after every step.
    pub save_samples: bool,
    pub divergence_policy: DivergencePolicy,
    pub seed: u64,
    /// Selects an independent random stream for the same seed.
    pub chain: u64,
}

impl Default for HmcSettings {
    fn default() -> Self {
        Self {
            sampler: SamplerKind::Dynamic,
            max_depth: 10,
            n_steps: 10,
            metric: MetricKind::Diag,
            max_energy_error: 1000f64,
            save_samples: false,
            divergence_policy: DivergencePolicy::Absorb,
            seed: 0,
            chain: 0,
        }
    }
}

/// Settings for the warm-up loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptorSettings {
    /// The number of warm-up steps.
    pub num_adapt: u64,
    /// Target mean acceptance statistic of the step size adaptation.
    pub target_accept: f64,
    /// Fraction of the warm-up between two progress reports.
    pub log_freq: f64,
    pub verbose: bool,
    /// Keep notifying the driver's observers during warm-up.
    pub update_states: bool,
    pub dual_average: DualAverageOptions,
}

impl Default for AdaptorSettings {
    fn default() -> Self {
        Self {
            num_adapt: 2000,
            target_accept: 0.8,
            log_freq: 0.1,
            verbose: true,
            update_states: false,
            dual_average: DualAverageOptions::default(),
        }
    }
}

/// Settings for [`setup_warmup_hmc`](crate::setup_warmup_hmc).
#[derive(Debug, Clone, PartialEq)]
pub struct SetupSettings {
    pub hmc: HmcSettings,
    pub adapt: AdaptorSettings,
    /// Randomize the initial state before warm-up.
    pub shuffle: bool,
    pub shuffle_sigma: f64,
}

impl Default for SetupSettings {
    fn default() -> Self {
        Self {
            hmc: HmcSettings::default(),
            adapt: AdaptorSettings::default(),
            shuffle: false,
            shuffle_sigma: 1.,
        }
    }
}
