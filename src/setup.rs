use anyhow::{Context, Result};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::{
    accumulator::{SampleAccumulator, StatisticsAccumulator},
    adaptor::{AdaptReport, Adaptor},
    builder::{default_builders, TransformationBuilder},
    driver::HamiltonianMonteCarlo,
    model::ParticleModel,
    settings::SetupSettings,
    variables::OptimizedVariables,
};

/// A driver ready for sampling, and what its warm-up produced.
pub struct WarmupOutput<M: ParticleModel> {
    pub hmc: HamiltonianMonteCarlo<M>,
    /// Parameter labels, aligned with the saved samples.
    pub names: Vec<String>,
    /// `None` if no warm-up was requested.
    pub report: Option<AdaptReport>,
    pub warmup_stats: Option<StatisticsAccumulator>,
    pub warmup_samples: Option<SampleAccumulator>,
}

/// Build the variables and the driver for `model` and run the warm-up.
///
/// `builders` defaults to [`default_builders`]. The warm-up statistics and
/// samples are detached from the driver and returned, so that the driver
/// records only what is sampled afterwards.
pub fn setup_warmup_hmc<M: ParticleModel>(
    mut model: M,
    builders: Option<Vec<TransformationBuilder>>,
    settings: SetupSettings,
) -> Result<WarmupOutput<M>> {
    let variables = OptimizedVariables::new(&model, builders.unwrap_or_else(default_builders));

    if settings.shuffle {
        let mut rng = ChaCha8Rng::seed_from_u64(settings.hmc.seed);
        rng.set_stream(u64::MAX - settings.hmc.chain);
        variables
            .shuffle(&mut model, settings.shuffle_sigma, &mut rng)
            .context("Could not randomize the initial state")?;
    }

    let names = variables.names(&model);
    let mut hmc = HamiltonianMonteCarlo::new(model, variables, settings.hmc)
        .context("Could not initialize the sampler")?;

    if settings.adapt.num_adapt == 0 {
        return Ok(WarmupOutput {
            hmc,
            names,
            report: None,
            warmup_stats: None,
            warmup_samples: None,
        });
    }

    let report = Adaptor::new(settings.adapt)
        .adapt(&mut hmc)
        .context("Warm-up failed")?;
    let warmup_stats = hmc.take_stats();
    let warmup_samples = hmc.take_samples();
    Ok(WarmupOutput {
        hmc,
        names,
        report: Some(report),
        warmup_stats,
        warmup_samples,
    })
}
