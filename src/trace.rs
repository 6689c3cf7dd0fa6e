//! Draws and statistics of one chain as arrow arrays, for posterior
//! summaries outside this crate.

use std::sync::Arc;

use arrow::{
    array::{ArrayBuilder, ArrayRef, FixedSizeListBuilder, Float64Builder, StructArray},
    datatypes::{DataType, Field},
};

use crate::{
    accumulator::{SampleAccumulator, StatisticsAccumulator},
    driver::{public_stats, Chain, HamiltonianMonteCarlo, STATS_KEY_MAP},
    error::{HmcError, Result},
    model::ParticleModel,
};

/// Collects constrained draws and per-draw statistics of a chain.
pub struct ChainTrace {
    names: Vec<String>,
    stat_names: Vec<String>,
    draws: FixedSizeListBuilder<Float64Builder>,
    stats: Vec<Float64Builder>,
}

impl ChainTrace {
    /// An empty trace for draws labeled `names`, with one statistics column per
    /// entry of `stat_names`.
    pub fn new(names: Vec<String>, stat_names: Vec<String>) -> Self {
        let draws = FixedSizeListBuilder::new(Float64Builder::new(), names.len() as i32);
        let stats = stat_names.iter().map(|_| Float64Builder::new()).collect();
        Self {
            names,
            stat_names,
            draws,
            stats,
        }
    }

    /// An empty trace with the driver's parameter labels and statistics.
    pub fn for_driver<M: ParticleModel>(hmc: &HamiltonianMonteCarlo<M>) -> Self {
        let stat_names = STATS_KEY_MAP
            .iter()
            .map(|(_, public)| public.to_string())
            .collect();
        Self::new(hmc.names(), stat_names)
    }

    /// Take `num_draws` steps and record the state after each of them.
    pub fn sample<M: ParticleModel>(
        hmc: &mut HamiltonianMonteCarlo<M>,
        num_draws: u64,
    ) -> Result<Self> {
        let mut trace = Self::for_driver(hmc);
        for _ in 0..num_draws {
            hmc.step()?;
            trace.append_driver(hmc)?;
        }
        Ok(trace)
    }

    /// Rebuild a trace from recorded samples and statistics of equal length.
    pub fn from_accumulators(
        samples: &SampleAccumulator,
        stats: &StatisticsAccumulator,
    ) -> Result<Self> {
        if samples.len() != stats.len() {
            return Err(HmcError::DimensionMismatch {
                expected: samples.len(),
                got: stats.len(),
            });
        }
        let mut trace = Self::new(samples.keys().to_vec(), stats.keys().to_vec());
        for (draw, stat) in samples.rows().iter().zip(stats.samples().rows()) {
            trace.append(draw, stat)?;
        }
        Ok(trace)
    }

    /// Record the model's current optimized values and the latest statistics.
    pub fn append_driver<M: ParticleModel>(&mut self, hmc: &HamiltonianMonteCarlo<M>) -> Result<()> {
        let stats = hmc.last_stats().ok_or(HmcError::NoSamples)?;
        let values: Vec<f64> = public_stats(stats).into_iter().map(|(_, v)| v).collect();
        let draw = hmc.variables().interface().values(hmc.model());
        self.append(&draw, &values)
    }

    pub fn append(&mut self, draw: &[f64], stats: &[f64]) -> Result<()> {
        if draw.len() != self.names.len() {
            return Err(HmcError::DimensionMismatch {
                expected: self.names.len(),
                got: draw.len(),
            });
        }
        if stats.len() != self.stats.len() {
            return Err(HmcError::DimensionMismatch {
                expected: self.stats.len(),
                got: stats.len(),
            });
        }
        self.draws.values().append_slice(draw);
        self.draws.append(true);
        self.stats
            .iter_mut()
            .zip(stats)
            .for_each(|(builder, &value)| builder.append_value(value));
        Ok(())
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn stat_names(&self) -> &[String] {
        &self.stat_names
    }

    pub fn len(&self) -> usize {
        self.draws.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The draws so far, one fixed size list per draw.
    pub fn draws(&self) -> ArrayRef {
        ArrayBuilder::finish_cloned(&self.draws)
    }

    /// The statistics so far, one `Float64` column per statistic.
    pub fn stats(&self) -> StructArray {
        let fields: Vec<Field> = self
            .stat_names
            .iter()
            .map(|name| Field::new(name, DataType::Float64, false))
            .collect();
        let arrays: Vec<ArrayRef> = self
            .stats
            .iter()
            .map(|builder| Arc::new(builder.finish_cloned()) as ArrayRef)
            .collect();
        if arrays.is_empty() {
            return StructArray::new_empty_fields(self.len(), None);
        }
        StructArray::new(fields.into(), arrays, None)
    }
}
