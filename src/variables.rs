use rand::Rng;
use rand_distr::StandardNormal;
use tracing::debug;

use crate::{
    builder::{default_builders, TransformationBuilder},
    constraint::Constraint,
    error::{HmcError, Result},
    interface::ValueGradientInterface,
    model::{KeyParticle, ParticleModel},
};

/// The set of optimized attributes of a model, as seen by the sampler.
///
/// Holds the ordered attribute list, the joint constraint mapping free space
/// onto it and the interface that reads and writes exactly those attributes.
/// The order is builder first, then particle, and is stable until the next
/// call to [`update_variables`](Self::update_variables).
#[derive(Debug, Clone)]
pub struct OptimizedVariables {
    builders: Vec<TransformationBuilder>,
    pairs: Vec<KeyParticle>,
    joint: Constraint,
    interface: ValueGradientInterface,
}

impl OptimizedVariables {
    pub fn new<M: ParticleModel>(model: &M, builders: Vec<TransformationBuilder>) -> Self {
        let mut variables = Self {
            builders,
            pairs: Vec::new(),
            joint: Constraint::joint(Vec::new()),
            interface: ValueGradientInterface::default(),
        };
        variables.update_variables(model);
        variables
    }

    pub fn with_default_builders<M: ParticleModel>(model: &M) -> Self {
        Self::new(model, default_builders())
    }

    /// Rebuild the attribute list and the joint constraint from the model's
    /// current optimized attributes.
    ///
    /// Any free-space vector or sample index obtained before the rebuild is
    /// invalid afterwards.
    pub fn update_variables<M: ParticleModel>(&mut self, model: &M) {
        self.pairs.clear();
        let mut constraints = Vec::new();
        let particles = model.particle_indexes();
        for builder in &self.builders {
            for &pi in &particles {
                let Some((pairs, constraint)) = builder.build(model, pi) else {
                    continue;
                };
                self.pairs.extend(pairs);
                constraints.push(constraint);
            }
        }
        self.joint = Constraint::joint(constraints);
        self.interface = ValueGradientInterface::new(self.pairs.clone());
        debug!(
            free = self.joint.free_dimension(),
            constrained = self.joint.constrained_dimension(),
            "Built optimized variables"
        );
    }

    /// Draw a random free point with standard deviation `sigma`, and write
    /// the corresponding constrained values into the model.
    pub fn shuffle<M: ParticleModel, R: Rng + ?Sized>(
        &self,
        model: &mut M,
        sigma: f64,
        rng: &mut R,
    ) -> Result<()> {
        let free: Vec<f64> = (0..self.free_dimension())
            .map(|_| {
                let z: f64 = rng.sample(StandardNormal);
                sigma * z
            })
            .collect();
        let values = self.joint.constrain(&free)?;
        self.interface.set_values(model, &values)?;
        model.update().map_err(HmcError::model)
    }

    pub fn transformation(&self) -> &Constraint {
        &self.joint
    }

    pub fn interface(&self) -> &ValueGradientInterface {
        &self.interface
    }

    pub fn builders(&self) -> &[TransformationBuilder] {
        &self.builders
    }

    pub fn pairs(&self) -> &[KeyParticle] {
        &self.pairs
    }

    pub fn free_dimension(&self) -> usize {
        self.joint.free_dimension()
    }

    pub fn constrained_dimension(&self) -> usize {
        self.joint.constrained_dimension()
    }

    /// The current model state as a free-space point.
    pub fn free_values<M: ParticleModel>(&self, model: &M) -> Result<Vec<f64>> {
        self.joint.free(&self.interface.values(model))
    }

    /// One label per optimized attribute, `<particle name>_<key>`.
    pub fn names<M: ParticleModel>(&self, model: &M) -> Vec<String> {
        self.pairs
            .iter()
            .map(|kp| format!("{}_{}", model.particle_name(kp.particle), kp.key))
            .collect()
    }
}
