use itertools::Itertools;

use crate::{
    error::{HmcError, Result},
    model::{FloatKey, KeyParticle, ParticleIndex, ParticleModel},
};

/// Reads and writes a fixed, ordered list of attributes of a model, and
/// reads the score derivatives for them.
///
/// This is the only path through which the sampler changes the model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueGradientInterface {
    pairs: Vec<KeyParticle>,
}

impl ValueGradientInterface {
    pub fn new(pairs: Vec<KeyParticle>) -> Self {
        Self { pairs }
    }

    pub fn from_keys(keys: &[FloatKey], particles: &[ParticleIndex]) -> Result<Self> {
        if keys.len() != particles.len() {
            return Err(HmcError::DimensionMismatch {
                expected: keys.len(),
                got: particles.len(),
            });
        }
        let pairs = keys
            .iter()
            .zip(particles)
            .map(|(&key, &pi)| KeyParticle::new(key, pi))
            .collect();
        Ok(Self { pairs })
    }

    pub fn dimension(&self) -> usize {
        self.pairs.len()
    }

    pub fn pairs(&self) -> &[KeyParticle] {
        &self.pairs
    }

    pub fn float_keys(&self) -> Vec<FloatKey> {
        self.pairs.iter().map(|kp| kp.key).collect()
    }

    pub fn particle_indexes(&self) -> Vec<ParticleIndex> {
        self.pairs.iter().map(|kp| kp.particle).collect()
    }

    /// The distinct particles touched by this interface, in first-seen order.
    pub fn inputs(&self) -> Vec<ParticleIndex> {
        self.pairs.iter().map(|kp| kp.particle).unique().collect()
    }

    pub fn values<M: ParticleModel>(&self, model: &M) -> Vec<f64> {
        self.pairs
            .iter()
            .map(|kp| model.attribute(kp.key, kp.particle))
            .collect()
    }

    pub fn set_values<M: ParticleModel>(&self, model: &mut M, values: &[f64]) -> Result<()> {
        if values.len() != self.dimension() {
            return Err(HmcError::DimensionMismatch {
                expected: self.dimension(),
                got: values.len(),
            });
        }
        self.write_values(model, values).map_err(HmcError::model)
    }

    /// Like `set_values`, keeping the model's own error type. The length
    /// must already match.
    pub(crate) fn write_values<M: ParticleModel>(
        &self,
        model: &mut M,
        values: &[f64],
    ) -> std::result::Result<(), M::Error> {
        assert!(values.len() == self.dimension());
        for (kp, &value) in self.pairs.iter().zip(values) {
            model.set_attribute(kp.key, kp.particle, value)?;
        }
        Ok(())
    }

    /// Score derivatives from the model's last evaluation with derivatives.
    pub fn gradient<M: ParticleModel>(&self, model: &M) -> Vec<f64> {
        let mut out = vec![0f64; self.dimension()];
        self.gradient_into(model, &mut out);
        out
    }

    pub(crate) fn gradient_into<M: ParticleModel>(&self, model: &M, out: &mut [f64]) {
        assert!(out.len() == self.dimension());
        self.pairs
            .iter()
            .zip(out)
            .for_each(|(kp, out)| *out = model.derivative(kp.key, kp.particle));
    }
}
