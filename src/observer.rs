//! Passive observers notified after every driver step.

use std::{cell::RefCell, rc::Rc};

use crate::{
    accumulator::SampleAccumulator,
    error::Result,
    interface::ValueGradientInterface,
    model::ParticleModel,
};

/// Called by the driver after it wrote a new position into the model and
/// updated the model.
pub trait OptimizerState<M: ParticleModel> {
    fn update(&mut self, model: &M, interface: &ValueGradientInterface) -> Result<()>;
}

/// A shared handle to an observer, as held by the driver's registry.
pub type SharedOptimizerState<M> = Rc<RefCell<dyn OptimizerState<M>>>;

/// Records the optimized attribute values after every step.
#[derive(Debug, Clone)]
pub struct SaveAttributesOptimizerState {
    samples: SampleAccumulator,
}

impl SaveAttributesOptimizerState {
    pub fn new(names: Vec<String>) -> Self {
        Self {
            samples: SampleAccumulator::new(names),
        }
    }

    pub fn samples(&self) -> &SampleAccumulator {
        &self.samples
    }

    /// Hand out the recorded samples, leaving an empty accumulator with the
    /// same keys behind.
    pub fn take_samples(&mut self) -> SampleAccumulator {
        let empty = SampleAccumulator::new(self.samples.keys().to_vec());
        std::mem::replace(&mut self.samples, empty)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl<M: ParticleModel> OptimizerState<M> for SaveAttributesOptimizerState {
    fn update(&mut self, model: &M, interface: &ValueGradientInterface) -> Result<()> {
        self.samples.add_sample(&interface.values(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        keys,
        test_model::{ToyModel, ToyParticle},
    };
    use pretty_assertions::assert_eq;

    #[test]
    fn saves_interface_values() {
        let mut model = ToyModel::default();
        let a = model.add(ToyParticle::xyz("a", [1., 2., 3.]));
        let interface = ValueGradientInterface::from_keys(&[keys::X, keys::Z], &[a, a]).unwrap();
        let mut state = SaveAttributesOptimizerState::new(vec!["a_x".into(), "a_z".into()]);

        state.update(&model, &interface).unwrap();
        interface.set_values(&mut model, &[4., 5.]).unwrap();
        state.update(&model, &interface).unwrap();

        assert_eq!(state.samples().get_key_samples("a_z").unwrap(), vec![3., 5.]);
        let taken = state.take_samples();
        assert_eq!(taken.len(), 2);
        assert!(state.samples().is_empty());
        assert_eq!(state.samples().keys(), taken.keys());
    }
}
