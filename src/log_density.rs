use crate::{
    constraint::Constraint,
    error::{HmcError, Result},
    interface::ValueGradientInterface,
    model::{LogpError, ParticleModel},
};

/// A differentiable log density over a flat vector.
pub trait LogDensity {
    type Error: LogpError;

    fn dim(&self) -> usize;

    fn logp(&mut self, position: &[f64]) -> std::result::Result<f64, Self::Error>;

    /// Compute the log density and write its gradient into `grad`.
    fn logp_with_gradient(
        &mut self,
        position: &[f64],
        grad: &mut [f64],
    ) -> std::result::Result<f64, Self::Error>;
}

/// The model's score as a log density over the attributes of an interface.
///
/// Evaluating writes the position into the model first, so the model always
/// holds the point that was evaluated last.
#[derive(Debug)]
pub struct ModelLogDensity<M: ParticleModel> {
    model: M,
    interface: ValueGradientInterface,
    last_score: Option<f64>,
}

impl<M: ParticleModel> ModelLogDensity<M> {
    pub fn new(model: M, interface: ValueGradientInterface) -> Self {
        Self {
            model,
            interface,
            last_score: None,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub fn interface(&self) -> &ValueGradientInterface {
        &self.interface
    }

    /// The score of the last successful evaluation.
    pub fn last_score(&self) -> Option<f64> {
        self.last_score
    }
}

impl<M: ParticleModel> LogDensity for ModelLogDensity<M> {
    type Error = M::Error;

    fn dim(&self) -> usize {
        self.interface.dimension()
    }

    fn logp(&mut self, position: &[f64]) -> std::result::Result<f64, Self::Error> {
        self.interface.write_values(&mut self.model, position)?;
        let score = self.model.evaluate(false)?;
        self.last_score = Some(score);
        Ok(-score)
    }

    fn logp_with_gradient(
        &mut self,
        position: &[f64],
        grad: &mut [f64],
    ) -> std::result::Result<f64, Self::Error> {
        self.interface.write_values(&mut self.model, position)?;
        let score = self.model.evaluate(true)?;
        self.interface.gradient_into(&self.model, grad);
        grad.iter_mut().for_each(|g| *g = -*g);
        self.last_score = Some(score);
        Ok(-score)
    }
}

/// A log density over constrained space, seen from free space.
///
/// The value includes the log-Jacobian of the constraint, and the gradient
/// is pulled back through it.
#[derive(Debug)]
pub struct TransformedLogDensity<D: LogDensity> {
    inner: D,
    constraint: Constraint,
    grad_constrained: Box<[f64]>,
}

impl<D: LogDensity> TransformedLogDensity<D> {
    pub fn new(inner: D, constraint: Constraint) -> Result<Self> {
        if inner.dim() != constraint.constrained_dimension() {
            return Err(HmcError::DimensionMismatch {
                expected: constraint.constrained_dimension(),
                got: inner.dim(),
            });
        }
        let grad_constrained = vec![0f64; inner.dim()].into();
        Ok(Self {
            inner,
            constraint,
            grad_constrained,
        })
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut D {
        &mut self.inner
    }

    pub fn into_inner(self) -> D {
        self.inner
    }

    pub fn constraint(&self) -> &Constraint {
        &self.constraint
    }
}

impl<D: LogDensity> LogDensity for TransformedLogDensity<D> {
    type Error = D::Error;

    fn dim(&self) -> usize {
        self.constraint.free_dimension()
    }

    fn logp(&mut self, position: &[f64]) -> std::result::Result<f64, Self::Error> {
        let (constrained, push) = self.constraint.push_density(position);
        let logp = self.inner.logp(&constrained)?;
        Ok(push.push(logp))
    }

    fn logp_with_gradient(
        &mut self,
        position: &[f64],
        grad: &mut [f64],
    ) -> std::result::Result<f64, Self::Error> {
        let (constrained, push) = self.constraint.push_density(position);
        let logp = self
            .inner
            .logp_with_gradient(&constrained, &mut self.grad_constrained)?;
        Ok(push.push_gradient_unchecked(logp, &self.grad_constrained, grad))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        keys,
        test_model::{ToyModel, ToyParticle},
        variables::OptimizedVariables,
    };
    use approx::assert_abs_diff_eq;

    fn density() -> TransformedLogDensity<ModelLogDensity<ToyModel>> {
        let mut model = ToyModel::default();
        model.add(
            ToyParticle::xyz("a", [0.5, -1., 2.])
                .restrain(keys::X, 1., 2.)
                .restrain(keys::Z, 0., 1.),
        );
        model.add(ToyParticle::nuisance("s", 2., (0., 5.)).restrain(keys::NUISANCE, 3., 0.5));
        model.add(ToyParticle::new("r").radius(1.5).restrain(keys::RADIUS, 1., 1.));
        let vars = OptimizedVariables::with_default_builders(&model);
        let inner = ModelLogDensity::new(model, vars.interface().clone());
        TransformedLogDensity::new(inner, vars.transformation().clone()).unwrap()
    }

    #[test]
    fn model_density_is_negative_score() {
        let mut model = ToyModel::default();
        model.add(ToyParticle::xyz("a", [0.; 3]).restrain(keys::X, 1., 2.));
        let interface =
            ValueGradientInterface::from_keys(&keys::XYZ, &[crate::ParticleIndex(0); 3]).unwrap();
        let mut density = ModelLogDensity::new(model, interface);
        let mut grad = [0f64; 3];
        let logp = density.logp_with_gradient(&[3., 0., 0.], &mut grad).unwrap();
        assert_abs_diff_eq!(logp, -4.);
        assert_abs_diff_eq!(grad[0], -4.);
        assert_eq!(density.last_score(), Some(4.));
        assert_eq!(density.model().attribute(keys::X, crate::ParticleIndex(0)), 3.);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let mut density = density();
        let n = density.dim();
        assert_eq!(n, 5);
        let y = [0.3, -0.2, 0.7, 0.1, -0.4];
        let mut grad = vec![0f64; n];
        let logp = density.logp_with_gradient(&y, &mut grad).unwrap();
        assert_abs_diff_eq!(logp, density.logp(&y).unwrap(), epsilon = 1e-12);

        let h = 1e-6;
        for i in 0..n {
            let mut up = y;
            let mut down = y;
            up[i] += h;
            down[i] -= h;
            let fd = (density.logp(&up).unwrap() - density.logp(&down).unwrap()) / (2. * h);
            assert_abs_diff_eq!(grad[i], fd, epsilon = 1e-5);
        }
    }

    #[test]
    fn rejects_mismatched_constraint() {
        let model = ToyModel::default();
        let inner = ModelLogDensity::new(model, ValueGradientInterface::default());
        let result = TransformedLogDensity::new(inner, Constraint::identity(2));
        assert!(matches!(result, Err(HmcError::DimensionMismatch { .. })));
    }
}
