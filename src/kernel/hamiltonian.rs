use rand::distr::{Distribution, StandardUniform};

use crate::{
    error::{HmcError, Result},
    kernel::metric::Metric,
    log_density::LogDensity,
    math::{axpy, axpy_out, scalar_prods2, scalar_prods3},
    model::LogpError,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Distribution<Direction> for StandardUniform {
    fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> Direction {
        if rng.random::<bool>() {
            Direction::Forward
        } else {
            Direction::Backward
        }
    }
}

/// A point in phase space.
///
/// Also stores the sum of momentum terms from the initial point of the
/// trajectory to this point, for the turning criterion.
#[derive(Debug, Clone)]
pub struct PhasePoint {
    pub position: Box<[f64]>,
    pub momentum: Box<[f64]>,
    pub velocity: Box<[f64]>,
    pub gradient: Box<[f64]>,
    pub p_sum: Box<[f64]>,
    pub logp: f64,
    pub kinetic_energy: f64,
    pub index_in_trajectory: i64,
}

impl PhasePoint {
    fn new(dim: usize) -> Self {
        Self {
            position: vec![0f64; dim].into(),
            momentum: vec![0f64; dim].into(),
            velocity: vec![0f64; dim].into(),
            gradient: vec![0f64; dim].into(),
            p_sum: vec![0f64; dim].into(),
            logp: f64::NEG_INFINITY,
            kinetic_energy: 0.,
            index_in_trajectory: 0,
        }
    }

    pub fn potential_energy(&self) -> f64 {
        -self.logp
    }

    /// The total energy (potential + kinetic)
    pub fn energy(&self) -> f64 {
        self.potential_energy() + self.kinetic_energy
    }

    /// Generalized no-U-turn criterion on the span between two points.
    pub fn is_turning(&self, other: &Self) -> bool {
        let (start, end) = if self.index_in_trajectory < other.index_in_trajectory {
            (self, other)
        } else {
            (other, self)
        };

        let a = start.index_in_trajectory;
        let b = end.index_in_trajectory;

        assert!(a < b);
        let (turn1, turn2) = if (a >= 0) & (b >= 0) {
            scalar_prods3(
                &end.p_sum,
                &start.p_sum,
                &start.momentum,
                &end.velocity,
                &start.velocity,
            )
        } else if (b >= 0) & (a < 0) {
            scalar_prods2(&end.p_sum, &start.p_sum, &end.velocity, &start.velocity)
        } else {
            assert!((a < 0) & (b < 0));
            scalar_prods3(
                &start.p_sum,
                &end.p_sum,
                &end.momentum,
                &end.velocity,
                &start.velocity,
            )
        };

        (turn1 < 0.) | (turn2 < 0.)
    }
}

/// Why a leapfrog step was flagged as divergent.
#[derive(Debug, Clone, PartialEq)]
pub struct DivergenceInfo {
    /// Energy error at the end of the diverging step, if the log density
    /// could be evaluated there.
    pub energy_error: Option<f64>,
    /// Message of the recoverable log density error, if any.
    pub logp_error: Option<String>,
}

/// A log density together with the metric that defines the kinetic energy,
/// and the integrator step size.
#[derive(Debug)]
pub struct Hamiltonian<D: LogDensity> {
    density: D,
    metric: Metric,
    step_size: f64,
    max_energy_error: f64,
}

impl<D: LogDensity> Hamiltonian<D> {
    pub fn new(density: D, metric: Metric, step_size: f64, max_energy_error: f64) -> Result<Self> {
        if density.dim() != metric.dim() {
            return Err(HmcError::DimensionMismatch {
                expected: density.dim(),
                got: metric.dim(),
            });
        }
        Ok(Self {
            density,
            metric,
            step_size,
            max_energy_error,
        })
    }

    pub fn dim(&self) -> usize {
        self.density.dim()
    }

    pub fn density(&self) -> &D {
        &self.density
    }

    pub fn density_mut(&mut self) -> &mut D {
        &mut self.density
    }

    pub fn into_density(self) -> D {
        self.density
    }

    pub fn metric(&self) -> &Metric {
        &self.metric
    }

    pub fn set_metric(&mut self, metric: Metric) -> Result<()> {
        if metric.dim() != self.dim() {
            return Err(HmcError::DimensionMismatch {
                expected: self.dim(),
                got: metric.dim(),
            });
        }
        self.metric = metric;
        Ok(())
    }

    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    pub fn step_size_mut(&mut self) -> &mut f64 {
        &mut self.step_size
    }

    pub fn max_energy_error(&self) -> f64 {
        self.max_energy_error
    }

    /// Evaluate the density at `position`. The momentum is left at zero, it
    /// is set by [`refresh_momentum`](Self::refresh_momentum).
    ///
    /// Any density error is fatal here, there is no trajectory to absorb it.
    /// So is a non-finite position or log density: every energy error from
    /// such a point is NaN and no proposal would ever be accepted.
    pub fn init_point(&mut self, position: &[f64]) -> Result<PhasePoint> {
        if position.len() != self.dim() {
            return Err(HmcError::DimensionMismatch {
                expected: self.dim(),
                got: position.len(),
            });
        }
        if let Some(&value) = position.iter().find(|y| !y.is_finite()) {
            return Err(HmcError::NonFiniteStart {
                what: "free value",
                value,
            });
        }
        let mut point = PhasePoint::new(self.dim());
        point.position.copy_from_slice(position);
        point.logp = self
            .density
            .logp_with_gradient(&point.position, &mut point.gradient)
            .map_err(HmcError::model)?;
        if !point.logp.is_finite() {
            return Err(HmcError::NonFiniteStart {
                what: "log density",
                value: point.logp,
            });
        }
        Ok(point)
    }

    /// Draw a new momentum and make `point` the first in a trajectory.
    pub fn refresh_momentum<R: rand::Rng + ?Sized>(&self, point: &mut PhasePoint, rng: &mut R) {
        self.metric.randomize_momentum(&mut point.momentum, rng);
        self.metric
            .update_velocity(&point.momentum, &mut point.velocity);
        point.kinetic_energy = self.metric.kinetic_energy(&point.momentum, &point.velocity);
        point.index_in_trajectory = 0;
        point.p_sum.copy_from_slice(&point.momentum);
    }

    /// Perform one leapfrog step.
    ///
    /// Return either an unrecoverable error, a new point or a divergence.
    pub fn leapfrog(
        &mut self,
        start: &PhasePoint,
        dir: Direction,
        initial_energy: f64,
    ) -> Result<std::result::Result<PhasePoint, DivergenceInfo>> {
        let mut out = start.clone();

        let sign = match dir {
            Direction::Forward => 1,
            Direction::Backward => -1,
        };
        let epsilon = (sign as f64) * self.step_size;

        axpy_out(
            &start.gradient,
            &start.momentum,
            epsilon / 2.,
            &mut out.momentum,
        );
        self.metric.update_velocity(&out.momentum, &mut out.velocity);
        axpy_out(&out.velocity, &start.position, epsilon, &mut out.position);

        match self
            .density
            .logp_with_gradient(&out.position, &mut out.gradient)
        {
            Ok(logp) => out.logp = logp,
            Err(err) if err.is_recoverable() => {
                return Ok(Err(DivergenceInfo {
                    energy_error: None,
                    logp_error: Some(err.to_string()),
                }));
            }
            Err(err) => return Err(HmcError::model(err)),
        }

        axpy(&out.gradient, &mut out.momentum, epsilon / 2.);
        self.metric.update_velocity(&out.momentum, &mut out.velocity);
        out.kinetic_energy = self.metric.kinetic_energy(&out.momentum, &out.velocity);

        out.index_in_trajectory = start.index_in_trajectory + sign;
        if out.index_in_trajectory == -1 {
            out.p_sum.copy_from_slice(&out.momentum);
        } else {
            axpy_out(&out.momentum, &start.p_sum, 1., &mut out.p_sum);
        }

        let energy_error = out.energy() - initial_energy;
        if (energy_error.abs() > self.max_energy_error) | !energy_error.is_finite() {
            return Ok(Err(DivergenceInfo {
                energy_error: Some(energy_error),
                logp_error: None,
            }));
        }

        Ok(Ok(out))
    }
}
