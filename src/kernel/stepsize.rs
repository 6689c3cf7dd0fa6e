use tracing::debug;

use crate::{
    error::Result,
    kernel::hamiltonian::{Direction, Hamiltonian, PhasePoint},
    log_density::LogDensity,
};

/// Settings for step size adaptation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DualAverageOptions {
    pub k: f64,
    pub t0: f64,
    pub gamma: f64,
    /// `mu` is set to `ln(bias_factor * step_size)` on every restart.
    pub bias_factor: f64,
}

impl Default for DualAverageOptions {
    fn default() -> DualAverageOptions {
        DualAverageOptions {
            k: 0.75,
            t0: 10.,
            gamma: 0.05,
            bias_factor: 10.,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DualAverage {
    log_step: f64,
    log_step_adapted: f64,
    hbar: f64,
    mu: f64,
    count: u64,
    settings: DualAverageOptions,
}

impl DualAverage {
    pub fn new(settings: DualAverageOptions, initial_step: f64) -> DualAverage {
        DualAverage {
            log_step: initial_step.ln(),
            log_step_adapted: initial_step.ln(),
            hbar: 0.,
            mu: (settings.bias_factor * initial_step).ln(),
            count: 1,
            settings,
        }
    }

    pub fn advance(&mut self, accept_stat: f64, target: f64) {
        let w = 1. / (self.count as f64 + self.settings.t0);
        self.hbar = (1. - w) * self.hbar + w * (target - accept_stat);
        self.log_step = self.mu - self.hbar * (self.count as f64).sqrt() / self.settings.gamma;
        let mk = (self.count as f64).powf(-self.settings.k);
        self.log_step_adapted = mk * self.log_step + (1. - mk) * self.log_step_adapted;
        self.count += 1;
    }

    pub fn current_step_size(&self) -> f64 {
        self.log_step.exp()
    }

    pub fn current_step_size_adapted(&self) -> f64 {
        self.log_step_adapted.exp()
    }

    pub fn reset(&mut self, initial_step: f64) {
        self.log_step = initial_step.ln();
        self.log_step_adapted = initial_step.ln();
        self.hbar = 0f64;
        self.mu = (self.settings.bias_factor * initial_step).ln();
        self.count = 1;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RunningMean {
    sum: f64,
    count: u64,
}

impl RunningMean {
    pub(crate) fn new() -> RunningMean {
        RunningMean { sum: 0., count: 0 }
    }

    pub(crate) fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub(crate) fn current(&self) -> f64 {
        self.sum / self.count as f64
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }
}

const MAX_SEARCH_STEPS: usize = 100;
const MIN_STEP_SIZE: f64 = 1e-10;
const MAX_STEP_SIZE: f64 = 1e7;

/// Heuristic for a reasonable first step size (Hoffman and Gelman, 2014,
/// Algorithm 4): double or halve the step size until the acceptance
/// probability of a single leapfrog step crosses one half.
///
/// The hamiltonian's step size is left at the result.
pub fn find_good_step_size<D, R>(
    hamiltonian: &mut Hamiltonian<D>,
    init: &PhasePoint,
    rng: &mut R,
) -> Result<f64>
where
    D: LogDensity,
    R: rand::Rng + ?Sized,
{
    let mut point = init.clone();
    hamiltonian.refresh_momentum(&mut point, rng);
    let energy = point.energy();

    *hamiltonian.step_size_mut() = 1.;
    let mut log_accept = log_accept_single_step(hamiltonian, &point, energy)?;
    let direction: f64 = if log_accept > 0.5f64.ln() { 1. } else { -1. };

    for _ in 0..MAX_SEARCH_STEPS {
        if direction * log_accept <= -direction * 2f64.ln() {
            break;
        }
        let step = hamiltonian.step_size() * 2f64.powf(direction);
        if !(MIN_STEP_SIZE..=MAX_STEP_SIZE).contains(&step) {
            break;
        }
        *hamiltonian.step_size_mut() = step;
        log_accept = log_accept_single_step(hamiltonian, &point, energy)?;
    }
    let step = hamiltonian.step_size();
    debug!(step_size = step, "Found initial step size");
    Ok(step)
}

fn log_accept_single_step<D: LogDensity>(
    hamiltonian: &mut Hamiltonian<D>,
    point: &PhasePoint,
    energy: f64,
) -> Result<f64> {
    Ok(match hamiltonian.leapfrog(point, Direction::Forward, energy)? {
        Ok(end) => (energy - end.energy()).min(0.),
        Err(_) => f64::NEG_INFINITY,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{hamiltonian::tests::Normal, metric::Metric};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn dual_average_converges_to_target() {
        // acceptance drops as the step size grows
        let accept = |step: f64| (-step * step).exp();
        let mut dual = DualAverage::new(DualAverageOptions::default(), 1.);
        for _ in 0..2000 {
            let step = dual.current_step_size();
            dual.advance(accept(step), 0.8);
        }
        let step = dual.current_step_size_adapted();
        assert!((accept(step) - 0.8).abs() < 0.05, "step {step}");

        dual.reset(0.3);
        assert!((dual.current_step_size() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn running_mean() {
        let mut mean = RunningMean::new();
        mean.add(1.);
        mean.add(0.);
        assert_eq!(mean.current(), 0.5);
        assert_eq!(mean.count(), 2);
    }

    #[test]
    fn initial_step_size_scales_with_width() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut ham = Hamiltonian::new(Normal::new(10), Metric::unit(10), 1., 1000.).unwrap();
        let init = ham.init_point(&[0.1; 10]).unwrap();
        let step = find_good_step_size(&mut ham, &init, &mut rng).unwrap();
        assert!(step > 0.05 && step <= 4., "step {step}");
        assert_eq!(ham.step_size(), step);
    }
}
