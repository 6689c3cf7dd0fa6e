use std::{cell::RefCell, rc::Rc};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::{
    accumulator::{SampleAccumulator, StatisticsAccumulator},
    error::{HmcError, Result},
    kernel::{
        find_good_step_size, Hamiltonian, Metric, PhasePoint, TrajectorySampler, TransitionStats,
    },
    log_density::{ModelLogDensity, TransformedLogDensity},
    model::{ParticleIndex, ParticleModel},
    observer::{SaveAttributesOptimizerState, SharedOptimizerState},
    settings::{DivergencePolicy, HmcSettings, SamplerKind},
    variables::OptimizedVariables,
};

/// Kernel statistic names and the names under which the driver records them.
///
/// Kernel statistics without an entry (`is_accept`) are not recorded.
pub const STATS_KEY_MAP: [(&str, &str); 8] = [
    ("lp", "log_density"),
    ("accept_stat", "acceptance_rate"),
    ("stepsize", "step_size"),
    ("treedepth", "tree_depth"),
    ("n_leapfrog", "n_steps"),
    ("diverging", "numerical_error"),
    ("energy", "hamiltonian_energy"),
    ("energy_error", "hamiltonian_energy_error"),
];

/// Translate kernel statistics to the recorded names, in `STATS_KEY_MAP`
/// order.
pub fn public_stats(stats: &TransitionStats) -> Vec<(&'static str, f64)> {
    let native = stats.as_pairs();
    STATS_KEY_MAP
        .iter()
        .filter_map(|&(kernel_name, public)| {
            native
                .iter()
                .find(|(name, _)| *name == kernel_name)
                .map(|&(_, value)| (public, value))
        })
        .collect()
}

/// Where the driver is in its step cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverPhase {
    /// Ready for `before_sample`.
    Idle,
    /// The density was re-evaluated, ready for `sample`.
    Prepared,
    /// A new point was drawn, ready for `after_sample`.
    Sampled,
}

/// What the warm-up loop needs from a sampler.
pub trait Chain {
    /// Drop recorded statistics and samples. Nothing recorded is fine.
    fn clear_history(&mut self);

    /// Stop notifying observers until `restore_observers`.
    fn suspend_observers(&mut self);

    /// Undo `suspend_observers`. Nothing suspended is fine.
    fn restore_observers(&mut self);

    fn before_sample(&mut self) -> Result<()>;

    fn sample(&mut self) -> Result<()>;

    fn after_sample(&mut self) -> Result<()>;

    /// One full cycle.
    fn step(&mut self) -> Result<()> {
        self.before_sample()?;
        self.sample()?;
        self.after_sample()
    }

    /// The current position in free space.
    fn position(&self) -> &[f64];

    fn last_stats(&self) -> Option<&TransitionStats>;

    fn statistics(&self) -> Option<&StatisticsAccumulator>;

    fn is_diverging(&self) -> Result<bool>;

    fn step_size(&self) -> f64;

    fn metric(&self) -> &Metric;

    fn apply_adaptation(&mut self, step_size: f64, metric: Option<Metric>) -> Result<()>;
}

type ModelHamiltonian<M> = Hamiltonian<TransformedLogDensity<ModelLogDensity<M>>>;

/// Hamiltonian Monte Carlo over the optimized attributes of a model.
///
/// Owns the model while sampling. Every step runs `before_sample`,
/// `sample` and `after_sample` in this order; afterwards the model holds the
/// constrained values of the selected point.
pub struct HamiltonianMonteCarlo<M: ParticleModel> {
    variables: OptimizedVariables,
    hamiltonian: ModelHamiltonian<M>,
    sampler: TrajectorySampler,
    settings: HmcSettings,
    rng: ChaCha8Rng,
    point: PhasePoint,
    phase: DriverPhase,
    draw: u64,
    last_stats: Option<TransitionStats>,
    stats: Option<StatisticsAccumulator>,
    observers: Vec<SharedOptimizerState<M>>,
    suspended: Option<Vec<SharedOptimizerState<M>>>,
    sample_saver: Option<Rc<RefCell<SaveAttributesOptimizerState>>>,
}

impl<M: ParticleModel> HamiltonianMonteCarlo<M> {
    /// Set up the density, metric and sampler, and find an initial step size
    /// at the model's current state.
    pub fn new(model: M, variables: OptimizedVariables, settings: HmcSettings) -> Result<Self> {
        let sampler = match settings.sampler {
            SamplerKind::Dynamic if settings.max_depth == 0 => {
                return Err(HmcError::InvalidSetting("max_depth must be positive".into()));
            }
            SamplerKind::Static if settings.n_steps == 0 => {
                return Err(HmcError::InvalidSetting("n_steps must be positive".into()));
            }
            SamplerKind::Dynamic => TrajectorySampler::Nuts {
                max_depth: settings.max_depth,
            },
            SamplerKind::Static => TrajectorySampler::Static {
                n_steps: settings.n_steps,
            },
        };
        let metric = Metric::from_kind(&settings.metric, variables.free_dimension())?;
        let free = variables.free_values(&model)?;

        let density = ModelLogDensity::new(model, variables.interface().clone());
        let density = TransformedLogDensity::new(density, variables.transformation().clone())?;
        let mut hamiltonian = Hamiltonian::new(density, metric, 1., settings.max_energy_error)?;

        let mut rng = ChaCha8Rng::seed_from_u64(settings.seed);
        rng.set_stream(settings.chain);

        let point = hamiltonian.init_point(&free)?;
        find_good_step_size(&mut hamiltonian, &point, &mut rng)?;
        // the search left a proposal in the model
        let point = hamiltonian.init_point(&free)?;

        let mut driver = Self {
            variables,
            hamiltonian,
            sampler,
            settings,
            rng,
            point,
            phase: DriverPhase::Idle,
            draw: 0,
            last_stats: None,
            stats: None,
            observers: Vec::new(),
            suspended: None,
            sample_saver: None,
        };
        if driver.settings.save_samples {
            driver.set_save_samples(true);
        }
        Ok(driver)
    }

    pub fn model(&self) -> &M {
        self.hamiltonian.density().inner().model()
    }

    /// Mutable access to the model. Use [`set_position`](Self::set_position)
    /// to tell the sampler about changed attribute values.
    pub fn model_mut(&mut self) -> &mut M {
        self.hamiltonian.density_mut().inner_mut().model_mut()
    }

    pub fn into_model(self) -> M {
        self.hamiltonian.into_density().into_inner().into_model()
    }

    pub fn variables(&self) -> &OptimizedVariables {
        &self.variables
    }

    pub fn settings(&self) -> &HmcSettings {
        &self.settings
    }

    pub fn phase(&self) -> DriverPhase {
        self.phase
    }

    /// Number of samples drawn so far.
    pub fn draw_count(&self) -> u64 {
        self.draw
    }

    /// Parameter labels, aligned with the constrained values.
    pub fn names(&self) -> Vec<String> {
        self.variables.names(self.model())
    }

    /// The particles whose attributes are sampled.
    pub fn inputs(&self) -> Vec<ParticleIndex> {
        self.variables.interface().inputs()
    }

    /// Total energy of the current phase point.
    pub fn energy(&self) -> f64 {
        self.point.energy()
    }

    pub fn set_step_size(&mut self, step_size: f64) {
        *self.hamiltonian.step_size_mut() = step_size;
    }

    pub fn set_metric(&mut self, metric: Metric) -> Result<()> {
        self.hamiltonian.set_metric(metric)
    }

    /// Move the sampler to a new point in free space, and write it into the
    /// model.
    pub fn set_position(&mut self, free: &[f64]) -> Result<()> {
        self.expect_phase(DriverPhase::Idle, "Idle")?;
        self.point = self.hamiltonian.init_point(free)?;
        Ok(())
    }

    /// Move the sampler to the model's current state, after the model was
    /// changed from outside.
    pub fn sync_from_model(&mut self) -> Result<()> {
        let free = self.variables.free_values(self.model())?;
        self.set_position(&free)
    }

    /// Whether the last step diverged.
    pub fn is_diverging(&self) -> Result<bool> {
        self.last_stats
            .as_ref()
            .map(|stats| stats.diverging)
            .ok_or(HmcError::NoSamples)
    }

    /// Run `n` full steps and return the model's score at the final state.
    pub fn optimize(&mut self, n: u64) -> Result<f64> {
        for _ in 0..n {
            Chain::step(self)?;
        }
        self.model_mut().evaluate(false).map_err(HmcError::model)
    }

    /// Record the optimized attributes after every step. Enabling twice
    /// keeps a single recorder.
    pub fn set_save_samples(&mut self, save: bool) {
        self.settings.save_samples = save;
        match (save, self.sample_saver.is_some()) {
            (true, false) => {
                let saver = Rc::new(RefCell::new(SaveAttributesOptimizerState::new(
                    self.names(),
                )));
                let shared: SharedOptimizerState<M> = saver.clone();
                self.observers.push(shared);
                self.sample_saver = Some(saver);
            }
            (false, true) => {
                if let Some(saver) = self.sample_saver.take() {
                    let target = Rc::as_ptr(&saver);
                    let keep = |o: &SharedOptimizerState<M>| !std::ptr::addr_eq(Rc::as_ptr(o), target);
                    self.observers.retain(keep);
                    if let Some(suspended) = &mut self.suspended {
                        suspended.retain(keep);
                    }
                }
            }
            _ => {}
        }
    }

    pub fn add_optimizer_state(&mut self, state: SharedOptimizerState<M>) {
        self.observers.push(state);
    }

    /// Number of observers notified after each step.
    pub fn num_optimizer_states(&self) -> usize {
        self.observers.len()
    }

    /// Detach all active observers.
    pub fn take_optimizer_states(&mut self) -> Vec<SharedOptimizerState<M>> {
        std::mem::take(&mut self.observers)
    }

    /// Replace the active observers.
    pub fn set_optimizer_states(&mut self, states: Vec<SharedOptimizerState<M>>) {
        self.observers = states;
    }

    /// Hand the recorded statistics to the caller.
    pub fn take_stats(&mut self) -> Option<StatisticsAccumulator> {
        self.stats.take()
    }

    /// Hand the saved samples to the caller. Recording continues into a fresh
    /// accumulator.
    pub fn take_samples(&mut self) -> Option<SampleAccumulator> {
        self.sample_saver
            .as_ref()
            .map(|saver| saver.borrow_mut().take_samples())
    }

    /// The saved samples, if sample saving is enabled.
    pub fn samples(&self) -> Option<SampleAccumulator> {
        self.sample_saver
            .as_ref()
            .map(|saver| saver.borrow().samples().clone())
    }

    fn expect_phase(&self, expected: DriverPhase, name: &'static str) -> Result<()> {
        if self.phase != expected {
            return Err(HmcError::InvalidPhase {
                expected: name,
                found: self.phase,
            });
        }
        Ok(())
    }

    fn record(&mut self, stats: &TransitionStats) -> Result<()> {
        let named = public_stats(stats);
        let values: Vec<f64> = named.iter().map(|&(_, value)| value).collect();
        let accumulator = self.stats.get_or_insert_with(|| {
            StatisticsAccumulator::new(named.iter().map(|&(key, _)| key.to_string()).collect())
        });
        accumulator.add_sample(&values)
    }
}

impl<M: ParticleModel> Chain for HamiltonianMonteCarlo<M> {
    fn clear_history(&mut self) {
        if let Some(stats) = &mut self.stats {
            stats.clear();
        }
        if let Some(saver) = &self.sample_saver {
            saver.borrow_mut().clear();
        }
    }

    fn suspend_observers(&mut self) {
        if self.suspended.is_none() {
            self.suspended = Some(self.take_optimizer_states());
        }
    }

    fn restore_observers(&mut self) {
        if let Some(mut suspended) = self.suspended.take() {
            suspended.append(&mut self.observers);
            self.observers = suspended;
        }
    }

    /// Re-evaluate the density at the current point, so that the model and
    /// the gradient agree with it.
    fn before_sample(&mut self) -> Result<()> {
        self.expect_phase(DriverPhase::Idle, "Idle")?;
        self.point = self.hamiltonian.init_point(&self.point.position)?;
        self.phase = DriverPhase::Prepared;
        Ok(())
    }

    fn sample(&mut self) -> Result<()> {
        self.expect_phase(DriverPhase::Prepared, "Prepared")?;
        self.phase = DriverPhase::Idle;
        let (point, stats) =
            self.sampler
                .transition(&mut self.hamiltonian, &self.point, &mut self.rng)?;
        self.point = point;
        self.draw += 1;
        self.record(&stats)?;
        let diverging = stats.diverging;
        if diverging {
            debug!(draw = self.draw, info = ?stats.divergence_info, "Divergent transition");
        }
        self.last_stats = Some(stats);
        self.phase = DriverPhase::Sampled;
        if diverging && self.settings.divergence_policy == DivergencePolicy::Abort {
            return Err(HmcError::Divergence { draw: self.draw });
        }
        Ok(())
    }

    /// Write the selected point into the model and notify the observers.
    fn after_sample(&mut self) -> Result<()> {
        self.expect_phase(DriverPhase::Sampled, "Sampled")?;
        let values = self
            .variables
            .transformation()
            .constrain(&self.point.position)?;
        let model = self.hamiltonian.density_mut().inner_mut().model_mut();
        self.variables.interface().set_values(model, &values)?;
        if !self.observers.is_empty() {
            model.update().map_err(HmcError::model)?;
            for observer in &self.observers {
                observer
                    .borrow_mut()
                    .update(model, self.variables.interface())?;
            }
        }
        self.phase = DriverPhase::Idle;
        Ok(())
    }

    fn position(&self) -> &[f64] {
        &self.point.position
    }

    fn last_stats(&self) -> Option<&TransitionStats> {
        self.last_stats.as_ref()
    }

    fn statistics(&self) -> Option<&StatisticsAccumulator> {
        self.stats.as_ref()
    }

    fn is_diverging(&self) -> Result<bool> {
        HamiltonianMonteCarlo::is_diverging(self)
    }

    fn step_size(&self) -> f64 {
        self.hamiltonian.step_size()
    }

    fn metric(&self) -> &Metric {
        self.hamiltonian.metric()
    }

    fn apply_adaptation(&mut self, step_size: f64, metric: Option<Metric>) -> Result<()> {
        self.set_step_size(step_size);
        if let Some(metric) = metric {
            self.set_metric(metric)?;
        }
        Ok(())
    }
}
