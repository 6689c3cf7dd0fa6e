use crate::{
    error::Result,
    kernel::{
        hamiltonian::{Direction, DivergenceInfo, Hamiltonian, PhasePoint},
        stepsize::RunningMean,
    },
    log_density::LogDensity,
    math::logaddexp,
};

/// Statistics of one transition, under the kernel's own names.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionStats {
    pub lp: f64,
    pub is_accept: bool,
    pub accept_stat: f64,
    pub stepsize: f64,
    pub treedepth: u64,
    pub n_leapfrog: u64,
    pub diverging: bool,
    pub energy: f64,
    pub energy_error: f64,
    pub divergence_info: Option<DivergenceInfo>,
}

impl TransitionStats {
    /// Every scalar statistic as `(name, value)`, in a fixed order.
    pub fn as_pairs(&self) -> [(&'static str, f64); 9] {
        [
            ("lp", self.lp),
            ("is_accept", f64::from(u8::from(self.is_accept))),
            ("accept_stat", self.accept_stat),
            ("stepsize", self.stepsize),
            ("treedepth", self.treedepth as f64),
            ("n_leapfrog", self.n_leapfrog as f64),
            ("diverging", f64::from(u8::from(self.diverging))),
            ("energy", self.energy),
            ("energy_error", self.energy_error),
        ]
    }
}

/// Builds one trajectory from a phase point and selects the next state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrajectorySampler {
    /// `n_steps` leapfrog steps, accepted or rejected as a whole.
    Static { n_steps: u64 },
    /// Multinomial no-U-turn sampling with a maximum tree depth.
    Nuts { max_depth: u64 },
}

impl TrajectorySampler {
    /// Refresh the momentum of `init` and draw the next point.
    pub fn transition<D, R>(
        &self,
        hamiltonian: &mut Hamiltonian<D>,
        init: &PhasePoint,
        rng: &mut R,
    ) -> Result<(PhasePoint, TransitionStats)>
    where
        D: LogDensity,
        R: rand::Rng + ?Sized,
    {
        let mut init = init.clone();
        hamiltonian.refresh_momentum(&mut init, rng);
        match *self {
            TrajectorySampler::Static { n_steps } => {
                static_draw(hamiltonian, init, n_steps, rng)
            }
            TrajectorySampler::Nuts { max_depth } => nuts_draw(hamiltonian, init, max_depth, rng),
        }
    }
}

fn static_draw<D, R>(
    hamiltonian: &mut Hamiltonian<D>,
    init: PhasePoint,
    n_steps: u64,
    rng: &mut R,
) -> Result<(PhasePoint, TransitionStats)>
where
    D: LogDensity,
    R: rand::Rng + ?Sized,
{
    let initial_energy = init.energy();
    let mut end = init.clone();
    let mut n_leapfrog = 0;
    let mut divergence_info = None;
    for _ in 0..n_steps {
        n_leapfrog += 1;
        match hamiltonian.leapfrog(&end, Direction::Forward, initial_energy)? {
            Ok(next) => end = next,
            Err(info) => {
                divergence_info = Some(info);
                break;
            }
        }
    }

    let accept_stat = if divergence_info.is_some() {
        0.
    } else {
        (initial_energy - end.energy()).min(0.).exp()
    };
    let is_accept = accept_stat > 0. && rng.random_bool(accept_stat);
    let draw = if is_accept { end } else { init };
    let stats = TransitionStats {
        lp: draw.logp,
        is_accept,
        accept_stat,
        stepsize: hamiltonian.step_size(),
        treedepth: 0,
        n_leapfrog,
        diverging: divergence_info.is_some(),
        energy: draw.energy(),
        energy_error: draw.energy() - initial_energy,
        divergence_info,
    };
    Ok((draw, stats))
}

/// Mean acceptance probability over all leapfrog steps of a trajectory,
/// counting divergent steps as zero.
struct AcceptanceRateCollector {
    initial_energy: f64,
    mean: RunningMean,
}

impl AcceptanceRateCollector {
    fn new(initial_energy: f64) -> Self {
        Self {
            initial_energy,
            mean: RunningMean::new(),
        }
    }

    fn register_leapfrog(&mut self, end: std::result::Result<&PhasePoint, &DivergenceInfo>) {
        match end {
            Err(_) => self.mean.add(0.),
            Ok(end) => {
                let diff = self.initial_energy - end.energy();
                self.mean.add(diff.min(0.).exp());
            }
        }
    }
}

/// A part of the trajectory tree during NUTS sampling.
struct NutsTree {
    /// The left position of the tree.
    ///
    /// The left side always has the smaller index_in_trajectory.
    /// Leapfrogs in backward direction will replace the left.
    left: PhasePoint,
    right: PhasePoint,

    /// A draw from the trajectory between left and right using
    /// multinomial sampling.
    draw: PhasePoint,
    log_size: f64,
    depth: u64,
    initial_energy: f64,

    /// A tree is the main tree if it contains the initial point
    /// of the trajectory.
    is_main: bool,
}

enum ExtendResult {
    /// The tree extension succeeded properly, and the termination
    /// criterion was not reached.
    Ok(NutsTree),
    /// Tree extension succeeded and the termination criterion
    /// was reached.
    Turning(NutsTree),
    /// A divergence happend during tree extension.
    Diverging(NutsTree, DivergenceInfo),
}

impl NutsTree {
    fn new(state: PhasePoint) -> NutsTree {
        let initial_energy = state.energy();
        NutsTree {
            right: state.clone(),
            left: state.clone(),
            draw: state,
            depth: 0,
            log_size: 0.,
            initial_energy,
            is_main: true,
        }
    }

    fn extend<D, R>(
        mut self,
        rng: &mut R,
        hamiltonian: &mut Hamiltonian<D>,
        direction: Direction,
        collector: &mut AcceptanceRateCollector,
    ) -> Result<ExtendResult>
    where
        D: LogDensity,
        R: rand::Rng + ?Sized,
    {
        let mut other = match self.single_step(hamiltonian, direction, collector)? {
            Ok(tree) => tree,
            Err(info) => return Ok(ExtendResult::Diverging(self, info)),
        };

        while other.depth < self.depth {
            other = match other.extend(rng, hamiltonian, direction, collector)? {
                ExtendResult::Ok(tree) => tree,
                ExtendResult::Turning(_) => {
                    return Ok(ExtendResult::Turning(self));
                }
                ExtendResult::Diverging(_, info) => {
                    return Ok(ExtendResult::Diverging(self, info));
                }
            };
        }

        let (first, last) = match direction {
            Direction::Forward => (&self.left, &other.right),
            Direction::Backward => (&other.left, &self.right),
        };

        let mut turning = first.is_turning(last);
        if self.depth > 0 {
            if !turning {
                turning = self.right.is_turning(&other.right);
            }
            if !turning {
                turning = self.left.is_turning(&other.left);
            }
        }

        self.merge_into(other, rng, direction);

        if turning {
            Ok(ExtendResult::Turning(self))
        } else {
            Ok(ExtendResult::Ok(self))
        }
    }

    fn merge_into<R: rand::Rng + ?Sized>(
        &mut self,
        other: NutsTree,
        rng: &mut R,
        direction: Direction,
    ) {
        assert!(self.depth == other.depth);
        assert!(self.left.index_in_trajectory <= self.right.index_in_trajectory);
        match direction {
            Direction::Forward => {
                self.right = other.right;
            }
            Direction::Backward => {
                self.left = other.left;
            }
        }
        let log_size = logaddexp(self.log_size, other.log_size);

        let self_log_size = if self.is_main {
            assert!(self.left.index_in_trajectory <= 0);
            assert!(self.right.index_in_trajectory >= 0);
            self.log_size
        } else {
            log_size
        };

        if (other.log_size >= self_log_size)
            || rng.random_bool((other.log_size - self_log_size).exp())
        {
            self.draw = other.draw;
        }

        self.depth += 1;
        self.log_size = log_size;
    }

    fn single_step<D: LogDensity>(
        &self,
        hamiltonian: &mut Hamiltonian<D>,
        direction: Direction,
        collector: &mut AcceptanceRateCollector,
    ) -> Result<std::result::Result<NutsTree, DivergenceInfo>> {
        let start = match direction {
            Direction::Forward => &self.right,
            Direction::Backward => &self.left,
        };
        let end = match hamiltonian.leapfrog(start, direction, self.initial_energy)? {
            Ok(end) => end,
            Err(info) => {
                collector.register_leapfrog(Err(&info));
                return Ok(Err(info));
            }
        };
        collector.register_leapfrog(Ok(&end));

        let log_size = self.initial_energy - end.energy();
        Ok(Ok(NutsTree {
            right: end.clone(),
            left: end.clone(),
            draw: end,
            depth: 0,
            log_size,
            initial_energy: self.initial_energy,
            is_main: false,
        }))
    }

    fn stats(
        self,
        step_size: f64,
        collector: &AcceptanceRateCollector,
        divergence_info: Option<DivergenceInfo>,
    ) -> (PhasePoint, TransitionStats) {
        let stats = TransitionStats {
            lp: self.draw.logp,
            is_accept: self.draw.index_in_trajectory != 0,
            accept_stat: collector.mean.current(),
            stepsize: step_size,
            treedepth: self.depth,
            n_leapfrog: collector.mean.count(),
            diverging: divergence_info.is_some(),
            energy: self.draw.energy(),
            energy_error: self.draw.energy() - self.initial_energy,
            divergence_info,
        };
        (self.draw, stats)
    }
}

fn nuts_draw<D, R>(
    hamiltonian: &mut Hamiltonian<D>,
    init: PhasePoint,
    max_depth: u64,
    rng: &mut R,
) -> Result<(PhasePoint, TransitionStats)>
where
    D: LogDensity,
    R: rand::Rng + ?Sized,
{
    let mut collector = AcceptanceRateCollector::new(init.energy());
    let step_size = hamiltonian.step_size();
    let mut tree = NutsTree::new(init);
    while tree.depth < max_depth {
        let direction: Direction = rng.random();
        tree = match tree.extend(rng, hamiltonian, direction, &mut collector)? {
            ExtendResult::Ok(tree) => tree,
            ExtendResult::Turning(tree) => {
                return Ok(tree.stats(step_size, &collector, None));
            }
            ExtendResult::Diverging(tree, info) => {
                return Ok(tree.stats(step_size, &collector, Some(info)));
            }
        };
    }
    Ok(tree.stats(step_size, &collector, None))
}
