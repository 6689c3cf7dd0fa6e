//! The HMC numerical kernel: metrics, the leapfrog integrator, trajectory
//! samplers and warm-up adaptation.

mod adapt;
mod hamiltonian;
mod metric;
mod stepsize;
mod trajectory;

pub use adapt::{AdaptUpdate, StanHmcAdaptor};
pub use hamiltonian::{Direction, DivergenceInfo, Hamiltonian, PhasePoint};
pub use metric::{DenseMetric, DiagMetric, Metric};
pub use stepsize::{find_good_step_size, DualAverage, DualAverageOptions};
pub use trajectory::{TrajectorySampler, TransitionStats};
