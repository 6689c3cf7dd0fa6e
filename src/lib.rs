//! Hamiltonian Monte Carlo over the optimized attributes of a particle model.
//!
//! Attributes are grouped by [`TransformationBuilder`]s into constrained
//! variables (coordinates, radii, unit quaternions, bounded nuisances,
//! simplex weights), mapped to an unconstrained space by a joint
//! [`Constraint`], and sampled there by [`HamiltonianMonteCarlo`]. The
//! [`Adaptor`] tunes step size and metric during warm-up, and
//! [`setup_warmup_hmc`] wires everything together.
//!
//! ```no_run
//! use particle_hmc::{keys, setup_warmup_hmc, test_model::*, ChainTrace, SetupSettings};
//!
//! let mut model = ToyModel::default();
//! model.add(ToyParticle::xyz("p", [0., 0., 0.]).restrain(keys::X, 1., 2.));
//!
//! let mut out = setup_warmup_hmc(model, None, SetupSettings::default()).unwrap();
//! let trace = ChainTrace::sample(&mut out.hmc, 1000).unwrap();
//! println!("{} draws of {:?}", trace.len(), trace.names());
//! ```

pub(crate) mod accumulator;
pub(crate) mod adaptor;
pub(crate) mod builder;
pub(crate) mod constraint;
pub(crate) mod driver;
pub(crate) mod error;
pub(crate) mod interface;
pub mod kernel;
pub mod keys;
pub(crate) mod log_density;
pub(crate) mod math;
pub(crate) mod model;
pub(crate) mod observer;
pub(crate) mod settings;
pub(crate) mod setup;
pub mod test_model;
pub(crate) mod trace;
pub(crate) mod variables;

pub use accumulator::{SampleAccumulator, StatisticsAccumulator};
pub use adaptor::{AdaptReport, Adaptor};
pub use builder::{default_builders, BuiltGroup, TransformationBuilder};
pub use constraint::{Constraint, PushLogDensity};
pub use driver::{public_stats, Chain, DriverPhase, HamiltonianMonteCarlo, STATS_KEY_MAP};
pub use error::{HmcError, Result};
pub use interface::ValueGradientInterface;
pub use log_density::{LogDensity, ModelLogDensity, TransformedLogDensity};
pub use model::{FloatKey, KeyParticle, LogpError, ParticleIndex, ParticleModel};
pub use observer::{OptimizerState, SaveAttributesOptimizerState, SharedOptimizerState};
pub use settings::{
    AdaptorSettings, DivergencePolicy, HmcSettings, MetricKind, SamplerKind, SetupSettings,
};
pub use setup::{setup_warmup_hmc, WarmupOutput};
pub use trace::ChainTrace;
pub use variables::OptimizedVariables;
