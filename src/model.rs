//! The boundary to the particle model being sampled.
//!
//! The model owns the particles, their float attributes and the score. This
//! crate only reads attributes, writes the optimized ones through a
//! [`ValueGradientInterface`](crate::ValueGradientInterface) and asks the model
//! to evaluate its score.

use std::fmt;

/// Identifies one scalar attribute slot on a particle.
///
/// Keys are registered statically, see [`crate::keys`] for the ones the
/// default transformation builders know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FloatKey(&'static str);

impl FloatKey {
    pub const fn new(name: &'static str) -> Self {
        FloatKey(name)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for FloatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Opaque handle of a particle inside a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticleIndex(pub u32);

impl fmt::Display for ParticleIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The atomic unit a transformation acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyParticle {
    pub key: FloatKey,
    pub particle: ParticleIndex,
}

impl KeyParticle {
    pub fn new(key: FloatKey, particle: ParticleIndex) -> Self {
        Self { key, particle }
    }
}

/// Errors that happen when the model evaluates its score or accepts values
pub trait LogpError: std::error::Error + Send + Sync + 'static {
    /// Unrecoverable errors during score evaluation stop sampling,
    /// recoverable errors are seen as divergences.
    fn is_recoverable(&self) -> bool;
}

/// A mutable particle model with a differentiable score.
///
/// HMC maximizes `-score`, so the score should behave like an energy.
pub trait ParticleModel {
    type Error: LogpError;

    /// All particles in the model's native iteration order.
    fn particle_indexes(&self) -> Vec<ParticleIndex>;

    fn particle_name(&self, pi: ParticleIndex) -> String;

    fn has_attribute(&self, key: FloatKey, pi: ParticleIndex) -> bool;

    fn is_optimized(&self, key: FloatKey, pi: ParticleIndex) -> bool;

    fn attribute(&self, key: FloatKey, pi: ParticleIndex) -> f64;

    fn set_attribute(
        &mut self,
        key: FloatKey,
        pi: ParticleIndex,
        value: f64,
    ) -> Result<(), Self::Error>;

    /// Derivative of the score with respect to an attribute, as computed by the
    /// last call to `evaluate(true)`.
    fn derivative(&self, key: FloatKey, pi: ParticleIndex) -> f64;

    /// Lower and upper bound of a nuisance parameter, queried live.
    fn nuisance_bounds(&self, _pi: ParticleIndex) -> Option<(f64, f64)> {
        None
    }

    /// Offsets of the members of a rigid frame from the frame's center, if the
    /// particle is a rigid body.
    fn rigid_member_offsets(&self, _pi: ParticleIndex) -> Option<Vec<[f64; 3]>> {
        None
    }

    /// Evaluate the score, also computing derivatives if requested.
    fn evaluate(&mut self, derivatives: bool) -> Result<f64, Self::Error>;

    /// Bring dependent state up to date after attributes were changed.
    fn update(&mut self) -> Result<(), Self::Error>;
}
