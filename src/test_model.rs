//! A small in-memory particle model with harmonic restraints.
//!
//! Used by the tests and benchmarks; also handy for trying the sampler
//! without a full modeling package.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use thiserror::Error;

use crate::{
    keys,
    model::{FloatKey, LogpError, ParticleIndex, ParticleModel},
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToyModelError {
    #[error("Score is not finite")]
    NonFinite,
    #[error("Value {value} rejected for attribute {key} of particle {particle}")]
    Rejected {
        key: FloatKey,
        particle: ParticleIndex,
        value: f64,
    },
}

impl LogpError for ToyModelError {
    fn is_recoverable(&self) -> bool {
        matches!(self, ToyModelError::NonFinite)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToyParticle {
    pub name: String,
    pub attributes: BTreeMap<FloatKey, f64>,
    pub fixed: BTreeSet<FloatKey>,
    pub bounds: Option<(f64, f64)>,
    pub members: Option<Vec<[f64; 3]>>,
    /// `(target, stiffness)` of a harmonic restraint per attribute.
    pub restraints: BTreeMap<FloatKey, (f64, f64)>,
}

impl ToyParticle {
    pub fn new(name: &str) -> Self {
        ToyParticle {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with(mut self, key: FloatKey, value: f64) -> Self {
        self.attributes.insert(key, value);
        self
    }

    pub fn xyz(name: &str, xyz: [f64; 3]) -> Self {
        keys::XYZ
            .iter()
            .zip(xyz)
            .fold(Self::new(name), |p, (&k, v)| p.with(k, v))
    }

    pub fn nuisance(name: &str, value: f64, bounds: (f64, f64)) -> Self {
        let mut p = Self::new(name).with(keys::NUISANCE, value);
        p.bounds = Some(bounds);
        p
    }

    pub fn weights(name: &str, weights: &[f64]) -> Self {
        keys::WEIGHTS
            .iter()
            .zip(weights)
            .fold(Self::new(name), |p, (&k, &v)| p.with(k, v))
    }

    pub fn rigid_body(
        name: &str,
        xyz: [f64; 3],
        quaternion: [f64; 4],
        members: Vec<[f64; 3]>,
    ) -> Self {
        let mut p = keys::QUATERNION
            .iter()
            .zip(quaternion)
            .fold(Self::xyz(name, xyz), |p, (&k, v)| p.with(k, v));
        p.members = Some(members);
        p
    }

    pub fn radius(self, radius: f64) -> Self {
        self.with(keys::RADIUS, radius)
    }

    /// Mark an attribute as not optimized.
    pub fn fix(mut self, key: FloatKey) -> Self {
        self.fixed.insert(key);
        self
    }

    pub fn restrain(mut self, key: FloatKey, target: f64, stiffness: f64) -> Self {
        self.restraints.insert(key, (target, stiffness));
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToyModel {
    particles: Vec<ToyParticle>,
    derivatives: HashMap<(FloatKey, ParticleIndex), f64>,
    /// Number of calls to `update`.
    pub updates: usize,
    /// Number of calls to `evaluate`.
    pub evaluations: usize,
}

impl ToyModel {
    pub fn add(&mut self, particle: ToyParticle) -> ParticleIndex {
        self.particles.push(particle);
        ParticleIndex((self.particles.len() - 1) as u32)
    }

    pub fn particle(&self, pi: ParticleIndex) -> &ToyParticle {
        &self.particles[pi.0 as usize]
    }

    pub fn particle_mut(&mut self, pi: ParticleIndex) -> &mut ToyParticle {
        &mut self.particles[pi.0 as usize]
    }
}

impl ParticleModel for ToyModel {
    type Error = ToyModelError;

    fn particle_indexes(&self) -> Vec<ParticleIndex> {
        (0..self.particles.len() as u32).map(ParticleIndex).collect()
    }

    fn particle_name(&self, pi: ParticleIndex) -> String {
        self.particle(pi).name.clone()
    }

    fn has_attribute(&self, key: FloatKey, pi: ParticleIndex) -> bool {
        self.particle(pi).attributes.contains_key(&key)
    }

    fn is_optimized(&self, key: FloatKey, pi: ParticleIndex) -> bool {
        !self.particle(pi).fixed.contains(&key)
    }

    fn attribute(&self, key: FloatKey, pi: ParticleIndex) -> f64 {
        self.particle(pi).attributes[&key]
    }

    fn set_attribute(
        &mut self,
        key: FloatKey,
        pi: ParticleIndex,
        value: f64,
    ) -> Result<(), Self::Error> {
        let particle = self.particle_mut(pi);
        let out_of_bounds = key == keys::NUISANCE
            && particle
                .bounds
                .is_some_and(|(lower, upper)| value < lower || value > upper);
        if !value.is_finite() || out_of_bounds {
            return Err(ToyModelError::Rejected {
                key,
                particle: pi,
                value,
            });
        }
        particle.attributes.insert(key, value);
        Ok(())
    }

    fn derivative(&self, key: FloatKey, pi: ParticleIndex) -> f64 {
        self.derivatives.get(&(key, pi)).copied().unwrap_or(0.)
    }

    fn nuisance_bounds(&self, pi: ParticleIndex) -> Option<(f64, f64)> {
        self.particle(pi).bounds
    }

    fn rigid_member_offsets(&self, pi: ParticleIndex) -> Option<Vec<[f64; 3]>> {
        self.particle(pi).members.clone()
    }

    fn evaluate(&mut self, derivatives: bool) -> Result<f64, Self::Error> {
        self.evaluations += 1;
        if derivatives {
            self.derivatives.clear();
        }
        let mut score = 0f64;
        for (i, particle) in self.particles.iter().enumerate() {
            for (&key, &(target, stiffness)) in &particle.restraints {
                let Some(&value) = particle.attributes.get(&key) else {
                    continue;
                };
                let diff = value - target;
                score += 0.5 * stiffness * diff * diff;
                if derivatives {
                    self.derivatives
                        .insert((key, ParticleIndex(i as u32)), stiffness * diff);
                }
            }
        }
        if !score.is_finite() {
            return Err(ToyModelError::NonFinite);
        }
        Ok(score)
    }

    fn update(&mut self) -> Result<(), Self::Error> {
        self.updates += 1;
        Ok(())
    }
}
