//! Policies that decide which attributes of a particle are sampled and how.

use tracing::warn;

use crate::{
    constraint::Constraint,
    error::{HmcError, Result},
    keys,
    model::{FloatKey, KeyParticle, ParticleIndex, ParticleModel},
};

/// The output of a successful build: the attributes covered, in order, and
/// the constraint acting on them.
pub type BuiltGroup = (Vec<KeyParticle>, Constraint);

/// Inspects one particle and emits a constraint for one group of attributes.
///
/// Grouped builders are all-or-nothing: if any key of the group is missing
/// or not optimized on the particle, the particle is skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformationBuilder {
    /// Each optimized key independently, under an identity constraint.
    Unconstrained(Vec<FloatKey>),
    /// All keys together as a point on the unit sphere.
    UnitVector(Vec<FloatKey>),
    /// Like `UnitVector`, scaled by the extent of the particle's rigid frame.
    ScaledUnitVector(Vec<FloatKey>),
    /// The radius, bounded below by zero.
    Radius,
    /// The nuisance value, bounded by the particle's current bounds.
    Nuisance,
    /// The leading run of `keys` present on the particle, as a simplex.
    Simplex(Vec<FloatKey>),
    /// Every key of the group inside the same finite interval.
    BoundingBox {
        keys: Vec<FloatKey>,
        lower: f64,
        upper: f64,
    },
}

impl TransformationBuilder {
    pub fn bounding_box(keys: Vec<FloatKey>, lower: f64, upper: f64) -> Result<Self> {
        // validates the interval
        Constraint::bounded(lower, upper)?;
        if keys.is_empty() {
            return Err(HmcError::InvalidSetting(
                "bounding box builder needs at least one key".into(),
            ));
        }
        Ok(TransformationBuilder::BoundingBox { keys, lower, upper })
    }

    pub fn build<M: ParticleModel>(&self, model: &M, pi: ParticleIndex) -> Option<BuiltGroup> {
        match self {
            TransformationBuilder::Unconstrained(fks) => {
                let pairs: Vec<_> = fks
                    .iter()
                    .filter(|&&fk| is_optimized(model, fk, pi))
                    .map(|&fk| KeyParticle::new(fk, pi))
                    .collect();
                if pairs.is_empty() {
                    return None;
                }
                let n = pairs.len();
                Some((pairs, Constraint::identity(n)))
            }
            TransformationBuilder::UnitVector(fks) => {
                let pairs = all_optimized(model, fks, pi)?;
                Some((pairs, Constraint::unit_vector(fks.len())))
            }
            TransformationBuilder::ScaledUnitVector(fks) => {
                let pairs = all_optimized(model, fks, pi)?;
                let scale = frame_scale(model, pi);
                Some((pairs, Constraint::scaled_unit_vector(fks.len(), scale)))
            }
            TransformationBuilder::Radius => {
                let pairs = all_optimized(model, &[keys::RADIUS], pi)?;
                Some((pairs, Constraint::lower_bounded(0.)))
            }
            TransformationBuilder::Nuisance => {
                let pairs = all_optimized(model, &[keys::NUISANCE], pi)?;
                let (lower, upper) = model
                    .nuisance_bounds(pi)
                    .unwrap_or((f64::NEG_INFINITY, f64::INFINITY));
                match Constraint::transform(lower, upper) {
                    Ok(constraint) => Some((pairs, constraint)),
                    Err(err) => {
                        warn!(particle = pi.0, %err, "Nuisance is not sampled");
                        None
                    }
                }
            }
            TransformationBuilder::Simplex(fks) => {
                let present: Vec<FloatKey> = fks
                    .iter()
                    .copied()
                    .take_while(|&fk| model.has_attribute(fk, pi))
                    .collect();
                if present.len() < 2 {
                    return None;
                }
                let pairs = all_optimized(model, &present, pi)?;
                Some((pairs, Constraint::simplex(present.len()).ok()?))
            }
            TransformationBuilder::BoundingBox { keys, lower, upper } => {
                let pairs = all_optimized(model, keys, pi)?;
                let constraints = keys
                    .iter()
                    .map(|_| Constraint::Bounded {
                        lower: *lower,
                        upper: *upper,
                    })
                    .collect();
                Some((pairs, Constraint::joint(constraints)))
            }
        }
    }
}

fn is_optimized<M: ParticleModel>(model: &M, fk: FloatKey, pi: ParticleIndex) -> bool {
    model.has_attribute(fk, pi) && model.is_optimized(fk, pi)
}

fn all_optimized<M: ParticleModel>(
    model: &M,
    fks: &[FloatKey],
    pi: ParticleIndex,
) -> Option<Vec<KeyParticle>> {
    fks.iter()
        .map(|&fk| is_optimized(model, fk, pi).then(|| KeyParticle::new(fk, pi)))
        .collect()
}

/// Twice the standard deviation of the member offsets of a rigid frame,
/// or 1 if the particle is not a rigid frame with spread-out members.
fn frame_scale<M: ParticleModel>(model: &M, pi: ParticleIndex) -> f64 {
    let Some(offsets) = model.rigid_member_offsets(pi) else {
        return 1.;
    };
    if offsets.is_empty() {
        return 1.;
    }
    let n = offsets.len() as f64;
    let mut center = [0f64; 3];
    for offset in &offsets {
        for d in 0..3 {
            center[d] += offset[d] / n;
        }
    }
    let variance = offsets
        .iter()
        .map(|o| (0..3).map(|d| (o[d] - center[d]).powi(2)).sum::<f64>())
        .sum::<f64>()
        / n;
    let scale = 2. * variance.sqrt();
    if scale.is_finite() && scale > 0. {
        scale
    } else {
        1.
    }
}

/// The builders used when the caller does not supply a list, in priority
/// order.
pub fn default_builders() -> Vec<TransformationBuilder> {
    let mut coordinates = keys::XYZ.to_vec();
    coordinates.extend(keys::LOCAL_XYZ);
    vec![
        TransformationBuilder::Unconstrained(coordinates),
        TransformationBuilder::Radius,
        TransformationBuilder::ScaledUnitVector(keys::QUATERNION.to_vec()),
        TransformationBuilder::ScaledUnitVector(keys::LOCAL_QUATERNION.to_vec()),
        TransformationBuilder::UnitVector(keys::DIRECTION.to_vec()),
        TransformationBuilder::Nuisance,
        TransformationBuilder::Simplex(keys::WEIGHTS.to_vec()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_model::{ToyModel, ToyParticle};
    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_coordinates() {
        let mut model = ToyModel::default();
        let pi = model.add(ToyParticle::xyz("p", [1., 2., 3.]).fix(keys::Y));

        let unconstrained = TransformationBuilder::Unconstrained(keys::XYZ.to_vec());
        let (pairs, c) = unconstrained.build(&model, pi).unwrap();
        assert_eq!(
            pairs,
            vec![KeyParticle::new(keys::X, pi), KeyParticle::new(keys::Z, pi)]
        );
        assert_eq!(c, Constraint::identity(2));

        let grouped = TransformationBuilder::UnitVector(keys::XYZ.to_vec());
        assert!(grouped.build(&model, pi).is_none());

        let bbox = TransformationBuilder::bounding_box(keys::XYZ.to_vec(), -10., 10.).unwrap();
        assert!(bbox.build(&model, pi).is_none());
    }

    #[test]
    fn nothing_optimized() {
        let mut model = ToyModel::default();
        let pi = model.add(
            ToyParticle::xyz("p", [0.; 3])
                .fix(keys::X)
                .fix(keys::Y)
                .fix(keys::Z),
        );
        let builder = TransformationBuilder::Unconstrained(keys::XYZ.to_vec());
        assert!(builder.build(&model, pi).is_none());
    }

    #[test]
    fn nuisance_reads_live_bounds() {
        let mut model = ToyModel::default();
        let pi = model.add(ToyParticle::nuisance("sigma", 1., (0., 5.)));
        let (_, c) = TransformationBuilder::Nuisance.build(&model, pi).unwrap();
        assert_eq!(c, Constraint::transform(0., 5.).unwrap());

        model.particle_mut(pi).bounds = Some((0., 10.));
        let (_, c) = TransformationBuilder::Nuisance.build(&model, pi).unwrap();
        assert_eq!(c, Constraint::transform(0., 10.).unwrap());

        model.particle_mut(pi).bounds = Some((5., 0.));
        assert!(TransformationBuilder::Nuisance.build(&model, pi).is_none());
        model.particle_mut(pi).bounds = Some((1., 1.));
        assert!(TransformationBuilder::Nuisance.build(&model, pi).is_none());
    }

    #[test]
    fn bounding_box_is_joint_of_intervals() {
        let mut model = ToyModel::default();
        let pi = model.add(ToyParticle::xyz("p", [0.; 3]));
        let bbox = TransformationBuilder::bounding_box(keys::XYZ.to_vec(), -5., 5.).unwrap();
        let (pairs, c) = bbox.build(&model, pi).unwrap();
        assert_eq!(pairs.len(), 3);
        assert_eq!(c.free_dimension(), 3);
        assert!(matches!(&c, Constraint::Joint(children) if children.len() == 3));
        assert!(TransformationBuilder::bounding_box(vec![keys::X], 1., -1.).is_err());
    }

    #[test]
    fn weights_use_leading_run() {
        let mut model = ToyModel::default();
        let pi = model.add(ToyParticle::weights("w", &[0.2, 0.3, 0.5]));
        let (pairs, c) = TransformationBuilder::Simplex(keys::WEIGHTS.to_vec())
            .build(&model, pi)
            .unwrap();
        assert_eq!(pairs.len(), 3);
        assert_eq!(c, Constraint::simplex(3).unwrap());
        assert_eq!(c.free_dimension(), 2);
    }

    #[test]
    fn rigid_frame_scale() {
        let mut model = ToyModel::default();
        let pi = model.add(ToyParticle::rigid_body(
            "rb",
            [0.; 3],
            [1., 0., 0., 0.],
            vec![[3., 0., 0.], [-3., 0., 0.]],
        ));
        let builder = TransformationBuilder::ScaledUnitVector(keys::QUATERNION.to_vec());
        let (_, c) = builder.build(&model, pi).unwrap();
        match c {
            Constraint::UnitVector { dim, scale } => {
                assert_eq!(dim, 4);
                assert_abs_diff_eq!(scale, 6.);
            }
            other => panic!("unexpected constraint {other:?}"),
        }
    }
}
