//! Bijections between the free space the sampler moves in and the
//! constrained attribute values of the model.
//!
//! Every constraint maps a free vector `y` of dimension `n` to a constrained
//! vector `x` of dimension `m >= n`, and knows how to correct a log density
//! in `x` into a log density in `y` (log-Jacobian and gradient pullback).

use itertools::izip;

use crate::{
    error::{HmcError, Result},
    math::{log_sigmoid, logit, sigmoid, vector_dot},
};

/// Describes how one group of attributes is mapped to free space.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Unconstrained passthrough of `n` values.
    Identity(usize),
    /// A value on `(lower, inf)`.
    LowerBounded { lower: f64 },
    /// A value on the finite interval `(lower, upper)`.
    Bounded { lower: f64, upper: f64 },
    /// A point on the unit sphere in `dim` dimensions.
    ///
    /// `scale` bounds the distortion of the pullback metric, frames with
    /// members far from their center should use a larger scale.
    UnitVector { dim: usize, scale: f64 },
    /// A point on the probability simplex with `free_dim + 1` components.
    Simplex { free_dim: usize },
    /// A value whose bounds may be infinite on either side.
    Transform { lower: f64, upper: f64 },
    /// Ordered composition of independent constraints.
    Joint(Vec<Constraint>),
}

impl Constraint {
    pub fn identity(n: usize) -> Self {
        Constraint::Identity(n)
    }

    pub fn lower_bounded(lower: f64) -> Self {
        Constraint::LowerBounded { lower }
    }

    pub fn bounded(lower: f64, upper: f64) -> Result<Self> {
        check_interval(lower, upper)?;
        if !(lower.is_finite() && upper.is_finite()) {
            return Err(HmcError::InvalidBounds { lower, upper });
        }
        Ok(Constraint::Bounded { lower, upper })
    }

    pub fn unit_vector(dim: usize) -> Self {
        Constraint::UnitVector { dim, scale: 1. }
    }

    pub fn scaled_unit_vector(dim: usize, scale: f64) -> Self {
        Constraint::UnitVector { dim, scale }
    }

    /// A simplex over `n` constrained components.
    pub fn simplex(n: usize) -> Result<Self> {
        if n == 0 {
            return Err(HmcError::DimensionMismatch {
                expected: 1,
                got: 0,
            });
        }
        Ok(Constraint::Simplex { free_dim: n - 1 })
    }

    /// Either bound may be infinite, but the interval must not be empty.
    pub fn transform(lower: f64, upper: f64) -> Result<Self> {
        check_interval(lower, upper)?;
        Ok(Constraint::Transform { lower, upper })
    }

    pub fn joint(constraints: Vec<Constraint>) -> Self {
        Constraint::Joint(constraints)
    }

    pub fn free_dimension(&self) -> usize {
        match self {
            Constraint::Identity(n) => *n,
            Constraint::LowerBounded { .. }
            | Constraint::Bounded { .. }
            | Constraint::Transform { .. } => 1,
            Constraint::UnitVector { dim, .. } => *dim,
            Constraint::Simplex { free_dim } => *free_dim,
            Constraint::Joint(children) => children.iter().map(|c| c.free_dimension()).sum(),
        }
    }

    pub fn constrained_dimension(&self) -> usize {
        match self {
            Constraint::Simplex { free_dim } => free_dim + 1,
            Constraint::Joint(children) => {
                children.iter().map(|c| c.constrained_dimension()).sum()
            }
            _ => self.free_dimension(),
        }
    }

    /// Map a free point to constrained space.
    pub fn constrain(&self, free: &[f64]) -> Result<Vec<f64>> {
        self.check_free(free)?;
        let mut out = vec![0f64; self.constrained_dimension()];
        self.constrain_into(free, &mut out);
        Ok(out)
    }

    /// Map a constrained point back to free space.
    pub fn free(&self, constrained: &[f64]) -> Result<Vec<f64>> {
        if constrained.len() != self.constrained_dimension() {
            return Err(HmcError::DimensionMismatch {
                expected: self.constrained_dimension(),
                got: constrained.len(),
            });
        }
        let mut out = vec![0f64; self.free_dimension()];
        self.free_into(constrained, &mut out);
        Ok(out)
    }

    /// Map a free point to constrained space and return the continuation
    /// that turns a log density at the constrained point into the log
    /// density at the free point.
    pub fn constrain_with_push(&self, free: &[f64]) -> Result<(Vec<f64>, PushLogDensity<'_>)> {
        self.check_free(free)?;
        Ok(self.push_density(free))
    }

    /// `constrain_with_push` for callers that already checked the length.
    pub(crate) fn push_density(&self, free: &[f64]) -> (Vec<f64>, PushLogDensity<'_>) {
        debug_assert_eq!(free.len(), self.free_dimension());
        let mut constrained = vec![0f64; self.constrained_dimension()];
        self.constrain_into(free, &mut constrained);
        let push = PushLogDensity {
            constraint: self,
            free: free.to_vec(),
        };
        (constrained, push)
    }

    fn check_free(&self, free: &[f64]) -> Result<()> {
        if free.len() != self.free_dimension() {
            return Err(HmcError::DimensionMismatch {
                expected: self.free_dimension(),
                got: free.len(),
            });
        }
        Ok(())
    }

    fn scalar_map(&self) -> Option<ScalarMap> {
        match *self {
            Constraint::LowerBounded { lower } => Some(ScalarMap::Lower(lower)),
            Constraint::Bounded { lower, upper } => Some(ScalarMap::Interval(lower, upper)),
            Constraint::Transform { lower, upper } => Some(ScalarMap::from_bounds(lower, upper)),
            _ => None,
        }
    }

    fn constrain_into(&self, y: &[f64], x: &mut [f64]) {
        if let Some(map) = self.scalar_map() {
            x[0] = map.constrain(y[0]);
            return;
        }
        match self {
            Constraint::Identity(_) => x.copy_from_slice(y),
            Constraint::UnitVector { .. } => {
                let norm = vector_dot(y, y).sqrt();
                izip!(x, y).for_each(|(x, y)| *x = y / norm);
            }
            Constraint::Simplex { free_dim } => {
                let n = *free_dim;
                let mut stick = 1f64;
                for k in 0..n {
                    let u = y[k] - ((n - k) as f64).ln();
                    x[k] = stick * sigmoid(u);
                    stick *= sigmoid(-u);
                }
                x[n] = stick;
            }
            Constraint::Joint(children) => {
                let (mut i, mut j) = (0, 0);
                for child in children {
                    let (n, m) = (child.free_dimension(), child.constrained_dimension());
                    child.constrain_into(&y[i..i + n], &mut x[j..j + m]);
                    i += n;
                    j += m;
                }
            }
            _ => unreachable!("scalar constraints are handled above"),
        }
    }

    fn free_into(&self, x: &[f64], y: &mut [f64]) {
        if let Some(map) = self.scalar_map() {
            y[0] = map.free(x[0]);
            return;
        }
        match self {
            Constraint::Identity(_) => y.copy_from_slice(x),
            Constraint::UnitVector { scale, .. } => {
                let norm = vector_dot(x, x).sqrt();
                izip!(y, x).for_each(|(y, x)| *y = scale * x / norm);
            }
            Constraint::Simplex { free_dim } => {
                let n = *free_dim;
                let mut stick = 1f64;
                for k in 0..n {
                    y[k] = logit(x[k] / stick) + ((n - k) as f64).ln();
                    stick -= x[k];
                }
            }
            Constraint::Joint(children) => {
                let (mut i, mut j) = (0, 0);
                for child in children {
                    let (n, m) = (child.free_dimension(), child.constrained_dimension());
                    child.free_into(&x[j..j + m], &mut y[i..i + n]);
                    i += n;
                    j += m;
                }
            }
            _ => unreachable!("scalar constraints are handled above"),
        }
    }

    /// Log of the density correction at the free point `y`.
    fn log_jacobian(&self, y: &[f64]) -> f64 {
        if let Some(map) = self.scalar_map() {
            return map.log_jacobian(y[0]);
        }
        match self {
            Constraint::Identity(_) => 0.,
            Constraint::UnitVector { scale, .. } => -vector_dot(y, y) / (2. * scale * scale),
            Constraint::Simplex { free_dim } => {
                let n = *free_dim;
                let mut stick = 1f64;
                let mut logj = 0f64;
                for k in 0..n {
                    let u = y[k] - ((n - k) as f64).ln();
                    logj += log_sigmoid(u) + log_sigmoid(-u) + stick.ln();
                    stick *= sigmoid(-u);
                }
                logj
            }
            Constraint::Joint(children) => {
                let mut i = 0;
                children
                    .iter()
                    .map(|child| {
                        let n = child.free_dimension();
                        let logj = child.log_jacobian(&y[i..i + n]);
                        i += n;
                        logj
                    })
                    .sum()
            }
            _ => unreachable!("scalar constraints are handled above"),
        }
    }

    /// Write `J^T grad_x + grad log|J|` into `grad_y` and return `log|J|`.
    fn pullback(&self, y: &[f64], grad_x: &[f64], grad_y: &mut [f64]) -> f64 {
        if let Some(map) = self.scalar_map() {
            let (logj, grad) = map.pullback(y[0], grad_x[0]);
            grad_y[0] = grad;
            return logj;
        }
        match self {
            Constraint::Identity(_) => {
                grad_y.copy_from_slice(grad_x);
                0.
            }
            Constraint::UnitVector { scale, .. } => {
                let norm_sq = vector_dot(y, y);
                let norm = norm_sq.sqrt();
                let radial = izip!(y, grad_x).map(|(y, g)| y / norm * g).sum::<f64>();
                let inv_var = (scale * scale).recip();
                izip!(grad_y, y, grad_x).for_each(|(out, y, g)| {
                    *out = (g - radial * y / norm) / norm - y * inv_var;
                });
                -norm_sq * inv_var / 2.
            }
            Constraint::Simplex { free_dim } => {
                let n = *free_dim;
                let mut sticks = Vec::with_capacity(n);
                let mut z = Vec::with_capacity(n);
                let mut stick = 1f64;
                let mut logj = 0f64;
                for k in 0..n {
                    let u = y[k] - ((n - k) as f64).ln();
                    logj += log_sigmoid(u) + log_sigmoid(-u) + stick.ln();
                    sticks.push(stick);
                    z.push(sigmoid(u));
                    stick *= sigmoid(-u);
                }
                // Reverse pass over the stick-breaking recursion. `adjoint`
                // holds d(target)/d(stick after step k).
                let mut adjoint = grad_x[n];
                for k in (0..n).rev() {
                    let (s, zk) = (sticks[k], z[k]);
                    grad_y[k] = (grad_x[k] - adjoint) * s * zk * (1. - zk) + 1. - 2. * zk;
                    adjoint = grad_x[k] * zk + adjoint * (1. - zk) + s.recip();
                }
                logj
            }
            Constraint::Joint(children) => {
                let (mut i, mut j) = (0, 0);
                let mut logj = 0f64;
                for child in children {
                    let (n, m) = (child.free_dimension(), child.constrained_dimension());
                    logj += child.pullback(&y[i..i + n], &grad_x[j..j + m], &mut grad_y[i..i + n]);
                    i += n;
                    j += m;
                }
                logj
            }
            _ => unreachable!("scalar constraints are handled above"),
        }
    }
}

/// Continuation returned by [`Constraint::constrain_with_push`].
///
/// The change of variables needs the free point and the density at the
/// constrained point together, so it cannot be applied as two independent
/// steps.
#[derive(Debug)]
pub struct PushLogDensity<'a> {
    constraint: &'a Constraint,
    free: Vec<f64>,
}

impl PushLogDensity<'_> {
    /// Log density at the free point.
    pub fn push(&self, logp_constrained: f64) -> f64 {
        logp_constrained + self.constraint.log_jacobian(&self.free)
    }

    /// Log density and its gradient at the free point.
    pub fn push_with_gradient(
        &self,
        logp_constrained: f64,
        grad_constrained: &[f64],
        grad_free: &mut [f64],
    ) -> Result<f64> {
        let expected = self.constraint.constrained_dimension();
        if grad_constrained.len() != expected {
            return Err(HmcError::DimensionMismatch {
                expected,
                got: grad_constrained.len(),
            });
        }
        if grad_free.len() != self.free.len() {
            return Err(HmcError::DimensionMismatch {
                expected: self.free.len(),
                got: grad_free.len(),
            });
        }
        Ok(self.push_gradient_unchecked(logp_constrained, grad_constrained, grad_free))
    }

    /// `push_with_gradient` for buffers sized when the density was built.
    pub(crate) fn push_gradient_unchecked(
        &self,
        logp_constrained: f64,
        grad_constrained: &[f64],
        grad_free: &mut [f64],
    ) -> f64 {
        let logj = self
            .constraint
            .pullback(&self.free, grad_constrained, grad_free);
        logp_constrained + logj
    }
}

/// Rejects empty intervals and NaN bounds.
fn check_interval(lower: f64, upper: f64) -> Result<()> {
    if lower < upper {
        Ok(())
    } else {
        Err(HmcError::InvalidBounds { lower, upper })
    }
}

/// One-dimensional maps, selected by which bounds are finite.
#[derive(Debug, Clone, Copy)]
enum ScalarMap {
    Identity,
    Lower(f64),
    Upper(f64),
    Interval(f64, f64),
}

impl ScalarMap {
    fn from_bounds(lower: f64, upper: f64) -> Self {
        match (lower.is_finite(), upper.is_finite()) {
            (false, false) => ScalarMap::Identity,
            (true, false) => ScalarMap::Lower(lower),
            (false, true) => ScalarMap::Upper(upper),
            (true, true) => ScalarMap::Interval(lower, upper),
        }
    }

    fn constrain(self, y: f64) -> f64 {
        match self {
            ScalarMap::Identity => y,
            ScalarMap::Lower(a) => a + y.exp(),
            ScalarMap::Upper(b) => b - y.exp(),
            ScalarMap::Interval(a, b) => a + (b - a) * sigmoid(y),
        }
    }

    fn free(self, x: f64) -> f64 {
        match self {
            ScalarMap::Identity => x,
            ScalarMap::Lower(a) => (x - a).ln(),
            ScalarMap::Upper(b) => (b - x).ln(),
            ScalarMap::Interval(a, b) => logit((x - a) / (b - a)),
        }
    }

    fn log_jacobian(self, y: f64) -> f64 {
        match self {
            ScalarMap::Identity => 0.,
            ScalarMap::Lower(_) | ScalarMap::Upper(_) => y,
            ScalarMap::Interval(a, b) => (b - a).ln() + log_sigmoid(y) + log_sigmoid(-y),
        }
    }

    fn pullback(self, y: f64, grad_x: f64) -> (f64, f64) {
        match self {
            ScalarMap::Identity => (0., grad_x),
            ScalarMap::Lower(_) => (y, grad_x * y.exp() + 1.),
            ScalarMap::Upper(_) => (y, 1. - grad_x * y.exp()),
            ScalarMap::Interval(a, b) => {
                let s = sigmoid(y);
                (
                    self.log_jacobian(y),
                    grad_x * (b - a) * s * (1. - s) + 1. - 2. * s,
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn catalogue() -> Vec<Constraint> {
        vec![
            Constraint::identity(2),
            Constraint::lower_bounded(0.),
            Constraint::bounded(-1., 3.).unwrap(),
            Constraint::scaled_unit_vector(4, 2.5),
            Constraint::simplex(3).unwrap(),
            Constraint::transform(0., f64::INFINITY).unwrap(),
            Constraint::transform(f64::NEG_INFINITY, 2.).unwrap(),
            Constraint::transform(0., 5.).unwrap(),
        ]
    }

    /// A log density on constrained space with a known gradient.
    fn linear_logp(x: &[f64]) -> (f64, Vec<f64>) {
        let coefs: Vec<f64> = (0..x.len()).map(|i| 0.3 * (i as f64) - 0.5).collect();
        let logp = izip!(x, &coefs).map(|(x, c)| x * c).sum();
        (logp, coefs)
    }

    fn pushed_logp(c: &Constraint, y: &[f64]) -> f64 {
        let (x, push) = c.constrain_with_push(y).unwrap();
        push.push(linear_logp(&x).0)
    }

    #[test]
    fn dimensions_of_joint() {
        let joint = Constraint::joint(catalogue());
        let free: usize = catalogue().iter().map(|c| c.free_dimension()).sum();
        assert_eq!(joint.free_dimension(), free);
        assert_eq!(joint.free_dimension(), 2 + 1 + 1 + 4 + 2 + 1 + 1 + 1);
        assert_eq!(joint.constrained_dimension(), free + 1);
    }

    #[test]
    fn unit_vector_roundtrip() {
        let c = Constraint::unit_vector(3);
        let x = [0.48, 0.6, 0.64];
        let y = c.free(&x).unwrap();
        let back = c.constrain(&y).unwrap();
        for (a, b) in x.iter().zip(&back) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn simplex_sums_to_one() {
        let c = Constraint::simplex(4).unwrap();
        let x = c.constrain(&[0.3, -2., 5.]).unwrap();
        assert_eq!(x.len(), 4);
        assert_abs_diff_eq!(x.iter().sum::<f64>(), 1., epsilon = 1e-12);
        assert!(x.iter().all(|&v| v > 0.));
    }

    #[test]
    fn zero_free_point_gives_uniform_simplex() {
        let x = Constraint::simplex(5).unwrap().constrain(&[0.; 4]).unwrap();
        for v in x {
            assert_abs_diff_eq!(v, 0.2, epsilon = 1e-12);
        }
    }

    #[test]
    fn bounded_rejects_empty_interval() {
        assert!(Constraint::bounded(1., 1.).is_err());
        assert!(Constraint::bounded(0., f64::INFINITY).is_err());
    }

    #[test]
    fn transform_rejects_empty_interval() {
        for (lower, upper) in [
            (5., 0.),
            (1., 1.),
            (f64::NAN, 1.),
            (f64::INFINITY, f64::INFINITY),
            (f64::NEG_INFINITY, f64::NEG_INFINITY),
        ] {
            assert!(matches!(
                Constraint::transform(lower, upper),
                Err(HmcError::InvalidBounds { .. })
            ));
        }
        assert!(Constraint::transform(f64::NEG_INFINITY, f64::INFINITY).is_ok());
        assert!(matches!(
            Constraint::bounded(2., -2.),
            Err(HmcError::InvalidBounds {
                lower: 2.,
                upper: -2.
            })
        ));
    }

    #[test]
    fn empty_simplex_is_an_error() {
        assert!(matches!(
            Constraint::simplex(0),
            Err(HmcError::DimensionMismatch {
                expected: 1,
                got: 0
            })
        ));
        let single = Constraint::simplex(1).unwrap();
        assert_eq!(single.free_dimension(), 0);
        assert_eq!(single.constrain(&[]).unwrap(), vec![1.]);
    }

    #[test]
    fn push_checks_gradient_lengths() {
        let c = Constraint::joint(vec![Constraint::simplex(3).unwrap(), Constraint::identity(1)]);
        let (_, push) = c.constrain_with_push(&[0.1, -0.2, 0.3]).unwrap();
        let mut grad_y = vec![0f64; 3];
        assert!(matches!(
            push.push_with_gradient(0., &[1.; 3], &mut grad_y),
            Err(HmcError::DimensionMismatch {
                expected: 4,
                got: 3
            })
        ));
        assert!(matches!(
            push.push_with_gradient(0., &[1.; 4], &mut grad_y[..2]),
            Err(HmcError::DimensionMismatch {
                expected: 3,
                got: 2
            })
        ));
        assert!(push.push_with_gradient(0., &[1.; 4], &mut grad_y).is_ok());
    }

    #[test]
    fn wrong_dimension() {
        let c = Constraint::identity(3);
        assert!(matches!(
            c.constrain(&[1., 2.]),
            Err(HmcError::DimensionMismatch {
                expected: 3,
                got: 2
            })
        ));
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let y0 = [0.4, -0.7, 1.1, 0.2, -0.3, 0.9, 0.5, 0.1, -1.2, 0.35, 0.6, -0.45, 0.05];
        let joint = Constraint::joint(catalogue());
        let y = &y0[..joint.free_dimension()];

        let (x, push) = joint.constrain_with_push(y).unwrap();
        let (logp_x, grad_x) = linear_logp(&x);
        let mut grad_y = vec![0f64; y.len()];
        let logp_y = push.push_with_gradient(logp_x, &grad_x, &mut grad_y).unwrap();
        assert_abs_diff_eq!(logp_y, pushed_logp(&joint, y), epsilon = 1e-12);

        let h = 1e-6;
        for i in 0..y.len() {
            let mut up = y.to_vec();
            let mut down = y.to_vec();
            up[i] += h;
            down[i] -= h;
            let fd = (pushed_logp(&joint, &up) - pushed_logp(&joint, &down)) / (2. * h);
            assert_abs_diff_eq!(grad_y[i], fd, epsilon = 1e-5);
        }
    }

    proptest! {
        #[test]
        fn free_inverts_constrain(y in prop::collection::vec(-3f64..3f64, 8)) {
            let scalars = [
                Constraint::lower_bounded(1.5),
                Constraint::bounded(-2., 7.).unwrap(),
                Constraint::transform(f64::NEG_INFINITY, 0.).unwrap(),
                Constraint::transform(f64::NEG_INFINITY, f64::INFINITY).unwrap(),
            ];
            let joint = Constraint::joint(
                scalars
                    .iter()
                    .cloned()
                    .chain([Constraint::simplex(4).unwrap(), Constraint::identity(1)])
                    .collect(),
            );
            let x = joint.constrain(&y).unwrap();
            let back = joint.free(&x).unwrap();
            for (a, b) in y.iter().zip(&back) {
                prop_assert!((a - b).abs() < 1e-8);
            }
        }
    }
}
