use faer::{ColRef, Mat};
use rand_distr::StandardNormal;

use crate::{
    error::{HmcError, Result},
    math::{multiply, vector_dot},
    settings::MetricKind,
};

/// Off-diagonal entries with a smaller magnitude than this count as zero when
/// an explicit matrix is classified.
const CLASSIFY_TOLERANCE: f64 = 1e-12;

/// The inverse mass matrix of the kinetic energy.
#[derive(Debug, Clone)]
pub enum Metric {
    Unit(usize),
    Diag(DiagMetric),
    Dense(DenseMetric),
}

#[derive(Debug, Clone)]
pub struct DiagMetric {
    variance: Box<[f64]>,
    inv_stds: Box<[f64]>,
}

#[derive(Debug, Clone)]
pub struct DenseMetric {
    inverse: Mat<f64>,
    /// Maps a standard normal vector to a momentum with covariance equal to
    /// the mass matrix.
    momentum_factor: Mat<f64>,
}

impl Metric {
    pub fn unit(dim: usize) -> Self {
        Metric::Unit(dim)
    }

    pub fn diag(variance: Vec<f64>) -> Result<Self> {
        if variance.iter().any(|&v| !v.is_finite() || v <= 0.) {
            return Err(HmcError::MetricNotPositiveDefinite);
        }
        let inv_stds = variance.iter().map(|&v| v.recip().sqrt()).collect();
        Ok(Metric::Diag(DiagMetric {
            variance: variance.into(),
            inv_stds,
        }))
    }

    pub fn dense(inverse: Mat<f64>) -> Result<Self> {
        if inverse.nrows() != inverse.ncols() {
            return Err(HmcError::MetricShape {
                expected: inverse.nrows(),
                rows: inverse.nrows(),
                cols: inverse.ncols(),
            });
        }
        let n = inverse.nrows();
        for i in 0..n {
            for j in 0..i {
                if (inverse[(i, j)] - inverse[(j, i)]).abs() > CLASSIFY_TOLERANCE {
                    return Err(HmcError::MetricNotPositiveDefinite);
                }
            }
        }
        let eig = inverse
            .self_adjoint_eigen(faer::Side::Lower)
            .map_err(|_| HmcError::MetricNotPositiveDefinite)?;
        let vals = eig.S().column_vector().to_owned();
        let vecs = eig.U().to_owned();
        if (0..n).any(|k| !vals[k].is_finite() || vals[k] <= 0.) {
            return Err(HmcError::MetricNotPositiveDefinite);
        }
        let momentum_factor = Mat::from_fn(n, n, |i, k| vecs[(i, k)] / vals[k].sqrt());
        Ok(Metric::Dense(DenseMetric {
            inverse,
            momentum_factor,
        }))
    }

    /// Build the initial metric for `dim` free variables.
    ///
    /// An explicit matrix is classified: the identity becomes a unit metric,
    /// a diagonal matrix a diagonal one, anything else must be symmetric
    /// positive definite.
    pub fn from_kind(kind: &MetricKind, dim: usize) -> Result<Self> {
        match kind {
            MetricKind::Unit => Ok(Metric::unit(dim)),
            MetricKind::Diag => Metric::diag(vec![1f64; dim]),
            MetricKind::Dense => Metric::dense(Mat::identity(dim, dim)),
            MetricKind::Matrix(rows) => {
                let cols = rows.first().map(|r| r.len()).unwrap_or(0);
                if rows.len() != dim || rows.iter().any(|r| r.len() != dim) {
                    return Err(HmcError::MetricShape {
                        expected: dim,
                        rows: rows.len(),
                        cols,
                    });
                }
                let off_diagonal_zero = (0..dim).all(|i| {
                    (0..dim).all(|j| i == j || rows[i][j].abs() <= CLASSIFY_TOLERANCE)
                });
                if !off_diagonal_zero {
                    return Metric::dense(Mat::from_fn(dim, dim, |i, j| rows[i][j]));
                }
                let diagonal: Vec<f64> = (0..dim).map(|i| rows[i][i]).collect();
                if diagonal
                    .iter()
                    .all(|&d| (d - 1.).abs() <= CLASSIFY_TOLERANCE)
                {
                    Ok(Metric::unit(dim))
                } else {
                    Metric::diag(diagonal)
                }
            }
        }
    }

    pub fn dim(&self) -> usize {
        match self {
            Metric::Unit(dim) => *dim,
            Metric::Diag(diag) => diag.variance.len(),
            Metric::Dense(dense) => dense.inverse.nrows(),
        }
    }

    /// Short name, as accepted by [`MetricKind`]'s parser.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Metric::Unit(_) => "unit",
            Metric::Diag(_) => "diag",
            Metric::Dense(_) => "dense",
        }
    }

    /// `velocity = M^-1 momentum`
    pub fn update_velocity(&self, momentum: &[f64], velocity: &mut [f64]) {
        match self {
            Metric::Unit(_) => velocity.copy_from_slice(momentum),
            Metric::Diag(diag) => multiply(&diag.variance, momentum, velocity),
            Metric::Dense(dense) => {
                let out = dense.inverse.as_ref() * ColRef::from_slice(momentum);
                velocity.copy_from_slice(out.try_as_col_major().unwrap().as_slice());
            }
        }
    }

    pub fn kinetic_energy(&self, momentum: &[f64], velocity: &[f64]) -> f64 {
        0.5 * vector_dot(momentum, velocity)
    }

    /// Draw a momentum from `N(0, M)`.
    pub fn randomize_momentum<R: rand::Rng + ?Sized>(&self, momentum: &mut [f64], rng: &mut R) {
        match self {
            Metric::Unit(_) => momentum
                .iter_mut()
                .for_each(|p| *p = rng.sample(StandardNormal)),
            Metric::Diag(diag) => momentum
                .iter_mut()
                .zip(diag.inv_stds.iter())
                .for_each(|(p, &s)| {
                    let norm: f64 = rng.sample(StandardNormal);
                    *p = s * norm;
                }),
            Metric::Dense(dense) => {
                let z: Vec<f64> = (0..momentum.len())
                    .map(|_| rng.sample(StandardNormal))
                    .collect();
                let out = dense.momentum_factor.as_ref() * ColRef::from_slice(&z);
                momentum.copy_from_slice(out.try_as_col_major().unwrap().as_slice());
            }
        }
    }

    /// The diagonal of the inverse mass matrix.
    pub fn variance(&self) -> Vec<f64> {
        match self {
            Metric::Unit(dim) => vec![1f64; *dim],
            Metric::Diag(diag) => diag.variance.to_vec(),
            Metric::Dense(dense) => (0..dense.inverse.nrows())
                .map(|i| dense.inverse[(i, i)])
                .collect(),
        }
    }
}
