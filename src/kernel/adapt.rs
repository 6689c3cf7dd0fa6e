use faer::{Col, ColRef, Mat, Scale};
use tracing::debug;

use crate::{
    error::Result,
    kernel::{
        metric::Metric,
        stepsize::{DualAverage, DualAverageOptions},
    },
};

const INIT_BUFFER: u64 = 75;
const TERM_BUFFER: u64 = 50;
const BASE_WINDOW: u64 = 25;
/// Below this many warm-up steps only the step size is adapted.
const MIN_METRIC_ADAPT: u64 = 20;

/// Welford estimate of the per-coordinate variance.
#[derive(Debug, Clone)]
struct RunningVariance {
    mean: Box<[f64]>,
    m2: Box<[f64]>,
    count: u64,
}

impl RunningVariance {
    fn new(dim: usize) -> Self {
        Self {
            mean: vec![0f64; dim].into(),
            m2: vec![0f64; dim].into(),
            count: 0,
        }
    }

    fn add_sample(&mut self, value: &[f64]) {
        self.count += 1;
        let t = self.count as f64;
        self.mean
            .iter_mut()
            .zip(self.m2.iter_mut())
            .zip(value)
            .for_each(|((mean, m2), &x)| {
                let delta = x - *mean;
                *mean += delta / t;
                *m2 += delta * (x - *mean);
            });
    }

    /// Sample variance shrunk towards a small constant.
    fn regularized(&self) -> Vec<f64> {
        let n = self.count as f64;
        self.m2
            .iter()
            .map(|m2| (n / (n + 5.)) * (m2 / (n - 1.)) + 1e-3 * (5. / (n + 5.)))
            .collect()
    }
}

/// Welford estimate of the full covariance.
#[derive(Debug, Clone)]
struct RunningCovariance {
    mean: Col<f64>,
    m2: Mat<f64>,
    count: u64,
}

impl RunningCovariance {
    fn new(dim: usize) -> Self {
        Self {
            mean: Col::zeros(dim),
            m2: Mat::zeros(dim, dim),
            count: 0,
        }
    }

    fn add_sample(&mut self, value: &[f64]) {
        self.count += 1;
        let value = ColRef::from_slice(value);
        let delta = value - &self.mean;
        self.mean += Scale((self.count as f64).recip()) * &delta;
        let after = value - &self.mean;
        // rank one update, (x - mean_new)(x - mean_old)^T
        self.m2 += &after * delta.transpose();
    }

    fn regularized(&self) -> Mat<f64> {
        let n = self.count as f64;
        let dim = self.mean.nrows();
        Mat::from_fn(dim, dim, |i, j| {
            let m2 = 0.5 * (self.m2[(i, j)] + self.m2[(j, i)]);
            let cov = (n / (n + 5.)) * m2 / (n - 1.);
            if i == j {
                cov + 1e-3 * (5. / (n + 5.))
            } else {
                cov
            }
        })
    }
}

#[derive(Debug, Clone)]
enum MetricEstimator {
    None,
    Diag(RunningVariance),
    Dense(RunningCovariance),
}

impl MetricEstimator {
    fn for_metric(metric: &Metric) -> Self {
        match metric {
            Metric::Unit(_) => MetricEstimator::None,
            Metric::Diag(_) => MetricEstimator::Diag(RunningVariance::new(metric.dim())),
            Metric::Dense(_) => MetricEstimator::Dense(RunningCovariance::new(metric.dim())),
        }
    }

    fn add_sample(&mut self, position: &[f64]) {
        match self {
            MetricEstimator::None => {}
            MetricEstimator::Diag(var) => var.add_sample(position),
            MetricEstimator::Dense(cov) => cov.add_sample(position),
        }
    }

    /// The estimated metric, and a fresh estimator for the next window.
    fn finish_window(&mut self) -> Result<Option<Metric>> {
        let metric = match self {
            MetricEstimator::None => return Ok(None),
            MetricEstimator::Diag(var) if var.count >= 2 => {
                let metric = Metric::diag(var.regularized())?;
                *var = RunningVariance::new(var.mean.len());
                metric
            }
            MetricEstimator::Dense(cov) if cov.count >= 2 => {
                let metric = Metric::dense(cov.regularized())?;
                *cov = RunningCovariance::new(cov.mean.nrows());
                metric
            }
            _ => return Ok(None),
        };
        Ok(Some(metric))
    }
}

/// The outcome of one adaptation step.
#[derive(Debug, Clone)]
pub struct AdaptUpdate {
    pub step_size: f64,
    /// A new metric, at the end of a slow adaptation window.
    pub metric: Option<Metric>,
}

/// Stan's windowed adaptation: dual averaging of the step size throughout,
/// and metric estimates from windows of doubling length in between an
/// initial and a terminal buffer.
#[derive(Debug, Clone)]
pub struct StanHmcAdaptor {
    num_adapt: u64,
    target_accept: f64,
    dual: DualAverage,
    estimator: MetricEstimator,
    init_buffer: u64,
    term_buffer: u64,
    window_size: u64,
    next_window_end: u64,
    counter: u64,
}

impl StanHmcAdaptor {
    pub fn new(
        num_adapt: u64,
        target_accept: f64,
        options: DualAverageOptions,
        initial_step: f64,
        metric: &Metric,
    ) -> Self {
        let (init_buffer, term_buffer, window_size) =
            if INIT_BUFFER + TERM_BUFFER + BASE_WINDOW > num_adapt {
                let init = (0.15 * num_adapt as f64) as u64;
                let term = (0.1 * num_adapt as f64) as u64;
                (init, term, num_adapt - init - term)
            } else {
                (INIT_BUFFER, TERM_BUFFER, BASE_WINDOW)
            };
        let estimator = if num_adapt < MIN_METRIC_ADAPT {
            MetricEstimator::None
        } else {
            MetricEstimator::for_metric(metric)
        };
        Self {
            num_adapt,
            target_accept,
            dual: DualAverage::new(options, initial_step),
            estimator,
            init_buffer,
            term_buffer,
            window_size,
            next_window_end: (init_buffer + window_size).saturating_sub(1),
            counter: 0,
        }
    }

    /// Number of adaptation steps so far.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn is_finished(&self) -> bool {
        self.counter >= self.num_adapt
    }

    /// Feed the position and acceptance statistic of the latest step.
    ///
    /// The last step of the warm-up switches to the averaged step size.
    pub fn adapt(&mut self, position: &[f64], accept_stat: f64) -> Result<AdaptUpdate> {
        let i = self.counter;
        self.counter += 1;

        if i >= self.num_adapt {
            return Ok(AdaptUpdate {
                step_size: self.dual.current_step_size_adapted(),
                metric: None,
            });
        }

        self.dual.advance(accept_stat, self.target_accept);
        let mut step_size = self.dual.current_step_size();
        let mut metric = None;

        if self.in_slow_window(i) {
            self.estimator.add_sample(position);
            if i == self.next_window_end {
                metric = self.estimator.finish_window()?;
                if metric.is_some() {
                    debug!(draw = i, "Updated metric at end of adaptation window");
                }
                self.dual.reset(step_size);
                self.compute_next_window(i);
            }
        }

        if i + 1 == self.num_adapt {
            step_size = self.dual.current_step_size_adapted();
        }
        Ok(AdaptUpdate { step_size, metric })
    }

    /// The step size to use after warm-up.
    pub fn finalize(&self) -> f64 {
        self.dual.current_step_size_adapted()
    }

    fn in_slow_window(&self, i: u64) -> bool {
        i >= self.init_buffer && i + self.term_buffer < self.num_adapt
    }

    fn last_window_end(&self) -> u64 {
        self.num_adapt.saturating_sub(self.term_buffer + 1)
    }

    fn compute_next_window(&mut self, i: u64) {
        let last = self.last_window_end();
        if self.next_window_end == last {
            return;
        }
        self.window_size *= 2;
        self.next_window_end = i + self.window_size;
        if self.next_window_end != last {
            let next_boundary = self.next_window_end + 2 * self.window_size;
            if next_boundary >= self.num_adapt - self.term_buffer {
                self.next_window_end = last;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use rand_distr::StandardNormal;

    fn window_ends(num_adapt: u64) -> Vec<u64> {
        let metric = Metric::diag(vec![1.]).unwrap();
        let mut adaptor =
            StanHmcAdaptor::new(num_adapt, 0.8, DualAverageOptions::default(), 0.1, &metric);
        let mut ends = vec![];
        for i in 0..num_adapt {
            let update = adaptor.adapt(&[i as f64 * 0.01], 0.8).unwrap();
            if update.metric.is_some() {
                ends.push(i);
            }
        }
        ends
    }

    #[test]
    fn stan_windows() {
        assert_eq!(window_ends(1000), vec![99, 149, 249, 449, 949]);
        assert_eq!(window_ends(150), vec![99]);
        assert_eq!(window_ends(100), vec![89]);
        assert!(window_ends(10).is_empty());
    }

    #[test]
    fn estimates_variance() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let metric = Metric::diag(vec![1., 1.]).unwrap();
        let mut adaptor =
            StanHmcAdaptor::new(1000, 0.8, DualAverageOptions::default(), 0.1, &metric);
        let mut last = None;
        for _ in 0..1000 {
            let x: f64 = rng.sample(StandardNormal);
            let y: f64 = rng.sample(StandardNormal);
            let update = adaptor.adapt(&[3. * x, 0.5 * y], 0.8).unwrap();
            if let Some(metric) = update.metric {
                last = Some(metric);
            }
        }
        let variance = last.unwrap().variance();
        assert_abs_diff_eq!(variance[0], 9., epsilon = 1.5);
        assert_abs_diff_eq!(variance[1], 0.25, epsilon = 0.05);
        assert!(adaptor.is_finished());
        assert_eq!(adaptor.counter(), 1000);
    }

    #[test]
    fn dense_window_gives_dense_metric() {
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let metric = Metric::dense(Mat::identity(2, 2)).unwrap();
        let mut adaptor =
            StanHmcAdaptor::new(200, 0.8, DualAverageOptions::default(), 0.1, &metric);
        let mut seen = false;
        for _ in 0..200 {
            let z: f64 = rng.sample(StandardNormal);
            let w: f64 = rng.sample(StandardNormal);
            let update = adaptor.adapt(&[z, z + 0.5 * w], 0.8).unwrap();
            if let Some(metric) = update.metric {
                assert!(matches!(metric, Metric::Dense(_)));
                seen = true;
            }
        }
        assert!(seen);
    }

    #[test]
    fn running_covariance_matches_two_pass() {
        let draws = [
            [1., 2., 0.5],
            [0., -1., 2.],
            [3., 0.5, -1.],
            [2., 2., 2.],
            [-1., 0., 1.],
        ];
        let mut cov = RunningCovariance::new(3);
        draws.iter().for_each(|draw| cov.add_sample(draw));

        let n = draws.len() as f64;
        let mean: Vec<f64> = (0..3)
            .map(|i| draws.iter().map(|d| d[i]).sum::<f64>() / n)
            .collect();
        for i in 0..3 {
            assert_abs_diff_eq!(cov.mean[i], mean[i], epsilon = 1e-12);
            for j in 0..3 {
                let expected: f64 = draws
                    .iter()
                    .map(|d| (d[i] - mean[i]) * (d[j] - mean[j]))
                    .sum();
                assert_abs_diff_eq!(cov.m2[(i, j)], expected, epsilon = 1e-12);
            }
        }
        let regularized = cov.regularized();
        assert_abs_diff_eq!(
            regularized[(0, 1)],
            (n / (n + 5.)) * cov.m2[(0, 1)] / (n - 1.),
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(regularized[(0, 1)], regularized[(1, 0)]);
    }

    #[test]
    fn unit_metric_is_kept() {
        let metric = Metric::unit(1);
        let mut adaptor =
            StanHmcAdaptor::new(300, 0.8, DualAverageOptions::default(), 0.1, &metric);
        for _ in 0..300 {
            assert!(adaptor.adapt(&[0.], 0.5).unwrap().metric.is_none());
        }
    }
}
