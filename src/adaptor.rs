//! The warm-up loop: step a chain and tune its step size and metric.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use tracing::{debug, info};

use crate::{
    driver::Chain,
    error::{HmcError, Result},
    kernel::StanHmcAdaptor,
    settings::AdaptorSettings,
};

/// Summary of a warm-up run.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptReport {
    pub num_steps: u64,
    pub elapsed: Duration,
    /// Wall time per leapfrog step, `None` if no leapfrog step was taken.
    pub per_eval: Option<Duration>,
    pub divergences: u64,
    pub divergence_percent: f64,
    /// Total number of leapfrog steps.
    pub n_evals: u64,
    /// Number of updates fed to the step size and metric adaptation.
    pub adapt_calls: u64,
    /// The step size after warm-up.
    pub step_size: f64,
    /// Mean of every recorded statistic over the warm-up.
    pub mean_stats: HashMap<String, f64>,
}

impl AdaptReport {
    fn empty(step_size: f64) -> Self {
        Self {
            num_steps: 0,
            elapsed: Duration::ZERO,
            per_eval: None,
            divergences: 0,
            divergence_percent: 0.,
            n_evals: 0,
            adapt_calls: 0,
            step_size,
            mean_stats: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Adaptor {
    settings: AdaptorSettings,
}

impl Adaptor {
    pub fn new(settings: AdaptorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &AdaptorSettings {
        &self.settings
    }

    /// Run `num_adapt` steps of `chain`, adapting its step size and metric
    /// after every step.
    ///
    /// Recorded history is cleared first. Unless `update_states` is set the
    /// chain's observers are suspended for the duration of the warm-up, and
    /// restored afterwards even if a step fails. Divergences are counted, the
    /// chain's divergence policy decides whether they stop the warm-up.
    pub fn adapt<C: Chain + ?Sized>(&self, chain: &mut C) -> Result<AdaptReport> {
        let num_adapt = self.settings.num_adapt;
        info!("Warming up HMC for {num_adapt} steps");
        chain.clear_history();
        if num_adapt == 0 {
            return Ok(AdaptReport::empty(chain.step_size()));
        }

        let suspend = !self.settings.update_states;
        if suspend {
            chain.suspend_observers();
        }
        let report = self.run(chain);
        if suspend {
            chain.restore_observers();
        }
        let report = report?;
        self.log_summary(&report);
        Ok(report)
    }

    fn run<C: Chain + ?Sized>(&self, chain: &mut C) -> Result<AdaptReport> {
        let num_adapt = self.settings.num_adapt;
        let mut adaptor = StanHmcAdaptor::new(
            num_adapt,
            self.settings.target_accept,
            self.settings.dual_average,
            chain.step_size(),
            chain.metric(),
        );
        let log_every = ((self.settings.log_freq * num_adapt as f64).round() as u64).max(1);

        let start = Instant::now();
        let mut divergences = 0u64;
        let mut n_evals = 0u64;
        let mut adapt_calls = 0u64;

        for counter in 0..num_adapt {
            chain.step()?;
            let (accept_stat, n_leapfrog) = chain
                .last_stats()
                .map(|stats| (stats.accept_stat, stats.n_leapfrog))
                .ok_or(HmcError::NoSamples)?;
            if chain.is_diverging()? {
                divergences += 1;
            }
            n_evals += n_leapfrog;

            let update = adaptor.adapt(chain.position(), accept_stat)?;
            adapt_calls += 1;
            chain.apply_adaptation(update.step_size, update.metric)?;

            let done = counter + 1;
            if self.settings.verbose && done % log_every == 0 {
                let elapsed = start.elapsed();
                let eta = elapsed.mul_f64((num_adapt - done) as f64 / done as f64);
                info!(
                    elapsed = ?elapsed,
                    per_eval = ?per_eval(elapsed, n_evals),
                    eta = ?eta,
                    divergences,
                    step_size = chain.step_size(),
                    "Warm-up step {done}/{num_adapt}"
                );
                if let Some(stats) = chain.statistics() {
                    stats.log_current();
                }
            }
        }

        let elapsed = start.elapsed();
        let mean_stats = chain
            .statistics()
            .map(|stats| stats.mean_stats())
            .unwrap_or_default();
        Ok(AdaptReport {
            num_steps: num_adapt,
            elapsed,
            per_eval: per_eval(elapsed, n_evals),
            divergences,
            divergence_percent: 100. * divergences as f64 / num_adapt as f64,
            n_evals,
            adapt_calls,
            step_size: chain.step_size(),
            mean_stats,
        })
    }

    fn log_summary(&self, report: &AdaptReport) {
        let mut means: Vec<_> = report.mean_stats.iter().collect();
        means.sort_by(|a, b| a.0.cmp(b.0));
        if self.settings.verbose {
            info!(
                elapsed = ?report.elapsed,
                per_eval = ?report.per_eval,
                divergences = report.divergences,
                divergence_percent = report.divergence_percent,
                step_size = report.step_size,
                means = ?means,
                "Finished warm-up"
            );
        } else {
            debug!(
                elapsed = ?report.elapsed,
                per_eval = ?report.per_eval,
                divergences = report.divergences,
                divergence_percent = report.divergence_percent,
                step_size = report.step_size,
                means = ?means,
                "Finished warm-up"
            );
        }
    }
}

fn per_eval(elapsed: Duration, n_evals: u64) -> Option<Duration> {
    (n_evals > 0).then(|| Duration::from_secs_f64(elapsed.as_secs_f64() / n_evals as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{accumulator::StatisticsAccumulator, kernel::Metric, kernel::TransitionStats};
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    /// Diverges on every `every`-th step.
    struct MockChain {
        every: u64,
        steps: u64,
        position: Vec<f64>,
        stats: Option<TransitionStats>,
        history: StatisticsAccumulator,
        metric: Metric,
        step_size: f64,
        suspended: bool,
        suspend_calls: u64,
        fail_at: Option<u64>,
    }

    impl MockChain {
        fn new(every: u64) -> Self {
            Self {
                every,
                steps: 0,
                position: vec![0.],
                stats: None,
                history: StatisticsAccumulator::new(vec!["acceptance_rate".into()]),
                metric: Metric::unit(1),
                step_size: 0.5,
                suspended: false,
                suspend_calls: 0,
                fail_at: None,
            }
        }
    }

    impl Chain for MockChain {
        fn clear_history(&mut self) {
            self.history.clear();
        }

        fn suspend_observers(&mut self) {
            self.suspended = true;
            self.suspend_calls += 1;
        }

        fn restore_observers(&mut self) {
            self.suspended = false;
        }

        fn before_sample(&mut self) -> Result<()> {
            Ok(())
        }

        fn sample(&mut self) -> Result<()> {
            assert!(self.suspended);
            self.steps += 1;
            if self.fail_at == Some(self.steps) {
                return Err(HmcError::InvalidSetting("boom".into()));
            }
            let diverging = self.steps % self.every == 0;
            self.position[0] = self.steps as f64 * 0.1;
            self.stats = Some(TransitionStats {
                lp: 0.,
                is_accept: true,
                accept_stat: 0.8,
                stepsize: self.step_size,
                treedepth: 1,
                n_leapfrog: 3,
                diverging,
                energy: 0.,
                energy_error: 0.,
                divergence_info: None,
            });
            self.history.add_sample(&[0.8])
        }

        fn after_sample(&mut self) -> Result<()> {
            Ok(())
        }

        fn position(&self) -> &[f64] {
            &self.position
        }

        fn last_stats(&self) -> Option<&TransitionStats> {
            self.stats.as_ref()
        }

        fn statistics(&self) -> Option<&StatisticsAccumulator> {
            Some(&self.history)
        }

        fn is_diverging(&self) -> Result<bool> {
            self.stats
                .as_ref()
                .map(|s| s.diverging)
                .ok_or(HmcError::NoSamples)
        }

        fn step_size(&self) -> f64 {
            self.step_size
        }

        fn metric(&self) -> &Metric {
            &self.metric
        }

        fn apply_adaptation(&mut self, step_size: f64, metric: Option<Metric>) -> Result<()> {
            self.step_size = step_size;
            if let Some(metric) = metric {
                self.metric = metric;
            }
            Ok(())
        }
    }

    fn adaptor(num_adapt: u64) -> Adaptor {
        Adaptor::new(AdaptorSettings {
            num_adapt,
            ..Default::default()
        })
    }

    #[test]
    fn counts_divergences() {
        let mut chain = MockChain::new(10);
        let report = adaptor(100).adapt(&mut chain).unwrap();
        assert_eq!(report.divergences, 10);
        assert_eq!(report.divergence_percent, 10.0);
        assert_eq!(report.adapt_calls, 100);
        assert_eq!(report.n_evals, 300);
        assert_eq!(report.num_steps, 100);
        assert_eq!(report.mean_stats["acceptance_rate"], 0.8);
        assert_eq!(chain.history.len(), 100);
        assert!(!chain.suspended);
    }

    #[test]
    fn zero_steps_return_immediately() {
        let mut chain = MockChain::new(10);
        chain.history.add_sample(&[1.]).unwrap();
        let report = adaptor(0).adapt(&mut chain).unwrap();
        assert_eq!(report.adapt_calls, 0);
        assert_eq!(report.step_size, 0.5);
        assert_eq!(chain.steps, 0);
        assert_eq!(chain.history.len(), 0);
        assert_eq!(chain.suspend_calls, 0);
    }

    #[test]
    fn every_step_divergent_completes() {
        let mut chain = MockChain::new(1);
        let report = adaptor(50).adapt(&mut chain).unwrap();
        assert_eq!(report.divergences, 50);
        assert_eq!(report.divergence_percent, 100.0);
    }

    #[test]
    fn observers_restored_after_error() {
        let mut chain = MockChain::new(10);
        chain.fail_at = Some(5);
        assert!(adaptor(20).adapt(&mut chain).is_err());
        assert!(!chain.suspended);
        assert_eq!(chain.steps, 5);
    }

    #[test]
    fn update_states_keeps_observers() {
        let mut chain = MockChain::new(10);
        chain.suspended = true;
        let adaptor = Adaptor::new(AdaptorSettings {
            num_adapt: 10,
            update_states: true,
            ..Default::default()
        });
        adaptor.adapt(&mut chain).unwrap();
        assert_eq!(chain.suspend_calls, 0);
        assert!(chain.suspended);
    }

    #[test]
    fn per_eval_needs_evaluations() {
        assert_eq!(per_eval(Duration::from_secs(1), 0), None);
        assert_eq!(
            per_eval(Duration::from_secs(1), 4),
            Some(Duration::from_millis(250))
        );
        let many = u64::from(u32::MAX) + 1;
        assert_eq!(
            per_eval(Duration::from_secs(many), many),
            Some(Duration::from_secs(1))
        );
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn progress_logs_current_statistics() {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(captured.clone())
            .finish();
        let mut chain = MockChain::new(10);
        let adaptor = Adaptor::new(AdaptorSettings {
            num_adapt: 20,
            log_freq: 0.5,
            verbose: true,
            ..Default::default()
        });
        tracing::subscriber::with_default(subscriber, || adaptor.adapt(&mut chain).unwrap());

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let stat_lines: Vec<&str> = output
            .lines()
            .filter(|line| line.contains("particle_hmc::accumulator"))
            .collect();
        assert_eq!(stat_lines.len(), 2);
        assert!(stat_lines
            .iter()
            .all(|line| line.contains("current") && line.contains("acceptance_rate")));
        assert!(output.contains("Warm-up step 10/20"));
        assert!(output.contains("Finished warm-up"));
    }
}
