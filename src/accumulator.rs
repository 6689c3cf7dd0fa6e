use std::collections::HashMap;

use tracing::info;

use crate::error::{HmcError, Result};

/// Append-only store of per-step values for a fixed, ordered set of keys.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleAccumulator {
    keys: Vec<String>,
    values: Vec<Box<[f64]>>,
}

impl SampleAccumulator {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys,
            values: Vec::new(),
        }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Append one sample, aligned with `keys`.
    pub fn add_sample(&mut self, sample: &[f64]) -> Result<()> {
        if sample.len() != self.keys.len() {
            return Err(HmcError::DimensionMismatch {
                expected: self.keys.len(),
                got: sample.len(),
            });
        }
        self.values.push(sample.into());
        Ok(())
    }

    /// The full history of every key.
    pub fn get_samples(&self) -> HashMap<String, Vec<f64>> {
        self.keys
            .iter()
            .enumerate()
            .map(|(i, key)| (key.clone(), self.column(i)))
            .collect()
    }

    /// The full history of one key.
    pub fn get_key_samples(&self, key: &str) -> Result<Vec<f64>> {
        let i = self.key_index(key)?;
        Ok(self.column(i))
    }

    /// The stored samples, one row per step.
    pub fn rows(&self) -> &[Box<[f64]>] {
        &self.values
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    fn key_index(&self, key: &str) -> Result<usize> {
        self.keys
            .iter()
            .position(|k| k == key)
            .ok_or_else(|| HmcError::KeyNotFound(key.to_string()))
    }

    fn column(&self, i: usize) -> Vec<f64> {
        self.values.iter().map(|row| row[i]).collect()
    }
}

/// A [`SampleAccumulator`] that also keeps the running mean and the latest
/// sample.
///
/// The mean is updated incrementally and stays exact when the history is
/// not needed any more.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsAccumulator {
    samples: SampleAccumulator,
    mean: Box<[f64]>,
    current: Option<Box<[f64]>>,
    count: u64,
}

impl StatisticsAccumulator {
    pub fn new(keys: Vec<String>) -> Self {
        let mean = vec![0f64; keys.len()].into();
        Self {
            samples: SampleAccumulator::new(keys),
            mean,
            current: None,
            count: 0,
        }
    }

    pub fn keys(&self) -> &[String] {
        self.samples.keys()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn add_sample(&mut self, sample: &[f64]) -> Result<()> {
        self.samples.add_sample(sample)?;
        self.count += 1;
        let t = self.count as f64;
        self.mean
            .iter_mut()
            .zip(sample)
            .for_each(|(mean, &value)| *mean += (value - *mean) / t);
        self.current = Some(sample.into());
        Ok(())
    }

    pub fn get_samples(&self) -> HashMap<String, Vec<f64>> {
        self.samples.get_samples()
    }

    pub fn get_key_samples(&self, key: &str) -> Result<Vec<f64>> {
        self.samples.get_key_samples(key)
    }

    pub fn samples(&self) -> &SampleAccumulator {
        &self.samples
    }

    /// Running mean of every key over all samples since the last clear.
    pub fn mean_stats(&self) -> HashMap<String, f64> {
        self.named(&self.mean)
    }

    /// The latest sample, empty if nothing was recorded since the last clear.
    pub fn current(&self) -> HashMap<String, f64> {
        match &self.current {
            Some(current) => self.named(current),
            None => HashMap::new(),
        }
    }

    pub fn log_current(&self) {
        if let Some(current) = &self.current {
            for (key, value) in self.keys().iter().zip(current.iter()) {
                info!(key = key.as_str(), value, "current");
            }
        }
    }

    pub fn log_mean(&self) {
        for (key, value) in self.keys().iter().zip(self.mean.iter()) {
            info!(key = key.as_str(), value, "mean");
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.mean.iter_mut().for_each(|m| *m = 0.);
        self.current = None;
        self.count = 0;
    }

    fn named(&self, values: &[f64]) -> HashMap<String, f64> {
        self.keys().iter().cloned().zip(values.iter().copied()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn keys() -> Vec<String> {
        vec!["a".to_string(), "b".to_string()]
    }

    #[test]
    fn samples_by_key() {
        let mut acc = SampleAccumulator::new(keys());
        acc.add_sample(&[1., 2.]).unwrap();
        acc.add_sample(&[3., 4.]).unwrap();
        assert_eq!(acc.get_key_samples("b").unwrap(), vec![2., 4.]);
        let all = acc.get_samples();
        assert_eq!(all["a"], vec![1., 3.]);
        assert_eq!(all.len(), 2);
        assert!(matches!(
            acc.get_key_samples("c"),
            Err(HmcError::KeyNotFound(k)) if k == "c"
        ));
        assert!(acc.add_sample(&[1.]).is_err());
        assert_eq!(acc.len(), 2);
    }

    #[test]
    fn current_and_clear() {
        let mut acc = StatisticsAccumulator::new(keys());
        assert!(acc.current().is_empty());
        acc.add_sample(&[1., 2.]).unwrap();
        acc.add_sample(&[5., 0.]).unwrap();
        assert_eq!(acc.current()["a"], 5.);
        assert_eq!(acc.mean_stats()["a"], 3.);
        acc.clear();
        assert!(acc.is_empty());
        assert!(acc.current().is_empty());
        assert_eq!(acc.mean_stats()["b"], 0.);
    }

    proptest! {
        #[test]
        fn running_mean_matches_batch_mean(
            rows in prop::collection::vec((-1e3f64..1e3, -1e3f64..1e3), 1..60)
        ) {
            let mut acc = StatisticsAccumulator::new(keys());
            for (t, &(a, b)) in rows.iter().enumerate() {
                acc.add_sample(&[a, b]).unwrap();
                let seen = &rows[..=t];
                let n = seen.len() as f64;
                let mean_a = seen.iter().map(|r| r.0).sum::<f64>() / n;
                let mean_b = seen.iter().map(|r| r.1).sum::<f64>() / n;
                let mean = acc.mean_stats();
                prop_assert!((mean["a"] - mean_a).abs() < 1e-8);
                prop_assert!((mean["b"] - mean_b).abs() < 1e-8);
            }
        }

        #[test]
        fn clear_then_refill_equals_fresh(
            first in prop::collection::vec(-1e3f64..1e3, 0..20),
            second in prop::collection::vec(-1e3f64..1e3, 0..20),
        ) {
            let mut reused = StatisticsAccumulator::new(keys());
            for &x in &first {
                reused.add_sample(&[x, -x]).unwrap();
            }
            reused.clear();
            let mut fresh = StatisticsAccumulator::new(keys());
            for &x in &second {
                reused.add_sample(&[x, 2. * x]).unwrap();
                fresh.add_sample(&[x, 2. * x]).unwrap();
            }
            prop_assert_eq!(reused, fresh);
        }
    }
}
