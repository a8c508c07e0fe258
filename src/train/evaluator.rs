use log::{info, warn};

use crate::acrf::Acrf;
use crate::dataset::Instance;
use crate::error::{CrfError, Result};

/// Callback run between training iterations.
///
/// Returning `false` stops training.
pub trait Evaluator {
    fn evaluate(
        &mut self,
        acrf: &Acrf,
        iteration: usize,
        training: &[Instance],
        validation: &[Instance],
        testing: &[Instance],
    ) -> bool;
}

/// When the evaluator runs: after the first `skip` iterations, then every
/// `every` iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationSchedule {
    skip: usize,
    every: usize,
}

impl Default for EvaluationSchedule {
    fn default() -> Self {
        Self { skip: 0, every: 1 }
    }
}

impl EvaluationSchedule {
    pub fn new(skip: usize, every: usize) -> Result<Self> {
        if every == 0 {
            return Err(CrfError::invalid_parameter(
                "evaluation interval must be at least 1",
            ));
        }
        Ok(Self { skip, every })
    }

    pub fn skip(&self) -> usize {
        self.skip
    }

    pub fn every(&self) -> usize {
        self.every
    }

    pub fn should_evaluate(&self, iteration: usize) -> bool {
        iteration >= self.skip && (iteration - self.skip) % self.every == 0
    }
}

/// Token accuracy of MAP decoding on the validation set, or on the
/// training set when there is none.
///
/// Stops training once `target` accuracy is reached, if one is set.
#[derive(Debug, Clone, Default)]
pub struct AccuracyEvaluator {
    target: Option<f64>,
    history: Vec<(usize, f64)>,
}

impl AccuracyEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(target: f64) -> Self {
        Self {
            target: Some(target),
            history: Vec::new(),
        }
    }

    /// `(iteration, accuracy)` of every evaluation so far
    pub fn history(&self) -> &[(usize, f64)] {
        &self.history
    }

    /// Fraction of labels decoded correctly, `None` if decoding failed
    pub fn accuracy(acrf: &Acrf, instances: &[Instance]) -> Option<f64> {
        let mut correct = 0usize;
        let mut total = 0usize;
        for inst in instances {
            let decoded = match acrf.best_labels(inst) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!("decoding {} failed: {}", inst.name(), e);
                    return None;
                }
            };
            for (gold, predicted) in inst.labels().iter().zip(&decoded) {
                total += gold.len();
                correct += gold.iter().zip(predicted).filter(|(g, p)| g == p).count();
            }
        }
        if total == 0 {
            return Some(1.0);
        }
        Some(correct as f64 / total as f64)
    }
}

impl Evaluator for AccuracyEvaluator {
    fn evaluate(
        &mut self,
        acrf: &Acrf,
        iteration: usize,
        training: &[Instance],
        validation: &[Instance],
        _testing: &[Instance],
    ) -> bool {
        let (name, instances) = if validation.is_empty() {
            ("training", training)
        } else {
            ("validation", validation)
        };
        let accuracy = match Self::accuracy(acrf, instances) {
            Some(accuracy) => accuracy,
            None => return true,
        };
        info!("iteration {}: {} accuracy {:.4}", iteration, name, accuracy);
        self.history.push((iteration, accuracy));
        match self.target {
            Some(target) => accuracy < target,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule() {
        let schedule = EvaluationSchedule::new(2, 3).unwrap();
        let runs: Vec<usize> = (0..10).filter(|&i| schedule.should_evaluate(i)).collect();
        assert_eq!(runs, vec![2, 5, 8]);
        assert!(EvaluationSchedule::new(0, 0).is_err());
        assert!(EvaluationSchedule::default().should_evaluate(0));
    }
}
