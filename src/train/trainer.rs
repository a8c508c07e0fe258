use std::ops::ControlFlow;

use log::{info, warn};

use super::evaluator::{EvaluationSchedule, Evaluator};
use super::lbfgs::Lbfgs;
use super::optimizer::{Optimizable, Optimizer, Step};
use crate::acrf::Acrf;
use crate::cache::GraphCache;
use crate::dataset::Instance;
use crate::error::{CrfError, Result};
use crate::objective::{Estimator, Objective, ObjectiveParams, Pwpl};

/// Trainer parameters.
#[derive(Debug, Clone)]
pub struct TrainerParams {
    max_iterations: usize,
    convergence_scale: f64,
    strict: bool,
    cache_graphs: bool,
}

impl Default for TrainerParams {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            convergence_scale: 1e-5,
            strict: false,
            cache_graphs: true,
        }
    }
}

impl TrainerParams {
    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn set_max_iterations(&mut self, max_iterations: usize) -> Result<()> {
        if max_iterations < 1 {
            return Err(CrfError::invalid_parameter(
                "max_iterations must be at least 1",
            ));
        }
        self.max_iterations = max_iterations;
        Ok(())
    }

    /// Early stopping threshold per variable of the training set
    pub fn convergence_scale(&self) -> f64 {
        self.convergence_scale
    }

    pub fn set_convergence_scale(&mut self, convergence_scale: f64) -> Result<()> {
        if !(convergence_scale >= 0.0) {
            return Err(CrfError::invalid_parameter(
                "convergence_scale must be non-negative",
            ));
        }
        self.convergence_scale = convergence_scale;
        Ok(())
    }

    /// Return the second consecutive optimizer failure instead of stopping
    pub fn strict(&self) -> bool {
        self.strict
    }

    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    pub fn cache_graphs(&self) -> bool {
        self.cache_graphs
    }

    pub fn set_cache_graphs(&mut self, cache_graphs: bool) {
        self.cache_graphs = cache_graphs;
    }
}

/// How a training run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingState {
    /// The optimizer converged or the value stopped changing
    Converged,
    MaxIterations,
    /// The evaluator asked to stop
    Vetoed,
    /// The optimizer failed twice in a row
    NumericalFailure,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingReport {
    pub state: TrainingState,
    pub iterations: usize,
    /// Objective value at the final parameters
    pub value: f64,
    pub converged: bool,
}

/// Instances handed to the trainer and its evaluator
#[derive(Debug, Clone, Copy, Default)]
pub struct TrainingData<'d> {
    pub training: &'d [Instance],
    pub validation: &'d [Instance],
    pub testing: &'d [Instance],
}

impl<'d> TrainingData<'d> {
    pub fn new(training: &'d [Instance]) -> Self {
        Self {
            training,
            validation: &[],
            testing: &[],
        }
    }

    pub fn with_validation(mut self, validation: &'d [Instance]) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_testing(mut self, testing: &'d [Instance]) -> Self {
        self.testing = testing;
        self
    }

    /// Total number of output variables in the training set
    pub fn num_training_variables(&self) -> usize {
        self.training
            .iter()
            .map(|inst| inst.len() * inst.num_slices())
            .sum()
    }
}

/// Drives an [`Optimizer`] over an [`Objective`]; every accepted step is
/// one iteration
pub struct Trainer<O: Optimizer = Lbfgs> {
    params: TrainerParams,
    optimizer: O,
    cache: GraphCache,
    evaluator: Option<Box<dyn Evaluator>>,
    schedule: EvaluationSchedule,
}

impl Trainer<Lbfgs> {
    /// Create a new L-BFGS trainer
    pub fn lbfgs() -> Self {
        Self::new(Lbfgs::default())
    }
}

impl Default for Trainer<Lbfgs> {
    fn default() -> Self {
        Self::lbfgs()
    }
}

impl<O: Optimizer> Trainer<O> {
    pub fn new(optimizer: O) -> Self {
        let params = TrainerParams::default();
        Self {
            cache: GraphCache::new(params.cache_graphs),
            params,
            optimizer,
            evaluator: None,
            schedule: EvaluationSchedule::default(),
        }
    }

    pub fn params(&self) -> &TrainerParams {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut TrainerParams {
        &mut self.params
    }

    /// Set maximum iterations (builder pattern)
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Result<Self> {
        self.params.set_max_iterations(max_iterations)?;
        Ok(self)
    }

    pub fn with_evaluator(mut self, evaluator: Box<dyn Evaluator>, schedule: EvaluationSchedule) -> Self {
        self.set_evaluator(evaluator, schedule);
        self
    }

    pub fn set_evaluator(&mut self, evaluator: Box<dyn Evaluator>, schedule: EvaluationSchedule) {
        self.evaluator = Some(evaluator);
        self.schedule = schedule;
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    pub fn optimizer_mut(&mut self) -> &mut O {
        &mut self.optimizer
    }

    pub fn cache(&self) -> &GraphCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut GraphCache {
        &mut self.cache
    }

    /// Train `acrf` under `estimator`.
    ///
    /// Weights are sized against the training set first if any template is
    /// still unallocated.
    pub fn train<E: Estimator>(
        &mut self,
        acrf: &mut Acrf,
        estimator: E,
        objective_params: ObjectiveParams,
        data: &TrainingData<'_>,
    ) -> Result<TrainingReport> {
        if acrf.templates().iter().any(|t| !t.weights().is_allocated()) {
            acrf.init_weights(data.training)?;
        }
        self.cache.set_enabled(self.params.cache_graphs);
        let mut objective =
            Objective::new(acrf, data.training, &mut self.cache, estimator, objective_params)?;
        drive(
            &self.params,
            self.params.max_iterations,
            &mut self.optimizer,
            self.evaluator.as_deref_mut(),
            &self.schedule,
            &mut objective,
            data,
        )
    }

    /// Two-phase piecewise pseudolikelihood training: `first_phase`
    /// iterations on the plain objective, one wrong-wrong harvest at
    /// `threshold`, then training on the augmented objective.
    pub fn train_pwpl(
        &mut self,
        acrf: &mut Acrf,
        objective_params: ObjectiveParams,
        data: &TrainingData<'_>,
        first_phase: usize,
        threshold: f64,
    ) -> Result<TrainingReport> {
        if acrf.templates().iter().any(|t| !t.weights().is_allocated()) {
            acrf.init_weights(data.training)?;
        }
        self.cache.set_enabled(self.params.cache_graphs);
        let mut objective =
            Objective::new(acrf, data.training, &mut self.cache, Pwpl::new(), objective_params)?;
        let first = drive(
            &self.params,
            first_phase.min(self.params.max_iterations),
            &mut self.optimizer,
            self.evaluator.as_deref_mut(),
            &self.schedule,
            &mut objective,
            data,
        )?;
        if first.state == TrainingState::Vetoed {
            return Ok(first);
        }

        let harvested = objective.harvest_wrong_wrongs(threshold)?;
        info!(
            "first phase ended after {} iterations; {} wrong-wrongs added",
            first.iterations, harvested
        );
        self.optimizer.reset();
        let second = drive(
            &self.params,
            self.params.max_iterations,
            &mut self.optimizer,
            self.evaluator.as_deref_mut(),
            &self.schedule,
            &mut objective,
            data,
        )?;
        Ok(TrainingReport {
            iterations: first.iterations + second.iterations,
            ..second
        })
    }

    /// Decode `testing` without caching its graphs
    pub fn test(&mut self, acrf: &Acrf, testing: &[Instance]) -> Result<Vec<Vec<Vec<u32>>>> {
        let previous = self.cache.set_enabled(false);
        let decoded = acrf.decode_all(testing, &mut self.cache);
        self.cache.set_enabled(previous);
        decoded
    }
}

fn drive<'o, O: Optimizer, E: Estimator>(
    params: &TrainerParams,
    max_iterations: usize,
    optimizer: &mut O,
    mut evaluator: Option<&mut (dyn Evaluator + 'static)>,
    schedule: &EvaluationSchedule,
    objective: &mut Objective<'o, E>,
    data: &TrainingData<'_>,
) -> Result<TrainingReport> {
    let threshold = params.convergence_scale * data.num_training_variables() as f64;
    let mut report = TrainingReport {
        state: TrainingState::MaxIterations,
        iterations: 0,
        value: objective.value()?,
        converged: false,
    };
    let mut previous = report.value;
    let mut failures = 0;

    while report.iterations < max_iterations {
        let remaining = max_iterations - report.iterations;
        let mut stopped = None;
        let mut monitor = |objective: &mut Objective<'o, E>, step: &Step| {
            let iteration = report.iterations;
            report.iterations += 1;
            report.value = step.value;
            failures = 0;
            info!("iteration {}: value {:.6}", iteration, step.value);

            if let Some(evaluator) = evaluator.as_mut() {
                if schedule.should_evaluate(iteration)
                    && !evaluator.evaluate(
                        objective.model(),
                        iteration,
                        data.training,
                        data.validation,
                        data.testing,
                    )
                {
                    info!("iteration {}: evaluator stopped training", iteration);
                    stopped = Some(TrainingState::Vetoed);
                    return ControlFlow::Break(());
                }
            }
            if (step.value - previous).abs() < threshold {
                info!(
                    "iteration {}: value changed by less than {:e}",
                    iteration, threshold
                );
                stopped = Some(TrainingState::Converged);
                return ControlFlow::Break(());
            }
            previous = step.value;
            ControlFlow::Continue(())
        };
        let outcome = optimizer.optimize(objective, remaining, &mut monitor);

        match outcome {
            Ok(converged) => {
                report.state = match stopped {
                    Some(state) => state,
                    None if converged => TrainingState::Converged,
                    None => TrainingState::MaxIterations,
                };
                report.converged = report.state == TrainingState::Converged;
                return Ok(report);
            }
            Err(e) if e.is_structural() => return Err(e),
            Err(e) => {
                failures += 1;
                if failures == 1 {
                    warn!(
                        "iteration {}: optimizer failed: {}; resetting",
                        report.iterations, e
                    );
                    optimizer.reset();
                    continue;
                }
                if params.strict {
                    return Err(e);
                }
                // parameters are back at the last accepted step
                warn!(
                    "iteration {}: optimizer failed again: {}; stopping",
                    report.iterations, e
                );
                report.state = TrainingState::NumericalFailure;
                report.converged = true;
                return Ok(report);
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_validation() {
        let mut params = TrainerParams::default();
        assert!(params.set_max_iterations(0).is_err());
        assert!(params.set_convergence_scale(-1.0).is_err());
        assert!(params.set_convergence_scale(f64::NAN).is_err());
        assert!(params.set_max_iterations(5).is_ok());
        assert_eq!(params.max_iterations(), 5);
    }

    #[test]
    fn test_training_data_counts_variables() {
        use crate::sparse::SparseVector;
        let inst = Instance::new(
            "x",
            vec![SparseVector::new(); 3],
            vec![vec![0, 1]; 3],
            vec![2, 2],
        )
        .unwrap();
        let training = vec![inst];
        assert_eq!(TrainingData::new(&training).num_training_variables(), 6);
    }
}
