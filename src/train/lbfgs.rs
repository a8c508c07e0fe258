use std::cell::RefCell;
use std::ops::ControlFlow;

use log::debug;

use super::optimizer::{Optimizable, Optimizer, Step};
use crate::error::{CrfError, Result};

/// Step length search run inside each L-BFGS iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineSearchAlgorithm {
    #[default]
    MoreThuente,
    /// Shrinks the step until the Wolfe conditions hold; copes with
    /// evaluations that abort to an infinite value
    BacktrackingWolfe,
}

impl LineSearchAlgorithm {
    fn name(self) -> &'static str {
        match self {
            Self::MoreThuente => "MoreThuente",
            Self::BacktrackingWolfe => "BacktrackingWolfe",
        }
    }
}

/// Settings handed to `liblbfgs` for every search
#[derive(Debug, Clone)]
pub struct LbfgsParams {
    epsilon: f64,
    linesearch: LineSearchAlgorithm,
    max_linesearch: usize,
}

impl Default for LbfgsParams {
    fn default() -> Self {
        Self {
            epsilon: 1e-5,
            linesearch: LineSearchAlgorithm::MoreThuente,
            max_linesearch: 20,
        }
    }
}

impl LbfgsParams {
    /// A search converges once `||g|| <= epsilon * max(1, ||x||)`
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn set_epsilon(&mut self, epsilon: f64) -> Result<()> {
        if !(epsilon >= 0.0) {
            return Err(CrfError::invalid_parameter("epsilon must be non-negative"));
        }
        self.epsilon = epsilon;
        Ok(())
    }

    pub fn linesearch(&self) -> LineSearchAlgorithm {
        self.linesearch
    }

    pub fn set_linesearch(&mut self, linesearch: LineSearchAlgorithm) {
        self.linesearch = linesearch;
    }

    /// Evaluations allowed per line search
    pub fn max_linesearch(&self) -> usize {
        self.max_linesearch
    }

    pub fn set_max_linesearch(&mut self, max_linesearch: usize) -> Result<()> {
        if max_linesearch == 0 {
            return Err(CrfError::invalid_parameter("max_linesearch must be positive"));
        }
        self.max_linesearch = max_linesearch;
        Ok(())
    }
}

/// The target as `liblbfgs` sees it: only the finite coordinates, negated
struct Search<'t, T: ?Sized> {
    target: &'t mut T,
    /// Full parameter vector, pinned coordinates included
    full: Vec<f64>,
    gradient: Vec<f64>,
    /// Error raised by the target during the last evaluation
    failure: Option<CrfError>,
}

impl<T: Optimizable + ?Sized> Search<'_, T> {
    fn evaluate(&mut self, free: &[usize], xs: &[f64], gx: &mut [f64]) -> anyhow::Result<f64> {
        for (&j, &v) in free.iter().zip(xs) {
            self.full[j] = v;
        }
        self.target.set_parameters(&self.full);
        let evaluated = self.target.value().and_then(|value| {
            self.target.value_gradient(&mut self.gradient)?;
            Ok(value)
        });
        match evaluated {
            Ok(value) => {
                for (g, &j) in gx.iter_mut().zip(free) {
                    *g = -self.gradient[j];
                }
                Ok(-value)
            }
            Err(e) => {
                let message = e.to_string();
                self.failure = Some(e);
                Err(anyhow::anyhow!(message))
            }
        }
    }

    fn restore(&mut self, free: &[usize], xs: &[f64]) {
        for (&j, &v) in free.iter().zip(xs) {
            self.full[j] = v;
        }
        self.target.set_parameters(&self.full);
    }
}

/// Maximizer backed by `liblbfgs`.
///
/// One call to [`Optimizer::optimize`] is one search: the curvature history
/// lives as long as the call. Parameters that are not finite are held out of
/// the search vector, so they never move.
#[derive(Debug, Clone, Default)]
pub struct Lbfgs {
    params: LbfgsParams,
    /// Steps accepted since the last reset
    steps: usize,
}

impl Lbfgs {
    pub fn new(params: LbfgsParams) -> Self {
        Self { params, steps: 0 }
    }

    pub fn params(&self) -> &LbfgsParams {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut LbfgsParams {
        &mut self.params
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Result<Self> {
        self.params.set_epsilon(epsilon)?;
        Ok(self)
    }

    pub fn with_linesearch(mut self, linesearch: LineSearchAlgorithm) -> Self {
        self.params.set_linesearch(linesearch);
        self
    }

    /// Steps accepted since the last reset
    pub fn steps(&self) -> usize {
        self.steps
    }

    fn run<T: Optimizable + ?Sized>(
        &mut self,
        search: &RefCell<Search<'_, T>>,
        free: &[usize],
        x: &mut [f64],
        accepted: &mut [f64],
        max_steps: usize,
        monitor: &mut dyn FnMut(&mut T, &Step) -> ControlFlow<()>,
    ) -> Result<bool> {
        let fail = |e: anyhow::Error| {
            search
                .borrow_mut()
                .failure
                .take()
                .unwrap_or_else(|| CrfError::Optimizer(format!("{:#}", e)))
        };
        let mut state = liblbfgs::lbfgs()
            .with_epsilon(self.params.epsilon)
            .with_max_linesearch(self.params.max_linesearch)
            .with_linesearch_algorithm(self.params.linesearch.name())
            .build(x, |xs: &[f64], gx: &mut [f64]| {
                search.borrow_mut().evaluate(free, xs, gx)
            })
            .map_err(&fail)?;

        // the first propagation only reports the starting point
        state.propagate().map_err(&fail)?;
        let mut converged = state.is_converged();
        let mut taken = 0;
        while !converged && taken < max_steps {
            let step = {
                let progress = state.propagate().map_err(&fail)?;
                // liblbfgs reverts a failed line search and reports no calls
                if let Some(e) = search.borrow_mut().failure.take() {
                    return Err(e);
                }
                if progress.ncall == 0 {
                    return Err(CrfError::Optimizer(format!(
                        "line search failed after step {}",
                        self.steps
                    )));
                }
                accepted.copy_from_slice(progress.x);
                Step {
                    index: self.steps,
                    value: -progress.fx,
                    gradient_norm: progress.gnorm,
                    parameter_norm: progress.xnorm,
                }
            };
            taken += 1;
            self.steps += 1;
            debug!(
                "L-BFGS step {}: value = {:.6}, ||x|| = {:.6}, ||g|| = {:.6}",
                step.index, step.value, step.parameter_norm, step.gradient_norm
            );
            converged = state.is_converged();
            let mut guard = search.borrow_mut();
            if monitor(&mut *guard.target, &step).is_break() {
                break;
            }
        }
        Ok(converged)
    }
}

impl Optimizer for Lbfgs {
    fn optimize<T: Optimizable + ?Sized>(
        &mut self,
        target: &mut T,
        max_steps: usize,
        monitor: &mut dyn FnMut(&mut T, &Step) -> ControlFlow<()>,
    ) -> Result<bool> {
        let n = target.num_parameters();
        let mut full = vec![0.0; n];
        target.parameters(&mut full);
        let free: Vec<usize> = (0..n).filter(|&j| full[j].is_finite()).collect();
        if free.is_empty() {
            return Ok(true);
        }
        if max_steps == 0 {
            return Ok(false);
        }
        let mut x: Vec<f64> = free.iter().map(|&j| full[j]).collect();
        let mut accepted = x.clone();
        let search = RefCell::new(Search {
            target,
            full,
            gradient: vec![0.0; n],
            failure: None,
        });

        let outcome = self.run(&search, &free, &mut x, &mut accepted, max_steps, monitor);
        if outcome.is_err() {
            search.into_inner().restore(&free, &accepted);
        }
        outcome
    }

    fn reset(&mut self) {
        debug!("resetting L-BFGS after {} steps", self.steps);
        self.steps = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// -(x - 3)^2 - scale * (y + 1)^2, failing once x passes `wall`
    struct Bowl {
        x: Vec<f64>,
        scale: f64,
        wall: f64,
    }

    impl Bowl {
        fn new(x: Vec<f64>, scale: f64) -> Self {
            Self {
                x,
                scale,
                wall: f64::INFINITY,
            }
        }
    }

    impl Optimizable for Bowl {
        fn num_parameters(&self) -> usize {
            self.x.len()
        }

        fn parameters(&self, buf: &mut [f64]) {
            buf.copy_from_slice(&self.x);
        }

        fn set_parameters(&mut self, buf: &[f64]) {
            self.x.copy_from_slice(buf);
        }

        fn value(&mut self) -> Result<f64> {
            if self.x[0] > self.wall {
                return Err(CrfError::Inference(format!("x = {} is past the wall", self.x[0])));
            }
            Ok(-(self.x[0] - 3.0).powi(2) - self.scale * (self.x[1] + 1.0).powi(2))
        }

        fn value_gradient(&mut self, buf: &mut [f64]) -> Result<()> {
            buf[0] = -2.0 * (self.x[0] - 3.0);
            buf[1] = -2.0 * self.scale * (self.x[1] + 1.0);
            if self.x.len() > 2 {
                buf[2] = 0.0;
            }
            Ok(())
        }
    }

    fn keep_going(_: &mut Bowl, _: &Step) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    #[test]
    fn test_lbfgs_maximizes() {
        let mut bowl = Bowl::new(vec![0.0, 0.0], 100.0);
        let mut lbfgs = Lbfgs::default();
        let converged = lbfgs.optimize(&mut bowl, 50, &mut keep_going).unwrap();
        assert!(converged);
        assert!(lbfgs.steps() < 50);
        assert!((bowl.x[0] - 3.0).abs() < 1e-3);
        assert!((bowl.x[1] + 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_every_search_moves_the_parameters() {
        let mut bowl = Bowl::new(vec![0.0, 0.0], 1.0);
        let mut lbfgs = Lbfgs::default();
        let mut previous = bowl.value().unwrap();
        for calls in 1..=3 {
            lbfgs.optimize(&mut bowl, 1, &mut keep_going).unwrap();
            let value = bowl.value().unwrap();
            assert!(value > previous, "value {} after {} searches", value, calls);
            assert_eq!(lbfgs.steps(), calls);
            previous = value;
        }
        lbfgs.reset();
        assert_eq!(lbfgs.steps(), 0);
    }

    #[test]
    fn test_monitor_sees_each_step_and_can_stop() {
        let mut bowl = Bowl::new(vec![0.0, 0.0], 100.0);
        let mut lbfgs = Lbfgs::default();
        let mut seen = Vec::new();
        let converged = lbfgs
            .optimize(&mut bowl, 50, &mut |bowl: &mut Bowl, step: &Step| {
                // the target is already at the accepted point
                assert!((bowl.value().unwrap() - step.value).abs() < 1e-12);
                seen.push(step.index);
                if seen.len() == 2 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap();
        assert!(!converged);
        assert_eq!(seen, vec![0, 1]);
        assert_eq!(lbfgs.steps(), 2);
    }

    #[test]
    fn test_non_finite_parameters_do_not_move() {
        let mut bowl = Bowl::new(vec![0.0, 0.0, f64::NEG_INFINITY], 1.0);
        let mut lbfgs = Lbfgs::default();
        lbfgs.optimize(&mut bowl, 5, &mut keep_going).unwrap();
        assert_eq!(bowl.x[2], f64::NEG_INFINITY);
        assert!(bowl.x[0] > 0.0);
    }

    #[test]
    fn test_failed_search_returns_to_last_step() {
        // the first unit-length step stays short of the wall, the second
        // heads for the optimum past it
        let mut bowl = Bowl::new(vec![0.0, 0.0], 1.0);
        bowl.wall = 1.5;
        let mut lbfgs = Lbfgs::default();
        let mut accepted = Vec::new();
        let err = lbfgs
            .optimize(&mut bowl, 10, &mut |bowl: &mut Bowl, _: &Step| {
                accepted.push(bowl.x.clone());
                ControlFlow::Continue(())
            })
            .unwrap_err();
        assert!(matches!(err, CrfError::Inference(_)));
        assert!(!err.is_structural());
        let last = accepted.last().cloned().unwrap_or_else(|| vec![0.0, 0.0]);
        assert_eq!(bowl.x, last);
        assert!(bowl.x[0] <= 1.5);
    }

    #[test]
    fn test_params_validation() {
        let mut params = LbfgsParams::default();
        assert!(params.set_epsilon(-1.0).is_err());
        assert!(params.set_max_linesearch(0).is_err());
        assert!(params.set_max_linesearch(40).is_ok());
        assert_eq!(params.max_linesearch(), 40);
    }
}
