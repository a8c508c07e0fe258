use std::ops::ControlFlow;

use crate::error::Result;

/// A function of a flat parameter vector to be maximized
pub trait Optimizable {
    fn num_parameters(&self) -> usize;

    /// Copy the current parameters into `buf`
    fn parameters(&self, buf: &mut [f64]);

    fn set_parameters(&mut self, buf: &[f64]);

    /// Objective value at the current parameters
    fn value(&mut self) -> Result<f64>;

    /// Gradient at the current parameters
    fn value_gradient(&mut self, buf: &mut [f64]) -> Result<()>;
}

/// One accepted optimizer step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    /// Steps accepted since the optimizer was last reset, starting at 0
    pub index: usize,
    /// Objective value at the new parameters
    pub value: f64,
    pub gradient_norm: f64,
    pub parameter_norm: f64,
}

/// Gradient-based maximizer
pub trait Optimizer {
    /// Run one search of at most `max_steps` steps from the current
    /// parameters of `target`, calling `monitor` after each step.
    ///
    /// `monitor` sees the target already at the new parameters and must not
    /// change them.
    ///
    /// Returns whether the search converged. It ends unconverged when the
    /// steps run out or `monitor` breaks. On error the parameters are left
    /// at the last accepted step.
    fn optimize<T: Optimizable + ?Sized>(
        &mut self,
        target: &mut T,
        max_steps: usize,
        monitor: &mut dyn FnMut(&mut T, &Step) -> ControlFlow<()>,
    ) -> Result<bool>;

    /// Forget the state carried between searches
    fn reset(&mut self);
}
