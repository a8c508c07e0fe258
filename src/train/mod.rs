//! Training loop for arbitrary CRFs
//!
//! A [`Trainer`] drives an [`Optimizer`] over an
//! [`Objective`](crate::objective::Objective), one iteration per accepted
//! step, with early stopping, recovery from optimizer failures and an optional
//! [`Evaluator`] that may stop training.

mod evaluator;
mod lbfgs;
mod optimizer;
mod trainer;

// Re-export public types
pub use self::evaluator::{AccuracyEvaluator, EvaluationSchedule, Evaluator};
pub use self::lbfgs::{Lbfgs, LbfgsParams, LineSearchAlgorithm};
pub use self::optimizer::{Optimizable, Optimizer, Step};
pub use self::trainer::{Trainer, TrainerParams, TrainingData, TrainingReport, TrainingState};
