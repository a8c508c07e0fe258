//! Parameter estimation for arbitrarily-structured conditional random fields
//!
//! A model is a list of clique templates. Every training instance is unrolled
//! into a factor graph whose cliques share the weights of the template that
//! produced them, and the weights are fit by maximizing one of four criteria:
//! the exact likelihood, the piecewise likelihood, pseudolikelihood, or
//! piecewise pseudolikelihood.
//!
//! # Examples
//!
//! ```no_run
//! use acrfs::objective::{Likelihood, ObjectiveParams};
//! use acrfs::train::{Trainer, TrainingData};
//! use acrfs::{Acrf, ExhaustiveInferencer, Instance, SequenceTemplate, SparseVector};
//!
//! let training = vec![Instance::sequence(
//!     "walk-shop",
//!     vec![
//!         SparseVector::from_indices(&[0]),
//!         SparseVector::from_indices(&[1]),
//!     ],
//!     &[0, 1],
//!     2,
//! )?];
//!
//! let mut acrf = Acrf::new(
//!     vec![
//!         Box::new(SequenceTemplate::unigram(0)),
//!         Box::new(SequenceTemplate::bigram(0)),
//!     ],
//!     vec![],
//!     Box::new(ExhaustiveInferencer::new()),
//! );
//! let mut trainer = Trainer::lbfgs().with_max_iterations(50)?;
//! let report = trainer.train(
//!     &mut acrf,
//!     Likelihood,
//!     ObjectiveParams::default(),
//!     &TrainingData::new(&training),
//! )?;
//! println!("{:?} after {} iterations", report.state, report.iterations);
//!
//! let labels = acrf.best_labels(&training[0])?;
//! # Ok::<(), acrfs::CrfError>(())
//! ```

mod acrf;
mod attribute;
mod cache;
mod dataset;
mod dictionary;
mod error;
mod factor;
mod graph;
mod inference;
mod model;
mod model_writer;
mod sparse;
mod template;
mod variable;

/// Training objectives and their per-graph estimators
pub mod objective;
/// Optimizers and the training loop
pub mod train;

// Re-export main types
pub use self::acrf::Acrf;
pub use self::attribute::Attribute;
pub use self::cache::GraphCache;
pub use self::dataset::{Corpus, Instance};
pub use self::dictionary::Dictionary;
pub use self::error::{CrfError, Result};
pub use self::factor::Factor;
pub use self::graph::{CliqueId, CliqueSink, FactorId, FactorSlot, UnrolledGraph, UnrolledVarSet};
pub use self::inference::{ExhaustiveInferencer, Inferencer, Marginals};
pub use self::model::{SavedModel, SavedTemplate};
pub use self::model_writer::ModelWriter;
pub use self::sparse::{FeatureVector, SparseVector};
pub use self::template::{
    ConstantTemplate, FixedTemplate, SequenceTemplate, Shape, Template, TemplateRef,
    TemplateWeights, WeightAllocation, WeightSizing,
};
pub use self::variable::{Assignment, VarId, VarSet, Variable};

// Re-export training types for convenience
pub use self::train::{Trainer, TrainingData};
