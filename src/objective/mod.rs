//! Training objectives over unrolled graphs.
//!
//! [`Objective`] owns the bookkeeping every criterion shares: gold
//! constraints, expected counts, the Gaussian prior, the degenerate-instance
//! policy and the flat parameter vector seen by the optimizer. What differs
//! between criteria is the per-graph [`Estimator`].

use std::collections::HashSet;
use std::fmt;

use bitflags::bitflags;
use log::{debug, info, warn};
use rayon::prelude::*;

use crate::acrf::Acrf;
use crate::cache::GraphCache;
use crate::dataset::Instance;
use crate::error::{CrfError, Result};
use crate::graph::UnrolledGraph;
use crate::inference::Inferencer;
use crate::train::Optimizable;

mod layout;
mod likelihood;
mod piecewise;
mod pseudo;
mod pwpl;

pub use self::layout::{ParameterLayout, Statistics};
pub use self::likelihood::Likelihood;
pub use self::piecewise::Piecewise;
pub use self::pseudo::{Pseudolikelihood, PseudolikelihoodMode};
pub use self::pwpl::{Pwpl, WrongWrong};

bitflags! {
    /// Cached quantities that must be recomputed
    struct Stale: u8 {
        const VALUE = 0x01;
        const GRADIENT = 0x02;
    }
}

/// Per-graph part of a training criterion.
pub trait Estimator: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Add the gold sufficient statistics of `graph` to `stats`
    fn collect_constraints(&self, graph: &UnrolledGraph, stats: &mut Statistics<'_>) -> Result<()> {
        let gold = graph.gold();
        for clique in graph.cliques() {
            stats.add(clique, clique.assignment_index_of(gold), 1.0);
        }
        Ok(())
    }

    /// Add the expected sufficient statistics of `graph` to `stats` and
    /// return the graph's contribution to the objective value.
    fn compute_expectations_and_value(
        &self,
        graph: &UnrolledGraph,
        inferencer: &dyn Inferencer,
        stats: &mut Statistics<'_>,
    ) -> Result<f64>;
}

/// Objective parameters
#[derive(Debug, Clone)]
pub struct ObjectiveParams {
    variance: f64,
    normalize_by_size: bool,
    parallel: bool,
}

impl Default for ObjectiveParams {
    fn default() -> Self {
        Self {
            variance: 10.0,
            normalize_by_size: false,
            parallel: true,
        }
    }
}

impl ObjectiveParams {
    /// Variance of the zero-mean Gaussian prior on every weight
    pub fn variance(&self) -> f64 {
        self.variance
    }

    pub fn set_variance(&mut self, variance: f64) -> Result<()> {
        if !(variance > 0.0) || variance.is_infinite() {
            return Err(CrfError::invalid_parameter(
                "variance must be positive",
            ));
        }
        self.variance = variance;
        Ok(())
    }

    pub fn with_variance(mut self, variance: f64) -> Result<Self> {
        self.set_variance(variance)?;
        Ok(self)
    }

    /// Whether value and gradient are divided by the number of instances
    pub fn normalize_by_size(&self) -> bool {
        self.normalize_by_size
    }

    pub fn set_normalize_by_size(&mut self, normalize_by_size: bool) {
        self.normalize_by_size = normalize_by_size;
    }

    pub fn with_normalize_by_size(mut self, normalize_by_size: bool) -> Self {
        self.normalize_by_size = normalize_by_size;
        self
    }

    /// Whether instances are evaluated on the rayon thread pool
    pub fn parallel(&self) -> bool {
        self.parallel
    }

    pub fn set_parallel(&mut self, parallel: bool) {
        self.parallel = parallel;
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// Thread-local sums of one evaluation pass
#[derive(Debug)]
struct Partial {
    value: f64,
    expectations: Vec<f64>,
    /// Expectations of the instance being visited
    scratch: Vec<f64>,
    newly_infinite: Vec<usize>,
    aborted: bool,
}

impl Partial {
    fn new(n: usize) -> Self {
        Self {
            value: 0.0,
            expectations: vec![0.0; n],
            scratch: vec![0.0; n],
            newly_infinite: Vec::new(),
            aborted: false,
        }
    }

    fn merge(mut self, other: Partial) -> Partial {
        self.value += other.value;
        for (a, b) in self.expectations.iter_mut().zip(&other.expectations) {
            *a += b;
        }
        self.newly_infinite.extend(other.newly_infinite);
        self.aborted |= other.aborted;
        self
    }
}

/// Read-only state shared by the workers of one pass
struct Pass<'p, E> {
    acrf: &'p Acrf,
    estimator: &'p E,
    layout: &'p ParameterLayout,
    infinite: &'p HashSet<usize>,
    first: bool,
    evaluation: usize,
}

impl<'p, E: Estimator> Pass<'p, E> {
    fn visit(
        &self,
        mut acc: Partial,
        index: usize,
        instance: &Instance,
        slot: &mut Option<UnrolledGraph>,
    ) -> Result<Partial> {
        if acc.aborted || self.infinite.contains(&index) {
            return Ok(acc);
        }
        let prepared = self.acrf.prepare(instance, slot.take()).map_err(|e| {
            warn!(
                "evaluation {}: unrolling {} failed: {}",
                self.evaluation,
                instance.name(),
                e
            );
            e
        })?;
        let graph = slot.insert(prepared);
        if graph.num_variables() == 0 {
            return Ok(acc);
        }

        acc.scratch.iter_mut().for_each(|v| *v = 0.0);
        let value = {
            let mut stats = Statistics::new(self.acrf, self.layout, &mut acc.scratch);
            self.estimator
                .compute_expectations_and_value(graph, self.acrf.inferencer(), &mut stats)?
        };

        if value.is_nan() {
            warn!(
                "evaluation {}: {} objective is NaN on instance {}",
                self.evaluation,
                self.estimator.name(),
                instance.name()
            );
            warn!("{}", graph.dump());
            acc.aborted = true;
        } else if value.is_infinite() {
            if self.first {
                warn!(
                    "instance {} has {} value {}; skipping it from now on",
                    instance.name(),
                    self.estimator.name(),
                    value
                );
                acc.newly_infinite.push(index);
            } else {
                warn!(
                    "evaluation {}: instance {} became infinite ({})",
                    self.evaluation,
                    instance.name(),
                    value
                );
                warn!("{}", graph.dump());
                acc.aborted = true;
            }
        } else {
            acc.value += value;
            for (e, s) in acc.expectations.iter_mut().zip(acc.scratch.iter()) {
                *e += s;
            }
        }
        Ok(acc)
    }
}

/// Penalized training objective over a set of instances.
///
/// Value and gradient are computed together and cached until the
/// parameters change.
#[derive(Debug)]
pub struct Objective<'a, E: Estimator> {
    acrf: &'a mut Acrf,
    instances: &'a [Instance],
    cache: &'a mut GraphCache,
    estimator: E,
    params: ObjectiveParams,
    layout: ParameterLayout,
    constraints: Vec<f64>,
    expectations: Vec<f64>,
    gradient: Vec<f64>,
    value: f64,
    stale: Stale,
    /// Instances flagged infinite on the first evaluation
    infinite: HashSet<usize>,
    evaluations: usize,
    /// Pinned weights are warned about on the first evaluation that sees them
    pinned_reported: bool,
}

impl<'a, E: Estimator> Objective<'a, E> {
    /// Build the objective and collect the gold constraints.
    ///
    /// The template weights must already be allocated.
    pub fn new(
        acrf: &'a mut Acrf,
        instances: &'a [Instance],
        cache: &'a mut GraphCache,
        estimator: E,
        params: ObjectiveParams,
    ) -> Result<Self> {
        let layout = ParameterLayout::new(acrf);
        let n = layout.len();
        let mut objective = Self {
            acrf,
            instances,
            cache,
            estimator,
            params,
            layout,
            constraints: vec![0.0; n],
            expectations: vec![0.0; n],
            gradient: vec![0.0; n],
            value: 0.0,
            stale: Stale::all(),
            infinite: HashSet::new(),
            evaluations: 0,
            pinned_reported: false,
        };
        objective.rebuild_constraints()?;
        info!(
            "{} objective over {} instances, {} parameters",
            objective.estimator.name(),
            instances.len(),
            n
        );
        Ok(objective)
    }

    /// Recollect the gold constraints, e.g. after the estimator changed.
    ///
    /// Instances excluded as degenerate contribute nothing.
    pub fn rebuild_constraints(&mut self) -> Result<()> {
        self.constraints.iter_mut().for_each(|v| *v = 0.0);
        let instances = self.instances;
        for (i, instance) in instances.iter().enumerate() {
            if self.infinite.contains(&i) {
                continue;
            }
            let graph = self.acrf.prepare(instance, self.cache.take(instance.name()))?;
            if graph.num_variables() > 0 {
                let mut stats = Statistics::new(self.acrf, &self.layout, &mut self.constraints);
                self.estimator.collect_constraints(&graph, &mut stats)?;
            }
            self.cache.insert(graph);
        }
        self.stale = Stale::all();
        Ok(())
    }

    fn evaluate(&mut self) -> Result<()> {
        let n = self.layout.len();
        let first = self.evaluations == 0;
        let mut graphs: Vec<Option<UnrolledGraph>> = self
            .instances
            .iter()
            .map(|inst| self.cache.take(inst.name()))
            .collect();

        let pass = Pass {
            acrf: &*self.acrf,
            estimator: &self.estimator,
            layout: &self.layout,
            infinite: &self.infinite,
            first,
            evaluation: self.evaluations + 1,
        };
        let result = if self.params.parallel {
            self.instances
                .par_iter()
                .zip(graphs.par_iter_mut())
                .enumerate()
                .try_fold(
                    || Partial::new(n),
                    |acc, (i, (inst, slot))| pass.visit(acc, i, inst, slot),
                )
                .try_reduce(|| Partial::new(n), |a, b| Ok(a.merge(b)))
        } else {
            self.instances
                .iter()
                .zip(graphs.iter_mut())
                .enumerate()
                .try_fold(Partial::new(n), |acc, (i, (inst, slot))| {
                    pass.visit(acc, i, inst, slot)
                })
        };
        for graph in graphs.into_iter().flatten() {
            self.cache.insert(graph);
        }
        let partial = result?;

        self.evaluations += 1;
        if first && !partial.newly_infinite.is_empty() {
            info!(
                "{} of {} instances are degenerate and excluded",
                partial.newly_infinite.len(),
                self.instances.len()
            );
            self.infinite.extend(partial.newly_infinite.iter().copied());
            self.rebuild_constraints()?;
        }
        if partial.aborted {
            self.value = f64::NEG_INFINITY;
            self.gradient.iter_mut().for_each(|g| *g = 0.0);
            self.expectations = partial.expectations;
            self.stale = Stale::empty();
            return Ok(());
        }

        let mut weights = vec![0.0; n];
        self.layout.gather(self.acrf, &mut weights);
        let variance = self.params.variance;
        let mut value = partial.value;
        let mut pinned = 0usize;
        for (j, &w) in weights.iter().enumerate() {
            if !w.is_finite() {
                if !self.pinned_reported {
                    warn!(
                        "weight {} of template {:?} is {}, pinned",
                        j,
                        self.layout
                            .template_of(j)
                            .map(|t| self.acrf.templates()[t].name()),
                        w
                    );
                }
                pinned += 1;
                self.gradient[j] = 0.0;
                continue;
            }
            value -= w * w / (2.0 * variance);
            self.gradient[j] = self.constraints[j] - partial.expectations[j] - w / variance;
        }
        if pinned > 0 {
            debug!("evaluation {}: {} pinned weights", self.evaluations, pinned);
            self.pinned_reported = true;
        }
        if self.params.normalize_by_size && !self.instances.is_empty() {
            let size = self.instances.len() as f64;
            value /= size;
            self.gradient.iter_mut().for_each(|g| *g /= size);
        }
        debug!(
            "evaluation {}: {} value {:.6}",
            self.evaluations,
            self.estimator.name(),
            value
        );
        self.value = value;
        self.expectations = partial.expectations;
        self.stale = Stale::empty();
        Ok(())
    }

    pub fn model(&self) -> &Acrf {
        &*self.acrf
    }

    pub fn instances(&self) -> &[Instance] {
        self.instances
    }

    pub fn estimator(&self) -> &E {
        &self.estimator
    }

    pub fn params(&self) -> &ObjectiveParams {
        &self.params
    }

    pub fn layout(&self) -> &ParameterLayout {
        &self.layout
    }

    /// Gold sufficient statistics, aligned with the parameter vector
    pub fn constraints(&self) -> &[f64] {
        &self.constraints
    }

    /// Expected sufficient statistics of the last evaluation
    pub fn expectations(&self) -> &[f64] {
        &self.expectations
    }

    /// Number of completed evaluations
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// Instances excluded as degenerate, by position
    pub fn infinite_instances(&self) -> Vec<usize> {
        let mut infinite: Vec<usize> = self.infinite.iter().copied().collect();
        infinite.sort_unstable();
        infinite
    }

    /// Cache the graphs are kept in
    pub fn cache(&self) -> &GraphCache {
        &*self.cache
    }
}

impl<'a, E: Estimator> Optimizable for Objective<'a, E> {
    fn num_parameters(&self) -> usize {
        self.layout.len()
    }

    fn parameters(&self, buf: &mut [f64]) {
        self.layout.gather(self.acrf, buf);
    }

    fn set_parameters(&mut self, buf: &[f64]) {
        self.layout.scatter(self.acrf, buf);
        self.stale = Stale::all();
    }

    fn value(&mut self) -> Result<f64> {
        if self.stale.contains(Stale::VALUE) {
            self.evaluate()?;
        }
        Ok(self.value)
    }

    fn value_gradient(&mut self, buf: &mut [f64]) -> Result<()> {
        if self.stale.contains(Stale::GRADIENT) {
            self.evaluate()?;
        }
        buf.copy_from_slice(&self.gradient);
        Ok(())
    }
}
