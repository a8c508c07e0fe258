use std::collections::BTreeSet;
use std::fmt;

use crate::dataset::Instance;
use crate::error::{CrfError, Result};
use crate::factor::Factor;
use crate::graph::{CliqueSink, UnrolledGraph, UnrolledVarSet};
use crate::sparse::SparseVector;
use crate::variable::Assignment;

/// Handle from a clique back to the template that generated it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateRef {
    /// Index into the model's trainable templates
    Trainable(usize),
    /// Index into the model's fixed templates
    Fixed(usize),
}

/// How weight storage is sized against the training data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WeightAllocation {
    /// Every input feature for every assignment
    #[default]
    Dense,
    /// Only the features observed with each gold assignment
    SupportedOnly,
}

/// Tied weights of one template.
///
/// `weights[a]` holds the per-feature weights of joint assignment `a`,
/// `default_weights[a]` its bias. The number of assignments is fixed by the
/// first allocation.
#[derive(Debug, Clone, Default)]
pub struct TemplateWeights {
    weights: Vec<SparseVector>,
    default_weights: Vec<f64>,
}

impl TemplateWeights {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_allocated(&self) -> bool {
        !self.weights.is_empty()
    }

    /// Number of joint assignments the weights cover
    pub fn num_assignments(&self) -> usize {
        self.weights.len()
    }

    pub fn weights(&self) -> &[SparseVector] {
        &self.weights
    }

    pub fn weights_mut(&mut self) -> &mut [SparseVector] {
        &mut self.weights
    }

    pub fn default_weights(&self) -> &[f64] {
        &self.default_weights
    }

    pub fn default_weights_mut(&mut self) -> &mut [f64] {
        &mut self.default_weights
    }

    /// Default weights plus every stored per-feature weight
    pub fn num_parameters(&self) -> usize {
        self.default_weights.len()
            + self
                .weights
                .iter()
                .map(SparseVector::num_locations)
                .sum::<usize>()
    }

    /// Replace the weight array.
    ///
    /// Fails if an array is already allocated with a different number of
    /// assignments.
    pub fn set_weights(&mut self, template: &str, weights: Vec<SparseVector>) -> Result<()> {
        if self.is_allocated() && weights.len() != self.weights.len() {
            return Err(CrfError::WeightsLengthChanged {
                template: template.to_string(),
                was: self.weights.len(),
                now: weights.len(),
            });
        }
        if self.default_weights.len() != weights.len() {
            self.default_weights = vec![0.0; weights.len()];
        }
        self.weights = weights;
        Ok(())
    }

    /// Allocate storage from a sizing pass, keeping the values already set.
    ///
    /// Returns the number of parameters after allocation.
    pub fn allocate(
        &mut self,
        template: &str,
        sizing: &WeightSizing,
        allocation: WeightAllocation,
        num_features: usize,
    ) -> Result<usize> {
        let n = sizing.num_assignments();
        let weights = (0..n)
            .map(|a| {
                let old = self.weights.get(a);
                match allocation {
                    WeightAllocation::Dense => dense_preserving(old, num_features),
                    WeightAllocation::SupportedOnly => {
                        supported_preserving(old, sizing.support(a))
                    }
                }
            })
            .collect();
        self.set_weights(template, weights)?;
        Ok(self.num_parameters())
    }

    /// Potential of `clique`: per assignment, weight dot features plus bias
    pub fn compute_factor(&self, template: &str, clique: &UnrolledVarSet) -> Result<Factor> {
        let n = clique.num_assignments();
        if n > self.weights.len() {
            return Err(CrfError::AssignmentOutOfRange {
                template: template.to_string(),
                clique: clique.id(),
                index: self.weights.len(),
                num_weights: self.weights.len(),
            });
        }
        let features = clique.features();
        let values = (0..n)
            .map(|a| self.weights[a].dot(features) + self.default_weights[a])
            .collect();
        Factor::from_log_values(clique.vars().clone(), values)
    }
}

fn dense_preserving(old: Option<&SparseVector>, num_features: usize) -> SparseVector {
    let mut dense = SparseVector::dense(num_features);
    if let Some(old) = old {
        for (idx, value) in old.iter() {
            if let Some(loc) = dense.location(idx) {
                dense.values_mut()[loc] = value;
            }
        }
    }
    dense
}

fn supported_preserving(old: Option<&SparseVector>, support: &BTreeSet<u32>) -> SparseVector {
    match old {
        // already a superset of any support
        Some(old) if old.is_dense() => old.clone(),
        Some(old) => {
            let mut indices: Vec<u32> = support.iter().copied().collect();
            indices.extend(old.iter().map(|(idx, _)| idx));
            let mut merged = SparseVector::with_support(indices);
            for (idx, value) in old.iter() {
                if let Some(loc) = merged.location(idx) {
                    merged.values_mut()[loc] = value;
                }
            }
            merged
        }
        None => SparseVector::with_support(support.iter().copied().collect()),
    }
}

/// Clique shapes observed for one template across a training set
#[derive(Debug, Clone, Default)]
pub struct WeightSizing {
    /// Features seen with each gold assignment
    supports: Vec<BTreeSet<u32>>,
    /// Largest input feature index seen, plus one
    num_features: usize,
}

impl WeightSizing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty supports for `num_assignments` assignments
    pub fn with_assignments(num_assignments: usize) -> Self {
        Self {
            supports: vec![BTreeSet::new(); num_assignments],
            num_features: 0,
        }
    }

    /// Record one clique under the gold assignment of its graph
    pub fn observe(&mut self, clique: &UnrolledVarSet, gold: &Assignment) {
        let n = clique.num_assignments();
        if self.supports.len() < n {
            self.supports.resize_with(n, BTreeSet::new);
        }
        let assn = clique.assignment_index_of(gold);
        for (idx, _) in clique.features().iter() {
            self.supports[assn].insert(idx);
            self.num_features = self.num_features.max(idx as usize + 1);
        }
    }

    /// Extend the support of `assignment` with the features of `clique`
    pub fn observe_assignment(&mut self, clique: &UnrolledVarSet, assignment: usize) {
        if self.supports.len() <= assignment {
            self.supports.resize_with(assignment + 1, BTreeSet::new);
        }
        for (idx, _) in clique.features().iter() {
            self.supports[assignment].insert(idx);
        }
    }

    /// Largest clique cardinality seen
    pub fn num_assignments(&self) -> usize {
        self.supports.len()
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn support(&self, assignment: usize) -> &BTreeSet<u32> {
        &self.supports[assignment]
    }
}

/// A rule generating structurally identical cliques with tied weights.
pub trait Template: fmt::Debug + Send + Sync {
    /// Name used in diagnostics and model files
    fn name(&self) -> &str;

    /// Register one clique per matching site of `instance`
    fn add_instantiated_cliques(&self, instance: &Instance, sink: &mut CliqueSink<'_>);

    fn weights(&self) -> &TemplateWeights;

    fn weights_mut(&mut self) -> &mut TemplateWeights;

    /// Frozen templates still supply potentials but expose no parameters
    fn is_trainable(&self) -> bool {
        true
    }

    /// Allocate weight storage from a sizing pass over the training data
    fn init_weights(
        &mut self,
        sizing: &WeightSizing,
        allocation: WeightAllocation,
        num_features: usize,
    ) -> Result<usize> {
        let name = self.name().to_string();
        self.weights_mut()
            .allocate(&name, sizing, allocation, num_features)
    }

    /// Log-space potential of `clique` under the current weights
    fn compute_factor(&self, clique: &UnrolledVarSet) -> Result<Factor> {
        self.weights().compute_factor(self.name(), clique)
    }

    /// Post-hoc transform of a freshly computed potential
    fn modify_potential(&self, _graph: &UnrolledGraph, _clique: &UnrolledVarSet, _factor: &mut Factor) {}
}

/// A template without parameters that always contributes a precomputed
/// potential.
pub trait FixedTemplate: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn add_instantiated_cliques(&self, instance: &Instance, sink: &mut CliqueSink<'_>);

    fn compute_factor(&self, clique: &UnrolledVarSet) -> Result<Factor>;
}

/// Clique shapes over label sequences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// One variable per position of `slice`
    Unigram { slice: usize },
    /// Adjacent positions of `slice`, with the features of the earlier one
    Bigram { slice: usize },
    /// Co-temporal variables of two slices
    Pairwise { first: usize, second: usize },
}

impl Shape {
    pub fn instantiate(&self, instance: &Instance, sink: &mut CliqueSink<'_>) {
        let len = instance.len();
        match *self {
            Shape::Unigram { slice } => {
                for t in 0..len {
                    if let Some(v) = sink.var(t, slice) {
                        sink.add_clique(&[v], instance.feature_vector(t).clone());
                    }
                }
            }
            Shape::Bigram { slice } => {
                for t in 0..len.saturating_sub(1) {
                    if let (Some(v1), Some(v2)) = (sink.var(t, slice), sink.var(t + 1, slice)) {
                        sink.add_clique(&[v1, v2], instance.feature_vector(t).clone());
                    }
                }
            }
            Shape::Pairwise { first, second } => {
                for t in 0..len {
                    if let (Some(v1), Some(v2)) = (sink.var(t, first), sink.var(t, second)) {
                        sink.add_clique(&[v1, v2], instance.feature_vector(t).clone());
                    }
                }
            }
        }
    }

    fn describe(&self) -> String {
        match *self {
            Shape::Unigram { slice } => format!("unigram({})", slice),
            Shape::Bigram { slice } => format!("bigram({})", slice),
            Shape::Pairwise { first, second } => format!("pairwise({},{})", first, second),
        }
    }
}

/// Trainable template over one of the sequence [`Shape`]s
#[derive(Debug, Clone)]
pub struct SequenceTemplate {
    name: String,
    shape: Shape,
    weights: TemplateWeights,
    trainable: bool,
}

impl SequenceTemplate {
    pub fn new(shape: Shape) -> Self {
        Self {
            name: shape.describe(),
            shape,
            weights: TemplateWeights::new(),
            trainable: true,
        }
    }

    pub fn unigram(slice: usize) -> Self {
        Self::new(Shape::Unigram { slice })
    }

    pub fn bigram(slice: usize) -> Self {
        Self::new(Shape::Bigram { slice })
    }

    pub fn pairwise(first: usize, second: usize) -> Self {
        Self::new(Shape::Pairwise { first, second })
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Freeze or unfreeze the weights
    pub fn set_trainable(&mut self, trainable: bool) {
        self.trainable = trainable;
    }
}

impl Template for SequenceTemplate {
    fn name(&self) -> &str {
        &self.name
    }

    fn add_instantiated_cliques(&self, instance: &Instance, sink: &mut CliqueSink<'_>) {
        self.shape.instantiate(instance, sink);
    }

    fn weights(&self) -> &TemplateWeights {
        &self.weights
    }

    fn weights_mut(&mut self) -> &mut TemplateWeights {
        &mut self.weights
    }

    fn is_trainable(&self) -> bool {
        self.trainable
    }
}

/// Fixed template applying one log table to every clique of a shape.
///
/// `-inf` entries make the corresponding joint outcomes impossible.
#[derive(Debug, Clone)]
pub struct ConstantTemplate {
    name: String,
    shape: Shape,
    log_values: Vec<f64>,
}

impl ConstantTemplate {
    pub fn new(shape: Shape, log_values: Vec<f64>) -> Self {
        Self {
            name: format!("constant-{}", shape.describe()),
            shape,
            log_values,
        }
    }
}

impl FixedTemplate for ConstantTemplate {
    fn name(&self) -> &str {
        &self.name
    }

    fn add_instantiated_cliques(&self, instance: &Instance, sink: &mut CliqueSink<'_>) {
        self.shape.instantiate(instance, sink);
    }

    fn compute_factor(&self, clique: &UnrolledVarSet) -> Result<Factor> {
        let n = clique.num_assignments();
        if n != self.log_values.len() {
            return Err(CrfError::AssignmentOutOfRange {
                template: self.name.clone(),
                clique: clique.id(),
                index: self.log_values.len().min(n),
                num_weights: self.log_values.len(),
            });
        }
        Factor::from_log_values(clique.vars().clone(), self.log_values.clone())
    }
}
