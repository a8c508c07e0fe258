use std::fmt;

use crate::error::{CrfError, Result};
use crate::factor::Factor;
use crate::graph::UnrolledGraph;
use crate::variable::{Assignment, VarId, VarSet};

/// Marginal queries answered after one inference pass
pub trait Marginals {
    /// Normalized log marginal over `vars`
    fn lookup_marginal(&self, vars: &VarSet) -> Factor;

    /// Normalized log marginal of a single variable
    fn lookup_variable(&self, var: VarId) -> Factor;

    /// Log probability of a full assignment under the model
    fn lookup_log_joint(&self, assignment: &Assignment) -> f64;
}

/// Marginal and MAP inference over an unrolled graph.
///
/// Implementations must be shareable across the worker threads that
/// evaluate instances in parallel.
pub trait Inferencer: fmt::Debug + Send + Sync {
    fn compute_marginals(&self, graph: &UnrolledGraph) -> Result<Box<dyn Marginals>>;

    /// Most probable joint assignment
    fn best_assignment(&self, graph: &UnrolledGraph) -> Result<Assignment>;
}

/// Exact inference by enumerating every joint assignment.
///
/// Only usable on small graphs; graphs with more joint states than
/// `max_states` are rejected.
#[derive(Debug, Clone)]
pub struct ExhaustiveInferencer {
    max_states: usize,
}

impl Default for ExhaustiveInferencer {
    fn default() -> Self {
        Self {
            max_states: 1 << 20,
        }
    }
}

impl ExhaustiveInferencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_states(max_states: usize) -> Result<Self> {
        if max_states == 0 {
            return Err(CrfError::invalid_parameter(
                "max_states must be positive",
            ));
        }
        Ok(Self { max_states })
    }

    pub fn max_states(&self) -> usize {
        self.max_states
    }

    /// Unnormalized log joint table over all variables of `graph`
    fn joint(&self, graph: &UnrolledGraph) -> Result<Factor> {
        let vars = graph.all_vars();
        let num_states = vars
            .cardinalities()
            .iter()
            .try_fold(1usize, |acc, &card| acc.checked_mul(card))
            .filter(|&n| n <= self.max_states)
            .ok_or_else(|| {
                CrfError::Inference(format!(
                    "graph {} has more than {} joint states",
                    graph.name(),
                    self.max_states
                ))
            })?;

        let mut assignment = Assignment::zeros(graph.num_variables());
        let mut log_values = Vec::with_capacity(num_states);
        for i in 0..num_states {
            vars.write_index(i, &mut assignment);
            log_values.push(graph.log_score(&assignment));
        }
        Factor::from_log_values(vars, log_values)
    }
}

#[derive(Debug)]
struct ExactMarginals {
    /// Normalized when `log_z` is finite
    joint: Factor,
    log_z: f64,
}

impl Marginals for ExactMarginals {
    fn lookup_marginal(&self, vars: &VarSet) -> Factor {
        self.joint.marginalize(vars)
    }

    fn lookup_variable(&self, var: VarId) -> Factor {
        let all = self.joint.vars();
        let card = all
            .position(var)
            .map_or(1, |pos| all.cardinalities()[pos]);
        self.joint.marginalize(&VarSet::from_pairs(vec![(var, card)]))
    }

    fn lookup_log_joint(&self, assignment: &Assignment) -> f64 {
        if self.log_z.is_nan() {
            return f64::NAN;
        }
        let score = self.joint.log_value_of(assignment);
        if self.log_z.is_finite() {
            score
        } else if self.log_z == f64::INFINITY && score == f64::INFINITY {
            // only infinite assignments carry mass
            score
        } else {
            f64::NEG_INFINITY
        }
    }
}

impl Inferencer for ExhaustiveInferencer {
    fn compute_marginals(&self, graph: &UnrolledGraph) -> Result<Box<dyn Marginals>> {
        let mut joint = self.joint(graph)?;
        let log_z = joint.log_sum();
        if log_z.is_finite() {
            joint.normalize();
        }
        Ok(Box::new(ExactMarginals { joint, log_z }))
    }

    fn best_assignment(&self, graph: &UnrolledGraph) -> Result<Assignment> {
        let joint = self.joint(graph)?;
        let mut assignment = Assignment::zeros(graph.num_variables());
        joint.vars().write_index(joint.argmax(), &mut assignment);
        Ok(assignment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Instance;
    use crate::sparse::SparseVector;
    use crate::template::{ConstantTemplate, FixedTemplate, Shape};

    fn graph(fixed: Vec<Box<dyn FixedTemplate>>) -> UnrolledGraph {
        let instance =
            Instance::sequence("two", vec![SparseVector::new(); 2], &[0, 1], 2).unwrap();
        UnrolledGraph::new(&instance, &[], &fixed, true).unwrap()
    }

    #[test]
    fn test_marginals_of_two_variable_chain() {
        // p(a, b) proportional to [[1, 2], [3, 4]]
        let table = [1.0_f64, 2.0, 3.0, 4.0].iter().map(|v| v.ln()).collect();
        let g = graph(vec![Box::new(ConstantTemplate::new(
            Shape::Bigram { slice: 0 },
            table,
        ))]);
        let marginals = ExhaustiveInferencer::new().compute_marginals(&g).unwrap();

        let a = marginals.lookup_variable(0);
        assert!((a.log_value(1) - 0.7_f64.ln()).abs() < 1e-12);
        let b = marginals.lookup_variable(1);
        assert!((b.log_value(1) - 0.6_f64.ln()).abs() < 1e-12);
        let joint = marginals.lookup_log_joint(g.gold());
        assert!((joint - 0.2_f64.ln()).abs() < 1e-12);

        let best = ExhaustiveInferencer::new().best_assignment(&g).unwrap();
        assert_eq!(best.values(), &[1, 1]);
    }

    #[test]
    fn test_impossible_gold_has_infinite_log_joint() {
        let g = graph(vec![Box::new(ConstantTemplate::new(
            Shape::Bigram { slice: 0 },
            vec![f64::NEG_INFINITY; 4],
        ))]);
        let marginals = ExhaustiveInferencer::new().compute_marginals(&g).unwrap();
        assert_eq!(marginals.lookup_log_joint(g.gold()), f64::NEG_INFINITY);
    }

    #[test]
    fn test_state_limit() {
        let g = graph(vec![]);
        let inferencer = ExhaustiveInferencer::with_max_states(3).unwrap();
        assert!(inferencer.compute_marginals(&g).is_err());
        assert!(ExhaustiveInferencer::with_max_states(0).is_err());
    }
}
