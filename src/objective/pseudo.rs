use crate::error::{CrfError, Result};
use crate::factor::logsumexp;
use crate::graph::{FactorId, UnrolledGraph};
use crate::inference::Inferencer;
use crate::variable::{Assignment, VarId, VarSet};

use super::{Estimator, Statistics};

/// Which local conditionals make up the pseudolikelihood
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PseudolikelihoodMode {
    /// One conditional per variable given all its neighbours
    #[default]
    ByVariable,
    /// One joint conditional per pairwise factor; variables outside every
    /// pairwise factor get a per-variable term.
    ByEdge,
}

/// Pseudolikelihood over the unrolled graph
#[derive(Debug, Clone, Copy, Default)]
pub struct Pseudolikelihood {
    mode: PseudolikelihoodMode,
}

/// Targets of one local conditional and the factors scoring them
struct LocalTerm {
    targets: VarSet,
    factors: Vec<FactorId>,
}

impl Pseudolikelihood {
    pub fn new(mode: PseudolikelihoodMode) -> Self {
        Self { mode }
    }

    pub fn by_variable() -> Self {
        Self::new(PseudolikelihoodMode::ByVariable)
    }

    pub fn by_edge() -> Self {
        Self::new(PseudolikelihoodMode::ByEdge)
    }

    pub fn mode(&self) -> PseudolikelihoodMode {
        self.mode
    }

    fn local_terms(&self, graph: &UnrolledGraph) -> Result<Vec<LocalTerm>> {
        match self.mode {
            PseudolikelihoodMode::ByVariable => Ok((0..graph.num_variables())
                .map(|v| variable_term(graph, v))
                .collect()),
            PseudolikelihoodMode::ByEdge => {
                let mut covered = vec![false; graph.num_variables()];
                let mut terms = Vec::new();
                for slot in graph.slots() {
                    let vars = slot.vars();
                    match vars.len() {
                        0 | 1 => {}
                        2 => {
                            let mut factors: Vec<FactorId> = vars
                                .vars()
                                .iter()
                                .flat_map(|&v| graph.factors_of_var(v).iter().copied())
                                .collect();
                            factors.sort_unstable();
                            factors.dedup();
                            for &v in vars.vars() {
                                covered[v] = true;
                            }
                            terms.push(LocalTerm {
                                targets: vars.clone(),
                                factors,
                            });
                        }
                        n => {
                            return Err(CrfError::UnsupportedConfiguration(format!(
                                "by-edge pseudolikelihood on {}: factor over {:?} has {} variables",
                                graph.name(),
                                vars.vars(),
                                n
                            )))
                        }
                    }
                }
                terms.extend(
                    covered
                        .iter()
                        .enumerate()
                        .filter(|&(_, &c)| !c)
                        .map(|(v, _)| variable_term(graph, v)),
                );
                Ok(terms)
            }
        }
    }
}

fn variable_term(graph: &UnrolledGraph, var: VarId) -> LocalTerm {
    let cardinality = graph.variable(var).cardinality;
    LocalTerm {
        targets: VarSet::from_pairs(vec![(var, cardinality)]),
        factors: graph.factors_of_var(var).to_vec(),
    }
}

/// Log conditional of `targets` at their values in `context`, scored by
/// `factors` with every other variable held at `context`.
///
/// Expected statistics of every clique of `factors` are added to `stats`.
/// `context` is restored before returning.
pub(super) fn conditional_term(
    graph: &UnrolledGraph,
    targets: &VarSet,
    factors: &[FactorId],
    context: &mut Assignment,
    stats: &mut Statistics<'_>,
) -> f64 {
    let observed = targets.index_of_assignment(context);
    let log_values: Vec<f64> = (0..targets.num_assignments())
        .map(|k| {
            targets.write_index(k, context);
            factors
                .iter()
                .map(|&f| graph.slot(f).factor().log_value_of(context))
                .sum()
        })
        .collect();
    let log_z = logsumexp(log_values.iter().copied());
    if log_z == f64::NEG_INFINITY {
        targets.write_index(observed, context);
        return f64::NEG_INFINITY;
    }

    for (k, &lv) in log_values.iter().enumerate() {
        let p = (lv - log_z).exp();
        if p == 0.0 {
            continue;
        }
        targets.write_index(k, context);
        for &f in factors {
            for &c in graph.cliques_of(f) {
                let clique = graph.clique(c);
                stats.add(clique, clique.assignment_index_of(context), p);
            }
        }
    }
    targets.write_index(observed, context);
    log_values[observed] - log_z
}

/// Statistics of every clique of `factors` under `context`
pub(super) fn conditional_constraints(
    graph: &UnrolledGraph,
    factors: &[FactorId],
    context: &Assignment,
    stats: &mut Statistics<'_>,
) {
    for &f in factors {
        for &c in graph.cliques_of(f) {
            let clique = graph.clique(c);
            stats.add(clique, clique.assignment_index_of(context), 1.0);
        }
    }
}

impl Estimator for Pseudolikelihood {
    fn name(&self) -> &'static str {
        match self.mode {
            PseudolikelihoodMode::ByVariable => "pseudolikelihood",
            PseudolikelihoodMode::ByEdge => "pseudolikelihood-by-edge",
        }
    }

    fn collect_constraints(&self, graph: &UnrolledGraph, stats: &mut Statistics<'_>) -> Result<()> {
        for term in self.local_terms(graph)? {
            conditional_constraints(graph, &term.factors, graph.gold(), stats);
        }
        Ok(())
    }

    fn compute_expectations_and_value(
        &self,
        graph: &UnrolledGraph,
        _inferencer: &dyn Inferencer,
        stats: &mut Statistics<'_>,
    ) -> Result<f64> {
        let mut context = graph.gold().clone();
        let mut value = 0.0;
        for term in self.local_terms(graph)? {
            value += conditional_term(graph, &term.targets, &term.factors, &mut context, stats);
            if value == f64::NEG_INFINITY {
                break;
            }
        }
        Ok(value)
    }
}
