use std::collections::HashMap;

use log::{debug, info};

use crate::error::Result;
use crate::factor::Factor;
use crate::graph::{FactorId, UnrolledGraph};
use crate::inference::Inferencer;
use crate::variable::{VarId, VarSet};

use super::pseudo::{conditional_constraints, conditional_term};
use super::{Estimator, Objective, Statistics};

/// A variable the model gets wrong while the rest of its factor is right
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrongWrong {
    pub factor: FactorId,
    pub var: VarId,
    /// The wrong value the model prefers
    pub value: usize,
}

/// Piecewise pseudolikelihood.
///
/// Every variable of every factor is conditioned on its factor-mates using
/// that factor alone. Harvested [`WrongWrong`]s add the conditional of the
/// factor-mates given the wrong value.
#[derive(Debug, Clone, Default)]
pub struct Pwpl {
    /// Records per instance name
    wrong_wrongs: HashMap<String, Vec<WrongWrong>>,
}

impl Pwpl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wrong_wrongs(&self, instance: &str) -> &[WrongWrong] {
        self.wrong_wrongs
            .get(instance)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn num_wrong_wrongs(&self) -> usize {
        self.wrong_wrongs.values().map(Vec::len).sum()
    }

    pub fn clear_wrong_wrongs(&mut self) {
        self.wrong_wrongs.clear();
    }

    fn records<'g>(&'g self, graph: &UnrolledGraph) -> impl Iterator<Item = &'g WrongWrong> + 'g {
        let num_factors = graph.num_factors();
        self.wrong_wrongs(graph.name())
            .iter()
            .filter(move |ww| ww.factor < num_factors)
    }
}

impl Estimator for Pwpl {
    fn name(&self) -> &'static str {
        "piecewise-pseudolikelihood"
    }

    fn collect_constraints(&self, graph: &UnrolledGraph, stats: &mut Statistics<'_>) -> Result<()> {
        let gold = graph.gold();
        for (f, slot) in graph.slots().iter().enumerate() {
            for _ in slot.vars().vars() {
                conditional_constraints(graph, &[f], gold, stats);
            }
        }
        for ww in self.records(graph) {
            let mut context = gold.clone();
            context.set(ww.var, ww.value);
            conditional_constraints(graph, &[ww.factor], &context, stats);
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
        for (f, slot) in graph.slots().iter().enumerate() {
            let vars = slot.vars();
            for (&v, &card) in vars.vars().iter().zip(vars.cardinalities()) {
                let target = VarSet::from_pairs(vec![(v, card)]);
                value += conditional_term(graph, &target, &[f], &mut context, stats);
            }
        }

        for ww in self.records(graph) {
            let gold_value = context.get(ww.var);
            let vars = graph.slot(ww.factor).vars();
            let others = vars.difference(&VarSet::from_pairs(vec![(ww.var, 0)]));
            context.set(ww.var, ww.value);
            value += conditional_term(graph, &others, &[ww.factor], &mut context, stats);
            context.set(ww.var, gold_value);
        }
        Ok(value)
    }
}

/// Records of `graph` whose marginal for a wrong value exceeds `threshold`
/// while every other variable of the factor decodes to gold
fn find_wrong_wrongs(
    graph: &UnrolledGraph,
    inferencer: &dyn Inferencer,
    threshold: f64,
) -> Result<Vec<WrongWrong>> {
    let marginals = inferencer.compute_marginals(graph)?;
    let var_marginals: Vec<Factor> = (0..graph.num_variables())
        .map(|v| marginals.lookup_variable(v))
        .collect();
    let gold = graph.gold();

    let mut found = Vec::new();
    for (f, slot) in graph.slots().iter().enumerate() {
        let vars = slot.vars();
        if vars.len() < 2 {
            continue;
        }
        for (&v, &card) in vars.vars().iter().zip(vars.cardinalities()) {
            let others_right = vars
                .vars()
                .iter()
                .filter(|&&u| u != v)
                .all(|&u| var_marginals[u].argmax() == gold.get(u));
            if !others_right {
                continue;
            }
            for value in (0..card).filter(|&x| x != gold.get(v)) {
                if var_marginals[v].log_value(value).exp() > threshold {
                    found.push(WrongWrong {
                        factor: f,
                        var: v,
                        value,
                    });
                }
            }
        }
    }
    Ok(found)
}

impl<'a> Objective<'a, Pwpl> {
    /// Record the wrong-wrongs of the current model and rebuild the
    /// constraints for the augmented objective.
    ///
    /// Replaces any earlier records; returns how many were found.
    pub fn harvest_wrong_wrongs(&mut self, threshold: f64) -> Result<usize> {
        let mut harvested = HashMap::new();
        let mut total = 0;
        for (i, instance) in self.instances.iter().enumerate() {
            if self.infinite.contains(&i) {
                continue;
            }
            let graph = self.acrf.prepare(instance, self.cache.take(instance.name()))?;
            let records = if graph.num_variables() > 0 {
                find_wrong_wrongs(&graph, self.acrf.inferencer(), threshold)?
            } else {
                Vec::new()
            };
            self.cache.insert(graph);
            if !records.is_empty() {
                debug!("{}: {} wrong-wrongs", instance.name(), records.len());
                total += records.len();
                harvested.insert(instance.name().to_string(), records);
            }
        }
        info!("harvested {} wrong-wrongs at threshold {}", total, threshold);
        self.estimator.wrong_wrongs = harvested;
        self.rebuild_constraints()?;
        Ok(total)
    }
}
