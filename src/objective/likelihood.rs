use crate::error::Result;
use crate::graph::UnrolledGraph;
use crate::inference::Inferencer;

use super::{Estimator, Statistics};

/// Exact joint conditional likelihood.
///
/// Expectations come from the inferencer's factor marginals, the value is
/// the log probability of the gold assignment.
#[derive(Debug, Clone, Copy, Default)]
pub struct Likelihood;

impl Estimator for Likelihood {
    fn name(&self) -> &'static str {
        "likelihood"
    }

    fn compute_expectations_and_value(
        &self,
        graph: &UnrolledGraph,
        inferencer: &dyn Inferencer,
        stats: &mut Statistics<'_>,
    ) -> Result<f64> {
        if graph.num_variables() == 0 {
            return Ok(0.0);
        }
        let marginals = inferencer.compute_marginals(graph)?;
        let value = marginals.lookup_log_joint(graph.gold());
        if !value.is_finite() {
            return Ok(value);
        }

        for slot in graph.slots() {
            let marginal = marginals.lookup_marginal(slot.vars());
            for (a, &log_p) in marginal.log_values().iter().enumerate() {
                let p = log_p.exp();
                if p == 0.0 {
                    continue;
                }
                for &c in slot.cliques() {
                    stats.add(graph.clique(c), a, p);
                }
            }
        }
        Ok(value)
    }
}
