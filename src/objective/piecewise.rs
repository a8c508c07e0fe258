use crate::error::Result;
use crate::graph::UnrolledGraph;
use crate::inference::Inferencer;

use super::{Estimator, Statistics};

/// Piecewise likelihood: every factor is normalized on its own.
///
/// Needs no inference, each factor's expectations come from its own
/// normalized potential.
#[derive(Debug, Clone, Copy, Default)]
pub struct Piecewise;

impl Estimator for Piecewise {
    fn name(&self) -> &'static str {
        "piecewise"
    }

    fn compute_expectations_and_value(
        &self,
        graph: &UnrolledGraph,
        _inferencer: &dyn Inferencer,
        stats: &mut Statistics<'_>,
    ) -> Result<f64> {
        let gold = graph.gold();
        let mut value = 0.0;
        for slot in graph.slots() {
            let factor = slot.factor();
            let log_z = factor.log_sum();
            if log_z == f64::NEG_INFINITY {
                return Ok(f64::NEG_INFINITY);
            }
            value += factor.log_value_of(gold) - log_z;

            for (a, &lv) in factor.log_values().iter().enumerate() {
                let p = (lv - log_z).exp();
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
