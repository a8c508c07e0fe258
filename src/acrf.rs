use log::{debug, info};

use crate::cache::GraphCache;
use crate::dataset::Instance;
use crate::error::Result;
use crate::graph::UnrolledGraph;
use crate::inference::Inferencer;
use crate::template::{FixedTemplate, Template, TemplateRef, WeightAllocation, WeightSizing};
use crate::variable::Assignment;

/// An arbitrary-structure CRF: templates plus the inferencer used to query
/// the unrolled graphs.
#[derive(Debug)]
pub struct Acrf {
    templates: Vec<Box<dyn Template>>,
    fixed: Vec<Box<dyn FixedTemplate>>,
    inferencer: Box<dyn Inferencer>,
    allocation: WeightAllocation,
    /// Input feature dimensionality used by dense allocation
    num_features: usize,
}

impl Acrf {
    pub fn new(
        templates: Vec<Box<dyn Template>>,
        fixed: Vec<Box<dyn FixedTemplate>>,
        inferencer: Box<dyn Inferencer>,
    ) -> Self {
        Self {
            templates,
            fixed,
            inferencer,
            allocation: WeightAllocation::default(),
            num_features: 0,
        }
    }

    pub fn with_allocation(mut self, allocation: WeightAllocation) -> Self {
        self.allocation = allocation;
        self
    }

    pub fn allocation(&self) -> WeightAllocation {
        self.allocation
    }

    pub fn templates(&self) -> &[Box<dyn Template>] {
        &self.templates
    }

    pub fn templates_mut(&mut self) -> &mut [Box<dyn Template>] {
        &mut self.templates
    }

    pub fn fixed_templates(&self) -> &[Box<dyn FixedTemplate>] {
        &self.fixed
    }

    pub fn inferencer(&self) -> &dyn Inferencer {
        self.inferencer.as_ref()
    }

    pub fn set_inferencer(&mut self, inferencer: Box<dyn Inferencer>) {
        self.inferencer = inferencer;
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// Fix the input feature dimensionality, e.g. to a dictionary size
    pub fn set_num_features(&mut self, num_features: usize) {
        self.num_features = num_features;
    }

    /// Parameters exposed by the trainable templates
    pub fn num_parameters(&self) -> usize {
        self.templates
            .iter()
            .filter(|t| t.is_trainable())
            .map(|t| t.weights().num_parameters())
            .sum()
    }

    /// Size every template's weights against `training`.
    ///
    /// Returns the number of trainable parameters.
    pub fn init_weights(&mut self, training: &[Instance]) -> Result<usize> {
        let observed = training
            .iter()
            .flat_map(|inst| (0..inst.len()).map(move |t| inst.feature_vector(t)))
            .flat_map(|fv| fv.iter().map(|(idx, _)| idx as usize + 1))
            .max()
            .unwrap_or(0);
        self.num_features = self.num_features.max(observed);

        let mut total = 0;
        for (i, template) in self.templates.iter_mut().enumerate() {
            let mut sizing = WeightSizing::new();
            for inst in training {
                let graph = UnrolledGraph::structure_for(inst, template.as_ref(), i)?;
                for clique in graph.cliques() {
                    sizing.observe(clique, graph.gold());
                }
            }
            let n = template.init_weights(&sizing, self.allocation, self.num_features)?;
            info!(
                "template {}: {} assignments, {} parameters",
                template.name(),
                sizing.num_assignments(),
                n
            );
            if template.is_trainable() {
                total += n;
            }
        }
        Ok(total)
    }

    /// Extend supported weights by features of cliques whose current
    /// marginal puts more than `threshold` on a non-gold assignment.
    ///
    /// Returns the number of parameters added. Dense models are unchanged.
    pub fn add_some_unsupported_weights(
        &mut self,
        training: &[Instance],
        threshold: f64,
    ) -> Result<usize> {
        if self.allocation == WeightAllocation::Dense {
            return Ok(0);
        }
        let mut sizings: Vec<WeightSizing> = self
            .templates
            .iter()
            .map(|t| WeightSizing::with_assignments(t.weights().num_assignments()))
            .collect();

        for inst in training {
            let graph = self.unroll(inst)?;
            if graph.num_variables() == 0 {
                continue;
            }
            let marginals = self.inferencer.compute_marginals(&graph)?;
            for clique in graph.cliques() {
                let i = match clique.template() {
                    TemplateRef::Trainable(i) => i,
                    TemplateRef::Fixed(_) => continue,
                };
                let marginal = marginals.lookup_marginal(clique.vars());
                let gold = clique.assignment_index_of(graph.gold());
                for a in 0..clique.num_assignments() {
                    if a != gold && marginal.log_value(a).exp() > threshold {
                        sizings[i].observe_assignment(clique, a);
                    }
                }
            }
        }

        let before = self.num_parameters();
        for (template, sizing) in self.templates.iter_mut().zip(&sizings) {
            template.init_weights(sizing, WeightAllocation::SupportedOnly, self.num_features)?;
        }
        let added = self.num_parameters() - before;
        info!("added {} unsupported weights (threshold {})", added, threshold);
        Ok(added)
    }

    /// Unroll `instance` with potentials under the current weights
    pub fn unroll(&self, instance: &Instance) -> Result<UnrolledGraph> {
        UnrolledGraph::new(instance, &self.templates, &self.fixed, true)
    }

    /// Refresh a cached graph, or unroll a fresh one
    pub fn prepare(&self, instance: &Instance, cached: Option<UnrolledGraph>) -> Result<UnrolledGraph> {
        match cached {
            Some(mut graph) => {
                graph.recompute_factors(&self.templates, &self.fixed)?;
                Ok(graph)
            }
            None => self.unroll(instance),
        }
    }

    pub fn best_assignment(&self, instance: &Instance) -> Result<Assignment> {
        let graph = self.unroll(instance)?;
        self.inferencer.best_assignment(&graph)
    }

    /// MAP labels `[time][slice]`
    pub fn best_labels(&self, instance: &Instance) -> Result<Vec<Vec<u32>>> {
        let graph = self.unroll(instance)?;
        self.labels_of(&graph)
    }

    fn labels_of(&self, graph: &UnrolledGraph) -> Result<Vec<Vec<u32>>> {
        let assignment = self.inferencer.best_assignment(graph)?;
        let num_slices = graph.num_slices().max(1);
        Ok(assignment
            .values()
            .chunks(num_slices)
            .map(|row| row.iter().map(|&v| v as u32).collect())
            .collect())
    }

    /// Decode every instance, reusing graphs from `cache` when enabled
    pub fn decode_all(
        &self,
        instances: &[Instance],
        cache: &mut GraphCache,
    ) -> Result<Vec<Vec<Vec<u32>>>> {
        let mut decoded = Vec::with_capacity(instances.len());
        for inst in instances {
            let graph = self.prepare(inst, cache.take(inst.name()))?;
            decoded.push(self.labels_of(&graph)?);
            cache.insert(graph);
        }
        debug!("decoded {} instances", decoded.len());
        Ok(decoded)
    }
}
