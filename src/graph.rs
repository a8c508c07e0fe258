use std::collections::HashMap;
use std::fmt::Write as _;

use crate::dataset::Instance;
use crate::error::Result;
use crate::factor::Factor;
use crate::sparse::FeatureVector;
use crate::template::{FixedTemplate, Template, TemplateRef};
use crate::variable::{Assignment, VarId, VarSet, Variable};

/// Index of a clique inside its graph
pub type CliqueId = usize;

/// Index of a factor slot inside its graph
pub type FactorId = usize;

/// One instantiation of a template over concrete variables
#[derive(Debug, Clone)]
pub struct UnrolledVarSet {
    id: CliqueId,
    vars: VarSet,
    template: TemplateRef,
    features: FeatureVector,
    /// Own potential, `None` on structure-only graphs
    potential: Option<Factor>,
    /// L-infinity distance between the last two normalized potentials
    residual: f64,
}

impl UnrolledVarSet {
    pub fn id(&self) -> CliqueId {
        self.id
    }

    pub fn vars(&self) -> &VarSet {
        &self.vars
    }

    pub fn template(&self) -> TemplateRef {
        self.template
    }

    pub fn features(&self) -> &FeatureVector {
        &self.features
    }

    pub fn num_assignments(&self) -> usize {
        self.vars.num_assignments()
    }

    /// Row of the template weights used by the clique under `assignment`
    pub fn assignment_index_of(&self, assignment: &Assignment) -> usize {
        self.vars.index_of_assignment(assignment)
    }

    pub fn assignment_from_index(&self, index: usize) -> Assignment {
        self.vars.assignment_from_index(index)
    }

    pub fn potential(&self) -> Option<&Factor> {
        self.potential.as_ref()
    }

    /// `f64::INFINITY` until the potential has been recomputed once
    pub fn residual(&self) -> f64 {
        self.residual
    }
}

/// The single factor registered for one variable domain
#[derive(Debug, Clone)]
pub enum FactorSlot {
    /// Exactly one clique over the domain
    Single { clique: CliqueId, factor: Factor },
    /// Several cliques over the same domain, potentials multiplied together
    Composite { cliques: Vec<CliqueId>, factor: Factor },
}

impl FactorSlot {
    pub fn factor(&self) -> &Factor {
        match self {
            FactorSlot::Single { factor, .. } | FactorSlot::Composite { factor, .. } => factor,
        }
    }

    pub fn vars(&self) -> &VarSet {
        self.factor().vars()
    }

    pub fn cliques(&self) -> &[CliqueId] {
        match self {
            FactorSlot::Single { clique, .. } => std::slice::from_ref(clique),
            FactorSlot::Composite { cliques, .. } => cliques,
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, FactorSlot::Composite { .. })
    }
}

/// Factor graph of one instance.
///
/// Variables are numbered `time * num_slices + slice`. Cliques own their
/// potentials; the factor slots hold the product of the potentials of all
/// cliques over one domain, so no two slots share a [`VarSet`].
#[derive(Debug, Clone)]
pub struct UnrolledGraph {
    name: String,
    num_slices: usize,
    variables: Vec<Variable>,
    cliques: Vec<UnrolledVarSet>,
    slots: Vec<FactorSlot>,
    by_domain: HashMap<VarSet, FactorId>,
    clique_slot: Vec<FactorId>,
    var_slots: Vec<Vec<FactorId>>,
    gold: Assignment,
    has_potentials: bool,
}

/// Registration handle passed to templates while unrolling
#[derive(Debug)]
pub struct CliqueSink<'g> {
    graph: &'g mut UnrolledGraph,
    template: TemplateRef,
}

impl<'g> CliqueSink<'g> {
    /// Variable of `slice` at position `time`, if the graph has one
    pub fn var(&self, time: usize, slice: usize) -> Option<VarId> {
        self.graph.var_at(time, slice)
    }

    pub fn variable(&self, id: VarId) -> &Variable {
        &self.graph.variables[id]
    }

    pub fn num_variables(&self) -> usize {
        self.graph.variables.len()
    }

    /// Register a clique over `vars` carrying `features`
    pub fn add_clique(&mut self, vars: &[VarId], features: FeatureVector) -> CliqueId {
        let vars: Vec<Variable> = vars.iter().map(|&v| self.graph.variables[v]).collect();
        let id = self.graph.cliques.len();
        self.graph.cliques.push(UnrolledVarSet {
            id,
            vars: VarSet::new(&vars),
            template: self.template,
            features,
            potential: None,
            residual: f64::INFINITY,
        });
        id
    }
}

impl UnrolledGraph {
    fn empty(instance: &Instance) -> Self {
        let num_slices = instance.num_slices();
        let mut variables = Vec::with_capacity(instance.len() * num_slices);
        let mut gold = Vec::with_capacity(instance.len() * num_slices);
        for t in 0..instance.len() {
            for (slice, &cardinality) in instance.cardinalities().iter().enumerate() {
                variables.push(Variable {
                    id: variables.len(),
                    cardinality,
                    time: t,
                    slice,
                });
                gold.push(instance.label(t, slice) as usize);
            }
        }
        Self {
            name: instance.name().to_string(),
            num_slices,
            var_slots: vec![Vec::new(); variables.len()],
            variables,
            cliques: Vec::new(),
            slots: Vec::new(),
            by_domain: HashMap::new(),
            clique_slot: Vec::new(),
            gold: Assignment::new(gold),
            has_potentials: false,
        }
    }

    /// Unroll `instance` against the trainable and fixed templates.
    ///
    /// With `setup_potentials` false the slots carry uniform factors and only
    /// the structure is meaningful.
    pub fn new(
        instance: &Instance,
        templates: &[Box<dyn Template>],
        fixed: &[Box<dyn FixedTemplate>],
        setup_potentials: bool,
    ) -> Result<Self> {
        let mut graph = Self::empty(instance);
        for (i, template) in templates.iter().enumerate() {
            template.add_instantiated_cliques(instance, &mut graph.sink(TemplateRef::Trainable(i)));
        }
        for (i, template) in fixed.iter().enumerate() {
            template.add_instantiated_cliques(instance, &mut graph.sink(TemplateRef::Fixed(i)));
        }
        if setup_potentials {
            graph.recompute_factors(templates, fixed)?;
        } else {
            graph.rebuild_slots(|clique| Factor::uniform(clique.vars.clone()));
        }
        Ok(graph)
    }

    /// Structure-only graph holding the cliques of a single template
    pub fn structure_for(instance: &Instance, template: &dyn Template, index: usize) -> Result<Self> {
        let mut graph = Self::empty(instance);
        template.add_instantiated_cliques(instance, &mut graph.sink(TemplateRef::Trainable(index)));
        graph.rebuild_slots(|clique| Factor::uniform(clique.vars.clone()));
        Ok(graph)
    }

    fn sink(&mut self, template: TemplateRef) -> CliqueSink<'_> {
        CliqueSink {
            graph: self,
            template,
        }
    }

    /// Re-derive every clique potential from the current weights, keeping
    /// the structure.
    pub fn recompute_factors(
        &mut self,
        templates: &[Box<dyn Template>],
        fixed: &[Box<dyn FixedTemplate>],
    ) -> Result<()> {
        let mut fresh = Vec::with_capacity(self.cliques.len());
        for clique in &self.cliques {
            let factor = match clique.template {
                TemplateRef::Trainable(i) => {
                    let template = &templates[i];
                    let mut factor = template.compute_factor(clique)?;
                    template.modify_potential(self, clique, &mut factor);
                    factor
                }
                TemplateRef::Fixed(i) => fixed[i].compute_factor(clique)?,
            };
            fresh.push(factor);
        }
        for (clique, factor) in self.cliques.iter_mut().zip(fresh) {
            clique.residual = match &clique.potential {
                Some(old) => old.dist_linf(&factor),
                None => f64::INFINITY,
            };
            clique.potential = Some(factor);
        }
        self.rebuild_slots(|clique| {
            clique
                .potential
                .clone()
                .unwrap_or_else(|| Factor::uniform(clique.vars.clone()))
        });
        self.has_potentials = true;
        Ok(())
    }

    fn rebuild_slots<F: Fn(&UnrolledVarSet) -> Factor>(&mut self, factor_for: F) {
        self.slots.clear();
        self.by_domain.clear();
        self.clique_slot.clear();
        for slots in &mut self.var_slots {
            slots.clear();
        }
        for i in 0..self.cliques.len() {
            let factor = factor_for(&self.cliques[i]);
            self.add_factor_internal(i, factor);
        }
    }

    /// Register the potential of `clique`, composing it with any factor
    /// already present over the same domain.
    fn add_factor_internal(&mut self, clique: CliqueId, factor: Factor) -> FactorId {
        let id = match self.by_domain.get(factor.vars()) {
            Some(&id) => {
                let slot = std::mem::replace(
                    &mut self.slots[id],
                    FactorSlot::Single {
                        clique,
                        factor: Factor::uniform(VarSet::default()),
                    },
                );
                self.slots[id] = match slot {
                    FactorSlot::Single {
                        clique: first,
                        factor: mut composed,
                    } => {
                        composed.multiply_by(&factor);
                        FactorSlot::Composite {
                            cliques: vec![first, clique],
                            factor: composed,
                        }
                    }
                    FactorSlot::Composite {
                        mut cliques,
                        factor: mut composed,
                    } => {
                        cliques.push(clique);
                        composed.multiply_by(&factor);
                        FactorSlot::Composite {
                            cliques,
                            factor: composed,
                        }
                    }
                };
                id
            }
            None => {
                let id = self.slots.len();
                for &v in factor.vars().vars() {
                    self.var_slots[v].push(id);
                }
                self.by_domain.insert(factor.vars().clone(), id);
                self.slots.push(FactorSlot::Single { clique, factor });
                id
            }
        };
        self.clique_slot.push(id);
        id
    }

    /// Name of the instance the graph was unrolled from
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn num_slices(&self) -> usize {
        self.num_slices
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn variable(&self, id: VarId) -> &Variable {
        &self.variables[id]
    }

    pub fn var_at(&self, time: usize, slice: usize) -> Option<VarId> {
        if slice >= self.num_slices {
            return None;
        }
        let id = time * self.num_slices + slice;
        if id < self.variables.len() {
            Some(id)
        } else {
            None
        }
    }

    /// Every variable of the graph as one set
    pub fn all_vars(&self) -> VarSet {
        VarSet::new(&self.variables)
    }

    pub fn gold(&self) -> &Assignment {
        &self.gold
    }

    pub fn has_potentials(&self) -> bool {
        self.has_potentials
    }

    pub fn cliques(&self) -> &[UnrolledVarSet] {
        &self.cliques
    }

    pub fn clique(&self, id: CliqueId) -> &UnrolledVarSet {
        &self.cliques[id]
    }

    pub fn slots(&self) -> &[FactorSlot] {
        &self.slots
    }

    pub fn slot(&self, id: FactorId) -> &FactorSlot {
        &self.slots[id]
    }

    pub fn num_factors(&self) -> usize {
        self.slots.len()
    }

    /// Slot holding the potential of `clique`
    pub fn factor_of(&self, clique: CliqueId) -> FactorId {
        self.clique_slot[clique]
    }

    /// Cliques whose potentials make up `factor`
    pub fn cliques_of(&self, factor: FactorId) -> &[CliqueId] {
        self.slots[factor].cliques()
    }

    /// Slots whose domain contains `var`
    pub fn factors_of_var(&self, var: VarId) -> &[FactorId] {
        &self.var_slots[var]
    }

    pub fn factor_for_domain(&self, vars: &VarSet) -> Option<FactorId> {
        self.by_domain.get(vars).copied()
    }

    /// Unnormalized log score of a full assignment
    pub fn log_score(&self, assignment: &Assignment) -> f64 {
        self.slots
            .iter()
            .map(|slot| slot.factor().log_value_of(assignment))
            .sum()
    }

    pub fn max_residual(&self) -> f64 {
        self.cliques
            .iter()
            .map(|c| c.residual)
            .fold(0.0, f64::max)
    }

    /// Per-clique potential listing for diagnostics
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "graph {}: {} variables, {} cliques, {} factors, gold {:?}",
            self.name,
            self.variables.len(),
            self.cliques.len(),
            self.slots.len(),
            self.gold.values()
        );
        for clique in &self.cliques {
            let _ = writeln!(
                out,
                "  clique {} {:?} over {:?} (factor {}, residual {:.6})",
                clique.id,
                clique.template,
                clique.vars.vars(),
                self.clique_slot.get(clique.id).copied().unwrap_or(usize::MAX),
                clique.residual
            );
            if let Some(potential) = &clique.potential {
                out.push_str(&potential.dump());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparse::SparseVector;
    use crate::template::{ConstantTemplate, SequenceTemplate, Shape};

    fn instance() -> Instance {
        let features = (0..3)
            .map(|t| SparseVector::from_indices(&[t as u32]))
            .collect();
        Instance::sequence("g", features, &[0, 1, 0], 2).unwrap()
    }

    #[test]
    fn test_variables_and_gold() {
        let graph = UnrolledGraph::new(&instance(), &[], &[], false).unwrap();
        assert_eq!(graph.num_variables(), 3);
        assert_eq!(graph.var_at(2, 0), Some(2));
        assert_eq!(graph.var_at(3, 0), None);
        assert_eq!(graph.gold().values(), &[0, 1, 0]);
    }

    #[test]
    fn test_duplicate_domains_are_composed() {
        let templates: Vec<Box<dyn Template>> = vec![Box::new(SequenceTemplate::bigram(0))];
        let fixed: Vec<Box<dyn FixedTemplate>> = vec![Box::new(ConstantTemplate::new(
            Shape::Bigram { slice: 0 },
            vec![0.0, f64::NEG_INFINITY, 0.0, 0.0],
        ))];
        let graph = UnrolledGraph::new(&instance(), &templates, &fixed, false).unwrap();
        assert_eq!(graph.cliques().len(), 4);
        assert_eq!(graph.num_factors(), 2);
        for slot in graph.slots() {
            assert!(slot.is_composite());
            assert_eq!(slot.cliques().len(), 2);
        }
        // the fixed clique over (0, 1) shares the slot of the trainable one
        assert_eq!(graph.factor_of(0), graph.factor_of(2));
        assert_eq!(graph.cliques_of(graph.factor_of(3)), &[1, 3]);
        assert_eq!(graph.factors_of_var(1).len(), 2);
    }

    #[test]
    fn test_recompute_stores_residuals() {
        let fixed: Vec<Box<dyn FixedTemplate>> = vec![Box::new(ConstantTemplate::new(
            Shape::Unigram { slice: 0 },
            vec![0.0, 1.0],
        ))];
        let mut graph = UnrolledGraph::new(&instance(), &[], &fixed, true).unwrap();
        assert!(graph.has_potentials());
        assert_eq!(graph.max_residual(), f64::INFINITY);
        graph.recompute_factors(&[], &fixed).unwrap();
        assert_eq!(graph.max_residual(), 0.0);
        let slot = graph.slot(graph.factor_of(1));
        assert_eq!(slot.factor().log_value(1), 1.0);
        assert!(graph.dump().contains("clique 2"));
    }

    #[test]
    fn test_clique_assignment_round_trip() {
        let templates: Vec<Box<dyn Template>> = vec![
            Box::new(SequenceTemplate::unigram(0)),
            Box::new(SequenceTemplate::bigram(0)),
        ];
        let graph = UnrolledGraph::new(&instance(), &templates, &[], false).unwrap();
        for clique in graph.cliques() {
            for i in 0..clique.num_assignments() {
                let assignment = clique.assignment_from_index(i);
                assert_eq!(clique.assignment_index_of(&assignment), i);
            }
        }
    }

    #[test]
    fn test_empty_instance_has_no_variables() {
        let empty = Instance::sequence("empty", vec![], &[], 2).unwrap();
        let templates: Vec<Box<dyn Template>> = vec![Box::new(SequenceTemplate::bigram(0))];
        let graph = UnrolledGraph::new(&empty, &templates, &[], true).unwrap();
        assert_eq!(graph.num_variables(), 0);
        assert!(graph.cliques().is_empty());
    }
}
