#![allow(dead_code)]

use acrfs::objective::{Estimator, Objective, ObjectiveParams};
use acrfs::train::Optimizable;
use acrfs::{
    Acrf, CliqueSink, ExhaustiveInferencer, GraphCache, Instance, SequenceTemplate, SparseVector,
    Template, TemplateWeights, WeightAllocation,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Binary chain whose features reveal the label, plus a shared bias feature
pub fn separable_chain(name: &str, labels: &[u32]) -> Instance {
    let features = labels
        .iter()
        .map(|&l| SparseVector::from_pairs(vec![(l, 1.0), (2, 1.0)]))
        .collect();
    Instance::sequence(name, features, labels, 2).unwrap()
}

/// Binary chain with overlapping real-valued features
pub fn noisy_chain(name: &str, labels: &[u32]) -> Instance {
    let features = (0..labels.len())
        .map(|t| SparseVector::from_pairs(vec![((t % 3) as u32, 1.0), (3, 0.3 * t as f64 + 0.1)]))
        .collect();
    Instance::sequence(name, features, labels, 2).unwrap()
}

/// Two slices with 2 and 3 labels; `labels[t]` holds both
pub fn factorial(name: &str, labels: &[[u32; 2]]) -> Instance {
    let features = (0..labels.len())
        .map(|t| SparseVector::from_pairs(vec![((t % 2) as u32, 1.0), (2, 0.5)]))
        .collect();
    let labels = labels.iter().map(|row| row.to_vec()).collect();
    Instance::new(name, features, labels, vec![2, 3]).unwrap()
}

pub fn chain_model(allocation: WeightAllocation) -> Acrf {
    Acrf::new(
        vec![
            Box::new(SequenceTemplate::unigram(0)),
            Box::new(SequenceTemplate::bigram(0)),
        ],
        vec![],
        Box::new(ExhaustiveInferencer::new()),
    )
    .with_allocation(allocation)
}

/// Pairwise templates in both orders share one domain, so every position
/// carries a composite factor.
pub fn factorial_model() -> Acrf {
    Acrf::new(
        vec![
            Box::new(SequenceTemplate::unigram(0)),
            Box::new(SequenceTemplate::unigram(1)),
            Box::new(SequenceTemplate::bigram(0)),
            Box::new(SequenceTemplate::pairwise(0, 1)),
            Box::new(SequenceTemplate::pairwise(1, 0)),
        ],
        vec![],
        Box::new(ExhaustiveInferencer::new()),
    )
}

/// Cliques over three consecutive labels of slice 0
#[derive(Debug, Default)]
pub struct Triple {
    weights: TemplateWeights,
    with_features: bool,
}

impl Triple {
    pub fn new(with_features: bool) -> Self {
        Self {
            weights: TemplateWeights::new(),
            with_features,
        }
    }
}

impl Template for Triple {
    fn name(&self) -> &str {
        "triple"
    }

    fn add_instantiated_cliques(&self, instance: &Instance, sink: &mut CliqueSink<'_>) {
        for t in 2..instance.len() {
            if let (Some(a), Some(b), Some(c)) =
                (sink.var(t - 2, 0), sink.var(t - 1, 0), sink.var(t, 0))
            {
                let features = if self.with_features {
                    instance.feature_vector(t).clone()
                } else {
                    SparseVector::new()
                };
                sink.add_clique(&[a, b, c], features);
            }
        }
    }

    fn weights(&self) -> &TemplateWeights {
        &self.weights
    }

    fn weights_mut(&mut self) -> &mut TemplateWeights {
        &mut self.weights
    }
}

pub fn triple_model(with_features: bool) -> Acrf {
    Acrf::new(
        vec![
            Box::new(SequenceTemplate::unigram(0)),
            Box::new(Triple::new(with_features)),
        ],
        vec![],
        Box::new(ExhaustiveInferencer::new()),
    )
}

pub fn random_point(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(-0.8..0.8)).collect()
}

/// Compare the analytic gradient with central differences at a random point
pub fn check_gradient<E: Estimator>(objective: &mut Objective<'_, E>, seed: u64) {
    let n = objective.num_parameters();
    assert!(n > 0);
    let x = random_point(n, seed);
    objective.set_parameters(&x);
    let value = objective.value().unwrap();
    assert!(value.is_finite(), "value {} is not finite", value);
    let mut analytic = vec![0.0; n];
    objective.value_gradient(&mut analytic).unwrap();

    let h = 1e-5;
    for j in 0..n {
        let mut shifted = x.clone();
        shifted[j] = x[j] + h;
        objective.set_parameters(&shifted);
        let plus = objective.value().unwrap();
        shifted[j] = x[j] - h;
        objective.set_parameters(&shifted);
        let minus = objective.value().unwrap();
        let numeric = (plus - minus) / (2.0 * h);
        assert!(
            (numeric - analytic[j]).abs() <= 1e-5 * (1.0 + analytic[j].abs()),
            "{}: parameter {} analytic {} numeric {}",
            objective.estimator().name(),
            j,
            analytic[j],
            numeric
        );
    }
    objective.set_parameters(&x);
}

/// Build an objective over freshly sized weights and check its gradient
pub fn check_estimator<E: Estimator>(
    mut acrf: Acrf,
    instances: &[Instance],
    estimator: E,
    seed: u64,
) {
    acrf.init_weights(instances).unwrap();
    let mut cache = GraphCache::new(true);
    let params = ObjectiveParams::default().with_parallel(false);
    let mut objective = Objective::new(&mut acrf, instances, &mut cache, estimator, params).unwrap();
    check_gradient(&mut objective, seed);
}
