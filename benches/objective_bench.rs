use criterion::{Criterion, black_box, criterion_group, criterion_main};

use acrfs::objective::{Estimator, Likelihood, Objective, ObjectiveParams, Pseudolikelihood, Pwpl};
use acrfs::train::Optimizable;
use acrfs::{Acrf, ExhaustiveInferencer, GraphCache, Instance, SequenceTemplate, SparseVector};

fn instances() -> Vec<Instance> {
    (0..20)
        .map(|i| {
            let labels: Vec<u32> = (0..8).map(|t| ((i + t) % 3 % 2) as u32).collect();
            let features = labels
                .iter()
                .enumerate()
                .map(|(t, &l)| SparseVector::from_pairs(vec![(l, 1.0), (2 + (t % 4) as u32, 0.5)]))
                .collect();
            Instance::sequence(format!("bench{}", i), features, &labels, 2).unwrap()
        })
        .collect()
}

fn model(instances: &[Instance]) -> Acrf {
    let mut acrf = Acrf::new(
        vec![
            Box::new(SequenceTemplate::unigram(0)),
            Box::new(SequenceTemplate::bigram(0)),
        ],
        vec![],
        Box::new(ExhaustiveInferencer::new()),
    );
    acrf.init_weights(instances).unwrap();
    acrf
}

fn bench_estimator<E: Estimator>(c: &mut Criterion, name: &str, estimator: E) {
    let instances = instances();
    let mut acrf = model(&instances);
    let mut cache = GraphCache::new(true);
    let mut objective = Objective::new(
        &mut acrf,
        &instances,
        &mut cache,
        estimator,
        ObjectiveParams::default(),
    )
    .unwrap();
    let n = objective.num_parameters();
    let x: Vec<f64> = (0..n).map(|j| (j % 7) as f64 * 0.1 - 0.3).collect();
    let mut gradient = vec![0.0; n];
    c.bench_function(name, |b| {
        b.iter(|| {
            objective.set_parameters(black_box(&x));
            objective.value_gradient(&mut gradient).unwrap();
            objective.value().unwrap()
        })
    });
}

fn criterion_benchmark(c: &mut Criterion) {
    bench_estimator(c, "likelihood", Likelihood);
    bench_estimator(c, "pseudolikelihood", Pseudolikelihood::by_variable());
    bench_estimator(c, "piecewise-pseudolikelihood", Pwpl::new());
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
