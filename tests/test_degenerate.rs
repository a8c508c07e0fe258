mod common;

use acrfs::objective::{Likelihood, Objective, ObjectiveParams};
use acrfs::train::Optimizable;
use acrfs::{Acrf, ExhaustiveInferencer, GraphCache, Instance, SequenceTemplate};

use common::*;

fn unigram_model(instances: &[Instance]) -> Acrf {
    let mut acrf = Acrf::new(
        vec![Box::new(SequenceTemplate::unigram(0))],
        vec![],
        Box::new(ExhaustiveInferencer::new()),
    );
    acrf.init_weights(instances).unwrap();
    acrf
}

fn sequential() -> ObjectiveParams {
    ObjectiveParams::default().with_parallel(false)
}

/// Current parameters, and a copy with the default weight of `label` set
fn with_default_weight<E: acrfs::objective::Estimator>(
    objective: &Objective<'_, E>,
    label: usize,
    weight: f64,
) -> (Vec<f64>, Vec<f64>) {
    let mut x = vec![0.0; objective.num_parameters()];
    objective.parameters(&mut x);
    let mut changed = x.clone();
    changed[objective.layout().default_position(0, label).unwrap()] = weight;
    (x, changed)
}

#[test]
fn test_instance_turning_infinite_aborts_evaluation() {
    let instances = vec![separable_chain("a", &[0, 1])];
    let mut acrf = unigram_model(&instances);
    let mut cache = GraphCache::new(true);
    let mut objective =
        Objective::new(&mut acrf, &instances, &mut cache, Likelihood, sequential()).unwrap();
    let start = objective.value().unwrap();
    assert!((start - 2.0 * 0.5f64.ln()).abs() < 1e-12);

    // the gold label 1 becomes impossible after the first evaluation
    let (x, forbidden) = with_default_weight(&objective, 1, f64::NEG_INFINITY);
    objective.set_parameters(&forbidden);
    assert_eq!(objective.value().unwrap(), f64::NEG_INFINITY);
    let mut gradient = vec![1.0; objective.num_parameters()];
    objective.value_gradient(&mut gradient).unwrap();
    assert!(gradient.iter().all(|&g| g == 0.0));

    // an abort does not exclude the instance
    assert!(objective.infinite_instances().is_empty());
    objective.set_parameters(&x);
    assert!((objective.value().unwrap() - start).abs() < 1e-12);
}

#[test]
fn test_nan_aborts_evaluation() {
    let instances = vec![separable_chain("a", &[0, 1]), separable_chain("b", &[0, 0])];
    let mut acrf = unigram_model(&instances);
    let mut cache = GraphCache::new(true);
    let mut objective =
        Objective::new(&mut acrf, &instances, &mut cache, Likelihood, sequential()).unwrap();

    // NaN on the very first evaluation aborts rather than excluding
    let (x, poisoned) = with_default_weight(&objective, 1, f64::NAN);
    objective.set_parameters(&poisoned);
    assert_eq!(objective.value().unwrap(), f64::NEG_INFINITY);
    let mut gradient = vec![1.0; objective.num_parameters()];
    objective.value_gradient(&mut gradient).unwrap();
    assert!(gradient.iter().all(|&g| g == 0.0));
    assert!(objective.infinite_instances().is_empty());

    objective.set_parameters(&x);
    assert!(objective.value().unwrap().is_finite());
    objective.set_parameters(&poisoned);
    assert_eq!(objective.value().unwrap(), f64::NEG_INFINITY);
}

#[test]
fn test_positive_infinite_weight_on_first_evaluation() {
    let instances = vec![separable_chain("a", &[0, 0]), separable_chain("b", &[1, 1])];
    let mut acrf = unigram_model(&instances);
    let mut cache = GraphCache::new(true);
    let mut objective =
        Objective::new(&mut acrf, &instances, &mut cache, Likelihood, sequential()).unwrap();
    let pinned_at = objective.layout().default_position(0, 0).unwrap();
    let (_, pinned) = with_default_weight(&objective, 0, f64::INFINITY);
    objective.set_parameters(&pinned);

    // label 0 swallows all mass: "a" is infinite, "b" impossible
    assert_eq!(objective.value().unwrap(), 0.0);
    assert_eq!(objective.infinite_instances(), vec![0, 1]);
    assert!(objective.constraints().iter().all(|&c| c == 0.0));
    let mut gradient = vec![1.0; objective.num_parameters()];
    objective.value_gradient(&mut gradient).unwrap();
    assert!(gradient.iter().all(|&g| g == 0.0));

    // later evaluations skip both instances and the pinned weight
    objective.set_parameters(&pinned);
    assert_eq!(objective.value().unwrap(), 0.0);
    let mut x = vec![0.0; objective.num_parameters()];
    objective.parameters(&mut x);
    assert_eq!(x[pinned_at], f64::INFINITY);
}
