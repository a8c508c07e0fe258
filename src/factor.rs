use std::fmt::Write as _;

use ndarray::Array1;

use crate::error::{CrfError, Result};
use crate::variable::{Assignment, VarSet};

/// Log-sum-exp trick for numerical stability.
///
/// Returns NEG_INFINITY for empty input or when every value is NEG_INFINITY.
pub(crate) fn logsumexp<I: IntoIterator<Item = f64> + Clone>(values: I) -> f64 {
    let max_val = values
        .clone()
        .into_iter()
        .fold(f64::NEG_INFINITY, f64::max);
    if max_val.is_infinite() {
        return max_val;
    }
    let sum: f64 = values.into_iter().map(|v| (v - max_val).exp()).sum();
    max_val + sum.ln()
}

/// A table of log-space scores over the joint outcomes of a variable set
#[derive(Debug, Clone, PartialEq)]
pub struct Factor {
    vars: VarSet,
    /// `[num_assignments]` log potentials, indexed by assignment index
    log_values: Array1<f64>,
}

impl Factor {
    /// All-zero log table (the uniform potential)
    pub fn uniform(vars: VarSet) -> Self {
        let n = vars.num_assignments();
        Self {
            vars,
            log_values: Array1::zeros(n),
        }
    }

    pub fn from_log_values(vars: VarSet, log_values: Vec<f64>) -> Result<Self> {
        if log_values.len() != vars.num_assignments() {
            return Err(CrfError::invalid_parameter(format!(
                "factor over {} assignments given {} values",
                vars.num_assignments(),
                log_values.len()
            )));
        }
        Ok(Self {
            vars,
            log_values: Array1::from(log_values),
        })
    }

    pub fn vars(&self) -> &VarSet {
        &self.vars
    }

    pub fn num_assignments(&self) -> usize {
        self.log_values.len()
    }

    pub fn log_values(&self) -> &Array1<f64> {
        &self.log_values
    }

    pub fn log_value(&self, index: usize) -> f64 {
        self.log_values[index]
    }

    pub fn set_log_value(&mut self, index: usize, value: f64) {
        self.log_values[index] = value;
    }

    /// Log potential of the restriction of `assignment` to this factor
    pub fn log_value_of(&self, assignment: &Assignment) -> f64 {
        self.log_values[self.vars.index_of_assignment(assignment)]
    }

    /// Product in probability space of two factors over the same domain.
    pub fn multiply_by(&mut self, other: &Factor) {
        debug_assert_eq!(self.vars, other.vars);
        self.log_values += &other.log_values;
    }

    /// Log of the local partition function
    pub fn log_sum(&self) -> f64 {
        logsumexp(self.log_values.iter().copied())
    }

    pub fn normalize(&mut self) -> &mut Self {
        let log_z = self.log_sum();
        self.log_values.mapv_inplace(|v| v - log_z);
        self
    }

    pub fn normalized(&self) -> Factor {
        let mut factor = self.clone();
        factor.normalize();
        factor
    }

    /// Normalized probabilities
    pub fn probabilities(&self) -> Array1<f64> {
        let log_z = self.log_sum();
        self.log_values.mapv(|v| (v - log_z).exp())
    }

    /// Sum out every variable not in `keep`
    pub fn marginalize(&self, keep: &VarSet) -> Factor {
        let positions: Vec<usize> = keep
            .vars()
            .iter()
            .filter_map(|&v| self.vars.position(v))
            .collect();
        debug_assert_eq!(positions.len(), keep.len());

        let n = keep.num_assignments();
        let mut targets = Vec::with_capacity(self.num_assignments());
        let mut max = vec![f64::NEG_INFINITY; n];
        for (i, &lv) in self.log_values.iter().enumerate() {
            let values = self.vars.values_of(i);
            let projected: Vec<usize> = positions.iter().map(|&p| values[p]).collect();
            let target = keep.index_of(&projected);
            max[target] = max[target].max(lv);
            targets.push(target);
        }
        let mut sums = vec![0.0; n];
        for (&target, &lv) in targets.iter().zip(self.log_values.iter()) {
            if max[target].is_finite() {
                sums[target] += (lv - max[target]).exp();
            }
        }
        let log_values = max
            .iter()
            .zip(&sums)
            .map(|(&m, &s)| if m.is_finite() { m + s.ln() } else { m })
            .collect::<Vec<_>>();
        Factor {
            vars: keep.clone(),
            log_values: Array1::from(log_values),
        }
    }

    /// L-infinity distance between the normalized distributions
    pub fn dist_linf(&self, other: &Factor) -> f64 {
        let p = self.probabilities();
        let q = other.probabilities();
        p.iter()
            .zip(q.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }

    /// Assignment index with the highest score; ties go to the lowest index
    pub fn argmax(&self) -> usize {
        let mut best = 0;
        for (i, &v) in self.log_values.iter().enumerate() {
            if v > self.log_values[best] {
                best = i;
            }
        }
        best
    }

    /// Human-readable table, one row per assignment
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (i, v) in self.log_values.iter().enumerate() {
            let _ = writeln!(out, "    {:?} -> {:.6}", self.vars.values_of(i), v);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::Variable;

    fn vars(cards: &[usize]) -> VarSet {
        let vars: Vec<Variable> = cards
            .iter()
            .enumerate()
            .map(|(id, &cardinality)| Variable {
                id,
                cardinality,
                time: id,
                slice: 0,
            })
            .collect();
        VarSet::new(&vars)
    }

    #[test]
    fn test_logsumexp() {
        let v = logsumexp(vec![0.0_f64.ln(), 1.0_f64.ln(), 3.0_f64.ln()]);
        assert!((v - 4.0_f64.ln()).abs() < 1e-12);
        assert_eq!(logsumexp(Vec::<f64>::new()), f64::NEG_INFINITY);
        assert_eq!(logsumexp(vec![f64::NEG_INFINITY; 3]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_normalize_and_probabilities() {
        let f = Factor::from_log_values(vars(&[2]), vec![1.0_f64.ln(), 3.0_f64.ln()]).unwrap();
        let p = f.probabilities();
        assert!((p[0] - 0.25).abs() < 1e-12);
        assert!((p[1] - 0.75).abs() < 1e-12);
        assert!(f.normalized().log_sum().abs() < 1e-12);
        assert_eq!(f.argmax(), 1);
    }

    #[test]
    fn test_marginalize() {
        // p(a, b) proportional to [[1, 2], [3, 4]]
        let vals: Vec<f64> = [1.0_f64, 2.0, 3.0, 4.0].iter().map(|v| v.ln()).collect();
        let f = Factor::from_log_values(vars(&[2, 2]), vals).unwrap();

        let only_b = VarSet::from_pairs(vec![(1, 2)]);
        let m = f.marginalize(&only_b);
        assert!((m.log_value(0) - 4.0_f64.ln()).abs() < 1e-12);
        assert!((m.log_value(1) - 6.0_f64.ln()).abs() < 1e-12);

        let only_a = VarSet::from_pairs(vec![(0, 2)]);
        let m = f.marginalize(&only_a);
        assert!((m.log_value(0) - 3.0_f64.ln()).abs() < 1e-12);
        assert!((m.log_value(1) - 7.0_f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_multiply_and_distance() {
        let mut a = Factor::from_log_values(vars(&[2]), vec![0.0, 1.0]).unwrap();
        let b = Factor::from_log_values(vars(&[2]), vec![1.0, 0.0]).unwrap();
        a.multiply_by(&b);
        assert_eq!(a.log_values().to_vec(), vec![1.0, 1.0]);
        assert!(a.dist_linf(&Factor::uniform(vars(&[2]))) < 1e-12);
    }

    #[test]
    fn test_wrong_length_is_rejected() {
        assert!(Factor::from_log_values(vars(&[2, 3]), vec![0.0; 5]).is_err());
    }
}
