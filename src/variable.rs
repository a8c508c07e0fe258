/// Dense identifier of a variable inside one unrolled graph
pub type VarId = usize;

/// An output random variable with a fixed number of outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Variable {
    pub id: VarId,
    /// Number of possible label values
    pub cardinality: usize,
    /// Position in the input sequence
    pub time: usize,
    /// Output dimension the variable labels
    pub slice: usize,
}

/// A set of variables, sorted by id, with their cardinalities.
///
/// The order defines the assignment index of a joint outcome: row-major,
/// the last variable varying fastest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct VarSet {
    vars: Vec<VarId>,
    cards: Vec<usize>,
}

impl VarSet {
    pub fn new(vars: &[Variable]) -> Self {
        Self::from_pairs(vars.iter().map(|v| (v.id, v.cardinality)).collect())
    }

    /// Build from `(id, cardinality)` pairs; duplicates are dropped.
    pub fn from_pairs(mut pairs: Vec<(VarId, usize)>) -> Self {
        pairs.sort_unstable_by_key(|&(id, _)| id);
        pairs.dedup_by_key(|&mut (id, _)| id);
        let (vars, cards) = pairs.into_iter().unzip();
        Self { vars, cards }
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn vars(&self) -> &[VarId] {
        &self.vars
    }

    pub fn cardinalities(&self) -> &[usize] {
        &self.cards
    }

    pub fn contains(&self, var: VarId) -> bool {
        self.vars.binary_search(&var).is_ok()
    }

    pub fn position(&self, var: VarId) -> Option<usize> {
        self.vars.binary_search(&var).ok()
    }

    /// Number of joint outcomes
    pub fn num_assignments(&self) -> usize {
        self.cards.iter().product()
    }

    /// Assignment index of the joint outcome `values` (one per variable)
    pub fn index_of(&self, values: &[usize]) -> usize {
        debug_assert_eq!(values.len(), self.cards.len());
        values
            .iter()
            .zip(&self.cards)
            .fold(0, |idx, (&value, &card)| idx * card + value)
    }

    /// Inverse of [`index_of`](Self::index_of)
    pub fn values_of(&self, mut index: usize) -> Vec<usize> {
        let mut values = vec![0; self.cards.len()];
        for (slot, &card) in values.iter_mut().zip(&self.cards).rev() {
            *slot = index % card;
            index /= card;
        }
        values
    }

    /// Assignment index of the restriction of `assignment` to this set
    pub fn index_of_assignment(&self, assignment: &Assignment) -> usize {
        self.vars
            .iter()
            .zip(&self.cards)
            .fold(0, |idx, (&var, &card)| idx * card + assignment.get(var))
    }

    /// Write the joint outcome `index` into `assignment`
    pub fn write_index(&self, index: usize, assignment: &mut Assignment) {
        for (&var, value) in self.vars.iter().zip(self.values_of(index)) {
            assignment.set(var, value);
        }
    }

    /// A fresh assignment covering this set, set to outcome `index`
    pub fn assignment_from_index(&self, index: usize) -> Assignment {
        let len = self.vars.last().map_or(0, |&v| v + 1);
        let mut assignment = Assignment::zeros(len);
        self.write_index(index, &mut assignment);
        assignment
    }

    /// Variables of `self` that are not in `other`
    pub fn difference(&self, other: &VarSet) -> VarSet {
        let pairs = self
            .vars
            .iter()
            .zip(&self.cards)
            .filter(|(v, _)| !other.contains(**v))
            .map(|(&v, &c)| (v, c))
            .collect();
        VarSet::from_pairs(pairs)
    }
}

/// Outcome index per variable of a graph
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Assignment {
    values: Vec<usize>,
}

impl Assignment {
    pub fn new(values: Vec<usize>) -> Self {
        Self { values }
    }

    pub fn zeros(len: usize) -> Self {
        Self {
            values: vec![0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, var: VarId) -> usize {
        self.values[var]
    }

    pub fn set(&mut self, var: VarId, value: usize) {
        self.values[var] = value;
    }

    pub fn values(&self) -> &[usize] {
        &self.values
    }

    /// Values of the variables in `vars`, in set order
    pub fn restrict(&self, vars: &VarSet) -> Vec<usize> {
        vars.vars().iter().map(|&v| self.values[v]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(id: VarId, cardinality: usize) -> Variable {
        Variable {
            id,
            cardinality,
            time: id,
            slice: 0,
        }
    }

    #[test]
    fn test_varset_sorted_and_deduplicated() {
        let set = VarSet::new(&[var(4, 2), var(1, 3), var(4, 2)]);
        assert_eq!(set.vars(), &[1, 4]);
        assert_eq!(set.cardinalities(), &[3, 2]);
        assert_eq!(set.num_assignments(), 6);
        assert_eq!(set.position(4), Some(1));
        assert!(!set.contains(2));
    }

    #[test]
    fn test_index_is_row_major() {
        let set = VarSet::new(&[var(0, 3), var(1, 2)]);
        assert_eq!(set.index_of(&[0, 1]), 1);
        assert_eq!(set.index_of(&[2, 0]), 4);
        assert_eq!(set.values_of(5), vec![2, 1]);
    }

    #[test]
    fn test_assignment_round_trip() {
        let set = VarSet::new(&[var(0, 2), var(2, 3), var(5, 4)]);
        for i in 0..set.num_assignments() {
            let assignment = set.assignment_from_index(i);
            assert_eq!(set.index_of_assignment(&assignment), i);
        }
    }

    #[test]
    fn test_empty_set_has_one_assignment() {
        let set = VarSet::default();
        assert_eq!(set.num_assignments(), 1);
        assert_eq!(set.index_of(&[]), 0);
        assert!(set.values_of(0).is_empty());
    }
}
