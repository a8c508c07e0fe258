use std::cmp::Ordering;

/// A real vector over feature indices.
///
/// Sparse vectors keep their indices sorted and unique; dense vectors cover
/// `0..len` implicitly. Weight vectors of a template are either, input
/// feature vectors are almost always sparse.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseVector {
    /// Sorted feature indices, `None` for a dense vector
    indices: Option<Vec<u32>>,
    /// One value per location
    values: Vec<f64>,
}

/// Input feature vector attached to one position of an instance.
pub type FeatureVector = SparseVector;

impl SparseVector {
    /// Create an empty sparse vector
    pub fn new() -> Self {
        Self {
            indices: Some(Vec::new()),
            values: Vec::new(),
        }
    }

    /// Create a dense zero vector of length `len`
    pub fn dense(len: usize) -> Self {
        Self {
            indices: None,
            values: vec![0.0; len],
        }
    }

    /// Create a zero vector supported on exactly `indices`.
    ///
    /// Indices are sorted and deduplicated.
    pub fn with_support(mut indices: Vec<u32>) -> Self {
        indices.sort_unstable();
        indices.dedup();
        let values = vec![0.0; indices.len()];
        Self {
            indices: Some(indices),
            values,
        }
    }

    /// Build a sparse vector from `(index, value)` pairs, summing duplicates.
    pub fn from_pairs<I: IntoIterator<Item = (u32, f64)>>(pairs: I) -> Self {
        let mut pairs: Vec<(u32, f64)> = pairs.into_iter().collect();
        pairs.sort_by_key(|&(idx, _)| idx);
        let mut indices: Vec<u32> = Vec::with_capacity(pairs.len());
        let mut values: Vec<f64> = Vec::with_capacity(pairs.len());
        for (idx, value) in pairs {
            if indices.last() == Some(&idx) {
                if let Some(last) = values.last_mut() {
                    *last += value;
                }
            } else {
                indices.push(idx);
                values.push(value);
            }
        }
        Self {
            indices: Some(indices),
            values,
        }
    }

    /// Binary indicator features
    pub fn from_indices(indices: &[u32]) -> Self {
        Self::from_pairs(indices.iter().map(|&idx| (idx, 1.0)))
    }

    pub fn is_dense(&self) -> bool {
        self.indices.is_none()
    }

    /// Number of stored locations
    pub fn num_locations(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Feature index stored at location `loc`
    pub fn index_at(&self, loc: usize) -> u32 {
        match &self.indices {
            Some(indices) => indices[loc],
            None => loc as u32,
        }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// Location of feature `index`, if it is stored
    pub fn location(&self, index: u32) -> Option<usize> {
        match &self.indices {
            Some(indices) => indices.binary_search(&index).ok(),
            None => {
                let loc = index as usize;
                if loc < self.values.len() {
                    Some(loc)
                } else {
                    None
                }
            }
        }
    }

    /// Value of feature `index`, zero when it is not stored
    pub fn value(&self, index: u32) -> f64 {
        self.location(index).map_or(0.0, |loc| self.values[loc])
    }

    /// Iterate over stored `(index, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        self.values
            .iter()
            .enumerate()
            .map(move |(loc, &value)| (self.index_at(loc), value))
    }

    /// Dot product with another vector
    pub fn dot(&self, other: &SparseVector) -> f64 {
        match (&self.indices, &other.indices) {
            (None, _) => other
                .iter()
                .filter_map(|(idx, v)| self.values.get(idx as usize).map(|w| w * v))
                .sum(),
            (_, None) => other.dot(self),
            (Some(a), Some(b)) => {
                let mut sum = 0.0;
                let (mut i, mut j) = (0, 0);
                while i < a.len() && j < b.len() {
                    match a[i].cmp(&b[j]) {
                        Ordering::Less => i += 1,
                        Ordering::Greater => j += 1,
                        Ordering::Equal => {
                            sum += self.values[i] * other.values[j];
                            i += 1;
                            j += 1;
                        }
                    }
                }
                sum
            }
        }
    }
}
