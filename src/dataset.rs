use crate::attribute::Attribute;
use crate::dictionary::Dictionary;
use crate::error::{CrfError, Result};
use crate::sparse::{FeatureVector, SparseVector};

/// An instance consists of a sequence of feature vectors and, per position,
/// one label for each output slice
#[derive(Debug, Clone)]
pub struct Instance {
    /// Instance name, also the graph cache key
    name: String,
    /// Feature vector per position
    features: Vec<FeatureVector>,
    /// Labels `[time][slice]`
    labels: Vec<Vec<u32>>,
    /// Number of label values per slice
    cardinalities: Vec<usize>,
}

impl Instance {
    pub fn new(
        name: impl Into<String>,
        features: Vec<FeatureVector>,
        labels: Vec<Vec<u32>>,
        cardinalities: Vec<usize>,
    ) -> Result<Self> {
        let name = name.into();
        if features.len() != labels.len() {
            return Err(CrfError::invalid_instance(format!(
                "{}: {} feature vectors but {} label positions",
                name,
                features.len(),
                labels.len()
            )));
        }
        if cardinalities.iter().any(|&c| c == 0) {
            return Err(CrfError::invalid_instance(format!(
                "{}: every slice needs at least one label",
                name
            )));
        }
        for (t, row) in labels.iter().enumerate() {
            if row.len() != cardinalities.len() {
                return Err(CrfError::invalid_instance(format!(
                    "{}: position {} has {} labels, expected {}",
                    name,
                    t,
                    row.len(),
                    cardinalities.len()
                )));
            }
            for (slice, (&label, &card)) in row.iter().zip(&cardinalities).enumerate() {
                if label as usize >= card {
                    return Err(CrfError::invalid_instance(format!(
                        "{}: label {} at position {} slice {} exceeds cardinality {}",
                        name, label, t, slice, card
                    )));
                }
            }
        }
        Ok(Self {
            name,
            features,
            labels,
            cardinalities,
        })
    }

    /// A single-slice labeled sequence
    pub fn sequence(
        name: impl Into<String>,
        features: Vec<FeatureVector>,
        labels: &[u32],
        num_labels: usize,
    ) -> Result<Self> {
        let labels = labels.iter().map(|&l| vec![l]).collect();
        Self::new(name, features, labels, vec![num_labels])
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of positions
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn num_slices(&self) -> usize {
        self.cardinalities.len()
    }

    pub fn cardinalities(&self) -> &[usize] {
        &self.cardinalities
    }

    pub fn feature_vector(&self, t: usize) -> &FeatureVector {
        &self.features[t]
    }

    pub fn label(&self, t: usize, slice: usize) -> u32 {
        self.labels[t][slice]
    }

    pub fn labels(&self) -> &[Vec<u32>] {
        &self.labels
    }
}

/// Collects named training data into [`Instance`]s.
///
/// Attribute names grow the feature dictionary as they are seen; the label
/// sets of every slice are fixed up front so label cardinalities never
/// change after an instance is built.
#[derive(Debug, Clone)]
pub struct Corpus {
    /// Attribute dictionary
    attrs: Dictionary,
    /// Label dictionary per slice
    labels: Vec<Dictionary>,
    /// Collected instances
    instances: Vec<Instance>,
}

impl Corpus {
    /// Create a corpus with one label dictionary per output slice
    pub fn new(labels: Vec<Dictionary>) -> Self {
        Self {
            attrs: Dictionary::new(),
            labels,
            instances: Vec::new(),
        }
    }

    /// Create a single-slice corpus
    pub fn with_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(vec![Dictionary::from_names(labels)])
    }

    /// Append a training sequence; `yseq[t]` holds one label per slice
    pub fn append<I, Y, L>(&mut self, xseq: &[I], yseq: &[Y]) -> Result<()>
    where
        I: AsRef<[Attribute]>,
        Y: AsRef<[L]>,
        L: AsRef<str>,
    {
        let name = format!("instance{}", self.instances.len());
        self.append_named(name, xseq, yseq)
    }

    /// Append a training sequence under an explicit name
    pub fn append_named<I, Y, L>(
        &mut self,
        name: impl Into<String>,
        xseq: &[I],
        yseq: &[Y],
    ) -> Result<()>
    where
        I: AsRef<[Attribute]>,
        Y: AsRef<[L]>,
        L: AsRef<str>,
    {
        if xseq.len() != yseq.len() {
            return Err(CrfError::invalid_instance(
                "xseq and yseq must have the same length",
            ));
        }
        if xseq.is_empty() {
            return Err(CrfError::invalid_instance(
                "empty sequences are not allowed",
            ));
        }

        let mut features = Vec::with_capacity(xseq.len());
        let mut labels = Vec::with_capacity(yseq.len());
        for (item, row) in xseq.iter().zip(yseq) {
            let pairs: Vec<(u32, f64)> = item
                .as_ref()
                .iter()
                .map(|attr| (self.attrs.get_or_insert(&attr.name), attr.value))
                .collect();
            features.push(SparseVector::from_pairs(pairs));

            let row = row.as_ref();
            if row.len() != self.labels.len() {
                return Err(CrfError::invalid_instance(format!(
                    "expected {} labels per position, got {}",
                    self.labels.len(),
                    row.len()
                )));
            }
            let mut ids = Vec::with_capacity(row.len());
            for (dict, label) in self.labels.iter().zip(row) {
                let label = label.as_ref();
                let id = dict
                    .get(label)
                    .ok_or_else(|| CrfError::invalid_instance(format!("unknown label {}", label)))?;
                ids.push(id);
            }
            labels.push(ids);
        }

        let instance = Instance::new(name, features, labels, self.cardinalities())?;
        self.instances.push(instance);
        Ok(())
    }

    /// Build an unlabeled instance for decoding; unknown attributes are dropped
    /// and every gold label is set to the first label of its slice.
    pub fn instance_for<I>(&self, name: impl Into<String>, xseq: &[I]) -> Result<Instance>
    where
        I: AsRef<[Attribute]>,
    {
        let features = xseq
            .iter()
            .map(|item| {
                SparseVector::from_pairs(
                    item.as_ref()
                        .iter()
                        .filter_map(|attr| self.attrs.get(&attr.name).map(|id| (id, attr.value))),
                )
            })
            .collect();
        let labels = vec![vec![0; self.labels.len()]; xseq.len()];
        Instance::new(name, features, labels, self.cardinalities())
    }

    /// Resolve a decoded `[time][slice]` label sequence to label names
    pub fn label_names(&self, labels: &[Vec<u32>]) -> Vec<Vec<&str>> {
        labels
            .iter()
            .map(|row| {
                row.iter()
                    .zip(&self.labels)
                    .map(|(&id, dict)| dict.get_name(id).unwrap_or(""))
                    .collect()
            })
            .collect()
    }

    pub fn cardinalities(&self) -> Vec<usize> {
        self.labels.iter().map(Dictionary::len).collect()
    }

    pub fn attrs(&self) -> &Dictionary {
        &self.attrs
    }

    pub fn label_dictionary(&self, slice: usize) -> Option<&Dictionary> {
        self.labels.get(slice)
    }

    pub fn num_features(&self) -> usize {
        self.attrs.len()
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Clear all instances and the attribute dictionary
    pub fn clear(&mut self) {
        self.instances.clear();
        self.attrs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corpus_append() {
        let mut corpus = Corpus::with_labels(["sunny", "rainy"]);

        let xseq = vec![
            vec![Attribute::new("walk", 1.0), Attribute::new("shop", 0.5)],
            vec![Attribute::new("walk", 1.0)],
        ];
        let yseq = vec![["sunny"], ["rainy"]];

        assert!(corpus.append(&xseq, &yseq).is_ok());
        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus.num_features(), 2); // walk, shop
        assert_eq!(corpus.cardinalities(), vec![2]);

        let inst = &corpus.instances()[0];
        assert_eq!(inst.name(), "instance0");
        assert_eq!(inst.len(), 2);
        assert_eq!(inst.label(1, 0), 1);
        assert_eq!(inst.feature_vector(0).value(1), 0.5);
    }

    #[test]
    fn test_corpus_rejects_bad_sequences() {
        let mut corpus = Corpus::with_labels(["A", "B"]);

        let xseq: Vec<Vec<Attribute>> = vec![];
        let yseq: Vec<[&str; 1]> = vec![];
        let err = corpus.append(&xseq, &yseq).unwrap_err();
        assert!(err.to_string().contains("empty"));

        let xseq = vec![vec![Attribute::from("a")]];
        let err = corpus.append(&xseq, &[["C"]]).unwrap_err();
        assert!(err.to_string().contains("unknown label"));

        let err = corpus.append(&xseq, &[["A"], ["B"]]).unwrap_err();
        assert!(err.to_string().contains("same length"));
    }

    #[test]
    fn test_instance_for_drops_unknown_attributes() {
        let mut corpus = Corpus::with_labels(["A", "B"]);
        corpus
            .append(&[vec![Attribute::from("a")]], &[["B"]])
            .unwrap();
        let inst = corpus
            .instance_for("test", &[vec![Attribute::from("a"), Attribute::from("zzz")]])
            .unwrap();
        assert_eq!(inst.feature_vector(0).num_locations(), 1);
        assert_eq!(corpus.label_names(&[vec![1]]), vec![vec!["B"]]);
    }

    #[test]
    fn test_instance_validation() {
        let fv = vec![SparseVector::new(); 2];
        assert!(Instance::sequence("x", fv.clone(), &[0, 2], 2).is_err());
        assert!(Instance::sequence("x", fv.clone(), &[0], 2).is_err());
        assert!(Instance::sequence("x", fv, &[0, 1], 2).is_ok());
        assert!(Instance::sequence("empty", vec![], &[], 2).unwrap().is_empty());
    }
}
