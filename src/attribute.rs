/// A named, real-valued observation at one position of a sequence.
///
/// [`Corpus`](crate::Corpus) resolves the name to a feature index, the value
/// becomes the entry of the position's feature vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: f64,
}

impl Attribute {
    pub fn new<T: Into<String>>(name: T, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Indicator attribute
impl From<String> for Attribute {
    fn from(name: String) -> Self {
        Self::new(name, 1.0)
    }
}

impl From<&str> for Attribute {
    fn from(name: &str) -> Self {
        Self::new(name, 1.0)
    }
}

impl<S: Into<String>> From<(S, f64)> for Attribute {
    fn from((name, value): (S, f64)) -> Self {
        Self::new(name, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        assert_eq!(Attribute::from("shop"), Attribute::new("shop", 1.0));
        assert_eq!(
            Attribute::from(("clean".to_string(), 0.5)),
            Attribute::new("clean", 0.5)
        );
        let weighted: Vec<Attribute> = vec![("walk", 2.0).into(), "rain".into()];
        assert_eq!(weighted[0].value, 2.0);
        assert_eq!(weighted[1].name, "rain");
    }
}
