use std::collections::HashMap;

/// Dense ids for attribute or label names.
///
/// Ids are handed out in insertion order starting at 0, so a dictionary
/// also fixes the feature numbering of every instance built through it.
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    ids: HashMap<String, u32>,
    names: Vec<String>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dictionary over `names`, numbered in iteration order
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut dict = Self::new();
        names.into_iter().for_each(|name| {
            dict.get_or_insert(name.as_ref());
        });
        dict
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Id of `name`, assigning the next free id to an unseen name
    pub fn get_or_insert(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.names.len() as u32;
        self.names.push(name.to_owned());
        self.ids.insert(name.to_owned(), id);
        id
    }

    pub fn get(&self, name: &str) -> Option<u32> {
        self.ids.get(name).copied()
    }

    pub fn get_name(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.names.clear();
    }

    /// `(name, id)` pairs in id order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> + '_ {
        (0u32..).zip(&self.names).map(|(id, name)| (name.as_str(), id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_follow_insertion_order() {
        let mut attrs = Dictionary::new();
        assert_eq!(attrs.get_or_insert("walk"), 0);
        assert_eq!(attrs.get_or_insert("shop"), 1);
        assert_eq!(attrs.get_or_insert("walk"), 0);
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs.get("clean"), None);
        assert_eq!(attrs.get_name(1), Some("shop"));
        assert_eq!(attrs.get_name(2), None);
    }

    #[test]
    fn test_label_set_from_names() {
        let labels = Dictionary::from_names(["B", "I", "O", "B"]);
        assert_eq!(labels.len(), 3);
        let pairs: Vec<(&str, u32)> = labels.iter().collect();
        assert_eq!(pairs, vec![("B", 0), ("I", 1), ("O", 2)]);

        let mut labels = labels;
        labels.clear();
        assert!(labels.is_empty());
        assert_eq!(labels.get("B"), None);
    }
}
