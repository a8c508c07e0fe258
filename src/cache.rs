use std::collections::HashMap;

use crate::graph::UnrolledGraph;

/// Unrolled graphs kept across objective evaluations, keyed by instance
/// name.
///
/// Graphs are taken out of the cache for the duration of a pass and put
/// back afterwards, so a graph is only ever touched by one worker.
#[derive(Debug, Default)]
pub struct GraphCache {
    enabled: bool,
    graphs: HashMap<String, UnrolledGraph>,
}

impl GraphCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            graphs: HashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turn caching on or off, returning the previous setting.
    ///
    /// While disabled nothing is served or stored; graphs already cached
    /// are kept for when caching is turned back on.
    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        std::mem::replace(&mut self.enabled, enabled)
    }

    /// Remove and return the graph of `name`
    pub fn take(&mut self, name: &str) -> Option<UnrolledGraph> {
        if !self.enabled {
            return None;
        }
        self.graphs.remove(name)
    }

    pub fn insert(&mut self, graph: UnrolledGraph) {
        if self.enabled {
            self.graphs.insert(graph.name().to_string(), graph);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.graphs.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    pub fn clear(&mut self) {
        self.graphs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Instance;
    use crate::sparse::SparseVector;

    fn graph(name: &str) -> UnrolledGraph {
        let instance = Instance::sequence(name, vec![SparseVector::new()], &[0], 2).unwrap();
        UnrolledGraph::new(&instance, &[], &[], false).unwrap()
    }

    #[test]
    fn test_take_and_insert() {
        let mut cache = GraphCache::new(true);
        cache.insert(graph("a"));
        assert!(cache.contains("a"));
        assert!(cache.take("a").is_some());
        assert!(cache.take("a").is_none());
    }

    #[test]
    fn test_disabled_cache_keeps_nothing() {
        let mut cache = GraphCache::new(true);
        cache.insert(graph("a"));
        assert!(cache.set_enabled(false));
        cache.insert(graph("b"));
        assert!(cache.take("a").is_none());
        assert!(!cache.contains("b"));
        assert!(!cache.set_enabled(true));
        assert!(cache.take("a").is_some());
        cache.clear();
        assert!(cache.is_empty());
    }
}
