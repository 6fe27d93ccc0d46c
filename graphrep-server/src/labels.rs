//! Per-worker label handle cache.

use graphrep_store::{GraphStore, Label};
use std::collections::HashMap;

/// Maps label names to the store's interned handles.
///
/// Each worker owns one cache for its whole lifetime, so it is populated
/// lazily and never evicted. Handles are store-wide, which makes sharing
/// them across requests safe.
#[derive(Debug, Default)]
pub struct LabelCache {
    labels: HashMap<String, Label>,
    misses: u64,
}

impl LabelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle for `name`, interning it on first use.
    pub fn get(&mut self, store: &dyn GraphStore, name: &str) -> Label {
        if let Some(label) = self.labels.get(name) {
            return label.clone();
        }
        self.misses += 1;
        let label = store.intern_label(name);
        self.labels.insert(name.to_string(), label.clone());
        label
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of lookups that had to go to the store.
    pub fn misses(&self) -> u64 {
        self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphrep_store::MemoryGraph;

    #[test]
    fn test_populated_lazily() {
        let graph = MemoryGraph::new();
        let mut cache = LabelCache::new();
        assert!(cache.is_empty());

        let person = cache.get(&graph, "Person");
        let again = cache.get(&graph, "Person");
        assert_eq!(person, again);
        assert_eq!(person.id(), again.id());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn test_agrees_with_store() {
        let graph = MemoryGraph::new();
        let interned = graph.intern_label("City");

        let mut cache = LabelCache::new();
        assert_eq!(cache.get(&graph, "City").id(), interned.id());
        assert_ne!(cache.get(&graph, "Town").id(), interned.id());
    }
}
