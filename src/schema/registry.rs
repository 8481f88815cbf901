//! The in-memory schema cache owned by a corpus handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use super::Hierarchy;

/// Cached [`Hierarchy`] plus a staleness flag.
///
/// Readers get a cheap `Arc` snapshot. A writer that fails after the graph
/// may have changed marks the cache stale; the owner must then reload from
/// persisted metadata before trusting it again.
pub struct SchemaRegistry {
    current: RwLock<Arc<Hierarchy>>,
    stale: AtomicBool,
}

impl SchemaRegistry {
    pub fn new(hierarchy: Hierarchy) -> Self {
        Self { current: RwLock::new(Arc::new(hierarchy)), stale: AtomicBool::new(false) }
    }

    pub fn get(&self) -> Arc<Hierarchy> {
        Arc::clone(&self.current.read())
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::SeqCst);
    }

    /// Replace the cached schema and clear the stale flag.
    pub fn install(&self, hierarchy: Hierarchy) {
        *self.current.write() = Arc::new(hierarchy);
        self.stale.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_clears_stale() {
        let registry = SchemaRegistry::new(Hierarchy::new("demo"));
        registry.mark_stale();
        assert!(registry.is_stale());

        let mut h = Hierarchy::new("demo");
        h.add_level("word", None).unwrap();
        registry.install(h);
        assert!(!registry.is_stale());
        assert!(registry.get().has_level("word"));
    }
}
