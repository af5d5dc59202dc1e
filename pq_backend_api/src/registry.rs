//! Registry of available compressors, keyed by id and file suffix.

use std::collections::HashMap;
use std::sync::Arc;

use super::Compressor;

/// In-memory registry for compressors.
#[derive(Default, Clone)]
pub struct CompressorRegistry {
    compressors: HashMap<&'static str, Arc<dyn Compressor>>,
}

impl CompressorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a compressor keyed by its `Compressor::id`.
    pub fn register<C>(&mut self, compressor: C)
    where
        C: Compressor + 'static,
    {
        self.register_arc(Arc::new(compressor));
    }

    /// Register an already shared compressor.
    pub fn register_arc(&mut self, compressor: Arc<dyn Compressor>) {
        self.compressors.insert(compressor.id(), compressor);
    }

    /// Retrieve a compressor by identifier.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn Compressor>> {
        self.compressors.get(id).cloned()
    }

    /// Find the compressor whose suffix ends `file_name`, returning it with
    /// the file name stripped of `.<suffix>`.
    #[must_use]
    pub fn for_file_name<'a>(&self, file_name: &'a str) -> Option<(Arc<dyn Compressor>, &'a str)> {
        self.compressors.values().find_map(|compressor| {
            file_name
                .strip_suffix(compressor.suffix())
                .and_then(|rest| rest.strip_suffix('.'))
                .filter(|rest| !rest.is_empty())
                .map(|rest| (Arc::clone(compressor), rest))
        })
    }

    /// Returns the registered compressor identifiers.
    pub fn ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.compressors.keys().copied()
    }

    /// Returns the registered file suffixes.
    pub fn suffixes(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.compressors.values().map(|compressor| compressor.suffix())
    }
}

impl std::fmt::Debug for CompressorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&str> = self.ids().collect();
        ids.sort_unstable();
        f.debug_struct("CompressorRegistry")
            .field("compressors", &ids)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BackendResult;

    struct Identity;

    impl Compressor for Identity {
        fn id(&self) -> &'static str {
            "identity"
        }

        fn suffix(&self) -> &'static str {
            "id"
        }

        fn compress(&self, data: &[u8]) -> BackendResult<Vec<u8>> {
            Ok(data.to_vec())
        }

        fn decompress(&self, data: &[u8]) -> BackendResult<Vec<u8>> {
            Ok(data.to_vec())
        }
    }

    #[test]
    fn lookup_by_id_and_suffix() {
        let mut registry = CompressorRegistry::new();
        registry.register(Identity);

        assert!(registry.get("identity").is_some());
        assert!(registry.get("gzip").is_none());

        let (compressor, stem) = registry
            .for_file_name("0001-fix.patch.id")
            .expect("suffix match");
        assert_eq!(compressor.id(), "identity");
        assert_eq!(stem, "0001-fix.patch");
    }

    #[test]
    fn suffix_must_follow_a_dot() {
        let mut registry = CompressorRegistry::new();
        registry.register(Identity);

        assert!(registry.for_file_name("0001-fix.patch").is_none());
        assert!(registry.for_file_name("stupid").is_none());
        assert!(registry.for_file_name(".id").is_none());
    }
}
