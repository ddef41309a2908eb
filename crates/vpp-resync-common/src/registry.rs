//! Bidirectional name ↔ index registry.
//!
//! Every object family keeps one of these to remember which dataplane
//! objects are known and under which stable name. An entry exists exactly
//! when the corresponding dataplane object is believed to exist.
//!
//! Lookups never create entries; registration and removal are explicit.

use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Error type for registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("name not registered: {0}")]
    NameNotFound(String),
}

#[derive(Debug, Clone)]
struct Entry<M> {
    index: u32,
    meta: M,
}

/// Registry mapping unique names to dataplane indices, with metadata.
///
/// Registering a name that is already present replaces its index and
/// metadata. The reverse index → name view always points at the most
/// recent registration for that index.
///
/// # Example
///
/// ```
/// use vpp_resync_common::NameToIndex;
///
/// let mut ifaces: NameToIndex<&str> = NameToIndex::new();
/// ifaces.register_name("memif1", 3, "memif");
///
/// assert_eq!(ifaces.lookup_idx("memif1"), Some((3, &"memif")));
/// assert_eq!(ifaces.lookup_name(3), Some(("memif1", &"memif")));
///
/// // Lookups of missing names don't create entries
/// assert!(ifaces.lookup_idx("tap0").is_none());
/// assert_eq!(ifaces.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct NameToIndex<M> {
    by_name: HashMap<String, Entry<M>>,
    by_index: BTreeMap<u32, String>,
}

impl<M> NameToIndex<M> {
    pub fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            by_index: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Registers `name` under `index` with the given metadata.
    ///
    /// Returns the metadata previously registered under this name, if any.
    pub fn register_name(&mut self, name: impl Into<String>, index: u32, meta: M) -> Option<M> {
        let name = name.into();
        let previous = self.by_name.insert(name.clone(), Entry { index, meta });
        if let Some(old) = &previous {
            if old.index != index && self.by_index.get(&old.index) == Some(&name) {
                self.by_index.remove(&old.index);
            }
        }
        self.by_index.insert(index, name);
        previous.map(|entry| entry.meta)
    }

    /// Removes `name` from the registry, returning its index and metadata.
    pub fn unregister_name(&mut self, name: &str) -> Result<(u32, M), RegistryError> {
        let entry = self
            .by_name
            .remove(name)
            .ok_or_else(|| RegistryError::NameNotFound(name.to_string()))?;
        if self.by_index.get(&entry.index).map(String::as_str) == Some(name) {
            self.by_index.remove(&entry.index);
        }
        Ok((entry.index, entry.meta))
    }

    /// Looks up the index and metadata registered under `name`.
    pub fn lookup_idx(&self, name: &str) -> Option<(u32, &M)> {
        self.by_name.get(name).map(|entry| (entry.index, &entry.meta))
    }

    /// Looks up the name and metadata most recently registered under `index`.
    pub fn lookup_name(&self, index: u32) -> Option<(&str, &M)> {
        let name = self.by_index.get(&index)?;
        let entry = self.by_name.get(name)?;
        Some((name.as_str(), &entry.meta))
    }

    /// Drops every registration.
    pub fn clear(&mut self) {
        self.by_name.clear();
        self.by_index.clear();
    }

    /// Iterates `(name, index, metadata)` in index order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32, &M)> {
        self.by_index.iter().filter_map(move |(index, name)| {
            self.by_name
                .get(name)
                .map(|entry| (name.as_str(), *index, &entry.meta))
        })
    }
}

impl<M> Default for NameToIndex<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_basic_operations() {
        let mut reg: NameToIndex<u8> = NameToIndex::new();
        assert!(reg.is_empty());

        reg.register_name("loop0", 1, 10);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.lookup_idx("loop0"), Some((1, &10)));
        assert_eq!(reg.lookup_name(1), Some(("loop0", &10)));

        let (idx, meta) = reg.unregister_name("loop0").unwrap();
        assert_eq!((idx, meta), (1, 10));
        assert!(reg.is_empty());
        assert!(reg.lookup_name(1).is_none());
    }

    #[test]
    fn test_lookup_never_creates() {
        let reg: NameToIndex<()> = NameToIndex::new();
        assert!(reg.lookup_idx("missing").is_none());
        assert!(reg.lookup_name(7).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_reregister_moves_index() {
        let mut reg: NameToIndex<()> = NameToIndex::new();
        reg.register_name("temp", 4, ());
        reg.register_name("temp", 5, ());

        assert_eq!(reg.len(), 1);
        assert_eq!(reg.lookup_idx("temp").map(|(i, _)| i), Some(5));
        assert!(reg.lookup_name(4).is_none());
        assert_eq!(reg.lookup_name(5).map(|(n, _)| n), Some("temp"));
    }

    #[test]
    fn test_index_shared_by_two_names() {
        let mut reg: NameToIndex<()> = NameToIndex::new();
        reg.register_name("a", 0, ());
        reg.register_name("b", 0, ());

        // Both names resolve; the index points at the latest registration
        assert!(reg.contains_name("a"));
        assert_eq!(reg.lookup_name(0).map(|(n, _)| n), Some("b"));

        // Removing the older name keeps the reverse entry of the newer one
        reg.unregister_name("a").unwrap();
        assert_eq!(reg.lookup_name(0).map(|(n, _)| n), Some("b"));
    }

    #[test]
    fn test_unregister_missing_name() {
        let mut reg: NameToIndex<()> = NameToIndex::new();
        assert_eq!(
            reg.unregister_name("nope"),
            Err(RegistryError::NameNotFound("nope".to_string()))
        );
    }

    #[test]
    fn test_iter_in_index_order() {
        let mut reg: NameToIndex<&str> = NameToIndex::new();
        reg.register_name("c", 30, "z");
        reg.register_name("a", 10, "x");
        reg.register_name("b", 20, "y");

        let all: Vec<_> = reg.iter().map(|(n, i, m)| (n, i, *m)).collect();
        assert_eq!(all, vec![("a", 10, "x"), ("b", 20, "y"), ("c", 30, "z")]);

        reg.clear();
        assert!(reg.is_empty());
        assert_eq!(reg.iter().count(), 0);
    }
}
