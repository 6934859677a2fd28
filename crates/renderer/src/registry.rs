//! Append-only resource storage.
//!
//! Meshes and textures are never freed individually, so a dense `Vec` with the
//! element index as handle is all the bookkeeping they need. Pipelines are
//! looked up by name instead.

use std::collections::HashMap;

use vkframe_rhi::{RhiError, RhiResult};

/// Dense array whose indices are handed out as handles.
#[derive(Debug)]
pub struct Registry<T> {
    kind: &'static str,
    items: Vec<T>,
}

impl<T> Registry<T> {
    /// `kind` names the resource in out-of-range errors.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            items: Vec::new(),
        }
    }

    /// Stores `item` and returns its index.
    pub fn push(&mut self, item: T) -> RhiResult<u32> {
        let index = u32::try_from(self.items.len()).map_err(|_| {
            RhiError::InvalidUsage(format!("{} registry is full", self.kind))
        })?;
        self.items.push(item);
        Ok(index)
    }

    pub fn get(&self, index: u32) -> RhiResult<&T> {
        self.items
            .get(index as usize)
            .ok_or(RhiError::HandleOutOfRange {
                kind: self.kind,
                index,
                len: self.items.len(),
            })
    }

    #[inline]
    pub fn contains(&self, index: u32) -> bool {
        (index as usize) < self.items.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Name-keyed storage where every name may be registered once.
#[derive(Debug)]
pub struct NamedRegistry<T> {
    items: HashMap<String, T>,
}

impl<T> NamedRegistry<T> {
    pub fn new() -> Self {
        Self {
            items: HashMap::new(),
        }
    }

    pub fn insert(&mut self, name: &str, item: T) -> RhiResult<()> {
        if self.items.contains_key(name) {
            return Err(RhiError::DuplicatePipeline(name.to_string()));
        }
        self.items.insert(name.to_string(), item);
        Ok(())
    }

    pub fn get(&self, name: &str) -> RhiResult<&T> {
        self.items
            .get(name)
            .ok_or_else(|| RhiError::PipelineNotFound(name.to_string()))
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.items.contains_key(name)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Default for NamedRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vkframe_rhi::ErrorKind;

    #[test]
    fn test_registry_hands_out_sequential_indices() {
        let mut registry = Registry::new("mesh");
        assert!(registry.is_empty());
        assert_eq!(registry.push("a").unwrap(), 0);
        assert_eq!(registry.push("b").unwrap(), 1);
        assert_eq!(registry.push("c").unwrap(), 2);
        assert_eq!(registry.len(), 3);
        assert_eq!(*registry.get(1).unwrap(), "b");
        assert_eq!(*registry.get(2).unwrap(), "c");
    }

    #[test]
    fn test_registry_out_of_range() {
        let mut registry = Registry::new("texture");
        registry.push(7u8).unwrap();

        assert!(registry.contains(0));
        assert!(!registry.contains(1));

        let err = registry.get(5).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HandleOutOfRange);
        assert!(matches!(
            err,
            RhiError::HandleOutOfRange {
                kind: "texture",
                index: 5,
                len: 1
            }
        ));
    }

    #[test]
    fn test_named_registry_lookup() {
        let mut registry = NamedRegistry::new();
        registry.insert("basic", 1).unwrap();

        assert_eq!(*registry.get("basic").unwrap(), 1);
        assert!(registry.contains("basic"));

        let err = registry.get("missing").unwrap_err();
        assert!(matches!(err, RhiError::PipelineNotFound(ref name) if name == "missing"));
        assert_eq!(err.kind(), ErrorKind::HandleOutOfRange);
    }

    #[test]
    fn test_named_registry_rejects_duplicates() {
        let mut registry = NamedRegistry::new();
        registry.insert("basic", 1).unwrap();

        let err = registry.insert("basic", 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidUsage);
        // The first registration is kept.
        assert_eq!(*registry.get("basic").unwrap(), 1);
        assert_eq!(registry.len(), 1);
    }
}
