//! The retained draw list.

use crate::{MeshId, TextureId};

/// One draw: a mesh sampled with a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawInstance {
    pub mesh: MeshId,
    pub texture: TextureId,
}

/// Instances in draw order. There is no removal.
#[derive(Debug, Default)]
pub struct InstanceList {
    instances: Vec<DrawInstance>,
}

impl InstanceList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mesh: MeshId, texture: TextureId) {
        self.instances.push(DrawInstance { mesh, texture });
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DrawInstance> {
        self.instances.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instances_keep_insertion_order() {
        let mut list = InstanceList::new();
        list.push(MeshId(2), TextureId(0));
        list.push(MeshId(0), TextureId(3));
        list.push(MeshId(2), TextureId(1));

        let meshes: Vec<u32> = list.iter().map(|i| i.mesh.0).collect();
        assert_eq!(meshes, [2, 0, 2]);
        assert_eq!(list.iter().nth(1).map(|i| i.texture), Some(TextureId(3)));
        assert_eq!(list.len(), 3);
    }
}
