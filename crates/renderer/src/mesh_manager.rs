//! Mesh uploads.

use std::sync::Arc;

use tracing::debug;
use vkframe_rhi::buffer::{Buffer, BufferUsage};
use vkframe_rhi::{DeviceContext, RhiError, RhiResult, Vertex};

use crate::MeshId;
use crate::registry::Registry;

/// Device-local geometry of one mesh.
pub struct Mesh {
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    index_count: u32,
}

impl Mesh {
    #[inline]
    pub fn vertex_buffer(&self) -> &Buffer {
        &self.vertex_buffer
    }

    #[inline]
    pub fn index_buffer(&self) -> &Buffer {
        &self.index_buffer
    }

    /// Number of indices to draw.
    #[inline]
    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

/// Rejects geometry that would need a zero-sized buffer.
pub(crate) fn validate_mesh_input(vertices: &[Vertex], indices: &[u32]) -> RhiResult<u32> {
    if vertices.is_empty() {
        return Err(RhiError::InvalidUsage(
            "mesh needs at least one vertex".to_string(),
        ));
    }
    if indices.is_empty() {
        return Err(RhiError::InvalidUsage(
            "mesh needs at least one index".to_string(),
        ));
    }
    u32::try_from(indices.len())
        .map_err(|_| RhiError::InvalidUsage(format!("{} indices do not fit u32", indices.len())))
}

/// Owns every uploaded mesh until the manager is dropped.
pub struct MeshManager {
    context: Arc<DeviceContext>,
    meshes: Registry<Mesh>,
}

impl MeshManager {
    pub fn new(context: Arc<DeviceContext>) -> Self {
        Self {
            context,
            meshes: Registry::new("mesh"),
        }
    }

    /// Uploads `vertices` and `indices` and returns the mesh's handle.
    ///
    /// Handles are sequential, starting at 0.
    pub fn create_mesh(&mut self, vertices: &[Vertex], indices: &[u32]) -> RhiResult<MeshId> {
        let index_count = validate_mesh_input(vertices, indices)?;

        let vertex_buffer = self
            .context
            .create_device_local_buffer(vertices, BufferUsage::Vertex)?;
        let index_buffer = self
            .context
            .create_device_local_buffer(indices, BufferUsage::Index)?;

        let id = self.meshes.push(Mesh {
            vertex_buffer,
            index_buffer,
            index_count,
        })?;

        debug!(
            "Created mesh {} ({} vertices, {} indices)",
            id,
            vertices.len(),
            index_count
        );
        Ok(MeshId(id))
    }

    pub fn get(&self, id: MeshId) -> RhiResult<&Mesh> {
        self.meshes.get(id.0)
    }

    #[inline]
    pub fn contains(&self, id: MeshId) -> bool {
        self.meshes.contains(id.0)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec2, Vec3};
    use vkframe_rhi::ErrorKind;

    fn triangle() -> Vec<Vertex> {
        vec![
            Vertex::new(Vec3::ZERO, Vec3::X, Vec3::Z, Vec2::ZERO),
            Vertex::new(Vec3::X, Vec3::Y, Vec3::Z, Vec2::X),
            Vertex::new(Vec3::Y, Vec3::Z, Vec3::Z, Vec2::Y),
        ]
    }

    #[test]
    fn test_validate_mesh_input_returns_index_count() {
        assert_eq!(validate_mesh_input(&triangle(), &[0, 1, 2]).unwrap(), 3);
    }

    #[test]
    fn test_validate_mesh_input_rejects_empty_lists() {
        assert_eq!(
            validate_mesh_input(&[], &[0, 1, 2]).unwrap_err().kind(),
            ErrorKind::InvalidUsage
        );
        assert_eq!(
            validate_mesh_input(&triangle(), &[]).unwrap_err().kind(),
            ErrorKind::InvalidUsage
        );
    }

    #[test]
    fn test_mesh_manager_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<MeshManager>();
    }
}
