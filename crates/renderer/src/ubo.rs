//! Uniform block shared by every pipeline.
//!
//! The layout must match the shader's uniform block at binding 0:
//!
//! - Offset 0: model matrix (64 bytes)
//! - Offset 64: view matrix (64 bytes)
//! - Offset 128: projection matrix (64 bytes)
//! - Total size: 192 bytes

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Degrees per second the demo model spins about +Z.
const ROTATION_DEGREES_PER_SEC: f32 = 90.0;

const EYE: Vec3 = Vec3::new(2.0, 2.0, 2.0);
const FOV_Y_DEGREES: f32 = 45.0;
const Z_NEAR: f32 = 0.1;
const Z_FAR: f32 = 10.0;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl UniformBufferObject {
    /// Size of the struct in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Matrices for `time` seconds after startup, rendered into `extent`.
    ///
    /// The model turns about +Z, the camera looks at the origin from
    /// (2, 2, 2) with +Z up. The projection's Y axis is flipped for Vulkan's
    /// clip space.
    pub fn animated(time: f32, extent: vk::Extent2D) -> Self {
        let model = Mat4::from_rotation_z((time * ROTATION_DEGREES_PER_SEC).to_radians());
        let view = Mat4::look_at_rh(EYE, Vec3::ZERO, Vec3::Z);

        let aspect = if extent.height == 0 {
            1.0
        } else {
            extent.width as f32 / extent.height as f32
        };
        let mut proj = Mat4::perspective_rh(FOV_Y_DEGREES.to_radians(), aspect, Z_NEAR, Z_FAR);
        proj.y_axis.y *= -1.0;

        Self { model, view, proj }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_ubo_size() {
        // 3 Mat4 (3 * 64) = 192 bytes
        assert_eq!(UniformBufferObject::SIZE, 192);
    }

    #[test]
    fn test_ubo_alignment() {
        assert_eq!(std::mem::align_of::<UniformBufferObject>(), 16);
    }

    #[test]
    fn test_ubo_field_order() {
        let ubo = UniformBufferObject {
            model: Mat4::from_scale(Vec3::splat(2.0)),
            view: Mat4::IDENTITY,
            proj: Mat4::ZERO,
        };
        let floats: &[f32] = bytemuck::cast_slice(bytemuck::bytes_of(&ubo));
        assert_eq!(floats[0], 2.0);
        assert_eq!(floats[16], 1.0);
        assert_eq!(floats[32], 0.0);
    }

    #[test]
    fn test_animated_at_time_zero_has_identity_model() {
        let ubo = UniformBufferObject::animated(0.0, extent(800, 600));
        assert_eq!(ubo.model, Mat4::IDENTITY);
        assert_eq!(ubo.view, Mat4::look_at_rh(EYE, Vec3::ZERO, Vec3::Z));
    }

    #[test]
    fn test_animated_rotates_quarter_turn_per_second() {
        let ubo = UniformBufferObject::animated(1.0, extent(800, 600));
        let x = ubo.model.transform_vector3(Vec3::X);
        assert!(x.abs_diff_eq(Vec3::Y, 1e-5));
    }

    #[test]
    fn test_animated_flips_y() {
        let ubo = UniformBufferObject::animated(0.0, extent(800, 600));
        let mut expected =
            Mat4::perspective_rh(45f32.to_radians(), 800.0 / 600.0, 0.1, 10.0);
        expected.y_axis.y *= -1.0;
        assert_eq!(ubo.proj, expected);
        assert!(ubo.proj.y_axis.y < 0.0);
    }

    #[test]
    fn test_animated_tolerates_zero_height() {
        let ubo = UniformBufferObject::animated(0.5, extent(800, 0));
        assert!(ubo.proj.is_finite());
    }
}
