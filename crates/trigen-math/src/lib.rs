// SPDX-License-Identifier: CEPL-1.0
//! Projection and transform helpers for Vulkan clip space.
//!
//! Vulkan's clip space has +Y pointing down and depth in `[0, 1]`; the
//! matrices built here already account for both so shaders can use them as is.
pub use glam::{Mat4, Vec3};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Projection {
    pub fov_y_degrees: f32,
    pub aspect: f32,
    pub z_near: f32,
    pub z_far: f32,
}

impl Projection {
    pub fn new(fov_y_degrees: f32, width: u32, height: u32, z_near: f32, z_far: f32) -> Self {
        Self {
            fov_y_degrees,
            aspect: aspect_ratio(width, height),
            z_near,
            z_far,
        }
    }

    pub fn matrix(&self) -> Mat4 {
        perspective(self.fov_y_degrees, self.aspect, self.z_near, self.z_far)
    }
}

/// `width / height`, or 1.0 for a degenerate (minimised) surface.
pub fn aspect_ratio(width: u32, height: u32) -> f32 {
    if width == 0 || height == 0 {
        1.0
    } else {
        width as f32 / height as f32
    }
}

/// Right-handed perspective, depth `[0, 1]`, Y flipped for Vulkan.
pub fn perspective(fov_y_degrees: f32, aspect: f32, z_near: f32, z_far: f32) -> Mat4 {
    let mut m = Mat4::perspective_rh(fov_y_degrees.to_radians(), aspect, z_near, z_far);
    m.y_axis.y = -m.y_axis.y;
    m
}

pub fn translation(offset: [f32; 3]) -> Mat4 {
    Mat4::from_translation(Vec3::from_array(offset))
}

/// Projection times model translation, in column-major order for push constants.
pub fn draw_transform(projection: &Projection, offset: [f32; 3]) -> [f32; 16] {
    (projection.matrix() * translation(offset)).to_cols_array()
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    fn clip(m: Mat4, p: Vec3) -> Vec3 {
        let c = m * Vec4::new(p.x, p.y, p.z, 1.0);
        Vec3::new(c.x / c.w, c.y / c.w, c.z / c.w)
    }

    #[test]
    fn near_and_far_planes_map_to_depth_range() {
        let m = perspective(70.0, 4.0 / 3.0, 0.01, 1000.0);
        let near = clip(m, Vec3::new(0.0, 0.0, -0.01));
        let far = clip(m, Vec3::new(0.0, 0.0, -1000.0));
        assert!(near.z.abs() < 1e-4, "near depth {}", near.z);
        assert!((far.z - 1.0).abs() < 1e-4, "far depth {}", far.z);
    }

    #[test]
    fn up_in_view_space_is_up_on_screen() {
        let m = perspective(70.0, 1.0, 0.1, 100.0);
        let p = clip(m, Vec3::new(0.0, 1.0, -5.0));
        assert!(p.y < 0.0, "expected negative clip y, got {}", p.y);
    }

    #[test]
    fn degenerate_surface_uses_unit_aspect() {
        assert_eq!(aspect_ratio(0, 768), 1.0);
        assert_eq!(aspect_ratio(1024, 0), 1.0);
        assert_eq!(aspect_ratio(1024, 768), 1024.0 / 768.0);
    }

    #[test]
    fn draw_transform_applies_translation_before_projection() {
        let proj = Projection::new(70.0, 1024, 768, 0.01, 1000.0);
        let cols = draw_transform(&proj, [0.0, 0.0, -50.0]);
        let m = Mat4::from_cols_array(&cols);
        let origin = clip(m, Vec3::ZERO);
        let expected = clip(proj.matrix(), Vec3::new(0.0, 0.0, -50.0));
        assert!((origin - expected).length() < 1e-5);
        assert!(origin.x.abs() < 1e-6 && origin.y.abs() < 1e-6);
    }
}
