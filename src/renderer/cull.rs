use glam::{Mat4, Vec3, Vec4};

/// Axis-aligned bounding box stored as a base corner plus a non-negative
/// extent, so `base` and `base + offset` are the two opposite corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub base: Vec3,
    pub offset: Vec3,
}

impl Aabb {
    pub fn new(base: Vec3, offset: Vec3) -> Self {
        debug_assert!(offset.cmpge(Vec3::ZERO).all(), "negative AABB extent");
        Self { base, offset }
    }

    /// Cube of the given half extent centered on `center`.
    pub fn around(center: Vec3, half_extent: f32) -> Self {
        Self {
            base: center - Vec3::splat(half_extent),
            offset: Vec3::splat(2.0 * half_extent),
        }
    }

    fn corner(&self, index: usize) -> Vec3 {
        self.base
            + self.offset
                * Vec3::new(
                    (index & 1) as f32,
                    ((index >> 1) & 1) as f32,
                    ((index >> 2) & 1) as f32,
                )
    }

    /// Conservative frustum test in clip space. The box is rejected only
    /// when all eight corners fall outside the same clip plane, so any box
    /// that touches the frustum is kept. Clip depth follows the wgpu
    /// convention `0 <= z <= w`.
    pub fn intersects_clip_space(&self, view_proj: Mat4) -> bool {
        let mut clip = [Vec4::ZERO; 8];
        for (i, c) in clip.iter_mut().enumerate() {
            *c = view_proj * self.corner(i).extend(1.0);
        }

        if clip.iter().all(|c| c.x < -c.w) {
            return false;
        }
        if clip.iter().all(|c| c.x > c.w) {
            return false;
        }
        if clip.iter().all(|c| c.y < -c.w) {
            return false;
        }
        if clip.iter().all(|c| c.y > c.w) {
            return false;
        }
        if clip.iter().all(|c| c.z < 0.0) {
            return false;
        }
        if clip.iter().all(|c| c.z > c.w) {
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_view_proj() -> Mat4 {
        let proj = Mat4::perspective_rh(45f32.to_radians(), 16.0 / 9.0, 0.1, 1000.0);
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        proj * view
    }

    #[test]
    fn box_in_front_of_camera_intersects() {
        let vp = test_view_proj();
        assert!(Aabb::around(Vec3::new(0.0, 0.0, -10.0), 1.0).intersects_clip_space(vp));
    }

    #[test]
    fn box_behind_camera_is_rejected() {
        let vp = test_view_proj();
        assert!(!Aabb::around(Vec3::new(0.0, 0.0, 10.0), 1.0).intersects_clip_space(vp));
    }

    #[test]
    fn box_far_to_the_side_is_rejected() {
        let vp = test_view_proj();
        assert!(!Aabb::around(Vec3::new(500.0, 0.0, -10.0), 1.0).intersects_clip_space(vp));
    }

    #[test]
    fn box_straddling_a_frustum_plane_is_kept() {
        let vp = test_view_proj();
        // Straddles the near plane; conservative culling must keep it.
        assert!(Aabb::around(Vec3::new(0.0, 0.0, -0.1), 1.0).intersects_clip_space(vp));
    }

    #[test]
    fn corners_enumerate_both_extremes() {
        let aabb = Aabb::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(2.0, 2.0, 2.0));
        assert_eq!(aabb.corner(0), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(aabb.corner(7), Vec3::new(3.0, 4.0, 5.0));
    }
}
