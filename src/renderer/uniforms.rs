// renderer/uniforms.rs
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Per-frame transform block shared by every vertex shader.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct GlobalTransforms {
    pub vp: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub view_nt: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub inv_vp: [[f32; 4]; 4],
    pub inv_view: [[f32; 4]; 4],
    pub inv_view_nt: [[f32; 4]; 4],
    pub inv_proj: [[f32; 4]; 4],
    pub camera_pos: [f32; 4],
}

impl GlobalTransforms {
    /// Derives the full block from the projection, the camera view and the
    /// translation-free view used by the skybox.
    pub fn from_camera(proj: Mat4, view: Mat4, view_nt: Mat4, camera_pos: Vec3) -> Self {
        let vp = proj * view;
        Self {
            vp: vp.to_cols_array_2d(),
            view: view.to_cols_array_2d(),
            view_nt: view_nt.to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
            inv_vp: vp.inverse().to_cols_array_2d(),
            inv_view: view.inverse().to_cols_array_2d(),
            inv_view_nt: view_nt.inverse().to_cols_array_2d(),
            inv_proj: proj.inverse().to_cols_array_2d(),
            camera_pos: [camera_pos.x, camera_pos.y, camera_pos.z, 0.0],
        }
    }

    pub fn view_proj(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.vp)
    }
}

impl Default for GlobalTransforms {
    fn default() -> Self {
        Self::from_camera(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY, Vec3::ZERO)
    }
}

/// Per-frame lighting block for the fragment stage.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, PartialEq, Debug)]
pub struct GlobalFragmentData {
    pub camera_pos: [f32; 4],
    pub light_pos: [f32; 4],
    pub light_color: [f32; 4],
    pub light_ambient: [f32; 4],
}

impl Default for GlobalFragmentData {
    fn default() -> Self {
        Self {
            camera_pos: [0.0; 4],
            light_pos: [50.0, 50.0, 0.0, 1.0],
            light_color: [1.0; 4],
            light_ambient: [0.2; 4],
        }
    }
}
