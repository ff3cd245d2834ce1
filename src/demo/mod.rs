//! The boxes demo: a 51x51x51 field of instanced cubes under a skybox,
//! flown through with a free camera.

mod scene;
mod sky;

use glam::{Mat4, Vec3, Vec4};
use wgpu::util::DeviceExt;

use crate::host::{Analog, Application, AvInfo, Buttons, InputState, Resolution, SystemInfo};
use crate::renderer::{
    FrameContext, GlobalDefines, GlobalFragmentData, GlobalTransforms, Gpu,
};
use scene::Scene;
use sky::Sky;

// Bind group indices shared by every shader in the demo.
pub(crate) const GROUP_GLOBALS: u32 = 0;
pub(crate) const GROUP_MODEL: u32 = 1;
pub(crate) const GROUP_MATERIAL: u32 = 2;

struct Gfx {
    globals: GlobalBuffers,
    scene: Scene,
    sky: Sky,
}

pub struct BoxesApp {
    width: u32,
    height: u32,
    view_deg_x: f32,
    view_deg_y: f32,
    player_pos: Vec3,
    look_dir: Vec3,
    transforms: GlobalTransforms,
    fragment: GlobalFragmentData,
    gfx: Option<Gfx>,
}

impl BoxesApp {
    pub fn new() -> Self {
        Self {
            width: 0,
            height: 0,
            view_deg_x: 0.0,
            view_deg_y: 0.0,
            player_pos: Vec3::ZERO,
            look_dir: Vec3::NEG_Z,
            transforms: GlobalTransforms::default(),
            fragment: GlobalFragmentData::default(),
            gfx: None,
        }
    }

    fn update_input(&mut self, delta: f32, analog: &Analog, pressed: Buttons) {
        self.view_deg_y += analog.rx * -120.0 * delta;
        self.view_deg_x = (self.view_deg_x + analog.ry * -90.0 * delta).clamp(-80.0, 80.0);

        let rot_x = Mat4::from_rotation_x(self.view_deg_x.to_radians());
        let rot_y = Mat4::from_rotation_y(self.view_deg_y.to_radians());
        let rot_y_right = Mat4::from_rotation_y((self.view_deg_y - 90.0).to_radians());

        self.look_dir = (rot_y * rot_x * Vec4::new(0.0, 0.0, -1.0, 1.0)).truncate();
        let right_dir = (rot_y_right * Vec4::new(0.0, 0.0, -1.0, 1.0)).truncate();

        let speed = if pressed.contains(Buttons::R) {
            240.0
        } else {
            120.0
        };
        let velocity = self.look_dir * (analog.y * -0.25) + right_dir * (analog.x * 0.25);
        self.player_pos += velocity * speed * delta;

        self.update_global_data();
    }

    fn update_global_data(&mut self) {
        let aspect = self.width.max(1) as f32 / self.height.max(1) as f32;
        let proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 1000.0);
        let view = Mat4::look_at_rh(self.player_pos, self.player_pos + self.look_dir, Vec3::Y);
        let view_nt = Mat4::look_at_rh(Vec3::ZERO, self.look_dir, Vec3::Y);

        self.transforms = GlobalTransforms::from_camera(proj, view, view_nt, self.player_pos);
        self.fragment = GlobalFragmentData {
            camera_pos: [self.player_pos.x, self.player_pos.y, self.player_pos.z, 0.0],
            ..GlobalFragmentData::default()
        };
    }
}

impl Default for BoxesApp {
    fn default() -> Self {
        Self::new()
    }
}

impl Application for BoxesApp {
    fn system_info(&self) -> SystemInfo {
        SystemInfo {
            name: "ModelView",
            short_name: "modelview",
            version: "v1",
        }
    }

    fn av_info(&self) -> AvInfo {
        AvInfo {
            fps: 60.0,
            base: Resolution {
                width: 320,
                height: 180,
            },
            max: Resolution {
                width: 1920,
                height: 1080,
            },
            aspect: 16.0 / 9.0,
        }
    }

    fn resolutions(&self) -> Vec<Resolution> {
        [(320, 180), (640, 360), (1280, 720), (1920, 1080)]
            .into_iter()
            .map(|(width, height)| Resolution { width, height })
            .collect()
    }

    fn load(&mut self, gpu: &Gpu) -> Result<(), String> {
        let defines = GlobalDefines::new();

        let scene = Scene::new(gpu, defines.clone()).map_err(|e| e.to_string())?;
        let globals = GlobalBuffers::new(gpu.device(), scene.globals_layout());
        let sky = Sky::new(gpu, defines).map_err(|e| e.to_string())?;

        self.gfx = Some(Gfx {
            globals,
            scene,
            sky,
        });
        self.update_global_data();
        Ok(())
    }

    fn viewport_changed(&mut self, resolution: Resolution) {
        self.width = resolution.width;
        self.height = resolution.height;
        self.update_global_data();
    }

    fn context_reset(&mut self) {
        if let Some(gfx) = self.gfx.as_mut() {
            gfx.scene.invalidate();
            gfx.sky.invalidate();
        }
    }

    fn run(
        &mut self,
        delta: f32,
        input: &InputState,
        gpu: &mut Gpu,
    ) -> Result<(), wgpu::SurfaceError> {
        let analog = deadzone(input.analog);
        self.update_input(delta, &analog, input.pressed);

        let Some(gfx) = self.gfx.as_mut() else {
            return Ok(());
        };

        gfx.globals
            .update(gpu.queue(), &self.transforms, &self.fragment);

        let mut frame = gpu.begin_frame()?;
        {
            let mut pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("MainPass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &frame.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: 0.3,
                            g: 0.3,
                            b: 0.3,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: gpu.depth_view(),
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Discard,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            pass.set_bind_group(GROUP_GLOBALS, &gfx.globals.bind_group, &[]);

            let view_proj = self.transforms.view_proj();
            let mut ctx = FrameContext {
                device: gpu.device(),
                queue: gpu.queue(),
                pass: &mut pass,
            };
            gfx.scene.render(view_proj, &mut ctx);
            gfx.sky.render(&mut ctx);
        }
        gpu.finish_frame(frame);
        Ok(())
    }
}

/// 0.3 radial deadzone per axis, as the original frontend applied.
fn deadzone(analog: Analog) -> Analog {
    let zone = |v: f32| if v.abs() < 0.3 { 0.0 } else { v };
    Analog {
        x: zone(analog.x),
        y: zone(analog.y),
        rx: zone(analog.rx),
        ry: zone(analog.ry),
    }
}

/// The two per-frame global uniform buffers, bound together as one group.
struct GlobalBuffers {
    vertex: wgpu::Buffer,
    fragment: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

impl GlobalBuffers {
    fn new(device: &wgpu::Device, layout: &wgpu::BindGroupLayout) -> Self {
        let vertex = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("GlobalTransforms"),
            contents: bytemuck::bytes_of(&GlobalTransforms::default()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let fragment = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("GlobalFragmentData"),
            contents: bytemuck::bytes_of(&GlobalFragmentData::default()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("GlobalsBindGroup"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: vertex.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: fragment.as_entire_binding(),
                },
            ],
        });

        Self {
            vertex,
            fragment,
            bind_group,
        }
    }

    /// Refreshes both blocks through guarded write views. A failed mapping
    /// leaves last frame's values in place.
    fn update(
        &self,
        queue: &wgpu::Queue,
        transforms: &GlobalTransforms,
        fragment: &GlobalFragmentData,
    ) {
        write_guarded(queue, &self.vertex, bytemuck::bytes_of(transforms));
        write_guarded(queue, &self.fragment, bytemuck::bytes_of(fragment));
    }
}

fn write_guarded(queue: &wgpu::Queue, buffer: &wgpu::Buffer, bytes: &[u8]) {
    let Some(size) = wgpu::BufferSize::new(bytes.len() as u64) else {
        return;
    };
    match queue.write_buffer_with(buffer, 0, size) {
        Some(mut view) => view.copy_from_slice(bytes),
        None => log::warn!("global uniform upload skipped this frame"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadzone_zeroes_small_axes_only() {
        let analog = Analog {
            x: 0.2,
            y: -0.29,
            rx: 0.31,
            ry: -1.0,
        };
        let filtered = deadzone(analog);
        assert_eq!(filtered.x, 0.0);
        assert_eq!(filtered.y, 0.0);
        assert_eq!(filtered.rx, 0.31);
        assert_eq!(filtered.ry, -1.0);
    }

    #[test]
    fn neutral_view_looks_down_negative_z() {
        let mut app = BoxesApp::new();
        app.update_input(0.016, &Analog::default(), Buttons::empty());
        assert!(app.look_dir.abs_diff_eq(Vec3::NEG_Z, 1e-6));
    }

    #[test]
    fn pitch_is_clamped_to_80_degrees() {
        let mut app = BoxesApp::new();
        let look_up = Analog {
            ry: -1.0,
            ..Analog::default()
        };
        // Hold the stick far longer than needed to hit the clamp.
        for _ in 0..1000 {
            app.update_input(0.016, &look_up, Buttons::empty());
        }
        assert_eq!(app.view_deg_x, 80.0);
    }

    #[test]
    fn sprint_button_doubles_speed() {
        let forward = Analog {
            y: -1.0,
            ..Analog::default()
        };

        let mut walk = BoxesApp::new();
        walk.update_input(1.0, &forward, Buttons::empty());
        let mut sprint = BoxesApp::new();
        sprint.update_input(1.0, &forward, Buttons::R);

        assert!(sprint.player_pos.length() > walk.player_pos.length() * 1.9);
    }
}
