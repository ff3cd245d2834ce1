//! Cube-map skybox drawn as a fullscreen strip at the far plane.

use std::mem;
use std::path::Path;
use std::rc::Rc;

use wgpu::util::DeviceExt;

use crate::demo::GROUP_GLOBALS;
use crate::renderer::texture::CubeMap;
use crate::renderer::{
    FrameContext, GlobalDefines, Gpu, PipelineRecipe, SamplerBinding, Shader, ShaderError,
    UniformBufferBinding,
};

const QUAD: [[f32; 2]; 4] = [[-1.0, -1.0], [1.0, -1.0], [-1.0, 1.0], [1.0, 1.0]];

const SKY_ATTRS: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x2];

fn sky_vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &SKY_ATTRS,
    }
}

pub struct Sky {
    shader: Shader,
    vertex_buffer: wgpu::Buffer,
    cube_group: wgpu::BindGroup,
}

impl Sky {
    pub fn new(gpu: &Gpu, defines: Rc<GlobalDefines>) -> Result<Self, ShaderError> {
        let device = gpu.device();

        let mut shader = Shader::new("Sky", defines);
        shader.set_samplers(vec![SamplerBinding {
            name: "sky_tex",
            unit: 0,
            dimension: wgpu::TextureViewDimension::Cube,
        }]);
        // Group 0 matches the scene shader's globals so the frame's bind
        // group carries over across the pipeline switch.
        shader.set_uniform_buffers(vec![
            UniformBufferBinding {
                name: "global",
                group: GROUP_GLOBALS,
                binding: 0,
                stages: wgpu::ShaderStages::VERTEX_FRAGMENT,
                dynamic: false,
            },
            UniformBufferBinding {
                name: "global_frag",
                group: GROUP_GLOBALS,
                binding: 1,
                stages: wgpu::ShaderStages::FRAGMENT,
                dynamic: false,
            },
        ]);
        shader.init(
            device,
            include_str!("../shaders/skybox.wgsl"),
            PipelineRecipe {
                vertex_layouts: vec![sky_vertex_layout()],
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                cull_mode: None,
                color_format: gpu.surface_format(),
                depth_format: Some(gpu.depth_format()),
                depth_write: false,
                depth_compare: wgpu::CompareFunction::LessEqual,
            },
        )?;

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("SkyQuad"),
            contents: bytemuck::cast_slice(&QUAD),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let cube = load_cube_map(device, gpu.queue());
        let cube_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("SkyCube"),
            layout: shader.bind_layout(shader.sampler_group()),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&cube.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&cube.sampler),
                },
            ],
        });

        Ok(Self {
            shader,
            vertex_buffer,
            cube_group,
        })
    }

    pub fn invalidate(&mut self) {
        self.shader.invalidate();
    }

    pub fn render(&mut self, ctx: &mut FrameContext<'_, '_>) {
        if let Err(err) = self.draw(ctx) {
            log::error!("sky draw failed: {}", err);
        }
    }

    fn draw(&mut self, ctx: &mut FrameContext<'_, '_>) -> Result<(), ShaderError> {
        self.shader.bind(ctx.device, ctx.pass)?;
        ctx.pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        ctx.pass
            .set_bind_group(self.shader.sampler_group(), &self.cube_group, &[]);
        ctx.pass.draw(0..QUAD.len() as u32, 0..1);
        self.shader.unbind();
        Ok(())
    }
}

fn load_cube_map(device: &wgpu::Device, queue: &wgpu::Queue) -> CubeMap {
    let paths = [
        Path::new("assets/sky/xpos.png"),
        Path::new("assets/sky/xneg.png"),
        Path::new("assets/sky/ypos.png"),
        Path::new("assets/sky/yneg.png"),
        Path::new("assets/sky/zpos.png"),
        Path::new("assets/sky/zneg.png"),
    ];
    match CubeMap::load(device, queue, &paths) {
        Ok(cube) => cube,
        Err(err) => {
            log::warn!("sky cube map unavailable ({}), using a solid color", err);
            CubeMap::solid(device, queue, [96, 132, 180, 255])
        }
    }
}
