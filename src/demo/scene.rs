//! The instanced box field and the scene that feeds it through the queue.

use std::rc::Rc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use wgpu::util::DeviceExt;

use crate::demo::{GROUP_GLOBALS, GROUP_MATERIAL, GROUP_MODEL};
use crate::renderer::instances::{chunk_ranges, cull_blocks, depth_sort_blocks};
use crate::renderer::texture::{trilinear_clamp_sampler, white_texture};
use crate::renderer::{
    box_mesh, Aabb, FrameContext, GlobalDefines, Gpu, InstanceBlock, InstanceBuffer,
    PipelineRecipe, RenderQueue, Renderable, SamplerBinding, Shader, ShaderError,
    UniformBufferBinding, Vertex,
};

// Lattice of box positions: every 4 units along each axis, inclusive.
const FIELD_MIN: i32 = -100;
const FIELD_MAX: i32 = 100;
const FIELD_STEP: usize = 4;

fn field_blocks() -> Vec<InstanceBlock> {
    let axis = || (FIELD_MIN..=FIELD_MAX).step_by(FIELD_STEP);
    let mut blocks = Vec::new();
    for z in axis() {
        for y in axis() {
            for x in axis() {
                blocks.push(InstanceBlock::at(x as f32, y as f32, z as f32));
            }
        }
    }
    blocks
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct MaterialData {
    ambient: [f32; 4],
    diffuse: [f32; 4],
    specular: [f32; 4],
    // x holds the specular exponent.
    params: [f32; 4],
}

pub struct Scene {
    field: BoxField,
}

impl Scene {
    pub fn new(gpu: &Gpu, defines: Rc<GlobalDefines>) -> Result<Self, ShaderError> {
        Ok(Self {
            field: BoxField::new(gpu, defines)?,
        })
    }

    /// Layout the frame's global uniforms bind group is built against.
    pub fn globals_layout(&self) -> &wgpu::BindGroupLayout {
        self.field.shader.bind_layout(GROUP_GLOBALS)
    }

    pub fn invalidate(&mut self) {
        self.field.shader.invalidate();
    }

    /// Runs the full queue protocol over the scene's drawables.
    pub fn render(&mut self, view_proj: Mat4, ctx: &mut FrameContext<'_, '_>) {
        self.field.view_proj = view_proj;

        let mut queue = RenderQueue::new();
        queue.set_view_proj(view_proj);
        queue.begin();
        queue.push(&mut self.field);
        queue.end();
        queue.render(ctx);
    }
}

/// The 51x51x51 grid of unit boxes, drawn instanced in depth-sorted chunks.
struct BoxField {
    shader: Shader,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
    material_group: wgpu::BindGroup,
    texture_group: wgpu::BindGroup,
    instances: InstanceBuffer,
    blocks: Vec<InstanceBlock>,
    visible: Vec<InstanceBlock>,
    aabb: Aabb,
    use_diffuse: bool,
    view_proj: Mat4,
    cache_depth: f32,
}

impl BoxField {
    fn new(gpu: &Gpu, defines: Rc<GlobalDefines>) -> Result<Self, ShaderError> {
        let device = gpu.device();

        let mut shader = Shader::new("BoxField", defines);
        shader.set_samplers(vec![SamplerBinding {
            name: "diffuse_tex",
            unit: 0,
            dimension: wgpu::TextureViewDimension::D2,
        }]);
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
            UniformBufferBinding {
                name: "model",
                group: GROUP_MODEL,
                binding: 0,
                stages: wgpu::ShaderStages::VERTEX,
                dynamic: true,
            },
            UniformBufferBinding {
                name: "material",
                group: GROUP_MATERIAL,
                binding: 0,
                stages: wgpu::ShaderStages::FRAGMENT,
                dynamic: false,
            },
        ]);
        shader.reserve_define("DIFFUSE_MAP", 1)?;
        shader.reserve_define("INSTANCED", 1)?;
        shader.init(
            device,
            include_str!("../shaders/generic.wgsl"),
            PipelineRecipe {
                vertex_layouts: vec![Vertex::layout()],
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: Some(wgpu::Face::Back),
                color_format: gpu.surface_format(),
                depth_format: Some(gpu.depth_format()),
                depth_write: true,
                depth_compare: wgpu::CompareFunction::LessEqual,
            },
        )?;

        let (vertices, indices) = box_mesh();
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("BoxVertices"),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("BoxIndices"),
            contents: bytemuck::cast_slice(&indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        let material = MaterialData {
            ambient: [1.0, 1.0, 1.0, 1.0],
            diffuse: [0.8, 0.85, 0.9, 1.0],
            specular: [0.3, 0.3, 0.3, 1.0],
            params: [32.0, 0.0, 0.0, 0.0],
        };
        let material_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("BoxMaterial"),
            contents: bytemuck::bytes_of(&material),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let material_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("BoxMaterial"),
            layout: shader.bind_layout(GROUP_MATERIAL),
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: material_buffer.as_entire_binding(),
            }],
        });

        // No diffuse asset ships with the demo; a white 1x1 keeps the
        // texture group valid for every permutation.
        let white = white_texture(device, gpu.queue());
        let sampler = trilinear_clamp_sampler(device);
        let texture_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("BoxDiffuse"),
            layout: shader.bind_layout(shader.sampler_group()),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&white),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
        });

        let blocks = field_blocks();
        let instances = InstanceBuffer::new(
            device,
            shader.bind_layout(GROUP_MODEL),
            "BoxFieldInstances",
            blocks.len(),
        );

        let half = (FIELD_MAX - FIELD_MIN) as f32 / 2.0 + 1.0;
        let aabb = Aabb::around(Vec3::ZERO, half);

        Ok(Self {
            shader,
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
            material_group,
            texture_group,
            instances,
            blocks,
            visible: Vec::new(),
            aabb,
            use_diffuse: false,
            view_proj: Mat4::IDENTITY,
            cache_depth: 0.0,
        })
    }

    fn draw(&mut self, ctx: &mut FrameContext<'_, '_>) -> Result<(), ShaderError> {
        cull_blocks(&self.blocks, self.view_proj, &mut self.visible);
        if self.visible.is_empty() {
            return Ok(());
        }
        depth_sort_blocks(&mut self.visible, self.view_proj);
        log::debug!(
            "box field: {} of {} instances visible",
            self.visible.len(),
            self.blocks.len()
        );

        self.shader.set_define("INSTANCED", 1)?;
        self.shader.set_define("DIFFUSE_MAP", self.use_diffuse as u32)?;
        self.shader.bind(ctx.device, ctx.pass)?;

        ctx.pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        ctx.pass
            .set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
        ctx.pass
            .set_bind_group(GROUP_MATERIAL, &self.material_group, &[]);
        ctx.pass
            .set_bind_group(self.shader.sampler_group(), &self.texture_group, &[]);

        for (chunk, range) in chunk_ranges(self.visible.len()).enumerate() {
            let chunk = chunk as u32;
            // A failed upload keeps the chunk's previous contents; still
            // drawn rather than dropping the rest of the frame.
            self.instances
                .write_chunk(ctx.queue, chunk, &self.visible[range.clone()]);
            self.instances.bind(ctx.pass, GROUP_MODEL, chunk);
            ctx.pass
                .draw_indexed(0..self.index_count, 0, 0..range.len() as u32);
        }

        self.shader.unbind();
        Ok(())
    }
}

impl Renderable for BoxField {
    fn aabb(&self) -> &Aabb {
        &self.aabb
    }

    fn model_transform(&self) -> Vec4 {
        Vec4::new(0.0, 0.0, 0.0, 1.0)
    }

    fn set_cache_depth(&mut self, depth: f32) {
        self.cache_depth = depth;
    }

    fn cache_depth(&self) -> f32 {
        self.cache_depth
    }

    fn compare_less(&self, other: &dyn Renderable) -> bool {
        if std::ptr::eq(self as *const _ as *const (), other as *const _ as *const ()) {
            return false;
        }
        // Every drawable in this scene shares one shader and material, so
        // depth alone decides the order.
        self.cache_depth < other.cache_depth()
    }

    fn render(&mut self, ctx: &mut FrameContext<'_, '_>) {
        if let Err(err) = self.draw(ctx) {
            log::error!("box field draw failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_has_51_cubed_blocks() {
        assert_eq!(field_blocks().len(), 51 * 51 * 51);
    }

    #[test]
    fn field_blocks_sit_on_the_step_4_lattice() {
        for block in field_blocks() {
            let pos = block.position();
            for c in [pos.x, pos.y, pos.z] {
                assert!(c >= FIELD_MIN as f32 && c <= FIELD_MAX as f32);
                assert_eq!((c as i32 - FIELD_MIN) % FIELD_STEP as i32, 0);
            }
            assert_eq!(pos.w, 1.0);
        }
    }

    #[test]
    fn field_aabb_encloses_every_block_with_margin() {
        let half = (FIELD_MAX - FIELD_MIN) as f32 / 2.0 + 1.0;
        // Unit boxes extend 0.5 past their centers; the bound leaves room.
        for block in field_blocks() {
            let pos = block.position();
            for c in [pos.x, pos.y, pos.z] {
                assert!(c.abs() + 0.5 <= half, "{:?} escapes the field bound", pos);
            }
        }
    }
}
