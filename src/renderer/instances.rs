//! Instance culling, depth ordering and fixed-size batching.
//!
//! A drawable keeps its full instance set for the lifetime of the scene and
//! filters it each frame into a reusable scratch list: cull against the
//! clip-space frustum, sort nearest first, then upload and draw in chunks
//! of at most [`MAX_INSTANCES`].

use std::cmp::Ordering;
use std::mem;
use std::ops::Range;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

use crate::renderer::cull::Aabb;

/// Instancing limit baked into the shader's fixed-size uniform array.
pub const MAX_INSTANCES: usize = 64;

/// Byte stride of one chunk inside the instance buffer. A multiple of the
/// 256-byte dynamic-offset alignment wgpu requires.
pub const CHUNK_STRIDE: u64 = (MAX_INSTANCES * mem::size_of::<InstanceBlock>()) as u64;

/// One per-instance transform record: a homogeneous position.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceBlock {
    pub model: [f32; 4],
}

impl InstanceBlock {
    pub fn at(x: f32, y: f32, z: f32) -> Self {
        Self {
            model: [x, y, z, 1.0],
        }
    }

    pub fn position(&self) -> Vec4 {
        Vec4::from_array(self.model)
    }
}

/// Post-projective depth proxy. Monotonic with view distance under a
/// perspective projection; kept as `z + w` rather than a true distance
/// because the batching order downstream depends on it.
pub fn clip_depth(view_proj: Mat4, block: &InstanceBlock) -> f32 {
    let clip = view_proj * block.position();
    clip.z + clip.w
}

/// Filters `blocks` into `out`, keeping every instance whose unit-half-
/// extent box around its position touches the clip-space frustum. Linear
/// scan over the full set; per-drawable instance counts are small enough
/// that a spatial index would not pay for itself.
pub fn cull_blocks(blocks: &[InstanceBlock], view_proj: Mat4, out: &mut Vec<InstanceBlock>) {
    out.clear();
    out.extend(blocks.iter().copied().filter(|block| {
        Aabb::around(block.position().truncate(), 1.0).intersects_clip_space(view_proj)
    }));
}

/// Sorts instances nearest first under [`clip_depth`].
pub fn depth_sort_blocks(blocks: &mut [InstanceBlock], view_proj: Mat4) {
    blocks.sort_by(|a, b| {
        clip_depth(view_proj, a)
            .partial_cmp(&clip_depth(view_proj, b))
            .unwrap_or(Ordering::Equal)
    });
}

/// Contiguous index ranges of at most [`MAX_INSTANCES`] covering `0..len`.
/// Yields nothing for `len == 0` and no empty trailing range on an exact
/// boundary.
pub fn chunk_ranges(len: usize) -> impl Iterator<Item = Range<usize>> {
    (0..len)
        .step_by(MAX_INSTANCES)
        .map(move |start| start..(start + MAX_INSTANCES).min(len))
}

/// Write-only uniform buffer holding per-frame instance chunks at fixed
/// dynamic offsets. Each chunk is written once per frame before any draw
/// that binds it.
pub struct InstanceBuffer {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    chunk_capacity: u32,
}

impl InstanceBuffer {
    /// Sizes the buffer for up to `capacity` instances, rounded up to whole
    /// chunks. `layout` is the shader's dynamic-uniform bind group layout.
    pub fn new(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        label: &str,
        capacity: usize,
    ) -> Self {
        let chunk_capacity = capacity.div_ceil(MAX_INSTANCES).max(1) as u32;
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: chunk_capacity as u64 * CHUNK_STRIDE,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(CHUNK_STRIDE),
                }),
            }],
        });

        Self {
            buffer,
            bind_group,
            chunk_capacity,
        }
    }

    pub fn chunk_capacity(&self) -> u32 {
        self.chunk_capacity
    }

    /// Writes one chunk through a staging view that flushes when it drops.
    /// Returns false when the transient mapping fails; the chunk keeps last
    /// frame's contents and the caller draws anyway rather than aborting
    /// the frame.
    pub fn write_chunk(&self, queue: &wgpu::Queue, chunk: u32, data: &[InstanceBlock]) -> bool {
        debug_assert!(!data.is_empty() && data.len() <= MAX_INSTANCES);
        debug_assert!(chunk < self.chunk_capacity);

        let bytes: &[u8] = bytemuck::cast_slice(data);
        let size = match wgpu::BufferSize::new(bytes.len() as u64) {
            Some(size) => size,
            None => return false,
        };

        match queue.write_buffer_with(&self.buffer, chunk as u64 * CHUNK_STRIDE, size) {
            Some(mut view) => {
                view.copy_from_slice(bytes);
                true
            }
            None => {
                log::warn!("instance upload skipped for chunk {}", chunk);
                false
            }
        }
    }

    /// Binds the chunk for the next draw via its dynamic offset.
    pub fn bind(&self, pass: &mut wgpu::RenderPass<'_>, group: u32, chunk: u32) {
        pass.set_bind_group(group, &self.bind_group, &[chunk * CHUNK_STRIDE as u32]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn test_view_proj() -> Mat4 {
        let proj = Mat4::perspective_rh(45f32.to_radians(), 16.0 / 9.0, 0.1, 1000.0);
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        proj * view
    }

    #[test]
    fn chunk_stride_is_dynamic_offset_aligned() {
        assert_eq!(CHUNK_STRIDE % 256, 0);
    }

    #[test]
    fn chunk_ranges_cover_everything_once() {
        for len in [0, 1, MAX_INSTANCES - 1, MAX_INSTANCES, MAX_INSTANCES + 1, 1000] {
            let ranges: Vec<_> = chunk_ranges(len).collect();
            let total: usize = ranges.iter().map(|r| r.len()).sum();
            assert_eq!(total, len, "len {}", len);
            assert!(
                ranges.iter().all(|r| !r.is_empty() && r.len() <= MAX_INSTANCES),
                "len {}",
                len
            );
            for pair in ranges.windows(2) {
                assert_eq!(pair[0].end, pair[1].start);
            }
        }
    }

    #[test]
    fn zero_instances_yield_zero_chunks() {
        assert_eq!(chunk_ranges(0).count(), 0);
    }

    #[test]
    fn exact_boundary_yields_one_full_chunk() {
        let ranges: Vec<_> = chunk_ranges(MAX_INSTANCES).collect();
        assert_eq!(ranges, vec![0..MAX_INSTANCES]);
    }

    #[test]
    fn one_past_boundary_yields_full_chunk_plus_one() {
        let ranges: Vec<_> = chunk_ranges(MAX_INSTANCES + 1).collect();
        assert_eq!(
            ranges,
            vec![0..MAX_INSTANCES, MAX_INSTANCES..MAX_INSTANCES + 1]
        );
    }

    #[test]
    fn culling_keeps_visible_and_drops_hidden() {
        let vp = test_view_proj();
        let blocks = vec![
            InstanceBlock::at(0.0, 0.0, -10.0),  // straight ahead
            InstanceBlock::at(0.0, 0.0, 50.0),   // behind the camera
            InstanceBlock::at(800.0, 0.0, -10.0), // far off to the side
        ];

        let mut culled = Vec::new();
        cull_blocks(&blocks, vp, &mut culled);

        assert_eq!(culled, vec![InstanceBlock::at(0.0, 0.0, -10.0)]);
    }

    #[test]
    fn culled_set_is_subset_of_input() {
        let vp = test_view_proj();
        let mut blocks = Vec::new();
        for z in (-100..=100).step_by(10) {
            for x in (-100..=100).step_by(10) {
                blocks.push(InstanceBlock::at(x as f32, 0.0, z as f32));
            }
        }

        let mut culled = Vec::new();
        cull_blocks(&blocks, vp, &mut culled);

        assert!(culled.len() <= blocks.len());
        assert!(culled.iter().all(|c| blocks.contains(c)));
    }

    #[test]
    fn instance_in_front_of_camera_is_always_retained() {
        let vp = test_view_proj();
        let focal = vec![InstanceBlock::at(0.0, 0.0, -1.0)];
        let mut culled = Vec::new();
        cull_blocks(&focal, vp, &mut culled);
        assert_eq!(culled.len(), 1);
    }

    #[test]
    fn depth_sort_is_monotonic_in_z_plus_w() {
        let vp = test_view_proj();
        let mut blocks = vec![
            InstanceBlock::at(0.0, 0.0, -90.0),
            InstanceBlock::at(1.0, 0.0, -5.0),
            InstanceBlock::at(-2.0, 1.0, -40.0),
            InstanceBlock::at(0.0, -1.0, -15.0),
        ];

        depth_sort_blocks(&mut blocks, vp);

        let depths: Vec<f32> = blocks.iter().map(|b| clip_depth(vp, b)).collect();
        assert!(depths.windows(2).all(|w| w[0] <= w[1]), "{:?}", depths);
    }

    #[test]
    fn scratch_list_is_reused_not_reallocated() {
        let vp = test_view_proj();
        let blocks = vec![InstanceBlock::at(0.0, 0.0, -10.0)];
        let mut culled = Vec::with_capacity(64);
        let cap = culled.capacity();

        for _ in 0..4 {
            cull_blocks(&blocks, vp, &mut culled);
        }
        assert_eq!(culled.capacity(), cap);
    }
}
