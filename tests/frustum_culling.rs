//! Culling, depth ordering and chunking over a realistic instance field.
//!
//! Conventions used in this codebase:
//! - Right-handed view space (camera looks down -Z).
//! - Clip/NDC depth range is [0, 1] (wgpu/D3D). Near -> 0, Far -> 1.
//! - The depth key is the post-projective proxy `clip.z + clip.w`.

use glam::{Mat4, Vec3};

use modelview::renderer::instances::{
    chunk_ranges, clip_depth, cull_blocks, depth_sort_blocks, MAX_INSTANCES,
};
use modelview::renderer::{Aabb, InstanceBlock};

fn view_proj(eye: Vec3, target: Vec3) -> Mat4 {
    let proj = Mat4::perspective_rh(45f32.to_radians(), 16.0 / 9.0, 0.1, 1000.0);
    let view = Mat4::look_at_rh(eye, target, Vec3::Y);
    proj * view
}

/// A small slab of the demo's lattice, enough to span several chunks.
fn lattice() -> Vec<InstanceBlock> {
    let mut blocks = Vec::new();
    for z in (-100..=100).step_by(4) {
        for x in (-100..=100).step_by(4) {
            blocks.push(InstanceBlock::at(x as f32, 0.0, z as f32));
        }
    }
    blocks
}

#[test]
fn camera_inside_the_field_sees_a_proper_subset() {
    let vp = view_proj(Vec3::new(0.0, 0.0, 0.0), Vec3::new(0.0, 0.0, -1.0));
    let blocks = lattice();

    let mut visible = Vec::new();
    cull_blocks(&blocks, vp, &mut visible);

    // Everything behind the camera is gone, the block ahead survives.
    assert!(!visible.is_empty());
    assert!(visible.len() < blocks.len());
    assert!(visible.contains(&InstanceBlock::at(0.0, 0.0, -4.0)));
    assert!(!visible.contains(&InstanceBlock::at(0.0, 0.0, 100.0)));
}

#[test]
fn culling_is_conservative_near_frustum_edges() {
    let vp = view_proj(Vec3::ZERO, Vec3::NEG_Z);

    // A unit box straddling the near plane must not be rejected.
    let straddling = Aabb::around(Vec3::new(0.0, 0.0, -0.05), 1.0);
    assert!(straddling.intersects_clip_space(vp));

    // Far off to one side every corner fails the same plane.
    let outside = Aabb::around(Vec3::new(500.0, 0.0, -5.0), 1.0);
    assert!(!outside.intersects_clip_space(vp));
}

#[test]
fn turning_the_camera_changes_the_visible_set() {
    let blocks = lattice();
    let forward = view_proj(Vec3::ZERO, Vec3::NEG_Z);
    let backward = view_proj(Vec3::ZERO, Vec3::Z);

    let mut ahead = Vec::new();
    let mut behind = Vec::new();
    cull_blocks(&blocks, forward, &mut ahead);
    cull_blocks(&blocks, backward, &mut behind);

    // The two views share at most the blocks around the camera itself.
    let overlap = ahead.iter().filter(|b| behind.contains(b)).count();
    assert!(overlap < ahead.len().min(behind.len()) / 4);
}

#[test]
fn sorted_chunks_are_depth_monotonic_end_to_end() {
    let vp = view_proj(Vec3::new(0.0, 2.0, 30.0), Vec3::ZERO);
    let blocks = lattice();

    let mut visible = Vec::new();
    cull_blocks(&blocks, vp, &mut visible);
    depth_sort_blocks(&mut visible, vp);
    assert!(visible.len() > MAX_INSTANCES, "scenario should span chunks");

    // Every block in an earlier chunk is at most as deep as every block in
    // a later one, so near geometry lands in the first uploads.
    let ranges: Vec<_> = chunk_ranges(visible.len()).collect();
    for pair in ranges.windows(2) {
        let first_max = visible[pair[0].clone()]
            .iter()
            .map(|b| clip_depth(vp, b))
            .fold(f32::MIN, f32::max);
        let second_min = visible[pair[1].clone()]
            .iter()
            .map(|b| clip_depth(vp, b))
            .fold(f32::MAX, f32::min);
        assert!(first_max <= second_min);
    }
}

#[test]
fn chunking_never_exceeds_the_uniform_array_size() {
    for len in [1, MAX_INSTANCES, MAX_INSTANCES + 1, 5 * MAX_INSTANCES + 17] {
        let mut covered = 0;
        for range in chunk_ranges(len) {
            assert!(range.len() <= MAX_INSTANCES);
            assert_eq!(range.start, covered);
            covered = range.end;
        }
        assert_eq!(covered, len);
    }
}
