//! Frame render queue.
//!
//! The queue collects non-owning references to renderables, orders them so
//! state changes cluster and closer objects come first, then dispatches
//! their draw calls. Protocol misuse (pushing outside a collection phase,
//! rendering before the sort) is a programming error and panics.

use std::cmp::Ordering;

use glam::{Mat4, Vec4};

use crate::renderer::cull::Aabb;

/// Per-frame GPU handles passed down to each renderable's draw call.
pub struct FrameContext<'a, 'e> {
    pub device: &'a wgpu::Device,
    pub queue: &'a wgpu::Queue,
    pub pass: &'a mut wgpu::RenderPass<'e>,
}

/// Anything the queue can batch. Implementors own their GPU resources and
/// must outlive the frame they are pushed into.
pub trait Renderable {
    fn aabb(&self) -> &Aabb;

    /// Homogeneous translation of the object used for the depth key.
    fn model_transform(&self) -> Vec4;

    /// Written by the queue during `push`; a camera-relative depth used to
    /// break ordering ties.
    fn set_cache_depth(&mut self, depth: f32);

    fn cache_depth(&self) -> f32;

    /// Strict weak ordering over the queue's contents, typically by cached
    /// depth. Implementors sharing the queue with other drawable kinds may
    /// order by expensive state (shader, material, textures) before depth
    /// to cluster pipeline switches.
    fn compare_less(&self, other: &dyn Renderable) -> bool;

    fn render(&mut self, ctx: &mut FrameContext<'_, '_>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueState {
    Idle,
    Collecting,
    Ready,
}

pub struct RenderQueue<'a> {
    view_proj: Mat4,
    state: QueueState,
    pending: Vec<&'a mut dyn Renderable>,
}

impl<'a> RenderQueue<'a> {
    pub fn new() -> Self {
        Self {
            view_proj: Mat4::IDENTITY,
            state: QueueState::Idle,
            pending: Vec::new(),
        }
    }

    /// Stores the frame's view-projection. Must precede `begin`.
    pub fn set_view_proj(&mut self, view_proj: Mat4) {
        assert_eq!(
            self.state,
            QueueState::Idle,
            "set_view_proj() while a frame is in flight"
        );
        self.view_proj = view_proj;
    }

    pub fn begin(&mut self) {
        assert_eq!(self.state, QueueState::Idle, "begin() without render()");
        self.pending.clear();
        self.state = QueueState::Collecting;
    }

    /// Appends a renderable and stamps its cache depth with the post-
    /// projective proxy `z + w` of its model transform.
    pub fn push(&mut self, renderable: &'a mut dyn Renderable) {
        assert_eq!(
            self.state,
            QueueState::Collecting,
            "push() outside begin()/end()"
        );
        let clip = self.view_proj * renderable.model_transform();
        renderable.set_cache_depth(clip.z + clip.w);
        self.pending.push(renderable);
    }

    /// Sorts the collected renderables with their own ordering.
    pub fn end(&mut self) {
        assert_eq!(self.state, QueueState::Collecting, "end() without begin()");
        self.pending.sort_by(|a, b| {
            if a.compare_less(&**b) {
                Ordering::Less
            } else if b.compare_less(&**a) {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        });
        self.state = QueueState::Ready;
    }

    /// Dispatches every renderable in sorted order and returns to idle.
    pub fn render(&mut self, ctx: &mut FrameContext<'_, '_>) {
        for renderable in self.drain_sorted() {
            renderable.render(ctx);
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Sorted contents after `end`, in dispatch order.
    pub fn pending(&self) -> impl Iterator<Item = &dyn Renderable> + use<'_, 'a> {
        self.pending.iter().map(|r| &**r as &dyn Renderable)
    }

    fn drain_sorted(&mut self) -> std::vec::Drain<'_, &'a mut dyn Renderable> {
        assert_eq!(self.state, QueueState::Ready, "render() before end()");
        self.state = QueueState::Idle;
        self.pending.drain(..)
    }
}

impl<'a> Default for RenderQueue<'a> {
    fn default() -> Self {
        Self::new()
    }
}
