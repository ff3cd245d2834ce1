pub mod cull;
pub mod depth;
pub mod gpu;
pub mod instances;
pub mod mesh;
pub mod queue;
pub mod shader;
pub mod texture;
pub mod uniforms;

pub use cull::Aabb;
pub use gpu::{Frame, Gpu};
pub use instances::{InstanceBlock, InstanceBuffer, MAX_INSTANCES};
pub use mesh::{box_mesh, Vertex};
pub use queue::{FrameContext, RenderQueue, Renderable};
pub use shader::{
    GlobalDefines, PipelineRecipe, SamplerBinding, Shader, ShaderError, UniformBufferBinding,
};
pub use uniforms::{GlobalFragmentData, GlobalTransforms};
