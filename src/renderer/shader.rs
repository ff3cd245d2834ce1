//! Shader variant cache keyed by a define permutation.
//!
//! A shader owns one WGSL source and a set of named define slots. Each slot
//! reserves a bit range inside a 32-bit permutation key; the current slot
//! values combine into the key of the pipeline variant to bind. Variants are
//! compiled lazily the first time their permutation is requested and cached
//! until the shader is invalidated.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderError {
    /// Define reserved after the first variant compiled.
    Locked(String),
    /// Reserving this slot would exceed the 32-bit permutation key.
    BitOverflow {
        name: String,
        requested: u32,
        used: u32,
    },
    /// Set/reserve referenced a name that was never registered.
    UnknownDefine(String),
    ValueOutOfRange {
        name: String,
        value: u32,
        bits: u32,
    },
    /// `init` was never called before the first bind.
    Uninitialized(String),
    /// Module or pipeline validation failure, carries the full log.
    Compile(String),
}

impl fmt::Display for ShaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderError::Locked(name) => {
                write!(f, "define {:?} reserved after first compile", name)
            }
            ShaderError::BitOverflow {
                name,
                requested,
                used,
            } => write!(
                f,
                "define {:?} needs {} bits but only {} remain in the permutation key",
                name,
                requested,
                u32::BITS - used
            ),
            ShaderError::UnknownDefine(name) => write!(f, "unknown define {:?}", name),
            ShaderError::ValueOutOfRange { name, value, bits } => write!(
                f,
                "value {} does not fit in the {}-bit define {:?}",
                value, bits, name
            ),
            ShaderError::Uninitialized(label) => {
                write!(f, "shader {:?} used before init", label)
            }
            ShaderError::Compile(log) => write!(f, "shader compilation failed: {}", log),
        }
    }
}

impl std::error::Error for ShaderError {}

#[derive(Debug, Clone)]
struct DefineSlot {
    name: String,
    start_bit: u32,
    bits: u32,
    value: u32,
}

/// Ordered set of define slots packed into a 32-bit key. Pure bookkeeping,
/// no GPU state; `Shader` composes one of these with the shared globals.
#[derive(Debug, Default)]
pub struct PermutationSet {
    slots: Vec<DefineSlot>,
    total_bits: u32,
    locked: bool,
}

impl PermutationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the next free bit range of width `bits`. Registration order
    /// fixes the bit placement for the lifetime of the set.
    pub fn reserve(&mut self, name: &str, bits: u32) -> Result<(), ShaderError> {
        debug_assert!(bits >= 1, "define {:?} reserves zero bits", name);
        if self.locked {
            return Err(ShaderError::Locked(name.to_owned()));
        }
        debug_assert!(
            self.slots.iter().all(|s| s.name != name),
            "define {:?} registered twice",
            name
        );
        if self.total_bits + bits > u32::BITS {
            return Err(ShaderError::BitOverflow {
                name: name.to_owned(),
                requested: bits,
                used: self.total_bits,
            });
        }
        self.slots.push(DefineSlot {
            name: name.to_owned(),
            start_bit: self.total_bits,
            bits,
            value: 0,
        });
        self.total_bits += bits;
        Ok(())
    }

    pub fn set(&mut self, name: &str, value: u32) -> Result<(), ShaderError> {
        let slot = self
            .slots
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| ShaderError::UnknownDefine(name.to_owned()))?;
        if slot.bits < u32::BITS && value >> slot.bits != 0 {
            return Err(ShaderError::ValueOutOfRange {
                name: name.to_owned(),
                value,
                bits: slot.bits,
            });
        }
        slot.value = value;
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.iter().any(|s| s.name == name)
    }

    pub fn total_bits(&self) -> u32 {
        self.total_bits
    }

    /// Refuses further reservations. Called at the first variant compile so
    /// bit placements never shift under cached permutation keys.
    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Key contribution of these slots, shifted up by `base_bit`.
    pub fn key_from(&self, base_bit: u32) -> u32 {
        self.slots
            .iter()
            .map(|s| s.value << (base_bit + s.start_bit))
            .sum()
    }

    /// Appends `(name, value)` for every slot with a non-zero value.
    pub fn active_symbols(&self, out: &mut Vec<(String, u32)>) {
        out.extend(
            self.slots
                .iter()
                .filter(|s| s.value != 0)
                .map(|s| (s.name.clone(), s.value)),
        );
    }
}

/// Define registry shared by every shader in the process. Reserve global
/// slots before any shader compiles; their bits sit below all per-shader
/// slots in every permutation key. Because a new global slot shifts every
/// shader's local bits upward, reservations here also account for the
/// widest local slot set registered so far.
#[derive(Debug, Default)]
pub struct GlobalDefines {
    set: RefCell<PermutationSet>,
    local_bits: Cell<u32>,
}

impl GlobalDefines {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn reserve(&self, name: &str, bits: u32) -> Result<(), ShaderError> {
        let used = self.set.borrow().total_bits() + self.local_bits.get();
        if used + bits > u32::BITS {
            return Err(ShaderError::BitOverflow {
                name: name.to_owned(),
                requested: bits,
                used,
            });
        }
        self.set.borrow_mut().reserve(name, bits)
    }

    /// Called by shaders as they reserve local slots, so later global
    /// reservations cannot push any shader's key past 32 bits.
    fn claim_local_bits(&self, bits: u32) {
        self.local_bits.set(self.local_bits.get().max(bits));
    }

    pub fn set(&self, name: &str, value: u32) -> Result<(), ShaderError> {
        self.set.borrow_mut().set(name, value)
    }

    fn lock(&self) {
        self.set.borrow_mut().lock();
    }

    fn total_bits(&self) -> u32 {
        self.set.borrow().total_bits()
    }

    fn key(&self) -> u32 {
        self.set.borrow().key_from(0)
    }

    fn active_symbols(&self, out: &mut Vec<(String, u32)>) {
        self.set.borrow().active_symbols(out);
    }
}

/// Texture + sampler pair resolved into the shader's last bind group at
/// bindings `(2 * unit, 2 * unit + 1)`.
#[derive(Debug, Clone)]
pub struct SamplerBinding {
    pub name: &'static str,
    pub unit: u32,
    pub dimension: wgpu::TextureViewDimension,
}

/// Uniform buffer resolved into bind group `group` at `binding`.
#[derive(Debug, Clone)]
pub struct UniformBufferBinding {
    pub name: &'static str,
    pub group: u32,
    pub binding: u32,
    pub stages: wgpu::ShaderStages,
    pub dynamic: bool,
}

/// Fixed pipeline state shared by every variant of one shader.
pub struct PipelineRecipe {
    pub vertex_layouts: Vec<wgpu::VertexBufferLayout<'static>>,
    pub topology: wgpu::PrimitiveTopology,
    pub cull_mode: Option<wgpu::Face>,
    pub color_format: wgpu::TextureFormat,
    pub depth_format: Option<wgpu::TextureFormat>,
    pub depth_write: bool,
    pub depth_compare: wgpu::CompareFunction,
}

struct ShaderVariant {
    pipeline: wgpu::RenderPipeline,
}

pub struct Shader {
    label: String,
    globals: Rc<GlobalDefines>,
    defines: PermutationSet,
    samplers: Vec<SamplerBinding>,
    uniform_buffers: Vec<UniformBufferBinding>,
    source: String,
    recipe: Option<PipelineRecipe>,
    bind_layouts: Vec<wgpu::BindGroupLayout>,
    pipeline_layout: Option<wgpu::PipelineLayout>,
    variants: HashMap<u32, ShaderVariant>,
    active: bool,
}

impl Shader {
    pub fn new(label: &str, globals: Rc<GlobalDefines>) -> Self {
        Self {
            label: label.to_owned(),
            globals,
            defines: PermutationSet::new(),
            samplers: Vec::new(),
            uniform_buffers: Vec::new(),
            source: String::new(),
            recipe: None,
            bind_layouts: Vec::new(),
            pipeline_layout: None,
            variants: HashMap::new(),
            active: false,
        }
    }

    pub fn set_samplers(&mut self, samplers: Vec<SamplerBinding>) {
        debug_assert!(self.variants.is_empty(), "samplers changed after compile");
        self.samplers = samplers;
    }

    pub fn set_uniform_buffers(&mut self, uniform_buffers: Vec<UniformBufferBinding>) {
        debug_assert!(
            self.variants.is_empty(),
            "uniform buffers changed after compile"
        );
        self.uniform_buffers = uniform_buffers;
    }

    pub fn reserve_define(&mut self, name: &str, bits: u32) -> Result<(), ShaderError> {
        // Global and local slots share one 32-bit key.
        if self.globals.total_bits() + self.defines.total_bits() + bits > u32::BITS {
            return Err(ShaderError::BitOverflow {
                name: name.to_owned(),
                requested: bits,
                used: self.globals.total_bits() + self.defines.total_bits(),
            });
        }
        self.defines.reserve(name, bits)?;
        self.globals.claim_local_bits(self.defines.total_bits());
        Ok(())
    }

    pub fn set_define(&mut self, name: &str, value: u32) -> Result<(), ShaderError> {
        self.defines.set(name, value)
    }

    pub fn set_global_define(&self, name: &str, value: u32) -> Result<(), ShaderError> {
        self.globals.set(name, value)
    }

    /// Combines global slots (low bits, registration order) with this
    /// shader's slots into the variant key.
    pub fn compute_permutation(&self) -> u32 {
        self.globals.key() + self.defines.key_from(self.globals.total_bits())
    }

    /// Resolves the declared bindings into bind group and pipeline layouts
    /// and records the source and fixed pipeline state. Defines stay open
    /// until the first variant compiles.
    pub fn init(
        &mut self,
        device: &wgpu::Device,
        source: &str,
        recipe: PipelineRecipe,
    ) -> Result<(), ShaderError> {
        let mut groups: BTreeMap<u32, Vec<wgpu::BindGroupLayoutEntry>> = BTreeMap::new();
        for ub in &self.uniform_buffers {
            groups
                .entry(ub.group)
                .or_default()
                .push(wgpu::BindGroupLayoutEntry {
                    binding: ub.binding,
                    visibility: ub.stages,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: ub.dynamic,
                        min_binding_size: None,
                    },
                    count: None,
                });
        }

        if !self.samplers.is_empty() {
            let group = self.sampler_group();
            let entries = groups.entry(group).or_default();
            for sampler in &self.samplers {
                entries.push(wgpu::BindGroupLayoutEntry {
                    binding: 2 * sampler.unit,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: sampler.dimension,
                        multisampled: false,
                    },
                    count: None,
                });
                entries.push(wgpu::BindGroupLayoutEntry {
                    binding: 2 * sampler.unit + 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                });
            }
        }

        debug_assert!(
            groups.keys().copied().eq(0..groups.len() as u32),
            "shader {:?} declares non-contiguous bind groups",
            self.label
        );

        self.bind_layouts = groups
            .iter()
            .map(|(index, entries)| {
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(&format!("{}:group{}", self.label, index)),
                    entries,
                })
            })
            .collect();

        let layout_refs: Vec<&wgpu::BindGroupLayout> = self.bind_layouts.iter().collect();
        self.pipeline_layout = Some(device.create_pipeline_layout(
            &wgpu::PipelineLayoutDescriptor {
                label: Some(&self.label),
                bind_group_layouts: &layout_refs,
                push_constant_ranges: &[],
            },
        ));

        self.source = source.to_owned();
        self.recipe = Some(recipe);
        Ok(())
    }

    /// Layout for the bind group at `group`, for the caller to build its
    /// bind groups against.
    pub fn bind_layout(&self, group: u32) -> &wgpu::BindGroupLayout {
        &self.bind_layouts[group as usize]
    }

    /// Group index holding all of this shader's samplers.
    pub fn sampler_group(&self) -> u32 {
        self.uniform_buffers
            .iter()
            .map(|ub| ub.group + 1)
            .max()
            .unwrap_or(0)
    }

    /// Computes the current permutation, compiles the variant on first use
    /// and binds its pipeline on `pass`.
    pub fn bind(
        &mut self,
        device: &wgpu::Device,
        pass: &mut wgpu::RenderPass<'_>,
    ) -> Result<(), ShaderError> {
        let key = self.compute_permutation();
        if !self.variants.contains_key(&key) {
            let variant = self.compile_variant(device, key)?;
            self.variants.insert(key, variant);
        }
        pass.set_pipeline(&self.variants[&key].pipeline);
        self.active = true;
        Ok(())
    }

    /// Clears the active-binding bookkeeping. No-op when nothing is bound.
    pub fn unbind(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Drops every cached variant. Used on context reset; the next `bind`
    /// recompiles from source.
    pub fn invalidate(&mut self) {
        if !self.variants.is_empty() {
            log::info!(
                "shader {:?}: dropping {} cached variants",
                self.label,
                self.variants.len()
            );
        }
        self.variants.clear();
        self.active = false;
    }

    pub fn variant_count(&self) -> usize {
        self.variants.len()
    }

    fn compile_variant(
        &mut self,
        device: &wgpu::Device,
        key: u32,
    ) -> Result<ShaderVariant, ShaderError> {
        let recipe = self
            .recipe
            .as_ref()
            .ok_or_else(|| ShaderError::Uninitialized(self.label.clone()))?;
        let pipeline_layout = self
            .pipeline_layout
            .as_ref()
            .ok_or_else(|| ShaderError::Uninitialized(self.label.clone()))?;

        // Bit placements must not shift once a key has been handed out.
        self.globals.lock();
        self.defines.lock();

        let mut symbols = Vec::new();
        self.globals.active_symbols(&mut symbols);
        self.defines.active_symbols(&mut symbols);

        let source = preprocess(&self.source, &symbols);
        log::debug!(
            "compiling shader {:?} permutation {:#x} ({} symbols)",
            self.label,
            key,
            symbols.len()
        );

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{}:{:#x}", self.label, key)),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&format!("{}:{:#x}", self.label, key)),
            layout: Some(pipeline_layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some("vs_main"),
                buffers: &recipe.vertex_layouts,
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: recipe.color_format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: recipe.topology,
                cull_mode: recipe.cull_mode,
                front_face: wgpu::FrontFace::Ccw,
                polygon_mode: wgpu::PolygonMode::Fill,
                ..Default::default()
            },
            depth_stencil: recipe.depth_format.map(|format| wgpu::DepthStencilState {
                format,
                depth_write_enabled: recipe.depth_write,
                depth_compare: recipe.depth_compare,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            let log = error.to_string();
            log::error!(
                "shader {:?} permutation {:#x} failed to compile:\n{}",
                self.label,
                key,
                log
            );
            return Err(ShaderError::Compile(log));
        }

        Ok(ShaderVariant { pipeline })
    }
}

/// Expands a permutation into WGSL source. Each non-zero symbol becomes a
/// `const NAME: u32 = value;` header line, and `#ifdef` / `#ifndef` /
/// `#else` / `#endif` directive lines (which may nest) select the lines
/// that survive into the emitted source.
pub fn preprocess(source: &str, symbols: &[(String, u32)]) -> String {
    let mut out = String::with_capacity(source.len());
    for (name, value) in symbols {
        out.push_str(&format!("const {}: u32 = {}u;\n", name, value));
    }

    let defined = |name: &str| symbols.iter().any(|(n, _)| n == name);

    // Each frame is (parent emitting, this branch taken).
    let mut stack: Vec<(bool, bool)> = Vec::new();
    let mut emitting = true;

    for line in source.lines() {
        let trimmed = line.trim_start();
        if let Some(name) = trimmed.strip_prefix("#ifdef ") {
            stack.push((emitting, defined(name.trim())));
            emitting = emitting && stack.last().map_or(false, |f| f.1);
        } else if let Some(name) = trimmed.strip_prefix("#ifndef ") {
            stack.push((emitting, !defined(name.trim())));
            emitting = emitting && stack.last().map_or(false, |f| f.1);
        } else if trimmed.starts_with("#else") {
            if let Some((parent, taken)) = stack.pop() {
                stack.push((parent, !taken));
                emitting = parent && !taken;
            }
        } else if trimmed.starts_with("#endif") {
            if let Some((parent, _)) = stack.pop() {
                emitting = parent;
            }
        } else if emitting {
            out.push_str(line);
            out.push('\n');
        }
    }

    debug_assert!(stack.is_empty(), "unbalanced #ifdef/#endif in shader source");
    out
}
