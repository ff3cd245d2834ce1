//! Frontend host contract.
//!
//! The application is driven libretro-style: the host owns the window and
//! event loop, polls input into a flat [`InputState`], and calls
//! [`Application::run`] once per tick. The application only sees this
//! contract, never winit types.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::renderer::Gpu;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Static application metadata queried by the frontend.
#[derive(Debug, Clone, Copy)]
pub struct SystemInfo {
    pub name: &'static str,
    pub short_name: &'static str,
    pub version: &'static str,
}

/// Timing and geometry hints queried once at startup.
#[derive(Debug, Clone, Copy)]
pub struct AvInfo {
    pub fps: f64,
    pub base: Resolution,
    pub max: Resolution,
    pub aspect: f32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Analog {
    pub x: f32,
    pub y: f32,
    pub rx: f32,
    pub ry: f32,
}

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct Buttons: u16 {
        const A = 1 << 0;
        const B = 1 << 1;
        const X = 1 << 2;
        const Y = 1 << 3;
        const L = 1 << 4;
        const R = 1 << 5;
        const START = 1 << 6;
        const SELECT = 1 << 7;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InputState {
    pub analog: Analog,
    pub pressed: Buttons,
}

/// A demo application hosted by the frontend. One `run` per tick; frame
/// failures surface as `SurfaceError` and abort that frame only.
pub trait Application {
    fn system_info(&self) -> SystemInfo;

    fn av_info(&self) -> AvInfo;

    /// Resolutions the application advertises to the frontend.
    fn resolutions(&self) -> Vec<Resolution>;

    /// One-time resource setup once a device exists. Resource failures here
    /// abort initialization.
    fn load(&mut self, gpu: &Gpu) -> Result<(), String>;

    fn viewport_changed(&mut self, resolution: Resolution);

    /// The GPU context was reset; cached pipelines are gone.
    fn context_reset(&mut self);

    fn run(
        &mut self,
        delta: f32,
        input: &InputState,
        gpu: &mut Gpu,
    ) -> Result<(), wgpu::SurfaceError>;
}
