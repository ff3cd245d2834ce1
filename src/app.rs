// app.rs
use std::sync::Arc;
use std::time::Instant;

use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::ActiveEventLoop,
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use crate::host::{Application, Buttons, InputState, Resolution};
use crate::renderer::Gpu;
use crate::settings::RenderSettings;

/// Winit-backed frontend. Owns the window and GPU context and drives the
/// hosted [`Application`] once per redraw with a polled [`InputState`].
pub struct Host {
    app: Box<dyn Application>,
    settings: RenderSettings,
    window: Option<Arc<Window>>,
    window_id: Option<WindowId>,
    gpu: Option<Gpu>,
    input: InputCollector,
    last_frame: Option<Instant>,
}

impl Host {
    pub fn new(app: Box<dyn Application>, settings: RenderSettings) -> Self {
        Self {
            app,
            settings,
            window: None,
            window_id: None,
            gpu: None,
            input: InputCollector::default(),
            last_frame: None,
        }
    }

    /// The window resolution actually used: the configured one when the
    /// application advertises it, otherwise the application's base.
    fn pick_resolution(&self) -> Resolution {
        let wanted = self.settings.resolution;
        if self.app.resolutions().contains(&wanted) {
            wanted
        } else {
            let base = self.app.av_info().base;
            log::warn!(
                "{}x{} is not an advertised resolution, using {}x{}",
                wanted.width,
                wanted.height,
                base.width,
                base.height
            );
            base
        }
    }

    fn redraw(&mut self) {
        let Some(gpu) = self.gpu.as_mut() else {
            return;
        };

        let now = Instant::now();
        let delta = self
            .last_frame
            .map(|last| (now - last).as_secs_f32())
            .unwrap_or(0.0);
        self.last_frame = Some(now);

        let input = self.input.state();
        match self.app.run(delta, &input, gpu) {
            Ok(()) => {}
            Err(wgpu::SurfaceError::Lost) | Err(wgpu::SurfaceError::Outdated) => {
                log::warn!("surface lost, reconfiguring and resetting pipeline caches");
                gpu.reconfigure();
                self.app.context_reset();
            }
            Err(wgpu::SurfaceError::Timeout) => {
                log::warn!("surface acquire timed out, skipping frame");
            }
            Err(err) => {
                log::error!("frame failed: {}", err);
            }
        }

        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

impl ApplicationHandler for Host {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let info = self.app.system_info();
        let av = self.app.av_info();
        log::info!(
            "{} ({}) {} - {:.0} fps, aspect {:.3}",
            info.name,
            info.short_name,
            info.version,
            av.fps,
            av.aspect
        );

        let resolution = self.pick_resolution();
        let window = Arc::new(
            event_loop
                .create_window(
                    Window::default_attributes()
                        .with_title(info.name)
                        .with_inner_size(PhysicalSize::new(resolution.width, resolution.height)),
                )
                .expect("create window"),
        );
        self.window_id = Some(window.id());

        let gpu = pollster::block_on(Gpu::new(window.clone(), &self.settings));
        if let Err(err) = self.app.load(&gpu) {
            log::error!("application load failed: {}", err);
            event_loop.exit();
            return;
        }
        self.app.viewport_changed(resolution);

        window.request_redraw();
        self.window = Some(window);
        self.gpu = Some(gpu);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        if Some(id) != self.window_id {
            return;
        }

        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(gpu) = self.gpu.as_mut() {
                    gpu.resize(size);
                }
                self.app.viewport_changed(Resolution {
                    width: size.width,
                    height: size.height,
                });
            }
            WindowEvent::ScaleFactorChanged { .. } => {
                if let (Some(gpu), Some(window)) = (self.gpu.as_mut(), &self.window) {
                    gpu.resize(window.inner_size());
                }
            }
            WindowEvent::RedrawRequested => {
                self.redraw();
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state,
                        ..
                    },
                ..
            } => {
                if code == KeyCode::Escape && state == ElementState::Pressed {
                    event_loop.exit();
                    return;
                }
                self.input.handle_key(code, state == ElementState::Pressed);
            }
            _ => {}
        }
    }
}

/// Maps held keys onto the host's gamepad-shaped input state. WASD is the
/// left stick, arrows the right stick, Shift the R button.
#[derive(Debug, Default)]
struct InputCollector {
    forward: bool,
    back: bool,
    left: bool,
    right: bool,
    look_up: bool,
    look_down: bool,
    look_left: bool,
    look_right: bool,
    fast: bool,
}

impl InputCollector {
    fn handle_key(&mut self, code: KeyCode, down: bool) {
        match code {
            KeyCode::KeyW => self.forward = down,
            KeyCode::KeyS => self.back = down,
            KeyCode::KeyA => self.left = down,
            KeyCode::KeyD => self.right = down,
            KeyCode::ArrowUp => self.look_up = down,
            KeyCode::ArrowDown => self.look_down = down,
            KeyCode::ArrowLeft => self.look_left = down,
            KeyCode::ArrowRight => self.look_right = down,
            KeyCode::ShiftLeft | KeyCode::ShiftRight => self.fast = down,
            _ => {}
        }
    }

    fn state(&self) -> InputState {
        let axis = |neg: bool, pos: bool| (pos as i8 - neg as i8) as f32;

        let mut state = InputState::default();
        state.analog.x = axis(self.left, self.right);
        state.analog.y = axis(self.forward, self.back);
        state.analog.rx = axis(self.look_left, self.look_right);
        state.analog.ry = axis(self.look_up, self.look_down);
        if self.fast {
            state.pressed |= Buttons::R;
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposing_keys_cancel() {
        let mut input = InputCollector::default();
        input.handle_key(KeyCode::KeyW, true);
        input.handle_key(KeyCode::KeyS, true);
        assert_eq!(input.state().analog.y, 0.0);
    }

    #[test]
    fn forward_is_negative_stick_y() {
        // Matches gamepad convention: stick pushed forward reports -1.
        let mut input = InputCollector::default();
        input.handle_key(KeyCode::KeyW, true);
        assert_eq!(input.state().analog.y, -1.0);
        input.handle_key(KeyCode::KeyW, false);
        input.handle_key(KeyCode::KeyS, true);
        assert_eq!(input.state().analog.y, 1.0);
    }

    #[test]
    fn shift_maps_to_r_button() {
        let mut input = InputCollector::default();
        input.handle_key(KeyCode::ShiftLeft, true);
        assert!(input.state().pressed.contains(Buttons::R));
        input.handle_key(KeyCode::ShiftLeft, false);
        assert!(!input.state().pressed.contains(Buttons::R));
    }
}
