pub mod app;
pub mod demo;
pub mod host;
mod io;
pub mod renderer;
pub mod settings;

use app::Host;
use demo::BoxesApp;
use settings::RenderSettings;
use winit::event_loop::EventLoop;

fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init();
}

pub fn run() -> Result<(), winit::error::EventLoopError> {
    init_logging();

    let settings = RenderSettings::load();
    let mut host = Host::new(Box::new(BoxesApp::new()), settings);

    let event_loop = EventLoop::new()?;
    let result = event_loop.run_app(&mut host);

    if let Err(ref err) = result {
        log::error!("Application error: {}", err);
    }

    result
}
