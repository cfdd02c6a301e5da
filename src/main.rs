use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use ffmpeg_pipe::{Ffmpeg, Ffprobe, RodioOutput, StreamRegistry};
use winit::event_loop::EventLoop;

mod app;
mod compositor;
mod config;
mod focus;
mod layout;
mod preview;
mod surface;

use app::WallApp;
use config::WallConfig;

fn init_logging(level: log::LevelFilter) {
    env_logger::Builder::new()
        .filter_level(level)
        .filter_module("ffmpeg_pipe", level)
        .filter_module("nvr_wall", level)
        .parse_default_env()
        .init();
}

fn run(config: WallConfig) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("nvr-wall-worker")
        .build()
        .context("failed to start the async runtime")?;

    let settings = config.pipe_settings();
    let registry = StreamRegistry::bootstrap(
        runtime.handle(),
        &config.urls,
        &Ffprobe::new(config.ffprobe.as_str()),
        &Ffmpeg::new(config.ffmpeg.as_str(), config.rtsp_transport.as_str()),
        Arc::new(RodioOutput),
        &settings,
    );
    if registry.is_empty() {
        log::warn!("main: no source could be opened, the wall stays blank");
    }

    let event_loop = EventLoop::new().context("failed to create the event loop")?;
    let mut app = WallApp::new(config, registry);
    let result = event_loop.run_app(&mut app);
    let fatal = app.take_fatal();
    // pipelines were stopped in `exiting`; dropping the app releases them
    drop(app);

    result.context("event loop failed")?;
    match fatal {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn main() {
    let config = WallConfig::parse();
    init_logging(config.log_level());

    if let Err(e) = run(config) {
        log::error!("main: {:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
