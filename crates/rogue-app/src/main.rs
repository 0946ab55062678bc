// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use rogue_core::init_tracing;
use rogue_platform::create_window;
use rogue_render::{FrameOutcome, RenderSize, Renderer};
use rogue_render_vk::VkRenderer;
use tracing::{error, info};

use rogue_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

mod config;
mod scene;

use config::AppCfg;
use scene::Scene;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Bring the renderer up, wait for the GPU to go idle, tear down and exit
    #[arg(long)]
    smoke: bool,

    /// Config file; missing means built-in defaults
    #[arg(long, default_value = "rogue.toml")]
    config: PathBuf,
}

struct App {
    cfg: AppCfg,
    smoke: bool,

    // Renderer before window: it must be gone before the window is.
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    scene: Scene,

    failure: Option<anyhow::Error>,
    exiting: bool,
    occluded: bool,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn new(cfg: AppCfg, smoke: bool) -> Self {
        Self {
            cfg,
            smoke,
            renderer: None,
            window: None,
            scene: Scene::default(),
            failure: None,
            exiting: false,
            occluded: false,
            frames: 0,
            last_fps_instant: Instant::now(),
        }
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let wc = &self.cfg.window;
        let window = create_window(event_loop, &wc.title, wc.width, wc.height)?;
        let mut renderer =
            VkRenderer::new(&window, self.cfg.render.to_vk()).context("vulkan init")?;

        if self.smoke {
            renderer.wait_idle()?;
            drop(renderer);
            drop(window);
            info!("smoke: renderer came up and tore down cleanly");
            self.exiting = true;
            event_loop.exit();
            return Ok(());
        }

        self.scene = Scene::setup(renderer.sprites_mut(), &self.cfg.scene)?;
        window.request_redraw();
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    /// Stops the loop; `main` reports the error and exits non-zero.
    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        self.failure = Some(e);
        self.shutdown(event_loop);
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        if let Some(r) = &self.renderer {
            if let Err(e) = r.wait_idle() {
                error!("wait_idle on shutdown: {e:#}");
            }
        }
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.exiting {
            return;
        }
        if let Err(e) = self.start(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        let (Some(window), Some(renderer)) = (self.window.as_ref(), self.renderer.as_mut()) else {
            return;
        };
        if window_id != window.id() {
            return;
        }
        renderer.handle_event(window, &event);

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                let size = RenderSize::new(new_size.width, new_size.height);
                if let Err(e) = renderer.resize(size) {
                    self.fail(event_loop, e);
                    return;
                }
                if !size.is_empty() {
                    window.request_redraw();
                }
            }

            WindowEvent::Occluded(occluded) => {
                if self.occluded != occluded {
                    self.occluded = occluded;
                    info!("Occluded={}", occluded);
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.occluded {
                    return;
                }
                match renderer.draw_frame(window, &mut self.scene) {
                    Ok(FrameOutcome::Presented | FrameOutcome::PresentedAndRecreated) => {
                        self.frames = self.frames.saturating_add(1);
                    }
                    Ok(FrameOutcome::Skipped) => {}
                    Err(e) => self.fail(event_loop, e.context("frame loop")),
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        if self.occluded {
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }

        // Present pacing comes from the swapchain; keep the loop spinning.
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            let total = self.renderer.as_ref().map_or(0, |r| r.frames_completed());
            info!("fps ~ {} ({} frames total)", self.frames, total);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn run(args: Args) -> Result<()> {
    let cfg = config::load(&args.config);
    let event_loop: EventLoop<()> = EventLoop::new().context("create event loop")?;
    let mut app = App::new(cfg, args.smoke);
    event_loop.run_app(&mut app)?;
    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}
