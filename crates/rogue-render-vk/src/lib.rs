// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: bootstrap, presentation surface, frame loop, texture uploads
//! and the Dear ImGui renderer.
use std::time::Instant;

use anyhow::{Context, Result};
use ash::vk;
use imgui_winit_support::{HiDpiMode, WinitPlatform};
use rogue_platform::framebuffer_size;
use rogue_platform::winit::event::{Event, WindowEvent};
use rogue_platform::winit::window::Window;
use rogue_render::{
    FrameOutcome, RenderSize, Renderer, SpriteRegistry, DEFAULT_FRAMES_IN_FLIGHT,
};
use tracing::{debug, info};

mod bootstrap;
mod commands;
mod frame;
mod presentation;
mod texture;
mod ui;

pub use bootstrap::{Gpu, QueueFamilies};
pub use presentation::{
    choose_extent, choose_image_count, choose_present_mode, choose_surface_format,
    classify_acquire, plan_swapchain, present_status, Acquired, SurfaceManager, SwapchainPlan,
};
pub use texture::{VkTexture, VkTextureUploader};
pub use ui::{draw_image, UiBackend, UiTextureRegistrar, UI_DESCRIPTOR_POOL_SIZE};

use frame::{record_frame, FrameSlots, FrameTarget};

pub type VkSprites = SpriteRegistry<VkTextureUploader>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VkVsyncMode {
    Fifo,    // Target monitor refresh rate
    #[default]
    Mailbox, // Smart Vsync, fps uncapped; FIFO when unavailable
}

#[derive(Clone, Copy, Debug)]
pub struct VkConfig {
    pub clear_color: [f32; 4],
    pub vsync_mode: VkVsyncMode,
    pub frames_in_flight: usize,
    /// Request the Khronos validation layer. Skipped when not installed.
    pub validation: bool,
}

impl Default for VkConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.10, 0.15, 0.20, 1.0],
            vsync_mode: VkVsyncMode::default(),
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            validation: cfg!(debug_assertions),
        }
    }
}

/// Application hooks run once per frame, between the UI's begin and end.
pub trait FrameHandler {
    /// World pass. Visible sprites have already been queued on the background
    /// draw list when this runs.
    fn draw_world(&mut self, _ui: &imgui::Ui, _sprites: &VkSprites) {}

    fn draw_ui(&mut self, ui: &imgui::Ui);
}

pub struct VkRenderer {
    sprites: VkSprites,
    ui: UiBackend,
    frames: FrameSlots,
    registrar: UiTextureRegistrar,
    surface: SurfaceManager,

    imgui: imgui::Context,
    platform: WinitPlatform,
    clear: vk::ClearValue,
    paused: bool,
    last_frame: Instant,

    // Dropped last: device, surface, messenger, instance.
    gpu: Gpu,
}

impl VkRenderer {
    pub fn new(window: &Window, cfg: VkConfig) -> Result<Self> {
        let gpu = Gpu::new(window, cfg.validation)?;
        let (w, h) = framebuffer_size(window);

        let mut surface = SurfaceManager::new(&gpu, RenderSize::new(w, h), cfg.vsync_mode)?;
        let mut registrar = unsafe { UiTextureRegistrar::new(&gpu.device) }
            .inspect_err(|_| unsafe { surface.destroy() })?;
        let mut uploader = VkTextureUploader::new(&gpu, registrar.clone()).inspect_err(|_| unsafe {
            registrar.destroy();
            surface.destroy();
        })?;

        let mut imgui = imgui::Context::create();
        imgui.set_ini_filename(None);
        imgui.style_mut().use_dark_colors();
        let mut platform = WinitPlatform::new(&mut imgui);
        platform.attach_window(imgui.io_mut(), window, HiDpiMode::Default);

        let mut ui = UiBackend::new(
            &mut imgui,
            &mut uploader,
            surface.render_pass(),
            cfg.frames_in_flight,
        )
        .inspect_err(|_| unsafe {
            uploader.destroy();
            registrar.destroy();
            surface.destroy();
        })?;

        let frames = match unsafe { FrameSlots::new(&gpu.device, cfg.frames_in_flight) } {
            Ok(f) => f,
            Err(e) => {
                ui.destroy(&mut uploader);
                uploader.destroy();
                unsafe {
                    registrar.destroy();
                    surface.destroy();
                }
                return Err(e);
            }
        };

        info!(
            "vk: renderer ready ({} frames in flight, {} swapchain images)",
            frames.cursor().slot_count(),
            surface.image_count()
        );

        Ok(Self {
            sprites: SpriteRegistry::new(uploader),
            ui,
            frames,
            registrar,
            surface,
            imgui,
            platform,
            clear: vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: cfg.clear_color,
                },
            },
            paused: false,
            last_frame: Instant::now(),
            gpu,
        })
    }

    pub fn sprites(&self) -> &VkSprites {
        &self.sprites
    }

    pub fn sprites_mut(&mut self) -> &mut VkSprites {
        &mut self.sprites
    }

    pub fn frames_completed(&self) -> u64 {
        self.frames.cursor().frames_completed()
    }

    /// Forwards a window event to the UI input layer.
    pub fn handle_event(&mut self, window: &Window, event: &WindowEvent) {
        let wrapped: Event<()> = Event::WindowEvent {
            window_id: window.id(),
            event: event.clone(),
        };
        self.platform
            .handle_event(self.imgui.io_mut(), window, &wrapped);
    }

    fn recreate_surface(&mut self, size: RenderSize) -> Result<bool> {
        self.surface
            .recreate(&self.gpu, size, &mut self.ui)
            .context("recreate presentation surface")
    }

    // STRICT PER-FRAME ORDER:
    // 1) wait this slot's fence
    // 2) acquire (signals image_available)
    // 3) wait the fence of whatever slot last used this image, claim it
    // 4) build UI, record
    // 5) reset the slot fence, submit (waits image_available, signals render_finished + fence)
    // 6) present (waits render_finished)
    // 7) advance the slot; the frame counter is never reset
    pub fn draw_frame(
        &mut self,
        window: &Window,
        handler: &mut dyn FrameHandler,
    ) -> Result<FrameOutcome> {
        if self.paused {
            return Ok(FrameOutcome::Skipped);
        }
        let (w, h) = framebuffer_size(window);
        let size = RenderSize::new(w, h);

        if self.surface.state().needs_recreate() && !self.recreate_surface(size)? {
            return Ok(FrameOutcome::Skipped);
        }

        let sync = self.frames.current();
        let slot = self.frames.slot();

        if self.frames.is_current_armed() {
            unsafe {
                self.gpu
                    .device
                    .wait_for_fences(&[sync.in_flight], true, u64::MAX)
                    .context("wait_for_fences(frame slot)")?;
            }
        }

        let acquired = classify_acquire(unsafe { self.surface.acquire(sync.image_available) })?;
        let Acquired::Image {
            index: image_index,
            suboptimal: acquire_suboptimal,
        } = acquired
        else {
            info!("vk: acquire out of date, recreating surface");
            self.surface.mark_stale();
            self.recreate_surface(size)?;
            return Ok(FrameOutcome::Skipped);
        };
        let img = image_index as usize;

        unsafe {
            let prev = self.surface.image_fence(img);
            if prev != vk::Fence::null() && prev != sync.in_flight {
                self.gpu
                    .device
                    .wait_for_fences(&[prev], true, u64::MAX)
                    .context("wait_for_fences(image)")?;
            }
            self.surface.set_image_fence(img, sync.in_flight);
        }

        let now = Instant::now();
        self.imgui.io_mut().update_delta_time(now - self.last_frame);
        self.last_frame = now;

        self.platform
            .prepare_frame(self.imgui.io_mut(), window)
            .context("imgui prepare_frame")?;
        let frame_ui = self.imgui.new_frame();
        for (_, sprite) in self.sprites.visible() {
            if let Some(tex) = sprite.ui_texture() {
                draw_image(frame_ui, tex, sprite.position(), sprite.size());
            }
        }
        handler.draw_world(frame_ui, &self.sprites);
        handler.draw_ui(frame_ui);
        self.platform.prepare_render(frame_ui, window);
        let draw_data = self.imgui.render();

        let target = FrameTarget {
            cmd: self.surface.command_buffer(img),
            render_pass: self.surface.render_pass(),
            framebuffer: self.surface.framebuffer(img),
            extent: self.surface.extent(),
            clear: self.clear,
            slot,
        };

        unsafe {
            record_frame(&self.gpu.device, &target, &mut self.ui, draw_data)?;

            let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
            let submit = vk::SubmitInfo {
                s_type: vk::StructureType::SUBMIT_INFO,
                wait_semaphore_count: 1,
                p_wait_semaphores: &sync.image_available,
                p_wait_dst_stage_mask: wait_stages.as_ptr(),
                command_buffer_count: 1,
                p_command_buffers: &target.cmd,
                signal_semaphore_count: 1,
                p_signal_semaphores: &sync.render_finished,
                ..Default::default()
            };
            self.frames.reset_current(&self.gpu.device)?;
            self.gpu
                .device
                .queue_submit(
                    self.gpu.graphics_queue,
                    std::slice::from_ref(&submit),
                    sync.in_flight,
                )
                .context("queue_submit")?;
            self.frames.mark_submitted();
        }

        let presented = unsafe {
            self.surface
                .present(self.gpu.present_queue, image_index, sync.render_finished)
        };
        self.frames.advance();

        let status = present_status(acquire_suboptimal, presented)?;
        if !status.needs_recreate() {
            return Ok(FrameOutcome::Presented);
        }
        debug!("vk: present reported {:?}, recreating surface", status);
        self.surface.mark_stale();
        self.recreate_surface(size)?;
        Ok(FrameOutcome::PresentedAndRecreated)
    }
}

impl Renderer for VkRenderer {
    fn resize(&mut self, size: RenderSize) -> Result<()> {
        if size.is_empty() {
            if !self.paused {
                info!("vk: resize to {}x{} → paused=true", size.width, size.height);
            }
            self.paused = true;
            self.surface.mark_stale();
            return Ok(());
        }

        if self.paused {
            info!(
                "vk: resize to {}x{} → paused=false",
                size.width, size.height
            );
        }
        self.paused = false;
        self.surface.mark_stale();
        Ok(())
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear = vk::ClearValue {
            color: vk::ClearColorValue { float32: rgba },
        };
    }

    fn wait_idle(&self) -> Result<()> {
        self.gpu.wait_idle()
    }
}

// STRICT TEARDOWN ORDER:
// - wait the slot fences that have work behind them, then device_wait_idle()
// - sprites (descriptor sets, samplers, views, images, memory)
// - UI backend (font atlas, buffers, pipeline)
// - per-frame semaphores/fences
// - UI descriptor pool, then the upload command pool
// - command pool, framebuffers, views, render pass, swapchain
// - Gpu drops last: device, surface, debug messenger, instance
impl Drop for VkRenderer {
    fn drop(&mut self) {
        unsafe {
            let fences = self.frames.armed_fences();
            if !fences.is_empty() {
                let _ = self.gpu.device.wait_for_fences(&fences, true, u64::MAX);
            }
            self.gpu.device.device_wait_idle().ok();

            self.sprites.clear();
            self.ui.destroy(self.sprites.uploader_mut());
            self.frames.destroy(&self.gpu.device);
            self.registrar.destroy();
            self.sprites.uploader_mut().destroy();
            self.surface.destroy();
        }
        info!(
            "vk: renderer destroyed after {} frames",
            self.frames.cursor().frames_completed()
        );
    }
}
