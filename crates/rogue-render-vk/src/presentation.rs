// SPDX-License-Identifier: CEPL-1.0
//! Swapchain images, the render pass drawn into them, framebuffers and the
//! per-image command buffers. Everything here is rebuilt together whenever the
//! surface goes stale.
use anyhow::{anyhow, Context, Result};
use ash::khr::swapchain;
use ash::prelude::VkResult;
use ash::vk;
use rogue_render::{PresentStatus, RenderSize, SurfaceState};
use tracing::{debug, info};

use crate::bootstrap::Gpu;
use crate::commands::create_command_pool;
use crate::ui::UiBackend;
use crate::VkVsyncMode;

/// Everything decided from a surface query before creating a swapchain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SwapchainPlan {
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
}

/// B8G8R8A8_UNORM with sRGB non-linear colour space, else whatever comes first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_UNORM
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// FIFO is always available, MAILBOX only sometimes.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], mode: VkVsyncMode) -> vk::PresentModeKHR {
    match mode {
        VkVsyncMode::Mailbox if modes.contains(&vk::PresentModeKHR::MAILBOX) => {
            vk::PresentModeKHR::MAILBOX
        }
        _ => vk::PresentModeKHR::FIFO,
    }
}

/// `current_extent.width == u32::MAX` means the surface follows the swapchain,
/// so the window size is clamped into the allowed range instead.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: window
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: window
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 = no maximum).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        want.min(caps.max_image_count)
    } else {
        want
    }
}

pub fn plan_swapchain(
    caps: &vk::SurfaceCapabilitiesKHR,
    formats: &[vk::SurfaceFormatKHR],
    modes: &[vk::PresentModeKHR],
    window: RenderSize,
    vsync: VkVsyncMode,
) -> Result<SwapchainPlan> {
    let surface_format =
        choose_surface_format(formats).ok_or_else(|| anyhow!("surface reports no formats"))?;
    Ok(SwapchainPlan {
        format: surface_format.format,
        color_space: surface_format.color_space,
        present_mode: choose_present_mode(modes, vsync),
        extent: choose_extent(caps, window),
        image_count: choose_image_count(caps),
    })
}

/// What an acquire gave back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquired {
    Image { index: u32, suboptimal: bool },
    /// Nothing was acquired; rebuild the surface and skip this frame.
    OutOfDate,
}

/// Out of date is recoverable. Every other error is fatal.
pub fn classify_acquire(result: VkResult<(u32, bool)>) -> Result<Acquired> {
    match result {
        Ok((index, suboptimal)) => Ok(Acquired::Image { index, suboptimal }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::OutOfDate),
        Err(e) => Err(anyhow!("acquire_next_image: {e:?}")),
    }
}

/// Folds the acquire's suboptimal flag into the present result. A frame is
/// only `Optimal` when neither side complained.
pub fn present_status(acquire_suboptimal: bool, presented: VkResult<bool>) -> Result<PresentStatus> {
    match presented {
        Ok(false) if !acquire_suboptimal => Ok(PresentStatus::Optimal),
        Ok(_) => Ok(PresentStatus::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
        Err(e) => Err(anyhow!("queue_present: {e:?}")),
    }
}

pub struct SurfaceManager {
    device: ash::Device,
    loader: swapchain::Device,
    vsync: VkVsyncMode,
    state: SurfaceState,

    swapchain: vk::SwapchainKHR,
    plan: SwapchainPlan,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,

    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    cmd_pool: vk::CommandPool,
    cmd_bufs: Vec<vk::CommandBuffer>,
    /// Fence of the frame slot that last rendered to each image.
    images_in_flight: Vec<vk::Fence>,
}

impl SurfaceManager {
    pub fn new(gpu: &Gpu, window: RenderSize, vsync: VkVsyncMode) -> Result<Self> {
        let mut sm = Self {
            device: gpu.device.clone(),
            loader: gpu.swapchain_loader.clone(),
            vsync,
            state: SurfaceState::Uninitialized,
            swapchain: vk::SwapchainKHR::null(),
            plan: SwapchainPlan::default(),
            images: Vec::new(),
            views: Vec::new(),
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
            cmd_pool: vk::CommandPool::null(),
            cmd_bufs: Vec::new(),
            images_in_flight: Vec::new(),
        };
        unsafe {
            let built = sm.create(gpu, window).and_then(|_| sm.create_dependents(gpu));
            if let Err(e) = built {
                sm.destroy();
                return Err(e);
            }
        }
        sm.state.mark_ready();
        Ok(sm)
    }

    unsafe fn create(&mut self, gpu: &Gpu, window: RenderSize) -> Result<()> {
        let sl = &gpu.surface_loader;
        let caps = sl
            .get_physical_device_surface_capabilities(gpu.phys, gpu.surface)
            .context("get_physical_device_surface_capabilities")?;
        let formats = sl
            .get_physical_device_surface_formats(gpu.phys, gpu.surface)
            .context("get_physical_device_surface_formats")?;
        let modes = sl
            .get_physical_device_surface_present_modes(gpu.phys, gpu.surface)
            .context("get_physical_device_surface_present_modes")?;

        let plan = plan_swapchain(&caps, &formats, &modes, window, self.vsync)?;

        let pre_transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };

        let families = gpu.families.unique();
        let (sharing_mode, family_count, p_families) = if gpu.families.is_shared() {
            (vk::SharingMode::EXCLUSIVE, 0, std::ptr::null())
        } else {
            (
                vk::SharingMode::CONCURRENT,
                families.len() as u32,
                families.as_ptr(),
            )
        };

        let old_swapchain = self.swapchain;
        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: gpu.surface,
            min_image_count: plan.image_count,
            image_format: plan.format,
            image_color_space: plan.color_space,
            image_extent: plan.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: family_count,
            p_queue_family_indices: p_families,
            pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: plan.present_mode,
            clipped: vk::TRUE,
            old_swapchain,
            ..Default::default()
        };
        let new_swapchain = self
            .loader
            .create_swapchain(&swap_info, None)
            .context("create_swapchain")?;
        if old_swapchain != vk::SwapchainKHR::null() {
            self.loader.destroy_swapchain(old_swapchain, None);
        }
        self.swapchain = new_swapchain;
        self.plan = plan;

        self.images = self
            .loader
            .get_swapchain_images(self.swapchain)
            .context("get_swapchain_images")?;
        for &image in &self.images {
            let iv_info = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: plan.format,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            let view = self
                .device
                .create_image_view(&iv_info, None)
                .context("create_image_view(swapchain)")?;
            self.views.push(view);
        }

        info!(
            "vk: swapchain {:?} / {:?}, present_mode {:?}, extent {}x{}, images {} (min {})",
            plan.format,
            plan.color_space,
            plan.present_mode,
            plan.extent.width,
            plan.extent.height,
            self.images.len(),
            caps.min_image_count
        );
        Ok(())
    }

    unsafe fn create_dependents(&mut self, gpu: &Gpu) -> Result<()> {
        let color = vk::AttachmentDescription {
            format: self.plan.format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        };
        let color_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: 1,
            p_color_attachments: &color_ref,
            ..Default::default()
        };
        // Wait for the presentation engine to release the image before writing it.
        let dependency = vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags::empty(),
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            ..Default::default()
        };
        let rpci = vk::RenderPassCreateInfo {
            s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &color,
            subpass_count: 1,
            p_subpasses: &subpass,
            dependency_count: 1,
            p_dependencies: &dependency,
            ..Default::default()
        };
        self.render_pass = self
            .device
            .create_render_pass(&rpci, None)
            .context("create_render_pass")?;

        for &view in &self.views {
            let fbci = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass: self.render_pass,
                attachment_count: 1,
                p_attachments: &view,
                width: self.plan.extent.width,
                height: self.plan.extent.height,
                layers: 1,
                ..Default::default()
            };
            let fb = self
                .device
                .create_framebuffer(&fbci, None)
                .context("create_framebuffer")?;
            self.framebuffers.push(fb);
        }

        self.cmd_pool = create_command_pool(
            &self.device,
            gpu.families.graphics,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.cmd_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: self.framebuffers.len() as u32,
            ..Default::default()
        };
        self.cmd_bufs = self
            .device
            .allocate_command_buffers(&alloc_info)
            .context("allocate_command_buffers(frame)")?;

        self.images_in_flight = vec![vk::Fence::null(); self.images.len()];
        Ok(())
    }

    // STRICT TEARDOWN ORDER:
    // - free command buffers BEFORE their pool
    // - framebuffers BEFORE the render pass and the views they reference
    // - views BEFORE the swapchain that owns the images
    unsafe fn destroy_dependents(&mut self) {
        let d = &self.device;
        if !self.cmd_bufs.is_empty() {
            d.free_command_buffers(self.cmd_pool, &self.cmd_bufs);
            self.cmd_bufs.clear();
        }
        if self.cmd_pool != vk::CommandPool::null() {
            d.destroy_command_pool(self.cmd_pool, None);
            self.cmd_pool = vk::CommandPool::null();
        }
        for fb in self.framebuffers.drain(..) {
            d.destroy_framebuffer(fb, None);
        }
        if self.render_pass != vk::RenderPass::null() {
            d.destroy_render_pass(self.render_pass, None);
            self.render_pass = vk::RenderPass::null();
        }
        self.images_in_flight.clear();
    }

    unsafe fn destroy_views(&mut self) {
        for view in self.views.drain(..) {
            self.device.destroy_image_view(view, None);
        }
        self.images.clear();
    }

    /// Rebuilds the image set and everything that depends on it, then points
    /// the UI pipeline at the new render pass.
    ///
    /// Returns `Ok(false)` and stays stale while the window has no area; the
    /// next resize retries.
    pub fn recreate(&mut self, gpu: &Gpu, window: RenderSize, ui: &mut UiBackend) -> Result<bool> {
        if window.is_empty() {
            self.state.mark_stale();
            debug!("vk: surface recreate deferred, window is {}x{}", window.width, window.height);
            return Ok(false);
        }

        gpu.wait_idle()?;
        unsafe {
            self.destroy_dependents();
            self.destroy_views();
            self.create(gpu, window)?;
            self.create_dependents(gpu)?;
        }
        ui.set_render_pass(self.render_pass)?;
        self.state.mark_ready();
        info!(
            "vk: surface recreated at {}x{}",
            self.plan.extent.width, self.plan.extent.height
        );
        Ok(true)
    }

    /// Caller must have waited the device idle.
    pub unsafe fn destroy(&mut self) {
        self.destroy_dependents();
        self.destroy_views();
        if self.swapchain != vk::SwapchainKHR::null() {
            self.loader.destroy_swapchain(self.swapchain, None);
            self.swapchain = vk::SwapchainKHR::null();
        }
        self.state.mark_destroyed();
    }

    pub unsafe fn acquire(&self, image_available: vk::Semaphore) -> VkResult<(u32, bool)> {
        self.loader
            .acquire_next_image(self.swapchain, u64::MAX, image_available, vk::Fence::null())
    }

    /// `Ok(true)` means suboptimal.
    pub unsafe fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        render_finished: vk::Semaphore,
    ) -> VkResult<bool> {
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &render_finished,
            swapchain_count: 1,
            p_swapchains: &self.swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        self.loader.queue_present(queue, &present)
    }

    pub fn state(&self) -> SurfaceState {
        self.state
    }

    pub fn mark_stale(&mut self) {
        self.state.mark_stale();
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.plan.extent
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn framebuffer(&self, image: usize) -> vk::Framebuffer {
        self.framebuffers[image]
    }

    pub fn command_buffer(&self, image: usize) -> vk::CommandBuffer {
        self.cmd_bufs[image]
    }

    pub fn image_fence(&self, image: usize) -> vk::Fence {
        self.images_in_flight[image]
    }

    pub fn set_image_fence(&mut self, image: usize, fence: vk::Fence) {
        self.images_in_flight[image] = fence;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(format: vk::Format, cs: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: cs,
        }
    }

    fn caps(current: (u32, u32), min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn prefers_bgra8_unorm_srgb_nonlinear() {
        let formats = [
            fmt(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let f = choose_surface_format(&formats).unwrap();
        assert_eq!(f.format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            fmt(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            fmt(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let f = choose_surface_format(&formats).unwrap();
        assert_eq!(f.format, vk::Format::R16G16B16A16_SFLOAT);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn mailbox_only_when_offered() {
        let both = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        let fifo = [vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&both, VkVsyncMode::Mailbox), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&fifo, VkVsyncMode::Mailbox), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&both, VkVsyncMode::Fifo), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn current_extent_wins_unless_undefined() {
        let fixed = caps((800, 600), 2, 3);
        assert_eq!(
            choose_extent(&fixed, RenderSize::new(1280, 720)),
            vk::Extent2D { width: 800, height: 600 }
        );

        let follow = caps((u32::MAX, u32::MAX), 2, 3);
        assert_eq!(
            choose_extent(&follow, RenderSize::new(1280, 720)),
            vk::Extent2D { width: 1280, height: 720 }
        );
        assert_eq!(
            choose_extent(&follow, RenderSize::new(10_000, 0)),
            vk::Extent2D { width: 4096, height: 1 }
        );
    }

    #[test]
    fn image_count_is_min_plus_one_capped() {
        assert_eq!(choose_image_count(&caps((1, 1), 2, 3)), 3);
        assert_eq!(choose_image_count(&caps((1, 1), 3, 3)), 3);
        assert_eq!(choose_image_count(&caps((1, 1), 2, 0)), 3);
    }

    #[test]
    fn plan_is_stable_for_unchanged_inputs() {
        let c = caps((1280, 720), 2, 8);
        let formats = [fmt(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        let size = RenderSize::new(1280, 720);

        let a = plan_swapchain(&c, &formats, &modes, size, VkVsyncMode::Mailbox).unwrap();
        let b = plan_swapchain(&c, &formats, &modes, size, VkVsyncMode::Mailbox).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.image_count, 3);
        assert_eq!(a.present_mode, vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn plan_without_formats_fails() {
        let c = caps((1280, 720), 2, 8);
        let r = plan_swapchain(&c, &[], &[vk::PresentModeKHR::FIFO], RenderSize::new(1, 1), VkVsyncMode::Fifo);
        assert!(r.is_err());
    }

    #[test]
    fn acquired_image_keeps_index_and_flag() {
        assert_eq!(
            classify_acquire(Ok((2, false))).unwrap(),
            Acquired::Image { index: 2, suboptimal: false }
        );
        assert_eq!(
            classify_acquire(Ok((0, true))).unwrap(),
            Acquired::Image { index: 0, suboptimal: true }
        );
    }

    #[test]
    fn out_of_date_acquire_skips_the_frame() {
        let r = classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap();
        assert_eq!(r, Acquired::OutOfDate);
    }

    #[test]
    fn other_acquire_errors_are_fatal() {
        assert!(classify_acquire(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());
        assert!(classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)).is_err());
    }

    #[test]
    fn clean_present_is_optimal() {
        let s = present_status(false, Ok(false)).unwrap();
        assert_eq!(s, PresentStatus::Optimal);
        assert!(!s.needs_recreate());
    }

    #[test]
    fn suboptimal_acquire_recreates_even_after_clean_present() {
        let s = present_status(true, Ok(false)).unwrap();
        assert_eq!(s, PresentStatus::Suboptimal);
        assert!(s.needs_recreate());
    }

    #[test]
    fn suboptimal_present_recreates() {
        assert_eq!(present_status(false, Ok(true)).unwrap(), PresentStatus::Suboptimal);
        assert_eq!(present_status(true, Ok(true)).unwrap(), PresentStatus::Suboptimal);
    }

    #[test]
    fn out_of_date_present_recreates() {
        let s = present_status(false, Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap();
        assert_eq!(s, PresentStatus::OutOfDate);
        assert!(s.needs_recreate());
    }

    #[test]
    fn surface_lost_on_present_is_fatal() {
        let e = present_status(false, Err(vk::Result::ERROR_SURFACE_LOST_KHR)).unwrap_err();
        assert!(format!("{e}").contains("queue_present"));
    }
}
