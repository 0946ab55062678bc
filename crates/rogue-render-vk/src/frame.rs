// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::vk;
use imgui::DrawData;
use rogue_render::FrameCursor;

use crate::ui::UiBackend;

#[derive(Clone, Copy, Debug)]
pub(crate) struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    /// Created signaled so the first wait on a fresh slot returns at once.
    pub in_flight: vk::Fence,
}

/// Fixed ring of per-frame sync objects. Survives surface recreation.
///
/// `armed[i]` is true while slot `i`'s fence is signaled or has a submission
/// that will signal it. Only armed fences are ever waited on.
pub(crate) struct FrameSlots {
    slots: Vec<FrameSync>,
    armed: Vec<bool>,
    cursor: FrameCursor,
}

impl FrameSlots {
    pub unsafe fn new(device: &ash::Device, count: usize) -> Result<Self> {
        let cursor = FrameCursor::new(count);
        let mut frames = Self {
            slots: Vec::with_capacity(cursor.slot_count()),
            armed: Vec::with_capacity(cursor.slot_count()),
            cursor,
        };

        let sem_ci = vk::SemaphoreCreateInfo::default();
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        for _ in 0..cursor.slot_count() {
            let created = (|| -> Result<FrameSync> {
                let image_available = device.create_semaphore(&sem_ci, None)?;
                let render_finished = device
                    .create_semaphore(&sem_ci, None)
                    .inspect_err(|_| device.destroy_semaphore(image_available, None))?;
                let in_flight = device.create_fence(&fence_ci, None).inspect_err(|_| {
                    device.destroy_semaphore(render_finished, None);
                    device.destroy_semaphore(image_available, None);
                })?;
                Ok(FrameSync {
                    image_available,
                    render_finished,
                    in_flight,
                })
            })();
            match created {
                Ok(sync) => {
                    frames.slots.push(sync);
                    frames.armed.push(true);
                }
                Err(e) => {
                    frames.destroy(device);
                    return Err(e.context("create frame sync objects"));
                }
            }
        }
        Ok(frames)
    }

    pub fn current(&self) -> FrameSync {
        self.slots[self.cursor.slot()]
    }

    pub fn slot(&self) -> usize {
        self.cursor.slot()
    }

    pub fn cursor(&self) -> &FrameCursor {
        &self.cursor
    }

    pub fn advance(&mut self) {
        self.cursor.advance();
    }

    /// Fences that are signaled or will be. Waiting on these cannot hang.
    pub fn armed_fences(&self) -> Vec<vk::Fence> {
        self.slots
            .iter()
            .zip(&self.armed)
            .filter(|(_, armed)| **armed)
            .map(|(s, _)| s.in_flight)
            .collect()
    }

    /// Unsignals the current slot's fence. Call only right before submitting.
    pub unsafe fn reset_current(&mut self, device: &ash::Device) -> Result<()> {
        let fence = self.current().in_flight;
        device.reset_fences(&[fence]).context("reset_fences")?;
        self.disarm_current();
        Ok(())
    }

    fn disarm_current(&mut self) {
        let slot = self.cursor.slot();
        self.armed[slot] = false;
    }

    /// The current slot's fence now has a submission behind it.
    pub fn mark_submitted(&mut self) {
        let slot = self.cursor.slot();
        self.armed[slot] = true;
    }

    pub fn is_current_armed(&self) -> bool {
        self.armed[self.cursor.slot()]
    }

    /// Caller must have waited the device idle.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        self.armed.clear();
        for s in self.slots.drain(..) {
            device.destroy_fence(s.in_flight, None);
            device.destroy_semaphore(s.render_finished, None);
            device.destroy_semaphore(s.image_available, None);
        }
    }
}

/// Per-frame recording target.
pub(crate) struct FrameTarget {
    pub cmd: vk::CommandBuffer,
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear: vk::ClearValue,
    pub slot: usize,
}

/// Clear, UI draw data, done. The command buffer is reset first, so the image's
/// previous submission must have completed.
pub(crate) unsafe fn record_frame(
    device: &ash::Device,
    target: &FrameTarget,
    ui: &mut UiBackend,
    draw_data: &DrawData,
) -> Result<()> {
    let cmd = target.cmd;
    device
        .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        .context("reset_command_buffer")?;
    let bi = vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
        ..Default::default()
    };
    device
        .begin_command_buffer(cmd, &bi)
        .context("begin_command_buffer")?;

    let rp_begin = vk::RenderPassBeginInfo {
        s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
        render_pass: target.render_pass,
        framebuffer: target.framebuffer,
        render_area: vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: target.extent,
        },
        clear_value_count: 1,
        p_clear_values: &target.clear,
        ..Default::default()
    };
    device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
    ui.render(draw_data, cmd, target.slot, target.extent)?;
    device.cmd_end_render_pass(cmd);

    device.end_command_buffer(cmd).context("end_command_buffer")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn null_slots(count: usize) -> FrameSlots {
        let cursor = FrameCursor::new(count);
        let n = cursor.slot_count();
        FrameSlots {
            slots: vec![
                FrameSync {
                    image_available: vk::Semaphore::null(),
                    render_finished: vk::Semaphore::null(),
                    in_flight: vk::Fence::null(),
                };
                n
            ],
            armed: vec![true; n],
            cursor,
        }
    }

    #[test]
    fn fresh_slots_are_all_waitable() {
        let frames = null_slots(3);
        assert_eq!(frames.armed_fences().len(), 3);
        assert!(frames.is_current_armed());
    }

    #[test]
    fn reset_without_submit_is_never_waited_on() {
        let mut frames = null_slots(2);
        // frame failed between the fence reset and queue_submit
        frames.disarm_current();
        assert!(!frames.is_current_armed());
        assert_eq!(frames.armed_fences().len(), 1);
    }

    #[test]
    fn submit_rearms_the_slot() {
        let mut frames = null_slots(2);
        frames.disarm_current();
        frames.mark_submitted();
        frames.advance();
        assert_eq!(frames.slot(), 1);
        assert_eq!(frames.armed_fences().len(), 2);
    }
}
