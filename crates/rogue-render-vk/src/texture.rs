// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::vk;
use rogue_render::{validate_rgba8, GpuTexture, TextureUploader, UiTexture};
use tracing::debug;

use crate::bootstrap::Gpu;
use crate::commands::{create_buffer_and_memory, create_command_pool, one_shot, write_host_memory};
use crate::ui::UiTextureRegistrar;

const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// A sampled RGBA8 image registered with the UI.
#[derive(Debug)]
pub struct VkTexture {
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    sampler: vk::Sampler,
    ui: UiTexture,
    width: u32,
    height: u32,
}

impl GpuTexture for VkTexture {
    fn ui_texture(&self) -> UiTexture {
        self.ui
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }
}

/// Handles created so far by an in-progress upload.
#[derive(Default)]
struct Partial {
    staging: vk::Buffer,
    staging_mem: vk::DeviceMemory,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    sampler: vk::Sampler,
}

impl Partial {
    unsafe fn release_staging(&mut self, device: &ash::Device) {
        if self.staging != vk::Buffer::null() {
            device.destroy_buffer(self.staging, None);
            self.staging = vk::Buffer::null();
        }
        if self.staging_mem != vk::DeviceMemory::null() {
            device.free_memory(self.staging_mem, None);
            self.staging_mem = vk::DeviceMemory::null();
        }
    }

    unsafe fn release_all(mut self, device: &ash::Device) {
        self.release_staging(device);
        if self.sampler != vk::Sampler::null() {
            device.destroy_sampler(self.sampler, None);
        }
        if self.view != vk::ImageView::null() {
            device.destroy_image_view(self.view, None);
        }
        if self.image != vk::Image::null() {
            device.destroy_image(self.image, None);
        }
        if self.memory != vk::DeviceMemory::null() {
            device.free_memory(self.memory, None);
        }
    }
}

/// (src access, dst access, src stage, dst stage) for the two layout moves an upload needs.
fn transition_masks(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> (
    vk::AccessFlags,
    vk::AccessFlags,
    vk::PipelineStageFlags,
    vk::PipelineStageFlags,
) {
    match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        _ => (
            vk::AccessFlags::MEMORY_WRITE,
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
    }
}

unsafe fn cmd_transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) {
    let (src_access, dst_access, src_stage, dst_stage) = transition_masks(old, new);
    let barrier = vk::ImageMemoryBarrier {
        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
        src_access_mask: src_access,
        dst_access_mask: dst_access,
        old_layout: old,
        new_layout: new,
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image,
        subresource_range: COLOR_RANGE,
        ..Default::default()
    };
    device.cmd_pipeline_barrier(
        cmd,
        src_stage,
        dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        std::slice::from_ref(&barrier),
    );
}

/// Synchronous staging uploads on the graphics queue.
///
/// Owns a transient command pool of its own so uploads keep working across
/// surface recreation.
pub struct VkTextureUploader {
    device: ash::Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    queue: vk::Queue,
    pool: vk::CommandPool,
    registrar: UiTextureRegistrar,
}

impl VkTextureUploader {
    pub fn new(gpu: &Gpu, registrar: UiTextureRegistrar) -> Result<Self> {
        let pool = unsafe {
            create_command_pool(
                &gpu.device,
                gpu.families.graphics,
                vk::CommandPoolCreateFlags::TRANSIENT,
            )?
        };
        Ok(Self {
            device: gpu.device.clone(),
            memory_properties: gpu.memory_properties,
            queue: gpu.graphics_queue,
            pool,
            registrar,
        })
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    pub fn registrar(&self) -> &UiTextureRegistrar {
        &self.registrar
    }

    /// Destroys the upload command pool. Textures already handed out stay valid
    /// and can still be released.
    pub fn destroy(&mut self) {
        if self.pool != vk::CommandPool::null() {
            unsafe { self.device.destroy_command_pool(self.pool, None) };
            self.pool = vk::CommandPool::null();
        }
    }

    // STRICT ORDER:
    // 1) staging buffer (host visible) <- pixels
    // 2) device-local image + memory
    // 3) UNDEFINED -> TRANSFER_DST_OPTIMAL     (one-shot)
    // 4) staging -> image copy                 (one-shot)
    // 5) TRANSFER_DST -> SHADER_READ_ONLY      (one-shot)
    // 6) view + sampler
    // 7) register with the UI
    unsafe fn upload_into(
        &self,
        p: &mut Partial,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<UiTexture> {
        let d = &self.device;
        let size = pixels.len() as vk::DeviceSize;

        let (staging, staging_mem) = create_buffer_and_memory(
            d,
            &self.memory_properties,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
        .context("staging buffer")?;
        p.staging = staging;
        p.staging_mem = staging_mem;
        write_host_memory(d, staging_mem, pixels)?;

        let extent = vk::Extent3D {
            width,
            height,
            depth: 1,
        };
        let ici = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format: TEXTURE_FORMAT,
            extent,
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        p.image = d.create_image(&ici, None).context("create_image(texture)")?;
        let req = d.get_image_memory_requirements(p.image);
        let mai = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: crate::commands::find_memory_type(
                &self.memory_properties,
                req.memory_type_bits,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )?,
            ..Default::default()
        };
        p.memory = d
            .allocate_memory(&mai, None)
            .context("allocate_memory(texture)")?;
        d.bind_image_memory(p.image, p.memory, 0)
            .context("bind_image_memory(texture)")?;

        let image = p.image;
        one_shot(d, self.pool, self.queue, |cmd| {
            cmd_transition(
                d,
                cmd,
                image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )
        })?;
        one_shot(d, self.pool, self.queue, |cmd| {
            let region = vk::BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
                image_extent: extent,
            };
            d.cmd_copy_buffer_to_image(
                cmd,
                staging,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            );
        })?;
        one_shot(d, self.pool, self.queue, |cmd| {
            cmd_transition(
                d,
                cmd,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )
        })?;

        let vci = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format: TEXTURE_FORMAT,
            subresource_range: COLOR_RANGE,
            ..Default::default()
        };
        p.view = d.create_image_view(&vci, None).context("create_image_view(texture)")?;

        let sci = vk::SamplerCreateInfo {
            s_type: vk::StructureType::SAMPLER_CREATE_INFO,
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode_u: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_mode_v: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_mode_w: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            max_lod: 1.0,
            ..Default::default()
        };
        p.sampler = d.create_sampler(&sci, None).context("create_sampler(texture)")?;

        self.registrar.register(p.sampler, p.view)
    }
}

impl TextureUploader for VkTextureUploader {
    type Texture = VkTexture;

    /// All or nothing: on failure every handle created so far is released.
    fn upload(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<VkTexture> {
        validate_rgba8(pixels, width, height)?;

        let mut p = Partial::default();
        unsafe {
            match self.upload_into(&mut p, pixels, width, height) {
                Ok(ui) => {
                    p.release_staging(&self.device);
                    debug!("texture {}x{} uploaded", width, height);
                    Ok(VkTexture {
                        image: p.image,
                        memory: p.memory,
                        view: p.view,
                        sampler: p.sampler,
                        ui,
                        width,
                        height,
                    })
                }
                Err(e) => {
                    p.release_all(&self.device);
                    Err(e.context(format!("upload {width}x{height} texture")))
                }
            }
        }
    }

    fn release(&mut self, texture: VkTexture) {
        unsafe {
            self.registrar.unregister(texture.ui);
            self.device.destroy_sampler(texture.sampler, None);
            self.device.destroy_image_view(texture.view, None);
            self.device.destroy_image(texture.image, None);
            self.device.free_memory(texture.memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_transitions_cover_transfer_then_sampling() {
        let (src, dst, src_stage, dst_stage) = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        assert!(src.is_empty());
        assert_eq!(dst, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(dst_stage, vk::PipelineStageFlags::TRANSFER);

        let (src, dst, src_stage, dst_stage) = transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(src, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(dst, vk::AccessFlags::SHADER_READ);
        assert_eq!(src_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }
}
